//! Integration tests for the certificate issuing pipeline.
//!
//! These tests validate:
//! - A first request records, renders, exports and publishes `{id}.pdf`
//! - Resubmissions re-render from the stored record without a second write
//! - Every launched engine session is released exactly once
//! - The in-process engine honours landscape, background and `@page` size
//! - Failures map to stable codes and leave no ledger record

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use cert_forge::clock::FixedClock;
use cert_forge::engine::{EngineSession, ForgeEngine, PrintOptions, RenderEngine};
use cert_forge::error::{LedgerError, PublishError};
use cert_forge::fonts::FontManager;
use cert_forge::ledger::{InsertOutcome, MemoryLedger, RecipientLedger, RecipientRecord};
use cert_forge::publish::{
    MemoryObjectStore, ObjectAcl, ObjectStore, PutObjectRequest, Publisher, StoredObject,
    PDF_CONTENT_TYPE,
};
use cert_forge::raster::lay_out;
use cert_forge::request::SUCCESS_MESSAGE;
use cert_forge::resources::{BundleResources, EmbeddedResources, StaticResources};
use cert_forge::template::TemplateRenderer;
use cert_forge::{
    CertificateError, CertificateIssuer, CertificateRequest, DocumentExporter, ExportError,
};

// =====================================================================
// Helpers
// =====================================================================

const A4_LONG: f32 = 841.89;
const A4_SHORT: f32 = 595.28;

fn clock() -> Arc<FixedClock> {
    Arc::new(FixedClock(
        Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).single().unwrap(),
    ))
}

struct Harness {
    ledger: Arc<MemoryLedger>,
    store: Arc<MemoryObjectStore>,
    issuer: CertificateIssuer,
}

fn harness_with(engine: Arc<dyn RenderEngine>, timeout: Duration) -> Harness {
    let ledger = Arc::new(MemoryLedger::new());
    let store = Arc::new(MemoryObjectStore::new());
    let issuer = CertificateIssuer::new(
        ledger.clone(),
        TemplateRenderer::new(Arc::new(EmbeddedResources)),
        DocumentExporter::new(engine).with_timeout(timeout),
        Publisher::new(store.clone(), "mw-s3-storage").with_acl(ObjectAcl::PublicReadWrite),
        clock(),
    );
    Harness {
        ledger,
        store,
        issuer,
    }
}

fn harness() -> Harness {
    harness_with(Arc::new(ForgeEngine::new()), Duration::from_secs(30))
}

fn assert_valid_pdf(bytes: &[u8]) {
    assert!(bytes.len() > 100, "PDF too small: {} bytes", bytes.len());
    assert_eq!(&bytes[0..5], b"%PDF-", "Missing PDF header");
}

async fn embedded_markup() -> String {
    let renderer = TemplateRenderer::new(Arc::new(EmbeddedResources));
    let record = RecipientRecord {
        id: "123".into(),
        name: "Maria".into(),
        grade: "B".into(),
        created_at: 0,
    };
    let issued_on = chrono::NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
    let ctx = renderer.context_for(&record, issued_on).await.unwrap();
    renderer.render(&ctx).await.unwrap()
}

// =====================================================================
// Fake engine
// =====================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum Behaviour {
    Succeed,
    FailPrint,
    FailClose,
    Hang,
    /// Prints the loaded markup behind a PDF magic.
    Echo,
}

#[derive(Default)]
struct Counters {
    launched: AtomicUsize,
    closed: AtomicUsize,
    aborted: AtomicUsize,
}

struct FakeEngine {
    behaviour: Behaviour,
    counters: Arc<Counters>,
}

impl FakeEngine {
    fn new(behaviour: Behaviour) -> (Arc<Self>, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let engine = Arc::new(Self {
            behaviour,
            counters: counters.clone(),
        });
        (engine, counters)
    }
}

struct FakeSession {
    behaviour: Behaviour,
    counters: Arc<Counters>,
    markup: String,
}

#[async_trait]
impl EngineSession for FakeSession {
    async fn set_content(&mut self, markup: &str) -> Result<(), ExportError> {
        self.markup = markup.to_string();
        Ok(())
    }

    async fn print_to_pdf(&mut self, _options: &PrintOptions) -> Result<Vec<u8>, ExportError> {
        match self.behaviour {
            Behaviour::Echo => Ok(format!("%PDF-{}", self.markup).into_bytes()),
            Behaviour::FailPrint => Err(ExportError::Print("renderer crashed".into())),
            Behaviour::Hang => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(Vec::new())
            }
            Behaviour::Succeed | Behaviour::FailClose => Ok(b"%PDF-1.7 fake".to_vec()),
        }
    }

    async fn close(&mut self) -> Result<(), ExportError> {
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
        if self.behaviour == Behaviour::FailClose {
            return Err(ExportError::Release("browser did not exit".into()));
        }
        Ok(())
    }

    fn abort(&mut self) {
        self.counters.aborted.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RenderEngine for FakeEngine {
    fn name(&self) -> &str {
        "fake"
    }

    async fn launch(&self) -> Result<Box<dyn EngineSession>, ExportError> {
        self.counters.launched.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            behaviour: self.behaviour,
            counters: self.counters.clone(),
            markup: String::new(),
        }))
    }
}

/// An object store that refuses every write.
struct BrokenStore;

#[async_trait]
impl ObjectStore for BrokenStore {
    async fn put_object(&self, request: PutObjectRequest) -> Result<StoredObject, PublishError> {
        Err(PublishError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            format!("bucket {} is read-only", request.bucket),
        )))
    }

    async fn head_object(
        &self,
        _bucket: &str,
        _key: &str,
    ) -> Result<Option<StoredObject>, PublishError> {
        Ok(None)
    }
}

/// A ledger that never finds a record and always loses the insert to a
/// concurrent writer who recorded `winner` first.
struct RacingLedger {
    winner: RecipientRecord,
    inserts: AtomicUsize,
}

#[async_trait]
impl RecipientLedger for RacingLedger {
    async fn find(&self, _id: &str) -> Result<Option<RecipientRecord>, LedgerError> {
        Ok(None)
    }

    async fn insert_if_absent(
        &self,
        _record: &RecipientRecord,
    ) -> Result<InsertOutcome, LedgerError> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        Ok(InsertOutcome::AlreadyPresent(self.winner.clone()))
    }
}

/// A ledger whose backing store is down.
struct DownLedger;

#[async_trait]
impl RecipientLedger for DownLedger {
    async fn find(&self, _id: &str) -> Result<Option<RecipientRecord>, LedgerError> {
        Err(LedgerError::Unavailable("connection refused".into()))
    }

    async fn insert_if_absent(
        &self,
        _record: &RecipientRecord,
    ) -> Result<InsertOutcome, LedgerError> {
        Err(LedgerError::Unavailable("connection refused".into()))
    }
}

// =====================================================================
// End-to-end issuing
// =====================================================================

#[tokio::test]
async fn first_request_publishes_certificate() {
    let h = harness();
    let response = h
        .issuer
        .handle(r#"{"id":"123","name":"Maria","grade":"B"}"#)
        .await;

    assert_eq!(response.status_code, 201);
    assert_eq!(response.message().as_deref(), Some(SUCCESS_MESSAGE));
    assert_eq!(response.message().as_deref(), Some("Certificado gerado com sucesso"));

    let (object, body) = h
        .store
        .get_object("mw-s3-storage", "123.pdf")
        .await
        .expect("certificate stored");
    assert_eq!(object.content_type, PDF_CONTENT_TYPE);
    assert_eq!(object.content_type, "application/pdf");
    assert_eq!(object.acl, ObjectAcl::PublicReadWrite);
    assert_eq!(object.size, body.len() as u64);
    assert_valid_pdf(&body);

    assert_eq!(h.ledger.len().await, 1);
    let record = h.ledger.find("123").await.unwrap().unwrap();
    assert_eq!(record.name, "Maria");
    assert_eq!(record.grade, "B");
    assert_eq!(record.created_at, 1_709_640_000_000);
}

#[tokio::test]
async fn repeat_request_rerenders_from_stored_record() {
    let h = harness();
    let first = h
        .issuer
        .issue(&CertificateRequest::new("123", "Maria", "B"))
        .await
        .unwrap();
    let second = h
        .issuer
        .issue(&CertificateRequest::new("123", "Maria", "B"))
        .await
        .unwrap();

    assert!(first.newly_recorded);
    assert!(!second.newly_recorded);
    assert_eq!(second.record, first.record);
    assert_eq!(h.ledger.len().await, 1);
    // Published twice, same key overwritten.
    assert_eq!(h.store.put_count(), 2);
    assert_eq!(h.store.object_count().await, 1);
    assert_eq!(second.object.key, "123.pdf");
}

#[tokio::test]
async fn conflicting_resubmission_uses_stored_data() {
    let h = harness();
    h.issuer
        .issue(&CertificateRequest::new("7", "Ana", "A"))
        .await
        .unwrap();
    let again = h
        .issuer
        .issue(&CertificateRequest::new("7", "Ana Paula", "C"))
        .await
        .unwrap();

    assert_eq!(again.record.name, "Ana");
    assert_eq!(again.record.grade, "A");
}

#[tokio::test]
async fn validation_failure_has_no_side_effects() {
    let (engine, counters) = FakeEngine::new(Behaviour::Succeed);
    let h = harness_with(engine, Duration::from_secs(5));

    for body in [
        "not json",
        r#"{"name":"Maria","grade":"B"}"#,
        r#"{"id":"   ","name":"Maria","grade":"B"}"#,
        r#"{"id":"123","name":"Maria","grade":""}"#,
        r#"{"id":"../etc","name":"Maria","grade":"B"}"#,
    ] {
        let response = h.issuer.handle(body).await;
        assert_eq!(response.status_code, 400, "{body}");
        assert_eq!(response.code().as_deref(), Some("VALIDATION_FAILED"));
    }

    assert!(h.ledger.is_empty().await);
    assert_eq!(h.store.put_count(), 0);
    assert_eq!(counters.launched.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn publish_failure_leaves_no_record() {
    let ledger = Arc::new(MemoryLedger::new());
    let issuer = CertificateIssuer::new(
        ledger.clone(),
        TemplateRenderer::new(Arc::new(EmbeddedResources)),
        DocumentExporter::new(Arc::new(ForgeEngine::new())),
        Publisher::new(Arc::new(BrokenStore), "mw-s3-storage"),
        clock(),
    );

    let response = issuer
        .handle(r#"{"id":"123","name":"Maria","grade":"B"}"#)
        .await;
    assert_eq!(response.status_code, 502);
    assert_eq!(response.code().as_deref(), Some("PUBLISH_FAILED"));
    assert!(ledger.is_empty().await);
}

#[tokio::test]
async fn missing_template_variable_maps_to_template_code() {
    let ledger = Arc::new(MemoryLedger::new());
    let store = Arc::new(MemoryObjectStore::new());
    let issuer = CertificateIssuer::new(
        ledger.clone(),
        TemplateRenderer::new(Arc::new(StaticResources::new(
            "<p>{{name}} {{course}}</p>",
            vec![0u8; 4],
        ))),
        DocumentExporter::new(Arc::new(ForgeEngine::new())),
        Publisher::new(store.clone(), "mw-s3-storage"),
        clock(),
    );

    let err = issuer
        .issue(&CertificateRequest::new("1", "Maria", "B"))
        .await
        .unwrap_err();
    assert!(matches!(err, CertificateError::Template(_)));
    assert_eq!(err.code(), "TEMPLATE_INVALID");
    assert_eq!(err.status_code(), 500);
    assert!(ledger.is_empty().await);
    assert_eq!(store.put_count(), 0);
}

#[tokio::test]
async fn lost_insert_race_republishes_stored_record() {
    let (engine, counters) = FakeEngine::new(Behaviour::Echo);
    let ledger = Arc::new(RacingLedger {
        winner: RecipientRecord {
            id: "7".into(),
            name: "Winner".into(),
            grade: "A".into(),
            created_at: 1,
        },
        inserts: AtomicUsize::new(0),
    });
    let store = Arc::new(MemoryObjectStore::new());
    let issuer = CertificateIssuer::new(
        ledger.clone(),
        TemplateRenderer::new(Arc::new(StaticResources::new(
            "<p>{{name}} {{grade}}</p>",
            vec![0u8; 4],
        ))),
        DocumentExporter::new(engine),
        Publisher::new(store.clone(), "mw-s3-storage"),
        clock(),
    );

    let issued = issuer
        .issue(&CertificateRequest::new("7", "Loser", "C"))
        .await
        .unwrap();

    assert!(!issued.newly_recorded);
    assert_eq!(issued.record.name, "Winner");
    assert_eq!(ledger.inserts.load(Ordering::SeqCst), 1);
    assert_eq!(counters.launched.load(Ordering::SeqCst), 2);

    let (_, body) = store.get_object("mw-s3-storage", "7.pdf").await.unwrap();
    let body = String::from_utf8(body).unwrap();
    assert!(body.contains("Winner A"), "{body}");
    assert!(!body.contains("Loser"), "{body}");
    assert_eq!(store.object_count().await, 1);
}

#[tokio::test]
async fn ledger_outage_aborts_before_rendering() {
    let (engine, counters) = FakeEngine::new(Behaviour::Succeed);
    let store = Arc::new(MemoryObjectStore::new());
    let issuer = CertificateIssuer::new(
        Arc::new(DownLedger),
        TemplateRenderer::new(Arc::new(EmbeddedResources)),
        DocumentExporter::new(engine),
        Publisher::new(store.clone(), "mw-s3-storage"),
        clock(),
    );

    let response = issuer
        .handle(r#"{"id":"123","name":"Maria","grade":"B"}"#)
        .await;
    assert_eq!(response.status_code, 503);
    assert_eq!(response.code().as_deref(), Some("LEDGER_UNAVAILABLE"));
    assert_eq!(counters.launched.load(Ordering::SeqCst), 0);
    assert_eq!(store.put_count(), 0);
}

#[tokio::test]
async fn missing_bundle_maps_to_resource_code() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, counters) = FakeEngine::new(Behaviour::Succeed);
    let ledger = Arc::new(MemoryLedger::new());
    let store = Arc::new(MemoryObjectStore::new());
    let issuer = CertificateIssuer::new(
        ledger.clone(),
        TemplateRenderer::new(Arc::new(BundleResources::new(dir.path()))),
        DocumentExporter::new(engine),
        Publisher::new(store.clone(), "mw-s3-storage"),
        clock(),
    );

    let response = issuer
        .handle(r#"{"id":"123","name":"Maria","grade":"B"}"#)
        .await;
    assert_eq!(response.status_code, 500);
    assert_eq!(response.code().as_deref(), Some("RESOURCE_MISSING"));
    assert_eq!(counters.launched.load(Ordering::SeqCst), 0);
    assert!(ledger.is_empty().await);
    assert_eq!(store.put_count(), 0);
}

// =====================================================================
// Engine lifecycle
// =====================================================================

#[tokio::test]
async fn successful_export_closes_session_once() {
    let (engine, counters) = FakeEngine::new(Behaviour::Succeed);
    let exporter = DocumentExporter::new(engine);

    let artifact = exporter.export_document("<p>hi</p>").await.unwrap();
    assert!(artifact.is_pdf());
    assert_eq!(counters.launched.load(Ordering::SeqCst), 1);
    assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    assert_eq!(counters.aborted.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn print_failure_still_closes_session_once() {
    let (engine, counters) = FakeEngine::new(Behaviour::FailPrint);
    let h = harness_with(engine, Duration::from_secs(5));

    let response = h
        .issuer
        .handle(r#"{"id":"123","name":"Maria","grade":"B"}"#)
        .await;
    assert_eq!(response.status_code, 500);
    assert_eq!(response.code().as_deref(), Some("RENDER_FAILED"));

    assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    assert_eq!(counters.aborted.load(Ordering::SeqCst), 0);
    assert!(h.ledger.is_empty().await);
    assert_eq!(h.store.put_count(), 0);
}

#[tokio::test]
async fn close_failure_is_reported_after_good_print() {
    let (engine, counters) = FakeEngine::new(Behaviour::FailClose);
    let exporter = DocumentExporter::new(engine);

    let err = exporter.export_document("<p>hi</p>").await.unwrap_err();
    assert!(matches!(err, ExportError::Release(_)));
    assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn timeout_releases_session_and_maps_to_504() {
    let (engine, counters) = FakeEngine::new(Behaviour::Hang);
    let h = harness_with(engine, Duration::from_millis(50));

    let err = h
        .issuer
        .issue(&CertificateRequest::new("123", "Maria", "B"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CertificateError::Export(ExportError::Timeout(_))
    ));
    assert_eq!(err.status_code(), 504);

    assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    assert_eq!(counters.aborted.load(Ordering::SeqCst), 0);
    assert!(h.ledger.is_empty().await);
}

// =====================================================================
// In-process engine output
// =====================================================================

#[tokio::test]
async fn embedded_template_lays_out_a4_landscape() {
    let markup = embedded_markup().await;
    let layout = lay_out(&markup, &PrintOptions::certificate(), &FontManager::default()).unwrap();

    assert!(layout.is_landscape());
    assert!((layout.page_width_pt - A4_LONG).abs() < 0.5);
    assert!((layout.page_height_pt - A4_SHORT).abs() < 0.5);
    assert_eq!(layout.title, "Certificado 123");
    assert!(layout.has_backgrounds());

    let lines = layout.text_lines();
    assert!(lines.iter().any(|l| l.contains("Maria")), "{lines:?}");
    assert!(lines.iter().any(|l| l.contains("05/03/2024")), "{lines:?}");
}

#[tokio::test]
async fn css_page_size_beats_portrait_option() {
    let markup = embedded_markup().await;
    let options = PrintOptions {
        landscape: false,
        ..PrintOptions::certificate()
    };
    let layout = lay_out(&markup, &options, &FontManager::default()).unwrap();
    assert!(layout.is_landscape());

    // Without the preference the options decide.
    let options = PrintOptions {
        landscape: false,
        prefer_css_page_size: false,
        ..PrintOptions::certificate()
    };
    let layout = lay_out(&markup, &options, &FontManager::default()).unwrap();
    assert!(!layout.is_landscape());
    assert!((layout.page_width_pt - A4_SHORT).abs() < 0.5);
}

#[tokio::test]
async fn backgrounds_dropped_when_disabled() {
    let markup = embedded_markup().await;
    let options = PrintOptions {
        print_background: false,
        ..PrintOptions::certificate()
    };
    let layout = lay_out(&markup, &options, &FontManager::default()).unwrap();
    assert!(!layout.has_backgrounds());
    assert!(layout.page_background.is_none());
}

#[tokio::test]
async fn forge_engine_exports_embedded_template() {
    let markup = embedded_markup().await;
    let artifact = DocumentExporter::new(Arc::new(ForgeEngine::new()))
        .export_document(&markup)
        .await
        .unwrap();
    assert_valid_pdf(artifact.bytes());
}

#[tokio::test]
async fn overly_nested_markup_fails_cleanly() {
    let exporter = DocumentExporter::new(Arc::new(ForgeEngine::new()));
    let nested = |n: usize| format!("{}<p>deep</p>{}", "<div>".repeat(n), "</div>".repeat(n));

    let artifact = exporter.export_document(&nested(120)).await.unwrap();
    assert_valid_pdf(artifact.bytes());

    let err = exporter.export_document(&nested(500)).await.unwrap_err();
    assert!(matches!(err, ExportError::Load(_)), "{err}");
}

#[tokio::test]
async fn blank_markup_is_a_render_failure() {
    let err = DocumentExporter::new(Arc::new(ForgeEngine::new()))
        .export_document("   ")
        .await
        .unwrap_err();
    let err = CertificateError::from(err);
    assert_eq!(err.code(), "RENDER_FAILED");
    assert_eq!(err.status_code(), 500);
}
