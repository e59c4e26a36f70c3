//! Certificate issuing pipeline.
//!
//! validate → look up → render → export → publish → record. The ledger is
//! written last, so a failed render, export or publish leaves no record and
//! the next request simply retries.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{error, info, warn};

use crate::chromium::ChromiumEngine;
use crate::clock::{Clock, SystemClock};
use crate::config::{EngineKind, LedgerBackend, ResourceSource, Settings, StorageBackend};
use crate::engine::{ForgeEngine, RenderEngine};
use crate::error::{CertificateError, Result};
use crate::export::DocumentExporter;
use crate::ledger::{ensure_recorded, MemoryLedger, RecipientLedger, RecipientRecord, SqliteLedger};
use crate::publish::{LocalObjectStore, MemoryObjectStore, ObjectStore, Publisher, StoredObject};
use crate::request::{parse_request, ApiResponse, CertificateRequest};
use crate::resources::{BundleResources, EmbeddedResources, ResourceLoader};
use crate::template::TemplateRenderer;

/// Outcome of a successful issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCertificate {
    /// The stored record the certificate was rendered from.
    pub record: RecipientRecord,
    /// Whether this request created the ledger record.
    pub newly_recorded: bool,
    pub object: StoredObject,
}

pub struct CertificateIssuer {
    ledger: Arc<dyn RecipientLedger>,
    renderer: TemplateRenderer,
    exporter: DocumentExporter,
    publisher: Publisher,
    clock: Arc<dyn Clock>,
}

impl CertificateIssuer {
    pub fn new(
        ledger: Arc<dyn RecipientLedger>,
        renderer: TemplateRenderer,
        exporter: DocumentExporter,
        publisher: Publisher,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            renderer,
            exporter,
            publisher,
            clock,
        }
    }

    /// Wire the configured backends.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        settings.validate()?;

        let loader: Arc<dyn ResourceLoader> = match settings.resources.source {
            ResourceSource::Embedded => Arc::new(EmbeddedResources),
            ResourceSource::Bundle => Arc::new(BundleResources::with_paths(
                &settings.resources.root,
                &settings.resources.template,
                &settings.resources.medal,
            )),
        };

        let ledger: Arc<dyn RecipientLedger> = match settings.ledger.backend {
            LedgerBackend::Memory => Arc::new(MemoryLedger::new()),
            LedgerBackend::Sqlite => Arc::new(SqliteLedger::open(
                &settings.ledger.path,
                &settings.ledger.table,
            )?),
        };

        let store: Arc<dyn ObjectStore> = match settings.storage.backend {
            StorageBackend::Memory => Arc::new(MemoryObjectStore::new()),
            StorageBackend::Local => Arc::new(LocalObjectStore::new(&settings.storage.root)),
        };
        let mut publisher =
            Publisher::new(store, settings.storage.bucket.clone()).with_acl(settings.storage.acl);
        if let Some(base) = &settings.storage.public_base_url {
            publisher = publisher.with_public_base_url(base.clone());
        }

        let engine: Arc<dyn RenderEngine> = match settings.export.engine {
            EngineKind::Forge => Arc::new(ForgeEngine::new()),
            EngineKind::Chromium => Arc::new(
                ChromiumEngine::new(&settings.export.chromium_path)
                    .with_args(settings.export.chromium_args.iter().cloned()),
            ),
        };
        let mut exporter = DocumentExporter::new(engine).with_timeout(settings.export.timeout());
        if let Some(path) = &settings.export.dump_path {
            exporter = exporter.with_dump_path(path);
        }

        Ok(Self::new(
            ledger,
            TemplateRenderer::new(loader),
            exporter,
            publisher,
            Arc::new(SystemClock),
        ))
    }

    /// Run the whole pipeline for one request.
    pub async fn issue(&self, request: &CertificateRequest) -> Result<IssuedCertificate> {
        let valid = request.validate()?;
        let now = self.clock.now();

        let stored = self.ledger.find(&valid.id).await?;
        let record = match &stored {
            Some(existing) => {
                if !existing.same_recipient(&valid.name, &valid.grade) {
                    warn!(
                        "recipient {} resubmitted with different name/grade; using stored record",
                        existing.id
                    );
                }
                existing.clone()
            }
            None => RecipientRecord {
                id: valid.id,
                name: valid.name,
                grade: valid.grade,
                created_at: now.timestamp_millis(),
            },
        };

        let mut object = self.produce(&record, now).await?;

        let (record, newly_recorded) = match stored {
            Some(_) => {
                info!("recipient {} already recorded, skipping write", record.id);
                (record, false)
            }
            None => {
                let outcome = ensure_recorded(self.ledger.as_ref(), record.clone()).await?;
                if !outcome.created
                    && !outcome.record.same_recipient(&record.name, &record.grade)
                {
                    // Lost the insert race; the published copy must match the stored record.
                    warn!(
                        "recipient {} was recorded concurrently; republishing from stored record",
                        record.id
                    );
                    object = self.produce(&outcome.record, now).await?;
                }
                (outcome.record, outcome.created)
            }
        };

        Ok(IssuedCertificate {
            record,
            newly_recorded,
            object,
        })
    }

    /// Render, export and publish `record`'s certificate.
    async fn produce(
        &self,
        record: &RecipientRecord,
        now: DateTime<Utc>,
    ) -> Result<StoredObject> {
        let ctx = self.renderer.context_for(record, now.date_naive()).await?;
        let markup = self.renderer.render(&ctx).await?;
        let artifact = self.exporter.export_document(&markup).await?;
        let object = self
            .publisher
            .publish(&record.id, artifact.into_bytes())
            .await?;
        Ok(object)
    }

    /// Decode `body`, issue, and shape the transport response.
    pub async fn handle(&self, body: &str) -> ApiResponse {
        let result = match parse_request(body) {
            Ok(request) => self.issue(&request).await.map(|_| ()),
            Err(e) => Err(CertificateError::from(e)),
        };
        match result {
            Ok(()) => ApiResponse::created(),
            Err(e) => {
                error!("certificate request failed [{}]: {e}", e.code());
                ApiResponse::failure(&e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::resources::StaticResources;
    use chrono::{TimeZone, Utc};

    const TEMPLATE: &str = "<html><body><h1>{{name}}</h1><p>{{grade}} {{date}}</p></body></html>";

    fn issuer(ledger: Arc<MemoryLedger>, store: Arc<MemoryObjectStore>) -> CertificateIssuer {
        CertificateIssuer::new(
            ledger,
            TemplateRenderer::new(Arc::new(StaticResources::new(TEMPLATE, vec![1, 2, 3]))),
            DocumentExporter::new(Arc::new(ForgeEngine::new())),
            Publisher::new(store, "mw-s3-storage"),
            Arc::new(FixedClock(
                Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).single().unwrap(),
            )),
        )
    }

    #[tokio::test]
    async fn first_issue_records_and_publishes() {
        let ledger = Arc::new(MemoryLedger::new());
        let store = Arc::new(MemoryObjectStore::new());
        let issued = issuer(ledger.clone(), store.clone())
            .issue(&CertificateRequest::new("123", "Maria", "B"))
            .await
            .unwrap();

        assert!(issued.newly_recorded);
        assert_eq!(issued.object.key, "123.pdf");
        assert_eq!(issued.record.created_at, 1_709_640_000_000);
        assert_eq!(ledger.len().await, 1);
    }

    #[tokio::test]
    async fn resubmission_keeps_stored_record() {
        let ledger = Arc::new(MemoryLedger::new());
        let store = Arc::new(MemoryObjectStore::new());
        let issuer = issuer(ledger.clone(), store.clone());

        issuer
            .issue(&CertificateRequest::new("123", "Maria", "B"))
            .await
            .unwrap();
        let again = issuer
            .issue(&CertificateRequest::new("123", "Mariana", "A"))
            .await
            .unwrap();

        assert!(!again.newly_recorded);
        assert_eq!(again.record.name, "Maria");
        assert_eq!(again.record.grade, "B");
        assert_eq!(store.put_count(), 2);
        assert_eq!(store.object_count().await, 1);
    }

    #[tokio::test]
    async fn invalid_body_has_no_side_effects() {
        let ledger = Arc::new(MemoryLedger::new());
        let store = Arc::new(MemoryObjectStore::new());
        let response = issuer(ledger.clone(), store.clone())
            .handle(r#"{"id":"","name":"Maria"}"#)
            .await;

        assert_eq!(response.status_code, 400);
        assert_eq!(response.code().as_deref(), Some("VALIDATION_FAILED"));
        assert!(ledger.is_empty().await);
        assert_eq!(store.put_count(), 0);
    }

    #[tokio::test]
    async fn template_error_leaves_no_record() {
        let ledger = Arc::new(MemoryLedger::new());
        let store = Arc::new(MemoryObjectStore::new());
        let issuer = CertificateIssuer::new(
            ledger.clone(),
            TemplateRenderer::new(Arc::new(StaticResources::new("<p>{{unknown}}</p>", vec![]))),
            DocumentExporter::new(Arc::new(ForgeEngine::new())),
            Publisher::new(store.clone(), "mw-s3-storage"),
            Arc::new(SystemClock),
        );
        let response = issuer
            .handle(r#"{"id":"9","name":"Ana","grade":"C"}"#)
            .await;
        assert_eq!(response.status_code, 500);
        assert_eq!(response.code().as_deref(), Some("TEMPLATE_INVALID"));
        assert!(ledger.is_empty().await);
        assert_eq!(store.put_count(), 0);
    }

    #[test]
    fn wires_from_settings() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::from_toml(&format!(
            "[ledger]\npath = {:?}\n[storage]\nroot = {:?}\n",
            dir.path().join("ledger.sqlite"),
            dir.path().join("storage"),
        ))
        .unwrap();
        let issuer = CertificateIssuer::from_settings(&settings).unwrap();
        assert_eq!(issuer.publisher.bucket(), "mw-s3-storage");
    }
}
