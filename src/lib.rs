//! # cert-forge – idempotent certificate issuing
//!
//! A request `{id, name, grade}` goes through four stages:
//!
//! 1. **Ledger** – look the recipient up; stored records are authoritative ([`ledger`])
//! 2. **Template** – merge the record, issue date and medal into markup ([`template`])
//! 3. **Export** – print the markup to an A4 landscape PDF in a headless engine ([`export`], [`engine`])
//! 4. **Publish** – store the PDF as `{id}.pdf` ([`publish`])
//!
//! The ledger is written after a successful publish ([`issuer`]).
//!
//! The default engine is an in-process rasterizer:
//! markup ([`dom`]) → styles ([`stylesheet`], [`style`]) → flexbox layout with Taffy
//! ([`layout`]) → pages ([`pagination`], [`page_layout`]) → printpdf ([`render`]),
//! driven by [`raster`]. [`chromium`] shells out to a headless Chromium instead.

pub mod chromium;
pub mod clock;
pub mod config;
pub mod dom;
pub mod engine;
pub mod error;
pub mod export;
pub mod fonts;
pub mod issuer;
pub mod layout;
pub mod ledger;
pub mod page_layout;
pub mod pagination;
pub mod publish;
pub mod raster;
pub mod render;
pub mod request;
pub mod resources;
pub mod style;
pub mod stylesheet;
pub mod template;

// Re-exports for convenience
pub use error::{CertificateError, ExportError, Result};
pub use export::{CertificateArtifact, DocumentExporter};
pub use issuer::{CertificateIssuer, IssuedCertificate};
pub use request::{ApiResponse, CertificateRequest};
