//! ImageAudit Core - Image Metadata Conformance Engine
//!
//! # Ground Rules
//! 1. Schemas Are Compiled Once
//! 2. Defects Are Data, Not Errors
//! 3. Extraction Is Verbatim
//! 4. Absent Is Explicit
//! 5. Only Schema and Catalog Failures Abort a Run

pub mod schema;
pub mod validation;
pub mod catalog;
pub mod hashing;
pub mod report;
pub mod pipeline;

pub use schema::{compile, Constraint, Schema, SchemaCompilationError, SchemaRegistry, DEFAULT_SCHEMA_VERSION};
pub use validation::{classify, Classifier, Defect, DefectCategory, ExtractedFields, MistypedKeys, ValidationOutcome};
pub use catalog::{is_eligible, parse_listing, read_listing, ImageRecord, ImageRetrievalError, ImageSource, JsonImageSource, PropertyBag, NAMESPACE_PREFIX};
pub use hashing::{canonical_json, compute_schema_digest};
pub use report::{render_json, size_gib, ImageReport, TextRenderer};
pub use pipeline::{AuditError, AuditPipeline, AuditSummary, ImageFilter};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
