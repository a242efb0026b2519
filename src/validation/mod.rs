//! Validation engine for scraped records.
//!
//! Every record passes through three stages (schema, cross-reference and
//! external verification), each yielding a sub-score. The weighted
//! aggregate is compared with the configured confidence threshold to accept,
//! reject, or quarantine the record.

pub mod cross_reference;
pub mod engine;
pub mod external;
pub mod schema;
pub mod verdict;

pub use cross_reference::{CrossReferenceCheck, CrossReferenceOutcome, DEFAULT_CATEGORIES};
pub use engine::ValidationEngine;
pub use external::{
    ExternalCheck, ExternalOutcome, HttpVerifier, StaticVerifier, Verification, Verifier,
};
pub use schema::{FieldError, FieldKind, FieldRule, LeadSchema, SchemaReport};
pub use verdict::{ConfidenceWeights, Decision, Stage, StageResult, ValidationVerdict};
