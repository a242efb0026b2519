//! Record types flowing through the pipeline.
//!
//! A [`RawRecord`] is what a worker scraped; a [`LeadRecord`] is what
//! survives validation and gets persisted.

pub mod canonical;
pub mod index;
pub mod lead;
pub mod raw;

pub use canonical::canonical_identifier;
pub use index::{IndexMatch, LeadIndex};
pub use lead::{lead_id, LeadError, LeadRecord, LeadStatus};
pub use raw::{Payload, RawRecord};
