//! Acquisition capability.
//!
//! Turning a locator into scraped fields is delegated to an [`Acquirer`],
//! one per venue. The worker pool asks the router which venue to use and
//! calls the matching acquirer through a [`VenueSet`].

pub mod http;

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::AcquisitionError;
use crate::records::Payload;
use crate::routing::Venue;
use crate::scheduler::Task;

pub use http::{HttpAcquirer, UnconfiguredAcquirer};

/// Fetches the fields for one task.
#[async_trait]
pub trait Acquirer: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Performs one acquisition attempt.
    ///
    /// Return `Transient` for failures worth retrying (network errors,
    /// throttling, server errors) and `Rejected` when the source definitively
    /// refused the locator.
    async fn acquire(&self, task: &Task) -> Result<Payload, AcquisitionError>;
}

/// The acquirer for each venue.
#[derive(Clone)]
pub struct VenueSet {
    local: Arc<dyn Acquirer>,
    cloud: Arc<dyn Acquirer>,
}

impl VenueSet {
    pub fn new(local: Arc<dyn Acquirer>, cloud: Arc<dyn Acquirer>) -> Self {
        Self { local, cloud }
    }

    pub fn get(&self, venue: Venue) -> Arc<dyn Acquirer> {
        match venue {
            Venue::Local => Arc::clone(&self.local),
            Venue::Cloud => Arc::clone(&self.cloud),
        }
    }
}

impl std::fmt::Debug for VenueSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VenueSet")
            .field("local", &self.local.name())
            .field("cloud", &self.cloud.name())
            .finish()
    }
}
