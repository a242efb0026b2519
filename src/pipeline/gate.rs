//! Single-run gate.
//!
//! At most one run holds the lease at a time. The lease carries the owning
//! run id and an expiry; the owner renews it through a heartbeat while the
//! run is alive, and a lease left to expire may be taken over by a new run.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
struct Lease {
    owner: Uuid,
    expires_at: Instant,
}

/// Lease-based mutual exclusion for pipeline runs.
#[derive(Debug)]
pub struct RunGate {
    lease: Mutex<Option<Lease>>,
    ttl: Duration,
}

impl RunGate {
    pub fn new(ttl: Duration) -> Self {
        Self {
            lease: Mutex::new(None),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn lock(&self) -> MutexGuard<'_, Option<Lease>> {
        self.lease.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claims the lease for `owner`.
    ///
    /// Returns the id of the run holding a live lease when the gate is taken.
    pub fn acquire(self: &Arc<Self>, owner: Uuid) -> Result<LeaseGuard, Uuid> {
        let now = Instant::now();
        let mut lease = self.lock();
        if let Some(current) = *lease {
            if current.expires_at > now {
                return Err(current.owner);
            }
            warn!(
                expired_run = %current.owner,
                run_id = %owner,
                "Taking over expired run lease"
            );
        }
        *lease = Some(Lease {
            owner,
            expires_at: now + self.ttl,
        });
        debug!(run_id = %owner, "Run lease acquired");
        Ok(LeaseGuard {
            gate: Arc::clone(self),
            owner,
        })
    }

    /// Run currently holding a live lease.
    pub fn holder(&self) -> Option<Uuid> {
        let now = Instant::now();
        self.lock()
            .filter(|lease| lease.expires_at > now)
            .map(|lease| lease.owner)
    }

    fn renew(&self, owner: Uuid) -> bool {
        let mut lease = self.lock();
        match lease.as_mut() {
            Some(current) if current.owner == owner => {
                current.expires_at = Instant::now() + self.ttl;
                true
            }
            _ => false,
        }
    }

    fn release(&self, owner: Uuid) {
        let mut lease = self.lock();
        if lease.map(|l| l.owner) == Some(owner) {
            *lease = None;
            debug!(run_id = %owner, "Run lease released");
        }
    }
}

/// Held lease. Dropping it releases the gate.
#[derive(Debug)]
pub struct LeaseGuard {
    gate: Arc<RunGate>,
    owner: Uuid,
}

impl LeaseGuard {
    pub fn owner(&self) -> Uuid {
        self.owner
    }

    /// Extends the lease. Returns `false` if it was taken over.
    pub fn renew(&self) -> bool {
        self.gate.renew(self.owner)
    }

    /// Renews the lease every third of its lifetime until the returned
    /// heartbeat is stopped or dropped.
    pub fn heartbeat(&self) -> Heartbeat {
        let gate = Arc::clone(&self.gate);
        let owner = self.owner;
        let period = (gate.ttl / 3).max(Duration::from_millis(1));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !gate.renew(owner) {
                    warn!(run_id = %owner, "Run lease lost, heartbeat stopping");
                    break;
                }
            }
        });
        Heartbeat { handle }
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        self.gate.release(self.owner);
    }
}

/// Background lease renewal.
#[derive(Debug)]
pub struct Heartbeat {
    handle: JoinHandle<()>,
}

impl Heartbeat {
    pub fn stop(self) {
        self.handle.abort();
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
