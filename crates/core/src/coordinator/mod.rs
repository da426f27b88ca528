//! Weighted lease admission.
//!
//! One [`ConcurrencyCoordinator`] per category caps the total weight of
//! outstanding leases. Callers that don't fit wait in a strict FIFO queue;
//! a release or TTL expiry drains the queue from the head while the head fits.

mod coordinator;
mod registry;
mod types;

pub use coordinator::ConcurrencyCoordinator;
pub use registry::{spawn_reapers, CoordinatorRegistry};
pub use types::{CoordinatorError, CoordinatorStatus, Lease};
