//! Per-item state machine.
//!
//! One [`ItemWorker`] runs one attempt of one item: acquire a lease, copy,
//! process, index, then report exactly one terminal outcome to its owner.

mod types;
mod worker;

pub use types::{
    lease_request_id, ItemFailure, ItemOutcome, ItemOwner, LeaseSlot, WorkerContext, WorkerError,
};
pub use worker::ItemWorker;
