//! Snapshot persistence.

mod snapshot;

pub use snapshot::{SnapshotStore, StoreError};
