//! # Sync lock
//!
//! Module dedicated to the per-folder mutual exclusion of
//! synchronization cycles within one process.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

use crate::state::SyncKey;

/// The synchronization lock table.
///
/// Holds one lock per [`SyncKey`]. Cycles of different keys never
/// wait for each other, cycles of the same key run one after the
/// other.
#[derive(Debug, Default)]
pub struct SyncLocks {
    locks: Mutex<HashMap<SyncKey, Arc<Mutex<()>>>>,
}

impl SyncLocks {
    /// Wait for the lock of the given key. The lock is released when
    /// the returned guard is dropped.
    ///
    /// Entries nobody holds nor waits for are pruned on the way.
    pub async fn lock(&self, key: &SyncKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(key.clone()).or_default().clone()
        };

        trace!(%key, "waiting for sync lock");
        lock.lock_owned().await
    }
}
