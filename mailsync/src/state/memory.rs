//! # Memory state store
//!
//! Module dedicated to the in-memory implementation of the
//! [`SyncStateStore`]. Bases do not survive the process, which makes
//! this store suitable for tests and for one-shot synchronizations.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::{Error, Result, SyncBase, SyncKey, SyncStateStore};

/// The in-memory state store.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    bases: Mutex<HashMap<SyncKey, SyncBase>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SyncStateStore for MemoryStateStore {
    async fn get(&self, key: &SyncKey) -> Result<Option<SyncBase>> {
        let bases = self.bases.lock().await;
        Ok(bases.get(key).cloned())
    }

    async fn compare_and_swap(
        &self,
        key: &SyncKey,
        expected: Option<u64>,
        base: SyncBase,
    ) -> Result<()> {
        let mut bases = self.bases.lock().await;
        let current = bases.get(key).map(|base| base.revision);

        if current != expected {
            return Err(Error::CommitConflictError(key.clone(), expected, current));
        }

        debug!(%key, revision = base.revision, "committed sync base");
        bases.insert(key.clone(), base);
        Ok(())
    }
}
