//! # Sync pool
//!
//! Module dedicated to the synchronization pool, which runs folder
//! cycles in parallel. The pool size bounds both the number of
//! folders synchronized at the same time and the number of hunks of
//! one phase applied at the same time.

use std::{fmt, sync::Arc, time::Duration};

use futures::{stream, FutureExt, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    backend::Backend,
    state::{SyncKey, SyncStateStore},
};

use super::{
    lock::SyncLocks, runner::FolderSyncRunner, ConflictResolver, Error, FolderSyncFailure,
    FolderSyncReport, SyncConfig, SyncEventHandler, SyncReport,
};

/// The synchronization task.
///
/// Associates a folder with the two backends to synchronize.
#[derive(Clone)]
pub struct SyncTask {
    pub key: SyncKey,
    pub local: Arc<dyn Backend>,
    pub remote: Arc<dyn Backend>,
}

impl SyncTask {
    pub fn new(key: SyncKey, local: Arc<dyn Backend>, remote: Arc<dyn Backend>) -> Self {
        Self { key, local, remote }
    }
}

impl fmt::Debug for SyncTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncTask")
            .field("key", &self.key)
            .field("local", &self.local.name())
            .field("remote", &self.remote.name())
            .finish()
    }
}

/// The synchronization pool.
///
/// Cloning a pool gives another handle on the same store, lock table
/// and cancellation token.
#[derive(Clone)]
pub struct SyncPool {
    pub(super) size: usize,
    pub(super) timeout: Duration,
    pub(super) max_commit_attempts: usize,
    pub(super) dry_run: bool,
    pub(super) resolver: ConflictResolver,
    pub(super) store: Arc<dyn SyncStateStore>,
    pub(super) locks: Arc<SyncLocks>,
    pub(super) handler: Option<Arc<SyncEventHandler>>,
    pub(super) cancel: CancellationToken,
}

impl SyncPool {
    pub fn new(
        config: &SyncConfig,
        store: Arc<dyn SyncStateStore>,
        handler: Option<Arc<SyncEventHandler>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            size: config.pool_size(),
            timeout: config.timeout(),
            max_commit_attempts: config.max_commit_attempts(),
            dry_run: config.dry_run(),
            resolver: config.resolver(),
            store,
            locks: Default::default(),
            handler,
            cancel,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn store(&self) -> Arc<dyn SyncStateStore> {
        self.store.clone()
    }

    /// Return the token cancelling all cycles of the pool.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run one folder cycle.
    ///
    /// Cycles of the same folder never overlap: a cycle waits for the
    /// previous one to finish.
    pub async fn sync_folder(
        &self,
        task: &SyncTask,
    ) -> Result<FolderSyncReport, FolderSyncFailure> {
        FolderSyncRunner::new(self, task).run().await
    }

    /// Run the given folder cycles in parallel.
    pub async fn sync(&self, tasks: impl IntoIterator<Item = SyncTask>) -> SyncReport {
        let report = stream::iter(tasks)
            .map(|task| {
                let pool = self.clone();
                let key = task.key.clone();

                tokio::spawn(async move { pool.sync_folder(&task).await }).map(move |res| {
                    res.unwrap_or_else(|err| {
                        debug!(%key, "sync task failed to complete: {err}");
                        Err(FolderSyncFailure::new(key, Error::JoinError(err)))
                    })
                })
            })
            .buffer_unordered(self.size)
            .fold(SyncReport::default(), |mut report, res| async move {
                match res {
                    Ok(folder) => report.folders.push(folder),
                    Err(failure) => report.failures.push(failure),
                }
                report
            })
            .await;

        debug!(
            folders = report.folders.len(),
            failures = report.failures.len(),
            "synchronization done"
        );

        report
    }
}
