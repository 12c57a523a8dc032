//! # Synchronization
//!
//! Module dedicated to the synchronization of folders between a local
//! and a remote backend. The main structure of this module is the
//! [`SyncBuilder`], which builds a [`SyncPool`] running folder cycles.
//!
//! A folder cycle goes through the following states:
//!
//! ```text
//! Idle -> Listing -> Diffing -> Applying -> Committing -> Idle
//!                                        \-> Aborted -> Idle
//! ```
//!
//! `Listing` reads the base and lists both sides, `Diffing` builds the
//! [`SyncPatch`], `Applying` applies it and `Committing` saves the
//! next base. A cycle that aborts leaves the base as it was, so that
//! the next cycle recomputes the remaining changes.

pub mod apply;
pub mod checkpoint;
pub mod config;
pub mod conflict;
mod error;
pub mod hunk;
pub mod lock;
pub mod patch;
pub mod pool;
pub mod report;
mod runner;

use std::{fmt, future::Future, pin::Pin, sync::Arc};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

#[doc(inline)]
pub use self::{
    config::{ConflictConfig, SyncConfig},
    conflict::{ConflictResolver, SyncConflict},
    error::{Error, Result, SyncErrorKind},
    hunk::{SyncHunk, SyncHunkKind},
    patch::SyncPatch,
    pool::{SyncPool, SyncTask},
    report::{FolderSyncFailure, FolderSyncReport, SyncReport},
};
use crate::{
    state::{SyncKey, SyncStateStore},
    AnyResult,
};

/// The synchronization builder.
#[derive(Clone, Default)]
pub struct SyncBuilder {
    config: SyncConfig,
    store: Option<Arc<dyn SyncStateStore>>,
    handler: Option<Arc<SyncEventHandler>>,
    cancel: Option<CancellationToken>,
}

impl SyncBuilder {
    /// Create a new synchronization builder using the given
    /// configuration.
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn set_some_store(&mut self, store: Option<impl SyncStateStore + 'static>) {
        self.store = match store {
            Some(store) => Some(Arc::new(store)),
            None => None,
        };
    }

    pub fn set_store(&mut self, store: impl SyncStateStore + 'static) {
        self.set_some_store(Some(store));
    }

    pub fn with_some_store(mut self, store: Option<impl SyncStateStore + 'static>) -> Self {
        self.set_some_store(store);
        self
    }

    pub fn with_store(mut self, store: impl SyncStateStore + 'static) -> Self {
        self.set_store(store);
        self
    }

    /// Share the given store with other builders.
    pub fn with_shared_store(mut self, store: Arc<dyn SyncStateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn set_some_handler<F: Future<Output = AnyResult<()>> + Send + 'static>(
        &mut self,
        handler: Option<impl Fn(SyncEvent) -> F + Send + Sync + 'static>,
    ) {
        self.handler = match handler {
            Some(handler) => Some(Arc::new(move |evt| Box::pin(handler(evt)))),
            None => None,
        };
    }

    pub fn set_handler<F: Future<Output = AnyResult<()>> + Send + 'static>(
        &mut self,
        handler: impl Fn(SyncEvent) -> F + Send + Sync + 'static,
    ) {
        self.set_some_handler(Some(handler));
    }

    pub fn with_some_handler<F: Future<Output = AnyResult<()>> + Send + 'static>(
        mut self,
        handler: Option<impl Fn(SyncEvent) -> F + Send + Sync + 'static>,
    ) -> Self {
        self.set_some_handler(handler);
        self
    }

    pub fn with_handler<F: Future<Output = AnyResult<()>> + Send + 'static>(
        mut self,
        handler: impl Fn(SyncEvent) -> F + Send + Sync + 'static,
    ) -> Self {
        self.set_handler(handler);
        self
    }

    pub fn set_some_dry_run(&mut self, dry_run: Option<bool>) {
        self.config.dry_run = dry_run;
    }

    pub fn set_dry_run(&mut self, dry_run: bool) {
        self.set_some_dry_run(Some(dry_run));
    }

    pub fn with_some_dry_run(mut self, dry_run: Option<bool>) -> Self {
        self.set_some_dry_run(dry_run);
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.set_dry_run(dry_run);
        self
    }

    pub fn set_some_pool_size(&mut self, size: Option<usize>) {
        self.config.pool_size = size;
    }

    pub fn set_pool_size(&mut self, size: usize) {
        self.set_some_pool_size(Some(size));
    }

    pub fn with_some_pool_size(mut self, size: Option<usize>) -> Self {
        self.set_some_pool_size(size);
        self
    }

    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.set_pool_size(size);
        self
    }

    pub fn set_some_cancellation_token(&mut self, token: Option<CancellationToken>) {
        self.cancel = token;
    }

    pub fn set_cancellation_token(&mut self, token: CancellationToken) {
        self.set_some_cancellation_token(Some(token));
    }

    pub fn with_some_cancellation_token(mut self, token: Option<CancellationToken>) -> Self {
        self.set_some_cancellation_token(token);
        self
    }

    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.set_cancellation_token(token);
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Build the synchronization pool.
    ///
    /// Without custom store, bases are saved as files in the state
    /// directory of the configuration.
    pub fn build(self) -> Result<SyncPool> {
        let store: Arc<dyn SyncStateStore> = match self.store {
            Some(store) => store,
            None => Arc::new(
                self.config
                    .state_store()
                    .map_err(Error::BuildStateStoreError)?,
            ),
        };

        let pool = SyncPool::new(
            &self.config,
            store,
            self.handler,
            self.cancel.unwrap_or_default(),
        );

        debug!(size = pool.size(), dry_run = pool.dry_run(), "built sync pool");
        Ok(pool)
    }

    /// Build the synchronization pool then run the given tasks.
    pub async fn sync(self, tasks: impl IntoIterator<Item = SyncTask>) -> Result<SyncReport> {
        Ok(self.build()?.sync(tasks).await)
    }
}

/// The synchronization destination.
///
/// Represents one of the two sides of a synchronization.
#[derive(
    Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SyncDestination {
    /// The local store.
    Local,

    /// The remote server.
    #[default]
    Remote,
}

impl SyncDestination {
    pub fn opposite(&self) -> Self {
        match self {
            Self::Local => Self::Remote,
            Self::Remote => Self::Local,
        }
    }
}

impl fmt::Display for SyncDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

/// The state of a folder cycle.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SyncState {
    Idle,
    Listing,
    Diffing,
    Applying,
    Committing,
    Aborted,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Listing => write!(f, "listing"),
            Self::Diffing => write!(f, "diffing"),
            Self::Applying => write!(f, "applying"),
            Self::Committing => write!(f, "committing"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// The synchronization async event handler.
pub type SyncEventHandler =
    dyn Fn(SyncEvent) -> Pin<Box<dyn Future<Output = AnyResult<()>> + Send>> + Send + Sync;

/// The synchronization event.
///
/// Represents all the events that can be triggered during a folder
/// cycle.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum SyncEvent {
    StateChanged(SyncKey, SyncState),
    ListedLocalEnvelopes(SyncKey, usize),
    ListedRemoteEnvelopes(SyncKey, usize),
    BuiltPatch(SyncKey, usize),
    ProcessedHunk(SyncKey, SyncHunk),
    CommittedBase(SyncKey, u64),
    Aborted(SyncKey, SyncErrorKind),
}

impl SyncEvent {
    pub async fn emit(&self, handler: &Option<Arc<SyncEventHandler>>) {
        if let Some(handler) = handler.as_ref() {
            if let Err(err) = handler(self.clone()).await {
                debug!("error while emitting sync event: {err}");
                trace!("{err:?}");
            } else {
                trace!("emitted sync event {self:?}");
            }
        }
    }
}

impl fmt::Display for SyncEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncEvent::StateChanged(key, state) => {
                write!(f, "Folder {key} is {state}")
            }
            SyncEvent::ListedLocalEnvelopes(key, n) => {
                write!(f, "Listed {n} local envelopes from {key}")
            }
            SyncEvent::ListedRemoteEnvelopes(key, n) => {
                write!(f, "Listed {n} remote envelopes from {key}")
            }
            SyncEvent::BuiltPatch(key, n) => {
                write!(f, "Built patch of {n} hunks for {key}")
            }
            SyncEvent::ProcessedHunk(key, hunk) => {
                write!(f, "{hunk} ({key})")
            }
            SyncEvent::CommittedBase(key, revision) => {
                write!(f, "Committed base revision {revision} for {key}")
            }
            SyncEvent::Aborted(key, kind) => {
                write!(f, "Aborted synchronization of {key}: {kind}")
            }
        }
    }
}
