use std::{num::NonZeroUsize, path::PathBuf, thread::available_parallelism, time::Duration};

use serde::{Deserialize, Serialize};

use crate::state::{self, FileStateStore};

use super::{ConflictResolver, SyncDestination};

/// The synchronization configuration.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SyncConfig {
    /// The maximum number of folders synchronized in parallel. This
    /// is also the maximum number of hunks of one phase applied in
    /// parallel. Defaults to the number of available CPUs.
    pub pool_size: Option<usize>,

    /// The timeout of every backend call, in seconds. Defaults to 30
    /// seconds.
    pub timeout: Option<u64>,

    /// The maximum number of times a cycle is run when its commit
    /// conflicts with a concurrent one. Defaults to 3.
    pub max_commit_attempts: Option<usize>,

    /// List and diff without applying nor committing anything.
    pub dry_run: Option<bool>,

    /// The conflict resolution configuration.
    #[serde(default)]
    pub conflict: ConflictConfig,

    /// Customize the directory where bases are saved. Defaults to
    /// `$XDG_CACHE_HOME/mailsync/state`.
    pub state_dir: Option<PathBuf>,
}

impl SyncConfig {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
    pub const DEFAULT_MAX_COMMIT_ATTEMPTS: usize = 3;

    pub fn pool_size(&self) -> usize {
        self.pool_size
            .unwrap_or_else(|| available_parallelism().map_or(1, NonZeroUsize::get))
            .max(1)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
            .map(Duration::from_secs)
            .unwrap_or(Self::DEFAULT_TIMEOUT)
    }

    pub fn max_commit_attempts(&self) -> usize {
        self.max_commit_attempts
            .unwrap_or(Self::DEFAULT_MAX_COMMIT_ATTEMPTS)
            .max(1)
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run.unwrap_or_default()
    }

    pub fn resolver(&self) -> ConflictResolver {
        ConflictResolver::new(self.conflict.tie_break)
    }

    /// Build the file state store matching the configuration.
    pub fn state_store(&self) -> state::Result<FileStateStore> {
        match self.state_dir.as_ref() {
            Some(dir) => Ok(FileStateStore::new(dir)),
            None => FileStateStore::try_default(),
        }
    }
}

/// The conflict resolution configuration.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ConflictConfig {
    /// The side winning conflicts between envelopes sharing the same
    /// internal date. Defaults to the remote side.
    #[serde(default)]
    pub tie_break: SyncDestination,
}
