use std::{any::Any, io, path::PathBuf, result};

use advisory_lock::FileLockError;
use thiserror::Error;
use tokio::task::JoinError;

use crate::{AnyBoxedError, AnyError};

use super::SyncKey;

/// The global `Result` alias of the module.
pub type Result<T> = result::Result<T, Error>;

/// The global `Error` enum of the module.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot create sync state directory {1}")]
    CreateStateDirectoryError(#[source] io::Error, PathBuf),
    #[error("cannot open sync state lock file {1}")]
    OpenLockFileError(#[source] io::Error, PathBuf),
    #[error("cannot lock sync state file {1}")]
    LockFileError(#[source] FileLockError, PathBuf),
    #[error("cannot unlock sync state file {1}")]
    UnlockFileError(#[source] FileLockError, PathBuf),
    #[error("cannot read sync base {1}")]
    ReadBaseError(#[source] io::Error, PathBuf),
    #[error("cannot parse sync base {1}")]
    ParseBaseError(#[source] serde_json::Error, PathBuf),
    #[error("cannot serialize sync base of {1}")]
    SerializeBaseError(#[source] serde_json::Error, SyncKey),
    #[error("cannot write sync base {1}")]
    WriteBaseError(#[source] io::Error, PathBuf),
    #[error("cannot commit sync base of {0}: expected revision {1:?}, found {2:?}")]
    CommitConflictError(SyncKey, Option<u64>, Option<u64>),
    #[error("cannot get sync state cache directory")]
    GetCacheDirectoryError,
    #[error("cannot join sync state blocking task")]
    JoinError(#[source] JoinError),
}

impl Error {
    /// Return `true` when the base was modified concurrently, which
    /// means the cycle needs to be restarted from the listing.
    pub fn is_commit_conflict(&self) -> bool {
        matches!(self, Self::CommitConflictError(..))
    }
}

impl AnyError for Error {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl From<Error> for AnyBoxedError {
    fn from(err: Error) -> Self {
        Box::new(err)
    }
}
