use std::{any::Any, fmt, result};

use thiserror::Error;
use tokio::task::JoinError;

use crate::{backend, state, AnyBoxedError, AnyError};

use super::{hunk::SyncHunk, SyncDestination};

/// The global `Result` alias of the module.
pub type Result<T> = result::Result<T, Error>;

/// The global `Error` enum of the module.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot list {1} envelopes from folder {2}")]
    ListEnvelopesError(#[source] backend::Error, SyncDestination, String),
    #[error("cannot apply hunk: {1}")]
    ApplyHunkError(#[source] backend::Error, SyncHunk),
    #[error("cannot resolve conflict of message {0}: {1}")]
    ConflictPolicyViolationError(String, String),
    #[error("cannot get sync base")]
    GetBaseError(#[source] state::Error),
    #[error("cannot commit sync base")]
    CommitBaseError(#[source] state::Error),
    #[error("cannot build sync state store")]
    BuildStateStoreError(#[source] state::Error),
    #[error("synchronization cancelled")]
    CancelledError,
    #[error("cannot join synchronization task")]
    JoinError(#[source] JoinError),
}

impl Error {
    /// Classify the error.
    pub fn kind(&self) -> SyncErrorKind {
        match self {
            Self::ListEnvelopesError(err, ..) | Self::ApplyHunkError(err, ..) => {
                SyncErrorKind::from(err)
            }
            Self::ConflictPolicyViolationError(..) => SyncErrorKind::ConflictPolicyViolation,
            Self::CommitBaseError(err) if err.is_commit_conflict() => {
                SyncErrorKind::BaseCommitConflict
            }
            Self::GetBaseError(_) | Self::CommitBaseError(_) | Self::BuildStateStoreError(_) => {
                SyncErrorKind::State
            }
            Self::CancelledError => SyncErrorKind::Cancelled,
            Self::JoinError(_) => SyncErrorKind::Panicked,
        }
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

/// The kind of a synchronization error.
///
/// Only [`SyncErrorKind::MessageGone`] is absorbed by the cycle.
/// [`SyncErrorKind::BaseCommitConflict`] restarts the cycle from the
/// listing. Every other kind aborts the cycle, leaving the base
/// untouched.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SyncErrorKind {
    BackendUnavailable,
    FolderNotFound,
    MessageGone,
    ConflictPolicyViolation,
    BaseCommitConflict,
    State,
    Cancelled,
    Panicked,
}

impl From<&backend::Error> for SyncErrorKind {
    fn from(err: &backend::Error) -> Self {
        match err {
            backend::Error::FolderNotFoundError(_) => Self::FolderNotFound,
            backend::Error::MessageGoneError(..) => Self::MessageGone,
            backend::Error::BackendUnavailableError(..) | backend::Error::TimeoutError(_) => {
                Self::BackendUnavailable
            }
        }
    }
}

impl fmt::Display for SyncErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BackendUnavailable => write!(f, "backend unavailable"),
            Self::FolderNotFound => write!(f, "folder not found"),
            Self::MessageGone => write!(f, "message gone"),
            Self::ConflictPolicyViolation => write!(f, "conflict policy violation"),
            Self::BaseCommitConflict => write!(f, "base commit conflict"),
            Self::State => write!(f, "state store failure"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Panicked => write!(f, "panicked"),
        }
    }
}
