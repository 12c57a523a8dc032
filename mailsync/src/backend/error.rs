use std::{any::Any, result, time::Duration};

use thiserror::Error;

use crate::{envelope::Id, AnyBoxedError, AnyError};

/// The global `Result` alias of the module.
pub type Result<T> = result::Result<T, Error>;

/// The global `Error` enum of the module.
///
/// Backend implementations must classify their failures into these
/// variants: the synchronization relies on them to decide whether a
/// failure aborts the current cycle or only skips one hunk.
#[derive(Debug, Error)]
pub enum Error {
    #[error("backend {1} is unavailable")]
    BackendUnavailableError(#[source] AnyBoxedError, String),
    #[error("backend call timed out after {0:?}")]
    TimeoutError(Duration),
    #[error("cannot find folder {0}")]
    FolderNotFoundError(String),
    #[error("cannot find message {1} in folder {0}")]
    MessageGoneError(String, Id),
}

impl Error {
    pub fn unavailable(err: impl AnyError + 'static, backend: impl ToString) -> Self {
        Self::BackendUnavailableError(Box::new(err), backend.to_string())
    }

    pub fn folder_not_found(folder: impl ToString) -> Self {
        Self::FolderNotFoundError(folder.to_string())
    }

    pub fn message_gone(folder: impl ToString, id: impl Into<Id>) -> Self {
        Self::MessageGoneError(folder.to_string(), id.into())
    }

    /// Return `true` when the error only concerns one message, which
    /// means the synchronization can skip it and continue.
    pub fn is_message_gone(&self) -> bool {
        matches!(self, Self::MessageGoneError(..))
    }

    /// Return `true` when the backend cannot be reached. Timeouts
    /// count as unavailability.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::BackendUnavailableError(..) | Self::TimeoutError(..))
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
