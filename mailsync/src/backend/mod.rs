//! # Backend
//!
//! Module dedicated to the backend abstraction. A backend is a
//! mailbox kind (local store, remote server) seen through five
//! capabilities, each one modelled as its own trait:
//!
//! - [`ListEnvelopes`]
//! - [`FetchContent`]
//! - [`CreateMessage`]
//! - [`DeleteMessage`]
//! - [`SetFlags`]
//!
//! The [`Backend`] trait gathers them. New backend kinds (a second
//! protocol, a database) implement the same capability set.

mod error;
pub mod memory;

use async_trait::async_trait;

#[doc(inline)]
pub use self::{
    error::{Error, Result},
    memory::MemoryBackend,
};
use crate::{
    envelope::{Envelope, Envelopes, Id},
    flag::Flags,
};

#[async_trait]
pub trait ListEnvelopes: Send + Sync {
    /// List all envelopes from the given folder.
    ///
    /// Fails with [`Error::BackendUnavailableError`] on connectivity
    /// loss, and with [`Error::FolderNotFoundError`] if the folder
    /// does not exist.
    async fn list_envelopes(&self, folder: &str) -> Result<Envelopes>;
}

#[async_trait]
pub trait FetchContent: Send + Sync {
    /// Fetch the raw content of the message matching the given
    /// identity key from the given folder.
    ///
    /// Fails with [`Error::MessageGoneError`] if the message
    /// disappeared since the envelopes were listed.
    async fn fetch_content(&self, folder: &str, id: &str) -> Result<Vec<u8>>;
}

#[async_trait]
pub trait CreateMessage: Send + Sync {
    /// Create a message with the given envelope and raw content in
    /// the given folder.
    ///
    /// The envelope identity key is only a proposal: the returned
    /// identity key is the one assigned by the backend, which may
    /// differ (servers usually assign their own ids on append).
    async fn create_message(&self, folder: &str, envelope: &Envelope, content: &[u8])
        -> Result<Id>;
}

#[async_trait]
pub trait DeleteMessage: Send + Sync {
    /// Delete the message matching the given identity key from the
    /// given folder.
    async fn delete_message(&self, folder: &str, id: &str) -> Result<()>;
}

#[async_trait]
pub trait SetFlags: Send + Sync {
    /// Replace the flags of the message matching the given identity
    /// key from the given folder.
    async fn set_flags(&self, folder: &str, id: &str, flags: &Flags) -> Result<()>;
}

/// The backend abstraction.
///
/// A backend is anything able to list, fetch, create, delete and
/// flag messages.
pub trait Backend: ListEnvelopes + FetchContent + CreateMessage + DeleteMessage + SetFlags {
    /// Return the name of the backend, for logging purpose.
    fn name(&self) -> String;
}
