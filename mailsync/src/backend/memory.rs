//! # Memory backend
//!
//! Module dedicated to the in-memory backend. The [`MemoryBackend`]
//! keeps folders of messages in memory, behind a shared lock, so
//! cloning it gives another handle on the same mailbox.
//!
//! It can behave like a local store (proposed identity keys are kept
//! on create) or like a server assigning its own sequential ids, as
//! IMAP does with UIDs. It can also be switched offline or told to
//! fail after a number of mutating calls, which makes it suitable to
//! exercise the synchronization against connectivity loss.

use std::{
    any::Any,
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use super::{
    Backend, CreateMessage, DeleteMessage, FetchContent, ListEnvelopes, Result, SetFlags,
};
use crate::{
    envelope::{Envelope, Envelopes, Id},
    flag::Flags,
    AnyError,
};

/// Errors raised as sources of
/// [`BackendUnavailableError`](super::Error::BackendUnavailableError).
#[derive(Debug, Error)]
pub enum Error {
    #[error("memory backend {0} is offline")]
    OfflineError(String),
    #[error("memory backend {0} went offline after {1} mutating calls")]
    MutationLimitReachedError(String, usize),
}

impl AnyError for Error {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// The identity key strategy applied when creating messages.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum MemoryIdStrategy {
    /// Keep the proposed identity key, like a local store would.
    #[default]
    Keep,

    /// Assign sequential numeric ids, like an IMAP server would.
    Sequential,
}

#[derive(Clone, Debug)]
struct MemoryMessage {
    envelope: Envelope,
    content: Vec<u8>,
}

#[derive(Debug, Default)]
struct MemoryBackendState {
    folders: HashMap<String, BTreeMap<Id, MemoryMessage>>,
    ids: MemoryIdStrategy,
    next_uid: u64,
    offline: bool,
    mutations_left: Option<usize>,
    mutations: usize,
}

impl MemoryBackendState {
    fn check_online(&self, name: &str) -> Result<()> {
        if self.offline {
            Err(super::Error::unavailable(Error::OfflineError(name.to_owned()), name))
        } else {
            Ok(())
        }
    }

    fn consume_mutation(&mut self, name: &str) -> Result<()> {
        self.check_online(name)?;

        match self.mutations_left.as_mut() {
            Some(0) => {
                self.offline = true;
                let err = Error::MutationLimitReachedError(name.to_owned(), self.mutations);
                Err(super::Error::unavailable(err, name))
            }
            Some(left) => {
                *left -= 1;
                self.mutations += 1;
                Ok(())
            }
            None => {
                self.mutations += 1;
                Ok(())
            }
        }
    }

    fn folder(&self, folder: &str) -> Result<&BTreeMap<Id, MemoryMessage>> {
        self.folders
            .get(folder)
            .ok_or_else(|| super::Error::folder_not_found(folder))
    }

    fn folder_mut(&mut self, folder: &str) -> Result<&mut BTreeMap<Id, MemoryMessage>> {
        self.folders
            .get_mut(folder)
            .ok_or_else(|| super::Error::folder_not_found(folder))
    }

    fn next_id(&mut self, folder: &str, proposed: &str) -> Id {
        match self.ids {
            MemoryIdStrategy::Keep => proposed.to_owned(),
            MemoryIdStrategy::Sequential => loop {
                self.next_uid += 1;
                let id = self.next_uid.to_string();
                let taken = self
                    .folders
                    .get(folder)
                    .is_some_and(|messages| messages.contains_key(&id));
                if !taken {
                    break id;
                }
            },
        }
    }
}

/// The in-memory backend.
#[derive(Clone, Debug)]
pub struct MemoryBackend {
    name: String,
    state: Arc<Mutex<MemoryBackendState>>,
}

impl MemoryBackend {
    /// Create a new memory backend keeping proposed identity keys.
    pub fn new(name: impl ToString) -> Self {
        Self::with_id_strategy(name, MemoryIdStrategy::Keep)
    }

    /// Create a new memory backend assigning its own sequential ids.
    pub fn server(name: impl ToString) -> Self {
        Self::with_id_strategy(name, MemoryIdStrategy::Sequential)
    }

    pub fn with_id_strategy(name: impl ToString, ids: MemoryIdStrategy) -> Self {
        let state = MemoryBackendState {
            ids,
            ..Default::default()
        };

        Self {
            name: name.to_string(),
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Create the given folder, if it does not exist yet.
    pub async fn add_folder(&self, folder: impl ToString) {
        let mut state = self.state.lock().await;
        state.folders.entry(folder.to_string()).or_default();
    }

    /// Insert a message as if it was added by an external client.
    ///
    /// The envelope identity key is kept as it is, whatever the id
    /// strategy. This does not count as a mutating call.
    pub async fn insert_message(
        &self,
        folder: &str,
        envelope: Envelope,
        content: impl Into<Vec<u8>>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let content = content.into();
        let envelope = Envelope {
            size: content.len(),
            ..envelope
        };
        let message = MemoryMessage { envelope, content };
        state
            .folder_mut(folder)?
            .insert(message.envelope.id.clone(), message);
        Ok(())
    }

    /// Remove a message as if it was deleted by an external client.
    pub async fn remove_message(&self, folder: &str, id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .folder_mut(folder)?
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| super::Error::message_gone(folder, id))
    }

    /// Replace flags of a message as if it was done by an external
    /// client.
    pub async fn update_flags(&self, folder: &str, id: &str, flags: Flags) -> Result<()> {
        let mut state = self.state.lock().await;
        let message = state
            .folder_mut(folder)?
            .get_mut(id)
            .ok_or_else(|| super::Error::message_gone(folder, id))?;
        message.envelope.flags = flags;
        Ok(())
    }

    /// Return the envelopes of the given folder, ignoring the online
    /// state.
    pub async fn envelopes(&self, folder: &str) -> Result<Envelopes> {
        let state = self.state.lock().await;
        Ok(state
            .folder(folder)?
            .values()
            .map(|message| message.envelope.clone())
            .collect())
    }

    /// Switch the backend offline (or back online).
    pub async fn set_offline(&self, offline: bool) {
        let mut state = self.state.lock().await;
        state.offline = offline;
    }

    /// Make the backend go offline once the given number of mutating
    /// calls succeeded. `None` removes the limit.
    pub async fn set_mutations_limit(&self, limit: Option<usize>) {
        let mut state = self.state.lock().await;
        state.mutations_left = limit;
    }

    /// Return the number of successful mutating calls (create,
    /// delete, set flags).
    pub async fn mutations(&self) -> usize {
        self.state.lock().await.mutations
    }
}

#[async_trait]
impl ListEnvelopes for MemoryBackend {
    async fn list_envelopes(&self, folder: &str) -> Result<Envelopes> {
        let state = self.state.lock().await;
        state.check_online(&self.name)?;

        let envelopes: Envelopes = state
            .folder(folder)?
            .values()
            .map(|message| message.envelope.clone())
            .collect();

        trace!(backend = %self.name, folder, count = envelopes.len(), "listed envelopes");
        Ok(envelopes)
    }
}

#[async_trait]
impl FetchContent for MemoryBackend {
    async fn fetch_content(&self, folder: &str, id: &str) -> Result<Vec<u8>> {
        let state = self.state.lock().await;
        state.check_online(&self.name)?;

        state
            .folder(folder)?
            .get(id)
            .map(|message| message.content.clone())
            .ok_or_else(|| super::Error::message_gone(folder, id))
    }
}

#[async_trait]
impl CreateMessage for MemoryBackend {
    async fn create_message(
        &self,
        folder: &str,
        envelope: &Envelope,
        content: &[u8],
    ) -> Result<Id> {
        let mut state = self.state.lock().await;
        state.folder(folder)?;
        state.consume_mutation(&self.name)?;

        let id = state.next_id(folder, &envelope.id);
        let message = MemoryMessage {
            envelope: Envelope {
                id: id.clone(),
                size: content.len(),
                ..envelope.clone()
            },
            content: content.to_vec(),
        };
        state.folder_mut(folder)?.insert(id.clone(), message);

        debug!(backend = %self.name, folder, proposed = %envelope.id, %id, "created message");
        Ok(id)
    }
}

#[async_trait]
impl DeleteMessage for MemoryBackend {
    async fn delete_message(&self, folder: &str, id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.folder(folder)?.contains_key(id) {
            state.check_online(&self.name)?;
            return Err(super::Error::message_gone(folder, id));
        }
        state.consume_mutation(&self.name)?;
        state.folder_mut(folder)?.remove(id);

        debug!(backend = %self.name, folder, id, "deleted message");
        Ok(())
    }
}

#[async_trait]
impl SetFlags for MemoryBackend {
    async fn set_flags(&self, folder: &str, id: &str, flags: &Flags) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.folder(folder)?.contains_key(id) {
            state.check_online(&self.name)?;
            return Err(super::Error::message_gone(folder, id));
        }
        state.consume_mutation(&self.name)?;

        if let Some(message) = state.folder_mut(folder)?.get_mut(id) {
            message.envelope.flags = flags.clone();
        }

        debug!(backend = %self.name, folder, id, %flags, "set flags");
        Ok(())
    }
}

impl Backend for MemoryBackend {
    fn name(&self) -> String {
        self.name.clone()
    }
}
