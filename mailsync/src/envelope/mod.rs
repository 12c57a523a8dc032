//! # Envelope
//!
//! Module dedicated to envelopes, the backend-agnostic representation
//! of a message identity and of its mutable state.

use std::{
    collections::BTreeMap,
    ops::{Deref, DerefMut},
};

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::flag::Flags;

/// Alias for the envelope identity key.
///
/// The identity key is stable across synchronization cycles for the
/// same logical message. Its shape depends on the backend: a
/// Message-ID, a content hash, an IMAP UID etc.
pub type Id = String;

/// The envelope.
///
/// An envelope is composed of an identity key, some flags, the
/// internal date of the message and its size.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// The identity key of the envelope.
    pub id: Id,

    /// The envelope flags.
    ///
    /// Flags are the only field compared during synchronization.
    pub flags: Flags,

    /// The internal date of the message.
    ///
    /// Used by the conflict resolver to decide which side wins.
    pub date: DateTime<FixedOffset>,

    /// The size of the message, in bytes.
    pub size: usize,
}

impl Envelope {
    pub fn new(id: impl Into<Id>, flags: impl Into<Flags>, date: DateTime<FixedOffset>) -> Self {
        Self {
            id: id.into(),
            flags: flags.into(),
            date,
            size: 0,
        }
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    /// Clone the envelope, replacing its flags by the given ones.
    pub fn with_flags(&self, flags: Flags) -> Self {
        Self {
            flags,
            ..self.clone()
        }
    }

    /// Clone the envelope, replacing its identity key by the given
    /// one.
    pub fn with_id(&self, id: impl Into<Id>) -> Self {
        Self {
            id: id.into(),
            ..self.clone()
        }
    }
}

/// The envelopes snapshot.
///
/// Maps identity keys to envelopes, representing one backend's view
/// of one folder at one instant. A sorted map is used so that
/// iteration, and therefore patch building, is deterministic.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Envelopes(BTreeMap<Id, Envelope>);

impl Envelopes {
    /// Insert the given envelope, keyed by its own identity key.
    pub fn insert_envelope(&mut self, envelope: Envelope) -> Option<Envelope> {
        self.0.insert(envelope.id.clone(), envelope)
    }
}

impl Deref for Envelopes {
    type Target = BTreeMap<Id, Envelope>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Envelopes {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl FromIterator<Envelope> for Envelopes {
    fn from_iter<T: IntoIterator<Item = Envelope>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|envelope| (envelope.id.clone(), envelope))
                .collect(),
        )
    }
}

impl IntoIterator for Envelopes {
    type Item = Envelope;
    type IntoIter = std::collections::btree_map::IntoValues<Id, Envelope>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_values()
    }
}
