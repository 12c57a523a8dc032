//! # Sync state
//!
//! Module dedicated to the synchronization state. The state of one
//! (account, folder) pair is its [`SyncBase`]: the envelopes both
//! sides agreed on at the end of the last successful cycle.
//!
//! Bases are persisted by a [`SyncStateStore`]. The store is the only
//! mutable resource shared between cycles, that is why it exposes a
//! compare-and-swap commit rather than a plain write.

mod error;
pub mod file;
pub mod memory;

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[doc(inline)]
pub use self::{
    error::{Error, Result},
    file::FileStateStore,
    memory::MemoryStateStore,
};
use crate::envelope::{Envelopes, Id};

/// The synchronization key.
///
/// Identifies the (account, folder) pair a base belongs to.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct SyncKey {
    pub account: String,
    pub folder: String,
}

impl SyncKey {
    pub fn new(account: impl ToString, folder: impl ToString) -> Self {
        Self {
            account: account.to_string(),
            folder: folder.to_string(),
        }
    }

    /// Return a file system friendly digest of the key.
    pub fn digest(&self) -> String {
        let key = format!("{}\n{}", self.account, self.folder);
        format!("{:x}", md5::compute(key))
    }
}

impl fmt::Display for SyncKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.account, self.folder)
    }
}

/// The identity key aliases of one side.
///
/// When a backend assigns its own id on create, the identity key
/// used by the synchronization is mapped to that backend id. Listings
/// are re-keyed through the aliases, and backend calls are translated
/// back using them.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct IdAliases(BTreeMap<Id, Id>);

impl IdAliases {
    /// Record that the given identity key is known by the backend as
    /// the given backend id.
    pub fn insert(&mut self, key: impl Into<Id>, backend_id: impl Into<Id>) {
        let key = key.into();
        let backend_id = backend_id.into();

        if key == backend_id {
            self.0.remove(&key);
        } else {
            self.0.insert(key, backend_id);
        }
    }

    /// Return the backend id matching the given identity key.
    pub fn backend_id<'a>(&'a self, key: &'a str) -> &'a str {
        self.0.get(key).map(String::as_str).unwrap_or(key)
    }

    /// Re-key the given listing from backend ids to identity keys.
    ///
    /// A backend id that is not aliased but equals the identity key
    /// of an alias would shadow that key. Such ids are moved to a
    /// fresh key of the form `{id}#{n}`, recorded as a new alias, so
    /// that no envelope of the listing is lost.
    pub fn rekey(&mut self, envelopes: Envelopes) -> Envelopes {
        if self.0.is_empty() {
            return envelopes;
        }

        let aliased: BTreeSet<&str> = self.0.values().map(String::as_str).collect();
        let clashes: Vec<Id> = envelopes
            .keys()
            .filter(|id| self.0.contains_key(*id) && !aliased.contains(id.as_str()))
            .cloned()
            .collect();

        for id in clashes {
            let mut n = 1;
            let key = loop {
                let key = format!("{id}#{n}");
                if !self.0.contains_key(&key) && !envelopes.contains_key(&key) {
                    break key;
                }
                n += 1;
            };

            debug!(%id, %key, "backend id clashes with an identity key, aliasing it");
            self.insert(key, id);
        }

        let keys: BTreeMap<&str, &str> = self
            .0
            .iter()
            .map(|(key, backend_id)| (backend_id.as_str(), key.as_str()))
            .collect();

        envelopes
            .into_iter()
            .map(|envelope| match keys.get(envelope.id.as_str()) {
                Some(key) => envelope.with_id(*key),
                None => envelope,
            })
            .collect()
    }

    /// Add aliases of the given ones whose identity key and backend
    /// id are both unknown.
    pub fn merge(&mut self, other: &IdAliases) {
        for (key, backend_id) in &other.0 {
            let known = self.0.contains_key(key) || self.0.values().any(|id| id == backend_id);
            if !known {
                self.insert(key.clone(), backend_id.clone());
            }
        }
    }

    /// Keep only aliases whose identity key matches the predicate.
    pub fn retain(&mut self, mut f: impl FnMut(&str) -> bool) {
        self.0.retain(|key, _| f(key))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// The synchronization base.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct SyncBase {
    /// The revision of the base, increased by one at every commit.
    pub revision: u64,

    /// When the base was committed.
    pub committed_at: DateTime<Utc>,

    /// The envelopes both sides agreed on, keyed by identity key.
    pub envelopes: Envelopes,

    /// The identity key aliases of the local side.
    #[serde(default)]
    pub local_aliases: IdAliases,

    /// The identity key aliases of the remote side.
    #[serde(default)]
    pub remote_aliases: IdAliases,
}

impl SyncBase {
    /// Build the base following the given one, or the first base if
    /// none is given.
    pub fn next(
        prev: Option<&SyncBase>,
        envelopes: Envelopes,
        local_aliases: IdAliases,
        remote_aliases: IdAliases,
    ) -> Self {
        Self {
            revision: prev.map(|base| base.revision + 1).unwrap_or(1),
            committed_at: Utc::now(),
            envelopes,
            local_aliases,
            remote_aliases,
        }
    }

    /// Return `true` if the given base holds the same envelopes and
    /// aliases, whatever its revision and commit date.
    pub fn same_content(&self, other: &SyncBase) -> bool {
        self.envelopes == other.envelopes
            && self.local_aliases == other.local_aliases
            && self.remote_aliases == other.remote_aliases
    }
}

/// The synchronization state store.
///
/// A store persists one [`SyncBase`] per [`SyncKey`].
#[async_trait]
pub trait SyncStateStore: Send + Sync {
    /// Get the base matching the given key, if any.
    async fn get(&self, key: &SyncKey) -> Result<Option<SyncBase>>;

    /// Replace the base matching the given key by the given one, if
    /// the current revision matches the expected one (`None` meaning
    /// that no base is expected).
    ///
    /// Fails with [`Error::CommitConflictError`] otherwise.
    async fn compare_and_swap(
        &self,
        key: &SyncKey,
        expected: Option<u64>,
        base: SyncBase,
    ) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use crate::{
        envelope::{Envelope, Envelopes},
        flag::Flags,
    };

    use super::{IdAliases, SyncBase, SyncKey};

    #[test]
    fn aliases_rekey_listing() {
        let mut aliases = IdAliases::default();
        aliases.insert("<a@localhost>", "1");
        aliases.insert("<b@localhost>", "<b@localhost>");

        assert_eq!(aliases.len(), 1);
        assert_eq!(aliases.backend_id("<a@localhost>"), "1");
        assert_eq!(aliases.backend_id("<b@localhost>"), "<b@localhost>");

        let listing = Envelopes::from_iter([
            Envelope::new("1", "seen", Default::default()),
            Envelope::new("2", "", Default::default()),
        ]);
        let envelopes = aliases.rekey(listing);

        assert_eq!(
            envelopes.keys().collect::<Vec<_>>(),
            vec!["2", "<a@localhost>"]
        );
        assert_eq!(envelopes["<a@localhost>"].flags, Flags::from("seen"));
    }

    #[test]
    fn clashing_backend_id_gets_a_fresh_key() {
        let mut aliases = IdAliases::default();
        aliases.insert("2", "1");

        let listing = Envelopes::from_iter([
            Envelope::new("1", "", Default::default()),
            Envelope::new("2", "seen", Default::default()),
        ]);
        let envelopes = aliases.rekey(listing.clone());

        assert_eq!(envelopes.len(), 2);
        assert_eq!(envelopes["2"].flags, Flags::default());
        assert_eq!(envelopes["2#1"].flags, Flags::from("seen"));
        assert_eq!(aliases.backend_id("2#1"), "2");

        // the fresh key is stable once recorded
        let envelopes = aliases.rekey(listing);
        assert_eq!(envelopes.keys().collect::<Vec<_>>(), vec!["2", "2#1"]);
        assert_eq!(aliases.len(), 2);
    }

    #[test]
    fn clashing_backend_id_of_a_gone_alias_gets_a_fresh_key() {
        let mut aliases = IdAliases::default();
        aliases.insert("2", "1");
        aliases.insert("2#1", "7");

        let listing = Envelopes::from_iter([Envelope::new("2", "seen", Default::default())]);
        let envelopes = aliases.rekey(listing);

        assert_eq!(envelopes.keys().collect::<Vec<_>>(), vec!["2#2"]);
        assert_eq!(aliases.backend_id("2#2"), "2");
    }

    #[test]
    fn merge_keeps_known_aliases() {
        let mut aliases = IdAliases::default();
        aliases.insert("<a@localhost>", "1");

        let mut other = IdAliases::default();
        other.insert("<a@localhost>", "5");
        other.insert("<b@localhost>", "1");
        other.insert("<c@localhost>", "2");

        aliases.merge(&other);

        assert_eq!(aliases.len(), 2);
        assert_eq!(aliases.backend_id("<a@localhost>"), "1");
        assert_eq!(aliases.backend_id("<b@localhost>"), "<b@localhost>");
        assert_eq!(aliases.backend_id("<c@localhost>"), "2");
    }

    #[test]
    fn next_base_increases_revision() {
        let first = SyncBase::next(
            None,
            Envelopes::default(),
            Default::default(),
            Default::default(),
        );
        assert_eq!(first.revision, 1);

        let second = SyncBase::next(
            Some(&first),
            Envelopes::default(),
            Default::default(),
            Default::default(),
        );
        assert_eq!(second.revision, 2);
        assert!(second.same_content(&first));
    }

    #[test]
    fn key_digest_is_stable() {
        let key = SyncKey::new("account", "INBOX");
        assert_eq!(key.to_string(), "account/INBOX");
        assert_eq!(key.digest(), SyncKey::new("account", "INBOX").digest());
        assert_ne!(key.digest(), SyncKey::new("account", "Sent").digest());
    }
}
