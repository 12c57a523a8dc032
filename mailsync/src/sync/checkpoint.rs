//! # Sync checkpoint
//!
//! Module dedicated to the computation of the next base, from the
//! listings of a cycle and the outcomes of its patch application.

use std::collections::BTreeSet;

use crate::{
    envelope::{Envelopes, Id},
    state::{IdAliases, SyncBase},
};

use super::{apply::HunkOutcome, SyncHunk};

/// The state of both sides once a patch has been applied.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SyncCheckpoint {
    pub local: Envelopes,
    pub remote: Envelopes,
    pub local_aliases: IdAliases,
    pub remote_aliases: IdAliases,
    pub created: CreatedAliases,
    skipped: BTreeSet<Id>,
}

/// The aliases of messages created by one application, per side.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CreatedAliases {
    pub local: IdAliases,
    pub remote: IdAliases,
}

impl CreatedAliases {
    pub fn merge(&mut self, other: &CreatedAliases) {
        self.local.merge(&other.local);
        self.remote.merge(&other.remote);
    }
}

impl SyncCheckpoint {
    /// Replay the given outcomes on top of the given listings and
    /// the aliases they were re-keyed with.
    ///
    /// Only applied hunks change the listings. Creates record the id
    /// assigned by the target backend as an alias of the identity
    /// key.
    pub fn new(
        local: &Envelopes,
        remote: &Envelopes,
        local_aliases: &IdAliases,
        remote_aliases: &IdAliases,
        outcomes: &[(SyncHunk, HunkOutcome)],
    ) -> Self {
        let mut checkpoint = Self {
            local: local.clone(),
            remote: remote.clone(),
            local_aliases: local_aliases.clone(),
            remote_aliases: remote_aliases.clone(),
            created: CreatedAliases::default(),
            skipped: BTreeSet::new(),
        };

        for (hunk, outcome) in outcomes {
            match (hunk, outcome) {
                (hunk, HunkOutcome::Skipped(_) | HunkOutcome::Failed(_)) => {
                    checkpoint.skipped.insert(hunk.id().to_owned());
                }
                (SyncHunk::CreateOnLocal(envelope), HunkOutcome::Created(id)) => {
                    checkpoint.local.insert_envelope(envelope.clone());
                    checkpoint.local_aliases.insert(envelope.id.clone(), id);
                    checkpoint.created.local.insert(envelope.id.clone(), id);
                }
                (SyncHunk::CreateOnRemote(envelope), HunkOutcome::Created(id)) => {
                    checkpoint.remote.insert_envelope(envelope.clone());
                    checkpoint.remote_aliases.insert(envelope.id.clone(), id);
                    checkpoint.created.remote.insert(envelope.id.clone(), id);
                }
                (SyncHunk::DeleteOnLocal(id), _) => {
                    checkpoint.local.remove(id);
                }
                (SyncHunk::DeleteOnRemote(id), _) => {
                    checkpoint.remote.remove(id);
                }
                (SyncHunk::UpdateFlagsOnLocal(id, flags), _) => {
                    if let Some(envelope) = checkpoint.local.get_mut(id) {
                        envelope.flags = flags.clone();
                    }
                }
                (SyncHunk::UpdateFlagsOnRemote(id, flags), _) => {
                    if let Some(envelope) = checkpoint.remote.get_mut(id) {
                        envelope.flags = flags.clone();
                    }
                }
                (SyncHunk::CreateOnLocal(envelope), HunkOutcome::Applied) => {
                    checkpoint.local.insert_envelope(envelope.clone());
                }
                (SyncHunk::CreateOnRemote(envelope), HunkOutcome::Applied) => {
                    checkpoint.remote.insert_envelope(envelope.clone());
                }
            }
        }

        let local = &checkpoint.local;
        let remote = &checkpoint.remote;
        checkpoint.local_aliases.retain(|id| local.contains_key(id));
        checkpoint.remote_aliases.retain(|id| remote.contains_key(id));

        checkpoint
    }

    /// Compute the envelopes of the next base.
    ///
    /// An identity key enters the next base when both sides agree on
    /// it. Keys whose hunk was skipped, and keys both sides still
    /// disagree on, keep their previous base entry (if any), so that
    /// the next cycle diffs them again.
    pub fn envelopes(&self, base: Option<&SyncBase>) -> Envelopes {
        let prev = base.map(|base| &base.envelopes);

        let ids: BTreeSet<&str> = prev
            .into_iter()
            .flat_map(|prev| prev.keys())
            .chain(self.local.keys())
            .chain(self.remote.keys())
            .map(String::as_str)
            .collect();

        ids.into_iter()
            .filter_map(|id| {
                let prev = prev.and_then(|prev| prev.get(id)).cloned();

                if self.skipped.contains(id) {
                    return prev;
                }

                match (self.local.get(id), self.remote.get(id)) {
                    (None, None) => None,
                    (Some(local), Some(remote)) if local.flags == remote.flags => {
                        Some(local.clone())
                    }
                    _ => prev,
                }
            })
            .collect()
    }

    /// Build the base following the given one, after a successful
    /// application.
    pub fn next_base(&self, base: Option<&SyncBase>) -> SyncBase {
        SyncBase::next(
            base,
            self.envelopes(base),
            self.local_aliases.clone(),
            self.remote_aliases.clone(),
        )
    }

    /// Build the base following the given one, after an aborted
    /// application.
    ///
    /// Envelopes stay the ones of the given base. Only aliases of
    /// messages created before the abort are recorded, so that the
    /// next cycle recognizes them instead of creating them again.
    /// Returns `None` when there is no new alias to record.
    pub fn aliases_base(&self, base: Option<&SyncBase>) -> Option<SyncBase> {
        let unchanged = match base {
            Some(base) => {
                base.local_aliases == self.local_aliases
                    && base.remote_aliases == self.remote_aliases
            }
            None => self.local_aliases.is_empty() && self.remote_aliases.is_empty(),
        };

        if unchanged {
            return None;
        }

        let envelopes = base.map(|base| base.envelopes.clone()).unwrap_or_default();

        Some(SyncBase::next(
            base,
            envelopes,
            self.local_aliases.clone(),
            self.remote_aliases.clone(),
        ))
    }
}
