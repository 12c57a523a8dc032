//! # Sync patch
//!
//! Module dedicated to synchronization patches. The core structure
//! of the module is the [`SyncPatch`], built from a three-way diff
//! between the base, the local and the remote envelopes of a folder.

use std::{collections::BTreeSet, vec};

use tracing::{debug, trace};

use crate::envelope::Envelopes;

use super::{
    conflict::{ConflictResolver, SyncConflict},
    hunk::{SyncHunk, SyncHunkKind},
    Result, SyncDestination,
};

/// The synchronization patch.
///
/// A patch is an ordered list of hunks: all deletes, then all
/// creates, then all flag updates. Inside each kind, hunks are
/// ordered by identity key, so that the same inputs always give the
/// same patch.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SyncPatch(Vec<SyncHunk>);

impl SyncPatch {
    pub fn new(hunks: impl IntoIterator<Item = SyncHunk>) -> Self {
        let mut hunks: Vec<SyncHunk> = hunks.into_iter().collect();
        hunks.sort_by(|a, b| {
            (a.kind(), a.id(), a.target()).cmp(&(b.kind(), b.id(), b.target()))
        });
        Self(hunks)
    }

    /// Build the patch that makes the local and the remote envelopes
    /// converge, using the given base as common ancestor.
    ///
    /// Without base, the patch never contains deletions: messages
    /// present on one side only are copied to the other side.
    pub fn build(
        base: Option<&Envelopes>,
        local: &Envelopes,
        remote: &Envelopes,
        resolver: &ConflictResolver,
    ) -> Result<Self> {
        let mut hunks = Vec::new();

        let ids: BTreeSet<&str> = base
            .into_iter()
            .flat_map(|base| base.keys())
            .chain(local.keys())
            .chain(remote.keys())
            .map(String::as_str)
            .collect();

        for id in ids {
            let base = base.and_then(|base| base.get(id));
            let local = local.get(id);
            let remote = remote.get(id);

            match (base, local, remote) {
                // 000
                //
                // The message exists nowhere, which cannot happen
                // since ids come from the envelopes themselves.
                (None, None, None) => (),

                // 001
                //
                // The message only exists remotely, which means it
                // is new and needs to be copied locally.
                (None, None, Some(remote)) => {
                    hunks.push(SyncHunk::create(remote.clone(), SyncDestination::Local));
                }

                // 010
                //
                // The message only exists locally, which means it is
                // new and needs to be copied remotely.
                (None, Some(local), None) => {
                    hunks.push(SyncHunk::create(local.clone(), SyncDestination::Remote));
                }

                // 011
                //
                // The message exists on both sides without base: it
                // was added on both sides or a previous cycle copied
                // it before failing. Diverging flags are a conflict.
                (None, Some(local), Some(remote)) => {
                    if local.flags != remote.flags {
                        hunks.push(resolver.resolve(SyncConflict::Flags {
                            base: None,
                            local,
                            remote,
                        })?);
                    }
                }

                // 100
                //
                // The message was deleted on both sides, nothing to
                // do.
                (Some(_), None, None) => (),

                // 101
                //
                // The message was deleted locally. If the remote side
                // did not change since the base, the deletion is
                // propagated, otherwise the edit races the deletion.
                (Some(base), None, Some(remote)) => {
                    if remote.flags == base.flags {
                        hunks.push(SyncHunk::delete(id, SyncDestination::Remote));
                    } else {
                        hunks.push(resolver.resolve(SyncConflict::EditDelete {
                            base,
                            survivor: remote,
                            survivor_side: SyncDestination::Remote,
                        })?);
                    }
                }

                // 110
                //
                // The message was deleted remotely, same as 101 the
                // other way around.
                (Some(base), Some(local), None) => {
                    if local.flags == base.flags {
                        hunks.push(SyncHunk::delete(id, SyncDestination::Local));
                    } else {
                        hunks.push(resolver.resolve(SyncConflict::EditDelete {
                            base,
                            survivor: local,
                            survivor_side: SyncDestination::Local,
                        })?);
                    }
                }

                // 111
                //
                // The message exists everywhere. Flags changed on one
                // side are propagated to the other side, flags changed
                // on both sides are a conflict.
                (Some(base), Some(local), Some(remote)) => {
                    if local.flags == remote.flags {
                        continue;
                    }

                    if local.flags == base.flags {
                        let flags = remote.flags.clone();
                        hunks.push(SyncHunk::update_flags(id, flags, SyncDestination::Local));
                    } else if remote.flags == base.flags {
                        let flags = local.flags.clone();
                        hunks.push(SyncHunk::update_flags(id, flags, SyncDestination::Remote));
                    } else {
                        hunks.push(resolver.resolve(SyncConflict::Flags {
                            base: Some(base),
                            local,
                            remote,
                        })?);
                    }
                }
            }
        }

        let patch = Self::new(hunks);
        debug!(hunks = patch.len(), "built sync patch");
        trace!("{patch:#?}");

        Ok(patch)
    }

    pub fn hunks(&self) -> &[SyncHunk] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Split the patch into its phases, in application order. Empty
    /// phases are omitted.
    pub fn into_phases(self) -> Vec<(SyncHunkKind, Vec<SyncHunk>)> {
        let mut phases: Vec<(SyncHunkKind, Vec<SyncHunk>)> = Vec::new();

        for hunk in self.0 {
            match phases.last_mut() {
                Some((kind, hunks)) if *kind == hunk.kind() => hunks.push(hunk),
                _ => phases.push((hunk.kind(), vec![hunk])),
            }
        }

        phases
    }
}

impl IntoIterator for SyncPatch {
    type Item = SyncHunk;
    type IntoIter = vec::IntoIter<SyncHunk>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
