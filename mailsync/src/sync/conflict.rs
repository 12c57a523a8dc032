//! # Sync conflict
//!
//! Module dedicated to conflict resolution. A conflict happens when
//! both sides diverged independently from the base for the same
//! identity key.
//!
//! The [`ConflictResolver`] applies a last-writer-wins policy on the
//! internal date of envelopes: the later envelope wins, and its state
//! (flags or existence) is propagated to the other side. Equal dates
//! resolve to the tie-break side, which is the remote side unless
//! configured otherwise. The outcome only depends on the envelopes,
//! so that resolving the same conflict twice always gives the same
//! hunk.

use chrono::{DateTime, FixedOffset};
use tracing::debug;

use crate::envelope::Envelope;

use super::{Error, Result, SyncDestination, SyncHunk};

fn violation(id: &str, reason: impl ToString) -> Error {
    Error::ConflictPolicyViolationError(id.to_owned(), reason.to_string())
}

/// The synchronization conflict.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SyncConflict<'a> {
    /// Both sides hold the message, with different flags, and none of
    /// them matches the base (if any).
    Flags {
        base: Option<&'a Envelope>,
        local: &'a Envelope,
        remote: &'a Envelope,
    },

    /// One side changed the flags of the message while the other side
    /// deleted it.
    EditDelete {
        base: &'a Envelope,
        survivor: &'a Envelope,
        survivor_side: SyncDestination,
    },
}

/// The conflict resolver.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ConflictResolver {
    tie_break: SyncDestination,
}

impl ConflictResolver {
    pub fn new(tie_break: SyncDestination) -> Self {
        Self { tie_break }
    }

    pub fn tie_break(&self) -> SyncDestination {
        self.tie_break
    }

    /// Return the side whose state wins, given the date of each side.
    pub fn winner(
        &self,
        local: &DateTime<FixedOffset>,
        remote: &DateTime<FixedOffset>,
    ) -> SyncDestination {
        if local > remote {
            SyncDestination::Local
        } else if remote > local {
            SyncDestination::Remote
        } else {
            self.tie_break
        }
    }

    /// Resolve the given conflict into the hunk that makes both sides
    /// converge.
    ///
    /// Fails with [`Error::ConflictPolicyViolationError`] if the given
    /// case is not a genuine two-sided divergence.
    pub fn resolve(&self, conflict: SyncConflict) -> Result<SyncHunk> {
        let hunk = match conflict {
            SyncConflict::Flags {
                base,
                local,
                remote,
            } => {
                if local.id != remote.id {
                    let reason = format!("identity keys differ from {}", remote.id);
                    return Err(violation(&local.id, reason));
                }

                if local.flags == remote.flags {
                    return Err(violation(&local.id, "flags already converged"));
                }

                if let Some(base) = base {
                    if local.flags == base.flags || remote.flags == base.flags {
                        return Err(violation(&local.id, "only one side diverged from base"));
                    }
                }

                match self.winner(&local.date, &remote.date) {
                    SyncDestination::Local => SyncHunk::UpdateFlagsOnRemote(
                        local.id.clone(),
                        local.flags.clone(),
                    ),
                    SyncDestination::Remote => SyncHunk::UpdateFlagsOnLocal(
                        remote.id.clone(),
                        remote.flags.clone(),
                    ),
                }
            }
            SyncConflict::EditDelete {
                base,
                survivor,
                survivor_side,
            } => {
                if base.id != survivor.id {
                    let reason = format!("identity keys differ from {}", base.id);
                    return Err(violation(&survivor.id, reason));
                }

                if base.flags == survivor.flags {
                    return Err(violation(&survivor.id, "surviving side did not change"));
                }

                // the deleting side is known by its last base state
                let winner = match survivor_side {
                    SyncDestination::Local => self.winner(&survivor.date, &base.date),
                    SyncDestination::Remote => self.winner(&base.date, &survivor.date),
                };

                if winner == survivor_side {
                    SyncHunk::create(survivor.clone(), survivor_side.opposite())
                } else {
                    SyncHunk::delete(survivor.id.clone(), survivor_side)
                }
            }
        };

        debug!("resolved conflict: {hunk}");
        Ok(hunk)
    }
}
