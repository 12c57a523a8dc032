//! # Sync report
//!
//! Module dedicated to synchronization reporting. A folder cycle ends
//! either with a [`FolderSyncReport`] or with a
//! [`FolderSyncFailure`]. The pool gathers both into a
//! [`SyncReport`].

use crate::{backend, state::SyncKey};

use super::{
    apply::{AppliedPatch, HunkOutcome},
    Error, SyncErrorKind, SyncHunk,
};

/// The list of processed hunks associated with an optional error.
pub type SyncReportPatch = Vec<(SyncHunk, Option<backend::Error>)>;

fn report_patch(outcomes: Vec<(SyncHunk, HunkOutcome)>) -> SyncReportPatch {
    outcomes
        .into_iter()
        .map(|(hunk, outcome)| match outcome {
            HunkOutcome::Applied | HunkOutcome::Created(_) => (hunk, None),
            HunkOutcome::Skipped(err) | HunkOutcome::Failed(err) => (hunk, Some(err)),
        })
        .collect()
}

/// The report of a successful folder cycle.
#[derive(Debug, Default)]
pub struct FolderSyncReport {
    /// The synchronized folder.
    pub key: SyncKey,

    /// The processed hunks. Hunks associated with an error were
    /// skipped because their message disappeared. In dry run mode,
    /// this is the patch that would have been applied.
    pub patch: SyncReportPatch,

    /// The revision of the base at the end of the cycle.
    pub revision: Option<u64>,

    /// Whether the cycle ran in dry run mode.
    pub dry_run: bool,
}

impl FolderSyncReport {
    pub(crate) fn new(
        key: SyncKey,
        outcomes: Vec<(SyncHunk, HunkOutcome)>,
        revision: Option<u64>,
    ) -> Self {
        Self {
            key,
            patch: report_patch(outcomes),
            revision,
            dry_run: false,
        }
    }

    pub fn applied(&self) -> impl Iterator<Item = &SyncHunk> {
        self.patch
            .iter()
            .filter(|(_, err)| err.is_none())
            .map(|(hunk, _)| hunk)
    }

    pub fn skipped(&self) -> impl Iterator<Item = (&SyncHunk, &backend::Error)> {
        self.patch
            .iter()
            .filter_map(|(hunk, err)| err.as_ref().map(|err| (hunk, err)))
    }
}

/// The report of an aborted folder cycle.
///
/// The base of the folder is left as it was before the cycle, except
/// for aliases of messages created before the abort.
#[derive(Debug)]
pub struct FolderSyncFailure {
    /// The folder whose cycle aborted.
    pub key: SyncKey,

    /// The kind of the error that aborted the cycle.
    pub kind: SyncErrorKind,

    /// The number of hunks applied before the abort.
    pub applied: usize,

    /// The hunks processed before the abort.
    pub patch: SyncReportPatch,

    /// The error that aborted the cycle.
    pub error: Error,
}

impl FolderSyncFailure {
    pub fn new(key: SyncKey, error: Error) -> Self {
        Self {
            key,
            kind: error.kind(),
            applied: 0,
            patch: Default::default(),
            error,
        }
    }

    pub(crate) fn aborted(key: SyncKey, error: Error, applied: AppliedPatch) -> Self {
        Self {
            applied: applied.applied(),
            patch: report_patch(applied.outcomes),
            ..Self::new(key, error)
        }
    }
}

/// The synchronization report.
///
/// Gathers the reports of all folder cycles run by a pool.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// The reports of successful folder cycles.
    pub folders: Vec<FolderSyncReport>,

    /// The reports of aborted folder cycles.
    pub failures: Vec<FolderSyncFailure>,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}
