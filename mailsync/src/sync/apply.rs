//! # Sync patch application
//!
//! Module dedicated to the application of a [`SyncPatch`] to both
//! sides of a folder. The core structure of this module is the
//! [`PatchApplier`].
//!
//! Phases are applied one after the other (deletes, creates, then
//! flag updates). Hunks of the same phase are applied concurrently,
//! up to a bounded width. A hunk whose message disappeared is skipped
//! and the cycle continues. Any other failure aborts the cycle: hunks
//! already in flight settle, hunks not started yet are dropped and
//! the next phases never start.

use std::{future::Future, sync::Arc, time::Duration};

use futures::{future, stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{
    backend::{self, Backend},
    envelope::Id,
    state::{IdAliases, SyncKey},
};

use super::{
    Error, SyncDestination, SyncEvent, SyncEventHandler, SyncHunk, SyncHunkKind, SyncPatch,
};

/// The outcome of one processed hunk.
#[derive(Debug)]
pub enum HunkOutcome {
    /// The hunk was applied.
    Applied,

    /// The create hunk was applied, and the target backend assigned
    /// the given id to the new message.
    Created(Id),

    /// The message disappeared, the hunk was skipped.
    Skipped(backend::Error),

    /// The hunk failed while the cycle was already aborting.
    Failed(backend::Error),
}

impl HunkOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied | Self::Created(_))
    }
}

/// The result of a patch application.
#[derive(Debug, Default)]
pub struct AppliedPatch {
    /// The processed hunks, with their outcome.
    pub outcomes: Vec<(SyncHunk, HunkOutcome)>,

    /// The error that aborted the application, if any.
    pub error: Option<Error>,
}

impl AppliedPatch {
    /// Return the number of hunks applied.
    pub fn applied(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| outcome.is_applied())
            .count()
    }
}

/// The patch applier.
///
/// Translates hunks into backend calls, using the identity key
/// aliases of each side to find the backend ids.
pub struct PatchApplier<'a> {
    pub key: &'a SyncKey,
    pub local: &'a dyn Backend,
    pub remote: &'a dyn Backend,
    pub local_aliases: &'a IdAliases,
    pub remote_aliases: &'a IdAliases,
    pub width: usize,
    pub timeout: Duration,
    pub cancel: &'a CancellationToken,
    pub handler: &'a Option<Arc<SyncEventHandler>>,
}

impl PatchApplier<'_> {
    /// Apply the given patch, phase by phase.
    pub async fn apply(&self, patch: SyncPatch) -> AppliedPatch {
        let mut applied = AppliedPatch::default();

        // cancelled by the first fatal hunk failure, or by the caller
        let abort = self.cancel.child_token();

        for (kind, hunks) in patch.into_phases() {
            if abort.is_cancelled() {
                break;
            }

            debug!(key = %self.key, ?kind, hunks = hunks.len(), "applying sync phase");
            self.apply_phase(kind, hunks, &abort, &mut applied).await;
        }

        if applied.error.is_none() && self.cancel.is_cancelled() {
            applied.error = Some(Error::CancelledError);
        }

        applied
    }

    async fn apply_phase(
        &self,
        kind: SyncHunkKind,
        hunks: Vec<SyncHunk>,
        abort: &CancellationToken,
        applied: &mut AppliedPatch,
    ) {
        let results: Vec<_> = stream::iter(hunks)
            .map(|hunk| self.process_hunk(hunk, abort))
            .buffer_unordered(self.width.max(1))
            .filter_map(future::ready)
            .collect()
            .await;

        for (hunk, res) in results {
            match res {
                Ok(outcome) => {
                    debug!(key = %self.key, "{hunk}");
                    applied.outcomes.push((hunk, outcome));
                }
                Err(err) if err.is_message_gone() => {
                    warn!(key = %self.key, "skipping hunk: {hunk}: {err}");
                    applied.outcomes.push((hunk, HunkOutcome::Skipped(err)));
                }
                Err(err) if applied.error.is_none() => {
                    warn!(key = %self.key, ?kind, "aborting sync: {hunk}: {err}");
                    applied.error = Some(Error::ApplyHunkError(err, hunk));
                }
                Err(err) => {
                    debug!(key = %self.key, "hunk failed while aborting: {hunk}: {err}");
                    applied.outcomes.push((hunk, HunkOutcome::Failed(err)));
                }
            }
        }
    }

    /// Process the given hunk, unless the application is aborting.
    async fn process_hunk(
        &self,
        hunk: SyncHunk,
        abort: &CancellationToken,
    ) -> Option<(SyncHunk, backend::Result<HunkOutcome>)> {
        if abort.is_cancelled() {
            trace!(key = %self.key, "dropping hunk: {hunk}");
            return None;
        }

        let res = self.apply_hunk(&hunk).await;

        if let Err(err) = &res {
            if !err.is_message_gone() {
                abort.cancel();
            }
        }

        SyncEvent::ProcessedHunk(self.key.clone(), hunk.clone())
            .emit(self.handler)
            .await;

        Some((hunk, res))
    }

    async fn apply_hunk(&self, hunk: &SyncHunk) -> backend::Result<HunkOutcome> {
        let folder = self.key.folder.as_str();
        let target = hunk.target();
        let backend = self.backend(target);
        let aliases = self.aliases(target);

        match hunk {
            SyncHunk::DeleteOnLocal(id) | SyncHunk::DeleteOnRemote(id) => {
                let id = aliases.backend_id(id);
                self.call(backend.delete_message(folder, id)).await?;
                Ok(HunkOutcome::Applied)
            }
            SyncHunk::CreateOnLocal(envelope) | SyncHunk::CreateOnRemote(envelope) => {
                let source = target.opposite();
                let source_id = self.aliases(source).backend_id(&envelope.id);
                let content = self
                    .call(self.backend(source).fetch_content(folder, source_id))
                    .await?;
                let id = self
                    .call(backend.create_message(folder, envelope, &content))
                    .await?;
                Ok(HunkOutcome::Created(id))
            }
            SyncHunk::UpdateFlagsOnLocal(id, flags) | SyncHunk::UpdateFlagsOnRemote(id, flags) => {
                let id = aliases.backend_id(id);
                self.call(backend.set_flags(folder, id, flags)).await?;
                Ok(HunkOutcome::Applied)
            }
        }
    }

    async fn call<T>(&self, f: impl Future<Output = backend::Result<T>>) -> backend::Result<T> {
        match tokio::time::timeout(self.timeout, f).await {
            Ok(res) => res,
            Err(_) => Err(backend::Error::TimeoutError(self.timeout)),
        }
    }

    fn backend(&self, side: SyncDestination) -> &dyn Backend {
        match side {
            SyncDestination::Local => self.local,
            SyncDestination::Remote => self.remote,
        }
    }

    fn aliases(&self, side: SyncDestination) -> &IdAliases {
        match side {
            SyncDestination::Local => self.local_aliases,
            SyncDestination::Remote => self.remote_aliases,
        }
    }
}
