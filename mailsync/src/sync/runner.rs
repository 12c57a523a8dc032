//! # Folder sync runner
//!
//! Module dedicated to the cycle of one folder. The core structure of
//! this module is the [`FolderSyncRunner`], which drives the cycle
//! state machine from listing to commit.

use tracing::{debug, info, warn};

use crate::{
    backend::{self, Backend},
    envelope::Envelopes,
    state::{IdAliases, SyncBase, SyncKey},
};

use super::{
    apply::PatchApplier,
    checkpoint::{CreatedAliases, SyncCheckpoint},
    Error, FolderSyncFailure, FolderSyncReport, SyncDestination, SyncErrorKind, SyncEvent,
    SyncPatch, SyncPool, SyncState, SyncTask,
};

type FolderSyncResult = Result<FolderSyncReport, FolderSyncFailure>;

/// The folder synchronization runner.
pub(crate) struct FolderSyncRunner<'a> {
    pool: &'a SyncPool,
    key: &'a SyncKey,
    local: &'a dyn Backend,
    remote: &'a dyn Backend,
}

impl<'a> FolderSyncRunner<'a> {
    pub fn new(pool: &'a SyncPool, task: &'a SyncTask) -> Self {
        Self {
            pool,
            key: &task.key,
            local: task.local.as_ref(),
            remote: task.remote.as_ref(),
        }
    }

    /// Run the cycle, holding the folder lock.
    ///
    /// The cycle restarts from the listing when its commit conflicts
    /// with a concurrent one, up to the configured number of
    /// attempts. Aliases of messages created by previous attempts are
    /// carried over, so that restarts recognize them.
    pub async fn run(&self) -> FolderSyncResult {
        let _guard = self.pool.locks.lock(self.key).await;

        let mut attempt = 1;
        let mut created = CreatedAliases::default();

        let res = loop {
            match self.cycle(&mut created).await {
                Err(failure)
                    if failure.kind == SyncErrorKind::BaseCommitConflict
                        && attempt < self.pool.max_commit_attempts =>
                {
                    warn!(key = %self.key, attempt, "sync base changed concurrently, restarting");
                    attempt += 1;
                }
                res => break res,
            }
        };

        if let Err(failure) = &res {
            warn!(key = %self.key, kind = %failure.kind, "aborting sync: {}", failure.error);
            self.set_state(SyncState::Aborted).await;
            SyncEvent::Aborted(self.key.clone(), failure.kind)
                .emit(&self.pool.handler)
                .await;
        }

        self.set_state(SyncState::Idle).await;
        res
    }

    async fn cycle(&self, created: &mut CreatedAliases) -> FolderSyncResult {
        let key = self.key;
        let fail = |err: Error| FolderSyncFailure::new(key.clone(), err);

        self.set_state(SyncState::Listing).await;

        if self.pool.cancel.is_cancelled() {
            return Err(fail(Error::CancelledError));
        }

        let base = self
            .pool
            .store
            .get(key)
            .await
            .map_err(Error::GetBaseError)
            .map_err(fail)?;
        let expected = base.as_ref().map(|base| base.revision);
        let mut local_aliases = base
            .as_ref()
            .map(|base| base.local_aliases.clone())
            .unwrap_or_default();
        let mut remote_aliases = base
            .as_ref()
            .map(|base| base.remote_aliases.clone())
            .unwrap_or_default();
        local_aliases.merge(&created.local);
        remote_aliases.merge(&created.remote);

        let local = self
            .list(SyncDestination::Local, &mut local_aliases)
            .await
            .map_err(fail)?;
        let remote = self
            .list(SyncDestination::Remote, &mut remote_aliases)
            .await
            .map_err(fail)?;

        self.set_state(SyncState::Diffing).await;

        let patch = SyncPatch::build(
            base.as_ref().map(|base| &base.envelopes),
            &local,
            &remote,
            &self.pool.resolver,
        )
        .map_err(fail)?;

        SyncEvent::BuiltPatch(key.clone(), patch.len())
            .emit(&self.pool.handler)
            .await;

        if self.pool.dry_run {
            info!(%key, hunks = patch.len(), "dry run, skipping patch application");
            return Ok(FolderSyncReport {
                key: key.clone(),
                patch: patch.into_iter().map(|hunk| (hunk, None)).collect(),
                revision: expected,
                dry_run: true,
            });
        }

        self.set_state(SyncState::Applying).await;

        let applier = PatchApplier {
            key,
            local: self.local,
            remote: self.remote,
            local_aliases: &local_aliases,
            remote_aliases: &remote_aliases,
            width: self.pool.size,
            timeout: self.pool.timeout,
            cancel: &self.pool.cancel,
            handler: &self.pool.handler,
        };

        let mut applied = applier.apply(patch).await;
        let checkpoint = SyncCheckpoint::new(
            &local,
            &remote,
            &local_aliases,
            &remote_aliases,
            &applied.outcomes,
        );
        created.merge(&checkpoint.created);

        if let Some(err) = applied.error.take() {
            if let Some(next) = checkpoint.aliases_base(base.as_ref()) {
                self.commit_aliases(expected, next).await;
            }
            return Err(FolderSyncFailure::aborted(key.clone(), err, applied));
        }

        self.set_state(SyncState::Committing).await;

        let next = checkpoint.next_base(base.as_ref());

        let revision = match base.as_ref() {
            Some(base) if base.same_content(&next) => {
                debug!(%key, revision = base.revision, "sync base unchanged, skipping commit");
                Ok(base.revision)
            }
            _ => {
                let revision = next.revision;
                self.pool
                    .store
                    .compare_and_swap(key, expected, next)
                    .await
                    .map(|()| revision)
            }
        };

        match revision {
            Ok(revision) => {
                SyncEvent::CommittedBase(key.clone(), revision)
                    .emit(&self.pool.handler)
                    .await;
                Ok(FolderSyncReport::new(
                    key.clone(),
                    applied.outcomes,
                    Some(revision),
                ))
            }
            Err(err) => Err(FolderSyncFailure::aborted(
                key.clone(),
                Error::CommitBaseError(err),
                applied,
            )),
        }
    }

    /// List the envelopes of the given side, re-keyed with the given
    /// aliases.
    async fn list(
        &self,
        side: SyncDestination,
        aliases: &mut IdAliases,
    ) -> Result<Envelopes, Error> {
        let folder = &self.key.folder;
        let backend = match side {
            SyncDestination::Local => self.local,
            SyncDestination::Remote => self.remote,
        };

        let timeout = self.pool.timeout;
        let envelopes = match tokio::time::timeout(timeout, backend.list_envelopes(folder)).await {
            Ok(res) => res,
            Err(_) => Err(backend::Error::TimeoutError(timeout)),
        }
        .map_err(|err| Error::ListEnvelopesError(err, side, folder.clone()))?;

        let envelopes = aliases.rekey(envelopes);
        let count = envelopes.len();
        debug!(key = %self.key, backend = %backend.name(), count, "listed {side} envelopes");

        let event = match side {
            SyncDestination::Local => SyncEvent::ListedLocalEnvelopes(self.key.clone(), count),
            SyncDestination::Remote => SyncEvent::ListedRemoteEnvelopes(self.key.clone(), count),
        };
        event.emit(&self.pool.handler).await;

        Ok(envelopes)
    }

    /// Save aliases of messages created before an abort.
    ///
    /// A failure here is only logged: the cycle is already aborting.
    async fn commit_aliases(&self, expected: Option<u64>, next: SyncBase) {
        let revision = next.revision;

        match self
            .pool
            .store
            .compare_and_swap(self.key, expected, next)
            .await
        {
            Ok(()) => {
                debug!(key = %self.key, revision, "saved aliases of created messages");
            }
            Err(err) => {
                warn!(key = %self.key, "cannot save aliases of created messages: {err}");
            }
        }
    }

    async fn set_state(&self, state: SyncState) {
        debug!(key = %self.key, %state, "sync state changed");
        SyncEvent::StateChanged(self.key.clone(), state)
            .emit(&self.pool.handler)
            .await;
    }
}
