use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, TimeZone};
use mailsync::{
    backend::{
        self, Backend, CreateMessage, DeleteMessage, FetchContent, ListEnvelopes, MemoryBackend,
        SetFlags,
    },
    envelope::{Envelope, Envelopes, Id},
    flag::Flags,
    state::{self, FileStateStore, MemoryStateStore, SyncBase, SyncKey, SyncStateStore},
    sync::{
        ConflictConfig, Error, FolderSyncReport, SyncBuilder, SyncConfig, SyncDestination,
        SyncErrorKind, SyncEvent, SyncHunk, SyncState, SyncTask,
    },
};
use tempfile::tempdir;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

const INBOX: &str = "INBOX";
const SENT: &str = "Sent";

fn date(day: u32) -> DateTime<FixedOffset> {
    FixedOffset::east_opt(0)
        .unwrap()
        .with_ymd_and_hms(2024, 1, day, 12, 0, 0)
        .unwrap()
}

fn envelope(id: &str, flags: &str) -> Envelope {
    Envelope::new(id, flags, date(1))
}

async fn seed(backend: &MemoryBackend, folder: &str, envelopes: &[Envelope]) {
    backend.add_folder(folder).await;
    for envelope in envelopes {
        let content = format!("Subject: {}\r\n\r\nHello!", envelope.id);
        backend
            .insert_message(folder, envelope.clone(), content)
            .await
            .unwrap();
    }
}

fn key(folder: &str) -> SyncKey {
    SyncKey::new("account", folder)
}

fn task(folder: &str, local: &MemoryBackend, remote: &MemoryBackend) -> SyncTask {
    SyncTask::new(key(folder), Arc::new(local.clone()), Arc::new(remote.clone()))
}

fn config() -> SyncConfig {
    SyncConfig {
        pool_size: Some(4),
        timeout: Some(5),
        ..Default::default()
    }
}

fn memory_store() -> Arc<dyn SyncStateStore> {
    Arc::new(MemoryStateStore::new())
}

fn builder(store: &Arc<dyn SyncStateStore>) -> SyncBuilder {
    SyncBuilder::new(config()).with_shared_store(store.clone())
}

fn hunks(report: &FolderSyncReport) -> Vec<SyncHunk> {
    report.patch.iter().map(|(hunk, _)| hunk.clone()).collect()
}

fn ids(envelopes: &Envelopes) -> Vec<&str> {
    envelopes.keys().map(String::as_str).collect()
}

/// A backend wrapping a memory backend, used to inject failures the
/// memory backend cannot produce by itself.
#[derive(Clone)]
struct FaultyBackend {
    inner: MemoryBackend,
    gone: Option<Id>,
    delay: Duration,
}

impl FaultyBackend {
    fn new(inner: &MemoryBackend) -> Self {
        Self {
            inner: inner.clone(),
            gone: None,
            delay: Duration::ZERO,
        }
    }

    fn with_gone(mut self, id: impl Into<Id>) -> Self {
        self.gone = Some(id.into());
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl ListEnvelopes for FaultyBackend {
    async fn list_envelopes(&self, folder: &str) -> backend::Result<Envelopes> {
        tokio::time::sleep(self.delay).await;
        self.inner.list_envelopes(folder).await
    }
}

#[async_trait]
impl FetchContent for FaultyBackend {
    async fn fetch_content(&self, folder: &str, id: &str) -> backend::Result<Vec<u8>> {
        if self.gone.as_deref() == Some(id) {
            return Err(backend::Error::message_gone(folder, id));
        }
        self.inner.fetch_content(folder, id).await
    }
}

#[async_trait]
impl CreateMessage for FaultyBackend {
    async fn create_message(
        &self,
        folder: &str,
        envelope: &Envelope,
        content: &[u8],
    ) -> backend::Result<Id> {
        self.inner.create_message(folder, envelope, content).await
    }
}

#[async_trait]
impl DeleteMessage for FaultyBackend {
    async fn delete_message(&self, folder: &str, id: &str) -> backend::Result<()> {
        self.inner.delete_message(folder, id).await
    }
}

#[async_trait]
impl SetFlags for FaultyBackend {
    async fn set_flags(&self, folder: &str, id: &str, flags: &Flags) -> backend::Result<()> {
        self.inner.set_flags(folder, id, flags).await
    }
}

impl Backend for FaultyBackend {
    fn name(&self) -> String {
        format!("faulty {}", self.inner.name())
    }
}

/// A store where a concurrent process commits right before the first
/// commit of the cycle. The concurrent process commits the same base
/// as the cycle, unless a competing one is given.
#[derive(Default)]
struct RacingStore {
    inner: MemoryStateStore,
    competing: Option<SyncBase>,
    raced: Mutex<bool>,
    commits: Mutex<usize>,
}

impl RacingStore {
    fn with_competing(base: SyncBase) -> Self {
        Self {
            competing: Some(base),
            ..Default::default()
        }
    }
}

#[async_trait]
impl SyncStateStore for RacingStore {
    async fn get(&self, key: &SyncKey) -> state::Result<Option<SyncBase>> {
        self.inner.get(key).await
    }

    async fn compare_and_swap(
        &self,
        key: &SyncKey,
        expected: Option<u64>,
        base: SyncBase,
    ) -> state::Result<()> {
        *self.commits.lock().await += 1;

        let mut raced = self.raced.lock().await;
        if !*raced {
            *raced = true;
            let competing = self.competing.clone().unwrap_or_else(|| base.clone());
            self.inner.compare_and_swap(key, expected, competing).await?;
        }

        self.inner.compare_and_swap(key, expected, base).await
    }
}

/// A store whose commits always conflict.
#[derive(Default)]
struct ConflictingStore {
    commits: Mutex<usize>,
}

#[async_trait]
impl SyncStateStore for ConflictingStore {
    async fn get(&self, _key: &SyncKey) -> state::Result<Option<SyncBase>> {
        Ok(None)
    }

    async fn compare_and_swap(
        &self,
        key: &SyncKey,
        expected: Option<u64>,
        _base: SyncBase,
    ) -> state::Result<()> {
        let mut commits = self.commits.lock().await;
        *commits += 1;
        let current = Some(*commits as u64);
        Err(state::Error::CommitConflictError(key.clone(), expected, current))
    }
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn test_sync_creates_missing_messages() {
    let local = MemoryBackend::new("local");
    let remote = MemoryBackend::new("remote");
    seed(&local, INBOX, &[envelope("m1", "")]).await;
    seed(&remote, INBOX, &[]).await;

    let store = memory_store();

    let report = builder(&store)
        .sync([task(INBOX, &local, &remote)])
        .await
        .unwrap();

    assert!(report.is_success());
    let folder = &report.folders[0];
    assert_eq!(folder.revision, Some(1));
    assert!(matches!(
        hunks(folder).as_slice(),
        [SyncHunk::CreateOnRemote(envelope)] if envelope.id == "m1"
    ));

    let envelopes = remote.envelopes(INBOX).await.unwrap();
    assert_eq!(ids(&envelopes), vec!["m1"]);
    assert_eq!(envelopes["m1"].flags, Flags::default());
    assert_eq!(
        remote.fetch_content(INBOX, "m1").await.unwrap(),
        local.fetch_content(INBOX, "m1").await.unwrap(),
    );

    let base = store.get(&key(INBOX)).await.unwrap().unwrap();
    assert_eq!(base.revision, 1);
    assert_eq!(ids(&base.envelopes), vec!["m1"]);

    // a second cycle has nothing left to do

    let report = builder(&store)
        .sync([task(INBOX, &local, &remote)])
        .await
        .unwrap();

    let folder = &report.folders[0];
    assert!(folder.patch.is_empty());
    assert_eq!(folder.revision, Some(1));
    assert_eq!(local.mutations().await, 0);
    assert_eq!(remote.mutations().await, 1);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn test_sync_propagates_flags() {
    let local = MemoryBackend::new("local");
    let remote = MemoryBackend::new("remote");
    seed(&local, INBOX, &[envelope("m1", ""), envelope("m2", "")]).await;
    seed(&remote, INBOX, &[envelope("m1", ""), envelope("m2", "")]).await;

    let store = memory_store();

    let report = builder(&store)
        .sync([task(INBOX, &local, &remote)])
        .await
        .unwrap();
    assert!(report.folders[0].patch.is_empty());

    local
        .update_flags(INBOX, "m1", Flags::from("seen"))
        .await
        .unwrap();
    remote
        .update_flags(INBOX, "m2", Flags::from("flagged"))
        .await
        .unwrap();

    let report = builder(&store)
        .sync([task(INBOX, &local, &remote)])
        .await
        .unwrap();

    let folder = &report.folders[0];
    assert_eq!(folder.revision, Some(2));
    assert_eq!(
        hunks(folder),
        vec![
            SyncHunk::UpdateFlagsOnRemote("m1".into(), Flags::from("seen")),
            SyncHunk::UpdateFlagsOnLocal("m2".into(), Flags::from("flagged")),
        ]
    );

    assert_eq!(
        local.envelopes(INBOX).await.unwrap(),
        remote.envelopes(INBOX).await.unwrap()
    );

    let report = builder(&store)
        .sync([task(INBOX, &local, &remote)])
        .await
        .unwrap();
    assert!(report.folders[0].patch.is_empty());
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn test_sync_propagates_deletions() {
    let local = MemoryBackend::new("local");
    let remote = MemoryBackend::new("remote");
    seed(&local, INBOX, &[envelope("m1", ""), envelope("m2", "")]).await;
    seed(&remote, INBOX, &[envelope("m1", ""), envelope("m2", "")]).await;

    let store = memory_store();

    builder(&store)
        .sync([task(INBOX, &local, &remote)])
        .await
        .unwrap();

    local.remove_message(INBOX, "m1").await.unwrap();
    remote.remove_message(INBOX, "m2").await.unwrap();

    let report = builder(&store)
        .sync([task(INBOX, &local, &remote)])
        .await
        .unwrap();

    assert_eq!(
        hunks(&report.folders[0]),
        vec![
            SyncHunk::DeleteOnRemote("m1".into()),
            SyncHunk::DeleteOnLocal("m2".into()),
        ]
    );
    assert!(local.envelopes(INBOX).await.unwrap().is_empty());
    assert!(remote.envelopes(INBOX).await.unwrap().is_empty());

    let base = store.get(&key(INBOX)).await.unwrap().unwrap();
    assert!(base.envelopes.is_empty());
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn test_sync_resolves_edit_delete_conflict() {
    let local = MemoryBackend::new("local");
    let remote = MemoryBackend::new("remote");
    seed(&local, INBOX, &[envelope("m1", "")]).await;
    seed(&remote, INBOX, &[envelope("m1", "")]).await;

    let store = memory_store();

    builder(&store)
        .sync([task(INBOX, &local, &remote)])
        .await
        .unwrap();

    local.remove_message(INBOX, "m1").await.unwrap();
    remote
        .update_flags(INBOX, "m1", Flags::from("seen"))
        .await
        .unwrap();

    let report = builder(&store)
        .sync([task(INBOX, &local, &remote)])
        .await
        .unwrap();

    // internal dates are equal, the remote side wins the tie
    assert!(matches!(
        hunks(&report.folders[0]).as_slice(),
        [SyncHunk::CreateOnLocal(envelope)] if envelope.id == "m1"
    ));

    let envelopes = local.envelopes(INBOX).await.unwrap();
    assert_eq!(envelopes["m1"].flags, Flags::from("seen"));

    let base = store.get(&key(INBOX)).await.unwrap().unwrap();
    assert_eq!(base.envelopes["m1"].flags, Flags::from("seen"));

    let report = builder(&store)
        .sync([task(INBOX, &local, &remote)])
        .await
        .unwrap();
    assert!(report.folders[0].patch.is_empty());
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn test_sync_resolves_flags_conflict() {
    let local = MemoryBackend::new("local");
    let remote = MemoryBackend::new("remote");
    seed(&local, INBOX, &[Envelope::new("m1", "seen", date(2))]).await;
    seed(&remote, INBOX, &[Envelope::new("m1", "flagged", date(1))]).await;
    seed(&local, SENT, &[Envelope::new("m2", "seen", date(1))]).await;
    seed(&remote, SENT, &[Envelope::new("m2", "flagged", date(1))]).await;

    let report = builder(&memory_store())
        .sync([task(INBOX, &local, &remote), task(SENT, &local, &remote)])
        .await
        .unwrap();
    assert!(report.is_success());

    // the later local envelope wins
    let envelopes = remote.envelopes(INBOX).await.unwrap();
    assert_eq!(envelopes["m1"].flags, Flags::from("seen"));

    // equal dates, the remote side wins
    let envelopes = local.envelopes(SENT).await.unwrap();
    assert_eq!(envelopes["m2"].flags, Flags::from("flagged"));

    // the tie-break side can be configured
    let local = MemoryBackend::new("local");
    let remote = MemoryBackend::new("remote");
    seed(&local, SENT, &[Envelope::new("m2", "seen", date(1))]).await;
    seed(&remote, SENT, &[Envelope::new("m2", "flagged", date(1))]).await;

    let config = SyncConfig {
        conflict: ConflictConfig {
            tie_break: SyncDestination::Local,
        },
        ..config()
    };

    let report = SyncBuilder::new(config)
        .with_store(MemoryStateStore::new())
        .sync([task(SENT, &local, &remote)])
        .await
        .unwrap();

    assert_eq!(
        hunks(&report.folders[0]),
        vec![SyncHunk::UpdateFlagsOnRemote(
            "m2".into(),
            Flags::from("seen")
        )]
    );
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn test_sync_with_server_assigned_ids() {
    let local = MemoryBackend::new("local");
    let remote = MemoryBackend::server("remote");
    let envelopes = [envelope("<a@localhost>", ""), envelope("<b@localhost>", "")];
    seed(&local, INBOX, &envelopes).await;
    seed(&remote, INBOX, &[envelope("1", "seen")]).await;

    let store = memory_store();

    let report = builder(&store)
        .with_pool_size(1)
        .sync([task(INBOX, &local, &remote)])
        .await
        .unwrap();
    assert_eq!(report.folders[0].patch.len(), 3);

    let envelopes = remote.envelopes(INBOX).await.unwrap();
    assert_eq!(ids(&envelopes), vec!["1", "2", "3"]);

    let base = store.get(&key(INBOX)).await.unwrap().unwrap();
    assert_eq!(base.remote_aliases.len(), 2);
    assert_eq!(base.remote_aliases.backend_id("<a@localhost>"), "2");
    assert_eq!(base.remote_aliases.backend_id("<b@localhost>"), "3");
    assert!(base.local_aliases.is_empty());

    // server ids are recognized, nothing is copied twice

    let report = builder(&store)
        .sync([task(INBOX, &local, &remote)])
        .await
        .unwrap();
    assert!(report.folders[0].patch.is_empty());
    assert_eq!(remote.mutations().await, 2);

    // changes are translated to server ids

    local
        .update_flags(INBOX, "<a@localhost>", Flags::from("seen"))
        .await
        .unwrap();
    local.remove_message(INBOX, "<b@localhost>").await.unwrap();

    let report = builder(&store)
        .sync([task(INBOX, &local, &remote)])
        .await
        .unwrap();
    assert_eq!(
        hunks(&report.folders[0]),
        vec![
            SyncHunk::DeleteOnRemote("<b@localhost>".into()),
            SyncHunk::UpdateFlagsOnRemote("<a@localhost>".into(), Flags::from("seen")),
        ]
    );

    let envelopes = remote.envelopes(INBOX).await.unwrap();
    assert_eq!(ids(&envelopes), vec!["1", "2"]);
    assert_eq!(envelopes["2"].flags, Flags::from("seen"));

    let base = store.get(&key(INBOX)).await.unwrap().unwrap();
    assert_eq!(base.remote_aliases.len(), 1);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn test_sync_resumes_after_partial_failure() {
    let local = MemoryBackend::new("local");
    let remote = MemoryBackend::server("remote");
    let envelopes = ["m1", "m2", "m3", "m4"].map(|id| envelope(id, ""));
    seed(&local, INBOX, &envelopes).await;
    seed(&remote, INBOX, &[]).await;
    remote.set_mutations_limit(Some(2)).await;

    let store = memory_store();

    let report = builder(&store)
        .with_pool_size(1)
        .sync([task(INBOX, &local, &remote)])
        .await
        .unwrap();

    assert!(!report.is_success());
    let failure = &report.failures[0];
    assert_eq!(failure.kind, SyncErrorKind::BackendUnavailable);
    assert_eq!(failure.applied, 2);
    assert_eq!(remote.envelopes(INBOX).await.unwrap().len(), 2);

    // envelopes of the base are left untouched, only the ids assigned
    // to created messages are recorded
    let base = store.get(&key(INBOX)).await.unwrap().unwrap();
    assert!(base.envelopes.is_empty());
    assert_eq!(base.remote_aliases.len(), 2);

    remote.set_mutations_limit(None).await;
    remote.set_offline(false).await;

    let report = builder(&store)
        .with_pool_size(1)
        .sync([task(INBOX, &local, &remote)])
        .await
        .unwrap();

    assert!(report.is_success());
    let created: Vec<_> = hunks(&report.folders[0])
        .iter()
        .map(|hunk| hunk.id().to_owned())
        .collect();
    assert_eq!(created, vec!["m3", "m4"]);
    assert_eq!(remote.envelopes(INBOX).await.unwrap().len(), 4);
    assert_eq!(remote.mutations().await, 4);

    let base = store.get(&key(INBOX)).await.unwrap().unwrap();
    assert_eq!(ids(&base.envelopes), vec!["m1", "m2", "m3", "m4"]);
    assert_eq!(base.remote_aliases.len(), 4);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn test_sync_aborts_when_backend_is_offline() {
    let local = MemoryBackend::new("local");
    let remote = MemoryBackend::new("remote");
    seed(&local, INBOX, &[envelope("m1", "")]).await;
    seed(&remote, INBOX, &[]).await;
    remote.set_offline(true).await;

    let store = memory_store();
    let events = Arc::new(Mutex::new(Vec::new()));
    let handler_events = events.clone();

    let report = builder(&store)
        .with_handler(move |evt| {
            let events = handler_events.clone();
            async move {
                events.lock().await.push(evt);
                Ok(())
            }
        })
        .sync([task(INBOX, &local, &remote)])
        .await
        .unwrap();

    let failure = &report.failures[0];
    assert_eq!(failure.key, key(INBOX));
    assert_eq!(failure.kind, SyncErrorKind::BackendUnavailable);
    assert_eq!(failure.applied, 0);
    assert!(store.get(&key(INBOX)).await.unwrap().is_none());

    let events = events.lock().await;
    let states: Vec<_> = events
        .iter()
        .filter_map(|evt| match evt {
            SyncEvent::StateChanged(_, state) => Some(*state),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![SyncState::Listing, SyncState::Aborted, SyncState::Idle]
    );
    assert!(events.contains(&SyncEvent::Aborted(
        key(INBOX),
        SyncErrorKind::BackendUnavailable
    )));
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn test_sync_aborts_on_missing_folder() {
    let local = MemoryBackend::new("local");
    let remote = MemoryBackend::new("remote");
    seed(&local, INBOX, &[envelope("m1", "")]).await;

    let report = builder(&memory_store())
        .sync([task(INBOX, &local, &remote)])
        .await
        .unwrap();

    assert_eq!(report.failures[0].kind, SyncErrorKind::FolderNotFound);
    assert_eq!(local.mutations().await, 0);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn test_sync_skips_gone_messages() {
    let local = MemoryBackend::new("local");
    let remote = MemoryBackend::new("remote");
    seed(&local, INBOX, &[envelope("m1", ""), envelope("m2", "")]).await;
    seed(&remote, INBOX, &[]).await;

    let store = memory_store();
    let faulty_local = FaultyBackend::new(&local).with_gone("m1");
    let task = SyncTask::new(key(INBOX), Arc::new(faulty_local), Arc::new(remote.clone()));

    let report = builder(&store).sync([task.clone()]).await.unwrap();

    assert!(report.is_success());
    let folder = &report.folders[0];
    assert_eq!(folder.applied().count(), 1);

    let skipped: Vec<_> = folder.skipped().collect();
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0].0.id(), "m1");
    assert!(skipped[0].1.is_message_gone());

    assert_eq!(ids(&remote.envelopes(INBOX).await.unwrap()), vec!["m2"]);

    // the skipped message stays out of the base, so that the next
    // cycle tries again
    let base = store.get(&key(INBOX)).await.unwrap().unwrap();
    assert_eq!(ids(&base.envelopes), vec!["m2"]);

    let report = builder(&store).sync([task]).await.unwrap();
    let folder = &report.folders[0];
    assert_eq!(folder.skipped().count(), 1);
    assert_eq!(folder.applied().count(), 0);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn test_sync_times_out_slow_backend() {
    let local = MemoryBackend::new("local");
    let remote = MemoryBackend::new("remote");
    seed(&local, INBOX, &[envelope("m1", "")]).await;
    seed(&remote, INBOX, &[]).await;

    let slow_remote = FaultyBackend::new(&remote).with_delay(Duration::from_secs(10));
    let task = SyncTask::new(key(INBOX), Arc::new(local.clone()), Arc::new(slow_remote));

    let config = SyncConfig {
        timeout: Some(1),
        ..config()
    };

    let report = SyncBuilder::new(config)
        .with_store(MemoryStateStore::new())
        .sync([task])
        .await
        .unwrap();

    let failure = &report.failures[0];
    assert_eq!(failure.kind, SyncErrorKind::BackendUnavailable);
    assert!(matches!(
        failure.error,
        Error::ListEnvelopesError(backend::Error::TimeoutError(_), SyncDestination::Remote, _)
    ));
    assert!(remote.envelopes(INBOX).await.unwrap().is_empty());
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn test_sync_cancellation() {
    let local = MemoryBackend::new("local");
    let remote = MemoryBackend::new("remote");
    let envelopes = ["m1", "m2", "m3"].map(|id| envelope(id, ""));
    seed(&local, INBOX, &envelopes).await;
    seed(&remote, INBOX, &[]).await;

    let store = memory_store();

    // cancelled before the cycle starts

    let token = CancellationToken::new();
    token.cancel();

    let report = builder(&store)
        .with_cancellation_token(token)
        .sync([task(INBOX, &local, &remote)])
        .await
        .unwrap();

    assert_eq!(report.failures[0].kind, SyncErrorKind::Cancelled);
    assert!(remote.envelopes(INBOX).await.unwrap().is_empty());

    // cancelled after the first processed hunk

    let token = CancellationToken::new();
    let handler_token = token.clone();

    let report = builder(&store)
        .with_pool_size(1)
        .with_cancellation_token(token)
        .with_handler(move |evt| {
            let token = handler_token.clone();
            async move {
                if let SyncEvent::ProcessedHunk(..) = evt {
                    token.cancel();
                }
                Ok(())
            }
        })
        .sync([task(INBOX, &local, &remote)])
        .await
        .unwrap();

    let failure = &report.failures[0];
    assert_eq!(failure.kind, SyncErrorKind::Cancelled);
    assert_eq!(failure.applied, 1);
    assert_eq!(remote.envelopes(INBOX).await.unwrap().len(), 1);
    assert!(store.get(&key(INBOX)).await.unwrap().is_none());

    // the next cycle finishes the job without duplicates

    let report = builder(&store)
        .sync([task(INBOX, &local, &remote)])
        .await
        .unwrap();

    assert_eq!(report.folders[0].patch.len(), 2);
    assert_eq!(remote.envelopes(INBOX).await.unwrap().len(), 3);
    assert_eq!(remote.mutations().await, 3);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn test_sync_restarts_on_commit_conflict() {
    let local = MemoryBackend::new("local");
    let remote = MemoryBackend::new("remote");
    seed(&local, INBOX, &[envelope("m1", "")]).await;
    seed(&remote, INBOX, &[]).await;

    let store = Arc::new(RacingStore::default());

    let report = SyncBuilder::new(config())
        .with_shared_store(store.clone())
        .sync([task(INBOX, &local, &remote)])
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.folders[0].revision, Some(1));
    assert_eq!(*store.commits.lock().await, 1);
    assert_eq!(remote.mutations().await, 1);

    seed(&local, SENT, &[envelope("m2", "")]).await;
    seed(&remote, SENT, &[]).await;

    let store = Arc::new(ConflictingStore::default());

    let report = SyncBuilder::new(config())
        .with_shared_store(store.clone())
        .sync([task(SENT, &local, &remote)])
        .await
        .unwrap();

    assert_eq!(report.failures[0].kind, SyncErrorKind::BaseCommitConflict);
    assert_eq!(*store.commits.lock().await, 3);
    assert_eq!(remote.envelopes(SENT).await.unwrap().len(), 1);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn test_sync_keeps_created_ids_across_restarts() {
    let local = MemoryBackend::new("local");
    let remote = MemoryBackend::server("remote");
    seed(&local, INBOX, &[envelope("<m1@localhost>", "")]).await;
    seed(&remote, INBOX, &[]).await;

    // a concurrent process commits an empty base before the cycle
    let competing = SyncBase::next(
        None,
        Envelopes::default(),
        Default::default(),
        Default::default(),
    );
    let store = Arc::new(RacingStore::with_competing(competing));

    let report = SyncBuilder::new(config())
        .with_shared_store(store.clone())
        .sync([task(INBOX, &local, &remote)])
        .await
        .unwrap();

    assert!(report.is_success());
    assert!(report.folders[0].patch.is_empty());
    assert_eq!(report.folders[0].revision, Some(2));
    assert_eq!(*store.commits.lock().await, 2);

    assert_eq!(ids(&local.envelopes(INBOX).await.unwrap()), vec!["<m1@localhost>"]);
    assert_eq!(ids(&remote.envelopes(INBOX).await.unwrap()), vec!["1"]);
    assert_eq!(remote.mutations().await, 1);
    assert_eq!(local.mutations().await, 0);

    let base = store.get(&key(INBOX)).await.unwrap().unwrap();
    assert_eq!(ids(&base.envelopes), vec!["<m1@localhost>"]);
    assert_eq!(base.remote_aliases.backend_id("<m1@localhost>"), "1");
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn test_sync_with_server_id_shadowing_identity_key() {
    let local = MemoryBackend::new("local");
    let remote = MemoryBackend::server("remote");
    seed(&local, INBOX, &[envelope("2", "")]).await;
    seed(&remote, INBOX, &[]).await;

    let store = memory_store();

    builder(&store)
        .sync([task(INBOX, &local, &remote)])
        .await
        .unwrap();
    assert_eq!(ids(&remote.envelopes(INBOX).await.unwrap()), vec!["1"]);

    // another client appends a message the server gives the id "2"
    remote
        .insert_message(INBOX, envelope("2", "seen"), "Subject: 2\r\n\r\nHello!")
        .await
        .unwrap();

    let report = builder(&store)
        .sync([task(INBOX, &local, &remote)])
        .await
        .unwrap();
    assert!(matches!(
        hunks(&report.folders[0]).as_slice(),
        [SyncHunk::CreateOnLocal(envelope)] if envelope.id == "2#1"
    ));

    let report = builder(&store)
        .sync([task(INBOX, &local, &remote)])
        .await
        .unwrap();
    assert!(report.folders[0].patch.is_empty());

    let envelopes = local.envelopes(INBOX).await.unwrap();
    assert_eq!(ids(&envelopes), vec!["2", "2#1"]);
    assert_eq!(envelopes["2"].flags, Flags::default());
    assert_eq!(envelopes["2#1"].flags, Flags::from("seen"));

    let envelopes = remote.envelopes(INBOX).await.unwrap();
    assert_eq!(ids(&envelopes), vec!["1", "2"]);
    assert_eq!(envelopes["1"].flags, Flags::default());

    let base = store.get(&key(INBOX)).await.unwrap().unwrap();
    assert_eq!(base.remote_aliases.backend_id("2"), "1");
    assert_eq!(base.remote_aliases.backend_id("2#1"), "2");
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn test_sync_dry_run() {
    let local = MemoryBackend::new("local");
    let remote = MemoryBackend::new("remote");
    seed(&local, INBOX, &[envelope("m1", "")]).await;
    seed(&remote, INBOX, &[envelope("m2", "")]).await;

    let store = memory_store();

    let report = builder(&store)
        .with_dry_run(true)
        .sync([task(INBOX, &local, &remote)])
        .await
        .unwrap();

    let folder = &report.folders[0];
    assert!(folder.dry_run);
    assert_eq!(folder.revision, None);
    assert_eq!(folder.patch.len(), 2);

    assert_eq!(local.mutations().await, 0);
    assert_eq!(remote.mutations().await, 0);
    assert!(store.get(&key(INBOX)).await.unwrap().is_none());
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn test_sync_pool() {
    let local = MemoryBackend::new("local");
    let remote = MemoryBackend::new("remote");
    seed(&local, INBOX, &[envelope("m1", ""), envelope("m2", "")]).await;
    seed(&remote, INBOX, &[envelope("m3", "")]).await;
    seed(&local, SENT, &[envelope("m4", "")]).await;
    seed(&remote, SENT, &[]).await;

    let store = memory_store();
    let pool = builder(&store).build().unwrap();

    // the same folder twice: cycles of the same folder never overlap
    let report = pool
        .sync([
            task(INBOX, &local, &remote),
            task(SENT, &local, &remote),
            task(INBOX, &local, &remote),
        ])
        .await;

    assert!(report.is_success());
    assert_eq!(report.folders.len(), 3);

    let inbox_hunks: usize = report
        .folders
        .iter()
        .filter(|folder| folder.key == key(INBOX))
        .map(|folder| folder.patch.len())
        .sum();
    assert_eq!(inbox_hunks, 3);

    assert_eq!(ids(&local.envelopes(INBOX).await.unwrap()), vec!["m1", "m2", "m3"]);
    assert_eq!(ids(&remote.envelopes(INBOX).await.unwrap()), vec!["m1", "m2", "m3"]);
    assert_eq!(ids(&remote.envelopes(SENT).await.unwrap()), vec!["m4"]);
    assert_eq!(local.mutations().await, 1);
    assert_eq!(remote.mutations().await, 3);

    let base = pool.store().get(&key(SENT)).await.unwrap().unwrap();
    assert_eq!(base.revision, 1);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn test_sync_with_file_state_store() {
    let dir = tempdir().unwrap();

    let local = MemoryBackend::new("local");
    let remote = MemoryBackend::new("remote");
    seed(&local, INBOX, &[envelope("m1", "seen")]).await;
    seed(&remote, INBOX, &[envelope("m2", "")]).await;

    let config = SyncConfig {
        state_dir: Some(dir.path().to_owned()),
        ..config()
    };

    let report = SyncBuilder::new(config.clone())
        .sync([task(INBOX, &local, &remote)])
        .await
        .unwrap();
    assert_eq!(report.folders[0].revision, Some(1));

    // bases survive the pool

    let base = FileStateStore::new(dir.path())
        .get(&key(INBOX))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ids(&base.envelopes), vec!["m1", "m2"]);
    assert_eq!(base.envelopes["m1"].flags, Flags::from("seen"));

    let report = SyncBuilder::new(config)
        .sync([task(INBOX, &local, &remote)])
        .await
        .unwrap();

    let folder = &report.folders[0];
    assert!(folder.patch.is_empty());
    assert_eq!(folder.revision, Some(1));
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn test_sync_events() {
    let local = MemoryBackend::new("local");
    let remote = MemoryBackend::new("remote");
    seed(&local, INBOX, &[envelope("m1", "")]).await;
    seed(&remote, INBOX, &[]).await;

    let events = Arc::new(Mutex::new(Vec::new()));
    let handler_events = events.clone();

    builder(&memory_store())
        .with_handler(move |evt| {
            let events = handler_events.clone();
            async move {
                events.lock().await.push(evt);
                Ok(())
            }
        })
        .sync([task(INBOX, &local, &remote)])
        .await
        .unwrap();

    let events = events.lock().await;

    let states: Vec<_> = events
        .iter()
        .filter_map(|evt| match evt {
            SyncEvent::StateChanged(_, state) => Some(*state),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            SyncState::Listing,
            SyncState::Diffing,
            SyncState::Applying,
            SyncState::Committing,
            SyncState::Idle,
        ]
    );

    assert!(events.contains(&SyncEvent::ListedLocalEnvelopes(key(INBOX), 1)));
    assert!(events.contains(&SyncEvent::ListedRemoteEnvelopes(key(INBOX), 0)));
    assert!(events.contains(&SyncEvent::BuiltPatch(key(INBOX), 1)));
    assert!(events.contains(&SyncEvent::CommittedBase(key(INBOX), 1)));
    assert!(events
        .iter()
        .any(|evt| matches!(evt, SyncEvent::ProcessedHunk(_, SyncHunk::CreateOnRemote(_)))));
}
