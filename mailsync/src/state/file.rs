//! # File state store
//!
//! Module dedicated to the file system implementation of the
//! [`SyncStateStore`]. Each base is stored as a JSON file named after
//! the digest of its [`SyncKey`], inside a state directory.
//!
//! Commits are guarded by an exclusive advisory lock on a sibling
//! lock file, so that two processes synchronizing the same folder
//! cannot interleave their read-compare-write sequences. The new base
//! is first written to a temporary file, then renamed over the
//! previous one.

use std::{
    fs::{self, OpenOptions},
    io::ErrorKind,
    path::{Path, PathBuf},
};

use advisory_lock::{AdvisoryFileLock, FileLockMode};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{Error, Result, SyncBase, SyncKey, SyncStateStore};

/// The content of a base file.
///
/// The key is stored next to the base so that a state directory can
/// be inspected without reversing digests.
#[derive(Debug, Serialize, Deserialize)]
struct SyncBaseFile {
    key: SyncKey,
    base: SyncBase,
}

/// The file system state store.
#[derive(Clone, Debug)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    /// Create a new file state store inside the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Create a new file state store inside the default directory,
    /// `$XDG_CACHE_HOME/mailsync/state` on Linux.
    pub fn try_default() -> Result<Self> {
        Self::find_default_dir()
            .map(Self::new)
            .ok_or(Error::GetCacheDirectoryError)
    }

    pub fn find_default_dir() -> Option<PathBuf> {
        dirs::cache_dir().map(|dir| dir.join("mailsync").join("state"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn base_path(&self, key: &SyncKey) -> PathBuf {
        self.dir.join(format!("{}.json", key.digest()))
    }

    fn lock_path(&self, key: &SyncKey) -> PathBuf {
        self.dir.join(format!("{}.lock", key.digest()))
    }
}

fn read_base(path: &Path) -> Result<Option<SyncBase>> {
    let content = match fs::read(path) {
        Ok(content) => content,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(Error::ReadBaseError(err, path.to_owned())),
    };

    let file: SyncBaseFile = serde_json::from_slice(&content)
        .map_err(|err| Error::ParseBaseError(err, path.to_owned()))?;

    Ok(Some(file.base))
}

fn write_base(path: &Path, key: &SyncKey, base: SyncBase) -> Result<()> {
    let file = SyncBaseFile {
        key: key.clone(),
        base,
    };
    let content = serde_json::to_vec_pretty(&file)
        .map_err(|err| Error::SerializeBaseError(err, key.clone()))?;

    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, content).map_err(|err| Error::WriteBaseError(err, tmp_path.clone()))?;
    fs::rename(&tmp_path, path).map_err(|err| Error::WriteBaseError(err, path.to_owned()))?;

    Ok(())
}

fn compare_and_swap(
    dir: &Path,
    base_path: &Path,
    lock_path: &Path,
    key: &SyncKey,
    expected: Option<u64>,
    base: SyncBase,
) -> Result<()> {
    fs::create_dir_all(dir).map_err(|err| Error::CreateStateDirectoryError(err, dir.to_owned()))?;

    trace!("locking sync state file {lock_path:?}");
    let lock_file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(lock_path)
        .map_err(|err| Error::OpenLockFileError(err, lock_path.to_owned()))?;
    AdvisoryFileLock::lock(&lock_file, FileLockMode::Exclusive)
        .map_err(|err| Error::LockFileError(err, lock_path.to_owned()))?;

    let res = read_base(base_path).and_then(|current| {
        let current = current.map(|base| base.revision);
        if current != expected {
            return Err(Error::CommitConflictError(key.clone(), expected, current));
        }
        write_base(base_path, key, base)
    });

    trace!("unlocking sync state file {lock_path:?}");
    AdvisoryFileLock::unlock(&lock_file)
        .map_err(|err| Error::UnlockFileError(err, lock_path.to_owned()))?;

    res
}

#[async_trait]
impl SyncStateStore for FileStateStore {
    async fn get(&self, key: &SyncKey) -> Result<Option<SyncBase>> {
        let path = self.base_path(key);
        tokio::task::spawn_blocking(move || read_base(&path))
            .await
            .map_err(Error::JoinError)?
    }

    async fn compare_and_swap(
        &self,
        key: &SyncKey,
        expected: Option<u64>,
        base: SyncBase,
    ) -> Result<()> {
        let dir = self.dir.clone();
        let base_path = self.base_path(key);
        let lock_path = self.lock_path(key);
        let revision = base.revision;
        let task_key = key.clone();

        tokio::task::spawn_blocking(move || {
            compare_and_swap(&dir, &base_path, &lock_path, &task_key, expected, base)
        })
        .await
        .map_err(Error::JoinError)??;

        debug!(%key, revision, "committed sync base to {:?}", self.base_path(key));
        Ok(())
    }
}
