//! File-backed result store
//!
//! ## Layout
//!
//! ```text
//! <root>/<session>.json      {"version":1,"session":"...","items":[...]}
//! ```
//!
//! ## Atomicity
//!
//! Each save writes a uniquely named temporary file in the same directory,
//! fsyncs it, then renames it over the target. Rename within one directory is
//! atomic, so readers see either the old or the new result, never a mix.
//! On Unix the directory is fsynced after the rename so the new entry
//! survives a crash. Saves for the same session additionally take a per-key
//! async lock so the overwrite check and the rename happen as one step; the
//! lock is dropped from the map once no save holds or awaits it.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::traits::{PersistedResult, ResultStore, StoreError};
use crate::types::{IntersectionResult, SessionId};

/// Stores each session's result as a JSON file under `root`.
pub struct FileResultStore {
    root: PathBuf,
    locks: Mutex<HashMap<SessionId, Arc<tokio::sync::Mutex<()>>>>,
}

impl FileResultStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the result file for `session`.
    pub fn result_path(&self, session: &SessionId) -> Result<PathBuf, StoreError> {
        if !is_safe_file_stem(session.as_str()) {
            return Err(StoreError::InvalidKey(session.clone()));
        }
        Ok(self.root.join(format!("{}.json", session.as_str())))
    }

    fn lock_for(&self, session: &SessionId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(session.clone()).or_default().clone()
    }

    /// Forget the lock for `session` unless another save still references it.
    fn release_lock(&self, session: &SessionId, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // One reference in the map, one in `lock`
        if Arc::strong_count(&lock) <= 2 {
            locks.remove(session);
        }
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    async fn save_locked(
        &self,
        session: &SessionId,
        path: &Path,
        result: &IntersectionResult,
        overwrite: bool,
    ) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.root).await?;

        if !overwrite && tokio::fs::try_exists(path).await? {
            return Err(StoreError::AlreadyExists(session.clone()));
        }

        let persisted = PersistedResult::new(session, result);
        let mut contents = serde_json::to_vec_pretty(&persisted).map_err(|e| {
            StoreError::Corrupt {
                session: session.clone(),
                reason: e.to_string(),
            }
        })?;
        contents.push(b'\n');

        self.write_atomic(path, &contents).await
    }

    async fn write_atomic(&self, target: &Path, contents: &[u8]) -> Result<(), StoreError> {
        let tmp = self.root.join(format!(
            ".{}.tmp-{}",
            target
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            hex::encode(rand::random::<[u8; 8]>())
        ));

        let written = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(contents).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp, target).await?;
            sync_dir(&self.root).await
        }
        .await;

        if let Err(err) = written {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(err.into());
        }
        Ok(())
    }
}

#[cfg(unix)]
async fn sync_dir(dir: &Path) -> std::io::Result<()> {
    tokio::fs::File::open(dir).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Names that become file names; keep them to a portable character set.
pub fn is_safe_file_stem(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

#[async_trait]
impl ResultStore for FileResultStore {
    async fn save(
        &self,
        session: &SessionId,
        result: &IntersectionResult,
        overwrite: bool,
    ) -> Result<(), StoreError> {
        let path = self.result_path(session)?;
        let lock = self.lock_for(session);
        let saved = {
            let _guard = lock.lock().await;
            self.save_locked(session, &path, result, overwrite).await
        };
        self.release_lock(session, lock);

        saved?;
        debug!(session = %session, items = result.len(), "intersection persisted");
        Ok(())
    }

    async fn load(&self, session: &SessionId) -> Result<IntersectionResult, StoreError> {
        let path = self.result_path(session)?;
        let contents = match tokio::fs::read(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(session.clone()))
            }
            Err(e) => return Err(e.into()),
        };

        let persisted: PersistedResult =
            serde_json::from_slice(&contents).map_err(|e| StoreError::Corrupt {
                session: session.clone(),
                reason: e.to_string(),
            })?;
        if &persisted.session != session {
            return Err(StoreError::Corrupt {
                session: session.clone(),
                reason: format!("file belongs to session {}", persisted.session),
            });
        }
        persisted.into_result()
    }
}
