//! In-process `EntityStore`, optionally persisted to a JSON snapshot.

use crate::domain::{Encoder, EncodingTask, Video, VideoState};
use crate::error::StoreError;
use crate::ports::repository::EntityStore;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct Tables {
    videos: BTreeMap<String, Video>,
    encoders: BTreeMap<String, Encoder>,
    tasks: BTreeMap<String, EncodingTask>,
}

struct Inner {
    tables: RwLock<Tables>,
    snapshot: Option<PathBuf>,
    available: AtomicBool,
    /// Serializes mutations so snapshots land in commit order.
    commit: Mutex<()>,
}

/// Cheaply cloneable handle; clones share the same tables.
#[derive(Clone)]
pub struct LocalStore {
    inner: Arc<Inner>,
}

impl LocalStore {
    pub fn in_memory() -> Self {
        Self::with_tables(Tables::default(), None)
    }

    /// Opens (or creates) a store persisted at `path`. Every mutation rewrites
    /// the snapshot before returning.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let tables = if path.exists() {
            let data = std::fs::read_to_string(&path)?;
            serde_json::from_str(&data)?
        } else {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            Tables::default()
        };
        Ok(Self::with_tables(tables, Some(path)))
    }

    fn with_tables(tables: Tables, snapshot: Option<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Inner {
                tables: RwLock::new(tables),
                snapshot,
                available: AtomicBool::new(true),
                commit: Mutex::new(()),
            }),
        }
    }

    /// Simulates losing the backing store.
    #[cfg(test)]
    pub(crate) fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.inner.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("local store is offline".into()))
        }
    }

    fn read<T>(&self, f: impl FnOnce(&Tables) -> Result<T, StoreError>) -> Result<T, StoreError> {
        self.ensure_available()?;
        let tables = self.inner.tables.read();
        f(&tables)
    }

    /// Applies `f` and persists the result. With a snapshot, `f` runs on a
    /// staged copy that replaces the live tables only once the file is
    /// written, so a failed write leaves no trace in memory.
    async fn write<T>(
        &self,
        f: impl FnOnce(&mut Tables) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        self.ensure_available()?;
        let _commit = self.inner.commit.lock().await;

        let Some(path) = &self.inner.snapshot else {
            let mut tables = self.inner.tables.write();
            return f(&mut *tables);
        };

        let (out, staged, data) = {
            let mut staged = self.inner.tables.read().clone();
            let out = f(&mut staged)?;
            let data = serde_json::to_vec_pretty(&staged)?;
            (out, staged, data)
        };
        write_snapshot(path, data).await?;
        *self.inner.tables.write() = staged;
        Ok(out)
    }
}

async fn write_snapshot(path: &Path, data: Vec<u8>) -> Result<(), StoreError> {
    let temp = path.with_extension("json.tmp");
    tokio::fs::write(&temp, data).await?;
    tokio::fs::rename(&temp, path).await?;
    Ok(())
}

fn not_found(kind: &'static str, id: &str) -> StoreError {
    StoreError::NotFound {
        kind,
        id: id.to_string(),
    }
}

#[async_trait]
impl EntityStore for LocalStore {
    async fn create_video(&self, video: &Video) -> Result<(), StoreError> {
        self.write(|t| {
            t.videos.insert(video.id.clone(), video.clone());
            Ok(())
        })
        .await
    }

    async fn get_video(&self, id: &str) -> Result<Video, StoreError> {
        self.read(|t| t.videos.get(id).cloned().ok_or_else(|| not_found("video", id)))
    }

    async fn list_videos(&self) -> Result<Vec<Video>, StoreError> {
        self.read(|t| {
            let mut videos: Vec<Video> = t.videos.values().cloned().collect();
            videos.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(videos)
        })
    }

    async fn list_videos_by_state(&self, state: VideoState) -> Result<Vec<Video>, StoreError> {
        self.read(|t| {
            let mut videos: Vec<Video> = t
                .videos
                .values()
                .filter(|v| v.state() == state)
                .cloned()
                .collect();
            videos.sort_by_key(|v| v.created_at);
            Ok(videos)
        })
    }

    async fn update_video(&self, video: &Video, expected: VideoState) -> Result<(), StoreError> {
        self.write(|t| {
            let stored = t
                .videos
                .get_mut(&video.id)
                .ok_or_else(|| not_found("video", &video.id))?;
            if stored.state() != expected {
                return Err(StoreError::StateMismatch {
                    id: video.id.clone(),
                    expected,
                    actual: stored.state(),
                });
            }
            *stored = video.clone();
            Ok(())
        })
        .await
    }

    async fn delete_video(&self, id: &str, expected: VideoState) -> Result<(), StoreError> {
        self.write(|t| {
            let stored = t.videos.get(id).ok_or_else(|| not_found("video", id))?;
            if stored.state() != expected {
                return Err(StoreError::StateMismatch {
                    id: id.to_string(),
                    expected,
                    actual: stored.state(),
                });
            }
            t.videos.remove(id);
            t.tasks.retain(|_, task| task.video_id != id);
            Ok(())
        })
        .await
    }

    async fn create_encoder(&self, encoder: &Encoder) -> Result<(), StoreError> {
        self.write(|t| {
            t.encoders.insert(encoder.id.clone(), encoder.clone());
            Ok(())
        })
        .await
    }

    async fn get_encoder(&self, id: &str) -> Result<Encoder, StoreError> {
        self.read(|t| {
            t.encoders
                .get(id)
                .cloned()
                .ok_or_else(|| not_found("encoder", id))
        })
    }

    async fn list_encoders(&self) -> Result<Vec<Encoder>, StoreError> {
        self.read(|t| {
            let mut encoders: Vec<Encoder> = t.encoders.values().cloned().collect();
            encoders.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(encoders)
        })
    }

    async fn update_encoder(&self, encoder: &Encoder) -> Result<(), StoreError> {
        self.write(|t| {
            let stored = t
                .encoders
                .get_mut(&encoder.id)
                .ok_or_else(|| not_found("encoder", &encoder.id))?;
            *stored = encoder.clone();
            Ok(())
        })
        .await
    }

    async fn delete_encoder(&self, id: &str) -> Result<(), StoreError> {
        self.write(|t| {
            t.encoders
                .remove(id)
                .map(|_| ())
                .ok_or_else(|| not_found("encoder", id))
        })
        .await
    }

    async fn create_task(&self, task: &EncodingTask) -> Result<(), StoreError> {
        self.write(|t| {
            t.tasks.insert(task.id.clone(), task.clone());
            Ok(())
        })
        .await
    }

    async fn list_tasks_for_video(&self, video_id: &str) -> Result<Vec<EncodingTask>, StoreError> {
        self.read(|t| {
            Ok(t.tasks
                .values()
                .filter(|task| task.video_id == video_id)
                .cloned()
                .collect())
        })
    }

    async fn list_tasks_for_encoder(
        &self,
        encoder_id: &str,
    ) -> Result<Vec<EncodingTask>, StoreError> {
        self.read(|t| {
            Ok(t.tasks
                .values()
                .filter(|task| task.encoder_id == encoder_id)
                .cloned()
                .collect())
        })
    }

    async fn update_task(&self, task: &EncodingTask) -> Result<(), StoreError> {
        self.write(|t| {
            let stored = t
                .tasks
                .get_mut(&task.id)
                .ok_or_else(|| not_found("encoding task", &task.id))?;
            *stored = task.clone();
            Ok(())
        })
        .await
    }

    async fn delete_task(&self, id: &str) -> Result<(), StoreError> {
        self.write(|t| {
            t.tasks
                .remove(id)
                .map(|_| ())
                .ok_or_else(|| not_found("encoding task", id))
        })
        .await
    }
}
