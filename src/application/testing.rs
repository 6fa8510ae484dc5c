//! Shared fixtures for application tests.

use crate::config::EngineConfig;
use crate::adapters::local::LocalStore;
use crate::domain::{Encoder, EncoderSpec, EncodingTask, Video, VideoEvent, VideoState};
use crate::error::{DownloadError, EncodeError, StoreError};
use crate::ports::encoder::EncoderRunner;
use crate::ports::repository::EntityStore;
use crate::ports::transport::Transport;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use url::Url;

pub fn test_config(root: &Path) -> EngineConfig {
    EngineConfig {
        threads: 2,
        download_concurrency: 2,
        enable_http_downloads: true,
        download_storage_path: Some(root.join("downloads")),
        output_dir: root.join("encoded"),
        store_path: None,
        encoder_program: "ffmpeg".into(),
        encode_timeout: Duration::from_secs(5),
        download_timeout: Duration::from_secs(5),
        download_max_attempts: 3,
        download_backoff: Duration::ZERO,
        poll_interval: Duration::from_millis(10),
    }
}

pub fn encoder(name: &str) -> Encoder {
    Encoder::new(EncoderSpec {
        name: name.into(),
        extension: "mp4".into(),
        params: "-vcodec libx264".into(),
    })
    .unwrap()
}

/// Polls the store until the video reaches `state`, for up to three seconds.
pub async fn wait_for<S: EntityStore + ?Sized>(store: &S, id: &str, state: VideoState) -> Video {
    for _ in 0..300 {
        let video = store.get_video(id).await.unwrap();
        if video.state() == state {
            return video;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("video {id} never reached {state}");
}

/// Writes a small output file for every encoder not listed in `failing`.
#[derive(Default)]
pub struct ScriptedEncoder {
    pub failing: HashSet<String>,
    pub delay: Option<Duration>,
    pub calls: AtomicUsize,
}

impl ScriptedEncoder {
    pub fn failing(names: &[&str]) -> Self {
        Self {
            failing: names.iter().map(|n| n.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EncoderRunner for ScriptedEncoder {
    async fn encode(
        &self,
        source: &Path,
        output: &Path,
        encoder: &Encoder,
    ) -> Result<(), EncodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.contains(&encoder.name) {
            return Err(EncodeError::Failed {
                status: "exit status: 1".into(),
                detail: format!("{} refused {}", encoder.name, source.display()),
            });
        }
        tokio::fs::write(output, format!("{} via {}", source.display(), encoder.name)).await?;
        Ok(())
    }
}

/// Serves canned bodies by URL; unknown URLs answer 404.
#[derive(Default)]
pub struct ScriptedTransport {
    pub bodies: HashMap<String, Vec<u8>>,
    pub calls: AtomicUsize,
}

impl ScriptedTransport {
    pub fn serving(url: &str, body: &[u8]) -> Self {
        let mut bodies = HashMap::new();
        bodies.insert(url.to_string(), body.to_vec());
        Self {
            bodies,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn fetch(&self, url: &Url, destination: &Path) -> Result<u64, DownloadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let body = self
            .bodies
            .get(url.as_str())
            .ok_or(DownloadError::Status(404))?;
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(destination, body).await?;
        Ok(body.len() as u64)
    }
}

/// `LocalStore` whose next `fail_encoder_lookups` encoder reads report the
/// store as unavailable. With `claim_on_task_insert` set, the next task
/// insert is followed by a worker-style claim of its video.
pub struct FlakyStore {
    pub inner: LocalStore,
    pub fail_encoder_lookups: AtomicUsize,
    pub claim_on_task_insert: AtomicBool,
    pub reject_video_inserts: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: LocalStore, fail_encoder_lookups: usize) -> Self {
        Self {
            inner,
            fail_encoder_lookups: AtomicUsize::new(fail_encoder_lookups),
            claim_on_task_insert: AtomicBool::new(false),
            reject_video_inserts: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl EntityStore for FlakyStore {
    async fn create_video(&self, video: &Video) -> Result<(), StoreError> {
        if self.reject_video_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("blip".into()));
        }
        self.inner.create_video(video).await
    }

    async fn get_video(&self, id: &str) -> Result<Video, StoreError> {
        self.inner.get_video(id).await
    }

    async fn list_videos(&self) -> Result<Vec<Video>, StoreError> {
        self.inner.list_videos().await
    }

    async fn list_videos_by_state(&self, state: VideoState) -> Result<Vec<Video>, StoreError> {
        self.inner.list_videos_by_state(state).await
    }

    async fn update_video(&self, video: &Video, expected: VideoState) -> Result<(), StoreError> {
        self.inner.update_video(video, expected).await
    }

    async fn delete_video(&self, id: &str, expected: VideoState) -> Result<(), StoreError> {
        self.inner.delete_video(id, expected).await
    }

    async fn create_encoder(&self, encoder: &Encoder) -> Result<(), StoreError> {
        self.inner.create_encoder(encoder).await
    }

    async fn get_encoder(&self, id: &str) -> Result<Encoder, StoreError> {
        let failing = self
            .fail_encoder_lookups
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Unavailable("blip".into()));
        }
        self.inner.get_encoder(id).await
    }

    async fn list_encoders(&self) -> Result<Vec<Encoder>, StoreError> {
        self.inner.list_encoders().await
    }

    async fn update_encoder(&self, encoder: &Encoder) -> Result<(), StoreError> {
        self.inner.update_encoder(encoder).await
    }

    async fn delete_encoder(&self, id: &str) -> Result<(), StoreError> {
        self.inner.delete_encoder(id).await
    }

    async fn create_task(&self, task: &EncodingTask) -> Result<(), StoreError> {
        self.inner.create_task(task).await?;
        if self.claim_on_task_insert.swap(false, Ordering::SeqCst) {
            let mut video = self.inner.get_video(&task.video_id).await?;
            if video.apply(VideoEvent::StartEncode).is_ok() {
                self.inner.update_video(&video, VideoState::Unencoded).await?;
            }
        }
        Ok(())
    }

    async fn list_tasks_for_video(&self, video_id: &str) -> Result<Vec<EncodingTask>, StoreError> {
        self.inner.list_tasks_for_video(video_id).await
    }

    async fn list_tasks_for_encoder(
        &self,
        encoder_id: &str,
    ) -> Result<Vec<EncodingTask>, StoreError> {
        self.inner.list_tasks_for_encoder(encoder_id).await
    }

    async fn update_task(&self, task: &EncodingTask) -> Result<(), StoreError> {
        self.inner.update_task(task).await
    }

    async fn delete_task(&self, id: &str) -> Result<(), StoreError> {
        self.inner.delete_task(id).await
    }
}
