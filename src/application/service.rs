//! Control surface offered to the surrounding application.

use crate::domain::{Encoder, EncoderSpec, EncodingTask, Source, Video, VideoState};
use crate::error::{Error, Result};
use crate::ports::repository::EntityStore;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Catalog operations. Holds no state of its own beyond the store handle.
#[derive(Clone)]
pub struct VideoService<S> {
    store: S,
}

impl<S> VideoService<S>
where
    S: EntityStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Registers a source for processing with an initial task for `encoder_id`.
    pub async fn register_video(&self, locator: &str, encoder_id: &str) -> Result<Video> {
        let source = Source::parse(locator)?;
        let encoder = self.store.get_encoder(encoder_id).await?;

        // The task must exist before the video becomes claimable.
        let video = Video::new(source, &encoder.id);
        let task = EncodingTask::new(&video.id, &encoder.id);
        self.store.create_task(&task).await?;
        if let Err(e) = self.store.create_video(&video).await {
            if let Err(cleanup) = self.store.delete_task(&task.id).await {
                warn!(task_id = %task.id, error = %cleanup, "orphaned initial task left behind");
            }
            return Err(e.into());
        }

        info!(video_id = %video.id, source = %video.source(), state = %video.state(), "video registered");
        Ok(video)
    }

    /// Requests an additional output for a video.
    ///
    /// A worker may claim the video between the state check and the insert.
    /// The state is read again afterwards and the task withdrawn if it lost.
    pub async fn add_encoding_task(&self, video_id: &str, encoder_id: &str) -> Result<EncodingTask> {
        let video = self.store.get_video(video_id).await?;
        reject_if_claimed(&video)?;
        let encoder = self.store.get_encoder(encoder_id).await?;

        let task = EncodingTask::new(&video.id, &encoder.id);
        self.store.create_task(&task).await?;

        let current = self.store.get_video(video_id).await?;
        if let Err(e) = reject_if_claimed(&current) {
            if let Err(cleanup) = self.store.delete_task(&task.id).await {
                warn!(task_id = %task.id, error = %cleanup, "failed to withdraw late encoding task");
            }
            return Err(e);
        }
        Ok(task)
    }

    pub async fn remove_encoding_task(&self, video_id: &str, task_id: &str) -> Result<()> {
        let video = self.store.get_video(video_id).await?;
        if video.state() == VideoState::Encoding {
            return Err(Error::Rejected(format!(
                "video {video_id} is being encoded"
            )));
        }
        let owned = self
            .store
            .list_tasks_for_video(video_id)
            .await?
            .into_iter()
            .any(|task| task.id == task_id);
        if !owned {
            return Err(Error::NotFound {
                kind: "encoding task",
                id: task_id.to_string(),
            });
        }
        self.store.delete_task(task_id).await?;
        Ok(())
    }

    /// Rejected while a worker holds the video.
    pub async fn delete_video(&self, id: &str) -> Result<()> {
        let video = self.store.get_video(id).await?;
        if video.state().is_transient() {
            return Err(Error::Rejected(format!(
                "video {id} is {}; wait for the worker to finish",
                video.state()
            )));
        }
        self.store.delete_video(id, video.state()).await?;
        info!(video_id = %id, "video deleted");
        Ok(())
    }

    /// Operator retry from `with_encode_errors` or `download_failed`.
    pub async fn retry_video(&self, id: &str) -> Result<Video> {
        let mut video = self.store.get_video(id).await?;
        let prior = video.state();
        video.retry()?;
        self.store.update_video(&video, prior).await?;
        info!(video_id = %id, from = %prior, to = %video.state(), "video queued for retry");
        Ok(video)
    }

    pub async fn get_video(&self, id: &str) -> Result<Video> {
        Ok(self.store.get_video(id).await?)
    }

    pub async fn tasks_for_video(&self, id: &str) -> Result<Vec<EncodingTask>> {
        Ok(self.store.list_tasks_for_video(id).await?)
    }

    /// Count per state; every state is present, zero when empty.
    pub async fn state_counts(&self) -> Result<BTreeMap<VideoState, usize>> {
        let mut counts: BTreeMap<VideoState, usize> =
            VideoState::ALL.into_iter().map(|s| (s, 0)).collect();
        for video in self.store.list_videos().await? {
            *counts.entry(video.state()).or_default() += 1;
        }
        Ok(counts)
    }

    pub async fn videos_in_state(&self, state: VideoState) -> Result<Vec<Video>> {
        Ok(self.store.list_videos_by_state(state).await?)
    }

    /// Newest videos first.
    pub async fn recent_videos(&self, limit: usize) -> Result<Vec<Video>> {
        let mut videos = self.store.list_videos().await?;
        videos.truncate(limit);
        Ok(videos)
    }

    pub async fn create_encoder(&self, spec: EncoderSpec) -> Result<Encoder> {
        let encoder = Encoder::new(spec)?;
        self.store.create_encoder(&encoder).await?;
        info!(encoder_id = %encoder.id, name = %encoder.name, "encoder created");
        Ok(encoder)
    }

    pub async fn update_encoder(&self, id: &str, spec: EncoderSpec) -> Result<Encoder> {
        let mut encoder = self.store.get_encoder(id).await?;
        encoder.update(spec)?;
        self.store.update_encoder(&encoder).await?;
        Ok(encoder)
    }

    pub async fn get_encoder(&self, id: &str) -> Result<Encoder> {
        Ok(self.store.get_encoder(id).await?)
    }

    pub async fn list_encoders(&self) -> Result<Vec<Encoder>> {
        Ok(self.store.list_encoders().await?)
    }

    /// Rejected while any open encoding task still references the encoder.
    pub async fn delete_encoder(&self, id: &str) -> Result<()> {
        let open = self
            .store
            .list_tasks_for_encoder(id)
            .await?
            .into_iter()
            .filter(EncodingTask::is_open)
            .count();
        if open > 0 {
            return Err(Error::Rejected(format!(
                "encoder {id} is referenced by {open} open encoding task(s)"
            )));
        }
        self.store.delete_encoder(id).await?;
        info!(encoder_id = %id, "encoder deleted");
        Ok(())
    }
}

fn reject_if_claimed(video: &Video) -> Result<()> {
    match video.state() {
        VideoState::Encoding | VideoState::Complete => Err(Error::Rejected(format!(
            "video {} is {}; create a new video to add outputs",
            video.id,
            video.state()
        ))),
        _ => Ok(()),
    }
}
