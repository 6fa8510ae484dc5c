use crate::domain::{Encoder, EncodingTask, Video, VideoState};
use crate::error::StoreError;
use async_trait::async_trait;

/// Durable record store for videos, encoders and encoding tasks.
///
/// `update_video` and `delete_video` are conditional on the persisted state:
/// they only succeed if the stored record is still in `expected`, which is
/// what makes claims exclusive between workers.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn create_video(&self, video: &Video) -> Result<(), StoreError>;

    async fn get_video(&self, id: &str) -> Result<Video, StoreError>;

    /// All videos, newest first.
    async fn list_videos(&self) -> Result<Vec<Video>, StoreError>;

    /// Videos in `state`, oldest first.
    async fn list_videos_by_state(&self, state: VideoState) -> Result<Vec<Video>, StoreError>;

    /// Compare-and-transition: replaces the stored video only if its
    /// persisted state equals `expected`.
    async fn update_video(&self, video: &Video, expected: VideoState) -> Result<(), StoreError>;

    /// Deletes the video and its encoding tasks if its state equals `expected`.
    async fn delete_video(&self, id: &str, expected: VideoState) -> Result<(), StoreError>;

    async fn create_encoder(&self, encoder: &Encoder) -> Result<(), StoreError>;

    async fn get_encoder(&self, id: &str) -> Result<Encoder, StoreError>;

    async fn list_encoders(&self) -> Result<Vec<Encoder>, StoreError>;

    async fn update_encoder(&self, encoder: &Encoder) -> Result<(), StoreError>;

    async fn delete_encoder(&self, id: &str) -> Result<(), StoreError>;

    async fn create_task(&self, task: &EncodingTask) -> Result<(), StoreError>;

    async fn list_tasks_for_video(&self, video_id: &str) -> Result<Vec<EncodingTask>, StoreError>;

    async fn list_tasks_for_encoder(
        &self,
        encoder_id: &str,
    ) -> Result<Vec<EncodingTask>, StoreError>;

    async fn update_task(&self, task: &EncodingTask) -> Result<(), StoreError>;

    async fn delete_task(&self, id: &str) -> Result<(), StoreError>;
}
