//! Startup repair of videos left in a transient state by an unclean shutdown.

use crate::domain::{VideoEvent, VideoState};
use crate::error::Result;
use crate::ports::repository::EntityStore;
use tracing::{info, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
    /// `downloading -> waiting_for_download`
    pub downloads_reset: usize,
    /// `encoding -> unencoded`
    pub encodes_reset: usize,
}

impl RecoveryReport {
    pub fn total(&self) -> usize {
        self.downloads_reset + self.encodes_reset
    }
}

/// Must run before either queue starts: no worker can legitimately hold a
/// transient state while the process is not running.
pub async fn recover<S>(store: &S) -> Result<RecoveryReport>
where
    S: EntityStore + ?Sized,
{
    let mut report = RecoveryReport::default();

    for state in [VideoState::Downloading, VideoState::Encoding] {
        for mut video in store.list_videos_by_state(state).await? {
            video.apply(VideoEvent::Recover)?;
            store.update_video(&video, state).await?;

            warn!(
                video_id = %video.id,
                from = %state,
                to = %video.state(),
                "reset video interrupted by unclean shutdown"
            );
            match state {
                VideoState::Downloading => report.downloads_reset += 1,
                _ => report.encodes_reset += 1,
            }
        }
    }

    info!(
        downloads_reset = report.downloads_reset,
        encodes_reset = report.encodes_reset,
        "recovery complete"
    );
    Ok(report)
}
