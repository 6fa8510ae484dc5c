use super::state::{VideoEvent, VideoState};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use url::Url;
use uuid::Uuid;

/// Where a video's source media lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "locator", rename_all = "snake_case")]
pub enum Source {
    Local(PathBuf),
    Remote(Url),
}

impl Source {
    /// `http`/`https` locators are remote, anything else is a local path.
    pub fn parse(locator: &str) -> Result<Self> {
        let locator = locator.trim();
        if locator.is_empty() {
            return Err(Error::Validation("source locator is empty".into()));
        }

        if locator.starts_with("http://") || locator.starts_with("https://") {
            let url = Url::parse(locator)
                .map_err(|e| Error::Validation(format!("invalid source url {locator:?}: {e}")))?;
            return Ok(Source::Remote(url));
        }

        Ok(Source::Local(PathBuf::from(locator)))
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Source::Remote(_))
    }

    pub fn local_path(&self) -> Option<&Path> {
        match self {
            Source::Local(path) => Some(path),
            Source::Remote(_) => None,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Local(path) => write!(f, "{}", path.display()),
            Source::Remote(url) => write!(f, "{}", url),
        }
    }
}

/// A media item to be obtained and transcoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Video {
    pub id: String,
    source: Source,
    state: VideoState,
    /// Encoder selected when the video was registered.
    pub encoder_id: String,
    pub created_at: DateTime<Utc>,
    state_entered_at: DateTime<Utc>,
    /// Last failure reason.
    error: Option<String>,
    download_attempts: u32,
    retry_after: Option<DateTime<Utc>>,
}

impl Video {
    pub fn new(source: Source, encoder_id: impl Into<String>) -> Self {
        let now = Utc::now();
        let state = if source.is_remote() {
            VideoState::WaitingForDownload
        } else {
            VideoState::Unencoded
        };

        Self {
            id: Uuid::new_v4().to_string(),
            source,
            state,
            encoder_id: encoder_id.into(),
            created_at: now,
            state_entered_at: now,
            error: None,
            download_attempts: 0,
            retry_after: None,
        }
    }

    pub fn state(&self) -> VideoState {
        self.state
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn state_entered_at(&self) -> DateTime<Utc> {
        self.state_entered_at
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn download_attempts(&self) -> u32 {
        self.download_attempts
    }

    pub fn retry_after(&self) -> Option<DateTime<Utc>> {
        self.retry_after
    }

    /// Whether the download queue may pick this video up at `now`.
    pub fn is_ready_for_download(&self, now: DateTime<Utc>) -> bool {
        self.state == VideoState::WaitingForDownload
            && self.source.is_remote()
            && self.retry_after.map_or(true, |at| at <= now)
    }

    /// The only path that changes `state`. On error nothing is modified.
    pub fn apply(&mut self, event: VideoEvent) -> Result<VideoState> {
        let next = self.state.on(event)?;
        self.state = next;
        self.state_entered_at = Utc::now();
        Ok(next)
    }

    /// `downloading -> unencoded`, pointing the source at the fetched file.
    pub fn finish_download(&mut self, local: PathBuf) -> Result<()> {
        self.apply(VideoEvent::DownloadSucceeded)?;
        self.source = Source::Local(local);
        self.error = None;
        self.download_attempts = 0;
        self.retry_after = None;
        Ok(())
    }

    /// Records a failed transfer. Returns the state the video landed in.
    pub fn fail_download(
        &mut self,
        reason: String,
        max_attempts: u32,
        retry_after: DateTime<Utc>,
    ) -> Result<VideoState> {
        let attempts = self.download_attempts + 1;
        let event = if attempts >= max_attempts {
            VideoEvent::DownloadExhausted
        } else {
            VideoEvent::DownloadFailed
        };

        let next = self.apply(event)?;
        self.download_attempts = attempts;
        self.error = Some(reason);
        self.retry_after = (next == VideoState::WaitingForDownload).then_some(retry_after);
        Ok(next)
    }

    /// `encoding -> complete` or `encoding -> with_encode_errors`.
    pub fn finish_encode(&mut self, first_error: Option<String>) -> Result<VideoState> {
        let event = if first_error.is_some() {
            VideoEvent::EncodeFailed
        } else {
            VideoEvent::EncodeSucceeded
        };
        let next = self.apply(event)?;
        self.error = first_error;
        Ok(next)
    }

    /// Operator retry from an error state. Clears the failure bookkeeping.
    pub fn retry(&mut self) -> Result<VideoState> {
        let next = self.apply(VideoEvent::Retry)?;
        self.error = None;
        self.download_attempts = 0;
        self.retry_after = None;
        Ok(next)
    }
}
