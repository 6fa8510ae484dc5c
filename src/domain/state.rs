//! Video lifecycle state machine.
//!
//! ```text
//! waiting_for_download -> downloading -> unencoded -> encoding -> complete
//!          ^                  |                          |
//!          +------ retry -----+                          +-> with_encode_errors
//!                             +-> download_failed
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoState {
    WaitingForDownload,
    Downloading,
    Unencoded,
    Encoding,
    Complete,
    WithEncodeErrors,
    /// Download retry budget exhausted.
    DownloadFailed,
}

impl VideoState {
    pub const ALL: [VideoState; 7] = [
        VideoState::WaitingForDownload,
        VideoState::Downloading,
        VideoState::Unencoded,
        VideoState::Encoding,
        VideoState::Complete,
        VideoState::WithEncodeErrors,
        VideoState::DownloadFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VideoState::WaitingForDownload => "waiting_for_download",
            VideoState::Downloading => "downloading",
            VideoState::Unencoded => "unencoded",
            VideoState::Encoding => "encoding",
            VideoState::Complete => "complete",
            VideoState::WithEncodeErrors => "with_encode_errors",
            VideoState::DownloadFailed => "download_failed",
        }
    }

    /// States only a live worker may hold.
    pub fn is_transient(&self) -> bool {
        matches!(self, VideoState::Downloading | VideoState::Encoding)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            VideoState::Complete | VideoState::WithEncodeErrors | VideoState::DownloadFailed
        )
    }

    /// Applies `event` and returns the next state. The receiver is never modified.
    pub fn on(self, event: VideoEvent) -> Result<VideoState> {
        type E = VideoEvent;
        type S = VideoState;

        let next = match (self, event) {
            (S::WaitingForDownload, E::StartDownload) => S::Downloading,
            (S::Downloading, E::DownloadSucceeded) => S::Unencoded,
            (S::Downloading, E::DownloadFailed) => S::WaitingForDownload,
            (S::Downloading, E::DownloadExhausted) => S::DownloadFailed,
            (S::Unencoded, E::StartEncode) => S::Encoding,
            (S::Encoding, E::EncodeSucceeded) => S::Complete,
            (S::Encoding, E::EncodeFailed) => S::WithEncodeErrors,
            (S::Downloading, E::Recover) => S::WaitingForDownload,
            (S::Encoding, E::Recover) => S::Unencoded,
            (S::WithEncodeErrors, E::Retry) => S::Unencoded,
            (S::DownloadFailed, E::Retry) => S::WaitingForDownload,
            (from, event) => return Err(Error::rejected_event(from, event)),
        };
        Ok(next)
    }
}

impl fmt::Display for VideoState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VideoState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        VideoState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| Error::Validation(format!("unknown video state {s:?}")))
    }
}

/// Events that drive a video through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoEvent {
    StartDownload,
    DownloadSucceeded,
    /// Transfer failed with retry budget left.
    DownloadFailed,
    DownloadExhausted,
    StartEncode,
    EncodeSucceeded,
    EncodeFailed,
    /// Startup repair of a transient state.
    Recover,
    /// Operator-initiated retry from an error state.
    Retry,
}

impl fmt::Display for VideoEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VideoEvent::StartDownload => "start_download",
            VideoEvent::DownloadSucceeded => "download_succeeded",
            VideoEvent::DownloadFailed => "download_failed",
            VideoEvent::DownloadExhausted => "download_exhausted",
            VideoEvent::StartEncode => "start_encode",
            VideoEvent::EncodeSucceeded => "encode_succeeded",
            VideoEvent::EncodeFailed => "encode_failed",
            VideoEvent::Recover => "recover",
            VideoEvent::Retry => "retry",
        };
        f.write_str(name)
    }
}
