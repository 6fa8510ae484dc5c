use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Complete { output_path: PathBuf },
    Failed { error: String },
}

/// One requested output: a video encoded with one encoder profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodingTask {
    pub id: String,
    pub video_id: String,
    pub encoder_id: String,
    status: TaskStatus,
}

impl EncodingTask {
    pub fn new(video_id: impl Into<String>, encoder_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            video_id: video_id.into(),
            encoder_id: encoder_id.into(),
            status: TaskStatus::Pending,
        }
    }

    pub fn status(&self) -> &TaskStatus {
        &self.status
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.status, TaskStatus::Complete { .. })
    }

    /// Open tasks still need an encode run.
    pub fn is_open(&self) -> bool {
        !self.is_complete()
    }

    pub fn output_path(&self) -> Option<&PathBuf> {
        match &self.status {
            TaskStatus::Complete { output_path } => Some(output_path),
            _ => None,
        }
    }

    pub fn complete(&mut self, output_path: PathBuf) -> Result<()> {
        self.ensure_open()?;
        self.status = TaskStatus::Complete { output_path };
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        self.ensure_open()?;
        self.status = TaskStatus::Failed {
            error: error.into(),
        };
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_complete() {
            return Err(Error::Rejected(format!(
                "encoding task {} already succeeded; create a new task to re-encode",
                self.id
            )));
        }
        Ok(())
    }
}
