//! `EncoderRunner` backed by an ffmpeg-compatible command line tool.

use crate::domain::Encoder;
use crate::error::EncodeError;
use crate::ports::encoder::EncoderRunner;
use async_trait::async_trait;
use regex::Regex;
use std::path::Path;
use std::process::Stdio;
use std::sync::OnceLock;
use tokio::process::Command;
use tracing::debug;

/// stderr lines ffmpeg prints when the input itself is the problem.
fn unreadable_source_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?m)^.*(No such file or directory|Invalid data found when processing input|moov atom not found|Permission denied).*$",
        )
        .expect("valid ffmpeg stderr regex")
    })
}

#[derive(Clone, Debug)]
pub struct FfmpegRunner {
    program: String,
}

impl FfmpegRunner {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for FfmpegRunner {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

#[async_trait]
impl EncoderRunner for FfmpegRunner {
    async fn encode(
        &self,
        source: &Path,
        output: &Path,
        encoder: &Encoder,
    ) -> Result<(), EncodeError> {
        if tokio::fs::metadata(source).await.is_err() {
            return Err(EncodeError::SourceUnreadable(format!(
                "{} does not exist",
                source.display()
            )));
        }

        let mut command = Command::new(&self.program);
        command
            .arg("-y")
            .arg("-i")
            .arg(source)
            .args(encoder.args())
            .arg(output)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        debug!(program = %self.program, encoder = %encoder.name, ?source, ?output, "running encoder");
        let result = command.output().await?;
        let stderr = String::from_utf8_lossy(&result.stderr);

        if !result.status.success() {
            return Err(classify_failure(&result.status.to_string(), &stderr));
        }

        if tokio::fs::metadata(output).await.is_err() {
            return Err(EncodeError::Failed {
                status: result.status.to_string(),
                detail: format!("encoder produced no output at {}", output.display()),
            });
        }
        Ok(())
    }
}

fn classify_failure(status: &str, stderr: &str) -> EncodeError {
    if let Some(line) = unreadable_source_pattern().find(stderr) {
        return EncodeError::SourceUnreadable(line.as_str().trim().to_string());
    }

    let detail = stderr
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("no diagnostic output")
        .trim()
        .to_string();
    EncodeError::Failed {
        status: status.to_string(),
        detail,
    }
}
