use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use uuid::Uuid;

fn extension_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9]{1,10}$").expect("valid extension regex"))
}

/// A named transcoding profile for the external encoder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Encoder {
    pub id: String,
    pub name: String,
    /// Output file extension, without the leading dot.
    pub extension: String,
    /// Encoder arguments placed between the input and the output path.
    pub params: String,
}

/// Fields accepted when creating or editing an encoder.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EncoderSpec {
    pub name: String,
    pub extension: String,
    pub params: String,
}

impl Encoder {
    pub fn new(spec: EncoderSpec) -> Result<Self> {
        let spec = spec.validated()?;
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            name: spec.name,
            extension: spec.extension,
            params: spec.params,
        })
    }

    pub fn update(&mut self, spec: EncoderSpec) -> Result<()> {
        let spec = spec.validated()?;
        self.name = spec.name;
        self.extension = spec.extension;
        self.params = spec.params;
        Ok(())
    }

    pub fn args(&self) -> impl Iterator<Item = &str> {
        self.params.split_whitespace()
    }

    /// `<dir>/<video_id>/<encoder_id>.<extension>`
    pub fn output_path(&self, dir: &Path, video_id: &str) -> PathBuf {
        dir.join(video_id)
            .join(format!("{}.{}", self.id, self.extension))
    }
}

impl EncoderSpec {
    fn validated(self) -> Result<Self> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(Error::Validation("encoder name is empty".into()));
        }

        let extension = self.extension.trim().trim_start_matches('.').to_string();
        if !extension_pattern().is_match(&extension) {
            return Err(Error::Validation(format!(
                "encoder extension {:?} must be 1-10 alphanumeric characters",
                self.extension
            )));
        }

        Ok(Self {
            name,
            extension,
            params: self.params.trim().to_string(),
        })
    }
}
