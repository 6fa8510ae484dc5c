use crate::domain::Encoder;
use crate::error::EncodeError;
use async_trait::async_trait;
use std::path::Path;

/// Invokes the external media encoder for one encoding task.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EncoderRunner: Send + Sync {
    /// Encodes `source` into `output` using the profile's parameters.
    /// Callers bound the wait; implementations must not leave the child
    /// process running once the returned future is dropped.
    async fn encode(&self, source: &Path, output: &Path, encoder: &Encoder)
        -> Result<(), EncodeError>;
}
