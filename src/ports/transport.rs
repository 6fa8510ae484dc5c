use crate::error::DownloadError;
use async_trait::async_trait;
use std::path::Path;
use url::Url;

/// Fetches remote sources into local files.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Streams `url` into `destination`, returning the number of bytes written.
    async fn fetch(&self, url: &Url, destination: &Path) -> Result<u64, DownloadError>;
}
