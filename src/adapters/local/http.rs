//! `Transport` over HTTP(S) using reqwest streaming bodies.

use crate::error::DownloadError;
use crate::ports::transport::Transport;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use std::io;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::io::StreamReader;
use tracing::debug;
use url::Url;

#[derive(Clone, Debug, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, url: &Url, destination: &Path) -> Result<u64, DownloadError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| DownloadError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status(status.as_u16()));
        }

        let expected = response.content_length();
        debug!(%url, ?expected, "streaming remote source");

        let body = response
            .bytes_stream()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e));
        let written = match stream_to_file(destination, body).await {
            Ok(written) => written,
            Err(e) => {
                let _ = tokio::fs::remove_file(destination).await;
                return Err(DownloadError::Network(e.to_string()));
            }
        };

        if let Some(expected) = expected {
            if written != expected {
                let _ = tokio::fs::remove_file(destination).await;
                return Err(DownloadError::Truncated {
                    expected,
                    received: written,
                });
            }
        }
        Ok(written)
    }
}

/// Save a `Stream` to a file, returning the number of bytes written.
pub async fn stream_to_file<S>(path: &Path, stream: S) -> io::Result<u64>
where
    S: Stream<Item = io::Result<Bytes>>,
{
    let body_reader = StreamReader::new(stream);
    futures::pin_mut!(body_reader);

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = BufWriter::new(File::create(path).await?);
    let written = tokio::io::copy(&mut body_reader, &mut file).await?;
    file.flush().await?;

    Ok(written)
}
