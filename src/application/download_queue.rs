//! Single-loop fetcher for videos with remote sources.
//!
//! All transfers are futures driven by one task; they interleave at I/O wait
//! points and never run in parallel with each other.

use super::backoff::{exponential, retry_claimed, StoreBackoff, MAX_BACKOFF};
use crate::config::EngineConfig;
use crate::domain::{Source, Video, VideoEvent, VideoState};
use crate::error::{DownloadError, Error, Result};
use crate::ports::repository::EntityStore;
use crate::ports::transport::Transport;
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

pub struct DownloadQueue<S, T> {
    store: S,
    transport: T,
    config: Arc<EngineConfig>,
}

impl<S, T> DownloadQueue<S, T>
where
    S: EntityStore + 'static,
    T: Transport + 'static,
{
    pub fn new(store: S, transport: T, config: Arc<EngineConfig>) -> Self {
        Self {
            store,
            transport,
            config,
        }
    }

    pub fn start(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            queue.run(shutdown).await;
        })
    }

    /// Runs until `shutdown` fires and every in-flight transfer has settled.
    /// Returns immediately when remote downloads are disabled.
    pub async fn run(&self, shutdown: CancellationToken) {
        if !self.config.enable_http_downloads {
            info!("remote downloads disabled, download queue not started");
            return;
        }
        let Some(storage) = self.config.download_storage_path.clone() else {
            error!("no download storage path configured, download queue not started");
            return;
        };

        let limit = self.config.download_concurrency;
        if limit == 0 {
            error!("download concurrency is zero, download queue not started");
            return;
        }
        info!(limit, storage = %storage.display(), "starting download queue");

        let mut backoff = StoreBackoff::new(self.config.poll_interval);
        let mut in_flight = FuturesUnordered::new();
        let mut next_poll = Instant::now();

        loop {
            let accepting = !shutdown.is_cancelled();
            if accepting && in_flight.len() < limit && Instant::now() >= next_poll {
                let pause = match self.claim_ready(limit - in_flight.len()).await {
                    Ok(claimed) => {
                        backoff.reset();
                        for video in claimed {
                            in_flight.push(self.transfer(video, &storage, &shutdown));
                        }
                        self.config.poll_interval
                    }
                    Err(e) if e.is_store_unavailable() => {
                        let delay = backoff.next_delay();
                        warn!(error = %e, ?delay, "entity store unavailable, pausing downloads");
                        delay
                    }
                    Err(e) => {
                        error!(error = %e, "failed to claim downloads");
                        self.config.poll_interval
                    }
                };
                next_poll = Instant::now() + pause;
            }

            if !accepting && in_flight.is_empty() {
                break;
            }

            let has_slot = in_flight.len() < limit;
            tokio::select! {
                Some(()) = in_flight.next(), if !in_flight.is_empty() => {}
                _ = sleep_until(next_poll), if accepting && has_slot => {}
                _ = shutdown.cancelled(), if accepting => {
                    debug!(in_flight = in_flight.len(), "download queue draining");
                }
            }
        }
        info!("download queue stopped");
    }

    /// Claims up to `max` videos whose retry delay has elapsed.
    pub async fn claim_ready(&self, max: usize) -> Result<Vec<Video>> {
        let now = Utc::now();
        let candidates = self
            .store
            .list_videos_by_state(VideoState::WaitingForDownload)
            .await?;

        let mut claimed = Vec::new();
        for video in candidates
            .into_iter()
            .filter(|v| v.is_ready_for_download(now))
        {
            if claimed.len() >= max {
                break;
            }
            match self.claim(video).await {
                Ok(video) => claimed.push(video),
                Err(Error::InvalidTransition { .. }) => continue,
                // Keep what was already claimed; those transfers must run.
                Err(e) if claimed.is_empty() => return Err(e),
                Err(e) => {
                    warn!(error = %e, "stopped claiming downloads early");
                    break;
                }
            }
        }
        Ok(claimed)
    }

    /// `waiting_for_download -> downloading`, conditional on the stored state.
    pub async fn claim(&self, mut video: Video) -> Result<Video> {
        let prior = video.state();
        video.apply(VideoEvent::StartDownload)?;
        self.store.update_video(&video, prior).await?;
        Ok(video)
    }

    /// Fetches one claimed video and records the outcome. Never fails: every
    /// error ends up on the video record.
    async fn transfer(&self, mut video: Video, storage: &Path, shutdown: &CancellationToken) {
        let url = match video.source() {
            Source::Remote(url) => url.clone(),
            Source::Local(path) => {
                error!(video_id = %video.id, path = %path.display(), "claimed a local video for download");
                return;
            }
        };
        let destination = storage.join(download_file_name(&video.id, &url));
        let prior = video.state();

        debug!(video_id = %video.id, %url, "download started");
        let limit = self.config.download_timeout;
        let result = match timeout(limit, self.transport.fetch(&url, &destination)).await {
            Ok(result) => result,
            Err(_) => Err(DownloadError::Timeout(limit)),
        };

        let outcome = match result {
            Ok(bytes) => {
                info!(video_id = %video.id, bytes, path = %destination.display(), "download complete");
                video.finish_download(destination)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&destination).await;
                self.record_failure(&mut video, Error::from(e))
            }
        };
        if let Err(e) = outcome {
            error!(video_id = %video.id, error = %e, "could not record download outcome");
            return;
        }

        let finished = &video;
        let saved = retry_claimed(
            "record download",
            self.config.poll_interval,
            shutdown,
            || async move {
                self.store
                    .update_video(finished, prior)
                    .await
                    .map_err(Error::from)
            },
        )
        .await;
        if let Err(e) = saved {
            // Only reached on shutdown; recovery resets it on the next start.
            error!(video_id = %video.id, error = %e, "failed to persist download outcome");
        }
    }

    fn record_failure(&self, video: &mut Video, err: Error) -> Result<()> {
        let attempt = video.download_attempts() + 1;
        let delay = exponential(self.config.download_backoff, attempt, MAX_BACKOFF);
        let retry_after = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::hours(1));

        let next = video.fail_download(err.to_string(), self.config.download_max_attempts, retry_after)?;
        match next {
            VideoState::DownloadFailed => error!(
                video_id = %video.id,
                attempts = attempt,
                error = %err,
                "download retry budget exhausted"
            ),
            _ => warn!(
                video_id = %video.id,
                attempt,
                max_attempts = self.config.download_max_attempts,
                ?delay,
                error = %err,
                "download failed, will retry"
            ),
        }
        Ok(())
    }
}

/// `<video_id>-<last url segment>` with anything outside `[A-Za-z0-9._-]` replaced.
fn download_file_name(video_id: &str, url: &Url) -> PathBuf {
    let name = url
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .unwrap_or("source");
    let name: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    PathBuf::from(format!("{video_id}-{name}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::local::LocalStore;
    use crate::application::testing::{test_config, wait_for, ScriptedTransport};
    use crate::ports::transport::MockTransport;
    use std::time::Duration;
    use tempfile::tempdir;

    fn remote_video(url: &str) -> Video {
        Video::new(Source::parse(url).unwrap(), "enc")
    }

    #[test]
    fn test_download_file_name() {
        let url = Url::parse("https://cdn.example.com/clips/My%20Clip.mov?sig=1").unwrap();
        assert_eq!(
            download_file_name("v1", &url),
            PathBuf::from("v1-My_20Clip.mov")
        );
        let bare = Url::parse("https://cdn.example.com/").unwrap();
        assert_eq!(download_file_name("v1", &bare), PathBuf::from("v1-source"));
    }

    #[tokio::test]
    async fn test_successful_download_moves_to_unencoded() {
        let dir = tempdir().unwrap();
        let config = Arc::new(test_config(dir.path()));
        let store = LocalStore::in_memory();
        let video = remote_video("http://example.com/a.mov");
        store.create_video(&video).await.unwrap();

        let queue = Arc::new(DownloadQueue::new(
            store.clone(),
            ScriptedTransport::serving("http://example.com/a.mov", b"remote bytes"),
            config,
        ));
        let shutdown = CancellationToken::new();
        let handle = queue.start(shutdown.clone());

        let done = wait_for(&store, &video.id, VideoState::Unencoded).await;
        shutdown.cancel();
        handle.await.unwrap();

        let local = done.source().local_path().unwrap().to_path_buf();
        assert!(local.starts_with(dir.path().join("downloads")));
        assert_eq!(std::fs::read(local).unwrap(), b"remote bytes");
        assert_eq!(done.download_attempts(), 0);
    }

    #[tokio::test]
    async fn test_not_found_exhausts_retry_budget() {
        let dir = tempdir().unwrap();
        let config = Arc::new(test_config(dir.path()));
        let store = LocalStore::in_memory();
        let video = remote_video("http://example.com/missing.mov");
        store.create_video(&video).await.unwrap();

        let mut transport = MockTransport::new();
        transport
            .expect_fetch()
            .times(3)
            .returning(|_, _| Err(DownloadError::Status(404)));

        let queue = Arc::new(DownloadQueue::new(store.clone(), transport, config));
        let shutdown = CancellationToken::new();
        let handle = queue.start(shutdown.clone());

        let failed = wait_for(&store, &video.id, VideoState::DownloadFailed).await;
        // Give the loop a few more polls to prove it stopped retrying.
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(failed.download_attempts(), 3);
        assert!(failed.error().unwrap().contains("404"));
        assert_eq!(failed.retry_after(), None);
    }

    #[tokio::test]
    async fn test_failed_attempt_waits_for_backoff() {
        let dir = tempdir().unwrap();
        let config = Arc::new(EngineConfig {
            download_backoff: Duration::from_secs(60),
            ..test_config(dir.path())
        });
        let store = LocalStore::in_memory();
        let video = remote_video("http://example.com/missing.mov");
        store.create_video(&video).await.unwrap();

        let transport = ScriptedTransport::default();
        let queue = DownloadQueue::new(store.clone(), transport, config);

        let claimed = queue.claim_ready(4).await.unwrap();
        assert_eq!(claimed.len(), 1);
        let storage = dir.path().join("downloads");
        for video in claimed {
            queue.transfer(video, &storage, &CancellationToken::new()).await;
        }

        let waiting = store.get_video(&video.id).await.unwrap();
        assert_eq!(waiting.state(), VideoState::WaitingForDownload);
        assert_eq!(waiting.download_attempts(), 1);
        assert!(waiting.retry_after().unwrap() > Utc::now());
        assert!(queue.claim_ready(4).await.unwrap().is_empty());
        assert_eq!(queue.transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_claim_respects_limit_and_exclusivity() {
        let dir = tempdir().unwrap();
        let config = Arc::new(test_config(dir.path()));
        let store = LocalStore::in_memory();
        for i in 0..3 {
            store
                .create_video(&remote_video(&format!("http://example.com/{i}.mov")))
                .await
                .unwrap();
        }
        let queue = DownloadQueue::new(store.clone(), ScriptedTransport::default(), config);

        assert_eq!(queue.claim_ready(2).await.unwrap().len(), 2);
        assert_eq!(queue.claim_ready(2).await.unwrap().len(), 1);
        assert!(queue.claim_ready(2).await.unwrap().is_empty());
        assert_eq!(
            store
                .list_videos_by_state(VideoState::Downloading)
                .await
                .unwrap()
                .len(),
            3
        );
    }

    #[tokio::test]
    async fn test_disabled_queue_leaves_videos_waiting() {
        let dir = tempdir().unwrap();
        let config = Arc::new(EngineConfig {
            enable_http_downloads: false,
            ..test_config(dir.path())
        });
        let store = LocalStore::in_memory();
        let video = remote_video("http://example.com/a.mov");
        store.create_video(&video).await.unwrap();

        let mut transport = MockTransport::new();
        transport.expect_fetch().never();

        let queue = DownloadQueue::new(store.clone(), transport, config);
        queue.run(CancellationToken::new()).await;

        assert_eq!(
            store.get_video(&video.id).await.unwrap().state(),
            VideoState::WaitingForDownload
        );
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failed_attempt() {
        struct Stalled;

        #[async_trait::async_trait]
        impl Transport for Stalled {
            async fn fetch(&self, _: &Url, _: &Path) -> std::result::Result<u64, DownloadError> {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(0)
            }
        }

        let dir = tempdir().unwrap();
        let config = Arc::new(EngineConfig {
            download_timeout: Duration::from_millis(20),
            download_backoff: Duration::from_secs(60),
            ..test_config(dir.path())
        });
        let store = LocalStore::in_memory();
        let video = remote_video("http://example.com/slow.mov");
        store.create_video(&video).await.unwrap();

        let queue = DownloadQueue::new(store.clone(), Stalled, config);
        let storage = dir.path().join("downloads");
        for claimed in queue.claim_ready(1).await.unwrap() {
            queue.transfer(claimed, &storage, &CancellationToken::new()).await;
        }

        let waiting = store.get_video(&video.id).await.unwrap();
        assert_eq!(waiting.state(), VideoState::WaitingForDownload);
        assert!(waiting.error().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_zero_concurrency_returns_instead_of_spinning() {
        let dir = tempdir().unwrap();
        let config = Arc::new(EngineConfig {
            download_concurrency: 0,
            ..test_config(dir.path())
        });
        let store = LocalStore::in_memory();
        let video = remote_video("http://example.com/a.mov");
        store.create_video(&video).await.unwrap();

        let queue = DownloadQueue::new(store.clone(), ScriptedTransport::default(), config);
        tokio::time::timeout(Duration::from_secs(1), queue.run(CancellationToken::new()))
            .await
            .unwrap();

        assert_eq!(queue.transport.calls(), 0);
        assert_eq!(
            store.get_video(&video.id).await.unwrap().state(),
            VideoState::WaitingForDownload
        );
    }

    #[tokio::test]
    async fn test_outcome_lands_after_long_store_outage() {
        /// Takes the store offline as soon as the body is on disk.
        struct OutageAfterFetch {
            store: LocalStore,
        }

        #[async_trait::async_trait]
        impl Transport for OutageAfterFetch {
            async fn fetch(&self, _: &Url, destination: &Path) -> std::result::Result<u64, DownloadError> {
                tokio::fs::create_dir_all(destination.parent().unwrap()).await?;
                tokio::fs::write(destination, b"remote bytes").await?;
                self.store.set_available(false);
                Ok(12)
            }
        }

        let dir = tempdir().unwrap();
        let config = Arc::new(test_config(dir.path()));
        let store = LocalStore::in_memory();
        let video = remote_video("http://example.com/a.mov");
        store.create_video(&video).await.unwrap();

        let transport = OutageAfterFetch {
            store: store.clone(),
        };
        let queue = DownloadQueue::new(store.clone(), transport, config);
        let claimed = queue.claim_ready(1).await.unwrap();

        let restore = store.clone();
        tokio::spawn(async move {
            // Well past five doubling retries from the 10ms base.
            tokio::time::sleep(Duration::from_millis(700)).await;
            restore.set_available(true);
        });
        let storage = dir.path().join("downloads");
        for video in claimed {
            queue.transfer(video, &storage, &CancellationToken::new()).await;
        }

        let done = store.get_video(&video.id).await.unwrap();
        assert_eq!(done.state(), VideoState::Unencoded);
        assert!(done.source().local_path().unwrap().is_file());
    }
}
