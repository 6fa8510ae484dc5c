//! Engine lifecycle: ordered startup of recovery and both queues, and
//! graceful shutdown.

use super::backoff::retry_store;
use super::download_queue::DownloadQueue;
use super::encoding_queue::EncodingQueue;
use super::recovery::{recover, RecoveryReport};
use super::service::VideoService;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::ports::encoder::EncoderRunner;
use crate::ports::repository::EntityStore;
use crate::ports::transport::Transport;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub struct Engine<S, R, T> {
    config: EngineConfig,
    store: S,
    runner: R,
    transport: T,
}

impl<S, R, T> Engine<S, R, T>
where
    S: EntityStore + Clone + 'static,
    R: EncoderRunner + 'static,
    T: Transport + 'static,
{
    pub fn new(config: EngineConfig, store: S, runner: R, transport: T) -> Self {
        Self {
            config,
            store,
            runner,
            transport,
        }
    }

    /// Validates configuration, repairs interrupted work, then starts the
    /// download queue followed by the encoding pool. Nothing is spawned if
    /// any step before that fails.
    pub async fn start(self) -> Result<RunningEngine<S>> {
        self.config.validate()?;

        tokio::fs::create_dir_all(&self.config.output_dir).await?;
        if self.config.enable_http_downloads {
            if let Some(storage) = &self.config.download_storage_path {
                tokio::fs::create_dir_all(storage).await?;
            }
        }

        let store = &self.store;
        let report = retry_store("recovery", self.config.poll_interval, || async move {
            recover(store).await
        })
        .await?;

        let config = Arc::new(self.config);
        let shutdown = CancellationToken::new();

        let downloads = Arc::new(DownloadQueue::new(
            self.store.clone(),
            self.transport,
            Arc::clone(&config),
        ));
        let download_handle = downloads.start(shutdown.clone());

        let encoding = Arc::new(EncodingQueue::new(
            self.store.clone(),
            self.runner,
            Arc::clone(&config),
        ));
        let worker_handles = encoding.start(shutdown.clone());

        info!(
            threads = config.threads,
            download_concurrency = config.download_concurrency,
            downloads_enabled = config.enable_http_downloads,
            "engine started"
        );

        Ok(RunningEngine {
            service: VideoService::new(self.store),
            report,
            shutdown,
            download_handle,
            worker_handles,
        })
    }
}

pub struct RunningEngine<S> {
    service: VideoService<S>,
    report: RecoveryReport,
    shutdown: CancellationToken,
    download_handle: JoinHandle<()>,
    worker_handles: Vec<JoinHandle<()>>,
}

impl<S> RunningEngine<S>
where
    S: EntityStore,
{
    pub fn service(&self) -> &VideoService<S> {
        &self.service
    }

    /// What recovery repaired before the queues started.
    pub fn recovery_report(&self) -> RecoveryReport {
        self.report
    }

    /// Stops claiming new work and waits for every claimed job to finish.
    pub async fn shutdown(self) {
        info!("shutting down engine");
        self.shutdown.cancel();

        if let Err(err) = self.download_handle.await {
            error!(error = %err, "download queue terminated abnormally");
        }
        for (worker_id, handle) in self.worker_handles.into_iter().enumerate() {
            if let Err(err) = handle.await {
                error!(worker_id, error = %err, "encoding worker terminated abnormally");
            }
        }
        info!("engine stopped");
    }
}
