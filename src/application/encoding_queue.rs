//! Bounded worker pool that encodes claimed videos.
//!
//! Workers are tokio tasks rather than OS threads: the heavy lifting happens
//! in the external encoder process each task awaits.

use super::backoff::{retry_claimed, StoreBackoff};
use crate::config::EngineConfig;
use crate::domain::{EncodingTask, Video, VideoEvent, VideoState};
use crate::error::{EncodeError, Error, Result};
use crate::ports::encoder::EncoderRunner;
use crate::ports::repository::EntityStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

enum TaskOutcome {
    Encoded(PathBuf),
    Failed(Error),
    /// The source itself is unusable; sibling tasks are skipped.
    SourceUnreadable(Error),
}

/// Encoding queue: `threads` workers each claim one `unencoded` video at a
/// time and run its encoding tasks sequentially.
pub struct EncodingQueue<S, R> {
    store: S,
    runner: R,
    config: Arc<EngineConfig>,
}

impl<S, R> EncodingQueue<S, R>
where
    S: EntityStore + 'static,
    R: EncoderRunner + 'static,
{
    pub fn new(store: S, runner: R, config: Arc<EngineConfig>) -> Self {
        Self {
            store,
            runner,
            config,
        }
    }

    /// Spawns the worker pool. Returns handles to all worker tasks.
    pub fn start(self: &Arc<Self>, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        info!(workers = self.config.threads, "starting encoding queue");
        (0..self.config.threads)
            .map(|worker_id| {
                let queue = Arc::clone(self);
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    queue.run_worker_loop(worker_id, shutdown).await;
                })
            })
            .collect()
    }

    /// Polls for work until `shutdown` fires. A claimed video always runs to
    /// completion before the loop checks for shutdown again.
    pub async fn run_worker_loop(&self, worker_id: usize, shutdown: CancellationToken) {
        debug!(worker_id, "encoding worker started");
        let mut backoff = StoreBackoff::new(self.config.poll_interval);

        while !shutdown.is_cancelled() {
            let pause = match self.run_once(worker_id, &shutdown).await {
                Ok(Some(_)) => {
                    backoff.reset();
                    continue;
                }
                Ok(None) => {
                    backoff.reset();
                    self.config.poll_interval
                }
                Err(e) if e.is_store_unavailable() => {
                    let delay = backoff.next_delay();
                    warn!(worker_id, error = %e, ?delay, "entity store unavailable, pausing");
                    delay
                }
                Err(e) => {
                    error!(worker_id, error = %e, "encoding job failed");
                    self.config.poll_interval
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(pause) => {}
            }
        }
        debug!(worker_id, "encoding worker stopped");
    }

    /// Claims and processes at most one video. `shutdown` only cuts short
    /// store retries; the encode itself always runs to completion.
    pub async fn run_once(
        &self,
        worker_id: usize,
        shutdown: &CancellationToken,
    ) -> Result<Option<Video>> {
        let Some(video) = self.claim_next().await? else {
            return Ok(None);
        };
        self.process(video, worker_id, shutdown).await.map(Some)
    }

    /// Claims the oldest `unencoded` video nobody else has claimed.
    pub async fn claim_next(&self) -> Result<Option<Video>> {
        for candidate in self
            .store
            .list_videos_by_state(VideoState::Unencoded)
            .await?
        {
            match self.claim(candidate).await {
                Ok(video) => return Ok(Some(video)),
                // Another worker won the race for this one.
                Err(Error::InvalidTransition { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    /// `unencoded -> encoding`, persisted only if the stored state still matches.
    pub async fn claim(&self, mut video: Video) -> Result<Video> {
        let prior = video.state();
        video.apply(VideoEvent::StartEncode)?;
        self.store.update_video(&video, prior).await?;
        Ok(video)
    }

    /// Runs every open task of a claimed video and resolves its terminal state.
    pub async fn process(
        &self,
        mut video: Video,
        worker_id: usize,
        shutdown: &CancellationToken,
    ) -> Result<Video> {
        info!(worker_id, video_id = %video.id, source = %video.source(), "encoding video");

        let video_id = video.id.as_str();
        let tasks = retry_claimed(
            "list encoding tasks",
            self.config.poll_interval,
            shutdown,
            || async move {
                self.store
                    .list_tasks_for_video(video_id)
                    .await
                    .map_err(Error::from)
            },
        )
        .await?;

        let first_error = self.run_tasks(&video, tasks, worker_id, shutdown).await?;

        let prior = video.state();
        let next = video.finish_encode(first_error)?;
        let finished = &video;
        retry_claimed("finish encode", self.config.poll_interval, shutdown, || async move {
            self.store
                .update_video(finished, prior)
                .await
                .map_err(Error::from)
        })
        .await?;

        match video.error() {
            None => info!(worker_id, video_id = %video.id, state = %next, "video encoded"),
            Some(reason) => {
                warn!(worker_id, video_id = %video.id, state = %next, reason, "video encoded with errors")
            }
        }
        Ok(video)
    }

    /// Returns the first error encountered, if any.
    async fn run_tasks(
        &self,
        video: &Video,
        tasks: Vec<EncodingTask>,
        worker_id: usize,
        shutdown: &CancellationToken,
    ) -> Result<Option<String>> {
        let mut open = tasks.into_iter().filter(EncodingTask::is_open);

        let source = match video.source().local_path() {
            Some(path) if tokio::fs::metadata(path).await.is_ok() => path.to_path_buf(),
            _ => {
                let reason = format!("source {} is not available locally", video.source());
                for mut task in open {
                    task.fail(&reason)?;
                    self.save_task(&task, shutdown).await?;
                }
                return Ok(Some(reason));
            }
        };

        let mut first_error: Option<String> = None;
        while let Some(mut task) = open.next() {
            match self.run_task(&source, video, &task, shutdown).await? {
                TaskOutcome::Encoded(output) => {
                    debug!(worker_id, task_id = %task.id, ?output, "encoding task complete");
                    task.complete(output)?;
                    self.save_task(&task, shutdown).await?;
                }
                TaskOutcome::Failed(e) => {
                    let reason = e.to_string();
                    warn!(worker_id, task_id = %task.id, %reason, "encoding task failed");
                    task.fail(&reason)?;
                    self.save_task(&task, shutdown).await?;
                    first_error.get_or_insert(reason);
                }
                TaskOutcome::SourceUnreadable(e) => {
                    let reason = e.to_string();
                    warn!(worker_id, video_id = %video.id, %reason, "source unreadable, skipping remaining tasks");
                    task.fail(&reason)?;
                    self.save_task(&task, shutdown).await?;
                    for mut skipped in open.by_ref() {
                        skipped.fail(format!("skipped: {reason}"))?;
                        self.save_task(&skipped, shutdown).await?;
                    }
                    first_error.get_or_insert(reason);
                    break;
                }
            }
        }
        Ok(first_error)
    }

    /// Store failures other than a missing encoder are returned as errors,
    /// not recorded against the task.
    async fn run_task(
        &self,
        source: &Path,
        video: &Video,
        task: &EncodingTask,
        shutdown: &CancellationToken,
    ) -> Result<TaskOutcome> {
        let encoder_id = task.encoder_id.as_str();
        let lookup = retry_claimed("load encoder", self.config.poll_interval, shutdown, || async move {
            self.store.get_encoder(encoder_id).await.map_err(Error::from)
        })
        .await;
        let encoder = match lookup {
            Ok(encoder) => encoder,
            Err(e @ Error::NotFound { .. }) => return Ok(TaskOutcome::Failed(e)),
            Err(e) => return Err(e),
        };

        let output = encoder.output_path(&self.config.output_dir, &video.id);
        if let Some(parent) = output.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return Ok(TaskOutcome::Failed(e.into()));
            }
        }

        let limit = self.config.encode_timeout;
        let outcome = match timeout(limit, self.runner.encode(source, &output, &encoder)).await {
            Ok(Ok(())) => TaskOutcome::Encoded(output),
            Ok(Err(EncodeError::SourceUnreadable(detail))) => TaskOutcome::SourceUnreadable(
                Error::EncodeFailure(format!("{}: source unreadable: {detail}", encoder.name)),
            ),
            Ok(Err(e)) => {
                TaskOutcome::Failed(Error::EncodeFailure(format!("{}: {e}", encoder.name)))
            }
            Err(_) => TaskOutcome::Failed(Error::EncodeTimeout(limit)),
        };
        Ok(outcome)
    }

    async fn save_task(&self, task: &EncodingTask, shutdown: &CancellationToken) -> Result<()> {
        retry_claimed("save encoding task", self.config.poll_interval, shutdown, || async move {
            self.store.update_task(task).await.map_err(Error::from)
        })
        .await
    }
}
