//! Application layer - Queues, recovery and the control surface, generic over ports.

pub mod backoff;
pub mod download_queue;
pub mod encoding_queue;
pub mod engine;
pub mod recovery;
pub mod service;

#[cfg(test)]
mod scenarios;
#[cfg(test)]
mod testing;

pub use download_queue::DownloadQueue;
pub use encoding_queue::EncodingQueue;
pub use engine::{Engine, RunningEngine};
pub use recovery::{recover, RecoveryReport};
pub use service::VideoService;
