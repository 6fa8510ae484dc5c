//! Enigma - Video encoding pipeline library
//!
//! Hexagonal Architecture:
//! - domain/: Pure business logic (video state machine, encoders, tasks)
//! - ports/: Trait definitions (entity store, encoder runner, transport)
//! - adapters/: Concrete implementations (local store, ffmpeg, HTTP)
//! - application/: Encoding queue, download queue, recovery, control surface
//! - config: Environment configuration
//! - error: Crate error types

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod ports;

// Re-exports for convenience
pub use adapters::local::{FfmpegRunner, HttpTransport, LocalStore};
pub use application::{Engine, RunningEngine, VideoService};
pub use config::EngineConfig;
pub use domain::{Encoder, EncoderSpec, EncodingTask, Source, Video, VideoEvent, VideoState};
pub use error::{Error, Result};
