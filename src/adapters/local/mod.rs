//! Local adapters for single-host deployment.

pub mod ffmpeg;
pub mod http;
pub mod store;

pub use ffmpeg::FfmpegRunner;
pub use http::HttpTransport;
pub use store::LocalStore;
