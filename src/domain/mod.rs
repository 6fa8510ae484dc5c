//! Domain layer - Pure business logic.

pub mod encoder;
pub mod encoding_task;
pub mod state;
pub mod video;

pub use encoder::{Encoder, EncoderSpec};
pub use encoding_task::{EncodingTask, TaskStatus};
pub use state::{VideoEvent, VideoState};
pub use video::{Source, Video};
