//! Ports - Trait definitions for the collaborators the core consumes.

pub mod encoder;
pub mod repository;
pub mod transport;

pub use encoder::EncoderRunner;
pub use repository::EntityStore;
pub use transport::Transport;
