//! Error types for cwtrain audio

use thiserror::Error;

/// Audio error types
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Audio device unavailable: {msg}")]
    DeviceUnavailable { msg: String },

    #[error("Audio device write failed: {msg}")]
    DeviceWrite { msg: String },

    #[error("Playback engine has been released")]
    Released,

    #[error("Playback thread panicked")]
    ThreadPanicked,

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Core error: {0}")]
    Core(#[from] cwtrain_core::CoreError),
}

/// Result type for cwtrain audio operations
pub type Result<T> = std::result::Result<T, AudioError>;
