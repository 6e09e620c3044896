//! cwtrain audio - playback engine and lesson sequencing
//!
//! This crate owns the output device. Every stream, whether a one-shot
//! buffer, a Morse lesson or continuous background noise, goes through a
//! single [`PlaybackEngine`] so that only one of them writes at a time.

pub mod background;
pub mod cancel;
pub mod device;
pub mod engine;
pub mod error;
pub mod mixer;
pub mod player;

pub use engine::PlaybackEngine;
pub use error::{AudioError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::{
        background::NoiseStream,
        cancel::CancellationToken,
        device::{AudioDevice, MemoryDevice, NullDevice, TransferMode, WavDevice},
        engine::{PlaybackEngine, PlaybackOutcome, StreamHandle},
        error::{AudioError, Result},
        mixer::mix_mean,
        player::{PlaybackHandle, PlaybackRequest, PlayerState, SequencePlayer},
    };

    #[cfg(feature = "cpal")]
    pub use crate::device::CpalDevice;
}
