//! cwtrain core - filter bank and receiver noise model
//!
//! This crate provides the biquad filter stages, the LFO-modulated
//! filter chain and the stateful shortwave noise generator used by the
//! Morse trainer, plus an FFT wrapper for spectrum checks.

pub mod chain;
pub mod clock;
pub mod error;
pub mod fft;
pub mod filter;
pub mod noise;

pub use error::{CoreError, Result};

/// Audio sample rate used throughout the trainer.
pub const SAMPLE_RATE: u32 = 44_100;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::{
        chain::FilterChain,
        clock::{Clock, ManualClock, SystemClock},
        error::{CoreError, Result},
        fft::{FftConfig, FftProcessor},
        filter::{BiquadFilter, Filter, FilterType},
        noise::{NoiseEngine, NoiseSettings, NoiseState},
        SAMPLE_RATE,
    };
}
