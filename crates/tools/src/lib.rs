//! cwtrain tools library
//!
//! Configuration file handling, WAV helpers and spectrum analysis shared by
//! the `cwtrain` binary.

pub mod analyze;
pub mod common;
pub mod config;

pub use analyze::{AnalysisResult, AnalyzeConfig, SignalAnalyzer};
pub use common::{init_logging, read_wav_file, write_wav_file};
pub use config::{PlaybackConfig, TrainerConfig};
