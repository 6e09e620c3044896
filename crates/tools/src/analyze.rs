//! Signal analysis for rendered lessons and noise

use anyhow::Result;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use cwtrain_core::fft::{window, FftConfig, FftProcessor};

/// Analysis configuration
#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
pub struct AnalyzeConfig {
    /// Input WAV file (mono, 16-bit)
    #[arg(short, long)]
    pub input: PathBuf,

    /// FFT size for spectral analysis (power of two)
    #[arg(long, default_value = "8192")]
    pub fft_size: usize,

    /// Include the averaged magnitude spectrum in JSON output
    #[arg(long)]
    pub spectrum: bool,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Signal analyzer
pub struct SignalAnalyzer {
    sample_rate: f64,
    fft_processor: FftProcessor,
}

impl SignalAnalyzer {
    pub fn new(fft_size: usize, sample_rate: f64) -> Result<Self> {
        let fft_config = FftConfig::new(fft_size, sample_rate)?;
        let fft_processor = FftProcessor::new(fft_config)?;
        Ok(Self {
            sample_rate,
            fft_processor,
        })
    }

    /// Analyze 16-bit samples.
    ///
    /// The spectrum is the mean of Hann-windowed magnitude spectra over
    /// consecutive FFT frames; the last partial frame is zero padded.
    pub fn analyze(&mut self, samples: &[i16], keep_spectrum: bool) -> Result<AnalysisResult> {
        let signal: Vec<f64> = samples.iter().map(|&s| s as f64 / i16::MAX as f64).collect();

        let mut result = AnalysisResult {
            sample_count: samples.len(),
            duration_s: samples.len() as f64 / self.sample_rate,
            power: calculate_power(&signal),
            peak_amplitude: signal.iter().map(|s| s.abs()).fold(0.0, f64::max),
            ..AnalysisResult::default()
        };

        if signal.is_empty() {
            return Ok(result);
        }

        let spectrum = self.average_spectrum(&signal)?;
        result.dominant_frequency = FftProcessor::peak_bin(&spectrum)
            .filter(|&bin| spectrum[bin] > 0.0)
            .map(|bin| self.fft_processor.config().bin_to_frequency(bin));
        if keep_spectrum {
            result.spectrum = Some(spectrum);
        }

        Ok(result)
    }

    fn average_spectrum(&mut self, signal: &[f64]) -> Result<Vec<f64>> {
        let size = self.fft_processor.config().size;
        let mut total = vec![0.0; size / 2 + 1];
        let mut frames = 0usize;

        for chunk in signal.chunks(size) {
            let mut frame = chunk.to_vec();
            window::hann(&mut frame);
            let magnitude = self.fft_processor.magnitude_spectrum(&frame)?;
            for (acc, bin) in total.iter_mut().zip(magnitude) {
                *acc += bin;
            }
            frames += 1;
        }

        let scale = 1.0 / frames.max(1) as f64;
        total.iter_mut().for_each(|bin| *bin *= scale);
        Ok(total)
    }
}

/// Mean square of normalized samples
fn calculate_power(signal: &[f64]) -> f64 {
    if signal.is_empty() {
        return 0.0;
    }
    signal.iter().map(|s| s * s).sum::<f64>() / signal.len() as f64
}

/// Analysis results
#[derive(Debug, Default, Clone, Serialize)]
pub struct AnalysisResult {
    pub sample_count: usize,
    pub duration_s: f64,
    /// Mean power relative to full scale
    pub power: f64,
    pub peak_amplitude: f64,
    pub dominant_frequency: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spectrum: Option<Vec<f64>>,
}

impl AnalysisResult {
    /// Power in dB relative to full scale
    pub fn power_dbfs(&self) -> f64 {
        10.0 * self.power.max(1e-12).log10()
    }
}
