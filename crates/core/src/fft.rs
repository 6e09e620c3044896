//! FFT processing wrapper for spectrum checks

use crate::{CoreError, Result};
use rustfft::{num_complex::Complex64, FftPlanner};
use std::sync::Arc;

/// FFT configuration
#[derive(Debug, Clone)]
pub struct FftConfig {
    pub size: usize,
    pub sample_rate: f64,
}

impl FftConfig {
    pub fn new(size: usize, sample_rate: f64) -> Result<Self> {
        if size == 0 || !size.is_power_of_two() {
            return Err(CoreError::FftError {
                msg: format!("FFT size must be a power of 2, got {}", size),
            });
        }

        if sample_rate <= 0.0 {
            return Err(CoreError::InvalidSampleRate { rate: sample_rate });
        }

        Ok(Self { size, sample_rate })
    }

    /// Get frequency resolution (Hz per bin)
    pub fn frequency_resolution(&self) -> f64 {
        self.sample_rate / self.size as f64
    }

    /// Convert bin index to frequency in Hz
    pub fn bin_to_frequency(&self, bin: usize) -> f64 {
        bin as f64 * self.frequency_resolution()
    }

    /// Convert frequency in Hz to bin index
    pub fn frequency_to_bin(&self, frequency: f64) -> usize {
        (frequency / self.frequency_resolution()).round() as usize
    }
}

/// Forward FFT over real-valued audio
pub struct FftProcessor {
    config: FftConfig,
    fft: Arc<dyn rustfft::Fft<f64>>,
    scratch: Vec<Complex64>,
}

impl FftProcessor {
    /// Create a new FFT processor
    pub fn new(config: FftConfig) -> Result<Self> {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(config.size);
        let scratch = vec![Complex64::new(0.0, 0.0); fft.get_inplace_scratch_len()];

        Ok(Self {
            config,
            fft,
            scratch,
        })
    }

    /// Get the FFT configuration
    pub fn config(&self) -> &FftConfig {
        &self.config
    }

    /// Magnitude of the positive-frequency bins (`size / 2 + 1` values).
    ///
    /// Shorter input is zero padded; longer input is an error.
    pub fn magnitude_spectrum(&mut self, input: &[f64]) -> Result<Vec<f64>> {
        if input.len() > self.config.size {
            return Err(CoreError::BufferSizeMismatch {
                expected: self.config.size,
                actual: input.len(),
            });
        }

        let mut buffer = vec![Complex64::new(0.0, 0.0); self.config.size];
        for (slot, &sample) in buffer.iter_mut().zip(input) {
            slot.re = sample;
        }

        self.fft.process_with_scratch(&mut buffer, &mut self.scratch);

        Ok(buffer[..self.config.size / 2 + 1]
            .iter()
            .map(|c| c.norm())
            .collect())
    }

    /// Power spectrum (squared magnitude, one-sided)
    pub fn power_spectrum(&mut self, input: &[f64]) -> Result<Vec<f64>> {
        let mut spectrum = self.magnitude_spectrum(input)?;
        let last = spectrum.len() - 1;
        for (i, bin) in spectrum.iter_mut().enumerate() {
            *bin *= *bin;
            if i > 0 && i < last {
                *bin *= 2.0;
            }
        }
        Ok(spectrum)
    }

    /// Index of the strongest bin, ignoring DC.
    pub fn peak_bin(spectrum: &[f64]) -> Option<usize> {
        spectrum
            .iter()
            .enumerate()
            .skip(1)
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
    }

    /// Dominant frequency of `input` in Hz.
    pub fn peak_frequency(&mut self, input: &[f64]) -> Result<Option<f64>> {
        let spectrum = self.magnitude_spectrum(input)?;
        Ok(Self::peak_bin(&spectrum).map(|bin| self.config.bin_to_frequency(bin)))
    }
}

/// Windowing functions for FFT processing
pub mod window {
    /// Apply Hann window to signal
    pub fn hann(signal: &mut [f64]) {
        let n = signal.len();
        if n < 2 {
            return;
        }
        for (i, sample) in signal.iter_mut().enumerate() {
            let window_val =
                0.5 * (1.0 - (2.0 * std::f64::consts::PI * i as f64 / (n - 1) as f64).cos());
            *sample *= window_val;
        }
    }
}
