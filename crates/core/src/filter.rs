//! Second-order IIR filter stages
//!
//! Coefficients follow the RBJ audio EQ cookbook and are normalised so that
//! `a0 == 1`. Frequency, Q and gain are clamped to ranges that keep the
//! stage stable; changing them recomputes the coefficients but keeps the
//! sample history so parameter sweeps do not click.

use crate::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Lowest frequency a stage may be tuned to
pub const MIN_FREQUENCY: f64 = 10.0;
/// Q clamp range
pub const MIN_Q: f64 = 0.0001;
pub const MAX_Q: f64 = 30.0;
/// Gain clamp range in dB (only used by peaking stages)
pub const MIN_GAIN_DB: f64 = -40.0;
pub const MAX_GAIN_DB: f64 = 40.0;

/// Generic filter trait
pub trait Filter<T: Copy> {
    /// Process a single sample
    fn process_sample(&mut self, input: T) -> T;

    /// Process a buffer of samples
    fn process_buffer(&mut self, input: &[T], output: &mut [T]) -> Result<()> {
        if input.len() != output.len() {
            return Err(CoreError::BufferSizeMismatch {
                expected: input.len(),
                actual: output.len(),
            });
        }

        for (out, sample) in output.iter_mut().zip(input) {
            *out = self.process_sample(*sample);
        }

        Ok(())
    }

    /// Reset the filter state
    fn reset(&mut self);
}

/// Characteristic response of a biquad stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterType {
    Lowpass,
    Highpass,
    Bandpass,
    Notch,
    Allpass,
    Peaking,
}

/// Normalised difference-equation coefficients (`a0 == 1`)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Coefficients {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl Coefficients {
    /// Pass-through coefficients
    pub fn identity() -> Self {
        Self {
            b0: 1.0,
            ..Self::default()
        }
    }

    /// Compute cookbook coefficients for an already clamped parameter set.
    pub fn design(
        filter_type: FilterType,
        sample_rate: f64,
        frequency: f64,
        q: f64,
        gain_db: f64,
    ) -> Self {
        let w0 = 2.0 * PI * frequency / sample_rate;
        let (sin_w0, cos_w0) = w0.sin_cos();
        let alpha = sin_w0 / (2.0 * q);
        let a = 10f64.powf(gain_db / 40.0);

        let (b0, b1, b2, a0, a1, a2) = match filter_type {
            FilterType::Lowpass => {
                let k = 1.0 - cos_w0;
                (k / 2.0, k, k / 2.0, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha)
            }
            FilterType::Highpass => {
                let k = 1.0 + cos_w0;
                (k / 2.0, -k, k / 2.0, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha)
            }
            // Constant 0 dB peak gain variant
            FilterType::Bandpass => (alpha, 0.0, -alpha, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha),
            FilterType::Notch => (1.0, -2.0 * cos_w0, 1.0, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha),
            FilterType::Allpass => (
                1.0 - alpha,
                -2.0 * cos_w0,
                1.0 + alpha,
                1.0 + alpha,
                -2.0 * cos_w0,
                1.0 - alpha,
            ),
            FilterType::Peaking => (
                1.0 + alpha * a,
                -2.0 * cos_w0,
                1.0 - alpha * a,
                1.0 + alpha / a,
                -2.0 * cos_w0,
                1.0 - alpha / a,
            ),
        };

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }
}

/// Direct-form-I sample history
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct History {
    pub x1: f64,
    pub x2: f64,
    pub y1: f64,
    pub y2: f64,
}

/// Single biquad stage
#[derive(Debug, Clone, PartialEq)]
pub struct BiquadFilter {
    filter_type: FilterType,
    sample_rate: f64,
    frequency: f64,
    q: f64,
    gain_db: f64,
    coeffs: Coefficients,
    history: History,
}

impl BiquadFilter {
    /// Create a stage; parameters are clamped like the setters do.
    pub fn new(
        filter_type: FilterType,
        sample_rate: f64,
        frequency: f64,
        q: f64,
        gain_db: f64,
    ) -> Result<Self> {
        if !(sample_rate > 2.0 * (MIN_FREQUENCY + 1.0)) {
            return Err(CoreError::InvalidSampleRate { rate: sample_rate });
        }

        let mut filter = Self {
            filter_type,
            sample_rate,
            frequency: 0.0,
            q: 0.0,
            gain_db: 0.0,
            coeffs: Coefficients::identity(),
            history: History::default(),
        };
        filter.frequency = filter.clamp_frequency(frequency);
        filter.q = clamp_or(q, MIN_Q, MAX_Q, MIN_Q);
        filter.gain_db = clamp_or(gain_db, MIN_GAIN_DB, MAX_GAIN_DB, 0.0);
        filter.recompute();
        Ok(filter)
    }

    pub fn lowpass(sample_rate: f64, frequency: f64, q: f64) -> Result<Self> {
        Self::new(FilterType::Lowpass, sample_rate, frequency, q, 0.0)
    }

    pub fn bandpass(sample_rate: f64, frequency: f64, q: f64) -> Result<Self> {
        Self::new(FilterType::Bandpass, sample_rate, frequency, q, 0.0)
    }

    pub fn peaking(sample_rate: f64, frequency: f64, q: f64, gain_db: f64) -> Result<Self> {
        Self::new(FilterType::Peaking, sample_rate, frequency, q, gain_db)
    }

    pub fn filter_type(&self) -> FilterType {
        self.filter_type
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn q(&self) -> f64 {
        self.q
    }

    pub fn gain_db(&self) -> f64 {
        self.gain_db
    }

    pub fn coefficients(&self) -> Coefficients {
        self.coeffs
    }

    pub fn history(&self) -> History {
        self.history
    }

    /// Highest frequency the stage may be tuned to
    pub fn max_frequency(&self) -> f64 {
        self.sample_rate / 2.0 - 1.0
    }

    /// Retune the stage. Clamped to `[10, nyquist - 1]`.
    pub fn set_frequency(&mut self, frequency: f64) {
        let frequency = self.clamp_frequency(frequency);
        if frequency != self.frequency {
            self.frequency = frequency;
            self.recompute();
        }
    }

    /// Clamped to `[0.0001, 30]`.
    pub fn set_q(&mut self, q: f64) {
        let q = clamp_or(q, MIN_Q, MAX_Q, self.q);
        if q != self.q {
            self.q = q;
            self.recompute();
        }
    }

    /// Clamped to `[-40, 40]` dB.
    pub fn set_gain(&mut self, gain_db: f64) {
        let gain_db = clamp_or(gain_db, MIN_GAIN_DB, MAX_GAIN_DB, self.gain_db);
        if gain_db != self.gain_db {
            self.gain_db = gain_db;
            self.recompute();
        }
    }

    /// Run one sample through the stage.
    #[inline]
    pub fn process(&mut self, input: f64) -> f64 {
        let c = &self.coeffs;
        let h = &mut self.history;
        let output = c.b0 * input + c.b1 * h.x1 + c.b2 * h.x2 - c.a1 * h.y1 - c.a2 * h.y2;

        h.x2 = h.x1;
        h.x1 = input;
        h.y2 = h.y1;
        h.y1 = output;

        output
    }

    /// Zero the sample history; coefficients are kept.
    pub fn reset(&mut self) {
        self.history = History::default();
    }

    fn clamp_frequency(&self, frequency: f64) -> f64 {
        clamp_or(frequency, MIN_FREQUENCY, self.max_frequency(), self.frequency.max(MIN_FREQUENCY))
    }

    fn recompute(&mut self) {
        self.coeffs = Coefficients::design(
            self.filter_type,
            self.sample_rate,
            self.frequency,
            self.q,
            self.gain_db,
        );
    }
}

impl Filter<f64> for BiquadFilter {
    fn process_sample(&mut self, input: f64) -> f64 {
        self.process(input)
    }

    fn reset(&mut self) {
        BiquadFilter::reset(self);
    }
}

/// Clamp `value` into `[min, max]`, substituting `fallback` for NaN.
fn clamp_or(value: f64, min: f64, max: f64, fallback: f64) -> f64 {
    if value.is_nan() {
        fallback.clamp(min, max)
    } else {
        value.clamp(min, max)
    }
}
