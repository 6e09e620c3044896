//! Keyed tone synthesis
//!
//! Renders one symbol at a time into 16-bit PCM with a raised-cosine
//! rise and fall so key-down edges do not click.

use crate::cw::{MorseSymbol, TimingSettings};
use cwtrain_core::SAMPLE_RATE;
use std::f64::consts::{PI, TAU};

/// Tone burst renderer
#[derive(Debug, Clone, Copy)]
pub struct ToneSynthesizer {
    sample_rate: u32,
}

impl Default for ToneSynthesizer {
    fn default() -> Self {
        Self::new(SAMPLE_RATE)
    }
}

impl ToneSynthesizer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of samples covering `duration_ms`
    pub fn sample_count(&self, duration_ms: u32) -> usize {
        (self.sample_rate as f64 * duration_ms as f64 / 1000.0).round() as usize
    }

    /// Edge length in samples: the rise/fall time, but never more than a
    /// tenth of the burst.
    pub fn fade_length(&self, buffer_len: usize, rise_fall_ms: f64) -> usize {
        let rise_fall = (self.sample_rate as f64 * rise_fall_ms / 1000.0).round() as usize;
        (buffer_len / 10).min(rise_fall)
    }

    /// Render a symbol. Spacing symbols render as silence of the same length.
    pub fn render(&self, symbol: &MorseSymbol, settings: &TimingSettings) -> Vec<i16> {
        let settings = settings.clamped();
        if symbol.is_tone() {
            self.render_tone(
                settings.tone_frequency,
                symbol.duration_ms,
                settings.volume,
                settings.rise_fall_ms,
            )
        } else {
            vec![0; self.sample_count(symbol.duration_ms)]
        }
    }

    /// Render a shaped sine burst.
    pub fn render_tone(
        &self,
        frequency: f64,
        duration_ms: u32,
        amplitude: f64,
        rise_fall_ms: f64,
    ) -> Vec<i16> {
        let len = self.sample_count(duration_ms);
        let fade = self.fade_length(len, rise_fall_ms);
        let omega = TAU * frequency / self.sample_rate as f64;
        let peak = amplitude.clamp(0.0, 1.0) * i16::MAX as f64;

        (0..len)
            .map(|n| {
                let envelope = edge_gain(n, len, fade);
                let value = peak * envelope * (omega * n as f64).sin();
                value.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16
            })
            .collect()
    }

    /// Render a whole symbol list back to back.
    pub fn render_sequence(&self, symbols: &[MorseSymbol], settings: &TimingSettings) -> Vec<i16> {
        let mut samples = Vec::new();
        for symbol in symbols {
            samples.extend(self.render(symbol, settings));
        }
        samples
    }
}

/// Raised-cosine gain over the first and last `fade` samples.
#[inline]
fn edge_gain(n: usize, len: usize, fade: usize) -> f64 {
    if fade == 0 {
        return 1.0;
    }
    let from_edge = n.min(len - 1 - n);
    if from_edge >= fade {
        1.0
    } else {
        0.5 * (1.0 - (PI * from_edge as f64 / fade as f64).cos())
    }
}
