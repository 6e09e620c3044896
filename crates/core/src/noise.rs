//! Shortwave receiver noise model
//!
//! [`NoiseEngine`] produces band-limited atmospheric noise the way it sounds
//! through a CW receiver: a Brownian carrier with slow atmospheric swell and
//! crackle, shaped by the [`FilterChain`], plus occasional resonance
//! "ringing", frequency drift, deep fades and slow amplitude modulation.
//!
//! Random events are gated on a [`Clock`] rather than on sample counts so
//! that their rate does not depend on the buffer size the caller pulls with.

use crate::chain::{ChainParameters, FilterChain};
use crate::clock::{Clock, SystemClock};
use crate::{CoreError, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use std::sync::Arc;
use tracing::trace;

/// Damping divisor of the Brownian random walk
const BROWNIAN_DAMPING: f64 = 1.02;
const CARRIER_GAIN: f64 = 0.05;
/// Atmospheric swell phase step per sample (about 0.7 Hz at 44.1 kHz)
const ATMOSPHERIC_STEP: f64 = 1.0e-4;
const ATMOSPHERIC_DEPTH: f64 = 0.25;
const CRACKLE_BASE: f64 = 0.9995;
const CRACKLE_SLOPE: f64 = 0.0002;
const CRACKLE_GAIN: f64 = 6.0;
/// One-pole smoother weight on the previous atmospheric state
const SMOOTHING: f64 = 0.6;
const ATMOSPHERIC_GAIN: f64 = 4.0;
const MAKEUP_GAIN: f64 = 3.0;

const RESONANCE_PROBABILITY: f64 = 0.08;
const RESONANCE_DECAY: f64 = 0.9997;

const DRIFT_INTERVAL_MS: f64 = 3000.0;
const DRIFT_RANGE_HZ: f64 = 15.0;
const DRIFT_LEVEL: f64 = 0.08;
const DRIFT_DECAY: f64 = 0.99995;

const FADE_THRESHOLD: f64 = 5.0;
const FADE_WINDOW_MS: u64 = 5000;
const FADE_PROBABILITY: f64 = 0.15;
const FADE_RECOVERY: f64 = 0.9998;

const AM_THRESHOLD: f64 = 3.0;

/// Noise parameters as stored by the settings collaborator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseSettings {
    /// Noise level, independent of the tone volume
    pub volume: f64,
    pub center_frequency: f64,
    pub q_factor: f64,
    pub bandwidth: f64,
    pub atmospheric_intensity: f64,
    pub crackle_intensity: f64,
    pub resonance_jump_rate: f64,
    pub drift_speed: f64,
    pub warmth_db: f64,
}

impl Default for NoiseSettings {
    fn default() -> Self {
        Self {
            volume: 0.3,
            center_frequency: 600.0,
            q_factor: 5.0,
            bandwidth: 500.0,
            atmospheric_intensity: 1.0,
            crackle_intensity: 0.03,
            resonance_jump_rate: 0.3,
            drift_speed: 0.3,
            warmth_db: 4.0,
        }
    }
}

impl NoiseSettings {
    /// Copy with every field forced into its safe range.
    pub fn clamped(&self) -> Self {
        let d = Self::default();
        Self {
            volume: clamp_field(self.volume, 0.0, 1.0, d.volume),
            center_frequency: clamp_field(self.center_frequency, 200.0, 3000.0, d.center_frequency),
            q_factor: clamp_field(self.q_factor, 1.0, 25.0, d.q_factor),
            bandwidth: clamp_field(self.bandwidth, 50.0, 3000.0, d.bandwidth),
            atmospheric_intensity: clamp_field(
                self.atmospheric_intensity,
                0.5,
                4.0,
                d.atmospheric_intensity,
            ),
            crackle_intensity: clamp_field(self.crackle_intensity, 0.01, 0.1, d.crackle_intensity),
            resonance_jump_rate: clamp_field(
                self.resonance_jump_rate,
                0.1,
                1.0,
                d.resonance_jump_rate,
            ),
            drift_speed: clamp_field(self.drift_speed, 0.1, 1.0, d.drift_speed),
            warmth_db: clamp_field(self.warmth_db, 0.0, 12.0, d.warmth_db),
        }
    }

    /// Overall band condition driving drift range, fading, AM and the
    /// optional filter stages. Spans roughly 0.5 to 8.0.
    pub fn storm_intensity(&self) -> f64 {
        self.atmospheric_intensity * (1.0 + self.crackle_intensity * 10.0)
    }

    fn chain_parameters(&self) -> ChainParameters {
        ChainParameters {
            center_frequency: self.center_frequency,
            resonance: self.q_factor,
            bandwidth: self.bandwidth,
            warmth_db: self.warmth_db,
            atmospheric_intensity: self.storm_intensity(),
        }
    }
}

fn clamp_field(value: f64, min: f64, max: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        fallback
    }
}

/// Generator state for one noise session
#[derive(Debug, Clone, PartialEq)]
pub struct NoiseState {
    pub brownian: f64,
    pub atmospheric_phase: f64,
    pub atmospheric: f64,
    pub resonance_amplitude: f64,
    pub resonance_decay: f64,
    pub last_resonance_ms: Option<u64>,
    pub drift_offset: f64,
    pub drift_amplitude: f64,
    pub last_drift_ms: Option<u64>,
    pub fade_depth: f64,
    pub fade_decay: f64,
    pub last_fade_ms: Option<u64>,
    pub am_phase: f64,
    pub am_frequency: f64,
    pub am_depth: f64,
    pub chunk_counter: u64,
    /// Samples generated so far; the time base of the resonance and drift
    /// oscillators
    pub sample_position: u64,
}

impl Default for NoiseState {
    fn default() -> Self {
        Self {
            brownian: 0.0,
            atmospheric_phase: 0.0,
            atmospheric: 0.0,
            resonance_amplitude: 0.0,
            resonance_decay: RESONANCE_DECAY,
            last_resonance_ms: None,
            drift_offset: 0.0,
            drift_amplitude: 0.0,
            last_drift_ms: None,
            fade_depth: 0.0,
            fade_decay: FADE_RECOVERY,
            last_fade_ms: None,
            am_phase: 0.0,
            am_frequency: 0.5,
            am_depth: 0.2,
            chunk_counter: 0,
            sample_position: 0,
        }
    }
}

/// Stateful receiver noise generator
pub struct NoiseEngine {
    sample_rate: f64,
    state: NoiseState,
    chain: Option<FilterChain>,
    rng: StdRng,
    clock: Arc<dyn Clock>,
}

impl NoiseEngine {
    /// Create an engine driven by `clock`, seeded from system entropy.
    pub fn new(sample_rate: f64, clock: Arc<dyn Clock>) -> Result<Self> {
        if !(sample_rate > 1000.0) {
            return Err(CoreError::InvalidSampleRate { rate: sample_rate });
        }

        Ok(Self {
            sample_rate,
            state: NoiseState::default(),
            chain: None,
            rng: StdRng::from_entropy(),
            clock,
        })
    }

    /// Engine on the wall clock
    pub fn with_system_clock(sample_rate: f64) -> Result<Self> {
        Self::new(sample_rate, Arc::new(SystemClock::new()))
    }

    /// Replace the random source with a seeded one.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn state(&self) -> &NoiseState {
        &self.state
    }

    pub fn chain(&self) -> Option<&FilterChain> {
        self.chain.as_ref()
    }

    /// Generate `buffer_size` samples of noise.
    pub fn generate(&mut self, buffer_size: usize, settings: &NoiseSettings) -> Result<Vec<i16>> {
        let mut buffer = vec![0i16; buffer_size];
        self.generate_into(&mut buffer, settings)?;
        Ok(buffer)
    }

    /// Fill `output` with noise. A silent volume leaves the DSP untouched.
    pub fn generate_into(&mut self, output: &mut [i16], settings: &NoiseSettings) -> Result<()> {
        let settings = settings.clamped();
        if settings.volume <= 0.0 {
            output.fill(0);
            return Ok(());
        }

        let params = settings.chain_parameters();
        let mut chain = match self.chain.take() {
            Some(mut chain) => {
                chain.update_parameters(&params)?;
                chain
            }
            None => FilterChain::new(self.sample_rate, &params)?,
        };

        let intensity = settings.storm_intensity();
        let now = self.clock.now_ms();
        self.update_gates(now, &settings, intensity);

        let center = settings.center_frequency;
        let crackle_threshold = CRACKLE_BASE - intensity * CRACKLE_SLOPE;
        let base_index = self.state.sample_position;
        let scale = settings.volume * i16::MAX as f64;
        let s = &mut self.state;

        for (i, out) in output.iter_mut().enumerate() {
            let t = (base_index + i as u64) as f64 / self.sample_rate;

            let white: f64 = self.rng.gen_range(-1.0..1.0);
            s.brownian = (s.brownian + white) / BROWNIAN_DAMPING;
            let carrier = s.brownian * CARRIER_GAIN;

            s.atmospheric_phase += ATMOSPHERIC_STEP;
            if s.atmospheric_phase >= TAU {
                s.atmospheric_phase -= TAU;
            }
            let swell = 1.0
                + ATMOSPHERIC_DEPTH
                    * settings.atmospheric_intensity
                    * s.atmospheric_phase.sin();

            let crackle = if self.rng.gen::<f64>() > crackle_threshold {
                self.rng.gen_range(-1.0..1.0) * settings.crackle_intensity * CRACKLE_GAIN
            } else {
                0.0
            };

            s.atmospheric = SMOOTHING * s.atmospheric + (1.0 - SMOOTHING) * (carrier * swell + crackle);
            let mut sample = chain.process(s.atmospheric * ATMOSPHERIC_GAIN, intensity) * MAKEUP_GAIN;

            if s.resonance_amplitude > 1e-6 {
                sample += s.resonance_amplitude * (TAU * center * t).sin();
                s.resonance_amplitude *= s.resonance_decay;
            }

            if s.drift_amplitude > 1e-6 {
                sample += s.drift_amplitude * (TAU * (center + s.drift_offset) * t).sin();
                s.drift_amplitude *= DRIFT_DECAY;
            }

            if s.fade_depth > 1e-6 {
                sample *= 1.0 - s.fade_depth;
                s.fade_depth *= s.fade_decay;
            }

            if intensity > AM_THRESHOLD {
                s.am_phase += TAU * s.am_frequency / self.sample_rate;
                if s.am_phase >= TAU {
                    s.am_phase -= TAU;
                    s.am_depth = self.rng.gen_range(0.1..0.4);
                    s.am_frequency = self.rng.gen_range(0.2..1.0);
                }
                sample *= 1.0 - s.am_depth * 0.5 * (1.0 + s.am_phase.sin());
            }

            *out = (sample * scale).clamp(i16::MIN as f64, i16::MAX as f64) as i16;
        }

        s.chunk_counter += 1;
        s.sample_position += output.len() as u64;
        self.chain = Some(chain);
        Ok(())
    }

    /// Discard all session state, including the filter chain.
    pub fn reset(&mut self) {
        self.state = NoiseState::default();
        self.chain = None;
    }

    /// Evaluate the wall-clock gated events once per buffer. Each gate makes
    /// at most one draw per window so the event rate is independent of how
    /// often the caller pulls.
    fn update_gates(&mut self, now: u64, settings: &NoiseSettings, intensity: f64) {
        let s = &mut self.state;

        let cooldown_ms = (1000.0 / settings.resonance_jump_rate) as u64;
        let last = *s.last_resonance_ms.get_or_insert(now);
        if now.saturating_sub(last) >= cooldown_ms {
            s.last_resonance_ms = Some(now);
            if self.rng.gen::<f64>() < RESONANCE_PROBABILITY * settings.resonance_jump_rate {
                s.resonance_amplitude = self.rng.gen_range(0.2..0.5);
                trace!("Resonance jump at {} ms", now);
            }
        }

        let drift_interval_ms = (DRIFT_INTERVAL_MS / settings.drift_speed) as u64;
        let last = *s.last_drift_ms.get_or_insert(now);
        if now.saturating_sub(last) >= drift_interval_ms {
            s.last_drift_ms = Some(now);
            let range = DRIFT_RANGE_HZ * intensity;
            s.drift_offset = self.rng.gen_range(-range..=range);
            s.drift_amplitude = DRIFT_LEVEL;
            trace!("Frequency drift {:+.1} Hz at {} ms", s.drift_offset, now);
        }

        if intensity > FADE_THRESHOLD {
            let last = *s.last_fade_ms.get_or_insert(now);
            if now.saturating_sub(last) >= FADE_WINDOW_MS {
                s.last_fade_ms = Some(now);
                if self.rng.gen::<f64>() < FADE_PROBABILITY {
                    s.fade_depth = self.rng.gen_range(0.5..0.9);
                    trace!("Deep fade {:.2} at {} ms", s.fade_depth, now);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use quickcheck_macros::quickcheck;

    const FS: f64 = 44100.0;

    fn engine(clock: &ManualClock, seed: u64) -> NoiseEngine {
        NoiseEngine::new(FS, Arc::new(clock.clone()))
            .unwrap()
            .with_rng_seed(seed)
    }

    fn stormy() -> NoiseSettings {
        NoiseSettings {
            volume: 1.0,
            atmospheric_intensity: 4.0,
            crackle_intensity: 0.1,
            resonance_jump_rate: 1.0,
            drift_speed: 1.0,
            ..NoiseSettings::default()
        }
    }

    #[test]
    fn test_silent_volume_short_circuits() {
        let clock = ManualClock::new(0);
        let mut engine = engine(&clock, 1);
        let settings = NoiseSettings {
            volume: 0.0,
            ..NoiseSettings::default()
        };
        let buffer = engine.generate(2048, &settings).unwrap();
        assert!(buffer.iter().all(|&s| s == 0));
        assert!(engine.chain().is_none());
        assert_eq!(engine.state(), &NoiseState::default());
    }

    #[test]
    fn test_produces_audible_noise() {
        let clock = ManualClock::new(0);
        let mut engine = engine(&clock, 7);
        let buffer = engine.generate(44100, &NoiseSettings::default()).unwrap();
        let nonzero = buffer.iter().filter(|&&s| s != 0).count();
        assert!(nonzero > 40_000);
        assert_eq!(engine.state().chunk_counter, 1);
        assert_eq!(engine.state().sample_position, 44100);
    }

    #[test]
    fn test_settings_clamped() {
        let wild = NoiseSettings {
            volume: 3.0,
            center_frequency: 10.0,
            q_factor: 100.0,
            bandwidth: f64::NAN,
            atmospheric_intensity: 99.0,
            crackle_intensity: -1.0,
            resonance_jump_rate: 0.0,
            drift_speed: 5.0,
            warmth_db: 40.0,
        }
        .clamped();
        assert_eq!(wild.volume, 1.0);
        assert_eq!(wild.center_frequency, 200.0);
        assert_eq!(wild.q_factor, 25.0);
        assert_eq!(wild.bandwidth, NoiseSettings::default().bandwidth);
        assert_eq!(wild.atmospheric_intensity, 4.0);
        assert_eq!(wild.crackle_intensity, 0.01);
        assert_eq!(wild.resonance_jump_rate, 0.1);
        assert_eq!(wild.drift_speed, 1.0);
        assert_eq!(wild.warmth_db, 12.0);
    }

    #[test]
    fn test_settings_deserialize_with_unknown_and_missing_fields() {
        let json = r#"{ "volume": 0.5, "some_future_knob": 3 }"#;
        let settings: NoiseSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.volume, 0.5);
        assert_eq!(settings.center_frequency, 600.0);
    }

    #[test]
    fn test_seeded_engines_are_deterministic() {
        let clock = ManualClock::new(0);
        let mut a = engine(&clock, 42);
        let mut b = engine(&clock, 42);
        let settings = stormy();
        assert_eq!(
            a.generate(4096, &settings).unwrap(),
            b.generate(4096, &settings).unwrap()
        );
    }

    #[test]
    fn test_output_independent_of_buffer_size() {
        let clock = ManualClock::new(0);
        let settings = NoiseSettings::default();

        let mut whole = engine(&clock, 9);
        let single = whole.generate(1024, &settings).unwrap();

        let mut split = engine(&clock, 9);
        let mut halves = split.generate(512, &settings).unwrap();
        halves.extend(split.generate(512, &settings).unwrap());

        assert_eq!(single, halves);
    }

    #[test]
    fn test_uneven_buffers_keep_drift_in_phase() {
        let clock = ManualClock::new(0);
        let settings = NoiseSettings {
            drift_speed: 1.0,
            resonance_jump_rate: 0.1,
            ..NoiseSettings::default()
        };

        let pull = |sizes: &[usize]| {
            let mut engine = engine(&clock, 21);
            engine.generate(256, &settings).unwrap();
            clock.set(3000);
            let mut out = Vec::new();
            for &size in sizes {
                out.extend(engine.generate(size, &settings).unwrap());
                assert!(engine.state().drift_amplitude > 0.0);
            }
            clock.set(0);
            (out, engine.state().sample_position)
        };

        // Symbol-sized buffers: a dit then a dah at 20 WPM, against equal dits
        let (uneven, uneven_position) = pull(&[2646, 7938]);
        let (even, even_position) = pull(&[2646; 4]);
        assert_eq!(uneven.len(), 10584);
        assert_eq!(uneven, even);
        assert_eq!(uneven_position, 256 + 10584);
        assert_eq!(uneven_position, even_position);
    }

    #[test]
    fn test_amplitude_modulation_rerolls_each_cycle() {
        let clock = ManualClock::new(0);
        let defaults = NoiseState::default();

        let mut calm = engine(&clock, 19);
        calm.generate(100_000, &NoiseSettings::default()).unwrap();
        assert_eq!(calm.state().am_phase, 0.0);
        assert_eq!(calm.state().am_depth, defaults.am_depth);

        let settings = stormy();
        assert!(settings.storm_intensity() > AM_THRESHOLD);
        let mut storm = engine(&clock, 19);
        // Half a cycle at the initial 0.5 Hz leaves the draw untouched
        storm.generate(44_100, &settings).unwrap();
        assert!(storm.state().am_phase > 3.0);
        assert_eq!(storm.state().am_frequency, defaults.am_frequency);

        // Past the first full cycle a new depth and rate are drawn
        storm.generate(46_000, &settings).unwrap();
        let state = storm.state();
        assert!((0.0..TAU).contains(&state.am_phase));
        assert_ne!(state.am_frequency, defaults.am_frequency);
        assert!((0.2..1.0).contains(&state.am_frequency));
        assert!((0.1..0.4).contains(&state.am_depth));
    }

    #[test]
    fn test_resonance_jump_after_cooldown() {
        let clock = ManualClock::new(0);
        let mut engine = engine(&clock, 3);
        let settings = stormy();
        engine.generate(256, &settings).unwrap();
        assert_eq!(engine.state().last_resonance_ms, Some(0));

        let mut triggered = false;
        for _ in 0..300 {
            clock.advance(1001);
            engine.generate(256, &settings).unwrap();
            if engine.state().resonance_amplitude > 0.0 {
                triggered = true;
                break;
            }
        }
        assert!(triggered);
    }

    #[test]
    fn test_no_gated_events_without_time_passing() {
        let clock = ManualClock::new(0);
        let mut engine = engine(&clock, 3);
        let settings = stormy();
        for _ in 0..50 {
            engine.generate(1024, &settings).unwrap();
        }
        assert_eq!(engine.state().resonance_amplitude, 0.0);
        assert_eq!(engine.state().drift_amplitude, 0.0);
        assert_eq!(engine.state().fade_depth, 0.0);
    }

    #[test]
    fn test_drift_follows_interval() {
        let clock = ManualClock::new(0);
        let mut engine = engine(&clock, 5);
        let settings = NoiseSettings {
            drift_speed: 1.0,
            ..NoiseSettings::default()
        };
        engine.generate(256, &settings).unwrap();
        clock.advance(2999);
        engine.generate(256, &settings).unwrap();
        assert_eq!(engine.state().drift_amplitude, 0.0);

        clock.advance(1);
        engine.generate(1, &settings).unwrap();
        assert!(engine.state().drift_amplitude > 0.0);
        let range = DRIFT_RANGE_HZ * settings.storm_intensity();
        assert!(engine.state().drift_offset.abs() <= range);
    }

    #[test]
    fn test_deep_fade_only_in_storms() {
        let clock = ManualClock::new(0);
        let mut calm = engine(&clock, 11);
        let calm_settings = NoiseSettings::default();
        let mut storm = engine(&clock, 11);
        let storm_settings = stormy();
        assert!(storm_settings.storm_intensity() > FADE_THRESHOLD);

        let mut faded = false;
        for _ in 0..300 {
            clock.advance(5001);
            calm.generate(64, &calm_settings).unwrap();
            storm.generate(1, &storm_settings).unwrap();
            assert_eq!(calm.state().fade_depth, 0.0);
            if storm.state().fade_depth > 0.0 {
                faded = true;
            }
        }
        assert!(faded);
    }

    #[test]
    fn test_reset_is_idempotent() {
        let clock = ManualClock::new(0);
        let mut engine = engine(&clock, 13);
        engine.generate(4096, &stormy()).unwrap();
        assert!(engine.chain().is_some());

        engine.reset();
        let once = engine.state().clone();
        engine.reset();
        assert_eq!(engine.state(), &once);
        assert_eq!(engine.state(), &NoiseState::default());
        assert!(engine.chain().is_none());
    }

    #[quickcheck]
    fn prop_any_settings_produce_finite_pcm(
        volume: f64,
        center: f64,
        atmospheric: f64,
        crackle: f64,
        warmth: f64,
    ) -> bool {
        let clock = ManualClock::new(0);
        let mut engine = engine(&clock, 17);
        let settings = NoiseSettings {
            volume,
            center_frequency: center,
            atmospheric_intensity: atmospheric,
            crackle_intensity: crackle,
            warmth_db: warmth,
            ..NoiseSettings::default()
        };
        match engine.generate(512, &settings) {
            Ok(buffer) => buffer.len() == 512,
            Err(_) => false,
        }
    }
}
