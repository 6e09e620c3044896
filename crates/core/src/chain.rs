//! Receiver filter chain
//!
//! Fixed topology modelling a CW receiver's IF/AF path:
//!
//! ```text
//! bandpass -> bandpass (+30 Hz, Q x0.8) -> warmth (peaking)
//!          -> [notch, 10% wet] -> [allpass, 5% wet] -> lowpass limiter
//! ```
//!
//! Both bandpass centres wobble slowly under their own LFO. The notch and
//! allpass stages come alive once atmospheric intensity crosses 2.0 and
//! 4.0 and stay alive for the lifetime of the chain.

use crate::filter::{BiquadFilter, FilterType};
use crate::Result;
use std::f64::consts::TAU;
use tracing::debug;

/// Detune of the secondary bandpass above the primary
const SECONDARY_DETUNE_HZ: f64 = 30.0;
const SECONDARY_Q_RATIO: f64 = 0.8;
const BANDPASS_Q_RANGE: (f64, f64) = (1.0, 50.0);

/// Intensity at which the notch stage is engaged
pub const NOTCH_THRESHOLD: f64 = 2.0;
/// Intensity at which the allpass stage is engaged
pub const ALLPASS_THRESHOLD: f64 = 4.0;

const NOTCH_WET: f64 = 0.1;
const ALLPASS_WET: f64 = 0.05;
const NOTCH_OFFSET_HZ: f64 = 180.0;
const NOTCH_Q: f64 = 4.0;
const ALLPASS_Q: f64 = 0.7;

const LIMITER_FREQUENCY: f64 = 3200.0;
const LIMITER_Q: f64 = 0.707;

// LFO rates in Hz
const PRIMARY_LFO_HZ: f64 = 0.13;
const SECONDARY_LFO_HZ: f64 = 0.071;
const NOTCH_LFO_HZ: f64 = 0.037;

/// Upper bound of the LFO frequency excursion in Hz
const PRIMARY_FM_DEPTH: f64 = 3.0;
const SECONDARY_FM_DEPTH: f64 = 2.0;
const NOTCH_FM_DEPTH: f64 = 5.0;

/// Parameter set driving [`FilterChain::update_parameters`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChainParameters {
    pub center_frequency: f64,
    pub resonance: f64,
    pub bandwidth: f64,
    pub warmth_db: f64,
    pub atmospheric_intensity: f64,
}

/// An optional colouring stage that is built once and never torn down.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorStage {
    enabled: bool,
    filter: Option<BiquadFilter>,
    wet: f64,
}

impl ColorStage {
    fn dormant(wet: f64) -> Self {
        Self {
            enabled: false,
            filter: None,
            wet,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn filter(&self) -> Option<&BiquadFilter> {
        self.filter.as_ref()
    }

    /// Build the stage on first call; later calls only retune it.
    fn engage(&mut self, build: impl FnOnce() -> Result<BiquadFilter>) -> Result<&mut BiquadFilter> {
        let filter = match self.filter.take() {
            Some(filter) => filter,
            None => build()?,
        };
        self.enabled = true;
        Ok(self.filter.insert(filter))
    }

    #[inline]
    fn process(&mut self, input: f64) -> f64 {
        match (&mut self.filter, self.enabled) {
            (Some(filter), true) => (1.0 - self.wet) * input + self.wet * filter.process(input),
            _ => input,
        }
    }

    fn reset(&mut self) {
        if let Some(filter) = self.filter.as_mut() {
            filter.reset();
        }
    }
}

/// LFO phase accumulators, one per modulated stage
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LfoPhases {
    pub primary: f64,
    pub secondary: f64,
    pub notch: f64,
}

/// Cascaded receiver filter bank
#[derive(Debug, Clone, PartialEq)]
pub struct FilterChain {
    sample_rate: f64,
    primary: BiquadFilter,
    secondary: BiquadFilter,
    warmth: BiquadFilter,
    limiter: BiquadFilter,
    notch: ColorStage,
    allpass: ColorStage,
    lfo: LfoPhases,
    primary_center: f64,
    secondary_center: f64,
    notch_center: f64,
}

impl FilterChain {
    /// Build the chain and tune it to `params`.
    pub fn new(sample_rate: f64, params: &ChainParameters) -> Result<Self> {
        let center = params.center_frequency;
        let mut chain = Self {
            sample_rate,
            primary: BiquadFilter::bandpass(sample_rate, center, 1.0)?,
            secondary: BiquadFilter::bandpass(sample_rate, center + SECONDARY_DETUNE_HZ, 1.0)?,
            warmth: BiquadFilter::peaking(sample_rate, center, 1.0, 0.0)?,
            limiter: BiquadFilter::lowpass(sample_rate, LIMITER_FREQUENCY, LIMITER_Q)?,
            notch: ColorStage::dormant(NOTCH_WET),
            allpass: ColorStage::dormant(ALLPASS_WET),
            lfo: LfoPhases::default(),
            primary_center: center,
            secondary_center: center + SECONDARY_DETUNE_HZ,
            notch_center: center + NOTCH_OFFSET_HZ,
        };
        chain.update_parameters(params)?;
        Ok(chain)
    }

    /// Retune every stage. Escalates the optional stages when the
    /// intensity crosses their thresholds.
    pub fn update_parameters(&mut self, params: &ChainParameters) -> Result<()> {
        let center = params.center_frequency;
        let bandwidth = params.bandwidth.max(1.0);
        let q = (center / bandwidth).clamp(BANDPASS_Q_RANGE.0, BANDPASS_Q_RANGE.1);

        self.primary_center = center;
        self.secondary_center = center + SECONDARY_DETUNE_HZ;
        self.notch_center = center + NOTCH_OFFSET_HZ;

        self.primary.set_frequency(self.primary_center);
        self.primary.set_q(q);
        self.secondary.set_frequency(self.secondary_center);
        self.secondary.set_q(q * SECONDARY_Q_RATIO);

        self.warmth.set_frequency(center);
        self.warmth.set_q(params.resonance);
        self.warmth.set_gain(params.warmth_db * bandwidth_scale(bandwidth));

        let intensity = params.atmospheric_intensity;
        let sample_rate = self.sample_rate;
        if intensity > NOTCH_THRESHOLD {
            let notch_center = self.notch_center;
            let was_enabled = self.notch.is_enabled();
            let notch = self.notch.engage(|| {
                BiquadFilter::new(FilterType::Notch, sample_rate, notch_center, NOTCH_Q, 0.0)
            })?;
            notch.set_frequency(notch_center);
            if !was_enabled {
                debug!("Notch stage engaged at intensity {:.2}", intensity);
            }
        } else if let Some(notch) = self.notch.filter.as_mut() {
            notch.set_frequency(self.notch_center);
        }

        if intensity > ALLPASS_THRESHOLD {
            let was_enabled = self.allpass.is_enabled();
            let allpass = self.allpass.engage(|| {
                BiquadFilter::new(FilterType::Allpass, sample_rate, center, ALLPASS_Q, 0.0)
            })?;
            allpass.set_frequency(center);
            if !was_enabled {
                debug!("Allpass stage engaged at intensity {:.2}", intensity);
            }
        } else if let Some(allpass) = self.allpass.filter.as_mut() {
            allpass.set_frequency(center);
        }

        Ok(())
    }

    /// Filter one sample, advancing the LFOs by one sample period.
    pub fn process(&mut self, input: f64, atmospheric_intensity: f64) -> f64 {
        let dt = 1.0 / self.sample_rate;
        self.lfo.primary = advance_phase(self.lfo.primary, PRIMARY_LFO_HZ, dt);
        self.lfo.secondary = advance_phase(self.lfo.secondary, SECONDARY_LFO_HZ, dt);
        self.lfo.notch = advance_phase(self.lfo.notch, NOTCH_LFO_HZ, dt);

        let intensity = atmospheric_intensity.max(0.0);
        let primary_offset = PRIMARY_FM_DEPTH.min(intensity) * self.lfo.primary.sin();
        let secondary_offset = SECONDARY_FM_DEPTH.min(intensity * 0.5) * self.lfo.secondary.sin();
        self.primary.set_frequency(self.primary_center + primary_offset);
        self.secondary.set_frequency(self.secondary_center + secondary_offset);

        if let (true, Some(notch)) = (self.notch.enabled, self.notch.filter.as_mut()) {
            let offset = NOTCH_FM_DEPTH.min(intensity) * self.lfo.notch.sin();
            notch.set_frequency(self.notch_center + offset);
        }

        let mut sample = self.primary.process(input);
        sample = self.secondary.process(sample);
        sample = self.warmth.process(sample);
        sample = self.notch.process(sample);
        sample = self.allpass.process(sample);
        self.limiter.process(sample)
    }

    /// Clear every stage's history and rewind the LFOs.
    pub fn reset(&mut self) {
        self.primary.reset();
        self.secondary.reset();
        self.warmth.reset();
        self.limiter.reset();
        self.notch.reset();
        self.allpass.reset();
        self.lfo = LfoPhases::default();
    }

    pub fn lfo_phases(&self) -> LfoPhases {
        self.lfo
    }

    pub fn notch(&self) -> &ColorStage {
        &self.notch
    }

    pub fn allpass(&self) -> &ColorStage {
        &self.allpass
    }

    pub fn primary(&self) -> &BiquadFilter {
        &self.primary
    }

    pub fn secondary(&self) -> &BiquadFilter {
        &self.secondary
    }

    pub fn warmth(&self) -> &BiquadFilter {
        &self.warmth
    }

    /// Untouched centre frequency of the primary bandpass
    pub fn center_frequency(&self) -> f64 {
        self.primary_center
    }
}

/// Narrow passbands get more warmth, wide ones less.
pub fn bandwidth_scale(bandwidth: f64) -> f64 {
    if bandwidth < 200.0 {
        1.5
    } else if bandwidth > 800.0 {
        0.6
    } else {
        1.0
    }
}

#[inline]
fn advance_phase(phase: f64, frequency: f64, dt: f64) -> f64 {
    let next = phase + TAU * frequency * dt;
    if next >= TAU {
        next.rem_euclid(TAU)
    } else {
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FS: f64 = 44100.0;

    fn params(intensity: f64) -> ChainParameters {
        ChainParameters {
            center_frequency: 600.0,
            resonance: 5.0,
            bandwidth: 300.0,
            warmth_db: 6.0,
            atmospheric_intensity: intensity,
        }
    }

    #[test]
    fn test_stage_tuning() {
        let chain = FilterChain::new(FS, &params(1.0)).unwrap();
        assert_eq!(chain.primary().frequency(), 600.0);
        assert_eq!(chain.primary().q(), 2.0);
        assert_eq!(chain.secondary().frequency(), 630.0);
        assert!((chain.secondary().q() - 1.6).abs() < 1e-12);
        assert_eq!(chain.warmth().gain_db(), 6.0);
        assert_eq!(chain.warmth().q(), 5.0);
    }

    #[test]
    fn test_bandpass_q_clamped() {
        let mut p = params(1.0);
        p.bandwidth = 5.0;
        let chain = FilterChain::new(FS, &p).unwrap();
        // 600 / 5 = 120 clamps to 50, then the biquad caps at 30
        assert_eq!(chain.primary().q(), 30.0);

        p.bandwidth = 3000.0;
        let chain = FilterChain::new(FS, &p).unwrap();
        assert_eq!(chain.primary().q(), 1.0);
    }

    #[test]
    fn test_bandwidth_scale_applied_to_warmth() {
        assert_eq!(bandwidth_scale(100.0), 1.5);
        assert_eq!(bandwidth_scale(500.0), 1.0);
        assert_eq!(bandwidth_scale(1000.0), 0.6);

        let mut p = params(1.0);
        p.bandwidth = 100.0;
        let chain = FilterChain::new(FS, &p).unwrap();
        assert!((chain.warmth().gain_db() - 9.0).abs() < 1e-12);
    }

    #[test]
    fn test_optional_stages_escalate_one_way() {
        let mut chain = FilterChain::new(FS, &params(1.0)).unwrap();
        assert!(!chain.notch().is_enabled());
        assert!(!chain.allpass().is_enabled());

        chain.update_parameters(&params(2.5)).unwrap();
        assert!(chain.notch().is_enabled());
        assert!(!chain.allpass().is_enabled());

        chain.update_parameters(&params(4.5)).unwrap();
        assert!(chain.allpass().is_enabled());

        // Dropping the intensity keeps both stages alive
        chain.update_parameters(&params(0.5)).unwrap();
        assert!(chain.notch().is_enabled());
        assert!(chain.allpass().is_enabled());

        let mut p = params(0.5);
        p.center_frequency = 700.0;
        chain.update_parameters(&p).unwrap();
        assert_eq!(chain.notch().filter().unwrap().frequency(), 700.0 + NOTCH_OFFSET_HZ);
    }

    #[test]
    fn test_color_stages_mix_lightly() {
        let mut chain = FilterChain::new(FS, &params(4.5)).unwrap();
        let mut notch = chain.notch().filter().unwrap().clone();
        let mut allpass = chain.allpass().filter().unwrap().clone();

        let mut coloured = false;
        for n in 0..512 {
            let x = (TAU * 780.0 * n as f64 / FS).sin();

            let wet = notch.process(x);
            let y = chain.notch.process(x);
            assert!((y - (0.9 * x + 0.1 * wet)).abs() < 1e-12);
            coloured |= (y - x).abs() > 1e-6;

            let wet = allpass.process(x);
            let y = chain.allpass.process(x);
            assert!((y - (0.95 * x + 0.05 * wet)).abs() < 1e-12);
        }
        assert!(coloured);

        let mut dormant = ColorStage::dormant(NOTCH_WET);
        assert_eq!(dormant.process(0.5), 0.5);
    }

    #[test]
    fn test_lfo_phases_wrap() {
        let mut chain = FilterChain::new(FS, &params(1.0)).unwrap();
        // Slightly more than one full primary LFO period
        let samples = (FS / PRIMARY_LFO_HZ) as usize + 10;
        for _ in 0..samples {
            chain.process(0.0, 1.0);
        }
        let phases = chain.lfo_phases();
        for phase in [phases.primary, phases.secondary, phases.notch] {
            assert!((0.0..TAU).contains(&phase));
        }
        assert!(phases.primary < 0.1);
    }

    #[test]
    fn test_fm_offset_bounded() {
        let mut chain = FilterChain::new(FS, &params(10.0)).unwrap();
        for _ in 0..(FS as usize * 4) {
            chain.process(0.0, 10.0);
            let drift = (chain.primary().frequency() - 600.0).abs();
            assert!(drift <= PRIMARY_FM_DEPTH + 1e-9);
        }
    }

    #[test]
    fn test_output_is_finite_and_bounded() {
        let mut chain = FilterChain::new(FS, &params(4.5)).unwrap();
        let mut peak = 0.0f64;
        for n in 0..44100 {
            let x = (TAU * 600.0 * n as f64 / FS).sin();
            let y = chain.process(x, 4.5);
            assert!(y.is_finite());
            peak = peak.max(y.abs());
        }
        assert!(peak > 0.1);
        assert!(peak < 10.0);
    }

    #[test]
    fn test_reset_is_idempotent() {
        let mut chain = FilterChain::new(FS, &params(4.5)).unwrap();
        for n in 0..1000 {
            chain.process((n as f64 * 0.37).sin(), 4.5);
        }
        chain.reset();
        let once = chain.clone();
        chain.reset();
        assert_eq!(chain, once);
        assert_eq!(chain.lfo_phases(), LfoPhases::default());
        assert_eq!(chain.primary().history(), Default::default());
    }
}
