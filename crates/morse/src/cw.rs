//! CW (Morse code) timing and encoding
//!
//! Timing follows the PARIS standard: one dot lasts `1200 / WPM` ms.
//! Farnsworth spacing keeps dits and dahs at the character speed and
//! stretches the character and word gaps by `WPM / effective WPM`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Keying parameters as stored by the settings collaborator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSettings {
    /// Character speed in words per minute
    pub wpm: u32,

    /// Farnsworth (effective) speed, never above `wpm`
    pub effective_wpm: u32,

    /// Tone frequency in Hz
    pub tone_frequency: f64,

    /// Tone volume (0.0 to 1.0)
    pub volume: f64,

    /// Rise/fall time for keying shaping (milliseconds)
    pub rise_fall_ms: f64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            wpm: 20,
            effective_wpm: 20,
            tone_frequency: 600.0,
            volume: 0.8,
            rise_fall_ms: 10.0,
        }
    }
}

impl TimingSettings {
    pub const MIN_WPM: u32 = 1;
    pub const MAX_WPM: u32 = 50;

    /// Create settings without Farnsworth spacing
    pub fn new(wpm: u32, tone_frequency: f64) -> Self {
        Self {
            wpm,
            effective_wpm: wpm,
            tone_frequency,
            ..Self::default()
        }
    }

    /// Set the Farnsworth speed
    pub fn with_effective_wpm(mut self, effective_wpm: u32) -> Self {
        self.effective_wpm = effective_wpm;
        self
    }

    /// Copy with every field forced into its safe range. The effective
    /// speed is capped at the character speed.
    pub fn clamped(&self) -> Self {
        let d = Self::default();
        let wpm = self.wpm.clamp(Self::MIN_WPM, Self::MAX_WPM);
        Self {
            wpm,
            effective_wpm: self.effective_wpm.clamp(Self::MIN_WPM, wpm),
            tone_frequency: clamp_field(self.tone_frequency, 300.0, 1000.0, d.tone_frequency),
            volume: clamp_field(self.volume, 0.0, 1.0, d.volume),
            rise_fall_ms: clamp_field(self.rise_fall_ms, 1.0, 50.0, d.rise_fall_ms),
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

/// Element and gap durations in whole milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MorseTiming {
    pub dot_ms: u32,
    pub dash_ms: u32,
    pub element_space_ms: u32,
    pub char_space_ms: u32,
    pub word_space_ms: u32,
}

impl MorseTiming {
    /// Compute timing from (clamped) settings.
    pub fn from_settings(settings: &TimingSettings) -> Self {
        let settings = settings.clamped();
        let dot_ms = (1200.0 / settings.wpm as f64).round() as u32;

        let (char_space_ms, word_space_ms) = if settings.effective_wpm < settings.wpm {
            let ratio = settings.effective_wpm as f64 / settings.wpm as f64;
            (
                (3.0 * dot_ms as f64 / ratio).round() as u32,
                (7.0 * dot_ms as f64 / ratio).round() as u32,
            )
        } else {
            (3 * dot_ms, 7 * dot_ms)
        };

        Self {
            dot_ms,
            dash_ms: 3 * dot_ms,
            element_space_ms: dot_ms,
            char_space_ms,
            word_space_ms,
        }
    }

    /// Duration of a symbol kind
    pub fn duration_of(&self, kind: SymbolKind) -> u32 {
        match kind {
            SymbolKind::Dit => self.dot_ms,
            SymbolKind::Dah => self.dash_ms,
            SymbolKind::ElementSpace => self.element_space_ms,
            SymbolKind::CharSpace => self.char_space_ms,
            SymbolKind::WordSpace => self.word_space_ms,
        }
    }
}

/// Morse code element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SymbolKind {
    Dit,
    Dah,
    ElementSpace,
    CharSpace,
    WordSpace,
}

impl SymbolKind {
    /// Key-down elements
    pub fn is_tone(self) -> bool {
        matches!(self, SymbolKind::Dit | SymbolKind::Dah)
    }
}

/// One timed element of an encoded sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MorseSymbol {
    pub kind: SymbolKind,
    pub duration_ms: u32,
}

impl MorseSymbol {
    pub fn is_tone(&self) -> bool {
        self.kind.is_tone()
    }
}

/// Morse code encoder
pub struct MorseEncoder {
    morse_table: HashMap<char, &'static str>,
}

impl Default for MorseEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl MorseEncoder {
    /// Create a new encoder with the standard ITU table
    pub fn new() -> Self {
        let mut encoder = Self {
            morse_table: HashMap::new(),
        };
        encoder.init_morse_table();
        encoder
    }

    /// Initialize the Morse code lookup table
    fn init_morse_table(&mut self) {
        const TABLE: &[(char, &str)] = &[
            // Letters
            ('A', ".-"),
            ('B', "-..."),
            ('C', "-.-."),
            ('D', "-.."),
            ('E', "."),
            ('F', "..-."),
            ('G', "--."),
            ('H', "...."),
            ('I', ".."),
            ('J', ".---"),
            ('K', "-.-"),
            ('L', ".-.."),
            ('M', "--"),
            ('N', "-."),
            ('O', "---"),
            ('P', ".--."),
            ('Q', "--.-"),
            ('R', ".-."),
            ('S', "..."),
            ('T', "-"),
            ('U', "..-"),
            ('V', "...-"),
            ('W', ".--"),
            ('X', "-..-"),
            ('Y', "-.--"),
            ('Z', "--.."),
            // Numbers
            ('0', "-----"),
            ('1', ".----"),
            ('2', "..---"),
            ('3', "...--"),
            ('4', "....-"),
            ('5', "....."),
            ('6', "-...."),
            ('7', "--..."),
            ('8', "---.."),
            ('9', "----."),
            // Punctuation
            ('.', ".-.-.-"),
            (',', "--..--"),
            ('?', "..--.."),
            ('/', "-..-."),
            ('-', "-....-"),
            ('=', "-...-"),
            ('\'', ".----."),
            ('!', "-.-.--"),
            ('(', "-.--."),
            (')', "-.--.-"),
            ('&', ".-..."),
            (':', "---..."),
            (';', "-.-.-."),
            ('+', ".-.-."),
            ('"', ".-..-."),
            ('@', ".--.-."),
            ('_', "..--.-"),
            ('$', "...-..-"),
        ];

        self.morse_table.extend(TABLE.iter().copied());
    }

    /// Dot/dash pattern for a character, case-insensitive
    pub fn pattern(&self, ch: char) -> Option<&'static str> {
        self.morse_table.get(&ch.to_ascii_uppercase()).copied()
    }

    /// Whether the character has a Morse mapping
    pub fn is_mappable(&self, ch: char) -> bool {
        self.pattern(ch).is_some()
    }

    /// Encode `sequence` into timed symbols.
    ///
    /// Unmapped characters are skipped. A run of whitespace becomes a single
    /// word space (replacing the character space); leading whitespace is
    /// dropped, trailing whitespace is kept.
    pub fn encode(&self, sequence: &str, settings: &TimingSettings) -> Vec<MorseSymbol> {
        let timing = MorseTiming::from_settings(settings);
        let symbol = |kind| MorseSymbol {
            kind,
            duration_ms: timing.duration_of(kind),
        };

        let mut symbols = Vec::new();
        let mut pending_gap: Option<SymbolKind> = None;
        let mut emitted_any = false;
        let mut skipped = 0usize;

        for ch in sequence.chars() {
            if ch.is_whitespace() {
                if emitted_any {
                    pending_gap = Some(SymbolKind::WordSpace);
                }
                continue;
            }

            // Unknown characters are skipped
            let Some(pattern) = self.pattern(ch) else {
                skipped += 1;
                continue;
            };

            if let Some(gap) = pending_gap.take() {
                symbols.push(symbol(gap));
            }

            for (i, element) in pattern.chars().enumerate() {
                if i > 0 {
                    symbols.push(symbol(SymbolKind::ElementSpace));
                }
                symbols.push(symbol(if element == '-' {
                    SymbolKind::Dah
                } else {
                    SymbolKind::Dit
                }));
            }

            emitted_any = true;
            pending_gap = Some(SymbolKind::CharSpace);
        }

        if pending_gap == Some(SymbolKind::WordSpace) {
            symbols.push(symbol(SymbolKind::WordSpace));
        }

        if skipped > 0 {
            debug!("Skipped {} unmapped characters", skipped);
        }

        symbols
    }
}

/// Split off a trailing word space, if any.
pub fn split_trailing_space(symbols: &[MorseSymbol]) -> (&[MorseSymbol], Option<&MorseSymbol>) {
    match symbols.split_last() {
        Some((last, body)) if last.kind == SymbolKind::WordSpace => (body, Some(last)),
        _ => (symbols, None),
    }
}

/// Sum of symbol durations, repeated `repeat_count` times with one word
/// space between repetitions. A trailing word space doubles as that gap.
pub fn total_duration_ms(symbols: &[MorseSymbol], repeat_count: u32, timing: &MorseTiming) -> u64 {
    if symbols.is_empty() || repeat_count == 0 {
        return 0;
    }
    let (body, tail) = split_trailing_space(symbols);
    let once: u64 = body.iter().map(|s| s.duration_ms as u64).sum();
    let tail = tail.map_or(0, |s| s.duration_ms as u64);
    once * repeat_count as u64 + (repeat_count as u64 - 1) * timing.word_space_ms as u64 + tail
}
