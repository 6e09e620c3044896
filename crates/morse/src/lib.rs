//! cwtrain Morse - timing, encoding and tone synthesis
//!
//! Turns a character sequence into timed dit/dah/spacing symbols and
//! renders keyed tone bursts for them.

pub mod cw;
pub mod tone;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::{
        cw::{MorseEncoder, MorseSymbol, MorseTiming, SymbolKind, TimingSettings},
        tone::ToneSynthesizer,
    };
}
