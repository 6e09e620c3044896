//! cwtrain - Morse code ear trainer
//!
//! Plays lessons and band noise through the sound card or into WAV files.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use cwtrain_audio::prelude::*;
use cwtrain_core::clock::ManualClock;
use cwtrain_core::noise::{NoiseEngine, NoiseSettings};
use cwtrain_core::SAMPLE_RATE;
use cwtrain_morse::cw::{MorseEncoder, MorseTiming, TimingSettings};
use cwtrain_tools::{init_logging, read_wav_file, AnalyzeConfig, SignalAnalyzer, TrainerConfig};

/// Morse code ear trainer
#[derive(Parser)]
#[command(name = "cwtrain")]
#[command(about = "Morse code ear trainer with simulated shortwave noise")]
#[command(version)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,

    /// Settings file (TOML or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play a sequence as Morse
    Play(PlayArgs),
    /// Play background band noise
    Noise(NoiseArgs),
    /// Print the symbol timeline for a sequence
    Encode(EncodeArgs),
    /// Spectrum report for a WAV file
    Analyze(AnalyzeConfig),
    /// Show the effective configuration
    Config(ConfigArgs),
    /// Show defaults and build features
    Info,
}

/// Keying overrides shared by `play` and `encode`
#[derive(Args, Clone, Debug)]
struct TimingArgs {
    /// Character speed in WPM
    #[arg(short, long)]
    wpm: Option<u32>,

    /// Farnsworth (effective) speed in WPM
    #[arg(long)]
    farnsworth: Option<u32>,

    /// Tone frequency in Hz
    #[arg(long)]
    tone: Option<f64>,

    /// Tone volume (0.0-1.0)
    #[arg(long)]
    volume: Option<f64>,

    /// Envelope rise/fall time in ms
    #[arg(long)]
    rise_fall: Option<f64>,
}

impl TimingArgs {
    fn apply(&self, timing: &mut TimingSettings) {
        if let Some(wpm) = self.wpm {
            timing.wpm = wpm;
            if self.farnsworth.is_none() {
                timing.effective_wpm = timing.effective_wpm.min(wpm);
            }
        }
        if let Some(effective) = self.farnsworth {
            timing.effective_wpm = effective;
        }
        if let Some(tone) = self.tone {
            timing.tone_frequency = tone;
        }
        if let Some(volume) = self.volume {
            timing.volume = volume;
        }
        if let Some(rise_fall) = self.rise_fall {
            timing.rise_fall_ms = rise_fall;
        }
    }
}

#[derive(Args, Clone, Debug)]
struct PlayArgs {
    /// Text to send
    text: String,

    #[command(flatten)]
    timing: TimingArgs,

    /// Number of repetitions
    #[arg(short, long)]
    repeat: Option<u32>,

    /// Mix band noise under the tones
    #[arg(long)]
    noise: bool,

    /// Noise volume (0.0-1.0), independent of tone volume
    #[arg(long)]
    noise_volume: Option<f64>,

    /// Render into a WAV file instead of the sound card
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args, Clone, Debug)]
struct NoiseArgs {
    /// Seconds of noise
    #[arg(short, long, default_value = "10.0")]
    duration: f64,

    /// Noise volume (0.0-1.0)
    #[arg(long)]
    volume: Option<f64>,

    /// Atmospheric intensity (0.5-4.0)
    #[arg(long)]
    atmospheric: Option<f64>,

    /// Filter center frequency in Hz
    #[arg(long)]
    center: Option<f64>,

    /// Render into a WAV file instead of the sound card
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args, Clone, Debug)]
struct EncodeArgs {
    /// Text to encode
    text: String,

    #[command(flatten)]
    timing: TimingArgs,

    /// Print symbols as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Clone, Debug)]
struct ConfigArgs {
    /// Print as JSON instead of TOML
    #[arg(long)]
    dump: bool,

    /// Write the configuration to a file (.json or .toml)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn load_config(path: Option<&PathBuf>) -> Result<TrainerConfig> {
    match path {
        Some(path) => {
            info!("Loading settings from {:?}", path);
            TrainerConfig::from_file(path)
        }
        None => Ok(TrainerConfig::default()),
    }
}

fn open_engine(output: Option<&PathBuf>) -> PlaybackEngine {
    match output {
        Some(path) => PlaybackEngine::new(WavDevice::new(path)),
        None => speaker_engine(),
    }
}

#[cfg(feature = "cpal")]
fn speaker_engine() -> PlaybackEngine {
    PlaybackEngine::new(CpalDevice::new())
}

#[cfg(not(feature = "cpal"))]
fn speaker_engine() -> PlaybackEngine {
    tracing::warn!("Built without the `cpal` feature; audio output is discarded");
    PlaybackEngine::new(NullDevice::realtime())
}

fn run_play(config: TrainerConfig, args: PlayArgs) -> Result<()> {
    let mut config = config;
    args.timing.apply(&mut config.timing);
    if let Some(repeat) = args.repeat {
        config.playback.repeat_count = repeat;
    }
    if args.noise {
        config.playback.mix_noise = true;
    }
    if let Some(volume) = args.noise_volume {
        config.noise.volume = volume;
    }
    let config = config.clamped();

    let engine = open_engine(args.output.as_ref());
    let player = SequencePlayer::new(engine.clone());
    let request = config.request(&args.text);
    let total_ms = player.total_duration_ms(&request);

    info!(
        "Playing {:?} at {}/{} WPM, {} ms",
        args.text, config.timing.wpm, config.timing.effective_wpm, total_ms
    );
    let outcome = player.play_sequence(&request);
    engine.release();

    match outcome.context("Playback failed")? {
        PlaybackOutcome::Completed => match &args.output {
            Some(path) => println!("✓ Lesson rendered to {:?} ({} ms)", path, total_ms),
            None => println!("✓ Played {} ms", total_ms),
        },
        PlaybackOutcome::Cancelled => println!("Playback cancelled"),
    }
    Ok(())
}

fn run_noise(config: TrainerConfig, args: NoiseArgs) -> Result<()> {
    let mut settings: NoiseSettings = config.noise;
    if let Some(volume) = args.volume {
        settings.volume = volume;
    }
    if let Some(atmospheric) = args.atmospheric {
        settings.atmospheric_intensity = atmospheric;
    }
    if let Some(center) = args.center {
        settings.center_frequency = center;
    }
    let settings = settings.clamped();
    let duration = args.duration.max(0.0);
    let engine = open_engine(args.output.as_ref());

    match &args.output {
        Some(path) => {
            // Gated effects follow the rendered position, not the wall clock
            let clock = Arc::new(ManualClock::new(0));
            let mut generator = NoiseEngine::new(SAMPLE_RATE as f64, clock.clone())?;
            let total = (duration * SAMPLE_RATE as f64).round() as usize;
            let chunk = config.playback.chunk_size.max(1);

            let mut samples = Vec::with_capacity(total);
            while samples.len() < total {
                clock.set(samples.len() as u64 * 1000 / SAMPLE_RATE as u64);
                let n = chunk.min(total - samples.len());
                samples.extend(generator.generate(n, &settings)?);
            }
            engine.play(&samples).context("Failed to write noise")?;
            engine.release();
            println!("✓ {:.1} s of noise rendered to {:?}", duration, path);
        }
        None => {
            let stream = NoiseStream::new(engine.clone()).with_chunk_size(config.playback.chunk_size);
            stream.start(settings)?;
            std::thread::sleep(Duration::from_secs_f64(duration));
            stream.stop()?;
            engine.release();
            println!("✓ Played {:.1} s of noise", duration);
        }
    }
    Ok(())
}

fn run_encode(config: TrainerConfig, args: EncodeArgs) -> Result<()> {
    let mut timing = config.timing;
    args.timing.apply(&mut timing);
    let timing = timing.clamped();

    let encoder = MorseEncoder::new();
    let symbols = encoder.encode(&args.text, &timing);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&symbols)?);
        return Ok(());
    }

    let patterns: Vec<String> = args
        .text
        .split_whitespace()
        .map(|word| {
            word.chars()
                .filter_map(|ch| encoder.pattern(ch))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect();
    println!("Pattern: {}", patterns.join(" / "));

    let t = MorseTiming::from_settings(&timing);
    println!(
        "Timing:  dot {} ms, dash {} ms, element {} ms, char {} ms, word {} ms",
        t.dot_ms, t.dash_ms, t.element_space_ms, t.char_space_ms, t.word_space_ms
    );

    let mut at_ms = 0u64;
    for symbol in &symbols {
        println!("{:>8} ms  {:<12} {:>5} ms", at_ms, format!("{:?}", symbol.kind), symbol.duration_ms);
        at_ms += symbol.duration_ms as u64;
    }
    println!("Total:   {} symbols, {} ms", symbols.len(), at_ms);
    Ok(())
}

fn run_analyze(args: AnalyzeConfig) -> Result<()> {
    let (samples, sample_rate) = read_wav_file(&args.input)?;
    let mut analyzer = SignalAnalyzer::new(args.fft_size, sample_rate as f64)?;
    let result = analyzer.analyze(&samples, args.spectrum)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!("File:       {:?}", args.input);
    println!("Samples:    {} ({:.2} s at {} Hz)", result.sample_count, result.duration_s, sample_rate);
    println!("Power:      {:.2} dBFS", result.power_dbfs());
    println!("Peak:       {:.4}", result.peak_amplitude);
    match result.dominant_frequency {
        Some(frequency) => println!("Dominant:   {:.1} Hz", frequency),
        None => println!("Dominant:   - (silent)"),
    }
    Ok(())
}

fn run_config(config: TrainerConfig, args: ConfigArgs) -> Result<()> {
    let config = config.clamped();
    if let Some(path) = &args.output {
        config.save_to_file(path)?;
        println!("✓ Configuration written to {:?}", path);
    } else if args.dump {
        println!("{}", serde_json::to_string_pretty(&config)?);
    } else {
        println!("{}", toml::to_string_pretty(&config)?);
    }
    Ok(())
}

fn show_info() {
    let timing = TimingSettings::default();
    let noise = NoiseSettings::default();
    let t = MorseTiming::from_settings(&timing);

    println!("\n=== cwtrain Morse Trainer ===");
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!("Output:  mono 16-bit PCM at {} Hz", SAMPLE_RATE);
    println!(
        "Device:  {}",
        if cfg!(feature = "cpal") {
            "sound card (cpal)"
        } else {
            "silent (build with --features cpal for sound)"
        }
    );

    println!("\n=== Default Timing ===");
    println!("  • {} WPM, tone {} Hz, volume {}", timing.wpm, timing.tone_frequency, timing.volume);
    println!("  • dot {} ms, dash {} ms, word space {} ms", t.dot_ms, t.dash_ms, t.word_space_ms);

    println!("\n=== Default Noise ===");
    println!("  • volume {}, center {} Hz, bandwidth {} Hz", noise.volume, noise.center_frequency, noise.bandwidth);
    println!("  • atmospheric {}, crackle {}", noise.atmospheric_intensity, noise.crackle_intensity);

    println!("\n=== Example Usage ===");
    println!("  Play:     cwtrain play \"CQ CQ DE N0CALL\" -w 25 --farnsworth 15 --noise");
    println!("  Render:   cwtrain play PARIS -r 3 -o paris.wav");
    println!("  Noise:    cwtrain noise -d 30 --atmospheric 3.0");
    println!("  Timeline: cwtrain encode SOS");
    println!("  Analyze:  cwtrain analyze -i paris.wav");
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.debug);

    info!("cwtrain starting");

    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Play(args) => run_play(config, args)?,
        Commands::Noise(args) => run_noise(config, args)?,
        Commands::Encode(args) => run_encode(config, args)?,
        Commands::Analyze(args) => run_analyze(args)?,
        Commands::Config(args) => run_config(config, args)?,
        Commands::Info => show_info(),
    }

    Ok(())
}
