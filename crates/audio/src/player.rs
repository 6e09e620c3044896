//! Lesson playback
//!
//! Turns a character sequence into audio: encode once, then for each
//! repetition synthesize every symbol and write it through the engine,
//! optionally mixed with band noise.

use crate::cancel::{lock, CancellationToken};
use crate::device::TransferMode;
use crate::engine::{DeviceLease, PlaybackEngine, PlaybackOutcome};
use crate::mixer::mix_mean;
use crate::{AudioError, Result};
use cwtrain_core::clock::{Clock, SystemClock};
use cwtrain_core::noise::{NoiseEngine, NoiseSettings};
use cwtrain_morse::cw::{
    split_trailing_space, total_duration_ms, MorseEncoder, MorseSymbol, MorseTiming, TimingSettings,
};
use cwtrain_morse::tone::ToneSynthesizer;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::io;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where the player is in a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayerState {
    Ready,
    Playing,
    /// In the word space between two repetitions
    WaitingForRepeat,
    Done,
}

/// One "play this sequence" call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackRequest {
    pub sequence: String,
    pub timing: TimingSettings,
    /// Zero is treated as one
    pub repeat_count: u32,
    /// Mix band noise under the tones when set
    pub noise: Option<NoiseSettings>,
}

impl PlaybackRequest {
    pub fn new(sequence: impl Into<String>, timing: TimingSettings) -> Self {
        Self {
            sequence: sequence.into(),
            timing,
            repeat_count: 1,
            noise: None,
        }
    }

    pub fn with_repeats(mut self, repeat_count: u32) -> Self {
        self.repeat_count = repeat_count;
        self
    }

    pub fn with_noise(mut self, noise: NoiseSettings) -> Self {
        self.noise = Some(noise);
        self
    }

    fn repeats(&self) -> u32 {
        self.repeat_count.max(1)
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Clone)]
struct Session {
    encoder: Arc<MorseEncoder>,
    synth: ToneSynthesizer,
    state: Arc<Mutex<PlayerState>>,
    clock: Arc<dyn Clock>,
    noise_seed: Option<u64>,
}

impl Session {
    fn set_state(&self, state: PlayerState) {
        *lock(&self.state) = state;
    }

    fn run(&self, lease: &mut DeviceLease, request: &PlaybackRequest) -> Result<PlaybackOutcome> {
        let symbols = self.encoder.encode(&request.sequence, &request.timing);
        if symbols.is_empty() {
            debug!("Nothing to play for {:?}", request.sequence);
            return Ok(PlaybackOutcome::Completed);
        }

        let timing = MorseTiming::from_settings(&request.timing);
        let mut noise = match request.noise {
            Some(settings) => {
                let engine = NoiseEngine::new(lease.sample_rate() as f64, Arc::clone(&self.clock))?;
                let engine = match self.noise_seed {
                    Some(seed) => engine.with_rng_seed(seed),
                    None => engine,
                };
                Some((engine, settings))
            }
            None => None,
        };

        let repeats = request.repeats();
        // A trailing word space is played once, after the last repetition
        let (body, tail) = split_trailing_space(&symbols);
        info!(
            "Playing {} symbols x{} at {} WPM",
            symbols.len(),
            repeats,
            request.timing.wpm
        );

        for repeat in 0..repeats {
            if lease.is_cancelled() {
                return Ok(PlaybackOutcome::Cancelled);
            }
            if repeat > 0 {
                self.set_state(PlayerState::WaitingForRepeat);
                if !self.gap(lease, noise.as_mut(), timing.word_space_ms)? {
                    return Ok(PlaybackOutcome::Cancelled);
                }
                self.set_state(PlayerState::Playing);
            }

            for symbol in body {
                if lease.is_cancelled() {
                    return Ok(PlaybackOutcome::Cancelled);
                }
                if !self.symbol(lease, noise.as_mut(), symbol, &request.timing)? {
                    return Ok(PlaybackOutcome::Cancelled);
                }
            }
        }

        if let Some(symbol) = tail {
            if lease.is_cancelled()
                || !self.symbol(lease, noise.as_mut(), symbol, &request.timing)?
            {
                return Ok(PlaybackOutcome::Cancelled);
            }
        }

        lease.drain()?;
        Ok(PlaybackOutcome::Completed)
    }

    fn symbol(
        &self,
        lease: &mut DeviceLease,
        noise: Option<&mut (NoiseEngine, NoiseSettings)>,
        symbol: &MorseSymbol,
        timing: &TimingSettings,
    ) -> Result<bool> {
        if !symbol.is_tone() {
            return self.gap(lease, noise, symbol.duration_ms);
        }
        let tone = self.synth.render(symbol, timing);
        match noise {
            Some((engine, settings)) => {
                let background = engine.generate(tone.len(), settings)?;
                lease.write(&mix_mean(&[&tone[..], &background[..]]))
            }
            None => lease.write(&tone),
        }
    }

    /// Realize a spacing interval: noise-only audio when mixing, otherwise
    /// an interruptible delay.
    fn gap(
        &self,
        lease: &mut DeviceLease,
        noise: Option<&mut (NoiseEngine, NoiseSettings)>,
        duration_ms: u32,
    ) -> Result<bool> {
        match noise {
            Some((engine, settings)) => {
                let len = self.synth.sample_count(duration_ms);
                let background = engine.generate(len, settings)?;
                let silence: &[i16] = &[];
                lease.write(&mix_mean(&[silence, &background[..]]))
            }
            None => {
                lease.drain()?;
                let cancelled = lease
                    .token()
                    .sleep(Duration::from_millis(duration_ms as u64));
                Ok(!cancelled && lease.wait_while_paused()?)
            }
        }
    }
}

/// Plays Morse sequences through a [`PlaybackEngine`]
pub struct SequencePlayer {
    engine: PlaybackEngine,
    session: Session,
}

impl SequencePlayer {
    pub fn new(engine: PlaybackEngine) -> Self {
        let synth = ToneSynthesizer::new(engine.sample_rate());
        Self {
            engine,
            session: Session {
                encoder: Arc::new(MorseEncoder::new()),
                synth,
                state: Arc::new(Mutex::new(PlayerState::Ready)),
                clock: Arc::new(SystemClock::new()),
                noise_seed: None,
            },
        }
    }

    /// Time source for the noise generator's gated effects
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.session.clock = clock;
        self
    }

    /// Seed the noise generator for reproducible output
    pub fn with_noise_seed(mut self, seed: u64) -> Self {
        self.session.noise_seed = Some(seed);
        self
    }

    pub fn engine(&self) -> &PlaybackEngine {
        &self.engine
    }

    pub fn encoder(&self) -> &MorseEncoder {
        &self.session.encoder
    }

    pub fn state(&self) -> PlayerState {
        *lock(&self.session.state)
    }

    pub fn is_playing(&self) -> bool {
        self.engine.is_playing()
    }

    /// Symbols the request encodes to
    pub fn symbols(&self, request: &PlaybackRequest) -> Vec<MorseSymbol> {
        self.session.encoder.encode(&request.sequence, &request.timing)
    }

    /// Length of the whole request, repetitions included
    pub fn total_duration_ms(&self, request: &PlaybackRequest) -> u64 {
        let timing = MorseTiming::from_settings(&request.timing);
        total_duration_ms(&self.symbols(request), request.repeats(), &timing)
    }

    /// Play a request to the end on the calling thread.
    ///
    /// Any stream already playing is cancelled first.
    pub fn play_sequence(&self, request: &PlaybackRequest) -> Result<PlaybackOutcome> {
        let Some(mut lease) = self.engine.claim(TransferMode::Streaming)? else {
            return Ok(PlaybackOutcome::Cancelled);
        };
        self.session.set_state(PlayerState::Playing);
        let result = self.session.run(&mut lease, request);
        drop(lease);
        self.session.set_state(PlayerState::Done);
        log_result(&result);
        result
    }

    /// Play a request on its own thread.
    ///
    /// `on_complete` runs exactly once: with the outcome, with the write
    /// error that ended playback, or synchronously with the error if the
    /// device could not be claimed or the thread could not be started.
    pub fn play_sequence_async<F>(&self, request: PlaybackRequest, on_complete: F) -> PlaybackHandle
    where
        F: FnOnce(Result<PlaybackOutcome>) + Send + 'static,
    {
        self.launch(request, on_complete, |job| {
            std::thread::Builder::new()
                .name("cwtrain-sequence".to_string())
                .spawn(job)
        })
    }

    fn launch<F, S>(&self, request: PlaybackRequest, on_complete: F, spawn: S) -> PlaybackHandle
    where
        F: FnOnce(Result<PlaybackOutcome>) + Send + 'static,
        S: FnOnce(Job) -> io::Result<JoinHandle<()>>,
    {
        let mut handle = PlaybackHandle {
            token: None,
            thread: None,
            engine: self.engine.clone(),
        };

        let mut lease = match self.engine.claim(TransferMode::Streaming) {
            Ok(Some(lease)) => lease,
            Ok(None) => {
                self.session.set_state(PlayerState::Done);
                on_complete(Ok(PlaybackOutcome::Cancelled));
                return handle;
            }
            Err(e) => {
                warn!("Could not start playback: {}", e);
                self.session.set_state(PlayerState::Done);
                on_complete(Err(e));
                return handle;
            }
        };

        handle.token = Some(lease.token().clone());
        self.session.set_state(PlayerState::Playing);

        let on_complete = Arc::new(Mutex::new(Some(on_complete)));
        let callback = Arc::clone(&on_complete);
        let session = self.session.clone();
        let spawned = spawn(Box::new(move || {
            let result = session.run(&mut lease, &request);
            drop(lease);
            session.set_state(PlayerState::Done);
            log_result(&result);
            let done = lock(&callback).take();
            if let Some(done) = done {
                done(result);
            }
        }));

        match spawned {
            Ok(thread) => handle.thread = Some(thread),
            Err(e) => {
                // The lease went down with the job and is back at the gate
                warn!("Failed to spawn playback thread: {}", e);
                self.session.set_state(PlayerState::Done);
                let done = lock(&on_complete).take();
                if let Some(done) = done {
                    done(Err(AudioError::Io(e)));
                }
            }
        }
        handle
    }

    /// Cancel whatever is playing.
    pub fn stop(&self) {
        self.engine.stop();
    }
}

fn log_result(result: &Result<PlaybackOutcome>) {
    match result {
        Ok(PlaybackOutcome::Completed) => debug!("Sequence completed"),
        Ok(PlaybackOutcome::Cancelled) => debug!("Sequence cancelled"),
        Err(e) => warn!("Sequence failed: {}", e),
    }
}

/// Handle to a sequence started with
/// [`play_sequence_async`](SequencePlayer::play_sequence_async)
pub struct PlaybackHandle {
    token: Option<CancellationToken>,
    thread: Option<JoinHandle<()>>,
    engine: PlaybackEngine,
}

impl PlaybackHandle {
    /// Request cancellation without waiting. Takes effect at the next
    /// symbol or buffer boundary.
    pub fn cancel(&self) {
        if let Some(token) = self.token.as_ref() {
            self.engine.cancel_token(token);
        }
    }

    /// Cancel the sequence and wait for its thread.
    pub fn stop(mut self) -> Result<()> {
        self.cancel();
        self.wait()
    }

    pub fn join(mut self) -> Result<()> {
        self.wait()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    fn wait(&mut self) -> Result<()> {
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| AudioError::ThreadPanicked),
            None => Ok(()),
        }
    }
}
