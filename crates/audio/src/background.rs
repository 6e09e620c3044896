//! Continuous background noise
//!
//! A [`NoiseStream`] keeps band noise playing until stopped or until a
//! lesson claims the engine. Every `start` builds a fresh generator, so no
//! state carries over from a previous session.

use crate::cancel::lock;
use crate::engine::{PlaybackEngine, PlaybackOutcome, StreamHandle};
use crate::Result;
use cwtrain_core::clock::{Clock, SystemClock};
use cwtrain_core::noise::{NoiseEngine, NoiseSettings};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Samples generated per pull
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Background noise service
pub struct NoiseStream {
    engine: PlaybackEngine,
    settings: Arc<Mutex<NoiseSettings>>,
    handle: Mutex<Option<StreamHandle>>,
    chunk_size: usize,
    clock: Arc<dyn Clock>,
    seed: Option<u64>,
}

impl NoiseStream {
    pub fn new(engine: PlaybackEngine) -> Self {
        Self {
            engine,
            settings: Arc::new(Mutex::new(NoiseSettings::default())),
            handle: Mutex::new(None),
            chunk_size: DEFAULT_CHUNK_SIZE,
            clock: Arc::new(SystemClock::new()),
            seed: None,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Start streaming noise, replacing any stream already running.
    pub fn start(&self, settings: NoiseSettings) -> Result<()> {
        if let Err(e) = self.stop() {
            warn!("Previous noise stream ended with an error: {}", e);
        }
        *lock(&self.settings) = settings;

        let mut generator = NoiseEngine::new(self.engine.sample_rate() as f64, Arc::clone(&self.clock))?;
        if let Some(seed) = self.seed {
            generator = generator.with_rng_seed(seed);
        }

        let shared_settings = Arc::clone(&self.settings);
        let chunk_size = self.chunk_size;
        let handle = self.engine.spawn_stream(move || {
            let snapshot = *lock(&shared_settings);
            match generator.generate(chunk_size, &snapshot) {
                Ok(chunk) => Some(chunk),
                Err(e) => {
                    warn!("Noise generation failed: {}", e);
                    None
                }
            }
        })?;

        info!(
            "Background noise started (volume {:.2}, center {:.0} Hz)",
            settings.volume, settings.center_frequency
        );
        *lock(&self.handle) = Some(handle);
        Ok(())
    }

    /// Stop the noise and wait for the stream to exit.
    pub fn stop(&self) -> Result<()> {
        let handle = lock(&self.handle).take();
        if let Some(handle) = handle {
            let outcome = handle.stop()?;
            debug!("Background noise stopped ({:?})", outcome);
        }
        Ok(())
    }

    /// Whether noise is currently streaming. Turns false once the stream
    /// is stopped or another stream took the device.
    pub fn is_running(&self) -> bool {
        lock(&self.handle)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Replace the settings; applied from the next chunk on.
    pub fn update_settings(&self, settings: NoiseSettings) {
        *lock(&self.settings) = settings;
        debug!("Noise settings updated");
    }

    pub fn settings(&self) -> NoiseSettings {
        *lock(&self.settings)
    }

    /// Wait for the stream to end without cancelling it.
    pub fn join(&self) -> Result<PlaybackOutcome> {
        let handle = lock(&self.handle).take();
        match handle {
            Some(handle) => handle.join(),
            None => Ok(PlaybackOutcome::Cancelled),
        }
    }
}

impl Drop for NoiseStream {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Failed to stop background noise: {}", e);
        }
    }
}
