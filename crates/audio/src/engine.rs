//! Playback engine
//!
//! The engine owns the output device. A stream gets the device by claiming
//! it: the claim cancels whatever stream holds it now, waits for that
//! stream to hand the device back, and returns a [`DeviceLease`]. The lease
//! returns the device when dropped. This is the only path to the device, so
//! two streams never write at the same time.

use crate::cancel::{lock, CancellationToken};
use crate::device::{AudioDevice, TransferMode};
use crate::{AudioError, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Samples per device write; cancellation and pause are checked in between.
pub const WRITE_CHUNK: usize = 1024;

/// How a stream ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackOutcome {
    /// All audio was written
    Completed,
    /// Stopped early by `stop()` or by a newer stream
    Cancelled,
}

struct Gate {
    device: Option<Box<dyn AudioDevice>>,
    current: Option<CancellationToken>,
}

struct Shared {
    gate: Mutex<Gate>,
    returned: Condvar,
    playing: AtomicBool,
    paused: Mutex<bool>,
    resumed: Condvar,
    released: AtomicBool,
    sample_rate: u32,
}

impl Shared {
    /// Cancel a token and wake a writer parked in pause or a claim waiting
    /// for the device.
    fn cancel(&self, token: &CancellationToken) {
        token.cancel();
        {
            let _paused = lock(&self.paused);
            self.resumed.notify_all();
        }
        self.returned.notify_all();
    }
}

/// Handle to the single output device. Cheap to clone; clones share the
/// device and its state.
#[derive(Clone)]
pub struct PlaybackEngine {
    shared: Arc<Shared>,
}

impl PlaybackEngine {
    pub fn new<D: AudioDevice + 'static>(device: D) -> Self {
        Self::with_device(Box::new(device))
    }

    pub fn with_device(device: Box<dyn AudioDevice>) -> Self {
        let sample_rate = device.sample_rate();
        Self {
            shared: Arc::new(Shared {
                gate: Mutex::new(Gate {
                    device: Some(device),
                    current: None,
                }),
                returned: Condvar::new(),
                playing: AtomicBool::new(false),
                paused: Mutex::new(false),
                resumed: Condvar::new(),
                released: AtomicBool::new(false),
                sample_rate,
            }),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.shared.sample_rate
    }

    /// Take ownership of the device for a new stream.
    ///
    /// Cancels the current stream and blocks until it has returned the
    /// device. Returns `Ok(None)` if this claim was itself cancelled while
    /// waiting (by `stop()` or a newer claim).
    pub fn claim(&self, mode: TransferMode) -> Result<Option<DeviceLease>> {
        let shared = &self.shared;
        if shared.released.load(Ordering::SeqCst) {
            return Err(AudioError::Released);
        }

        let token = CancellationToken::new();
        let mut gate = lock(&shared.gate);
        if let Some(previous) = gate.current.replace(token.clone()) {
            debug!("Cancelling previous stream");
            shared.cancel(&previous);
        }

        let mut device = loop {
            if shared.released.load(Ordering::SeqCst) {
                if gate.current.as_ref().is_some_and(|t| t.same_as(&token)) {
                    gate.current = None;
                }
                return Err(AudioError::Released);
            }
            if token.is_cancelled() {
                if gate.current.as_ref().is_some_and(|t| t.same_as(&token)) {
                    gate.current = None;
                }
                return Ok(None);
            }
            match gate.device.take() {
                Some(device) => break device,
                None => {
                    gate = shared
                        .returned
                        .wait(gate)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        };

        if let Err(e) = device.open(mode) {
            warn!("Failed to open audio device: {}", e);
            gate.device = Some(device);
            if gate.current.as_ref().is_some_and(|t| t.same_as(&token)) {
                gate.current = None;
            }
            shared.returned.notify_all();
            return Err(e);
        }

        *lock(&shared.paused) = false;
        shared.playing.store(true, Ordering::SeqCst);
        debug!("Device claimed for {:?} output", mode);

        Ok(Some(DeviceLease {
            device: Some(device),
            token,
            shared: Arc::clone(shared),
        }))
    }

    /// Blocking write of one complete buffer.
    pub fn play(&self, samples: &[i16]) -> Result<PlaybackOutcome> {
        let Some(mut lease) = self.claim(TransferMode::Static)? else {
            return Ok(PlaybackOutcome::Cancelled);
        };
        if !lease.write(samples)? {
            return Ok(PlaybackOutcome::Cancelled);
        }
        lease.drain()?;
        Ok(PlaybackOutcome::Completed)
    }

    /// Pull buffers from `pull` and write them until it returns `None` or
    /// the stream is stopped. Blocks the calling thread.
    pub fn play_stream<F>(&self, pull: F) -> Result<PlaybackOutcome>
    where
        F: FnMut() -> Option<Vec<i16>>,
    {
        match self.claim(TransferMode::Streaming)? {
            Some(lease) => run_stream(lease, pull),
            None => Ok(PlaybackOutcome::Cancelled),
        }
    }

    /// Like [`play_stream`](Self::play_stream) on a dedicated thread.
    ///
    /// The device is claimed before this returns, so a stream spawned after
    /// another one always wins the device.
    pub fn spawn_stream<F>(&self, pull: F) -> Result<StreamHandle>
    where
        F: FnMut() -> Option<Vec<i16>> + Send + 'static,
    {
        let Some(lease) = self.claim(TransferMode::Streaming)? else {
            return Ok(StreamHandle {
                token: None,
                thread: None,
                engine: self.clone(),
            });
        };
        let token = lease.token().clone();
        let thread = std::thread::Builder::new()
            .name("cwtrain-stream".to_string())
            .spawn(move || run_stream(lease, pull))?;
        Ok(StreamHandle {
            token: Some(token),
            thread: Some(thread),
            engine: self.clone(),
        })
    }

    /// Cancel the active stream. Does not wait for it to wind down.
    pub fn stop(&self) {
        let gate = lock(&self.shared.gate);
        if let Some(token) = gate.current.as_ref() {
            self.shared.cancel(token);
        }
        self.shared.playing.store(false, Ordering::SeqCst);
        *lock(&self.shared.paused) = false;
    }

    /// Cancel one stream, leaving any newer one alone.
    pub(crate) fn cancel_token(&self, token: &CancellationToken) {
        self.shared.cancel(token);
    }

    /// Hold the active writer at its next buffer boundary.
    pub fn pause(&self) {
        *lock(&self.shared.paused) = true;
        debug!("Playback paused");
    }

    pub fn resume(&self) {
        *lock(&self.shared.paused) = false;
        self.shared.resumed.notify_all();
        debug!("Playback resumed");
    }

    pub fn is_paused(&self) -> bool {
        *lock(&self.shared.paused)
    }

    pub fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::SeqCst)
    }

    /// Wait until no stream holds the device. Returns `false` on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut gate = lock(&self.shared.gate);
        while gate.device.is_none() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (next, _) = self
                .shared
                .returned
                .wait_timeout(gate, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            gate = next;
        }
        true
    }

    /// Stop everything and release the device. Further claims fail with
    /// [`AudioError::Released`].
    pub fn release(&self) {
        self.shared.released.store(true, Ordering::SeqCst);
        self.stop();
        let mut gate = lock(&self.shared.gate);
        if let Some(mut device) = gate.device.take() {
            device.release();
            info!("Audio device released");
        }
        // An active lease releases the device when it is dropped
        self.shared.returned.notify_all();
    }

    pub fn is_released(&self) -> bool {
        self.shared.released.load(Ordering::SeqCst)
    }
}

fn run_stream<F>(mut lease: DeviceLease, mut pull: F) -> Result<PlaybackOutcome>
where
    F: FnMut() -> Option<Vec<i16>>,
{
    loop {
        if lease.is_cancelled() {
            return Ok(PlaybackOutcome::Cancelled);
        }
        match pull() {
            Some(buffer) => {
                if !lease.write(&buffer)? {
                    return Ok(PlaybackOutcome::Cancelled);
                }
            }
            None => {
                lease.drain()?;
                return Ok(PlaybackOutcome::Completed);
            }
        }
    }
}

/// Exclusive use of the device for one stream
pub struct DeviceLease {
    device: Option<Box<dyn AudioDevice>>,
    token: CancellationToken,
    shared: Arc<Shared>,
}

impl DeviceLease {
    /// This stream's cancellation token
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn sample_rate(&self) -> u32 {
        self.shared.sample_rate
    }

    /// Write samples in [`WRITE_CHUNK`] pieces.
    ///
    /// Returns `Ok(false)` if the stream was cancelled before everything was
    /// written. Nothing is written after cancellation is observed.
    pub fn write(&mut self, samples: &[i16]) -> Result<bool> {
        for chunk in samples.chunks(WRITE_CHUNK) {
            if !self.wait_while_paused()? {
                return Ok(false);
            }
            let mut offset = 0;
            while offset < chunk.len() {
                let written = self.device_mut()?.write(&chunk[offset..])?;
                if written == 0 {
                    return Err(AudioError::DeviceWrite {
                        msg: "device accepted no samples".to_string(),
                    });
                }
                offset += written;
            }
        }
        Ok(!self.is_cancelled())
    }

    /// Park while the engine is paused. Returns `false` if cancelled.
    pub fn wait_while_paused(&mut self) -> Result<bool> {
        let shared = Arc::clone(&self.shared);
        let mut paused = lock(&shared.paused);
        if *paused && !self.is_cancelled() {
            self.device_mut()?.pause()?;
            while *paused && !self.is_cancelled() {
                paused = shared
                    .resumed
                    .wait(paused)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            self.device_mut()?.resume()?;
        }
        Ok(!self.is_cancelled())
    }

    /// Wait until written audio has played out.
    pub fn drain(&mut self) -> Result<()> {
        self.device_mut()?.drain()
    }

    fn device_mut(&mut self) -> Result<&mut Box<dyn AudioDevice>> {
        self.device.as_mut().ok_or(AudioError::Released)
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        let Some(mut device) = self.device.take() else {
            return;
        };
        if let Err(e) = device.stop() {
            warn!("Failed to stop audio device: {}", e);
        }

        let mut gate = lock(&self.shared.gate);
        if self.shared.released.load(Ordering::SeqCst) {
            device.release();
            info!("Audio device released");
        } else {
            gate.device = Some(device);
        }
        if gate.current.as_ref().is_some_and(|t| t.same_as(&self.token)) {
            gate.current = None;
            self.shared.playing.store(false, Ordering::SeqCst);
        }
        self.shared.returned.notify_all();
        debug!("Device returned");
    }
}

/// Handle to a stream running on its own thread
pub struct StreamHandle {
    token: Option<CancellationToken>,
    thread: Option<JoinHandle<Result<PlaybackOutcome>>>,
    engine: PlaybackEngine,
}

impl StreamHandle {
    /// Request cancellation without waiting.
    pub fn cancel(&self) {
        if let Some(token) = self.token.as_ref() {
            self.engine.cancel_token(token);
        }
    }

    /// Cancel and wait for the stream thread to exit.
    pub fn stop(mut self) -> Result<PlaybackOutcome> {
        self.cancel();
        self.wait()
    }

    /// Wait for the stream to end on its own.
    pub fn join(mut self) -> Result<PlaybackOutcome> {
        self.wait()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    fn wait(&mut self) -> Result<PlaybackOutcome> {
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| AudioError::ThreadPanicked)?,
            None => Ok(PlaybackOutcome::Cancelled),
        }
    }
}
