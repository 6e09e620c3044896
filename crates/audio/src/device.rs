//! Output device abstraction
//!
//! Every backend accepts mono signed 16-bit PCM at a fixed sample rate.

use crate::cancel::lock;
use crate::{AudioError, Result};
use cwtrain_core::SAMPLE_RATE;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

#[cfg(feature = "cpal")]
mod cpal_backend;
#[cfg(feature = "cpal")]
pub use cpal_backend::CpalDevice;

/// How the caller intends to feed the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferMode {
    /// Open-ended sequence of buffers
    Streaming,
    /// One complete buffer
    Static,
}

/// Platform-agnostic audio output interface
pub trait AudioDevice: Send {
    /// Fixed output sample rate in Hz
    fn sample_rate(&self) -> u32;

    /// Prepare the device for a new stream.
    fn open(&mut self, mode: TransferMode) -> Result<()>;

    /// Blocking write; returns the number of samples accepted.
    fn write(&mut self, samples: &[i16]) -> Result<usize>;

    /// Block until previously written audio has been played out.
    fn drain(&mut self) -> Result<()> {
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        Ok(())
    }

    /// End the current stream.
    fn stop(&mut self) -> Result<()>;

    /// Give up the underlying resources for good.
    fn release(&mut self);
}

fn samples_duration(samples: usize, sample_rate: u32) -> Duration {
    Duration::from_secs_f64(samples as f64 / sample_rate as f64)
}

/// Null backend: discards audio, optionally taking as long as playback would
#[derive(Debug, Clone)]
pub struct NullDevice {
    sample_rate: u32,
    realtime: bool,
}

impl NullDevice {
    pub fn new() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            realtime: false,
        }
    }

    /// Sleep through each write so timing feels real
    pub fn realtime() -> Self {
        Self {
            realtime: true,
            ..Self::new()
        }
    }
}

impl Default for NullDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioDevice for NullDevice {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn open(&mut self, _mode: TransferMode) -> Result<()> {
        Ok(())
    }

    fn write(&mut self, samples: &[i16]) -> Result<usize> {
        if self.realtime {
            std::thread::sleep(samples_duration(samples.len(), self.sample_rate));
        }
        Ok(samples.len())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn release(&mut self) {}
}

/// Everything a [`MemoryDevice`] has observed
#[derive(Debug, Clone, Default)]
pub struct MemoryLog {
    pub samples: Vec<i16>,
    pub writes: usize,
    pub opens: Vec<TransferMode>,
    pub stops: usize,
    pub pauses: usize,
    pub released: bool,
}

#[derive(Debug, Default)]
struct MemoryShared {
    log: Mutex<MemoryLog>,
    in_write: AtomicUsize,
    overlapped: AtomicBool,
    fail_after: Mutex<Option<usize>>,
    fail_open: AtomicBool,
}

/// Recording backend. Clones share one log, so a test can keep a clone and
/// inspect exactly what reached the device.
#[derive(Debug, Clone)]
pub struct MemoryDevice {
    sample_rate: u32,
    realtime: bool,
    shared: Arc<MemoryShared>,
}

impl MemoryDevice {
    pub fn new() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            realtime: false,
            shared: Arc::default(),
        }
    }

    /// Pace writes at the playback rate
    pub fn realtime() -> Self {
        Self {
            realtime: true,
            ..Self::new()
        }
    }

    /// Fail every write after `writes` successful ones.
    pub fn fail_after_writes(&self, writes: usize) {
        *lock(&self.shared.fail_after) = Some(writes);
    }

    /// Make the next `open` calls fail.
    pub fn fail_open(&self, fail: bool) {
        self.shared.fail_open.store(fail, Ordering::SeqCst);
    }

    pub fn log(&self) -> MemoryLog {
        lock(&self.shared.log).clone()
    }

    pub fn sample_count(&self) -> usize {
        lock(&self.shared.log).samples.len()
    }

    /// Whether two writers were ever inside `write` at the same time
    pub fn overlap_detected(&self) -> bool {
        self.shared.overlapped.load(Ordering::SeqCst)
    }
}

impl Default for MemoryDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioDevice for MemoryDevice {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn open(&mut self, mode: TransferMode) -> Result<()> {
        if self.shared.fail_open.load(Ordering::SeqCst) {
            return Err(AudioError::DeviceUnavailable {
                msg: "memory device configured to fail".to_string(),
            });
        }
        lock(&self.shared.log).opens.push(mode);
        Ok(())
    }

    fn write(&mut self, samples: &[i16]) -> Result<usize> {
        if self.shared.in_write.fetch_add(1, Ordering::SeqCst) > 0 {
            self.shared.overlapped.store(true, Ordering::SeqCst);
        }

        let result = (|| {
            {
                let mut log = lock(&self.shared.log);
                if let Some(limit) = *lock(&self.shared.fail_after) {
                    if log.writes >= limit {
                        return Err(AudioError::DeviceWrite {
                            msg: format!("injected failure after {} writes", limit),
                        });
                    }
                }
                log.writes += 1;
                log.samples.extend_from_slice(samples);
            }
            if self.realtime {
                std::thread::sleep(samples_duration(samples.len(), self.sample_rate));
            }
            Ok(samples.len())
        })();

        self.shared.in_write.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn pause(&mut self) -> Result<()> {
        lock(&self.shared.log).pauses += 1;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        lock(&self.shared.log).stops += 1;
        Ok(())
    }

    fn release(&mut self) {
        lock(&self.shared.log).released = true;
    }
}

/// WAV file backend (mono, 16-bit)
pub struct WavDevice {
    path: PathBuf,
    sample_rate: u32,
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    written: usize,
}

impl WavDevice {
    /// The file is created on first `open`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            sample_rate: SAMPLE_RATE,
            writer: None,
            written: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Samples written so far
    pub fn written(&self) -> usize {
        self.written
    }

    /// Flush the WAV header and close the file.
    pub fn finalize(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
            info!("Wrote {} samples to {:?}", self.written, self.path);
        }
        Ok(())
    }
}

impl AudioDevice for WavDevice {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn open(&mut self, mode: TransferMode) -> Result<()> {
        if self.writer.is_none() {
            let spec = hound::WavSpec {
                channels: 1,
                sample_rate: self.sample_rate,
                bits_per_sample: 16,
                sample_format: hound::SampleFormat::Int,
            };
            self.writer = Some(hound::WavWriter::create(&self.path, spec)?);
            debug!("Opened {:?} for {:?} output", self.path, mode);
        }
        Ok(())
    }

    fn write(&mut self, samples: &[i16]) -> Result<usize> {
        let writer = self.writer.as_mut().ok_or_else(|| AudioError::DeviceWrite {
            msg: format!("{:?} is not open", self.path),
        })?;
        for &sample in samples {
            writer.write_sample(sample)?;
        }
        self.written += samples.len();
        Ok(samples.len())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }

    fn release(&mut self) {
        if let Err(e) = self.finalize() {
            warn!("Failed to finalize {:?}: {}", self.path, e);
        }
    }
}

impl Drop for WavDevice {
    fn drop(&mut self) {
        self.release();
    }
}
