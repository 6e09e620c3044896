//! Speaker output through cpal
//!
//! The cpal stream lives on its own thread (it is not `Send` on every
//! host). Samples travel to the callback through a ring buffer; the
//! callback duplicates the mono signal across all output channels.

use super::{AudioDevice, TransferMode};
use crate::{AudioError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cwtrain_core::SAMPLE_RATE;
use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapRb,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info};

/// ~100ms at 44.1kHz
const RING_BUFFER_SIZE: usize = 4410;

/// Poll interval while the ring buffer is full or draining
const BACKOFF: Duration = Duration::from_millis(2);

struct Running {
    producer: ringbuf::HeapProd<i16>,
    shutdown: mpsc::Sender<()>,
    thread: Option<JoinHandle<()>>,
}

/// Default output device of the default host
pub struct CpalDevice {
    running: Option<Running>,
    paused: Arc<AtomicBool>,
}

impl CpalDevice {
    pub fn new() -> Self {
        Self {
            running: None,
            paused: Arc::new(AtomicBool::new(false)),
        }
    }

    fn start(&mut self) -> Result<()> {
        let ring = HeapRb::<i16>::new(RING_BUFFER_SIZE);
        let (producer, consumer) = ring.split();
        let (shutdown, shutdown_rx) = mpsc::channel::<()>();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<()>>(1);
        let paused = Arc::clone(&self.paused);

        let thread = std::thread::Builder::new()
            .name("cwtrain-cpal".to_string())
            .spawn(move || {
                let stream = match build_stream(consumer, paused) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // Hold the stream until told otherwise
                let _ = shutdown_rx.recv();
                drop(stream);
                debug!("Audio stream closed");
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(AudioError::DeviceUnavailable {
                    msg: "audio thread exited during setup".to_string(),
                });
            }
        }

        self.running = Some(Running {
            producer,
            shutdown,
            thread: Some(thread),
        });
        info!("Audio output started at {} Hz", SAMPLE_RATE);
        Ok(())
    }
}

impl Default for CpalDevice {
    fn default() -> Self {
        Self::new()
    }
}

fn device_error(context: &str, e: impl std::fmt::Display) -> AudioError {
    AudioError::DeviceUnavailable {
        msg: format!("{}: {}", context, e),
    }
}

fn build_stream(
    consumer: ringbuf::HeapCons<i16>,
    paused: Arc<AtomicBool>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| AudioError::DeviceUnavailable {
            msg: "No audio output device available".to_string(),
        })?;
    let supported = device
        .default_output_config()
        .map_err(|e| device_error("Failed to get default output config", e))?;

    let sample_format = supported.sample_format();
    let mut config: cpal::StreamConfig = supported.into();
    config.sample_rate = cpal::SampleRate(SAMPLE_RATE);

    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_typed::<f32>(&device, &config, consumer, paused)?,
        cpal::SampleFormat::I16 => build_typed::<i16>(&device, &config, consumer, paused)?,
        cpal::SampleFormat::U16 => build_typed::<u16>(&device, &config, consumer, paused)?,
        other => {
            return Err(AudioError::DeviceUnavailable {
                msg: format!("Unsupported sample format: {:?}", other),
            })
        }
    };
    stream
        .play()
        .map_err(|e| device_error("Failed to play audio stream", e))?;
    Ok(stream)
}

fn build_typed<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut consumer: ringbuf::HeapCons<i16>,
    paused: Arc<AtomicBool>,
) -> Result<cpal::Stream>
where
    T: cpal::SizedSample + cpal::FromSample<i16>,
{
    let channels = config.channels.max(1) as usize;
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let hold = paused.load(Ordering::Relaxed);
                for frame in data.chunks_mut(channels) {
                    let sample = if hold {
                        0
                    } else {
                        consumer.try_pop().unwrap_or(0)
                    };
                    let value = T::from_sample(sample);
                    for out in frame.iter_mut() {
                        *out = value;
                    }
                }
            },
            |err| error!("Audio stream error: {}", err),
            None,
        )
        .map_err(|e| device_error("Failed to build audio stream", e))
}

impl AudioDevice for CpalDevice {
    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    fn open(&mut self, mode: TransferMode) -> Result<()> {
        self.paused.store(false, Ordering::SeqCst);
        if self.running.is_none() {
            self.start()?;
        }
        debug!("Speaker opened for {:?} output", mode);
        Ok(())
    }

    fn write(&mut self, samples: &[i16]) -> Result<usize> {
        let running = self.running.as_mut().ok_or_else(|| AudioError::DeviceWrite {
            msg: "audio output is not open".to_string(),
        })?;
        let mut offset = 0;
        while offset < samples.len() {
            let pushed = running.producer.push_slice(&samples[offset..]);
            offset += pushed;
            if pushed == 0 {
                std::thread::sleep(BACKOFF);
            }
        }
        Ok(samples.len())
    }

    fn drain(&mut self) -> Result<()> {
        if let Some(running) = self.running.as_ref() {
            while !running.producer.is_empty() && !self.paused.load(Ordering::SeqCst) {
                std::thread::sleep(BACKOFF);
            }
        }
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.paused.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.drain()
    }

    fn release(&mut self) {
        if let Some(mut running) = self.running.take() {
            let _ = running.shutdown.send(());
            if let Some(thread) = running.thread.take() {
                let _ = thread.join();
            }
            info!("Audio output released");
        }
    }
}

impl Drop for CpalDevice {
    fn drop(&mut self) {
        self.release();
    }
}
