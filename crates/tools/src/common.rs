//! Shared helpers for the command-line tools

use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

/// Install the global subscriber. `--debug` beats `--verbose`; the default
/// shows warnings only.
pub fn init_logging(verbose: bool, debug: bool) {
    let log_level = if debug {
        tracing::Level::DEBUG
    } else if verbose {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();
}

/// Write mono 16-bit samples to a WAV file
pub fn write_wav_file(samples: &[i16], path: &Path, sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("Failed to create WAV file: {:?}", path))?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;

    info!("Wrote {} samples to {:?}", samples.len(), path);
    Ok(())
}

/// Read a WAV file as mono 16-bit samples. Multi-channel files keep the
/// first channel only.
pub fn read_wav_file(path: &Path) -> Result<(Vec<i16>, u32)> {
    let mut reader = hound::WavReader::open(path)
        .with_context(|| format!("Failed to open WAV file: {:?}", path))?;
    let spec = reader.spec();
    if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
        anyhow::bail!(
            "Unsupported WAV format in {:?}: {} bit {:?}",
            path,
            spec.bits_per_sample,
            spec.sample_format
        );
    }

    let channels = spec.channels.max(1) as usize;
    let samples: Result<Vec<i16>, _> = reader.samples::<i16>().step_by(channels).collect();
    let samples = samples.with_context(|| "Failed to read audio samples")?;

    info!("Read {} samples from {:?}", samples.len(), path);
    Ok((samples, spec.sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wav_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let samples: Vec<i16> = (0..500).map(|i| (i * 37 % 2000 - 1000) as i16).collect();

        write_wav_file(&samples, &path, 44100).unwrap();
        let (loaded, sample_rate) = read_wav_file(&path).unwrap();
        assert_eq!(sample_rate, 44100);
        assert_eq!(loaded, samples);
    }

    #[test]
    fn test_stereo_keeps_first_channel() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for (left, right) in [(1i16, -1i16), (2, -2), (3, -3)] {
            writer.write_sample(left).unwrap();
            writer.write_sample(right).unwrap();
        }
        writer.finalize().unwrap();

        let (loaded, sample_rate) = read_wav_file(&path).unwrap();
        assert_eq!(sample_rate, 8000);
        assert_eq!(loaded, vec![1, 2, 3]);
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(read_wav_file(Path::new("/nonexistent/cwtrain.wav")).is_err());
    }
}
