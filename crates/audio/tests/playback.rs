//! End-to-end playback through a recording device

use cwtrain_audio::prelude::*;
use cwtrain_core::noise::NoiseSettings;
use cwtrain_morse::cw::{MorseTiming, SymbolKind, TimingSettings};
use cwtrain_morse::tone::ToneSynthesizer;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

fn player(device: &MemoryDevice) -> SequencePlayer {
    SequencePlayer::new(PlaybackEngine::new(device.clone())).with_noise_seed(7)
}

fn quiet_noise() -> NoiseSettings {
    NoiseSettings {
        volume: 0.2,
        ..NoiseSettings::default()
    }
}

#[test]
fn test_sos_writes_only_tones_without_noise() {
    let device = MemoryDevice::new();
    let player = player(&device);
    let timing = TimingSettings::new(50, 600.0);
    let request = PlaybackRequest::new("SOS", timing);

    assert_eq!(player.state(), PlayerState::Ready);
    assert_eq!(player.play_sequence(&request).unwrap(), PlaybackOutcome::Completed);
    assert_eq!(player.state(), PlayerState::Done);
    assert!(!player.is_playing());

    let synth = ToneSynthesizer::new(44100);
    let expected: Vec<i16> = player
        .symbols(&request)
        .iter()
        .filter(|s| s.is_tone())
        .flat_map(|s| synth.render(s, &timing))
        .collect();
    // 6 dits of 24 ms and 3 dahs of 72 ms
    assert_eq!(expected.len(), 6 * 1058 + 3 * 3175);
    assert_eq!(device.log().samples, expected);
}

#[test]
fn test_noise_fills_gaps_and_repeats() {
    let device = MemoryDevice::new();
    let player = player(&device);
    let timing = TimingSettings::new(25, 700.0);
    let request = PlaybackRequest::new("CQ", timing)
        .with_repeats(2)
        .with_noise(quiet_noise());

    assert_eq!(player.play_sequence(&request).unwrap(), PlaybackOutcome::Completed);

    let synth = ToneSynthesizer::new(44100);
    let once: usize = player
        .symbols(&request)
        .iter()
        .map(|s| synth.sample_count(s.duration_ms))
        .sum();
    let word_space = MorseTiming::from_settings(&timing).word_space_ms;
    assert_eq!(
        device.sample_count(),
        2 * once + synth.sample_count(word_space)
    );
    // Gaps carry background rather than digital silence
    let log = device.log();
    assert!(log.samples.iter().filter(|&&s| s == 0).count() < log.samples.len() / 10);
}

#[test]
fn test_total_duration_counts_repeat_gap() {
    let player = player(&MemoryDevice::new());
    let request = PlaybackRequest::new("SOS", TimingSettings::new(20, 600.0)).with_repeats(2);
    assert_eq!(player.total_duration_ms(&request), 2 * 1620 + 420);

    let zero = PlaybackRequest::new("SOS", TimingSettings::new(20, 600.0)).with_repeats(0);
    assert_eq!(player.total_duration_ms(&zero), 1620);
}

#[test]
fn test_completion_called_once() {
    let device = MemoryDevice::new();
    let player = player(&device);
    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::channel();

    let counter = Arc::clone(&calls);
    let handle = player.play_sequence_async(
        PlaybackRequest::new("E", TimingSettings::new(30, 600.0)),
        move |result| {
            counter.fetch_add(1, Ordering::SeqCst);
            tx.send(result).unwrap();
        },
    );
    handle.join().unwrap();

    let result = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(result.unwrap(), PlaybackOutcome::Completed);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_unmappable_sequence_still_completes() {
    let device = MemoryDevice::new();
    let player = player(&device);
    let (tx, rx) = mpsc::channel();

    let handle = player.play_sequence_async(
        PlaybackRequest::new("#%^", TimingSettings::default()),
        move |result| tx.send(result).unwrap(),
    );
    handle.join().unwrap();

    assert_eq!(
        rx.recv_timeout(Duration::from_secs(1)).unwrap().unwrap(),
        PlaybackOutcome::Completed
    );
    assert_eq!(device.sample_count(), 0);
}

#[test]
fn test_stop_halts_writes_quickly() {
    let device = MemoryDevice::realtime();
    let player = player(&device);
    let request = PlaybackRequest::new("PARIS PARIS PARIS", TimingSettings::new(20, 600.0))
        .with_noise(quiet_noise());
    let full = player.total_duration_ms(&request);
    let (tx, rx) = mpsc::channel();

    let handle = player.play_sequence_async(request, move |result| tx.send(result).unwrap());
    thread::sleep(Duration::from_millis(300));
    assert_eq!(player.state(), PlayerState::Playing);

    let start = Instant::now();
    handle.stop().unwrap();
    assert!(start.elapsed() < Duration::from_millis(200));

    let written = device.sample_count();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(device.sample_count(), written);
    assert!((written as u64) < full * 44100 / 1000);

    assert_eq!(
        rx.recv_timeout(Duration::from_secs(1)).unwrap().unwrap(),
        PlaybackOutcome::Cancelled
    );
    assert!(rx.try_recv().is_err());
    assert_eq!(player.state(), PlayerState::Done);
}

#[test]
fn test_stop_interrupts_silent_gap() {
    let device = MemoryDevice::new();
    let player = player(&device);
    // One word space at 5 WPM is 1680 ms
    let request = PlaybackRequest::new("E E", TimingSettings::new(5, 600.0));
    let (tx, rx) = mpsc::channel();

    let handle = player.play_sequence_async(request, move |result| tx.send(result).unwrap());
    thread::sleep(Duration::from_millis(100));
    let start = Instant::now();
    player.stop();
    handle.join().unwrap();
    assert!(start.elapsed() < Duration::from_millis(200));

    assert_eq!(rx.recv().unwrap().unwrap(), PlaybackOutcome::Cancelled);
    // Only the first E was written
    let synth = ToneSynthesizer::new(44100);
    assert_eq!(device.sample_count(), synth.sample_count(240));
}

#[test]
fn test_waiting_for_repeat_state() {
    let device = MemoryDevice::new();
    let player = player(&device);
    let request = PlaybackRequest::new("E", TimingSettings::new(20, 600.0)).with_repeats(2);

    let handle = player.play_sequence_async(request, |_| {});
    thread::sleep(Duration::from_millis(150));
    assert_eq!(player.state(), PlayerState::WaitingForRepeat);
    handle.join().unwrap();
    assert_eq!(player.state(), PlayerState::Done);
    assert_eq!(device.sample_count(), 2 * 2646);
}

#[test]
fn test_trailing_space_not_doubled_between_repeats() {
    let timing = TimingSettings::new(20, 600.0);
    let synth = ToneSynthesizer::new(44100);
    let dit = synth.sample_count(60);
    let word_space = synth.sample_count(420);

    let mut counts = Vec::new();
    for text in ["E", "E "] {
        let device = MemoryDevice::new();
        let player = player(&device);
        let request = PlaybackRequest::new(text, timing)
            .with_repeats(2)
            .with_noise(quiet_noise());
        assert_eq!(player.play_sequence(&request).unwrap(), PlaybackOutcome::Completed);
        assert_eq!(
            device.sample_count(),
            synth.sample_count(player.total_duration_ms(&request) as u32)
        );
        counts.push(device.sample_count());
    }

    // dit, gap, dit
    assert_eq!(counts[0], 2 * dit + word_space);
    // dit, gap, dit, trailing space
    assert_eq!(counts[1], 2 * dit + 2 * word_space);
}

#[test]
fn test_sequence_preempts_background_noise() {
    let device = MemoryDevice::realtime();
    let engine = PlaybackEngine::new(device.clone());
    let noise = NoiseStream::new(engine.clone()).with_rng_seed(3);
    noise.start(NoiseSettings::default()).unwrap();
    thread::sleep(Duration::from_millis(50));
    assert!(noise.is_running());

    let player = SequencePlayer::new(engine.clone());
    let timing = TimingSettings::new(20, 600.0);
    let request = PlaybackRequest::new("E", timing);
    assert_eq!(player.play_sequence(&request).unwrap(), PlaybackOutcome::Completed);

    assert_eq!(noise.join().unwrap(), PlaybackOutcome::Cancelled);
    assert!(!noise.is_running());
    assert!(!device.overlap_detected());

    let symbols = player.symbols(&request);
    assert_eq!(symbols[0].kind, SymbolKind::Dit);
    let tone = ToneSynthesizer::new(44100).render(&symbols[0], &timing);
    let log = device.log();
    assert!(log.samples.ends_with(&tone));
    assert_eq!(
        log.opens,
        vec![TransferMode::Streaming, TransferMode::Streaming]
    );
}

#[test]
fn test_write_failure_reported_once() {
    let device = MemoryDevice::new();
    device.fail_after_writes(2);
    let player = player(&device);
    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::channel();

    let counter = Arc::clone(&calls);
    let handle = player.play_sequence_async(
        PlaybackRequest::new("PARIS", TimingSettings::new(20, 600.0)).with_noise(quiet_noise()),
        move |result| {
            counter.fetch_add(1, Ordering::SeqCst);
            tx.send(result).unwrap();
        },
    );
    handle.join().unwrap();

    assert!(matches!(
        rx.recv_timeout(Duration::from_secs(1)).unwrap(),
        Err(AudioError::DeviceWrite { .. })
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(player.engine().wait_idle(Duration::from_millis(100)));
    assert!(!player.is_playing());
}

#[test]
fn test_device_open_failure_reported_synchronously() {
    let device = MemoryDevice::new();
    device.fail_open(true);
    let player = player(&device);
    let (tx, rx) = mpsc::channel();

    let handle = player.play_sequence_async(
        PlaybackRequest::new("E", TimingSettings::default()),
        move |result| tx.send(result).unwrap(),
    );
    assert!(handle.is_finished());
    assert!(matches!(
        rx.try_recv().unwrap(),
        Err(AudioError::DeviceUnavailable { .. })
    ));
}

#[test]
fn test_released_engine_rejects_sequences() {
    let device = MemoryDevice::new();
    let player = player(&device);
    player.engine().release();

    let request = PlaybackRequest::new("E", TimingSettings::default());
    assert!(matches!(player.play_sequence(&request), Err(AudioError::Released)));

    let (tx, rx) = mpsc::channel();
    player.play_sequence_async(request, move |result| tx.send(result).unwrap());
    assert!(matches!(rx.try_recv().unwrap(), Err(AudioError::Released)));
}

#[test]
fn test_render_lesson_to_wav() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lesson.wav");

    let engine = PlaybackEngine::new(WavDevice::new(&path));
    let player = SequencePlayer::new(engine.clone()).with_noise_seed(5);
    let timing = TimingSettings::new(25, 700.0);
    let request = PlaybackRequest::new("CQ", timing).with_noise(quiet_noise());
    assert_eq!(player.play_sequence(&request).unwrap(), PlaybackOutcome::Completed);
    engine.release();

    let synth = ToneSynthesizer::new(44100);
    let expected: usize = player
        .symbols(&request)
        .iter()
        .map(|s| synth.sample_count(s.duration_ms))
        .sum();

    let reader = hound::WavReader::open(&path).unwrap();
    assert_eq!(reader.spec().channels, 1);
    assert_eq!(reader.spec().sample_rate, 44100);
    assert_eq!(reader.len() as usize, expected);
}
