//! Speaker output via CPAL.
//!
//! Every clip gets its own output stream on its own thread, so overlapping
//! clips mix in the device. Decoded samples are resampled to the device rate
//! and staged in a ring buffer that the output callback drains; the thread
//! reports how playback ended through a [`PlaybackEvent`].

use crate::audio_utils::{DecodedAudio, decode_clip, resample};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use ringbuf::{
    HeapCons, HeapRb,
    traits::{Consumer, Producer, Split},
};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tandem_core::{
    AudioClip, PlaybackEvent, PlaybackOutcome,
    playback::{ClipId, PlaybackBackend, PlaybackError},
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(20);
// Lets the device play out what the callback already copied.
const DRAIN_TAIL: Duration = Duration::from_millis(60);

pub struct NativePlaybackBackend {
    events: mpsc::UnboundedSender<PlaybackEvent>,
    loaded: HashMap<ClipId, DecodedAudio>,
    playing: HashMap<ClipId, Arc<AtomicBool>>,
}

impl NativePlaybackBackend {
    /// `events` receives one [`PlaybackEvent`] for every clip that starts playing.
    pub fn new(events: mpsc::UnboundedSender<PlaybackEvent>) -> Self {
        Self {
            events,
            loaded: HashMap::new(),
            playing: HashMap::new(),
        }
    }
}

impl PlaybackBackend for NativePlaybackBackend {
    fn load(&mut self, id: ClipId, clip: AudioClip) -> Result<(), PlaybackError> {
        let decoded = decode_clip(&clip)?;
        debug!(
            %id,
            mime = %clip.mime,
            samples = decoded.samples.len(),
            sample_rate = decoded.sample_rate,
            "Clip decoded."
        );
        self.loaded.insert(id, decoded);
        Ok(())
    }

    fn play(&mut self, id: ClipId) -> Result<(), PlaybackError> {
        let audio = self
            .loaded
            .remove(&id)
            .ok_or_else(|| PlaybackError::Device(format!("{id} was never loaded")))?;
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let events = self.events.clone();

        std::thread::Builder::new()
            .name(format!("tandem-playback-{}", id.0))
            .spawn(move || {
                let outcome = play_blocking(audio, &thread_stop).unwrap_or_else(|e| {
                    warn!(%id, error = %e, "Playback failed.");
                    PlaybackOutcome::Errored
                });
                debug!(%id, ?outcome, "Playback finished.");
                let _ = events.send(PlaybackEvent {
                    clip_id: id,
                    outcome,
                });
            })
            .map_err(|e| PlaybackError::Device(e.to_string()))?;

        self.playing.insert(id, stop);
        Ok(())
    }

    fn pause(&mut self, id: ClipId) {
        if let Some(stop) = self.playing.get(&id) {
            stop.store(true, Ordering::Release);
        }
    }

    fn release(&mut self, id: ClipId) {
        self.loaded.remove(&id);
        if let Some(stop) = self.playing.remove(&id) {
            stop.store(true, Ordering::Release);
        }
    }
}

/// Copies one sample per frame to every channel, emitting silence once the
/// source runs dry.
fn fill_frames<T: Copy>(
    out: &mut [T],
    channels: usize,
    source: &mut HeapCons<f32>,
    drained: &AtomicBool,
    convert: impl Fn(f32) -> T,
) {
    for frame in out.chunks_mut(channels.max(1)) {
        let sample = match source.try_pop() {
            Some(sample) => sample,
            None => {
                drained.store(true, Ordering::Release);
                0.0
            }
        };
        frame.fill(convert(sample));
    }
}

fn device_error(e: impl std::fmt::Display) -> PlaybackError {
    PlaybackError::Device(e.to_string())
}

/// Plays `audio` to completion on the default output device, or until `stop`
/// is raised.
fn play_blocking(audio: DecodedAudio, stop: &AtomicBool) -> Result<PlaybackOutcome, PlaybackError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| PlaybackError::Device("no default output device available".into()))?;
    let supported = device.default_output_config().map_err(device_error)?;
    let format = supported.sample_format();
    let config: StreamConfig = supported.into();
    let channels = usize::from(config.channels.max(1));

    let samples = resample(&audio.samples, audio.sample_rate, config.sample_rate.0).map_err(device_error)?;
    let (mut producer, mut consumer) = HeapRb::<f32>::new(samples.len().max(1)).split();
    producer.push_slice(&samples);

    let drained = Arc::new(AtomicBool::new(samples.is_empty()));
    let callback_drained = drained.clone();
    let err_fn = |err: cpal::StreamError| warn!(error = %err, "Playback stream error.");
    let stream = match format {
        SampleFormat::F32 => device.build_output_stream(
            &config,
            move |out: &mut [f32], _| fill_frames(out, channels, &mut consumer, &callback_drained, |s| s),
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_output_stream(
            &config,
            move |out: &mut [i16], _| {
                fill_frames(out, channels, &mut consumer, &callback_drained, |s| {
                    (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
                })
            },
            err_fn,
            None,
        ),
        other => {
            return Err(PlaybackError::Device(format!("unsupported output format: {other:?}")));
        }
    }
    .map_err(device_error)?;
    stream.play().map_err(device_error)?;

    loop {
        if stop.load(Ordering::Acquire) {
            return Ok(PlaybackOutcome::Paused);
        }
        if drained.load(Ordering::Acquire) {
            std::thread::sleep(DRAIN_TAIL);
            return Ok(PlaybackOutcome::Ended);
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}
