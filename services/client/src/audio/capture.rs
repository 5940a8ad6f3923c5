//! Microphone capture via CPAL.
//!
//! A `cpal::Stream` cannot leave the thread that built it, so each acquired
//! track owns a dedicated thread that holds the stream and answers start and
//! pause requests. Samples are downmixed to mono as they arrive and encoded as
//! a 16 kHz WAV clip when the recording finishes.

use crate::audio_utils::{CAPTURE_SAMPLE_RATE, WAV_MIME, encode_wav, resample};
use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use std::sync::{Arc, Mutex, mpsc as std_mpsc};
use std::thread::JoinHandle;
use tandem_core::capture::{CaptureDevice, CaptureError, CaptureTrack};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Lists input device names for `--list-devices`.
pub fn list_input_devices() -> anyhow::Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host.input_devices().context("no input devices available")?;
    Ok(devices.filter_map(|device| device.name().ok()).collect())
}

fn open_input(preferred: Option<&str>) -> Result<cpal::Device, CaptureError> {
    let host = cpal::default_host();
    match preferred {
        Some(name) => {
            let mut devices = host
                .input_devices()
                .map_err(|e| CaptureError::NoDevice(e.to_string()))?;
            devices
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| CaptureError::NoDevice(format!("input device '{name}' not found")))
        }
        None => host
            .default_input_device()
            .ok_or_else(|| CaptureError::NoDevice("no default input device available".into())),
    }
}

/// Appends one mono sample per interleaved frame.
fn append_downmixed<T: Copy>(buf: &mut Vec<f32>, data: &[T], channels: usize, to_f32: impl Fn(T) -> f32) {
    for frame in data.chunks(channels.max(1)) {
        let sum: f32 = frame.iter().map(|&s| to_f32(s)).sum();
        buf.push(sum / frame.len() as f32);
    }
}

fn build_stream(
    preferred: Option<&str>,
    buffer: Arc<Mutex<Vec<f32>>>,
) -> Result<(cpal::Stream, u32), CaptureError> {
    let device = open_input(preferred)?;
    let default_config = device
        .default_input_config()
        .map_err(|e| CaptureError::NoDevice(e.to_string()))?;
    let format = default_config.sample_format();
    let config: StreamConfig = default_config.into();
    let sample_rate = config.sample_rate.0;
    let channels = usize::from(config.channels.max(1));
    debug!(
        device = %device.name().unwrap_or_else(|_| "unknown".into()),
        ?format,
        sample_rate,
        channels,
        "Opening capture stream."
    );

    let err_fn = |err: cpal::StreamError| warn!(error = %err, "Capture stream error.");
    let stream = match format {
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _| {
                if let Ok(mut buf) = buffer.lock() {
                    append_downmixed(&mut buf, data, channels, |s| s);
                }
            },
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _| {
                if let Ok(mut buf) = buffer.lock() {
                    append_downmixed(&mut buf, data, channels, |s| s as f32 / 32_768.0);
                }
            },
            err_fn,
            None,
        ),
        SampleFormat::U16 => device.build_input_stream(
            &config,
            move |data: &[u16], _| {
                if let Ok(mut buf) = buffer.lock() {
                    append_downmixed(&mut buf, data, channels, |s| (s as f32 - 32_768.0) / 32_768.0);
                }
            },
            err_fn,
            None,
        ),
        other => {
            return Err(CaptureError::Stream(format!("unsupported sample format: {other:?}")));
        }
    };
    let stream = stream.map_err(|e| match e {
        cpal::BuildStreamError::DeviceNotAvailable => CaptureError::PermissionDenied,
        other => CaptureError::Stream(other.to_string()),
    })?;
    Ok((stream, sample_rate))
}

enum TrackCommand {
    Start(std_mpsc::Sender<Result<(), CaptureError>>),
    Pause(std_mpsc::Sender<()>),
}

/// Owns the stream until every command sender is gone.
fn capture_thread(
    preferred: Option<String>,
    buffer: Arc<Mutex<Vec<f32>>>,
    commands: std_mpsc::Receiver<TrackCommand>,
    ready: oneshot::Sender<Result<u32, CaptureError>>,
) {
    let stream = match build_stream(preferred.as_deref(), buffer) {
        Ok((stream, sample_rate)) => {
            if ready.send(Ok(sample_rate)).is_err() {
                return;
            }
            stream
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    while let Ok(command) = commands.recv() {
        match command {
            TrackCommand::Start(reply) => {
                let _ = reply.send(stream.play().map_err(|e| CaptureError::Stream(e.to_string())));
            }
            TrackCommand::Pause(reply) => {
                if let Err(e) = stream.pause() {
                    warn!(error = %e, "Failed to pause capture stream.");
                }
                let _ = reply.send(());
            }
        }
    }
    drop(stream);
    debug!("Capture stream closed.");
}

/// The system microphone, optionally pinned to a named input device.
pub struct NativeCaptureDevice {
    preferred: Option<String>,
}

impl NativeCaptureDevice {
    pub fn new(preferred: Option<String>) -> Self {
        Self { preferred }
    }
}

#[async_trait]
impl CaptureDevice for NativeCaptureDevice {
    /// Only uncompressed WAV is produced natively.
    fn is_type_supported(&self, mime: &str) -> bool {
        mime.eq_ignore_ascii_case(WAV_MIME)
    }

    fn default_mime(&self) -> String {
        WAV_MIME.to_string()
    }

    async fn acquire(&mut self, mime: &str) -> Result<Box<dyn CaptureTrack>, CaptureError> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (commands_tx, commands_rx) = std_mpsc::channel();
        let buffer = Arc::new(Mutex::new(Vec::new()));

        let preferred = self.preferred.clone();
        let thread_buffer = buffer.clone();
        let thread = std::thread::Builder::new()
            .name("tandem-capture".into())
            .spawn(move || capture_thread(preferred, thread_buffer, commands_rx, ready_tx))
            .map_err(|e| CaptureError::Stream(e.to_string()))?;

        let sample_rate = match ready_rx.await {
            Ok(result) => result?,
            Err(_) => return Err(CaptureError::Stream("capture thread exited".into())),
        };
        info!(%mime, sample_rate, "Microphone acquired.");
        Ok(Box::new(NativeCaptureTrack {
            commands: Some(commands_tx),
            thread: Some(thread),
            buffer,
            sample_rate,
        }))
    }
}

struct NativeCaptureTrack {
    commands: Option<std_mpsc::Sender<TrackCommand>>,
    thread: Option<JoinHandle<()>>,
    buffer: Arc<Mutex<Vec<f32>>>,
    sample_rate: u32,
}

impl NativeCaptureTrack {
    fn request<T>(&self, command: impl FnOnce(std_mpsc::Sender<T>) -> TrackCommand) -> Option<T> {
        let (tx, rx) = std_mpsc::channel();
        self.commands.as_ref()?.send(command(tx)).ok()?;
        rx.recv().ok()
    }
}

impl CaptureTrack for NativeCaptureTrack {
    fn start(&mut self) -> Result<(), CaptureError> {
        self.request(TrackCommand::Start)
            .unwrap_or_else(|| Err(CaptureError::Stream("capture thread is gone".into())))
    }

    fn finish(&mut self) -> Vec<Bytes> {
        let _ = self.request(TrackCommand::Pause);
        let samples = match self.buffer.lock() {
            Ok(mut buf) => std::mem::take(&mut *buf),
            Err(_) => {
                warn!("Capture buffer lock poisoned; dropping samples.");
                return Vec::new();
            }
        };
        if samples.is_empty() {
            warn!("No samples captured; check microphone permissions and availability.");
            return Vec::new();
        }

        match resample(&samples, self.sample_rate, CAPTURE_SAMPLE_RATE) {
            Ok(resampled) => vec![encode_wav(&resampled, CAPTURE_SAMPLE_RATE)],
            Err(e) => {
                warn!(error = %e, "Resampling failed; keeping the device rate.");
                vec![encode_wav(&samples, self.sample_rate)]
            }
        }
    }

    fn release(mut self: Box<Self>) {
        // Closing the command channel ends the capture thread.
        self.commands.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Capture thread panicked.");
            }
        }
        debug!("Microphone released.");
    }
}
