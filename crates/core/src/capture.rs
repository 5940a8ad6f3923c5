//! Push-to-talk Audio Capture
//!
//! [`AudioCaptureRecorder`] owns the microphone for the length of one
//! recording. It negotiates an encoding with the [`CaptureDevice`], only
//! reports "recording" once the device has actually been acquired and
//! started, and turns the buffered chunks into a single [`AudioClip`] when the
//! recording stops.

use crate::AudioClip;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tracing::{debug, info, warn};

/// Encodings requested from the capture device, most preferred first.
pub const PREFERRED_CAPTURE_MIMES: [&str; 2] = ["audio/webm;codecs=opus", "audio/webm"];

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("microphone permission denied")]
    PermissionDenied,
    #[error("no capture device available: {0}")]
    NoDevice(String),
    #[error("capture stream error: {0}")]
    Stream(String),
}

/// The platform's microphone: permission, codec support and acquisition.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CaptureDevice: Send {
    /// Whether the device can encode to `mime`.
    fn is_type_supported(&self, mime: &str) -> bool;

    /// The encoding used when none of the preferred ones is supported.
    fn default_mime(&self) -> String;

    /// Acquires the device, which may wait for user consent.
    async fn acquire(&mut self, mime: &str) -> Result<Box<dyn CaptureTrack>, CaptureError>;
}

/// An acquired capture device.
pub trait CaptureTrack: Send {
    /// Begins buffering encoded chunks.
    fn start(&mut self) -> Result<(), CaptureError>;

    /// Stops capturing and hands back every chunk buffered since `start`.
    fn finish(&mut self) -> Vec<Bytes>;

    /// Stops all underlying tracks and gives the device back.
    fn release(self: Box<Self>);
}

/// What the recorder needs to know about the rest of the session to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureGate {
    pub audio_open: bool,
    pub playback_active: bool,
}

/// Picks the first preferred encoding the device supports, or its default.
pub fn negotiate_mime(device: &dyn CaptureDevice) -> String {
    PREFERRED_CAPTURE_MIMES
        .iter()
        .find(|mime| device.is_type_supported(mime))
        .map(|mime| mime.to_string())
        .unwrap_or_else(|| device.default_mime())
}

struct ActiveCapture {
    track: Box<dyn CaptureTrack>,
    mime: String,
}

pub struct AudioCaptureRecorder {
    device: Box<dyn CaptureDevice>,
    active: Option<ActiveCapture>,
}

impl AudioCaptureRecorder {
    pub fn new(device: Box<dyn CaptureDevice>) -> Self {
        Self {
            device,
            active: None,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    /// Encoding of the recording in progress.
    pub fn negotiated_mime(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.mime.as_str())
    }

    /// Starts a recording. Any unmet precondition or capture failure leaves
    /// the recorder untouched and returns `false`.
    pub async fn start(&mut self, gate: CaptureGate) -> bool {
        if self.active.is_some() {
            debug!("Recording already in progress; ignoring start.");
            return false;
        }
        if gate.playback_active {
            debug!("Playback is active; not starting a recording.");
            return false;
        }
        if !gate.audio_open {
            debug!("Audio channel is not open; not starting a recording.");
            return false;
        }

        let mime = negotiate_mime(self.device.as_ref());
        let mut track = match self.device.acquire(&mime).await {
            Ok(track) => track,
            Err(e) => {
                warn!(error = %e, "Could not acquire the microphone.");
                return false;
            }
        };
        if let Err(e) = track.start() {
            warn!(error = %e, "Capture device failed to start.");
            track.release();
            return false;
        }

        info!(%mime, "Recording started.");
        self.active = Some(ActiveCapture { track, mime });
        true
    }

    /// Ends the recording and returns the finished clip, tagged with the
    /// negotiated encoding. The device is released before returning.
    pub fn stop(&mut self) -> Option<AudioClip> {
        let ActiveCapture { mut track, mime } = self.active.take()?;
        let chunks = track.finish();
        track.release();

        let mut data = BytesMut::with_capacity(chunks.iter().map(Bytes::len).sum());
        for chunk in &chunks {
            data.extend_from_slice(chunk);
        }
        info!(%mime, chunks = chunks.len(), bytes = data.len(), "Recording stopped.");
        Some(AudioClip {
            mime,
            data: data.freeze(),
        })
    }

    /// Releases the device without producing a clip.
    pub fn abandon(&mut self) {
        if let Some(ActiveCapture { mut track, .. }) = self.active.take() {
            track.finish();
            track.release();
            info!("Recording abandoned.");
        }
    }
}
