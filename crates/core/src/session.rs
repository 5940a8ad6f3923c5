//! Session State Machine
//!
//! [`SessionController`] composes the two channels, the capture recorder, the
//! playback queue and the message log. It owns the interaction mode, the
//! per-activation handshake, and the awaiting-response flag, and it is the only
//! place where user actions are gated.

use crate::{
    SessionEvent,
    capture::{AudioCaptureRecorder, CaptureGate},
    connection::{Channel, ChannelEvent, ChannelKind, ChannelSignal, ConnectionState, Inbound, Outbound},
    message_log::{MessageLog, Payload},
    playback::{AudioPlaybackQueue, PlaybackState},
};
use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn};

/// Handshake sent on the audio channel once per voice activation.
pub const DEFAULT_HANDSHAKE_TOKEN: &str = "hello";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    #[default]
    Text,
    Voice,
}

impl SessionMode {
    pub fn toggled(self) -> Self {
        match self {
            SessionMode::Text => SessionMode::Voice,
            SessionMode::Voice => SessionMode::Text,
        }
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionMode::Text => write!(f, "text"),
            SessionMode::Voice => write!(f, "voice"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionFlags {
    /// A request went out and nothing has come back yet.
    pub awaiting_response: bool,
    /// The handshake went out during the current voice activation.
    pub hello_sent: bool,
    pub is_recording: bool,
}

/// Read-only view of the session for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub mode: SessionMode,
    pub text_state: ConnectionState,
    pub audio_state: ConnectionState,
    pub flags: SessionFlags,
    pub playback: PlaybackState,
    /// Text send is possible for any non-blank input.
    pub text_send_ready: bool,
    pub voice_toggle_enabled: bool,
    pub record_enabled: bool,
    pub messages: usize,
}

pub struct SessionController {
    text: Box<dyn Channel>,
    audio: Box<dyn Channel>,
    recorder: AudioCaptureRecorder,
    playback: AudioPlaybackQueue,
    log: MessageLog,
    mode: SessionMode,
    flags: SessionFlags,
    handshake_token: String,
}

impl SessionController {
    pub fn new(
        text: Box<dyn Channel>,
        audio: Box<dyn Channel>,
        recorder: AudioCaptureRecorder,
        playback: AudioPlaybackQueue,
    ) -> Self {
        Self {
            text,
            audio,
            recorder,
            playback,
            log: MessageLog::new(),
            mode: SessionMode::Text,
            flags: SessionFlags::default(),
            handshake_token: DEFAULT_HANDSHAKE_TOKEN.to_string(),
        }
    }

    pub fn with_handshake_token(mut self, token: impl Into<String>) -> Self {
        self.handshake_token = token.into();
        self
    }

    /// Connects the text channel. The audio channel waits for voice mode.
    pub fn start(&mut self) {
        self.text.connect();
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn flags(&self) -> SessionFlags {
        self.flags
    }

    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.playback.state()
    }

    pub fn text_state(&self) -> ConnectionState {
        self.text.state()
    }

    pub fn audio_state(&self) -> ConnectionState {
        self.audio.state()
    }

    pub fn can_send_text(&self, input: &str) -> bool {
        self.text.state().is_open() && !input.trim().is_empty() && !self.flags.awaiting_response
    }

    /// The mode toggle is locked only while awaiting a response in text mode.
    pub fn voice_toggle_enabled(&self) -> bool {
        !(self.flags.awaiting_response && self.mode == SessionMode::Text)
    }

    pub fn can_start_recording(&self) -> bool {
        self.audio.state().is_open() && !self.flags.awaiting_response && !self.playback.is_playing()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            mode: self.mode,
            text_state: self.text.state(),
            audio_state: self.audio.state(),
            flags: self.flags,
            playback: self.playback.state(),
            text_send_ready: self.text.state().is_open() && !self.flags.awaiting_response,
            voice_toggle_enabled: self.voice_toggle_enabled(),
            record_enabled: self.can_start_recording(),
            messages: self.log.len(),
        }
    }

    /// Switches the interaction mode. Returns `false` if the toggle is locked.
    pub fn set_mode(&mut self, mode: SessionMode) -> bool {
        if mode == self.mode {
            return true;
        }
        if !self.voice_toggle_enabled() {
            debug!(requested = %mode, "Mode toggle is locked while awaiting a response.");
            return false;
        }

        match mode {
            SessionMode::Voice => {
                self.mode = SessionMode::Voice;
                self.flags.hello_sent = false;
                self.audio.connect();
                self.try_handshake();
            }
            SessionMode::Text => {
                if self.recorder.is_recording() {
                    self.stop_recording();
                }
                self.mode = SessionMode::Text;
                self.flags.hello_sent = false;
            }
        }
        info!(%mode, "Session mode changed.");
        true
    }

    pub fn toggle_mode(&mut self) -> bool {
        self.set_mode(self.mode.toggled())
    }

    /// Sends `value` over the text channel if the send is currently allowed.
    pub fn send_text(&mut self, value: &str) -> bool {
        if !self.can_send_text(value) {
            debug!("Text send rejected by gating.");
            return false;
        }
        if !self.text.send(Outbound::Text(value.to_string())) {
            return false;
        }
        self.flags.awaiting_response = true;
        true
    }

    /// Starts a push-to-talk recording. Returns whether recording began.
    pub async fn start_recording(&mut self) -> bool {
        if !self.can_start_recording() {
            debug!("Recording start rejected by gating.");
            return false;
        }
        let gate = CaptureGate {
            audio_open: self.audio.state().is_open(),
            playback_active: self.playback.is_playing(),
        };
        let started = self.recorder.start(gate).await;
        self.flags.is_recording = self.recorder.is_recording();
        started
    }

    /// Stops the recording and sends the clip over the audio channel.
    ///
    /// Once a recording was in progress the flags are updated whether or not
    /// the channel accepted the clip.
    pub fn stop_recording(&mut self) -> bool {
        let Some(clip) = self.recorder.stop() else {
            return false;
        };
        let len = clip.data.len();
        if self.audio.send(Outbound::Binary(clip.data)) {
            info!(mime = %clip.mime, bytes = len, "Recording sent.");
        } else {
            warn!(mime = %clip.mime, bytes = len, "Audio channel not open; recording was not delivered.");
        }
        self.flags.is_recording = false;
        self.flags.awaiting_response = true;
        true
    }

    pub fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Channel(ChannelEvent { kind, signal }) => match signal {
                ChannelSignal::StateChanged(state) => self.on_state_changed(kind, state),
                ChannelSignal::Received(payload) => self.on_received(kind, payload),
            },
            SessionEvent::Playback(event) => {
                self.playback.on_event(event);
            }
        }
    }

    /// Releases the microphone without sending and stops all playback.
    pub fn shutdown(&mut self) {
        self.recorder.abandon();
        self.flags.is_recording = false;
        self.playback.stop_all();
    }

    fn on_state_changed(&mut self, kind: ChannelKind, state: ConnectionState) {
        info!(channel = %kind, %state, "Channel state changed.");
        if kind == ChannelKind::Audio && state == ConnectionState::Open {
            self.try_handshake();
        }
    }

    fn on_received(&mut self, kind: ChannelKind, payload: Inbound) {
        self.flags.awaiting_response = false;
        match (kind, payload) {
            (ChannelKind::Audio, Inbound::Binary(data)) => match self.playback.enqueue(data, None) {
                Ok(audio_ref) => {
                    self.log.push_remote(Payload::Audio(audio_ref));
                }
                Err(e) => debug!(error = %e, "Inbound audio frame dropped."),
            },
            (_, Inbound::Text(text)) => {
                self.log.push_remote(Payload::Text(text));
            }
            (ChannelKind::Text, Inbound::Binary(data)) => {
                let text = String::from_utf8_lossy(&data).into_owned();
                self.log.push_remote(Payload::Text(text));
            }
        }
    }

    fn try_handshake(&mut self) {
        if self.mode != SessionMode::Voice || self.flags.hello_sent {
            return;
        }
        if !self.audio.state().is_open() {
            debug!("Handshake deferred until the audio channel opens.");
            return;
        }
        if self.audio.send(Outbound::Text(self.handshake_token.clone())) {
            self.flags.hello_sent = true;
            info!("Voice handshake sent.");
        }
    }
}
