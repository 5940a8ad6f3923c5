//! Inbound Audio Playback
//!
//! [`AudioPlaybackQueue`] turns binary frames received on the audio channel
//! into playable resources, starts them on a [`PlaybackBackend`], and keeps the
//! live-playback bookkeeping that gates new recordings. Every resource is
//! released exactly once, whether playback ended, failed, or was paused.

use crate::{AudioClip, message_log::AudioRef};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeSet, VecDeque},
    fmt,
};
use tracing::{debug, warn};

/// Type assumed for a frame when the channel did not declare one.
pub const DEFAULT_PLAYBACK_MIME: &str = "audio/wav";

/// Identifier of one inbound frame for its whole playback lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ClipId(pub u64);

impl fmt::Display for ClipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "clip-{}", self.0)
    }
}

/// How overlapping frames are scheduled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackMode {
    /// Every frame starts as soon as it arrives; overlapping frames play together.
    #[default]
    Concurrent,
    /// Frames play one after another in arrival order.
    Sequential,
}

/// Live playback bookkeeping. `is_playing == (active_count > 0)` always holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlaybackState {
    pub active_count: usize,
    pub is_playing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Ended,
    Errored,
    Paused,
}

/// Reported by a backend when playback of a clip stops for any reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackEvent {
    pub clip_id: ClipId,
    pub outcome: PlaybackOutcome,
}

#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("unsupported audio type `{0}`")]
    Unsupported(String),
    #[error("malformed audio frame: {0}")]
    Malformed(String),
    #[error("playback device error: {0}")]
    Device(String),
}

/// The platform's playback primitive and resource lifecycle.
pub trait PlaybackBackend: Send {
    /// Builds a playable resource for `clip` and registers it under `id`.
    fn load(&mut self, id: ClipId, clip: AudioClip) -> Result<(), PlaybackError>;

    /// Starts playing a loaded resource. The end of playback must later be
    /// reported as a [`PlaybackEvent`] for the same id.
    fn play(&mut self, id: ClipId) -> Result<(), PlaybackError>;

    /// Stops a playing resource early.
    fn pause(&mut self, id: ClipId);

    /// Frees the resource. Called exactly once for every loaded id.
    fn release(&mut self, id: ClipId);
}

pub struct AudioPlaybackQueue {
    backend: Box<dyn PlaybackBackend>,
    mode: PlaybackMode,
    default_mime: String,
    next_id: u64,
    playing: BTreeSet<ClipId>,
    waiting: VecDeque<ClipId>,
    state: PlaybackState,
}

impl AudioPlaybackQueue {
    pub fn new(backend: Box<dyn PlaybackBackend>, mode: PlaybackMode) -> Self {
        Self {
            backend,
            mode,
            default_mime: DEFAULT_PLAYBACK_MIME.to_string(),
            next_id: 0,
            playing: BTreeSet::new(),
            waiting: VecDeque::new(),
            state: PlaybackState::default(),
        }
    }

    /// Overrides the type assumed for undeclared frames.
    pub fn with_default_mime(mut self, mime: impl Into<String>) -> Self {
        self.default_mime = mime.into();
        self
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state.is_playing
    }

    pub fn mode(&self) -> PlaybackMode {
        self.mode
    }

    /// Admits one inbound frame and starts it unless it has to wait its turn.
    ///
    /// A frame the backend cannot load is dropped and leaves the counters
    /// untouched.
    pub fn enqueue(&mut self, data: Bytes, mime: Option<&str>) -> Result<AudioRef, PlaybackError> {
        let id = ClipId(self.next_id);
        self.next_id += 1;

        let mime = match mime {
            Some(m) if !m.trim().is_empty() => m.to_string(),
            _ => self.default_mime.clone(),
        };
        let audio_ref = AudioRef {
            clip_id: id,
            mime: mime.clone(),
            len: data.len(),
        };

        if let Err(e) = self.backend.load(id, AudioClip { mime, data }) {
            warn!(clip = %id, error = %e, "Dropping inbound audio frame that cannot be played.");
            return Err(e);
        }

        self.state.active_count += 1;
        self.waiting.push_back(id);
        self.pump();
        self.sync();
        debug!(clip = %id, active = self.state.active_count, "Audio frame admitted.");
        Ok(audio_ref)
    }

    /// Applies a backend report. Returns `false` for ids that are not playing,
    /// such as a second report for an already finished clip.
    pub fn on_event(&mut self, event: PlaybackEvent) -> bool {
        if !self.playing.remove(&event.clip_id) {
            debug!(clip = %event.clip_id, outcome = ?event.outcome, "Ignoring report for inactive clip.");
            return false;
        }
        self.backend.release(event.clip_id);
        self.state.active_count = self.state.active_count.saturating_sub(1);
        debug!(clip = %event.clip_id, outcome = ?event.outcome, active = self.state.active_count, "Playback finished.");
        self.pump();
        self.sync();
        true
    }

    /// Pauses and releases everything, playing or waiting.
    pub fn stop_all(&mut self) {
        let playing = std::mem::take(&mut self.playing);
        for id in playing {
            self.backend.pause(id);
            self.backend.release(id);
        }
        for id in self.waiting.drain(..) {
            self.backend.release(id);
        }
        self.state.active_count = 0;
        self.sync();
    }

    /// Starts waiting clips as far as the mode allows.
    fn pump(&mut self) {
        loop {
            if self.mode == PlaybackMode::Sequential && !self.playing.is_empty() {
                return;
            }
            let Some(id) = self.waiting.pop_front() else {
                return;
            };
            match self.backend.play(id) {
                Ok(()) => {
                    self.playing.insert(id);
                }
                Err(e) => {
                    // A clip that fails to start is bookkept like one that ended.
                    warn!(clip = %id, error = %e, "Audio playback failed to start.");
                    self.backend.release(id);
                    self.state.active_count = self.state.active_count.saturating_sub(1);
                }
            }
        }
    }

    fn sync(&mut self) {
        debug_assert_eq!(
            self.state.active_count,
            self.playing.len() + self.waiting.len()
        );
        self.state.is_playing = self.state.active_count > 0;
    }
}
