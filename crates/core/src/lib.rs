//! Session coordination for a dual-channel (text + audio) conversational agent.
//!
//! Everything in this crate is free of I/O: sockets, microphones and speakers
//! are reached through the [`connection::Channel`], [`capture::CaptureDevice`]
//! and [`playback::PlaybackBackend`] traits, and their activity flows back in
//! as [`SessionEvent`]s.

pub mod capture;
pub mod connection;
pub mod message_log;
pub mod playback;
pub mod session;

use bytes::Bytes;

pub use connection::{
    Channel, ChannelEvent, ChannelKind, ChannelSignal, CloseInfo, ConnectionState, Inbound,
    Outbound, ReconnectDecision, ReconnectPolicy, ReconnectTracker,
};
pub use playback::{PlaybackEvent, PlaybackMode, PlaybackOutcome, PlaybackState};
pub use session::{SessionController, SessionMode, SessionSnapshot};

/// An encoded piece of audio together with its declared type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub mime: String,
    pub data: Bytes,
}

/// Represents everything, other than direct user actions, that can change
/// session state.
///
/// The runtime funnels channel and playback activity through this enum into
/// [`SessionController::handle_event`], one event at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A state change or inbound payload on one of the two channels.
    Channel(ChannelEvent),
    /// Playback of an inbound clip ended, failed, or was paused.
    Playback(PlaybackEvent),
}

impl From<ChannelEvent> for SessionEvent {
    fn from(event: ChannelEvent) -> Self {
        SessionEvent::Channel(event)
    }
}

impl From<PlaybackEvent> for SessionEvent {
    fn from(event: PlaybackEvent) -> Self {
        SessionEvent::Playback(event)
    }
}
