//! Terminal presentation.
//!
//! Turns input lines into [`Command`]s and renders [`SessionSnapshot`]s and
//! log entries as plain lines for stdout.

use chrono::Local;
use tandem_core::{
    SessionMode, SessionSnapshot,
    message_log::{Message, Payload},
};

pub const HELP: &str = "\
commands:
  <text>      send a text message
  /voice      switch to voice mode
  /text       switch to text mode
  /toggle     switch to the other mode
  /rec        start recording (voice mode)
  /stop       stop recording and send the clip
  /status     show connection and session status
  /help       show this help
  /quit       leave the session
lines starting with // are sent as text without the first slash";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Say(String),
    Voice,
    Text,
    Toggle,
    Record,
    Stop,
    Status,
    Help,
    Quit,
    Unknown(String),
}

/// Parses one input line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Option<Command> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Some(escaped) = trimmed.strip_prefix("//") {
        return Some(Command::Say(format!("/{escaped}")));
    }
    let Some(name) = trimmed.strip_prefix('/') else {
        return Some(Command::Say(line.to_string()));
    };
    let command = match name.to_ascii_lowercase().as_str() {
        "voice" => Command::Voice,
        "text" => Command::Text,
        "toggle" | "mode" => Command::Toggle,
        "rec" | "record" => Command::Record,
        "stop" => Command::Stop,
        "status" => Command::Status,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        _ => Command::Unknown(trimmed.to_string()),
    };
    Some(command)
}

/// One-line summary of channel status labels and session flags.
pub fn render_status(snapshot: &SessionSnapshot) -> String {
    let mut line = format!(
        "text: {} | audio: {} | mode: {}",
        snapshot.text_state.label(),
        snapshot.audio_state.label(),
        snapshot.mode
    );
    if snapshot.flags.awaiting_response {
        line.push_str(" | awaiting reply");
    }
    if snapshot.playback.is_playing {
        line.push_str(&format!(" | playing {}", snapshot.playback.active_count));
    }
    if snapshot.flags.is_recording {
        line.push_str(" | recording");
    }
    line
}

/// Which controls are usable right now. The record control only exists in
/// voice mode.
pub fn render_controls(snapshot: &SessionSnapshot) -> String {
    let on_off = |enabled: bool| if enabled { "on" } else { "off" };
    let mut line = format!(
        "[send: {}] [toggle: {}]",
        on_off(snapshot.text_send_ready),
        on_off(snapshot.voice_toggle_enabled)
    );
    if snapshot.mode == SessionMode::Voice {
        let record = if snapshot.flags.is_recording {
            "recording"
        } else {
            on_off(snapshot.record_enabled)
        };
        line.push_str(&format!(" [rec: {record}]"));
    }
    line
}

pub fn render_message(message: &Message) -> String {
    let at = message.timestamp.with_timezone(&Local).format("%H:%M:%S");
    match &message.payload {
        Payload::Text(text) => format!("{at} agent> {text}"),
        Payload::Audio(audio) => format!(
            "{at} agent> [{} {} {} bytes]",
            audio.clip_id, audio.mime, audio.len
        ),
    }
}
