//! The session event loop.
//!
//! One task owns the [`SessionController`]. Channel events, playback events
//! and user commands are multiplexed with `tokio::select!` and applied one at
//! a time; after each one the loop prints new log entries and any change in
//! the status line.

use crate::config::Config;
use crate::console::{self, Command};
use anyhow::Context;
use std::io::Write;
use tandem_channel::ConnectionManager;
use tandem_core::{
    ChannelEvent, ChannelKind, PlaybackEvent, SessionController, SessionMode,
    capture::{AudioCaptureRecorder, CaptureDevice},
    playback::{AudioPlaybackQueue, PlaybackBackend},
};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// A wired controller together with the receiving ends of its event sources.
pub struct SessionParts {
    pub controller: SessionController,
    pub channel_rx: mpsc::UnboundedReceiver<ChannelEvent>,
    pub playback_rx: mpsc::UnboundedReceiver<PlaybackEvent>,
}

/// Builds both channels, the recorder and the playback queue from `config`.
///
/// `playback` receives the sender its backend reports playback events on.
pub fn assemble(
    config: &Config,
    capture: Box<dyn CaptureDevice>,
    playback: impl FnOnce(mpsc::UnboundedSender<PlaybackEvent>) -> Box<dyn PlaybackBackend>,
) -> SessionParts {
    let (channel_tx, channel_rx) = mpsc::unbounded_channel();
    let (playback_tx, playback_rx) = mpsc::unbounded_channel();

    let text = ConnectionManager::new(
        ChannelKind::Text,
        config.text_url(),
        config.reconnect_policy(),
        channel_tx.clone(),
    );
    let audio = ConnectionManager::new(
        ChannelKind::Audio,
        config.audio_url(),
        config.reconnect_policy(),
        channel_tx,
    );
    let queue = AudioPlaybackQueue::new(playback(playback_tx), config.playback_mode)
        .with_default_mime(config.playback_default_mime.clone());

    let controller = SessionController::new(
        Box::new(text),
        Box::new(audio),
        AudioCaptureRecorder::new(capture),
        queue,
    )
    .with_handshake_token(config.handshake_token.clone());

    SessionParts {
        controller,
        channel_rx,
        playback_rx,
    }
}

/// Tracks what has already been printed.
#[derive(Default)]
struct Screen {
    shown_messages: usize,
    last_status: String,
}

impl Screen {
    fn refresh<W: Write>(&mut self, controller: &SessionController, out: &mut W) -> anyhow::Result<()> {
        for message in &controller.log().entries()[self.shown_messages..] {
            writeln!(out, "{}", console::render_message(message))?;
        }
        self.shown_messages = controller.log().len();

        let snapshot = controller.snapshot();
        let status = format!(
            "-- {} {}",
            console::render_status(&snapshot),
            console::render_controls(&snapshot)
        );
        if status != self.last_status {
            writeln!(out, "{status}")?;
            self.last_status = status;
        }
        out.flush()?;
        Ok(())
    }
}

fn not_sent_reason(controller: &SessionController) -> String {
    let state = controller.text_state();
    if !state.is_open() {
        format!("text channel is {state}")
    } else if controller.flags().awaiting_response {
        "still waiting for a reply".to_string()
    } else {
        "nothing to send".to_string()
    }
}

/// Applies one command. Returns `false` when the session should end.
async fn apply<W: Write>(controller: &mut SessionController, command: Command, out: &mut W) -> anyhow::Result<bool> {
    match command {
        Command::Say(text) => {
            if !controller.send_text(&text) {
                writeln!(out, "(not sent: {})", not_sent_reason(controller))?;
            }
        }
        Command::Voice | Command::Text | Command::Toggle => {
            let target = match command {
                Command::Voice => SessionMode::Voice,
                Command::Text => SessionMode::Text,
                _ => controller.mode().toggled(),
            };
            if !controller.set_mode(target) {
                writeln!(out, "(mode is locked while waiting for a reply)")?;
            }
        }
        Command::Record => {
            if controller.mode() != SessionMode::Voice {
                writeln!(out, "(switch to voice mode to record)")?;
            } else if !controller.start_recording().await {
                writeln!(out, "(recording is not available right now)")?;
            }
        }
        Command::Stop => {
            if !controller.stop_recording() {
                writeln!(out, "(not recording)")?;
            }
        }
        Command::Status => {
            let snapshot = controller.snapshot();
            writeln!(out, "{}", console::render_status(&snapshot))?;
            writeln!(out, "{}", console::render_controls(&snapshot))?;
            debug!(snapshot = %serde_json::to_string(&snapshot)?, "Session snapshot.");
        }
        Command::Help => writeln!(out, "{}", console::HELP)?,
        Command::Quit => return Ok(false),
        Command::Unknown(name) => writeln!(out, "(unknown command {name}; try /help)")?,
    }
    Ok(true)
}

/// Runs the session until `/quit`, end of input, or Ctrl+C, then releases
/// the microphone and stops playback. Dropping the controller closes both
/// channels.
pub async fn run_session<R, W>(parts: SessionParts, input: R, mut out: W) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let SessionParts {
        mut controller,
        mut channel_rx,
        mut playback_rx,
    } = parts;
    let mut lines = input.lines();
    let mut screen = Screen::default();

    controller.start();
    writeln!(out, "type /help for commands")?;
    screen.refresh(&controller, &mut out)?;

    loop {
        tokio::select! {
            Some(event) = channel_rx.recv() => controller.handle_event(event.into()),
            Some(event) = playback_rx.recv() => controller.handle_event(event.into()),
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read input")? else {
                    info!("Input closed; leaving the session.");
                    break;
                };
                if let Some(command) = console::parse_command(&line) {
                    if !apply(&mut controller, command, &mut out).await? {
                        info!("Leaving the session.");
                        break;
                    }
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C; leaving the session.");
                break;
            }
        }
        screen.refresh(&controller, &mut out)?;
    }

    controller.shutdown();
    screen.refresh(&controller, &mut out)?;
    Ok(())
}
