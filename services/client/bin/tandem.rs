//! Main Entrypoint for the Tandem Terminal Client
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment and applying CLI overrides.
//! 2. Initializing logging on stderr.
//! 3. Building the native audio backends and both session channels.
//! 4. Running the session loop on stdin/stdout until the user leaves.

use anyhow::Context;
use clap::Parser;
use tandem_client::{
    audio::{NativeCaptureDevice, NativePlaybackBackend, list_input_devices},
    config::{Config, parse_server_url},
    session::{assemble, run_session},
};
use tokio::io::BufReader;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Command-line overrides for the environment configuration.
#[derive(Debug, Parser)]
#[command(author, version, about = "Talk to a conversational agent over text and voice")]
struct Cli {
    /// WebSocket base URL of the agent server (overrides TANDEM_SERVER_URL)
    #[arg(long)]
    server_url: Option<String>,

    /// Session identifier used in both channel paths (overrides TANDEM_SESSION_ID)
    #[arg(long)]
    session_id: Option<String>,

    /// Name of the microphone to record from (overrides TANDEM_INPUT_DEVICE)
    #[arg(long)]
    input_device: Option<String>,

    /// Print the available microphones and exit
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // --- 1. Load Configuration ---
    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(raw) = cli.server_url.as_deref() {
        config.server_url = parse_server_url("--server-url", raw)?;
    }
    if let Some(session_id) = cli.session_id {
        config.session_id = session_id;
    }
    if cli.input_device.is_some() {
        config.input_device = cli.input_device;
    }

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.as_str()))
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    if cli.list_devices {
        for name in list_input_devices().context("Failed to enumerate input devices")? {
            println!("{name}");
        }
        return Ok(());
    }

    // --- 3. Wire the Session ---
    info!(
        text = %config.text_url(),
        audio = %config.audio_url(),
        mode = ?config.playback_mode,
        "Configuration loaded. Starting session..."
    );
    let capture = NativeCaptureDevice::new(config.input_device.clone());
    let parts = assemble(&config, Box::new(capture), |events| {
        Box::new(NativePlaybackBackend::new(events))
    });

    // --- 4. Run Until the User Leaves ---
    run_session(parts, BufReader::new(tokio::io::stdin()), std::io::stdout()).await?;
    info!("Session ended.");
    Ok(())
}
