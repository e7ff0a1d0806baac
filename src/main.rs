use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use duplex_voice::{
    DocumentStoreBookkeeper, LogBookkeeper, SessionBookkeeper, SessionConfig, SessionState,
    StreamSession, audio,
};

/// Duplex voice client - streams the microphone to a realtime API and plays
/// the assistant's audio back
#[derive(Parser, Debug)]
#[command(name = "duplex-voice")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available audio input and output devices
    ListDevices,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    if let Some(Commands::ListDevices) = cli.command {
        return list_devices();
    }

    let config = match &cli.config {
        Some(path) => SessionConfig::from_file(path)?,
        None => SessionConfig::from_env(),
    };

    let bookkeeper: Arc<dyn SessionBookkeeper> = match std::env::var("DOC_STORE_URL") {
        Ok(url) => {
            info!(url, "recording session outcomes to document store");
            Arc::new(DocumentStoreBookkeeper::new(url))
        }
        Err(_) => Arc::new(LogBookkeeper),
    };

    let session = StreamSession::start(config, bookkeeper).await?;
    info!(session_id = session.session_id(), "session running, press Ctrl-C to stop");

    let mut state_rx = session.watch_state();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, stopping session");
            session.stop();
        }
        // The session can also end on its own, peer hangup or failure.
        _ = state_rx.wait_for(|s| matches!(s, SessionState::Closed | SessionState::Failed)) => {}
    }

    let report = session.wait().await;
    match report.state {
        SessionState::Closed => {
            info!(session_id = report.session_id, "session closed cleanly");
            Ok(())
        }
        state => {
            let cause = report
                .cause
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            warn!(session_id = report.session_id, %state, cause, "session did not close cleanly");
            Err(anyhow!("session ended in state {state}: {cause}"))
        }
    }
}

fn list_devices() -> anyhow::Result<()> {
    println!("Input devices:");
    for name in audio::input_device_names()? {
        println!("  {name}");
    }
    println!("Output devices:");
    for name in audio::output_device_names()? {
        println!("  {name}");
    }
    Ok(())
}
