//! Parley CLI: replay recorded sessions and exercise local track acquisition

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use parley_core::prelude::*;
use parley_core::sim::{RecordingMediaEngine, SimulatedDeviceLayer};
use printer::JsonLinePrinter;
use std::path::{Path, PathBuf};
use std::sync::Arc;

mod printer;
mod script;

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Session configuration file (JSON)
    #[arg(short, long, env = "PARLEY_CONFIG")]
    config: Option<PathBuf>,

    /// Tracing filter directive
    #[arg(long, env = "RUST_LOG", default_value = "parley=info")]
    log_filter: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a recorded session script against the reconciliation engine
    Replay {
        /// Script file: a JSON array of steps
        script: PathBuf,
    },

    /// Acquire local tracks from simulated devices
    Acquire {
        /// Make the microphone fail
        #[arg(long)]
        fail_audio: bool,

        /// Make the camera fail
        #[arg(long)]
        fail_video: bool,

        /// Join with audio muted
        #[arg(long)]
        audio_muted: bool,

        /// Join with video muted
        #[arg(long)]
        video_muted: bool,

        /// Microphone to use instead of the configured default
        #[arg(long)]
        audio_device: Option<String>,

        /// Camera to use instead of the configured default
        #[arg(long)]
        video_device: Option<String>,
    },

    /// Show the effective configuration
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&cli.log_filter))
        .init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Replay { script } => {
            handle_replay(config, &script)?;
        }
        Commands::Acquire {
            fail_audio,
            fail_video,
            audio_muted,
            video_muted,
            audio_device,
            video_device,
        } => {
            let devices = SimulatedDeviceLayer::new();
            if fail_audio {
                devices.set_failing(MediaKind::Audio, true);
            }
            if fail_video {
                devices.set_failing(MediaKind::Video, true);
            }
            let initial = InitialSettings {
                is_audio_muted: audio_muted,
                is_video_muted: video_muted,
                audio_input_device_id: audio_device,
                video_device_id: video_device,
                ..Default::default()
            };
            handle_acquire(config, devices, &initial).await?;
        }
        Commands::Status => {
            handle_status(&config)?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<SessionConfig> {
    match path {
        Some(path) => SessionConfig::from_json_file(path)
            .with_context(|| format!("invalid config {}", path.display())),
        None => Ok(SessionConfig::default()),
    }
}

fn build_session(config: SessionConfig, devices: SimulatedDeviceLayer) -> Result<SessionClient> {
    let printer = Arc::new(JsonLinePrinter);
    let session = SessionClient::builder()
        .with_config(config)
        .with_listener(printer.clone())
        .with_audio_listener(printer.clone())
        .with_observer(printer)
        .with_device_layer(Arc::new(devices))
        .with_media_engine(Arc::new(RecordingMediaEngine::new()))
        .build()?;
    Ok(session)
}

fn handle_replay(config: SessionConfig, path: &Path) -> Result<()> {
    let steps = script::load(path)?;
    println!("▶️  Replaying {} steps from {}", steps.len(), path.display());

    let session = build_session(config, SimulatedDeviceLayer::new())?;
    for step in steps {
        step.apply(&session);
    }

    let pending = session.with_engine(|engine| {
        println!();
        println!("📋 Peers after replay:");
        for peer in engine.remote_peers() {
            let tracks: Vec<String> = peer
                .tracks()
                .map(|t| format!("{}:{}", t.kind(), t.source()))
                .collect();
            println!("   {} ({}) [{}]", peer.peer_id, peer.name, tracks.join(", "));
        }
        engine.pending_track_count()
    });
    if pending > 0 {
        println!("⏳ {pending} native tracks still waiting for metadata or their peer");
    }
    Ok(())
}

async fn handle_acquire(
    config: SessionConfig,
    devices: SimulatedDeviceLayer,
    initial: &InitialSettings,
) -> Result<()> {
    let session = build_session(config, devices)?;
    session
        .store()
        .set_publish_params(Some(PublishParams::default()));

    let tracks = session.tracks_to_publish(initial).await?;
    println!("🎙️  {} local tracks to publish", tracks.len());
    for track in &tracks {
        let native = track.native().await;
        let state = track.state().await;
        let placeholder = track.is_placeholder().await;
        let enabled = track.is_enabled().await;
        println!(
            "   {} {} state={} placeholder={} enabled={} device={}",
            track.kind(),
            track.id(),
            state,
            placeholder,
            enabled,
            native.settings().device_id.as_deref().unwrap_or("-"),
        );
    }

    session.leave().await;
    println!("👋 Released local media");
    Ok(())
}

fn handle_status(config: &SessionConfig) -> Result<()> {
    println!("📊 Parley CLI Status");
    println!("====================");
    println!("{}", serde_json::to_string_pretty(config)?);
    println!();
    println!("Available commands:");
    println!("  parley replay <script>   - Replay a recorded session");
    println!("  parley acquire [options] - Acquire local tracks from simulated devices");
    println!("  parley status            - Show this status");
    println!();
    println!("Use 'parley --help' for detailed options");

    Ok(())
}
