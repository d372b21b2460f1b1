//! Splatstream Daemon - render streaming gateway
//!
//! Serves rendered avatar frames to one authoritative viewer over a
//! length-prefixed TCP protocol (default 127.0.0.1:6009) and pushes the same
//! frames to browser subscribers over WebSocket (default 0.0.0.0:8765).
//! The render loop runs on its own thread; the broadcaster runs on tokio.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use splatstream_broadcaster::FrameBroadcaster;
use splatstream_daemon::config::{DaemonConfig, Overrides};
use splatstream_daemon::pose::{HttpPoseSource, PoseSource, StaticPose};
use splatstream_daemon::render_loop::{LoopSummary, RenderLoop};
use splatstream_daemon::version::{version_long, version_short};
use splatstream_gateway::{Gateway, Session};

/// Render streaming gateway daemon
#[derive(Parser, Debug)]
#[command(name = "splatstream-daemon", version, about = "Render streaming gateway")]
struct Cli {
    /// Path to config.toml (created with defaults if missing)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Primary channel host, or "none" to disable the primary channel
    #[arg(long)]
    ip: Option<String>,

    /// Primary channel port
    #[arg(long)]
    port: Option<u16>,

    /// WebSocket broadcast address (host:port)
    #[arg(long)]
    broadcast_addr: Option<String>,

    /// Pose server base URL (e.g. http://127.0.0.1:9000)
    #[arg(long)]
    pose_url: Option<String>,

    /// Trailer sent after every frame on the primary channel
    #[arg(long)]
    trailer: Option<String>,

    /// Directory to save every rendered frame in as numbered JPEGs
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Stop after this many frames
    #[arg(long)]
    frames: Option<u64>,

    /// Print build information and exit
    #[arg(long)]
    build_info: bool,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            ip: self.ip.clone(),
            port: self.port,
            broadcast_addr: self.broadcast_addr.clone(),
            pose_url: self.pose_url.clone(),
            trailer: self.trailer.clone(),
            output_dir: self.output_dir.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.build_info {
        print!("{}", version_long());
        return Ok(());
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_level(true)
        .init();

    info!("🎬 Starting {}", version_short());

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => DaemonConfig::load_from(path),
        None => DaemonConfig::load(),
    }
    .context("Failed to load configuration")?;
    config.apply(&cli.overrides());
    config.validate().context("Invalid configuration")?;

    info!("📋 Configuration loaded from {}", config.config_path.display());

    // Primary channel
    let session = match config.primary_addr() {
        Some(addr) => {
            let session = Session::bind(addr.as_str(), config.session_config())
                .with_context(|| format!("Failed to bind primary channel on {}", addr))?;
            info!("🔌 Primary channel on {}", addr);
            Some(session)
        }
        None => {
            warn!("⚠️ Primary channel disabled, running broadcast-only");
            None
        }
    };

    let gateway = Gateway::new(session, config.encoder());

    // Broadcast channel
    let broadcaster = FrameBroadcaster::new(config.broadcaster_config(), Arc::new(gateway.frames()));
    let broadcast_addr = broadcaster
        .start()
        .await
        .context("Failed to start frame broadcaster")?;
    info!(
        "📡 Broadcasting {} frames every {} ms on ws://{}",
        config.broadcast.format.as_str(),
        config.broadcast.frame_interval_ms,
        broadcast_addr
    );

    // Render loop on its own thread
    let shutdown = Arc::new(AtomicBool::new(false));
    let (done_tx, mut done_rx) = oneshot::channel::<Result<LoopSummary>>();

    let thread_config = config.clone();
    let thread_shutdown = Arc::clone(&shutdown);
    let max_frames = cli.frames;
    let render_thread = std::thread::Builder::new()
        .name("render-loop".to_string())
        .spawn(move || {
            let result = build_pose_source(&thread_config).map(|poses| {
                let mut render_loop = RenderLoop::new(
                    gateway,
                    poses,
                    thread_config.default_view().camera(),
                    thread_config.primary.trailer.clone(),
                    thread_config.frame_interval(),
                );
                if let Some(dir) = &thread_config.render.output_dir {
                    render_loop = render_loop.with_output_dir(dir.clone());
                }
                if let Some(frames) = max_frames {
                    render_loop = render_loop.with_max_frames(frames);
                }
                render_loop.run(&thread_shutdown)
            });
            let _ = done_tx.send(result);
        })
        .context("Failed to spawn render thread")?;

    info!("🚀 Splatstream daemon ready!");

    let finished = tokio::select! {
        result = &mut done_rx => Some(result),
        _ = tokio::signal::ctrl_c() => {
            info!("🛑 Received shutdown signal");
            None
        }
    };

    shutdown.store(true, Ordering::Relaxed);
    let outcome = match finished {
        Some(result) => result,
        None => done_rx.await,
    }
    .map_err(|_| anyhow!("Render thread exited without reporting"))
    .and_then(|result| result);

    if render_thread.join().is_err() {
        error!("Render thread panicked");
    }

    // Cleanup
    info!("🧹 Shutting down...");
    if let Err(e) = broadcaster.stop().await {
        warn!("Failed to stop broadcaster: {}", e);
    }

    let summary = outcome.context("Render loop failed")?;
    info!("📊 {}", summary);
    info!("👋 Splatstream daemon stopped");

    Ok(())
}

/// Pose server when configured, the rest pose otherwise
fn build_pose_source(config: &DaemonConfig) -> Result<Box<dyn PoseSource>> {
    match &config.pose.pose_url {
        Some(url) => {
            info!("🧍 Polling poses from {} ({:?} mode)", url, config.pose.pose_mode);
            Ok(Box::new(HttpPoseSource::from_config(&config.pose, url)?))
        }
        None => {
            info!("🧍 No pose server configured, rendering the rest pose");
            Ok(Box::new(StaticPose::default()))
        }
    }
}
