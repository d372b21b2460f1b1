//! Configuration management

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use splatstream_broadcaster::{BroadcasterConfig, DEFAULT_BROADCAST_ADDR};
use splatstream_frame::{FrameEncoder, ImageFormat, DEFAULT_JPEG_QUALITY};
use splatstream_gateway::protocol::{DEFAULT_MAX_MESSAGE_BYTES, DEFAULT_MAX_PIXELS};
use splatstream_gateway::{SessionConfig, ViewRequest};

/// `bind_host` value that turns the primary channel off
pub const PRIMARY_DISABLED: &str = "none";

/// Primary (single viewer) channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrimaryConfig {
    /// Listen host, or "none" to run broadcast-only
    pub bind_host: String,

    pub port: u16,

    /// Read/write timeout on the viewer socket (0 = no timeout)
    pub socket_timeout_ms: u64,

    /// Largest accepted view request
    pub max_message_bytes: usize,

    /// Largest viewport (width * height) a viewer may request
    pub max_pixels: u64,

    /// ASCII marker sent after every frame
    pub trailer: String,
}

impl Default for PrimaryConfig {
    fn default() -> Self {
        Self {
            bind_host: "127.0.0.1".to_string(),
            port: 6009,
            socket_timeout_ms: 5000,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            max_pixels: DEFAULT_MAX_PIXELS,
            trailer: "verify".to_string(),
        }
    }
}

/// Browser broadcast channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    pub broadcast_addr: String,

    /// Push cadence, also paces the render loop
    pub frame_interval_ms: u64,

    /// Frames queued per subscriber before it counts as busy
    pub subscriber_queue: usize,

    /// Busy ticks tolerated before a subscriber is dropped
    pub max_stalled_ticks: u32,

    pub format: ImageFormat,

    /// JPEG quality (1-100), ignored for PNG
    pub jpeg_quality: u8,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            broadcast_addr: DEFAULT_BROADCAST_ADDR.to_string(),
            frame_interval_ms: 30,
            subscriber_queue: 4,
            max_stalled_ticks: 300,
            format: ImageFormat::Jpeg,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

/// How the pose server is polled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoseMode {
    /// `GET {url}/pose/{frame}`; `{"end": true}` finishes the stream
    Indexed,
    /// `GET {url}/pose/latest`; `{"end": true}` means nobody is tracked yet
    #[default]
    Latest,
}

/// Pose server polling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseConfig {
    /// Base URL of the pose server; unset renders the rest pose
    pub pose_url: Option<String>,

    pub pose_mode: PoseMode,

    /// HTTP request timeout
    pub request_timeout_ms: u64,
}

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            pose_url: None,
            pose_mode: PoseMode::Latest,
            request_timeout_ms: 2000,
        }
    }
}

/// Camera used while no viewer is negotiating one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub width: u32,
    pub height: u32,

    /// Save every rendered frame as `{frame:04}.jpg` here
    pub output_dir: Option<PathBuf>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: 1080,
            height: 1080,
            output_dir: None,
        }
    }
}

/// Command-line values that take precedence over the file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub ip: Option<String>,
    pub port: Option<u16>,
    pub broadcast_addr: Option<String>,
    pub pose_url: Option<String>,
    pub trailer: Option<String>,
    pub output_dir: Option<PathBuf>,
}

/// Daemon configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Path to configuration file
    #[serde(skip)]
    pub config_path: PathBuf,

    pub primary: PrimaryConfig,

    pub broadcast: BroadcastConfig,

    /// Greeting sent to every new primary viewer
    pub handshake: ViewRequest,

    pub pose: PoseConfig,

    pub render: RenderConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            config_path: Self::default_config_path(),
            primary: PrimaryConfig::default(),
            broadcast: BroadcastConfig::default(),
            handshake: ViewRequest::default(),
            pose: PoseConfig::default(),
            render: RenderConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from the default location, or create it
    pub fn load() -> Result<Self> {
        Self::load_from(Self::default_config_path())
    }

    /// Load configuration from `path`, writing defaults there if it is missing
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let config_path = path.as_ref().to_path_buf();

        if config_path.exists() {
            // Load existing config
            let contents = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config file {}", config_path.display()))?;

            let mut config: DaemonConfig = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", config_path.display()))?;

            config.config_path = config_path;
            Ok(config)
        } else {
            // Create default config
            let config = Self {
                config_path,
                ..Self::default()
            };
            config.save().context("Failed to save default config")?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        // Ensure config directory exists
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&self.config_path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Get default config path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("splatstream")
            .join("config.toml")
    }

    /// Apply command-line overrides
    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(ip) = &overrides.ip {
            self.primary.bind_host = ip.clone();
        }
        if let Some(port) = overrides.port {
            self.primary.port = port;
        }
        if let Some(addr) = &overrides.broadcast_addr {
            self.broadcast.broadcast_addr = addr.clone();
        }
        if let Some(url) = &overrides.pose_url {
            self.pose.pose_url = Some(url.clone());
        }
        if let Some(trailer) = &overrides.trailer {
            self.primary.trailer = trailer.clone();
        }
        if let Some(dir) = &overrides.output_dir {
            self.render.output_dir = Some(dir.clone());
        }
    }

    /// Reject values the daemon cannot run with
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.broadcast.frame_interval_ms > 0,
            "broadcast.frame_interval_ms must be positive"
        );
        ensure!(
            self.broadcast.subscriber_queue > 0,
            "broadcast.subscriber_queue must be positive"
        );
        ensure!(
            (1..=100).contains(&self.broadcast.jpeg_quality),
            "broadcast.jpeg_quality must be within 1..=100, got {}",
            self.broadcast.jpeg_quality
        );
        ensure!(
            self.render.width > 0 && self.render.height > 0,
            "render size must be non-zero, got {}x{}",
            self.render.width,
            self.render.height
        );
        ensure!(
            self.primary.max_message_bytes > 0,
            "primary.max_message_bytes must be positive"
        );
        ensure!(
            self.primary.max_pixels > 0,
            "primary.max_pixels must be positive"
        );
        ensure!(
            u64::from(self.render.width) * u64::from(self.render.height) <= self.primary.max_pixels,
            "render size {}x{} exceeds primary.max_pixels ({})",
            self.render.width,
            self.render.height,
            self.primary.max_pixels
        );
        ensure!(
            self.primary.trailer.is_ascii(),
            "primary.trailer must be ASCII"
        );
        Ok(())
    }

    /// Primary listen address, `None` when the channel is disabled
    pub fn primary_addr(&self) -> Option<String> {
        if self.primary.bind_host.eq_ignore_ascii_case(PRIMARY_DISABLED) {
            None
        } else {
            Some(format!("{}:{}", self.primary.bind_host, self.primary.port))
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        let io_timeout = match self.primary.socket_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };

        SessionConfig {
            io_timeout,
            max_message_bytes: self.primary.max_message_bytes,
            max_pixels: self.primary.max_pixels,
            handshake: self.handshake.clone(),
        }
    }

    pub fn broadcaster_config(&self) -> BroadcasterConfig {
        BroadcasterConfig {
            addr: self.broadcast.broadcast_addr.clone(),
            frame_interval: self.frame_interval(),
            queue_capacity: self.broadcast.subscriber_queue,
            max_stalled_ticks: self.broadcast.max_stalled_ticks,
        }
    }

    pub fn encoder(&self) -> FrameEncoder {
        FrameEncoder::new(self.broadcast.format).with_jpeg_quality(self.broadcast.jpeg_quality)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast.frame_interval_ms)
    }

    /// Handshake defaults resized to the configured render size
    pub fn default_view(&self) -> ViewRequest {
        ViewRequest {
            width: self.render.width,
            height: self.render.height,
            ..self.handshake.clone()
        }
    }
}
