use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use peer_session::{Color, SessionConfig};

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   config.toml:     [server]
//                    port = 4000
//
//   env var:         PEERBOARD_SERVER__PORT=4000   (double underscore = nesting)
//
//   (single underscore stays within field names: PEERBOARD_PRESENCE__POLL_INTERVAL_SECS)

/// Named configuration presets.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// host=127.0.0.1
    Local,
    /// host=0.0.0.0
    Server,
}

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub profile: Option<Profile>,
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub presence: PresenceFileConfig,
    #[serde(default)]
    pub whiteboard: WhiteboardFileConfig,
}

/// Presence server bind settings (lives under `[server]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: default_port(),
        }
    }
}

/// Client-side presence settings (lives under `[presence]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PresenceFileConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_server_url")]
    pub server_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for PresenceFileConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            server_url: default_server_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Canvas and pen defaults (lives under `[whiteboard]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WhiteboardFileConfig {
    #[serde(default = "default_canvas_width")]
    pub width: u32,
    #[serde(default = "default_canvas_height")]
    pub height: u32,
    #[serde(default = "default_color")]
    pub default_color: String,
    #[serde(default = "default_pen_width")]
    pub default_width: f32,
}

impl Default for WhiteboardFileConfig {
    fn default() -> Self {
        Self {
            width: default_canvas_width(),
            height: default_canvas_height(),
            default_color: default_color(),
            default_width: default_pen_width(),
        }
    }
}

fn default_port() -> u16 {
    3001
}
fn default_poll_interval_secs() -> u64 {
    3
}
fn default_server_url() -> String {
    "http://127.0.0.1:3001".to_string()
}
fn default_request_timeout_secs() -> u64 {
    5
}
fn default_canvas_width() -> u32 {
    800
}
fn default_canvas_height() -> u32 {
    600
}
fn default_color() -> String {
    "#000000".to_string()
}
fn default_pen_width() -> f32 {
    2.0
}

/// Build a figment that layers: defaults → profile defaults → config.toml → PEERBOARD_* env vars.
///
/// Profile defaults sit above struct defaults but below config.toml/env.
/// The CLI profile takes priority over the config file profile.
///
/// Env vars use double-underscore for nesting into sections:
///   `PEERBOARD_SERVER__PORT=4000`  →  `server.port = 4000`
///   `PEERBOARD_WHITEBOARD__DEFAULT_COLOR="#ff0000"`  →  `whiteboard.default_color = "#ff0000"`
pub fn load_config(data_dir: &Path, cli_profile: Option<&Profile>) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    // Pass 1: peek at profile from config.toml/env (CLI overrides file)
    let base = Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("PEERBOARD_").split("__"));

    let profile: Option<Profile> = cli_profile
        .cloned()
        .or_else(|| base.extract_inner("profile").ok());

    // Pass 2: rebuild with profile defaults as a layer between defaults and config.toml
    let profile_layer = profile_to_file_config(profile.as_ref());

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Serialized::defaults(profile_layer))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("PEERBOARD_").split("__"))
}

/// Convert a profile into a `FileConfig` with the profile's default values filled in.
/// Fields not set by the profile remain at their struct defaults so figment
/// does not override explicit user values from config.toml / env.
fn profile_to_file_config(profile: Option<&Profile>) -> FileConfig {
    let host = match profile {
        Some(Profile::Local) => "127.0.0.1",
        Some(Profile::Server) => "0.0.0.0",
        None => return FileConfig::default(),
    };
    FileConfig {
        profile: profile.cloned(),
        server: ServerFileConfig {
            host: Some(host.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

// =============================================================================
// Runtime config structs (derived from FileConfig)
// =============================================================================

/// Where the presence server listens.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn from_file(fc: &ServerFileConfig) -> Self {
        Self {
            host: fc.host.clone().unwrap_or_else(|| "127.0.0.1".to_string()),
            port: fc.port,
        }
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }
}

/// How clients talk to the presence server.
#[derive(Clone, Debug)]
pub struct PresenceConfig {
    pub server_url: String,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
}

impl PresenceConfig {
    pub fn from_file(fc: &PresenceFileConfig) -> Self {
        Self {
            server_url: fc.server_url.clone(),
            // A zero interval would spin.
            poll_interval: Duration::from_secs(fc.poll_interval_secs.max(1)),
            request_timeout: Duration::from_secs(fc.request_timeout_secs.max(1)),
        }
    }
}

impl WhiteboardFileConfig {
    /// Session settings for a local peer named `display_name`.
    pub fn session_config(&self, display_name: Option<String>) -> Result<SessionConfig> {
        let pen_color: Color = self
            .default_color
            .parse()
            .with_context(|| format!("Invalid whiteboard.default_color {:?}", self.default_color))?;
        anyhow::ensure!(
            self.width > 0 && self.height > 0,
            "Whiteboard size must be non-zero, got {}x{}",
            self.width,
            self.height
        );
        Ok(SessionConfig {
            display_name,
            canvas_width: self.width,
            canvas_height: self.height,
            pen_color,
            pen_width: self.default_width,
            ..Default::default()
        })
    }
}

// =============================================================================
// Directory layout config (derived from --data-dir, not tunable via figment)
// =============================================================================

#[derive(Clone, Debug)]
pub struct PeerboardConfig {
    pub data_dir: PathBuf,
    pub exports_dir: PathBuf,
}

impl PeerboardConfig {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not find home directory")?
                .join(".peerboard"),
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        let exports_dir = data_dir.join("exports");
        std::fs::create_dir_all(&exports_dir)
            .with_context(|| format!("Failed to create exports directory: {:?}", exports_dir))?;

        info!("Data directory: {}", data_dir.display());

        Ok(Self {
            data_dir,
            exports_dir,
        })
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }

    /// Timestamped path for a whiteboard export.
    pub fn export_path(&self, label: &str) -> PathBuf {
        let stamp = chrono::Utc::now().format("%Y%m%d-%H%M%S");
        self.exports_dir
            .join(format!("whiteboard-{label}-{stamp}.png"))
    }
}
