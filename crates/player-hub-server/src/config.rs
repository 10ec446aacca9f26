//! Configuration loading and parsing.
//!
//! Defines the server config schema and resolves defaults.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::library::DEFAULT_EXTENSIONS;

pub const DEFAULT_BIND: &str = "127.0.0.1:8080";
pub const DEFAULT_SOCKET: &str = "/tmp/player-hub.sock";
pub const DEFAULT_PLAYER_BIN: &str = "mpv";
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_PLAYLISTS_FILE: &str = "playlists.json";

/// Top-level server configuration loaded from TOML.
#[derive(Debug, Default, Deserialize)]
pub struct ServerConfig {
    /// Bind address (host:port).
    pub bind: Option<String>,
    /// Player IPC socket path.
    pub socket_path: Option<String>,
    /// Launch and supervise the player process.
    pub spawn_player: Option<bool>,
    /// Player binary used when spawning.
    pub player_bin: Option<String>,
    /// Extra arguments passed to the spawned player.
    pub player_args: Option<Vec<String>>,
    /// Seconds to keep dialing the socket before giving up.
    pub connect_timeout_secs: Option<u64>,
    /// Allow cross-origin requests from any origin.
    pub cors: Option<bool>,
    /// Served media directories.
    pub directories: Option<Vec<DirectoryConfig>>,
    /// JSON file holding playlists.
    pub playlists_file: Option<String>,
    /// Properties whose wire value is a JSON document inside a string.
    pub json_string_properties: Option<Vec<String>>,
    /// File extensions treated as media.
    pub media_extensions: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DirectoryConfig {
    pub path: String,
    #[serde(default)]
    pub watch: bool,
}

impl ServerConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg = toml::from_str::<ServerConfig>(&raw)
            .with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }
}

/// Parse an optional bind address from config.
pub fn bind_from_config(cfg: &ServerConfig) -> Result<Option<SocketAddr>> {
    let Some(bind) = cfg.bind.as_deref() else {
        return Ok(None);
    };
    let addr = bind.parse().with_context(|| format!("parse bind {bind}"))?;
    Ok(Some(addr))
}

pub fn socket_path_from_config(cfg: &ServerConfig) -> PathBuf {
    non_empty(cfg.socket_path.as_deref())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET))
}

pub fn connect_timeout_from_config(cfg: &ServerConfig) -> Result<Duration> {
    let secs = cfg.connect_timeout_secs.unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS);
    if secs == 0 {
        return Err(anyhow::anyhow!("connect_timeout_secs must be at least 1"));
    }
    Ok(Duration::from_secs(secs))
}

/// Player launch settings, or `None` when the player is managed elsewhere.
pub fn player_from_config(cfg: &ServerConfig) -> Option<mpv_ipc::PlayerCommand> {
    if !cfg.spawn_player.unwrap_or(false) {
        return None;
    }
    let program = non_empty(cfg.player_bin.as_deref()).unwrap_or(DEFAULT_PLAYER_BIN);
    let mut player = mpv_ipc::PlayerCommand::new(program);
    player.args = cfg.player_args.clone().unwrap_or_default();
    Some(player)
}

pub fn playlists_file_from_config(cfg: &ServerConfig) -> PathBuf {
    non_empty(cfg.playlists_file.as_deref())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_PLAYLISTS_FILE))
}

/// Configured directories, deduplicated by path; the last entry wins.
pub fn directories_from_config(cfg: &ServerConfig) -> Vec<DirectoryConfig> {
    let mut dirs: Vec<DirectoryConfig> = Vec::new();
    for dir in cfg.directories.iter().flatten() {
        let path = dir.path.trim();
        if path.is_empty() {
            continue;
        }
        dirs.retain(|d| d.path != path);
        dirs.push(DirectoryConfig {
            path: path.to_string(),
            watch: dir.watch,
        });
    }
    dirs
}

pub fn media_extensions_from_config(cfg: &ServerConfig) -> Vec<String> {
    match cfg.media_extensions.as_ref().filter(|exts| !exts.is_empty()) {
        Some(exts) => exts.clone(),
        None => DEFAULT_EXTENSIONS.iter().map(|ext| ext.to_string()).collect(),
    }
}

/// Decoder registry for the configured JSON-in-string properties.
pub fn decoders_from_config(cfg: &ServerConfig) -> mpv_ipc::Decoders {
    cfg.json_string_properties
        .iter()
        .flatten()
        .filter(|name| !name.trim().is_empty())
        .fold(mpv_ipc::Decoders::new(), |decoders, name| {
            decoders.with(name.trim(), mpv_ipc::frame::json_string)
        })
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
