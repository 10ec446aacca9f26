//! Shared API models for `player-hub-server` and its clients.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A playable file found under one of the served directories.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct MediaFile {
    /// Absolute path; also the collection key.
    pub path: String,
    /// File name for display.
    pub name: String,
    /// Served directory the file was found under.
    pub directory: String,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time (unix seconds), if known.
    pub modified: Option<u64>,
    /// Duration in seconds (best-effort probe).
    pub duration: Option<f64>,
}

/// Ordered list of media file paths.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Playlist {
    /// Stable id; the collection key.
    pub uuid: String,
    pub name: String,
    /// Media file paths in play order.
    pub files: Vec<String>,
}

/// A directory whose media files are served.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Directory {
    /// Absolute path; the collection key.
    pub path: String,
    /// Whether file-system changes are tracked.
    pub watch: bool,
}

/// Full playback state as replayed to new stream subscribers.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct PlaybackSnapshot {
    /// `true` when nothing is loaded.
    pub stopped: bool,
    /// Currently loaded media file.
    pub path: Option<String>,
    /// Playlist the current file was started from.
    pub playlist_uuid: Option<String>,
    /// Position of the current file within that playlist.
    pub playlist_index: Option<usize>,
    pub paused: bool,
    pub fullscreen: bool,
    pub loop_file: bool,
    /// Volume percent (0-130).
    pub volume: Option<f64>,
    /// Playback position in seconds.
    pub position: Option<f64>,
    /// Duration of the current file in seconds.
    pub duration: Option<f64>,
    pub chapter: Option<i64>,
    /// Selected audio track id; `None` when disabled.
    pub audio_id: Option<i64>,
    /// Selected subtitle track id; `None` when disabled.
    pub subtitle_id: Option<i64>,
}

impl Default for PlaybackSnapshot {
    fn default() -> Self {
        Self {
            stopped: true,
            path: None,
            playlist_uuid: None,
            playlist_index: None,
            paused: false,
            fullscreen: false,
            loop_file: false,
            volume: None,
            position: None,
            duration: None,
            chapter: None,
            audio_id: None,
            subtitle_id: None,
        }
    }
}

/// Server-side health of the player link and background jobs.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    /// `true` while the IPC connection is live.
    pub player_connected: bool,
    /// Number of player session restarts since startup.
    pub player_restarts: u64,
    /// Directories currently being scanned.
    pub scanning: Vec<String>,
    /// Most recent supervision error, if any.
    pub last_error: Option<String>,
}

/// Outcome of a form command request.
///
/// `error` carries a failure not tied to one field; `arguments` maps each
/// failed field to its error.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CommandResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub arguments: BTreeMap<String, String>,
}

impl CommandResponse {
    pub fn is_ok(&self) -> bool {
        self.error.is_none() && self.arguments.is_empty()
    }
}
