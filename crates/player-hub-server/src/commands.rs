//! Playback form commands.
//!
//! Each recognized form field maps to one player command. Fields are
//! validated first, then executed in request order; failures are reported
//! per field and do not stop the remaining fields.

use std::time::Duration;

use mpv_ipc::Dispatcher;
use player_hub_types::CommandResponse;
use serde_json::{Value, json};

use crate::stores::{PlaybackChange, Stores};

/// How long a playlist start waits for the player to report the new file.
pub const PLAYLIST_START_TIMEOUT: Duration = Duration::from_secs(5);

pub const MAX_VOLUME: f64 = 130.0;

#[derive(Debug, Clone, PartialEq)]
enum Track {
    Id(i64),
    Off,
    Auto,
}

impl Track {
    fn parse(raw: &str) -> Result<Self, String> {
        match raw {
            "no" => Ok(Track::Off),
            "auto" => Ok(Track::Auto),
            _ => match raw.parse::<i64>() {
                Ok(id) if id > 0 => Ok(Track::Id(id)),
                _ => Err(format!("expected a track id, \"no\" or \"auto\", got {raw:?}")),
            },
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Track::Id(id) => json!(id),
            Track::Off => json!("no"),
            Track::Auto => json!("auto"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Load(String),
    Pause(bool),
    Fullscreen(bool),
    AudioTrack(Track),
    SubtitleTrack(Track),
    LoopFile(bool),
    Volume(f64),
    Seek(f64),
    Chapter(i64),
    PlayPlaylist {
        uuid: String,
        index: usize,
        path: String,
    },
    Stop,
}

pub struct CommandRunner<'a> {
    dispatcher: &'a Dispatcher,
    stores: &'a Stores,
    start_timeout: Duration,
}

impl<'a> CommandRunner<'a> {
    pub fn new(dispatcher: &'a Dispatcher, stores: &'a Stores) -> Self {
        Self {
            dispatcher,
            stores,
            start_timeout: PLAYLIST_START_TIMEOUT,
        }
    }

    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    /// Validate and run every field; the response lists what failed.
    pub async fn run(&self, fields: &[(String, String)]) -> CommandResponse {
        let mut response = CommandResponse::default();
        if fields.is_empty() {
            response.error = Some("no arguments given".to_string());
            return response;
        }

        let mut commands = Vec::with_capacity(fields.len());
        for (name, value) in fields {
            match self.parse(name, value, fields) {
                Ok(Some(command)) => commands.push((name.as_str(), command)),
                Ok(None) => {}
                Err(err) => {
                    response.arguments.insert(name.clone(), err);
                }
            }
        }

        if !commands.is_empty() && !self.dispatcher.is_connected() {
            response.error = Some("player not connected".to_string());
            return response;
        }

        for (name, command) in commands {
            tracing::debug!(field = name, ?command, "running playback command");
            if let Err(err) = self.execute(command).await {
                tracing::warn!(field = name, error = %err, "playback command failed");
                response.arguments.insert(name.to_string(), err);
            }
        }
        response
    }

    fn parse(
        &self,
        name: &str,
        value: &str,
        fields: &[(String, String)],
    ) -> Result<Option<Command>, String> {
        let command = match name {
            "path" => {
                let path = value.trim();
                if path.is_empty() {
                    return Err("path must not be empty".to_string());
                }
                if !self.stores.media_files.exists(path) {
                    return Err(format!("unknown media file {path}"));
                }
                Command::Load(path.to_string())
            }
            "pause" => Command::Pause(parse_bool(value)?),
            "fullscreen" => Command::Fullscreen(parse_bool(value)?),
            "loopFile" => Command::LoopFile(parse_bool(value)?),
            "audioID" => Command::AudioTrack(Track::parse(value)?),
            "subtitleID" => Command::SubtitleTrack(Track::parse(value)?),
            "volume" => {
                let volume = parse_number(value)?;
                if !(0.0..=MAX_VOLUME).contains(&volume) {
                    return Err(format!("volume must be between 0 and {MAX_VOLUME}"));
                }
                Command::Volume(volume)
            }
            "seek" => {
                let secs = parse_number(value)?;
                if secs < 0.0 {
                    return Err("seek position must not be negative".to_string());
                }
                Command::Seek(secs)
            }
            "chapter" => match value.parse::<i64>() {
                Ok(chapter) if chapter >= 0 => Command::Chapter(chapter),
                _ => return Err(format!("expected a chapter number, got {value:?}")),
            },
            "playlistUUID" => {
                let index = match lookup(fields, "playlistIndex") {
                    Some(raw) => raw
                        .parse::<usize>()
                        .map_err(|_| format!("invalid playlistIndex {raw:?}"))?,
                    None => 0,
                };
                let playlist = self
                    .stores
                    .playlists
                    .get(value)
                    .ok_or_else(|| format!("unknown playlist {value}"))?;
                let path = playlist
                    .files
                    .get(index)
                    .cloned()
                    .ok_or_else(|| format!("playlist has no entry {index}"))?;
                Command::PlayPlaylist {
                    uuid: playlist.uuid,
                    index,
                    path,
                }
            }
            "playlistIndex" => {
                if lookup(fields, "playlistUUID").is_none() {
                    return Err("playlistIndex requires playlistUUID".to_string());
                }
                return Ok(None);
            }
            "stop" => Command::Stop,
            _ => return Err("unknown argument".to_string()),
        };
        Ok(Some(command))
    }

    async fn execute(&self, command: Command) -> Result<(), String> {
        match command {
            Command::Load(path) => {
                self.request(vec![json!("loadfile"), json!(path)]).await?;
                if self.stores.playback.snapshot().playlist_uuid.is_some() {
                    self.stores.playback.set_playlist(None, None);
                }
                Ok(())
            }
            Command::Pause(flag) => self.set_property("pause", json!(flag)).await,
            Command::Fullscreen(flag) => self.set_property("fullscreen", json!(flag)).await,
            Command::LoopFile(flag) => {
                let value = if flag { "inf" } else { "no" };
                self.set_property("loop-file", json!(value)).await
            }
            Command::AudioTrack(track) => self.set_property("aid", track.to_value()).await,
            Command::SubtitleTrack(track) => self.set_property("sid", track.to_value()).await,
            Command::Volume(volume) => self.set_property("volume", json!(volume)).await,
            Command::Seek(secs) => self
                .request(vec![json!("seek"), json!(secs), json!("absolute")])
                .await
                .map(|_| ()),
            Command::Chapter(chapter) => self.set_property("chapter", json!(chapter)).await,
            Command::PlayPlaylist { uuid, index, path } => {
                self.play_playlist_entry(uuid, index, path).await
            }
            Command::Stop => self.request(vec![json!("stop")]).await.map(|_| ()),
        }
    }

    /// Load a playlist entry, then record the selection once the player
    /// reports that file as current.
    async fn play_playlist_entry(&self, uuid: String, index: usize, path: String) -> Result<(), String> {
        let playback = &self.stores.playback;
        let key = format!("playlist-start-{}", uuid::Uuid::new_v4());
        let mut changes = playback.broadcaster().listen(key.clone());

        let started = async {
            self.request(vec![json!("loadfile"), json!(path)]).await?;
            let wait = async {
                while let Some(change) = changes.recv().await {
                    if change == PlaybackChange::Path(path.clone()) {
                        return true;
                    }
                }
                false
            };
            match tokio::time::timeout(self.start_timeout, wait).await {
                Ok(true) => Ok(()),
                Ok(false) => Err("playback store closed".to_string()),
                Err(_) => Err(format!("timed out waiting for {path} to start")),
            }
        }
        .await;
        playback.broadcaster().unsubscribe(&key);

        started?;
        playback.set_playlist(Some(uuid), Some(index));
        Ok(())
    }

    async fn set_property(&self, name: &str, value: Value) -> Result<(), String> {
        self.request(vec![json!("set_property"), json!(name), value])
            .await
            .map(|_| ())
    }

    async fn request(&self, command: Vec<Value>) -> Result<Value, String> {
        self.dispatcher.request(command).await.map_err(|e| e.to_string())
    }
}

fn lookup<'f>(fields: &'f [(String, String)], name: &str) -> Option<&'f str> {
    fields
        .iter()
        .find(|(field, _)| field == name)
        .map(|(_, value)| value.as_str())
}

fn parse_bool(raw: &str) -> Result<bool, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(format!("expected a boolean, got {raw:?}")),
    }
}

fn parse_number(raw: &str) -> Result<f64, String> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .ok_or_else(|| format!("expected a number, got {raw:?}"))
}
