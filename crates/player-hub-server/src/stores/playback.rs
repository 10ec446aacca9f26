//! Playback state store.
//!
//! `stopped` gates position updates: while nothing is loaded, time-pos
//! reports are ignored. Loading a path clears `stopped`; [`Playback::stop`]
//! clears the per-file fields but keeps the playlist selection.

use std::sync::{Arc, RwLock};

use serde_json::{Value, json};

use player_hub_types::PlaybackSnapshot;

use crate::broadcaster::Broadcaster;
use crate::stores::{ChangeSource, StreamEvent};

#[derive(Clone, Debug, PartialEq)]
pub enum PlaybackChange {
    /// Full state, sent to new stream subscribers.
    Reset(PlaybackSnapshot),
    Path(String),
    Paused(bool),
    Fullscreen(bool),
    LoopFile(bool),
    Position(f64),
    Duration(Option<f64>),
    Chapter(Option<i64>),
    AudioTrack(Option<i64>),
    SubtitleTrack(Option<i64>),
    Volume(f64),
    Playlist {
        uuid: Option<String>,
        index: Option<usize>,
    },
    Stopped,
}

impl StreamEvent for PlaybackChange {
    fn kind(&self) -> &'static str {
        match self {
            PlaybackChange::Reset(_) => "reset",
            PlaybackChange::Path(_) => "path",
            PlaybackChange::Paused(_) => "pause",
            PlaybackChange::Fullscreen(_) => "fullscreen",
            PlaybackChange::LoopFile(_) => "loopFile",
            PlaybackChange::Position(_) => "position",
            PlaybackChange::Duration(_) => "duration",
            PlaybackChange::Chapter(_) => "chapter",
            PlaybackChange::AudioTrack(_) => "audioID",
            PlaybackChange::SubtitleTrack(_) => "subtitleID",
            PlaybackChange::Volume(_) => "volume",
            PlaybackChange::Playlist { .. } => "playlist",
            PlaybackChange::Stopped => "stopped",
        }
    }

    fn payload(&self) -> serde_json::Result<Value> {
        Ok(match self {
            PlaybackChange::Reset(snapshot) => serde_json::to_value(snapshot)?,
            PlaybackChange::Path(path) => json!(path),
            PlaybackChange::Paused(flag)
            | PlaybackChange::Fullscreen(flag)
            | PlaybackChange::LoopFile(flag) => json!(flag),
            PlaybackChange::Position(secs) | PlaybackChange::Volume(secs) => json!(secs),
            PlaybackChange::Duration(secs) => json!(secs),
            PlaybackChange::Chapter(id)
            | PlaybackChange::AudioTrack(id)
            | PlaybackChange::SubtitleTrack(id) => json!(id),
            PlaybackChange::Playlist { uuid, index } => json!({"uuid": uuid, "index": index}),
            PlaybackChange::Stopped => json!(true),
        })
    }
}

#[derive(Clone)]
pub struct Playback {
    state: Arc<RwLock<PlaybackSnapshot>>,
    broadcaster: Broadcaster<PlaybackChange>,
}

impl Playback {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(PlaybackSnapshot::default())),
            broadcaster: Broadcaster::new("playback"),
        }
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        match self.state.read() {
            Ok(state) => state.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.snapshot().stopped
    }

    pub fn current_path(&self) -> Option<String> {
        self.snapshot().path
    }

    pub fn broadcaster(&self) -> &Broadcaster<PlaybackChange> {
        &self.broadcaster
    }

    /// A new file became current.
    pub fn set_path(&self, path: String) {
        self.mutate(PlaybackChange::Path(path.clone()), |state| {
            state.path = Some(path);
            state.stopped = false;
            state.position = None;
        });
    }

    pub fn set_paused(&self, paused: bool) {
        self.mutate(PlaybackChange::Paused(paused), |state| state.paused = paused);
    }

    pub fn set_fullscreen(&self, fullscreen: bool) {
        self.mutate(PlaybackChange::Fullscreen(fullscreen), |state| {
            state.fullscreen = fullscreen
        });
    }

    pub fn set_loop_file(&self, loop_file: bool) {
        self.mutate(PlaybackChange::LoopFile(loop_file), |state| {
            state.loop_file = loop_file
        });
    }

    /// Returns `false` (and emits nothing) while stopped.
    pub fn set_position(&self, secs: f64) -> bool {
        let applied = self.write(|state| {
            if state.stopped {
                return false;
            }
            state.position = Some(secs);
            true
        });
        if applied {
            self.broadcaster.send(PlaybackChange::Position(secs));
        }
        applied
    }

    pub fn set_duration(&self, secs: Option<f64>) {
        self.mutate(PlaybackChange::Duration(secs), |state| state.duration = secs);
    }

    pub fn set_chapter(&self, chapter: Option<i64>) {
        self.mutate(PlaybackChange::Chapter(chapter), |state| state.chapter = chapter);
    }

    pub fn set_audio_track(&self, id: Option<i64>) {
        self.mutate(PlaybackChange::AudioTrack(id), |state| state.audio_id = id);
    }

    pub fn set_subtitle_track(&self, id: Option<i64>) {
        self.mutate(PlaybackChange::SubtitleTrack(id), |state| state.subtitle_id = id);
    }

    pub fn set_volume(&self, volume: f64) {
        self.mutate(PlaybackChange::Volume(volume), |state| state.volume = Some(volume));
    }

    pub fn set_playlist(&self, uuid: Option<String>, index: Option<usize>) {
        let change = PlaybackChange::Playlist {
            uuid: uuid.clone(),
            index,
        };
        self.mutate(change, |state| {
            state.playlist_uuid = uuid;
            state.playlist_index = index;
        });
    }

    /// Clear the per-file fields, keeping the playlist selection.
    pub fn stop(&self) {
        self.mutate(PlaybackChange::Stopped, |state| {
            state.path = None;
            state.position = None;
            state.duration = None;
            state.chapter = None;
            state.audio_id = None;
            state.subtitle_id = None;
            state.stopped = true;
        });
    }

    fn mutate(&self, change: PlaybackChange, apply: impl FnOnce(&mut PlaybackSnapshot)) {
        self.write(apply);
        self.broadcaster.send(change);
    }

    fn write<R>(&self, apply: impl FnOnce(&mut PlaybackSnapshot) -> R) -> R {
        let mut state = match self.state.write() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        apply(&mut state)
    }
}

impl ChangeSource for Playback {
    type Change = PlaybackChange;

    fn broadcaster(&self) -> &Broadcaster<PlaybackChange> {
        &self.broadcaster
    }

    fn replay(&self) -> Vec<PlaybackChange> {
        vec![PlaybackChange::Reset(self.snapshot())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn next(changes: &mut tokio::sync::mpsc::Receiver<PlaybackChange>) -> PlaybackChange {
        tokio::time::timeout(Duration::from_secs(2), changes.recv())
            .await
            .expect("change timeout")
            .expect("relay closed")
    }

    #[tokio::test]
    async fn mutators_emit_changes_in_call_order() {
        let playback = Playback::new();
        let mut changes = playback.broadcaster().listen("test");

        playback.set_path("/media/a.mp4".to_string());
        playback.set_paused(true);
        playback.set_volume(80.0);
        playback.set_fullscreen(true);

        assert_eq!(next(&mut changes).await, PlaybackChange::Path("/media/a.mp4".to_string()));
        assert_eq!(next(&mut changes).await, PlaybackChange::Paused(true));
        assert_eq!(next(&mut changes).await, PlaybackChange::Volume(80.0));
        assert_eq!(next(&mut changes).await, PlaybackChange::Fullscreen(true));
    }

    #[tokio::test]
    async fn position_is_ignored_while_stopped() {
        let playback = Playback::new();
        let mut changes = playback.broadcaster().listen("test");

        assert!(!playback.set_position(3.0));
        playback.set_path("/media/a.mp4".to_string());
        assert!(playback.set_position(4.5));

        assert_eq!(next(&mut changes).await.kind(), "path");
        assert_eq!(next(&mut changes).await, PlaybackChange::Position(4.5));
        assert_eq!(playback.snapshot().position, Some(4.5));
    }

    #[tokio::test]
    async fn stop_clears_file_state_but_keeps_playlist() {
        let playback = Playback::new();
        playback.set_playlist(Some("p1".to_string()), Some(2));
        playback.set_path("/media/a.mp4".to_string());
        playback.set_position(10.0);
        playback.set_duration(Some(60.0));
        playback.set_chapter(Some(1));
        playback.set_audio_track(Some(1));
        playback.set_subtitle_track(Some(2));

        let mut changes = playback.broadcaster().listen("test");
        playback.stop();

        assert_eq!(next(&mut changes).await, PlaybackChange::Stopped);
        let snapshot = playback.snapshot();
        assert!(snapshot.stopped);
        assert_eq!(snapshot.path, None);
        assert_eq!(snapshot.position, None);
        assert_eq!(snapshot.duration, None);
        assert_eq!(snapshot.chapter, None);
        assert_eq!(snapshot.audio_id, None);
        assert_eq!(snapshot.subtitle_id, None);
        assert_eq!(snapshot.playlist_uuid.as_deref(), Some("p1"));
        assert_eq!(snapshot.playlist_index, Some(2));

        playback.set_path("/media/b.mp4".to_string());
        assert!(!playback.is_stopped());
    }

    #[tokio::test]
    async fn replay_is_a_reset_snapshot() {
        let playback = Playback::new();
        playback.set_path("/media/a.mp4".to_string());
        let replay = playback.replay();
        assert_eq!(replay.len(), 1);
        assert_eq!(replay[0].kind(), "reset");
        let payload = replay[0].payload().unwrap();
        assert_eq!(payload["path"], "/media/a.mp4");
        assert_eq!(payload["stopped"], false);
    }

    #[test]
    fn playlist_payload_carries_uuid_and_index() {
        let change = PlaybackChange::Playlist {
            uuid: Some("p1".to_string()),
            index: Some(0),
        };
        assert_eq!(change.payload().unwrap(), json!({"uuid": "p1", "index": 0}));
    }
}
