//! Player link and background job status.

use std::sync::{Arc, RwLock};

use serde_json::{Value, json};

use player_hub_types::StatusSnapshot;

use crate::broadcaster::Broadcaster;
use crate::stores::{ChangeSource, StreamEvent};

#[derive(Clone, Debug, PartialEq)]
pub enum StatusChange {
    Reset(StatusSnapshot),
    Connected(bool),
    Restarts(u64),
    Scanning(Vec<String>),
    Error(Option<String>),
}

impl StreamEvent for StatusChange {
    fn kind(&self) -> &'static str {
        match self {
            StatusChange::Reset(_) => "reset",
            StatusChange::Connected(_) => "connected",
            StatusChange::Restarts(_) => "restarts",
            StatusChange::Scanning(_) => "scanning",
            StatusChange::Error(_) => "error",
        }
    }

    fn payload(&self) -> serde_json::Result<Value> {
        Ok(match self {
            StatusChange::Reset(snapshot) => serde_json::to_value(snapshot)?,
            StatusChange::Connected(connected) => json!(connected),
            StatusChange::Restarts(count) => json!(count),
            StatusChange::Scanning(dirs) => json!(dirs),
            StatusChange::Error(message) => json!(message),
        })
    }
}

#[derive(Clone)]
pub struct Status {
    state: Arc<RwLock<StatusSnapshot>>,
    broadcaster: Broadcaster<StatusChange>,
}

impl Status {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(StatusSnapshot::default())),
            broadcaster: Broadcaster::new("status"),
        }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        match self.state.read() {
            Ok(state) => state.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn broadcaster(&self) -> &Broadcaster<StatusChange> {
        &self.broadcaster
    }

    pub fn set_connected(&self, connected: bool) {
        self.write(|state| state.player_connected = connected);
        self.broadcaster.send(StatusChange::Connected(connected));
    }

    pub fn set_restarts(&self, count: u64) {
        self.write(|state| state.player_restarts = count);
        self.broadcaster.send(StatusChange::Restarts(count));
    }

    pub fn set_error(&self, message: Option<String>) {
        self.write(|state| state.last_error = message.clone());
        self.broadcaster.send(StatusChange::Error(message));
    }

    pub fn scan_started(&self, dir: &str) {
        let scanning = self.write(|state| {
            if !state.scanning.iter().any(|d| d == dir) {
                state.scanning.push(dir.to_string());
            }
            state.scanning.clone()
        });
        self.broadcaster.send(StatusChange::Scanning(scanning));
    }

    pub fn scan_finished(&self, dir: &str) {
        let scanning = self.write(|state| {
            state.scanning.retain(|d| d != dir);
            state.scanning.clone()
        });
        self.broadcaster.send(StatusChange::Scanning(scanning));
    }

    fn write<R>(&self, apply: impl FnOnce(&mut StatusSnapshot) -> R) -> R {
        let mut state = match self.state.write() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        apply(&mut state)
    }
}

impl ChangeSource for Status {
    type Change = StatusChange;

    fn broadcaster(&self) -> &Broadcaster<StatusChange> {
        &self.broadcaster
    }

    fn replay(&self) -> Vec<StatusChange> {
        vec![StatusChange::Reset(self.snapshot())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn scanning_tracks_overlapping_directories() {
        let status = Status::new();
        let mut changes = status.broadcaster().listen("test");

        status.scan_started("/a");
        status.scan_started("/b");
        status.scan_finished("/a");

        let mut last = None;
        for _ in 0..3 {
            last = tokio::time::timeout(Duration::from_secs(2), changes.recv())
                .await
                .unwrap();
        }
        assert_eq!(last, Some(StatusChange::Scanning(vec!["/b".to_string()])));
        assert_eq!(status.snapshot().scanning, vec!["/b".to_string()]);
    }

    #[tokio::test]
    async fn connection_and_restarts_are_recorded() {
        let status = Status::new();
        status.set_connected(true);
        status.set_restarts(3);
        status.set_error(Some("dial failed".to_string()));

        let snapshot = status.snapshot();
        assert!(snapshot.player_connected);
        assert_eq!(snapshot.player_restarts, 3);
        assert_eq!(snapshot.last_error.as_deref(), Some("dial failed"));
    }
}
