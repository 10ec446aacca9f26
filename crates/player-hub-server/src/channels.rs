//! Streaming channel adapters.
//!
//! A channel mirrors one store onto server-sent events. Attaching replays the
//! current state and then pushes one `event:<channel>.<kind>` block per change
//! into the connection's output queue. Several channels of one connection
//! share that queue; each is keyed by the connection identity.

use std::collections::BTreeMap;
use std::sync::Arc;

use actix_web::web::Bytes;
use tokio::sync::mpsc;

use crate::stores::{ChangeSource, StreamEvent, Stores};

pub trait Channel: Send + Sync {
    fn name(&self) -> &'static str;

    /// Replay current state into `out`, then forward changes until `out`
    /// closes or the key is detached.
    fn attach(&self, key: &str, out: mpsc::Sender<Bytes>);

    fn detach(&self, key: &str);
}

pub struct StoreChannel<S> {
    name: &'static str,
    store: S,
}

impl<S: ChangeSource> StoreChannel<S> {
    pub fn new(name: &'static str, store: S) -> Self {
        Self { name, store }
    }
}

impl<S: ChangeSource> Channel for StoreChannel<S> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn attach(&self, key: &str, out: mpsc::Sender<Bytes>) {
        // Subscribe before taking the replay so no change falls in between;
        // a change may show up twice, never zero times.
        let mut changes = self.store.broadcaster().listen(key);
        let replay = self.store.replay();
        let channel = self.name;
        tokio::spawn(async move {
            for change in &replay {
                if !forward(channel, change, &out).await {
                    return;
                }
            }
            while let Some(change) = changes.recv().await {
                if !forward(channel, &change, &out).await {
                    break;
                }
            }
        });
    }

    fn detach(&self, key: &str) {
        self.store.broadcaster().unsubscribe(key);
    }
}

/// False once the connection is gone.
async fn forward<C: StreamEvent>(channel: &str, change: &C, out: &mpsc::Sender<Bytes>) -> bool {
    match encode(channel, change) {
        Ok(block) => out.send(block).await.is_ok(),
        Err(err) => {
            tracing::warn!(channel, kind = change.kind(), error = %err, "failed to encode change");
            true
        }
    }
}

/// Render one change as an event block.
pub fn encode<C: StreamEvent>(channel: &str, change: &C) -> serde_json::Result<Bytes> {
    let data = serde_json::to_string(&change.payload()?)?;
    Ok(sse_event(&format!("{channel}.{}", change.kind()), &data))
}

/// `event:` line, one `data:` line per payload line, blank line.
pub fn sse_event(event: &str, data: &str) -> Bytes {
    let mut block = String::with_capacity(event.len() + data.len() + 16);
    block.push_str("event:");
    block.push_str(event);
    block.push('\n');
    for line in data.lines() {
        block.push_str("data:");
        block.push_str(line);
        block.push('\n');
    }
    block.push('\n');
    Bytes::from(block)
}

/// Every channel a client may request, by name.
#[derive(Clone)]
pub struct Channels {
    by_name: Arc<BTreeMap<&'static str, Arc<dyn Channel>>>,
}

impl Channels {
    pub fn new(stores: &Stores) -> Self {
        let channels: Vec<Arc<dyn Channel>> = vec![
            Arc::new(StoreChannel::new("playback", stores.playback.clone())),
            Arc::new(StoreChannel::new("playlists", stores.playlists.clone())),
            Arc::new(StoreChannel::new("mediafiles", stores.media_files.clone())),
            Arc::new(StoreChannel::new("directories", stores.directories.clone())),
            Arc::new(StoreChannel::new("status", stores.status.clone())),
        ];
        Self {
            by_name: Arc::new(channels.into_iter().map(|c| (c.name(), c)).collect()),
        }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.by_name.keys().copied().collect()
    }

    /// Parse a comma separated channel list; empty means every channel.
    /// Returns the first unknown name on failure.
    pub fn resolve(&self, requested: &str) -> Result<Vec<Arc<dyn Channel>>, String> {
        let names: Vec<&str> = requested
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .collect();
        if names.is_empty() {
            return Ok(self.by_name.values().cloned().collect());
        }
        let mut resolved: Vec<Arc<dyn Channel>> = Vec::with_capacity(names.len());
        for name in names {
            let channel = self.by_name.get(name).ok_or_else(|| name.to_string())?;
            if !resolved.iter().any(|c| c.name() == channel.name()) {
                resolved.push(channel.clone());
            }
        }
        Ok(resolved)
    }
}
