//! Mirrors observed player properties into the playback store.

use mpv_ipc::{Dispatcher, ObservePropertyResponse};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::stores::Playback;

/// Properties observed on the player for the playback store.
pub const OBSERVED_PROPERTIES: &[&str] = &[
    "path",
    "pause",
    "fullscreen",
    "loop-file",
    "time-pos",
    "duration",
    "chapter",
    "aid",
    "sid",
    "volume",
];

const EVENT_BUFFER: usize = 64;

/// Subscribe every observed property and apply events on one task.
///
/// All properties share one subscription, so events apply in the order the
/// player sent them: a `time-pos` following a new `path` is never gated out
/// as if playback were still stopped. Subscriptions survive reconnects; the
/// dispatcher re-arms them.
pub async fn start(dispatcher: &Dispatcher, playback: Playback) -> JoinHandle<()> {
    let (events_tx, mut events) = mpsc::channel(EVENT_BUFFER);
    dispatcher.subscribe_to_properties(OBSERVED_PROPERTIES, events_tx).await;
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            apply(&playback, &event);
        }
    })
}

/// Apply one property event. Returns `false` when the data was not usable.
pub fn apply(playback: &Playback, event: &ObservePropertyResponse) -> bool {
    let data = &event.data;
    let applied = match event.property.as_str() {
        "path" => match data {
            Value::Null => Some(playback.stop()),
            Value::String(path) => Some(playback.set_path(path.clone())),
            _ => None,
        },
        "pause" => flag(data).map(|v| playback.set_paused(v)),
        "fullscreen" => flag(data).map(|v| playback.set_fullscreen(v)),
        "loop-file" => loop_flag(data).map(|v| playback.set_loop_file(v)),
        // time-pos goes null between files; nothing to record.
        "time-pos" if data.is_null() => Some(()),
        "time-pos" => data.as_f64().map(|secs| {
            playback.set_position(secs);
        }),
        "duration" if data.is_null() => Some(playback.set_duration(None)),
        "duration" => data.as_f64().map(|secs| playback.set_duration(Some(secs))),
        "chapter" if data.is_null() => Some(playback.set_chapter(None)),
        "chapter" => data.as_i64().map(|n| playback.set_chapter(Some(n))),
        "aid" => track(data).map(|id| playback.set_audio_track(id)),
        "sid" => track(data).map(|id| playback.set_subtitle_track(id)),
        "volume" => data.as_f64().map(|v| playback.set_volume(v)),
        _ => {
            tracing::debug!(property = %event.property, "ignoring unmapped property");
            return false;
        }
    };
    if applied.is_none() {
        tracing::warn!(property = %event.property, data = %data, "unexpected property data");
    }
    applied.is_some()
}

/// Booleans arrive as JSON booleans or as `yes`/`no` strings.
pub fn flag(data: &Value) -> Option<bool> {
    match data {
        Value::Bool(v) => Some(*v),
        Value::String(s) => match s.as_str() {
            "yes" | "true" => Some(true),
            "no" | "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// `loop-file` is `inf`, a repeat count, or `no`.
fn loop_flag(data: &Value) -> Option<bool> {
    match data {
        Value::String(s) if s == "inf" => Some(true),
        Value::Number(n) => Some(n.as_i64().unwrap_or(0) != 0),
        other => flag(other),
    }
}

/// Track selection: an id, or `false`/`no` when disabled.
fn track(data: &Value) -> Option<Option<i64>> {
    match data {
        Value::Number(n) => n.as_i64().map(Some),
        Value::Bool(false) | Value::Null => Some(None),
        Value::String(s) if s == "no" => Some(None),
        _ => None,
    }
}
