//! Playlist persistence as a plain JSON file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::task::JoinHandle;

use player_hub_types::Playlist;

use crate::stores::Playlists;

/// Read playlists from `path`; a missing file means no playlists yet.
pub fn load(path: &Path) -> Result<Vec<Playlist>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(path).with_context(|| format!("read playlists {:?}", path))?;
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&raw).with_context(|| format!("parse playlists {:?}", path))
}

/// Write every playlist to `path`, replacing the file through a rename.
pub fn save(path: &Path, playlists: &Playlists) -> Result<()> {
    let items: Vec<Playlist> = playlists.all().into_values().collect();
    let json = serde_json::to_vec_pretty(&items).context("serialize playlists")?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("create {:?}", parent))?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).with_context(|| format!("write playlists {:?}", tmp))?;
    std::fs::rename(&tmp, path).with_context(|| format!("replace playlists {:?}", path))?;
    Ok(())
}

/// Load `path` into the store, then rewrite it after every playlist change.
pub fn persist(path: PathBuf, playlists: &Playlists) -> Result<JoinHandle<()>> {
    let loaded = load(&path)?;
    let count = playlists.add_many(loaded);
    tracing::info!(path = %path.display(), count, "loaded playlists");

    let store = playlists.clone();
    let target = path.clone();
    Ok(playlists.broadcaster().subscribe_fn(
        "playlist-file",
        move |_change| save(&target, &store),
        move |err| tracing::warn!(path = %path.display(), error = %err, "failed to save playlists"),
    ))
}
