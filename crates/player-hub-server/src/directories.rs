//! Adding and removing served directories.

use std::fmt;
use std::path::{Path, PathBuf};

use player_hub_types::Directory;
use tokio::task::JoinHandle;

use crate::library::spawn_scan;
use crate::state::AppState;

#[derive(Debug)]
pub enum DirectoryError {
    /// The path does not exist or is not a directory.
    Invalid(String),
    NotServed(String),
    /// File watching was requested but could not be set up.
    Watch(String),
}

impl fmt::Display for DirectoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectoryError::Invalid(msg) => write!(f, "invalid directory: {msg}"),
            DirectoryError::NotServed(path) => write!(f, "directory not served: {path}"),
            DirectoryError::Watch(msg) => write!(f, "watch failed: {msg}"),
        }
    }
}

impl std::error::Error for DirectoryError {}

/// Serve `path`: record it, scan it when new, and start or stop watching it.
///
/// Returns the stored entry and the scan task when a scan was started.
pub fn serve(
    state: &AppState,
    path: &Path,
    watch: bool,
) -> Result<(Directory, Option<JoinHandle<()>>), DirectoryError> {
    let canon = path
        .canonicalize()
        .map_err(|e| DirectoryError::Invalid(format!("{}: {e}", path.display())))?;
    if !canon.is_dir() {
        return Err(DirectoryError::Invalid(format!("{} is not a directory", canon.display())));
    }
    let key = canon.to_string_lossy().to_string();
    let previous = state.stores.directories.get(&key);
    let was_watched = previous.as_ref().is_some_and(|dir| dir.watch);

    if watch && !was_watched {
        let watcher = state
            .watcher
            .as_ref()
            .ok_or_else(|| DirectoryError::Watch("file watching unavailable".to_string()))?;
        watcher
            .watch(&canon)
            .map_err(|e| DirectoryError::Watch(format!("{e:#}")))?;
    } else if !watch && was_watched {
        if let Some(watcher) = state.watcher.as_ref() {
            if let Err(err) = watcher.unwatch(&canon) {
                tracing::warn!(directory = %key, error = %err, "failed to stop watching");
            }
        }
    }

    let directory = Directory { path: key, watch };
    state.stores.directories.put(directory.clone());
    let scan = previous
        .is_none()
        .then(|| spawn_scan(state.scanner.clone(), state.stores.clone(), canon));
    Ok((directory, scan))
}

/// Stop serving `path` and drop every media file found under it.
pub fn unserve(state: &AppState, path: &str) -> Result<Directory, DirectoryError> {
    let key = Path::new(path)
        .canonicalize()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|_| path.to_string());
    let directory = state
        .stores
        .directories
        .take(&key)
        .ok_or_else(|| DirectoryError::NotServed(path.to_string()))?;

    let removed = state
        .stores
        .media_files
        .take_where(|file| file.directory == directory.path);
    tracing::info!(directory = %directory.path, removed = removed.len(), "directory no longer served");

    if directory.watch {
        if let Some(watcher) = state.watcher.as_ref() {
            if let Err(err) = watcher.unwatch(&PathBuf::from(&directory.path)) {
                tracing::warn!(directory = %directory.path, error = %err, "failed to stop watching");
            }
        }
    }
    Ok(directory)
}
