//! File-system watching for served directories.
//!
//! Watch events are drained on a dedicated thread and applied to the media
//! file store: created files are added, removed files taken, modified files
//! refreshed.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::library::MediaScanner;
use crate::stores::Stores;

pub struct DirectoryWatcher {
    watcher: Mutex<RecommendedWatcher>,
}

impl DirectoryWatcher {
    pub fn start(scanner: MediaScanner, stores: Stores) -> Result<Self> {
        let (events_tx, events) = crossbeam_channel::unbounded();
        let watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
            let _ = events_tx.send(event);
        })
        .context("create file-system watcher")?;

        std::thread::Builder::new()
            .name("directory-watcher".to_string())
            .spawn(move || {
                for event in events {
                    match event {
                        Ok(event) => apply_event(&scanner, &stores, &event),
                        Err(err) => tracing::warn!(error = %err, "watch error"),
                    }
                }
                tracing::debug!("directory watcher stopped");
            })
            .context("spawn directory watcher thread")?;

        Ok(Self {
            watcher: Mutex::new(watcher),
        })
    }

    pub fn watch(&self, dir: &Path) -> Result<()> {
        let mut watcher = self
            .watcher
            .lock()
            .map_err(|_| anyhow::anyhow!("watcher lock poisoned"))?;
        watcher
            .watch(dir, RecursiveMode::Recursive)
            .with_context(|| format!("watch {:?}", dir))?;
        tracing::info!(directory = %dir.display(), "watching directory");
        Ok(())
    }

    pub fn unwatch(&self, dir: &Path) -> Result<()> {
        let mut watcher = self
            .watcher
            .lock()
            .map_err(|_| anyhow::anyhow!("watcher lock poisoned"))?;
        watcher
            .unwatch(dir)
            .with_context(|| format!("unwatch {:?}", dir))?;
        tracing::info!(directory = %dir.display(), "stopped watching directory");
        Ok(())
    }
}

/// Apply one watch event to the media file store.
pub fn apply_event(scanner: &MediaScanner, stores: &Stores, event: &Event) {
    tracing::trace!(kind = ?event.kind, paths = ?event.paths, "watch event");
    for path in &event.paths {
        match event.kind {
            EventKind::Create(_) => add_path(scanner, stores, path),
            EventKind::Remove(_) => remove_path(stores, path),
            EventKind::Modify(ModifyKind::Name(_)) => {
                if path.exists() {
                    add_path(scanner, stores, path);
                } else {
                    remove_path(stores, path);
                }
            }
            EventKind::Modify(_) => refresh_path(scanner, stores, path),
            _ => {}
        }
    }
}

/// Served directory containing `path`; the deepest one wins.
fn served_directory(stores: &Stores, path: &Path) -> Option<PathBuf> {
    stores
        .directories
        .all()
        .into_keys()
        .map(PathBuf::from)
        .filter(|dir| path.starts_with(dir))
        .max_by_key(|dir| dir.components().count())
}

fn add_path(scanner: &MediaScanner, stores: &Stores, path: &Path) {
    let Some(directory) = served_directory(stores, path) else {
        return;
    };
    if path.is_dir() {
        match scanner.scan(path) {
            Ok(files) => {
                let files = files.into_iter().map(|mut file| {
                    file.directory = directory.to_string_lossy().to_string();
                    file
                });
                stores.media_files.add_many(files);
            }
            Err(err) => tracing::warn!(path = %path.display(), error = %err, "scan of new directory failed"),
        }
    } else if let Some(file) = scanner.media_file(path, &directory) {
        if stores.media_files.add(file) {
            tracing::debug!(path = %path.display(), "media file added");
        }
    }
}

fn remove_path(stores: &Stores, path: &Path) {
    let key = path.to_string_lossy();
    if stores.media_files.take(&key).is_some() {
        tracing::debug!(path = %path.display(), "media file removed");
        return;
    }
    // A removed directory takes everything below it.
    let taken = stores
        .media_files
        .take_where(|file| Path::new(&file.path).starts_with(path));
    if !taken.is_empty() {
        tracing::debug!(path = %path.display(), count = taken.len(), "media files removed");
    }
}

fn refresh_path(scanner: &MediaScanner, stores: &Stores, path: &Path) {
    let Some(directory) = served_directory(stores, path) else {
        return;
    };
    if let Some(file) = scanner.media_file(path, &directory) {
        stores.media_files.put(file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind, RenameMode};
    use player_hub_types::Directory;
    use std::fs;

    fn served(tag: &str) -> (PathBuf, Stores) {
        let dir = std::env::temp_dir().join(format!(
            "player-hub-watch-{tag}-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        fs::create_dir_all(&dir).unwrap();
        let dir = dir.canonicalize().unwrap();
        let stores = Stores::new();
        stores.directories.add(Directory {
            path: dir.to_string_lossy().to_string(),
            watch: true,
        });
        (dir, stores)
    }

    #[tokio::test]
    async fn created_and_removed_files_track_the_store() {
        let (dir, stores) = served("create");
        let scanner = MediaScanner::default();
        let file = dir.join("a.mp4");
        fs::write(&file, b"stub").unwrap();

        apply_event(&scanner, &stores, &Event::new(EventKind::Create(CreateKind::File)).add_path(file.clone()));
        let entry = stores.media_files.get(&file.to_string_lossy()).unwrap();
        assert_eq!(entry.directory, dir.to_string_lossy());

        fs::remove_file(&file).unwrap();
        apply_event(&scanner, &stores, &Event::new(EventKind::Remove(RemoveKind::File)).add_path(file.clone()));
        assert_eq!(stores.media_files.len(), 0);
        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn modified_file_is_refreshed() {
        let (dir, stores) = served("modify");
        let scanner = MediaScanner::default();
        let file = dir.join("a.mp3");
        fs::write(&file, b"stub").unwrap();
        apply_event(&scanner, &stores, &Event::new(EventKind::Create(CreateKind::File)).add_path(file.clone()));

        fs::write(&file, b"longer stub").unwrap();
        apply_event(
            &scanner,
            &stores,
            &Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content))).add_path(file.clone()),
        );
        assert_eq!(stores.media_files.get(&file.to_string_lossy()).unwrap().size, 11);
        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn renames_and_directory_removal() {
        let (dir, stores) = served("rename");
        let scanner = MediaScanner::default();
        let sub = dir.join("sub");
        fs::create_dir_all(&sub).unwrap();
        fs::write(sub.join("a.mkv"), b"stub").unwrap();
        apply_event(&scanner, &stores, &Event::new(EventKind::Create(CreateKind::Folder)).add_path(sub.clone()));
        assert_eq!(stores.media_files.len(), 1);

        let moved = dir.join("moved.mkv");
        fs::rename(sub.join("a.mkv"), &moved).unwrap();
        apply_event(
            &scanner,
            &stores,
            &Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
                .add_path(sub.join("a.mkv"))
                .add_path(moved.clone()),
        );
        assert!(stores.media_files.exists(&moved.to_string_lossy()));
        assert_eq!(stores.media_files.len(), 1);

        fs::write(sub.join("b.mkv"), b"stub").unwrap();
        apply_event(&scanner, &stores, &Event::new(EventKind::Create(CreateKind::File)).add_path(sub.join("b.mkv")));
        fs::remove_dir_all(&sub).unwrap();
        apply_event(&scanner, &stores, &Event::new(EventKind::Remove(RemoveKind::Folder)).add_path(sub.clone()));
        assert_eq!(stores.media_files.len(), 1);
        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn paths_outside_served_directories_are_ignored() {
        let (dir, stores) = served("outside");
        let scanner = MediaScanner::default();
        apply_event(
            &scanner,
            &stores,
            &Event::new(EventKind::Create(CreateKind::File)).add_path(PathBuf::from("/elsewhere/a.mp4")),
        );
        assert_eq!(stores.media_files.len(), 0);
        let _ = fs::remove_dir_all(&dir);
    }
}
