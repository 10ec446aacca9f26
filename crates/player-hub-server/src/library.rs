//! Media directory scanning.
//!
//! Walks served directories, keeps files with a known media extension and
//! probes their duration when the container allows it.

use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tokio::task::JoinHandle;

use player_hub_types::MediaFile;

use crate::stores::Stores;

pub const DEFAULT_EXTENSIONS: &[&str] = &[
    "aac", "avi", "flac", "m4a", "m4v", "mkv", "mov", "mp3", "mp4", "mpg", "ogg", "opus", "wav",
    "webm", "wmv",
];

/// Builds [`MediaFile`] entries for paths with a known extension.
#[derive(Clone, Debug)]
pub struct MediaScanner {
    extensions: Arc<BTreeSet<String>>,
}

impl Default for MediaScanner {
    fn default() -> Self {
        Self::new(DEFAULT_EXTENSIONS)
    }
}

impl MediaScanner {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let extensions = extensions
            .into_iter()
            .map(|ext| ext.as_ref().trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        Self {
            extensions: Arc::new(extensions),
        }
    }

    pub fn is_media(&self, path: &Path) -> bool {
        extension(path).is_some_and(|ext| self.extensions.contains(&ext))
    }

    /// Entry for `path` under the served `directory`, or `None` when the
    /// path is not a readable media file.
    pub fn media_file(&self, path: &Path, directory: &Path) -> Option<MediaFile> {
        if !self.is_media(path) {
            return None;
        }
        let meta = fs::metadata(path).ok()?;
        if !meta.is_file() {
            return None;
        }
        let modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs());
        Some(MediaFile {
            path: path.to_string_lossy().to_string(),
            name: path
                .file_name()
                .and_then(OsStr::to_str)
                .unwrap_or("<unknown>")
                .to_string(),
            directory: directory.to_string_lossy().to_string(),
            size: meta.len(),
            modified,
            duration: probe_duration(path),
        })
    }

    /// Every media file below `directory`, recursively.
    pub fn scan(&self, directory: &Path) -> Result<Vec<MediaFile>> {
        let root = directory
            .canonicalize()
            .with_context(|| format!("canonicalize {:?}", directory))?;
        if !root.is_dir() {
            return Err(anyhow::anyhow!("not a directory: {:?}", root));
        }
        tracing::info!(directory = %root.display(), "scanning directory");
        let mut files = Vec::new();
        self.scan_dir(&root, &root, &mut files)?;
        tracing::info!(directory = %root.display(), files = files.len(), "directory scan complete");
        Ok(files)
    }

    fn scan_dir(&self, root: &Path, dir: &Path, files: &mut Vec<MediaFile>) -> Result<()> {
        let mut subdirs = Vec::new();
        for entry in fs::read_dir(dir).with_context(|| format!("read_dir {:?}", dir))? {
            let entry = entry.context("read_dir entry")?;
            let path = entry.path();
            if path.is_dir() {
                subdirs.push(path);
            } else if let Some(file) = self.media_file(&path, root) {
                files.push(file);
            }
        }
        for subdir in subdirs {
            let Ok(canon) = subdir.canonicalize() else {
                tracing::debug!(path = %subdir.display(), "skipping unreadable directory");
                continue;
            };
            // Symlinks leading outside the served directory are not followed.
            if canon.starts_with(root) && canon != *root {
                self.scan_dir(root, &canon, files)?;
            }
        }
        Ok(())
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(OsStr::to_str)
        .map(str::to_ascii_lowercase)
}

/// Best-effort duration in seconds.
fn probe_duration(path: &Path) -> Option<f64> {
    let file = File::open(path).ok()?;
    let mut hint = Hint::new();
    if let Some(ext) = extension(path) {
        hint.with_extension(&ext);
    }
    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .ok()?;
    let track = probed.format.default_track()?;
    let params = &track.codec_params;
    let frames = params.n_frames?;
    if let Some(time_base) = params.time_base {
        let time = time_base.calc_time(frames);
        return Some(time.seconds as f64 + time.frac);
    }
    let rate = params.sample_rate.filter(|rate| *rate > 0)?;
    Some(frames as f64 / rate as f64)
}

/// Scan `directory` on the blocking pool and add what it finds.
pub fn spawn_scan(scanner: MediaScanner, stores: Stores, directory: PathBuf) -> JoinHandle<()> {
    let label = directory.to_string_lossy().to_string();
    stores.status.scan_started(&label);
    tokio::task::spawn_blocking(move || {
        match scanner.scan(&directory) {
            Ok(files) => {
                let added = stores.media_files.add_many(files);
                tracing::info!(directory = %label, added, "media files indexed");
            }
            Err(err) => {
                tracing::warn!(directory = %label, error = %err, "directory scan failed");
                stores.status.set_error(Some(format!("scan {label}: {err:#}")));
            }
        }
        stores.status.scan_finished(&label);
    })
}
