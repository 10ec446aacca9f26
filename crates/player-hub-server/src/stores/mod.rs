//! In-memory state stores.
//!
//! Each store owns its aggregate behind its own lock and publishes one change
//! per effective mutation through its own [`Broadcaster`]. There is no lock
//! spanning several stores.

pub mod collection;
pub mod playback;
pub mod status;

use serde_json::Value;

use player_hub_types::{Directory, MediaFile, Playlist};

use crate::broadcaster::Broadcaster;

pub use collection::{Collection, CollectionChange, Keyed};
pub use playback::{Playback, PlaybackChange};
pub use status::{Status, StatusChange};

pub type MediaFiles = Collection<MediaFile>;
pub type Playlists = Collection<Playlist>;
pub type Directories = Collection<Directory>;

/// A change as it appears on an outward event stream.
pub trait StreamEvent {
    /// Change kind, e.g. `added` or `pause`.
    fn kind(&self) -> &'static str;
    fn payload(&self) -> serde_json::Result<Value>;
}

/// A store that can be mirrored onto an event stream.
pub trait ChangeSource: Send + Sync + 'static {
    type Change: StreamEvent + Clone + Send + Sync + 'static;

    fn broadcaster(&self) -> &Broadcaster<Self::Change>;

    /// Changes that bring a new subscriber up to the current state.
    fn replay(&self) -> Vec<Self::Change>;
}

/// Every store, owned by the server composition and shared by handle.
#[derive(Clone)]
pub struct Stores {
    pub playback: Playback,
    pub playlists: Playlists,
    pub media_files: MediaFiles,
    pub directories: Directories,
    pub status: Status,
}

impl Stores {
    pub fn new() -> Self {
        Self {
            playback: Playback::new(),
            playlists: Collection::new("playlists"),
            media_files: Collection::new("mediafiles"),
            directories: Collection::new("directories"),
            status: Status::new(),
        }
    }
}
