//! Shared server state.

use mpv_ipc::Dispatcher;

use crate::channels::Channels;
use crate::library::MediaScanner;
use crate::stores::Stores;
use crate::watcher::DirectoryWatcher;

/// Handles every request handler needs, owned by the server composition.
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub stores: Stores,
    pub channels: Channels,
    pub scanner: MediaScanner,
    /// Missing when the platform watcher could not be created.
    pub watcher: Option<DirectoryWatcher>,
}

impl AppState {
    pub fn new(
        dispatcher: Dispatcher,
        stores: Stores,
        scanner: MediaScanner,
        watcher: Option<DirectoryWatcher>,
    ) -> Self {
        let channels = Channels::new(&stores);
        Self {
            dispatcher,
            stores,
            channels,
            scanner,
            watcher,
        }
    }
}
