use utoipa::OpenApi;

use crate::api;
use player_hub_types::{CommandResponse, Directory, MediaFile, PlaybackSnapshot, Playlist, StatusSnapshot};

#[derive(OpenApi)]
#[openapi(
    paths(
        api::playback::playback_get,
        api::playback::playback_command,
        api::collections::media_files_list,
        api::collections::playlists_list,
        api::collections::playlists_put,
        api::collections::playlists_delete,
        api::collections::directories_list,
        api::collections::directories_add,
        api::collections::directories_delete,
        api::status::status_get,
        api::health_api::health,
        api::events_api::events,
    ),
    components(
        schemas(
            MediaFile,
            Playlist,
            Directory,
            PlaybackSnapshot,
            StatusSnapshot,
            CommandResponse,
            api::PlaylistRequest,
            api::DirectoryRequest,
            api::HealthResponse,
        )
    ),
    tags(
        (name = "player-hub-server", description = "Media player control and state streaming API")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documents_every_route() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&str> = doc.paths.paths.keys().map(String::as_str).collect();
        for expected in [
            "/playback",
            "/mediafiles",
            "/playlists",
            "/playlists/{uuid}",
            "/directories",
            "/status",
            "/health",
            "/events",
        ] {
            assert!(paths.contains(&expected), "missing {expected}");
        }
    }
}
