//! Collection endpoints: media files, playlists and directories.
//!
//! GETs carry the collection revision in an `Etag` header; a request that
//! presents the current revision gets `304 Not Modified`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use actix_web::http::header;
use actix_web::{HttpRequest, HttpResponse, Responder, delete, get, post, web};
use player_hub_types::{Directory, MediaFile, Playlist};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::directories::{self, DirectoryError};
use crate::state::AppState;

/// Playlist create/replace payload; a missing uuid creates a new playlist.
#[derive(Deserialize, ToSchema)]
pub struct PlaylistRequest {
    pub uuid: Option<String>,
    pub name: String,
    #[serde(default)]
    pub files: Vec<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct DirectoryRequest {
    pub path: String,
    #[serde(default)]
    pub watch: bool,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DirectoryQuery {
    pub path: String,
}

/// Errors returned by the collection handlers.
#[derive(Debug)]
pub(crate) enum CollectionError {
    NotFound(String),
    BadRequest(String),
    Unavailable(String),
}

impl CollectionError {
    pub(crate) fn into_response(self) -> HttpResponse {
        match self {
            CollectionError::NotFound(msg) => HttpResponse::NotFound().body(msg),
            CollectionError::BadRequest(msg) => HttpResponse::BadRequest().body(msg),
            CollectionError::Unavailable(msg) => HttpResponse::ServiceUnavailable().body(msg),
        }
    }
}

impl From<DirectoryError> for CollectionError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::Invalid(_) => CollectionError::BadRequest(err.to_string()),
            DirectoryError::NotServed(_) => CollectionError::NotFound(err.to_string()),
            DirectoryError::Watch(_) => CollectionError::Unavailable(err.to_string()),
        }
    }
}

/// Revision the client already holds, from `If-None-Match` or `Etag`.
fn presented_revision(req: &HttpRequest) -> Option<u64> {
    [header::IF_NONE_MATCH, header::ETAG]
        .iter()
        .find_map(|name| req.headers().get(name))
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().trim_matches('"').parse().ok())
}

fn revisioned<T: Serialize>(req: &HttpRequest, revision: u64, items: BTreeMap<String, T>) -> HttpResponse {
    let etag = (header::ETAG, revision.to_string());
    if presented_revision(req) == Some(revision) {
        return HttpResponse::NotModified().insert_header(etag).finish();
    }
    HttpResponse::Ok().insert_header(etag).json(items)
}

#[utoipa::path(
    get,
    path = "/mediafiles",
    responses(
        (status = 200, description = "Media files keyed by path", body = BTreeMap<String, MediaFile>),
        (status = 304, description = "Client revision is current")
    )
)]
#[get("/mediafiles")]
pub async fn media_files_list(state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    let (revision, items) = state.stores.media_files.snapshot();
    revisioned(&req, revision, items)
}

#[utoipa::path(
    get,
    path = "/playlists",
    responses(
        (status = 200, description = "Playlists keyed by uuid", body = BTreeMap<String, Playlist>),
        (status = 304, description = "Client revision is current")
    )
)]
#[get("/playlists")]
pub async fn playlists_list(state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    let (revision, items) = state.stores.playlists.snapshot();
    revisioned(&req, revision, items)
}

#[utoipa::path(
    post,
    path = "/playlists",
    request_body = PlaylistRequest,
    responses(
        (status = 200, description = "Stored playlist", body = Playlist),
        (status = 400, description = "Invalid playlist")
    )
)]
#[post("/playlists")]
/// Create a playlist or replace the one with the same uuid.
pub async fn playlists_put(
    state: web::Data<AppState>,
    body: web::Json<PlaylistRequest>,
) -> impl Responder {
    match store_playlist(&state, body.into_inner()) {
        Ok(playlist) => HttpResponse::Ok().json(playlist),
        Err(err) => err.into_response(),
    }
}

fn store_playlist(state: &AppState, request: PlaylistRequest) -> Result<Playlist, CollectionError> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err(CollectionError::BadRequest("playlist name must not be empty".to_string()));
    }
    if let Some(unknown) = request
        .files
        .iter()
        .find(|path| !state.stores.media_files.exists(path))
    {
        return Err(CollectionError::BadRequest(format!("unknown media file: {unknown}")));
    }
    let uuid = request
        .uuid
        .map(|uuid| uuid.trim().to_string())
        .filter(|uuid| !uuid.is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let playlist = Playlist {
        uuid,
        name: name.to_string(),
        files: request.files,
    };
    state.stores.playlists.put(playlist.clone());
    tracing::info!(uuid = %playlist.uuid, files = playlist.files.len(), "playlist stored");
    Ok(playlist)
}

#[utoipa::path(
    delete,
    path = "/playlists/{uuid}",
    params(
        ("uuid" = String, Path, description = "Playlist uuid")
    ),
    responses(
        (status = 200, description = "Removed playlist", body = Playlist),
        (status = 404, description = "Unknown playlist")
    )
)]
#[delete("/playlists/{uuid}")]
pub async fn playlists_delete(state: web::Data<AppState>, uuid: web::Path<String>) -> impl Responder {
    match state.stores.playlists.take(&uuid) {
        Some(playlist) => {
            tracing::info!(uuid = %playlist.uuid, "playlist removed");
            HttpResponse::Ok().json(playlist)
        }
        None => CollectionError::NotFound(format!("unknown playlist: {uuid}")).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/directories",
    responses(
        (status = 200, description = "Served directories keyed by path", body = BTreeMap<String, Directory>),
        (status = 304, description = "Client revision is current")
    )
)]
#[get("/directories")]
pub async fn directories_list(state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    let (revision, items) = state.stores.directories.snapshot();
    revisioned(&req, revision, items)
}

#[utoipa::path(
    post,
    path = "/directories",
    request_body = DirectoryRequest,
    responses(
        (status = 200, description = "Directory served; new directories are scanned in the background", body = Directory),
        (status = 400, description = "Not a directory"),
        (status = 503, description = "Watching unavailable")
    )
)]
#[post("/directories")]
pub async fn directories_add(
    state: web::Data<AppState>,
    body: web::Json<DirectoryRequest>,
) -> impl Responder {
    let path = PathBuf::from(body.path.trim());
    match directories::serve(&state, &path, body.watch) {
        Ok((directory, _scan)) => HttpResponse::Ok().json(directory),
        Err(err) => CollectionError::from(err).into_response(),
    }
}

#[utoipa::path(
    delete,
    path = "/directories",
    params(DirectoryQuery),
    responses(
        (status = 200, description = "Directory no longer served", body = Directory),
        (status = 404, description = "Directory not served")
    )
)]
#[delete("/directories")]
pub async fn directories_delete(
    state: web::Data<AppState>,
    query: web::Query<DirectoryQuery>,
) -> impl Responder {
    match directories::unserve(&state, query.path.trim()) {
        Ok(directory) => HttpResponse::Ok().json(directory),
        Err(err) => CollectionError::from(err).into_response(),
    }
}
