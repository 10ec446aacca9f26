//! Playback state and form commands.

use actix_web::{HttpResponse, Responder, get, post, web};
use player_hub_types::{CommandResponse, PlaybackSnapshot};

use crate::commands::CommandRunner;
use crate::state::AppState;

#[utoipa::path(
    get,
    path = "/playback",
    responses(
        (status = 200, description = "Current playback state", body = PlaybackSnapshot)
    )
)]
#[get("/playback")]
pub async fn playback_get(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(state.stores.playback.snapshot())
}

#[utoipa::path(
    post,
    path = "/playback",
    request_body(
        content = String,
        content_type = "application/x-www-form-urlencoded",
        description = "One field per command: path, pause, fullscreen, audioID, subtitleID, loopFile, volume, seek, chapter, playlistUUID, playlistIndex, stop"
    ),
    responses(
        (status = 200, description = "Every command ran", body = CommandResponse),
        (status = 400, description = "General or per-argument errors", body = CommandResponse)
    )
)]
#[post("/playback")]
/// Run the form's playback commands in request order.
pub async fn playback_command(
    state: web::Data<AppState>,
    form: web::Form<Vec<(String, String)>>,
) -> impl Responder {
    let response = CommandRunner::new(&state.dispatcher, &state.stores)
        .run(&form)
        .await;
    if response.is_ok() {
        HttpResponse::Ok().json(response)
    } else {
        tracing::info!(
            error = ?response.error,
            arguments = ?response.arguments,
            "playback command rejected"
        );
        HttpResponse::BadRequest().json(response)
    }
}
