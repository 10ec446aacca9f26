use actix_web::{HttpResponse, Responder, get, web};
use player_hub_types::StatusSnapshot;

use crate::state::AppState;

#[utoipa::path(
    get,
    path = "/status",
    responses(
        (status = 200, description = "Player link and background job status", body = StatusSnapshot)
    )
)]
#[get("/status")]
pub async fn status_get(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(state.stores.status.snapshot())
}
