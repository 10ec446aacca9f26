//! HTTP API handlers.
//!
//! Defines the Actix routes for playback control, collections and the event stream.

pub mod collections;
#[path = "events.rs"]
pub mod events_api;
#[path = "health.rs"]
pub mod health_api;
pub mod playback;
pub mod status;

pub use collections::{
    DirectoryRequest,
    PlaylistRequest,
    directories_add,
    directories_delete,
    directories_list,
    media_files_list,
    playlists_delete,
    playlists_list,
    playlists_put,
};
pub use events_api::events;
pub use health_api::{HealthResponse, health};
pub use playback::{playback_command, playback_get};
pub use status::status_get;

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::time::Duration;

    use actix_web::body::MessageBody;
    use actix_web::http::{StatusCode, header};
    use actix_web::{App, test, web};
    use mpv_ipc::Dispatcher;
    use player_hub_types::{CommandResponse, Directory, MediaFile, Playlist, StatusSnapshot};
    use serde_json::json;
    use std::collections::BTreeMap;

    use crate::api;
    use crate::library::MediaScanner;
    use crate::state::AppState;
    use crate::stores::Stores;
    use crate::test_support::{FakePlayer, connected_dispatcher};

    fn make_state(dispatcher: Dispatcher) -> web::Data<AppState> {
        web::Data::new(AppState::new(
            dispatcher,
            Stores::new(),
            MediaScanner::default(),
            None,
        ))
    }

    fn offline_state() -> web::Data<AppState> {
        make_state(Dispatcher::new("/nonexistent/player.sock", Duration::from_millis(10)))
    }

    fn media(path: &str) -> MediaFile {
        MediaFile {
            path: path.to_string(),
            name: path.rsplit('/').next().unwrap_or(path).to_string(),
            directory: "/media".to_string(),
            ..MediaFile::default()
        }
    }

    fn etag<B>(resp: &actix_web::dev::ServiceResponse<B>) -> String {
        resp.headers()
            .get(header::ETAG)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    }

    /// Next chunk of a streaming body that never ends on its own.
    async fn next_chunk<B: MessageBody>(body: &mut Pin<Box<B>>) -> String {
        let chunk = tokio::time::timeout(
            Duration::from_secs(2),
            std::future::poll_fn(|cx| body.as_mut().poll_next(cx)),
        )
        .await
        .expect("chunk timeout")
        .expect("stream ended");
        match chunk {
            Ok(bytes) => String::from_utf8(bytes.to_vec()).unwrap(),
            Err(_) => panic!("stream error"),
        }
    }

    #[actix_web::test]
    async fn collection_get_honours_revision() {
        let state = offline_state();
        state.stores.media_files.add(media("/media/a.mp4"));
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .service(api::media_files_list),
        )
        .await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/mediafiles").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let revision = etag(&resp);
        let body: BTreeMap<String, MediaFile> = test::read_body_json(resp).await;
        assert!(body.contains_key("/media/a.mp4"));

        let req = test::TestRequest::get()
            .uri("/mediafiles")
            .insert_header((header::ETAG, revision.clone()))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_MODIFIED);
        assert!(test::read_body(resp).await.is_empty());

        state.stores.media_files.add(media("/media/b.mp4"));
        let req = test::TestRequest::get()
            .uri("/mediafiles")
            .insert_header((header::ETAG, revision.clone()))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let next: u64 = etag(&resp).parse().unwrap();
        assert_eq!(next, revision.parse::<u64>().unwrap() + 1);
    }

    #[actix_web::test]
    async fn playlists_create_list_and_delete() {
        let state = offline_state();
        state.stores.media_files.add(media("/media/a.mp4"));
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .service(api::playlists_list)
                .service(api::playlists_put)
                .service(api::playlists_delete),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/playlists")
            .set_json(json!({"name": "Mix", "files": ["/media/a.mp4"]}))
            .to_request();
        let created: Playlist = test::call_and_read_body_json(&app, req).await;
        assert!(!created.uuid.is_empty());

        let req = test::TestRequest::post()
            .uri("/playlists")
            .set_json(json!({"name": "Bad", "files": ["/media/missing.mp4"]}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::get().uri("/playlists").to_request();
        let listed: BTreeMap<String, Playlist> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(listed.len(), 1);

        let uri = format!("/playlists/{}", created.uuid);
        let resp = test::call_service(&app, test::TestRequest::delete().uri(&uri).to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let resp = test::call_service(&app, test::TestRequest::delete().uri(&uri).to_request()).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn directories_add_and_remove() {
        let state = offline_state();
        let dir = std::env::temp_dir().join(format!(
            "player-hub-api-dirs-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .service(api::directories_list)
                .service(api::directories_add)
                .service(api::directories_delete),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/directories")
            .set_json(json!({"path": dir.to_string_lossy()}))
            .to_request();
        let added: Directory = test::call_and_read_body_json(&app, req).await;
        assert!(!added.watch);

        let req = test::TestRequest::post()
            .uri("/directories")
            .set_json(json!({"path": "/nonexistent/media"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let uri = format!("/directories?path={}", added.path.replace('/', "%2F"));
        let resp = test::call_service(&app, test::TestRequest::delete().uri(&uri).to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let resp = test::call_service(&app, test::TestRequest::delete().uri(&uri).to_request()).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[actix_web::test]
    async fn playback_form_without_player_is_rejected() {
        let state = offline_state();
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .service(api::playback_command),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/playback")
            .set_form([("pause", "yes")])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: CommandResponse = test::read_body_json(resp).await;
        assert_eq!(body.error.as_deref(), Some("player not connected"));
    }

    #[actix_web::test]
    async fn playback_form_reaches_the_player() {
        let (dispatcher, mut player) = connected_dispatcher(FakePlayer::default()).await;
        let state = make_state(dispatcher);
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .service(api::playback_get)
                .service(api::playback_command),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/playback")
            .set_form([("fullscreen", "true"), ("stop", "")])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(player.next_command().await, json!(["set_property", "fullscreen", true]));
        assert_eq!(player.next_command().await, json!(["stop"]));

        let req = test::TestRequest::post()
            .uri("/playback")
            .set_form([("volume", "loud")])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: CommandResponse = test::read_body_json(resp).await;
        assert!(body.arguments.contains_key("volume"));

        let req = test::TestRequest::get().uri("/playback").to_request();
        let snapshot: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(snapshot["stopped"], true);
    }

    #[actix_web::test]
    async fn events_replay_then_push() {
        let state = offline_state();
        let app = test::init_service(App::new().app_data(state.clone()).service(api::events)).await;

        let req = test::TestRequest::get().uri("/events?channels=status").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/event-stream"
        );
        let mut body = Box::pin(resp.into_body());

        let replay = next_chunk(&mut body).await;
        assert!(replay.starts_with("event:status.reset\ndata:"), "{replay}");

        state.stores.status.set_connected(true);
        let pushed = next_chunk(&mut body).await;
        assert!(pushed.starts_with("event:status.connected\n"), "{pushed}");
    }

    #[actix_web::test]
    async fn events_reject_unknown_channels() {
        let state = offline_state();
        let app = test::init_service(App::new().app_data(state.clone()).service(api::events)).await;

        let req = test::TestRequest::get().uri("/events?channels=status,bogus").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn status_and_health() {
        let state = offline_state();
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .service(api::status_get)
                .service(api::health),
        )
        .await;

        let req = test::TestRequest::get().uri("/status").to_request();
        let status: StatusSnapshot = test::call_and_read_body_json(&app, req).await;
        assert!(!status.player_connected);

        let req = test::TestRequest::get().uri("/health").to_request();
        let health: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(health["status"], "ok");
        assert_eq!(health["player_connected"], false);
    }
}
