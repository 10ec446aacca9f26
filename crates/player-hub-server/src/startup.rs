//! Actix server startup + app wiring.
//!
//! Builds the stores, connects the player link, and serves routes,
//! middleware and OpenAPI endpoints.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::task::{Context, Poll};

use actix_cors::Cors;
use actix_web::dev::{Service, ServiceRequest, ServiceResponse};
use actix_web::{App, Error, HttpServer, web};
use anyhow::Result;
use futures_util::future::{LocalBoxFuture, Ready, ok};
use mpv_ipc::{Dispatcher, PlayerCommand, Supervisor, SupervisorEvent};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::{self, DirectoryConfig, ServerConfig};
use crate::directories;
use crate::library::MediaScanner;
use crate::state::AppState;
use crate::stores::Stores;
use crate::watcher::DirectoryWatcher;
use crate::{api, openapi, player_sync, playlist_file};

/// Build server state and start the Actix HTTP server.
pub(crate) async fn run(args: crate::Args) -> Result<()> {
    let mut cfg = load_config(args.config.as_ref())?;
    apply_args(&mut cfg, &args);

    let bind = resolve_bind(&cfg)?;
    let socket = config::socket_path_from_config(&cfg);
    let connect_timeout = config::connect_timeout_from_config(&cfg)?;
    let player = config::player_from_config(&cfg);
    let cors = cfg.cors.unwrap_or(false);
    tracing::info!(
        bind = %bind,
        socket = %socket.display(),
        spawn_player = player.is_some(),
        cors,
        "starting player-hub-server"
    );

    let stores = Stores::new();
    let dispatcher =
        Dispatcher::with_decoders(socket, connect_timeout, config::decoders_from_config(&cfg));

    let playlists_file = config::playlists_file_from_config(&cfg);
    let _playlist_writer = playlist_file::persist(playlists_file, &stores.playlists)?;

    let scanner = MediaScanner::new(config::media_extensions_from_config(&cfg));
    let watcher = match DirectoryWatcher::start(scanner.clone(), stores.clone()) {
        Ok(watcher) => Some(watcher),
        Err(err) => {
            tracing::warn!(error = %err, "file watching disabled");
            None
        }
    };
    let state = web::Data::new(AppState::new(dispatcher.clone(), stores.clone(), scanner, watcher));
    serve_directories(&state, &config::directories_from_config(&cfg));

    let _player_sync = player_sync::start(&dispatcher, stores.playback.clone()).await;
    let cancel = CancellationToken::new();
    spawn_supervisor(dispatcher, player, stores, cancel.clone());
    setup_shutdown(cancel.clone());

    HttpServer::new(move || {
        let cors = if cors {
            Cors::permissive()
        } else {
            Cors::default()
        };

        App::new()
            .app_data(state.clone())
            .wrap(cors)
            .wrap(FilteredLogger)
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-doc/openapi.json", openapi::ApiDoc::openapi()),
            )
            .service(api::playback_get)
            .service(api::playback_command)
            .service(api::media_files_list)
            .service(api::playlists_list)
            .service(api::playlists_put)
            .service(api::playlists_delete)
            .service(api::directories_list)
            .service(api::directories_add)
            .service(api::directories_delete)
            .service(api::status_get)
            .service(api::health)
            .service(api::events)
    })
    .bind(bind)?
    .run()
    .await?;

    cancel.cancel();
    Ok(())
}

fn serve_directories(state: &AppState, dirs: &[DirectoryConfig]) {
    for dir in dirs {
        if let Err(err) = directories::serve(state, Path::new(&dir.path), dir.watch) {
            tracing::warn!(directory = %dir.path, error = %err, "skipping configured directory");
        }
    }
}

/// Keep the player link up and mirror its lifecycle into the status store.
fn spawn_supervisor(
    dispatcher: Dispatcher,
    player: Option<PlayerCommand>,
    stores: Stores,
    cancel: CancellationToken,
) {
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let status_stores = stores.clone();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SupervisorEvent::Connected => {
                    status_stores.status.set_connected(true);
                    status_stores.status.set_error(None);
                }
                SupervisorEvent::Disconnected => {
                    status_stores.status.set_connected(false);
                    status_stores.playback.stop();
                }
                SupervisorEvent::Restarting(count) => status_stores.status.set_restarts(count),
            }
        }
    });

    tokio::spawn(async move {
        let supervisor = Supervisor::new(dispatcher, player).with_events(events_tx);
        if let Err(err) = supervisor.run(cancel).await {
            stores.status.set_connected(false);
            stores.status.set_error(Some(err.to_string()));
        }
    });
}

/// Return true when the request path should be logged.
fn should_log_path(path: &str) -> bool {
    !(path == "/events" || path.starts_with("/swagger-ui/") || path == "/api-doc/openapi.json")
}

/// Actix middleware that filters noisy paths from logging.
struct FilteredLogger;

impl<S, B> actix_web::dev::Transform<S, ServiceRequest> for FilteredLogger
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = FilteredLoggerMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(FilteredLoggerMiddleware { service })
    }
}

/// Service wrapper that applies the logging filter.
struct FilteredLoggerMiddleware<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for FilteredLoggerMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&self, ctx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(ctx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let path = req.path().to_string();
        let should_log = should_log_path(&path);
        let method = req.method().clone();
        let peer = req
            .connection_info()
            .realip_remote_addr()
            .unwrap_or("-")
            .to_string();
        let start = std::time::Instant::now();
        let fut = self.service.call(req);
        Box::pin(async move {
            let res = fut.await?;
            if should_log {
                tracing::info!(
                    method = %method,
                    path = %path,
                    status = %res.status().as_u16(),
                    peer = %peer,
                    elapsed_ms = %start.elapsed().as_millis(),
                    "http request"
                );
            }
            Ok(res)
        })
    }
}

/// Load server config from `--config`, `config.toml` next to the binary, or defaults.
fn load_config(path: Option<&PathBuf>) -> Result<ServerConfig> {
    if let Some(path) = path {
        return ServerConfig::load(path);
    }
    let auto_path = std::env::current_exe()
        .ok()
        .and_then(|path| path.parent().map(|dir| dir.join("config.toml")))
        .filter(|path| path.exists());
    match auto_path {
        Some(path) => ServerConfig::load(&path),
        None => {
            tracing::info!("no config file; using flags and defaults");
            Ok(ServerConfig::default())
        }
    }
}

/// Flags win over config values.
fn apply_args(cfg: &mut ServerConfig, args: &crate::Args) {
    if let Some(bind) = args.bind {
        cfg.bind = Some(bind.to_string());
    }
    if let Some(socket) = args.socket.as_ref() {
        cfg.socket_path = Some(socket.to_string_lossy().to_string());
    }
    if args.spawn_player {
        cfg.spawn_player = Some(true);
    }
    if let Some(bin) = args.player_bin.as_ref() {
        cfg.player_bin = Some(bin.clone());
    }
    if let Some(secs) = args.connect_timeout_secs {
        cfg.connect_timeout_secs = Some(secs);
    }
    if args.cors {
        cfg.cors = Some(true);
    }
    if let Some(file) = args.playlists_file.as_ref() {
        cfg.playlists_file = Some(file.to_string_lossy().to_string());
    }
    if !args.dir.is_empty() {
        let dirs = cfg.directories.get_or_insert_with(Vec::new);
        dirs.extend(args.dir.iter().map(|dir| DirectoryConfig {
            path: dir.to_string_lossy().to_string(),
            watch: args.watch,
        }));
    }
}

/// Resolve the final bind address from args + config.
fn resolve_bind(cfg: &ServerConfig) -> Result<SocketAddr> {
    match config::bind_from_config(cfg)? {
        Some(addr) => Ok(addr),
        None => Ok(config::DEFAULT_BIND.parse()?),
    }
}

/// Install Ctrl+C handler to stop the supervisor and the server.
fn setup_shutdown(cancel: CancellationToken) {
    let _ = ctrlc::set_handler(move || {
        cancel.cancel();
        if let Some(system) = actix_web::rt::System::try_current() {
            system.stop();
        } else {
            std::process::exit(0);
        }
    });
}
