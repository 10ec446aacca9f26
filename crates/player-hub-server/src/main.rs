mod api;
mod broadcaster;
mod channels;
mod commands;
mod config;
mod directories;
mod library;
mod openapi;
mod player_sync;
mod playlist_file;
mod startup;
mod state;
mod stores;
#[cfg(test)]
mod test_support;
mod watcher;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "player-hub-server")]
pub(crate) struct Args {
    /// HTTP bind address, e.g. 0.0.0.0:8080
    #[arg(long)]
    pub bind: Option<SocketAddr>,

    /// Player IPC socket path
    #[arg(long)]
    pub socket: Option<PathBuf>,

    /// Launch and supervise the player process
    #[arg(long)]
    pub spawn_player: bool,

    /// Player binary used with --spawn-player
    #[arg(long)]
    pub player_bin: Option<String>,

    /// Seconds to keep dialing the player socket
    #[arg(long)]
    pub connect_timeout_secs: Option<u64>,

    /// Allow cross-origin requests from any origin
    #[arg(long)]
    pub cors: bool,

    /// Media directory to serve (repeatable)
    #[arg(long)]
    pub dir: Vec<PathBuf>,

    /// Watch directories given with --dir for changes
    #[arg(long)]
    pub watch: bool,

    /// JSON file holding playlists
    #[arg(long)]
    pub playlists_file: Option<PathBuf>,

    /// Optional server config file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[actix_web::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,actix_web=info,player_hub_server=info")
        }))
        .init();

    startup::run(args).await
}
