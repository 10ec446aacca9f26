//! Keeps the player process and its dispatcher alive.
//!
//! Each run spawns the player (when configured), connects the dispatcher,
//! serves until the player goes away, then reaps the child. Observers stay
//! registered on the dispatcher, so the next run re-arms them on connect.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::Dispatcher;
use crate::error::IpcError;
use crate::restart::run_until_cancelled;

/// Delay between a disconnect and the next run.
pub const RESTART_DELAY: Duration = Duration::from_secs(1);

/// How to launch the player process.
#[derive(Debug, Clone)]
pub struct PlayerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl PlayerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Full argument list: idle mode and IPC server first, extra args after.
    pub fn command_args(&self, socket: &Path) -> Vec<String> {
        let mut args = vec![
            "--idle=yes".to_string(),
            format!("--input-ipc-server={}", socket.display()),
        ];
        args.extend(self.args.iter().cloned());
        args
    }

    fn spawn(&self, socket: &Path) -> Result<Child, IpcError> {
        if socket.exists() {
            let _ = std::fs::remove_file(socket);
        }
        Command::new(&self.program)
            .args(self.command_args(socket))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| IpcError::Process(format!("spawn {}: {e}", self.program.display())))
    }
}

/// Connection lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    Connected,
    Disconnected,
    /// A run after the first one started; carries the restart count.
    Restarting(u64),
}

pub struct Supervisor {
    dispatcher: Dispatcher,
    player: Option<PlayerCommand>,
    events: Option<mpsc::UnboundedSender<SupervisorEvent>>,
    runs: Arc<AtomicU64>,
}

impl Supervisor {
    /// Supervise `dispatcher`; spawn `player` on every run when given,
    /// otherwise only reconnect to an externally managed player.
    pub fn new(dispatcher: Dispatcher, player: Option<PlayerCommand>) -> Self {
        Self {
            dispatcher,
            player,
            events: None,
            runs: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<SupervisorEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Loop until cancelled or until a run fails to (re)connect.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), IpcError> {
        let outcome = run_until_cancelled(cancel, RESTART_DELAY, |cancel| self.run_once(cancel)).await;
        if let Err(err) = &outcome {
            tracing::error!(error = %err, "player supervision stopped");
        }
        outcome
    }

    async fn run_once(&self, cancel: CancellationToken) -> Result<(), IpcError> {
        let run = self.runs.fetch_add(1, Ordering::SeqCst);
        if run > 0 {
            tracing::info!(restarts = run, "restarting player session");
            self.notify(SupervisorEvent::Restarting(run));
        }

        let socket = self.dispatcher.socket_path().to_path_buf();
        let mut child = match &self.player {
            Some(player) => {
                let child = player.spawn(&socket)?;
                tracing::info!(
                    program = %player.program.display(),
                    pid = ?child.id(),
                    socket = %socket.display(),
                    "spawned player"
                );
                Some(child)
            }
            None => None,
        };

        if let Err(err) = self.dispatcher.connect().await {
            if let Some(child) = child.as_mut() {
                reap(child).await;
            }
            return Err(err);
        }
        self.notify(SupervisorEvent::Connected);

        let outcome = tokio::select! {
            served = self.dispatcher.serve() => served,
            _ = cancel.cancelled() => {
                self.dispatcher.close().await;
                Ok(())
            }
        };
        self.notify(SupervisorEvent::Disconnected);

        if let Some(child) = child.as_mut() {
            reap(child).await;
        }
        outcome
    }

    fn notify(&self, event: SupervisorEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

async fn reap(child: &mut Child) {
    if let Ok(Some(status)) = child.try_wait() {
        tracing::info!(%status, "player exited");
        return;
    }
    if let Err(err) = child.start_kill() {
        tracing::warn!(error = %err, "failed to signal player");
    }
    match child.wait().await {
        Ok(status) => tracing::info!(%status, "player stopped"),
        Err(err) => tracing::warn!(error = %err, "failed to reap player"),
    }
}
