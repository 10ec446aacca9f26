//! Scripted player for server tests.

use std::time::Duration;

use mpv_ipc::Dispatcher;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const TIMEOUT: Duration = Duration::from_secs(2);

/// Answers every request with success unless its command name is listed in
/// `failing`. With `echo_loadfile`, a `loadfile` is followed by the matching
/// `path` property change.
#[derive(Default)]
pub struct FakePlayer {
    failing: Vec<&'static str>,
    echo_loadfile: bool,
    commands: Option<mpsc::UnboundedReceiver<Value>>,
    outgoing: Option<mpsc::UnboundedSender<String>>,
    tasks: Vec<JoinHandle<()>>,
}

impl FakePlayer {
    pub fn failing(mut self, command: &'static str) -> Self {
        self.failing.push(command);
        self
    }

    pub fn echo_loadfile(mut self) -> Self {
        self.echo_loadfile = true;
        self
    }

    /// Next command other than observe requests.
    pub async fn next_command(&mut self) -> Value {
        let commands = self.commands.as_mut().expect("player not started");
        loop {
            let command = tokio::time::timeout(TIMEOUT, commands.recv())
                .await
                .expect("command timeout")
                .expect("player gone");
            if command[0] != "observe_property" {
                return command;
            }
        }
    }

    /// Push a property change as if the player observed it.
    pub fn send_event(&self, name: &str, data: Value) {
        let outgoing = self.outgoing.as_ref().expect("player not started");
        let event = json!({"event": "property-change", "name": name, "data": data});
        outgoing.send(format!("{event}\n")).expect("player gone");
    }

    pub async fn saw_command(&mut self, name: &str) -> bool {
        loop {
            let commands = self.commands.as_mut().expect("player not started");
            match tokio::time::timeout(TIMEOUT, commands.recv()).await {
                Ok(Some(command)) if command[0] == name => return true,
                Ok(Some(_)) => continue,
                _ => return false,
            }
        }
    }

    fn start(mut self, stream: DuplexStream) -> Self {
        let (read, mut write) = tokio::io::split(stream);
        let (lines_tx, mut lines_rx) = mpsc::unbounded_channel::<String>();
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let failing = self.failing.clone();
        let echo_loadfile = self.echo_loadfile;
        let outgoing = lines_tx.clone();

        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let request: Value = serde_json::from_str(&line).unwrap();
                let id = request["request_id"].clone();
                let command = request["command"].clone();
                let name = command[0].as_str().unwrap_or_default().to_string();
                let reply = if failing.iter().any(|f| *f == name) {
                    json!({"error": "invalid parameter", "request_id": id})
                } else {
                    json!({"error": "success", "request_id": id, "data": null})
                };
                let _ = lines_tx.send(format!("{reply}\n"));
                if echo_loadfile && name == "loadfile" {
                    let event = json!({"event": "property-change", "id": 1, "name": "path", "data": command[1]});
                    let _ = lines_tx.send(format!("{event}\n"));
                }
                if name != "get_version" {
                    let _ = commands_tx.send(command);
                }
            }
        });
        let writer = tokio::spawn(async move {
            while let Some(line) = lines_rx.recv().await {
                if write.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        self.commands = Some(commands);
        self.outgoing = Some(outgoing);
        self.tasks = vec![reader, writer];
        self
    }
}

impl Drop for FakePlayer {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// A dispatcher attached to `player` and serving in the background.
pub async fn connected_dispatcher(player: FakePlayer) -> (Dispatcher, FakePlayer) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let player = player.start(server);
    let dispatcher = Dispatcher::new("/unused/player.sock", TIMEOUT);
    let (read, write) = tokio::io::split(client);
    dispatcher.attach(read, write).await.expect("attach");
    let serving = dispatcher.clone();
    tokio::spawn(async move {
        let _ = serving.serve().await;
    });
    (dispatcher, player)
}
