//! Command/event dispatcher over the single player connection.
//!
//! One background read loop ([`Dispatcher::serve`]) demultiplexes inbound
//! frames: responses complete the pending request with the same id, and
//! property-change events fan out to every subscription of the named
//! property's observer.
//!
//! Each subscription owns an unbounded queue fed in wire order by the read
//! loop and drained by its own forwarding task, so a slow subscriber delays
//! only itself and never loses events. A subscription may span several
//! properties; its events then keep the order they had on the wire.
//!
//! Observer registrations outlive connections. Every (re)connect re-sends
//! `observe_property` for each registered observer, so subscribers keep
//! receiving events across player restarts without resubscribing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::error::IpcError;
use crate::frame::{Decoders, FrameReader};
use crate::protocol::{ObservePropertyResponse, Request, Response};

/// Interval between dial attempts while the socket is not accepting.
pub const DIAL_RETRY_INTERVAL: Duration = Duration::from_secs(1);

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Cheaply cloneable handle to one player connection.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    socket_path: PathBuf,
    connect_timeout: Duration,
    decoders: Decoders,
    connected: AtomicBool,
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    reader: Mutex<Option<FrameReader<BoxedReader>>>,
    next_request_id: AtomicI64,
    pending: Mutex<HashMap<i64, oneshot::Sender<Response>>>,
    next_observe_id: AtomicI64,
    next_subscription_id: AtomicU64,
    observers: Mutex<HashMap<String, Observer>>,
}

/// Per-property registration shared by all of its subscriptions.
struct Observer {
    observe_id: i64,
    /// `observe_property` was sent on the current connection.
    armed: bool,
    subscriptions: HashMap<u64, mpsc::UnboundedSender<ObservePropertyResponse>>,
}

impl Observer {
    fn new(observe_id: i64) -> Self {
        Self {
            observe_id,
            armed: false,
            subscriptions: HashMap::new(),
        }
    }
}

impl Dispatcher {
    pub fn new(socket_path: impl Into<PathBuf>, connect_timeout: Duration) -> Self {
        Self::with_decoders(socket_path, connect_timeout, Decoders::default())
    }

    pub fn with_decoders(
        socket_path: impl Into<PathBuf>,
        connect_timeout: Duration,
        decoders: Decoders,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                socket_path: socket_path.into(),
                connect_timeout,
                decoders,
                connected: AtomicBool::new(false),
                writer: tokio::sync::Mutex::new(None),
                reader: Mutex::new(None),
                next_request_id: AtomicI64::new(1),
                pending: Mutex::new(HashMap::new()),
                next_observe_id: AtomicI64::new(1),
                next_subscription_id: AtomicU64::new(1),
                observers: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.inner.socket_path
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Dial the socket, retrying until the connect timeout elapses, then
    /// validate the channel with a liveness probe.
    pub async fn connect(&self) -> Result<(), IpcError> {
        if self.is_connected() {
            return Err(IpcError::AlreadyConnected);
        }
        let stream = dial(&self.inner.socket_path, self.inner.connect_timeout).await?;
        let (read, write) = stream.into_split();
        self.attach(read, write).await
    }

    /// Adopt an already established transport.
    ///
    /// Performs the liveness probe before the connection is considered live;
    /// on probe failure the transport is dropped.
    pub async fn attach<R, W>(&self, reader: R, writer: W) -> Result<(), IpcError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let mut frames = FrameReader::with_decoders(
            Box::new(reader) as BoxedReader,
            self.inner.decoders.clone(),
        );
        let mut writer: BoxedWriter = Box::new(writer);
        {
            let mut slot = self.inner.writer.lock().await;
            if slot.is_some() {
                return Err(IpcError::AlreadyConnected);
            }
            let probe_id = self.reserve_request_id();
            write_line(&mut writer, &Request::new(vec![json!("get_version")], probe_id)).await?;
            let reply = tokio::time::timeout(
                self.inner.connect_timeout,
                self.await_probe(&mut frames, probe_id),
            )
            .await
            .map_err(|_| IpcError::Timeout)??;
            if !reply.is_success() {
                return Err(IpcError::Probe(
                    reply.error.unwrap_or_else(|| "missing error field".to_string()),
                ));
            }
            tracing::debug!(version = %reply.into_data(), "player liveness probe ok");

            if let Ok(mut reader) = self.inner.reader.lock() {
                *reader = Some(frames);
            }
            *slot = Some(writer);
            self.inner.connected.store(true, Ordering::SeqCst);
        }
        tracing::info!(socket = %self.inner.socket_path.display(), "connected to player");
        self.rearm_observers().await;
        Ok(())
    }

    async fn await_probe(
        &self,
        frames: &mut FrameReader<BoxedReader>,
        probe_id: i64,
    ) -> Result<Response, IpcError> {
        loop {
            match frames.next().await {
                Ok(response) if response.correlation_id() == Some(probe_id) => return Ok(response),
                Ok(response) => self.distribute(response),
                Err(err) if !err.is_fatal_read() => {
                    tracing::warn!(error = %err, "skipping malformed frame during probe");
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Write one command with the given id. No correlation tracking.
    pub async fn dispatch(&self, command: Vec<Value>, request_id: i64) -> Result<(), IpcError> {
        let request = Request::new(command, request_id);
        let mut slot = self.inner.writer.lock().await;
        let writer = slot.as_mut().ok_or(IpcError::NotConnected)?;
        write_line(writer, &request).await
    }

    /// Send a command and wait for its correlated response.
    ///
    /// Returns the response `data` (null when absent).
    pub async fn request(&self, command: Vec<Value>) -> Result<Value, IpcError> {
        if !self.is_connected() {
            return Err(IpcError::NotConnected);
        }
        let (request_id, reply) = self.register_pending();
        if let Err(err) = self.dispatch(command, request_id).await {
            self.forget_pending(request_id);
            return Err(err);
        }
        let response = reply.await.map_err(|_| IpcError::Disconnected)?;
        if !response.is_success() {
            return Err(IpcError::Command(
                response.error.unwrap_or_else(|| "missing error field".to_string()),
            ));
        }
        Ok(response.into_data())
    }

    /// Run the read loop until the player disconnects.
    ///
    /// EOF ends the loop cleanly; other I/O errors are returned. Malformed
    /// frames and undeliverable messages are logged and skipped. Pending
    /// requests fail with [`IpcError::Disconnected`] once the loop exits.
    pub async fn serve(&self) -> Result<(), IpcError> {
        let frames = self.inner.reader.lock().ok().and_then(|mut r| r.take());
        let Some(mut frames) = frames else {
            return Err(IpcError::NotConnected);
        };

        let outcome = loop {
            match frames.next().await {
                Ok(response) => self.distribute(response),
                Err(err) if err.is_closed() => {
                    tracing::info!("player closed the connection");
                    break Ok(());
                }
                Err(err) if !err.is_fatal_read() => {
                    tracing::warn!(error = %err, "skipping malformed frame");
                }
                Err(err) => break Err(err),
            }
        };
        self.close().await;
        outcome
    }

    /// Tear down the connection and fail every pending request.
    pub async fn close(&self) {
        self.inner.connected.store(false, Ordering::SeqCst);
        if let Ok(mut observers) = self.inner.observers.lock() {
            for observer in observers.values_mut() {
                observer.armed = false;
            }
        }
        if let Some(mut writer) = self.inner.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        if let Ok(mut reader) = self.inner.reader.lock() {
            reader.take();
        }
        let abandoned = self
            .inner
            .pending
            .lock()
            .map(|mut pending| pending.drain().count())
            .unwrap_or(0);
        if abandoned > 0 {
            tracing::warn!(count = abandoned, "failing requests pending at disconnect");
        }
    }

    /// Register `out` for every change of `property`.
    ///
    /// The observer is created on first use; the wire-level observe request
    /// is only sent while connected (it is re-sent on every reconnect). The
    /// returned id must be passed to [`Dispatcher::unobserve_property`] to
    /// stop forwarding. `out` is never closed by the dispatcher, so one
    /// receiver can collect several subscriptions.
    pub async fn subscribe_to_property(
        &self,
        property: &str,
        out: mpsc::Sender<ObservePropertyResponse>,
    ) -> u64 {
        self.subscribe_to_properties(&[property], out).await
    }

    /// Register one subscription on several properties.
    ///
    /// Events for all of `properties` reach `out` in the order the player
    /// sent them. The returned id is shared; unobserving one property leaves
    /// the others forwarding.
    pub async fn subscribe_to_properties(
        &self,
        properties: &[&str],
        out: mpsc::Sender<ObservePropertyResponse>,
    ) -> u64 {
        let subscription_id = self.inner.next_subscription_id.fetch_add(1, Ordering::SeqCst);
        let (queue, queued) = mpsc::unbounded_channel();

        let to_arm = {
            let mut observers = match self.inner.observers.lock() {
                Ok(observers) => observers,
                Err(poisoned) => poisoned.into_inner(),
            };
            let mut to_arm = Vec::new();
            for property in properties {
                let observer = observers.entry(property.to_string()).or_insert_with(|| {
                    let observe_id = self.inner.next_observe_id.fetch_add(1, Ordering::SeqCst);
                    tracing::debug!(property, observe_id, "created property observer");
                    Observer::new(observe_id)
                });
                observer.subscriptions.insert(subscription_id, queue.clone());
                if !observer.armed && self.is_connected() {
                    observer.armed = true;
                    to_arm.push((observer.observe_id, property.to_string()));
                }
            }
            to_arm
        };

        tokio::spawn(forward_subscription(
            Arc::downgrade(&self.inner),
            properties.iter().map(|p| p.to_string()).collect(),
            subscription_id,
            queued,
            out,
        ));

        for (observe_id, property) in to_arm {
            self.send_observe(observe_id, &property).await;
        }
        subscription_id
    }

    /// Stop one subscription on `property`. The observer and its other
    /// subscriptions stay; events already queued are still delivered.
    pub fn unobserve_property(&self, property: &str, subscription_id: u64) -> Result<(), IpcError> {
        let mut observers = match self.inner.observers.lock() {
            Ok(observers) => observers,
            Err(poisoned) => poisoned.into_inner(),
        };
        let observer = observers
            .get_mut(property)
            .ok_or_else(|| IpcError::UnknownObserver(property.to_string()))?;
        observer
            .subscriptions
            .remove(&subscription_id)
            .ok_or_else(|| IpcError::UnknownSubscription {
                property: property.to_string(),
                id: subscription_id,
            })?;
        Ok(())
    }

    /// Number of live subscriptions on `property`.
    pub fn subscription_count(&self, property: &str) -> usize {
        self.inner
            .observers
            .lock()
            .ok()
            .and_then(|observers| observers.get(property).map(|o| o.subscriptions.len()))
            .unwrap_or(0)
    }

    fn reserve_request_id(&self) -> i64 {
        self.inner.next_request_id.fetch_add(1, Ordering::SeqCst)
    }

    fn register_pending(&self) -> (i64, oneshot::Receiver<Response>) {
        let request_id = self.reserve_request_id();
        let (tx, rx) = oneshot::channel();
        if let Ok(mut pending) = self.inner.pending.lock() {
            pending.insert(request_id, tx);
        }
        (request_id, rx)
    }

    fn forget_pending(&self, request_id: i64) {
        if let Ok(mut pending) = self.inner.pending.lock() {
            pending.remove(&request_id);
        }
    }

    /// Route one inbound frame to its observer or pending request.
    fn distribute(&self, response: Response) {
        if response.is_property_change() {
            let Some(property) = response.name.clone() else {
                tracing::warn!(id = ?response.id, "property-change event without a name");
                return;
            };
            let data = response.into_data();
            let mut observers = match self.inner.observers.lock() {
                Ok(observers) => observers,
                Err(poisoned) => poisoned.into_inner(),
            };
            match observers.get_mut(&property) {
                Some(observer) => {
                    tracing::trace!(property = %property, "property change");
                    observer.subscriptions.retain(|_, queue| {
                        queue
                            .send(ObservePropertyResponse {
                                property: property.clone(),
                                data: data.clone(),
                            })
                            .is_ok()
                    });
                }
                None => tracing::warn!(property = %property, "event for unobserved property"),
            }
            return;
        }

        if let Some(request_id) = response.correlation_id() {
            let waiter = self
                .inner
                .pending
                .lock()
                .ok()
                .and_then(|mut pending| pending.remove(&request_id));
            match waiter {
                Some(waiter) => {
                    let _ = waiter.send(response);
                }
                None => tracing::warn!(request_id, "response for unknown request id"),
            }
            return;
        }

        match response.event.as_deref() {
            Some(event) => tracing::debug!(event, "ignoring player event"),
            None => tracing::warn!(?response, "undeliverable player message"),
        }
    }

    /// Send `observe_property` for every observer not yet armed on this
    /// connection. Subscribers racing the connect arm their own observers.
    async fn rearm_observers(&self) {
        let observers: Vec<(i64, String)> = self
            .inner
            .observers
            .lock()
            .map(|mut observers| {
                observers
                    .iter_mut()
                    .filter(|(_, o)| !o.armed)
                    .map(|(name, o)| {
                        o.armed = true;
                        (o.observe_id, name.clone())
                    })
                    .collect()
            })
            .unwrap_or_default();
        if !observers.is_empty() {
            tracing::info!(count = observers.len(), "re-arming property observers");
        }
        for (observe_id, property) in observers {
            self.send_observe(observe_id, &property).await;
        }
    }

    /// Send `observe_property` without blocking on the reply, which only
    /// arrives once the read loop runs.
    async fn send_observe(&self, observe_id: i64, property: &str) {
        let (request_id, reply) = self.register_pending();
        let command = vec![json!("observe_property"), json!(observe_id), json!(property)];
        if let Err(err) = self.dispatch(command, request_id).await {
            self.forget_pending(request_id);
            tracing::warn!(property, error = %err, "failed to send observe request");
            return;
        }
        let property = property.to_string();
        tokio::spawn(async move {
            match reply.await {
                Ok(response) if response.is_success() => {
                    tracing::debug!(property = %property, observe_id, "observing property");
                }
                Ok(response) => tracing::warn!(
                    property = %property,
                    error = ?response.error,
                    "player rejected observe request"
                ),
                Err(_) => tracing::debug!(property = %property, "observe request abandoned"),
            }
        });
    }
}

async fn dial(path: &Path, timeout: Duration) -> Result<UnixStream, IpcError> {
    let deadline = Instant::now() + timeout;
    loop {
        match UnixStream::connect(path).await {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                if Instant::now() + DIAL_RETRY_INTERVAL > deadline {
                    return Err(IpcError::Dial {
                        path: path.to_path_buf(),
                        source: err,
                    });
                }
                tracing::debug!(path = %path.display(), error = %err, "player socket not ready; retrying");
                tokio::time::sleep(DIAL_RETRY_INTERVAL).await;
            }
        }
    }
}

async fn write_line(writer: &mut BoxedWriter, request: &Request) -> Result<(), IpcError> {
    let line = request.encode()?;
    writer.write_all(&line).await?;
    writer.flush().await?;
    tracing::trace!(request_id = request.request_id, "ipc write");
    Ok(())
}

/// Relay queued events to one subscriber in order.
///
/// Ends once every observer dropped the queue (all properties unobserved)
/// or the subscriber's receiver went away.
async fn forward_subscription(
    dispatcher: Weak<Inner>,
    properties: Vec<String>,
    subscription_id: u64,
    mut queued: mpsc::UnboundedReceiver<ObservePropertyResponse>,
    out: mpsc::Sender<ObservePropertyResponse>,
) {
    while let Some(event) = queued.recv().await {
        if out.send(event).await.is_err() {
            drop_subscription(&dispatcher, &properties, subscription_id);
            break;
        }
    }
    tracing::trace!(subscription_id, "subscription finished");
}

/// Deregister a subscription whose receiver went away.
fn drop_subscription(dispatcher: &Weak<Inner>, properties: &[String], subscription_id: u64) {
    let Some(inner) = dispatcher.upgrade() else {
        return;
    };
    if let Ok(mut observers) = inner.observers.lock() {
        for property in properties {
            if let Some(observer) = observers.get_mut(property) {
                observer.subscriptions.remove(&subscription_id);
            }
        }
    }
}
