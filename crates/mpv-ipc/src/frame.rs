//! Incremental newline-delimited JSON framing.
//!
//! Frames have no length prefix: a message ends at `\n`. Reads may return
//! any slice of the stream, so bytes are accumulated until a boundary shows
//! up. Blank lines between messages are skipped.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::IpcError;
use crate::protocol::Response;

const READ_CHUNK: usize = 4096;

/// Secondary decoder applied to the `data` of a named property.
pub type Decoder = fn(Value) -> Result<Value, String>;

/// Registry of per-property secondary decoders.
#[derive(Clone, Default)]
pub struct Decoders {
    by_name: Arc<HashMap<String, Decoder>>,
}

impl Decoders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `decoder` for events on `property`.
    pub fn with(mut self, property: impl Into<String>, decoder: Decoder) -> Self {
        Arc::make_mut(&mut self.by_name).insert(property.into(), decoder);
        self
    }

    pub fn get(&self, property: &str) -> Option<Decoder> {
        self.by_name.get(property).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    fn apply(&self, response: &mut Response) -> Result<(), IpcError> {
        if !response.is_property_change() {
            return Ok(());
        }
        let Some(name) = response.name.as_deref() else {
            return Ok(());
        };
        let Some(decoder) = self.get(name) else {
            return Ok(());
        };
        if let Some(data) = response.data.take() {
            let decoded = decoder(data).map_err(|reason| IpcError::Decode {
                property: name.to_string(),
                reason,
            })?;
            response.data = Some(decoded);
        }
        Ok(())
    }
}

/// Decoder for properties whose wire value is a JSON document inside a string.
pub fn json_string(value: Value) -> Result<Value, String> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::String(raw) => serde_json::from_str(&raw).map_err(|e| e.to_string()),
        other => Err(format!("expected JSON-encoded string, got {other}")),
    }
}

/// Pulls one decoded [`Response`] at a time out of a byte stream.
///
/// Must not be reused after a fatal error (see [`IpcError::is_fatal_read`]).
pub struct FrameReader<R> {
    source: R,
    buffer: Vec<u8>,
    decoders: Decoders,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(source: R) -> Self {
        Self::with_decoders(source, Decoders::default())
    }

    pub fn with_decoders(source: R, decoders: Decoders) -> Self {
        Self {
            source,
            buffer: Vec::with_capacity(READ_CHUNK),
            decoders,
        }
    }

    /// Return the next payload, reading from the source only when the
    /// buffered bytes hold no complete frame.
    pub async fn next(&mut self) -> Result<Response, IpcError> {
        loop {
            if let Some(frame) = self.take_frame() {
                return self.parse(&frame);
            }
            self.fill().await?;
        }
    }

    /// Slice the next non-blank line out of the buffer.
    fn take_frame(&mut self) -> Option<Vec<u8>> {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Some(line);
        }
        None
    }

    async fn fill(&mut self) -> Result<(), IpcError> {
        let mut chunk = [0u8; READ_CHUNK];
        let n = self.source.read(&mut chunk).await.map_err(map_read_error)?;
        if n == 0 {
            return Err(IpcError::Closed);
        }
        tracing::trace!(bytes = n, buffered = self.buffer.len(), "ipc read");
        self.buffer.extend_from_slice(&chunk[..n]);
        Ok(())
    }

    fn parse(&self, frame: &[u8]) -> Result<Response, IpcError> {
        let mut response: Response = serde_json::from_slice(frame)?;
        self.decoders.apply(&mut response)?;
        Ok(response)
    }
}

fn map_read_error(err: io::Error) -> IpcError {
    match err.kind() {
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => IpcError::Closed,
        _ => IpcError::Io(err),
    }
}
