//! Server-sent event stream over the store channels.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use actix_web::http::header;
use actix_web::web::Bytes;
use actix_web::{Error, HttpRequest, HttpResponse, Responder, get, web};
use futures_util::{Stream, stream::unfold};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::{Duration, Interval, MissedTickBehavior};
use utoipa::IntoParams;

use crate::channels::Channel;
use crate::state::AppState;

const PING_INTERVAL: Duration = Duration::from_secs(15);

/// Blocks queued per connection before channel forwarders wait.
const OUTPUT_BUFFER: usize = 64;

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct EventsQuery {
    /// Comma-separated channel names; all channels when omitted.
    pub channels: Option<String>,
}

/// Detaches every channel of one connection when the stream is dropped.
struct Attachment {
    key: String,
    channels: Vec<Arc<dyn Channel>>,
}

impl Drop for Attachment {
    fn drop(&mut self) {
        for channel in &self.channels {
            channel.detach(&self.key);
        }
        tracing::debug!(key = %self.key, "event stream closed");
    }
}

struct EventStreamState {
    receiver: mpsc::Receiver<Bytes>,
    interval: Interval,
    pending: VecDeque<Bytes>,
    last_ping: Instant,
    _attachment: Attachment,
}

fn push_ping_if_needed(pending: &mut VecDeque<Bytes>, last_ping: &mut Instant) {
    if pending.is_empty() && last_ping.elapsed() >= PING_INTERVAL {
        *last_ping = Instant::now();
        pending.push_back(Bytes::from(": ping\n\n"));
    }
}

fn sse_response<S>(stream: S) -> HttpResponse
where
    S: Stream<Item = Result<Bytes, Error>> + 'static,
{
    HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, "text/event-stream"))
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .insert_header((header::CONNECTION, "keep-alive"))
        .streaming(stream)
}

#[utoipa::path(
    get,
    path = "/events",
    params(EventsQuery),
    responses(
        (status = 200, description = "Replay of current state followed by live changes"),
        (status = 400, description = "Unknown channel")
    )
)]
#[get("/events")]
/// Stream store changes via server-sent events.
pub async fn events(
    state: web::Data<AppState>,
    req: HttpRequest,
    query: web::Query<EventsQuery>,
) -> impl Responder {
    let channels = match state.channels.resolve(query.channels.as_deref().unwrap_or("")) {
        Ok(channels) => channels,
        Err(name) => return HttpResponse::BadRequest().body(format!("unknown channel: {name}")),
    };

    let peer = req
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| "-".to_string());
    let key = format!("{peer}/{}", uuid::Uuid::new_v4());
    tracing::debug!(
        key = %key,
        channels = ?channels.iter().map(|c| c.name()).collect::<Vec<_>>(),
        "event stream opened"
    );

    let (out, receiver) = mpsc::channel(OUTPUT_BUFFER);
    for channel in &channels {
        channel.attach(&key, out.clone());
    }
    drop(out);

    let mut interval = tokio::time::interval(PING_INTERVAL);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let stream = unfold(
        EventStreamState {
            receiver,
            interval,
            pending: VecDeque::new(),
            last_ping: Instant::now(),
            _attachment: Attachment { key, channels },
        },
        |mut ctx| async move {
            loop {
                if let Some(bytes) = ctx.pending.pop_front() {
                    return Some((Ok::<Bytes, Error>(bytes), ctx));
                }

                tokio::select! {
                    _ = ctx.interval.tick() => {}
                    block = ctx.receiver.recv() => match block {
                        Some(block) => ctx.pending.push_back(block),
                        None => return None,
                    },
                }

                push_ping_if_needed(&mut ctx.pending, &mut ctx.last_ping);
            }
        },
    );

    sse_response(stream)
}
