//! One-producer-to-many-consumers relay for store changes.
//!
//! Each broadcaster owns a relay task draining a single inbox of subscribe,
//! unsubscribe and change messages. Changes are delivered on that task in
//! inbox order: every subscriber sees them in the order they were sent, and a
//! subscriber removed before a change was sent never receives it.
//!
//! Delivery awaits each subscriber's bounded buffer, so a slow subscriber
//! delays the others sharing the broadcaster. Consumers that go away simply
//! drop their receiver; the next delivery notices and prunes them.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Buffer between the relay and one subscriber.
pub const SUBSCRIBER_BUFFER: usize = 16;

enum Message<C> {
    Subscribe { key: String, sink: mpsc::Sender<C> },
    Unsubscribe { key: String },
    Change(C),
}

pub struct Broadcaster<C> {
    name: &'static str,
    inbox: mpsc::UnboundedSender<Message<C>>,
}

impl<C> Clone for Broadcaster<C> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            inbox: self.inbox.clone(),
        }
    }
}

impl<C> Broadcaster<C>
where
    C: Clone + Send + 'static,
{
    /// Start a relay; it runs until every handle is dropped.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(name: &'static str) -> Self {
        let (inbox, messages) = mpsc::unbounded_channel();
        tokio::spawn(relay(name, messages));
        Self { name, inbox }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Queue `change` for every current subscriber. Never blocks.
    pub fn send(&self, change: C) {
        if self.inbox.send(Message::Change(change)).is_err() {
            tracing::warn!(broadcaster = self.name, "relay stopped; change dropped");
        }
    }

    /// Register `sink` under `key`, replacing any previous sink with that key.
    ///
    /// Takes effect before any change sent after this call returns.
    pub fn subscribe(&self, key: impl Into<String>, sink: mpsc::Sender<C>) {
        let _ = self.inbox.send(Message::Subscribe {
            key: key.into(),
            sink,
        });
    }

    pub fn unsubscribe(&self, key: &str) {
        let _ = self.inbox.send(Message::Unsubscribe {
            key: key.to_string(),
        });
    }

    /// Subscribe with a fresh buffered channel and return its receiver.
    pub fn listen(&self, key: impl Into<String>) -> mpsc::Receiver<C> {
        let (sink, receiver) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.subscribe(key, sink);
        receiver
    }

    /// Run `callback` for every change on a dedicated task.
    ///
    /// Failures returned by the callback are handed to `on_error` and do not
    /// end the subscription.
    pub fn subscribe_fn<F, E>(&self, key: impl Into<String>, mut callback: F, mut on_error: E) -> JoinHandle<()>
    where
        F: FnMut(C) -> anyhow::Result<()> + Send + 'static,
        E: FnMut(anyhow::Error) + Send + 'static,
    {
        let mut changes = self.listen(key);
        tokio::spawn(async move {
            while let Some(change) = changes.recv().await {
                if let Err(err) = callback(change) {
                    on_error(err);
                }
            }
        })
    }
}

async fn relay<C: Clone>(name: &'static str, mut inbox: mpsc::UnboundedReceiver<Message<C>>) {
    let mut subscribers: HashMap<String, mpsc::Sender<C>> = HashMap::new();
    while let Some(message) = inbox.recv().await {
        match message {
            Message::Subscribe { key, sink } => {
                if subscribers.insert(key.clone(), sink).is_some() {
                    tracing::debug!(broadcaster = name, key = %key, "replaced subscriber");
                }
            }
            Message::Unsubscribe { key } => {
                subscribers.remove(&key);
            }
            Message::Change(change) => {
                let mut gone = Vec::new();
                for (key, sink) in &subscribers {
                    if sink.send(change.clone()).await.is_err() {
                        gone.push(key.clone());
                    }
                }
                for key in gone {
                    tracing::debug!(broadcaster = name, key = %key, "pruned closed subscriber");
                    subscribers.remove(&key);
                }
            }
        }
    }
    tracing::debug!(broadcaster = name, "relay stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(2);

    async fn drain(receiver: &mut mpsc::Receiver<u32>, count: usize) -> Vec<u32> {
        let mut seen = Vec::with_capacity(count);
        while seen.len() < count {
            let next = tokio::time::timeout(TIMEOUT, receiver.recv())
                .await
                .expect("change timeout")
                .expect("relay closed");
            seen.push(next);
        }
        seen
    }

    #[tokio::test]
    async fn every_subscriber_sees_changes_in_send_order() {
        let broadcaster = Broadcaster::new("test");
        let mut first = broadcaster.listen("a");
        let mut second = broadcaster.listen("b");

        let expected: Vec<u32> = (0..100).collect();
        for n in &expected {
            broadcaster.send(*n);
        }

        let (a, b) = tokio::join!(drain(&mut first, 100), drain(&mut second, 100));
        assert_eq!(a, expected);
        assert_eq!(b, expected);
    }

    #[tokio::test]
    async fn unsubscribed_key_receives_nothing_sent_afterwards() {
        let broadcaster = Broadcaster::new("test");
        let mut gone = broadcaster.listen("gone");
        let mut kept = broadcaster.listen("kept");

        broadcaster.unsubscribe("gone");
        broadcaster.send(7);

        assert_eq!(drain(&mut kept, 1).await, vec![7]);
        let closed = tokio::time::timeout(TIMEOUT, gone.recv()).await.unwrap();
        assert_eq!(closed, None);
    }

    #[tokio::test]
    async fn dropped_receivers_do_not_stall_the_relay() {
        let broadcaster = Broadcaster::new("test");
        drop(broadcaster.listen("dropped"));
        let mut live = broadcaster.listen("live");

        for n in 0..(SUBSCRIBER_BUFFER as u32 * 3) {
            broadcaster.send(n);
        }
        let seen = drain(&mut live, SUBSCRIBER_BUFFER * 3).await;
        assert_eq!(seen.len(), SUBSCRIBER_BUFFER * 3);
    }

    #[tokio::test]
    async fn resubscribing_a_key_replaces_the_old_sink() {
        let broadcaster = Broadcaster::new("test");
        let mut old = broadcaster.listen("peer");
        let mut new = broadcaster.listen("peer");

        broadcaster.send(1);
        assert_eq!(drain(&mut new, 1).await, vec![1]);
        assert_eq!(tokio::time::timeout(TIMEOUT, old.recv()).await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn churn_during_broadcast_never_blocks() {
        let broadcaster = Broadcaster::new("test");
        let mut steady = broadcaster.listen("steady");

        let churn = {
            let broadcaster = broadcaster.clone();
            tokio::spawn(async move {
                for round in 0..200 {
                    let key = format!("churn-{}", round % 7);
                    let mut receiver = broadcaster.listen(key.clone());
                    tokio::task::yield_now().await;
                    while receiver.try_recv().is_ok() {}
                    broadcaster.unsubscribe(&key);
                }
            })
        };

        let producer = {
            let broadcaster = broadcaster.clone();
            tokio::spawn(async move {
                for n in 0..500 {
                    broadcaster.send(n);
                    if n % 50 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            })
        };

        let seen = drain(&mut steady, 500).await;
        assert_eq!(seen, (0..500).collect::<Vec<u32>>());
        tokio::time::timeout(TIMEOUT, churn).await.unwrap().unwrap();
        tokio::time::timeout(TIMEOUT, producer).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn callback_failures_go_to_on_error() {
        let broadcaster = Broadcaster::new("test");
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        let (done_tx, mut done) = mpsc::unbounded_channel();

        broadcaster.subscribe_fn(
            "callback",
            move |n: u32| {
                let _ = done_tx.send(n);
                if n % 2 == 1 {
                    anyhow::bail!("odd change {n}");
                }
                Ok(())
            },
            move |err| sink.lock().unwrap().push(err.to_string()),
        );

        for n in 0..4 {
            broadcaster.send(n);
        }
        for _ in 0..4 {
            tokio::time::timeout(TIMEOUT, done.recv()).await.unwrap();
        }
        tokio::task::yield_now().await;
        assert_eq!(
            *errors.lock().unwrap(),
            vec!["odd change 1".to_string(), "odd change 3".to_string()]
        );
    }
}
