//! In-process pub/sub broker for tests and single-process deployments
//!
//! One [`InMemoryBroker`] plays the role of the shared server; every
//! [`InMemoryTransport`] obtained from it behaves like an independent
//! client connection with its own subscription set.

use crate::{PubSubTransport, TransportError, TransportFrame};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch, Mutex};

/// Default number of frames buffered per connection before it lags
pub const DEFAULT_BROKER_CAPACITY: usize = 1024;

/// Shared in-memory hub. Cheap to clone; clones share the same channel.
#[derive(Clone, Debug)]
pub struct InMemoryBroker {
    sender: broadcast::Sender<TransportFrame>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BROKER_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Open a new client connection on this broker
    pub fn connection(&self) -> InMemoryTransport {
        InMemoryTransport::new(self.sender.clone())
    }

    /// Number of connected clients
    pub fn connection_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

/// A client connection on an [`InMemoryBroker`]
pub struct InMemoryTransport {
    sender: broadcast::Sender<TransportFrame>,
    receiver: Mutex<Option<broadcast::Receiver<TransportFrame>>>,
    subscriptions: RwLock<HashSet<String>>,
    connected: AtomicBool,
    closed_tx: watch::Sender<bool>,
}

impl InMemoryTransport {
    fn new(sender: broadcast::Sender<TransportFrame>) -> Self {
        let (closed_tx, _) = watch::channel(true);
        Self {
            sender,
            receiver: Mutex::new(None),
            subscriptions: RwLock::new(HashSet::new()),
            connected: AtomicBool::new(false),
            closed_tx,
        }
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.subscriptions.read().contains(topic)
    }

    pub fn subscriptions(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.subscriptions.read().iter().cloned().collect();
        topics.sort();
        topics
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }
}

#[async_trait]
impl PubSubTransport for InMemoryTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let mut receiver = self.receiver.lock().await;
        if receiver.is_none() {
            *receiver = Some(self.sender.subscribe());
        }
        self.connected.store(true, Ordering::SeqCst);
        self.closed_tx.send_replace(false);
        tracing::debug!("In-memory transport connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        // Wakes a reader parked in next_frame so the receiver lock frees up
        self.closed_tx.send_replace(true);
        self.receiver.lock().await.take();
        self.subscriptions.write().clear();
        tracing::debug!("In-memory transport disconnected");
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &str) -> Result<(), TransportError> {
        self.ensure_connected()?;
        // A send error only means nobody is listening, which pub/sub allows
        let _ = self.sender.send(TransportFrame::new(topic, payload));
        Ok(())
    }

    async fn subscribe(&self, topics: &[String]) -> Result<(), TransportError> {
        self.ensure_connected()?;
        self.subscriptions.write().extend(topics.iter().cloned());
        Ok(())
    }

    async fn unsubscribe(&self, topics: &[String]) -> Result<(), TransportError> {
        self.ensure_connected()?;
        let mut subscriptions = self.subscriptions.write();
        for topic in topics {
            subscriptions.remove(topic);
        }
        Ok(())
    }

    async fn next_frame(&self) -> Option<TransportFrame> {
        let mut closed = self.closed_tx.subscribe();
        let mut guard = self.receiver.lock().await;
        let receiver = guard.as_mut()?;

        loop {
            if *closed.borrow_and_update() {
                return None;
            }

            tokio::select! {
                frame = receiver.recv() => match frame {
                    Ok(frame) => {
                        if self.is_subscribed(&frame.topic) {
                            return Some(frame);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "In-memory transport lagged, frames dropped");
                    }
                    Err(RecvError::Closed) => return None,
                },
                changed = closed.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn topics(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_publish_requires_connection() {
        let broker = InMemoryBroker::new();
        let transport = broker.connection();

        let err = transport.publish("t", "x").await.expect_err("must reject");
        assert!(matches!(err, TransportError::NotConnected));
    }

    #[tokio::test]
    async fn test_delivers_only_subscribed_topics() {
        let broker = InMemoryBroker::new();
        let publisher = broker.connection();
        let subscriber = broker.connection();
        publisher.connect().await.unwrap();
        subscriber.connect().await.unwrap();
        subscriber.subscribe(&topics(&["a"])).await.unwrap();

        publisher.publish("b", "ignored").await.unwrap();
        publisher.publish("a", "wanted").await.unwrap();

        let frame = subscriber.next_frame().await.unwrap();
        assert_eq!(frame, TransportFrame::new("a", "wanted"));
    }

    #[tokio::test]
    async fn test_fan_out_to_every_subscriber() {
        let broker = InMemoryBroker::new();
        let publisher = broker.connection();
        let first = broker.connection();
        let second = broker.connection();
        for t in [&publisher, &first, &second] {
            t.connect().await.unwrap();
        }
        first.subscribe(&topics(&["news"])).await.unwrap();
        second.subscribe(&topics(&["news"])).await.unwrap();
        assert_eq!(broker.connection_count(), 3);

        publisher.publish("news", "hello").await.unwrap();

        assert_eq!(first.next_frame().await.unwrap().payload, "hello");
        assert_eq!(second.next_frame().await.unwrap().payload, "hello");
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let broker = InMemoryBroker::new();
        let transport = broker.connection();
        transport.connect().await.unwrap();
        transport.subscribe(&topics(&["a", "b"])).await.unwrap();
        transport.unsubscribe(&topics(&["a"])).await.unwrap();
        assert_eq!(transport.subscriptions(), vec!["b".to_string()]);

        transport.publish("a", "1").await.unwrap();
        transport.publish("b", "2").await.unwrap();

        assert_eq!(transport.next_frame().await.unwrap().payload, "2");
    }

    #[tokio::test]
    async fn test_disconnect_wakes_pending_reader() {
        let broker = InMemoryBroker::new();
        let transport = Arc::new(broker.connection());
        transport.connect().await.unwrap();
        transport.subscribe(&topics(&["a"])).await.unwrap();

        let reader = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.next_frame().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        transport.disconnect().await.unwrap();
        let frame = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .expect("reader must wake")
            .unwrap();
        assert!(frame.is_none());
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_next_frame_before_connect_is_none() {
        let broker = InMemoryBroker::new();
        let transport = broker.connection();
        assert!(transport.next_frame().await.is_none());
    }
}
