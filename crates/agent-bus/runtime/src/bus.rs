//! The agent bus: publish/subscribe plus request/response correlation

use crate::stats::StatsCounters;
use crate::{
    BusConfig, BusError, BusResult, BusStats, MessageHandler, DUPLICATE_REQUEST_CODE,
    PUBLISH_FAILED_CODE,
};
use agent_bus_store::{MessageRecord, MessageStatus, PersistenceSink};
use agent_bus_transport::{PubSubTransport, TransportFrame};
use agent_bus_types::{
    topics, Message, RequestMessage, ResponseMessage, SYSTEM_AGENT_ID, TIMEOUT_ERROR_CODE,
};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

/// How long `disconnect()` waits for the listen loop to exit
const LISTENER_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to a bus instance. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct AgentBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    transport: Arc<dyn PubSubTransport>,
    sink: Option<Arc<dyn PersistenceSink>>,
    config: BusConfig,
    /// Topic → handlers, invoked in registration order
    handlers: RwLock<HashMap<String, Vec<MessageHandler>>>,
    /// Request message id → waiter
    pending: Mutex<HashMap<String, oneshot::Sender<ResponseMessage>>>,
    subscriptions: RwLock<HashSet<String>>,
    shutdown_tx: watch::Sender<bool>,
    /// True while a listen loop is running
    listening_tx: watch::Sender<bool>,
    connected: AtomicBool,
    stats: StatsCounters,
}

impl AgentBus {
    pub fn new(
        transport: Arc<dyn PubSubTransport>,
        sink: Option<Arc<dyn PersistenceSink>>,
        config: BusConfig,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let (listening_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(BusInner {
                transport,
                sink,
                config,
                handlers: RwLock::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                subscriptions: RwLock::new(HashSet::new()),
                shutdown_tx,
                listening_tx,
                connected: AtomicBool::new(false),
                stats: StatsCounters::default(),
            }),
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    pub fn sink(&self) -> Option<&Arc<dyn PersistenceSink>> {
        self.inner.sink.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub fn is_listening(&self) -> bool {
        *self.inner.listening_tx.borrow()
    }

    // ── Connection lifecycle ─────────────────────────────────────────

    pub async fn connect(&self) -> BusResult<()> {
        self.inner.transport.connect().await?;
        self.inner.shutdown_tx.send_replace(false);
        self.inner.connected.store(true, Ordering::SeqCst);
        tracing::info!("Connected to agent bus");
        Ok(())
    }

    /// Stop the listener, fail every pending waiter and release the
    /// transport.
    pub async fn disconnect(&self) -> BusResult<()> {
        self.inner.connected.store(false, Ordering::SeqCst);
        self.inner.shutdown_tx.send_replace(true);

        let mut listening = self.inner.listening_tx.subscribe();
        let stopped = tokio::time::timeout(LISTENER_STOP_TIMEOUT, async move {
            listening.wait_for(|running| !*running).await.is_ok()
        })
        .await;
        if !matches!(stopped, Ok(true)) {
            tracing::warn!("Listener did not stop in time");
        }

        // Dropping the senders wakes every waiting requester
        let abandoned: Vec<_> = self.inner.pending.lock().drain().collect();
        if !abandoned.is_empty() {
            tracing::warn!(count = abandoned.len(), "Failing pending requests on disconnect");
        }
        drop(abandoned);

        self.inner.subscriptions.write().clear();
        self.inner.transport.disconnect().await?;
        tracing::info!("Disconnected from agent bus");
        Ok(())
    }

    // ── Publishing ───────────────────────────────────────────────────

    /// Publish a message. Returns `false` if it was not sent; the reason
    /// is logged.
    pub async fn publish(&self, message: impl Into<Message>) -> bool {
        match self.try_publish(message).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, "Failed to publish message");
                false
            }
        }
    }

    /// Publish a message, reporting why it was not sent
    pub async fn try_publish(&self, message: impl Into<Message>) -> BusResult<()> {
        let mut message = message.into();
        let result = self.send(&mut message).await;
        if result.is_err() {
            StatsCounters::incr(&self.inner.stats.publish_failures);
        }
        result
    }

    async fn send(&self, message: &mut Message) -> BusResult<()> {
        if message.header().ttl_seconds == 0 {
            message.header_mut().ttl_seconds = self.inner.config.default_ttl_seconds;
        }
        message.validate()?;
        let payload = message.to_json()?;

        self.inner
            .transport
            .publish(message.topic(), &payload)
            .await?;
        StatsCounters::incr(&self.inner.stats.published);

        tracing::debug!(
            message_id = %message.message_id(),
            message_type = %message.message_type(),
            topic = %message.topic(),
            "Published message"
        );

        self.record(message, MessageStatus::Sent).await;
        Ok(())
    }

    /// Best-effort write to the persistence sink
    async fn record(&self, message: &Message, status: MessageStatus) {
        if !self.inner.config.log_messages {
            return;
        }
        if let Some(sink) = &self.inner.sink {
            if let Err(e) = sink.log_message(message, status).await {
                tracing::warn!(
                    message_id = %message.message_id(),
                    status = status.as_str(),
                    error = %e,
                    "Failed to log message"
                );
            }
        }
    }

    // ── Subscriptions and handlers ───────────────────────────────────

    pub async fn subscribe(&self, topics: &[String]) -> BusResult<()> {
        if !self.is_connected() {
            return Err(BusError::NotConnected);
        }
        self.inner.transport.subscribe(topics).await?;
        self.inner
            .subscriptions
            .write()
            .extend(topics.iter().cloned());
        tracing::info!(?topics, "Subscribed to topics");
        Ok(())
    }

    pub async fn unsubscribe(&self, topics: &[String]) -> BusResult<()> {
        if !self.is_connected() {
            return Err(BusError::NotConnected);
        }
        self.inner.transport.unsubscribe(topics).await?;
        let mut subscriptions = self.inner.subscriptions.write();
        for topic in topics {
            subscriptions.remove(topic);
        }
        tracing::info!(?topics, "Unsubscribed from topics");
        Ok(())
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.inner.subscriptions.read().contains(topic)
    }

    /// Add a handler for `topic`. Handlers of a topic run in
    /// registration order.
    pub fn register_handler(&self, topic: impl Into<String>, handler: MessageHandler) {
        let topic = topic.into();
        tracing::info!(topic = %topic, "Registered handler");
        self.inner
            .handlers
            .write()
            .entry(topic)
            .or_default()
            .push(handler);
    }

    /// Remove every handler of `topic`, returning how many there were
    pub fn unregister_handlers(&self, topic: &str) -> usize {
        self.inner
            .handlers
            .write()
            .remove(topic)
            .map(|handlers| handlers.len())
            .unwrap_or(0)
    }

    pub fn handler_count(&self, topic: &str) -> usize {
        self.inner
            .handlers
            .read()
            .get(topic)
            .map(Vec::len)
            .unwrap_or(0)
    }

    // ── Listening ────────────────────────────────────────────────────

    /// Receive and dispatch messages until `disconnect()` or until the
    /// transport closes.
    pub async fn start_listening(&self) -> BusResult<()> {
        if !self.is_connected() {
            return Err(BusError::NotConnected);
        }
        if self.inner.listening_tx.send_replace(true) {
            return Err(BusError::AlreadyListening);
        }

        let mut shutdown = self.inner.shutdown_tx.subscribe();
        tracing::info!("Started listening for messages");

        loop {
            tokio::select! {
                _ = async { shutdown.wait_for(|stop| *stop).await.map(|_| ()) } => break,
                frame = self.inner.transport.next_frame() => match frame {
                    Some(frame) => self.handle_frame(frame).await,
                    None => break,
                },
            }
        }

        self.inner.listening_tx.send_replace(false);
        tracing::info!("Stopped listening for messages");
        Ok(())
    }

    /// Spawn [`start_listening`](Self::start_listening) on the runtime
    pub fn spawn_listener(&self) -> JoinHandle<BusResult<()>> {
        let bus = self.clone();
        tokio::spawn(async move { bus.start_listening().await })
    }

    async fn handle_frame(&self, frame: TransportFrame) {
        let message = match Message::from_json(&frame.payload) {
            Ok(message) => message,
            Err(e) => {
                StatsCounters::incr(&self.inner.stats.malformed);
                tracing::warn!(topic = %frame.topic, error = %e, "Dropping malformed frame");
                return;
            }
        };

        // Expiry is advisory: the message is still delivered.
        if message.header().is_expired(Utc::now()) {
            StatsCounters::incr(&self.inner.stats.expired);
            tracing::debug!(
                message_id = %message.message_id(),
                topic = %frame.topic,
                "Received expired message"
            );
        }

        StatsCounters::incr(&self.inner.stats.delivered);
        tracing::debug!(
            message_id = %message.message_id(),
            message_type = %message.message_type(),
            topic = %frame.topic,
            "Received message"
        );

        if let Message::Response(response) = &message {
            self.resolve_waiter(response);
        }

        self.record(&message, MessageStatus::Delivered).await;

        let handlers = self
            .inner
            .handlers
            .read()
            .get(&frame.topic)
            .cloned()
            .unwrap_or_default();
        if handlers.is_empty() {
            return;
        }

        // Handlers may themselves call request(), so they must not block
        // the loop that would deliver the response.
        let bus = self.clone();
        tokio::spawn(async move {
            bus.dispatch(&frame.topic, handlers, message).await;
        });
    }

    fn resolve_waiter(&self, response: &ResponseMessage) {
        let waiter = response
            .header
            .correlation_id
            .as_deref()
            .and_then(|id| self.inner.pending.lock().remove(id));

        match waiter {
            Some(tx) => {
                if tx.send(response.clone()).is_err() {
                    tracing::debug!(
                        correlation_id = ?response.header.correlation_id,
                        "Requester went away before its response arrived"
                    );
                }
            }
            None => {
                StatsCounters::incr(&self.inner.stats.unmatched_responses);
                tracing::debug!(
                    message_id = %response.header.message_id,
                    correlation_id = ?response.header.correlation_id,
                    "unmatched response dropped"
                );
            }
        }
    }

    async fn dispatch(&self, topic: &str, handlers: Vec<MessageHandler>, message: Message) {
        for handler in handlers {
            if let Err(e) = handler(message.clone()).await {
                StatsCounters::incr(&self.inner.stats.handler_failures);
                tracing::error!(
                    topic = %topic,
                    message_id = %message.message_id(),
                    error = %e,
                    "Handler error"
                );
            }
        }
    }

    // ── Request / response ───────────────────────────────────────────

    /// Publish `request` and wait for the correlated Response.
    ///
    /// Never fails: an unanswered request resolves to a synthetic
    /// `TIMEOUT` failure from the system agent.
    pub async fn request(
        &self,
        mut request: RequestMessage,
        timeout: Option<Duration>,
    ) -> ResponseMessage {
        let request_id = request.header.message_id.clone();
        request.header.correlation_id = Some(request_id.clone());

        if let Err(e) = self.ensure_response_subscription(&request).await {
            return ResponseMessage::failure_for(
                &request,
                SYSTEM_AGENT_ID,
                e.to_string(),
                PUBLISH_FAILED_CODE,
            );
        }

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.inner.pending.lock();
            if pending.contains_key(&request_id) {
                let error = BusError::DuplicatePending(request_id.clone());
                tracing::warn!(message_id = %request_id, "Rejecting duplicate request id");
                return ResponseMessage::failure_for(
                    &request,
                    SYSTEM_AGENT_ID,
                    error.to_string(),
                    DUPLICATE_REQUEST_CODE,
                );
            }
            pending.insert(request_id.clone(), tx);
        }

        if let Err(e) = self.try_publish(request.clone()).await {
            self.inner.pending.lock().remove(&request_id);
            tracing::error!(message_id = %request_id, error = %e, "Failed to publish request");
            return ResponseMessage::failure_for(
                &request,
                SYSTEM_AGENT_ID,
                e.to_string(),
                PUBLISH_FAILED_CODE,
            );
        }

        let wait = timeout.unwrap_or_else(|| self.request_timeout(&request));
        match tokio::time::timeout(wait, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                tracing::warn!(message_id = %request_id, "Bus disconnected while awaiting response");
                ResponseMessage::failure_for(
                    &request,
                    SYSTEM_AGENT_ID,
                    "Bus disconnected",
                    TIMEOUT_ERROR_CODE,
                )
            }
            Err(_) => {
                self.inner.pending.lock().remove(&request_id);
                StatsCounters::incr(&self.inner.stats.timeouts);
                tracing::warn!(
                    message_id = %request_id,
                    topic = %request.header.topic,
                    timeout_ms = wait.as_millis() as u64,
                    "Request timed out"
                );
                ResponseMessage::timeout_for(&request)
            }
        }
    }

    fn request_timeout(&self, request: &RequestMessage) -> Duration {
        let secs = match request.response_timeout_seconds {
            0 => self.inner.config.default_response_timeout_seconds,
            secs => secs,
        };
        Duration::from_secs(secs)
    }

    /// Responders publish on the response twin of the request topic, so
    /// the requester has to listen there.
    async fn ensure_response_subscription(&self, request: &RequestMessage) -> BusResult<()> {
        let response_topic = topics::response_topic_for(&request.header.topic);
        if self.is_subscribed(&response_topic) {
            return Ok(());
        }
        self.subscribe(&[response_topic]).await
    }

    /// Number of requests still waiting for a response
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// Logged messages of a conversation, oldest first. Empty without a sink.
    pub async fn get_conversation_history(
        &self,
        conversation_id: &str,
    ) -> BusResult<Vec<MessageRecord>> {
        match &self.inner.sink {
            Some(sink) => Ok(sink.get_conversation_history(conversation_id).await?),
            None => Ok(Vec::new()),
        }
    }

    pub fn stats(&self) -> BusStats {
        self.inner.stats.snapshot()
    }
}
