//! Per-identity event dispatch.
//!
//! Events from one user must be handled in arrival order — a code typed
//! right after `/changecode` has to see the post-transition state. Events
//! from different users must not queue behind each other's gateway calls.
//! The dispatcher therefore runs one worker task per identity, fed by an
//! in-order queue, spawned lazily on first contact.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

use crate::bot::controller::{CallbackAction, ContactInfo, Controller, Reply};
use crate::error::ChannelError;

/// What happened, as parsed by the transport.
#[derive(Debug, Clone)]
pub enum EventKind {
    Start,
    Help,
    Balance,
    ChangeCode,
    Text(String),
    Photo { file_id: String },
    Callback(CallbackAction),
}

/// Transport-level context for one event.
#[derive(Debug, Clone, Default)]
pub struct EventMeta {
    /// Where replies go.
    pub chat_id: String,
    /// Callback query to acknowledge, if this event came from a button.
    pub callback_id: Option<String>,
    pub contact: ContactInfo,
}

/// One inbound event from the transport.
#[derive(Debug, Clone)]
pub struct Event {
    /// Stable per-user key for session, rate-limit, and profile lookups.
    pub identity: String,
    pub kind: EventKind,
    pub meta: EventMeta,
}

/// Outbound side of the transport, as seen by the dispatcher.
#[async_trait]
pub trait BotTransport: Send + Sync {
    /// Deliver one reply to a chat.
    async fn send_reply(&self, chat_id: &str, reply: &Reply) -> Result<(), ChannelError>;

    /// Acknowledge a callback query so the client stops its spinner.
    async fn ack_callback(&self, callback_id: &str);

    /// Resolve a photo `file_id` to a fetchable URL, or `None` on failure.
    async fn photo_url(&self, file_id: &str) -> Option<String>;
}

/// How long a worker waits for another event before shutting down. The
/// next event for that identity respawns it.
const WORKER_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Routes events to per-identity workers.
pub struct Dispatcher {
    controller: Arc<Controller>,
    transport: Arc<dyn BotTransport>,
    workers: Mutex<HashMap<String, mpsc::UnboundedSender<Event>>>,
    idle_timeout: Duration,
}

impl Dispatcher {
    pub fn new(controller: Arc<Controller>, transport: Arc<dyn BotTransport>) -> Self {
        Self::with_idle_timeout(controller, transport, WORKER_IDLE_TIMEOUT)
    }

    pub fn with_idle_timeout(
        controller: Arc<Controller>,
        transport: Arc<dyn BotTransport>,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            controller,
            transport,
            workers: Mutex::new(HashMap::new()),
            idle_timeout,
        }
    }

    /// Enqueue an event for its identity's worker. Never blocks on the
    /// event's actual processing.
    pub async fn dispatch(&self, event: Event) {
        let mut workers = self.workers.lock().await;

        let mut event = event;
        if let Some(tx) = workers.get(&event.identity) {
            match tx.send(event) {
                Ok(()) => return,
                // Worker idled out or died; take the event back and respawn.
                Err(failed) => event = failed.0,
            }
        }

        let identity = event.identity.clone();
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(event);
        workers.insert(identity.clone(), tx);

        let controller = Arc::clone(&self.controller);
        let transport = Arc::clone(&self.transport);
        let idle_timeout = self.idle_timeout;
        tokio::spawn(async move {
            debug!(%identity, "Started per-user worker");
            run_worker(controller, transport, rx, idle_timeout).await;
            debug!(%identity, "Per-user worker stopped");
        });
    }
}

/// Process one identity's events strictly in order, exiting once the
/// queue has been quiet for `idle_timeout`.
async fn run_worker(
    controller: Arc<Controller>,
    transport: Arc<dyn BotTransport>,
    mut rx: mpsc::UnboundedReceiver<Event>,
    idle_timeout: Duration,
) {
    loop {
        let event = match tokio::time::timeout(idle_timeout, rx.recv()).await {
            Ok(Some(event)) => event,
            Ok(None) | Err(_) => return,
        };

        if let Some(ref callback_id) = event.meta.callback_id {
            transport.ack_callback(callback_id).await;
        }

        let replies = handle_event(&controller, &transport, &event).await;

        for reply in &replies {
            if let Err(e) = transport.send_reply(&event.meta.chat_id, reply).await {
                warn!(
                    identity = %event.identity,
                    error = %e,
                    "Failed to deliver reply"
                );
            }
        }
    }
}

async fn handle_event(
    controller: &Controller,
    transport: &Arc<dyn BotTransport>,
    event: &Event,
) -> Vec<Reply> {
    let identity = event.identity.as_str();
    match &event.kind {
        EventKind::Start => controller.handle_start(identity, &event.meta.contact).await,
        EventKind::Help => controller.handle_help(identity).await,
        EventKind::Balance => controller.handle_balance(identity).await,
        EventKind::ChangeCode => controller.handle_change_code(identity).await,
        EventKind::Text(text) => controller.handle_text(identity, text).await,
        EventKind::Photo { file_id } => {
            let url = transport.photo_url(file_id).await;
            controller.handle_photo(identity, url.as_deref()).await
        }
        EventKind::Callback(action) => controller.handle_callback(identity, *action).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barcode::BarcodeDecoder;
    use crate::bot::controller::ReplyMarkup;
    use crate::bot::session::SessionState;
    use crate::error::GatewayError;
    use crate::gateway::{Balance, BalanceGateway, BalanceSnapshot};
    use crate::rate_limit::RateLimiter;
    use crate::store::LibSqlBackend;
    use std::time::Duration;
    use tokio::sync::Mutex as TokioMutex;

    struct OkGateway;

    #[async_trait]
    impl BalanceGateway for OkGateway {
        async fn fetch_balance(&self, _code: &str) -> Result<BalanceSnapshot, GatewayError> {
            Ok(BalanceSnapshot {
                phone: "+79001234567".into(),
                balance: Balance {
                    available_amount: 1.0,
                },
                history: Vec::new(),
            })
        }
    }

    struct NoDecoder;

    #[async_trait]
    impl BarcodeDecoder for NoDecoder {
        async fn decode(&self, _image_url: &str) -> Option<String> {
            None
        }
    }

    #[derive(Default)]
    struct RecordingTransport {
        sent: TokioMutex<Vec<(String, Reply)>>,
        acked: TokioMutex<Vec<String>>,
    }

    #[async_trait]
    impl BotTransport for RecordingTransport {
        async fn send_reply(&self, chat_id: &str, reply: &Reply) -> Result<(), ChannelError> {
            self.sent
                .lock()
                .await
                .push((chat_id.to_string(), reply.clone()));
            Ok(())
        }

        async fn ack_callback(&self, callback_id: &str) {
            self.acked.lock().await.push(callback_id.to_string());
        }

        async fn photo_url(&self, _file_id: &str) -> Option<String> {
            None
        }
    }

    async fn build() -> (Arc<Dispatcher>, Arc<Controller>, Arc<RecordingTransport>) {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let controller = Arc::new(Controller::new(
            store,
            Arc::new(OkGateway),
            Arc::new(NoDecoder),
            RateLimiter::new(Duration::from_secs(60), Duration::from_secs(10)),
        ));
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&controller),
            transport.clone() as Arc<dyn BotTransport>,
        ));
        (dispatcher, controller, transport)
    }

    fn event(identity: &str, kind: EventKind) -> Event {
        Event {
            identity: identity.to_string(),
            kind,
            meta: EventMeta {
                chat_id: format!("chat-{identity}"),
                ..Default::default()
            },
        }
    }

    async fn settle() {
        // Workers are plain tasks; give them a beat to drain their queues.
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn same_user_events_are_processed_in_order() {
        let (dispatcher, controller, transport) = build().await;

        dispatcher.dispatch(event("u1", EventKind::Start)).await;
        dispatcher.dispatch(event("u1", EventKind::ChangeCode)).await;
        dispatcher
            .dispatch(event("u1", EventKind::Text("2001123456789".into())))
            .await;
        settle().await;

        // The typed code was interpreted against the post-/changecode state.
        assert_eq!(controller.session_state("u1").await, SessionState::Idle);
        let sent = transport.sent.lock().await;
        assert!(sent.iter().any(|(_, r)| r.text.contains("Code saved")));
    }

    #[tokio::test]
    async fn replies_go_to_the_originating_chat() {
        let (dispatcher, _controller, transport) = build().await;

        dispatcher.dispatch(event("u1", EventKind::Help)).await;
        dispatcher.dispatch(event("u2", EventKind::Help)).await;
        settle().await;

        let sent = transport.sent.lock().await;
        assert!(sent.iter().any(|(chat, _)| chat == "chat-u1"));
        assert!(sent.iter().any(|(chat, _)| chat == "chat-u2"));
    }

    #[tokio::test]
    async fn callbacks_are_acknowledged() {
        let (dispatcher, _controller, transport) = build().await;

        let mut ev = event("u1", EventKind::Callback(CallbackAction::ChangeCode));
        ev.meta.callback_id = Some("cb-1".into());
        dispatcher.dispatch(ev).await;
        settle().await;

        assert_eq!(transport.acked.lock().await.as_slice(), ["cb-1"]);
        let sent = transport.sent.lock().await;
        assert!(
            sent.iter()
                .any(|(_, r)| r.markup == ReplyMarkup::PhotoKeyboard)
        );
    }

    #[tokio::test]
    async fn idle_worker_exits_and_respawns_on_the_next_event() {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let controller = Arc::new(Controller::new(
            store,
            Arc::new(OkGateway),
            Arc::new(NoDecoder),
            RateLimiter::new(Duration::from_secs(60), Duration::from_secs(10)),
        ));
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = Dispatcher::with_idle_timeout(
            controller,
            transport.clone() as Arc<dyn BotTransport>,
            Duration::from_millis(20),
        );

        dispatcher.dispatch(event("u1", EventKind::Help)).await;
        settle().await;
        // Well past the idle timeout; the worker task is gone by now and
        // its queue sender is dead.
        tokio::time::sleep(Duration::from_millis(100)).await;

        dispatcher.dispatch(event("u1", EventKind::Help)).await;
        settle().await;

        let sent = transport.sent.lock().await;
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|(chat, _)| chat == "chat-u1"));
    }

    #[tokio::test]
    async fn stray_idle_text_produces_no_reply() {
        let (dispatcher, _controller, transport) = build().await;

        dispatcher
            .dispatch(event("u1", EventKind::Text("hello".into())))
            .await;
        settle().await;

        assert!(transport.sent.lock().await.is_empty());
    }
}
