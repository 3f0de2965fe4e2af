use crate::client::Client;
use crate::message::Message;
use log::debug;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

/// Tags a message is dispatched under. Every new message gets `Message`;
/// plain-text messages additionally get `Text`, and messages touching a
/// group chat additionally get `Group`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Message,
    Text,
    Group,
}

pub type EventHandlerCallback =
    Arc<dyn Fn(Arc<Message>, Arc<Client>) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Registry of message consumers. Delivery is fire-and-forget: each handler
/// runs on its own spawned task, so nothing a handler does can reach back
/// into the sync loop.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: Mutex<HashMap<EventKind, Vec<EventHandlerCallback>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, kind: EventKind, handler: EventHandlerCallback) {
        let mut handlers = self.handlers.lock().expect("handler registry poisoned");
        handlers.entry(kind).or_default().push(handler);
    }

    pub fn dispatch(&self, kind: EventKind, message: Arc<Message>, client: Arc<Client>) {
        let callbacks = {
            let handlers = self.handlers.lock().expect("handler registry poisoned");
            handlers.get(&kind).cloned().unwrap_or_default()
        };
        if callbacks.is_empty() {
            debug!(target: "Client/Events", "No handlers registered for {kind:?}");
            return;
        }
        for callback in callbacks {
            let message = message.clone();
            let client = client.clone();
            tokio::spawn(async move {
                callback(message, client).await;
            });
        }
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers
            .lock()
            .expect("handler registry poisoned")
            .get(&kind)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry").finish_non_exhaustive()
    }
}
