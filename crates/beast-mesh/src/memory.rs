//! In-process bus backed by tokio broadcast channels
//!
//! Several coordinators sharing one `InMemoryBus` behave like agents sharing
//! one Redis topic. Messages travel as JSON so the wire format is exercised
//! exactly as on a real bus.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{RwLock, broadcast};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, warn};

use crate::{
    bus::{CoordinationBus, MessageStream},
    error::{MeshError, MeshResult},
    message::{BusMessage, Topic},
};

const DEFAULT_CAPACITY: usize = 1024;

/// Cloneable handle to a shared in-process bus
#[derive(Clone)]
pub struct InMemoryBus {
    inner: Arc<Inner>,
}

struct Inner {
    channels: RwLock<HashMap<Topic, broadcast::Sender<String>>>,
    reachable: AtomicBool,
    capacity: usize,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bus whose per-topic buffer holds `capacity` undelivered messages
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                channels: RwLock::new(HashMap::new()),
                reachable: AtomicBool::new(true),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Simulate an outage: while unreachable every operation fails and
    /// in-flight messages are dropped
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn is_reachable(&self) -> bool {
        self.inner.reachable.load(Ordering::SeqCst)
    }

    fn check_reachable(&self) -> MeshResult<()> {
        if self.is_reachable() {
            Ok(())
        } else {
            Err(MeshError::ConnectionFailed(
                "in-memory bus is unreachable".to_string(),
            ))
        }
    }

    async fn sender(&self, topic: &Topic) -> broadcast::Sender<String> {
        if let Some(sender) = self.inner.channels.read().await.get(topic) {
            return sender.clone();
        }
        let mut channels = self.inner.channels.write().await;
        channels
            .entry(topic.clone())
            .or_insert_with(|| broadcast::channel(self.inner.capacity).0)
            .clone()
    }
}

#[async_trait]
impl CoordinationBus for InMemoryBus {
    async fn publish(&self, topic: &Topic, message: &BusMessage) -> MeshResult<()> {
        self.check_reachable()?;
        let json = message.to_json()?;
        // No subscribers is not an error on a pub/sub bus
        let delivered = self.sender(topic).await.send(json).unwrap_or(0);
        debug!(
            topic = %topic,
            kind = message.kind(),
            subscribers = delivered,
            "Published to in-memory bus"
        );
        Ok(())
    }

    async fn subscribe(&self, topic: &Topic) -> MeshResult<MessageStream> {
        self.check_reachable()?;
        let receiver = self.sender(topic).await.subscribe();
        let bus = self.clone();

        let stream = BroadcastStream::new(receiver).filter_map(move |item| {
            if !bus.is_reachable() {
                return None;
            }
            match item {
                Ok(json) => Some(BusMessage::from_json(&json)),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(skipped, "In-memory bus subscriber lagged");
                    Some(Err(MeshError::ReceiveFailed(format!(
                        "lagged by {skipped} messages"
                    ))))
                }
            }
        });

        Ok(Box::pin(stream))
    }

    async fn ping(&self) -> MeshResult<()> {
        self.check_reachable()
    }
}
