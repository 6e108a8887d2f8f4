//! Transport seam for the coordination layer

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::{
    error::MeshResult,
    message::{BusMessage, Topic},
};

/// Stream type for receiving bus messages
pub type MessageStream = Pin<Box<dyn Stream<Item = MeshResult<BusMessage>> + Send + 'static>>;

/// Minimal publish/subscribe transport
///
/// No delivery, ordering or persistence guarantee is assumed: messages may
/// be dropped or arrive out of order, and a subscriber also receives its own
/// publications. The stream ending means the subscription was lost.
#[async_trait]
pub trait CoordinationBus: Send + Sync {
    /// Publish a message to every current subscriber of `topic`
    ///
    /// # Errors
    ///
    /// Returns `MeshError` if the bus cannot be reached or the message cannot
    /// be encoded.
    async fn publish(&self, topic: &Topic, message: &BusMessage) -> MeshResult<()>;

    /// Subscribe to messages published on `topic` from now on
    ///
    /// # Errors
    ///
    /// Returns `MeshError` if the subscription cannot be established.
    async fn subscribe(&self, topic: &Topic) -> MeshResult<MessageStream>;

    /// Check that the bus is reachable
    async fn ping(&self) -> MeshResult<()>;
}
