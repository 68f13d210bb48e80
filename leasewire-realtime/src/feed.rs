//! Change-feed abstraction.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use leasewire_core::{ChangeEvent, Topic, TransportError};

/// Events from one topic connection.
///
/// The stream ending, or yielding an error, means the connection is gone;
/// the multiplexer reconnects.
pub type EventStream = BoxStream<'static, Result<ChangeEvent, TransportError>>;

/// Source of row-level change events, one connection per topic.
#[async_trait]
pub trait ChangeFeed: Send + Sync + 'static {
    async fn connect(&self, topic: &Topic) -> Result<EventStream, TransportError>;
}
