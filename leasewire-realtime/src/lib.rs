//! Leasewire Realtime - Transports and Channel Multiplexing
//!
//! Everything that talks to the backend lives here:
//! - `ChangeFeed`: per-topic stream of row-level change events
//!   (`WsChangeFeed` over WebSocket)
//! - `QueryApi`: keyed resource queries (`RestQueryClient` over HTTP)
//! - `ChannelMultiplexer`: one connection per topic, fanned out to every
//!   registered handler, with reconnect backoff

pub mod auth;
pub mod backoff;
pub mod feed;
pub mod multiplexer;
pub mod rest;
pub mod wire;
pub mod ws;

pub use auth::{ClientError, Credentials};
pub use backoff::{jittered_backoff, Backoff, ReconnectConfig};
pub use feed::{ChangeFeed, EventStream};
pub use multiplexer::{ChannelMultiplexer, ConnectionState, EventHandler, HandlerId};
pub use rest::{fetch_typed, QueryApi, RestQueryClient};
pub use ws::WsChangeFeed;
