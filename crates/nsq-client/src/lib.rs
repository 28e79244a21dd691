//! NSQ client: consistency-aware publishing and channel subscriptions.
//!
//! Publishing fans a message out across a configured broker set until a
//! consistency floor is met, retrying per node with reconnects in between.
//! Subscribing opens one connection per discovered endpoint and dispatches
//! messages sequentially per connection under a one-in-flight credit, so a
//! message is always finished or requeued before the next one arrives on
//! that connection.

pub mod addr;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod pool;
pub(crate) mod retry;
pub mod services;

pub use addr::{BrokerAddress, parse_hosts};
pub use client::{Client, Consistency, StopHandle};
pub use config::{ClientConfig, IdentifyConfig};
pub use error::{ConfigError, Error, ProtocolError, Result};
pub use message::Message;
pub use pool::{publish_pool, reset_publish_pool};
pub use services::{
    DedupeService, FixedDelayRequeue, FixedHosts, Handling, InMemoryDedupe, LookupService,
    MessageHandler, RequeueStrategy,
};
