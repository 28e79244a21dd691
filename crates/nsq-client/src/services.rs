// Collaborator seams: discovery, dedupe, requeue policy, and the handler.
use async_trait::async_trait;
use std::collections::HashSet;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use crate::addr::BrokerAddress;
use crate::message::Message;

/// Resolves the broker endpoints currently serving a topic.
///
/// Called once per subscribe. Real deployments back this with an
/// nsqlookupd query; `FixedHosts` covers static topologies and tests.
#[async_trait]
pub trait LookupService: Send + Sync {
    async fn lookup(&self, topic: &str) -> anyhow::Result<Vec<BrokerAddress>>;
}

/// A static endpoint list.
pub struct FixedHosts {
    hosts: Vec<BrokerAddress>,
}

impl FixedHosts {
    pub fn new(hosts: Vec<BrokerAddress>) -> Self {
        Self { hosts }
    }
}

#[async_trait]
impl LookupService for FixedHosts {
    async fn lookup(&self, _topic: &str) -> anyhow::Result<Vec<BrokerAddress>> {
        Ok(self.hosts.clone())
    }
}

/// Tracks already-seen messages so redeliveries can be skipped.
pub trait DedupeService: Send + Sync {
    /// Returns true iff the message was already present. Testing and adding
    /// are one atomic step; two concurrent calls for the same message must
    /// not both return false.
    fn contains_and_add(&self, topic: &str, channel: &str, message: &Message) -> bool;

    /// Forgets the message so a retry can pass the dedupe check again.
    fn erase(&self, topic: &str, channel: &str, message: &Message);
}

/// Exact in-memory dedupe keyed by (topic, channel, body).
#[derive(Default)]
pub struct InMemoryDedupe {
    seen: Mutex<HashSet<u64>>,
}

impl InMemoryDedupe {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(topic: &str, channel: &str, message: &Message) -> u64 {
        let mut hasher = DefaultHasher::new();
        topic.hash(&mut hasher);
        channel.hash(&mut hasher);
        message.body().hash(&mut hasher);
        hasher.finish()
    }
}

impl DedupeService for InMemoryDedupe {
    fn contains_and_add(&self, topic: &str, channel: &str, message: &Message) -> bool {
        let key = Self::key(topic, channel, message);
        let mut seen = self.seen.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        !seen.insert(key)
    }

    fn erase(&self, topic: &str, channel: &str, message: &Message) {
        let key = Self::key(topic, channel, message);
        let mut seen = self.seen.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        seen.remove(&key);
    }
}

/// Decides whether a failed message is redelivered, and after how long.
pub trait RequeueStrategy: Send + Sync {
    /// Returns the requeue delay in milliseconds, or `None` to drop.
    fn should_requeue(&self, message: &Message) -> Option<u64>;
}

/// Requeues with a fixed delay until the broker-reported attempt count
/// reaches `max_attempts`.
pub struct FixedDelayRequeue {
    max_attempts: u16,
    delay_ms: u64,
}

impl FixedDelayRequeue {
    pub fn new(max_attempts: u16, delay_ms: u64) -> Self {
        Self {
            max_attempts,
            delay_ms,
        }
    }
}

impl RequeueStrategy for FixedDelayRequeue {
    fn should_requeue(&self, message: &Message) -> Option<u64> {
        if message.attempts() < self.max_attempts {
            Some(self.delay_ms)
        } else {
            None
        }
    }
}

/// Outcome of handling one message.
#[derive(Debug)]
pub enum Handling {
    /// Processed; finish the message.
    Ack,
    /// Past its useful lifetime; finish without further processing.
    Expired,
    /// Redeliver after `delay_ms` milliseconds.
    Requeue { delay_ms: u64 },
    /// Processing failed; the requeue strategy decides what happens.
    Fail(anyhow::Error),
}

/// User-supplied message handler.
///
/// The handler borrows the message for one invocation; retaining payload
/// bytes beyond that is fine (the body is cheaply cloneable), but the
/// finish/requeue decision is made from the returned `Handling` alone.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, message: &Message) -> Handling;
}

impl<F> MessageHandler for F
where
    F: Fn(&Message) -> Handling + Send + Sync,
{
    fn handle(&self, message: &Message) -> Handling {
        self(message)
    }
}
