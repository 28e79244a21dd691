// Address-keyed connection pools.
use rand::seq::SliceRandom;
use std::sync::{Arc, OnceLock};
use tokio::sync::Mutex;

use crate::addr::BrokerAddress;
use crate::connection::Connection;

/// A set of connections keyed by broker address.
///
/// Addresses are unique within a pool; iteration order is insertion order
/// until `shuffle` permutes it.
#[derive(Default)]
pub struct ConnectionPool {
    connections: Vec<Connection>,
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connection; an existing connection for the same address wins.
    pub fn add(&mut self, conn: Connection) {
        if !self.contains(conn.addr()) {
            self.connections.push(conn);
        }
    }

    pub fn contains(&self, addr: &BrokerAddress) -> bool {
        self.connections.iter().any(|conn| conn.addr() == addr)
    }

    pub fn find(&mut self, addr: &BrokerAddress) -> Option<&mut Connection> {
        self.connections.iter_mut().find(|conn| conn.addr() == addr)
    }

    pub fn count(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Permutes iteration order in place to spread publish load.
    pub fn shuffle(&mut self) {
        self.connections.shuffle(&mut rand::thread_rng());
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Connection> {
        self.connections.iter_mut()
    }

    pub fn clear(&mut self) {
        self.connections.clear();
    }
}

static PUBLISH_POOL: OnceLock<Arc<Mutex<ConnectionPool>>> = OnceLock::new();

/// The process-global publish pool.
///
/// Every client in the process shares publish-side connections by address;
/// this is a deliberate property of the design, not an accident of caching.
pub fn publish_pool() -> Arc<Mutex<ConnectionPool>> {
    Arc::clone(PUBLISH_POOL.get_or_init(|| Arc::new(Mutex::new(ConnectionPool::new()))))
}

/// Drops every connection in the shared publish pool. Intended for tests.
pub async fn reset_publish_pool() {
    publish_pool().lock().await.clear();
}
