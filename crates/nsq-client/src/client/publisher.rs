// Consistency-aware publish fan-out over the shared pool.
use bytes::Bytes;
use tracing::{debug, warn};

use nsq_wire::{Command, Frame};

use crate::addr::BrokerAddress;
use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::error::{ConfigError, Error, ProtocolError, Result};
use crate::pool::publish_pool;
use crate::retry::with_reconnect;

/// Retry budget per node: one initial attempt plus two retries.
const PUBLISH_TRIES: usize = 2;

/// How many broker nodes must confirm a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consistency {
    One,
    Two,
    /// A majority of the configured nodes.
    Quorum,
}

impl Consistency {
    /// Resolves the required success count against the pool size.
    pub fn required_nodes(self, nodes: usize) -> std::result::Result<usize, ConfigError> {
        let required = match self {
            Consistency::One => 1,
            Consistency::Two => 2,
            Consistency::Quorum => nodes / 2 + 1,
        };
        if required > nodes {
            return Err(ConfigError::UnachievableConsistency { required, nodes });
        }
        Ok(required)
    }
}

/// A resolved publish target set: the pool holds the connections, the plan
/// holds the consistency floor.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PublishPlan {
    pub(crate) required: usize,
}

/// Fills the shared pool with any missing connections and resolves the
/// consistency floor against the resulting pool size.
pub(crate) async fn configure(
    addrs: &[BrokerAddress],
    level: Consistency,
    config: &ClientConfig,
) -> Result<PublishPlan> {
    let pool = publish_pool();
    let mut pool = pool.lock().await;
    for addr in addrs {
        if !pool.contains(addr) {
            let conn = Connection::connect(addr.clone(), config.clone()).await?;
            debug!(conn = %addr, "publish connection established");
            pool.add(conn);
        }
    }
    let required = level.required_nodes(pool.count())?;
    Ok(PublishPlan { required })
}

/// Publishes to pool nodes in shuffled order until the floor is met.
pub(crate) async fn publish(plan: PublishPlan, topic: &str, body: Bytes) -> Result<()> {
    let pool = publish_pool();
    let mut pool = pool.lock().await;
    pool.shuffle();
    let required = plan.required;
    let mut achieved = 0;
    let mut errors = Vec::new();
    for conn in pool.iter_mut() {
        let body = body.clone();
        let topic = topic.to_string();
        let result = with_reconnect(conn, PUBLISH_TRIES, move |conn| {
            Box::pin(publish_once(conn, topic.clone(), body.clone()))
        })
        .await;
        match result {
            Ok(()) => {
                achieved += 1;
                if achieved >= required {
                    break;
                }
            }
            Err(err) => {
                warn!(node = %conn.addr(), error = %err, "publish attempt failed");
                errors.push(format!("{}: {err}", conn.addr()));
            }
        }
    }
    if achieved < required {
        return Err(Error::Publish {
            required,
            achieved,
            errors,
        });
    }
    Ok(())
}

/// One publish attempt: write PUB, then read to the confirmation, answering
/// heartbeats along the way.
async fn publish_once(conn: &mut Connection, topic: String, body: Bytes) -> Result<()> {
    conn.send(&Command::Pub { topic, body })
    .await?;
    loop {
        let frame = conn.read_frame().await?;
        if frame.is_heartbeat() {
            conn.send(&Command::Nop).await?;
            continue;
        }
        if frame.is_ok() {
            return Ok(());
        }
        return match frame {
            Frame::Error(payload) => Err(Error::Protocol(ProtocolError::Broker(
                String::from_utf8_lossy(&payload).into_owned(),
            ))),
            other => Err(Error::Protocol(ProtocolError::UnexpectedFrame {
                frame: other,
            })),
        };
    }
}
