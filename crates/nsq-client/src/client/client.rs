// Client façade wiring lookup, publish, and subscribe together.
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::debug;

use nsq_wire::Command;

use crate::addr::{BrokerAddress, parse_hosts};
use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::error::{ConfigError, Error, Result};
use crate::services::{DedupeService, LookupService, MessageHandler, RequeueStrategy};

use super::publisher::{self, Consistency, PublishPlan};
use super::subscription::{self, SubscriptionContext};

/// NSQ client: consistency-aware publishing plus channel subscriptions.
///
/// ```no_run
/// use nsq_client::{Client, ClientConfig, Consistency, FixedHosts, Handling};
/// use std::sync::Arc;
///
/// # async fn example() -> nsq_client::Result<()> {
/// let mut client = Client::new(ClientConfig::default())
///     .with_lookup(Arc::new(FixedHosts::new(vec!["mq1".parse()?])));
/// client.publish_to("mq1,mq2", Consistency::One).await?;
/// client.publish("events", "hello").await?;
/// client
///     .subscribe("events", "archive", |message: &nsq_client::Message| {
///         println!("got {}", message.id());
///         Handling::Ack
///     })
///     .await?;
/// client.run(None).await?;
/// # Ok(())
/// # }
/// ```
pub struct Client {
    config: ClientConfig,
    lookup: Option<Arc<dyn LookupService>>,
    dedupe: Option<Arc<dyn DedupeService>>,
    requeue: Option<Arc<dyn RequeueStrategy>>,
    plan: Option<PublishPlan>,
    subscriptions: Vec<PendingSubscription>,
    shutdown: Arc<watch::Sender<bool>>,
}

struct PendingSubscription {
    conn: Connection,
    ctx: Arc<SubscriptionContext>,
}

/// Stops a running client from another task. Stopping is idempotent.
#[derive(Clone)]
pub struct StopHandle {
    shutdown: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            lookup: None,
            dedupe: None,
            requeue: None,
            plan: None,
            subscriptions: Vec::new(),
            shutdown: Arc::new(shutdown),
        }
    }

    pub fn with_lookup(mut self, lookup: Arc<dyn LookupService>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    pub fn with_dedupe(mut self, dedupe: Arc<dyn DedupeService>) -> Self {
        self.dedupe = Some(dedupe);
        self
    }

    pub fn with_requeue(mut self, requeue: Arc<dyn RequeueStrategy>) -> Self {
        self.requeue = Some(requeue);
        self
    }

    /// Configures the publish target set and consistency floor.
    ///
    /// Accepts a comma-separated host list; ports default to 4150. Missing
    /// connections are added to the process-wide publish pool.
    pub async fn publish_to(&mut self, hosts: &str, level: Consistency) -> Result<()> {
        let addrs = parse_hosts(hosts)?;
        self.publish_to_addrs(&addrs, level).await
    }

    pub async fn publish_to_addrs(
        &mut self,
        addrs: &[BrokerAddress],
        level: Consistency,
    ) -> Result<()> {
        self.plan = Some(publisher::configure(addrs, level, &self.config).await?);
        Ok(())
    }

    /// Publishes one message, honouring the configured consistency floor.
    pub async fn publish(&self, topic: &str, body: impl Into<Bytes>) -> Result<()> {
        let plan = self.plan.ok_or(ConfigError::MissingPublishTargets)?;
        publisher::publish(plan, topic, body.into()).await
    }

    /// Discovers the endpoints serving `topic` and subscribes each of them.
    ///
    /// Each connection is handshaken immediately (MAGIC, IDENTIFY when
    /// configured, SUB, RDY 1); dispatch starts when `run` is called.
    pub async fn subscribe(
        &mut self,
        topic: &str,
        channel: &str,
        handler: impl MessageHandler + 'static,
    ) -> Result<()> {
        let lookup = self.lookup.clone().ok_or(ConfigError::MissingLookup)?;
        for name in [topic, channel] {
            if !subscription::valid_name(name) {
                return Err(ConfigError::InvalidName {
                    name: name.to_string(),
                }
                .into());
            }
        }
        let addrs = lookup
            .lookup(topic)
            .await
            .map_err(|err| Error::Lookup(err.to_string()))?;
        let ctx = Arc::new(SubscriptionContext {
            topic: topic.to_string(),
            channel: channel.to_string(),
            handler: Arc::new(handler),
            dedupe: self.dedupe.clone(),
            requeue: self.requeue.clone(),
        });
        for addr in addrs {
            let mut conn = Connection::connect(addr, self.config.clone()).await?;
            subscription::handshake(&mut conn, topic, channel, self.config.identify.as_ref())
                .await?;
            debug!(conn = %conn.addr(), topic, channel, "subscribed");
            self.subscriptions.push(PendingSubscription {
                conn,
                ctx: Arc::clone(&ctx),
            });
        }
        Ok(())
    }

    /// Number of subscribe-side connections currently held.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    /// Stops a running `run` without closing any sockets. Idempotent.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    /// Drives dispatch for every subscribed connection until `stop`, the
    /// optional timeout, or the first protocol-level error.
    ///
    /// Connections are handed back to the subscriber pool on the way out,
    /// so stopping does not close sockets and `run` can be called again.
    pub async fn run(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.shutdown.send_replace(false);
        let mut tasks = JoinSet::new();
        for sub in self.subscriptions.drain(..) {
            let ctx = sub.ctx;
            let task_ctx = Arc::clone(&ctx);
            let rx = self.shutdown.subscribe();
            tasks.spawn(async move {
                let (conn, result) = subscription::run_dispatch(sub.conn, task_ctx, rx).await;
                (conn, ctx, result)
            });
        }
        let timer = timeout.map(|duration| {
            let handle = self.stop_handle();
            tokio::spawn(async move {
                tokio::time::sleep(duration).await;
                handle.stop();
            })
        });
        let mut first_err = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((conn, ctx, result)) => {
                    self.subscriptions.push(PendingSubscription { conn, ctx });
                    if let Err(err) = result {
                        // One bad connection stops the loop; the rest wind down.
                        self.shutdown.send_replace(true);
                        if first_err.is_none() {
                            first_err = Some(err);
                        }
                    }
                }
                Err(join_err) => {
                    if join_err.is_panic() {
                        std::panic::resume_unwind(join_err.into_panic());
                    }
                }
            }
        }
        if let Some(timer) = timer {
            timer.abort();
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Writes CLS to every subscribe-side connection, fire-and-forget, then
    /// drops the sockets.
    pub async fn close(&mut self) {
        for sub in &mut self.subscriptions {
            let _ = sub.conn.send(&Command::Cls).await;
        }
        self.subscriptions.clear();
    }
}
