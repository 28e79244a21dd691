// Subscribe-side handshake and per-connection dispatch.
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use nsq_wire::{Command, Frame};

use crate::config::IdentifyConfig;
use crate::connection::Connection;
use crate::error::{ConfigError, Error, ProtocolError, Result};
use crate::message::Message;
use crate::services::{DedupeService, Handling, MessageHandler, RequeueStrategy};

/// Shared state for every dispatch task of one subscription.
pub(crate) struct SubscriptionContext {
    pub(crate) topic: String,
    pub(crate) channel: String,
    pub(crate) handler: Arc<dyn MessageHandler>,
    pub(crate) dedupe: Option<Arc<dyn DedupeService>>,
    pub(crate) requeue: Option<Arc<dyn RequeueStrategy>>,
}

/// Topic and channel names: `[.a-zA-Z0-9_-]{2,32}`.
pub(crate) fn valid_name(name: &str) -> bool {
    (2..=32).contains(&name.len())
        && name
            .bytes()
            .all(|b| b == b'.' || b == b'_' || b == b'-' || b.is_ascii_alphanumeric())
}

/// Identifies when configured, subscribes the connection to the
/// topic/channel pair, and grants the single in-flight credit.
///
/// The broker's OK echoes for IDENTIFY and SUB are left on the wire; the
/// dispatch loop reads and ignores them.
pub(crate) async fn handshake(
    conn: &mut Connection,
    topic: &str,
    channel: &str,
    identify: Option<&IdentifyConfig>,
) -> Result<()> {
    if let Some(params) = identify {
        let body = serde_json::to_vec(params).map_err(ConfigError::InvalidIdentify)?;
        conn.send(&Command::Identify { body: body.into() }).await?;
    }
    conn.send(&Command::Sub {
        topic: topic.to_string(),
        channel: channel.to_string(),
    })
    .await?;
    conn.send(&Command::Rdy(1)).await?;
    Ok(())
}

/// Sequentially reads and dispatches frames until shutdown or an error.
///
/// The connection is handed back either way so the caller can keep the
/// socket (stop does not close connections).
pub(crate) async fn run_dispatch(
    mut conn: Connection,
    ctx: Arc<SubscriptionContext>,
    mut shutdown: watch::Receiver<bool>,
) -> (Connection, Result<()>) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        let frame = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
            frame = conn.read_frame() => match frame {
                Ok(frame) => frame,
                Err(err) => return (conn, Err(err)),
            },
        };
        if let Err(err) = dispatch_frame(&mut conn, &ctx, frame).await {
            return (conn, Err(err));
        }
    }
    (conn, Ok(()))
}

async fn dispatch_frame(
    conn: &mut Connection,
    ctx: &SubscriptionContext,
    frame: Frame,
) -> Result<()> {
    match frame {
        frame if frame.is_heartbeat() => {
            debug!(conn = %conn.addr(), "heartbeat");
            conn.send(&Command::Nop).await
        }
        frame if frame.is_ok() => {
            // Echo of SUB or IDENTIFY.
            debug!(conn = %conn.addr(), "ignoring OK");
            Ok(())
        }
        Frame::Message(frame) => handle_message(conn, ctx, Message::from(frame)).await,
        other => Err(Error::Protocol(ProtocolError::UnexpectedFrame {
            frame: other,
        })),
    }
}

/// The message pipeline: dedupe, handler, then exactly one of FIN or REQ
/// before the next credit.
async fn handle_message(
    conn: &mut Connection,
    ctx: &SubscriptionContext,
    message: Message,
) -> Result<()> {
    if let Some(dedupe) = &ctx.dedupe {
        if dedupe.contains_and_add(&ctx.topic, &ctx.channel, &message) {
            info!(id = %message.id(), "deduplicating");
            return finish(conn, &message).await;
        }
    }
    match ctx.handler.handle(&message) {
        Handling::Ack => finish(conn, &message).await,
        Handling::Expired => {
            info!(id = %message.id(), "message expired");
            finish(conn, &message).await
        }
        Handling::Requeue { delay_ms } => {
            erase(ctx, &message);
            requeue(conn, &message, delay_ms).await
        }
        Handling::Fail(err) => {
            erase(ctx, &message);
            let delay = ctx
                .requeue
                .as_ref()
                .and_then(|strategy| strategy.should_requeue(&message));
            match delay {
                Some(delay_ms) => {
                    warn!(id = %message.id(), error = %err, delay_ms, "handler failed, requeueing");
                    requeue(conn, &message, delay_ms).await
                }
                None => {
                    warn!(id = %message.id(), error = %err, "handler failed, not requeuing");
                    finish(conn, &message).await
                }
            }
        }
    }
}

fn erase(ctx: &SubscriptionContext, message: &Message) {
    if let Some(dedupe) = &ctx.dedupe {
        dedupe.erase(&ctx.topic, &ctx.channel, message);
    }
}

async fn finish(conn: &mut Connection, message: &Message) -> Result<()> {
    conn.send(&Command::Fin(message.id())).await?;
    conn.send(&Command::Rdy(1)).await
}

async fn requeue(conn: &mut Connection, message: &Message, delay_ms: u64) -> Result<()> {
    conn.send(&Command::Req {
        id: message.id(),
        delay_ms,
    })
    .await?;
    conn.send(&Command::Rdy(1)).await
}
