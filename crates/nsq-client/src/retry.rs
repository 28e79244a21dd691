// Reconnect-between-attempts retry for request/response calls.
use futures::future::BoxFuture;
use tracing::debug;

use crate::connection::Connection;
use crate::error::Result;

/// Runs `op` against the connection at most `tries + 1` times, returning the
/// first success or the last failure.
///
/// The reconnect between attempts is unconditional: it recovers from
/// half-open TCP state as well as from application-level failures.
pub(crate) async fn with_reconnect<T, F>(
    conn: &mut Connection,
    tries: usize,
    mut op: F,
) -> Result<T>
where
    F: for<'c> FnMut(&'c mut Connection) -> BoxFuture<'c, Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op(conn).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < tries => {
                attempt += 1;
                debug!(conn = %conn.addr(), attempt, error = %err, "retrying after reconnect");
                if let Err(err) = conn.reconnect().await {
                    debug!(conn = %conn.addr(), error = %err, "reconnect failed");
                }
            }
            Err(err) => return Err(err),
        }
    }
}
