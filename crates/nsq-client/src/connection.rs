// One TCP connection to a single broker.
use bytes::BytesMut;
use std::fmt;
use std::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use nsq_wire::{Command, Frame, WireError, PRELUDE_LEN};

use crate::addr::BrokerAddress;
use crate::config::ClientConfig;
use crate::error::{Error, Result};

/// A framed TCP session with one broker.
///
/// Publish callers use it request/response style; subscribe dispatch drives
/// it from a per-connection task. Either way a single caller owns the
/// connection at a time, so reads and writes never interleave.
pub struct Connection {
    addr: BrokerAddress,
    stream: TcpStream,
    config: ClientConfig,
    frame_scratch: BytesMut,
}

impl Connection {
    /// Dials the broker and sends MAGIC.
    pub async fn connect(addr: BrokerAddress, config: ClientConfig) -> Result<Self> {
        let stream = dial(&addr, &config).await?;
        let mut conn = Self {
            addr,
            stream,
            config,
            frame_scratch: BytesMut::with_capacity(8 * 1024),
        };
        conn.on_connect().await?;
        Ok(conn)
    }

    pub fn addr(&self) -> &BrokerAddress {
        &self.addr
    }

    // MAGIC must be the first bytes of every session, reconnects included.
    // IDENTIFY is not sent here: its OK reply would desynchronise the
    // request/response publish flow, so only the subscribe handshake (whose
    // dispatch loop ignores OK echoes) emits it.
    async fn on_connect(&mut self) -> Result<()> {
        self.send(&Command::Magic).await
    }

    /// Replaces the TCP session in place and re-sends MAGIC.
    pub async fn reconnect(&mut self) -> Result<()> {
        debug!(conn = %self.addr, "reconnecting");
        self.stream = dial(&self.addr, &self.config).await?;
        self.frame_scratch.clear();
        self.on_connect().await
    }

    pub async fn send(&mut self, command: &Command) -> Result<()> {
        let bytes = command.encode();
        self.write_all(&bytes).await
    }

    /// Writes all bytes or fails, bounded by `read_write_timeout`.
    pub async fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        let addr = self.addr.clone();
        let result = timeout(self.config.read_write_timeout, self.stream.write_all(bytes)).await;
        match result {
            Ok(inner) => inner.map_err(|source| socket_error(&addr, source)),
            Err(_) => Err(timed_out(&addr, "write")),
        }
    }

    /// Reads the next complete frame, bounded by `read_wait_timeout`.
    pub async fn read_frame(&mut self) -> Result<Frame> {
        let addr = self.addr.clone();
        let wait = self.config.read_wait_timeout;
        let result = timeout(wait, self.read_frame_inner()).await;
        match result {
            Ok(inner) => inner,
            Err(_) => Err(timed_out(&addr, "read")),
        }
    }

    async fn read_frame_inner(&mut self) -> Result<Frame> {
        let addr = self.addr.clone();
        let mut prelude = [0u8; PRELUDE_LEN];
        self.stream
            .read_exact(&mut prelude)
            .await
            .map_err(|source| socket_error(&addr, source))?;
        let size = u32::from_be_bytes([prelude[0], prelude[1], prelude[2], prelude[3]]);
        if size < 4 {
            return Err(WireError::MalformedLength(size).into());
        }
        let frame_type = u32::from_be_bytes([prelude[4], prelude[5], prelude[6], prelude[7]]);
        let length = size as usize - 4;
        if length > self.config.max_frame_bytes {
            return Err(WireError::FrameTooLarge {
                length,
                cap: self.config.max_frame_bytes,
            }
            .into());
        }
        // Reuse the scratch buffer to avoid per-frame allocations.
        self.frame_scratch.clear();
        self.frame_scratch.resize(length, 0u8);
        self.stream
            .read_exact(&mut self.frame_scratch[..])
            .await
            .map_err(|source| socket_error(&addr, source))?;
        let frame = Frame::from_parts(frame_type, self.frame_scratch.split().freeze())?;
        Ok(frame)
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.addr)
    }
}

async fn dial(addr: &BrokerAddress, config: &ClientConfig) -> Result<TcpStream> {
    let connect = TcpStream::connect((addr.host().to_string(), addr.port()));
    let stream = match timeout(config.connect_timeout, connect).await {
        Ok(result) => result.map_err(|source| socket_error(addr, source))?,
        Err(_) => return Err(timed_out(addr, "connect")),
    };
    stream
        .set_nodelay(true)
        .map_err(|source| socket_error(addr, source))?;
    debug!(conn = %addr, "connected");
    Ok(stream)
}

fn socket_error(addr: &BrokerAddress, source: io::Error) -> Error {
    Error::Socket {
        addr: addr.clone(),
        source,
    }
}

fn timed_out(addr: &BrokerAddress, what: &str) -> Error {
    Error::Socket {
        addr: addr.clone(),
        source: io::Error::new(io::ErrorKind::TimedOut, format!("{what} timed out")),
    }
}
