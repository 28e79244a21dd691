// Scripted in-process nsqd used by the integration tests.
//
// Each broker accepts any number of connections (publish retries reconnect),
// records every command it reads onto one log, and answers according to its
// script.
#![allow(dead_code)]

use bytes::BytesMut;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use nsq_client::{BrokerAddress, DedupeService, Message};
use nsq_wire::{Command, Frame, MessageFrame, MessageId};

/// How a broker answers the commands it reads.
#[derive(Clone)]
pub enum Script {
    /// Confirm every PUB with OK.
    PubOk,
    /// Answer every PUB with an error frame.
    PubError(&'static str),
    /// Answer a PUB with a heartbeat, then OK once the NOP arrives.
    PubHeartbeatThenOk,
    /// Confirm SUB with OK, then deliver one queued message per RDY credit.
    Deliver(Vec<MessageFrame>),
    /// Answer SUB with an error frame.
    ErrorOnSub(&'static str),
    /// Confirm SUB with OK, then send a single heartbeat.
    HeartbeatAfterSub,
}

pub struct ScriptedBroker {
    pub addr: BrokerAddress,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl ScriptedBroker {
    /// Waits for the next recorded command, bounded so a wedged client
    /// fails the test instead of hanging it.
    pub async fn expect_command(&mut self) -> Command {
        tokio::time::timeout(Duration::from_secs(2), self.commands.recv())
            .await
            .expect("timed out waiting for a command")
            .expect("broker log closed")
    }

    /// Collects everything recorded until the log goes quiet.
    pub async fn drain_commands(&mut self) -> Vec<Command> {
        let mut commands = Vec::new();
        loop {
            match tokio::time::timeout(Duration::from_millis(300), self.commands.recv()).await {
                Ok(Some(command)) => commands.push(command),
                _ => return commands,
            }
        }
    }
}

pub async fn spawn_broker(script: Script) -> ScriptedBroker {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    let (tx, commands) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };
            tokio::spawn(run_connection(socket, tx.clone(), script.clone()));
        }
    });
    ScriptedBroker {
        addr: BrokerAddress::new("127.0.0.1", port),
        commands,
    }
}

async fn run_connection(
    mut socket: TcpStream,
    tx: mpsc::UnboundedSender<Command>,
    script: Script,
) {
    let mut buf = BytesMut::with_capacity(8 * 1024);
    let mut pending: VecDeque<MessageFrame> = match &script {
        Script::Deliver(messages) => messages.iter().cloned().collect(),
        _ => VecDeque::new(),
    };
    // Set while a heartbeat is outstanding and OK must wait for the NOP.
    let mut ok_after_nop = false;
    loop {
        loop {
            let command = match Command::parse(&mut buf) {
                Ok(Some(command)) => command,
                Ok(None) => break,
                // A malformed command means the client is broken; close.
                Err(_) => return,
            };
            let _ = tx.send(command.clone());
            match (&script, &command) {
                (Script::PubOk, Command::Pub { .. }) => {
                    if socket.write_all(&Frame::ok().encode()).await.is_err() {
                        return;
                    }
                }
                (Script::PubError(text), Command::Pub { .. }) => {
                    let frame = Frame::Error(text.as_bytes().to_vec().into());
                    if socket.write_all(&frame.encode()).await.is_err() {
                        return;
                    }
                }
                (Script::PubHeartbeatThenOk, Command::Pub { .. }) => {
                    if socket.write_all(&Frame::heartbeat().encode()).await.is_err() {
                        return;
                    }
                    ok_after_nop = true;
                }
                (Script::PubHeartbeatThenOk, Command::Nop) if ok_after_nop => {
                    ok_after_nop = false;
                    if socket.write_all(&Frame::ok().encode()).await.is_err() {
                        return;
                    }
                }
                (Script::Deliver(_), Command::Sub { .. }) => {
                    if socket.write_all(&Frame::ok().encode()).await.is_err() {
                        return;
                    }
                }
                (Script::Deliver(_), Command::Rdy(credit)) if *credit > 0 => {
                    if let Some(message) = pending.pop_front() {
                        let frame = Frame::Message(message);
                        if socket.write_all(&frame.encode()).await.is_err() {
                            return;
                        }
                    }
                }
                (Script::ErrorOnSub(text), Command::Sub { .. }) => {
                    let frame = Frame::Error(text.as_bytes().to_vec().into());
                    if socket.write_all(&frame.encode()).await.is_err() {
                        return;
                    }
                }
                (Script::HeartbeatAfterSub, Command::Sub { .. }) => {
                    let ok = Frame::ok().encode();
                    let heartbeat = Frame::heartbeat().encode();
                    if socket.write_all(&ok).await.is_err()
                        || socket.write_all(&heartbeat).await.is_err()
                    {
                        return;
                    }
                }
                _ => {}
            }
        }
        let mut chunk = [0u8; 4096];
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
}

/// The message id used throughout the scenario tests.
pub fn test_id() -> MessageId {
    MessageId::from_bytes(*b"0123456789abcdef")
}

pub fn test_message(body: &'static [u8], attempts: u16) -> MessageFrame {
    MessageFrame {
        timestamp: 1_700_000_000_000_000_000,
        attempts,
        id: test_id(),
        body: bytes::Bytes::from_static(body),
    }
}

/// Dedupe double that scripts membership and records erases.
#[derive(Default)]
pub struct RecordingDedupe {
    pub contains: bool,
    pub added: Mutex<Vec<String>>,
    pub erased: Mutex<Vec<String>>,
}

impl RecordingDedupe {
    pub fn new(contains: bool) -> Self {
        Self {
            contains,
            ..Self::default()
        }
    }
}

impl DedupeService for RecordingDedupe {
    fn contains_and_add(&self, topic: &str, channel: &str, _message: &Message) -> bool {
        self.added
            .lock()
            .expect("lock")
            .push(format!("{topic}/{channel}"));
        self.contains
    }

    fn erase(&self, topic: &str, channel: &str, _message: &Message) {
        self.erased
            .lock()
            .expect("lock")
            .push(format!("{topic}/{channel}"));
    }
}

pub fn count_pubs(commands: &[Command]) -> usize {
    commands
        .iter()
        .filter(|command| matches!(command, Command::Pub { .. }))
        .count()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .try_init();
}
