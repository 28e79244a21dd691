// NSQ v2 wire format: client commands and broker frames.
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

/// Protocol identifier, sent as the first bytes of every new connection.
pub const MAGIC: &[u8] = b"  V2";
/// Response body that classifies a frame as a heartbeat.
pub const HEARTBEAT: &[u8] = b"_heartbeat_";
/// Frame prelude: big-endian total size, then big-endian frame type.
pub const PRELUDE_LEN: usize = 8;

pub const FRAME_TYPE_RESPONSE: u32 = 0;
pub const FRAME_TYPE_ERROR: u32 = 1;
pub const FRAME_TYPE_MESSAGE: u32 = 2;

pub type Result<T> = std::result::Result<T, WireError>;

#[derive(thiserror::Error, Debug)]
pub enum WireError {
    #[error("incomplete frame")]
    Incomplete,
    #[error("malformed frame length {0}")]
    MalformedLength(u32),
    #[error("unknown frame type {0}")]
    UnknownFrameType(u32),
    #[error("frame too large: {length} bytes (cap {cap}); refusing")]
    FrameTooLarge { length: usize, cap: usize },
    #[error("truncated message payload")]
    TruncatedMessage,
    #[error("malformed command: {0}")]
    MalformedCommand(String),
}

/// Broker-assigned message identifier, 16 bytes of printable ASCII.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId([u8; Self::LEN]);

impl MessageId {
    pub const LEN: usize = 16;

    pub fn from_bytes(bytes: [u8; Self::LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({self})")
    }
}

impl TryFrom<&[u8]> for MessageId {
    type Error = WireError;

    fn try_from(value: &[u8]) -> Result<Self> {
        let bytes: [u8; Self::LEN] = value.try_into().map_err(|_| {
            WireError::MalformedCommand(format!("message id must be {} bytes", Self::LEN))
        })?;
        Ok(Self(bytes))
    }
}

/// Outbound command.
///
/// ```
/// use nsq_wire::Command;
///
/// let command = Command::Sub {
///     topic: "events".into(),
///     channel: "archive".into(),
/// };
/// assert_eq!(command.encode().as_ref(), b"SUB events archive\n");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// The protocol identifier; no trailing newline.
    Magic,
    Identify { body: Bytes },
    Sub { topic: String, channel: String },
    Pub { topic: String, body: Bytes },
    Rdy(u32),
    Fin(MessageId),
    Req { id: MessageId, delay_ms: u64 },
    Nop,
    Cls,
}

impl Command {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        match self {
            Command::Magic => buf.extend_from_slice(MAGIC),
            Command::Identify { body } => {
                buf.extend_from_slice(b"IDENTIFY\n");
                buf.put_u32(body.len() as u32);
                buf.extend_from_slice(body);
            }
            Command::Sub { topic, channel } => {
                buf.extend_from_slice(format!("SUB {topic} {channel}\n").as_bytes());
            }
            Command::Pub { topic, body } => {
                buf.extend_from_slice(format!("PUB {topic}\n").as_bytes());
                buf.put_u32(body.len() as u32);
                buf.extend_from_slice(body);
            }
            Command::Rdy(count) => buf.extend_from_slice(format!("RDY {count}\n").as_bytes()),
            Command::Fin(id) => {
                buf.extend_from_slice(b"FIN ");
                buf.extend_from_slice(id.as_bytes());
                buf.extend_from_slice(b"\n");
            }
            Command::Req { id, delay_ms } => {
                buf.extend_from_slice(b"REQ ");
                buf.extend_from_slice(id.as_bytes());
                buf.extend_from_slice(format!(" {delay_ms}\n").as_bytes());
            }
            Command::Nop => buf.extend_from_slice(b"NOP\n"),
            Command::Cls => buf.extend_from_slice(b"CLS\n"),
        }
        buf.freeze()
    }

    /// Parses one command from the front of `buf`, advancing past it.
    ///
    /// Returns `Ok(None)` when more bytes are needed; `buf` is left untouched
    /// in that case.
    pub fn parse(buf: &mut BytesMut) -> Result<Option<Command>> {
        if buf.is_empty() {
            return Ok(None);
        }
        // Only MAGIC starts with a space.
        if buf[0] == b' ' {
            if buf.len() < MAGIC.len() {
                return if MAGIC.starts_with(&buf[..]) {
                    Ok(None)
                } else {
                    Err(WireError::MalformedCommand("bad magic".into()))
                };
            }
            if &buf[..MAGIC.len()] != MAGIC {
                return Err(WireError::MalformedCommand("bad magic".into()));
            }
            buf.advance(MAGIC.len());
            return Ok(Some(Command::Magic));
        }
        let Some(line_end) = buf.iter().position(|&b| b == b'\n') else {
            return Ok(None);
        };
        let tokens: Vec<Vec<u8>> = buf[..line_end]
            .split(|&b| b == b' ')
            .map(|token| token.to_vec())
            .collect();
        let verb = tokens[0].as_slice();

        // IDENTIFY and PUB carry a length-prefixed body after the line.
        if matches!(verb, b"IDENTIFY" | b"PUB") {
            if buf.len() < line_end + 1 + 4 {
                return Ok(None);
            }
            let body_len = u32::from_be_bytes([
                buf[line_end + 1],
                buf[line_end + 2],
                buf[line_end + 3],
                buf[line_end + 4],
            ]) as usize;
            if buf.len() < line_end + 1 + 4 + body_len {
                return Ok(None);
            }
            buf.advance(line_end + 1 + 4);
            let body = buf.split_to(body_len).freeze();
            return match verb {
                b"IDENTIFY" => {
                    expect_tokens(&tokens, 1)?;
                    Ok(Some(Command::Identify { body }))
                }
                _ => {
                    expect_tokens(&tokens, 2)?;
                    Ok(Some(Command::Pub {
                        topic: utf8_token(&tokens[1])?,
                        body,
                    }))
                }
            };
        }

        buf.advance(line_end + 1);
        let command = match verb {
            b"SUB" => {
                expect_tokens(&tokens, 3)?;
                Command::Sub {
                    topic: utf8_token(&tokens[1])?,
                    channel: utf8_token(&tokens[2])?,
                }
            }
            b"RDY" => {
                expect_tokens(&tokens, 2)?;
                Command::Rdy(int_token(&tokens[1])?)
            }
            b"FIN" => {
                expect_tokens(&tokens, 2)?;
                Command::Fin(MessageId::try_from(tokens[1].as_slice())?)
            }
            b"REQ" => {
                expect_tokens(&tokens, 3)?;
                Command::Req {
                    id: MessageId::try_from(tokens[1].as_slice())?,
                    delay_ms: int_token(&tokens[2])?,
                }
            }
            b"NOP" => {
                expect_tokens(&tokens, 1)?;
                Command::Nop
            }
            b"CLS" => {
                expect_tokens(&tokens, 1)?;
                Command::Cls
            }
            other => {
                return Err(WireError::MalformedCommand(
                    String::from_utf8_lossy(other).into_owned(),
                ));
            }
        };
        Ok(Some(command))
    }
}

fn expect_tokens(tokens: &[Vec<u8>], count: usize) -> Result<()> {
    if tokens.len() == count {
        Ok(())
    } else {
        Err(WireError::MalformedCommand(format!(
            "expected {count} tokens, got {}",
            tokens.len()
        )))
    }
}

fn utf8_token(token: &[u8]) -> Result<String> {
    String::from_utf8(token.to_vec())
        .map_err(|_| WireError::MalformedCommand("non-utf8 token".into()))
}

fn int_token<T: std::str::FromStr>(token: &[u8]) -> Result<T> {
    std::str::from_utf8(token)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| WireError::MalformedCommand("bad integer token".into()))
}

/// Payload of a message frame: timestamp, attempts, id, body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageFrame {
    pub timestamp: i64,
    pub attempts: u16,
    pub id: MessageId,
    pub body: Bytes,
}

impl MessageFrame {
    pub const HEADER_LEN: usize = 8 + 2 + MessageId::LEN;

    pub fn decode(mut payload: Bytes) -> Result<Self> {
        if payload.len() < Self::HEADER_LEN {
            return Err(WireError::TruncatedMessage);
        }
        let timestamp = payload.get_i64();
        let attempts = payload.get_u16();
        let mut id = [0u8; MessageId::LEN];
        payload.copy_to_slice(&mut id);
        Ok(Self {
            timestamp,
            attempts,
            id: MessageId::from_bytes(id),
            body: payload,
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::HEADER_LEN + self.body.len());
        buf.put_i64(self.timestamp);
        buf.put_u16(self.attempts);
        buf.extend_from_slice(self.id.as_bytes());
        buf.extend_from_slice(&self.body);
        buf.freeze()
    }
}

/// Inbound frame.
///
/// ```
/// use bytes::Bytes;
/// use nsq_wire::Frame;
///
/// let frame = Frame::Response(Bytes::from_static(b"OK"));
/// let decoded = Frame::decode(frame.encode()).expect("decode");
/// assert!(decoded.is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Response(Bytes),
    Error(Bytes),
    Message(MessageFrame),
}

impl Frame {
    pub fn heartbeat() -> Self {
        Frame::Response(Bytes::from_static(HEARTBEAT))
    }

    pub fn ok() -> Self {
        Frame::Response(Bytes::from_static(b"OK"))
    }

    /// Classifies a frame read off the wire as prelude + payload.
    pub fn from_parts(frame_type: u32, payload: Bytes) -> Result<Self> {
        match frame_type {
            FRAME_TYPE_RESPONSE => Ok(Frame::Response(payload)),
            FRAME_TYPE_ERROR => Ok(Frame::Error(payload)),
            FRAME_TYPE_MESSAGE => Ok(Frame::Message(MessageFrame::decode(payload)?)),
            other => Err(WireError::UnknownFrameType(other)),
        }
    }

    pub fn decode(input: Bytes) -> Result<Self> {
        if input.len() < PRELUDE_LEN {
            return Err(WireError::Incomplete);
        }
        let mut prelude = input.slice(0..PRELUDE_LEN);
        let size = prelude.get_u32();
        if size < 4 {
            return Err(WireError::MalformedLength(size));
        }
        let frame_type = prelude.get_u32();
        let payload_len = size as usize - 4;
        if input.len() < PRELUDE_LEN + payload_len {
            return Err(WireError::Incomplete);
        }
        Self::from_parts(
            frame_type,
            input.slice(PRELUDE_LEN..PRELUDE_LEN + payload_len),
        )
    }

    pub fn encode(&self) -> Bytes {
        let (frame_type, payload) = match self {
            Frame::Response(body) => (FRAME_TYPE_RESPONSE, body.clone()),
            Frame::Error(body) => (FRAME_TYPE_ERROR, body.clone()),
            Frame::Message(message) => (FRAME_TYPE_MESSAGE, message.encode()),
        };
        let mut buf = BytesMut::with_capacity(PRELUDE_LEN + payload.len());
        buf.put_u32(payload.len() as u32 + 4);
        buf.put_u32(frame_type);
        buf.extend_from_slice(&payload);
        buf.freeze()
    }

    pub fn is_heartbeat(&self) -> bool {
        matches!(self, Frame::Response(body) if body.as_ref() == HEARTBEAT)
    }

    pub fn is_response(&self, text: &[u8]) -> bool {
        matches!(self, Frame::Response(body) if body.as_ref() == text)
    }

    pub fn is_ok(&self) -> bool {
        self.is_response(b"OK")
    }

    pub fn is_message(&self) -> bool {
        matches!(self, Frame::Message(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Frame::Error(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(text: &[u8; 16]) -> MessageId {
        MessageId::from_bytes(*text)
    }

    #[test]
    fn commands_round_trip() {
        // decode(encode(command)) == command for every command type.
        let commands = vec![
            Command::Magic,
            Command::Identify {
                body: Bytes::from_static(b"{\"client_id\":\"c1\"}"),
            },
            Command::Sub {
                topic: "events".into(),
                channel: "archive".into(),
            },
            Command::Pub {
                topic: "events".into(),
                body: Bytes::from_static(b"hello"),
            },
            Command::Rdy(1),
            Command::Fin(id(b"0123456789abcdef")),
            Command::Req {
                id: id(b"0123456789abcdef"),
                delay_ms: 500,
            },
            Command::Nop,
            Command::Cls,
        ];
        for command in commands {
            let mut buf = BytesMut::from(command.encode().as_ref());
            let parsed = Command::parse(&mut buf).expect("parse").expect("complete");
            assert_eq!(parsed, command);
            assert!(buf.is_empty(), "parse must consume {command:?} fully");
        }
    }

    #[test]
    fn pub_encoding_matches_wire_layout() {
        let command = Command::Pub {
            topic: "t".into(),
            body: Bytes::from_static(b"hello"),
        };
        assert_eq!(command.encode().as_ref(), b"PUB t\n\x00\x00\x00\x05hello");
    }

    #[test]
    fn parse_reports_incomplete_input_as_none() {
        let mut buf = BytesMut::from(&b"PUB t\n\x00\x00\x00\x05he"[..]);
        let before = buf.clone();
        assert!(Command::parse(&mut buf).expect("parse").is_none());
        assert_eq!(buf, before, "incomplete parse must not consume");

        let mut buf = BytesMut::from(&b"RDY 1"[..]);
        assert!(Command::parse(&mut buf).expect("parse").is_none());

        let mut buf = BytesMut::from(&b"  V"[..]);
        assert!(Command::parse(&mut buf).expect("parse").is_none());
    }

    #[test]
    fn parse_rejects_unknown_verb() {
        let mut buf = BytesMut::from(&b"WAT\n"[..]);
        let err = Command::parse(&mut buf).expect_err("unknown verb");
        assert!(matches!(err, WireError::MalformedCommand(_)));
    }

    #[test]
    fn frames_round_trip() {
        // encode(decode(bytes)) == bytes for well-formed inbound frames.
        let frames = vec![
            Frame::ok(),
            Frame::heartbeat(),
            Frame::Error(Bytes::from_static(b"E_BAD_TOPIC")),
            Frame::Message(MessageFrame {
                timestamp: 1_700_000_000_000_000_000,
                attempts: 3,
                id: id(b"0123456789abcdef"),
                body: Bytes::from_static(b"payload"),
            }),
        ];
        for frame in frames {
            let encoded = frame.encode();
            let decoded = Frame::decode(encoded.clone()).expect("decode");
            assert_eq!(decoded, frame);
            assert_eq!(decoded.encode(), encoded);
        }
    }

    #[test]
    fn heartbeat_is_a_response_frame() {
        let frame = Frame::heartbeat();
        assert!(frame.is_heartbeat());
        assert!(frame.is_response(HEARTBEAT));
        assert!(!frame.is_ok());
        assert!(!frame.is_message());
        assert!(!frame.is_error());
    }

    #[test]
    fn decode_rejects_unknown_frame_type() {
        let mut buf = BytesMut::new();
        buf.put_u32(4);
        buf.put_u32(9);
        let err = Frame::decode(buf.freeze()).expect_err("unknown type");
        assert!(matches!(err, WireError::UnknownFrameType(9)));
    }

    #[test]
    fn decode_rejects_malformed_length() {
        let mut buf = BytesMut::new();
        buf.put_u32(2);
        buf.put_u32(0);
        let err = Frame::decode(buf.freeze()).expect_err("bad length");
        assert!(matches!(err, WireError::MalformedLength(2)));
    }

    #[test]
    fn decode_rejects_incomplete_frame() {
        let mut buf = BytesMut::new();
        buf.put_u32(10);
        buf.put_u32(FRAME_TYPE_RESPONSE);
        buf.extend_from_slice(b"OK");
        let err = Frame::decode(buf.freeze()).expect_err("incomplete");
        assert!(matches!(err, WireError::Incomplete));
    }

    #[test]
    fn decode_rejects_truncated_message_payload() {
        let mut buf = BytesMut::new();
        buf.put_u32(4 + 10);
        buf.put_u32(FRAME_TYPE_MESSAGE);
        buf.extend_from_slice(&[0u8; 10]);
        let err = Frame::decode(buf.freeze()).expect_err("truncated");
        assert!(matches!(err, WireError::TruncatedMessage));
    }
}
