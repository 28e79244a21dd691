// A delivered message, borrowed by the handler for one invocation.
use bytes::Bytes;
use nsq_wire::{MessageFrame, MessageId};

/// One message delivered on a subscribed channel.
///
/// The id and body are immutable; `attempts` counts prior deliveries as
/// reported by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    id: MessageId,
    timestamp: i64,
    attempts: u16,
    body: Bytes,
}

impl Message {
    pub fn id(&self) -> MessageId {
        self.id
    }

    /// Broker-side enqueue time, nanoseconds since the epoch.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn attempts(&self) -> u16 {
        self.attempts
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

impl From<MessageFrame> for Message {
    fn from(frame: MessageFrame) -> Self {
        Self {
            id: frame.id,
            timestamp: frame.timestamp,
            attempts: frame.attempts,
            body: frame.body,
        }
    }
}
