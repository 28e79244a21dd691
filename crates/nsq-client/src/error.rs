// Client error types, one distinct kind per failure class.
use nsq_wire::{Frame, WireError};

use crate::addr::BrokerAddress;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("socket error on {addr}: {source}")]
    Socket {
        addr: BrokerAddress,
        #[source]
        source: std::io::Error,
    },
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("publish required {required} confirmations, achieved {achieved}: {errors:?}")]
    Publish {
        required: usize,
        achieved: usize,
        errors: Vec<String>,
    },
    #[error("lookup failed: {0}")]
    Lookup(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(thiserror::Error, Debug)]
pub enum ProtocolError {
    #[error("unexpected frame: {frame:?}")]
    UnexpectedFrame { frame: Frame },
    #[error("broker reported: {0}")]
    Broker(String),
    #[error(transparent)]
    Wire(#[from] WireError),
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("cannot achieve desired consistency with {nodes} nodes (required {required})")]
    UnachievableConsistency { required: usize, nodes: usize },
    #[error("no lookup service configured; subscribing requires one")]
    MissingLookup,
    #[error("no publish targets configured; call publish_to first")]
    MissingPublishTargets,
    #[error("invalid topic or channel name: {name:?}")]
    InvalidName { name: String },
    #[error("invalid broker address: {0:?}")]
    InvalidAddress(String),
    #[error("identify body is not valid JSON: {0}")]
    InvalidIdentify(#[from] serde_json::Error),
}

impl From<WireError> for Error {
    fn from(err: WireError) -> Self {
        Error::Protocol(ProtocolError::Wire(err))
    }
}
