// Broker address parsing and display.
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// Port an nsqd listens on when none is given.
pub const DEFAULT_PORT: u16 = 4150;

/// One broker endpoint. Equality and pool identity are by host and port.
///
/// ```
/// use nsq_client::BrokerAddress;
///
/// let addr: BrokerAddress = "mq1.internal".parse().expect("addr");
/// assert_eq!(addr.to_string(), "mq1.internal:4150");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BrokerAddress {
    host: String,
    port: u16,
}

impl BrokerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for BrokerAddress {
    type Err = ConfigError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ConfigError::InvalidAddress(input.into()));
        }
        match input.split_once(':') {
            None => Ok(Self::new(input, DEFAULT_PORT)),
            Some((host, port)) if !host.is_empty() => {
                let port = port
                    .parse()
                    .map_err(|_| ConfigError::InvalidAddress(input.into()))?;
                Ok(Self::new(host, port))
            }
            Some(_) => Err(ConfigError::InvalidAddress(input.into())),
        }
    }
}

/// Parses a comma-separated host list, defaulting ports to 4150.
pub fn parse_hosts(input: &str) -> Result<Vec<BrokerAddress>, ConfigError> {
    input
        .split(',')
        .filter(|part| !part.trim().is_empty())
        .map(str::parse)
        .collect()
}
