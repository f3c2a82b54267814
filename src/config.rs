//! Transport settings and the YAML configuration file.
//!
//! ```yaml
//! modbus:
//!   endpoint:
//!     tcp:
//!       host: 192.168.1.40
//!       port: 8899
//!   slave: 2
//!   timeout: 5s
//!   retries: 2
//!   delay: 50ms
//! catalog: /etc/mthermal/registers.yml
//! ```

use crate::protocol::{self as proto, GATEWAY_PORT, LINK_BAUD_RATE, MAX_READ_QUANTITY};
use log::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not read the configuration file {1:?}")]
    Read(#[source] std::io::Error, PathBuf),
    #[error("could not parse the configuration file {1:?}")]
    Parse(#[source] serde_yaml::Error, PathBuf),
}

fn default_port() -> u16 {
    GATEWAY_PORT
}

fn default_baud_rate() -> u32 {
    LINK_BAUD_RATE
}

/// Where the heat pump is reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    /// Modbus-TCP to RTU gateway.
    Tcp {
        host: String,
        #[serde(default = "default_port")]
        port: u16,
    },
    /// RS-485 adapter attached to this host.
    Rtu {
        device: String,
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
    },
}

impl Endpoint {
    /// Baud rate of the serial bus behind the endpoint.
    pub fn baud_rate(&self) -> u32 {
        match self {
            Endpoint::Tcp { .. } => LINK_BAUD_RATE,
            Endpoint::Rtu { baud_rate, .. } => *baud_rate,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp { host, port } => write!(f, "{host}:{port}"),
            Endpoint::Rtu { device, baud_rate } => write!(f, "{device}@{baud_rate}"),
        }
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Endpoint::Tcp {
            host: "127.0.0.1".to_string(),
            port: GATEWAY_PORT,
        }
    }
}

/// Connection and retry policy of the transport client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    #[serde(with = "serde_yaml::with::singleton_map")]
    pub endpoint: Endpoint,
    pub slave: u8,
    /// Timeout of one request.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Additional attempts after a transport failure.
    pub retries: u8,
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
    /// Minimum pause between two requests on the bus.
    #[serde(with = "humantime_serde")]
    pub delay: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            slave: proto::FACTORY_DEFAULT_SLAVE,
            timeout: Duration::from_secs(5),
            retries: 2,
            retry_delay: Duration::from_millis(100),
            delay: Duration::from_millis(50),
        }
    }
}

impl TransportConfig {
    pub fn tcp(host: impl Into<String>, port: u16, slave: u8) -> Self {
        Self {
            endpoint: Endpoint::Tcp {
                host: host.into(),
                port,
            },
            slave,
            ..Self::default()
        }
    }

    /// The configured timeout, raised to the wire time of a maximal read on
    /// the serial bus when set lower.
    pub fn effective_timeout(&self) -> Duration {
        let minimum = proto::read_round_trip_time(MAX_READ_QUANTITY, self.endpoint.baud_rate());
        if self.timeout < minimum {
            warn!(
                "Timeout of {:?} is below the {minimum:?} a full read needs at {} baud. Using minimum.",
                self.timeout,
                self.endpoint.baud_rate()
            );
            minimum
        } else {
            self.timeout
        }
    }

    /// The configured inter-request delay, never below the RTU inter-frame gap.
    pub fn effective_delay(&self) -> Duration {
        let minimum = proto::minimum_inter_frame_delay(self.endpoint.baud_rate());
        if self.delay < minimum {
            warn!(
                "Delay of {:?} is below the inter-frame minimum of {minimum:?}. Using minimum.",
                self.delay
            );
            minimum
        } else {
            self.delay
        }
    }
}

/// Content of the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub modbus: TransportConfig,
    /// Register table replacing the built-in catalog.
    pub catalog: Option<PathBuf>,
}

impl Config {
    pub const DEFAULT_CONFIG_FILE: &'static str = "mthermal.yml";

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let file =
            std::fs::File::open(path).map_err(|e| ConfigError::Read(e, path.to_path_buf()))?;
        serde_yaml::from_reader(file).map_err(|e| ConfigError::Parse(e, path.to_path_buf()))
    }

    /// Loads `path` if it exists, the defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            debug!("No configuration file at {path:?}, using defaults");
            Ok(Self::default())
        }
    }
}
