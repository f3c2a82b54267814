//! Thread-safe blocking transport client for the M-Thermal heat pump.
//!
//! The gateway forwards every request onto one half-duplex RS-485 bus, so a
//! [`SafeClient`] owns exactly one connection behind a mutex. Clones share
//! that connection: callers may run on different threads, the requests
//! reach the wire strictly one after the other.
//!
//! Transport failures (timeouts, resets, malformed responses) are retried a
//! bounded number of times on a fresh connection. Modbus exceptions are
//! returned immediately.
//!
//! ## Example
//!
//! ```no_run
//! use mthermal_lib::{
//!     config::TransportConfig, planner::ReadRange, tokio_sync_safe_client::SafeClient,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TransportConfig::tcp("192.168.1.40", 8899, 2);
//!     let client = SafeClient::connect(&config);
//!
//!     let words = client.read_holding(ReadRange::new(0, 23))?;
//!     println!("Control registers: {words:?}");
//!
//!     Ok(())
//! }
//! ```

use crate::{
    config::TransportConfig,
    planner::ReadRange,
    tokio_common::Result,
    tokio_sync::{Link, MThermal},
};
use log::*;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio_modbus::client::sync::Context;

type Connector<L> = Box<dyn FnMut() -> Result<L> + Send>;

struct Connection<L> {
    link: Option<L>,
    connector: Connector<L>,
    last_request: Option<Instant>,
}

impl<L> Connection<L> {
    /// The open link, connecting first if there is none.
    fn link(&mut self) -> Result<&mut L> {
        let link = match self.link.take() {
            Some(link) => link,
            None => {
                debug!("Opening connection");
                (self.connector)()?
            }
        };
        Ok(self.link.insert(link))
    }

    /// Waits until `delay` has passed since the previous request.
    fn pause(&self, delay: Duration) {
        if let Some(last_request) = self.last_request {
            let elapsed = last_request.elapsed();
            if elapsed < delay {
                std::thread::sleep(delay - elapsed);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct RetryPolicy {
    retries: u8,
    retry_delay: Duration,
    delay: Duration,
}

impl From<&TransportConfig> for RetryPolicy {
    fn from(config: &TransportConfig) -> Self {
        Self {
            retries: config.retries,
            retry_delay: config.retry_delay,
            delay: config.effective_delay(),
        }
    }
}

/// Serialized, retrying access to one Modbus slave.
pub struct SafeClient<L: Link = Context> {
    connection: Arc<Mutex<Connection<L>>>,
    policy: RetryPolicy,
}

impl<L: Link> Clone for SafeClient<L> {
    fn clone(&self) -> Self {
        Self {
            connection: Arc::clone(&self.connection),
            policy: self.policy,
        }
    }
}

impl<L: Link> std::fmt::Debug for SafeClient<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafeClient")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl SafeClient<Context> {
    /// Creates a client for the endpoint of `config`.
    ///
    /// No connection is opened until the first request.
    pub fn connect(config: &TransportConfig) -> Self {
        let endpoint = config.endpoint.clone();
        let slave = tokio_modbus::Slave(config.slave);
        let timeout = config.effective_timeout();
        Self::with_connector(
            move || {
                info!("Connecting to {endpoint}, slave {}", slave.0);
                open_context(&endpoint, slave, timeout).map_err(|source| {
                    crate::tokio_common::Error::Connect {
                        endpoint: endpoint.to_string(),
                        source,
                    }
                })
            },
            config,
        )
    }
}

fn open_context(
    endpoint: &crate::config::Endpoint,
    slave: tokio_modbus::Slave,
    timeout: Duration,
) -> std::io::Result<Context> {
    use crate::config::Endpoint;

    let mut ctx = match endpoint {
        #[cfg(feature = "tokio-tcp-sync")]
        Endpoint::Tcp { host, port } => {
            use std::net::ToSocketAddrs;
            let socket_addr = (host.as_str(), *port)
                .to_socket_addrs()?
                .next()
                .ok_or_else(|| {
                    std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!("{host} does not resolve to an address"),
                    )
                })?;
            tokio_modbus::client::sync::tcp::connect_slave_with_timeout(
                socket_addr,
                slave,
                Some(timeout),
            )?
        }
        #[cfg(feature = "tokio-rtu-sync")]
        Endpoint::Rtu { device, baud_rate } => tokio_modbus::client::sync::rtu::connect_slave(
            &crate::tokio_common::serial_port_builder(device, *baud_rate),
            slave,
        )?,
        #[allow(unreachable_patterns)]
        other => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                format!("{other} needs a transport feature that is not enabled"),
            ))
        }
    };
    ctx.set_timeout(Some(timeout));
    Ok(ctx)
}

impl<L: Link> SafeClient<L> {
    /// Creates a client that opens its connections with `connector`, using
    /// the retry policy and inter-request delay of `config`.
    pub fn with_connector<F>(connector: F, config: &TransportConfig) -> Self
    where
        F: FnMut() -> Result<L> + Send + 'static,
    {
        Self {
            connection: Arc::new(Mutex::new(Connection {
                link: None,
                connector: Box::new(connector),
                last_request: None,
            })),
            policy: RetryPolicy::from(config),
        }
    }

    /// Whether a connection is currently open.
    pub fn is_connected(&self) -> bool {
        self.lock().link.is_some()
    }

    /// Closes the connection, the next request opens a new one.
    pub fn disconnect(&self) {
        self.lock().link = None;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection<L>> {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `operation` on the link, holding the connection for all attempts.
    fn execute<T, F>(&self, retries: u8, mut operation: F) -> Result<T>
    where
        F: FnMut(&mut L) -> Result<T>,
    {
        let mut connection = self.lock();
        let mut attempt = 0;
        loop {
            connection.pause(self.policy.delay);
            let result = connection.link().and_then(&mut operation);
            connection.last_request = Some(Instant::now());
            match result {
                Ok(value) => return Ok(value),
                Err(error) if error.is_retryable() => {
                    connection.link = None;
                    if attempt >= retries {
                        return Err(error);
                    }
                    attempt += 1;
                    warn!("Request failed: {error}, retry {attempt} of {retries}");
                    std::thread::sleep(self.policy.retry_delay);
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Reads `range` with a single `0x03` request.
    pub fn read_holding(&self, range: ReadRange) -> Result<Vec<u16>> {
        self.execute(self.policy.retries, |link| {
            MThermal::read_holding(link, range)
        })
    }

    /// Writes one register with `0x06`.
    pub fn write_single(&self, address: u16, word: u16) -> Result<()> {
        self.execute(self.policy.retries, |link| {
            MThermal::write_single(link, address, word)
        })
    }

    /// Writes consecutive registers with `0x10`.
    pub fn write_multiple(&self, address: u16, words: &[u16]) -> Result<()> {
        self.execute(self.policy.retries, |link| {
            MThermal::write_multiple(link, address, words)
        })
    }

    /// Reads one register and writes back `modify(current)` without letting
    /// another request in between. Returns the previous and the written word.
    ///
    /// A transport failure repeats both steps. An error from `modify` ends
    /// the operation before anything is written.
    pub fn read_modify_write<F>(&self, address: u16, mut modify: F) -> Result<(u16, u16)>
    where
        F: FnMut(u16) -> Result<u16>,
    {
        let delay = self.policy.delay;
        self.execute(self.policy.retries, |link| {
            let current = MThermal::read_holding(link, ReadRange::single(address))?[0];
            let word = modify(current)?;
            std::thread::sleep(delay);
            MThermal::write_single(link, address, word)?;
            Ok((current, word))
        })
    }

    /// Reads `address` from every slave id in `slaves`, without retries.
    ///
    /// The link is switched back to its configured slave afterwards.
    pub fn probe(
        &self,
        slaves: impl IntoIterator<Item = u8>,
        address: u16,
        configured: u8,
    ) -> Vec<(u8, Result<u16>)> {
        let results = slaves
            .into_iter()
            .map(|slave| {
                let result = self.execute(0, |link| {
                    link.set_slave(slave);
                    MThermal::read_holding(link, ReadRange::single(address))
                        .map(|words| words[0])
                });
                debug!("Probe of slave {slave}: {result:?}");
                (slave, result)
            })
            .collect();
        if let Some(link) = self.lock().link.as_mut() {
            link.set_slave(configured);
        }
        results
    }
}
