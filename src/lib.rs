//! A library for reading and writing the holding registers of Midea M-Thermal
//! heat pumps via Modbus.
//!
//! The heat pump is usually reached through a Modbus-TCP-to-RTU gateway that
//! forwards every request onto a 9600 baud RS-485 bus. The crate is layered
//! accordingly:
//!
//! 1.  **Register model**: the [`catalog`] describes every register (address,
//!     access, encoding, bulk eligibility, sentinel), [`protocol`] decodes raw
//!     words into physical values and encodes them back.
//!
//! 2.  **Transport**: [`tokio_sync`] issues single Modbus transactions over a
//!     `tokio-modbus` sync context, [`tokio_sync_safe_client::SafeClient`]
//!     serializes all callers onto one connection, with timeouts, bounded
//!     retries and reconnects.
//!
//! 3.  **Operations**: the [`planner`] groups registers into as few reads as
//!     the device accepts, [`scan::Scanner`] runs them with a per-register
//!     fallback, [`write::Writer`] encodes, writes and verifies values.
//!
//! ## Quick Start
//!
//! ```no_run
//! use mthermal_lib::{
//!     catalog::RegisterCatalog, config::TransportConfig, scan::Scanner,
//!     tokio_sync_safe_client::SafeClient, write::Writer,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let catalog = RegisterCatalog::builtin()?;
//!     let client = SafeClient::connect(&TransportConfig::tcp("192.168.1.40", 8899, 2));
//!
//!     let result = Scanner::new(&catalog, &client).scan(&["tw_in", "tw_out", "t4"])?;
//!     for entry in result.entries() {
//!         match &entry.outcome {
//!             Ok(value) => println!("{}: {value}", entry.name),
//!             Err(error) => println!("{}: {error}", entry.name),
//!         }
//!     }
//!
//!     let ack = Writer::new(&catalog, &client).write("t5s", 48.0)?;
//!     println!("DHW setpoint written: {:?}", ack.verification);
//!
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod planner;
pub mod protocol;

#[cfg(any(feature = "tokio-rtu-sync", feature = "tokio-tcp-sync"))]
pub mod tokio_common;

#[cfg_attr(
    docsrs,
    doc(cfg(any(feature = "tokio-rtu-sync", feature = "tokio-tcp-sync")))
)]
#[cfg(any(feature = "tokio-rtu-sync", feature = "tokio-tcp-sync"))]
pub mod tokio_sync;

#[cfg_attr(
    docsrs,
    doc(cfg(any(feature = "tokio-rtu-sync", feature = "tokio-tcp-sync")))
)]
#[cfg(any(feature = "tokio-rtu-sync", feature = "tokio-tcp-sync"))]
pub mod tokio_sync_safe_client;

#[cfg_attr(
    docsrs,
    doc(cfg(any(feature = "tokio-rtu-sync", feature = "tokio-tcp-sync")))
)]
#[cfg(any(feature = "tokio-rtu-sync", feature = "tokio-tcp-sync"))]
pub mod scan;

#[cfg_attr(
    docsrs,
    doc(cfg(any(feature = "tokio-rtu-sync", feature = "tokio-tcp-sync")))
)]
#[cfg(any(feature = "tokio-rtu-sync", feature = "tokio-tcp-sync"))]
pub mod write;
