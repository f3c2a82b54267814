//! Stateless blocking register access over a `tokio-modbus` sync context.
//!
//! Every function issues exactly one Modbus transaction: `0x03` read holding
//! registers, `0x06` write single register or `0x10` write multiple
//! registers. Splitting, retrying and serialization are left to the callers.
//!
//! # Example
//!
//! ```no_run
//! use mthermal_lib::{planner::ReadRange, tokio_sync::MThermal};
//! use std::time::Duration;
//! use tokio_modbus::Slave;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let socket_addr = "192.168.1.40:8899".parse()?;
//!     let mut ctx = tokio_modbus::client::sync::tcp::connect_slave(socket_addr, Slave(2))?;
//!     ctx.set_timeout(Some(Duration::from_secs(5)));
//!
//!     let words = MThermal::read_holding(&mut ctx, ReadRange::new(100, 16))?;
//!     println!("Operating parameters: {words:?}");
//!
//!     Ok(())
//! }
//! ```

use crate::{
    planner::ReadRange,
    tokio_common::{Error, Result},
};
use log::*;
use tokio_modbus::{
    prelude::{SyncReader, SyncWriter},
    slave::SlaveContext,
};

/// One exclusive request/response channel to a Modbus slave.
///
/// Implemented for the `tokio-modbus` sync [`Context`](tokio_modbus::client::sync::Context);
/// tests substitute an in-memory device.
pub trait Link {
    fn read_holding_registers(
        &mut self,
        address: u16,
        quantity: u16,
    ) -> tokio_modbus::Result<Vec<u16>>;

    fn write_single_register(&mut self, address: u16, word: u16) -> tokio_modbus::Result<()>;

    fn write_multiple_registers(
        &mut self,
        address: u16,
        words: &[u16],
    ) -> tokio_modbus::Result<()>;

    fn set_slave(&mut self, slave: u8);
}

impl Link for tokio_modbus::client::sync::Context {
    fn read_holding_registers(
        &mut self,
        address: u16,
        quantity: u16,
    ) -> tokio_modbus::Result<Vec<u16>> {
        SyncReader::read_holding_registers(self, address, quantity)
    }

    fn write_single_register(&mut self, address: u16, word: u16) -> tokio_modbus::Result<()> {
        SyncWriter::write_single_register(self, address, word)
    }

    fn write_multiple_registers(
        &mut self,
        address: u16,
        words: &[u16],
    ) -> tokio_modbus::Result<()> {
        SyncWriter::write_multiple_registers(self, address, words)
    }

    fn set_slave(&mut self, slave: u8) {
        SlaveContext::set_slave(self, tokio_modbus::Slave(slave));
    }
}

/// Register level operations of the M-Thermal heat pump.
#[derive(Debug)]
pub struct MThermal;

impl MThermal {
    /// Helper function to map tokio result to our result.
    fn map_tokio_result<T>(result: tokio_modbus::Result<T>) -> Result<T> {
        match result {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(err)) => Err(err.into()), // Modbus exception
            Err(err) => Err(err.into()),     // IO error
        }
    }

    /// Reads `range` with one `0x03` request.
    ///
    /// # Errors
    ///
    /// * [`Error::TokioExceptionError`] if the device rejects the request,
    ///   e.g. a multi-register read of the configuration block.
    /// * [`Error::TokioError`] on timeouts and other transport failures.
    /// * [`Error::UnexpectedResponseLength`] if the response does not carry
    ///   `range.count` registers.
    pub fn read_holding<L: Link + ?Sized>(link: &mut L, range: ReadRange) -> Result<Vec<u16>> {
        debug!("Read holding registers {range}");
        let words = Self::map_tokio_result(link.read_holding_registers(range.start, range.count))?;
        if words.len() != usize::from(range.count) {
            return Err(Error::UnexpectedResponseLength {
                expected: usize::from(range.count),
                got: words.len(),
            });
        }
        trace!("Registers {range}: {words:04X?}");
        Ok(words)
    }

    /// Writes one register with a `0x06` request.
    pub fn write_single<L: Link + ?Sized>(link: &mut L, address: u16, word: u16) -> Result<()> {
        debug!("Write single register {address} = {word:#06X}");
        Self::map_tokio_result(link.write_single_register(address, word))
    }

    /// Writes consecutive registers starting at `address` with a `0x10` request.
    pub fn write_multiple<L: Link + ?Sized>(
        link: &mut L,
        address: u16,
        words: &[u16],
    ) -> Result<()> {
        debug!("Write {} registers at {address} = {words:04X?}", words.len());
        Self::map_tokio_result(link.write_multiple_registers(address, words))
    }
}
