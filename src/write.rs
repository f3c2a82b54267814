//! Writing physical values to named registers.
//!
//! A write resolves the register, encodes the value and sends it with
//! `0x06` (one word) or `0x10` (32-bit values). A packed register written
//! with only one half given is read first so the other half is preserved.
//! Afterwards the register is optionally read back; a different content is
//! reported in the [`Ack`] and is not an error, the heat pump clamps values
//! to its allowed bands.

use crate::{
    catalog::{RegisterCatalog, RegisterDescriptor},
    planner::ReadRange,
    protocol::{self as proto, WriteValue},
    tokio_common,
    tokio_sync::Link,
    tokio_sync_safe_client::SafeClient,
};
use log::*;
use tokio_modbus::client::sync::Context;

#[derive(thiserror::Error, Debug)]
pub enum WriteError {
    #[error("unknown register `{0}`")]
    UnknownRegister(String),
    #[error("register `{0}` is read-only")]
    NotWritable(String),
    #[error(transparent)]
    EncodingRange(proto::Error),
    #[error("cannot write register `{name}`")]
    Transport {
        name: String,
        #[source]
        source: tokio_common::Error,
    },
}

/// Result of reading a register back after writing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// No read-back was requested.
    Skipped,
    /// The register holds the written words.
    Confirmed,
    /// The register holds different words, usually because the device
    /// clamped the value.
    Mismatch { expected: Vec<u16>, actual: Vec<u16> },
    /// The read-back itself failed; the write was acknowledged.
    ReadBackFailed(String),
}

/// Acknowledgement of a write accepted by the device.
#[derive(Debug, Clone, PartialEq)]
pub struct Ack {
    pub name: String,
    pub address: u16,
    /// The written words in ascending address order.
    pub words: Vec<u16>,
    pub verification: Verification,
}

impl Ack {
    pub fn is_confirmed(&self) -> bool {
        self.verification == Verification::Confirmed
    }
}

/// Writes registers of a catalog through a transport client.
pub struct Writer<'a, L: Link = Context> {
    catalog: &'a RegisterCatalog,
    client: &'a SafeClient<L>,
    verify: bool,
}

impl<'a, L: Link> Writer<'a, L> {
    pub fn new(catalog: &'a RegisterCatalog, client: &'a SafeClient<L>) -> Self {
        Self {
            catalog,
            client,
            verify: true,
        }
    }

    /// Enables or disables the read-back after each write.
    pub fn verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// Writes `value` to the register `name`.
    pub fn write(&self, name: &str, value: impl Into<WriteValue>) -> Result<Ack, WriteError> {
        let value = value.into();
        let descriptor = self
            .catalog
            .by_name(name)
            .ok_or_else(|| WriteError::UnknownRegister(name.to_string()))?;
        if !descriptor.access.is_writable() {
            return Err(WriteError::NotWritable(name.to_string()));
        }

        let (start, words) = if value.needs_current() {
            (descriptor.address, self.write_merged(descriptor, &value)?)
        } else {
            let encoded = proto::encode(descriptor, &value, None)
                .map_err(|error| encoding_error(name, error))?;
            let mut addressed: Vec<(u16, u16)> =
                descriptor.word_addresses().into_iter().zip(encoded).collect();
            addressed.sort_by_key(|(address, _)| *address);
            let start = addressed[0].0;
            let words: Vec<u16> = addressed.into_iter().map(|(_, word)| word).collect();

            info!("Writing {value} to {name} ({start}): {words:04X?}");
            let sent = if let [word] = words[..] {
                self.client.write_single(start, word)
            } else {
                self.client.write_multiple(start, &words)
            };
            sent.map_err(|source| self.transport_error(descriptor, source))?;
            (start, words)
        };

        let verification = if self.verify {
            self.read_back(name, start, &words)
        } else {
            Verification::Skipped
        };
        Ok(Ack {
            name: name.to_string(),
            address: start,
            words,
            verification,
        })
    }

    /// Merges the given halves of a packed register into its current
    /// content, holding the bus from the read until the write.
    fn write_merged(
        &self,
        descriptor: &RegisterDescriptor,
        value: &WriteValue,
    ) -> Result<Vec<u16>, WriteError> {
        let address = descriptor.address;
        let (current, word) = self
            .client
            .read_modify_write(address, |current| {
                let word = proto::encode(descriptor, value, Some(current))?
                    .first()
                    .copied()
                    .ok_or(proto::Error::WordCount {
                        address,
                        expected: 1,
                        got: 0,
                    })?;
                Ok(word)
            })
            .map_err(|error| match error {
                tokio_common::Error::ProtocolError(error) => encoding_error(&descriptor.name, error),
                source => self.transport_error(descriptor, source),
            })?;
        info!(
            "Writing {value} to {} ({address}): {current:#06X} -> {word:#06X}",
            descriptor.name
        );
        Ok(vec![word])
    }

    fn read_back(&self, name: &str, start: u16, expected: &[u16]) -> Verification {
        // `expected` never exceeds two words.
        let range = ReadRange::new(start, expected.len() as u16);
        match self.client.read_holding(range) {
            Ok(actual) if actual == expected => Verification::Confirmed,
            Ok(actual) => {
                warn!(
                    "Register {name} holds {actual:04X?} after writing {expected:04X?}, the device may have clamped the value"
                );
                Verification::Mismatch {
                    expected: expected.to_vec(),
                    actual,
                }
            }
            Err(error) => {
                warn!("Read-back of {name} failed: {error}");
                Verification::ReadBackFailed(error.to_string())
            }
        }
    }

    fn transport_error(
        &self,
        descriptor: &RegisterDescriptor,
        source: tokio_common::Error,
    ) -> WriteError {
        WriteError::Transport {
            name: descriptor.name.clone(),
            source,
        }
    }
}

fn encoding_error(name: &str, error: proto::Error) -> WriteError {
    match error {
        proto::Error::NotWritable(_) => WriteError::NotWritable(name.to_string()),
        other => WriteError::EncodingRange(other),
    }
}
