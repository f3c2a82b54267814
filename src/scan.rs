//! Scan orchestration: plan the reads, fetch them, fall back to single
//! register reads when a bulk read is rejected, and decode.
//!
//! A scan never aborts because of a failing register. Every requested
//! register ends up in the [`ScanResult`], either with its decoded value or
//! with the [`RegisterError`] that prevented it.

use crate::{
    catalog::{RegisterCatalog, RegisterDescriptor},
    planner::{self, ReadRange},
    protocol::{self as proto, DecodedValue},
    tokio_common::Error,
    tokio_sync::Link,
    tokio_sync_safe_client::SafeClient,
};
use log::*;
use serde::ser::{SerializeMap, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Instant;
use tokio_modbus::client::sync::Context;

/// Cooperative cancellation of a running scan.
///
/// The scanner checks the flag before each request; a request already on
/// the wire runs to completion or timeout.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Why a scan could not start.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    #[error("unknown register `{0}`")]
    UnknownRegister(String),
    #[error("register `{0}` is the low word of a 32-bit value, scan `{1}` instead")]
    HiddenRegister(String, String),
}

/// Why a single register has no value.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum RegisterError {
    #[error("device exception: {0}")]
    Exception(tokio_modbus::ExceptionCode),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error(transparent)]
    Decode(proto::Error),
    #[error("scan cancelled before the register was read")]
    Cancelled,
}

impl From<&Error> for RegisterError {
    fn from(error: &Error) -> Self {
        match error.exception() {
            Some(code) => RegisterError::Exception(code),
            None => RegisterError::Transport(error.to_string()),
        }
    }
}

/// Outcome of one register.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanEntry {
    pub name: String,
    pub address: u16,
    /// The words that were read, `[high, low]` for 32-bit values. Words of a
    /// failed read are missing: a 32-bit value whose low word failed keeps
    /// only its high word, a register that could not be read has none.
    pub raw_words: Vec<u16>,
    pub outcome: Result<DecodedValue, RegisterError>,
}

impl ScanEntry {
    pub fn value(&self) -> Option<&DecodedValue> {
        self.outcome.as_ref().ok()
    }

    pub fn is_error(&self) -> bool {
        self.outcome.is_err()
    }
}

#[derive(serde::Serialize)]
struct EntryView<'a> {
    address: u16,
    raw: &'a [u16],
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<&'a DecodedValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// The registers of one scan, ordered by address.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanResult {
    entries: Vec<ScanEntry>,
    cancelled: bool,
}

impl ScanResult {
    pub fn entries(&self) -> &[ScanEntry] {
        &self.entries
    }

    pub fn get(&self, name: &str) -> Option<&ScanEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the scan was cancelled before every register was read.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Number of registers that decoded to a value or to `Unavailable`.
    pub fn decoded_count(&self) -> usize {
        self.entries.iter().filter(|entry| !entry.is_error()).count()
    }

    pub fn error_count(&self) -> usize {
        self.entries.len() - self.decoded_count()
    }
}

impl serde::Serialize for ScanResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for entry in &self.entries {
            let view = EntryView {
                address: entry.address,
                raw: &entry.raw_words,
                value: entry.value(),
                error: entry.outcome.as_ref().err().map(ToString::to_string),
            };
            map.serialize_entry(&entry.name, &view)?;
        }
        map.end()
    }
}

/// Runs scans of a catalog over a transport client.
pub struct Scanner<'a, L: Link = Context> {
    catalog: &'a RegisterCatalog,
    client: &'a SafeClient<L>,
    cancel: CancelFlag,
}

impl<'a, L: Link> Scanner<'a, L> {
    pub fn new(catalog: &'a RegisterCatalog, client: &'a SafeClient<L>) -> Self {
        Self {
            catalog,
            client,
            cancel: CancelFlag::default(),
        }
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Scans every register of the catalog.
    pub fn scan_all(&self) -> ScanResult {
        self.run(self.catalog.scan_targets().collect())
    }

    /// Scans the registers named in `names`.
    ///
    /// Names are checked before anything is sent to the device.
    pub fn scan<S: AsRef<str>>(&self, names: &[S]) -> Result<ScanResult, ScanError> {
        let mut targets = Vec::with_capacity(names.len());
        for name in names {
            let name = name.as_ref();
            let descriptor = self
                .catalog
                .by_name(name)
                .ok_or_else(|| ScanError::UnknownRegister(name.to_string()))?;
            if self.catalog.is_hidden(descriptor.address) {
                let owner = self
                    .catalog
                    .scan_targets()
                    .find(|d| d.paired_address() == Some(descriptor.address))
                    .map(|d| d.name.clone())
                    .unwrap_or_default();
                return Err(ScanError::HiddenRegister(name.to_string(), owner));
            }
            targets.push(descriptor);
        }
        targets.sort_by_key(|descriptor| descriptor.address);
        targets.dedup_by_key(|descriptor| descriptor.address);
        Ok(self.run(targets))
    }

    fn run(&self, targets: Vec<&RegisterDescriptor>) -> ScanResult {
        let started = Instant::now();
        let addresses: BTreeSet<u16> = targets
            .iter()
            .flat_map(|descriptor| descriptor.word_addresses())
            .collect();
        let ranges = planner::plan(self.catalog, addresses);
        debug!(
            "Scanning {} register(s) with {} read(s)",
            targets.len(),
            ranges.len()
        );

        let mut words = BTreeMap::new();
        let mut cancelled = false;
        for range in ranges {
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            if !self.fetch(range, &mut words) {
                cancelled = true;
                break;
            }
        }

        let entries: Vec<ScanEntry> = targets
            .into_iter()
            .map(|descriptor| assemble(descriptor, &words))
            .collect();
        let result = ScanResult { entries, cancelled };
        if cancelled {
            warn!("Scan cancelled after {:?}", started.elapsed());
        }
        info!(
            "Scan of {} register(s) finished in {:?}: {} decoded, {} failed",
            result.len(),
            started.elapsed(),
            result.decoded_count(),
            result.error_count()
        );
        result
    }

    /// Reads `range` into `words`, falling back to single reads when a bulk
    /// read fails. Returns `false` if cancelled during the fallback.
    fn fetch(
        &self,
        range: ReadRange,
        words: &mut BTreeMap<u16, Result<u16, RegisterError>>,
    ) -> bool {
        match self.client.read_holding(range) {
            Ok(values) => {
                words.extend(range.addresses().zip(values.into_iter().map(Ok)));
            }
            Err(error) if !range.is_single() => {
                warn!("Bulk read of {range} failed: {error}, reading registers one by one");
                for address in range.addresses() {
                    if self.cancel.is_cancelled() {
                        return false;
                    }
                    words.insert(address, self.read_single(address));
                }
            }
            Err(error) => {
                warn!("Read of register {} failed: {error}", range.start);
                words.insert(range.start, Err(RegisterError::from(&error)));
            }
        }
        true
    }

    fn read_single(&self, address: u16) -> Result<u16, RegisterError> {
        match self.client.read_holding(ReadRange::single(address)) {
            Ok(values) => Ok(values[0]),
            Err(error) => {
                warn!("Read of register {address} failed: {error}");
                Err(RegisterError::from(&error))
            }
        }
    }
}

fn assemble(
    descriptor: &RegisterDescriptor,
    words: &BTreeMap<u16, Result<u16, RegisterError>>,
) -> ScanEntry {
    let mut raw_words = Vec::with_capacity(descriptor.encoding.word_count());
    let mut failure = None;
    for address in descriptor.word_addresses() {
        match words.get(&address) {
            Some(Ok(word)) => raw_words.push(*word),
            Some(Err(error)) => {
                failure.get_or_insert_with(|| error.clone());
            }
            None => {
                failure.get_or_insert(RegisterError::Cancelled);
            }
        }
    }
    let outcome = match failure {
        Some(error) => Err(error),
        None => proto::decode(descriptor, &raw_words).map_err(RegisterError::Decode),
    };
    if let Ok(value) = &outcome {
        trace!("{} ({}) = {value}", descriptor.name, descriptor.address);
    }
    ScanEntry {
        name: descriptor.name.clone(),
        address: descriptor.address,
        raw_words,
        outcome,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assemble_composite() {
        let catalog = RegisterCatalog::builtin().unwrap();
        let descriptor = catalog.by_name("energy_consumption").unwrap();
        let words = BTreeMap::from([(143, Ok(1)), (144, Ok(2350))]);
        let entry = assemble(descriptor, &words);
        assert_eq!(entry.raw_words, [1, 2350]);
        let value = entry.value().and_then(DecodedValue::as_number).unwrap();
        assert!((value - 678.86).abs() < 1e-9);
    }

    #[test]
    fn assemble_failures() {
        let catalog = RegisterCatalog::builtin().unwrap();
        let descriptor = catalog.by_name("energy_consumption").unwrap();

        let words = BTreeMap::from([
            (143, Ok(1)),
            (144, Err(RegisterError::Transport("timeout".to_string()))),
        ]);
        let entry = assemble(descriptor, &words);
        assert_eq!(entry.raw_words, [1]);
        assert_eq!(
            entry.outcome,
            Err(RegisterError::Transport("timeout".to_string()))
        );

        let entry = assemble(descriptor, &BTreeMap::new());
        assert_eq!(entry.outcome, Err(RegisterError::Cancelled));
    }

    #[test]
    fn serialize_result() {
        let result = ScanResult {
            entries: vec![
                ScanEntry {
                    name: "tw_in".to_string(),
                    address: 104,
                    raw_words: vec![0xFFFB],
                    outcome: Ok(DecodedValue::Number(-5.0)),
                },
                ScanEntry {
                    name: "t5s_di".to_string(),
                    address: 220,
                    raw_words: vec![],
                    outcome: Err(RegisterError::Exception(
                        tokio_modbus::ExceptionCode::IllegalDataAddress,
                    )),
                },
            ],
            cancelled: false,
        };
        let yaml = serde_yaml::to_string(&result).unwrap();
        assert!(yaml.contains("tw_in:"));
        assert!(yaml.contains("value: -5.0"));
        assert!(yaml.contains("device exception"));
        assert_eq!(result.decoded_count(), 1);
        assert_eq!(result.error_count(), 1);
    }

    #[test]
    fn cancel_flag() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(!flag.is_cancelled());
        clone.cancel();
        assert!(flag.is_cancelled());
    }
}
