//! Decomposition of a set of register addresses into Modbus read requests.
//!
//! Bulk-eligible addresses are merged into maximal contiguous runs, everything
//! else is read one register at a time. The device's configuration block
//! (200-290) answers multi-register reads with an exception, so its
//! descriptors are flagged as ineligible and never attempted in bulk.

use crate::catalog::RegisterCatalog;
use crate::protocol::MAX_READ_QUANTITY;
use std::collections::BTreeSet;
use std::fmt;

/// A contiguous span of holding registers fetched with one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReadRange {
    pub start: u16,
    pub count: u16,
}

impl ReadRange {
    pub fn new(start: u16, count: u16) -> Self {
        Self { start, count }
    }

    pub fn single(address: u16) -> Self {
        Self::new(address, 1)
    }

    pub fn is_single(&self) -> bool {
        self.count == 1
    }

    /// One past the last address.
    pub fn end(&self) -> u32 {
        u32::from(self.start) + u32::from(self.count)
    }

    pub fn contains(&self, address: u16) -> bool {
        address >= self.start && u32::from(address) < self.end()
    }

    pub fn addresses(&self) -> impl Iterator<Item = u16> {
        let start = self.start;
        (0..self.count).map(move |offset| start + offset)
    }
}

impl fmt::Display for ReadRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end())
    }
}

/// Plans the reads covering `addresses`.
///
/// Bulk ranges come first in ascending order, followed by the singleton
/// reads in ascending order. Duplicate addresses are ignored, addresses
/// without a descriptor are read as singletons. Runs longer than
/// [`MAX_READ_QUANTITY`] are split.
pub fn plan<I>(catalog: &RegisterCatalog, addresses: I) -> Vec<ReadRange>
where
    I: IntoIterator<Item = u16>,
{
    let (bulk, single): (BTreeSet<u16>, BTreeSet<u16>) = addresses
        .into_iter()
        .partition(|address| catalog.bulk_eligible(*address));

    let mut ranges: Vec<ReadRange> = Vec::new();
    for address in bulk {
        match ranges.last_mut() {
            Some(run) if run.end() == u32::from(address) && run.count < MAX_READ_QUANTITY => {
                run.count += 1;
            }
            _ => ranges.push(ReadRange::single(address)),
        }
    }
    ranges.extend(single.into_iter().map(ReadRange::single));
    ranges
}

/// Addresses a scan of `catalog` has to fetch, hidden low words included.
pub fn scan_addresses(catalog: &RegisterCatalog) -> BTreeSet<u16> {
    catalog
        .scan_targets()
        .flat_map(|descriptor| descriptor.word_addresses())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{AccessMode, RegisterDescriptor};
    use crate::protocol::Encoding;

    fn descriptor(address: u16, bulk_eligible: bool) -> RegisterDescriptor {
        RegisterDescriptor {
            address,
            name: format!("r{address}"),
            access: AccessMode::ReadOnly,
            encoding: Encoding::UnsignedWord { scale: 1.0 },
            bulk_eligible,
            sentinel: None,
            unit: String::new(),
            description: String::new(),
        }
    }

    #[test]
    fn two_tier_plan() {
        let catalog = RegisterCatalog::builtin().unwrap();
        let requested = (0..=22).chain(100..=199).chain([215, 209]);
        assert_eq!(
            plan(&catalog, requested),
            [
                ReadRange::new(0, 23),
                ReadRange::new(100, 100),
                ReadRange::single(209),
                ReadRange::single(215),
            ]
        );
    }

    #[test]
    fn gaps_break_runs() {
        let catalog = RegisterCatalog::builtin().unwrap();
        assert_eq!(
            plan(&catalog, [1, 2, 4, 3, 7, 2]),
            [ReadRange::new(1, 4), ReadRange::single(7)]
        );
    }

    #[test]
    fn unknown_addresses_are_singletons() {
        let catalog = RegisterCatalog::builtin().unwrap();
        assert_eq!(
            plan(&catalog, [50, 0, 51, 1]),
            [
                ReadRange::new(0, 2),
                ReadRange::single(50),
                ReadRange::single(51),
            ]
        );
    }

    #[test]
    fn long_runs_are_split() {
        let catalog =
            RegisterCatalog::new((0..300).map(|address| descriptor(address, true)).collect())
                .unwrap();
        assert_eq!(
            plan(&catalog, 0..300),
            [
                ReadRange::new(0, 125),
                ReadRange::new(125, 125),
                ReadRange::new(250, 50),
            ]
        );
    }

    #[test]
    fn full_scan_plan() {
        let catalog = RegisterCatalog::builtin().unwrap();
        let addresses = scan_addresses(&catalog);
        assert_eq!(addresses.len(), catalog.len());
        let ranges = plan(&catalog, addresses);
        assert_eq!(ranges.len(), 2 + 91);
        assert_eq!(ranges[0], ReadRange::new(0, 23));
        assert_eq!(ranges[1], ReadRange::new(100, 100));
        assert!(ranges[2..].iter().all(ReadRange::is_single));
    }

    #[test]
    fn empty() {
        let catalog = RegisterCatalog::new(vec![descriptor(1, false)]).unwrap();
        assert!(plan(&catalog, []).is_empty());
    }

    #[test]
    fn range_helpers() {
        let range = ReadRange::new(100, 100);
        assert_eq!(range.to_string(), "[100, 200)");
        assert!(range.contains(199));
        assert!(!range.contains(200));
        assert_eq!(range.addresses().last(), Some(199));
        assert_eq!(ReadRange::new(u16::MAX, 1).end(), 65536);
    }
}
