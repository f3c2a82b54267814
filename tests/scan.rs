mod common;

use assert_matches::assert_matches;
use common::FakeHeatPump;
use mthermal_lib::{
    catalog::RegisterCatalog,
    protocol::DecodedValue,
    scan::{CancelFlag, RegisterError, ScanError, Scanner},
};
use tokio_modbus::ExceptionCode;

fn number(result: &mthermal_lib::scan::ScanResult, name: &str) -> f64 {
    result
        .get(name)
        .and_then(|entry| entry.value())
        .and_then(DecodedValue::as_number)
        .unwrap_or_else(|| panic!("{name} has no numeric value"))
}

#[test]
fn full_scan_decodes_every_register() {
    let catalog = RegisterCatalog::builtin().unwrap();
    let device = FakeHeatPump::new();
    device
        .set(2, 0x0816)
        .set(104, 65531)
        .set(118, 53)
        .set(120, 0xFF)
        .set(143, 1)
        .set(144, 2350)
        .set(205, 60)
        .set(215, 43);
    let client = device.client();

    let result = Scanner::new(&catalog, &client).scan_all();

    assert_eq!(result.len(), catalog.len() - 14);
    assert_eq!(result.error_count(), 0);
    assert!(!result.is_cancelled());
    assert_eq!(number(&result, "tw_in"), -5.0);
    assert!((number(&result, "odu_current") - 5.3).abs() < 1e-9);
    assert!((number(&result, "energy_consumption") - 678.86).abs() < 1e-9);
    assert_eq!(number(&result, "tas_upper_limit"), 30.0);
    assert_eq!(number(&result, "t4_dhw_max"), 43.0);
    assert_eq!(
        result.get("tbt1").unwrap().outcome,
        Ok(DecodedValue::Unavailable)
    );
    assert_eq!(
        result.get("t1s").unwrap().outcome,
        Ok(DecodedValue::Pair {
            low: Some(22.0),
            high: Some(8.0)
        })
    );
    assert_eq!(result.get("energy_consumption").unwrap().raw_words, [1, 2350]);
    assert!(result.get("energy_consumption_low").is_none());

    // two bulk reads, the configuration block one by one
    let reads = device.reads();
    assert_eq!(reads.len(), 2 + 91);
    assert_eq!(reads[0], (0, 23));
    assert_eq!(reads[1], (100, 100));
    assert!(reads[2..].iter().all(|(_, quantity)| *quantity == 1));

    // ordered by address
    let addresses: Vec<u16> = result.entries().iter().map(|entry| entry.address).collect();
    assert!(addresses.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn rejected_bulk_read_falls_back_to_single_reads() {
    let catalog = RegisterCatalog::builtin().unwrap();
    let device = FakeHeatPump::new();
    device.reject_bulk(100..=199).set(105, 35);
    let client = device.client();

    let result = Scanner::new(&catalog, &client).scan_all();

    let reads = device.reads();
    assert_eq!(reads[1], (100, 100));
    let singles = reads
        .iter()
        .filter(|(address, quantity)| (100..200).contains(address) && *quantity == 1)
        .count();
    assert_eq!(singles, 100);

    for address in 100..200 {
        let owner = catalog
            .scan_targets()
            .find(|descriptor| descriptor.word_addresses().contains(&address))
            .unwrap();
        let entry = result.get(&owner.name).unwrap();
        assert!(entry.outcome.is_ok(), "{}: {:?}", entry.name, entry.outcome);
    }
    assert_eq!(number(&result, "tw_out"), 35.0);
    assert_eq!(result.error_count(), 0);
}

#[test]
fn failing_registers_do_not_abort_the_scan() {
    let catalog = RegisterCatalog::builtin().unwrap();
    let device = FakeHeatPump::new();
    device.remove(150).remove(144).remove(230);
    let client = device.client();

    let result = Scanner::new(&catalog, &client).scan_all();

    assert_eq!(result.len(), catalog.len() - 14);
    assert_eq!(
        result.get("heating_power").unwrap().outcome,
        Err(RegisterError::Exception(ExceptionCode::IllegalDataAddress))
    );
    assert_eq!(
        result.get("energy_consumption").unwrap().outcome,
        Err(RegisterError::Exception(ExceptionCode::IllegalDataAddress))
    );
    assert_eq!(result.get("energy_consumption").unwrap().raw_words, [0]);
    assert_matches!(
        result.get("dtsh").unwrap().outcome,
        Err(RegisterError::Exception(_))
    );
    assert_eq!(result.error_count(), 3);
    assert_eq!(number(&result, "heating_cop"), 0.0);
}

#[test]
fn total_failure_is_a_result() {
    let catalog = RegisterCatalog::builtin().unwrap();
    let device = FakeHeatPump::new();
    device.time_out(usize::MAX);
    let client = device.client();

    let result = Scanner::new(&catalog, &client)
        .scan(&["tw_in", "t5s_di"])
        .unwrap();

    assert_eq!(result.len(), 2);
    assert_eq!(result.decoded_count(), 0);
    assert_matches!(
        result.get("tw_in").unwrap().outcome,
        Err(RegisterError::Transport(_))
    );
    // one read per register plus two retries each
    assert_eq!(device.reads().len(), 6);
}

#[test]
fn transient_timeouts_are_retried() {
    let catalog = RegisterCatalog::builtin().unwrap();
    let device = FakeHeatPump::new();
    device.set(107, 0xFFF6).time_out(2);
    let client = device.client();

    let result = Scanner::new(&catalog, &client).scan(&["t4"]).unwrap();

    assert_eq!(number(&result, "t4"), -10.0);
    assert_eq!(device.reads(), [(107, 1), (107, 1), (107, 1)]);
}

#[test]
fn partial_scan() {
    let catalog = RegisterCatalog::builtin().unwrap();
    let device = FakeHeatPump::new();
    let client = device.client();

    let result = Scanner::new(&catalog, &client)
        .scan(&["t5s_di", "tw_in", "tw_out", "power", "t4_dhw_max", "tw_in"])
        .unwrap();

    let names: Vec<&str> = result.entries().iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, ["power", "tw_in", "tw_out", "t4_dhw_max", "t5s_di"]);
    assert_eq!(
        device.reads(),
        [(0, 1), (104, 2), (215, 1), (220, 1)]
    );
}

#[test]
fn unknown_names_are_rejected_before_reading() {
    let catalog = RegisterCatalog::builtin().unwrap();
    let device = FakeHeatPump::new();
    let client = device.client();
    let scanner = Scanner::new(&catalog, &client);

    assert_eq!(
        scanner.scan(&["tw_in", "does_not_exist"]),
        Err(ScanError::UnknownRegister("does_not_exist".to_string()))
    );
    assert_matches!(
        scanner.scan(&["energy_consumption_low"]),
        Err(ScanError::HiddenRegister(_, owner)) if owner == "energy_consumption"
    );
    assert!(device.requests().is_empty());
}

#[test]
fn cancelled_before_start() {
    let catalog = RegisterCatalog::builtin().unwrap();
    let device = FakeHeatPump::new();
    let client = device.client();
    let cancel = CancelFlag::new();
    cancel.cancel();

    let result = Scanner::new(&catalog, &client)
        .with_cancel_flag(cancel)
        .scan_all();

    assert!(result.is_cancelled());
    assert_eq!(result.decoded_count(), 0);
    assert!(result
        .entries()
        .iter()
        .all(|entry| entry.outcome == Err(RegisterError::Cancelled)));
    assert!(device.requests().is_empty());
}

#[test]
fn cancelled_between_ranges() {
    let catalog = RegisterCatalog::builtin().unwrap();
    let device = FakeHeatPump::new();
    let cancel = CancelFlag::new();
    device.cancel_after(2, cancel.clone());
    let client = device.client();

    let result = Scanner::new(&catalog, &client)
        .with_cancel_flag(cancel)
        .scan_all();

    assert!(result.is_cancelled());
    assert_eq!(device.reads(), [(0, 23), (100, 100)]);
    assert!(result.get("tw_in").unwrap().outcome.is_ok());
    assert_eq!(
        result.get("t5s_di").unwrap().outcome,
        Err(RegisterError::Cancelled)
    );
    assert_eq!(result.error_count(), 91);
}
