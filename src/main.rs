//! Midea M-Thermal heat pump CLI
//!
//! A command-line interface (CLI) application for reading and writing the
//! holding registers of Midea M-Thermal heat pumps, through a Modbus TCP to
//! RTU gateway or a direct RS-485 connection.
//!
//! This tool allows users to:
//! - List the register catalog, optionally filtered.
//! - Scan all or selected registers and print decoded values.
//! - Write setpoints and configuration values, with read-back verification.
//! - Run in a continuous daemon mode polling registers to the console.
//! - Probe which slave ids answer behind the gateway.
//!
//! The CLI leverages the `mthermal_lib` crate for the register catalog,
//! the transport client and the scan and write operations.

use anyhow::{bail, Context, Result};
use clap::Parser;
use dialoguer::Confirm;
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use mthermal_lib::{
    catalog::RegisterCatalog,
    config::Config,
    protocol::{DecodedValue, Encoding, WriteValue},
    scan::{ScanEntry, ScanResult, Scanner},
    tokio_sync_safe_client::SafeClient,
    write::{Verification, Writer},
};
use std::panic;

mod commandline;

use commandline::{CliCommands, OutputFormat};

fn logging_init(loglevel: LevelFilter) -> Result<LoggerHandle> {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .context("Cannot init logging")?
        .start()
        .context("Cannot start logging")?;

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown_file>", 0, 0));

        let cause_str = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            *s
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.as_str()
        } else {
            "<unknown_panic_cause>"
        };

        error!(
            target: "panic",
            "Thread '{}' panicked at '{}': {}:{} - Cause: {}",
            std::thread::current().name().unwrap_or("<unnamed>"),
            filename,
            line,
            column,
            cause_str
        );
    }));
    Ok(log_handle)
}

fn load_catalog(config: &Config) -> Result<RegisterCatalog> {
    match &config.catalog {
        Some(path) => {
            info!("Loading register catalog from {path:?}");
            RegisterCatalog::from_yaml_file(path)
                .with_context(|| format!("Cannot load register catalog {path:?}"))
        }
        None => RegisterCatalog::builtin().context("Built-in register catalog is inconsistent"),
    }
}

/// Whether the register has no documented meaning.
fn is_undocumented(entry: &ScanEntry) -> bool {
    entry.name.starts_with("unknown_") || entry.name.starts_with("reserved_")
}

/// Raw contents an undocumented register shows when it carries nothing.
const IDLE_WORDS: [u16; 5] = [0, 0x007F, 0x00FF, 0x7FFF, 0xFFFF];

/// Whether an undocumented register holds something worth a look.
fn is_notable(entry: &ScanEntry) -> bool {
    is_undocumented(entry)
        && entry
            .raw_words
            .iter()
            .any(|word| !IDLE_WORDS.contains(word))
}

fn format_value(catalog: &RegisterCatalog, entry: &ScanEntry) -> String {
    let unit = catalog
        .lookup(entry.address)
        .map(|descriptor| descriptor.unit.as_str())
        .unwrap_or_default();
    match &entry.outcome {
        Ok(DecodedValue::Unavailable) => "n/a".to_string(),
        Ok(value) if unit.is_empty() => value.to_string(),
        Ok(value) => format!("{value} {unit}"),
        Err(error) => format!("ERROR: {error}"),
    }
}

fn print_table(catalog: &RegisterCatalog, result: &ScanResult) {
    let mut block = None;
    for entry in result.entries() {
        let entry_block = entry.address / 100;
        if block != Some(entry_block) {
            block = Some(entry_block);
            println!("--- {}xx ---", entry_block);
        }
        let raw: Vec<String> = entry
            .raw_words
            .iter()
            .map(|word| format!("{word:#06X}"))
            .collect();
        let mut line = format!(
            "{:>4}  {:<28} {:<20} [{}]",
            entry.address,
            entry.name,
            format_value(catalog, entry),
            raw.join(" ")
        );
        if is_notable(entry) {
            line.push_str("  ? undocumented, non-zero");
        }
        println!("{line}");
    }
    println!(
        "{} register(s): {} decoded, {} failed{}",
        result.len(),
        result.decoded_count(),
        result.error_count(),
        if result.is_cancelled() {
            ", cancelled"
        } else {
            ""
        }
    );
}

fn print_result(catalog: &RegisterCatalog, result: &ScanResult, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => print_table(catalog, result),
        OutputFormat::Yaml => print!(
            "{}",
            serde_yaml::to_string(result).context("Cannot serialize scan result")?
        ),
    }
    Ok(())
}

fn run_scan(scanner: &Scanner, names: &[String]) -> Result<ScanResult> {
    if names.is_empty() {
        Ok(scanner.scan_all())
    } else {
        Ok(scanner.scan(names)?)
    }
}

fn handle_registers(catalog: &RegisterCatalog, filter: Option<&str>) {
    let descriptors: Vec<_> = match filter {
        Some(pattern) => catalog.search(pattern).collect(),
        None => catalog.all().iter().collect(),
    };
    for descriptor in &descriptors {
        println!(
            "{:>4}  {}  {:<6} {:<28} {:<22} {:<6} {}",
            descriptor.address,
            descriptor.access,
            if descriptor.bulk_eligible {
                "bulk"
            } else {
                "single"
            },
            descriptor.name,
            descriptor.encoding.to_string(),
            descriptor.unit,
            descriptor.description
        );
    }
    println!("{} register(s)", descriptors.len());
}

/// Builds the value to write from the command line arguments.
fn write_value(
    catalog: &RegisterCatalog,
    name: &str,
    value: Option<f64>,
    low: Option<f64>,
    high: Option<f64>,
) -> Result<WriteValue> {
    let packed = catalog
        .by_name(name)
        .is_some_and(|descriptor| matches!(descriptor.encoding, Encoding::PackedBytePair { .. }));
    Ok(match (value, packed) {
        (Some(value), true) => WriteValue::Pair {
            low: Some(value),
            high: None,
        },
        (Some(value), false) => WriteValue::Number(value),
        (None, true) => WriteValue::Pair { low, high },
        (None, false) => bail!("Register {name} is not a packed register, give a plain value"),
    })
}

fn handle_write(
    catalog: &RegisterCatalog,
    client: &SafeClient,
    name: &str,
    value: WriteValue,
    yes: bool,
    verify: bool,
) -> Result<()> {
    let Some(descriptor) = catalog.by_name(name) else {
        bail!("Unknown register {name}, see the `registers` command");
    };
    if !yes
        && !Confirm::new()
            .with_prompt(format!(
                "Write {value} {} to register {} ({})?",
                descriptor.unit, descriptor.address, descriptor.name
            ))
            .default(false)
            .show_default(true)
            .interact()
            .context("Failed to get user confirmation.")?
    {
        info!("Write aborted by user.");
        return Ok(());
    }

    let ack = Writer::new(catalog, client)
        .verify(verify)
        .write(name, value)
        .with_context(|| format!("Failed to write {value} to {name}"))?;
    println!(
        "Register {} ({}) written: {:04X?}",
        ack.address, ack.name, ack.words
    );
    match ack.verification {
        Verification::Skipped => {}
        Verification::Confirmed => println!("Read-back confirmed."),
        Verification::Mismatch { expected, actual } => println!(
            "WARNING: register holds {actual:04X?} instead of {expected:04X?}, the value may have been clamped."
        ),
        Verification::ReadBackFailed(error) => println!("WARNING: read-back failed: {error}"),
    }
    Ok(())
}

fn handle_probe(client: &SafeClient, slaves: &[u8], register: u16, configured: u8) {
    for (slave, result) in client.probe(slaves.iter().copied(), register, configured) {
        match result {
            Ok(word) => println!("  Slave {slave}, register {register}: {word}"),
            Err(error) => {
                println!("  Slave {slave}: no response");
                debug!("Probe of slave {slave} failed: {error}");
            }
        }
    }
}

fn main() -> Result<()> {
    let args = commandline::CliArgs::parse();

    // 1. Initialize logging as early as possible
    let _log_handle = logging_init(args.verbose.log_level_filter())?;
    info!(
        "M-Thermal CLI started. Log level: {}",
        args.verbose.log_level_filter()
    );

    // 2. Configuration file, overridden by the command line
    let config = Config::load_or_default(&args.config)
        .with_context(|| format!("Cannot load configuration {:?}", args.config))?;
    let config = args.apply(config);
    let catalog = load_catalog(&config)?;

    if let CliCommands::Registers { filter } = &args.command {
        handle_registers(&catalog, filter.as_deref());
        return Ok(());
    }

    // 3. Transport client, connected on first use
    info!(
        "Using {} (slave {}, timeout {:?}, retries {})",
        config.modbus.endpoint, config.modbus.slave, config.modbus.timeout, config.modbus.retries
    );
    let client = SafeClient::connect(&config.modbus);
    let scanner = Scanner::new(&catalog, &client);

    // 4. Execute the command
    match &args.command {
        CliCommands::Registers { .. } => unreachable!("Registers is handled earlier."),
        CliCommands::Scan { names, format } => {
            info!("Executing: Scan");
            let result = run_scan(&scanner, names)?;
            print_result(&catalog, &result, *format)?;
        }
        CliCommands::Read { name } => {
            info!("Executing: Read {name}");
            let result = scanner.scan(std::slice::from_ref(name))?;
            let Some(entry) = result.get(name) else {
                bail!("Register {name} missing from scan result");
            };
            if let Err(error) = &entry.outcome {
                bail!("Cannot read {name}: {error}");
            }
            println!("{}: {}", entry.name, format_value(&catalog, entry));
        }
        CliCommands::Write {
            name,
            value,
            low,
            high,
            yes,
            no_verify,
        } => {
            info!("Executing: Write {name}");
            let value = write_value(&catalog, name, *value, *low, *high)?;
            handle_write(&catalog, &client, name, value, *yes, !*no_verify)?;
        }
        CliCommands::Daemon {
            poll_interval,
            names,
        } => {
            info!("Starting daemon mode: interval={poll_interval:?}");
            loop {
                debug!("Daemon: scanning registers...");
                let result = run_scan(&scanner, names)?;
                print_table(&catalog, &result);
                std::thread::sleep(*poll_interval);
            }
        }
        CliCommands::Probe { slaves, register } => {
            info!("Executing: Probe slaves {slaves:?}");
            handle_probe(&client, slaves, *register, config.modbus.slave);
        }
    }

    Ok(())
}
