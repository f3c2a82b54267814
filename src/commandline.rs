use clap::{Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use mthermal_lib::{config::Config, protocol as proto};
use std::path::PathBuf;
use std::time::Duration;

fn parse_slave(s: &str) -> Result<u8, String> {
    let slave = clap_num::maybe_hex::<u8>(s).map_err(|e| format!("Invalid slave format: {e}"))?;
    if (1..=247).contains(&slave) {
        Ok(slave)
    } else {
        Err(format!("Slave {slave} is outside of 1..=247"))
    }
}

fn parse_register(s: &str) -> Result<u16, String> {
    clap_num::maybe_hex::<u16>(s).map_err(|e| format!("Invalid register address format: {e}"))
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human readable table.
    Table,
    /// YAML mapping of register name to address, raw words and value.
    Yaml,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// List the registers of the catalog.
    /// An optional filter matches names, descriptions and addresses.
    #[clap(verbatim_doc_comment)]
    Registers {
        /// Case-insensitive filter, e.g. "zone1", "energy" or "104".
        filter: Option<String>,
    },

    /// Read registers and print their decoded values.
    /// Without names, every register of the catalog is scanned.
    #[clap(verbatim_doc_comment)]
    Scan {
        /// Register names, e.g. "tw_in t4 energy_consumption".
        names: Vec<String>,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },

    /// Read one register and print its value.
    Read {
        /// Register name.
        name: String,
    },

    /// Write a physical value to a register.
    /// Packed registers hold two byte values; a plain VALUE writes the low
    /// half (Zone1). With --low/--high only the given halves change, the
    /// register is read first to preserve the other one.
    #[clap(verbatim_doc_comment)]
    Write {
        /// Register name.
        name: String,

        /// Physical value, e.g. "35" for 35 °C.
        #[arg(
            allow_negative_numbers = true,
            required_unless_present_any = ["low", "high"],
            conflicts_with_all = ["low", "high"]
        )]
        value: Option<f64>,

        /// Low half of a packed register (Zone1 for temperature pairs).
        #[arg(long, visible_alias = "zone1", allow_negative_numbers = true)]
        low: Option<f64>,

        /// High half of a packed register (Zone2 for temperature pairs).
        #[arg(long, visible_alias = "zone2", allow_negative_numbers = true)]
        high: Option<f64>,

        /// Do not ask for confirmation.
        #[arg(short, long)]
        yes: bool,

        /// Do not read the register back after writing.
        #[arg(long)]
        no_verify: bool,
    },

    /// Run in daemon mode: continuously scan at a specified interval and
    /// print the values to the console.
    #[clap(verbatim_doc_comment)]
    Daemon {
        /// Interval between scans (e.g., "30s", "5m")
        #[arg(value_parser = humantime::parse_duration, short, long, default_value = "30s")]
        poll_interval: Duration,

        /// Register names, all registers if empty.
        names: Vec<String>,
    },

    /// Look for responding slave ids behind the gateway.
    /// Reads one register from each slave id and reports which answer.
    #[clap(verbatim_doc_comment)]
    Probe {
        /// Slave ids to try, decimal or hexadecimal.
        #[arg(value_parser = parse_slave, default_values_t = [1u8, 2, 3])]
        slaves: Vec<u8>,

        /// Register read from each slave.
        #[arg(short, long, value_parser = parse_register, default_value_t = 110)]
        register: u16,
    },
}

const fn about_text() -> &'static str {
    "Midea M-Thermal heat pump CLI - Read and write heat pump registers via a Modbus TCP gateway or Modbus RTU."
}

#[derive(Parser, Debug)]
#[command(name = "mthermal", author, version, about = about_text(), long_about = None, propagate_version = true)]
pub struct CliArgs {
    /// Configure verbosity of logging output.
    /// -v for info, -vv for debug, -vvv for trace. Default is warnings only.
    #[command(flatten)]
    pub verbose: Verbosity<WarnLevel>,

    /// YAML configuration file. Missing files are ignored.
    #[arg(global = true, short, long, default_value = Config::DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Host name or IP address of the Modbus TCP gateway.
    #[arg(global = true, long, conflicts_with = "device")]
    pub host: Option<String>,

    /// TCP port of the gateway.
    #[arg(global = true, long, requires = "host")]
    pub port: Option<u16>,

    /// Serial device of a direct RS-485 connection.
    /// Examples: "/dev/ttyUSB0" (Linux), "COM3" (Windows).
    #[arg(global = true, long, verbatim_doc_comment)]
    pub device: Option<String>,

    /// Modbus slave id of the heat pump (factory default 1).
    #[arg(global = true, short, long, value_parser = parse_slave)]
    pub slave: Option<u8>,

    /// Modbus I/O timeout for one request.
    /// Raised to the wire time of a full read at 9600 baud when lower.
    /// Examples: "5s", "800ms".
    #[arg(global = true, long, value_parser = humantime::parse_duration, verbatim_doc_comment)]
    pub timeout: Option<Duration>,

    /// Retries after a timeout or broken connection.
    #[arg(global = true, long)]
    pub retries: Option<u8>,

    /// Minimum delay between two Modbus requests.
    /// Examples: "50ms", "100ms".
    #[arg(global = true, long, value_parser = humantime::parse_duration, verbatim_doc_comment)]
    pub delay: Option<Duration>,

    /// YAML register table replacing the built-in catalog.
    #[arg(global = true, long)]
    pub catalog: Option<PathBuf>,

    #[command(subcommand)]
    pub command: CliCommands,
}

impl CliArgs {
    /// Applies the command line overrides to the configuration file content.
    pub fn apply(&self, mut config: Config) -> Config {
        let modbus = &mut config.modbus;
        if let Some(host) = &self.host {
            modbus.endpoint = mthermal_lib::config::Endpoint::Tcp {
                host: host.clone(),
                port: self.port.unwrap_or(proto::GATEWAY_PORT),
            };
        }
        if let Some(device) = &self.device {
            modbus.endpoint = mthermal_lib::config::Endpoint::Rtu {
                device: device.clone(),
                baud_rate: proto::LINK_BAUD_RATE,
            };
        }
        if let Some(slave) = self.slave {
            modbus.slave = slave;
        }
        if let Some(timeout) = self.timeout {
            modbus.timeout = timeout;
        }
        if let Some(retries) = self.retries {
            modbus.retries = retries;
        }
        if let Some(delay) = self.delay {
            modbus.delay = delay;
        }
        if let Some(catalog) = &self.catalog {
            config.catalog = Some(catalog.clone());
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mthermal_lib::config::Endpoint;

    #[test]
    fn overrides() {
        let args = CliArgs::parse_from([
            "mthermal", "--host", "10.10.100.254", "--slave", "0x02", "scan", "tw_in",
        ]);
        assert_eq!(
            args.command,
            CliCommands::Scan {
                names: vec!["tw_in".to_string()],
                format: OutputFormat::Table
            }
        );
        let config = args.apply(Config::default());
        assert_eq!(
            config.modbus.endpoint,
            Endpoint::Tcp {
                host: "10.10.100.254".to_string(),
                port: 8899
            }
        );
        assert_eq!(config.modbus.slave, 2);
        assert_eq!(config.modbus.retries, 2);
    }

    #[test]
    fn write_arguments() {
        let args = CliArgs::parse_from(["mthermal", "write", "t1s", "--zone1", "35", "--yes"]);
        assert_matches::assert_matches!(
            args.command,
            CliCommands::Write {
                value: None,
                low: Some(35.0),
                high: None,
                yes: true,
                ..
            }
        );
        assert!(CliArgs::try_parse_from(["mthermal", "write", "t1s"]).is_err());
        assert!(CliArgs::try_parse_from(["mthermal", "write", "t1s", "35", "--zone2", "30"]).is_err());
        let args = CliArgs::parse_from(["mthermal", "write", "ta_adj", "-2"]);
        assert_matches::assert_matches!(args.command, CliCommands::Write { value: Some(v), .. } if v == -2.0);
    }

    #[test]
    fn slave_range() {
        assert_eq!(parse_slave("2"), Ok(2));
        assert!(parse_slave("0").is_err());
        assert!(parse_slave("248").is_err());
        assert_eq!(parse_register("0x6E"), Ok(110));
    }
}
