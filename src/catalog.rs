//! Register catalog of the Midea M-Thermal heat pump.
//!
//! The catalog is the single place where register metadata lives: address,
//! access mode, [`Encoding`], bulk eligibility and the "sensor absent"
//! sentinel. It is built once, validated, and never mutated afterwards.
//!
//! The built-in table covers the three documented blocks:
//!
//! | Block   | Content                              | Bulk read |
//! |---------|--------------------------------------|-----------|
//! | 0-22    | control registers (R/W)              | yes       |
//! | 100-199 | operating parameters (R)             | yes       |
//! | 200-290 | configuration parameters (R, R/W)    | no        |
//!
//! Addresses 23-99 are not implemented by the device and have no descriptor.

use crate::protocol::{Encoding, WORD_SENTINEL};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::Path;

#[derive(thiserror::Error, Debug)]
pub enum CatalogError {
    #[error("register address {0} is declared more than once")]
    DuplicateAddress(u16),
    #[error("register name `{0}` is declared more than once")]
    DuplicateName(String),
    #[error("register {address} pairs with address {paired}, which has no descriptor")]
    MissingPair { address: u16, paired: u16 },
    #[error("register {address} pairs with address {paired}, which is not adjacent")]
    NonAdjacentPair { address: u16, paired: u16 },
    #[error("register {address} is neither the high nor the low half of its own 32-bit value")]
    ForeignComposite { address: u16 },
    #[error("address {paired} is already consumed by another register, cannot pair it with {address}")]
    PairConflict { address: u16, paired: u16 },
    #[error("register {address} has a non-positive or non-finite scale")]
    InvalidScale { address: u16 },
    #[error("could not read the register table from {1:?}")]
    ReadFile(#[source] std::io::Error, std::path::PathBuf),
    #[error("could not parse the register table")]
    Parse(#[source] serde_yaml::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

impl AccessMode {
    pub fn is_writable(&self) -> bool {
        matches!(self, AccessMode::ReadWrite)
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AccessMode::ReadOnly => "R-",
            AccessMode::ReadWrite => "RW",
        })
    }
}

fn default_bulk_eligible() -> bool {
    true
}

/// One physical register, or the primary register of a 32-bit pair.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RegisterDescriptor {
    pub address: u16,
    pub name: String,
    pub access: AccessMode,
    pub encoding: Encoding,
    /// Whether the register may be fetched as part of a multi-register read.
    #[serde(default = "default_bulk_eligible")]
    pub bulk_eligible: bool,
    /// Raw value meaning "not available". Unsigned words always treat
    /// `0xFFFF` as such, packed halves always treat `0xFF` as such.
    #[serde(default)]
    pub sentinel: Option<u16>,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub description: String,
}

impl RegisterDescriptor {
    pub fn is_sentinel(&self, raw: u16) -> bool {
        match self.encoding {
            Encoding::UnsignedWord { .. } | Encoding::Composite32 { .. }
                if raw == WORD_SENTINEL =>
            {
                true
            }
            _ => self.sentinel == Some(raw),
        }
    }

    /// Addresses of the words making up the value, in decoding order
    /// (`[high, low]` for a 32-bit value).
    pub fn word_addresses(&self) -> Vec<u16> {
        match self.encoding {
            Encoding::Composite32 { high, low, .. } => vec![high, low],
            _ => vec![self.address],
        }
    }

    /// The address of the other half of a 32-bit value.
    pub fn paired_address(&self) -> Option<u16> {
        match self.encoding {
            Encoding::Composite32 { high, low, .. } => {
                Some(if high == self.address { low } else { high })
            }
            _ => None,
        }
    }

    fn matches(&self, pattern: &str) -> bool {
        let pattern = pattern.to_lowercase();
        self.name.contains(&pattern)
            || self.description.to_lowercase().contains(&pattern)
            || self.address.to_string() == pattern
    }
}

/// An ordered, validated, immutable set of register descriptors.
#[derive(Debug, Clone)]
pub struct RegisterCatalog {
    descriptors: Vec<RegisterDescriptor>,
    by_address: HashMap<u16, usize>,
    by_name: HashMap<String, usize>,
    /// Addresses consumed as the second half of a 32-bit value.
    hidden: BTreeSet<u16>,
}

impl RegisterCatalog {
    /// Validates `descriptors` and builds the catalog, ordered by address.
    pub fn new(mut descriptors: Vec<RegisterDescriptor>) -> Result<Self, CatalogError> {
        descriptors.sort_by_key(|descriptor| descriptor.address);

        let mut by_address = HashMap::with_capacity(descriptors.len());
        let mut by_name = HashMap::with_capacity(descriptors.len());
        for (index, descriptor) in descriptors.iter().enumerate() {
            let scale = descriptor.encoding.scale();
            if !scale.is_finite() || scale <= 0.0 {
                return Err(CatalogError::InvalidScale {
                    address: descriptor.address,
                });
            }
            if by_address.insert(descriptor.address, index).is_some() {
                return Err(CatalogError::DuplicateAddress(descriptor.address));
            }
            if by_name.insert(descriptor.name.clone(), index).is_some() {
                return Err(CatalogError::DuplicateName(descriptor.name.clone()));
            }
        }

        let mut hidden = BTreeSet::new();
        for descriptor in &descriptors {
            let Encoding::Composite32 { high, low, .. } = descriptor.encoding else {
                continue;
            };
            let address = descriptor.address;
            if address != high && address != low {
                return Err(CatalogError::ForeignComposite { address });
            }
            let paired = if address == high { low } else { high };
            if high.abs_diff(low) != 1 {
                return Err(CatalogError::NonAdjacentPair { address, paired });
            }
            let Some(&paired_index) = by_address.get(&paired) else {
                return Err(CatalogError::MissingPair { address, paired });
            };
            let paired_descriptor = &descriptors[paired_index];
            let paired_is_composite = matches!(paired_descriptor.encoding, Encoding::Composite32 { .. });
            if paired_is_composite || !hidden.insert(paired) {
                return Err(CatalogError::PairConflict { address, paired });
            }
        }

        Ok(Self {
            descriptors,
            by_address,
            by_name,
            hidden,
        })
    }

    /// The catalog of the Midea M-Thermal Arctic R290 heat pump.
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::new(builtin_descriptors())
    }

    /// Loads a YAML sequence of descriptors.
    pub fn from_yaml_reader<R: std::io::Read>(reader: R) -> Result<Self, CatalogError> {
        let descriptors: Vec<RegisterDescriptor> =
            serde_yaml::from_reader(reader).map_err(CatalogError::Parse)?;
        Self::new(descriptors)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, CatalogError> {
        let file = std::fs::File::open(path)
            .map_err(|e| CatalogError::ReadFile(e, path.to_path_buf()))?;
        Self::from_yaml_reader(file)
    }

    pub fn lookup(&self, address: u16) -> Option<&RegisterDescriptor> {
        self.by_address
            .get(&address)
            .map(|index| &self.descriptors[*index])
    }

    pub fn by_name(&self, name: &str) -> Option<&RegisterDescriptor> {
        self.by_name.get(name).map(|index| &self.descriptors[*index])
    }

    /// Every descriptor, ordered by address.
    pub fn all(&self) -> &[RegisterDescriptor] {
        &self.descriptors
    }

    /// Whether `address` only exists as the second half of a 32-bit value.
    pub fn is_hidden(&self, address: u16) -> bool {
        self.hidden.contains(&address)
    }

    /// Descriptors a scan reports on: every descriptor except the hidden
    /// halves of 32-bit values.
    pub fn scan_targets(&self) -> impl Iterator<Item = &RegisterDescriptor> {
        self.descriptors
            .iter()
            .filter(|descriptor| !self.hidden.contains(&descriptor.address))
    }

    /// Descriptors whose name, description or address match `pattern`.
    pub fn search<'a>(&'a self, pattern: &'a str) -> impl Iterator<Item = &'a RegisterDescriptor> {
        self.descriptors
            .iter()
            .filter(move |descriptor| descriptor.matches(pattern))
    }

    /// Bulk eligibility of an address. Addresses without a descriptor are
    /// never fetched in bulk.
    pub fn bulk_eligible(&self, address: u16) -> bool {
        self.lookup(address)
            .is_some_and(|descriptor| descriptor.bulk_eligible)
    }

    /// Counts descriptors per bulk flag, `(bulk, single)`.
    pub fn bulk_split(&self) -> (usize, usize) {
        let bulk = self.descriptors.iter().filter(|d| d.bulk_eligible).count();
        (bulk, self.descriptors.len() - bulk)
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Groups scan targets by their documented block (`0`, `100`, `200`).
    pub fn blocks(&self) -> BTreeMap<u16, Vec<&RegisterDescriptor>> {
        let mut blocks: BTreeMap<u16, Vec<&RegisterDescriptor>> = BTreeMap::new();
        for descriptor in self.scan_targets() {
            blocks
                .entry(descriptor.address / 100 * 100)
                .or_default()
                .push(descriptor);
        }
        blocks
    }
}

fn u(scale: f64) -> Encoding {
    Encoding::UnsignedWord { scale }
}

fn s(scale: f64) -> Encoding {
    Encoding::SignedWord { scale }
}

fn zones(scale: f64) -> Encoding {
    pair("zone1", "zone2", scale)
}

fn pair(low: &str, high: &str, scale: f64) -> Encoding {
    Encoding::PackedBytePair {
        low: low.to_string(),
        high: high.to_string(),
        scale,
    }
}

fn c32(high: u16, low: u16, scale: f64) -> Encoding {
    Encoding::Composite32 { high, low, scale }
}

macro_rules! register_table {
    (@sentinel) => {
        None
    };
    (@sentinel $sentinel:literal) => {
        Some($sentinel)
    };
    ($($address:literal: $encoding:expr, $access:ident, $bulk:ident, $name:literal, $unit:literal, $description:literal $(, sentinel = $sentinel:literal)?;)*) => {
        vec![$(RegisterDescriptor {
            address: $address,
            name: $name.to_string(),
            access: $access,
            encoding: $encoding,
            bulk_eligible: $bulk,
            sentinel: register_table!(@sentinel $($sentinel)?),
            unit: $unit.to_string(),
            description: $description.to_string(),
        },)*]
    };
}

#[rustfmt::skip]
fn builtin_descriptors() -> Vec<RegisterDescriptor> {
    use AccessMode::{ReadOnly as R_, ReadWrite as RW};
    const BULK: bool = true;
    const SINGLE: bool = false;

    register_table! {
        // Control registers
        0: u(1.0), RW, BULK, "power", "", "Power bit field: bit0 room temp control, bit1 Zone1 water, bit2 DHW, bit3 Zone2 water";
        1: u(1.0), RW, BULK, "mode_setting", "", "1=auto, 2=cooling, 3=heating";
        2: zones(1.0), RW, BULK, "t1s", "°C", "Water temperature setpoint, low byte Zone1, high byte Zone2";
        3: u(1.0), RW, BULK, "tas", "°C", "Room air temperature setpoint";
        4: u(1.0), RW, BULK, "t5s", "°C", "DHW tank temperature setpoint";
        5: u(1.0), RW, BULK, "function_setting", "", "Function bit field: silent mode, ECO, disinfection, climate curves";
        6: zones(1.0), RW, BULK, "temp_curve_selection", "", "Weather curve 1-9, low byte Zone1, high byte Zone2";
        7: u(1.0), RW, BULK, "forced_dhw", "", "0=normal, 1=force on, 2=force off";
        8: u(1.0), RW, BULK, "forced_tbh", "", "Tank booster heater, 0=normal, 1=force on, 2=force off";
        9: u(1.0), RW, BULK, "forced_ibh", "", "Inline booster heater, 0=normal, 1=force on, 2=force off";
        10: u(1.0), RW, BULK, "special_function", "", "Bit1 smart grid SG1, bit2 SG2/EVU";
        11: u(1.0), RW, BULK, "t1s_zone1", "°C", "Zone1 water temperature setpoint";
        12: u(1.0), RW, BULK, "t1s_zone2", "°C", "Zone2 water temperature setpoint";
        13: u(1.0), RW, BULK, "t_antilock", "s", "Solenoid valve anti-lock action time, 0-60";
        14: u(1.0), RW, BULK, "power_zone2", "", "Zone2 water flow control, 0=off, 1=on";
        15: u(1.0), RW, BULK, "power_dhw", "", "DHW function, 0=off, 1=on";
        16: u(1.0), RW, BULK, "power_zone1", "", "Zone1 water flow control, 0=off, 1=on";
        17: u(1.0), RW, BULK, "power_room", "", "Zone1/2 room temperature control, 0=off, 1=on";
        18: u(1.0), RW, BULK, "temp_curve_zone1", "", "Weather curve of Zone1, 1-9";
        19: u(1.0), RW, BULK, "temp_curve_zone2", "", "Weather curve of Zone2, 1-9";
        20: u(1.0), RW, BULK, "silent_mode_level", "", "0=level 1, 1=level 2, 2=boost";
        21: u(1.0), R_, BULK, "function_inquiry", "", "Status bits, bit4 disinfection running";
        22: u(1.0), R_, BULK, "reserved_22", "", "Reserved";

        // Operating parameters
        100: u(1.0), R_, BULK, "compressor_frequency", "Hz", "Compressor operating frequency, 0 when off";
        101: u(1.0), R_, BULK, "operating_mode", "", "0=off, 2=cooling, 3=heating";
        102: u(1.0), R_, BULK, "fan_speed", "r/min", "Outdoor fan speed";
        103: u(1.0), R_, BULK, "exv1_openness", "P", "Electronic expansion valve 1 opening";
        104: s(1.0), R_, BULK, "tw_in", "°C", "Plate heat exchanger water inlet temperature";
        105: s(1.0), R_, BULK, "tw_out", "°C", "Plate heat exchanger water outlet temperature";
        106: s(1.0), R_, BULK, "t3", "°C", "Condenser refrigerant temperature", sentinel = 0xFFFF;
        107: s(1.0), R_, BULK, "t4", "°C", "Outdoor ambient temperature";
        108: s(1.0), R_, BULK, "tp", "°C", "Compressor discharge temperature";
        109: s(1.0), R_, BULK, "th", "°C", "Compressor suction temperature";
        110: s(1.0), R_, BULK, "t1", "°C", "Total outlet water temperature";
        111: s(1.0), R_, BULK, "tw2", "°C", "Zone2 water temperature";
        112: s(1.0), R_, BULK, "t2", "°C", "Refrigerant liquid side temperature";
        113: s(1.0), R_, BULK, "t2b", "°C", "Refrigerant gas side temperature";
        114: s(1.0), R_, BULK, "ta", "°C", "Room temperature";
        115: s(1.0), R_, BULK, "t5", "°C", "DHW tank temperature";
        116: u(1.0), R_, BULK, "p1", "kPa", "High side refrigerant pressure";
        117: u(1.0), R_, BULK, "p2", "kPa", "Low side refrigerant pressure";
        118: u(0.1), R_, BULK, "odu_current", "A", "Outdoor unit current";
        119: u(1.0), R_, BULK, "odu_voltage", "V", "Outdoor unit supply voltage";
        120: u(1.0), R_, BULK, "tbt1", "°C", "Buffer tank top temperature", sentinel = 0xFF;
        121: u(1.0), R_, BULK, "tbt2", "°C", "Buffer tank bottom temperature", sentinel = 0xFF;
        122: u(1.0), R_, BULK, "compressor_time", "h", "Total compressor operating hours";
        123: u(1.0), R_, BULK, "unit_capacity", "kW", "Unit capacity";
        124: u(1.0), R_, BULK, "current_error", "", "Current error code";
        125: u(1.0), R_, BULK, "reserved_125", "", "Reserved";
        126: u(1.0), R_, BULK, "reserved_126", "", "Reserved";
        127: u(1.0), R_, BULK, "reserved_127", "", "Reserved";
        128: u(1.0), R_, BULK, "status_bit_1", "", "Status bit field 1";
        129: u(1.0), R_, BULK, "load_output", "", "Load output bit field";
        130: u(1.0), R_, BULK, "idu_software_version", "", "Indoor unit software version, 1-99";
        131: u(1.0), R_, BULK, "hmi_software_version", "", "Wired controller software version";
        132: u(1.0), R_, BULK, "unit_target_frequency", "Hz", "Target compressor frequency";
        133: u(0.1), R_, BULK, "dc_bus_current", "A", "Inverter DC bus current";
        134: u(10.0), R_, BULK, "dc_bus_voltage", "V", "Inverter DC bus voltage";
        135: s(1.0), R_, BULK, "tf", "°C", "Power module temperature";
        136: u(1.0), R_, BULK, "temp_curve_t1s_zone1", "°C", "Weather curve target of Zone1", sentinel = 0xFF;
        137: u(1.0), R_, BULK, "temp_curve_t1s_zone2", "°C", "Weather curve target of Zone2", sentinel = 0xFF;
        138: u(0.01), R_, BULK, "water_flow", "m³/h", "Water flow through the heat exchanger";
        139: u(1.0), R_, BULK, "odu_current_limit", "", "Outdoor unit current limitation code";
        140: u(0.01), R_, BULK, "hydraulic_module_capacity", "kW", "Real-time hydraulic module capacity";
        141: u(1.0), R_, BULK, "tsolar", "°C", "Solar panel temperature", sentinel = 0xFF;
        142: u(1.0), R_, BULK, "slave_unit_status", "", "Cascade slave units status";
        143: c32(143, 144, 0.01), R_, BULK, "energy_consumption", "kWh", "Cumulative electricity consumption";
        144: u(1.0), R_, BULK, "energy_consumption_low", "kWh", "Low word of energy_consumption";
        145: c32(145, 146, 0.01), R_, BULK, "power_output", "kWh", "Cumulative thermal energy output";
        146: u(1.0), R_, BULK, "power_output_low", "kWh", "Low word of power_output";
        147: u(1.0), R_, BULK, "reserved_147", "", "Reserved";
        148: u(0.01), R_, BULK, "heating_capacity", "kW", "Real-time heating capacity";
        149: u(0.01), R_, BULK, "renewable_heating_capacity", "kW", "Real-time renewable heating capacity";
        150: u(0.01), R_, BULK, "heating_power", "kW", "Real-time heating power consumption";
        151: u(0.01), R_, BULK, "heating_cop", "", "Real-time heating COP";
        152: c32(152, 153, 0.01), R_, BULK, "cum_system_heating", "kWh", "Cumulative system heating energy";
        153: u(1.0), R_, BULK, "cum_system_heating_low", "kWh", "Low word of cum_system_heating";
        154: c32(154, 155, 0.01), R_, BULK, "cum_renewable_heating", "kWh", "Cumulative renewable heating energy";
        155: u(1.0), R_, BULK, "cum_renewable_heating_low", "kWh", "Low word of cum_renewable_heating";
        156: c32(156, 157, 0.01), R_, BULK, "cum_system_power", "kWh", "Cumulative system power consumption";
        157: u(1.0), R_, BULK, "cum_system_power_low", "kWh", "Low word of cum_system_power";
        158: c32(158, 159, 0.01), R_, BULK, "cum_heating_energy", "kWh", "Cumulative heating energy";
        159: u(1.0), R_, BULK, "cum_heating_energy_low", "kWh", "Low word of cum_heating_energy";
        160: c32(160, 161, 0.01), R_, BULK, "cum_renewable_energy", "kWh", "Cumulative renewable energy";
        161: u(1.0), R_, BULK, "cum_renewable_energy_low", "kWh", "Low word of cum_renewable_energy";
        162: c32(162, 163, 0.01), R_, BULK, "cum_heating_power", "kWh", "Cumulative heating power consumption";
        163: u(1.0), R_, BULK, "cum_heating_power_low", "kWh", "Low word of cum_heating_power";
        164: u(0.01), R_, BULK, "cum_heating_efficiency", "", "Cumulative heating efficiency";
        165: c32(165, 166, 0.01), R_, BULK, "cum_cooling_energy", "kWh", "Cumulative cooling energy";
        166: u(1.0), R_, BULK, "cum_cooling_energy_low", "kWh", "Low word of cum_cooling_energy";
        167: c32(167, 168, 0.01), R_, BULK, "cum_renewable_cooling", "kWh", "Cumulative renewable cooling energy";
        168: u(1.0), R_, BULK, "cum_renewable_cooling_low", "kWh", "Low word of cum_renewable_cooling";
        169: c32(169, 170, 0.01), R_, BULK, "cum_cooling_power", "kWh", "Cumulative cooling power consumption";
        170: u(1.0), R_, BULK, "cum_cooling_power_low", "kWh", "Low word of cum_cooling_power";
        171: u(0.01), R_, BULK, "cum_cooling_efficiency", "", "Cumulative cooling efficiency";
        172: c32(172, 173, 0.01), R_, BULK, "cum_dhw_energy", "kWh", "Cumulative DHW energy";
        173: u(1.0), R_, BULK, "cum_dhw_energy_low", "kWh", "Low word of cum_dhw_energy";
        174: c32(174, 175, 0.01), R_, BULK, "cum_dhw_renewable", "kWh", "Cumulative renewable DHW energy";
        175: u(1.0), R_, BULK, "cum_dhw_renewable_low", "kWh", "Low word of cum_dhw_renewable";
        176: c32(176, 177, 0.01), R_, BULK, "cum_dhw_power", "kWh", "Cumulative DHW power consumption";
        177: u(1.0), R_, BULK, "cum_dhw_power_low", "kWh", "Low word of cum_dhw_power";
        178: u(0.01), R_, BULK, "cum_dhw_cop", "", "Cumulative DHW COP";
        179: u(0.01), R_, BULK, "cooling_capacity", "kW", "Real-time cooling capacity";
        180: u(0.01), R_, BULK, "renewable_cooling_capacity", "kW", "Real-time renewable cooling capacity";
        181: u(0.01), R_, BULK, "cooling_power", "kW", "Real-time cooling power consumption";
        182: u(0.01), R_, BULK, "cooling_eer", "", "Real-time cooling EER";
        183: u(0.01), R_, BULK, "dhw_capacity", "kW", "Real-time DHW capacity";
        184: u(0.01), R_, BULK, "renewable_dhw_capacity", "kW", "Real-time renewable DHW capacity";
        185: u(0.01), R_, BULK, "dhw_power", "kW", "Real-time DHW power consumption";
        186: u(0.01), R_, BULK, "dhw_cop", "", "Real-time DHW COP";
        187: u(1.0), R_, BULK, "modbus_protocol_version", "", "Protocol version, 46 means V4.6";
        188: u(1.0), R_, BULK, "error_code_2", "", "Secondary error code";
        189: u(1.0), R_, BULK, "status_bit_2", "", "Status bit field 2";
        190: u(1.0), R_, BULK, "hydraulic_module_sub_model", "", "Hydraulic module sub-model, 0-10";
        191: s(1.0), R_, BULK, "tl", "°C", "Outdoor unit refrigerant pipe temperature";
        192: u(0.1), R_, BULK, "pump_i_pwm", "%", "Internal pump PWM duty";
        193: s(1.0), R_, BULK, "t9i", "°C", "Second plate heat exchanger inlet temperature";
        194: s(1.0), R_, BULK, "t9o", "°C", "Second plate heat exchanger outlet temperature";
        195: u(1.0), R_, BULK, "exv2_openness", "P", "Electronic expansion valve 2 opening";
        196: u(1.0), R_, BULK, "exv3_openness", "P", "Electronic expansion valve 3 opening";
        197: u(1.0), R_, BULK, "fan2_speed", "r/min", "Second outdoor fan speed";
        198: u(1.0), R_, BULK, "status_bit_3", "", "Status bit field 3";
        199: u(1.0), R_, BULK, "heat_pump_operation_mode", "", "0=off, 2=cooling, 3=heating, 5=DHW";

        // Configuration parameters, rejected by multi-register reads
        200: u(1.0), R_, SINGLE, "reserved_200", "", "Reserved";
        201: zones(1.0), R_, SINGLE, "t1s_cooling_upper_limit", "°C", "Cooling setpoint maximum, low byte Zone1, high byte Zone2";
        202: zones(1.0), R_, SINGLE, "t1s_cooling_lower_limit", "°C", "Cooling setpoint minimum, low byte Zone1, high byte Zone2";
        203: zones(1.0), R_, SINGLE, "t1s_heating_upper_limit", "°C", "Heating setpoint maximum, low byte Zone1, high byte Zone2";
        204: zones(1.0), R_, SINGLE, "t1s_heating_lower_limit", "°C", "Heating setpoint minimum, low byte Zone1, high byte Zone2";
        205: u(0.5), R_, SINGLE, "tas_upper_limit", "°C", "Room setpoint maximum";
        206: u(0.5), R_, SINGLE, "tas_lower_limit", "°C", "Room setpoint minimum";
        207: u(1.0), R_, SINGLE, "t5s_upper_limit", "°C", "DHW setpoint maximum";
        208: u(1.0), R_, SINGLE, "t5s_lower_limit", "°C", "DHW setpoint minimum";
        209: u(1.0), RW, SINGLE, "pump_d_running_time", "min", "DHW circulation pump running time, 5-120";
        210: u(1.0), RW, SINGLE, "parameter_setting_1", "", "Parameter bit field 1";
        211: u(1.0), RW, SINGLE, "parameter_setting_2", "", "Parameter bit field 2";
        212: u(1.0), RW, SINGLE, "dt5_on", "°C", "DHW start differential";
        213: u(1.0), RW, SINGLE, "dt1s5", "°C", "DHW/zone temperature differential";
        214: u(1.0), R_, SINGLE, "unknown_214", "", "Undocumented";
        215: s(1.0), RW, SINGLE, "t4_dhw_max", "°C", "Maximum outdoor temperature for DHW";
        216: s(1.0), RW, SINGLE, "t4_dhw_min", "°C", "Minimum outdoor temperature for DHW heat pump operation";
        217: u(1.0), RW, SINGLE, "t_tbh_delay", "min", "Tank booster heater delay";
        218: u(1.0), RW, SINGLE, "dt5_tbh_off", "°C", "Tank booster heater off differential";
        219: s(1.0), RW, SINGLE, "t4_tbh_on", "°C", "Outdoor temperature enabling the tank booster heater";
        220: u(1.0), RW, SINGLE, "t5s_di", "°C", "Disinfection temperature";
        221: u(1.0), RW, SINGLE, "t_di_max", "min", "Disinfection maximum time";
        222: u(1.0), RW, SINGLE, "t_di_hightemp", "min", "Disinfection high temperature hold time";
        223: u(1.0), R_, SINGLE, "unknown_223", "", "Undocumented";
        224: u(1.0), RW, SINGLE, "dt1sc", "°C", "Cooling curve differential";
        225: u(1.0), RW, SINGLE, "dtsc", "°C", "Cooling setback";
        226: s(1.0), RW, SINGLE, "t4c_max", "°C", "Maximum outdoor temperature for cooling";
        227: s(1.0), RW, SINGLE, "t4c_min", "°C", "Minimum outdoor temperature for cooling";
        228: u(1.0), R_, SINGLE, "unknown_228", "", "Undocumented";
        229: u(1.0), RW, SINGLE, "dt1sh", "°C", "Heating curve differential";
        230: u(1.0), RW, SINGLE, "dtsh", "°C", "Heating setback";
        231: s(1.0), RW, SINGLE, "t4h_max", "°C", "Maximum outdoor temperature for heating";
        232: s(1.0), RW, SINGLE, "t4h_min", "°C", "Minimum outdoor temperature for heat pump heating";
        233: s(1.0), RW, SINGLE, "t4_ibh_on", "°C", "Outdoor temperature enabling the inline booster heater";
        234: u(1.0), RW, SINGLE, "dt1_ibh_on", "°C", "Inline booster heater differential";
        235: u(1.0), RW, SINGLE, "t_ibh_delay", "min", "Inline booster heater delay";
        236: u(1.0), R_, SINGLE, "unknown_236", "", "Undocumented";
        237: s(1.0), RW, SINGLE, "t4_ahs_on", "°C", "Outdoor temperature enabling the auxiliary heat source";
        238: u(1.0), RW, SINGLE, "dt1_ahs_on", "°C", "Auxiliary heat source differential";
        239: u(1.0), R_, SINGLE, "unknown_239", "", "Undocumented";
        240: u(1.0), RW, SINGLE, "t_ahs_delay", "min", "Auxiliary heat source delay";
        241: u(1.0), RW, SINGLE, "t_dhwhp_max", "min", "Maximum continuous DHW heat pump time";
        242: u(1.0), RW, SINGLE, "t_dhwhp_restrict", "min", "Pause between DHW heating cycles";
        243: s(1.0), RW, SINGLE, "t4_auto_c_min", "°C", "Minimum outdoor temperature for auto cooling";
        244: s(1.0), RW, SINGLE, "t4_auto_h_max", "°C", "Maximum outdoor temperature for auto heating";
        245: u(1.0), RW, SINGLE, "t1s_holiday_heating", "°C", "Holiday water setpoint for heating";
        246: u(1.0), RW, SINGLE, "t5s_holiday_dhw", "°C", "Holiday DHW setpoint";
        247: u(1.0), R_, SINGLE, "unknown_247", "", "Undocumented";
        248: u(1.0), R_, SINGLE, "unknown_248", "", "Undocumented";
        249: u(1.0), R_, SINGLE, "unknown_249", "", "Undocumented";
        250: u(100.0), RW, SINGLE, "ibh1_power", "W", "Inline booster heater 1 power";
        251: u(100.0), RW, SINGLE, "ibh2_power", "W", "Inline booster heater 2 power";
        252: u(100.0), RW, SINGLE, "tbh_power", "W", "Tank booster heater power";
        253: u(1.0), R_, SINGLE, "unknown_253", "", "Undocumented";
        254: u(1.0), R_, SINGLE, "unknown_254", "", "Undocumented";
        255: u(1.0), RW, SINGLE, "t_dryup", "d", "Floor drying ramp up days";
        256: u(1.0), RW, SINGLE, "t_highpeak", "d", "Floor drying peak days";
        257: u(1.0), RW, SINGLE, "t_drydown", "d", "Floor drying ramp down days";
        258: u(1.0), RW, SINGLE, "t_drypeak", "°C", "Floor drying peak temperature";
        259: u(1.0), RW, SINGLE, "t_arsth", "h", "Anti-freeze reset time";
        260: u(1.0), RW, SINGLE, "t1s_preheating", "°C", "Floor preheating water temperature";
        261: u(1.0), RW, SINGLE, "t1set_c1", "°C", "Custom cooling curve water temperature, point 1";
        262: u(1.0), RW, SINGLE, "t1set_c2", "°C", "Custom cooling curve water temperature, point 2";
        263: s(1.0), RW, SINGLE, "t4_c1", "°C", "Custom cooling curve outdoor temperature, point 1";
        264: s(1.0), RW, SINGLE, "t4_c2", "°C", "Custom cooling curve outdoor temperature, point 2";
        265: u(1.0), RW, SINGLE, "t1set_h1", "°C", "Custom heating curve water temperature, point 1";
        266: u(1.0), RW, SINGLE, "t1set_h2", "°C", "Custom heating curve water temperature, point 2";
        267: s(1.0), RW, SINGLE, "t4_h1", "°C", "Custom heating curve outdoor temperature, point 1";
        268: s(1.0), RW, SINGLE, "t4_h2", "°C", "Custom heating curve outdoor temperature, point 2";
        269: u(1.0), RW, SINGLE, "power_input_limitation", "", "Power input limitation level";
        270: pair("heating", "cooling", 1.0), RW, SINGLE, "t4_fresh", "°C", "Fresh air thresholds, low byte heating, high byte cooling";
        271: u(1.0), RW, SINGLE, "t_delay_pump", "min", "Circulation pump delay after compressor stop";
        272: u(1.0), RW, SINGLE, "emission_type", "", "Emitter type nibbles: Zone1 H, Zone2 H, Zone1 C, Zone2 C";
        273: pair("solar_function", "deltatsol", 1.0), RW, SINGLE, "solar", "", "Low byte solar function, high byte solar differential";
        274: u(1.0), RW, SINGLE, "ahs_pdc", "", "Auxiliary heat source bit field";
        275: u(0.01), RW, SINGLE, "gas_cost", "", "Gas cost per unit";
        276: u(0.01), RW, SINGLE, "ele_cost", "", "Electricity cost per unit";
        277: pair("min", "max", 1.0), RW, SINGLE, "setheater", "°C", "External heater setpoints, low byte minimum, high byte maximum";
        278: pair("min", "max", 1.0), RW, SINGLE, "sigheater", "V", "External heater signal range, low byte minimum, high byte maximum";
        279: u(1.0), RW, SINGLE, "t2_antilock_sv_run", "s", "Solenoid valve anti-lock run time";
        280: u(1.0), R_, SINGLE, "unknown_280", "", "Undocumented";
        281: u(1.0), R_, SINGLE, "unknown_281", "", "Undocumented";
        282: u(1.0), R_, SINGLE, "unknown_282", "", "Undocumented";
        283: u(1.0), R_, SINGLE, "unknown_283", "", "Undocumented";
        284: u(1.0), R_, SINGLE, "unknown_284", "", "Undocumented";
        285: u(1.0), R_, SINGLE, "unknown_285", "", "Undocumented";
        286: u(1.0), R_, SINGLE, "unknown_286", "", "Undocumented";
        287: u(1.0), R_, SINGLE, "unknown_287", "", "Undocumented";
        288: s(1.0), RW, SINGLE, "ta_adj", "°C", "Room temperature sensor offset";
        289: u(1.0), RW, SINGLE, "tbh_en_func", "", "Tank booster heater enable, 0=disabled, 1=enabled";
        290: u(0.1), RW, SINGLE, "high_price_compressor_limit", "kW", "Compressor limit during high price periods";
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn word(address: u16, name: &str) -> RegisterDescriptor {
        RegisterDescriptor {
            address,
            name: name.to_string(),
            access: AccessMode::ReadOnly,
            encoding: u(1.0),
            bulk_eligible: true,
            sentinel: None,
            unit: String::new(),
            description: String::new(),
        }
    }

    fn composite(address: u16, high: u16, low: u16, name: &str) -> RegisterDescriptor {
        RegisterDescriptor {
            encoding: c32(high, low, 0.01),
            ..word(address, name)
        }
    }

    #[test]
    fn builtin_is_consistent() {
        let catalog = RegisterCatalog::builtin().unwrap();
        assert_eq!(catalog.len(), 23 + 100 + 91);
        assert!(catalog.lookup(50).is_none());
        assert_eq!(catalog.lookup(104).unwrap().name, "tw_in");
        assert_eq!(catalog.by_name("t1s").unwrap().address, 2);

        // addresses are ordered
        let addresses: Vec<u16> = catalog.all().iter().map(|d| d.address).collect();
        let mut sorted = addresses.clone();
        sorted.sort();
        assert_eq!(addresses, sorted);
    }

    #[test]
    fn builtin_bulk_flags() {
        let catalog = RegisterCatalog::builtin().unwrap();
        for descriptor in catalog.all() {
            assert_eq!(
                descriptor.bulk_eligible,
                descriptor.address < 200,
                "{}",
                descriptor.address
            );
        }
        assert_eq!(catalog.bulk_split(), (123, 91));
    }

    #[test]
    fn builtin_composites() {
        let catalog = RegisterCatalog::builtin().unwrap();
        let energy = catalog.lookup(143).unwrap();
        assert_eq!(energy.word_addresses(), [143, 144]);
        assert_eq!(energy.paired_address(), Some(144));
        assert!(catalog.is_hidden(144));
        assert!(!catalog.is_hidden(143));
        assert!(catalog.scan_targets().all(|d| d.address != 144));
        assert_eq!(catalog.scan_targets().count(), catalog.len() - 14);
    }

    #[test]
    fn duplicate_address() {
        assert_matches!(
            RegisterCatalog::new(vec![word(1, "a"), word(1, "b")]),
            Err(CatalogError::DuplicateAddress(1))
        );
    }

    #[test]
    fn duplicate_name() {
        assert_matches!(
            RegisterCatalog::new(vec![word(1, "a"), word(2, "a")]),
            Err(CatalogError::DuplicateName(..))
        );
    }

    #[test]
    fn missing_pair() {
        assert_matches!(
            RegisterCatalog::new(vec![composite(10, 10, 11, "counter")]),
            Err(CatalogError::MissingPair {
                address: 10,
                paired: 11
            })
        );
    }

    #[test]
    fn pair_conflicts() {
        assert_matches!(
            RegisterCatalog::new(vec![
                composite(10, 10, 11, "a"),
                composite(12, 12, 11, "b"),
                word(11, "low"),
            ]),
            Err(CatalogError::PairConflict { paired: 11, .. })
        );
        assert_matches!(
            RegisterCatalog::new(vec![composite(10, 10, 11, "a"), composite(11, 10, 11, "b")]),
            Err(CatalogError::PairConflict { .. })
        );
        assert_matches!(
            RegisterCatalog::new(vec![composite(10, 10, 12, "a"), word(12, "low")]),
            Err(CatalogError::NonAdjacentPair { .. })
        );
        assert_matches!(
            RegisterCatalog::new(vec![composite(10, 11, 12, "a"), word(11, "b"), word(12, "c")]),
            Err(CatalogError::ForeignComposite { address: 10 })
        );
    }

    #[test]
    fn low_word_first() {
        let catalog =
            RegisterCatalog::new(vec![composite(11, 10, 11, "counter"), word(10, "high")]).unwrap();
        assert!(catalog.is_hidden(10));
        assert_eq!(catalog.lookup(11).unwrap().paired_address(), Some(10));
        assert_eq!(catalog.lookup(11).unwrap().word_addresses(), [10, 11]);
    }

    #[test]
    fn invalid_scale() {
        let mut descriptor = word(1, "a");
        descriptor.encoding = u(0.0);
        assert_matches!(
            RegisterCatalog::new(vec![descriptor]),
            Err(CatalogError::InvalidScale { address: 1 })
        );
    }

    #[test]
    fn yaml_table() {
        let yaml = r#"
- address: 2
  name: t1s
  access: read_write
  encoding: { kind: packed_byte_pair, low: zone1, high: zone2 }
  unit: "°C"
- address: 143
  name: energy
  access: read_only
  encoding: { kind: composite32, high: 143, low: 144, scale: 0.01 }
- address: 144
  name: energy_low
  access: read_only
  encoding: { kind: unsigned_word }
- address: 209
  name: pump_d_running_time
  access: read_write
  encoding: { kind: unsigned_word }
  bulk_eligible: false
- address: 120
  name: tbt1
  access: read_only
  encoding: { kind: signed_word, scale: 1.0 }
  sentinel: 255
"#;
        let catalog = RegisterCatalog::from_yaml_reader(yaml.as_bytes()).unwrap();
        assert_eq!(catalog.len(), 5);
        assert!(catalog.bulk_eligible(2));
        assert!(!catalog.bulk_eligible(209));
        assert!(!catalog.bulk_eligible(1000));
        assert!(catalog.is_hidden(144));
        assert_eq!(catalog.lookup(120).unwrap().sentinel, Some(255));
        assert_eq!(catalog.lookup(2).unwrap().encoding.scale(), 1.0);
    }

    #[test]
    fn yaml_errors() {
        assert_matches!(
            RegisterCatalog::from_yaml_reader("- address: x".as_bytes()),
            Err(CatalogError::Parse(..))
        );
        assert_matches!(
            RegisterCatalog::from_yaml_file(Path::new("/nonexistent/registers.yml")),
            Err(CatalogError::ReadFile(..))
        );
    }

    #[test]
    fn search() {
        let catalog = RegisterCatalog::builtin().unwrap();
        let found: Vec<u16> = catalog.search("booster").map(|d| d.address).collect();
        assert!(found.contains(&8));
        assert!(found.contains(&250));
        let found: Vec<u16> = catalog.search("104").map(|d| d.address).collect();
        assert_eq!(found, [104]);
        assert!(catalog.search("tw_in").any(|d| d.address == 104));
    }

    #[test]
    fn blocks() {
        let catalog = RegisterCatalog::builtin().unwrap();
        let blocks = catalog.blocks();
        assert_eq!(blocks.keys().copied().collect::<Vec<_>>(), [0, 100, 200]);
        assert_eq!(blocks[&0].len(), 23);
    }
}
