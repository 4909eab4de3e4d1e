//! Application-wide constants and compile-time configuration.
//!
//! All peripheral identities, GATT UUIDs, timing parameters, and
//! capacity bounds live here so they can be tuned in one place.

// Peripheral roster

/// Maximum number of peripherals the registry can hold.
///
/// The deployed system has four units (HVAC + three dampers); two spare
/// entries allow bench controllers to be registered during testing.
pub const MAX_PERIPHERALS: usize = 6;

/// Identity table of the deployed units, in canonical slot order:
/// slot 0 = HVAC unit, slots 1..3 = duct dampers.
pub const DEFAULT_IDENTITIES: [(&str, &str); 4] = [
    ("64:e8:33:8c:04:a6", "HVAC"),
    ("9c:9e:6e:c1:09:e2", "Parents room damper"),
    ("9c:9e:6e:c1:0c:5e", "Working room damper"),
    ("dc:06:75:e9:3c:02", "Safe room damper"),
];

// GATT

/// Vent control service exposed by every peripheral.
pub const VENT_SERVICE_UUID: &str = "5678abcd-0000-1000-8000-00805f9b34fb";

/// 16-byte big-endian form of [`VENT_SERVICE_UUID`], for matching the
/// 128-bit service list in advertisement payloads.
pub const VENT_SERVICE_UUID_BYTES: [u8; 16] = [
    0x56, 0x78, 0xab, 0xcd, 0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0x80, 0x5f, 0x9b, 0x34, 0xfb,
];

pub const VENT_SPEED_UUID: &str = "5678abcd-0001-1000-8000-00805f9b34fb";
pub const VENT_MODE_UUID: &str = "5678abcd-0002-1000-8000-00805f9b34fb";
pub const VENT_STATE_UUID: &str = "5678abcd-0003-1000-8000-00805f9b34fb";
pub const VENT_TEMP_UUID: &str = "5678abcd-0004-1000-8000-00805f9b34fb";
pub const VENT_VOLTAGE_UUID: &str = "5678abcd-0005-1000-8000-00805f9b34fb";

/// Writable / notifiable characteristics of the vent service.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VentCharacteristic {
    /// Fan speed (`low` / `medium` / `high` / `auto`).
    Speed,
    /// Operating mode of the HVAC unit (`heat` / `cold`).
    Mode,
    /// On/off state.
    State,
    /// Target temperature, integer degrees.
    Temp,
    /// Supply voltage telemetry (notify-only).
    Voltage,
}

impl VentCharacteristic {
    pub const fn uuid(self) -> &'static str {
        match self {
            VentCharacteristic::Speed => VENT_SPEED_UUID,
            VentCharacteristic::Mode => VENT_MODE_UUID,
            VentCharacteristic::State => VENT_STATE_UUID,
            VentCharacteristic::Temp => VENT_TEMP_UUID,
            VentCharacteristic::Voltage => VENT_VOLTAGE_UUID,
        }
    }

    /// Single-byte code used by the persistent state store.
    pub const fn code(self) -> u8 {
        match self {
            VentCharacteristic::Speed => 1,
            VentCharacteristic::Mode => 2,
            VentCharacteristic::State => 3,
            VentCharacteristic::Temp => 4,
            VentCharacteristic::Voltage => 5,
        }
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(VentCharacteristic::Speed),
            2 => Some(VentCharacteristic::Mode),
            3 => Some(VentCharacteristic::State),
            4 => Some(VentCharacteristic::Temp),
            5 => Some(VentCharacteristic::Voltage),
            _ => None,
        }
    }
}

// Value bounds

/// Maximum length of a characteristic value or telemetry payload
/// (UTF-8 numeric strings and short keywords such as `medium`).
pub const MAX_VALUE_LEN: usize = 16;

/// Maximum length of a peripheral display name.
pub const MAX_NAME_LEN: usize = 32;

// BLE timing

/// Duration of one scan window before the scanner re-arms itself (ms).
pub const BLE_SCAN_WINDOW_MS: u64 = 3000;

/// Scan interval / window (in 0.625 ms units): 100 ms / 98.75 ms,
/// near-continuous so a re-advertising peripheral is seen quickly.
pub const BLE_SCAN_INTERVAL: u16 = 160;
pub const BLE_SCAN_WINDOW: u16 = 158;

/// Bounded timeout for one connection attempt (ms).
pub const BLE_CONNECT_TIMEOUT_MS: u64 = 4000;

/// BLE connection interval range (in 1.25 ms units).
/// 24 = 30 ms; telemetry cadence does not need HID-grade latency.
pub const BLE_CONN_INTERVAL_MIN: u16 = 24;
pub const BLE_CONN_INTERVAL_MAX: u16 = 40;

/// BLE slave latency (number of connection events the peripheral can skip).
pub const BLE_SLAVE_LATENCY: u16 = 0;

/// BLE supervision timeout (in 10 ms units). 400 = 4 s.
pub const BLE_SUP_TIMEOUT: u16 = 400;

// Control loop

/// Cadence of the orchestration loop that drains notifications and
/// services connect requests (ms).
pub const POLL_INTERVAL_MS: u64 = 50;

// Last-value storage

/// Maximum number of `(slot, characteristic)` records in the state store.
pub const MAX_STORED_VALUES: usize = 16;

/// Flash page index where last-value storage starts (4 KB per page on nRF52840).
pub const STORAGE_FLASH_PAGE_START: u32 = 240;

/// Number of flash pages reserved for last-value storage.
pub const STORAGE_FLASH_PAGE_COUNT: u32 = 4;
