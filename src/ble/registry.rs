//! Identity registry - the fixed roster of peripherals this central
//! manages, mapping logical slots to BLE addresses and display names.
//!
//! Populated once at startup and never mutated afterwards.  Slots are
//! dense indices `0..len`, so slot-to-address lookup is a direct array
//! access; address-to-slot lookup is a scan over at most
//! [`MAX_PERIPHERALS`](crate::config::MAX_PERIPHERALS) 6-byte entries.

use crate::config::{MAX_NAME_LEN, MAX_PERIPHERALS};
use heapless::{String, Vec};

/// A 6-byte BLE device address.
///
/// Stored most-significant byte first, matching the usual
/// `aa:bb:cc:dd:ee:ff` text form.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeerAddress(pub [u8; 6]);

impl PeerAddress {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Build from the little-endian byte order used on air (radio
    /// stacks report the least-significant byte first).
    pub const fn from_le_bytes(le: [u8; 6]) -> Self {
        Self([le[5], le[4], le[3], le[2], le[1], le[0]])
    }

    /// Little-endian byte order for handing back to the radio stack.
    pub const fn to_le_bytes(self) -> [u8; 6] {
        let b = self.0;
        [b[5], b[4], b[3], b[2], b[1], b[0]]
    }

    /// Parse the `aa:bb:cc:dd:ee:ff` text form (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        let bytes = s.as_bytes();
        if bytes.len() != 17 {
            return None;
        }
        let mut out = [0u8; 6];
        for (i, chunk) in bytes.chunks(3).enumerate() {
            let hi = hex_nibble(chunk[0])?;
            let lo = hex_nibble(chunk[1])?;
            if chunk.len() == 3 && chunk[2] != b':' {
                return None;
            }
            out[i] = (hi << 4) | lo;
        }
        Some(Self(out))
    }
}

impl core::fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

fn hex_nibble(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// One registered peripheral.
#[derive(Clone, Debug)]
pub struct DeviceIdentity {
    pub address: PeerAddress,
    pub name: String<MAX_NAME_LEN>,
}

impl DeviceIdentity {
    pub fn new(address: PeerAddress, name: &str) -> Self {
        let mut n: String<MAX_NAME_LEN> = String::new();
        for c in name.chars().take(MAX_NAME_LEN - 1) {
            let _ = n.push(c);
        }
        Self { address, name: n }
    }
}

/// Registry errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegistryError {
    /// The roster is full.
    Full,
    /// The address text form could not be parsed.
    BadAddress,
    /// The same address was registered twice.
    Duplicate,
}

/// The slot-indexed peripheral roster.
#[derive(Clone, Debug, Default)]
pub struct DeviceRegistry {
    entries: Vec<DeviceIdentity, MAX_PERIPHERALS>,
}

impl DeviceRegistry {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Build a registry from `(address, name)` text pairs, e.g. the
    /// deployment table in [`config`](crate::config).
    pub fn from_table(table: &[(&str, &str)]) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for (addr, name) in table {
            let address = PeerAddress::parse(addr).ok_or(RegistryError::BadAddress)?;
            registry.register(DeviceIdentity::new(address, name))?;
        }
        Ok(registry)
    }

    /// Register the next peripheral; its slot is the returned index.
    pub fn register(&mut self, identity: DeviceIdentity) -> Result<u8, RegistryError> {
        if self.slot_of(&identity.address).is_some() {
            return Err(RegistryError::Duplicate);
        }
        let slot = self.entries.len() as u8;
        self.entries
            .push(identity)
            .map_err(|_| RegistryError::Full)?;
        Ok(slot)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn slot_of(&self, address: &PeerAddress) -> Option<u8> {
        self.entries
            .iter()
            .position(|e| e.address == *address)
            .map(|i| i as u8)
    }

    pub fn address_of(&self, slot: u8) -> Option<PeerAddress> {
        self.entries.get(slot as usize).map(|e| e.address)
    }

    pub fn name_of(&self, slot: u8) -> Option<&str> {
        self.entries.get(slot as usize).map(|e| e.name.as_str())
    }

    /// Match an advertisement against the roster by address or, as a
    /// fallback, by advertised local name.
    pub fn matches(&self, address: &PeerAddress, name: Option<&str>) -> Option<u8> {
        if let Some(slot) = self.slot_of(address) {
            return Some(slot);
        }
        let name = name?;
        self.entries
            .iter()
            .position(|e| !e.name.is_empty() && e.name.as_str() == name)
            .map(|i| i as u8)
    }
}
