//! Last-set command values, one record per `(slot, characteristic)`.
//!
//! The external transport replays these on startup so operator UIs
//! recover their state after a reboot, and the embedded glue persists
//! the serialized image to flash.  The byte format is append-simple:
//!
//! ```text
//! [count] ([slot] [characteristic code] [value len] [value bytes...])*
//! ```

use crate::config::{VentCharacteristic, MAX_STORED_VALUES, MAX_VALUE_LEN};
use heapless::{String, Vec};

/// Largest serialized image: count byte plus full records.
pub const MAX_IMAGE_SIZE: usize = 1 + MAX_STORED_VALUES * (3 + MAX_VALUE_LEN);

/// One persisted value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredValue {
    pub slot: u8,
    pub characteristic: VentCharacteristic,
    pub value: String<MAX_VALUE_LEN>,
}

/// In-memory cache of last-set values, synced with flash by the glue.
#[derive(Debug, Default)]
pub struct LastValueStore {
    entries: Vec<StoredValue, MAX_STORED_VALUES>,
    /// True if the cache differs from the persisted image.
    dirty: bool,
}

impl LastValueStore {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            dirty: false,
        }
    }

    /// Record a value, replacing any previous one for the same key.
    /// Telemetry (voltage) is never recorded.
    pub fn set(&mut self, slot: u8, characteristic: VentCharacteristic, value: &str) {
        if characteristic == VentCharacteristic::Voltage {
            return;
        }
        let mut v: String<MAX_VALUE_LEN> = String::new();
        for c in value.chars().take(MAX_VALUE_LEN) {
            let _ = v.push(c);
        }

        if let Some(existing) = self
            .entries
            .iter_mut()
            .find(|e| e.slot == slot && e.characteristic == characteristic)
        {
            if existing.value != v {
                existing.value = v;
                self.dirty = true;
            }
            return;
        }

        if self
            .entries
            .push(StoredValue {
                slot,
                characteristic,
                value: v,
            })
            .is_ok()
        {
            self.dirty = true;
        }
    }

    pub fn get(&self, slot: u8, characteristic: VentCharacteristic) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.slot == slot && e.characteristic == characteristic)
            .map(|e| e.value.as_str())
    }

    /// Iterate stored values for startup replay.
    pub fn iter(&self) -> impl Iterator<Item = &StoredValue> {
        self.entries.iter()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Serialize all records into `buf`; returns the image length, or 0
    /// if the buffer is too small.
    pub fn serialize_all(&self, buf: &mut [u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }
        buf[0] = self.entries.len() as u8;
        let mut offset = 1;

        for entry in &self.entries {
            let value = entry.value.as_bytes();
            let record_len = 3 + value.len();
            if offset + record_len > buf.len() {
                return 0;
            }
            buf[offset] = entry.slot;
            buf[offset + 1] = entry.characteristic.code();
            buf[offset + 2] = value.len() as u8;
            buf[offset + 3..offset + record_len].copy_from_slice(value);
            offset += record_len;
        }
        offset
    }

    /// Rebuild the cache from a serialized image.  Truncated or
    /// malformed trailing records are dropped silently.
    pub fn deserialize_all(&mut self, data: &[u8]) {
        self.entries.clear();
        self.dirty = false;

        let Some(&count) = data.first() else {
            return;
        };
        let mut offset = 1;

        for _ in 0..count {
            if offset + 3 > data.len() {
                break;
            }
            let slot = data[offset];
            let code = data[offset + 1];
            let len = data[offset + 2] as usize;
            if len > MAX_VALUE_LEN || offset + 3 + len > data.len() {
                break;
            }

            let value_slice = &data[offset + 3..offset + 3 + len];
            offset += 3 + len;

            let Some(characteristic) = VentCharacteristic::from_code(code) else {
                continue;
            };
            let Ok(text) = core::str::from_utf8(value_slice) else {
                continue;
            };
            let mut value: String<MAX_VALUE_LEN> = String::new();
            let _ = value.push_str(text);

            if self
                .entries
                .push(StoredValue {
                    slot,
                    characteristic,
                    value,
                })
                .is_err()
            {
                break;
            }
        }
    }
}
