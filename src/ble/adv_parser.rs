//! Advertisement payload helpers for the scanner filter.
//!
//! Peripherals are matched primarily by address against the identity
//! registry; these helpers extract the advertised local name (the
//! fallback match key) and detect the vent service in the 128-bit
//! service UUID list.

use crate::config::{MAX_NAME_LEN, VENT_SERVICE_UUID_BYTES};
use heapless::String;

const AD_TYPE_INCOMPLETE_128: u8 = 0x06;
const AD_TYPE_COMPLETE_128: u8 = 0x07;
const AD_TYPE_SHORTENED_NAME: u8 = 0x08;
const AD_TYPE_COMPLETE_NAME: u8 = 0x09;

/// Iterator over the `(type, payload)` AD structures of a raw
/// advertisement.  Stops at the first malformed length byte.
struct AdStructures<'a> {
    data: &'a [u8],
}

impl<'a> Iterator for AdStructures<'a> {
    type Item = (u8, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.len() < 2 {
            return None;
        }
        let len = self.data[0] as usize;
        if len == 0 || len > self.data.len() - 1 {
            return None;
        }
        let ad_type = self.data[1];
        let payload = &self.data[2..1 + len];
        self.data = &self.data[1 + len..];
        Some((ad_type, payload))
    }
}

fn structures(data: &[u8]) -> AdStructures<'_> {
    AdStructures { data }
}

/// Check whether the advertisement lists the vent control service.
///
/// 128-bit UUIDs appear little-endian on air, so each 16-byte entry is
/// compared reversed against the big-endian constant.
pub fn contains_vent_service_uuid(data: &[u8]) -> bool {
    structures(data)
        .filter(|(t, _)| *t == AD_TYPE_INCOMPLETE_128 || *t == AD_TYPE_COMPLETE_128)
        .flat_map(|(_, payload)| payload.chunks_exact(16))
        .any(|uuid| uuid.iter().rev().eq(VENT_SERVICE_UUID_BYTES.iter()))
}

/// Extract the complete or shortened local name, if advertised.
pub fn extract_device_name(data: &[u8]) -> Option<String<MAX_NAME_LEN>> {
    structures(data)
        .find(|(t, _)| *t == AD_TYPE_SHORTENED_NAME || *t == AD_TYPE_COMPLETE_NAME)
        .and_then(|(_, payload)| core::str::from_utf8(payload).ok())
        .map(|s| {
            let mut name: String<MAX_NAME_LEN> = String::new();
            for c in s.chars() {
                if name.push(c).is_err() {
                    break;
                }
            }
            name
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Little-endian form of the vent service UUID for test payloads.
    fn vent_uuid_le() -> [u8; 16] {
        let mut le = VENT_SERVICE_UUID_BYTES;
        le.reverse();
        le
    }

    #[test]
    fn detect_vent_uuid_in_advertisement() {
        let mut ad = heapless::Vec::<u8, 32>::new();
        ad.push(17).unwrap();
        ad.push(AD_TYPE_COMPLETE_128).unwrap();
        ad.extend_from_slice(&vent_uuid_le()).unwrap();
        assert!(contains_vent_service_uuid(&ad));
    }

    #[test]
    fn incomplete_uuid_list_is_also_checked() {
        let mut ad = heapless::Vec::<u8, 32>::new();
        ad.push(17).unwrap();
        ad.push(AD_TYPE_INCOMPLETE_128).unwrap();
        ad.extend_from_slice(&vent_uuid_le()).unwrap();
        assert!(contains_vent_service_uuid(&ad));
    }

    #[test]
    fn foreign_uuid_is_not_matched() {
        let mut ad = heapless::Vec::<u8, 32>::new();
        ad.push(17).unwrap();
        ad.push(AD_TYPE_COMPLETE_128).unwrap();
        ad.extend_from_slice(&[0xab; 16]).unwrap();
        assert!(!contains_vent_service_uuid(&ad));
    }

    #[test]
    fn empty_and_malformed_advertisements() {
        assert!(!contains_vent_service_uuid(&[]));
        assert!(!contains_vent_service_uuid(&[0x00]));
        // Length byte runs past the end of the payload.
        assert!(!contains_vent_service_uuid(&[0x10, AD_TYPE_COMPLETE_128, 0x01]));
    }

    #[test]
    fn extract_complete_local_name() {
        let ad = [
            0x05, AD_TYPE_COMPLETE_NAME, b'H', b'V', b'A', b'C', // name
            0x02, 0x01, 0x06, // flags
        ];
        assert_eq!(extract_device_name(&ad).unwrap().as_str(), "HVAC");
    }

    #[test]
    fn extract_shortened_local_name() {
        let ad = [0x04, AD_TYPE_SHORTENED_NAME, b'V', b'n', b't'];
        assert_eq!(extract_device_name(&ad).unwrap().as_str(), "Vnt");
    }

    #[test]
    fn no_name_in_advertisement() {
        let ad = [0x02, 0x01, 0x06];
        assert!(extract_device_name(&ad).is_none());
    }

    #[test]
    fn non_utf8_name_is_ignored() {
        let ad = [0x03, AD_TYPE_COMPLETE_NAME, 0xff, 0xfe];
        assert!(extract_device_name(&ad).is_none());
    }

    #[test]
    fn overlong_name_is_truncated_to_capacity() {
        let mut ad = [b'X'; 40];
        ad[0] = 38;
        ad[1] = AD_TYPE_COMPLETE_NAME;
        let name = extract_device_name(&ad).unwrap();
        assert_eq!(name.len(), MAX_NAME_LEN);
    }
}
