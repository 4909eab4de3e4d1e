//! BLE GAP scanner - continuous discovery of roster peripherals.
//!
//! Uses the SoftDevice Central-role scanning API.  Advertisements are
//! filtered by the presence of the vent service UUID, then matched
//! against the identity roster by address or advertised local name.
//! The scan stops at the first match (the central connects to it) or
//! when the window deadline passes; the caller re-arms in both cases,
//! so discovery never stops for good.

use crate::ble::adv_parser::{contains_vent_service_uuid, extract_device_name};
use crate::ble::registry::{DeviceRegistry, PeerAddress};
use crate::config::{BLE_SCAN_INTERVAL, BLE_SCAN_WINDOW, BLE_SCAN_WINDOW_MS, MAX_NAME_LEN, MAX_PERIPHERALS};
use crate::error::BleError;
use defmt::info;
use embassy_time::{Duration, Instant};
use heapless::String;
use nrf_softdevice::ble::{central, Address};
use nrf_softdevice::Softdevice;

/// One roster peripheral seen on air.
pub struct ScanMatch {
    /// Canonical (MSB-first) address, for the engine.
    pub peer: PeerAddress,
    /// SoftDevice address including type, for the connect whitelist.
    pub target: Address,
    /// Advertised local name, if present.
    pub name: Option<String<MAX_NAME_LEN>>,
}

/// Run one scan window of [`BLE_SCAN_WINDOW_MS`].
///
/// Returns `Ok(Some(_))` on the first advertisement that matches an
/// unlinked roster entry, `Ok(None)` when the window closes without a
/// match.  `linked` masks out slots that already hold a live link so
/// their advertisements do not keep interrupting the scan.
pub async fn scan_for_roster(
    sd: &Softdevice,
    roster: &DeviceRegistry,
    linked: &[bool; MAX_PERIPHERALS],
) -> Result<Option<ScanMatch>, BleError> {
    let config = central::ScanConfig {
        // Active scan to retrieve scan-response data (device names).
        active: true,
        interval: BLE_SCAN_INTERVAL as u32,
        window: BLE_SCAN_WINDOW as u32,
        ..Default::default()
    };

    // Deadline so one scan pass doesn't run forever; the central task
    // restarts us immediately after handling the window end.
    let deadline = Instant::now() + Duration::from_millis(BLE_SCAN_WINDOW_MS);

    // The SoftDevice scan callback receives each advertisement.  We
    // never connect from callback context; a match just stops the scan
    // and is handed back to the caller.
    let result = central::scan(sd, &config, |params| {
        let data =
            unsafe { core::slice::from_raw_parts(params.data.p_data, params.data.len as usize) };

        if Instant::now() > deadline {
            return Some(None); // Window over - caller re-arms.
        }

        if !contains_vent_service_uuid(data) {
            return None;
        }

        let target = Address::from_raw(params.peer_addr);
        let peer = PeerAddress::from_le_bytes(target.bytes());
        let name = extract_device_name(data);

        match roster.matches(&peer, name.as_deref()) {
            Some(slot) if !linked[slot as usize] => {
                info!("scan: roster peripheral {} in range (slot {})", peer, slot);
                Some(Some(ScanMatch { peer, target, name }))
            }
            _ => None,
        }
    })
    .await;

    result.map_err(|_| BleError::ScanFailed)
}
