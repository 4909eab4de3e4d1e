//! GATT vent-service client - per-link characteristic access.
//!
//! After GAP connection is established, this module:
//! 1. Discovers the vent control service on the peripheral.
//! 2. Enables CCCD notifications on the voltage characteristic.
//! 3. Forwards voltage notifications to the central task, tagged with
//!    the peripheral address so the engine can demultiplex them.
//! 4. Performs characteristic writes on behalf of the central task.

use crate::ble::registry::PeerAddress;
use crate::ble::SlotEvent;
use crate::config::{VentCharacteristic, MAX_VALUE_LEN};
use crate::error::BleError;
use defmt::{info, warn};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Sender;
use heapless::Vec;
use nrf_softdevice::ble::{gatt_client, Connection};

/// nrf-softdevice GATT client struct for the vent control service.
///
/// The `#[nrf_softdevice::gatt_client]` macro generates discovery and
/// read/write/notify helpers for the listed characteristics.  All
/// values are short UTF-8 strings on the wire.
#[nrf_softdevice::gatt_client(uuid = "5678abcd-0000-1000-8000-00805f9b34fb")]
pub struct VentServiceClient {
    /// Fan speed (`low` / `medium` / `high` / `auto`).
    #[characteristic(uuid = "5678abcd-0001-1000-8000-00805f9b34fb", write)]
    pub speed: Vec<u8, MAX_VALUE_LEN>,

    /// HVAC operating mode (`heat` / `cold`).
    #[characteristic(uuid = "5678abcd-0002-1000-8000-00805f9b34fb", write)]
    pub mode: Vec<u8, MAX_VALUE_LEN>,

    /// On/off state.
    #[characteristic(uuid = "5678abcd-0003-1000-8000-00805f9b34fb", write)]
    pub state: Vec<u8, MAX_VALUE_LEN>,

    /// Target temperature, integer degrees.
    #[characteristic(uuid = "5678abcd-0004-1000-8000-00805f9b34fb", write)]
    pub temp: Vec<u8, MAX_VALUE_LEN>,

    /// Supply voltage telemetry - notifications carry numeric strings.
    #[characteristic(uuid = "5678abcd-0005-1000-8000-00805f9b34fb", read, notify)]
    pub voltage: Vec<u8, MAX_VALUE_LEN>,
}

/// Discover the vent service on the connected peripheral and subscribe
/// to voltage notifications.
///
/// Returns the `VentServiceClient` on success so the caller can manage
/// the subscription lifetime.
pub async fn discover_and_subscribe(conn: &Connection) -> Result<VentServiceClient, BleError> {
    let client: VentServiceClient = gatt_client::discover(conn)
        .await
        .map_err(|_| BleError::ServiceNotFound)?;

    client
        .voltage_cccd_write(true)
        .await
        .map_err(|_| BleError::NotifyFailed)?;

    info!("vent service discovered, voltage notifications enabled");
    Ok(client)
}

/// Write a UTF-8 value to one writable characteristic.
pub async fn write_value(
    client: &VentServiceClient,
    characteristic: VentCharacteristic,
    value: &str,
) -> Result<(), BleError> {
    let mut buf: Vec<u8, MAX_VALUE_LEN> = Vec::new();
    buf.extend_from_slice(value.as_bytes())
        .map_err(|_| BleError::WriteFailed)?;

    let result = match characteristic {
        VentCharacteristic::Speed => client.speed_write(&buf).await,
        VentCharacteristic::Mode => client.mode_write(&buf).await,
        VentCharacteristic::State => client.state_write(&buf).await,
        VentCharacteristic::Temp => client.temp_write(&buf).await,
        // Telemetry source, not writable.
        VentCharacteristic::Voltage => return Err(BleError::WriteFailed),
    };
    result.map_err(|_| BleError::WriteFailed)
}

/// Run the notification listener loop.
///
/// Blocks until the connection drops.  Each voltage notification is
/// forwarded to the central task tagged with the peripheral address.
pub async fn run_notification_loop(
    conn: &Connection,
    client: &VentServiceClient,
    peer: PeerAddress,
    slot_event_tx: &Sender<'_, CriticalSectionRawMutex, SlotEvent, 8>,
) {
    let _result = gatt_client::run(conn, client, |event| match event {
        VentServiceClientEvent::VoltageNotification(payload) => {
            // try_send avoids blocking in event context; the engine
            // mailbox keeps only the newest value anyway, so dropping
            // under pressure loses nothing that matters.
            if slot_event_tx
                .try_send(SlotEvent::Notification {
                    address: peer,
                    payload,
                })
                .is_err()
            {
                warn!("telemetry channel full - dropping notification");
            }
        }
    })
    .await;

    info!("notification loop ended (connection closed)");
}
