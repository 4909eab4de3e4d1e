//! Bluetooth Low Energy subsystem.
//!
//! This module drives the Nordic SoftDevice S140 in **Central** role:
//!
//! 1. **Scanner** - discovers roster peripherals from their
//!    advertisements (continuous scan with automatic re-arm).
//! 2. **Engine** - the pure connection-lifecycle state machine:
//!    connection table, pending commands, telemetry mailbox.
//! 3. **Central task** - applies radio events to the engine and routes
//!    slot commands to the per-link tasks.
//! 4. **Vent client** - GATT discovery, voltage subscription, and
//!    characteristic writes on one connected peripheral.
//!
//! Only the pure parts (registry, engine, advertisement parsing) build
//! on the host; the radio glue needs the `embedded` feature.

pub mod adv_parser;
pub mod engine;
pub mod registry;

#[cfg(feature = "embedded")]
pub mod central;
#[cfg(feature = "embedded")]
pub mod scanner;
#[cfg(feature = "embedded")]
pub mod vent_client;

#[cfg(feature = "embedded")]
mod types {
    use crate::ble::engine::Telemetry;
    use crate::ble::registry::PeerAddress;
    use crate::config::{VentCharacteristic, MAX_VALUE_LEN};
    use defmt::Format;
    use heapless::String;
    use nrf_softdevice::ble::Address;

    /// Commands the transport layer sends to the central task.
    #[derive(Clone, Format)]
    pub enum CentralCommand {
        /// Write `value` to `characteristic` on the peripheral in `slot`,
        /// buffering if the slot is down.
        Send {
            slot: u8,
            characteristic: VentCharacteristic,
            value: String<MAX_VALUE_LEN>,
        },
    }

    /// Events the central task publishes for the transport / status layer.
    #[derive(Clone, Format)]
    pub enum CentralEvent {
        /// A peripheral link came up.
        SlotUp { slot: u8 },
        /// A peripheral link went down.
        SlotDown { slot: u8 },
        /// Aggregate connectivity changed.
        Connectivity { any: bool },
        /// A telemetry value was drained from the mailbox.
        Telemetry(Telemetry),
        /// A value restored from flash at startup, for replay.
        Stored {
            slot: u8,
            characteristic: VentCharacteristic,
            value: String<MAX_VALUE_LEN>,
        },
    }

    /// Commands the central task sends to one per-slot link task.
    #[derive(Clone, Format)]
    pub enum SlotCommand {
        /// Connect to the peripheral and run its notification loop.
        /// `target` is the SoftDevice address (with type) captured from
        /// the matched advertisement, used for the connect whitelist.
        Connect { peer: PeerAddress, target: Address },
        /// Write a characteristic on the live link.
        Write {
            characteristic: VentCharacteristic,
            value: String<MAX_VALUE_LEN>,
        },
    }

    /// Events one per-slot link task reports back.
    #[derive(Clone, Format)]
    pub enum SlotEvent {
        Established { slot: u8, address: PeerAddress },
        ConnectFailed { slot: u8, address: PeerAddress },
        LinkLost { slot: u8 },
        Notification { address: PeerAddress, payload: heapless::Vec<u8, { MAX_VALUE_LEN }> },
        /// Connected, but the vent service or a characteristic is
        /// missing; the link stays up.
        ServiceFault { slot: u8 },
    }
}

#[cfg(feature = "embedded")]
pub use types::{CentralCommand, CentralEvent, SlotCommand, SlotEvent};
