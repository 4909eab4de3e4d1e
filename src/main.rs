//! Firmware entry point for the nRF52840 duct-link controller.
//!
//! Brings up Embassy and the SoftDevice S140 in Central role with one
//! connection slot per deployed unit, then spawns:
//!
//! - the SoftDevice event loop,
//! - the central orchestration task (engine owner),
//! - one link task per roster slot,
//! - the transport uplink (currently a defmt placeholder).

#![no_std]
#![no_main]

use defmt_rtt as _;
use panic_probe as _;

use defmt::{info, unwrap};
use ductlink::ble::central::{self, MAX_LINKS};
use ductlink::ble::{CentralCommand, CentralEvent, SlotCommand, SlotEvent};
use ductlink::protocol;
use embassy_executor::Spawner;
use embassy_nrf::interrupt::Priority;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use nrf_softdevice::{raw, Softdevice};

static CENTRAL_CMD: Channel<CriticalSectionRawMutex, CentralCommand, 4> = Channel::new();
static CENTRAL_EVT: Channel<CriticalSectionRawMutex, CentralEvent, 8> = Channel::new();
static SLOT_EVT: Channel<CriticalSectionRawMutex, SlotEvent, 8> = Channel::new();
static SLOT_CMD: [Channel<CriticalSectionRawMutex, SlotCommand, 2>; MAX_LINKS] =
    [Channel::new(), Channel::new(), Channel::new(), Channel::new()];

#[embassy_executor::task]
async fn softdevice_task(sd: &'static Softdevice) -> ! {
    sd.run().await
}

#[embassy_executor::task]
async fn central_task(sd: &'static Softdevice) -> ! {
    let cmd_rx = CENTRAL_CMD.receiver();
    let event_tx = CENTRAL_EVT.sender();
    let slot_event_rx = SLOT_EVT.receiver();
    let slot_txs = [
        SLOT_CMD[0].sender(),
        SLOT_CMD[1].sender(),
        SLOT_CMD[2].sender(),
        SLOT_CMD[3].sender(),
    ];
    central::central_task(sd, &cmd_rx, &event_tx, slot_txs, &slot_event_rx).await
}

#[embassy_executor::task(pool_size = MAX_LINKS)]
async fn link_task(slot: u8, sd: &'static Softdevice) -> ! {
    let cmd_rx = SLOT_CMD[slot as usize].receiver();
    let event_tx = SLOT_EVT.sender();
    central::link_task(slot, sd, &cmd_rx, &event_tx).await
}

/// Placeholder uplink: formats engine events into the wire protocol
/// and logs them.  The external bridge (WebSocket / cloud) publishes
/// these and feeds operator requests into `CENTRAL_CMD`.
#[embassy_executor::task]
async fn transport_task() -> ! {
    let events = CENTRAL_EVT.receiver();
    loop {
        match events.receive().await {
            CentralEvent::Telemetry(telemetry) => {
                let msg = protocol::telemetry_message(telemetry.slot, &telemetry.payload);
                info!("uplink: {}", msg.as_str());
            }
            CentralEvent::Stored {
                slot,
                characteristic,
                value,
            } => {
                if let Some(msg) = protocol::replay_message(slot, characteristic, &value) {
                    info!("uplink (replay): {}", msg.as_str());
                }
            }
            CentralEvent::SlotUp { slot } => info!("uplink: slot {} connected", slot),
            CentralEvent::SlotDown { slot } => info!("uplink: slot {} disconnected", slot),
            CentralEvent::Connectivity { any } => info!("uplink: any_connected={}", any),
        }
    }
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("ductlink starting");

    let mut config = embassy_nrf::config::Config::default();
    // The SoftDevice reserves the highest interrupt priorities.
    config.gpiote_interrupt_priority = Priority::P2;
    config.time_interrupt_priority = Priority::P2;
    let _p = embassy_nrf::init(config);

    let sd_config = nrf_softdevice::Config {
        clock: Some(raw::nrf_clock_lf_cfg_t {
            source: raw::NRF_CLOCK_LF_SRC_RC as u8,
            rc_ctiv: 16,
            rc_temp_ctiv: 2,
            accuracy: raw::NRF_CLOCK_LF_ACCURACY_500_PPM as u8,
        }),
        conn_gap: Some(raw::ble_gap_conn_cfg_t {
            conn_count: MAX_LINKS as u8,
            event_length: 24,
        }),
        conn_gatt: Some(raw::ble_gatt_conn_cfg_t { att_mtu: 128 }),
        gap_role_count: Some(raw::ble_gap_cfg_role_count_t {
            adv_set_count: 1,
            periph_role_count: 0,
            central_role_count: MAX_LINKS as u8,
            central_sec_count: 0,
            _bitfield_1: raw::ble_gap_cfg_role_count_t::new_bitfield_1(0),
        }),
        ..Default::default()
    };

    let sd = Softdevice::enable(&sd_config);

    unwrap!(spawner.spawn(softdevice_task(sd)));
    unwrap!(spawner.spawn(central_task(sd)));
    for slot in 0..MAX_LINKS as u8 {
        unwrap!(spawner.spawn(link_task(slot, sd)));
    }
    unwrap!(spawner.spawn(transport_task()));
}
