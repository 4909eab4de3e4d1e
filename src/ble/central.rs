//! Central orchestration - owns the connection engine and routes radio
//! traffic between the scanner, the per-slot link tasks, and the
//! transport layer.
//!
//! The [`CentralEngine`] is single-owner state: only [`central_task`]
//! touches it.  Link tasks report transitions over the slot-event
//! channel instead of mutating shared state, and the scanner hands
//! matches back as return values.  The engine decides; this module
//! performs the radio work.

use crate::ble::engine::{CentralEngine, Dispatch, ScanPhase};
use crate::ble::registry::{DeviceRegistry, PeerAddress};
use crate::ble::{scanner, vent_client, CentralCommand, CentralEvent, SlotCommand, SlotEvent};
use crate::config::{
    self, DEFAULT_IDENTITIES, MAX_PERIPHERALS, POLL_INTERVAL_MS,
};
use crate::error::BleError;
use crate::storage;
use crate::state_store::LastValueStore;
use core::pin::pin;
use defmt::{info, unwrap, warn};
use embassy_futures::select::{select, select3, select4, Either, Either3, Either4};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Receiver, Sender};
use embassy_time::{with_timeout, Duration, Ticker, Timer};
use nrf_softdevice::ble::{central, Address};
use nrf_softdevice::{raw, Softdevice};

/// Number of concurrent BLE links (one per deployed unit); must match
/// the SoftDevice `conn_count` configuration.
pub const MAX_LINKS: usize = 4;

type SlotSender = Sender<'static, CriticalSectionRawMutex, SlotCommand, 2>;

pub async fn central_task(
    sd: &'static Softdevice,
    cmd_rx: &Receiver<'static, CriticalSectionRawMutex, CentralCommand, 4>,
    event_tx: &Sender<'static, CriticalSectionRawMutex, CentralEvent, 8>,
    slot_txs: [SlotSender; MAX_LINKS],
    slot_event_rx: &Receiver<'static, CriticalSectionRawMutex, SlotEvent, 8>,
) -> ! {
    let mut flash = nrf_softdevice::Flash::take(sd);

    let roster = unwrap!(DeviceRegistry::from_table(&DEFAULT_IDENTITIES));
    let mut engine = CentralEngine::new(roster.clone());
    engine.start();

    // Restore last-set values and replay them for the transport layer.
    let mut store = LastValueStore::new();
    storage::load(&mut flash, &mut store).await;
    for entry in store.iter() {
        event_tx
            .send(CentralEvent::Stored {
                slot: entry.slot,
                characteristic: entry.characteristic,
                value: entry.value.clone(),
            })
            .await;
    }

    info!("central up - {} roster identities", roster.len());

    let mut ticker = Ticker::every(Duration::from_millis(POLL_INTERVAL_MS));

    loop {
        // While a connect attempt is in flight the scanner stays down;
        // only commands, slot events, and the drain tick are serviced.
        if engine.phase() == ScanPhase::ConnectPending {
            match select3(cmd_rx.receive(), slot_event_rx.receive(), ticker.next()).await {
                Either3::First(cmd) => {
                    handle_command(&mut engine, &mut store, &mut flash, &slot_txs, cmd).await
                }
                Either3::Second(event) => {
                    handle_slot_event(&mut engine, &slot_txs, event_tx, event).await
                }
                Either3::Third(()) => drain_telemetry(&mut engine, event_tx).await,
            }
            continue;
        }

        let mut linked = [false; MAX_PERIPHERALS];
        for (slot, entry) in linked.iter_mut().enumerate() {
            *entry = engine.link_for_slot(slot as u8).is_some();
        }

        let scan = scanner::scan_for_roster(sd, &roster, &linked);
        match select4(scan, cmd_rx.receive(), slot_event_rx.receive(), ticker.next()).await {
            Either4::First(Ok(Some(found))) => {
                if engine
                    .on_advertisement(&found.peer, found.name.as_deref())
                    .is_some()
                {
                    if let Some(candidate) = engine.poll() {
                        info!("connecting slot {} ({})", candidate.slot, candidate.address);
                        match slot_txs.get(candidate.slot as usize) {
                            Some(tx) => {
                                tx.send(SlotCommand::Connect {
                                    peer: candidate.address,
                                    target: found.target,
                                })
                                .await;
                            }
                            None => {
                                // Spare bench identities can live in
                                // roster slots beyond the link-task
                                // pool.  Resolve the attempt as failed
                                // so scanning resumes.
                                warn!("no link task for slot {}", candidate.slot);
                                engine.on_connect_failed(&candidate.address);
                            }
                        }
                    }
                }
            }
            Either4::First(Ok(None)) => {
                // Window closed without a match; re-arm immediately.
                engine.on_scan_end();
            }
            Either4::First(Err(e)) => {
                warn!("scan failed ({}), re-arming", e);
                engine.on_scan_end();
                Timer::after(Duration::from_millis(200)).await;
            }
            Either4::Second(cmd) => {
                handle_command(&mut engine, &mut store, &mut flash, &slot_txs, cmd).await
            }
            Either4::Third(event) => {
                handle_slot_event(&mut engine, &slot_txs, event_tx, event).await
            }
            Either4::Fourth(()) => drain_telemetry(&mut engine, event_tx).await,
        }
    }
}

async fn handle_command(
    engine: &mut CentralEngine,
    store: &mut LastValueStore,
    flash: &mut nrf_softdevice::Flash,
    slot_txs: &[SlotSender; MAX_LINKS],
    cmd: CentralCommand,
) {
    match cmd {
        CentralCommand::Send {
            slot,
            characteristic,
            value,
        } => {
            match engine.send_command(slot, characteristic, &value) {
                Ok(Dispatch::Sent { link: _ }) => {
                    if let Some(tx) = slot_txs.get(slot as usize) {
                        tx.send(SlotCommand::Write {
                            characteristic,
                            value: value.clone(),
                        })
                        .await;
                    }
                }
                Ok(Dispatch::Buffered) => {
                    info!("slot {} down - buffered {} write", slot, characteristic);
                }
                Err(e) => {
                    warn!("command rejected: {}", e);
                    return;
                }
            }
            // Record for startup replay (telemetry is skipped inside).
            store.set(slot, characteristic, &value);
            storage::save(flash, store).await;
        }
    }
}

async fn handle_slot_event(
    engine: &mut CentralEngine,
    slot_txs: &[SlotSender; MAX_LINKS],
    event_tx: &Sender<'static, CriticalSectionRawMutex, CentralEvent, 8>,
    event: SlotEvent,
) {
    match event {
        SlotEvent::Established { slot, address } => match engine.on_link_established(&address) {
            Ok(up) => {
                info!("slot {} up", up.slot);
                if let Some(flush) = up.flush {
                    if let Some(tx) = slot_txs.get(up.slot as usize) {
                        tx.send(SlotCommand::Write {
                            characteristic: flush.characteristic,
                            value: flush.value,
                        })
                        .await;
                    }
                }
                event_tx.send(CentralEvent::SlotUp { slot: up.slot }).await;
                event_tx.send(CentralEvent::Connectivity { any: true }).await;
            }
            Err(e) => warn!("unexpected link report from slot {}: {}", slot, e),
        },
        SlotEvent::ConnectFailed { slot, address } => {
            warn!("slot {} connect failed ({})", slot, address);
            engine.on_connect_failed(&address);
        }
        SlotEvent::LinkLost { slot } => {
            if let Some(id) = engine.link_for_slot(slot) {
                engine.on_link_lost(id);
            }
            info!("slot {} down", slot);
            event_tx.send(CentralEvent::SlotDown { slot }).await;
            event_tx
                .send(CentralEvent::Connectivity {
                    any: engine.is_any_connected(),
                })
                .await;
        }
        SlotEvent::Notification { address, payload } => {
            if let Err(e) = engine.on_notification(&address, &payload) {
                warn!("notification dropped: {}", e);
            }
        }
        SlotEvent::ServiceFault { slot } => {
            warn!("slot {} vent service fault", slot);
        }
    }
}

async fn drain_telemetry(
    engine: &mut CentralEngine,
    event_tx: &Sender<'static, CriticalSectionRawMutex, CentralEvent, 8>,
) {
    while let Some(telemetry) = engine.take_notification() {
        event_tx.send(CentralEvent::Telemetry(telemetry)).await;
    }
}

/// One per-slot link task: waits for a connect order, then owns the
/// link (writes + notification loop) until it drops.
pub async fn link_task(
    slot: u8,
    sd: &'static Softdevice,
    cmd_rx: &Receiver<'static, CriticalSectionRawMutex, SlotCommand, 2>,
    slot_event_tx: &Sender<'static, CriticalSectionRawMutex, SlotEvent, 8>,
) -> ! {
    loop {
        match cmd_rx.receive().await {
            SlotCommand::Connect { peer, target } => {
                connect_and_run(sd, slot, peer, target, cmd_rx, slot_event_tx).await;
            }
            // A write can race link loss: it was dispatched against a
            // link that is already gone.  Sent commands are
            // best-effort, so the write is reported lost, not retried.
            SlotCommand::Write { characteristic, .. } => {
                warn!("slot {}: dropping {} write, link is down", slot, characteristic);
            }
        }
    }
}

async fn connect_and_run(
    sd: &'static Softdevice,
    slot: u8,
    peer: PeerAddress,
    target: Address,
    cmd_rx: &Receiver<'static, CriticalSectionRawMutex, SlotCommand, 2>,
    slot_event_tx: &Sender<'static, CriticalSectionRawMutex, SlotEvent, 8>,
) {
    info!("slot {} connecting to {}", slot, peer);

    let whitelist = [&target];
    let conn_cfg = central::ConnectConfig {
        scan_config: central::ScanConfig {
            whitelist: Some(&whitelist),
            ..Default::default()
        },
        conn_params: raw::ble_gap_conn_params_t {
            min_conn_interval: config::BLE_CONN_INTERVAL_MIN,
            max_conn_interval: config::BLE_CONN_INTERVAL_MAX,
            slave_latency: config::BLE_SLAVE_LATENCY,
            conn_sup_timeout: config::BLE_SUP_TIMEOUT,
        },
        ..Default::default()
    };

    let conn = match with_timeout(
        Duration::from_millis(config::BLE_CONNECT_TIMEOUT_MS),
        central::connect(sd, &conn_cfg),
    )
    .await
    {
        Ok(Ok(conn)) => conn,
        Ok(Err(_)) | Err(_) => {
            warn!("slot {}: {}", slot, BleError::ConnectFailed);
            slot_event_tx
                .send(SlotEvent::ConnectFailed {
                    slot,
                    address: peer,
                })
                .await;
            return;
        }
    };

    let client = match vent_client::discover_and_subscribe(&conn).await {
        Ok(client) => client,
        Err(e) => {
            // A link without the vent service can neither be commanded
            // nor report telemetry; drop it and let the scanner retry.
            warn!("slot {} unusable: {}", slot, e);
            slot_event_tx.send(SlotEvent::ServiceFault { slot }).await;
            let _ = conn.disconnect();
            slot_event_tx
                .send(SlotEvent::ConnectFailed {
                    slot,
                    address: peer,
                })
                .await;
            return;
        }
    };

    slot_event_tx
        .send(SlotEvent::Established {
            slot,
            address: peer,
        })
        .await;

    let mut notifications = pin!(vent_client::run_notification_loop(
        &conn,
        &client,
        peer,
        slot_event_tx,
    ));

    loop {
        match select(cmd_rx.receive(), &mut notifications).await {
            Either::First(SlotCommand::Write {
                characteristic,
                value,
            }) => {
                if let Err(e) =
                    vent_client::write_value(&client, characteristic, value.as_str()).await
                {
                    // A failed write does not tear the link down; the
                    // peripheral may still notify and accept later writes.
                    warn!("slot {} write failed: {}", slot, e);
                    slot_event_tx.send(SlotEvent::ServiceFault { slot }).await;
                }
            }
            Either::First(SlotCommand::Connect { .. }) => {
                // Already linked; the central never double-dispatches.
            }
            Either::Second(()) => {
                slot_event_tx.send(SlotEvent::LinkLost { slot }).await;
                return;
            }
        }
    }
}
