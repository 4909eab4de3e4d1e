//! Connection-lifecycle engine for the BLE central role.
//!
//! Owns the slot-indexed connection table, the per-slot pending
//! commands, and the single-slot telemetry mailbox.  The radio glue
//! posts state transitions (advertisement matched, link established,
//! link lost, notification received) into this engine; the engine never
//! talks to the radio itself, which keeps every rule here testable on
//! the host.
//!
//! Reconnection is deliberately passive: a lost link is simply removed
//! and the scanner keeps running, so the peripheral is re-acquired the
//! next time it advertises.  There is no backoff or retry bookkeeping.
//!
//! Lifecycle per peripheral:
//!
//! ```text
//! Idle -> Scanning -> ConnectPending -> Connected
//!            ^                              |
//!            +--------- link lost ----------+
//! ```

use crate::ble::registry::{DeviceRegistry, PeerAddress};
use crate::config::{VentCharacteristic, MAX_PERIPHERALS, MAX_VALUE_LEN};
use heapless::String;

/// Generation-counted handle for one live link.
///
/// A fresh id is minted for every established connection, so a stale
/// handle held across a disconnect can never address a newer link.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LinkId(u16);

/// Scanner phase of the engine state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ScanPhase {
    /// Not yet started.
    Idle,
    /// Scanning for roster peripherals.
    Scanning,
    /// Scan suspended while a connect attempt is in progress.
    ConnectPending,
}

/// A matched advertisement, consumed by the next [`CentralEngine::poll`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Candidate {
    pub slot: u8,
    pub address: PeerAddress,
}

/// A buffered write for a peripheral that is not currently connected.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PendingCommand {
    pub characteristic: VentCharacteristic,
    pub value: String<MAX_VALUE_LEN>,
}

/// Outcome of a successfully registered connection.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LinkUp {
    pub link: LinkId,
    pub slot: u8,
    /// Pending command to write now that the slot is up.  Taken out of
    /// the buffer atomically with the table insert, so a later
    /// connect cycle can never replay it.
    pub flush: Option<PendingCommand>,
}

/// How a command was routed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Dispatch {
    /// Slot is connected; the caller performs the write on this link.
    Sent { link: LinkId },
    /// Slot is down; the command was buffered (newest wins).
    Buffered,
}

/// One drained telemetry value.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Telemetry {
    pub slot: u8,
    pub payload: String<MAX_VALUE_LEN>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EngineError {
    /// Address does not resolve to any registered slot.
    UnknownPeripheral,
    /// Slot index outside the registered roster.
    InvalidSlot,
    /// A link for this slot already exists.
    AlreadyConnected,
    /// Link-establishment report with no connect attempt in flight.
    NotConnecting,
    /// Notification payload was not valid UTF-8.
    InvalidPayload,
}

/// The single owner of all shared connection state.
///
/// Exactly one task (the embedded central task, or the test harness)
/// may hold this; radio callbacks must hand their transitions to that
/// owner instead of mutating state in callback context.
pub struct CentralEngine {
    registry: DeviceRegistry,
    links: [Option<LinkId>; MAX_PERIPHERALS],
    pending: [Option<PendingCommand>; MAX_PERIPHERALS],
    mailbox: Option<Telemetry>,
    candidate: Option<Candidate>,
    in_flight: Option<Candidate>,
    phase: ScanPhase,
    next_link: u16,
}

impl CentralEngine {
    pub fn new(registry: DeviceRegistry) -> Self {
        Self {
            registry,
            links: [None; MAX_PERIPHERALS],
            pending: core::array::from_fn(|_| None),
            mailbox: None,
            candidate: None,
            in_flight: None,
            phase: ScanPhase::Idle,
            next_link: 0,
        }
    }

    /// Arm the scanner.  Meaningful once at process start; calling it
    /// again while running is a no-op.
    pub fn start(&mut self) {
        if self.phase == ScanPhase::Idle {
            self.phase = ScanPhase::Scanning;
        }
    }

    pub fn phase(&self) -> ScanPhase {
        self.phase
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Filter one advertisement against the roster.
    ///
    /// A match records the candidate (newest observation wins) and
    /// returns its slot; the actual connect is deferred to [`poll`],
    /// never performed in scan-callback context.  Matches are rejected
    /// while the slot is already linked or any connect is in flight.
    ///
    /// [`poll`]: CentralEngine::poll
    pub fn on_advertisement(&mut self, address: &PeerAddress, name: Option<&str>) -> Option<u8> {
        if self.phase != ScanPhase::Scanning {
            return None;
        }
        let slot = self.registry.matches(address, name)?;
        if self.links[slot as usize].is_some() {
            return None;
        }
        self.candidate = Some(Candidate {
            slot,
            address: *address,
        });
        Some(slot)
    }

    /// Take the pending connect request, if any, suspending the scan
    /// until the attempt is resolved.
    pub fn poll(&mut self) -> Option<Candidate> {
        if self.phase != ScanPhase::Scanning {
            return None;
        }
        let candidate = self.candidate.take()?;
        if self.links[candidate.slot as usize].is_some() {
            return None;
        }
        self.phase = ScanPhase::ConnectPending;
        self.in_flight = Some(candidate);
        Some(candidate)
    }

    /// Register a successfully established link.
    ///
    /// Inserts the connection-table entry, then hands back the pending
    /// command for the slot so the caller can flush it; the buffer
    /// entry is already cleared at that point.  Scanning resumes
    /// whatever the outcome.
    pub fn on_link_established(&mut self, address: &PeerAddress) -> Result<LinkUp, EngineError> {
        if self.phase == ScanPhase::ConnectPending {
            self.phase = ScanPhase::Scanning;
        }
        let candidate = self.in_flight.take().ok_or(EngineError::NotConnecting)?;
        if candidate.address != *address {
            return Err(EngineError::UnknownPeripheral);
        }
        if self.links[candidate.slot as usize].is_some() {
            return Err(EngineError::AlreadyConnected);
        }

        let id = self.mint_link_id();
        self.links[candidate.slot as usize] = Some(id);
        let flush = self.pending[candidate.slot as usize].take();
        Ok(LinkUp {
            link: id,
            slot: candidate.slot,
            flush,
        })
    }

    /// Abandon the in-flight connect attempt (timeout or radio error).
    /// No table entry was created; scanning resumes.
    pub fn on_connect_failed(&mut self, address: &PeerAddress) {
        if let Some(candidate) = self.in_flight {
            if candidate.address == *address {
                self.in_flight = None;
            }
        }
        if self.phase == ScanPhase::ConnectPending {
            self.phase = ScanPhase::Scanning;
        }
    }

    /// Remove the table entry for a lost link.
    ///
    /// Stale ids (a handle that survived its own disconnect) match
    /// nothing and are ignored.  Returns the slot that went down.
    pub fn on_link_lost(&mut self, link: LinkId) -> Option<u8> {
        for (slot, entry) in self.links.iter_mut().enumerate() {
            if *entry == Some(link) {
                *entry = None;
                return Some(slot as u8);
            }
        }
        None
    }

    /// Whether the scanner should re-arm after a scan window ended.
    /// Always true while in the Scanning phase; a transient scan error
    /// never stops scanning permanently.
    pub fn on_scan_end(&mut self) -> bool {
        self.phase == ScanPhase::Scanning
    }

    /// Route an outbound command to `slot`.
    ///
    /// Buffering is not an error: the command is honored on the slot's
    /// next connection, and only the newest buffered command survives.
    pub fn send_command(
        &mut self,
        slot: u8,
        characteristic: VentCharacteristic,
        value: &str,
    ) -> Result<Dispatch, EngineError> {
        if slot as usize >= self.registry.len() {
            return Err(EngineError::InvalidSlot);
        }
        match self.links[slot as usize] {
            Some(link) => Ok(Dispatch::Sent { link }),
            None => {
                self.pending[slot as usize] = Some(PendingCommand {
                    characteristic,
                    value: truncated(value),
                });
                Ok(Dispatch::Buffered)
            }
        }
    }

    /// Demultiplex one telemetry notification.
    ///
    /// The mailbox holds only the most recent value (last-write-wins);
    /// an unknown source address or non-UTF-8 payload leaves it
    /// untouched so a bad peripheral cannot corrupt pending telemetry.
    pub fn on_notification(
        &mut self,
        address: &PeerAddress,
        payload: &[u8],
    ) -> Result<u8, EngineError> {
        let slot = self
            .registry
            .slot_of(address)
            .ok_or(EngineError::UnknownPeripheral)?;
        let text = core::str::from_utf8(payload).map_err(|_| EngineError::InvalidPayload)?;
        self.mailbox = Some(Telemetry {
            slot,
            payload: truncated(text),
        });
        Ok(slot)
    }

    /// Drain and clear the telemetry mailbox.
    pub fn take_notification(&mut self) -> Option<Telemetry> {
        self.mailbox.take()
    }

    /// True iff at least one peripheral link is up.
    pub fn is_any_connected(&self) -> bool {
        self.links.iter().any(|l| l.is_some())
    }

    pub fn connected_count(&self) -> usize {
        self.links.iter().filter(|l| l.is_some()).count()
    }

    pub fn link_for_slot(&self, slot: u8) -> Option<LinkId> {
        *self.links.get(slot as usize)?
    }

    pub fn has_pending(&self, slot: u8) -> bool {
        self.pending
            .get(slot as usize)
            .map(|p| p.is_some())
            .unwrap_or(false)
    }

    fn mint_link_id(&mut self) -> LinkId {
        let id = LinkId(self.next_link);
        self.next_link = self.next_link.wrapping_add(1);
        id
    }
}

fn truncated(value: &str) -> String<MAX_VALUE_LEN> {
    let mut out: String<MAX_VALUE_LEN> = String::new();
    for c in value.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::registry::DeviceRegistry;
    use crate::config::DEFAULT_IDENTITIES;

    fn engine() -> CentralEngine {
        let registry = DeviceRegistry::from_table(&DEFAULT_IDENTITIES).unwrap();
        let mut engine = CentralEngine::new(registry);
        engine.start();
        engine
    }

    fn addr_of(engine: &CentralEngine, slot: u8) -> PeerAddress {
        engine.registry().address_of(slot).unwrap()
    }

    /// Advertisement -> poll -> established, the happy path.
    fn bring_up(engine: &mut CentralEngine, slot: u8) -> LinkUp {
        let addr = addr_of(engine, slot);
        assert_eq!(engine.on_advertisement(&addr, None), Some(slot));
        let candidate = engine.poll().unwrap();
        assert_eq!(candidate.slot, slot);
        assert_eq!(engine.phase(), ScanPhase::ConnectPending);
        engine.on_link_established(&addr).unwrap()
    }

    #[test]
    fn advertisement_and_link_create_exactly_one_entry() {
        let mut engine = engine();
        let up = bring_up(&mut engine, 1);
        assert_eq!(up.slot, 1);
        assert!(up.flush.is_none());
        assert_eq!(engine.connected_count(), 1);
        assert!(engine.is_any_connected());
        assert_eq!(engine.link_for_slot(1), Some(up.link));
        assert_eq!(engine.phase(), ScanPhase::Scanning);
    }

    #[test]
    fn every_registered_identity_can_come_up() {
        let mut engine = engine();
        for slot in 0..4u8 {
            bring_up(&mut engine, slot);
        }
        assert_eq!(engine.connected_count(), 4);
    }

    #[test]
    fn link_loss_removes_exactly_one_entry() {
        let mut engine = engine();
        let up0 = bring_up(&mut engine, 0);
        let up2 = bring_up(&mut engine, 2);

        assert_eq!(engine.on_link_lost(up0.link), Some(0));
        assert_eq!(engine.connected_count(), 1);
        assert_eq!(engine.link_for_slot(2), Some(up2.link));
        assert!(engine.is_any_connected());

        assert_eq!(engine.on_link_lost(up2.link), Some(2));
        assert!(!engine.is_any_connected());
    }

    #[test]
    fn stale_link_id_is_ignored() {
        let mut engine = engine();
        let first = bring_up(&mut engine, 1);
        engine.on_link_lost(first.link);

        let second = bring_up(&mut engine, 1);
        // Replaying the dead handle must not tear down the new link.
        assert_eq!(engine.on_link_lost(first.link), None);
        assert_eq!(engine.link_for_slot(1), Some(second.link));
    }

    #[test]
    fn command_to_disconnected_slot_is_buffered_and_flushed_once() {
        let mut engine = engine();
        let dispatch = engine
            .send_command(1, VentCharacteristic::State, "on")
            .unwrap();
        assert_eq!(dispatch, Dispatch::Buffered);
        assert!(engine.has_pending(1));

        let up = bring_up(&mut engine, 1);
        let flush = up.flush.expect("pending command flushed on connect");
        assert_eq!(flush.characteristic, VentCharacteristic::State);
        assert_eq!(flush.value.as_str(), "on");
        assert!(!engine.has_pending(1));

        // Second connect cycle without a new command flushes nothing.
        engine.on_link_lost(up.link);
        let again = bring_up(&mut engine, 1);
        assert!(again.flush.is_none());
    }

    #[test]
    fn newest_buffered_command_wins() {
        let mut engine = engine();
        engine
            .send_command(2, VentCharacteristic::Speed, "low")
            .unwrap();
        engine
            .send_command(2, VentCharacteristic::Speed, "high")
            .unwrap();

        let up = bring_up(&mut engine, 2);
        assert_eq!(up.flush.unwrap().value.as_str(), "high");
    }

    #[test]
    fn pending_commands_are_per_slot() {
        let mut engine = engine();
        engine
            .send_command(1, VentCharacteristic::State, "on")
            .unwrap();
        engine
            .send_command(3, VentCharacteristic::Speed, "auto")
            .unwrap();

        let up1 = bring_up(&mut engine, 1);
        assert_eq!(up1.flush.unwrap().value.as_str(), "on");

        let up3 = bring_up(&mut engine, 3);
        let flush3 = up3.flush.unwrap();
        assert_eq!(flush3.characteristic, VentCharacteristic::Speed);
        assert_eq!(flush3.value.as_str(), "auto");
    }

    #[test]
    fn command_to_connected_slot_targets_its_link_only() {
        let mut engine = engine();
        let up0 = bring_up(&mut engine, 0);
        let up1 = bring_up(&mut engine, 1);

        let dispatch = engine
            .send_command(1, VentCharacteristic::State, "on")
            .unwrap();
        assert_eq!(dispatch, Dispatch::Sent { link: up1.link });
        assert_ne!(up0.link, up1.link);
        // Nothing was buffered anywhere.
        for slot in 0..4u8 {
            assert!(!engine.has_pending(slot));
        }
    }

    #[test]
    fn command_to_unregistered_slot_is_an_error() {
        let mut engine = engine();
        assert_eq!(
            engine.send_command(7, VentCharacteristic::State, "on"),
            Err(EngineError::InvalidSlot)
        );
    }

    #[test]
    fn notification_mailbox_is_last_write_wins() {
        let mut engine = engine();
        let a = addr_of(&engine, 0);
        let b = addr_of(&engine, 2);

        engine.on_notification(&a, b"11.9").unwrap();
        engine.on_notification(&b, b"12.4").unwrap();

        let telemetry = engine.take_notification().unwrap();
        assert_eq!(telemetry.slot, 2);
        assert_eq!(telemetry.payload.as_str(), "12.4");
        // A's value was overwritten, and the mailbox is now drained.
        assert!(engine.take_notification().is_none());
    }

    #[test]
    fn unknown_source_leaves_mailbox_untouched() {
        let mut engine = engine();
        let known = addr_of(&engine, 1);
        let stranger = PeerAddress::new([0xde, 0xad, 0xbe, 0xef, 0x00, 0x01]);

        engine.on_notification(&known, b"3.31").unwrap();
        assert_eq!(
            engine.on_notification(&stranger, b"9.99"),
            Err(EngineError::UnknownPeripheral)
        );

        let telemetry = engine.take_notification().unwrap();
        assert_eq!(telemetry.slot, 1);
        assert_eq!(telemetry.payload.as_str(), "3.31");
    }

    #[test]
    fn invalid_utf8_payload_is_dropped() {
        let mut engine = engine();
        let addr = addr_of(&engine, 0);
        assert_eq!(
            engine.on_notification(&addr, &[0xff, 0xfe]),
            Err(EngineError::InvalidPayload)
        );
        assert!(engine.take_notification().is_none());
    }

    #[test]
    fn duplicate_advertisement_during_connect_is_rejected() {
        let mut engine = engine();
        let addr = addr_of(&engine, 0);

        assert_eq!(engine.on_advertisement(&addr, None), Some(0));
        engine.poll().unwrap();
        // Same identity re-advertises before the attempt resolves.
        assert_eq!(engine.on_advertisement(&addr, None), None);
        assert!(engine.poll().is_none());

        engine.on_link_established(&addr).unwrap();
        // And again while connected.
        assert_eq!(engine.on_advertisement(&addr, None), None);
    }

    #[test]
    fn newest_candidate_wins_before_poll() {
        let mut engine = engine();
        let a = addr_of(&engine, 0);
        let b = addr_of(&engine, 3);

        engine.on_advertisement(&a, None);
        engine.on_advertisement(&b, None);
        assert_eq!(engine.poll().unwrap().slot, 3);
        // The earlier match was superseded, not queued.
        engine.on_link_established(&b).unwrap();
        assert!(engine.poll().is_none());
    }

    #[test]
    fn failed_connect_resumes_scanning_without_entry() {
        let mut engine = engine();
        let addr = addr_of(&engine, 2);

        engine.on_advertisement(&addr, None);
        engine.poll().unwrap();
        engine.on_connect_failed(&addr);

        assert!(!engine.is_any_connected());
        assert_eq!(engine.phase(), ScanPhase::Scanning);
        assert!(engine.on_scan_end());
        // The identity can be matched again on its next advertisement.
        assert_eq!(engine.on_advertisement(&addr, None), Some(2));
    }

    #[test]
    fn scan_restart_is_suppressed_only_while_connecting() {
        let mut engine = engine();
        assert!(engine.on_scan_end());

        let addr = addr_of(&engine, 0);
        engine.on_advertisement(&addr, None);
        engine.poll().unwrap();
        assert!(!engine.on_scan_end());

        engine.on_link_established(&addr).unwrap();
        assert!(engine.on_scan_end());
    }

    #[test]
    fn name_match_accepts_roster_peripheral() {
        let mut engine = engine();
        // Known unit advertising from its fixed address but matched by name.
        let addr = addr_of(&engine, 0);
        assert_eq!(engine.on_advertisement(&addr, Some("HVAC")), Some(0));
    }

    #[test]
    fn sent_command_is_not_rebuffered_on_link_loss() {
        let mut engine = engine();
        let up = bring_up(&mut engine, 1);
        let dispatch = engine
            .send_command(1, VentCharacteristic::State, "on")
            .unwrap();
        assert_eq!(dispatch, Dispatch::Sent { link: up.link });

        // The link drops in the race window before the write lands.
        // A Sent command is best-effort; nothing re-buffers it.
        engine.on_link_lost(up.link).unwrap();
        assert!(!engine.has_pending(1));
        let again = bring_up(&mut engine, 1);
        assert!(again.flush.is_none());
    }

    #[test]
    fn established_without_attempt_is_rejected() {
        let mut engine = engine();
        let addr = addr_of(&engine, 0);
        assert_eq!(
            engine.on_link_established(&addr),
            Err(EngineError::NotConnecting)
        );
    }

    #[test]
    fn established_while_idle_does_not_arm_scanning() {
        let registry = DeviceRegistry::from_table(&DEFAULT_IDENTITIES).unwrap();
        let mut engine = CentralEngine::new(registry);
        let addr = engine.registry().address_of(0).unwrap();

        assert_eq!(
            engine.on_link_established(&addr),
            Err(EngineError::NotConnecting)
        );
        // The error path must not start scanning as a side effect.
        assert_eq!(engine.phase(), ScanPhase::Idle);
    }

    #[test]
    fn start_is_idempotent() {
        let registry = DeviceRegistry::from_table(&DEFAULT_IDENTITIES).unwrap();
        let mut engine = CentralEngine::new(registry);
        assert_eq!(engine.phase(), ScanPhase::Idle);
        assert!(!engine.on_scan_end());
        engine.start();
        engine.start();
        assert_eq!(engine.phase(), ScanPhase::Scanning);
    }
}
