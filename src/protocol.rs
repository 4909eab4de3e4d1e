//! Text protocol spoken by the external transport layer.
//!
//! Inbound operator commands have the shape `<action>_<target>` or
//! `<action>_<target>:<value>`:
//!
//! ```text
//! toggle_ac              flip the HVAC on/off state
//! toggle_damper2         flip damper 2
//! power_damper1:medium   set damper 1 fan speed
//! set_ac_mode:heat       set HVAC mode
//! set_ac_temp:24         set HVAC target temperature
//! ```
//!
//! Outbound broadcasts mirror the same `<key>:<value>` shape
//! (`status_ac:on`, `voltage_damper1:12.4`, ...).  Parsing here only
//! classifies and validates; routing to a slot and the actual BLE write
//! are the engine's business.

use crate::config::{VentCharacteristic, MAX_PERIPHERALS, MAX_VALUE_LEN};
use core::fmt::Write;
use heapless::String;

/// Slot of the HVAC unit in the canonical roster.
pub const HVAC_SLOT: u8 = 0;

pub type Value = String<MAX_VALUE_LEN>;

/// Maximum length of one outbound broadcast message.
pub const MAX_MESSAGE_LEN: usize = 48;

pub type Message = String<MAX_MESSAGE_LEN>;

/// Addressable unit in a transport message.  Damper numbers are
/// 1-based on the wire and equal to their slot index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    Hvac,
    Damper(u8),
}

impl Target {
    pub const fn slot(self) -> u8 {
        match self {
            Target::Hvac => HVAC_SLOT,
            Target::Damper(n) => n,
        }
    }

    fn parse(s: &str) -> Option<Self> {
        if s == "ac" {
            return Some(Target::Hvac);
        }
        let n: u8 = s.strip_prefix("damper")?.parse().ok()?;
        if n == 0 || n as usize >= MAX_PERIPHERALS {
            return None;
        }
        Some(Target::Damper(n))
    }

    fn write_key(self, out: &mut Message) {
        match self {
            Target::Hvac => {
                let _ = out.push_str("ac");
            }
            Target::Damper(n) => {
                let _ = write!(out, "damper{}", n);
            }
        }
    }
}

/// A validated inbound request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    /// Flip the target's on/off state.
    Toggle(Target),
    /// Set the target's fan speed (`low` / `medium` / `high` / `auto`).
    SetPower(Target, Value),
    /// Set the HVAC operating mode (`heat` / `cold`).
    SetMode(Value),
    /// Set the HVAC target temperature.
    SetTemp(Value),
}

impl Request {
    pub fn target(&self) -> Target {
        match self {
            Request::Toggle(t) | Request::SetPower(t, _) => *t,
            Request::SetMode(_) | Request::SetTemp(_) => Target::Hvac,
        }
    }

    pub fn characteristic(&self) -> VentCharacteristic {
        match self {
            Request::Toggle(_) => VentCharacteristic::State,
            Request::SetPower(..) => VentCharacteristic::Speed,
            Request::SetMode(_) => VentCharacteristic::Mode,
            Request::SetTemp(_) => VentCharacteristic::Temp,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    /// The action prefix is not one we know.
    UnknownAction,
    /// The target is not `ac` or a valid damper number.
    BadTarget,
    /// The action requires a `:<value>` suffix.
    MissingValue,
}

/// Parse one inbound transport message.
pub fn parse_request(message: &str) -> Result<Request, ProtocolError> {
    if let Some(target) = message.strip_prefix("toggle_") {
        let target = Target::parse(target).ok_or(ProtocolError::BadTarget)?;
        return Ok(Request::Toggle(target));
    }
    if let Some(rest) = message.strip_prefix("power_") {
        let (target, value) = split_value(rest)?;
        let target = Target::parse(target).ok_or(ProtocolError::BadTarget)?;
        return Ok(Request::SetPower(target, value));
    }
    if let Some(rest) = message.strip_prefix("set_ac_mode") {
        let (head, value) = split_value(rest)?;
        if !head.is_empty() {
            return Err(ProtocolError::UnknownAction);
        }
        return Ok(Request::SetMode(value));
    }
    if let Some(rest) = message.strip_prefix("set_ac_temp") {
        let (head, value) = split_value(rest)?;
        if !head.is_empty() {
            return Err(ProtocolError::UnknownAction);
        }
        return Ok(Request::SetTemp(value));
    }
    Err(ProtocolError::UnknownAction)
}

fn split_value(rest: &str) -> Result<(&str, Value), ProtocolError> {
    let (head, tail) = rest.split_once(':').ok_or(ProtocolError::MissingValue)?;
    if tail.is_empty() {
        return Err(ProtocolError::MissingValue);
    }
    let mut value: Value = String::new();
    for c in tail.chars() {
        if value.push(c).is_err() {
            break;
        }
    }
    Ok((head, value))
}

/// On/off bookkeeping for toggle requests, seeded from the persisted
/// last-set values at startup.
#[derive(Debug, Default)]
pub struct ToggleStates {
    on: [bool; MAX_PERIPHERALS],
}

impl ToggleStates {
    pub const fn new() -> Self {
        Self {
            on: [false; MAX_PERIPHERALS],
        }
    }

    /// Flip a slot and return the new state keyword.
    pub fn flip(&mut self, slot: u8) -> &'static str {
        let on = &mut self.on[slot as usize];
        *on = !*on;
        if *on {
            "on"
        } else {
            "off"
        }
    }

    pub fn seed(&mut self, slot: u8, on: bool) {
        if (slot as usize) < MAX_PERIPHERALS {
            self.on[slot as usize] = on;
        }
    }
}

/// Outbound telemetry broadcast for a drained notification.
pub fn telemetry_message(slot: u8, payload: &str) -> Message {
    let mut out: Message = String::new();
    if slot == HVAC_SLOT {
        let _ = out.push_str("voltage_ac:");
    } else {
        let _ = write!(out, "voltage_damper{}:", slot);
    }
    let _ = out.push_str(payload);
    out
}

/// Outbound status broadcast confirming an applied request.
pub fn status_message(request: &Request, value: &str) -> Message {
    let mut out: Message = String::new();
    match request {
        Request::Toggle(target) => {
            let _ = out.push_str("status_");
            target.write_key(&mut out);
        }
        Request::SetPower(target, _) => {
            let _ = out.push_str("power_");
            target.write_key(&mut out);
        }
        Request::SetMode(_) => {
            let _ = out.push_str("ac_mode");
        }
        Request::SetTemp(_) => {
            let _ = out.push_str("ac_temp");
        }
    }
    let _ = out.push(':');
    let _ = out.push_str(value);
    out
}

/// Broadcast string replaying one persisted value on startup, or
/// `None` for characteristics that are never persisted.
pub fn replay_message(slot: u8, characteristic: VentCharacteristic, value: &str) -> Option<Message> {
    let target = if slot == HVAC_SLOT {
        Target::Hvac
    } else {
        Target::Damper(slot)
    };
    let request = match characteristic {
        VentCharacteristic::State => Request::Toggle(target),
        VentCharacteristic::Speed => Request::SetPower(target, String::new()),
        VentCharacteristic::Mode if slot == HVAC_SLOT => Request::SetMode(String::new()),
        VentCharacteristic::Temp if slot == HVAC_SLOT => Request::SetTemp(String::new()),
        _ => return None,
    };
    Some(status_message(&request, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_toggle_requests() {
        assert_eq!(
            parse_request("toggle_ac"),
            Ok(Request::Toggle(Target::Hvac))
        );
        assert_eq!(
            parse_request("toggle_damper2"),
            Ok(Request::Toggle(Target::Damper(2)))
        );
    }

    #[test]
    fn parse_power_request() {
        let request = parse_request("power_damper1:medium").unwrap();
        assert_eq!(request.target(), Target::Damper(1));
        assert_eq!(request.characteristic(), VentCharacteristic::Speed);
        match request {
            Request::SetPower(_, value) => assert_eq!(value.as_str(), "medium"),
            other => panic!("unexpected request {:?}", other),
        }
    }

    #[test]
    fn parse_mode_and_temp_target_the_hvac() {
        let mode = parse_request("set_ac_mode:heat").unwrap();
        assert_eq!(mode.target().slot(), HVAC_SLOT);
        assert_eq!(mode.characteristic(), VentCharacteristic::Mode);

        let temp = parse_request("set_ac_temp:24").unwrap();
        assert_eq!(temp.characteristic(), VentCharacteristic::Temp);
        match temp {
            Request::SetTemp(value) => assert_eq!(value.as_str(), "24"),
            other => panic!("unexpected request {:?}", other),
        }
    }

    #[test]
    fn damper_numbers_map_to_their_slots() {
        assert_eq!(Target::Damper(1).slot(), 1);
        assert_eq!(Target::Damper(3).slot(), 3);
        assert_eq!(Target::Hvac.slot(), 0);
    }

    #[test]
    fn bad_messages_are_rejected() {
        assert_eq!(parse_request("open_window"), Err(ProtocolError::UnknownAction));
        assert_eq!(parse_request("toggle_damper0"), Err(ProtocolError::BadTarget));
        assert_eq!(parse_request("toggle_damper9"), Err(ProtocolError::BadTarget));
        assert_eq!(parse_request("toggle_fridge"), Err(ProtocolError::BadTarget));
        assert_eq!(parse_request("power_damper1"), Err(ProtocolError::MissingValue));
        assert_eq!(parse_request("set_ac_temp:"), Err(ProtocolError::MissingValue));
        assert_eq!(
            parse_request("set_ac_modes:heat"),
            Err(ProtocolError::UnknownAction)
        );
    }

    #[test]
    fn toggle_states_flip_per_slot() {
        let mut states = ToggleStates::new();
        assert_eq!(states.flip(1), "on");
        assert_eq!(states.flip(1), "off");
        // Other slots are unaffected.
        assert_eq!(states.flip(2), "on");

        states.seed(3, true);
        assert_eq!(states.flip(3), "off");
    }

    #[test]
    fn telemetry_messages_name_the_source() {
        assert_eq!(telemetry_message(0, "11.87").as_str(), "voltage_ac:11.87");
        assert_eq!(
            telemetry_message(2, "12.40").as_str(),
            "voltage_damper2:12.40"
        );
    }

    #[test]
    fn status_messages_mirror_the_request_shape() {
        let toggle = Request::Toggle(Target::Damper(1));
        assert_eq!(status_message(&toggle, "on").as_str(), "status_damper1:on");

        let power = parse_request("power_ac:high").unwrap();
        assert_eq!(status_message(&power, "high").as_str(), "power_ac:high");

        let mode = parse_request("set_ac_mode:cold").unwrap();
        assert_eq!(status_message(&mode, "cold").as_str(), "ac_mode:cold");
    }

    #[test]
    fn replay_messages_for_persisted_values() {
        assert_eq!(
            replay_message(0, VentCharacteristic::State, "on").unwrap().as_str(),
            "status_ac:on"
        );
        assert_eq!(
            replay_message(1, VentCharacteristic::Speed, "low").unwrap().as_str(),
            "power_damper1:low"
        );
        assert_eq!(
            replay_message(0, VentCharacteristic::Temp, "22").unwrap().as_str(),
            "ac_temp:22"
        );
        // Telemetry and damper-side mode/temp are never persisted.
        assert!(replay_message(2, VentCharacteristic::Voltage, "12.1").is_none());
        assert!(replay_message(2, VentCharacteristic::Temp, "22").is_none());
    }
}
