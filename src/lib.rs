//! ductlink - BLE central connection manager for an HVAC unit and a
//! small set of duct dampers.
//!
//! The connection-lifecycle core (identity registry, scan/connect state
//! machine, telemetry mailbox, command buffering) is pure logic with no
//! radio dependency and is tested on the host: `cargo test`.
//!
//! The embedded binary (`src/main.rs`, feature `embedded`) drives this
//! core from the Nordic SoftDevice S140 on an nRF52840.

#![cfg_attr(not(test), no_std)]

pub mod ble;
pub mod config;
pub mod protocol;
pub mod state_store;

#[cfg(feature = "embedded")]
pub mod error;
#[cfg(feature = "embedded")]
pub mod storage;

// ═══════════════════════════════════════════════════════════════════════════
// Cross-module unit tests (run on host, not embedded)
// ═══════════════════════════════════════════════════════════════════════════
