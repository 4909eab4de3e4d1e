//! BLE error tags shared by the radio glue.
//!
//! All variants are fixed-size (`Copy`) and implement `defmt::Format`
//! for efficient on-target logging.  The pure core does not use these;
//! it has its own typed errors that the glue logs.

use defmt::Format;

/// BLE errors we propagate between the glue tasks.
#[derive(Debug, Clone, Copy, Format, PartialEq, Eq)]
pub enum BleError {
    /// Scan was cancelled or could not start.
    ScanFailed,
    /// Connection attempt failed or timed out.
    ConnectFailed,
    /// The peripheral does not expose the vent service.
    ServiceNotFound,
    /// Voltage subscribe (CCCD write) failed.
    NotifyFailed,
    /// Characteristic write on a live link failed.
    WriteFailed,
}
