//! Status word decoding.
//!
//! The bit assignments come from the module documentation and are fixed;
//! bit 4 is inverted on the wire (0 means the temperature is in range).
//! Bits 5 and 7..15 are reserved.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Mutex;

const BIT_HV_ON: u16 = 1 << 0;
const BIT_OVERCURRENT: u16 = 1 << 1;
const BIT_CURRENT_LIMIT: u16 = 1 << 2;
const BIT_TEMP_SENSOR: u16 = 1 << 3;
const BIT_TEMP_OUT_OF_RANGE: u16 = 1 << 4;
const BIT_TEMP_CORRECTION: u16 = 1 << 6;

const KNOWN_BITS: u16 = BIT_HV_ON
    | BIT_OVERCURRENT
    | BIT_CURRENT_LIMIT
    | BIT_TEMP_SENSOR
    | BIT_TEMP_OUT_OF_RANGE
    | BIT_TEMP_CORRECTION;

/// Named flags decoded from a module status word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusFlags {
    pub is_hv_on: bool,
    pub is_overcurrent: bool,
    pub is_current_limit: bool,
    pub is_temp_sensor_connected: bool,
    pub is_temp_in_range: bool,
    pub is_temp_correction_enabled: bool,
}

// Reserved-bit patterns already reported, so each one is logged only once.
static SEEN_RESERVED: Lazy<Mutex<HashSet<u16>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// Decodes a status word. Total: every input produces a value; reserved
/// bits are dropped, with one diagnostic per distinct pattern.
pub fn decode(status: u16) -> StatusFlags {
    let reserved = status & !KNOWN_BITS;
    if reserved != 0 {
        let mut seen = SEEN_RESERVED.lock().unwrap_or_else(|e| e.into_inner());
        if seen.insert(reserved) {
            log::warn!(
                "Status word 0x{:04x} carries reserved bits 0x{:04x}; ignoring them",
                status,
                reserved
            );
        }
    }
    StatusFlags {
        is_hv_on: status & BIT_HV_ON != 0,
        is_overcurrent: status & BIT_OVERCURRENT != 0,
        is_current_limit: status & BIT_CURRENT_LIMIT != 0,
        is_temp_sensor_connected: status & BIT_TEMP_SENSOR != 0,
        is_temp_in_range: status & BIT_TEMP_OUT_OF_RANGE == 0,
        is_temp_correction_enabled: status & BIT_TEMP_CORRECTION != 0,
    }
}
