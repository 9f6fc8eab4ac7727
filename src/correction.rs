//! Temperature compensation of the target bias voltage.
//!
//! The module applies a piecewise-quadratic correction around a reference
//! point `(v0, t0)`: one slope/curvature pair above the reference
//! temperature, another below it. The compensated target is clamped to the
//! safe voltage range before it goes anywhere near the wire.

use crate::config::VoltageRange;
use crate::protocol::codec;
use serde::{Deserialize, Serialize};

/// Calibration constants for one module.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TempParams {
    pub v0: f64,
    pub t0: f64,
    pub delta_high: f64,
    pub delta_high_prime: f64,
    pub delta_low: f64,
    pub delta_low_prime: f64,
}

impl Default for TempParams {
    fn default() -> Self {
        // Neutral calibration: correction evaluates to v0 at any temperature.
        Self {
            v0: 0.0,
            t0: 25.0,
            delta_high: 0.0,
            delta_high_prime: 0.0,
            delta_low: 0.0,
            delta_low_prime: 0.0,
        }
    }
}

/// Compensated target voltage for a measured temperature, clamped to the
/// safe range. At exactly `t0` the high branch applies with a zero delta,
/// so the result is `v0`.
pub fn compensated_voltage(params: &TempParams, measured_temp: f64, range: &VoltageRange) -> f64 {
    let dt = measured_temp - params.t0;
    let corrected = if dt >= 0.0 {
        params.v0 + params.delta_high * dt + params.delta_high_prime * dt * dt
    } else {
        params.v0 + params.delta_low * dt + params.delta_low_prime * dt * dt
    };
    range.clamp(corrected)
}

/// Encodes the six calibration fields as the 24-hex-digit `HST` payload:
/// high slope, low slope, high curvature, low curvature, v0, t0.
///
/// Slopes and curvatures share the voltage quantization step; t0 uses the
/// inverse of the temperature readback polynomial. See DESIGN.md for the
/// quantization decision.
pub fn encode_hst_payload(params: &TempParams) -> String {
    format!(
        "{:04x}{:04x}{:04x}{:04x}{:04x}{:04x}",
        codec::volts_to_counts(params.delta_high),
        codec::volts_to_counts(params.delta_low),
        codec::volts_to_counts(params.delta_high_prime),
        codec::volts_to_counts(params.delta_low_prime),
        codec::volts_to_counts(params.v0),
        codec::celsius_to_counts(params.t0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference_params() -> TempParams {
        TempParams {
            v0: 50.0,
            t0: 25.0,
            delta_high: 2.0,
            delta_high_prime: 0.01,
            delta_low: 3.0,
            delta_low_prime: 0.02,
        }
    }

    fn wide_range() -> VoltageRange {
        VoltageRange {
            min: 0.0,
            max: 90.0,
        }
    }

    #[test]
    fn reference_temperature_returns_v0() {
        let v = compensated_voltage(&reference_params(), 25.0, &wide_range());
        assert!((v - 50.0).abs() < 1e-12);
    }

    #[test]
    fn above_reference_uses_high_branch() {
        // dt = 5: 50 + 2*5 + 0.01*25 = 60.25
        let v = compensated_voltage(&reference_params(), 30.0, &wide_range());
        assert!((v - 60.25).abs() < 1e-9);
    }

    #[test]
    fn below_reference_uses_low_branch() {
        // dt = -5: 50 + 3*(-5) + 0.02*25 = 35.5
        let v = compensated_voltage(&reference_params(), 20.0, &wide_range());
        assert!((v - 35.5).abs() < 1e-9);
    }

    #[test]
    fn result_is_clamped_to_safe_range() {
        let range = VoltageRange {
            min: 40.0,
            max: 55.0,
        };
        assert_eq!(compensated_voltage(&reference_params(), 40.0, &range), 55.0);
        assert_eq!(compensated_voltage(&reference_params(), 10.0, &range), 40.0);
    }

    #[test]
    fn neutral_params_are_a_no_op() {
        let params = TempParams {
            v0: 61.0,
            ..TempParams::default()
        };
        let v = compensated_voltage(&params, -5.0, &wide_range());
        assert!((v - 61.0).abs() < 1e-12);
    }

    #[test]
    fn hst_payload_is_24_hex_digits() {
        let payload = encode_hst_payload(&reference_params());
        assert_eq!(payload.len(), 24);
        assert!(payload.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
