//! Wire framing and value conversion for the HV module serial protocol.
//!
//! Every exchange is a single framed line in both directions:
//! `STX + body + ETX + checksum + CR`, where the checksum is the low byte
//! of the sum of all bytes from STX through ETX, as two lowercase hex
//! digits. The module echoes the command mnemonic in lowercase; an error
//! reply uses the mnemonic `hxx` with a 4-digit fault code as payload.

use super::{DeviceFault, ProtocolError, Result};

pub const STX: u8 = 0x02;
pub const ETX: u8 = 0x03;
pub const CR: u8 = 0x0D;

/// Volts represented by one count of the 16-bit voltage fields.
pub const VOLTS_PER_COUNT: f64 = 1.812e-3;
/// Milliamps represented by one count of the current readback field.
pub const MILLIAMPS_PER_COUNT: f64 = 4.980e-3;

// Temperature readback polynomial: celsius = (counts * GAIN - OFFSET) / SLOPE
const TEMP_GAIN: f64 = 1.907e-5;
const TEMP_OFFSET: f64 = 1.035;
const TEMP_SLOPE: f64 = -5.5e-3;

pub const READ_MONITOR: &str = "HPO";
pub const READ_STATUS: &str = "HGS";
pub const HV_ON: &str = "HON";
pub const HV_OFF: &str = "HOF";
pub const RESET: &str = "HRE";

/// A checksum-validated reply, split into the echoed mnemonic and the hex
/// payload between it and ETX.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub echo: String,
    pub payload: String,
}

impl Reply {
    pub fn matches(&self, mnemonic: &str) -> bool {
        self.echo.eq_ignore_ascii_case(mnemonic)
    }
}

/// Decoded fields of an `HPO` monitor reply.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitorReading {
    pub status: u16,
    pub voltage: f64,
    pub current: f64,
    pub temperature: f64,
}

pub fn volts_to_counts(volts: f64) -> u16 {
    (volts / VOLTS_PER_COUNT).round().clamp(0.0, 65535.0) as u16
}

pub fn counts_to_volts(counts: u16) -> f64 {
    counts as f64 * VOLTS_PER_COUNT
}

pub fn counts_to_milliamps(counts: u16) -> f64 {
    counts as f64 * MILLIAMPS_PER_COUNT
}

pub fn counts_to_celsius(counts: u16) -> f64 {
    (counts as f64 * TEMP_GAIN - TEMP_OFFSET) / TEMP_SLOPE
}

pub fn celsius_to_counts(celsius: f64) -> u16 {
    ((celsius * TEMP_SLOPE + TEMP_OFFSET) / TEMP_GAIN)
        .round()
        .clamp(0.0, 65535.0) as u16
}

/// Builds the full wire frame for a command body (or, in tests, a reply).
pub fn build_frame(body: &str) -> Vec<u8> {
    let mut frame = Vec::with_capacity(body.len() + 5);
    frame.push(STX);
    frame.extend_from_slice(body.as_bytes());
    frame.push(ETX);
    let sum: u32 = frame.iter().map(|&b| b as u32).sum();
    frame.extend_from_slice(format!("{:02x}", sum & 0xFF).as_bytes());
    frame.push(CR);
    frame
}

pub fn encode_set_voltage(volts: f64) -> String {
    format!("HBV{:04x}", volts_to_counts(volts))
}

pub fn encode_correction(enabled: bool) -> &'static str {
    if enabled {
        "HCM1"
    } else {
        "HCM0"
    }
}

/// Escapes control bytes so a frame can be carried in a log record.
pub fn printable(bytes: &[u8]) -> String {
    bytes
        .iter()
        .flat_map(|&b| std::ascii::escape_default(b))
        .map(char::from)
        .collect()
}

/// Parses and checksum-validates one raw reply line.
///
/// A well-formed `hxx` error reply surfaces as [`ProtocolError::Fault`];
/// anything structurally wrong surfaces as the relevant framing error.
pub fn parse_reply(raw: &[u8]) -> Result<Reply> {
    let raw = trim_line(raw);
    if raw.len() < 7 {
        return Err(ProtocolError::TooShort(raw.len()));
    }
    if raw[0] != STX {
        return Err(ProtocolError::BadFraming("missing STX".into()));
    }
    let etx = raw
        .iter()
        .position(|&b| b == ETX)
        .ok_or_else(|| ProtocolError::BadFraming("missing ETX".into()))?;
    if raw.len() < etx + 3 {
        return Err(ProtocolError::TooShort(raw.len()));
    }
    let received = std::str::from_utf8(&raw[etx + 1..etx + 3])
        .map_err(|_| ProtocolError::BadFraming("checksum not ASCII".into()))?
        .to_ascii_lowercase();
    let sum: u32 = raw[..=etx].iter().map(|&b| b as u32).sum();
    let calculated = format!("{:02x}", sum & 0xFF);
    if calculated != received {
        return Err(ProtocolError::ChecksumMismatch {
            calculated,
            received,
        });
    }

    let body = std::str::from_utf8(&raw[1..etx])
        .map_err(|_| ProtocolError::BadFraming("body not ASCII".into()))?;
    if body.len() < 3 {
        return Err(ProtocolError::BadFraming(format!("body '{}' too short", body)));
    }
    let echo = body[..3].to_ascii_lowercase();
    let payload = body[3..].to_string();

    if echo == "hxx" {
        let code = payload
            .trim()
            .parse::<u16>()
            .map_err(|_| ProtocolError::BadHexField(payload.clone()))?;
        return Err(ProtocolError::Fault(DeviceFault::from_code(code)));
    }

    Ok(Reply { echo, payload })
}

/// Decodes the five 4-hex-digit fields of an `HPO` reply payload:
/// status word, target voltage (not surfaced), output voltage, output
/// current, temperature.
pub fn parse_monitor(reply: &Reply) -> Result<MonitorReading> {
    if reply.payload.len() < 20 {
        return Err(ProtocolError::ShortPayload {
            echo: reply.echo.clone(),
            got: reply.payload.len(),
            want: 20,
        });
    }
    let status = hex4(&reply.payload[0..4])?;
    let voltage = counts_to_volts(hex4(&reply.payload[8..12])?);
    let current = counts_to_milliamps(hex4(&reply.payload[12..16])?);
    let temperature = counts_to_celsius(hex4(&reply.payload[16..20])?);
    Ok(MonitorReading {
        status,
        voltage,
        current,
        temperature,
    })
}

/// Decodes the status word of an `HGS` reply payload.
pub fn parse_status(reply: &Reply) -> Result<u16> {
    if reply.payload.len() < 4 {
        return Err(ProtocolError::ShortPayload {
            echo: reply.echo.clone(),
            got: reply.payload.len(),
            want: 4,
        });
    }
    hex4(&reply.payload[0..4])
}

fn hex4(field: &str) -> Result<u16> {
    u16::from_str_radix(field, 16).map_err(|_| ProtocolError::BadHexField(field.to_string()))
}

fn trim_line(raw: &[u8]) -> &[u8] {
    let mut end = raw.len();
    while end > 0 && matches!(raw[end - 1], b'\r' | b'\n' | b' ' | b'\t') {
        end -= 1;
    }
    &raw[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_layout_and_checksum() {
        // H + P + O = 0xE7; + STX + ETX = 0xEC
        assert_eq!(build_frame("HPO"), b"\x02HPO\x03ec\x0D".to_vec());
    }

    #[test]
    fn voltage_encode_matches_quantization() {
        assert_eq!(encode_set_voltage(0.0), "HBV0000");
        // 72.48 V / 1.812e-3 = 40000 = 0x9c40
        assert_eq!(encode_set_voltage(72.48), "HBV9c40");
    }

    #[test]
    fn voltage_round_trip_within_one_step() {
        for &v in &[0.0, 0.5, 20.5, 55.123, 72.48, 89.99] {
            let back = counts_to_volts(volts_to_counts(v));
            assert!((back - v).abs() <= VOLTS_PER_COUNT, "{} -> {}", v, back);
        }
    }

    #[test]
    fn temperature_round_trip_within_one_step() {
        for &t in &[-10.0, 0.0, 20.0, 25.0, 40.0] {
            let back = counts_to_celsius(celsius_to_counts(t));
            let step = (TEMP_GAIN / TEMP_SLOPE).abs();
            assert!((back - t).abs() <= step, "{} -> {}", t, back);
        }
    }

    #[test]
    fn parse_accepts_device_formatted_reply() {
        let frame = build_frame("hbv9c40");
        let reply = parse_reply(&frame).unwrap();
        assert!(reply.matches("HBV"));
        assert_eq!(reply.payload, "9c40");
    }

    #[test]
    fn parse_tolerates_trailing_noise() {
        let mut frame = build_frame("hon");
        frame.extend_from_slice(b"\r\n  ");
        assert!(parse_reply(&frame).unwrap().matches("HON"));
    }

    #[test]
    fn parse_rejects_bad_checksum() {
        let mut frame = build_frame("hon");
        let n = frame.len();
        frame[n - 2] = b'0';
        assert!(matches!(
            parse_reply(&frame),
            Err(ProtocolError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn parse_rejects_missing_stx() {
        assert!(matches!(
            parse_reply(b"hon\x03aa\x0D"),
            Err(ProtocolError::BadFraming(_))
        ));
    }

    #[test]
    fn device_fault_reply_surfaces_code() {
        let frame = build_frame("hxx0003");
        match parse_reply(&frame) {
            Err(ProtocolError::Fault(fault)) => assert_eq!(fault, DeviceFault::Syntax),
            other => panic!("expected fault, got {:?}", other),
        }
    }

    #[test]
    fn monitor_reply_decodes_all_fields() {
        // status 0x0049, target 0x9c40, voltage 0x9c40, current 0x00c8, temp = counts for ~25C
        let temp_counts = celsius_to_counts(25.0);
        let payload = format!("00499c409c4000c8{:04x}", temp_counts);
        let frame = build_frame(&format!("hpo{}", payload));
        let reply = parse_reply(&frame).unwrap();
        let reading = parse_monitor(&reply).unwrap();
        assert_eq!(reading.status, 0x0049);
        assert!((reading.voltage - 72.48).abs() < 1e-9);
        assert!((reading.current - 0.996).abs() < 1e-9);
        assert!((reading.temperature - 25.0).abs() < 0.01);
    }

    #[test]
    fn monitor_reply_short_payload_rejected() {
        let frame = build_frame("hpo0049");
        let reply = parse_reply(&frame).unwrap();
        assert!(matches!(
            parse_monitor(&reply),
            Err(ProtocolError::ShortPayload { .. })
        ));
    }

    #[test]
    fn status_reply_decodes_word() {
        let frame = build_frame("hgs004d");
        let reply = parse_reply(&frame).unwrap();
        assert_eq!(parse_status(&reply).unwrap(), 0x004d);
    }
}
