//! SolarLake wire frames.
//!
//! Every frame opens with the `0x55 0xAA` magic and closes with a big-endian
//! `u16` checksum that is the byte-sum of everything before it. Responses
//! carry a 15-byte header, a two-byte payload size and the payload itself;
//! production values sit at fixed big-endian offsets inside the payload,
//! each with its own scale factor.

use thiserror::Error;

/// UDP port the inverters listen on for discovery broadcasts.
pub const BROADCAST_PORT: u16 = 60000;
/// TCP port the inverters answer data requests on.
pub const DATA_PORT: u16 = 60001;

pub const MAGIC: [u8; 2] = [0x55, 0xAA];

/// Advertisement frame broadcast during discovery.
pub const DISCOVERY: [u8; 16] = [
    0x55, 0xAA, 0x00, 0x0C, 0x01, 0x00, 0x00, 0x00, 0x00, 0x07, 0x00, 0x00, 0x00, 0x00, 0x01,
    0x13,
];

/// Request for the current production values.
pub const DATA_REQUEST: [u8; 21] = [
    0x55, 0xAA, 0x00, 0x11, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03, 0x02, 0x80, 0x01,
    0x03, 0xE8, 0x00, 0x4A, 0x02, 0xCC,
];

// Offsets into a response frame: magic (2), header (15), payload size (2).
const PAYLOAD_OFFSET: usize = 19;
// Shortest valid frame: preamble plus the trailing checksum.
const MIN_FRAME_LEN: usize = PAYLOAD_OFFSET + 2;
// A data payload carries fields up to the operating mode at offset 48.
const MIN_DATA_PAYLOAD_LEN: usize = 50;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame too short: {0} bytes")]
    TooShort(usize),
    #[error("bad frame magic: {0:#06x}")]
    BadMagic(u16),
    #[error("checksum mismatch: computed {computed:#06x}, received {received:#06x}")]
    ChecksumMismatch { computed: u16, received: u16 },
    #[error("data payload too short: {0} bytes")]
    ShortPayload(usize),
}

fn checksum(bytes: &[u8]) -> u16 {
    bytes.iter().map(|&b| u16::from(b)).fold(0, u16::wrapping_add)
}

/// Complete a frame body by appending its checksum.
pub fn frame(body: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(body.len() + 2);
    frame.extend_from_slice(body);
    frame.extend_from_slice(&checksum(body).to_be_bytes());
    frame
}

/// Validate a response frame and return its payload.
pub fn parse_frame(frame: &[u8]) -> Result<&[u8], FrameError> {
    if frame.len() < MIN_FRAME_LEN {
        return Err(FrameError::TooShort(frame.len()));
    }
    if frame[..2] != MAGIC {
        return Err(FrameError::BadMagic(u16::from_be_bytes([frame[0], frame[1]])));
    }
    let body = &frame[..frame.len() - 2];
    let computed = checksum(body);
    let received = u16::from_be_bytes([frame[frame.len() - 2], frame[frame.len() - 1]]);
    if computed != received {
        return Err(FrameError::ChecksumMismatch { computed, received });
    }
    Ok(&frame[PAYLOAD_OFFSET..frame.len() - 2])
}

/// Production values decoded from a data response payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductionData {
    pub output_power_w: f64,
    pub energy_today_kwh: f64,
    pub energy_total_kwh: f64,
    pub grid_voltage_v: f64,
    pub grid_current_a: f64,
    pub grid_frequency_hz: f64,
    pub inverter_temperature_c: f64,
}

impl ProductionData {
    pub fn decode(payload: &[u8]) -> Result<Self, FrameError> {
        if payload.len() < MIN_DATA_PAYLOAD_LEN {
            return Err(FrameError::ShortPayload(payload.len()));
        }
        let u16_at =
            |offset: usize| f64::from(u16::from_be_bytes([payload[offset], payload[offset + 1]]));
        let u32_at = |offset: usize| {
            f64::from(u32::from_be_bytes([
                payload[offset],
                payload[offset + 1],
                payload[offset + 2],
                payload[offset + 3],
            ]))
        };
        Ok(Self {
            inverter_temperature_c: u16_at(14) / 10.0,
            grid_voltage_v: u16_at(18) / 10.0,
            grid_frequency_hz: u16_at(20) / 100.0,
            grid_current_a: u16_at(22) / 10.0,
            energy_total_kwh: u32_at(34) / 10.0,
            energy_today_kwh: u16_at(42) / 100.0,
            output_power_w: u32_at(44),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Assemble a response frame around `payload`.
    fn response_frame(payload: &[u8]) -> Vec<u8> {
        let mut body = vec![
            0x55, 0xAA, 0x00, 0x11, 0x82, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03, 0x02, 0x81,
            0x01, 0x03, 0xE8,
        ];
        body.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        body.extend_from_slice(payload);
        frame(&body)
    }

    /// A 50-byte payload with the documented field offsets populated.
    fn sample_payload() -> Vec<u8> {
        let mut payload = vec![0u8; MIN_DATA_PAYLOAD_LEN];
        payload[14..16].copy_from_slice(&412u16.to_be_bytes()); // 41.2 °C
        payload[18..20].copy_from_slice(&2301u16.to_be_bytes()); // 230.1 V
        payload[20..22].copy_from_slice(&5002u16.to_be_bytes()); // 50.02 Hz
        payload[22..24].copy_from_slice(&63u16.to_be_bytes()); // 6.3 A
        payload[34..38].copy_from_slice(&123456u32.to_be_bytes()); // 12345.6 kWh
        payload[42..44].copy_from_slice(&731u16.to_be_bytes()); // 7.31 kWh
        payload[44..48].copy_from_slice(&1450u32.to_be_bytes()); // 1450 W
        payload
    }

    #[test]
    fn frame_reproduces_captured_data_request() {
        assert_eq!(frame(&DATA_REQUEST[..19]), DATA_REQUEST);
    }

    #[test]
    fn frame_reproduces_captured_advertisement() {
        assert_eq!(frame(&DISCOVERY[..14]), DISCOVERY);
    }

    #[test]
    fn parse_frame_returns_payload() {
        let payload = sample_payload();
        let frame = response_frame(&payload);
        assert_eq!(parse_frame(&frame).unwrap(), payload.as_slice());
    }

    #[test]
    fn parse_frame_rejects_truncated_input() {
        assert_eq!(parse_frame(&[0x55, 0xAA, 0x00]), Err(FrameError::TooShort(3)));
    }

    #[test]
    fn parse_frame_rejects_bad_magic() {
        let mut frame = response_frame(&sample_payload());
        frame[0] = 0x12;
        assert_eq!(parse_frame(&frame), Err(FrameError::BadMagic(0x12AA)));
    }

    #[test]
    fn parse_frame_rejects_checksum_mismatch() {
        let mut frame = response_frame(&sample_payload());
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        assert!(matches!(
            parse_frame(&frame),
            Err(FrameError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn decode_applies_offsets_and_scales() {
        let data = ProductionData::decode(&sample_payload()).unwrap();
        assert!((data.inverter_temperature_c - 41.2).abs() < 1e-9);
        assert!((data.grid_voltage_v - 230.1).abs() < 1e-9);
        assert!((data.grid_frequency_hz - 50.02).abs() < 1e-9);
        assert!((data.grid_current_a - 6.3).abs() < 1e-9);
        assert!((data.energy_total_kwh - 12345.6).abs() < 1e-9);
        assert!((data.energy_today_kwh - 7.31).abs() < 1e-9);
        assert!((data.output_power_w - 1450.0).abs() < 1e-9);
    }

    #[test]
    fn decode_rejects_short_payload() {
        assert_eq!(
            ProductionData::decode(&[0u8; 48]),
            Err(FrameError::ShortPayload(48))
        );
    }
}
