//! Sensor protocol decoder.
//!
//! Maps a raw notification buffer to a [`MeasurementRecord`]. Decoding never
//! fails: short or malformed buffers produce null or zeroed fields so callers
//! can render "no data yet" for a truncated first notification.
//!
//! The only state is the cadence registry, keyed by sensor identity and used
//! by the Cycling Power and CSC parsers.

use crate::metrics::cadence::{CadenceRegistry, DEFAULT_MAX_CADENCE_RPM};
use crate::sensors::ftms::{parse_indoor_bike_power, ControlResponse};
use crate::sensors::measurement::{fields, hex_string, MeasurementRecord};
use crate::sensors::types::{CharacteristicKey, SensorKind};

/// Minimum Cycling Power Measurement length (flags + power).
const CPS_MIN_LEN: usize = 4;

/// Minimum CSC length for the crank block at its fixed offset.
const CSC_CRANK_MIN_LEN: usize = 11;
const CSC_CRANK_OFFSET: usize = 7;
const CSC_CRANK_PRESENT: u8 = 0x02;

/// Minimum CORE temperature frame length.
const CORE_MIN_LEN: usize = 10;

/// Moxy frame length.
const MOXY_FRAME_LEN: usize = 9;

/// Optional Cycling Power fields that carry data, in bit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CpsField {
    PedalPowerBalance,
    PedalPowerBalanceReference,
    AccumulatedTorque,
    AccumulatedTorqueSource,
    WheelRevolutions,
    CrankRevolutions,
}

/// Entry of the Cycling Power optional field table.
struct CpsFieldSpec {
    mask: u16,
    size: usize,
    field: CpsField,
}

/// Optional fields walked in this exact order; the offset only advances for
/// fields whose bit is set.
const CPS_OPTIONAL_FIELDS: [CpsFieldSpec; 6] = [
    CpsFieldSpec { mask: 0x0001, size: 1, field: CpsField::PedalPowerBalance },
    CpsFieldSpec { mask: 0x0002, size: 0, field: CpsField::PedalPowerBalanceReference },
    CpsFieldSpec { mask: 0x0004, size: 2, field: CpsField::AccumulatedTorque },
    CpsFieldSpec { mask: 0x0008, size: 0, field: CpsField::AccumulatedTorqueSource },
    CpsFieldSpec { mask: 0x0010, size: 6, field: CpsField::WheelRevolutions },
    CpsFieldSpec { mask: 0x0020, size: 4, field: CpsField::CrankRevolutions },
];

/// Flags after the crank block. Reported, not parsed.
const CPS_TRAILING_FLAGS: [(u16, &str); 7] = [
    (0x0040, "Extreme Force Magnitudes"),
    (0x0080, "Extreme Torque Magnitudes"),
    (0x0100, "Extreme Angles"),
    (0x0200, "Top Dead Spot Angle"),
    (0x0400, "Bottom Dead Spot Angle"),
    (0x0800, "Accumulated Energy"),
    (0x1000, "Offset Compensation Indicator"),
];

fn read_u16(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset + 2)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

/// Decoder for every supported sensor kind.
#[derive(Debug)]
pub struct SensorDecoder {
    cadence: CadenceRegistry,
}

impl Default for SensorDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CADENCE_RPM)
    }
}

impl SensorDecoder {
    /// Create a decoder whose cadence estimates are capped at `max_cadence_rpm`.
    pub fn new(max_cadence_rpm: u32) -> Self {
        Self {
            cadence: CadenceRegistry::new(max_cadence_rpm),
        }
    }

    /// Per-sensor cadence state.
    pub fn cadence(&self) -> &CadenceRegistry {
        &self.cadence
    }

    /// Drop all per-sensor state for `sensor_id`. Call on disconnect.
    pub fn forget(&self, sensor_id: &str) {
        self.cadence.remove(sensor_id);
    }

    /// Decode a notification from `kind`'s `key` characteristic.
    pub fn decode(
        &self,
        kind: SensorKind,
        key: CharacteristicKey,
        data: &[u8],
        sensor_id: Option<&str>,
    ) -> MeasurementRecord {
        match (kind, key) {
            (SensorKind::HeartRate, _) => decode_heart_rate(data),
            (SensorKind::CyclingPower, _) => self.decode_cycling_power(data, sensor_id),
            (SensorKind::CyclingSpeedCadence, _) => self.decode_speed_cadence(data, sensor_id),
            (SensorKind::CoreBodyTemperature, _) => decode_core_temperature(data),
            (SensorKind::MuscleOxygen, _) => decode_muscle_oxygen(data, sensor_id),
            (SensorKind::SmartTrainer, CharacteristicKey::Control) => {
                decode_control_response(data)
            }
            (SensorKind::SmartTrainer, _) => decode_indoor_bike_data(data),
        }
    }

    /// Decode a Cycling Power Measurement (0x2A63).
    pub fn decode_cycling_power(&self, data: &[u8], sensor_id: Option<&str>) -> MeasurementRecord {
        let raw = hex_string(data);

        if data.len() < CPS_MIN_LEN {
            return MeasurementRecord::new()
                .with_number(fields::POWER, 0)
                .with_null(fields::CADENCE)
                .with_text(fields::RAW_DATA, raw)
                .with_null(fields::FLAGS)
                .with_text(fields::FLAG_DETAILS, "Insufficient data")
                .with_number(fields::DATA_LENGTH, data.len() as u32);
        }

        let flags = u16::from_le_bytes([data[0], data[1]]);
        let power = u16::from_le_bytes([data[2], data[3]]);

        let mut cadence = None;
        let mut details = Vec::new();
        let mut offset = CPS_MIN_LEN;

        for spec in CPS_OPTIONAL_FIELDS.iter().filter(|s| flags & s.mask != 0) {
            let block = data.get(offset..offset + spec.size);
            offset += spec.size;

            match (spec.field, block) {
                (CpsField::PedalPowerBalance, Some(b)) => {
                    details.push(format!("Pedal Power Balance ({:.1}%)", b[0] as f32 / 2.0))
                }
                (CpsField::PedalPowerBalanceReference, _) => {
                    details.push("Pedal Power Balance Reference".to_string())
                }
                (CpsField::AccumulatedTorque, Some(b)) => details.push(format!(
                    "Accumulated Torque ({})",
                    u16::from_le_bytes([b[0], b[1]])
                )),
                (CpsField::AccumulatedTorqueSource, _) => {
                    details.push("Accumulated Torque Source".to_string())
                }
                (CpsField::WheelRevolutions, Some(_)) => {
                    details.push("Wheel Revolution Data".to_string())
                }
                (CpsField::CrankRevolutions, Some(b)) => {
                    let revolutions = u16::from_le_bytes([b[0], b[1]]);
                    let event_time = u16::from_le_bytes([b[2], b[3]]);
                    details.push(format!(
                        "Crank Revolution Data (Rev: {}, Time: {})",
                        revolutions, event_time
                    ));
                    cadence = self.crank_cadence(sensor_id, revolutions, event_time);
                }
                (field, None) => {
                    details.push(format!("{} (insufficient data)", cps_field_name(field)))
                }
            }
        }

        details.extend(
            CPS_TRAILING_FLAGS
                .iter()
                .filter(|(mask, _)| flags & mask != 0)
                .map(|(_, name)| name.to_string()),
        );

        let flag_details = if details.is_empty() {
            "None".to_string()
        } else {
            details.join(", ")
        };

        MeasurementRecord::new()
            .with_number(fields::POWER, power)
            .with_optional(fields::CADENCE, cadence)
            .with_text(fields::RAW_DATA, raw)
            .with_text(fields::FLAGS, format!("0x{:04X}", flags))
            .with_text(fields::FLAG_DETAILS, flag_details)
            .with_number(fields::DATA_LENGTH, data.len() as u32)
    }

    /// Decode a CSC Measurement (0x2A5B).
    pub fn decode_speed_cadence(&self, data: &[u8], sensor_id: Option<&str>) -> MeasurementRecord {
        let cadence = data
            .first()
            .filter(|flags| *flags & CSC_CRANK_PRESENT != 0)
            .filter(|_| data.len() >= CSC_CRANK_MIN_LEN)
            .and_then(|_| {
                let revolutions = read_u16(data, CSC_CRANK_OFFSET)?;
                let event_time = read_u16(data, CSC_CRANK_OFFSET + 2)?;
                self.crank_cadence(sensor_id, revolutions, event_time)
            });

        MeasurementRecord::new().with_optional(fields::CADENCE, cadence)
    }

    fn crank_cadence(&self, sensor_id: Option<&str>, revolutions: u16, event_time: u16) -> Option<u32> {
        let Some(sensor_id) = sensor_id else {
            tracing::warn!("No sensor identity provided, skipping cadence calculation");
            return None;
        };
        let rpm = self.cadence.calculate(sensor_id, revolutions, event_time);
        tracing::debug!(
            "[{}] Cadence: rev={}, time={}, rpm={:?}",
            sensor_id,
            revolutions,
            event_time,
            rpm
        );
        rpm
    }
}

fn cps_field_name(field: CpsField) -> &'static str {
    match field {
        CpsField::PedalPowerBalance => "Pedal Power Balance",
        CpsField::PedalPowerBalanceReference => "Pedal Power Balance Reference",
        CpsField::AccumulatedTorque => "Accumulated Torque",
        CpsField::AccumulatedTorqueSource => "Accumulated Torque Source",
        CpsField::WheelRevolutions => "Wheel Revolution Data",
        CpsField::CrankRevolutions => "Crank Revolution Data",
    }
}

/// Decode a Heart Rate Measurement (0x2A37).
pub fn decode_heart_rate(data: &[u8]) -> MeasurementRecord {
    let heart_rate = match data {
        [flags, rest @ ..] if flags & 0x01 != 0 => read_u16(rest, 0).unwrap_or(0),
        [_, value, ..] => *value as u16,
        _ => 0,
    };
    MeasurementRecord::new().with_number(fields::HEART_RATE, heart_rate)
}

/// Decode a CORE body temperature frame.
pub fn decode_core_temperature(data: &[u8]) -> MeasurementRecord {
    if data.len() < CORE_MIN_LEN {
        return MeasurementRecord::new()
            .with_null(fields::CORE_TEMPERATURE)
            .with_null(fields::SKIN_TEMPERATURE);
    }

    let core = read_u16(data, 1).map(|v| v as f64 / 100.0);
    let skin = read_u16(data, 3).map(|v| v as f64 / 100.0);

    MeasurementRecord::new()
        .with_optional(fields::CORE_TEMPERATURE, core)
        .with_optional(fields::SKIN_TEMPERATURE, skin)
}

/// Decode a Moxy muscle oxygen frame. Short keep-alive frames yield zeros.
pub fn decode_muscle_oxygen(data: &[u8], sensor_id: Option<&str>) -> MeasurementRecord {
    let id = sensor_id.unwrap_or("unknown");

    let readings = (data.len() >= MOXY_FRAME_LEN)
        .then(|| Some((read_u16(data, 2)?, read_u16(data, 6)?)))
        .flatten();

    let Some((smo2_raw, thb_raw)) = readings else {
        tracing::debug!(
            "[{}] Short Moxy frame: {} bytes ({} needed)",
            id,
            data.len(),
            MOXY_FRAME_LEN
        );
        return MeasurementRecord::new()
            .with_number(fields::SMO2, 0)
            .with_number(fields::THB, 0);
    };

    let smo2 = round_to(smo2_raw as f64 / 10.0, 1);
    let thb = round_to(thb_raw as f64 / 100.0, 2);
    tracing::trace!("[{}] Moxy: SmO2={}%, THb={}g/dL", id, smo2, thb);

    MeasurementRecord::new()
        .with_number(fields::SMO2, smo2)
        .with_number(fields::THB, thb)
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

/// Decode FTMS Indoor Bike Data (0x2AD2): instantaneous power at bytes 2-3.
pub fn decode_indoor_bike_data(data: &[u8]) -> MeasurementRecord {
    MeasurementRecord::new().with_optional(fields::POWER, parse_indoor_bike_power(data))
}

/// Decode an FTMS control point indication.
pub fn decode_control_response(data: &[u8]) -> MeasurementRecord {
    match ControlResponse::parse(data) {
        Some(response) => MeasurementRecord::new()
            .with_number(fields::RESPONSE_CODE, response.response_code)
            .with_number(fields::REQUEST_OP_CODE, response.request_op_code)
            .with_number(fields::RESULT_CODE, response.result.as_byte())
            .with_text(fields::RESULT, response.status_message()),
        None => MeasurementRecord::new()
            .with_null(fields::RESPONSE_CODE)
            .with_null(fields::REQUEST_OP_CODE)
            .with_null(fields::RESULT_CODE)
            .with_text(fields::RESULT, format!("Invalid response: {}", hex_string(data))),
    }
}
