//! GATT service and characteristic identifiers and the per-kind sensor profiles.

use crate::sensors::types::{CharacteristicKey, SensorKind};
use uuid::Uuid;

/// Heart Rate Service UUID (0x180D)
pub const HEART_RATE_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x0000_180d_0000_1000_8000_0080_5f9b_34fb);

/// Heart Rate Measurement UUID (0x2A37)
pub const HEART_RATE_MEASUREMENT_UUID: Uuid =
    Uuid::from_u128(0x0000_2a37_0000_1000_8000_0080_5f9b_34fb);

/// Cycling Power Service UUID (0x1818)
pub const CYCLING_POWER_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x0000_1818_0000_1000_8000_0080_5f9b_34fb);

/// Cycling Power Measurement UUID (0x2A63)
pub const CYCLING_POWER_MEASUREMENT_UUID: Uuid =
    Uuid::from_u128(0x0000_2a63_0000_1000_8000_0080_5f9b_34fb);

/// Cycling Speed and Cadence Service UUID (0x1816)
pub const CSC_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_1816_0000_1000_8000_0080_5f9b_34fb);

/// CSC Measurement UUID (0x2A5B)
pub const CSC_MEASUREMENT_UUID: Uuid = Uuid::from_u128(0x0000_2a5b_0000_1000_8000_0080_5f9b_34fb);

/// FTMS Service UUID (0x1826)
pub const FTMS_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_1826_0000_1000_8000_0080_5f9b_34fb);

/// Indoor Bike Data Characteristic UUID (0x2AD2)
pub const INDOOR_BIKE_DATA_UUID: Uuid = Uuid::from_u128(0x0000_2ad2_0000_1000_8000_0080_5f9b_34fb);

/// Fitness Machine Control Point UUID (0x2AD9)
pub const FTMS_CONTROL_POINT_UUID: Uuid =
    Uuid::from_u128(0x0000_2ad9_0000_1000_8000_0080_5f9b_34fb);

/// CORE body temperature service
pub const CORE_TEMPERATURE_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x0000_2100_5b1e_4347_b07c_97b5_14da_e121);

/// CORE body temperature measurement
pub const CORE_TEMPERATURE_MEASUREMENT_UUID: Uuid =
    Uuid::from_u128(0x0000_2101_5b1e_4347_b07c_97b5_14da_e121);

/// Moxy muscle oxygen service
pub const MOXY_SERVICE_UUID: Uuid = Uuid::from_u128(0x6404_d801_4cb9_11e8_b566_0800_200c_9a66);

/// Moxy data source (notify)
pub const MOXY_MEASUREMENT_UUID: Uuid =
    Uuid::from_u128(0x6404_d804_4cb9_11e8_b566_0800_200c_9a66);

/// Moxy trigger (write with response)
pub const MOXY_TRIGGER_UUID: Uuid = Uuid::from_u128(0x6404_d811_4cb9_11e8_b566_0800_200c_9a66);

/// Payload written to the Moxy trigger to start streaming.
pub const MOXY_TRIGGER_PAYLOAD: &[u8] = &[0x01];

/// How a characteristic is used after connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharacteristicAccess {
    /// Subscribe to notifications/indications
    Notify,
    /// Write a fixed payload once
    Write(&'static [u8]),
}

/// One characteristic of a sensor profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicProfile {
    pub key: CharacteristicKey,
    pub uuid: Uuid,
    pub access: CharacteristicAccess,
}

/// Service and characteristics used for a sensor kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorProfile {
    pub kind: SensorKind,
    pub service: Uuid,
    pub characteristics: &'static [CharacteristicProfile],
}

impl SensorProfile {
    /// Find the characteristic with the given role.
    pub fn characteristic(&self, key: CharacteristicKey) -> Option<&CharacteristicProfile> {
        self.characteristics.iter().find(|c| c.key == key)
    }

    /// Map a characteristic UUID back to its role.
    pub fn key_for(&self, uuid: Uuid) -> Option<CharacteristicKey> {
        self.characteristics
            .iter()
            .find(|c| c.uuid == uuid)
            .map(|c| c.key)
    }
}

const fn notify(key: CharacteristicKey, uuid: Uuid) -> CharacteristicProfile {
    CharacteristicProfile {
        key,
        uuid,
        access: CharacteristicAccess::Notify,
    }
}

static HEART_RATE_PROFILE: SensorProfile = SensorProfile {
    kind: SensorKind::HeartRate,
    service: HEART_RATE_SERVICE_UUID,
    characteristics: &[notify(
        CharacteristicKey::Measurement,
        HEART_RATE_MEASUREMENT_UUID,
    )],
};

static CYCLING_POWER_PROFILE: SensorProfile = SensorProfile {
    kind: SensorKind::CyclingPower,
    service: CYCLING_POWER_SERVICE_UUID,
    characteristics: &[notify(
        CharacteristicKey::Measurement,
        CYCLING_POWER_MEASUREMENT_UUID,
    )],
};

static CSC_PROFILE: SensorProfile = SensorProfile {
    kind: SensorKind::CyclingSpeedCadence,
    service: CSC_SERVICE_UUID,
    characteristics: &[notify(CharacteristicKey::Measurement, CSC_MEASUREMENT_UUID)],
};

static CORE_PROFILE: SensorProfile = SensorProfile {
    kind: SensorKind::CoreBodyTemperature,
    service: CORE_TEMPERATURE_SERVICE_UUID,
    characteristics: &[notify(
        CharacteristicKey::Measurement,
        CORE_TEMPERATURE_MEASUREMENT_UUID,
    )],
};

static MOXY_PROFILE: SensorProfile = SensorProfile {
    kind: SensorKind::MuscleOxygen,
    service: MOXY_SERVICE_UUID,
    characteristics: &[
        notify(CharacteristicKey::Measurement, MOXY_MEASUREMENT_UUID),
        CharacteristicProfile {
            key: CharacteristicKey::Trigger,
            uuid: MOXY_TRIGGER_UUID,
            access: CharacteristicAccess::Write(MOXY_TRIGGER_PAYLOAD),
        },
    ],
};

static SMART_TRAINER_PROFILE: SensorProfile = SensorProfile {
    kind: SensorKind::SmartTrainer,
    service: FTMS_SERVICE_UUID,
    characteristics: &[
        notify(CharacteristicKey::Control, FTMS_CONTROL_POINT_UUID),
        notify(CharacteristicKey::IndoorBikeData, INDOOR_BIKE_DATA_UUID),
    ],
};

/// Profile for a sensor kind.
pub fn profile(kind: SensorKind) -> &'static SensorProfile {
    match kind {
        SensorKind::HeartRate => &HEART_RATE_PROFILE,
        SensorKind::CyclingPower => &CYCLING_POWER_PROFILE,
        SensorKind::CyclingSpeedCadence => &CSC_PROFILE,
        SensorKind::CoreBodyTemperature => &CORE_PROFILE,
        SensorKind::MuscleOxygen => &MOXY_PROFILE,
        SensorKind::SmartTrainer => &SMART_TRAINER_PROFILE,
    }
}

/// Identify a sensor kind from an advertised service UUID.
pub fn kind_for_service(service: Uuid) -> Option<SensorKind> {
    SensorKind::ALL
        .into_iter()
        .find(|kind| profile(*kind).service == service)
}

/// Service UUIDs for every supported sensor kind (used as a scan filter).
pub fn all_service_uuids() -> Vec<Uuid> {
    SensorKind::ALL
        .iter()
        .map(|kind| profile(*kind).service)
        .collect()
}
