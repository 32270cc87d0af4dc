//! Sensor types and enums for BLE fitness sensors.

use crate::sensors::measurement::MeasurementRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Instant;
use thiserror::Error;
use uuid::Uuid;

/// Family of BLE fitness sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    /// Heart Rate Service (0x180D)
    HeartRate,
    /// Cycling Power Service (0x1818)
    CyclingPower,
    /// Cycling Speed and Cadence Service (0x1816)
    CyclingSpeedCadence,
    /// CORE body temperature sensor (vendor service)
    CoreBodyTemperature,
    /// Moxy muscle oxygen monitor (vendor service)
    MuscleOxygen,
    /// Smart trainer with FTMS support (0x1826)
    SmartTrainer,
}

impl SensorKind {
    /// Every kind, in the order services are tried during identification.
    pub const ALL: [SensorKind; 6] = [
        SensorKind::HeartRate,
        SensorKind::CyclingPower,
        SensorKind::CyclingSpeedCadence,
        SensorKind::CoreBodyTemperature,
        SensorKind::MuscleOxygen,
        SensorKind::SmartTrainer,
    ];

    /// Plural description used in scan and log messages.
    pub fn scan_description(&self) -> &'static str {
        match self {
            SensorKind::HeartRate => "heart rate monitors",
            SensorKind::CyclingPower => "power meters",
            SensorKind::CyclingSpeedCadence => "speed & cadence sensors",
            SensorKind::CoreBodyTemperature => "temperature sensors",
            SensorKind::MuscleOxygen => "muscle oxygen sensors",
            SensorKind::SmartTrainer => "smart trainers",
        }
    }
}

impl std::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorKind::HeartRate => write!(f, "Heart Rate"),
            SensorKind::CyclingPower => write!(f, "Cycling Power"),
            SensorKind::CyclingSpeedCadence => write!(f, "Speed/Cadence"),
            SensorKind::CoreBodyTemperature => write!(f, "Core Body Temperature"),
            SensorKind::MuscleOxygen => write!(f, "Muscle Oxygen"),
            SensorKind::SmartTrainer => write!(f, "Smart Trainer"),
        }
    }
}

impl FromStr for SensorKind {
    type Err = SensorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "hr" | "heart_rate" | "heartrate" => Ok(SensorKind::HeartRate),
            "power" | "cycling_power" | "cyclingpower" => Ok(SensorKind::CyclingPower),
            "csc" | "speed_cadence" | "cycling_speed_cadence" => {
                Ok(SensorKind::CyclingSpeedCadence)
            }
            "core" | "core_body_temperature" | "temperature" => {
                Ok(SensorKind::CoreBodyTemperature)
            }
            "moxy" | "smo2" | "muscle_oxygen" => Ok(SensorKind::MuscleOxygen),
            "trainer" | "ftms" | "smart_trainer" => Ok(SensorKind::SmartTrainer),
            _ => Err(SensorError::UnknownSensorKind(s.to_string())),
        }
    }
}

/// Characteristic role within a sensor profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CharacteristicKey {
    /// Primary measurement notifications
    Measurement,
    /// Write-only trigger that starts streaming (Moxy)
    Trigger,
    /// FTMS control point (write + indicate)
    Control,
    /// FTMS Indoor Bike Data notifications
    IndoorBikeData,
}

impl std::fmt::Display for CharacteristicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CharacteristicKey::Measurement => write!(f, "measurement"),
            CharacteristicKey::Trigger => write!(f, "trigger"),
            CharacteristicKey::Control => write!(f, "control"),
            CharacteristicKey::IndoorBikeData => write!(f, "indoor bike data"),
        }
    }
}

/// Connection state of a sensor or trainer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not connected
    #[default]
    Disconnected,
    /// Connection in progress
    Connecting,
    /// Active connection
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting..."),
            ConnectionState::Connected => write!(f, "Connected"),
        }
    }
}

/// A sensor discovered during BLE scanning.
#[derive(Debug, Clone)]
pub struct DiscoveredSensor {
    /// BLE device address/identifier
    pub device_id: String,
    /// User-friendly name (from BLE advertisement)
    pub name: String,
    /// Detected sensor kind
    pub kind: SensorKind,
    /// Signal strength (RSSI)
    pub signal_strength: Option<i16>,
    /// When the sensor was last seen
    pub last_seen: Instant,
}

/// Events from the sensor system.
#[derive(Debug, Clone)]
pub enum SensorEvent {
    /// A notification was decoded
    Measurement {
        device_id: String,
        kind: SensorKind,
        characteristic: CharacteristicKey,
        record: MeasurementRecord,
        received_at: DateTime<Utc>,
    },
    /// Sensor connection state changed
    ConnectionChanged {
        device_id: String,
        state: ConnectionState,
    },
    /// Error occurred
    Error(String),
}

/// Errors that can occur in the sensor system.
#[derive(Debug, Clone, Error)]
pub enum SensorError {
    /// BLE adapter not found or unavailable
    #[error("Bluetooth adapter not found")]
    AdapterNotFound,

    /// Failed to start BLE scanning
    #[error("Failed to start scanning: {0}")]
    ScanFailed(String),

    /// Sensor not found with given device ID
    #[error("Sensor not found: {0}")]
    SensorNotFound(String),

    /// Connection to sensor failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// GATT service missing on the device
    #[error("Service not found: {0}")]
    ServiceNotFound(Uuid),

    /// GATT characteristic missing on the service
    #[error("Characteristic not found: {0}")]
    CharacteristicNotFound(Uuid),

    /// No supported service was found while identifying the sensor
    #[error("Unsupported sensor: {0}")]
    UnsupportedSensor(String),

    /// Operation requires a connection that does not exist
    #[error("Not connected: {0}")]
    NotConnected(String),

    /// Failed to subscribe to sensor notifications
    #[error("Failed to subscribe to notifications: {0}")]
    SubscriptionFailed(String),

    /// Failed to write to sensor characteristic
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// Command rejected before being sent
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// Unknown sensor kind name
    #[error("Unknown sensor kind: {0}")]
    UnknownSensorKind(String),

    /// Generic BLE error
    #[error("BLE error: {0}")]
    BleError(String),
}
