//! Transport boundary between the sensor stack and a BLE implementation.
//!
//! The decoder, trainer engine and sensor manager only see these traits. The
//! btleplug-backed implementation lives in [`crate::sensors::ble`]; an
//! in-memory one in [`crate::sensors::loopback`] drives tests and the
//! simulator.

use crate::sensors::types::SensorError;
use std::future::Future;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Capacity of per-connection event channels.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Event raised by a connected device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A subscribed characteristic notified or indicated a new value
    ValueChanged {
        device_id: String,
        characteristic: Uuid,
        value: Vec<u8>,
    },
    /// The link dropped or was closed
    Disconnected { device_id: String },
}

/// Entry point: opens GATT connections by device identifier.
pub trait Transport: Clone + Send + Sync + 'static {
    type Connection: Connection;

    /// Connect to a device's GATT server.
    fn connect(
        &self,
        device_id: &str,
    ) -> impl Future<Output = Result<Self::Connection, SensorError>> + Send;
}

/// An open GATT connection.
pub trait Connection: Clone + Send + Sync + 'static {
    type Characteristic: GattCharacteristic;
    type Service: GattService<Characteristic = Self::Characteristic>;

    fn device_id(&self) -> &str;

    /// Look up a primary service.
    fn get_service(
        &self,
        uuid: Uuid,
    ) -> impl Future<Output = Result<Self::Service, SensorError>> + Send;

    /// Close the connection. Subscribers receive [`TransportEvent::Disconnected`].
    fn disconnect(&self) -> impl Future<Output = Result<(), SensorError>> + Send;

    /// Subscribe to value changes and disconnection.
    fn events(&self) -> broadcast::Receiver<TransportEvent>;
}

/// A GATT primary service.
pub trait GattService: Clone + Send + Sync + 'static {
    type Characteristic: GattCharacteristic;

    fn uuid(&self) -> Uuid;

    fn get_characteristic(
        &self,
        uuid: Uuid,
    ) -> impl Future<Output = Result<Self::Characteristic, SensorError>> + Send;
}

/// A GATT characteristic.
pub trait GattCharacteristic: Clone + Send + Sync + 'static {
    fn uuid(&self) -> Uuid;

    /// Enable notifications or indications. Values arrive as
    /// [`TransportEvent::ValueChanged`] on the owning connection.
    fn start_notifications(&self) -> impl Future<Output = Result<(), SensorError>> + Send;

    /// Write with response.
    fn write_value(&self, value: &[u8]) -> impl Future<Output = Result<(), SensorError>> + Send;
}
