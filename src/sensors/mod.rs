//! Sensor module: BLE transport, protocol decoding and trainer control.

pub mod ble;
pub mod decoder;
pub mod ftms;
pub mod gatt;
pub mod loopback;
pub mod manager;
pub mod measurement;
pub mod queue;
pub mod trainer;
pub mod transport;
pub mod types;

pub use ble::BleTransport;
pub use decoder::SensorDecoder;
pub use ftms::{ControlResponse, FtmsOpCode, ResultCode, TrainerCommand};
pub use loopback::{LoopbackDevice, LoopbackTransport};
pub use manager::SensorManager;
pub use measurement::{FieldValue, MeasurementRecord};
pub use queue::{CommandHandle, CommandQueue, OperationKind, QueueConfig, QueueError, QueueStatus};
pub use trainer::{
    TargetValues, TrainerCapabilities, TrainerController, TrainerMode, TrainerPhase,
    TrainerStatus, TrainerStatusPatch, TrainerUpdate,
};
pub use transport::{Connection, GattCharacteristic, GattService, Transport, TransportEvent};
pub use types::{
    CharacteristicKey, ConnectionState, DiscoveredSensor, SensorError, SensorEvent, SensorKind,
};
