//! In-memory transport.
//!
//! Devices are built from the sensor profiles in [`crate::sensors::gatt`] and
//! behave like real peripherals: services and characteristics must exist,
//! operations require a connection, and notifications are only delivered for
//! subscribed characteristics. Writes to the FTMS control point are answered
//! with a `[0x80, op, result]` indication, so the trainer engine can run end
//! to end without hardware.

use crate::sensors::ftms::{ControlResponse, ResultCode};
use crate::sensors::gatt::{self, FTMS_CONTROL_POINT_UUID};
use crate::sensors::transport::{
    Connection, GattCharacteristic, GattService, Transport, TransportEvent,
    EVENT_CHANNEL_CAPACITY,
};
use crate::sensors::types::{SensorError, SensorKind};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use uuid::Uuid;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct DeviceState {
    connected: bool,
    subscriptions: HashSet<Uuid>,
    writes: Vec<(Uuid, Vec<u8>)>,
    control_result: ResultCode,
    auto_respond: bool,
    fail_writes: bool,
    fail_subscriptions: bool,
    refuse_connections: bool,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            connected: false,
            subscriptions: HashSet::new(),
            writes: Vec::new(),
            control_result: ResultCode::Success,
            auto_respond: true,
            fail_writes: false,
            fail_subscriptions: false,
            refuse_connections: false,
        }
    }
}

#[derive(Debug)]
struct DeviceInner {
    id: String,
    name: String,
    /// service uuid -> characteristic uuids
    services: HashMap<Uuid, Vec<Uuid>>,
    state: Mutex<DeviceState>,
    events: broadcast::Sender<TransportEvent>,
}

/// Handle to a simulated peripheral.
#[derive(Debug, Clone)]
pub struct LoopbackDevice {
    inner: Arc<DeviceInner>,
}

impl LoopbackDevice {
    fn new(id: &str, name: &str, kinds: &[SensorKind]) -> Self {
        let services = kinds
            .iter()
            .map(|kind| {
                let profile = gatt::profile(*kind);
                let characteristics = profile.characteristics.iter().map(|c| c.uuid).collect();
                (profile.service, characteristics)
            })
            .collect();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            inner: Arc::new(DeviceInner {
                id: id.to_string(),
                name: name.to_string(),
                services,
                state: Mutex::new(DeviceState::default()),
                events,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, DeviceState> {
        lock(&self.inner.state)
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn has_service(&self, uuid: Uuid) -> bool {
        self.inner.services.contains_key(&uuid)
    }

    pub fn is_connected(&self) -> bool {
        self.state().connected
    }

    pub fn is_subscribed(&self, characteristic: Uuid) -> bool {
        self.state().subscriptions.contains(&characteristic)
    }

    /// Every write so far, in order.
    pub fn writes(&self) -> Vec<(Uuid, Vec<u8>)> {
        self.state().writes.clone()
    }

    /// Payloads written to one characteristic, in order.
    pub fn writes_to(&self, characteristic: Uuid) -> Vec<Vec<u8>> {
        self.state()
            .writes
            .iter()
            .filter(|(uuid, _)| *uuid == characteristic)
            .map(|(_, value)| value.clone())
            .collect()
    }

    /// Result code used when answering control point writes.
    pub fn set_control_result(&self, result: ResultCode) {
        self.state().control_result = result;
    }

    /// Whether control point writes are answered automatically.
    pub fn set_auto_respond(&self, enabled: bool) {
        self.state().auto_respond = enabled;
    }

    /// Make every subsequent write fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.state().fail_writes = fail;
    }

    /// Make every subsequent notification subscription fail.
    pub fn set_fail_subscriptions(&self, fail: bool) {
        self.state().fail_subscriptions = fail;
    }

    /// Make subsequent connection attempts fail.
    pub fn set_refuse_connections(&self, refuse: bool) {
        self.state().refuse_connections = refuse;
    }

    /// Emit a value on a subscribed characteristic.
    ///
    /// Returns `false` when the device is disconnected or the characteristic
    /// has no active subscription.
    pub fn notify(&self, characteristic: Uuid, value: &[u8]) -> bool {
        {
            let state = self.state();
            if !state.connected || !state.subscriptions.contains(&characteristic) {
                return false;
            }
        }
        self.send(TransportEvent::ValueChanged {
            device_id: self.inner.id.clone(),
            characteristic,
            value: value.to_vec(),
        });
        true
    }

    /// Drop the link as if the peripheral went out of range.
    pub fn simulate_disconnect(&self) {
        self.drop_link("link lost");
    }

    fn drop_link(&self, reason: &str) {
        {
            let mut state = self.state();
            if !state.connected {
                return;
            }
            state.connected = false;
            state.subscriptions.clear();
        }
        tracing::debug!("[{}] Loopback disconnect: {}", self.inner.id, reason);
        self.send(TransportEvent::Disconnected {
            device_id: self.inner.id.clone(),
        });
    }

    fn send(&self, event: TransportEvent) {
        // No receivers is not an error: nobody is listening yet.
        let _ = self.inner.events.send(event);
    }

    fn ensure_connected(&self) -> Result<(), SensorError> {
        if self.state().connected {
            Ok(())
        } else {
            Err(SensorError::NotConnected(self.inner.id.clone()))
        }
    }
}

/// Simulated BLE stack holding a set of devices.
#[derive(Debug, Clone, Default)]
pub struct LoopbackTransport {
    devices: Arc<Mutex<HashMap<String, LoopbackDevice>>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device exposing the services of `kinds`.
    pub fn add_device(&self, device_id: &str, name: &str, kinds: &[SensorKind]) -> LoopbackDevice {
        let device = LoopbackDevice::new(device_id, name, kinds);
        lock(&self.devices).insert(device_id.to_string(), device.clone());
        device
    }

    pub fn device(&self, device_id: &str) -> Option<LoopbackDevice> {
        lock(&self.devices).get(device_id).cloned()
    }

    /// Registered device identifiers, sorted.
    pub fn device_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.devices).keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl Transport for LoopbackTransport {
    type Connection = LoopbackConnection;

    async fn connect(&self, device_id: &str) -> Result<LoopbackConnection, SensorError> {
        let device = self
            .device(device_id)
            .ok_or_else(|| SensorError::SensorNotFound(device_id.to_string()))?;

        {
            let mut state = device.state();
            if state.refuse_connections {
                return Err(SensorError::ConnectionFailed(format!(
                    "{} refused connection",
                    device_id
                )));
            }
            state.connected = true;
        }

        tracing::debug!("[{}] Loopback connected", device_id);
        Ok(LoopbackConnection { device })
    }
}

/// Connection to a [`LoopbackDevice`].
#[derive(Debug, Clone)]
pub struct LoopbackConnection {
    device: LoopbackDevice,
}

impl LoopbackConnection {
    pub fn device(&self) -> &LoopbackDevice {
        &self.device
    }
}

impl Connection for LoopbackConnection {
    type Characteristic = LoopbackCharacteristic;
    type Service = LoopbackService;

    fn device_id(&self) -> &str {
        self.device.id()
    }

    async fn get_service(&self, uuid: Uuid) -> Result<LoopbackService, SensorError> {
        self.device.ensure_connected()?;
        if !self.device.has_service(uuid) {
            return Err(SensorError::ServiceNotFound(uuid));
        }
        Ok(LoopbackService {
            device: self.device.clone(),
            uuid,
        })
    }

    async fn disconnect(&self) -> Result<(), SensorError> {
        self.device.drop_link("disconnect requested");
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.device.inner.events.subscribe()
    }
}

#[derive(Debug, Clone)]
pub struct LoopbackService {
    device: LoopbackDevice,
    uuid: Uuid,
}

impl GattService for LoopbackService {
    type Characteristic = LoopbackCharacteristic;

    fn uuid(&self) -> Uuid {
        self.uuid
    }

    async fn get_characteristic(&self, uuid: Uuid) -> Result<LoopbackCharacteristic, SensorError> {
        self.device.ensure_connected()?;
        let exists = self
            .device
            .inner
            .services
            .get(&self.uuid)
            .is_some_and(|chars| chars.contains(&uuid));
        if !exists {
            return Err(SensorError::CharacteristicNotFound(uuid));
        }
        Ok(LoopbackCharacteristic {
            device: self.device.clone(),
            uuid,
        })
    }
}

#[derive(Debug, Clone)]
pub struct LoopbackCharacteristic {
    device: LoopbackDevice,
    uuid: Uuid,
}

impl GattCharacteristic for LoopbackCharacteristic {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    async fn start_notifications(&self) -> Result<(), SensorError> {
        self.device.ensure_connected()?;
        let mut state = self.device.state();
        if state.fail_subscriptions {
            return Err(SensorError::SubscriptionFailed(format!(
                "simulated failure subscribing to {}",
                self.uuid
            )));
        }
        state.subscriptions.insert(self.uuid);
        Ok(())
    }

    async fn write_value(&self, value: &[u8]) -> Result<(), SensorError> {
        let response = {
            let mut state = self.device.state();
            if !state.connected {
                return Err(SensorError::NotConnected(self.device.id().to_string()));
            }
            if state.fail_writes {
                return Err(SensorError::WriteFailed(format!(
                    "simulated failure writing {}",
                    self.uuid
                )));
            }
            state.writes.push((self.uuid, value.to_vec()));

            let answer = self.uuid == FTMS_CONTROL_POINT_UUID
                && state.auto_respond
                && state.subscriptions.contains(&self.uuid);
            match (answer, value.first()) {
                (true, Some(op)) => Some(ControlResponse::encode(*op, state.control_result)),
                _ => None,
            }
        };

        if let Some(response) = response {
            self.device.send(TransportEvent::ValueChanged {
                device_id: self.device.id().to_string(),
                characteristic: self.uuid,
                value: response,
            });
        }
        Ok(())
    }
}
