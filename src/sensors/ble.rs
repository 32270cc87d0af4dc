//! btleplug-backed transport.

use crate::sensors::gatt::{all_service_uuids, kind_for_service};
use crate::sensors::transport::{
    Connection, GattCharacteristic, GattService, Transport, TransportEvent,
    EVENT_CHANNEL_CAPACITY,
};
use crate::sensors::types::{DiscoveredSensor, SensorError};
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, Service,
    WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::StreamExt;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Default limit for establishing a GATT connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Transport over the first system Bluetooth adapter.
#[derive(Clone)]
pub struct BleTransport {
    adapter: Adapter,
    connect_timeout: Duration,
}

impl BleTransport {
    /// Open the first available adapter.
    pub async fn initialize() -> Result<Self, SensorError> {
        tracing::info!("Initializing BLE transport");

        let manager = Manager::new()
            .await
            .map_err(|e| SensorError::BleError(e.to_string()))?;

        let adapters = manager
            .adapters()
            .await
            .map_err(|e| SensorError::BleError(e.to_string()))?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(SensorError::AdapterNotFound)?;

        tracing::info!("BLE adapter initialized");
        Ok(Self {
            adapter,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        })
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Scan for `duration` and return every peripheral advertising a supported service.
    pub async fn scan(&self, duration: Duration) -> Result<Vec<DiscoveredSensor>, SensorError> {
        tracing::info!("Scanning for sensors for {:?}", duration);

        self.adapter
            .start_scan(ScanFilter {
                services: all_service_uuids(),
            })
            .await
            .map_err(|e| SensorError::ScanFailed(e.to_string()))?;

        tokio::time::sleep(duration).await;

        if let Err(e) = self.adapter.stop_scan().await {
            tracing::warn!("Failed to stop scan: {}", e);
        }

        let peripherals = self
            .adapter
            .peripherals()
            .await
            .map_err(|e| SensorError::BleError(e.to_string()))?;

        let mut sensors = Vec::new();
        for peripheral in peripherals {
            if let Some(sensor) = classify_peripheral(&peripheral).await {
                tracing::info!(
                    "Discovered {} sensor: {} ({})",
                    sensor.kind,
                    sensor.name,
                    sensor.device_id
                );
                sensors.push(sensor);
            }
        }
        Ok(sensors)
    }

    async fn find_peripheral(&self, device_id: &str) -> Result<Peripheral, SensorError> {
        let peripherals = self
            .adapter
            .peripherals()
            .await
            .map_err(|e| SensorError::BleError(e.to_string()))?;

        peripherals
            .into_iter()
            .find(|p| p.id().to_string() == device_id)
            .ok_or_else(|| SensorError::SensorNotFound(device_id.to_string()))
    }
}

/// Identify a peripheral from its advertised services.
async fn classify_peripheral(peripheral: &Peripheral) -> Option<DiscoveredSensor> {
    let properties = peripheral.properties().await.ok()??;
    let kind = properties
        .services
        .iter()
        .find_map(|uuid| kind_for_service(*uuid))?;

    Some(DiscoveredSensor {
        device_id: peripheral.id().to_string(),
        name: properties
            .local_name
            .unwrap_or_else(|| "Unknown Sensor".to_string()),
        kind,
        signal_strength: properties.rssi,
        last_seen: Instant::now(),
    })
}

impl Transport for BleTransport {
    type Connection = BleConnection;

    async fn connect(&self, device_id: &str) -> Result<BleConnection, SensorError> {
        let peripheral = self.find_peripheral(device_id).await?;

        match tokio::time::timeout(self.connect_timeout, peripheral.connect()).await {
            Ok(result) => result.map_err(|e| SensorError::ConnectionFailed(e.to_string()))?,
            Err(_) => {
                return Err(SensorError::ConnectionFailed(format!(
                    "timed out after {:?}",
                    self.connect_timeout
                )))
            }
        }

        peripheral
            .discover_services()
            .await
            .map_err(|e| SensorError::ConnectionFailed(e.to_string()))?;

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        tokio::spawn(pump_events(
            peripheral.clone(),
            self.adapter.clone(),
            device_id.to_string(),
            events.clone(),
        ));

        Ok(BleConnection {
            peripheral,
            device_id: device_id.to_string(),
            events,
        })
    }
}

/// Forward notifications and disconnection into the connection's channel.
async fn pump_events(
    peripheral: Peripheral,
    adapter: Adapter,
    device_id: String,
    tx: broadcast::Sender<TransportEvent>,
) {
    let mut notifications = match peripheral.notifications().await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::error!("[{}] Failed to get notification stream: {}", device_id, e);
            return;
        }
    };
    let mut central_events = match adapter.events().await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::error!("Failed to get adapter events: {}", e);
            return;
        }
    };
    let peripheral_id = peripheral.id();

    loop {
        tokio::select! {
            notification = notifications.next() => match notification {
                Some(notification) => {
                    let _ = tx.send(TransportEvent::ValueChanged {
                        device_id: device_id.clone(),
                        characteristic: notification.uuid,
                        value: notification.value,
                    });
                }
                None => break,
            },
            event = central_events.next() => match event {
                Some(CentralEvent::DeviceDisconnected(id)) if id == peripheral_id => break,
                Some(_) => {}
                None => break,
            },
        }
    }

    tracing::debug!("[{}] Notification stream ended", device_id);
    let _ = tx.send(TransportEvent::Disconnected { device_id });
}

/// Connection to a BLE peripheral.
#[derive(Clone)]
pub struct BleConnection {
    peripheral: Peripheral,
    device_id: String,
    events: broadcast::Sender<TransportEvent>,
}

impl Connection for BleConnection {
    type Characteristic = BleCharacteristic;
    type Service = BleService;

    fn device_id(&self) -> &str {
        &self.device_id
    }

    async fn get_service(&self, uuid: Uuid) -> Result<BleService, SensorError> {
        let service = self
            .peripheral
            .services()
            .into_iter()
            .find(|s| s.uuid == uuid)
            .ok_or(SensorError::ServiceNotFound(uuid))?;

        Ok(BleService {
            peripheral: self.peripheral.clone(),
            service,
        })
    }

    async fn disconnect(&self) -> Result<(), SensorError> {
        self.peripheral
            .disconnect()
            .await
            .map_err(|e| SensorError::BleError(e.to_string()))?;
        let _ = self.events.send(TransportEvent::Disconnected {
            device_id: self.device_id.clone(),
        });
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}

#[derive(Clone)]
pub struct BleService {
    peripheral: Peripheral,
    service: Service,
}

impl GattService for BleService {
    type Characteristic = BleCharacteristic;

    fn uuid(&self) -> Uuid {
        self.service.uuid
    }

    async fn get_characteristic(&self, uuid: Uuid) -> Result<BleCharacteristic, SensorError> {
        let characteristic = self
            .service
            .characteristics
            .iter()
            .find(|c| c.uuid == uuid)
            .cloned()
            .ok_or(SensorError::CharacteristicNotFound(uuid))?;

        Ok(BleCharacteristic {
            peripheral: self.peripheral.clone(),
            characteristic,
        })
    }
}

#[derive(Clone)]
pub struct BleCharacteristic {
    peripheral: Peripheral,
    characteristic: Characteristic,
}

impl GattCharacteristic for BleCharacteristic {
    fn uuid(&self) -> Uuid {
        self.characteristic.uuid
    }

    async fn start_notifications(&self) -> Result<(), SensorError> {
        self.peripheral
            .subscribe(&self.characteristic)
            .await
            .map_err(|e| SensorError::SubscriptionFailed(e.to_string()))
    }

    async fn write_value(&self, value: &[u8]) -> Result<(), SensorError> {
        self.peripheral
            .write(&self.characteristic, value, WriteType::WithResponse)
            .await
            .map_err(|e| SensorError::WriteFailed(e.to_string()))
    }
}
