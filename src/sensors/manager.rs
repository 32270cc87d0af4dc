//! Sensor manager for connecting BLE fitness sensors and streaming decoded data.
//!
//! Connection setup runs through the shared command queue. Each connected
//! sensor gets a notification task that decodes values in arrival order and
//! forwards them as [`SensorEvent`]s.

use crate::sensors::decoder::SensorDecoder;
use crate::sensors::gatt::{self, CharacteristicAccess, CharacteristicProfile};
use crate::sensors::queue::{CommandQueue, OperationKind};
use crate::sensors::transport::{Connection, GattCharacteristic, GattService, Transport, TransportEvent};
use crate::sensors::types::{ConnectionState, SensorError, SensorEvent, SensorKind};
use chrono::Utc;
use crossbeam::channel::{Receiver, Sender};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

type ServiceOf<T> = <<T as Transport>::Connection as Connection>::Service;

/// A sensor with an open connection.
struct ConnectedSensor<T: Transport> {
    kind: SensorKind,
    connection: T::Connection,
    task: JoinHandle<()>,
}

/// Manages sensor connections and data streaming.
pub struct SensorManager<T: Transport> {
    transport: T,
    queue: Arc<CommandQueue>,
    decoder: Arc<SensorDecoder>,
    /// Channel for sending sensor events
    event_tx: Option<Sender<SensorEvent>>,
    /// Connected sensors (device_id -> ConnectedSensor)
    connected: Arc<Mutex<HashMap<String, ConnectedSensor<T>>>>,
    /// Device IDs with a connection attempt under way
    connecting: Arc<StdMutex<HashSet<String>>>,
}

/// Marks a device as connecting until dropped.
struct ConnectingGuard {
    connecting: Arc<StdMutex<HashSet<String>>>,
    device_id: String,
}

impl Drop for ConnectingGuard {
    fn drop(&mut self) {
        self.connecting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.device_id);
    }
}

impl<T: Transport> SensorManager<T> {
    /// Create a manager sharing `queue` with the other users of `transport`.
    pub fn new(transport: T, queue: Arc<CommandQueue>, decoder: SensorDecoder) -> Self {
        Self {
            transport,
            queue,
            decoder: Arc::new(decoder),
            event_tx: None,
            connected: Arc::new(Mutex::new(HashMap::new())),
            connecting: Arc::new(StdMutex::new(HashSet::new())),
        }
    }

    /// Get an event receiver for sensor events.
    ///
    /// Sensors connected before this call keep reporting to the previous channel.
    pub fn event_receiver(&mut self) -> Receiver<SensorEvent> {
        let (tx, rx) = crossbeam::channel::unbounded();
        self.event_tx = Some(tx);
        rx
    }

    /// Send an event if the channel is available.
    fn send_event(&self, event: SensorEvent) {
        send_event(&self.event_tx, event);
    }

    pub fn decoder(&self) -> &SensorDecoder {
        &self.decoder
    }

    pub fn queue(&self) -> &Arc<CommandQueue> {
        &self.queue
    }

    /// Connect to a sensor and start streaming its measurements.
    ///
    /// When `kind` is `None` the sensor is identified by looking up each
    /// profile's service. Returns the kind the sensor was set up as. A second
    /// call while the first is still connecting fails with `ConnectionFailed`.
    pub async fn connect(
        &self,
        device_id: &str,
        kind: Option<SensorKind>,
    ) -> Result<SensorKind, SensorError> {
        let _guard = {
            let connected = self.connected.lock().await;
            if let Some(existing) = connected.get(device_id) {
                tracing::info!("Sensor {} already connected as {}", device_id, existing.kind);
                return Ok(existing.kind);
            }
            self.begin_connecting(device_id)?
        };

        tracing::info!("Connecting to sensor: {}", device_id);
        self.send_event(SensorEvent::ConnectionChanged {
            device_id: device_id.to_string(),
            state: ConnectionState::Connecting,
        });

        match self.establish(device_id, kind).await {
            Ok(kind) => {
                self.send_event(SensorEvent::ConnectionChanged {
                    device_id: device_id.to_string(),
                    state: ConnectionState::Connected,
                });
                tracing::info!("Connected to {} sensor: {}", kind, device_id);
                Ok(kind)
            }
            Err(e) => {
                tracing::error!("Failed to connect {}: {}", device_id, e);
                self.send_event(SensorEvent::ConnectionChanged {
                    device_id: device_id.to_string(),
                    state: ConnectionState::Disconnected,
                });
                self.send_event(SensorEvent::Error(format!("{}: {}", device_id, e)));
                Err(e)
            }
        }
    }

    fn begin_connecting(&self, device_id: &str) -> Result<ConnectingGuard, SensorError> {
        let inserted = self
            .connecting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(device_id.to_string());
        if !inserted {
            return Err(SensorError::ConnectionFailed(format!(
                "{} is already connecting",
                device_id
            )));
        }
        Ok(ConnectingGuard {
            connecting: self.connecting.clone(),
            device_id: device_id.to_string(),
        })
    }

    async fn establish(
        &self,
        device_id: &str,
        kind: Option<SensorKind>,
    ) -> Result<SensorKind, SensorError> {
        let transport = self.transport.clone();
        let id = device_id.to_string();
        let connection = self
            .queue
            .enqueue(
                OperationKind::DeviceSetup,
                format!("GATT connect {}", device_id),
                move || async move { transport.connect(&id).await },
            )
            .await?;

        // Subscribe before enabling notifications so the first values are kept.
        let events = connection.events();

        let (kind, service) = match self.identify(&connection, kind).await {
            Ok(found) => found,
            Err(e) => {
                if let Err(close_err) = connection.disconnect().await {
                    tracing::debug!("Disconnect after failed identification: {}", close_err);
                }
                return Err(e);
            }
        };

        let profile = gatt::profile(kind);
        let mut ready = 0;
        for entry in profile.characteristics.iter().copied() {
            match self.setup_characteristic(&service, device_id, kind, entry).await {
                Ok(()) => ready += 1,
                Err(e) => tracing::warn!(
                    "[{}] Skipping {} characteristic {}: {}",
                    device_id,
                    entry.key,
                    entry.uuid,
                    e
                ),
            }
        }
        if ready == 0 {
            if let Err(close_err) = connection.disconnect().await {
                tracing::debug!("Disconnect after failed setup: {}", close_err);
            }
            return Err(SensorError::SubscriptionFailed(format!(
                "no {} characteristic could be set up on {}",
                kind, device_id
            )));
        }

        // Hold the map while spawning so an early disconnect cannot race the insert.
        let mut connected = self.connected.lock().await;
        let task = tokio::spawn(handle_notifications::<T>(
            events,
            kind,
            device_id.to_string(),
            self.decoder.clone(),
            self.event_tx.clone(),
            self.connected.clone(),
        ));
        connected.insert(
            device_id.to_string(),
            ConnectedSensor {
                kind,
                connection,
                task,
            },
        );

        Ok(kind)
    }

    /// Find the service of the requested kind, or of the first kind the device exposes.
    async fn identify(
        &self,
        connection: &T::Connection,
        requested: Option<SensorKind>,
    ) -> Result<(SensorKind, ServiceOf<T>), SensorError> {
        let device_id = connection.device_id().to_string();
        let candidates = match requested {
            Some(kind) => vec![kind],
            None => SensorKind::ALL.to_vec(),
        };

        for kind in candidates {
            let conn = connection.clone();
            let service_uuid = gatt::profile(kind).service;
            let result = self
                .queue
                .enqueue(
                    OperationKind::DeviceSetup,
                    format!("Get {} service {}", kind, device_id),
                    move || async move { conn.get_service(service_uuid).await },
                )
                .await;
            match result {
                Ok(service) => return Ok((kind, service)),
                Err(e) => tracing::debug!("[{}] No {} service: {}", device_id, kind, e),
            }
        }

        Err(match requested {
            Some(kind) => SensorError::ServiceNotFound(gatt::profile(kind).service),
            None => SensorError::UnsupportedSensor(device_id),
        })
    }

    async fn setup_characteristic(
        &self,
        service: &ServiceOf<T>,
        device_id: &str,
        kind: SensorKind,
        entry: CharacteristicProfile,
    ) -> Result<(), SensorError> {
        let svc = service.clone();
        self.queue
            .enqueue(
                OperationKind::DeviceSetup,
                format!("Setup {} {} for {}", kind, entry.key, device_id),
                move || async move {
                    let characteristic = svc.get_characteristic(entry.uuid).await?;
                    match entry.access {
                        CharacteristicAccess::Notify => characteristic.start_notifications().await,
                        CharacteristicAccess::Write(payload) => {
                            characteristic.write_value(payload).await
                        }
                    }
                },
            )
            .await?;
        tracing::debug!("[{}] {} characteristic ready: {}", device_id, entry.key, entry.uuid);
        Ok(())
    }

    /// Disconnect from a sensor and drop its cadence state.
    pub async fn disconnect(&self, device_id: &str) -> Result<(), SensorError> {
        tracing::info!("Disconnecting from sensor: {}", device_id);

        let sensor = self
            .connected
            .lock()
            .await
            .remove(device_id)
            .ok_or_else(|| SensorError::NotConnected(device_id.to_string()))?;
        sensor.task.abort();

        let connection = sensor.connection;
        let result = self
            .queue
            .enqueue(
                OperationKind::Normal,
                format!("Disconnect {}", device_id),
                move || async move { connection.disconnect().await },
            )
            .await;
        if let Err(e) = result {
            tracing::warn!("[{}] Disconnect failed: {}", device_id, e);
        }

        self.decoder.forget(device_id);
        self.send_event(SensorEvent::ConnectionChanged {
            device_id: device_id.to_string(),
            state: ConnectionState::Disconnected,
        });

        Ok(())
    }

    /// Drop pending queue work, then disconnect every sensor.
    pub async fn disconnect_all(&self) {
        let dropped = self.queue.clear();
        if dropped > 0 {
            tracing::debug!("Dropped {} pending operations before disconnecting", dropped);
        }

        let device_ids: Vec<String> = self.connected.lock().await.keys().cloned().collect();
        for device_id in device_ids {
            if let Err(e) = self.disconnect(&device_id).await {
                tracing::warn!("Failed to disconnect {}: {}", device_id, e);
            }
        }
    }

    /// Reset cadence state for one sensor, or for all when `device_id` is `None`.
    pub fn reset_cadence(&self, device_id: Option<&str>) {
        match device_id {
            Some(id) => self.decoder.cadence().reset(id),
            None => self.decoder.cadence().reset_all(),
        }
    }

    pub async fn is_connected(&self, device_id: &str) -> bool {
        self.connected.lock().await.contains_key(device_id)
    }

    /// Connected sensors and their kinds, sorted by device ID.
    pub async fn connected_sensors(&self) -> Vec<(String, SensorKind)> {
        let mut sensors: Vec<(String, SensorKind)> = self
            .connected
            .lock()
            .await
            .iter()
            .map(|(id, sensor)| (id.clone(), sensor.kind))
            .collect();
        sensors.sort();
        sensors
    }
}

fn send_event(event_tx: &Option<Sender<SensorEvent>>, event: SensorEvent) {
    if let Some(tx) = event_tx {
        let _ = tx.send(event);
    }
}

/// Decode notifications from one sensor until it disconnects.
async fn handle_notifications<T: Transport>(
    mut events: broadcast::Receiver<TransportEvent>,
    kind: SensorKind,
    device_id: String,
    decoder: Arc<SensorDecoder>,
    event_tx: Option<Sender<SensorEvent>>,
    connected: Arc<Mutex<HashMap<String, ConnectedSensor<T>>>>,
) {
    let profile = gatt::profile(kind);

    loop {
        match events.recv().await {
            Ok(TransportEvent::ValueChanged {
                characteristic,
                value,
                ..
            }) => {
                if value.is_empty() {
                    tracing::trace!("[{}] Empty notification skipped", device_id);
                    continue;
                }
                let Some(key) = profile.key_for(characteristic) else {
                    tracing::trace!("[{}] Unexpected characteristic {}", device_id, characteristic);
                    continue;
                };

                let record = decoder.decode(kind, key, &value, Some(&device_id));
                send_event(
                    &event_tx,
                    SensorEvent::Measurement {
                        device_id: device_id.clone(),
                        kind,
                        characteristic: key,
                        record,
                        received_at: Utc::now(),
                    },
                );
            }
            Ok(TransportEvent::Disconnected { .. }) => break,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!("[{}] {} notifications dropped", device_id, skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }

    tracing::info!("Sensor disconnected: {}", device_id);
    connected.lock().await.remove(&device_id);
    decoder.forget(&device_id);
    send_event(
        &event_tx,
        SensorEvent::ConnectionChanged {
            device_id,
            state: ConnectionState::Disconnected,
        },
    );
}
