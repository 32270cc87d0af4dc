//! FTMS smart trainer control.
//!
//! Connection setup, the control handshake, command writes and response
//! correlation for a single trainer. Every radio operation goes through the
//! shared [`CommandQueue`]; status changes are published on a broadcast
//! channel.
//!
//! Lifecycle:
//! `Disconnected -> Connecting -> Connected (uninitialized) -> Connected (handshaked) -> Disconnected`.
//! There is no automatic reconnect.

use crate::sensors::ftms::{parse_indoor_bike_power, ControlResponse, FtmsOpCode, TrainerCommand};
use crate::sensors::gatt::{FTMS_CONTROL_POINT_UUID, FTMS_SERVICE_UUID, INDOOR_BIKE_DATA_UUID};
use crate::sensors::measurement::hex_string;
use crate::sensors::queue::{CommandQueue, OperationKind};
use crate::sensors::transport::{Connection, GattCharacteristic, GattService, Transport, TransportEvent};
use crate::sensors::types::{ConnectionState, SensorError};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;

type ControlPoint<T> = <<T as Transport>::Connection as Connection>::Characteristic;

const UPDATE_CHANNEL_CAPACITY: usize = 64;

/// Limits checked before a command is queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerCapabilities {
    pub min_power: u16,
    pub max_power: u16,
    pub supports_slope: bool,
}

impl Default for TrainerCapabilities {
    fn default() -> Self {
        Self {
            min_power: 0,
            max_power: 2000,
            supports_slope: true,
        }
    }
}

/// Trainer operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TrainerMode {
    /// Free riding, no target
    #[default]
    Manual,
    /// Fixed target power
    Erg,
    /// Fixed resistance level
    Resistance,
    /// Simulated gradient
    Slope,
}

impl std::fmt::Display for TrainerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrainerMode::Manual => write!(f, "Manual"),
            TrainerMode::Erg => write!(f, "ERG"),
            TrainerMode::Resistance => write!(f, "Resistance"),
            TrainerMode::Slope => write!(f, "Slope"),
        }
    }
}

/// Where a trainer is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainerPhase {
    Disconnected,
    Connecting,
    Connected { handshaked: bool },
}

/// Trainer status visible to consumers.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct TrainerStatus {
    /// Last power reported by Indoor Bike Data
    pub current_power: Option<u16>,
    /// ERG target
    pub target_power: Option<u16>,
    pub mode: TrainerMode,
    /// Handshake completed
    pub is_calibrated: bool,
    pub connection_state: ConnectionState,
    pub last_response: String,
}

impl TrainerStatus {
    /// Shallow merge: every field set in `patch` replaces the current value.
    pub fn apply(&mut self, patch: TrainerStatusPatch) {
        if let Some(power) = patch.current_power {
            self.current_power = power;
        }
        if let Some(power) = patch.target_power {
            self.target_power = power;
        }
        if let Some(mode) = patch.mode {
            self.mode = mode;
        }
        if let Some(calibrated) = patch.is_calibrated {
            self.is_calibrated = calibrated;
        }
        if let Some(state) = patch.connection_state {
            self.connection_state = state;
        }
        if let Some(response) = patch.last_response {
            self.last_response = response;
        }
    }

    pub fn phase(&self) -> TrainerPhase {
        match self.connection_state {
            ConnectionState::Disconnected => TrainerPhase::Disconnected,
            ConnectionState::Connecting => TrainerPhase::Connecting,
            ConnectionState::Connected => TrainerPhase::Connected {
                handshaked: self.is_calibrated,
            },
        }
    }
}

/// Partial status update. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainerStatusPatch {
    pub current_power: Option<Option<u16>>,
    pub target_power: Option<Option<u16>>,
    pub mode: Option<TrainerMode>,
    pub is_calibrated: Option<bool>,
    pub connection_state: Option<ConnectionState>,
    pub last_response: Option<String>,
}

impl TrainerStatusPatch {
    pub fn response(message: impl Into<String>) -> Self {
        Self {
            last_response: Some(message.into()),
            ..Self::default()
        }
    }
}

/// Target values, tracked once as requested and once as last confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TargetValues {
    pub power: Option<u16>,
    pub resistance: Option<u8>,
    pub slope: Option<f32>,
    pub mode: TrainerMode,
}

/// Update published to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum TrainerUpdate {
    /// Status after a change
    Status(TrainerStatus),
    /// Indoor Bike Data power sample
    Telemetry { power: u16 },
    /// Trainer disconnected
    Disconnected,
}

struct TrainerState<T: Transport> {
    device_id: Option<String>,
    connection: Option<T::Connection>,
    control: Option<ControlPoint<T>>,
    listener: Option<JoinHandle<()>>,
    status: TrainerStatus,
    requested: TargetValues,
    last_successful: TargetValues,
    /// Target commands written and not yet answered, oldest first
    in_flight: VecDeque<TrainerCommand>,
}

impl<T: Transport> Default for TrainerState<T> {
    fn default() -> Self {
        Self {
            device_id: None,
            connection: None,
            control: None,
            listener: None,
            status: TrainerStatus::default(),
            requested: TargetValues::default(),
            last_successful: TargetValues::default(),
            in_flight: VecDeque::new(),
        }
    }
}

impl<T: Transport> TrainerState<T> {
    fn label(&self) -> &str {
        self.device_id.as_deref().unwrap_or("trainer")
    }

    /// Record a command as requested and reflect it in the status.
    fn request(&mut self, command: TrainerCommand) {
        let requested = &mut self.requested;
        let mut patch = TrainerStatusPatch::default();
        match command {
            TrainerCommand::SetPower(watts) => {
                requested.power = Some(watts);
                requested.mode = TrainerMode::Erg;
                patch.target_power = Some(Some(watts));
            }
            TrainerCommand::SetResistance(level) => {
                requested.resistance = Some(level);
                requested.mode = TrainerMode::Resistance;
            }
            TrainerCommand::SetSlope(percent) => {
                requested.slope = Some(percent);
                requested.mode = TrainerMode::Slope;
            }
            TrainerCommand::Stop => {
                requested.power = None;
                requested.mode = TrainerMode::Manual;
                patch.target_power = Some(None);
            }
            TrainerCommand::RequestControl | TrainerCommand::StartTraining => return,
        }
        patch.mode = Some(requested.mode);
        self.status.apply(patch);
    }

    /// A target command is about to reach the control point.
    fn record_in_flight(&mut self, command: TrainerCommand) {
        self.in_flight.push_back(command);
    }

    /// Oldest unanswered command with op-code `op`.
    fn take_in_flight(&mut self, op: FtmsOpCode) -> Option<TrainerCommand> {
        let index = self.in_flight.iter().position(|c| c.op_code() == op)?;
        self.in_flight.remove(index)
    }

    /// Drop the newest in-flight copy of `command` after its write failed.
    fn discard_in_flight(&mut self, command: TrainerCommand) {
        if let Some(index) = self.in_flight.iter().rposition(|c| *c == command) {
            self.in_flight.remove(index);
        }
    }

    /// The trainer accepted `command`: the value it carried becomes the last successful one.
    fn commit(&mut self, command: TrainerCommand) {
        let last = &mut self.last_successful;
        match command {
            TrainerCommand::SetPower(watts) => {
                last.power = Some(watts);
                last.mode = TrainerMode::Erg;
            }
            TrainerCommand::SetResistance(level) => {
                last.resistance = Some(level);
                last.mode = TrainerMode::Resistance;
            }
            TrainerCommand::SetSlope(percent) => {
                last.slope = Some(percent);
                last.mode = TrainerMode::Slope;
            }
            TrainerCommand::Stop => {
                last.power = None;
                last.mode = TrainerMode::Manual;
            }
            TrainerCommand::RequestControl | TrainerCommand::StartTraining => {}
        }
    }

    /// The trainer rejected `op`: restore the last successful value and mode.
    fn revert(&mut self, op: FtmsOpCode) {
        let (requested, last) = (&mut self.requested, &self.last_successful);
        let mut patch = TrainerStatusPatch::default();
        match op {
            FtmsOpCode::SetPower | FtmsOpCode::Stop => {
                requested.power = last.power;
                patch.target_power = Some(last.power);
            }
            FtmsOpCode::SetResistance => requested.resistance = last.resistance,
            FtmsOpCode::SetSlope => requested.slope = last.slope,
            FtmsOpCode::RequestControl | FtmsOpCode::StartTraining => return,
        }
        requested.mode = last.mode;
        patch.mode = Some(last.mode);
        tracing::info!(
            "[{}] Reverting {} to last successful values ({:?})",
            self.label(),
            op,
            last
        );
        self.status.apply(patch);
    }

    /// Forget the connection and every tracked value.
    fn clear(&mut self, last_response: &str) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        self.connection = None;
        self.control = None;
        self.in_flight.clear();
        self.requested = TargetValues::default();
        self.last_successful = TargetValues::default();
        self.status = TrainerStatus {
            last_response: last_response.to_string(),
            ..TrainerStatus::default()
        };
    }
}

struct Shared<T: Transport> {
    state: RwLock<TrainerState<T>>,
    updates: broadcast::Sender<TrainerUpdate>,
}

impl<T: Transport> Shared<T> {
    fn publish(&self, update: TrainerUpdate) {
        // Nobody subscribed is fine.
        let _ = self.updates.send(update);
    }

    async fn patch(&self, patch: TrainerStatusPatch) {
        let status = {
            let mut state = self.state.write().await;
            state.status.apply(patch);
            state.status.clone()
        };
        self.publish(TrainerUpdate::Status(status));
    }

    async fn handle_control_response(&self, data: &[u8]) {
        let mut state = self.state.write().await;
        let id = state.label().to_string();
        tracing::debug!("[{}] Control response: {}", id, hex_string(data));

        let Some(response) = ControlResponse::parse(data) else {
            tracing::warn!("[{}] Control response too short: {} bytes", id, data.len());
            return;
        };
        if !response.is_response() {
            tracing::warn!(
                "[{}] Ignoring control point frame with code 0x{:02X}",
                id,
                response.response_code
            );
            return;
        }

        match response.op_code() {
            Some(op) if response.result.is_success() => match state.take_in_flight(op) {
                Some(command) => state.commit(command),
                None => tracing::debug!("[{}] {} acknowledged with nothing pending", id, op),
            },
            Some(op) => {
                tracing::warn!("[{}] {} rejected: {}", id, op, response.result);
                state.take_in_flight(op);
                state.revert(op);
            }
            None => tracing::warn!(
                "[{}] Response for unknown op-code 0x{:02X}",
                id,
                response.request_op_code
            ),
        }

        state
            .status
            .apply(TrainerStatusPatch::response(response.status_message()));
        let status = state.status.clone();
        drop(state);
        self.publish(TrainerUpdate::Status(status));
    }

    async fn handle_indoor_bike_data(&self, data: &[u8]) {
        let Some(power) = parse_indoor_bike_power(data) else {
            tracing::debug!("Indoor Bike Data too short: {} bytes", data.len());
            return;
        };
        self.publish(TrainerUpdate::Telemetry { power });
        self.patch(TrainerStatusPatch {
            current_power: Some(Some(power)),
            ..TrainerStatusPatch::default()
        })
        .await;
    }

    async fn handle_disconnection(&self, last_response: &str) {
        let status = {
            let mut state = self.state.write().await;
            tracing::info!("[{}] Trainer disconnected", state.label());
            state.clear(last_response);
            state.status.clone()
        };
        self.publish(TrainerUpdate::Status(status));
        self.publish(TrainerUpdate::Disconnected);
    }

    async fn listen(self: Arc<Self>, mut events: broadcast::Receiver<TransportEvent>) {
        loop {
            match events.recv().await {
                Ok(TransportEvent::ValueChanged {
                    characteristic,
                    value,
                    ..
                }) => {
                    if characteristic == FTMS_CONTROL_POINT_UUID {
                        self.handle_control_response(&value).await;
                    } else if characteristic == INDOOR_BIKE_DATA_UUID {
                        self.handle_indoor_bike_data(&value).await;
                    }
                }
                Ok(TransportEvent::Disconnected { device_id }) => {
                    tracing::warn!("[{}] Trainer disconnected unexpectedly", device_id);
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Trainer listener lagged, {} events dropped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }

        // Detach our own handle so clear() does not abort the running task.
        self.state.write().await.listener.take();
        self.handle_disconnection("Disconnected").await;
    }
}

/// Controls one FTMS smart trainer.
pub struct TrainerController<T: Transport> {
    transport: T,
    queue: Arc<CommandQueue>,
    capabilities: TrainerCapabilities,
    shared: Arc<Shared<T>>,
}

impl<T: Transport> TrainerController<T> {
    /// Create a controller sharing `queue` with the rest of the transport's users.
    pub fn new(transport: T, queue: Arc<CommandQueue>, capabilities: TrainerCapabilities) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            transport,
            queue,
            capabilities,
            shared: Arc::new(Shared {
                state: RwLock::new(TrainerState::default()),
                updates,
            }),
        }
    }

    pub fn capabilities(&self) -> &TrainerCapabilities {
        &self.capabilities
    }

    /// Subscribe to status, telemetry and disconnection updates.
    pub fn subscribe(&self) -> broadcast::Receiver<TrainerUpdate> {
        self.shared.updates.subscribe()
    }

    pub async fn status(&self) -> TrainerStatus {
        self.shared.state.read().await.status.clone()
    }

    pub async fn phase(&self) -> TrainerPhase {
        self.shared.state.read().await.status.phase()
    }

    pub async fn device_id(&self) -> Option<String> {
        self.shared.state.read().await.device_id.clone()
    }

    /// Targets as last requested.
    pub async fn requested(&self) -> TargetValues {
        self.shared.state.read().await.requested
    }

    /// Targets as last confirmed by the trainer.
    pub async fn last_successful(&self) -> TargetValues {
        self.shared.state.read().await.last_successful
    }

    /// Connect, set up the control point and Indoor Bike Data, then run the
    /// control handshake.
    ///
    /// A failed handshake leaves the trainer connected but not calibrated.
    pub async fn connect(&self, device_id: &str) -> Result<(), SensorError> {
        {
            let mut state = self.shared.state.write().await;
            if state.status.connection_state != ConnectionState::Disconnected {
                return Err(SensorError::ConnectionFailed(format!(
                    "{} is already {}",
                    state.label(),
                    state.status.connection_state
                )));
            }
            state.device_id = Some(device_id.to_string());
        }
        tracing::info!("[{}] Connecting to trainer", device_id);
        self.shared
            .patch(TrainerStatusPatch {
                connection_state: Some(ConnectionState::Connecting),
                last_response: Some("Connecting".to_string()),
                ..TrainerStatusPatch::default()
            })
            .await;

        let (connection, control, events) = match self.establish(device_id).await {
            Ok(established) => established,
            Err(e) => {
                tracing::error!("[{}] Trainer connection failed: {}", device_id, e);
                let status = {
                    let mut state = self.shared.state.write().await;
                    state.clear(&format!("Connection failed: {}", e));
                    state.status.clone()
                };
                self.shared.publish(TrainerUpdate::Status(status));
                return Err(e);
            }
        };

        {
            let mut state = self.shared.state.write().await;
            state.connection = Some(connection);
            state.control = Some(control);
            state.listener = Some(tokio::spawn(self.shared.clone().listen(events)));
        }
        self.shared
            .patch(TrainerStatusPatch {
                connection_state: Some(ConnectionState::Connected),
                last_response: Some("Connected".to_string()),
                ..TrainerStatusPatch::default()
            })
            .await;

        self.perform_handshake().await;
        tracing::info!("[{}] Trainer connected", device_id);
        Ok(())
    }

    async fn establish(
        &self,
        device_id: &str,
    ) -> Result<
        (
            T::Connection,
            ControlPoint<T>,
            broadcast::Receiver<TransportEvent>,
        ),
        SensorError,
    > {
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
        tracing::info!("[{}] GATT server connected", device_id);

        // Subscribe before enabling notifications so no early response is missed.
        let events = connection.events();

        let setup = self.setup_characteristics(&connection).await;
        match setup {
            Ok(control) => Ok((connection, control, events)),
            Err(e) => {
                if let Err(close_err) = connection.disconnect().await {
                    tracing::debug!("[{}] Disconnect after failed setup: {}", device_id, close_err);
                }
                Err(e)
            }
        }
    }

    async fn setup_characteristics(
        &self,
        connection: &T::Connection,
    ) -> Result<ControlPoint<T>, SensorError> {
        let device_id = connection.device_id().to_string();

        let conn = connection.clone();
        let service = self
            .queue
            .enqueue(
                OperationKind::DeviceSetup,
                format!("Get FTMS service {}", device_id),
                move || async move { conn.get_service(FTMS_SERVICE_UUID).await },
            )
            .await?;

        let svc = service.clone();
        let control = self
            .queue
            .enqueue(
                OperationKind::DeviceSetup,
                format!("Setup control point {}", device_id),
                move || async move {
                    let characteristic = svc.get_characteristic(FTMS_CONTROL_POINT_UUID).await?;
                    characteristic.start_notifications().await?;
                    Ok(characteristic)
                },
            )
            .await?;
        tracing::info!("[{}] Control point notifications enabled", device_id);

        let svc = service.clone();
        let bike_data = self
            .queue
            .enqueue(
                OperationKind::DeviceSetup,
                format!("Setup Indoor Bike Data {}", device_id),
                move || async move {
                    let characteristic = svc.get_characteristic(INDOOR_BIKE_DATA_UUID).await?;
                    characteristic.start_notifications().await
                },
            )
            .await;
        match bike_data {
            Ok(()) => tracing::info!("[{}] Indoor Bike Data notifications enabled", device_id),
            Err(e) => tracing::warn!("[{}] Indoor Bike Data not available: {}", device_id, e),
        }

        Ok(control)
    }

    async fn perform_handshake(&self) {
        let result = self.handshake_steps().await;
        let patch = match &result {
            Ok(()) => TrainerStatusPatch {
                is_calibrated: Some(true),
                last_response: Some("Handshake completed".to_string()),
                ..TrainerStatusPatch::default()
            },
            Err(e) => TrainerStatusPatch {
                is_calibrated: Some(false),
                last_response: Some(format!("Handshake failed: {}", e)),
                ..TrainerStatusPatch::default()
            },
        };
        match &result {
            Ok(()) => tracing::info!("Trainer handshake completed"),
            Err(e) => tracing::error!("Trainer handshake failed: {}", e),
        }
        self.shared.patch(patch).await;
    }

    async fn handshake_steps(&self) -> Result<(), SensorError> {
        self.write_command(TrainerCommand::RequestControl, OperationKind::DeviceSetup)
            .await?;
        self.write_command(TrainerCommand::StartTraining, OperationKind::DeviceSetup)
            .await
    }

    /// Run the control handshake again on a connected trainer.
    pub async fn retry_handshake(&self) -> Result<(), SensorError> {
        self.ensure_connected().await?;
        self.perform_handshake().await;
        if self.shared.state.read().await.status.is_calibrated {
            Ok(())
        } else {
            Err(SensorError::WriteFailed("handshake failed".to_string()))
        }
    }

    /// Validate, record and queue a command.
    ///
    /// The requested value is reflected in the status immediately and reverted
    /// if the write fails or the trainer rejects it.
    pub async fn send_command(&self, command: TrainerCommand) -> Result<(), SensorError> {
        self.validate(command)?;
        self.ensure_connected().await?;

        let status = {
            let mut state = self.shared.state.write().await;
            state.request(command);
            state.status.clone()
        };
        self.shared.publish(TrainerUpdate::Status(status));

        if let Err(e) = self.write_command(command, OperationKind::Normal).await {
            tracing::error!("Failed to send trainer command {}: {}", command, e);
            let status = {
                let mut state = self.shared.state.write().await;
                state.revert(command.op_code());
                state
                    .status
                    .apply(TrainerStatusPatch::response(format!("Command failed: {}", e)));
                state.status.clone()
            };
            self.shared.publish(TrainerUpdate::Status(status));
            return Err(e);
        }
        Ok(())
    }

    /// ERG mode target.
    pub async fn set_power(&self, watts: u16) -> Result<(), SensorError> {
        self.send_command(TrainerCommand::SetPower(watts)).await
    }

    pub async fn set_resistance(&self, level: u8) -> Result<(), SensorError> {
        self.send_command(TrainerCommand::SetResistance(level)).await
    }

    /// Simulated gradient in percent.
    pub async fn set_slope(&self, percent: f32) -> Result<(), SensorError> {
        self.send_command(TrainerCommand::SetSlope(percent)).await
    }

    pub async fn stop(&self) -> Result<(), SensorError> {
        self.send_command(TrainerCommand::Stop).await
    }

    /// Close the connection and clear tracked state.
    pub async fn disconnect(&self) -> Result<(), SensorError> {
        let (connection, listener) = {
            let mut state = self.shared.state.write().await;
            (state.connection.take(), state.listener.take())
        };
        if let Some(listener) = listener {
            listener.abort();
        }

        if let Some(connection) = connection {
            tracing::info!("[{}] Disconnecting trainer", connection.device_id());
            let description = format!("Disconnect trainer {}", connection.device_id());
            let result = self
                .queue
                .enqueue(OperationKind::Normal, description, move || async move {
                    connection.disconnect().await
                })
                .await;
            if let Err(e) = result {
                tracing::warn!("Trainer disconnect failed: {}", e);
            }
        }

        self.shared.handle_disconnection("Disconnected").await;
        Ok(())
    }

    fn validate(&self, command: TrainerCommand) -> Result<(), SensorError> {
        let caps = &self.capabilities;
        match command {
            TrainerCommand::SetPower(watts) if watts < caps.min_power || watts > caps.max_power => {
                return Err(SensorError::InvalidCommand(format!(
                    "target power {}W outside {}-{}W",
                    watts, caps.min_power, caps.max_power
                )));
            }
            TrainerCommand::SetSlope(_) if !caps.supports_slope => {
                return Err(SensorError::InvalidCommand(
                    "slope control not supported".to_string(),
                ));
            }
            _ => {}
        }
        command.encode().map(|_| ())
    }

    async fn ensure_connected(&self) -> Result<(), SensorError> {
        let state = self.shared.state.read().await;
        match (&state.control, state.status.connection_state) {
            (Some(_), ConnectionState::Connected) => Ok(()),
            _ => Err(SensorError::NotConnected(state.label().to_string())),
        }
    }

    async fn write_command(
        &self,
        command: TrainerCommand,
        kind: OperationKind,
    ) -> Result<(), SensorError> {
        let payload = command.encode()?;
        let (control, device_id) = {
            let state = self.shared.state.read().await;
            let control = state
                .control
                .clone()
                .ok_or_else(|| SensorError::NotConnected(state.label().to_string()))?;
            (control, state.label().to_string())
        };

        tracing::debug!(
            "[{}] Sending FTMS command ({}): {}",
            device_id,
            command,
            hex_string(&payload)
        );
        let shared = self.shared.clone();
        self.queue
            .enqueue(kind, format!("Send FTMS command {}", command), move || async move {
                // Recorded as the write runs; responses pair with it by op-code.
                let tracked = sets_target(command);
                if tracked {
                    shared.state.write().await.record_in_flight(command);
                }
                let result = control.write_value(&payload).await;
                if tracked && result.is_err() {
                    shared.state.write().await.discard_in_flight(command);
                }
                result
            })
            .await
            .map_err(SensorError::from)
    }
}

fn sets_target(command: TrainerCommand) -> bool {
    !matches!(
        command,
        TrainerCommand::RequestControl | TrainerCommand::StartTraining
    )
}

impl<T: Transport> Drop for TrainerController<T> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.shared.state.try_write() {
            if let Some(listener) = state.listener.take() {
                listener.abort();
            }
        }
    }
}
