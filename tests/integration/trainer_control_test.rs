//! Integration tests for FTMS trainer control over the loopback transport.

use ridelink::sensors::ftms::{build_indoor_bike_data, ResultCode};
use ridelink::sensors::gatt::{FTMS_CONTROL_POINT_UUID, INDOOR_BIKE_DATA_UUID};
use ridelink::sensors::loopback::{LoopbackDevice, LoopbackTransport};
use ridelink::sensors::queue::CommandQueue;
use ridelink::sensors::trainer::{
    TargetValues, TrainerCapabilities, TrainerController, TrainerMode, TrainerPhase,
    TrainerUpdate,
};
use ridelink::sensors::types::{ConnectionState, SensorError, SensorKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

type Trainer = TrainerController<LoopbackTransport>;

fn new_trainer(capabilities: TrainerCapabilities) -> (LoopbackDevice, Trainer) {
    let transport = LoopbackTransport::new();
    let device = transport.add_device("kickr", "KICKR CORE", &[SensorKind::SmartTrainer]);
    let queue = Arc::new(CommandQueue::with_defaults());
    let trainer = TrainerController::new(transport, queue, capabilities);
    (device, trainer)
}

async fn connected_trainer() -> (LoopbackDevice, Trainer) {
    let (device, trainer) = new_trainer(TrainerCapabilities::default());
    trainer.connect("kickr").await.unwrap();
    settle().await;
    (device, trainer)
}

/// Let the response listener drain pending notifications.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

fn drain(updates: &mut broadcast::Receiver<TrainerUpdate>) -> Vec<TrainerUpdate> {
    let mut received = Vec::new();
    while let Ok(update) = updates.try_recv() {
        received.push(update);
    }
    received
}

#[tokio::test(start_paused = true)]
async fn test_connect_runs_handshake() {
    let (device, trainer) = connected_trainer().await;

    assert_eq!(
        device.writes_to(FTMS_CONTROL_POINT_UUID),
        vec![vec![0x01], vec![0x07]]
    );
    assert!(device.is_subscribed(FTMS_CONTROL_POINT_UUID));
    assert!(device.is_subscribed(INDOOR_BIKE_DATA_UUID));

    let status = trainer.status().await;
    assert_eq!(status.connection_state, ConnectionState::Connected);
    assert!(status.is_calibrated);
    assert_eq!(status.mode, TrainerMode::Manual);
    assert_eq!(trainer.phase().await, TrainerPhase::Connected { handshaked: true });
    assert_eq!(trainer.device_id().await.as_deref(), Some("kickr"));
}

#[tokio::test(start_paused = true)]
async fn test_set_power_writes_payload_and_commits() {
    let (device, trainer) = connected_trainer().await;

    trainer.set_power(200).await.unwrap();
    assert_eq!(
        device.writes_to(FTMS_CONTROL_POINT_UUID).last(),
        Some(&vec![0x05, 0xC8, 0x00])
    );

    settle().await;
    let status = trainer.status().await;
    assert_eq!(status.last_response, "Command successful");
    assert_eq!(status.target_power, Some(200));
    assert_eq!(status.mode, TrainerMode::Erg);
    assert_eq!(trainer.last_successful().await.power, Some(200));
    assert_eq!(trainer.last_successful().await.mode, TrainerMode::Erg);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_power_reverts_to_last_success() {
    let (device, trainer) = connected_trainer().await;

    trainer.set_power(150).await.unwrap();
    settle().await;

    device.set_control_result(ResultCode::OpCodeNotSupported);
    trainer.set_power(200).await.unwrap();
    settle().await;

    let status = trainer.status().await;
    assert!(status.last_response.starts_with("Command failed"));
    assert!(status.last_response.contains("0x02"));
    assert_eq!(status.target_power, Some(150));
    assert_eq!(trainer.requested().await.power, Some(150));
    assert_eq!(trainer.last_successful().await.power, Some(150));
}

#[tokio::test(start_paused = true)]
async fn test_ack_while_next_command_queued() {
    let (device, trainer) = connected_trainer().await;
    device.set_auto_respond(false);

    trainer.set_power(150).await.unwrap();

    let trainer_side = trainer.set_power(200);
    let responder = async {
        // 200 W is still waiting for its queue slot.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(device.writes_to(FTMS_CONTROL_POINT_UUID).len(), 3);
        device.notify(FTMS_CONTROL_POINT_UUID, &[0x80, 0x05, 0x01]);
        settle().await;
        assert_eq!(trainer.last_successful().await.power, Some(150));
        assert_eq!(trainer.requested().await.power, Some(200));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(
            device.writes_to(FTMS_CONTROL_POINT_UUID).last(),
            Some(&vec![0x05, 0xC8, 0x00])
        );
        device.notify(FTMS_CONTROL_POINT_UUID, &[0x80, 0x05, 0x02]);
    };
    let (result, ()) = tokio::join!(trainer_side, responder);
    result.unwrap();
    settle().await;

    let status = trainer.status().await;
    assert!(status.last_response.starts_with("Command failed"));
    assert_eq!(status.target_power, Some(150));
    assert_eq!(trainer.requested().await.power, Some(150));
    assert_eq!(trainer.last_successful().await.power, Some(150));
}

#[tokio::test(start_paused = true)]
async fn test_acks_pair_with_commands_in_write_order() {
    let (device, trainer) = connected_trainer().await;
    device.set_auto_respond(false);

    trainer.set_power(120).await.unwrap();
    trainer.set_slope(3.0).await.unwrap();
    trainer.set_power(240).await.unwrap();

    // Answers arrive after all three writes, oldest first.
    device.notify(FTMS_CONTROL_POINT_UUID, &[0x80, 0x05, 0x01]);
    device.notify(FTMS_CONTROL_POINT_UUID, &[0x80, 0x06, 0x01]);
    settle().await;

    let confirmed = trainer.last_successful().await;
    assert_eq!(confirmed.power, Some(120));
    assert_eq!(confirmed.slope, Some(3.0));
    assert_eq!(confirmed.mode, TrainerMode::Slope);

    device.notify(FTMS_CONTROL_POINT_UUID, &[0x80, 0x05, 0x04]);
    settle().await;
    assert_eq!(trainer.requested().await.power, Some(120));
    assert_eq!(trainer.status().await.target_power, Some(120));
    assert_eq!(trainer.status().await.mode, TrainerMode::Slope);
}

#[tokio::test(start_paused = true)]
async fn test_rejection_without_history_returns_to_manual() {
    let (device, trainer) = connected_trainer().await;

    device.set_control_result(ResultCode::ControlNotPermitted);
    trainer.set_slope(4.5).await.unwrap();
    settle().await;

    let status = trainer.status().await;
    assert_eq!(status.mode, TrainerMode::Manual);
    assert_eq!(trainer.requested().await, TargetValues::default());
}

#[tokio::test(start_paused = true)]
async fn test_write_failure_reverts() {
    let (device, trainer) = connected_trainer().await;
    trainer.set_resistance(30).await.unwrap();
    settle().await;

    device.set_fail_writes(true);
    let result = trainer.set_resistance(80).await;
    assert!(matches!(result, Err(SensorError::WriteFailed(_))));

    let status = trainer.status().await;
    assert!(status.last_response.starts_with("Command failed"));
    assert_eq!(status.mode, TrainerMode::Resistance);
    assert_eq!(trainer.requested().await.resistance, Some(30));
}

#[tokio::test(start_paused = true)]
async fn test_capabilities_reject_before_queueing() {
    let (device, trainer) = new_trainer(TrainerCapabilities {
        min_power: 50,
        max_power: 1000,
        supports_slope: false,
    });
    trainer.connect("kickr").await.unwrap();
    let writes_before = device.writes().len();

    assert!(matches!(
        trainer.set_power(1200).await,
        Err(SensorError::InvalidCommand(_))
    ));
    assert!(matches!(
        trainer.set_power(20).await,
        Err(SensorError::InvalidCommand(_))
    ));
    assert!(matches!(
        trainer.set_slope(2.0).await,
        Err(SensorError::InvalidCommand(_))
    ));
    assert_eq!(device.writes().len(), writes_before);
    assert_eq!(trainer.requested().await, TargetValues::default());
}

#[tokio::test(start_paused = true)]
async fn test_commands_require_connection() {
    let (_device, trainer) = new_trainer(TrainerCapabilities::default());
    assert!(matches!(
        trainer.set_power(200).await,
        Err(SensorError::NotConnected(_))
    ));
    assert!(matches!(
        trainer.retry_handshake().await,
        Err(SensorError::NotConnected(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_failed_handshake_stays_connected() {
    let (device, trainer) = new_trainer(TrainerCapabilities::default());
    device.set_fail_writes(true);

    trainer.connect("kickr").await.unwrap();
    let status = trainer.status().await;
    assert_eq!(status.connection_state, ConnectionState::Connected);
    assert!(!status.is_calibrated);
    assert!(status.last_response.starts_with("Handshake failed"));
    assert_eq!(trainer.phase().await, TrainerPhase::Connected { handshaked: false });

    device.set_fail_writes(false);
    trainer.retry_handshake().await.unwrap();
    assert!(trainer.status().await.is_calibrated);
}

#[tokio::test(start_paused = true)]
async fn test_indoor_bike_data_updates_current_power() {
    let (device, trainer) = connected_trainer().await;
    let mut updates = trainer.subscribe();

    assert!(device.notify(INDOOR_BIKE_DATA_UUID, &build_indoor_bike_data(0x0044, 237)));
    settle().await;

    let status = trainer.status().await;
    assert_eq!(status.current_power, Some(237));
    assert_eq!(status.target_power, None);
    assert!(drain(&mut updates).contains(&TrainerUpdate::Telemetry { power: 237 }));
}

#[tokio::test(start_paused = true)]
async fn test_non_response_frames_ignored() {
    let (device, trainer) = connected_trainer().await;
    let before = trainer.status().await;

    device.notify(FTMS_CONTROL_POINT_UUID, &[0x05, 0x05, 0x01]);
    device.notify(FTMS_CONTROL_POINT_UUID, &[0x80, 0x05]);
    settle().await;

    assert_eq!(trainer.status().await, before);
}

#[tokio::test(start_paused = true)]
async fn test_link_loss_clears_state() {
    let (device, trainer) = connected_trainer().await;
    trainer.set_power(180).await.unwrap();
    settle().await;
    let mut updates = trainer.subscribe();

    device.simulate_disconnect();
    settle().await;

    let status = trainer.status().await;
    assert_eq!(status.connection_state, ConnectionState::Disconnected);
    assert_eq!(status.target_power, None);
    assert!(!status.is_calibrated);
    assert_eq!(trainer.requested().await, TargetValues::default());
    assert!(drain(&mut updates).contains(&TrainerUpdate::Disconnected));

    assert!(matches!(
        trainer.set_power(200).await,
        Err(SensorError::NotConnected(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_explicit_disconnect_and_reconnect() {
    let (device, trainer) = connected_trainer().await;

    trainer.disconnect().await.unwrap();
    assert!(!device.is_connected());
    assert_eq!(trainer.phase().await, TrainerPhase::Disconnected);

    trainer.connect("kickr").await.unwrap();
    assert!(device.is_connected());
    assert!(trainer.status().await.is_calibrated);
}

#[tokio::test(start_paused = true)]
async fn test_connection_failure_reported() {
    let (device, trainer) = new_trainer(TrainerCapabilities::default());
    device.set_refuse_connections(true);

    let result = trainer.connect("kickr").await;
    assert!(matches!(result, Err(SensorError::ConnectionFailed(_))));

    let status = trainer.status().await;
    assert_eq!(status.connection_state, ConnectionState::Disconnected);
    assert!(status.last_response.starts_with("Connection failed"));
}

#[tokio::test(start_paused = true)]
async fn test_missing_ftms_service() {
    let transport = LoopbackTransport::new();
    transport.add_device("hrm", "HRM", &[SensorKind::HeartRate]);
    let trainer = TrainerController::new(
        transport,
        Arc::new(CommandQueue::with_defaults()),
        TrainerCapabilities::default(),
    );

    assert!(matches!(
        trainer.connect("hrm").await,
        Err(SensorError::ServiceNotFound(_))
    ));
    assert_eq!(trainer.phase().await, TrainerPhase::Disconnected);
}
