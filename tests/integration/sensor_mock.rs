//! Mock sensors for testing the sensor manager without BLE hardware.

use crossbeam::channel::Receiver;
use ridelink::sensors::decoder::SensorDecoder;
use ridelink::sensors::gatt::{
    CORE_TEMPERATURE_MEASUREMENT_UUID, CSC_MEASUREMENT_UUID, CYCLING_POWER_MEASUREMENT_UUID,
    HEART_RATE_MEASUREMENT_UUID, MOXY_MEASUREMENT_UUID, MOXY_TRIGGER_UUID,
};
use ridelink::sensors::loopback::LoopbackTransport;
use ridelink::sensors::manager::SensorManager;
use ridelink::sensors::measurement::{fields, MeasurementRecord};
use ridelink::sensors::queue::CommandQueue;
use ridelink::sensors::types::{ConnectionState, SensorError, SensorEvent, SensorKind};
use std::sync::Arc;
use std::time::Duration;

/// Generates notification payloads the way real sensors encode them.
pub struct MockSensorData;

impl MockSensorData {
    /// Heart Rate Measurement with an 8-bit value.
    pub fn heart_rate(bpm: u8) -> Vec<u8> {
        vec![0x00, bpm]
    }

    /// Cycling Power Measurement carrying crank revolution data.
    pub fn power_with_crank(watts: u16, revolutions: u16, event_time: u16) -> Vec<u8> {
        let mut data = vec![0x20, 0x00];
        data.extend_from_slice(&watts.to_le_bytes());
        data.extend_from_slice(&revolutions.to_le_bytes());
        data.extend_from_slice(&event_time.to_le_bytes());
        data
    }

    /// CSC Measurement with wheel and crank data.
    pub fn speed_cadence(revolutions: u16, event_time: u16) -> Vec<u8> {
        let mut data = vec![0x03, 0x0A, 0x00, 0x00, 0x00, 0x00, 0x08];
        data.extend_from_slice(&revolutions.to_le_bytes());
        data.extend_from_slice(&event_time.to_le_bytes());
        data
    }

    /// CORE frame with temperatures in hundredths of a degree.
    pub fn core_temperature(core_centi: u16, skin_centi: u16) -> Vec<u8> {
        let mut data = vec![0x00];
        data.extend_from_slice(&core_centi.to_le_bytes());
        data.extend_from_slice(&skin_centi.to_le_bytes());
        data.resize(10, 0x00);
        data
    }

    /// Moxy frame: SmO2 in tenths of a percent, THb in hundredths of g/dL.
    pub fn muscle_oxygen(smo2_tenths: u16, thb_hundredths: u16) -> Vec<u8> {
        let mut data = vec![0x00, 0x00];
        data.extend_from_slice(&smo2_tenths.to_le_bytes());
        data.extend_from_slice(&[0x00, 0x00]);
        data.extend_from_slice(&thb_hundredths.to_le_bytes());
        data.push(0x00);
        data
    }
}

fn new_manager() -> (
    LoopbackTransport,
    SensorManager<LoopbackTransport>,
    Receiver<SensorEvent>,
) {
    let transport = LoopbackTransport::new();
    let queue = Arc::new(CommandQueue::with_defaults());
    let mut manager = SensorManager::new(transport.clone(), queue, SensorDecoder::default());
    let events = manager.event_receiver();
    (transport, manager, events)
}

/// Wait for the next event, letting spawned tasks run in between polls.
async fn next_event(events: &Receiver<SensorEvent>) -> SensorEvent {
    for _ in 0..100 {
        if let Ok(event) = events.try_recv() {
            return event;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no sensor event received");
}

async fn next_measurement(events: &Receiver<SensorEvent>) -> (String, MeasurementRecord) {
    loop {
        if let SensorEvent::Measurement {
            device_id, record, ..
        } = next_event(events).await
        {
            return (device_id, record);
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_identifies_sensor_kind() {
    let (transport, manager, _events) = new_manager();
    transport.add_device("hrm", "HRM-Pro", &[SensorKind::HeartRate]);
    transport.add_device("core", "CORE", &[SensorKind::CoreBodyTemperature]);

    assert_eq!(manager.connect("hrm", None).await.unwrap(), SensorKind::HeartRate);
    assert_eq!(
        manager.connect("core", None).await.unwrap(),
        SensorKind::CoreBodyTemperature
    );
    assert_eq!(
        manager.connected_sensors().await,
        vec![
            ("core".to_string(), SensorKind::CoreBodyTemperature),
            ("hrm".to_string(), SensorKind::HeartRate),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_connect_twice_returns_existing_kind() {
    let (transport, manager, _events) = new_manager();
    transport.add_device("pm", "Assioma", &[SensorKind::CyclingPower]);

    manager.connect("pm", None).await.unwrap();
    assert_eq!(
        manager.connect("pm", Some(SensorKind::HeartRate)).await.unwrap(),
        SensorKind::CyclingPower
    );
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_connect_streams_once() {
    let (transport, manager, events) = new_manager();
    let device = transport.add_device("hrm", "HRM-Pro", &[SensorKind::HeartRate]);

    let (first, second) = tokio::join!(manager.connect("hrm", None), manager.connect("hrm", None));
    assert_eq!(first.unwrap(), SensorKind::HeartRate);
    assert!(matches!(second, Err(SensorError::ConnectionFailed(_))));
    assert_eq!(
        manager.connected_sensors().await,
        vec![("hrm".to_string(), SensorKind::HeartRate)]
    );
    while events.try_recv().is_ok() {}

    assert!(device.notify(HEART_RATE_MEASUREMENT_UUID, &MockSensorData::heart_rate(130)));
    let (_, record) = next_measurement(&events).await;
    assert_eq!(record.number(fields::HEART_RATE), Some(130.0));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(events.try_recv().is_err());

    // Once settled, a repeat connect reports the existing sensor again.
    assert_eq!(manager.connect("hrm", None).await.unwrap(), SensorKind::HeartRate);
}

#[tokio::test(start_paused = true)]
async fn test_events_flow_in_order() {
    let (transport, manager, events) = new_manager();
    let device = transport.add_device("hrm", "HRM-Pro", &[SensorKind::HeartRate]);

    manager.connect("hrm", None).await.unwrap();
    assert!(device.notify(HEART_RATE_MEASUREMENT_UUID, &MockSensorData::heart_rate(72)));
    assert!(device.notify(HEART_RATE_MEASUREMENT_UUID, &MockSensorData::heart_rate(74)));

    assert!(matches!(
        next_event(&events).await,
        SensorEvent::ConnectionChanged { state: ConnectionState::Connecting, .. }
    ));
    assert!(matches!(
        next_event(&events).await,
        SensorEvent::ConnectionChanged { state: ConnectionState::Connected, .. }
    ));

    let (device_id, first) = next_measurement(&events).await;
    let (_, second) = next_measurement(&events).await;
    assert_eq!(device_id, "hrm");
    assert_eq!(first.number(fields::HEART_RATE), Some(72.0));
    assert_eq!(second.number(fields::HEART_RATE), Some(74.0));
}

#[tokio::test(start_paused = true)]
async fn test_power_cadence_stream() {
    let (transport, manager, events) = new_manager();
    let device = transport.add_device("pm", "Assioma", &[SensorKind::CyclingPower]);
    manager.connect("pm", None).await.unwrap();

    device.notify(
        CYCLING_POWER_MEASUREMENT_UUID,
        &MockSensorData::power_with_crank(240, 100, 1024),
    );
    device.notify(
        CYCLING_POWER_MEASUREMENT_UUID,
        &MockSensorData::power_with_crank(245, 101, 1707),
    );

    let (_, first) = next_measurement(&events).await;
    assert_eq!(first.number(fields::POWER), Some(240.0));
    assert!(first.is_null(fields::CADENCE));

    let (_, second) = next_measurement(&events).await;
    assert_eq!(second.number(fields::POWER), Some(245.0));
    assert_eq!(second.number(fields::CADENCE), Some(90.0));
    assert!(manager.decoder().cadence().has_previous("pm"));
}

#[tokio::test(start_paused = true)]
async fn test_speed_cadence_and_temperature() {
    let (transport, manager, events) = new_manager();
    let csc = transport.add_device("csc", "Cadence", &[SensorKind::CyclingSpeedCadence]);
    let core = transport.add_device("core", "CORE", &[SensorKind::CoreBodyTemperature]);
    manager.connect("csc", None).await.unwrap();
    manager.connect("core", None).await.unwrap();

    csc.notify(CSC_MEASUREMENT_UUID, &MockSensorData::speed_cadence(10, 0));
    csc.notify(CSC_MEASUREMENT_UUID, &MockSensorData::speed_cadence(12, 2048));
    let (_, first) = next_measurement(&events).await;
    assert!(first.is_null(fields::CADENCE));
    let (_, second) = next_measurement(&events).await;
    assert_eq!(second.number(fields::CADENCE), Some(60.0));

    core.notify(
        CORE_TEMPERATURE_MEASUREMENT_UUID,
        &MockSensorData::core_temperature(3722, 3480),
    );
    let (device_id, record) = next_measurement(&events).await;
    assert_eq!(device_id, "core");
    assert_eq!(record.number(fields::CORE_TEMPERATURE), Some(37.22));
    assert_eq!(record.number(fields::SKIN_TEMPERATURE), Some(34.8));
}

#[tokio::test(start_paused = true)]
async fn test_empty_notifications_skipped() {
    let (transport, manager, events) = new_manager();
    let device = transport.add_device("hrm", "HRM-Pro", &[SensorKind::HeartRate]);
    manager.connect("hrm", None).await.unwrap();

    device.notify(HEART_RATE_MEASUREMENT_UUID, &[]);
    device.notify(HEART_RATE_MEASUREMENT_UUID, &MockSensorData::heart_rate(140));

    let (_, record) = next_measurement(&events).await;
    assert_eq!(record.number(fields::HEART_RATE), Some(140.0));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_moxy_trigger_written() {
    let (transport, manager, events) = new_manager();
    let device = transport.add_device("moxy", "Moxy", &[SensorKind::MuscleOxygen]);

    assert_eq!(manager.connect("moxy", None).await.unwrap(), SensorKind::MuscleOxygen);
    assert_eq!(device.writes_to(MOXY_TRIGGER_UUID), vec![vec![0x01]]);
    assert!(device.is_subscribed(MOXY_MEASUREMENT_UUID));

    device.notify(MOXY_MEASUREMENT_UUID, &MockSensorData::muscle_oxygen(654, 1234));
    let (_, record) = next_measurement(&events).await;
    assert_eq!(record.number(fields::SMO2), Some(65.4));
    assert_eq!(record.number(fields::THB), Some(12.34));
}

#[tokio::test(start_paused = true)]
async fn test_link_loss_forgets_cadence() {
    let (transport, manager, events) = new_manager();
    let device = transport.add_device("pm", "Assioma", &[SensorKind::CyclingPower]);
    manager.connect("pm", None).await.unwrap();

    device.notify(
        CYCLING_POWER_MEASUREMENT_UUID,
        &MockSensorData::power_with_crank(200, 5, 0),
    );
    next_measurement(&events).await;
    assert!(manager.decoder().cadence().has_previous("pm"));

    device.simulate_disconnect();
    assert!(matches!(
        next_event(&events).await,
        SensorEvent::ConnectionChanged { state: ConnectionState::Disconnected, .. }
    ));
    assert!(!manager.is_connected("pm").await);
    assert!(manager.decoder().cadence().active_sensors().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unsupported_device() {
    let (transport, manager, events) = new_manager();
    let device = transport.add_device("mystery", "Unknown", &[]);

    assert!(matches!(
        manager.connect("mystery", None).await,
        Err(SensorError::UnsupportedSensor(_))
    ));
    assert!(!device.is_connected());
    assert!(!manager.is_connected("mystery").await);

    let mut saw_error = false;
    while let Ok(event) = events.try_recv() {
        saw_error |= matches!(event, SensorEvent::Error(_));
    }
    assert!(saw_error);
}

#[tokio::test(start_paused = true)]
async fn test_no_characteristic_set_up() {
    let (transport, manager, events) = new_manager();
    let device = transport.add_device("hrm", "HRM-Pro", &[SensorKind::HeartRate]);
    device.set_fail_subscriptions(true);

    assert!(matches!(
        manager.connect("hrm", None).await,
        Err(SensorError::SubscriptionFailed(_))
    ));
    assert!(!device.is_connected());
    assert!(!manager.is_connected("hrm").await);
    assert!(manager.connected_sensors().await.is_empty());

    let mut last_state = None;
    while let Ok(event) = events.try_recv() {
        if let SensorEvent::ConnectionChanged { state, .. } = event {
            last_state = Some(state);
        }
    }
    assert_eq!(last_state, Some(ConnectionState::Disconnected));

    // The failed attempt does not block a later one.
    device.set_fail_subscriptions(false);
    assert_eq!(manager.connect("hrm", None).await.unwrap(), SensorKind::HeartRate);
}

#[tokio::test(start_paused = true)]
async fn test_partial_setup_still_connects() {
    let (transport, manager, events) = new_manager();
    let device = transport.add_device("moxy", "Moxy", &[SensorKind::MuscleOxygen]);
    device.set_fail_writes(true);

    assert_eq!(manager.connect("moxy", None).await.unwrap(), SensorKind::MuscleOxygen);
    assert!(device.writes_to(MOXY_TRIGGER_UUID).is_empty());
    assert!(device.is_subscribed(MOXY_MEASUREMENT_UUID));

    device.notify(MOXY_MEASUREMENT_UUID, &MockSensorData::muscle_oxygen(500, 1100));
    let (_, record) = next_measurement(&events).await;
    assert_eq!(record.number(fields::SMO2), Some(50.0));
}

#[tokio::test(start_paused = true)]
async fn test_requested_kind_missing() {
    let (transport, manager, _events) = new_manager();
    transport.add_device("hrm", "HRM-Pro", &[SensorKind::HeartRate]);

    assert!(matches!(
        manager.connect("hrm", Some(SensorKind::CyclingPower)).await,
        Err(SensorError::ServiceNotFound(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_all() {
    let (transport, manager, _events) = new_manager();
    let hrm = transport.add_device("hrm", "HRM-Pro", &[SensorKind::HeartRate]);
    let pm = transport.add_device("pm", "Assioma", &[SensorKind::CyclingPower]);
    manager.connect("hrm", None).await.unwrap();
    manager.connect("pm", None).await.unwrap();

    manager.disconnect_all().await;

    assert!(manager.connected_sensors().await.is_empty());
    assert!(!hrm.is_connected());
    assert!(!pm.is_connected());
    assert!(matches!(
        manager.disconnect("hrm").await,
        Err(SensorError::NotConnected(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_reset_cadence() {
    let (transport, manager, events) = new_manager();
    let device = transport.add_device("pm", "Assioma", &[SensorKind::CyclingPower]);
    manager.connect("pm", None).await.unwrap();

    device.notify(
        CYCLING_POWER_MEASUREMENT_UUID,
        &MockSensorData::power_with_crank(200, 5, 0),
    );
    next_measurement(&events).await;

    manager.reset_cadence(Some("pm"));
    assert!(!manager.decoder().cadence().has_previous("pm"));
    assert_eq!(manager.decoder().cadence().active_sensors(), vec!["pm".to_string()]);

    // The first sample after a reset has nothing to compare against.
    device.notify(
        CYCLING_POWER_MEASUREMENT_UUID,
        &MockSensorData::power_with_crank(200, 6, 683),
    );
    let (_, record) = next_measurement(&events).await;
    assert!(record.is_null(fields::CADENCE));
}
