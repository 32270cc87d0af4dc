//! RideLink command line.

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam::channel::Receiver;
use ridelink::sensors::ftms::{build_indoor_bike_data, ResultCode};
use ridelink::sensors::gatt::{
    CYCLING_POWER_MEASUREMENT_UUID, HEART_RATE_MEASUREMENT_UUID, INDOOR_BIKE_DATA_UUID,
};
use ridelink::sensors::{
    BleTransport, CommandQueue, LoopbackTransport, SensorDecoder, SensorEvent, SensorKind,
    SensorManager, TrainerController, TrainerUpdate, Transport,
};
use ridelink::storage::config::{load_config, AppConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// RideLink - BLE fitness sensors and FTMS trainer control.
#[derive(Parser, Debug)]
#[command(name = "ridelink", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(clap::Subcommand, Debug, PartialEq)]
enum Command {
    /// Scan for supported sensors.
    Scan {
        /// Scan duration in seconds; defaults to the configured value.
        secs: Option<u64>,
    },
    /// Stream decoded measurements from one sensor.
    Monitor {
        device_id: String,
        /// Sensor kind (hr, power, csc, core, moxy, trainer); detected when omitted.
        kind: Option<SensorKind>,
    },
    /// Hold a trainer at a fixed ERG target.
    Erg { device_id: String, watts: u16 },
    /// Run the pipeline against simulated devices.
    Simulate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, config_error) = match load_config() {
        Ok(config) => (config, None),
        Err(e) => (AppConfig::default(), Some(e)),
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting RideLink v{}", env!("CARGO_PKG_VERSION"));
    if let Some(e) = config_error {
        tracing::warn!("Failed to load config, using defaults: {}", e);
    }

    match cli.cmd {
        Command::Scan { secs } => scan(&config, secs).await,
        Command::Monitor { device_id, kind } => monitor(&config, &device_id, kind).await,
        Command::Erg { device_id, watts } => erg(&config, &device_id, watts).await,
        Command::Simulate => simulate(&config).await,
    }
}

async fn ble_transport(config: &AppConfig) -> Result<BleTransport> {
    let transport = BleTransport::initialize()
        .await
        .context("failed to open Bluetooth adapter")?;
    Ok(transport.with_connect_timeout(Duration::from_secs(config.sensors.connection_timeout_secs)))
}

async fn scan(config: &AppConfig, secs: Option<u64>) -> Result<()> {
    let transport = ble_transport(config).await?;
    let duration = Duration::from_secs(secs.unwrap_or(config.sensors.scan_duration_secs));
    let sensors = transport.scan(duration).await?;

    if sensors.is_empty() {
        println!("No sensors found");
    }
    for sensor in sensors {
        println!(
            "{}  {:<24} {:<22} rssi {}",
            sensor.device_id,
            sensor.name,
            sensor.kind.to_string(),
            sensor
                .signal_strength
                .map(|r| r.to_string())
                .unwrap_or_else(|| "-".to_string())
        );
    }
    Ok(())
}

fn new_manager<T: Transport>(
    config: &AppConfig,
    transport: T,
    queue: Arc<CommandQueue>,
) -> SensorManager<T> {
    SensorManager::new(
        transport,
        queue,
        SensorDecoder::new(config.sensors.max_cadence_rpm),
    )
}

/// Print events on a blocking thread until every sender is gone.
fn spawn_printer(events: Receiver<SensorEvent>) -> tokio::task::JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        for event in events.iter() {
            print_event(&event);
        }
    })
}

fn print_event(event: &SensorEvent) {
    match event {
        SensorEvent::Measurement {
            device_id,
            kind,
            record,
            received_at,
            ..
        } => {
            let json = serde_json::to_string(record).unwrap_or_else(|_| record.to_string());
            println!(
                "{} [{}] {}: {}",
                received_at.format("%H:%M:%S%.3f"),
                device_id,
                kind,
                json
            );
        }
        SensorEvent::ConnectionChanged { device_id, state } => {
            println!("[{}] {}", device_id, state);
        }
        SensorEvent::Error(message) => eprintln!("error: {}", message),
    }
}

fn print_trainer_update(update: &TrainerUpdate) {
    match update {
        TrainerUpdate::Status(status) => println!(
            "trainer: {:?} mode={} target={:?} calibrated={} last=\"{}\"",
            status.phase(),
            status.mode,
            status.target_power,
            status.is_calibrated,
            status.last_response
        ),
        TrainerUpdate::Telemetry { power } => println!("trainer: power {}W", power),
        TrainerUpdate::Disconnected => println!("trainer: disconnected"),
    }
}

async fn monitor(config: &AppConfig, device_id: &str, kind: Option<SensorKind>) -> Result<()> {
    let transport = ble_transport(config).await?;
    let queue = Arc::new(CommandQueue::new(config.queue.to_queue_config()));
    let mut manager = new_manager(config, transport, queue);
    let printer = spawn_printer(manager.event_receiver());

    let kind = manager.connect(device_id, kind).await?;
    println!("Monitoring {} sensor {} (Ctrl+C to stop)", kind, device_id);

    tokio::signal::ctrl_c().await?;
    manager.disconnect_all().await;
    drop(manager);
    printer.await?;
    Ok(())
}

async fn erg(config: &AppConfig, device_id: &str, watts: u16) -> Result<()> {
    let transport = ble_transport(config).await?;
    let queue = Arc::new(CommandQueue::new(config.queue.to_queue_config()));
    let trainer = TrainerController::new(transport, queue, config.trainer);
    let mut updates = trainer.subscribe();

    trainer.connect(device_id).await?;
    trainer.set_power(watts).await?;
    println!("ERG {}W on {} (Ctrl+C to stop)", watts, device_id);

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(TrainerUpdate::Disconnected) => {
                    print_trainer_update(&TrainerUpdate::Disconnected);
                    return Ok(());
                }
                Ok(update) => print_trainer_update(&update),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return Ok(()),
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    if let Err(e) = trainer.stop().await {
        tracing::warn!("Failed to stop trainer: {}", e);
    }
    trainer.disconnect().await?;
    Ok(())
}

/// Run the full pipeline against simulated devices.
async fn simulate(config: &AppConfig) -> Result<()> {
    const TICKS: u16 = 10;

    let transport = LoopbackTransport::new();
    let hrm = transport.add_device("sim-hrm", "Sim HRM", &[SensorKind::HeartRate]);
    let power_meter = transport.add_device("sim-pm", "Sim Power", &[SensorKind::CyclingPower]);
    let kickr = transport.add_device("sim-trainer", "Sim Trainer", &[SensorKind::SmartTrainer]);

    let queue = Arc::new(CommandQueue::new(config.queue.to_queue_config()));
    let mut manager = new_manager(config, transport.clone(), queue.clone());
    let printer = spawn_printer(manager.event_receiver());

    manager.connect(hrm.id(), None).await?;
    manager.connect(power_meter.id(), Some(SensorKind::CyclingPower)).await?;

    let trainer = TrainerController::new(transport.clone(), queue.clone(), config.trainer);
    let mut updates = trainer.subscribe();
    let update_printer = tokio::spawn(async move {
        while let Ok(update) = updates.recv().await {
            print_trainer_update(&update);
            if update == TrainerUpdate::Disconnected {
                break;
            }
        }
    });

    trainer.connect(kickr.id()).await?;
    trainer.set_power(200).await?;

    for tick in 0..TICKS {
        hrm.notify(HEART_RATE_MEASUREMENT_UUID, &[0x00, 130 + (tick % 10) as u8]);

        // 3 crank revolutions every 2048/1024 s -> 90 rpm
        let power = 195 + tick % 10;
        let revolutions = tick * 3;
        let event_time = tick.wrapping_mul(2048);
        let mut cps = vec![0x20, 0x00];
        cps.extend_from_slice(&power.to_le_bytes());
        cps.extend_from_slice(&revolutions.to_le_bytes());
        cps.extend_from_slice(&event_time.to_le_bytes());
        power_meter.notify(CYCLING_POWER_MEASUREMENT_UUID, &cps);

        kickr.notify(INDOOR_BIKE_DATA_UUID, &build_indoor_bike_data(0x0044, power));

        if tick == TICKS / 2 {
            // Trainer refuses the next target; the engine falls back to 200 W.
            kickr.set_control_result(ResultCode::InvalidParameter);
            trainer.set_power(450).await?;
        }

        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    trainer.disconnect().await?;
    manager.disconnect_all().await;
    drop(manager);
    printer.await?;
    update_printer.await?;
    Ok(())
}
