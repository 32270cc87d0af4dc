//! RideLink - BLE fitness sensor decoding and smart trainer control
//!
//! Decodes heart rate, cycling power, speed/cadence, core temperature and
//! muscle oxygen notifications into measurement records, and drives FTMS
//! smart trainers through a serialized command queue.

pub mod metrics;
pub mod sensors;
pub mod storage;

// Re-export commonly used types
pub use metrics::cadence::{CadenceCalculator, CadenceRegistry};
pub use sensors::decoder::SensorDecoder;
pub use sensors::manager::SensorManager;
pub use sensors::queue::CommandQueue;
pub use sensors::trainer::TrainerController;
pub use storage::config::AppConfig;
