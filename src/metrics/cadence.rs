//! Cadence derivation from cumulative crank revolution data.
//!
//! Cycling Power and CSC sensors do not report cadence directly. They report
//! a cumulative crank revolution count and the time of the last crank event
//! (1/1024 s resolution), both 16-bit and wrapping. Cadence is the ratio of
//! the deltas between two consecutive samples.

use crate::metrics::rollover::u16_counter_diff;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Crank event time ticks per second.
pub const CRANK_EVENT_TICKS_PER_SECOND: f64 = 1024.0;

/// Cadence above this is treated as sensor noise.
pub const DEFAULT_MAX_CADENCE_RPM: u32 = 300;

/// A single crank revolution sample as reported by the sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrankRevolutionSample {
    /// Cumulative crank revolutions (wraps at 2^16)
    pub cumulative_revolutions: u16,
    /// Last crank event time in 1/1024 s (wraps at 2^16)
    pub last_event_time: u16,
    /// When the sample was received
    pub observed_at: Instant,
}

/// Per-sensor cadence estimator.
///
/// Retains exactly one previous sample. A sample whose event time equals the
/// retained one is discarded so the next genuinely new sample is still
/// diffed against the last accepted one.
#[derive(Debug, Clone)]
pub struct CadenceCalculator {
    sensor_id: String,
    previous: Option<CrankRevolutionSample>,
    max_rpm: u32,
}

impl CadenceCalculator {
    /// Create a calculator with the default noise ceiling.
    pub fn new(sensor_id: impl Into<String>) -> Self {
        Self::with_max_rpm(sensor_id, DEFAULT_MAX_CADENCE_RPM)
    }

    /// Create a calculator that rejects results above `max_rpm`.
    pub fn with_max_rpm(sensor_id: impl Into<String>, max_rpm: u32) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            previous: None,
            max_rpm,
        }
    }

    /// Feed a crank sample and return the cadence in RPM, if one can be derived.
    ///
    /// Returns `None` for the first sample, for a sample with no elapsed event
    /// time, and for results outside `0..=max_rpm`.
    pub fn calculate(&mut self, cumulative_revolutions: u16, event_time: u16) -> Option<u32> {
        let current = CrankRevolutionSample {
            cumulative_revolutions,
            last_event_time: event_time,
            observed_at: Instant::now(),
        };

        let Some(previous) = self.previous else {
            tracing::debug!("[{}] First crank sample, no cadence yet", self.sensor_id);
            self.previous = Some(current);
            return None;
        };

        let revolution_delta =
            u16_counter_diff(cumulative_revolutions, previous.cumulative_revolutions);
        let time_delta = u16_counter_diff(event_time, previous.last_event_time);

        if time_delta == 0 {
            tracing::trace!(
                "[{}] Repeated crank event time {}, keeping previous sample",
                self.sensor_id,
                event_time
            );
            return None;
        }

        let elapsed_secs = time_delta as f64 / CRANK_EVENT_TICKS_PER_SECOND;
        let rpm = revolution_delta as f64 / elapsed_secs * 60.0;

        self.previous = Some(current);

        if !(0.0..=self.max_rpm as f64).contains(&rpm) {
            tracing::debug!(
                "[{}] Discarding cadence {:.1} RPM (revs {}, ticks {})",
                self.sensor_id,
                rpm,
                revolution_delta,
                time_delta
            );
            return None;
        }

        Some(rpm.round() as u32)
    }

    /// Forget the retained sample.
    pub fn reset(&mut self) {
        self.previous = None;
        tracing::debug!("[{}] Cadence calculator reset", self.sensor_id);
    }

    /// Whether a previous sample is retained.
    pub fn has_previous(&self) -> bool {
        self.previous.is_some()
    }

    /// The retained sample, if any.
    pub fn previous_sample(&self) -> Option<&CrankRevolutionSample> {
        self.previous.as_ref()
    }

    /// Identity this calculator belongs to.
    pub fn sensor_id(&self) -> &str {
        &self.sensor_id
    }

    /// Short description of the retained state for logs.
    pub fn debug_info(&self) -> String {
        match &self.previous {
            Some(sample) => format!(
                "[{}] previous sample: revs={}, time={}",
                self.sensor_id, sample.cumulative_revolutions, sample.last_event_time
            ),
            None => format!("[{}] no previous sample", self.sensor_id),
        }
    }
}

/// Cadence calculators keyed by sensor identity.
///
/// Each identity gets its own lock so decoding for one sensor never waits on
/// another. Calculators are created on first use and must be removed when the
/// sensor disconnects.
#[derive(Debug)]
pub struct CadenceRegistry {
    calculators: Mutex<HashMap<String, Arc<Mutex<CadenceCalculator>>>>,
    max_rpm: u32,
}

impl Default for CadenceRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CADENCE_RPM)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CadenceRegistry {
    /// Create a registry whose calculators reject cadence above `max_rpm`.
    pub fn new(max_rpm: u32) -> Self {
        Self {
            calculators: Mutex::new(HashMap::new()),
            max_rpm,
        }
    }

    fn calculator(&self, sensor_id: &str) -> Arc<Mutex<CadenceCalculator>> {
        let mut calculators = lock(&self.calculators);
        calculators
            .entry(sensor_id.to_string())
            .or_insert_with(|| {
                tracing::debug!("Creating cadence calculator for {}", sensor_id);
                Arc::new(Mutex::new(CadenceCalculator::with_max_rpm(
                    sensor_id,
                    self.max_rpm,
                )))
            })
            .clone()
    }

    /// Feed a crank sample for `sensor_id`, creating its calculator if needed.
    pub fn calculate(
        &self,
        sensor_id: &str,
        cumulative_revolutions: u16,
        event_time: u16,
    ) -> Option<u32> {
        let calculator = self.calculator(sensor_id);
        let mut calculator = lock(&calculator);
        calculator.calculate(cumulative_revolutions, event_time)
    }

    /// Reset the retained sample for one sensor.
    pub fn reset(&self, sensor_id: &str) {
        let calculator = lock(&self.calculators).get(sensor_id).cloned();
        if let Some(calculator) = calculator {
            lock(&calculator).reset();
        }
    }

    /// Drop the calculator for one sensor.
    pub fn remove(&self, sensor_id: &str) -> bool {
        let removed = lock(&self.calculators).remove(sensor_id).is_some();
        if removed {
            tracing::debug!("Removed cadence calculator for {}", sensor_id);
        }
        removed
    }

    /// Reset every calculator, keeping the entries.
    pub fn reset_all(&self) {
        let calculators: Vec<_> = lock(&self.calculators).values().cloned().collect();
        for calculator in calculators {
            lock(&calculator).reset();
        }
    }

    /// Drop every calculator.
    pub fn clear(&self) {
        lock(&self.calculators).clear();
    }

    /// Identities with a live calculator, sorted.
    pub fn active_sensors(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.calculators).keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Whether `sensor_id` currently retains a previous sample.
    pub fn has_previous(&self, sensor_id: &str) -> bool {
        let calculator = lock(&self.calculators).get(sensor_id).cloned();
        calculator.is_some_and(|c| lock(&c).has_previous())
    }
}
