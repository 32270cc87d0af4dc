//! Rollover-safe arithmetic for fixed-width sensor counters.
//!
//! BLE sensors report cumulative revolutions and event times as 16-bit
//! counters that wrap to zero. Deltas between two readings must be taken
//! modulo the counter range.

/// Range of a 16-bit counter (2^16).
pub const U16_COUNTER_RANGE: u32 = 1 << 16;

/// Difference `current - previous` modulo `modulus`.
///
/// Both values are expected to already be reduced into `0..modulus`.
/// A `modulus` of zero yields zero.
pub fn modular_diff(current: u32, previous: u32, modulus: u32) -> u32 {
    if modulus == 0 {
        return 0;
    }
    let current = current % modulus;
    let previous = previous % modulus;
    (current + modulus - previous) % modulus
}

/// Difference between two 16-bit counter readings, correcting for a single wrap.
pub fn u16_counter_diff(current: u16, previous: u16) -> u32 {
    modular_diff(current as u32, previous as u32, U16_COUNTER_RANGE)
}
