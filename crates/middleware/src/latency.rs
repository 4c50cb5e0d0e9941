//! TSC clock for message timestamps; avoids a syscall per read on the hot path.

use once_cell::sync::Lazy;
use quanta::Clock;

/// Global TSC clock - zero syscall timestamp reads
pub static CLOCK: Lazy<Clock> = Lazy::new(Clock::new);

/// Get current TSC timestamp (zero syscalls)
#[inline]
pub fn now_tsc() -> u64 {
    CLOCK.raw()
}

/// Nanoseconds between two raw readings
#[inline]
pub fn elapsed_nanos(start: u64, end: u64) -> u64 {
    CLOCK.delta_as_nanos(start, end)
}
