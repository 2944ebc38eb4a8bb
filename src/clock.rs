//! Monotonic high-resolution clock.
//!
//! All timing in the proxy is expressed in performance-counter ticks. On
//! Windows the tick source is `QueryPerformanceCounter`; elsewhere a
//! process-local monotonic anchor stands in so the tick arithmetic stays
//! exercisable off-target. Initialization is idempotent and the whole
//! module is callable from any thread.

use std::sync::atomic::{AtomicU64, Ordering};

/// Ticks per second of the active counter. Zero until [`init`] runs;
/// every conversion lazily initializes on first use.
static FREQUENCY: AtomicU64 = AtomicU64::new(0);

#[cfg(not(windows))]
static ANCHOR: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();

/// Initialize the clock from the OS counter frequency.
///
/// Safe to call more than once; later calls are no-ops. Returns `false`
/// only if the OS refuses to report a frequency.
pub fn init() -> bool {
    if FREQUENCY.load(Ordering::Relaxed) != 0 {
        return true;
    }

    #[cfg(windows)]
    {
        use windows_sys::Win32::System::Performance::QueryPerformanceFrequency;
        let mut freq: i64 = 0;
        if unsafe { QueryPerformanceFrequency(&mut freq) } == 0 || freq <= 0 {
            return false;
        }
        FREQUENCY.store(freq as u64, Ordering::Relaxed);
        true
    }

    #[cfg(not(windows))]
    {
        // Nanosecond ticks against a process-local anchor.
        ANCHOR.get_or_init(std::time::Instant::now);
        FREQUENCY.store(1_000_000_000, Ordering::Relaxed);
        true
    }
}

/// Current counter value in ticks.
pub fn now() -> u64 {
    if FREQUENCY.load(Ordering::Relaxed) == 0 {
        init();
    }

    #[cfg(windows)]
    {
        use windows_sys::Win32::System::Performance::QueryPerformanceCounter;
        let mut counter: i64 = 0;
        unsafe { QueryPerformanceCounter(&mut counter) };
        counter as u64
    }

    #[cfg(not(windows))]
    {
        ANCHOR
            .get_or_init(std::time::Instant::now)
            .elapsed()
            .as_nanos() as u64
    }
}

/// Ticks per second of the active counter.
pub fn frequency() -> u64 {
    if FREQUENCY.load(Ordering::Relaxed) == 0 {
        init();
    }
    FREQUENCY.load(Ordering::Relaxed).max(1)
}

/// Convert a tick difference to microseconds.
pub fn ticks_to_us(delta: u64) -> f64 {
    (delta as f64 * 1_000_000.0) / frequency() as f64
}

/// Convert a tick difference to milliseconds.
pub fn ticks_to_ms(delta: u64) -> f64 {
    (delta as f64 * 1_000.0) / frequency() as f64
}

/// Convert microseconds to counter ticks.
pub fn us_to_ticks(microseconds: u64) -> u64 {
    // Split to avoid overflow on large intervals at high frequencies.
    let freq = frequency();
    let secs = microseconds / 1_000_000;
    let rem = microseconds % 1_000_000;
    secs * freq + (rem * freq) / 1_000_000
}
