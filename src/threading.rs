//! Thread priority and affinity helpers.
//!
//! Capture and send run on the edge of a 1 ms budget, so their threads
//! are raised to the OS's top priority tiers. Off Windows these are
//! no-ops that report failure.

/// Raise the calling thread to the high priority tier.
pub fn set_current_thread_high_priority() -> bool {
    #[cfg(windows)]
    {
        use windows_sys::Win32::System::Threading::{
            GetCurrentThread, SetThreadPriority, THREAD_PRIORITY_HIGHEST,
        };
        unsafe { SetThreadPriority(GetCurrentThread(), THREAD_PRIORITY_HIGHEST) != 0 }
    }
    #[cfg(not(windows))]
    {
        false
    }
}

/// Raise the calling thread to the time-critical tier.
pub fn set_current_thread_time_critical() -> bool {
    #[cfg(windows)]
    {
        use windows_sys::Win32::System::Threading::{
            GetCurrentThread, SetThreadPriority, THREAD_PRIORITY_TIME_CRITICAL,
        };
        unsafe { SetThreadPriority(GetCurrentThread(), THREAD_PRIORITY_TIME_CRITICAL) != 0 }
    }
    #[cfg(not(windows))]
    {
        false
    }
}

/// Pin the calling thread to one logical core.
pub fn set_current_thread_affinity(core: usize) -> bool {
    if core >= logical_core_count() {
        return false;
    }
    #[cfg(windows)]
    {
        use windows_sys::Win32::System::Threading::{GetCurrentThread, SetThreadAffinityMask};
        let mask = 1usize << core;
        unsafe { SetThreadAffinityMask(GetCurrentThread(), mask) != 0 }
    }
    #[cfg(not(windows))]
    {
        false
    }
}

/// Number of logical cores on the machine.
pub fn logical_core_count() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
}
