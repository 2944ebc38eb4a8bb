//! Dashboard state.
//!
//! The presentation layer runs on its own thread and talks to the core
//! through this handle only: the core publishes stats and a status line,
//! and reads back the translation/hiding toggles and the manual-refresh
//! request flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::capture::ControllerState;

/// Per-device line of the stats view.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStat {
    pub user_id: i32,
    pub name: String,
    pub connected: bool,
    pub packet_number: u32,
    pub buttons: u16,
}

/// One frame of published statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProxyStats {
    pub frame_count: u64,
    pub delta_us: f64,
    pub devices: Vec<DeviceStat>,
}

struct DashboardShared {
    translation_enabled: AtomicBool,
    hiding_enabled: AtomicBool,
    refresh_requested: AtomicBool,
    running: AtomicBool,
    status: Mutex<String>,
    stats: Mutex<ProxyStats>,
}

/// Handle shared between the core and the presentation thread.
#[derive(Clone)]
pub struct Dashboard {
    shared: Arc<DashboardShared>,
}

impl Dashboard {
    pub fn new(translation_enabled: bool, hiding_enabled: bool) -> Self {
        Self {
            shared: Arc::new(DashboardShared {
                translation_enabled: AtomicBool::new(translation_enabled),
                hiding_enabled: AtomicBool::new(hiding_enabled),
                refresh_requested: AtomicBool::new(false),
                running: AtomicBool::new(false),
                status: Mutex::new(String::new()),
                stats: Mutex::new(ProxyStats::default()),
            }),
        }
    }

    /// Publish the per-iteration statistics.
    pub fn update_stats(&self, frame_count: u64, delta_us: f64, states: &[ControllerState]) {
        let devices = states
            .iter()
            .map(|state| DeviceStat {
                user_id: state.user_id,
                name: state.product_name.clone(),
                connected: state.is_connected,
                packet_number: state.raw_xinput.packet_number,
                buttons: state.effective_gamepad().buttons.bits(),
            })
            .collect();
        if let Ok(mut stats) = self.shared.stats.lock() {
            *stats = ProxyStats {
                frame_count,
                delta_us,
                devices,
            };
        }
    }

    pub fn stats(&self) -> ProxyStats {
        self.shared
            .stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    pub fn set_status(&self, message: &str) {
        if let Ok(mut status) = self.shared.status.lock() {
            *status = message.to_string();
        }
    }

    pub fn status(&self) -> String {
        self.shared
            .status
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    pub fn is_translation_enabled(&self) -> bool {
        self.shared.translation_enabled.load(Ordering::SeqCst)
    }

    pub fn set_translation_enabled(&self, enabled: bool) {
        self.shared.translation_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_hiding_enabled(&self) -> bool {
        self.shared.hiding_enabled.load(Ordering::SeqCst)
    }

    pub fn set_hiding_enabled(&self, enabled: bool) {
        self.shared.hiding_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn request_refresh(&self) {
        self.shared.refresh_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_refresh_requested(&self) -> bool {
        self.shared.refresh_requested.load(Ordering::SeqCst)
    }

    pub fn clear_refresh_request(&self) {
        self.shared.refresh_requested.store(false, Ordering::SeqCst);
    }

    /// Presentation loop: a once-a-second console summary until stopped.
    pub fn run(&self) {
        self.shared.running.store(true, Ordering::SeqCst);
        while self.shared.running.load(Ordering::SeqCst) {
            let stats = self.stats();
            let connected = stats.devices.iter().filter(|d| d.connected).count();
            let status = self.status();
            println!(
                "[frame {:>8}] {:.0} us/tick, {} device(s) connected{}{}",
                stats.frame_count,
                stats.delta_us,
                connected,
                if status.is_empty() { "" } else { " | " },
                status,
            );
            std::thread::sleep(std::time::Duration::from_secs(1));
        }
    }

    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
    }
}
