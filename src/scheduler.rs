//! Main-loop composition.
//!
//! Builds the subsystems in dependency order, wires rumble back to the
//! capture side, and runs the polling loop at the configured rate with
//! adaptive device rescans. Shutdown is cooperative: the console
//! interrupt handler raises a flag, the loop drains, and every subsystem
//! tears down in reverse order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{error, info, warn};

use crate::capture::CaptureEngine;
use crate::clock;
use crate::config::{ConfigStore, ProxySettings};
use crate::dashboard::Dashboard;
use crate::emulator::VirtualDeviceManager;
use crate::error::Result;
use crate::lifecycle::{
    DeviceLifecycleManager, SCAN_INTERVAL_EMPTY_US, SCAN_INTERVAL_POPULATED_US,
};
use crate::logging;
use crate::threading;
use crate::translate::TranslationPipeline;

/// Raised by the console interrupt handler; checked once per iteration.
static STOP: AtomicBool = AtomicBool::new(false);

/// Ask the main loop to exit at its next check.
pub fn request_stop() {
    STOP.store(true, Ordering::SeqCst);
}

pub fn stop_requested() -> bool {
    STOP.load(Ordering::SeqCst)
}

#[cfg(windows)]
unsafe extern "system" fn console_handler(_ctrl_type: u32) -> i32 {
    request_stop();
    1
}

/// Install the console-interrupt handler that triggers graceful shutdown.
fn install_interrupt_handler() {
    #[cfg(windows)]
    unsafe {
        use windows_sys::Win32::System::Console::SetConsoleCtrlHandler;
        SetConsoleCtrlHandler(Some(console_handler), 1);
    }
}

pub struct Scheduler {
    capture: CaptureEngine,
    pipeline: TranslationPipeline,
    manager: VirtualDeviceManager,
    lifecycle: DeviceLifecycleManager,
    dashboard: Dashboard,
    store: ConfigStore,
    settings: ProxySettings,
    /// Set when the bus is unreachable: translation still runs, nothing
    /// is emitted.
    test_mode: bool,
}

impl Scheduler {
    /// Build and initialize every subsystem from the default config
    /// location. Only a capture-initialization failure is fatal.
    pub fn bootstrap() -> Result<Self> {
        Self::bootstrap_with_store(ConfigStore::beside_executable())
    }

    /// As [`bootstrap`](Self::bootstrap) with an explicit config store.
    pub fn bootstrap_with_store(store: ConfigStore) -> Result<Self> {
        clock::init();
        if let Err(e) = store.load() {
            error!("failed to read configuration: {e}");
        }
        let settings = ProxySettings::from_store(&store);
        info!(
            "polling at {} Hz, translation {}",
            settings.polling_frequency,
            if settings.translation_enabled { "on" } else { "off" }
        );

        let mut pipeline = TranslationPipeline::new();
        pipeline.apply_settings(&settings);

        let capture = CaptureEngine::new();
        if settings.input_log_enabled {
            capture.set_input_log_path(&settings.input_log_path);
            capture.set_input_recording(true);
        }

        let manager = VirtualDeviceManager::new();
        manager.set_rumble_intensity(settings.rumble_intensity);
        manager.set_rumble_enabled(settings.rumble_enabled);
        manager.enable_device_hiding(settings.hidhide_enabled);
        if settings.hidhide_enabled && !manager.connect_hiding() {
            warn!("physical devices will not be hidden");
        }

        // Fatal: without capture there is nothing to proxy.
        capture.initialize()?;

        let dashboard = Dashboard::new(settings.translation_enabled, settings.hidhide_enabled);
        let test_mode = match manager.initialize() {
            Ok(()) => false,
            Err(e) => {
                warn!("{e}; running in input test mode");
                dashboard.set_status("virtual bus unavailable - input test mode");
                true
            }
        };

        // Rumble flows back from the bus into the physical device.
        let rumble_capture = capture.clone();
        manager.set_rumble_callback(Arc::new(move |user_id, left, right| {
            rumble_capture.set_vibration(user_id, left, right);
        }));

        if settings.capture_thread_enabled {
            capture.start_polling_thread();
        }

        Ok(Self {
            capture,
            pipeline,
            manager,
            lifecycle: DeviceLifecycleManager::new(),
            dashboard,
            store,
            settings,
            test_mode,
        })
    }

    pub fn is_test_mode(&self) -> bool {
        self.test_mode
    }

    pub fn dashboard(&self) -> Dashboard {
        self.dashboard.clone()
    }

    /// Run the proxy loop until an interrupt is requested, then tear
    /// everything down. Returns the process exit code.
    pub fn run(&mut self) -> i32 {
        let presenter = self.dashboard.clone();
        let presenter_thread = std::thread::Builder::new()
            .name("padproxy-dashboard".into())
            .spawn(move || presenter.run())
            .ok();

        install_interrupt_handler();
        threading::set_current_thread_high_priority();

        let target_interval_us = 1_000_000.0 / self.settings.polling_frequency as f64;
        let mut frame_count: u64 = 0;
        let mut last = clock::now();
        let mut last_rescan = last;

        while !stop_requested() {
            let now = clock::now();
            let delta_us = clock::ticks_to_us(now.saturating_sub(last));

            if !self.settings.capture_thread_enabled {
                self.capture.update(delta_us);
            }
            let states = self.capture.snapshot();

            self.lifecycle.process(
                &states,
                &self.manager,
                self.pipeline.is_xinput_to_dinput_enabled(),
                self.pipeline.is_dinput_to_xinput_enabled(),
                self.dashboard.is_translation_enabled(),
                self.dashboard.is_hiding_enabled(),
            );

            if self.dashboard.is_translation_enabled() {
                let translated = self.pipeline.translate(&states);
                if !self.test_mode {
                    self.manager.send(&translated);
                }
            }

            frame_count += 1;
            self.dashboard.update_stats(frame_count, delta_us, &states);

            // Rescan: manual request first, then the adaptive cadence
            // (fast while empty, slow while populated).
            let connected = states.iter().filter(|s| s.is_connected).count();
            let rescan_interval_us = if connected == 0 {
                SCAN_INTERVAL_EMPTY_US
            } else {
                SCAN_INTERVAL_POPULATED_US
            };
            if self.dashboard.is_refresh_requested() {
                if let Err(e) = self.capture.refresh_devices() {
                    error!("manual device refresh failed: {e}");
                }
                self.dashboard.clear_refresh_request();
                last_rescan = now;
                info!("manual device refresh triggered");
            } else if clock::ticks_to_us(now.saturating_sub(last_rescan))
                > rescan_interval_us as f64
            {
                if let Err(e) = self.capture.refresh_devices() {
                    error!("periodic device refresh failed: {e}");
                }
                last_rescan = now;
            }

            let elapsed_us = clock::ticks_to_us(clock::now().saturating_sub(now));
            if elapsed_us < target_interval_us {
                let sleep_us = (target_interval_us - elapsed_us) as u64;
                std::thread::sleep(std::time::Duration::from_micros(sleep_us));
            }
            last = now;
        }

        info!("shutting down");
        self.lifecycle.cleanup(&self.manager);
        self.manager.shutdown();
        self.capture.shutdown();

        self.dashboard.stop();
        if let Some(thread) = presenter_thread {
            let _ = thread.join();
        }

        self.persist();
        0
    }

    /// Write the runtime toggles back and save, then flush logs if
    /// configured.
    fn persist(&self) {
        self.store
            .set_bool("translation_enabled", self.dashboard.is_translation_enabled());
        self.store
            .set_bool("hidhide_enabled", self.dashboard.is_hiding_enabled());
        if let Err(e) = self.store.save() {
            error!("failed to save configuration: {e}");
        }
        if self.settings.save_logs_on_exit {
            match logging::save_to_timestamped_file() {
                Ok(path) => println!("session log saved to {}", path.display()),
                Err(e) => error!("failed to save session log: {e}"),
            }
        }
    }
}
