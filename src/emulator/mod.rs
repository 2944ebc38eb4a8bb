//! Virtual device management.
//!
//! Owns the synthetic targets registered with the virtual bus: creates
//! and destroys them, routes translated states to the right target, and
//! bridges feedback (rumble) notifications back toward the capture side.
//! Also carries the thin bridge to the device-hiding driver.
//!
//! # Ownership
//! Target handles live exclusively in the manager's records and are
//! released exactly once, on destroy or shutdown. Rumble listeners hold
//! only a weak reference to the manager, so a callback arriving during
//! teardown finds nothing to call into; listeners are always dropped
//! before their target is unplugged.

pub mod bus;
pub mod hidhide;
pub mod report;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use log::{info, warn};

use crate::error::Result;
#[cfg(not(windows))]
use crate::error::ProxyError;
use crate::gamepad::{TargetKind, TranslatedState};
#[cfg(windows)]
use crate::translate;

/// Sink for rumble events: `(user_id, left_motor, right_motor)`, motors
/// normalized to `0..=1`.
pub type RumbleCallback = Arc<dyn Fn(i32, f32, f32) + Send + Sync>;

/// Notification that a synthetic appeared or disappeared: `(id, connected)`.
pub type ConnectCallback = Arc<dyn Fn(i32, bool) + Send + Sync>;

/// Bookkeeping for one registered synthetic.
#[derive(Debug, Clone)]
pub struct VirtualDeviceRecord {
    /// Session-unique small integer, assigned as lowest free.
    pub id: i32,
    pub kind: TargetKind,
    /// Source controller this synthetic mirrors.
    pub user_id: i32,
    /// Label for presentation.
    pub source_name: String,
    /// Cleared when a submission fails; the lifecycle pass rebuilds.
    pub connected: bool,
    pub last_update: u64,
    /// Bus serial; owned here, released exactly once.
    serial: u32,
}

struct ManagerShared {
    devices: Mutex<Vec<VirtualDeviceRecord>>,
    retry: Mutex<VecDeque<TranslatedState>>,
    rumble_callback: Mutex<Option<RumbleCallback>>,
    connect_callback: Mutex<Option<ConnectCallback>>,
    rumble_enabled: AtomicBool,
    rumble_intensity: Mutex<f32>,
    next_serial: AtomicU32,
    hiding_enabled: AtomicBool,
    hide_unavailable_logged: AtomicBool,
    #[cfg(windows)]
    bus: Mutex<Option<bus::BusClient>>,
    #[cfg(windows)]
    listeners: Mutex<std::collections::HashMap<u32, bus::NotificationListener>>,
    #[cfg(windows)]
    hide: Mutex<Option<hidhide::HideDriver>>,
}

impl ManagerShared {
    fn new() -> Self {
        Self {
            devices: Mutex::new(Vec::new()),
            retry: Mutex::new(VecDeque::new()),
            rumble_callback: Mutex::new(None),
            connect_callback: Mutex::new(None),
            rumble_enabled: AtomicBool::new(true),
            rumble_intensity: Mutex::new(1.0),
            next_serial: AtomicU32::new(1),
            hiding_enabled: AtomicBool::new(true),
            hide_unavailable_logged: AtomicBool::new(false),
            #[cfg(windows)]
            bus: Mutex::new(None),
            #[cfg(windows)]
            listeners: Mutex::new(std::collections::HashMap::new()),
            #[cfg(windows)]
            hide: Mutex::new(None),
        }
    }
}

/// Normalize raw motor bytes, apply the configured intensity, and invoke
/// the installed rumble sink.
fn dispatch_rumble(shared: &ManagerShared, user_id: i32, large: u8, small: u8) {
    if !shared.rumble_enabled.load(Ordering::SeqCst) {
        return;
    }
    let intensity = shared
        .rumble_intensity
        .lock()
        .map(|g| *g)
        .unwrap_or(1.0);
    let left = (large as f32 / 255.0) * intensity;
    let right = (small as f32 / 255.0) * intensity;
    let callback = shared
        .rumble_callback
        .lock()
        .ok()
        .and_then(|g| g.clone());
    if let Some(callback) = callback {
        callback(user_id, left, right);
    }
}

fn lowest_free_id(devices: &[VirtualDeviceRecord]) -> i32 {
    let mut id = 0;
    while devices.iter().any(|d| d.id == id) {
        id += 1;
    }
    id
}

/// The virtual device manager. Clones share one device set.
#[derive(Clone)]
pub struct VirtualDeviceManager {
    shared: Arc<ManagerShared>,
}

impl Default for VirtualDeviceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualDeviceManager {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(ManagerShared::new()),
        }
    }

    /// Connect to the virtual bus.
    ///
    /// Failure is not fatal to the proxy: the scheduler continues in
    /// input-test mode where translation runs but nothing is emitted.
    pub fn initialize(&self) -> Result<()> {
        #[cfg(windows)]
        {
            let client = bus::BusClient::connect()?;
            if let Ok(mut slot) = self.shared.bus.lock() {
                *slot = Some(client);
            }
            info!("virtual bus connected");
            Ok(())
        }
        #[cfg(not(windows))]
        {
            Err(ProxyError::PlatformNotSupported("virtual bus"))
        }
    }

    pub fn is_bus_connected(&self) -> bool {
        #[cfg(windows)]
        {
            self.shared
                .bus
                .lock()
                .map(|g| g.is_some())
                .unwrap_or(false)
        }
        #[cfg(not(windows))]
        {
            false
        }
    }

    /// Register a synthetic of `kind` mirroring `user_id`.
    ///
    /// Returns the session-unique id, the existing id when that mapping
    /// already exists, or a negative value on failure.
    #[cfg(windows)]
    pub fn create(&self, kind: TargetKind, user_id: i32, source_name: &str) -> i32 {
        let Ok(mut devices) = self.shared.devices.lock() else {
            return -1;
        };
        if let Some(existing) = devices
            .iter()
            .find(|d| d.kind == kind && d.user_id == user_id)
        {
            return existing.id;
        }

        let id = lowest_free_id(&devices);
        let serial = self.shared.next_serial.fetch_add(1, Ordering::SeqCst);

        let Some(client) = self.shared.bus.lock().ok().and_then(|g| g.clone()) else {
            return -1;
        };
        if let Err(e) = client.plugin_target(serial, kind) {
            warn!("failed to register synthetic for user {user_id}: {e}");
            return -1;
        }
        if kind == TargetKind::XInput {
            // The listener only keeps a weak path back to the manager,
            // so its callbacks cannot outlive teardown.
            let weak = Arc::downgrade(&self.shared);
            let listener = client.listen_xusb_notifications(serial, move |large, small, _led| {
                if let Some(shared) = weak.upgrade() {
                    dispatch_rumble(&shared, user_id, large, small);
                }
            });
            if let Ok(mut listeners) = self.shared.listeners.lock() {
                listeners.insert(serial, listener);
            }
        }

        devices.push(VirtualDeviceRecord {
            id,
            kind,
            user_id,
            source_name: source_name.to_string(),
            connected: true,
            last_update: 0,
            serial,
        });
        drop(devices);
        info!("created synthetic {kind:?} (id {id}) for {source_name}");
        self.fire_connect(id, true);
        id
    }

    /// Register a synthetic of `kind` mirroring `user_id`.
    ///
    /// No bus exists off-target, so creation always fails negative.
    #[cfg(not(windows))]
    pub fn create(&self, kind: TargetKind, user_id: i32, source_name: &str) -> i32 {
        let _ = (kind, user_id, source_name);
        -1
    }

    /// Unregister and free one synthetic.
    pub fn destroy(&self, id: i32) -> bool {
        let record = {
            let Ok(mut devices) = self.shared.devices.lock() else {
                return false;
            };
            let index = devices.iter().position(|d| d.id == id);
            index.map(|i| devices.remove(i))
        };
        let Some(record) = record else {
            return false;
        };

        #[cfg(windows)]
        {
            // Notifications unregister before the target is freed.
            if let Ok(mut listeners) = self.shared.listeners.lock() {
                listeners.remove(&record.serial);
            }
            let client = self.shared.bus.lock().ok().and_then(|g| g.clone());
            if let Some(client) = client {
                if let Err(e) = client.unplug_target(record.serial) {
                    warn!("failed to unplug synthetic {id}: {e}");
                }
            }
        }

        info!(
            "destroyed synthetic {:?} (id {id}) for {}",
            record.kind, record.source_name
        );
        self.fire_connect(id, false);
        true
    }

    /// Route translated states to their synthetics, inline first.
    ///
    /// Earlier failures queued for retry are drained ahead of the fresh
    /// states; a failed submission marks its record disconnected and
    /// re-queues the state for the next tick.
    pub fn send(&self, states: &[TranslatedState]) {
        let retries: Vec<TranslatedState> = self
            .shared
            .retry
            .lock()
            .map(|mut q| q.drain(..).collect())
            .unwrap_or_default();
        for state in retries.iter().chain(states.iter()) {
            self.send_one(state);
        }
    }

    #[cfg(windows)]
    fn send_one(&self, state: &TranslatedState) {
        let client = self.shared.bus.lock().ok().and_then(|g| g.clone());
        let Some(client) = client else {
            return;
        };

        let Ok(mut devices) = self.shared.devices.lock() else {
            return;
        };
        let Some(record) = devices.iter_mut().find(|d| {
            d.kind == state.target && d.user_id == state.source_user_id && d.connected
        }) else {
            return;
        };

        let submitted = match state.target {
            TargetKind::XInput => {
                let report = report::XusbReport::from(&translate::to_xinput(state));
                client.submit_xusb(record.serial, &report)
            }
            TargetKind::DInput => {
                let report = report::DualAnalogReport::from(&translate::to_dinput(state));
                client.submit_dual_analog(record.serial, &report)
            }
        };

        match submitted {
            Ok(()) => record.last_update = state.timestamp,
            Err(e) => {
                warn!("synthetic update failed, queueing for rebuild: {e}");
                record.connected = false;
                drop(devices);
                if let Ok(mut retry) = self.shared.retry.lock() {
                    retry.push_back(*state);
                }
            }
        }
    }

    #[cfg(not(windows))]
    fn send_one(&self, _state: &TranslatedState) {}

    /// Copies of the current records, for lifecycle and presentation.
    pub fn records(&self) -> Vec<VirtualDeviceRecord> {
        self.shared
            .devices
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }

    pub fn device_count(&self) -> usize {
        self.shared.devices.lock().map(|d| d.len()).unwrap_or(0)
    }

    pub fn set_rumble_callback(&self, callback: RumbleCallback) {
        if let Ok(mut slot) = self.shared.rumble_callback.lock() {
            *slot = Some(callback);
        }
    }

    pub fn set_device_connect_callback(&self, callback: ConnectCallback) {
        if let Ok(mut slot) = self.shared.connect_callback.lock() {
            *slot = Some(callback);
        }
    }

    /// Toggle rumble and kick a test pulse through every active mapping
    /// so the change is immediately felt.
    pub fn set_rumble_enabled(&self, enabled: bool) {
        self.shared.rumble_enabled.store(enabled, Ordering::SeqCst);
        self.synthesize_rumble_pulse(if enabled { 1.0 } else { 0.0 });
    }

    /// Set the rumble intensity scale and kick a test pulse.
    pub fn set_rumble_intensity(&self, intensity: f32) {
        let clamped = intensity.clamp(0.0, 1.0);
        if let Ok(mut slot) = self.shared.rumble_intensity.lock() {
            *slot = clamped;
        }
        if self.shared.rumble_enabled.load(Ordering::SeqCst) {
            self.synthesize_rumble_pulse(clamped);
        }
    }

    /// Feed one feedback notification through the rumble path exactly as
    /// a bus notification would arrive: normalize, scale, invoke sink.
    pub fn notify_rumble(&self, user_id: i32, large_motor: u8, small_motor: u8) {
        dispatch_rumble(&self.shared, user_id, large_motor, small_motor);
    }

    fn synthesize_rumble_pulse(&self, level: f32) {
        let callback = self
            .shared
            .rumble_callback
            .lock()
            .ok()
            .and_then(|g| g.clone());
        let Some(callback) = callback else {
            return;
        };
        for record in self.records() {
            if record.kind == TargetKind::XInput && record.connected {
                callback(record.user_id, level, level);
            }
        }
    }

    pub fn enable_device_hiding(&self, enabled: bool) {
        self.shared.hiding_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_device_hiding_enabled(&self) -> bool {
        self.shared.hiding_enabled.load(Ordering::SeqCst)
    }

    /// Connect to the hiding driver and activate it. An absent driver is
    /// logged once per session and hiding quietly disables.
    pub fn connect_hiding(&self) -> bool {
        #[cfg(windows)]
        {
            match hidhide::HideDriver::connect() {
                Ok(driver) => {
                    if let Err(e) = driver.set_active(true) {
                        warn!("hide driver refused activation: {e}");
                    }
                    if let Ok(mut slot) = self.shared.hide.lock() {
                        *slot = Some(driver);
                    }
                    true
                }
                Err(e) => {
                    self.log_hide_unavailable(&e.to_string());
                    self.shared.hiding_enabled.store(false, Ordering::SeqCst);
                    false
                }
            }
        }
        #[cfg(not(windows))]
        {
            self.log_hide_unavailable("not supported on this platform");
            self.shared.hiding_enabled.store(false, Ordering::SeqCst);
            false
        }
    }

    fn log_hide_unavailable(&self, reason: &str) {
        if !self
            .shared
            .hide_unavailable_logged
            .swap(true, Ordering::SeqCst)
        {
            warn!("device hiding unavailable: {reason}");
        }
    }

    /// Blacklist one identity with the hiding driver.
    pub fn add_to_blacklist(&self, identity: &str) -> bool {
        #[cfg(windows)]
        {
            let guard = self.shared.hide.lock();
            if let Ok(guard) = guard {
                if let Some(driver) = guard.as_ref() {
                    match driver.add_to_blacklist(identity) {
                        Ok(()) => return true,
                        Err(e) => {
                            warn!("failed to hide {identity}: {e}");
                            return false;
                        }
                    }
                }
            }
            false
        }
        #[cfg(not(windows))]
        {
            let _ = identity;
            false
        }
    }

    pub fn remove_from_blacklist(&self, identity: &str) -> bool {
        #[cfg(windows)]
        {
            let guard = self.shared.hide.lock();
            if let Ok(guard) = guard {
                if let Some(driver) = guard.as_ref() {
                    match driver.remove_from_blacklist(identity) {
                        Ok(()) => return true,
                        Err(e) => {
                            warn!("failed to unhide {identity}: {e}");
                            return false;
                        }
                    }
                }
            }
            false
        }
        #[cfg(not(windows))]
        {
            let _ = identity;
            false
        }
    }

    pub fn disconnect_hiding(&self) {
        #[cfg(windows)]
        if let Ok(mut slot) = self.shared.hide.lock() {
            slot.take();
        }
    }

    /// Destroy every synthetic and disconnect from the bus and the
    /// hiding driver.
    pub fn shutdown(&self) {
        let ids: Vec<i32> = self.records().iter().map(|r| r.id).collect();
        for id in ids {
            self.destroy(id);
        }
        #[cfg(windows)]
        if let Ok(mut slot) = self.shared.bus.lock() {
            slot.take();
        }
        self.disconnect_hiding();
    }

    fn fire_connect(&self, id: i32, connected: bool) {
        let callback = self
            .shared
            .connect_callback
            .lock()
            .ok()
            .and_then(|g| g.clone());
        if let Some(callback) = callback {
            callback(id, connected);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn record(id: i32, kind: TargetKind, user_id: i32) -> VirtualDeviceRecord {
        VirtualDeviceRecord {
            id,
            kind,
            user_id,
            source_name: String::new(),
            connected: true,
            last_update: 0,
            serial: id as u32 + 1,
        }
    }

    #[test]
    fn ids_are_assigned_lowest_free() {
        assert_eq!(lowest_free_id(&[]), 0);
        let devices = vec![
            record(0, TargetKind::XInput, 0),
            record(1, TargetKind::DInput, 0),
            record(3, TargetKind::XInput, 1),
        ];
        assert_eq!(lowest_free_id(&devices), 2);
    }

    #[test]
    fn rumble_dispatch_normalizes_motors() {
        let shared = ManagerShared::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        *shared.rumble_callback.lock().unwrap() = Some(Arc::new(move |user, left, right| {
            sink.lock().unwrap().push((user, left, right));
        }));

        dispatch_rumble(&shared, 1, 255, 0);
        let calls = seen.lock().unwrap().clone();
        assert_eq!(calls.len(), 1, "callback fires exactly once");
        let (user, left, right) = calls[0];
        assert_eq!(user, 1);
        assert!((left - 1.0).abs() < 1e-6);
        assert_eq!(right, 0.0);
    }

    #[test]
    fn rumble_respects_intensity_and_enable() {
        let shared = ManagerShared::new();
        let count = Arc::new(AtomicUsize::new(0));
        let last = Arc::new(Mutex::new((0.0f32, 0.0f32)));
        let (count_sink, last_sink) = (count.clone(), last.clone());
        *shared.rumble_callback.lock().unwrap() = Some(Arc::new(move |_, left, right| {
            count_sink.fetch_add(1, Ordering::SeqCst);
            *last_sink.lock().unwrap() = (left, right);
        }));

        *shared.rumble_intensity.lock().unwrap() = 0.5;
        dispatch_rumble(&shared, 0, 255, 255);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        let (left, right) = *last.lock().unwrap();
        assert!((left - 0.5).abs() < 1e-6);
        assert!((right - 0.5).abs() < 1e-6);

        shared.rumble_enabled.store(false, Ordering::SeqCst);
        dispatch_rumble(&shared, 0, 255, 255);
        assert_eq!(count.load(Ordering::SeqCst), 1, "disabled rumble is dropped");
    }

    #[test]
    fn rumble_without_callback_is_harmless() {
        let shared = ManagerShared::new();
        dispatch_rumble(&shared, 0, 128, 128);
    }

    #[cfg(not(windows))]
    #[test]
    fn create_without_a_bus_fails_negative() {
        let manager = VirtualDeviceManager::new();
        assert!(manager.initialize().is_err());
        assert!(manager.create(TargetKind::XInput, 0, "pad") < 0);
        assert_eq!(manager.device_count(), 0);
        assert!(!manager.destroy(0));
    }

    #[test]
    fn send_without_devices_is_a_no_op() {
        let manager = VirtualDeviceManager::new();
        let state = TranslatedState {
            source_user_id: 0,
            is_xinput_source: true,
            gamepad: Default::default(),
            timestamp: 1,
            target: TargetKind::XInput,
        };
        manager.send(&[state]);
        assert_eq!(manager.device_count(), 0);
    }

    #[test]
    fn hiding_disables_after_failed_connect() {
        let manager = VirtualDeviceManager::new();
        manager.enable_device_hiding(true);
        assert!(manager.is_device_hiding_enabled());
        // No driver in the test environment; hiding must shut itself off.
        if !manager.connect_hiding() {
            assert!(!manager.is_device_hiding_enabled());
        }
    }
}
