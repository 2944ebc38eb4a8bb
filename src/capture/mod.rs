//! Physical controller capture.
//!
//! Owns the per-device [`ControllerState`] set and keeps it fresh at the
//! polling rate. Two device families feed it:
//!
//! - **Vendor-API slots** (0..=3): fixed four-slot polling. A slot only
//!   reports data once enumeration has matched a physical HID identity to
//!   it, which prevents the several interfaces of one composite pad from
//!   filling multiple slots.
//! - **Pure HID devices**: enumerated by interface, opened with overlapped
//!   I/O, decoded through their own capability tables.
//!
//! Identity reconciliation, slot assignment, and poll-result bookkeeping
//! are plain functions over the state vector so they stay testable without
//! devices; the OS-facing half lives in [`windows`].

pub mod decoder;
pub mod profiles;
pub mod recorder;
#[cfg(windows)]
pub mod windows;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::{info, warn};

use crate::capture::decoder::CapabilityTable;
use crate::capture::recorder::InputRecorder;
use crate::error::Result;
use crate::gamepad::Gamepad;
use crate::identity;

/// Number of pre-allocated vendor-API slots.
pub const VENDOR_SLOT_COUNT: usize = 4;

/// Size of the per-entry overlapped read buffer.
pub const HID_READ_BUFFER_LEN: usize = 512;

/// OS error code reported for empty vendor slots.
pub const ERROR_DEVICE_NOT_CONNECTED: u32 = 1167;

/// Identity substrings of the synthetics our own bus emits. Matching
/// interfaces are excluded from capture to avoid feeding the proxy its
/// own output.
const SYNTHETIC_ID_PATTERNS: &[&str] = &[
    "VID_044F&PID_B326", // bus-emitted Xbox 360 pad
    "VID_054C&PID_05C4", // bus-emitted dual-analog pad
];

/// Last state observed through the vendor API for a slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawVendorState {
    pub packet_number: u32,
    pub gamepad: Gamepad,
}

/// Tracked state of one physical device (or one vendor-API slot).
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerState {
    /// Vendor slot 0..=3, or `-1` for pure HID devices.
    pub user_id: i32,
    /// Canonical identity; stable across replugs, empty until matched.
    pub device_instance_id: String,
    /// Transient OS path used to open handles.
    pub device_path: String,
    pub product_name: String,
    pub is_connected: bool,
    pub last_error: u32,
    pub raw_xinput: RawVendorState,
    /// Canonical state decoded from the latest HID report.
    pub gamepad: Gamepad,
    /// HID button usages currently asserted.
    pub active_buttons: BTreeSet<u16>,
    /// HID axis usage to logical value.
    pub hid_values: BTreeMap<u16, i32>,
    pub capability_table: CapabilityTable,
    pub read_in_flight: bool,
    /// Capture-counter tick of the last update.
    pub timestamp: u64,
}

impl ControllerState {
    /// Pre-allocated vendor slot, disconnected until matched and polled.
    pub fn vendor_slot(user_id: i32) -> Self {
        Self {
            user_id,
            device_instance_id: String::new(),
            device_path: String::new(),
            product_name: String::new(),
            is_connected: false,
            last_error: ERROR_DEVICE_NOT_CONNECTED,
            raw_xinput: RawVendorState::default(),
            gamepad: Gamepad::default(),
            active_buttons: BTreeSet::new(),
            hid_values: BTreeMap::new(),
            capability_table: CapabilityTable::default(),
            read_in_flight: false,
            timestamp: 0,
        }
    }

    /// New pure-HID entry after a successful open.
    pub fn hid_entry(
        identity: String,
        device_path: String,
        product_name: String,
        caps: CapabilityTable,
        now: u64,
    ) -> Self {
        Self {
            user_id: -1,
            device_instance_id: identity,
            device_path,
            product_name,
            is_connected: true,
            last_error: 0,
            raw_xinput: RawVendorState::default(),
            gamepad: Gamepad::default(),
            active_buttons: BTreeSet::new(),
            hid_values: BTreeMap::new(),
            capability_table: caps,
            read_in_flight: false,
            timestamp: now,
        }
    }

    /// The canonical gamepad for this entry's source family.
    pub fn effective_gamepad(&self) -> Gamepad {
        if self.user_id >= 0 {
            self.raw_xinput.gamepad
        } else {
            self.gamepad
        }
    }
}

/// One HID interface as reported by enumeration, with everything needed
/// for filtering and reconciliation already fetched.
#[derive(Debug, Clone, Default)]
pub struct EnumeratedInterface {
    pub device_path: String,
    pub product_name: String,
    pub caps: CapabilityTable,
    /// OS device property flag set on bus-emitted synthetics.
    pub synthetic_property: bool,
}

impl EnumeratedInterface {
    /// Either signal is sufficient to classify the interface as one of
    /// our own synthetics.
    pub fn is_synthetic(&self) -> bool {
        if self.synthetic_property {
            return true;
        }
        let upper = self.device_path.to_ascii_uppercase();
        SYNTHETIC_ID_PATTERNS.iter().any(|p| upper.contains(p))
    }
}

/// Where a scanned interface ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDisposition {
    /// Synthetic, unrecognized path, or non-game collection.
    Filtered,
    /// Matched an existing entry by identity; path refreshed.
    Rematched,
    /// Assigned to the vendor slot carried in the payload.
    SlotAssigned(usize),
    /// Another interface of the same composite device already holds a slot.
    DuplicateComposite,
    /// Vendor-capable but all four slots are taken.
    NoFreeSlot,
    /// A new pure-HID device; the caller must open a channel and append
    /// the entry on success.
    NewHid,
}

/// Reconcile one enumerated interface against the tracked state set.
///
/// Pure over its inputs; opening device handles is the caller's job so
/// the decision logic stays testable.
pub fn reconcile_interface(
    states: &mut [ControllerState],
    iface: &EnumeratedInterface,
    now: u64,
) -> ScanDisposition {
    if iface.is_synthetic() {
        return ScanDisposition::Filtered;
    }
    if !iface.caps.is_game_control() {
        return ScanDisposition::Filtered;
    }

    let id = identity::extract_identity(&iface.device_path);
    if id.is_empty() {
        return ScanDisposition::Filtered;
    }

    // Existing entry (slot or HID) comes back after a replug with a
    // possibly different path; identity is the stable key.
    if let Some(state) = states
        .iter_mut()
        .find(|s| !s.device_instance_id.is_empty() && s.device_instance_id == id)
    {
        state.device_path = iface.device_path.clone();
        state.is_connected = true;
        state.timestamp = now;
        if state.product_name.is_empty() {
            state.product_name = iface.product_name.clone();
        }
        return ScanDisposition::Rematched;
    }

    if identity::is_vendor_capable(&id) {
        let base = identity::base_identity(&id);
        if base.is_empty() {
            return ScanDisposition::Filtered;
        }

        // One composite controller exposes several interfaces that share
        // a base identity; only the first of them takes a slot.
        let already_assigned = states.iter().any(|s| {
            s.user_id >= 0
                && !s.device_instance_id.is_empty()
                && identity::base_identity(&s.device_instance_id) == base
        });
        if already_assigned {
            return ScanDisposition::DuplicateComposite;
        }

        let free = states
            .iter_mut()
            .filter(|s| s.user_id >= 0)
            .find(|s| s.device_instance_id.is_empty());
        match free {
            Some(slot) => {
                slot.device_instance_id = id;
                slot.device_path = iface.device_path.clone();
                slot.product_name = iface.product_name.clone();
                slot.is_connected = true;
                slot.timestamp = now;
                ScanDisposition::SlotAssigned(slot.user_id as usize)
            }
            None => ScanDisposition::NoFreeSlot,
        }
    } else {
        ScanDisposition::NewHid
    }
}

/// Result of polling one vendor-API slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VendorPoll {
    Success { packet_number: u32, gamepad: Gamepad },
    NotConnected,
    Error(u32),
}

/// Fold a vendor poll result into a slot entry.
///
/// Unmatched slots report disconnected regardless of the poll result. A
/// matched slot that fails its poll loses its identity so a rescan can
/// rematch it.
pub fn apply_vendor_poll(state: &mut ControllerState, poll: VendorPoll, now: u64) {
    debug_assert!(state.user_id >= 0);
    state.timestamp = now;

    if state.device_instance_id.is_empty() {
        state.is_connected = false;
        state.last_error = ERROR_DEVICE_NOT_CONNECTED;
        return;
    }

    match poll {
        VendorPoll::Success { packet_number, gamepad } => {
            state.raw_xinput = RawVendorState { packet_number, gamepad };
            state.is_connected = true;
            state.last_error = 0;
        }
        VendorPoll::NotConnected => {
            state.is_connected = false;
            state.device_instance_id.clear();
            state.last_error = ERROR_DEVICE_NOT_CONNECTED;
        }
        VendorPoll::Error(code) => {
            state.is_connected = false;
            state.device_instance_id.clear();
            state.last_error = code;
        }
    }
}

/// Classification of a failed HID read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadFailure {
    /// Overlapped read still pending; not an error.
    Incomplete,
    /// Device is gone; the entry disconnects but keeps its identity.
    Disconnected(u32),
    /// Anything else; retried next tick without state change.
    Transient(u32),
}

/// Fold a completed HID report into its entry: store the extracted
/// usages/values and re-decode the canonical gamepad.
pub fn apply_hid_input(
    state: &mut ControllerState,
    active_buttons: BTreeSet<u16>,
    hid_values: BTreeMap<u16, i32>,
    now: u64,
) {
    state.active_buttons = active_buttons;
    state.hid_values = hid_values;
    state.gamepad = decoder::decode(
        &state.active_buttons,
        &state.hid_values,
        &state.capability_table,
        &state.product_name,
    );
    state.is_connected = true;
    state.last_error = 0;
    state.timestamp = now;
}

/// Fold a failed HID read into its entry per the failure class.
pub fn apply_hid_read_failure(state: &mut ControllerState, failure: ReadFailure) {
    match failure {
        ReadFailure::Incomplete => {}
        ReadFailure::Disconnected(code) => {
            state.read_in_flight = false;
            state.is_connected = false;
            state.last_error = code;
        }
        ReadFailure::Transient(code) => {
            state.read_in_flight = false;
            state.last_error = code;
        }
    }
}

struct EngineShared {
    states: Mutex<Vec<ControllerState>>,
    recorder: Mutex<InputRecorder>,
    running: AtomicBool,
    #[cfg(windows)]
    channels: Mutex<std::collections::HashMap<String, windows::HidChannel>>,
    poll_thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

/// The capture engine. Cheap to clone; all clones share one state set.
#[derive(Clone)]
pub struct CaptureEngine {
    shared: Arc<EngineShared>,
}

impl Default for CaptureEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureEngine {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(EngineShared {
                states: Mutex::new(Vec::new()),
                recorder: Mutex::new(InputRecorder::new("controller_input_log.csv")),
                running: AtomicBool::new(false),
                #[cfg(windows)]
                channels: Mutex::new(std::collections::HashMap::new()),
                poll_thread: Mutex::new(None),
            }),
        }
    }

    /// Allocate the four vendor slots, then run the first HID scan.
    ///
    /// Enumeration failure here is fatal; individual device-open failures
    /// are logged and skipped.
    pub fn initialize(&self) -> Result<()> {
        {
            let mut states = self.lock_states();
            if states.is_empty() {
                for user_id in 0..VENDOR_SLOT_COUNT as i32 {
                    states.push(ControllerState::vendor_slot(user_id));
                }
            }
        }

        #[cfg(windows)]
        windows::probe_vendor_api()?;

        self.refresh_devices()?;
        info!(
            "capture initialized with {} tracked entries",
            self.lock_states().len()
        );
        Ok(())
    }

    /// Re-enumerate HID interfaces and reconcile them into the state set.
    pub fn refresh_devices(&self) -> Result<()> {
        #[cfg(windows)]
        {
            let interfaces = windows::enumerate_interfaces()?;
            let now = crate::clock::now();
            for iface in interfaces {
                let disposition = {
                    let mut states = self.lock_states();
                    reconcile_interface(&mut states, &iface, now)
                };
                match disposition {
                    ScanDisposition::NewHid => self.open_hid_entry(&iface, now),
                    ScanDisposition::SlotAssigned(slot) => {
                        info!(
                            "matched vendor-capable device to slot {slot}: {}",
                            iface.product_name
                        );
                    }
                    ScanDisposition::NoFreeSlot => {
                        warn!("no free vendor slot for {}", iface.device_path);
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    #[cfg(windows)]
    fn open_hid_entry(&self, iface: &EnumeratedInterface, now: u64) {
        let id = identity::extract_identity(&iface.device_path);
        match windows::HidChannel::open(&iface.device_path) {
            Ok(channel) => {
                let entry = ControllerState::hid_entry(
                    id.clone(),
                    iface.device_path.clone(),
                    iface.product_name.clone(),
                    iface.caps.clone(),
                    now,
                );
                info!("HID device found: {}", iface.product_name);
                self.lock_states().push(entry);
                if let Ok(mut channels) = self.shared.channels.lock() {
                    channels.insert(id, channel);
                }
            }
            Err(e) => warn!("skipping device that failed to open: {e}"),
        }
    }

    /// Poll both families once. Safe from any thread; the engine's own
    /// polling thread calls this when enabled.
    pub fn update(&self, _delta_us: f64) {
        #[cfg(windows)]
        {
            self.poll_vendor_slots();
            self.poll_hid_devices();
        }

        let states = self.snapshot();
        if let Ok(mut recorder) = self.shared.recorder.lock() {
            recorder.record(&states);
        }
    }

    #[cfg(windows)]
    fn poll_vendor_slots(&self) {
        let now = crate::clock::now();
        let mut states = self.lock_states();
        for state in states.iter_mut().filter(|s| s.user_id >= 0) {
            let poll = windows::poll_vendor_slot(state.user_id as u32);
            apply_vendor_poll(state, poll, now);
        }
    }

    #[cfg(windows)]
    fn poll_hid_devices(&self) {
        let now = crate::clock::now();
        let mut states = self.lock_states();
        let Ok(mut channels) = self.shared.channels.lock() else {
            return;
        };
        for state in states.iter_mut().filter(|s| s.user_id < 0) {
            let Some(channel) = channels.get_mut(&state.device_instance_id) else {
                continue;
            };
            windows::service_channel(state, channel, now);
        }
    }

    /// Deep copy of every tracked entry.
    pub fn snapshot(&self) -> Vec<ControllerState> {
        self.lock_states().clone()
    }

    pub fn connected_count(&self) -> usize {
        self.lock_states().iter().filter(|s| s.is_connected).count()
    }

    /// Write motor speeds to the vendor-API device at `user_id`.
    /// No-op outside 0..=3.
    pub fn set_vibration(&self, user_id: i32, left: f32, right: f32) {
        if !(0..VENDOR_SLOT_COUNT as i32).contains(&user_id) {
            return;
        }
        #[cfg(windows)]
        windows::set_vendor_vibration(user_id as u32, left, right);
        #[cfg(not(windows))]
        let _ = (left, right);
    }

    /// Toggle the per-tick input CSV recorder.
    pub fn set_input_recording(&self, enabled: bool) {
        if let Ok(mut recorder) = self.shared.recorder.lock() {
            recorder.set_enabled(enabled);
        }
    }

    pub fn set_input_log_path(&self, path: &str) {
        if let Ok(mut recorder) = self.shared.recorder.lock() {
            recorder.set_path(path);
        }
    }

    /// Run `update` on a dedicated high-priority thread until shutdown.
    pub fn start_polling_thread(&self) {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let engine = self.clone();
        let handle = std::thread::Builder::new()
            .name("padproxy-capture".into())
            .spawn(move || {
                crate::threading::set_current_thread_time_critical();
                while engine.shared.running.load(Ordering::SeqCst) {
                    engine.update(0.0);
                    std::thread::sleep(std::time::Duration::from_micros(100));
                }
            });
        match handle {
            Ok(handle) => {
                if let Ok(mut slot) = self.shared.poll_thread.lock() {
                    *slot = Some(handle);
                }
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::SeqCst);
                warn!("failed to spawn capture thread: {e}");
            }
        }
    }

    /// Stop the polling thread (if any) and release every device handle.
    pub fn shutdown(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Ok(mut slot) = self.shared.poll_thread.lock() {
            if let Some(handle) = slot.take() {
                let _ = handle.join();
            }
        }
        if let Ok(mut recorder) = self.shared.recorder.lock() {
            recorder.set_enabled(false);
        }
        #[cfg(windows)]
        if let Ok(mut channels) = self.shared.channels.lock() {
            channels.clear(); // Drop closes handles and events
        }
    }

    fn lock_states(&self) -> std::sync::MutexGuard<'_, Vec<ControllerState>> {
        match self.shared.states.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
