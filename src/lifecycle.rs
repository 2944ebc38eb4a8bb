//! Device lifecycle management.
//!
//! Walks the capture snapshot once per cycle and keeps the synthetic
//! population in step with it: hides newly connected physical HID pads,
//! creates the synthetics each enabled mapping direction calls for,
//! destroys them on disconnect, and rebuilds any synthetic whose record
//! went stale after a failed bus submission.
//!
//! Hiding bookkeeping is sticky for the session: an identity is never
//! blacklisted twice, and one that failed to hide is not retried until
//! the next run. Everything this session hid is unhidden at cleanup.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::info;

use crate::capture::ControllerState;
use crate::clock;
use crate::emulator::VirtualDeviceManager;
use crate::gamepad::TargetKind;

/// Rescan cadence with no controllers connected.
pub const SCAN_INTERVAL_EMPTY_US: u64 = 5_000_000;
/// Rescan cadence while controllers are connected.
pub const SCAN_INTERVAL_POPULATED_US: u64 = 30_000_000;
/// Pause between hiding a device and creating its synthetic, giving the
/// host time to settle after the device disappears.
pub const HIDE_SETTLE_US: u64 = 100_000;

/// The synthetics one connected controller should have, given the
/// enabled mapping directions.
pub fn desired_synthetics(
    state: &ControllerState,
    xinput_to_dinput: bool,
    dinput_to_xinput: bool,
) -> Vec<(TargetKind, String)> {
    let mut desired = Vec::new();
    if xinput_to_dinput {
        let name = if state.product_name.is_empty() {
            format!("Xbox 360 Controller (User {})", state.user_id)
        } else {
            state.product_name.clone()
        };
        desired.push((TargetKind::DInput, name));
    }
    if dinput_to_xinput {
        let name = if state.product_name.is_empty() {
            "HID Device".to_string()
        } else {
            state.product_name.clone()
        };
        desired.push((TargetKind::XInput, name));
    }
    desired
}

/// Whether this entry is eligible for hiding: only pure HID devices are
/// ever blacklisted (vendor-API traffic bypasses the HID stack), and
/// only when the HID-to-XInput direction is actually in use.
pub fn hide_eligible(state: &ControllerState, dinput_to_xinput: bool) -> bool {
    state.user_id < 0 && dinput_to_xinput && !state.device_instance_id.is_empty()
}

#[derive(Default)]
pub struct DeviceLifecycleManager {
    hidden: BTreeSet<String>,
    failed_hide: BTreeSet<String>,
    /// Identity to the tick when synthetic creation may proceed.
    settle_until: HashMap<String, u64>,
    active_xinput: BTreeMap<i32, i32>,
    active_dinput: BTreeMap<i32, i32>,
}

impl DeviceLifecycleManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hidden_count(&self) -> usize {
        self.hidden.len()
    }

    pub fn active_xinput_count(&self) -> usize {
        self.active_xinput.len()
    }

    pub fn active_dinput_count(&self) -> usize {
        self.active_dinput.len()
    }

    /// One lifecycle pass over the capture snapshot.
    pub fn process(
        &mut self,
        states: &[ControllerState],
        manager: &VirtualDeviceManager,
        xinput_to_dinput: bool,
        dinput_to_xinput: bool,
        translation_enabled: bool,
        hiding_enabled: bool,
    ) {
        let now = clock::now();
        self.rebuild_stale(manager);

        for state in states {
            if state.is_connected && translation_enabled {
                if hiding_enabled
                    && manager.is_device_hiding_enabled()
                    && hide_eligible(state, dinput_to_xinput)
                {
                    self.hide_device(state, manager, now);
                }
                self.create_missing(state, manager, xinput_to_dinput, dinput_to_xinput, now);
            } else if !state.is_connected {
                self.destroy_for_user(state.user_id, manager);
            }
        }
    }

    /// Drop mappings whose synthetic records went stale (send failure or
    /// external removal) so the next pass recreates them.
    fn rebuild_stale(&mut self, manager: &VirtualDeviceManager) {
        let records = manager.records();
        let alive =
            |id: i32| records.iter().any(|r| r.id == id && r.connected);

        for map in [&mut self.active_xinput, &mut self.active_dinput] {
            let stale: Vec<(i32, i32)> = map
                .iter()
                .filter(|(_, &id)| !alive(id))
                .map(|(&user, &id)| (user, id))
                .collect();
            for (user, id) in stale {
                manager.destroy(id);
                map.remove(&user);
            }
        }
    }

    fn hide_device(&mut self, state: &ControllerState, manager: &VirtualDeviceManager, now: u64) {
        let id = &state.device_instance_id;
        if self.hidden.contains(id) || self.failed_hide.contains(id) {
            return;
        }
        if manager.add_to_blacklist(id) {
            self.hidden.insert(id.clone());
            self.settle_until
                .insert(id.clone(), now + clock::us_to_ticks(HIDE_SETTLE_US));
            info!("hidden physical device {id}");
        } else {
            // Remembered so a stubborn device is not re-attempted every
            // millisecond for the rest of the session.
            self.failed_hide.insert(id.clone());
        }
    }

    fn create_missing(
        &mut self,
        state: &ControllerState,
        manager: &VirtualDeviceManager,
        xinput_to_dinput: bool,
        dinput_to_xinput: bool,
        now: u64,
    ) {
        // A freshly hidden device gets a settle pause before its
        // synthetic twin appears.
        if let Some(&until) = self.settle_until.get(&state.device_instance_id) {
            if now < until {
                return;
            }
        }

        for (kind, name) in desired_synthetics(state, xinput_to_dinput, dinput_to_xinput) {
            let map = match kind {
                TargetKind::XInput => &mut self.active_xinput,
                TargetKind::DInput => &mut self.active_dinput,
            };
            if map.contains_key(&state.user_id) {
                continue;
            }
            let id = manager.create(kind, state.user_id, &name);
            if id >= 0 {
                map.insert(state.user_id, id);
            }
        }
    }

    fn destroy_for_user(&mut self, user_id: i32, manager: &VirtualDeviceManager) {
        if let Some(id) = self.active_xinput.remove(&user_id) {
            manager.destroy(id);
        }
        if let Some(id) = self.active_dinput.remove(&user_id) {
            manager.destroy(id);
        }
    }

    /// Undo every session effect: unhide what this session hid, destroy
    /// every synthetic, disconnect from the hiding driver.
    pub fn cleanup(&mut self, manager: &VirtualDeviceManager) {
        for id in std::mem::take(&mut self.hidden) {
            if manager.remove_from_blacklist(&id) {
                info!("unhidden physical device {id}");
            }
        }
        self.failed_hide.clear();
        self.settle_until.clear();

        for (_, id) in std::mem::take(&mut self.active_xinput) {
            manager.destroy(id);
        }
        for (_, id) in std::mem::take(&mut self.active_dinput) {
            manager.destroy(id);
        }
        manager.disconnect_hiding();
    }
}
