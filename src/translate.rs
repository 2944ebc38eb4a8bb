//! Translation pipeline.
//!
//! Takes captured controller states and produces wire-ready translated
//! states for the synthetic targets. The filter order is fixed:
//!
//! 1. canonicalize from the source family
//! 2. SOCD cleaning
//! 3. debouncing
//! 4. stick deadzone and anti-deadzone
//!
//! All filters are configurable at runtime; each disabled filter is an
//! identity. The pipeline holds only the small per-user debounce state,
//! so `translate` is otherwise pure over its inputs.

use crate::capture::ControllerState;
use crate::clock;
use crate::gamepad::{Buttons, Gamepad, TargetKind, TranslatedState};

/// Debounce bookkeeping covers vendor slots and a few synthetic IDs.
const DEBOUNCE_USERS: usize = 16;

/// SOCD resolution methods.
///
/// First-Win degrades to Neutral: resolving it faithfully needs
/// per-direction press timestamps the pipeline does not carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocdMethod {
    LastWin,
    FirstWin,
    Neutral,
}

impl SocdMethod {
    pub fn from_index(index: u8) -> Self {
        match index {
            0 => SocdMethod::LastWin,
            1 => SocdMethod::FirstWin,
            _ => SocdMethod::Neutral,
        }
    }
}

/// Per-stick deadzone parameters, both in `0..=1`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StickDeadzone {
    pub cutoff: f32,
    pub anti: f32,
}

/// XInput-shaped wire state: a packet number plus the canonical gamepad,
/// copied losslessly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XInputWire {
    pub packet_number: u32,
    pub gamepad: Gamepad,
}

/// Dual-analog wire state with POV hat.
///
/// Axes keep their signed 16-bit range inside 32-bit containers; the POV
/// entries are hundredths of a degree with `-1` for centered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DInputWire {
    pub l_x: i32,
    pub l_y: i32,
    pub l_rx: i32,
    pub l_ry: i32,
    pub l_z: i32,
    pub l_rz: i32,
    pub buttons: [u8; 128],
    pub pov: [i32; 4],
    // Legacy mirror of the canonical fields.
    pub w_buttons: u16,
    pub left_trigger: u8,
    pub right_trigger: u8,
}

pub struct TranslationPipeline {
    xinput_to_dinput: bool,
    dinput_to_xinput: bool,
    socd_enabled: bool,
    socd_method: SocdMethod,
    debounce_enabled: bool,
    debounce_interval_ms: u32,
    deadzone_enabled: bool,
    left_stick: StickDeadzone,
    right_stick: StickDeadzone,
    last_change_tick: [u64; DEBOUNCE_USERS],
    last_buttons: [Buttons; DEBOUNCE_USERS],
}

impl Default for TranslationPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl TranslationPipeline {
    pub fn new() -> Self {
        Self {
            xinput_to_dinput: true,
            dinput_to_xinput: true,
            socd_enabled: true,
            socd_method: SocdMethod::Neutral,
            debounce_enabled: false,
            debounce_interval_ms: 10,
            deadzone_enabled: true,
            left_stick: StickDeadzone { cutoff: 0.15, anti: 0.0 },
            right_stick: StickDeadzone { cutoff: 0.15, anti: 0.0 },
            last_change_tick: [0; DEBOUNCE_USERS],
            last_buttons: [Buttons::empty(); DEBOUNCE_USERS],
        }
    }

    pub fn set_xinput_to_dinput(&mut self, enabled: bool) {
        self.xinput_to_dinput = enabled;
    }

    pub fn is_xinput_to_dinput_enabled(&self) -> bool {
        self.xinput_to_dinput
    }

    pub fn set_dinput_to_xinput(&mut self, enabled: bool) {
        self.dinput_to_xinput = enabled;
    }

    pub fn is_dinput_to_xinput_enabled(&self) -> bool {
        self.dinput_to_xinput
    }

    pub fn set_socd_enabled(&mut self, enabled: bool) {
        self.socd_enabled = enabled;
    }

    pub fn set_socd_method(&mut self, method: SocdMethod) {
        self.socd_method = method;
    }

    pub fn set_debounce_enabled(&mut self, enabled: bool) {
        self.debounce_enabled = enabled;
    }

    pub fn set_debounce_interval_ms(&mut self, interval_ms: u32) {
        self.debounce_interval_ms = interval_ms;
    }

    pub fn set_deadzone_enabled(&mut self, enabled: bool) {
        self.deadzone_enabled = enabled;
    }

    pub fn set_left_stick_deadzone(&mut self, cutoff: f32) {
        self.left_stick.cutoff = cutoff.clamp(0.0, 1.0);
    }

    pub fn set_right_stick_deadzone(&mut self, cutoff: f32) {
        self.right_stick.cutoff = cutoff.clamp(0.0, 1.0);
    }

    pub fn set_left_stick_anti_deadzone(&mut self, anti: f32) {
        self.left_stick.anti = anti.clamp(0.0, 1.0);
    }

    pub fn set_right_stick_anti_deadzone(&mut self, anti: f32) {
        self.right_stick.anti = anti.clamp(0.0, 1.0);
    }

    /// Load every filter setting from the resolved configuration.
    pub fn apply_settings(&mut self, settings: &crate::config::ProxySettings) {
        self.xinput_to_dinput = settings.xinput_to_dinput;
        self.dinput_to_xinput = settings.dinput_to_xinput;
        self.socd_enabled = settings.socd_enabled;
        self.socd_method = SocdMethod::from_index(settings.socd_method);
        self.debounce_enabled = settings.debouncing_enabled;
        self.debounce_interval_ms = settings.debounce_interval_ms;
        self.deadzone_enabled = settings.stick_deadzone_enabled;
        self.left_stick = StickDeadzone {
            cutoff: settings.left_stick_deadzone,
            anti: settings.left_stick_anti_deadzone,
        };
        self.right_stick = StickDeadzone {
            cutoff: settings.right_stick_deadzone,
            anti: settings.right_stick_anti_deadzone,
        };
    }

    /// Translate every classifiable state, applying the enabled filters
    /// in the fixed order.
    pub fn translate(&mut self, states: &[ControllerState]) -> Vec<TranslatedState> {
        self.translate_at(states, clock::now())
    }

    /// As [`translate`](Self::translate) with an explicit debounce clock.
    pub fn translate_at(&mut self, states: &[ControllerState], now: u64) -> Vec<TranslatedState> {
        let mut out = Vec::with_capacity(states.len());
        for state in states {
            let Some(mut translated) = self.canonicalize(state) else {
                continue;
            };

            if self.socd_enabled {
                apply_socd(&mut translated.gamepad, self.socd_method);
            }
            if self.debounce_enabled {
                translated.gamepad.buttons =
                    self.debounce(translated.source_user_id, translated.gamepad.buttons, now);
            }
            if self.deadzone_enabled {
                let (lx, ly) = apply_deadzone(
                    translated.gamepad.thumb_lx,
                    translated.gamepad.thumb_ly,
                    self.left_stick,
                );
                let (rx, ry) = apply_deadzone(
                    translated.gamepad.thumb_rx,
                    translated.gamepad.thumb_ry,
                    self.right_stick,
                );
                translated.gamepad.thumb_lx = lx;
                translated.gamepad.thumb_ly = ly;
                translated.gamepad.thumb_rx = rx;
                translated.gamepad.thumb_ry = ry;
            }

            out.push(translated);
        }
        out
    }

    /// Classify the source family and lift its state into the canonical
    /// form. Returns `None` for entries that are neither vendor-API nor
    /// HID backed.
    fn canonicalize(&self, state: &ControllerState) -> Option<TranslatedState> {
        if state.user_id >= 0 || state.raw_xinput.packet_number > 0 {
            Some(TranslatedState {
                source_user_id: state.user_id,
                is_xinput_source: true,
                gamepad: state.raw_xinput.gamepad,
                timestamp: state.timestamp,
                target: if self.xinput_to_dinput {
                    TargetKind::DInput
                } else {
                    TargetKind::XInput
                },
            })
        } else if !state.device_path.is_empty() {
            Some(TranslatedState {
                source_user_id: state.user_id,
                is_xinput_source: false,
                gamepad: state.gamepad,
                timestamp: state.timestamp,
                target: if self.dinput_to_xinput {
                    TargetKind::XInput
                } else {
                    TargetKind::DInput
                },
            })
        } else {
            None
        }
    }

    /// Suppress button changes that arrive within the debounce interval.
    ///
    /// Out-of-range user IDs bypass entirely. Only a *changed* mask can
    /// be rejected; a stable mask passes without touching the tick so a
    /// held button never blocks future edges.
    fn debounce(&mut self, user_id: i32, current: Buttons, now: u64) -> Buttons {
        if user_id < 0 || user_id >= DEBOUNCE_USERS as i32 {
            return current;
        }
        let slot = user_id as usize;
        if current == self.last_buttons[slot] {
            return current;
        }

        let interval = clock::us_to_ticks(self.debounce_interval_ms as u64 * 1000);
        if now.saturating_sub(self.last_change_tick[slot]) < interval {
            return self.last_buttons[slot];
        }
        self.last_change_tick[slot] = now;
        self.last_buttons[slot] = current;
        current
    }
}

/// Resolve simultaneous opposing DPAD directions in place.
pub fn apply_socd(gamepad: &mut Gamepad, method: SocdMethod) {
    let buttons = gamepad.buttons;
    let horizontal =
        buttons.contains(Buttons::DPAD_LEFT) && buttons.contains(Buttons::DPAD_RIGHT);
    let vertical = buttons.contains(Buttons::DPAD_UP) && buttons.contains(Buttons::DPAD_DOWN);

    match method {
        SocdMethod::LastWin => {
            // Without per-direction history the stick position is the
            // best available recency signal.
            if horizontal {
                if gamepad.thumb_lx < 0 {
                    gamepad.buttons.remove(Buttons::DPAD_RIGHT);
                } else {
                    gamepad.buttons.remove(Buttons::DPAD_LEFT);
                }
            }
            if vertical {
                if gamepad.thumb_ly > 0 {
                    gamepad.buttons.remove(Buttons::DPAD_DOWN);
                } else {
                    gamepad.buttons.remove(Buttons::DPAD_UP);
                }
            }
        }
        SocdMethod::FirstWin | SocdMethod::Neutral => {
            if horizontal {
                gamepad
                    .buttons
                    .remove(Buttons::DPAD_LEFT | Buttons::DPAD_RIGHT);
            }
            if vertical {
                gamepad
                    .buttons
                    .remove(Buttons::DPAD_UP | Buttons::DPAD_DOWN);
            }
        }
    }
}

/// Scaled radial deadzone with optional anti-deadzone.
///
/// Inside the cutoff the stick reports center. Outside it, magnitude is
/// rescaled onto the full range so the transition stays smooth, then
/// lifted by the anti-deadzone floor; direction is preserved throughout.
pub fn apply_deadzone(x: i16, y: i16, params: StickDeadzone) -> (i16, i16) {
    let cutoff = params.cutoff.clamp(0.0, 1.0);
    if cutoff <= 0.0 && params.anti <= 0.0 {
        return (x, y);
    }

    let fx = x as f32 / 32767.0;
    let fy = y as f32 / 32767.0;
    let magnitude = (fx * fx + fy * fy).sqrt();

    if magnitude < cutoff {
        return (0, 0);
    }
    if magnitude <= f32::EPSILON {
        return (0, 0);
    }

    let dir_x = fx / magnitude;
    let dir_y = fy / magnitude;

    let mut scaled = if cutoff >= 1.0 {
        1.0
    } else {
        (magnitude - cutoff) / (1.0 - cutoff)
    };
    if params.anti > 0.0 {
        scaled = params.anti + (1.0 - params.anti) * scaled;
    }
    scaled = scaled.min(1.0);

    (
        (dir_x * scaled * 32767.0).round() as i16,
        (dir_y * scaled * 32767.0).round() as i16,
    )
}

/// Lossless conversion to the XInput-shaped wire format. The packet
/// number carries the low 32 bits of the capture timestamp.
pub fn to_xinput(state: &TranslatedState) -> XInputWire {
    XInputWire {
        packet_number: state.timestamp as u32,
        gamepad: state.gamepad,
    }
}

/// Conversion to the dual-analog wire format: signed axes in 32-bit
/// containers, triggers rescaled onto the signed Z axes, buttons in the
/// 128-byte array, DPAD on the first POV.
pub fn to_dinput(state: &TranslatedState) -> DInputWire {
    let pad = &state.gamepad;
    let mut wire = DInputWire {
        l_x: pad.thumb_lx as i32,
        l_y: pad.thumb_ly as i32,
        l_rx: pad.thumb_rx as i32,
        l_ry: pad.thumb_ry as i32,
        l_z: pad.left_trigger as i32 * 257 - 32768,
        l_rz: pad.right_trigger as i32 * 257 - 32768,
        buttons: [0u8; 128],
        pov: [-1; 4],
        w_buttons: pad.buttons.bits(),
        left_trigger: pad.left_trigger,
        right_trigger: pad.right_trigger,
    };

    const BUTTON_ORDER: [Buttons; 10] = [
        Buttons::A,
        Buttons::B,
        Buttons::X,
        Buttons::Y,
        Buttons::LEFT_SHOULDER,
        Buttons::RIGHT_SHOULDER,
        Buttons::BACK,
        Buttons::START,
        Buttons::LEFT_THUMB,
        Buttons::RIGHT_THUMB,
    ];
    for (i, &button) in BUTTON_ORDER.iter().enumerate() {
        if pad.buttons.contains(button) {
            wire.buttons[i] = 0x80;
        }
    }

    wire.pov[0] = dpad_to_pov(pad.buttons);
    wire
}

/// DPAD bits to POV hundredths of a degree (`-1` when centered).
pub fn dpad_to_pov(buttons: Buttons) -> i32 {
    let up = buttons.contains(Buttons::DPAD_UP);
    let down = buttons.contains(Buttons::DPAD_DOWN);
    let left = buttons.contains(Buttons::DPAD_LEFT);
    let right = buttons.contains(Buttons::DPAD_RIGHT);

    if up {
        if right {
            4500
        } else if left {
            31500
        } else {
            0
        }
    } else if down {
        if right {
            13500
        } else if left {
            22500
        } else {
            18000
        }
    } else if right {
        9000
    } else if left {
        27000
    } else {
        -1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{ControllerState, RawVendorState};

    fn xinput_state(user_id: i32, gamepad: Gamepad) -> ControllerState {
        let mut state = ControllerState::vendor_slot(user_id);
        state.device_instance_id = format!("HID#VID_045E&PID_028E&IG_0{user_id}");
        state.is_connected = true;
        state.raw_xinput = RawVendorState {
            packet_number: 1,
            gamepad,
        };
        state.timestamp = 42;
        state
    }

    fn neutral_pipeline() -> TranslationPipeline {
        let mut pipeline = TranslationPipeline::new();
        pipeline.set_debounce_enabled(false);
        pipeline.set_deadzone_enabled(false);
        pipeline.set_socd_method(SocdMethod::Neutral);
        pipeline
    }

    #[test]
    fn opposing_horizontal_dpad_resolves_neutral() {
        let mut pipeline = neutral_pipeline();
        let pad = Gamepad {
            buttons: Buttons::DPAD_LEFT | Buttons::DPAD_RIGHT,
            ..Default::default()
        };
        let out = pipeline.translate_at(&[xinput_state(0, pad)], 100);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].gamepad.buttons, Buttons::empty());
        assert_eq!(out[0].gamepad.thumb_lx, 0);
        assert_eq!(out[0].gamepad.left_trigger, 0);
    }

    #[test]
    fn socd_neutral_is_a_fixed_point() {
        let mut pad = Gamepad {
            buttons: Buttons::DPAD_UP | Buttons::DPAD_DOWN | Buttons::DPAD_LEFT | Buttons::A,
            ..Default::default()
        };
        apply_socd(&mut pad, SocdMethod::Neutral);
        let once = pad;
        apply_socd(&mut pad, SocdMethod::Neutral);
        assert_eq!(pad, once);
        assert!(pad.buttons.contains(Buttons::DPAD_LEFT));
        assert!(pad.buttons.contains(Buttons::A));
    }

    #[test]
    fn socd_last_win_follows_stick_direction() {
        let mut pad = Gamepad {
            buttons: Buttons::DPAD_LEFT | Buttons::DPAD_RIGHT,
            thumb_lx: -5000,
            ..Default::default()
        };
        apply_socd(&mut pad, SocdMethod::LastWin);
        assert_eq!(pad.buttons, Buttons::DPAD_LEFT);

        let mut pad = Gamepad {
            buttons: Buttons::DPAD_UP | Buttons::DPAD_DOWN,
            thumb_ly: 9000,
            ..Default::default()
        };
        apply_socd(&mut pad, SocdMethod::LastWin);
        assert_eq!(pad.buttons, Buttons::DPAD_UP);
    }

    #[test]
    fn socd_first_win_degrades_to_neutral() {
        let mut pad = Gamepad {
            buttons: Buttons::DPAD_LEFT | Buttons::DPAD_RIGHT,
            ..Default::default()
        };
        apply_socd(&mut pad, SocdMethod::FirstWin);
        assert_eq!(pad.buttons, Buttons::empty());
    }

    #[test]
    fn socd_disabled_is_identity() {
        let mut pipeline = neutral_pipeline();
        pipeline.set_socd_enabled(false);
        let pad = Gamepad {
            buttons: Buttons::DPAD_LEFT | Buttons::DPAD_RIGHT,
            ..Default::default()
        };
        let out = pipeline.translate_at(&[xinput_state(0, pad)], 100);
        assert_eq!(
            out[0].gamepad.buttons,
            Buttons::DPAD_LEFT | Buttons::DPAD_RIGHT
        );
    }

    #[test]
    fn debounce_interval_zero_is_identity() {
        let mut pipeline = neutral_pipeline();
        pipeline.set_debounce_enabled(true);
        pipeline.set_debounce_interval_ms(0);

        for (tick, buttons) in [(1u64, Buttons::A), (2, Buttons::empty()), (3, Buttons::B)] {
            let pad = Gamepad { buttons, ..Default::default() };
            let out = pipeline.translate_at(&[xinput_state(0, pad)], tick);
            assert_eq!(out[0].gamepad.buttons, buttons);
        }
    }

    #[test]
    fn debounce_suppresses_fast_changes() {
        let mut pipeline = neutral_pipeline();
        pipeline.set_debounce_enabled(true);
        pipeline.set_debounce_interval_ms(10);
        let interval = clock::us_to_ticks(10_000);

        let press = Gamepad { buttons: Buttons::A, ..Default::default() };
        let release = Gamepad::default();

        let start = interval * 2;
        let out = pipeline.translate_at(&[xinput_state(0, press)], start);
        assert_eq!(out[0].gamepad.buttons, Buttons::A);

        // A bounce inside the interval keeps the accepted state.
        let out = pipeline.translate_at(&[xinput_state(0, release)], start + interval / 2);
        assert_eq!(out[0].gamepad.buttons, Buttons::A);

        // After the interval the release goes through.
        let out = pipeline.translate_at(&[xinput_state(0, release)], start + interval + 1);
        assert_eq!(out[0].gamepad.buttons, Buttons::empty());
    }

    #[test]
    fn debounce_ignores_out_of_range_users() {
        let mut pipeline = neutral_pipeline();
        pipeline.set_debounce_enabled(true);
        pipeline.set_debounce_interval_ms(1000);

        let press = Gamepad { buttons: Buttons::A, ..Default::default() };
        // Pure HID entries carry user -1 and must pass through untouched.
        let mut hid = ControllerState::vendor_slot(0);
        hid.user_id = -1;
        hid.device_path = "path".into();
        hid.gamepad = press;
        let out = pipeline.translate_at(&[hid], 1);
        assert_eq!(out[0].gamepad.buttons, Buttons::A);
    }

    #[test]
    fn deadzone_zeroes_drift_inside_cutoff() {
        let out = apply_deadzone(3000, 2000, StickDeadzone { cutoff: 0.15, anti: 0.0 });
        assert_eq!(out, (0, 0));
    }

    #[test]
    fn deadzone_preserves_full_deflection() {
        let (x, _) = apply_deadzone(32767, 0, StickDeadzone { cutoff: 0.15, anti: 0.0 });
        assert!(x > 30000);
    }

    #[test]
    fn deadzone_zero_is_identity() {
        let params = StickDeadzone { cutoff: 0.0, anti: 0.0 };
        assert_eq!(apply_deadzone(1234, -4321, params), (1234, -4321));
        assert_eq!(apply_deadzone(0, 0, params), (0, 0));
        assert_eq!(apply_deadzone(-32768, 32767, params), (-32768, 32767));
    }

    #[test]
    fn deadzone_output_magnitude_is_monotone() {
        let params = StickDeadzone { cutoff: 0.2, anti: 0.0 };
        let mut last = -1.0f32;
        for step in 0..=20 {
            let v = (32767 * step / 20) as i16;
            let (x, y) = apply_deadzone(v, 0, params);
            let mag = ((x as f32).powi(2) + (y as f32).powi(2)).sqrt();
            assert!(mag >= last, "magnitude decreased at step {step}");
            last = mag;
        }
    }

    #[test]
    fn deadzone_preserves_direction() {
        let params = StickDeadzone { cutoff: 0.15, anti: 0.0 };
        for (x, y) in [(20000i16, 20000i16), (25000, -10000), (-15000, 20000)] {
            let (ox, oy) = apply_deadzone(x, y, params);
            let input_angle = (y as f32).atan2(x as f32);
            let output_angle = (oy as f32).atan2(ox as f32);
            let diff = (input_angle - output_angle).abs();
            assert!(diff < 0.02 || diff > 6.26, "angle drifted: {diff}");
        }
    }

    #[test]
    fn anti_deadzone_lifts_minimum_output() {
        let params = StickDeadzone { cutoff: 0.2, anti: 0.15 };
        let input = (32767.0 * 0.25) as i16;
        let (x, y) = apply_deadzone(input, 0, params);
        let mag = ((x as f32).powi(2) + (y as f32).powi(2)).sqrt() / 32767.0;
        assert!(mag >= 0.14, "anti-deadzone floor missing: {mag}");
        assert!(mag <= 1.0);
    }

    #[test]
    fn independent_cutoffs_per_stick() {
        let mut pipeline = neutral_pipeline();
        pipeline.set_deadzone_enabled(true);
        pipeline.set_left_stick_deadzone(0.1);
        pipeline.set_right_stick_deadzone(0.3);

        let v = (32767.0 * 0.2) as i16;
        let pad = Gamepad {
            thumb_lx: v,
            thumb_rx: v,
            ..Default::default()
        };
        let out = pipeline.translate_at(&[xinput_state(0, pad)], 1);
        assert!(out[0].gamepad.thumb_lx.abs() > 1000);
        assert_eq!(out[0].gamepad.thumb_rx, 0);
    }

    #[test]
    fn xinput_wire_is_lossless() {
        let pad = Gamepad {
            buttons: Buttons::A | Buttons::DPAD_UP | Buttons::RIGHT_SHOULDER,
            left_trigger: 9,
            right_trigger: 200,
            thumb_lx: -1,
            thumb_ly: 2,
            thumb_rx: -32768,
            thumb_ry: 32767,
        };
        let state = TranslatedState {
            source_user_id: 2,
            is_xinput_source: true,
            gamepad: pad,
            timestamp: 0x1_2345_6789,
            target: TargetKind::XInput,
        };
        let wire = to_xinput(&state);
        assert_eq!(wire.gamepad, pad);
        assert_eq!(wire.packet_number, 0x2345_6789);
    }

    #[test]
    fn dinput_wire_matches_reference_values() {
        let state = TranslatedState {
            source_user_id: 0,
            is_xinput_source: true,
            gamepad: Gamepad {
                buttons: Buttons::A,
                left_trigger: 200,
                right_trigger: 100,
                thumb_lx: 10000,
                thumb_ly: -10000,
                ..Default::default()
            },
            timestamp: 1,
            target: TargetKind::DInput,
        };
        let wire = to_dinput(&state);
        assert_eq!(wire.buttons[0], 0x80);
        assert_eq!(wire.buttons[1], 0);
        assert_eq!(wire.l_z, 200 * 257 - 32768);
        assert_eq!(wire.l_z, 18632);
        assert_eq!(wire.l_rz, 100 * 257 - 32768);
        assert_eq!(wire.l_rz, -7068);
        assert_eq!(wire.l_x, 10000);
        assert_eq!(wire.l_y, -10000);
        assert_eq!(wire.pov[0], -1);
        assert_eq!(wire.w_buttons, Buttons::A.bits());
        assert_eq!(wire.left_trigger, 200);
    }

    #[test]
    fn pov_compass_table() {
        let cases = [
            (Buttons::DPAD_UP, 0),
            (Buttons::DPAD_UP | Buttons::DPAD_RIGHT, 4500),
            (Buttons::DPAD_RIGHT, 9000),
            (Buttons::DPAD_DOWN | Buttons::DPAD_RIGHT, 13500),
            (Buttons::DPAD_DOWN, 18000),
            (Buttons::DPAD_DOWN | Buttons::DPAD_LEFT, 22500),
            (Buttons::DPAD_LEFT, 27000),
            (Buttons::DPAD_UP | Buttons::DPAD_LEFT, 31500),
            (Buttons::empty(), -1),
            (Buttons::A | Buttons::START, -1),
        ];
        for (buttons, expected) in cases {
            assert_eq!(dpad_to_pov(buttons), expected, "for {buttons:?}");
        }
    }

    #[test]
    fn source_classification() {
        let mut pipeline = neutral_pipeline();

        // Vendor slot entries translate as XInput sources.
        let out = pipeline.translate_at(&[xinput_state(1, Gamepad::default())], 1);
        assert_eq!(out.len(), 1);
        assert!(out[0].is_xinput_source);
        assert_eq!(out[0].source_user_id, 1);
        assert_eq!(out[0].target, TargetKind::DInput);

        // HID entries translate as HID sources targeting XInput.
        let mut hid = ControllerState::vendor_slot(0);
        hid.user_id = -1;
        hid.device_path = r"\\?\HID#VID_054C&PID_09CC#1#{guid}".into();
        let out = pipeline.translate_at(&[hid], 1);
        assert_eq!(out.len(), 1);
        assert!(!out[0].is_xinput_source);
        assert_eq!(out[0].target, TargetKind::XInput);

        // Entries with neither family are skipped.
        let mut empty = ControllerState::vendor_slot(0);
        empty.user_id = -1;
        assert!(pipeline.translate_at(&[empty], 1).is_empty());
    }

    #[test]
    fn direction_flags_steer_targets() {
        let mut pipeline = neutral_pipeline();
        pipeline.set_xinput_to_dinput(false);
        let out = pipeline.translate_at(&[xinput_state(0, Gamepad::default())], 1);
        assert_eq!(out[0].target, TargetKind::XInput);

        pipeline.set_dinput_to_xinput(false);
        let mut hid = ControllerState::vendor_slot(0);
        hid.user_id = -1;
        hid.device_path = "p".into();
        let out = pipeline.translate_at(&[hid], 1);
        assert_eq!(out[0].target, TargetKind::DInput);
    }
}
