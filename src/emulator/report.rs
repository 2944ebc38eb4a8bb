//! Bus report packing.
//!
//! The kernel bus consumes fixed `#[repr(C)]` payloads. Packing from the
//! wire formats is plain arithmetic, kept apart from the ioctl plumbing
//! so it can be verified without a driver.

use crate::gamepad::Buttons;
use crate::translate::{DInputWire, XInputWire};

/// Report submitted for an Xbox-360-shaped target; carries the canonical
/// gamepad fields verbatim.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct XusbReport {
    pub buttons: u16,
    pub left_trigger: u8,
    pub right_trigger: u8,
    pub thumb_lx: i16,
    pub thumb_ly: i16,
    pub thumb_rx: i16,
    pub thumb_ry: i16,
}

impl From<&XInputWire> for XusbReport {
    fn from(wire: &XInputWire) -> Self {
        Self {
            buttons: wire.gamepad.buttons.bits(),
            left_trigger: wire.gamepad.left_trigger,
            right_trigger: wire.gamepad.right_trigger,
            thumb_lx: wire.gamepad.thumb_lx,
            thumb_ly: wire.gamepad.thumb_ly,
            thumb_rx: wire.gamepad.thumb_rx,
            thumb_ry: wire.gamepad.thumb_ry,
        }
    }
}

/// Report submitted for a dual-analog target: byte sticks (Y inverted on
/// the wire, 0 = up), trigger bytes, the button mask, and an 8-direction
/// POV slot (8 = released).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DualAnalogReport {
    pub buttons: u16,
    pub trigger_l: u8,
    pub trigger_r: u8,
    pub thumb_lx: u8,
    pub thumb_ly: u8,
    pub thumb_rx: u8,
    pub thumb_ry: u8,
    pub pov: u8,
}

impl Default for DualAnalogReport {
    fn default() -> Self {
        Self {
            buttons: 0,
            trigger_l: 0,
            trigger_r: 0,
            thumb_lx: 128,
            thumb_ly: 128,
            thumb_rx: 128,
            thumb_ry: 128,
            pov: POV_RELEASED,
        }
    }
}

/// POV slot value meaning "no direction held".
pub const POV_RELEASED: u8 = 8;

impl From<&DInputWire> for DualAnalogReport {
    fn from(wire: &DInputWire) -> Self {
        Self {
            buttons: wire.w_buttons,
            trigger_l: wire.left_trigger,
            trigger_r: wire.right_trigger,
            thumb_lx: stick_byte(wire.l_x, false),
            thumb_ly: stick_byte(wire.l_y, true),
            thumb_rx: stick_byte(wire.l_rx, false),
            thumb_ry: stick_byte(wire.l_ry, true),
            pov: pov_slot(Buttons::from_bits_truncate(wire.w_buttons)),
        }
    }
}

/// Map a signed 16-bit axis (in a 32-bit container) onto the byte range
/// as `(value * 127.5) + 127.5`. The Y channels invert because this
/// family reports 0 at the top.
fn stick_byte(value: i32, invert: bool) -> u8 {
    let mut normalized = (value as f32 / 32767.0).clamp(-1.0, 1.0);
    if invert {
        normalized = -normalized;
    }
    (normalized * 127.5 + 127.5).round().clamp(0.0, 255.0) as u8
}

/// DPAD bits to the 8-way POV slot (0 = up, clockwise).
fn pov_slot(buttons: Buttons) -> u8 {
    let up = buttons.contains(Buttons::DPAD_UP);
    let down = buttons.contains(Buttons::DPAD_DOWN);
    let left = buttons.contains(Buttons::DPAD_LEFT);
    let right = buttons.contains(Buttons::DPAD_RIGHT);

    match (up, down, left, right) {
        (true, false, false, false) => 0,
        (true, false, false, true) => 1,
        (false, false, false, true) => 2,
        (false, true, false, true) => 3,
        (false, true, false, false) => 4,
        (false, true, true, false) => 5,
        (false, false, true, false) => 6,
        (true, false, true, false) => 7,
        // Neutral and conflicting combinations release the hat.
        _ => POV_RELEASED,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gamepad::{Gamepad, TargetKind, TranslatedState};
    use crate::translate::{to_dinput, to_xinput};

    fn translated(gamepad: Gamepad) -> TranslatedState {
        TranslatedState {
            source_user_id: 0,
            is_xinput_source: true,
            gamepad,
            timestamp: 77,
            target: TargetKind::XInput,
        }
    }

    #[test]
    fn xusb_report_mirrors_gamepad_fields() {
        let pad = Gamepad {
            buttons: Buttons::A | Buttons::DPAD_LEFT,
            left_trigger: 11,
            right_trigger: 22,
            thumb_lx: -100,
            thumb_ly: 200,
            thumb_rx: -300,
            thumb_ry: 400,
        };
        let report = XusbReport::from(&to_xinput(&translated(pad)));
        assert_eq!(report.buttons, pad.buttons.bits());
        assert_eq!(report.left_trigger, 11);
        assert_eq!(report.thumb_lx, -100);
        assert_eq!(report.thumb_ry, 400);
    }

    #[test]
    fn dual_analog_sticks_center_at_128() {
        let report = DualAnalogReport::from(&to_dinput(&translated(Gamepad::default())));
        assert_eq!(report.thumb_lx, 128);
        assert_eq!(report.thumb_ly, 128);
        assert_eq!(report.thumb_rx, 128);
        assert_eq!(report.thumb_ry, 128);
        assert_eq!(report.pov, POV_RELEASED);
    }

    #[test]
    fn dual_analog_y_is_inverted_on_the_wire() {
        // Canonical full-up becomes 0 on this family's wire.
        let pad = Gamepad {
            thumb_ly: 32767,
            thumb_ry: -32768,
            ..Default::default()
        };
        let report = DualAnalogReport::from(&to_dinput(&translated(pad)));
        assert_eq!(report.thumb_ly, 0);
        assert_eq!(report.thumb_ry, 255);
    }

    #[test]
    fn dual_analog_x_extremes() {
        let pad = Gamepad {
            thumb_lx: 32767,
            thumb_rx: -32768,
            ..Default::default()
        };
        let report = DualAnalogReport::from(&to_dinput(&translated(pad)));
        assert_eq!(report.thumb_lx, 255);
        assert_eq!(report.thumb_rx, 0);
    }

    #[test]
    fn pov_slots_run_clockwise_from_up() {
        let cases = [
            (Buttons::DPAD_UP, 0u8),
            (Buttons::DPAD_UP | Buttons::DPAD_RIGHT, 1),
            (Buttons::DPAD_RIGHT, 2),
            (Buttons::DPAD_DOWN | Buttons::DPAD_RIGHT, 3),
            (Buttons::DPAD_DOWN, 4),
            (Buttons::DPAD_DOWN | Buttons::DPAD_LEFT, 5),
            (Buttons::DPAD_LEFT, 6),
            (Buttons::DPAD_UP | Buttons::DPAD_LEFT, 7),
            (Buttons::DPAD_UP | Buttons::DPAD_DOWN, POV_RELEASED),
        ];
        for (buttons, expected) in cases {
            let pad = Gamepad { buttons, ..Default::default() };
            let report = DualAnalogReport::from(&to_dinput(&translated(pad)));
            assert_eq!(report.pov, expected, "for {buttons:?}");
        }
    }

    #[test]
    fn triggers_pass_through_as_bytes() {
        let pad = Gamepad {
            left_trigger: 200,
            right_trigger: 100,
            ..Default::default()
        };
        let report = DualAnalogReport::from(&to_dinput(&translated(pad)));
        assert_eq!(report.trigger_l, 200);
        assert_eq!(report.trigger_r, 100);
    }
}
