//! Descriptor-driven HID report canonicalization.
//!
//! The OS parsing library turns a raw report into a set of asserted button
//! usages and a usage-keyed map of axis values; this module turns those,
//! together with the capability table captured at device-open time, into a
//! canonical [`Gamepad`]. Nothing here touches the OS, so the whole
//! mapping is exercisable with synthetic capability tables.
//!
//! # Generic Desktop axis map (usage page 0x01)
//!
//! | Usage | Canonical axis |
//! |-------|----------------|
//! | 0x30 X  | `thumb_lx` |
//! | 0x31 Y  | `thumb_ly`, sign-inverted (HID reports Y-down) |
//! | 0x32 Z  | `thumb_rx` |
//! | 0x35 Rz | `thumb_ry`, sign-inverted |
//! | 0x33 Rx | `left_trigger`, normalized to `0..=255` |
//! | 0x34 Ry | `right_trigger` |
//!
//! Axis ranges are read per device from the capability table; decoders
//! never assume 8-, 10-, or 16-bit raw ranges.

use std::collections::{BTreeMap, BTreeSet};

use crate::capture::profiles;
use crate::gamepad::{Buttons, Gamepad};

pub const USAGE_PAGE_GENERIC_DESKTOP: u16 = 0x01;
pub const USAGE_JOYSTICK: u16 = 0x04;
pub const USAGE_GAMEPAD: u16 = 0x05;

const USAGE_X: u16 = 0x30;
const USAGE_Y: u16 = 0x31;
const USAGE_Z: u16 = 0x32;
const USAGE_RX: u16 = 0x33;
const USAGE_RY: u16 = 0x34;
const USAGE_RZ: u16 = 0x35;

/// One button capability: a usage range on a usage page.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ButtonCap {
    pub usage_page: u16,
    pub usage_min: u16,
    pub usage_max: u16,
}

/// One value (axis) capability with its declared logical range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueCap {
    pub usage_page: u16,
    pub usage: u16,
    pub logical_min: i32,
    pub logical_max: i32,
}

/// Preparsed descriptor snapshot taken when a device is opened.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CapabilityTable {
    /// Top-level usage page of the collection.
    pub usage_page: u16,
    /// Top-level usage (0x04 joystick, 0x05 gamepad for accepted devices).
    pub usage: u16,
    pub buttons: Vec<ButtonCap>,
    pub values: Vec<ValueCap>,
}

impl CapabilityTable {
    /// True for the joystick/gamepad collections the proxy captures.
    pub fn is_game_control(&self) -> bool {
        self.usage_page == USAGE_PAGE_GENERIC_DESKTOP
            && matches!(self.usage, USAGE_JOYSTICK | USAGE_GAMEPAD)
    }

    fn value_cap(&self, usage: u16) -> Option<&ValueCap> {
        self.values.iter().find(|v| v.usage == usage)
    }
}

/// Map a raw axis value from its declared `[lo, hi]` range onto the
/// canonical signed stick range.
///
/// `v = lo` maps to `-32768`, `v = hi` to `32767`, the midpoint to within
/// one quantization step of zero. A degenerate range produces zero.
pub fn normalize_stick(v: i32, lo: i32, hi: i32) -> i16 {
    let range = (hi as i64) - (lo as i64);
    if range <= 0 {
        return 0;
    }
    let center = (lo as f64 + hi as f64) / 2.0;
    let half = range as f64 / 2.0;
    let t = (v as f64 - center) / half;
    // The canonical range is asymmetric, so the two halves scale
    // differently (full deflection down is -32768, up is 32767).
    let scaled = if t < 0.0 { t * 32768.0 } else { t * 32767.0 };
    scaled.round().clamp(-32768.0, 32767.0) as i16
}

/// Map a raw axis value from `[lo, hi]` onto the canonical trigger range.
pub fn normalize_trigger(v: i32, lo: i32, hi: i32) -> u8 {
    let range = (hi as i64) - (lo as i64);
    if range <= 0 {
        return 0;
    }
    let t = ((v as i64) - (lo as i64)) as f64 / range as f64;
    (t * 255.0).round().clamp(0.0, 255.0) as u8
}

/// Negate a canonical stick value without overflowing at `-32768`.
fn invert_stick(v: i16) -> i16 {
    (-(v as i32)).clamp(-32768, 32767) as i16
}

/// Decode extracted usages and values into a canonical gamepad.
///
/// When a device profile matches `product_name` it fully replaces the
/// generic fallback for both buttons and axes; otherwise the Generic
/// Desktop map above applies with per-capability range normalization.
pub fn decode(
    active_buttons: &BTreeSet<u16>,
    hid_values: &BTreeMap<u16, i32>,
    caps: &CapabilityTable,
    product_name: &str,
) -> Gamepad {
    if let Some(profile) = profiles::lookup(product_name) {
        return decode_with_profile(active_buttons, hid_values, profile);
    }

    let mut pad = Gamepad::default();

    for &usage in active_buttons {
        if let Some(bit) = generic_button_bit(usage) {
            pad.buttons |= bit;
        }
    }

    for (&usage, &value) in hid_values {
        let Some(cap) = caps.value_cap(usage) else {
            continue;
        };
        if cap.usage_page != USAGE_PAGE_GENERIC_DESKTOP {
            continue;
        }
        let (lo, hi) = (cap.logical_min, cap.logical_max);
        match usage {
            USAGE_X => pad.thumb_lx = normalize_stick(value, lo, hi),
            USAGE_Y => pad.thumb_ly = invert_stick(normalize_stick(value, lo, hi)),
            USAGE_Z => pad.thumb_rx = normalize_stick(value, lo, hi),
            USAGE_RZ => pad.thumb_ry = invert_stick(normalize_stick(value, lo, hi)),
            USAGE_RX => pad.left_trigger = normalize_trigger(value, lo, hi),
            USAGE_RY => pad.right_trigger = normalize_trigger(value, lo, hi),
            _ => {}
        }
    }

    pad
}

fn decode_with_profile(
    active_buttons: &BTreeSet<u16>,
    hid_values: &BTreeMap<u16, i32>,
    profile: &profiles::DeviceProfile,
) -> Gamepad {
    let mut pad = Gamepad::default();

    for &usage in active_buttons {
        for &(mapped_usage, bit) in profile.button_map {
            if usage == mapped_usage {
                pad.buttons |= bit;
            }
        }
    }

    // Centered-byte axes: 128 is rest, 0 is up/left, 255 is down/right.
    for (&usage, &value) in hid_values {
        match usage {
            USAGE_X => pad.thumb_lx = centered_byte(value, false),
            USAGE_Y => pad.thumb_ly = centered_byte(value, true),
            USAGE_Z => pad.thumb_rx = centered_byte(value, false),
            USAGE_RZ => pad.thumb_ry = centered_byte(value, true),
            _ => {}
        }
    }

    pad
}

/// Signed mapping for 8-bit centered axes: `(v - 128) * 256`, clamped,
/// with the Y variant inverted to the canonical Y-up convention.
fn centered_byte(value: i32, invert: bool) -> i16 {
    let centered = if invert { 128 - value } else { value - 128 };
    (centered * 256).clamp(-32768, 32767) as i16
}

/// Conventional button layout for unprofiled devices: HID button usages
/// count from 1 in declaration order.
fn generic_button_bit(usage: u16) -> Option<Buttons> {
    Some(match usage {
        1 => Buttons::A,
        2 => Buttons::B,
        3 => Buttons::X,
        4 => Buttons::Y,
        5 => Buttons::LEFT_SHOULDER,
        6 => Buttons::RIGHT_SHOULDER,
        7 => Buttons::BACK,
        8 => Buttons::START,
        9 => Buttons::LEFT_THUMB,
        10 => Buttons::RIGHT_THUMB,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with_axis(usage: u16, lo: i32, hi: i32) -> CapabilityTable {
        CapabilityTable {
            usage_page: USAGE_PAGE_GENERIC_DESKTOP,
            usage: USAGE_GAMEPAD,
            buttons: vec![ButtonCap {
                usage_page: 0x09,
                usage_min: 1,
                usage_max: 16,
            }],
            values: vec![ValueCap {
                usage_page: USAGE_PAGE_GENERIC_DESKTOP,
                usage,
                logical_min: lo,
                logical_max: hi,
            }],
        }
    }

    fn decode_axis(usage: u16, lo: i32, hi: i32, value: i32) -> Gamepad {
        let mut values = BTreeMap::new();
        values.insert(usage, value);
        decode(
            &BTreeSet::new(),
            &values,
            &table_with_axis(usage, lo, hi),
            "Generic USB Joystick",
        )
    }

    #[test]
    fn eight_bit_axis_center_maps_near_zero() {
        let pad = decode_axis(USAGE_X, 0, 255, 128);
        assert!(pad.thumb_lx.abs() <= 128, "got {}", pad.thumb_lx);
    }

    #[test]
    fn ten_bit_axis_minimum_maps_to_full_negative() {
        let pad = decode_axis(USAGE_X, 0, 1023, 0);
        assert_eq!(pad.thumb_lx, -32768);
    }

    #[test]
    fn sixteen_bit_axis_maximum_maps_to_full_positive() {
        let pad = decode_axis(USAGE_X, 0, 65535, 65535);
        assert_eq!(pad.thumb_lx, 32767);
    }

    #[test]
    fn degenerate_range_outputs_zero() {
        let pad = decode_axis(USAGE_X, 512, 512, 512);
        assert_eq!(pad.thumb_lx, 0);
        assert_eq!(normalize_stick(5, 10, 10), 0);
        assert_eq!(normalize_trigger(5, 10, 10), 0);
    }

    #[test]
    fn y_axis_is_inverted_to_y_up() {
        // HID Y = 0 means stick pushed up; canonical up is positive.
        let pad = decode_axis(USAGE_Y, 0, 65535, 0);
        assert_eq!(pad.thumb_ly, 32767);
        let pad = decode_axis(USAGE_Y, 0, 65535, 65535);
        assert_eq!(pad.thumb_ly, -32768);
    }

    #[test]
    fn rz_maps_to_right_stick_y_inverted() {
        let pad = decode_axis(USAGE_RZ, 0, 255, 0);
        assert_eq!(pad.thumb_ry, 32767);
    }

    #[test]
    fn triggers_normalize_to_byte_range() {
        let pad = decode_axis(USAGE_RX, 0, 1023, 1023);
        assert_eq!(pad.left_trigger, 255);
        let pad = decode_axis(USAGE_RY, 0, 1023, 0);
        assert_eq!(pad.right_trigger, 0);
        let pad = decode_axis(USAGE_RX, 0, 1023, 511);
        assert!(pad.left_trigger.abs_diff(127) <= 1);
    }

    #[test]
    fn values_without_capability_entry_are_ignored() {
        let mut values = BTreeMap::new();
        values.insert(USAGE_Z, 200);
        let pad = decode(
            &BTreeSet::new(),
            &values,
            &table_with_axis(USAGE_X, 0, 255),
            "Generic USB Joystick",
        );
        assert_eq!(pad.thumb_rx, 0);
    }

    #[test]
    fn generic_buttons_follow_declaration_order() {
        let active: BTreeSet<u16> = [1u16, 2, 8].into_iter().collect();
        let pad = decode(
            &active,
            &BTreeMap::new(),
            &table_with_axis(USAGE_X, 0, 255),
            "Generic USB Joystick",
        );
        assert_eq!(pad.buttons, Buttons::A | Buttons::B | Buttons::START);
    }

    #[test]
    fn profile_replaces_generic_mapping() {
        // Sony pads report usage 2 for the cross button; the generic map
        // would call usage 2 "B".
        let active: BTreeSet<u16> = [2u16].into_iter().collect();
        let mut values = BTreeMap::new();
        values.insert(USAGE_X, 255);
        let pad = decode(
            &active,
            &values,
            &table_with_axis(USAGE_X, 0, 255),
            "Wireless Controller",
        );
        assert_eq!(pad.buttons, Buttons::A);
        assert_eq!(pad.thumb_lx, (255 - 128) * 256);
    }

    #[test]
    fn profile_centered_byte_y_is_inverted_and_saturates() {
        let mut values = BTreeMap::new();
        values.insert(USAGE_Y, 0);
        let pad = decode(
            &BTreeSet::new(),
            &values,
            &table_with_axis(USAGE_Y, 0, 255),
            "Wireless Controller",
        );
        // 128 * 256 saturates at the positive i16 limit.
        assert_eq!(pad.thumb_ly, 32767);
    }

    #[test]
    fn stick_normalization_is_monotone() {
        let mut last = i16::MIN;
        for v in (0..=1023).step_by(64) {
            let out = normalize_stick(v, 0, 1023);
            assert!(out >= last);
            last = out;
        }
    }
}
