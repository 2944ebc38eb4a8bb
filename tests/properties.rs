//! Property tests for the normalization and filter math.

use proptest::prelude::*;

use padproxy::capture::decoder::{normalize_stick, normalize_trigger};
use padproxy::translate::{apply_deadzone, apply_socd, SocdMethod, StickDeadzone};
use padproxy::{Buttons, Gamepad};

fn arb_gamepad() -> impl Strategy<Value = Gamepad> {
    (
        any::<u16>(),
        any::<u8>(),
        any::<u8>(),
        any::<i16>(),
        any::<i16>(),
        any::<i16>(),
        any::<i16>(),
    )
        .prop_map(|(buttons, lt, rt, lx, ly, rx, ry)| Gamepad {
            buttons: Buttons::from_bits_truncate(buttons),
            left_trigger: lt,
            right_trigger: rt,
            thumb_lx: lx,
            thumb_ly: ly,
            thumb_rx: rx,
            thumb_ry: ry,
        })
}

/// Capability ranges with `lo <= hi` and a value inside them.
fn arb_range_and_value() -> impl Strategy<Value = (i32, i32, i32)> {
    (0..=i32::MAX - 1)
        .prop_flat_map(|lo| (Just(lo), lo..=i32::MAX))
        .prop_flat_map(|(lo, hi)| (Just(lo), Just(hi), lo..=hi))
}

proptest! {
    #[test]
    fn stick_output_stays_in_canonical_range((lo, hi, v) in arb_range_and_value()) {
        let out = normalize_stick(v, lo, hi) as i32;
        prop_assert!((-32768..=32767).contains(&out));
    }

    #[test]
    fn stick_endpoints_hit_the_rails((lo, hi, _) in arb_range_and_value()) {
        if hi > lo {
            prop_assert_eq!(normalize_stick(lo, lo, hi), -32768);
            prop_assert_eq!(normalize_stick(hi, lo, hi), 32767);
        } else {
            prop_assert_eq!(normalize_stick(lo, lo, hi), 0);
        }
    }

    #[test]
    fn trigger_endpoints_hit_the_rails((lo, hi, v) in arb_range_and_value()) {
        let out = normalize_trigger(v, lo, hi);
        prop_assert!(out <= 255);
        if hi > lo {
            prop_assert_eq!(normalize_trigger(lo, lo, hi), 0);
            prop_assert_eq!(normalize_trigger(hi, lo, hi), 255);
        }
    }

    #[test]
    fn deadzone_zero_with_no_anti_is_identity(x in any::<i16>(), y in any::<i16>()) {
        let params = StickDeadzone { cutoff: 0.0, anti: 0.0 };
        prop_assert_eq!(apply_deadzone(x, y, params), (x, y));
    }

    #[test]
    fn deadzone_inside_cutoff_is_centered(
        x in -4000i16..4000,
        y in -4000i16..4000,
        cutoff in 0.2f32..0.9,
    ) {
        let fx = x as f32 / 32767.0;
        let fy = y as f32 / 32767.0;
        if (fx * fx + fy * fy).sqrt() < cutoff {
            let params = StickDeadzone { cutoff, anti: 0.0 };
            prop_assert_eq!(apply_deadzone(x, y, params), (0, 0));
        }
    }

    #[test]
    fn deadzone_output_never_exceeds_unit_magnitude(
        x in any::<i16>(),
        y in any::<i16>(),
        cutoff in 0.0f32..1.0,
        anti in 0.0f32..1.0,
    ) {
        let (ox, oy) = apply_deadzone(x, y, StickDeadzone { cutoff, anti });
        let mag = ((ox as f64).powi(2) + (oy as f64).powi(2)).sqrt() / 32767.0;
        // Direction quantization can push a hair past 1.0.
        prop_assert!(mag <= 1.02, "magnitude {} out of range", mag);
    }

    #[test]
    fn deadzone_magnitude_is_monotone_along_a_ray(
        scale_a in 0.0f32..1.0,
        scale_b in 0.0f32..1.0,
        cutoff in 0.0f32..0.9,
    ) {
        let (lo, hi) = if scale_a <= scale_b { (scale_a, scale_b) } else { (scale_b, scale_a) };
        let params = StickDeadzone { cutoff, anti: 0.0 };
        let v_lo = (32767.0 * lo) as i16;
        let v_hi = (32767.0 * hi) as i16;
        let (ax, ay) = apply_deadzone(v_lo, 0, params);
        let (bx, by) = apply_deadzone(v_hi, 0, params);
        let mag_lo = ((ax as f64).powi(2) + (ay as f64).powi(2)).sqrt();
        let mag_hi = ((bx as f64).powi(2) + (by as f64).powi(2)).sqrt();
        prop_assert!(mag_hi + 1.0 >= mag_lo);
    }

    #[test]
    fn socd_neutral_is_idempotent(pad in arb_gamepad()) {
        let mut once = pad;
        apply_socd(&mut once, SocdMethod::Neutral);
        let mut twice = once;
        apply_socd(&mut twice, SocdMethod::Neutral);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn socd_output_never_keeps_a_conflict(pad in arb_gamepad(), method in 0u8..3) {
        let mut cleaned = pad;
        apply_socd(&mut cleaned, SocdMethod::from_index(method));
        prop_assert!(!cleaned.buttons.has_socd_conflict());
    }

    #[test]
    fn socd_touches_only_dpad_bits(pad in arb_gamepad(), method in 0u8..3) {
        let mut cleaned = pad;
        apply_socd(&mut cleaned, SocdMethod::from_index(method));
        let dpad = Buttons::DPAD_UP | Buttons::DPAD_DOWN | Buttons::DPAD_LEFT | Buttons::DPAD_RIGHT;
        prop_assert_eq!(
            cleaned.buttons.difference(dpad),
            pad.buttons.difference(dpad)
        );
        prop_assert_eq!(cleaned.thumb_lx, pad.thumb_lx);
        prop_assert_eq!(cleaned.left_trigger, pad.left_trigger);
    }
}
