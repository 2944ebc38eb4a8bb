//! Canonical gamepad state.
//!
//! Every physical source (vendor-API slot or raw HID interface) is normalized
//! into [`Gamepad`] before filtering, and every synthetic target is derived
//! from it. The layout intentionally matches the vendor-API wire format:
//! a 16-bit button mask, two 8-bit triggers, four signed 16-bit stick axes.
//!
//! # Conventions
//! - Stick Y is positive **up**. HID devices that report Y-down are inverted
//!   during decoding; the dual-analog wire output inverts again on emission.
//! - Triggers are `0..=255`, released at `0`.

use bitflags::bitflags;

bitflags! {
    /// Digital button mask in vendor-API bit positions.
    ///
    /// Bits `0x0400` and `0x0800` are reserved and never set by the proxy.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
    pub struct Buttons: u16 {
        const DPAD_UP        = 0x0001;
        const DPAD_DOWN      = 0x0002;
        const DPAD_LEFT      = 0x0004;
        const DPAD_RIGHT     = 0x0008;
        const START          = 0x0010;
        const BACK           = 0x0020;
        const LEFT_THUMB     = 0x0040;
        const RIGHT_THUMB    = 0x0080;
        const LEFT_SHOULDER  = 0x0100;
        const RIGHT_SHOULDER = 0x0200;
        const A              = 0x1000;
        const B              = 0x2000;
        const X              = 0x4000;
        const Y              = 0x8000;
    }
}

impl Buttons {
    /// True when both members of an opposing DPAD pair are held.
    pub fn has_socd_conflict(self) -> bool {
        (self.contains(Buttons::DPAD_LEFT) && self.contains(Buttons::DPAD_RIGHT))
            || (self.contains(Buttons::DPAD_UP) && self.contains(Buttons::DPAD_DOWN))
    }
}

/// Canonical controller state shared by the capture, translation, and
/// emulation stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Gamepad {
    pub buttons: Buttons,
    pub left_trigger: u8,
    pub right_trigger: u8,
    pub thumb_lx: i16,
    pub thumb_ly: i16,
    pub thumb_rx: i16,
    pub thumb_ry: i16,
}

/// Which synthetic family a translated state is destined for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    /// Xbox-360-shaped synthetic pad.
    XInput,
    /// Dual-analog synthetic pad with POV hat.
    DInput,
}

/// A fully translated state ready for wire emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslatedState {
    /// Vendor-API slot of the source, `-1` for pure HID devices.
    pub source_user_id: i32,
    /// True when the source came through the vendor API.
    pub is_xinput_source: bool,
    pub gamepad: Gamepad,
    /// Capture-counter tick at which the source state was observed.
    pub timestamp: u64,
    pub target: TargetKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socd_conflict_detection() {
        let lr = Buttons::DPAD_LEFT | Buttons::DPAD_RIGHT;
        assert!(lr.has_socd_conflict());

        let ud = Buttons::DPAD_UP | Buttons::DPAD_DOWN;
        assert!(ud.has_socd_conflict());

        let diagonal = Buttons::DPAD_UP | Buttons::DPAD_RIGHT;
        assert!(!diagonal.has_socd_conflict());

        assert!(!Buttons::empty().has_socd_conflict());
    }

    #[test]
    fn button_bits_match_vendor_layout() {
        assert_eq!(Buttons::DPAD_UP.bits(), 0x0001);
        assert_eq!(Buttons::START.bits(), 0x0010);
        assert_eq!(Buttons::A.bits(), 0x1000);
        assert_eq!(Buttons::Y.bits(), 0x8000);
    }
}
