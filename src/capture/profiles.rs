//! Per-device mapping profiles.
//!
//! Most HID pads decode fine through the generic Generic-Desktop mapping;
//! the handful that do not get an entry here, keyed by the product string
//! the device reports. A matching profile fully replaces the generic
//! fallback for both buttons and axes.

use crate::gamepad::Buttons;

/// Mapping override for one known device family.
#[derive(Debug, Clone, Copy)]
pub struct DeviceProfile {
    /// Product string reported by the device, matched exactly.
    pub product_name: &'static str,
    /// HID button usage to canonical bit assignments.
    pub button_map: &'static [(u16, Buttons)],
}

/// Sony pads enumerate as "Wireless Controller" and report the face
/// buttons as usages 1..=4 in Square/Cross/Circle/Triangle order, with
/// 8-bit centered stick axes.
const WIRELESS_CONTROLLER: DeviceProfile = DeviceProfile {
    product_name: "Wireless Controller",
    button_map: &[
        (1, Buttons::X),             // Square
        (2, Buttons::A),             // Cross
        (3, Buttons::B),             // Circle
        (4, Buttons::Y),             // Triangle
        (5, Buttons::LEFT_SHOULDER),
        (6, Buttons::RIGHT_SHOULDER),
        (9, Buttons::BACK),          // Share
        (10, Buttons::START),        // Options
        (11, Buttons::LEFT_THUMB),
        (12, Buttons::RIGHT_THUMB),
    ],
};

const PROFILES: &[DeviceProfile] = &[WIRELESS_CONTROLLER];

/// Find the profile for a product string, if any.
pub fn lookup(product_name: &str) -> Option<&'static DeviceProfile> {
    PROFILES.iter().find(|p| p.product_name == product_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wireless_controller_is_profiled() {
        let profile = lookup("Wireless Controller").expect("profile");
        assert!(profile
            .button_map
            .iter()
            .any(|&(usage, bit)| usage == 2 && bit == Buttons::A));
    }

    #[test]
    fn unknown_products_fall_through() {
        assert!(lookup("Generic USB Joystick").is_none());
        assert!(lookup("").is_none());
    }
}
