//! Device identity extraction.
//!
//! OS device paths are transient (they embed port and enumeration details
//! that change across replugs), so every physical device is tracked by a
//! canonical identity derived from its path. Composite controllers expose
//! several HID interfaces that share one *base* identity; the base form is
//! what vendor-API slot assignment deduplicates on.
//!
//! A typical path and its derived forms:
//!
//! ```text
//! \\?\HID#VID_045E&PID_028E&IG_00#8&f746ffa&0&0000#{4d1e55b2-...}
//!        └──────────── identity ─────────────────┘
//!        HID#VID_045E&PID_028E&IG_00#8&f746ffa&0&0000
//!        └── base ──┘
//!        HID#VID_045E&PID_028E
//! ```

/// Marker that introduces the HID segment of a device path.
const HID_TOKEN: &str = "HID#";

/// Suffix marking a vendor-API-capable compatibility interface.
const IG_MARKER: &str = "&IG_";

/// Derive the canonical identity from an OS device path.
///
/// Keeps the substring starting at `HID#` up to (but not including) the
/// third `#` delimiter. Returns an empty string for paths that do not
/// carry the expected shape; never panics.
pub fn extract_identity(device_path: &str) -> String {
    let Some(start) = device_path.find(HID_TOKEN) else {
        return String::new();
    };
    let tail = &device_path[start + HID_TOKEN.len()..];
    let Some(second) = tail.find('#') else {
        return String::new();
    };
    let Some(third) = tail[second + 1..].find('#') else {
        return String::new();
    };
    device_path[start..start + HID_TOKEN.len() + second + 1 + third].to_string()
}

/// Reduce an identity to its base form.
///
/// Strips the trailing serial segment (everything from the separator after
/// the VID/PID block, whether `#` or `\`) and any `&IG_nn` suffix. The
/// result deduplicates the several interfaces a composite controller
/// exposes. Total on all inputs; an empty input yields an empty output.
pub fn base_identity(identity: &str) -> String {
    if identity.is_empty() {
        return String::new();
    }
    // Skip the leading "HID#" (or "HID\") prefix when locating the serial
    // separator, then cut the serial tail and the interface suffix.
    let body_start = identity
        .find(['#', '\\'])
        .map(|i| i + 1)
        .unwrap_or(0);
    let end = identity[body_start..]
        .find(['#', '\\'])
        .map(|i| body_start + i)
        .unwrap_or(identity.len());
    let mut base = &identity[..end];
    if let Some(ig) = base.find(IG_MARKER) {
        base = &base[..ig];
    }
    base.to_string()
}

/// True when the identity names a vendor-API compatibility interface.
pub fn is_vendor_capable(identity: &str) -> bool {
    identity.contains(IG_MARKER)
}
