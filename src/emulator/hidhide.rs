//! Device-hiding driver bridge.
//!
//! The hiding driver masks physical pads from other applications once
//! their synthetic twins exist. It is controlled through buffered ioctls
//! on a well-known control device:
//!
//! - blacklist: device identities to hide
//! - whitelist: process image paths still allowed to see them
//! - active and inverse-mode flags (`u32` 0/1)
//!
//! List payloads are a `u32` count followed by that many null-terminated
//! UTF-16 strings packed contiguously, plus a trailing null. The codec is
//! kept separate from the driver plumbing so it can be tested anywhere.

/// Encode a string list into the driver's wire layout.
pub fn encode_string_list(entries: &[String]) -> Vec<u8> {
    let mut wide: Vec<u16> = Vec::new();
    for entry in entries {
        wide.extend(entry.encode_utf16());
        wide.push(0);
    }
    wide.push(0);

    let mut bytes = Vec::with_capacity(4 + wide.len() * 2);
    bytes.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    for unit in wide {
        bytes.extend_from_slice(&unit.to_le_bytes());
    }
    bytes
}

/// Decode the driver's wire layout into a string list.
///
/// Tolerates short or truncated buffers by returning what parsed; an
/// empty reply decodes to an empty list.
pub fn decode_string_list(bytes: &[u8]) -> Vec<String> {
    if bytes.len() < 4 {
        return Vec::new();
    }
    let count = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;

    let wide: Vec<u16> = bytes[4..]
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    let mut entries = Vec::new();
    let mut current = Vec::new();
    for &unit in &wide {
        if unit == 0 {
            if current.is_empty() {
                break;
            }
            entries.push(String::from_utf16_lossy(&current));
            current.clear();
            if entries.len() == count {
                break;
            }
        } else {
            current.push(unit);
        }
    }
    entries
}

#[cfg(target_os = "windows")]
pub use driver::HideDriver;

#[cfg(target_os = "windows")]
mod driver {
    use log::debug;

    use windows_sys::Win32::Foundation::{
        CloseHandle, GetLastError, HANDLE, INVALID_HANDLE_VALUE,
    };
    use windows_sys::Win32::Storage::FileSystem::{
        CreateFileW, FILE_ATTRIBUTE_NORMAL, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING,
    };
    use windows_sys::Win32::System::IO::DeviceIoControl;

    use super::{decode_string_list, encode_string_list};
    use crate::error::{ProxyError, Result};

    /// Well-known name of the hiding driver's control device.
    const CONTROL_DEVICE_PATH: &str = r"\\.\HidHide";

    const FILE_DEVICE_UNKNOWN: u32 = 0x22;

    const fn hide_ioctl(function: u32) -> u32 {
        (FILE_DEVICE_UNKNOWN << 16) | (function << 2)
    }

    const IOCTL_GET_WHITELIST: u32 = hide_ioctl(0x800);
    const IOCTL_SET_WHITELIST: u32 = hide_ioctl(0x801);
    const IOCTL_GET_BLACKLIST: u32 = hide_ioctl(0x802);
    const IOCTL_SET_BLACKLIST: u32 = hide_ioctl(0x803);
    const IOCTL_GET_ACTIVE: u32 = hide_ioctl(0x804);
    const IOCTL_SET_ACTIVE: u32 = hide_ioctl(0x805);
    const IOCTL_GET_WLINVERSE: u32 = hide_ioctl(0x806);
    const IOCTL_SET_WLINVERSE: u32 = hide_ioctl(0x807);

    /// Open connection to the hiding driver.
    pub struct HideDriver {
        handle: HANDLE,
    }

    unsafe impl Send for HideDriver {}

    impl Drop for HideDriver {
        fn drop(&mut self) {
            if self.handle != INVALID_HANDLE_VALUE && !self.handle.is_null() {
                unsafe { CloseHandle(self.handle) };
            }
        }
    }

    impl HideDriver {
        /// Open the control device. Failure means the driver is absent or
        /// access was denied; callers log once and disable hiding.
        pub fn connect() -> Result<Self> {
            let wide: Vec<u16> = CONTROL_DEVICE_PATH
                .encode_utf16()
                .chain(std::iter::once(0))
                .collect();
            let handle = unsafe {
                CreateFileW(
                    wide.as_ptr(),
                    0,
                    FILE_SHARE_READ | FILE_SHARE_WRITE,
                    std::ptr::null(),
                    OPEN_EXISTING,
                    FILE_ATTRIBUTE_NORMAL,
                    std::ptr::null_mut(),
                )
            };
            if handle == INVALID_HANDLE_VALUE {
                return Err(ProxyError::HideDriver(format!(
                    "cannot open {CONTROL_DEVICE_PATH}: os error {}",
                    unsafe { GetLastError() }
                )));
            }
            debug!("hide driver connected");
            Ok(Self { handle })
        }

        pub fn blacklist(&self) -> Result<Vec<String>> {
            self.get_list(IOCTL_GET_BLACKLIST)
        }

        pub fn set_blacklist(&self, entries: &[String]) -> Result<()> {
            self.set_list(IOCTL_SET_BLACKLIST, entries)
        }

        /// Add one identity; a no-op when already present.
        pub fn add_to_blacklist(&self, identity: &str) -> Result<()> {
            let mut entries = self.blacklist()?;
            let upper = identity.to_ascii_uppercase();
            if !entries.iter().any(|e| e.to_ascii_uppercase() == upper) {
                entries.push(identity.to_string());
                self.set_blacklist(&entries)?;
            }
            Ok(())
        }

        pub fn remove_from_blacklist(&self, identity: &str) -> Result<()> {
            let mut entries = self.blacklist()?;
            let upper = identity.to_ascii_uppercase();
            let before = entries.len();
            entries.retain(|e| e.to_ascii_uppercase() != upper);
            if entries.len() != before {
                self.set_blacklist(&entries)?;
            }
            Ok(())
        }

        pub fn whitelist(&self) -> Result<Vec<String>> {
            self.get_list(IOCTL_GET_WHITELIST)
        }

        pub fn set_whitelist(&self, entries: &[String]) -> Result<()> {
            self.set_list(IOCTL_SET_WHITELIST, entries)
        }

        pub fn add_to_whitelist(&self, process_path: &str) -> Result<()> {
            let mut entries = self.whitelist()?;
            let upper = process_path.to_ascii_uppercase();
            if !entries.iter().any(|e| e.to_ascii_uppercase() == upper) {
                entries.push(process_path.to_string());
                self.set_whitelist(&entries)?;
            }
            Ok(())
        }

        pub fn set_active(&self, active: bool) -> Result<()> {
            self.set_flag(IOCTL_SET_ACTIVE, active)
        }

        pub fn is_active(&self) -> Result<bool> {
            self.get_flag(IOCTL_GET_ACTIVE)
        }

        pub fn set_inverse_mode(&self, inverse: bool) -> Result<()> {
            self.set_flag(IOCTL_SET_WLINVERSE, inverse)
        }

        pub fn inverse_mode(&self) -> Result<bool> {
            self.get_flag(IOCTL_GET_WLINVERSE)
        }

        /// Two-call read: size probe, then payload.
        fn get_list(&self, code: u32) -> Result<Vec<String>> {
            let mut needed = 0u32;
            unsafe {
                DeviceIoControl(
                    self.handle,
                    code,
                    std::ptr::null(),
                    0,
                    std::ptr::null_mut(),
                    0,
                    &mut needed,
                    std::ptr::null_mut(),
                );
            }
            if needed == 0 {
                // A successful empty reply means no entries, not absence.
                return Ok(Vec::new());
            }

            let mut buffer = vec![0u8; needed as usize];
            let mut returned = 0u32;
            let ok = unsafe {
                DeviceIoControl(
                    self.handle,
                    code,
                    std::ptr::null(),
                    0,
                    buffer.as_mut_ptr() as *mut _,
                    buffer.len() as u32,
                    &mut returned,
                    std::ptr::null_mut(),
                )
            };
            if ok == 0 {
                return Err(ProxyError::HideRequest(unsafe { GetLastError() }));
            }
            buffer.truncate(returned as usize);
            Ok(decode_string_list(&buffer))
        }

        fn set_list(&self, code: u32, entries: &[String]) -> Result<()> {
            let buffer = encode_string_list(entries);
            let mut returned = 0u32;
            let ok = unsafe {
                DeviceIoControl(
                    self.handle,
                    code,
                    buffer.as_ptr() as *const _,
                    buffer.len() as u32,
                    std::ptr::null_mut(),
                    0,
                    &mut returned,
                    std::ptr::null_mut(),
                )
            };
            if ok == 0 {
                return Err(ProxyError::HideRequest(unsafe { GetLastError() }));
            }
            Ok(())
        }

        fn set_flag(&self, code: u32, value: bool) -> Result<()> {
            let raw: u32 = value.into();
            let mut returned = 0u32;
            let ok = unsafe {
                DeviceIoControl(
                    self.handle,
                    code,
                    &raw as *const u32 as *const _,
                    std::mem::size_of::<u32>() as u32,
                    std::ptr::null_mut(),
                    0,
                    &mut returned,
                    std::ptr::null_mut(),
                )
            };
            if ok == 0 {
                return Err(ProxyError::HideRequest(unsafe { GetLastError() }));
            }
            Ok(())
        }

        fn get_flag(&self, code: u32) -> Result<bool> {
            let mut raw = 0u32;
            let mut returned = 0u32;
            let ok = unsafe {
                DeviceIoControl(
                    self.handle,
                    code,
                    std::ptr::null(),
                    0,
                    &mut raw as *mut u32 as *mut _,
                    std::mem::size_of::<u32>() as u32,
                    &mut returned,
                    std::ptr::null_mut(),
                )
            };
            if ok == 0 {
                return Err(ProxyError::HideRequest(unsafe { GetLastError() }));
            }
            Ok(raw != 0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_round_trips() {
        let entries = vec![
            "HID#VID_045E&PID_028E".to_string(),
            r"C:\Games\racing.exe".to_string(),
        ];
        let encoded = encode_string_list(&entries);
        assert_eq!(decode_string_list(&encoded), entries);
    }

    #[test]
    fn empty_list_encodes_count_and_terminator() {
        let encoded = encode_string_list(&[]);
        // count (4 bytes) + trailing null (2 bytes)
        assert_eq!(encoded.len(), 6);
        assert_eq!(&encoded[..4], &0u32.to_le_bytes());
        assert!(decode_string_list(&encoded).is_empty());
    }

    #[test]
    fn decode_tolerates_garbage() {
        assert!(decode_string_list(&[]).is_empty());
        assert!(decode_string_list(&[1, 0]).is_empty());
        // Count claims more entries than the payload carries.
        let mut encoded = encode_string_list(&["only".to_string()]);
        encoded[0] = 9;
        assert_eq!(decode_string_list(&encoded), vec!["only".to_string()]);
    }

    #[test]
    fn decode_stops_at_double_null() {
        let mut encoded = encode_string_list(&["a".to_string(), "b".to_string()]);
        // Append stray data past the terminator; it must be ignored.
        encoded.extend_from_slice(&[b'x', 0, b'y', 0]);
        assert_eq!(
            decode_string_list(&encoded),
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn non_ascii_identities_survive() {
        let entries = vec!["контроллер №1".to_string()];
        assert_eq!(decode_string_list(&encode_string_list(&entries)), entries);
    }
}
