#![cfg(target_os = "windows")]

//! Windows capture backend.
//!
//! Everything OS-facing in the capture path lives here:
//! - HID interface enumeration through the device-information set APIs,
//!   including the synthetic-device property check
//! - capability-table extraction from preparsed descriptor data
//! - overlapped (non-blocking) report reads with per-entry buffers
//! - report decoding through the OS HID parser into usage sets
//! - vendor-API slot polling and vibration output
//!
//! ## Handle ownership
//! [`HidChannel`] owns the device handle, the completion event, and the
//! preparsed-data handle; all three are released in `Drop`. The overlapped
//! structure and read buffer are boxed so their addresses stay stable
//! while a read is in flight, no matter where the channel itself moves.

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsStr;
use std::os::windows::ffi::OsStrExt;

use log::{debug, warn};

use windows_sys::core::GUID;
use windows_sys::Win32::Devices::DeviceAndDriverInstallation::{
    SetupDiDestroyDeviceInfoList, SetupDiEnumDeviceInterfaces, SetupDiGetClassDevsW,
    SetupDiGetDeviceInterfaceDetailW, SetupDiGetDevicePropertyW, DIGCF_DEVICEINTERFACE,
    DIGCF_PRESENT, HDEVINFO, SP_DEVICE_INTERFACE_DATA, SP_DEVICE_INTERFACE_DETAIL_DATA_W,
    SP_DEVINFO_DATA,
};
use windows_sys::Win32::Devices::HumanInterfaceDevice::{
    HidD_FreePreparsedData, HidD_GetHidGuid, HidD_GetPreparsedData, HidD_GetProductString,
    HidP_GetButtonCaps, HidP_GetCaps, HidP_GetUsageValue, HidP_GetUsages, HidP_GetValueCaps,
    HidP_Input, HIDP_BUTTON_CAPS, HIDP_CAPS, HIDP_STATUS_SUCCESS, HIDP_VALUE_CAPS,
    PHIDP_PREPARSED_DATA,
};
use windows_sys::Win32::Devices::Properties::{DEVPROPKEY, DEVPROPTYPE};
use windows_sys::Win32::Foundation::{
    CloseHandle, GetLastError, ERROR_BAD_COMMAND, ERROR_DEVICE_NOT_CONNECTED, ERROR_IO_INCOMPLETE,
    ERROR_IO_PENDING, ERROR_SUCCESS, GENERIC_READ, GENERIC_WRITE, HANDLE, INVALID_HANDLE_VALUE,
};
use windows_sys::Win32::Storage::FileSystem::{
    CreateFileW, ReadFile, FILE_ATTRIBUTE_NORMAL, FILE_FLAG_OVERLAPPED, FILE_SHARE_READ,
    FILE_SHARE_WRITE, OPEN_EXISTING,
};
use windows_sys::Win32::System::Threading::{CreateEventW, ResetEvent};
use windows_sys::Win32::System::IO::{GetOverlappedResult, OVERLAPPED};
use windows_sys::Win32::UI::Input::XboxController::{
    XInputGetState, XInputSetState, XINPUT_STATE, XINPUT_VIBRATION,
};

use crate::capture::decoder::{ButtonCap, CapabilityTable, ValueCap};
use crate::capture::{
    apply_hid_input, apply_hid_read_failure, ControllerState, EnumeratedInterface, ReadFailure,
    VendorPoll, HID_READ_BUFFER_LEN,
};
use crate::error::{ProxyError, Result};
use crate::gamepad::{Buttons, Gamepad};

/// DEVPKEY_Device_UINumber; set on bus-emitted synthetic devices.
const DEVPKEY_DEVICE_UI_NUMBER: DEVPROPKEY = DEVPROPKEY {
    fmtid: GUID::from_u128(0xa45c254e_df1c_4efd_8020_67d146a850e0),
    pid: 18,
};

fn wide(s: &str) -> Vec<u16> {
    OsStr::new(s).encode_wide().chain(std::iter::once(0)).collect()
}

fn from_wide(buf: &[u16]) -> String {
    let end = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
    String::from_utf16_lossy(&buf[..end])
}

/// Confirm the vendor API is present by querying slot 0. An empty slot is
/// fine; anything other than success/not-connected means the API is
/// unusable.
pub fn probe_vendor_api() -> Result<()> {
    let mut state: XINPUT_STATE = unsafe { std::mem::zeroed() };
    let result = unsafe { XInputGetState(0, &mut state) };
    if result == ERROR_SUCCESS || result == ERROR_DEVICE_NOT_CONNECTED {
        Ok(())
    } else {
        Err(ProxyError::Enumeration(format!(
            "vendor API unavailable, error {result}"
        )))
    }
}

/// Poll one vendor slot.
pub fn poll_vendor_slot(user_index: u32) -> VendorPoll {
    let mut state: XINPUT_STATE = unsafe { std::mem::zeroed() };
    let result = unsafe { XInputGetState(user_index, &mut state) };
    match result {
        ERROR_SUCCESS => VendorPoll::Success {
            packet_number: state.dwPacketNumber,
            gamepad: Gamepad {
                buttons: Buttons::from_bits_truncate(state.Gamepad.wButtons),
                left_trigger: state.Gamepad.bLeftTrigger,
                right_trigger: state.Gamepad.bRightTrigger,
                thumb_lx: state.Gamepad.sThumbLX,
                thumb_ly: state.Gamepad.sThumbLY,
                thumb_rx: state.Gamepad.sThumbRX,
                thumb_ry: state.Gamepad.sThumbRY,
            },
        },
        ERROR_DEVICE_NOT_CONNECTED => VendorPoll::NotConnected,
        other => VendorPoll::Error(other),
    }
}

/// Write normalized motor speeds to a vendor slot.
pub fn set_vendor_vibration(user_index: u32, left: f32, right: f32) {
    let mut vibration = XINPUT_VIBRATION {
        wLeftMotorSpeed: (left.clamp(0.0, 1.0) * 65535.0) as u16,
        wRightMotorSpeed: (right.clamp(0.0, 1.0) * 65535.0) as u16,
    };
    unsafe { XInputSetState(user_index, &mut vibration) };
}

/// Enumerate present HID interfaces with everything reconciliation needs.
///
/// A failure to build the device-information set is an enumeration error;
/// failures on individual interfaces are logged and skipped.
pub fn enumerate_interfaces() -> Result<Vec<EnumeratedInterface>> {
    let mut hid_guid: GUID = unsafe { std::mem::zeroed() };
    unsafe { HidD_GetHidGuid(&mut hid_guid) };

    let devinfo: HDEVINFO = unsafe {
        SetupDiGetClassDevsW(
            &hid_guid,
            std::ptr::null(),
            std::ptr::null_mut(),
            DIGCF_PRESENT | DIGCF_DEVICEINTERFACE,
        )
    };
    if devinfo as isize == -1 || devinfo as isize == 0 {
        return Err(ProxyError::Enumeration(format!(
            "SetupDiGetClassDevs failed, error {}",
            unsafe { GetLastError() }
        )));
    }

    let mut interfaces = Vec::new();
    let mut index = 0u32;
    loop {
        let mut iface_data: SP_DEVICE_INTERFACE_DATA = unsafe { std::mem::zeroed() };
        iface_data.cbSize = std::mem::size_of::<SP_DEVICE_INTERFACE_DATA>() as u32;
        let ok = unsafe {
            SetupDiEnumDeviceInterfaces(devinfo, std::ptr::null(), &hid_guid, index, &mut iface_data)
        };
        if ok == 0 {
            break;
        }
        index += 1;

        // Two-call pattern for the variable-length detail record.
        let mut required = 0u32;
        unsafe {
            SetupDiGetDeviceInterfaceDetailW(
                devinfo,
                &iface_data,
                std::ptr::null_mut(),
                0,
                &mut required,
                std::ptr::null_mut(),
            );
        }
        if required == 0 {
            continue;
        }

        // u64 backing keeps the detail record aligned.
        let mut detail_buf = vec![0u64; (required as usize + 7) / 8];
        let detail = detail_buf.as_mut_ptr() as *mut SP_DEVICE_INTERFACE_DETAIL_DATA_W;
        unsafe {
            (*detail).cbSize = std::mem::size_of::<SP_DEVICE_INTERFACE_DETAIL_DATA_W>() as u32;
        }
        let mut devinfo_data: SP_DEVINFO_DATA = unsafe { std::mem::zeroed() };
        devinfo_data.cbSize = std::mem::size_of::<SP_DEVINFO_DATA>() as u32;
        let ok = unsafe {
            SetupDiGetDeviceInterfaceDetailW(
                devinfo,
                &iface_data,
                detail,
                required,
                std::ptr::null_mut(),
                &mut devinfo_data,
            )
        };
        if ok == 0 {
            continue;
        }

        let path = unsafe {
            let path_ptr = std::ptr::addr_of!((*detail).DevicePath) as *const u16;
            let mut len = 0usize;
            while *path_ptr.add(len) != 0 {
                len += 1;
            }
            String::from_utf16_lossy(std::slice::from_raw_parts(path_ptr, len))
        };

        let synthetic_property = has_ui_number_property(devinfo, &devinfo_data);

        match query_interface(&path) {
            Ok((product_name, caps)) => interfaces.push(EnumeratedInterface {
                device_path: path,
                product_name,
                caps,
                synthetic_property,
            }),
            Err(e) => debug!("skipping interface {path}: {e}"),
        }
    }

    unsafe { SetupDiDestroyDeviceInfoList(devinfo) };
    Ok(interfaces)
}

fn has_ui_number_property(devinfo: HDEVINFO, devinfo_data: &SP_DEVINFO_DATA) -> bool {
    let mut prop_type: DEVPROPTYPE = 0;
    let mut buffer = [0u8; 256];
    let mut required = 0u32;
    let ok = unsafe {
        SetupDiGetDevicePropertyW(
            devinfo,
            devinfo_data,
            &DEVPKEY_DEVICE_UI_NUMBER,
            &mut prop_type,
            buffer.as_mut_ptr(),
            buffer.len() as u32,
            &mut required,
            0,
        )
    };
    ok != 0 && required > 0
}

/// Open a short-lived query handle to fetch the product string and the
/// capability table.
fn query_interface(path: &str) -> Result<(String, CapabilityTable)> {
    let handle = open_handle(path, 0)?;

    let mut product = [0u16; 128];
    let have_product = unsafe {
        HidD_GetProductString(
            handle,
            product.as_mut_ptr() as *mut _,
            (product.len() * 2) as u32,
        )
    } != 0;
    let product_name = if have_product {
        from_wide(&product)
    } else {
        String::new()
    };

    let mut ppd: PHIDP_PREPARSED_DATA = 0;
    if unsafe { HidD_GetPreparsedData(handle, &mut ppd) } == 0 || ppd == 0 {
        let code = unsafe { GetLastError() };
        unsafe { CloseHandle(handle) };
        return Err(ProxyError::DeviceOpen {
            path: path.to_string(),
            code,
        });
    }

    let caps = read_capability_table(ppd);

    unsafe {
        HidD_FreePreparsedData(ppd);
        CloseHandle(handle);
    }

    caps.map(|caps| (product_name, caps)).ok_or_else(|| ProxyError::DeviceOpen {
        path: path.to_string(),
        code: 0,
    })
}

/// Flatten the preparsed descriptor into plain capability data.
fn read_capability_table(ppd: PHIDP_PREPARSED_DATA) -> Option<CapabilityTable> {
    let mut caps: HIDP_CAPS = unsafe { std::mem::zeroed() };
    if unsafe { HidP_GetCaps(ppd, &mut caps) } != HIDP_STATUS_SUCCESS {
        return None;
    }

    let mut buttons = Vec::new();
    if caps.NumberInputButtonCaps > 0 {
        let mut raw: Vec<HIDP_BUTTON_CAPS> =
            vec![unsafe { std::mem::zeroed() }; caps.NumberInputButtonCaps as usize];
        let mut len = caps.NumberInputButtonCaps;
        let status = unsafe { HidP_GetButtonCaps(HidP_Input, raw.as_mut_ptr(), &mut len, ppd) };
        if status == HIDP_STATUS_SUCCESS {
            raw.truncate(len as usize);
            for cap in &raw {
                let (usage_min, usage_max) = unsafe {
                    if cap.IsRange != 0 {
                        (cap.Anonymous.Range.UsageMin, cap.Anonymous.Range.UsageMax)
                    } else {
                        (cap.Anonymous.NotRange.Usage, cap.Anonymous.NotRange.Usage)
                    }
                };
                buttons.push(ButtonCap {
                    usage_page: cap.UsagePage,
                    usage_min,
                    usage_max,
                });
            }
        }
    }

    let mut values = Vec::new();
    if caps.NumberInputValueCaps > 0 {
        let mut raw: Vec<HIDP_VALUE_CAPS> =
            vec![unsafe { std::mem::zeroed() }; caps.NumberInputValueCaps as usize];
        let mut len = caps.NumberInputValueCaps;
        let status = unsafe { HidP_GetValueCaps(HidP_Input, raw.as_mut_ptr(), &mut len, ppd) };
        if status == HIDP_STATUS_SUCCESS {
            raw.truncate(len as usize);
            for cap in &raw {
                let (usage_min, usage_max) = unsafe {
                    if cap.IsRange != 0 {
                        (cap.Anonymous.Range.UsageMin, cap.Anonymous.Range.UsageMax)
                    } else {
                        (cap.Anonymous.NotRange.Usage, cap.Anonymous.NotRange.Usage)
                    }
                };
                for usage in usage_min..=usage_max {
                    values.push(ValueCap {
                        usage_page: cap.UsagePage,
                        usage,
                        logical_min: cap.LogicalMin,
                        logical_max: cap.LogicalMax,
                    });
                }
            }
        }
    }

    Some(CapabilityTable {
        usage_page: caps.UsagePage,
        usage: caps.Usage,
        buttons,
        values,
    })
}

fn open_handle(path: &str, flags: u32) -> Result<HANDLE> {
    let wide_path = wide(path);
    let try_open = |access: u32| unsafe {
        CreateFileW(
            wide_path.as_ptr(),
            access,
            FILE_SHARE_READ | FILE_SHARE_WRITE,
            std::ptr::null(),
            OPEN_EXISTING,
            FILE_ATTRIBUTE_NORMAL | flags,
            std::ptr::null_mut(),
        )
    };

    let mut handle = try_open(GENERIC_READ | GENERIC_WRITE);
    if handle == INVALID_HANDLE_VALUE {
        handle = try_open(GENERIC_READ);
    }
    if handle == INVALID_HANDLE_VALUE {
        Err(ProxyError::DeviceOpen {
            path: path.to_string(),
            code: unsafe { GetLastError() },
        })
    } else {
        Ok(handle)
    }
}

/// Boxed so the overlapped structure and buffer keep a stable address
/// while a read is outstanding.
struct ReadState {
    overlapped: OVERLAPPED,
    buffer: [u8; HID_READ_BUFFER_LEN],
}

/// Open device channel for one pure-HID entry.
pub struct HidChannel {
    handle: HANDLE,
    event: HANDLE,
    ppd: PHIDP_PREPARSED_DATA,
    read: Box<ReadState>,
}

// The raw handles are only touched under the engine's channel lock.
unsafe impl Send for HidChannel {}

impl Drop for HidChannel {
    fn drop(&mut self) {
        unsafe {
            if self.ppd != 0 {
                HidD_FreePreparsedData(self.ppd);
                self.ppd = 0;
            }
            if self.event != INVALID_HANDLE_VALUE && !self.event.is_null() {
                CloseHandle(self.event);
            }
            if self.handle != INVALID_HANDLE_VALUE && !self.handle.is_null() {
                CloseHandle(self.handle);
            }
        }
    }
}

impl HidChannel {
    /// Open the device for overlapped reads and keep its preparsed data
    /// alive for report decoding.
    pub fn open(path: &str) -> Result<Self> {
        let handle = open_handle(path, FILE_FLAG_OVERLAPPED)?;

        let mut ppd: PHIDP_PREPARSED_DATA = 0;
        if unsafe { HidD_GetPreparsedData(handle, &mut ppd) } == 0 || ppd == 0 {
            let code = unsafe { GetLastError() };
            unsafe { CloseHandle(handle) };
            return Err(ProxyError::DeviceOpen {
                path: path.to_string(),
                code,
            });
        }

        let event = unsafe {
            CreateEventW(std::ptr::null(), 1, 0, std::ptr::null())
        };
        if event.is_null() {
            let code = unsafe { GetLastError() };
            unsafe {
                HidD_FreePreparsedData(ppd);
                CloseHandle(handle);
            }
            return Err(ProxyError::DeviceOpen {
                path: path.to_string(),
                code,
            });
        }

        let mut read = Box::new(ReadState {
            overlapped: unsafe { std::mem::zeroed() },
            buffer: [0u8; HID_READ_BUFFER_LEN],
        });
        read.overlapped.hEvent = event;

        Ok(Self {
            handle,
            event,
            ppd,
            read,
        })
    }
}

/// Drive one entry's overlapped read state machine for one tick.
pub fn service_channel(state: &mut ControllerState, channel: &mut HidChannel, now: u64) {
    if !state.read_in_flight {
        unsafe { ResetEvent(channel.event) };
        let mut bytes_read = 0u32;
        let read = &mut *channel.read;
        let ok = unsafe {
            ReadFile(
                channel.handle,
                read.buffer.as_mut_ptr() as *mut _,
                read.buffer.len() as u32,
                &mut bytes_read,
                &mut read.overlapped,
            )
        };
        if ok != 0 {
            // Completed synchronously.
            process_report(state, channel, bytes_read as usize, now);
        } else {
            let code = unsafe { GetLastError() };
            match code {
                ERROR_IO_PENDING => state.read_in_flight = true,
                ERROR_DEVICE_NOT_CONNECTED | ERROR_BAD_COMMAND => {
                    apply_hid_read_failure(state, ReadFailure::Disconnected(code));
                }
                other => apply_hid_read_failure(state, ReadFailure::Transient(other)),
            }
        }
        return;
    }

    // A read is outstanding; poll without blocking.
    let mut transferred = 0u32;
    let ok = unsafe {
        GetOverlappedResult(channel.handle, &channel.read.overlapped, &mut transferred, 0)
    };
    if ok != 0 {
        state.read_in_flight = false;
        if transferred > 0 {
            process_report(state, channel, transferred as usize, now);
        }
    } else {
        let code = unsafe { GetLastError() };
        match code {
            ERROR_IO_INCOMPLETE => {
                apply_hid_read_failure(state, ReadFailure::Incomplete);
            }
            ERROR_DEVICE_NOT_CONNECTED | ERROR_BAD_COMMAND => {
                apply_hid_read_failure(state, ReadFailure::Disconnected(code));
                warn!("HID device disconnected: {}", state.product_name);
            }
            other => apply_hid_read_failure(state, ReadFailure::Transient(other)),
        }
    }
}

/// Decode one raw report through the OS parser and fold it into the entry.
fn process_report(state: &mut ControllerState, channel: &mut HidChannel, len: usize, now: u64) {
    let report = &mut channel.read.buffer[..len.min(HID_READ_BUFFER_LEN)];
    if report.is_empty() {
        return;
    }

    // Buttons: one pass per distinct button usage page.
    let mut active = BTreeSet::new();
    let mut pages: Vec<u16> = state
        .capability_table
        .buttons
        .iter()
        .map(|b| b.usage_page)
        .collect();
    pages.sort_unstable();
    pages.dedup();
    for page in pages {
        let mut usages = [0u16; 128];
        let mut usage_len = usages.len() as u32;
        let status = unsafe {
            HidP_GetUsages(
                HidP_Input,
                page,
                0,
                usages.as_mut_ptr(),
                &mut usage_len,
                channel.ppd,
                report.as_mut_ptr(),
                report.len() as u32,
            )
        };
        if status == HIDP_STATUS_SUCCESS {
            for &usage in &usages[..usage_len as usize] {
                active.insert(usage);
            }
        }
    }

    // Values: one query per declared axis usage.
    let mut values = BTreeMap::new();
    for cap in state.capability_table.values.clone() {
        let mut value = 0u32;
        let status = unsafe {
            HidP_GetUsageValue(
                HidP_Input,
                cap.usage_page,
                0,
                cap.usage,
                &mut value,
                channel.ppd,
                report.as_mut_ptr(),
                report.len() as u32,
            )
        };
        if status == HIDP_STATUS_SUCCESS {
            values.insert(cap.usage, value as i32);
        }
    }

    apply_hid_input(state, active, values, now);
}
