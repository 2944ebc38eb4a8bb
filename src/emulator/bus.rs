#![cfg(target_os = "windows")]

//! Virtual-bus client.
//!
//! Thin user-mode client for the kernel bus driver that materializes the
//! synthetic pads. The driver is reached through its device interface and
//! driven with buffered ioctls carrying `#[repr(C)]` payloads:
//!
//! - plug in / unplug a target by session-unique serial
//! - submit input reports for either target family
//! - wait for feedback (rumble) notifications on Xbox-360-shaped targets
//!
//! The control handle is opened overlapped so submissions stay bounded
//! and notification waits remain cancellable at shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, warn};

use windows_sys::core::GUID;
use windows_sys::Win32::Devices::DeviceAndDriverInstallation::{
    SetupDiDestroyDeviceInfoList, SetupDiEnumDeviceInterfaces, SetupDiGetClassDevsW,
    SetupDiGetDeviceInterfaceDetailW, DIGCF_DEVICEINTERFACE, DIGCF_PRESENT,
    SP_DEVICE_INTERFACE_DATA, SP_DEVICE_INTERFACE_DETAIL_DATA_W,
};
use windows_sys::Win32::Foundation::{
    CloseHandle, GetLastError, ERROR_IO_PENDING, GENERIC_READ, GENERIC_WRITE, HANDLE,
    INVALID_HANDLE_VALUE, WAIT_OBJECT_0, WAIT_TIMEOUT,
};
use windows_sys::Win32::Storage::FileSystem::{
    CreateFileW, FILE_FLAG_OVERLAPPED, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING,
};
use windows_sys::Win32::System::Threading::{CreateEventW, WaitForSingleObject, INFINITE};
use windows_sys::Win32::System::IO::{CancelIoEx, DeviceIoControl, GetOverlappedResult, OVERLAPPED};

use crate::emulator::report::{DualAnalogReport, XusbReport};
use crate::error::{ProxyError, Result};
use crate::gamepad::TargetKind;

/// Device interface class of the virtual bus.
const BUS_INTERFACE_GUID: GUID = GUID::from_u128(0x96E42B22_F5E9_42F8_B043_ED0F932F014F);

/// Identifiers the bus advertises for its synthetics. The capture engine
/// filters these same pairs out of enumeration.
const XUSB_VENDOR_ID: u16 = 0x044F;
const XUSB_PRODUCT_ID: u16 = 0xB326;
const DUAL_ANALOG_VENDOR_ID: u16 = 0x054C;
const DUAL_ANALOG_PRODUCT_ID: u16 = 0x05C4;

const TARGET_TYPE_XUSB: u32 = 0;
const TARGET_TYPE_DUAL_ANALOG: u32 = 2;

const FILE_DEVICE_BUS_EXTENDER: u32 = 0x2A;
const METHOD_BUFFERED: u32 = 0;
const FILE_ANY_ACCESS: u32 = 0;

const fn bus_ioctl(function: u32) -> u32 {
    (FILE_DEVICE_BUS_EXTENDER << 16) | (FILE_ANY_ACCESS << 14) | (function << 2) | METHOD_BUFFERED
}

const IOCTL_PLUGIN_TARGET: u32 = bus_ioctl(0x800);
const IOCTL_UNPLUG_TARGET: u32 = bus_ioctl(0x801);
const IOCTL_XUSB_SUBMIT_REPORT: u32 = bus_ioctl(0x806);
const IOCTL_XUSB_REQUEST_NOTIFICATION: u32 = bus_ioctl(0x807);
const IOCTL_DUAL_ANALOG_SUBMIT_REPORT: u32 = bus_ioctl(0x808);

/// Poll granularity for cancellable notification waits.
const NOTIFY_WAIT_SLICE_MS: u32 = 100;

#[repr(C)]
struct PluginPayload {
    size: u32,
    serial_no: u32,
    target_type: u32,
    vendor_id: u16,
    product_id: u16,
}

#[repr(C)]
struct UnplugPayload {
    size: u32,
    serial_no: u32,
}

#[repr(C)]
struct XusbSubmitPayload {
    size: u32,
    serial_no: u32,
    report: XusbReport,
}

#[repr(C)]
struct DualAnalogSubmitPayload {
    size: u32,
    serial_no: u32,
    report: DualAnalogReport,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct XusbNotifyPayload {
    size: u32,
    serial_no: u32,
    large_motor: u8,
    small_motor: u8,
    led_number: u8,
}

struct BusHandle(HANDLE);

unsafe impl Send for BusHandle {}
unsafe impl Sync for BusHandle {}

impl Drop for BusHandle {
    fn drop(&mut self) {
        if self.0 != INVALID_HANDLE_VALUE && !self.0.is_null() {
            unsafe { CloseHandle(self.0) };
        }
    }
}

/// Connected client; clones share the one control handle, which closes
/// when the last clone drops.
#[derive(Clone)]
pub struct BusClient {
    handle: Arc<BusHandle>,
}

impl BusClient {
    /// Locate the bus device interface and open its control handle.
    pub fn connect() -> Result<Self> {
        let path = find_bus_path()?;
        let wide: Vec<u16> = path.encode_utf16().chain(std::iter::once(0)).collect();
        let handle = unsafe {
            CreateFileW(
                wide.as_ptr(),
                GENERIC_READ | GENERIC_WRITE,
                FILE_SHARE_READ | FILE_SHARE_WRITE,
                std::ptr::null(),
                OPEN_EXISTING,
                FILE_FLAG_OVERLAPPED,
                std::ptr::null_mut(),
            )
        };
        if handle == INVALID_HANDLE_VALUE {
            return Err(ProxyError::BusUnavailable(format!(
                "failed to open {path}: os error {}",
                unsafe { GetLastError() }
            )));
        }
        debug!("virtual bus opened at {path}");
        Ok(Self {
            handle: Arc::new(BusHandle(handle)),
        })
    }

    /// Register a new target with the bus.
    pub fn plugin_target(&self, serial: u32, kind: TargetKind) -> Result<()> {
        let (target_type, vendor_id, product_id) = match kind {
            TargetKind::XInput => (TARGET_TYPE_XUSB, XUSB_VENDOR_ID, XUSB_PRODUCT_ID),
            TargetKind::DInput => (
                TARGET_TYPE_DUAL_ANALOG,
                DUAL_ANALOG_VENDOR_ID,
                DUAL_ANALOG_PRODUCT_ID,
            ),
        };
        let payload = PluginPayload {
            size: std::mem::size_of::<PluginPayload>() as u32,
            serial_no: serial,
            target_type,
            vendor_id,
            product_id,
        };
        self.ioctl_sync(IOCTL_PLUGIN_TARGET, as_bytes(&payload), &mut [])
            .map(|_| ())
            .map_err(|code| ProxyError::BusUpdate { serial, code })
    }

    /// Remove a target from the bus.
    pub fn unplug_target(&self, serial: u32) -> Result<()> {
        let payload = UnplugPayload {
            size: std::mem::size_of::<UnplugPayload>() as u32,
            serial_no: serial,
        };
        self.ioctl_sync(IOCTL_UNPLUG_TARGET, as_bytes(&payload), &mut [])
            .map(|_| ())
            .map_err(|code| ProxyError::BusUpdate { serial, code })
    }

    /// Submit an input report for an Xbox-360-shaped target.
    pub fn submit_xusb(&self, serial: u32, report: &XusbReport) -> Result<()> {
        let payload = XusbSubmitPayload {
            size: std::mem::size_of::<XusbSubmitPayload>() as u32,
            serial_no: serial,
            report: *report,
        };
        self.ioctl_sync(IOCTL_XUSB_SUBMIT_REPORT, as_bytes(&payload), &mut [])
            .map(|_| ())
            .map_err(|code| ProxyError::BusUpdate { serial, code })
    }

    /// Submit an input report for a dual-analog target.
    pub fn submit_dual_analog(&self, serial: u32, report: &DualAnalogReport) -> Result<()> {
        let payload = DualAnalogSubmitPayload {
            size: std::mem::size_of::<DualAnalogSubmitPayload>() as u32,
            serial_no: serial,
            report: *report,
        };
        self.ioctl_sync(IOCTL_DUAL_ANALOG_SUBMIT_REPORT, as_bytes(&payload), &mut [])
            .map(|_| ())
            .map_err(|code| ProxyError::BusUpdate { serial, code })
    }

    /// Spawn a listener for feedback notifications on one target.
    ///
    /// The callback receives `(large_motor, small_motor, led_number)` on
    /// the listener thread. Dropping the returned handle cancels the wait
    /// and joins the thread; drop it before unplugging the target.
    pub fn listen_xusb_notifications<F>(&self, serial: u32, callback: F) -> NotificationListener
    where
        F: Fn(u8, u8, u8) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_for_thread = stop.clone();
        let handle = self.handle.clone();

        let thread = std::thread::Builder::new()
            .name(format!("padproxy-rumble-{serial}"))
            .spawn(move || notification_loop(handle, serial, stop_for_thread, callback))
            .ok();
        if thread.is_none() {
            warn!("failed to spawn notification listener for target {serial}");
        }

        NotificationListener { stop, thread }
    }

    /// Buffered ioctl driven to completion through the overlapped handle.
    /// Returns the transferred byte count or the OS error code.
    fn ioctl_sync(
        &self,
        code: u32,
        input: &[u8],
        output: &mut [u8],
    ) -> std::result::Result<u32, u32> {
        let event = unsafe { CreateEventW(std::ptr::null(), 1, 0, std::ptr::null()) };
        if event.is_null() {
            return Err(unsafe { GetLastError() });
        }
        let mut overlapped: OVERLAPPED = unsafe { std::mem::zeroed() };
        overlapped.hEvent = event;

        let mut transferred = 0u32;
        let ok = unsafe {
            DeviceIoControl(
                self.handle.0,
                code,
                input.as_ptr() as *const _,
                input.len() as u32,
                if output.is_empty() {
                    std::ptr::null_mut()
                } else {
                    output.as_mut_ptr() as *mut _
                },
                output.len() as u32,
                &mut transferred,
                &mut overlapped,
            )
        };

        let result = if ok != 0 {
            Ok(transferred)
        } else {
            let code = unsafe { GetLastError() };
            if code == ERROR_IO_PENDING {
                let ok = unsafe {
                    WaitForSingleObject(event, INFINITE);
                    GetOverlappedResult(self.handle.0, &overlapped, &mut transferred, 0)
                };
                if ok != 0 {
                    Ok(transferred)
                } else {
                    Err(unsafe { GetLastError() })
                }
            } else {
                Err(code)
            }
        };

        unsafe { CloseHandle(event) };
        result
    }
}

/// Handle to a running notification listener; cancels and joins on drop.
pub struct NotificationListener {
    stop: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl Drop for NotificationListener {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn notification_loop<F>(handle: Arc<BusHandle>, serial: u32, stop: Arc<AtomicBool>, callback: F)
where
    F: Fn(u8, u8, u8),
{
    let event = unsafe { CreateEventW(std::ptr::null(), 1, 0, std::ptr::null()) };
    if event.is_null() {
        return;
    }

    while !stop.load(Ordering::SeqCst) {
        let request = XusbNotifyPayload {
            size: std::mem::size_of::<XusbNotifyPayload>() as u32,
            serial_no: serial,
            ..Default::default()
        };
        let mut response = XusbNotifyPayload::default();
        let mut overlapped: OVERLAPPED = unsafe { std::mem::zeroed() };
        overlapped.hEvent = event;

        let mut transferred = 0u32;
        let ok = unsafe {
            DeviceIoControl(
                handle.0,
                IOCTL_XUSB_REQUEST_NOTIFICATION,
                &request as *const _ as *const _,
                std::mem::size_of::<XusbNotifyPayload>() as u32,
                &mut response as *mut _ as *mut _,
                std::mem::size_of::<XusbNotifyPayload>() as u32,
                &mut transferred,
                &mut overlapped,
            )
        };

        let completed = if ok != 0 {
            true
        } else if unsafe { GetLastError() } == ERROR_IO_PENDING {
            // Wait in short slices so shutdown stays responsive.
            loop {
                if stop.load(Ordering::SeqCst) {
                    unsafe { CancelIoEx(handle.0, &overlapped) };
                    unsafe { GetOverlappedResult(handle.0, &overlapped, &mut transferred, 1) };
                    break false;
                }
                match unsafe { WaitForSingleObject(event, NOTIFY_WAIT_SLICE_MS) } {
                    WAIT_OBJECT_0 => {
                        let ok = unsafe {
                            GetOverlappedResult(handle.0, &overlapped, &mut transferred, 0)
                        };
                        break ok != 0;
                    }
                    WAIT_TIMEOUT => continue,
                    _ => break false,
                }
            }
        } else {
            // The target is gone or the bus rejected the request; back
            // off instead of spinning.
            std::thread::sleep(std::time::Duration::from_millis(NOTIFY_WAIT_SLICE_MS as u64));
            false
        };

        if completed && transferred as usize >= std::mem::size_of::<XusbNotifyPayload>() {
            callback(response.large_motor, response.small_motor, response.led_number);
        }
    }

    unsafe { CloseHandle(event) };
}

/// Resolve the first present bus device interface path.
fn find_bus_path() -> Result<String> {
    let devinfo = unsafe {
        SetupDiGetClassDevsW(
            &BUS_INTERFACE_GUID,
            std::ptr::null(),
            std::ptr::null_mut(),
            DIGCF_PRESENT | DIGCF_DEVICEINTERFACE,
        )
    };
    if devinfo as isize == -1 || devinfo as isize == 0 {
        return Err(ProxyError::BusUnavailable(
            "bus device class unavailable".to_string(),
        ));
    }

    let mut iface_data: SP_DEVICE_INTERFACE_DATA = unsafe { std::mem::zeroed() };
    iface_data.cbSize = std::mem::size_of::<SP_DEVICE_INTERFACE_DATA>() as u32;
    let ok = unsafe {
        SetupDiEnumDeviceInterfaces(
            devinfo,
            std::ptr::null(),
            &BUS_INTERFACE_GUID,
            0,
            &mut iface_data,
        )
    };
    if ok == 0 {
        unsafe { SetupDiDestroyDeviceInfoList(devinfo) };
        return Err(ProxyError::BusUnavailable(
            "bus driver not installed".to_string(),
        ));
    }

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
        unsafe { SetupDiDestroyDeviceInfoList(devinfo) };
        return Err(ProxyError::BusUnavailable(
            "bus interface detail unavailable".to_string(),
        ));
    }

    let mut detail_buf = vec![0u64; (required as usize + 7) / 8];
    let detail = detail_buf.as_mut_ptr() as *mut SP_DEVICE_INTERFACE_DETAIL_DATA_W;
    unsafe {
        (*detail).cbSize = std::mem::size_of::<SP_DEVICE_INTERFACE_DETAIL_DATA_W>() as u32;
    }
    let ok = unsafe {
        SetupDiGetDeviceInterfaceDetailW(
            devinfo,
            &iface_data,
            detail,
            required,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
        )
    };
    let path = if ok != 0 {
        unsafe {
            let path_ptr = std::ptr::addr_of!((*detail).DevicePath) as *const u16;
            let mut len = 0usize;
            while *path_ptr.add(len) != 0 {
                len += 1;
            }
            Some(String::from_utf16_lossy(std::slice::from_raw_parts(
                path_ptr, len,
            )))
        }
    } else {
        None
    };
    unsafe { SetupDiDestroyDeviceInfoList(devinfo) };

    path.ok_or_else(|| ProxyError::BusUnavailable("bus interface path unavailable".to_string()))
}

fn as_bytes<T>(value: &T) -> &[u8] {
    unsafe { std::slice::from_raw_parts(value as *const T as *const u8, std::mem::size_of::<T>()) }
}
