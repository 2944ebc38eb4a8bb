//! padproxy: a real-time controller input proxy.
//!
//! Physical pads from the fixed-slot vendor API and the generic HID
//! stack are polled at the kilohertz scale, normalized into one
//! canonical gamepad form, filtered (SOCD cleaning, debouncing, stick
//! deadzone), and re-emitted as synthetic controllers on a kernel
//! virtual bus. Rumble from consuming applications flows back through
//! the bus into the physical device.

pub mod capture;
pub mod clock;
pub mod config;
pub mod dashboard;
pub mod emulator;
pub mod error;
pub mod gamepad;
pub mod identity;
pub mod lifecycle;
pub mod logging;
pub mod scheduler;
pub mod threading;
pub mod translate;

pub use capture::{CaptureEngine, ControllerState};
pub use config::{ConfigStore, ProxySettings};
pub use emulator::VirtualDeviceManager;
pub use error::{ProxyError, Result};
pub use gamepad::{Buttons, Gamepad, TargetKind, TranslatedState};
pub use translate::TranslationPipeline;
