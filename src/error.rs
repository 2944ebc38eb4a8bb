use thiserror::Error;

/// Errors surfaced by the proxy's subsystems.
///
/// Only [`ProxyError::Enumeration`] aborts startup; every other kind is
/// logged and degrades (skip the device, retry next tick, or fall back to
/// input-test mode).
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("device enumeration failed: {0}")]
    Enumeration(String),

    #[error("failed to open device {path}: os error {code}")]
    DeviceOpen { path: String, code: u32 },

    #[error("virtual bus unavailable: {0}")]
    BusUnavailable(String),

    #[error("virtual bus rejected update for target {serial}: os error {code}")]
    BusUpdate { serial: u32, code: u32 },

    #[error("hide driver unavailable: {0}")]
    HideDriver(String),

    #[error("hide driver request failed: os error {0}")]
    HideRequest(u32),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("not supported on this platform: {0}")]
    PlatformNotSupported(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProxyError>;
