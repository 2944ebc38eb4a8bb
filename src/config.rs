//! INI-style configuration store.
//!
//! Settings live in a flat `key=value` file next to the executable.
//! Unknown keys are preserved across a load/save round trip; a value that
//! fails to parse falls back to the key's default and logs a warning.
//! Readers take a short lock per key.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

use log::{info, warn};

use crate::error::Result;

/// Default configuration file name, resolved relative to the executable.
pub const CONFIG_FILE_NAME: &str = "config.ini";

/// Thread-safe string-keyed configuration map with file persistence.
pub struct ConfigStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl ConfigStore {
    /// Create a store bound to an explicit file path.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            values: Mutex::new(BTreeMap::new()),
        }
    }

    /// Create a store bound to `config.ini` next to the executable,
    /// falling back to the working directory when the executable path is
    /// unavailable.
    pub fn beside_executable() -> Self {
        let dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));
        Self::at(dir.join(CONFIG_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load `key=value` pairs from the backing file.
    ///
    /// Returns `Ok(false)` when the file does not exist (defaults apply).
    /// Blank lines and `#`/`;` comments are skipped.
    pub fn load(&self) -> Result<bool> {
        let file = match std::fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("config file not found, using defaults: {}", self.path.display());
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };

        let mut parsed = BTreeMap::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                parsed.insert(key.trim().to_string(), value.trim().to_string());
            }
        }

        if let Ok(mut values) = self.values.lock() {
            *values = parsed;
        }
        info!("configuration loaded from {}", self.path.display());
        Ok(true)
    }

    /// Persist every key (recognized or not) back to the file.
    pub fn save(&self) -> Result<()> {
        let mut file = std::fs::File::create(&self.path)?;
        writeln!(file, "# padproxy configuration")?;
        writeln!(file)?;
        if let Ok(values) = self.values.lock() {
            for (key, value) in values.iter() {
                writeln!(file, "{key}={value}")?;
            }
        }
        info!("configuration saved to {}", self.path.display());
        Ok(())
    }

    pub fn get_string(&self, key: &str, default: &str) -> String {
        self.values
            .lock()
            .ok()
            .and_then(|v| v.get(key).cloned())
            .unwrap_or_else(|| default.to_string())
    }

    pub fn get_int(&self, key: &str, default: i64) -> i64 {
        self.get_parsed(key, default)
    }

    pub fn get_float(&self, key: &str, default: f32) -> f32 {
        self.get_parsed(key, default)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        let Some(raw) = self.raw(key) else {
            return default;
        };
        match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => true,
            "false" | "0" | "no" | "off" => false,
            other => {
                warn!("config key '{key}' has unparsable value '{other}', using {default}");
                default
            }
        }
    }

    pub fn set_string(&self, key: &str, value: &str) {
        self.set_raw(key, value.to_string());
    }

    pub fn set_int(&self, key: &str, value: i64) {
        self.set_raw(key, value.to_string());
    }

    pub fn set_float(&self, key: &str, value: f32) {
        self.set_raw(key, value.to_string());
    }

    pub fn set_bool(&self, key: &str, value: bool) {
        self.set_raw(key, if value { "true" } else { "false" }.to_string());
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.values
            .lock()
            .map(|v| v.contains_key(key))
            .unwrap_or(false)
    }

    fn raw(&self, key: &str) -> Option<String> {
        self.values.lock().ok().and_then(|v| v.get(key).cloned())
    }

    fn set_raw(&self, key: &str, value: String) {
        if let Ok(mut values) = self.values.lock() {
            values.insert(key.to_string(), value);
        }
    }

    fn get_parsed<T: FromStr + Copy + std::fmt::Display>(&self, key: &str, default: T) -> T {
        let Some(raw) = self.raw(key) else {
            return default;
        };
        match raw.parse() {
            Ok(v) => v,
            Err(_) => {
                warn!("config key '{key}' has unparsable value '{raw}', using {default}");
                default
            }
        }
    }
}

/// The recognized settings, resolved against their defaults.
///
/// This is the typed view the scheduler hands to the other subsystems;
/// the string store remains the source of truth for round-trip saves.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxySettings {
    /// Main-loop rate in Hz.
    pub polling_frequency: u32,
    pub xinput_to_dinput: bool,
    pub dinput_to_xinput: bool,
    pub socd_enabled: bool,
    /// 0 = last-win, 1 = first-win, 2 = neutral.
    pub socd_method: u8,
    pub debouncing_enabled: bool,
    pub debounce_interval_ms: u32,
    pub stick_deadzone_enabled: bool,
    pub left_stick_deadzone: f32,
    pub right_stick_deadzone: f32,
    pub left_stick_anti_deadzone: f32,
    pub right_stick_anti_deadzone: f32,
    pub rumble_enabled: bool,
    pub rumble_intensity: f32,
    pub hidhide_enabled: bool,
    pub translation_enabled: bool,
    pub save_logs_on_exit: bool,
    /// Toggle for the per-tick input CSV recorder.
    pub input_log_enabled: bool,
    pub input_log_path: String,
    /// Run capture on its own high-priority thread instead of the main loop.
    pub capture_thread_enabled: bool,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            polling_frequency: 1000,
            xinput_to_dinput: true,
            dinput_to_xinput: true,
            socd_enabled: true,
            socd_method: 2,
            debouncing_enabled: false,
            debounce_interval_ms: 10,
            stick_deadzone_enabled: true,
            left_stick_deadzone: 0.15,
            right_stick_deadzone: 0.15,
            left_stick_anti_deadzone: 0.0,
            right_stick_anti_deadzone: 0.0,
            rumble_enabled: true,
            rumble_intensity: 1.0,
            hidhide_enabled: true,
            translation_enabled: true,
            save_logs_on_exit: true,
            input_log_enabled: false,
            input_log_path: "controller_input_log.csv".to_string(),
            capture_thread_enabled: false,
        }
    }
}

impl ProxySettings {
    /// Resolve the typed settings from a store, applying defaults and
    /// range clamps.
    pub fn from_store(store: &ConfigStore) -> Self {
        let d = Self::default();
        Self {
            polling_frequency: store
                .get_int("polling_frequency", d.polling_frequency as i64)
                .clamp(1, 10_000) as u32,
            xinput_to_dinput: store.get_bool("xinput_to_dinput", d.xinput_to_dinput),
            dinput_to_xinput: store.get_bool("dinput_to_xinput", d.dinput_to_xinput),
            socd_enabled: store.get_bool("socd_enabled", d.socd_enabled),
            socd_method: store.get_int("socd_method", d.socd_method as i64).clamp(0, 2) as u8,
            debouncing_enabled: store.get_bool("debouncing_enabled", d.debouncing_enabled),
            debounce_interval_ms: store
                .get_int("debounce_interval_ms", d.debounce_interval_ms as i64)
                .max(0) as u32,
            stick_deadzone_enabled: store
                .get_bool("stick_deadzone_enabled", d.stick_deadzone_enabled),
            left_stick_deadzone: store
                .get_float("left_stick_deadzone", d.left_stick_deadzone)
                .clamp(0.0, 1.0),
            right_stick_deadzone: store
                .get_float("right_stick_deadzone", d.right_stick_deadzone)
                .clamp(0.0, 1.0),
            left_stick_anti_deadzone: store
                .get_float("left_stick_anti_deadzone", d.left_stick_anti_deadzone)
                .clamp(0.0, 1.0),
            right_stick_anti_deadzone: store
                .get_float("right_stick_anti_deadzone", d.right_stick_anti_deadzone)
                .clamp(0.0, 1.0),
            rumble_enabled: store.get_bool("rumble_enabled", d.rumble_enabled),
            rumble_intensity: store
                .get_float("rumble_intensity", d.rumble_intensity)
                .clamp(0.0, 1.0),
            hidhide_enabled: store.get_bool("hidhide_enabled", d.hidhide_enabled),
            translation_enabled: store.get_bool("translation_enabled", d.translation_enabled),
            save_logs_on_exit: store.get_bool("save_logs_on_exit", d.save_logs_on_exit),
            input_log_enabled: store.get_bool("input_log_enabled", d.input_log_enabled),
            input_log_path: store.get_string("input_log_path", &d.input_log_path),
            capture_thread_enabled: store
                .get_bool("capture_thread_enabled", d.capture_thread_enabled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("padproxy_test_{}_{name}", std::process::id()))
    }

    #[test]
    fn missing_file_means_defaults() {
        let store = ConfigStore::at(temp_path("missing.ini"));
        assert!(!store.load().expect("load"));
        let settings = ProxySettings::from_store(&store);
        assert_eq!(settings, ProxySettings::default());
    }

    #[test]
    fn round_trip_preserves_unknown_keys() {
        let path = temp_path("roundtrip.ini");
        std::fs::write(&path, "socd_method=0\nfuture_key=opaque value\n").expect("seed");

        let store = ConfigStore::at(&path);
        assert!(store.load().expect("load"));
        assert_eq!(store.get_int("socd_method", 2), 0);
        store.set_bool("translation_enabled", false);
        store.save().expect("save");

        let reloaded = ConfigStore::at(&path);
        reloaded.load().expect("reload");
        assert_eq!(reloaded.get_string("future_key", ""), "opaque value");
        assert!(!reloaded.get_bool("translation_enabled", true));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let path = temp_path("comments.ini");
        std::fs::write(&path, "# heading\n\n; note\npolling_frequency=500\n").expect("seed");

        let store = ConfigStore::at(&path);
        store.load().expect("load");
        assert_eq!(store.get_int("polling_frequency", 1000), 500);
        assert!(!store.has_key("# heading"));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn bad_values_fall_back_per_key() {
        let path = temp_path("bad.ini");
        std::fs::write(
            &path,
            "polling_frequency=fast\nsocd_method=7\nleft_stick_deadzone=2.5\nrumble_enabled=maybe\n",
        )
        .expect("seed");

        let store = ConfigStore::at(&path);
        store.load().expect("load");
        let settings = ProxySettings::from_store(&store);
        assert_eq!(settings.polling_frequency, 1000);
        assert_eq!(settings.socd_method, 2);
        assert_eq!(settings.left_stick_deadzone, 1.0);
        assert!(settings.rumble_enabled);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn values_trim_whitespace() {
        let path = temp_path("trim.ini");
        std::fs::write(&path, "  debounce_interval_ms =  25 \n").expect("seed");

        let store = ConfigStore::at(&path);
        store.load().expect("load");
        assert_eq!(store.get_int("debounce_interval_ms", 10), 25);

        let _ = std::fs::remove_file(&path);
    }
}
