//! Session log sink.
//!
//! Backs the `log` facade with a buffer that keeps every message of the
//! current session in memory while mirroring it to the console. The buffer
//! can be written to a timestamped file at shutdown (`save_logs_on_exit`).
//! Safe to call from any thread.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{Level, LevelFilter, Log, Metadata, Record};

struct SessionLog {
    buffer: Mutex<Vec<String>>,
}

static SESSION: SessionLog = SessionLog {
    buffer: Mutex::new(Vec::new()),
};

impl Log for SessionLog {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!("[{:5}] {}", record.level(), record.args());
        if record.level() <= Level::Warn {
            eprintln!("{line}");
        } else {
            println!("{line}");
        }
        if let Ok(mut buffer) = self.buffer.lock() {
            buffer.push(line);
        }
    }

    fn flush(&self) {
        let _ = std::io::stdout().flush();
    }
}

/// Install the session sink as the global logger.
///
/// Returns `false` if another logger was installed first (the sink then
/// simply never receives records; nothing else breaks).
pub fn install(level: LevelFilter) -> bool {
    let ok = log::set_logger(&SESSION).is_ok();
    if ok {
        log::set_max_level(level);
    }
    ok
}

/// Copy of every line logged so far this session.
pub fn session_lines() -> Vec<String> {
    SESSION
        .buffer
        .lock()
        .map(|buffer| buffer.clone())
        .unwrap_or_default()
}

/// Drop all buffered lines.
pub fn clear() {
    if let Ok(mut buffer) = SESSION.buffer.lock() {
        buffer.clear();
    }
}

/// Write the buffered session log to `padproxy_log_<unix-seconds>.txt`
/// next to the executable (falling back to the working directory) and
/// return the path written.
pub fn save_to_timestamped_file() -> std::io::Result<PathBuf> {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."));
    let path = dir.join(format!("padproxy_log_{stamp}.txt"));

    let mut file = std::fs::File::create(&path)?;
    for line in session_lines() {
        writeln!(file, "{line}")?;
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_accumulates_and_clears() {
        // The global logger may or may not be ours depending on test order,
        // so poke the sink directly.
        log::set_max_level(LevelFilter::Info);
        SESSION.log(
            &Record::builder()
                .args(format_args!("hello from the test"))
                .level(Level::Info)
                .target("padproxy::test")
                .build(),
        );
        assert!(session_lines().iter().any(|l| l.contains("hello from the test")));
        clear();
        assert!(session_lines().is_empty());
    }
}
