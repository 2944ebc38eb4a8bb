//! Input capture recorder.
//!
//! Writes one CSV row per connected controller per tick while enabled.
//! Useful for drift diagnosis and latency measurements; off by default.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use log::{error, info};

use crate::capture::ControllerState;
use crate::clock;

const FLUSH_EVERY: u64 = 100;

pub struct InputRecorder {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    start_tick: u64,
    samples: u64,
}

impl InputRecorder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: None,
            start_tick: 0,
            samples: 0,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.writer.is_some()
    }

    /// Change the output path. Refused while a recording is active.
    pub fn set_path(&mut self, path: impl Into<PathBuf>) {
        if self.writer.is_some() {
            error!("cannot change input log path while recording is active");
            return;
        }
        self.path = path.into();
    }

    /// Start or stop recording. Starting truncates the target file and
    /// writes the header row; stopping flushes and reports the sample
    /// count.
    pub fn set_enabled(&mut self, enabled: bool) {
        match (enabled, self.writer.is_some()) {
            (true, false) => match File::create(&self.path) {
                Ok(file) => {
                    let mut writer = BufWriter::new(file);
                    let header = "Timestamp_ms,Controller_ID,Controller_Name,\
                                  LX_Raw,LY_Raw,RX_Raw,RY_Raw,\
                                  LX_Norm,LY_Norm,RX_Norm,RY_Norm,\
                                  LT,RT,Buttons_Hex,Packet_Number,Is_Connected,Error_Code";
                    if writeln!(writer, "{header}").is_err() {
                        error!("failed to write input log header: {}", self.path.display());
                        return;
                    }
                    self.writer = Some(writer);
                    self.start_tick = clock::now();
                    self.samples = 0;
                    info!("input logging started: {}", self.path.display());
                }
                Err(e) => error!("failed to open input log {}: {e}", self.path.display()),
            },
            (false, true) => {
                if let Some(mut writer) = self.writer.take() {
                    let _ = writer.flush();
                }
                info!("input logging stopped, total samples: {}", self.samples);
            }
            _ => {}
        }
    }

    /// Append one row per connected controller.
    pub fn record(&mut self, states: &[ControllerState]) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };

        let elapsed_ms = clock::ticks_to_ms(clock::now().saturating_sub(self.start_tick));
        for state in states.iter().filter(|s| s.is_connected) {
            let pad = state.effective_gamepad();
            let name = if state.product_name.is_empty() {
                if state.user_id >= 0 { "XInput_Controller" } else { "HID_Device" }
            } else {
                state.product_name.as_str()
            };
            let row = format!(
                "{elapsed_ms:.3},{},\"{}\",{},{},{},{},{:.6},{:.6},{:.6},{:.6},{},{},0x{:04x},{},{},{}",
                state.user_id,
                name,
                pad.thumb_lx,
                pad.thumb_ly,
                pad.thumb_rx,
                pad.thumb_ry,
                pad.thumb_lx as f32 / 32767.0,
                pad.thumb_ly as f32 / 32767.0,
                pad.thumb_rx as f32 / 32767.0,
                pad.thumb_ry as f32 / 32767.0,
                pad.left_trigger,
                pad.right_trigger,
                pad.buttons.bits(),
                state.raw_xinput.packet_number,
                u8::from(state.is_connected),
                state.last_error,
            );
            if writeln!(writer, "{row}").is_err() {
                error!("input log write failed, stopping recorder");
                self.writer = None;
                return;
            }
            self.samples += 1;
            if self.samples % FLUSH_EVERY == 0 {
                let _ = writer.flush();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gamepad::{Buttons, Gamepad};

    fn sample_state() -> ControllerState {
        let mut state = ControllerState::vendor_slot(0);
        state.is_connected = true;
        state.product_name = "Test Pad".to_string();
        state.raw_xinput.gamepad = Gamepad {
            buttons: Buttons::A,
            thumb_lx: 1234,
            ..Default::default()
        };
        state.raw_xinput.packet_number = 7;
        state
    }

    fn temp_csv(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("padproxy_rec_{}_{name}", std::process::id()))
    }

    #[test]
    fn records_connected_states_only() {
        let path = temp_csv("basic.csv");
        let mut recorder = InputRecorder::new(&path);
        recorder.set_enabled(true);

        let mut disconnected = ControllerState::vendor_slot(1);
        disconnected.is_connected = false;
        recorder.record(&[sample_state(), disconnected]);
        recorder.set_enabled(false);

        let text = std::fs::read_to_string(&path).expect("read log");
        let mut lines = text.lines();
        assert!(lines.next().expect("header").starts_with("Timestamp_ms,"));
        let row = lines.next().expect("one data row");
        assert!(row.contains("\"Test Pad\""));
        assert!(row.contains("0x1000"));
        assert!(lines.next().is_none());

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn path_change_refused_while_recording() {
        let path = temp_csv("locked.csv");
        let mut recorder = InputRecorder::new(&path);
        recorder.set_enabled(true);
        recorder.set_path(temp_csv("other.csv"));
        assert!(recorder.is_recording());
        recorder.set_enabled(false);
        let _ = std::fs::remove_file(&path);
    }
}
