//! Status text for the terminal, built from FrameBuffer metadata.

use colored::Colorize;
use serde::Serialize;
use server::{FrameBufferInfo, MetricsSnapshot, Server};

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub selected: Option<usize>,
    pub metrics: MetricsSnapshot,
    pub framebuffers: Vec<FrameBufferInfo>,
}

impl StatusReport {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

pub fn report(server: &Server) -> StatusReport {
    StatusReport {
        selected: server.state().selected_index(),
        metrics: server.metrics(),
        framebuffers: server.snapshot().iter().map(|fb| fb.info()).collect(),
    }
}

/// One line in the spirit of a render view's status bar.
pub fn status_line(info: &FrameBufferInfo) -> String {
    let progress = format!("{:>3.0}%", info.progress);
    let progress = if info.finalized {
        progress.green()
    } else {
        progress.yellow()
    };
    format!(
        "Frame: {} | Version: {} | Progress: {} | Memory: {} | Peak Memory: {} | Time: {} | {}x{} | AOVs: {}",
        info.frame,
        info.version,
        progress,
        format_bytes(info.ram_bytes),
        format_bytes(info.peak_ram_bytes),
        format_time(info.elapsed_time),
        info.width,
        info.height,
        info.aovs.join(", ")
    )
}

/// `HH:MM:SS` from milliseconds.
pub fn format_time(millis: u32) -> String {
    let seconds = millis / 1000;
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds / 60) % 60,
        seconds % 60
    )
}

pub fn format_bytes(bytes: i64) -> String {
    const MB: f64 = 1024.0 * 1024.0;
    format!("{:.0}MB", bytes.max(0) as f64 / MB)
}
