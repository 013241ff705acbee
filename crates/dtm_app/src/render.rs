use std::io::Write;

use dtm_core::VersionOption;
use dtm_engine::{Delivery, ProgressEvent, TileProgress, TileStatus};

/// `1536` -> `"1.5 KB"`. Decimal units, matching the catalog's GB figures.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

fn status_label(status: TileStatus) -> &'static str {
    match status {
        TileStatus::Downloading => "downloading",
        TileStatus::Resuming => "resuming",
        TileStatus::AlreadyDownloaded => "cached",
        TileStatus::Completed => "downloaded",
        TileStatus::Extracting => "extracting",
        TileStatus::AlreadyExtracted => "already extracted",
    }
}

pub fn tile_line(progress: &TileProgress) -> String {
    let mut line = format!(
        "{:<28} {:<18} {:>5.1}%",
        progress.tile_name,
        status_label(progress.status),
        progress.percent()
    );
    match progress.status {
        TileStatus::Downloading | TileStatus::Resuming | TileStatus::Completed => {
            line.push_str(&format!(
                "  {} / {}",
                format_bytes(progress.bytes_done),
                format_bytes(progress.bytes_total)
            ));
            if progress.bytes_per_second > 0.0 {
                line.push_str(&format!(
                    "  {}/s",
                    format_bytes(progress.bytes_per_second as u64)
                ));
            }
            if let Some(eta) = progress.eta_seconds {
                line.push_str(&format!("  eta {}m{:02}s", eta / 60, eta % 60));
            }
        }
        TileStatus::Extracting => {
            line.push_str(&format!(
                "  {}/{} entries",
                progress.bytes_done, progress.bytes_total
            ));
        }
        TileStatus::AlreadyDownloaded | TileStatus::AlreadyExtracted => {}
    }
    line
}

/// Writes progress either as one JSON object per line or as human-readable lines.
pub struct ProgressPrinter<W: Write> {
    out: W,
    json: bool,
}

impl<W: Write> ProgressPrinter<W> {
    pub fn new(out: W, json: bool) -> Self {
        Self { out, json }
    }

    pub fn print(&mut self, delivery: &Delivery) -> std::io::Result<()> {
        match (delivery, self.json) {
            (Delivery::Heartbeat, true) => writeln!(self.out, r#"{{"type":"heartbeat"}}"#),
            (Delivery::Heartbeat, false) => Ok(()),
            (Delivery::Event(event), true) => {
                let line = event.to_json().map_err(std::io::Error::other)?;
                writeln!(self.out, "{line}")
            }
            (Delivery::Event(event), false) => self.print_text(event),
        }
    }

    fn print_text(&mut self, event: &ProgressEvent) -> std::io::Result<()> {
        match event {
            ProgressEvent::TileProgress(progress) => writeln!(self.out, "{}", tile_line(progress)),
            ProgressEvent::StageProgress(stage) => writeln!(
                self.out,
                "[{:>3}%] {}: {}",
                stage.percent,
                stage.stage.as_str(),
                stage.message
            ),
            ProgressEvent::Completed { output_name } => {
                writeln!(self.out, "Completed: {output_name}")
            }
            ProgressEvent::Failed { reason } => writeln!(self.out, "Failed: {reason}"),
        }
    }
}

pub fn option_line(option: &VersionOption, is_default: bool) -> String {
    let marker = if is_default { "*" } else { " " };
    let year = option
        .resolved_year
        .map(|year| year.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    format!(
        "{marker} {:<32} {:<28} {:>7}  {} tiles",
        option.key, option.label, year, option.tile_count
    )
}
