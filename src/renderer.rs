//! # Terminal Rendering
//!
//! This module renders the parts of the pulse map UI that the live pipeline
//! drives, as plain terminal text: the live stats panel, the station-health
//! legend, a station summary line, and a coarse ASCII preview of a pulse icon
//! frame. It backs the `--stdout` development mode and the periodic status
//! output of live mode.
//!
//! Each `format_*` function returns the text; the `draw_*` wrappers print it.

use crate::risk::RiskCategory;
use crate::stats::{LoadLevel, NetworkStats};
use crate::StationSnapshot;
use chrono::{DateTime, Utc};

/// Width of the system-load bar in cells.
const LOAD_BAR_CELLS: usize = 20;
/// Widest ASCII icon preview in columns.
const ICON_PREVIEW_COLUMNS: u32 = 25;

/// Render the live stats panel.
pub fn format_stats_panel(stats: &NetworkStats, now: DateTime<Utc>) -> String {
    let level = match stats.load_level() {
        LoadLevel::High => "high",
        LoadLevel::Moderate => "moderate",
        LoadLevel::Normal => "normal",
    };
    let mut out = String::new();
    out.push_str("Live Stats\n");
    out.push_str(&format!("  Stations     {}\n", stats.total_stations));
    out.push_str(&format!(
        "  Bikes        {} / {}\n",
        stats.total_bikes, stats.total_capacity
    ));
    out.push_str(&format!(
        "  System load  {:>3}% {} {}\n",
        stats.system_load_percent,
        load_bar(stats.system_load_percent),
        level
    ));
    out.push_str(&format!("  Updated      {}\n", stats.updated_ago(now)));
    out
}

pub fn draw_stats_panel(stats: &NetworkStats, now: DateTime<Utc>) {
    print!("{}", format_stats_panel(stats, now));
}

/// Render the per-category station counts.
pub fn format_legend(stats: &NetworkStats) -> String {
    let mut out = String::from("Station Health\n");
    for category in RiskCategory::ALL {
        out.push_str(&format!(
            "  ● {:<8} {}  {:>5}\n",
            category.label(),
            category.legend_color(),
            stats.count(category)
        ));
    }
    out
}

pub fn draw_legend(stats: &NetworkStats) {
    print!("{}", format_legend(stats));
}

/// One-line summary of a station, as shown in its popup.
pub fn format_station(station: &StationSnapshot) -> String {
    format!(
        "{} [{}]  {}/{} bikes ({}% full)  {}",
        station.name,
        station.id,
        station.bikes_available,
        station.capacity,
        station.fill_percent(),
        station.risk_category.label()
    )
}

/// Render an RGBA frame as ASCII, thresholding on alpha.
///
/// Large icons are downsampled to at most 25 columns; rows are sampled
/// twice as sparsely as columns to offset the height of terminal cells.
pub fn format_icon_ascii(pixels: &[u8], width: u32, height: u32) -> String {
    let step = width.div_ceil(ICON_PREVIEW_COLUMNS).max(1);
    let mut out = String::new();
    for y in (0..height).step_by((step * 2) as usize) {
        for x in (0..width).step_by(step as usize) {
            let alpha = (y as usize)
                .checked_mul(width as usize)
                .and_then(|row| row.checked_add(x as usize))
                .and_then(|index| index.checked_mul(4))
                .and_then(|offset| offset.checked_add(3))
                .and_then(|offset| pixels.get(offset).copied())
                .unwrap_or(0);
            out.push(match alpha {
                0 => ' ',
                1..=127 => '.',
                128..=254 => 'o',
                255 => '@',
            });
        }
        out.push('\n');
    }
    out
}

pub fn draw_icon_ascii(pixels: &[u8], width: u32, height: u32) {
    print!("{}", format_icon_ascii(pixels, width, height));
}

fn load_bar(percent: u32) -> String {
    let filled = ((percent.min(100) as usize * LOAD_BAR_CELLS) + 50) / 100;
    format!(
        "[{}{}]",
        "█".repeat(filled),
        "░".repeat(LOAD_BAR_CELLS - filled)
    )
}
