//! Network-wide statistics derived from one snapshot set.
//!
//! Stats are always recomputed from the full station list. There is no
//! incremental update path.

use crate::risk::RiskCategory;
use crate::StationSnapshot;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Totals shown on the live stats panel and the station-health legend.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStats {
    pub total_stations: usize,
    pub total_bikes: u64,
    pub total_capacity: u64,
    pub critical_count: usize,
    pub low_count: usize,
    pub healthy_count: usize,
    /// `round(total_bikes / total_capacity * 100)`; may exceed 100 when
    /// stations report more bikes than docks
    pub system_load_percent: u32,
    pub last_updated: DateTime<Utc>,
}

/// Severity of the system-load bar.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadLevel {
    Normal,
    Moderate,
    High,
}

impl NetworkStats {
    /// Number of stations in a category.
    pub fn count(&self, category: RiskCategory) -> usize {
        match category {
            RiskCategory::Critical => self.critical_count,
            RiskCategory::Low => self.low_count,
            RiskCategory::Healthy => self.healthy_count,
        }
    }

    pub fn load_level(&self) -> LoadLevel {
        match self.system_load_percent {
            p if p > 80 => LoadLevel::High,
            p if p > 50 => LoadLevel::Moderate,
            _ => LoadLevel::Normal,
        }
    }

    /// Human-friendly age of the stats, e.g. "just now", "42s ago", "3m ago".
    pub fn updated_ago(&self, now: DateTime<Utc>) -> String {
        let seconds = (now - self.last_updated).num_seconds().max(0);
        if seconds < 10 {
            "just now".to_string()
        } else if seconds < 60 {
            format!("{}s ago", seconds)
        } else {
            format!("{}m ago", seconds / 60)
        }
    }
}

/// Reduce a snapshot set to network stats, stamped with the current time.
pub fn aggregate(snapshots: &[StationSnapshot]) -> NetworkStats {
    aggregate_at(snapshots, Utc::now())
}

/// Reduce a snapshot set to network stats in a single pass.
pub fn aggregate_at(snapshots: &[StationSnapshot], now: DateTime<Utc>) -> NetworkStats {
    let mut stats = NetworkStats {
        total_stations: snapshots.len(),
        total_bikes: 0,
        total_capacity: 0,
        critical_count: 0,
        low_count: 0,
        healthy_count: 0,
        system_load_percent: 0,
        last_updated: now,
    };

    for station in snapshots {
        stats.total_bikes += u64::from(station.bikes_available);
        stats.total_capacity += u64::from(station.capacity);
        match station.risk_category {
            RiskCategory::Critical => stats.critical_count += 1,
            RiskCategory::Low => stats.low_count += 1,
            RiskCategory::Healthy => stats.healthy_count += 1,
        }
    }

    if stats.total_capacity > 0 {
        stats.system_load_percent =
            (stats.total_bikes as f64 / stats.total_capacity as f64 * 100.0).round() as u32;
    }

    stats
}
