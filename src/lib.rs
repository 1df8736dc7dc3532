//! # Bike Pulse Core Library
//!
//! This library holds the live pipeline behind the bike-share pulse map:
//! periodically fetched station occupancy is classified by emptiness risk,
//! reduced into network-wide statistics, and pushed into a map engine whose
//! markers pulse at a rate that reflects urgency.
//!
//! ## Data Flow
//! 1. **Poll**: [`poller::DataPoller`] fetches `/api/stations` every 60 seconds
//! 2. **Classify**: [`risk::classify`] tags each station as Critical, Low or Healthy
//! 3. **Aggregate**: [`stats::aggregate`] recomputes [`stats::NetworkStats`] from scratch
//! 4. **Sync**: [`map_sync::MapSyncAdapter`] replaces the engine's data source wholesale
//!
//! Independently of the data clock, every engine repaint renders one frame of
//! each [`pulse::PulseIcon`] into its private RGBA buffer.
//!
//! ## Core Types
//! - [`StationSnapshot`]: one classified station at poll time
//! - [`NetworkState`]: one poll's stations plus the stats derived from them

use serde::{Deserialize, Serialize};
use std::sync::Arc;

// Module declarations
pub mod canvas;
pub mod config;
pub mod engine;
pub mod feed;
pub mod headless;
pub mod map_sync;
pub mod poller;
pub mod pulse;
pub mod renderer;
pub mod risk;
pub mod stats;

use risk::RiskCategory;
use stats::NetworkStats;

/// Geographic position of a station.
///
/// Serialized as a GeoJSON coordinate pair `[lon, lat]` so it can be handed
/// straight to the map engine.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Position {
    pub lon: f64,
    pub lat: f64,
}

impl From<[f64; 2]> for Position {
    fn from([lon, lat]: [f64; 2]) -> Self {
        Position { lon, lat }
    }
}

impl From<Position> for [f64; 2] {
    fn from(position: Position) -> Self {
        [position.lon, position.lat]
    }
}

/// A single station as seen by one poll, with its derived risk.
///
/// The risk fields are never set by hand: [`StationSnapshot::classified`]
/// derives them from `bikes_available` and `capacity`, so the category is
/// always a pure function of `risk`.
///
/// # Example
/// ```
/// use bike_pulse_lib::{Position, StationSnapshot};
/// use bike_pulse_lib::risk::RiskCategory;
///
/// let station = StationSnapshot::classified(
///     "72",
///     "W 52 St & 11 Ave",
///     1,
///     20,
///     Position { lon: -73.99, lat: 40.76 },
/// );
///
/// assert_eq!(station.risk_category, RiskCategory::Critical);
/// assert_eq!(station.pulse_duration_ms, 1200);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StationSnapshot {
    /// Station identifier, unique across the network
    pub id: String,
    /// Display name
    pub name: String,
    /// Bikes ready to rent right now
    pub bikes_available: u32,
    /// Total docks; 0 means unknown capacity
    pub capacity: u32,
    pub position: Position,
    /// Emptiness risk in `[0, 1]`
    pub risk: f64,
    pub risk_category: RiskCategory,
    /// Animation period of the category's pulse marker
    pub pulse_duration_ms: u64,
}

impl StationSnapshot {
    /// Build a snapshot and classify it in one step.
    pub fn classified(
        id: impl Into<String>,
        name: impl Into<String>,
        bikes_available: u32,
        capacity: u32,
        position: Position,
    ) -> Self {
        let (risk, risk_category) = risk::classify(bikes_available, capacity);
        StationSnapshot {
            id: id.into(),
            name: name.into(),
            bikes_available,
            capacity,
            position,
            risk,
            risk_category,
            pulse_duration_ms: risk_category.default_style().period_ms,
        }
    }

    /// Share of docks holding a bike, as shown on the station popup's fill bar.
    pub fn fill_percent(&self) -> u32 {
        if self.capacity == 0 {
            return 0;
        }
        (self.bikes_available as f64 / self.capacity as f64 * 100.0).round() as u32
    }
}

/// Everything one successful poll produced.
///
/// Created atomically after each poll and never patched: the next poll
/// replaces it entirely, so the stats can't drift from the stations.
#[derive(Clone, Debug)]
pub struct NetworkState {
    pub stations: Arc<[StationSnapshot]>,
    pub stats: NetworkStats,
}

impl NetworkState {
    pub fn from_snapshots(stations: Vec<StationSnapshot>) -> Self {
        let stats = stats::aggregate(&stations);
        NetworkState {
            stations: stations.into(),
            stats,
        }
    }
}
