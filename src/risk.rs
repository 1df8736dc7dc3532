//! # Station Risk Classification
//!
//! Maps a station's occupancy to an emptiness risk and one of three
//! categories. Each category carries the pulse style its map marker animates
//! with: Critical stations flash fast and red, Healthy ones breathe slowly
//! and green.
//!
//! | Risk            | Category | Marker       | Period  |
//! |-----------------|----------|--------------|---------|
//! | > 0.8           | Critical | `pulse-red`  | 1200 ms |
//! | > 0.4, <= 0.8   | Low      | `pulse-amber`| 2000 ms |
//! | <= 0.4          | Healthy  | `pulse-green`| 3000 ms |

use serde::{Deserialize, Serialize};

/// Risk above which a station is Critical.
pub const CRITICAL_THRESHOLD: f64 = 0.8;
/// Risk above which a station is Low.
pub const LOW_THRESHOLD: f64 = 0.4;

/// Urgency bucket of a station.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskCategory {
    Critical,
    Low,
    Healthy,
}

impl RiskCategory {
    /// All categories, most severe first.
    pub const ALL: [RiskCategory; 3] = [
        RiskCategory::Critical,
        RiskCategory::Low,
        RiskCategory::Healthy,
    ];

    /// Bucket a risk value. Exact boundary values land in the milder bucket.
    pub fn from_risk(risk: f64) -> Self {
        if risk > CRITICAL_THRESHOLD {
            RiskCategory::Critical
        } else if risk > LOW_THRESHOLD {
            RiskCategory::Low
        } else {
            RiskCategory::Healthy
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RiskCategory::Critical => "Critical",
            RiskCategory::Low => "Low",
            RiskCategory::Healthy => "Healthy",
        }
    }

    /// Name the category's marker image is registered under in the map engine.
    pub fn icon_name(self) -> &'static str {
        match self {
            RiskCategory::Critical => "pulse-red",
            RiskCategory::Low => "pulse-amber",
            RiskCategory::Healthy => "pulse-green",
        }
    }

    /// Hex color used for the legend dot and popup badge.
    pub fn legend_color(self) -> &'static str {
        match self {
            RiskCategory::Critical => "#ef4444",
            RiskCategory::Low => "#f59e0b",
            RiskCategory::Healthy => "#22c55e",
        }
    }

    /// Built-in marker color and animation period.
    pub fn default_style(self) -> PulseStyle {
        match self {
            RiskCategory::Critical => PulseStyle {
                color: Rgb::new(231, 76, 60),
                period_ms: 1200,
            },
            RiskCategory::Low => PulseStyle {
                color: Rgb::new(241, 196, 15),
                period_ms: 2000,
            },
            RiskCategory::Healthy => PulseStyle {
                color: Rgb::new(46, 204, 113),
                period_ms: 3000,
            },
        }
    }
}

/// Compute a station's emptiness risk and category.
///
/// `risk = 1 - bikes / capacity`, clamped to `[0, 1]` so over-capacity
/// reports never go negative. A station with zero capacity is treated as
/// fully at risk.
///
/// # Example
/// ```
/// use bike_pulse_lib::risk::{classify, RiskCategory};
///
/// let (risk, category) = classify(2, 10);
/// assert_eq!(category, RiskCategory::Low); // exactly 0.8 is not Critical
/// assert!((risk - 0.8).abs() < 1e-12);
/// ```
pub fn classify(bikes: u32, capacity: u32) -> (f64, RiskCategory) {
    let risk = if capacity > 0 {
        (1.0 - bikes as f64 / capacity as f64).clamp(0.0, 1.0)
    } else {
        1.0
    };
    (risk, RiskCategory::from_risk(risk))
}

/// An RGB color triple.
///
/// Colors are only ever given as explicit channel values (in config files as
/// `[r, g, b]`); there is no color-name parsing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[u8; 3]", into = "[u8; 3]")]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const WHITE: Rgb = Rgb::new(255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Rgb { r, g, b }
    }
}

impl From<[u8; 3]> for Rgb {
    fn from([r, g, b]: [u8; 3]) -> Self {
        Rgb { r, g, b }
    }
}

impl From<Rgb> for [u8; 3] {
    fn from(color: Rgb) -> Self {
        [color.r, color.g, color.b]
    }
}

/// Immutable per-category marker configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PulseStyle {
    pub color: Rgb,
    /// Length of one pulse cycle
    pub period_ms: u64,
}

/// Marker styles for all three categories, as configured under `[pulse]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryStyles {
    pub critical: PulseStyle,
    pub low: PulseStyle,
    pub healthy: PulseStyle,
}

impl Default for CategoryStyles {
    fn default() -> Self {
        CategoryStyles {
            critical: RiskCategory::Critical.default_style(),
            low: RiskCategory::Low.default_style(),
            healthy: RiskCategory::Healthy.default_style(),
        }
    }
}

impl CategoryStyles {
    pub fn get(&self, category: RiskCategory) -> PulseStyle {
        match category {
            RiskCategory::Critical => self.critical,
            RiskCategory::Low => self.low,
            RiskCategory::Healthy => self.healthy,
        }
    }
}
