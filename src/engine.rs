//! # Map Engine Boundary
//!
//! The map renderer is an external collaborator. This module is the narrow
//! interface the pipeline drives it through:
//! - an image registry of [`AnimatedImage`]s the engine repaints on its own clock
//! - replaceable GeoJSON data sources keyed by station id
//! - symbol layers whose icon and size are data/zoom-driven expressions
//! - per-layer pointer event listeners
//!
//! The GeoJSON and layer types serialize to the shapes Mapbox-style engines
//! accept, so a real engine binding only has to forward them.

use crate::pulse::IconError;
use crate::risk::RiskCategory;
use crate::{Position, StationSnapshot};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Errors raised at the engine boundary.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MapError {
    #[error("map adapter is not initialized")]
    NotInitialized,

    #[error("map adapter is already initialized")]
    AlreadyInitialized,

    #[error("image '{0}' is already registered")]
    DuplicateImage(String),

    #[error("source '{0}' already exists")]
    DuplicateSource(String),

    #[error("unknown source '{0}'")]
    UnknownSource(String),

    #[error("layer '{0}' already exists")]
    DuplicateLayer(String),

    #[error("layer '{layer}' references unknown source '{source_id}'")]
    LayerSourceMissing { layer: String, source_id: String },
}

/// A style image the engine re-renders on every repaint.
///
/// The engine owns the repaint cadence. `render` must stay cheap and must
/// never block: it runs on the engine's redraw path.
pub trait AnimatedImage: Send {
    /// Pixel size of every frame.
    fn dimensions(&self) -> (u32, u32);

    /// Called once when the image is registered; acquires the drawing surface.
    fn on_add(&mut self) -> Result<(), IconError>;

    /// Draw the frame for `elapsed_ms` since the engine started animating.
    /// Returns `false` when nothing changed and the previous frame stands.
    fn render(&mut self, elapsed_ms: u64) -> bool;

    /// Latest frame as row-major RGBA bytes.
    fn pixels(&self) -> &[u8];

    /// Called when the image is unregistered.
    fn on_remove(&mut self) {}
}

/// Pointer events a layer listener can subscribe to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LayerEvent {
    Click,
    MouseEnter,
    MouseLeave,
}

/// Handle returned by [`MapEngine::on`], used to unregister the listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

/// Listener invoked with the feature under the pointer.
pub type FeatureCallback = Box<dyn FnMut(&Feature) + Send>;

/// The capabilities the pipeline needs from a map renderer.
pub trait MapEngine {
    fn add_image(&mut self, name: &str, image: Box<dyn AnimatedImage>) -> Result<(), MapError>;
    /// Returns whether an image was removed.
    fn remove_image(&mut self, name: &str) -> bool;

    fn add_source(&mut self, id: &str, data: FeatureCollection) -> Result<(), MapError>;
    /// Replace a source's features wholesale.
    fn set_source_data(&mut self, id: &str, data: FeatureCollection) -> Result<(), MapError>;
    fn remove_source(&mut self, id: &str) -> bool;

    fn add_layer(&mut self, layer: SymbolLayer) -> Result<(), MapError>;
    fn remove_layer(&mut self, id: &str) -> bool;

    fn on(&mut self, event: LayerEvent, layer_id: &str, callback: FeatureCallback) -> ListenerId;
    fn off(&mut self, listener: ListenerId) -> bool;
}

/// GeoJSON point geometry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "Point")]
pub struct PointGeometry {
    pub coordinates: Position,
}

/// Per-feature properties the marker layer's expressions read.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationProperties {
    pub id: String,
    pub name: String,
    pub bikes: u32,
    pub capacity: u32,
    pub risk: f64,
    pub risk_category: RiskCategory,
    pub pulse_duration_ms: u64,
}

/// One station marker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "Feature")]
pub struct Feature {
    pub id: String,
    pub geometry: PointGeometry,
    pub properties: StationProperties,
}

impl From<&StationSnapshot> for Feature {
    fn from(station: &StationSnapshot) -> Self {
        Feature {
            id: station.id.clone(),
            geometry: PointGeometry {
                coordinates: station.position,
            },
            properties: StationProperties {
                id: station.id.clone(),
                name: station.name.clone(),
                bikes: station.bikes_available,
                capacity: station.capacity,
                risk: station.risk,
                risk_category: station.risk_category,
                pulse_duration_ms: station.pulse_duration_ms,
            },
        }
    }
}

impl From<&Feature> for StationSnapshot {
    fn from(feature: &Feature) -> Self {
        let props = &feature.properties;
        StationSnapshot {
            id: props.id.clone(),
            name: props.name.clone(),
            bikes_available: props.bikes,
            capacity: props.capacity,
            position: feature.geometry.coordinates,
            risk: props.risk,
            risk_category: props.risk_category,
            pulse_duration_ms: props.pulse_duration_ms,
        }
    }
}

/// GeoJSON feature collection, one feature per station.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "FeatureCollection")]
pub struct FeatureCollection {
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    pub fn from_snapshots(stations: &[StationSnapshot]) -> Self {
        FeatureCollection {
            features: stations.iter().map(Feature::from).collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Feature> {
        self.features.iter().find(|feature| feature.id == id)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// Per-feature icon choice: a `case` over the `riskCategory` property.
#[derive(Clone, Debug, PartialEq)]
pub struct IconImageExpr {
    pub cases: Vec<(RiskCategory, String)>,
    pub fallback: String,
}

impl IconImageExpr {
    /// One pulse icon per risk category, Healthy as the fallback.
    pub fn by_risk_category() -> Self {
        IconImageExpr {
            cases: vec![
                (
                    RiskCategory::Critical,
                    RiskCategory::Critical.icon_name().to_string(),
                ),
                (RiskCategory::Low, RiskCategory::Low.icon_name().to_string()),
            ],
            fallback: RiskCategory::Healthy.icon_name().to_string(),
        }
    }

    /// Icon name the engine would pick for `feature`.
    pub fn resolve(&self, feature: &Feature) -> &str {
        self.cases
            .iter()
            .find(|(category, _)| *category == feature.properties.risk_category)
            .map(|(_, name)| name.as_str())
            .unwrap_or(&self.fallback)
    }

    pub fn to_style_json(&self) -> Value {
        let mut expr = vec![json!("case")];
        for (category, name) in &self.cases {
            expr.push(json!(["==", ["get", "riskCategory"], category.label()]));
            expr.push(json!(name));
        }
        expr.push(json!(self.fallback));
        Value::Array(expr)
    }
}

/// Icon scale as a linear interpolation over zoom level.
#[derive(Clone, Debug, PartialEq)]
pub struct IconSizeExpr {
    /// `(zoom, scale)` stops, ascending by zoom
    pub stops: Vec<(f64, f64)>,
}

impl IconSizeExpr {
    /// Markers grow from 0.3x at zoom 10 to 0.7x at zoom 16.
    pub fn zoom_scaled() -> Self {
        IconSizeExpr {
            stops: vec![(10.0, 0.3), (13.0, 0.5), (16.0, 0.7)],
        }
    }

    /// Scale at `zoom`; clamped to the first/last stop outside their range.
    pub fn at_zoom(&self, zoom: f64) -> f64 {
        let (Some(first), Some(last)) = (self.stops.first(), self.stops.last()) else {
            return 1.0;
        };
        if zoom <= first.0 {
            return first.1;
        }
        if zoom >= last.0 {
            return last.1;
        }
        self.stops
            .windows(2)
            .find(|w| w[0].0 <= zoom && zoom <= w[1].0)
            .map(|w| {
                let alpha = (zoom - w[0].0) / (w[1].0 - w[0].0);
                w[0].1 + alpha * (w[1].1 - w[0].1)
            })
            .unwrap_or(last.1)
    }

    pub fn to_style_json(&self) -> Value {
        let mut expr = vec![json!("interpolate"), json!(["linear"]), json!(["zoom"])];
        for (zoom, scale) in &self.stops {
            expr.push(json!(zoom));
            expr.push(json!(scale));
        }
        Value::Array(expr)
    }
}

/// A symbol layer drawing one icon per feature of its source.
#[derive(Clone, Debug, PartialEq)]
pub struct SymbolLayer {
    pub id: String,
    pub source: String,
    pub icon_image: IconImageExpr,
    pub icon_size: IconSizeExpr,
    pub icon_allow_overlap: bool,
}

impl SymbolLayer {
    /// Layer definition in Mapbox style-spec form.
    pub fn to_style_json(&self) -> Value {
        json!({
            "id": self.id,
            "type": "symbol",
            "source": self.source,
            "layout": {
                "icon-image": self.icon_image.to_style_json(),
                "icon-size": self.icon_size.to_style_json(),
                "icon-allow-overlap": self.icon_allow_overlap,
            }
        })
    }
}
