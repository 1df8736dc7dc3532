//! In-process map engine.
//!
//! `HeadlessMap` implements [`MapEngine`] without a GPU or window. It plays
//! the role a real map renderer plays for the pipeline: it owns the marker
//! images and repaints them through an explicit [`FrameScheduler`], holds the
//! GeoJSON sources and symbol layers, and routes pointer events to
//! listeners. The CLI drives it on a fixed frame clock; tests drive it frame
//! by frame.

use crate::engine::{
    AnimatedImage, Feature, FeatureCallback, FeatureCollection, LayerEvent, ListenerId, MapEngine,
    MapError, SymbolLayer,
};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// Repaint scheduler for registered animated images.
///
/// Each call to [`FrameScheduler::tick`] renders every image exactly once.
/// Images that were unregistered are dropped and can never be invoked again.
#[derive(Default)]
pub struct FrameScheduler {
    images: BTreeMap<String, Box<dyn AnimatedImage>>,
    ticks: u64,
}

impl FrameScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: &str,
        mut image: Box<dyn AnimatedImage>,
    ) -> Result<(), MapError> {
        if self.images.contains_key(name) {
            return Err(MapError::DuplicateImage(name.to_string()));
        }
        // A failed surface leaves the image registered but frozen
        if let Err(e) = image.on_add() {
            warn!(image = name, error = %e, "Image registered without a render surface");
        }
        self.images.insert(name.to_string(), image);
        Ok(())
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        match self.images.remove(name) {
            Some(mut image) => {
                image.on_remove();
                true
            }
            None => false,
        }
    }

    /// Render one frame of every image. Returns whether any frame changed,
    /// i.e. whether the host should keep repainting.
    pub fn tick(&mut self, elapsed_ms: u64) -> bool {
        self.ticks += 1;
        let mut changed = false;
        for image in self.images.values_mut() {
            changed |= image.render(elapsed_ms);
        }
        changed
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn get(&self, name: &str) -> Option<&dyn AnimatedImage> {
        self.images.get(name).map(|image| image.as_ref())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.images.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

struct Listener {
    event: LayerEvent,
    layer_id: String,
    callback: FeatureCallback,
}

/// Map engine that keeps everything in memory.
#[derive(Default)]
pub struct HeadlessMap {
    scheduler: FrameScheduler,
    sources: HashMap<String, FeatureCollection>,
    layers: Vec<SymbolLayer>,
    listeners: BTreeMap<ListenerId, Listener>,
    next_listener: u64,
    source_updates: u64,
}

impl HeadlessMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one repaint of every registered image.
    pub fn repaint(&mut self, elapsed_ms: u64) -> bool {
        self.scheduler.tick(elapsed_ms)
    }

    pub fn scheduler(&self) -> &FrameScheduler {
        &self.scheduler
    }

    pub fn image(&self, name: &str) -> Option<&dyn AnimatedImage> {
        self.scheduler.get(name)
    }

    pub fn source(&self, id: &str) -> Option<&FeatureCollection> {
        self.sources.get(id)
    }

    pub fn layer(&self, id: &str) -> Option<&SymbolLayer> {
        self.layers.iter().find(|layer| layer.id == id)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Number of wholesale source replacements so far.
    pub fn source_updates(&self) -> u64 {
        self.source_updates
    }

    /// Simulate a pointer event on `feature_id` within `layer_id`.
    ///
    /// Returns the number of listeners invoked.
    pub fn dispatch(&mut self, event: LayerEvent, layer_id: &str, feature_id: &str) -> usize {
        let Some(feature) = self.find_feature(layer_id, feature_id) else {
            debug!(layer = layer_id, feature = feature_id, "No feature under pointer");
            return 0;
        };

        let mut invoked = 0;
        for listener in self.listeners.values_mut() {
            if listener.event == event && listener.layer_id == layer_id {
                (listener.callback)(&feature);
                invoked += 1;
            }
        }
        invoked
    }

    fn find_feature(&self, layer_id: &str, feature_id: &str) -> Option<Feature> {
        let layer = self.layer(layer_id)?;
        self.sources.get(&layer.source)?.get(feature_id).cloned()
    }
}

impl MapEngine for HeadlessMap {
    fn add_image(&mut self, name: &str, image: Box<dyn AnimatedImage>) -> Result<(), MapError> {
        self.scheduler.register(name, image)
    }

    fn remove_image(&mut self, name: &str) -> bool {
        self.scheduler.unregister(name)
    }

    fn add_source(&mut self, id: &str, data: FeatureCollection) -> Result<(), MapError> {
        if self.sources.contains_key(id) {
            return Err(MapError::DuplicateSource(id.to_string()));
        }
        self.sources.insert(id.to_string(), data);
        Ok(())
    }

    fn set_source_data(&mut self, id: &str, data: FeatureCollection) -> Result<(), MapError> {
        let source = self
            .sources
            .get_mut(id)
            .ok_or_else(|| MapError::UnknownSource(id.to_string()))?;
        *source = data;
        self.source_updates += 1;
        Ok(())
    }

    fn remove_source(&mut self, id: &str) -> bool {
        self.sources.remove(id).is_some()
    }

    fn add_layer(&mut self, layer: SymbolLayer) -> Result<(), MapError> {
        if self.layer(&layer.id).is_some() {
            return Err(MapError::DuplicateLayer(layer.id));
        }
        if !self.sources.contains_key(&layer.source) {
            return Err(MapError::LayerSourceMissing {
                layer: layer.id,
                source_id: layer.source,
            });
        }
        self.layers.push(layer);
        Ok(())
    }

    fn remove_layer(&mut self, id: &str) -> bool {
        let before = self.layers.len();
        self.layers.retain(|layer| layer.id != id);
        self.layers.len() != before
    }

    fn on(&mut self, event: LayerEvent, layer_id: &str, callback: FeatureCallback) -> ListenerId {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.insert(
            id,
            Listener {
                event,
                layer_id: layer_id.to_string(),
                callback,
            },
        );
        id
    }

    fn off(&mut self, listener: ListenerId) -> bool {
        self.listeners.remove(&listener).is_some()
    }
}
