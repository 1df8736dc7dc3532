//! # Map Synchronization
//!
//! [`MapSyncAdapter`] is the single writer of the map engine's station data.
//! It owns the engine handle between [`MapSyncAdapter::initialize`] and
//! [`MapSyncAdapter::teardown`]; outside that window there is no engine to
//! talk to.
//!
//! ## Lifecycle
//! 1. **Initialize**: register the three pulse icons, add the `stations`
//!    source and the `station-pulses` symbol layer, attach pointer listeners;
//!    a failure part way rolls back and hands the engine back
//! 2. **Update**: replace the source's feature collection wholesale on every
//!    successful poll; features are never patched in place
//! 3. **Teardown**: detach listeners, remove layer, source and icons (which
//!    stops their repaint callbacks), then hand the engine back

use crate::engine::{
    Feature, FeatureCallback, FeatureCollection, IconImageExpr, IconSizeExpr, LayerEvent,
    ListenerId, MapEngine, MapError, SymbolLayer,
};
use crate::pulse::PulseIcon;
use crate::risk::{CategoryStyles, RiskCategory};
use crate::StationSnapshot;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Id of the GeoJSON source holding one feature per station.
pub const SOURCE_ID: &str = "stations";
/// Id of the symbol layer drawing the pulse markers.
pub const LAYER_ID: &str = "station-pulses";

/// Caller-supplied handler receiving the full snapshot of a marker.
pub type StationCallback = Box<dyn FnMut(&StationSnapshot) + Send>;

type SharedCallback = Arc<Mutex<StationCallback>>;

/// A failed [`MapSyncAdapter::initialize`], handing the engine back.
///
/// Anything the adapter registered before the failure has already been
/// removed again, so `engine` can be retried as is.
pub struct InitError<E> {
    pub error: MapError,
    pub engine: E,
}

impl<E> InitError<E> {
    pub fn into_engine(self) -> E {
        self.engine
    }
}

impl<E> fmt::Debug for InitError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitError")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl<E> fmt::Display for InitError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

impl<E> From<InitError<E>> for MapError {
    fn from(failure: InitError<E>) -> Self {
        failure.error
    }
}

/// What one `initialize` has put into the engine so far.
#[derive(Default)]
struct Registration {
    images: Vec<&'static str>,
    source: bool,
    layer: bool,
    listeners: Vec<ListenerId>,
}

impl Registration {
    fn release<E: MapEngine>(&mut self, engine: &mut E) {
        for id in self.listeners.drain(..) {
            engine.off(id);
        }
        if std::mem::take(&mut self.layer) {
            engine.remove_layer(LAYER_ID);
        }
        if std::mem::take(&mut self.source) {
            engine.remove_source(SOURCE_ID);
        }
        for name in self.images.drain(..) {
            engine.remove_image(name);
        }
    }
}

pub struct MapSyncAdapter<E: MapEngine> {
    styles: CategoryStyles,
    icon_size: u32,
    handlers: Vec<(LayerEvent, SharedCallback)>,
    engine: Option<E>,
    registration: Registration,
}

impl<E: MapEngine> MapSyncAdapter<E> {
    pub fn new(styles: CategoryStyles, icon_size: u32) -> Self {
        Self {
            styles,
            icon_size,
            handlers: Vec::new(),
            engine: None,
            registration: Registration::default(),
        }
    }

    fn with_handler(
        mut self,
        event: LayerEvent,
        callback: impl FnMut(&StationSnapshot) + Send + 'static,
    ) -> Self {
        let callback: StationCallback = Box::new(callback);
        self.handlers.push((event, Arc::new(Mutex::new(callback))));
        self
    }

    /// Call `callback` with the clicked station.
    pub fn with_click_handler(
        self,
        callback: impl FnMut(&StationSnapshot) + Send + 'static,
    ) -> Self {
        self.with_handler(LayerEvent::Click, callback)
    }

    /// Call `callback` when the pointer enters a station marker.
    pub fn with_hover_handler(
        self,
        callback: impl FnMut(&StationSnapshot) + Send + 'static,
    ) -> Self {
        self.with_handler(LayerEvent::MouseEnter, callback)
    }

    /// Call `callback` when the pointer leaves a station marker.
    pub fn with_leave_handler(
        self,
        callback: impl FnMut(&StationSnapshot) + Send + 'static,
    ) -> Self {
        self.with_handler(LayerEvent::MouseLeave, callback)
    }

    pub fn is_initialized(&self) -> bool {
        self.engine.is_some()
    }

    pub fn engine(&self) -> Option<&E> {
        self.engine.as_ref()
    }

    pub fn engine_mut(&mut self) -> Option<&mut E> {
        self.engine.as_mut()
    }

    /// The station marker layer: icon by risk category, size by zoom.
    pub fn marker_layer() -> SymbolLayer {
        SymbolLayer {
            id: LAYER_ID.to_string(),
            source: SOURCE_ID.to_string(),
            icon_image: IconImageExpr::by_risk_category(),
            icon_size: IconSizeExpr::zoom_scaled(),
            icon_allow_overlap: true,
        }
    }

    /// Take ownership of `engine` and set up icons, source, layer and listeners.
    ///
    /// On failure the partial setup is rolled back and the engine returned
    /// inside the error. Handlers stay with the adapter, so initializing
    /// again after [`MapSyncAdapter::teardown`] re-attaches them.
    pub fn initialize(&mut self, mut engine: E) -> Result<(), InitError<E>> {
        if self.engine.is_some() {
            return Err(InitError {
                error: MapError::AlreadyInitialized,
                engine,
            });
        }

        let mut registration = Registration::default();
        if let Err(error) = self.register(&mut engine, &mut registration) {
            warn!(error = %error, "Map adapter setup failed, rolling back");
            registration.release(&mut engine);
            return Err(InitError { error, engine });
        }

        info!(
            icon_size = self.icon_size,
            listeners = registration.listeners.len(),
            "Map adapter initialized"
        );
        self.registration = registration;
        self.engine = Some(engine);
        Ok(())
    }

    fn register(&self, engine: &mut E, registration: &mut Registration) -> Result<(), MapError> {
        for category in RiskCategory::ALL {
            let icon = PulseIcon::new(self.styles.get(category), self.icon_size);
            engine.add_image(category.icon_name(), Box::new(icon))?;
            registration.images.push(category.icon_name());
        }
        engine.add_source(SOURCE_ID, FeatureCollection::default())?;
        registration.source = true;
        engine.add_layer(Self::marker_layer())?;
        registration.layer = true;

        for (event, callback) in &self.handlers {
            let id = engine.on(*event, LAYER_ID, forward_snapshot(callback.clone()));
            registration.listeners.push(id);
        }
        Ok(())
    }

    /// Replace the engine's station data with `snapshots`.
    pub fn update_data(&mut self, snapshots: &[StationSnapshot]) -> Result<(), MapError> {
        let engine = self.engine.as_mut().ok_or(MapError::NotInitialized)?;
        engine.set_source_data(SOURCE_ID, FeatureCollection::from_snapshots(snapshots))?;
        debug!(features = snapshots.len(), "Station source replaced");
        Ok(())
    }

    /// Release everything registered by `initialize` and return the engine.
    ///
    /// Returns `None` if the adapter was never initialized.
    pub fn teardown(&mut self) -> Option<E> {
        let mut engine = self.engine.take()?;
        self.registration.release(&mut engine);
        info!("Map adapter torn down");
        Some(engine)
    }
}

fn forward_snapshot(callback: SharedCallback) -> FeatureCallback {
    Box::new(move |feature: &Feature| {
        let snapshot = StationSnapshot::from(feature);
        // A handler that panicked earlier still gets later events
        let mut callback = callback.lock().unwrap_or_else(PoisonError::into_inner);
        (*callback)(&snapshot)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessMap;
    use crate::pulse::DEFAULT_ICON_SIZE;
    use crate::Position;
    use std::sync::{Arc, Mutex};

    fn snapshots() -> Vec<StationSnapshot> {
        vec![
            StationSnapshot::classified(
                "72",
                "W 52 St & 11 Ave",
                1,
                39,
                Position {
                    lon: -73.9939,
                    lat: 40.7673,
                },
            ),
            StationSnapshot::classified(
                "79",
                "Franklin St & W Broadway",
                20,
                33,
                Position {
                    lon: -74.0067,
                    lat: 40.7191,
                },
            ),
        ]
    }

    fn initialized() -> MapSyncAdapter<HeadlessMap> {
        let mut adapter = MapSyncAdapter::new(CategoryStyles::default(), DEFAULT_ICON_SIZE);
        adapter.initialize(HeadlessMap::new()).unwrap();
        adapter
    }

    #[test]
    fn test_initialize_registers_icons_source_and_layer() {
        let adapter = initialized();
        let map = adapter.engine().unwrap();

        let names: Vec<&str> = map.scheduler().names().collect();
        assert_eq!(names, vec!["pulse-amber", "pulse-green", "pulse-red"]);
        assert!(map.source(SOURCE_ID).unwrap().is_empty());

        let layer = map.layer(LAYER_ID).unwrap();
        assert_eq!(layer.source, SOURCE_ID);
        assert!(layer.icon_allow_overlap);
    }

    #[test]
    fn test_initialize_twice_fails() {
        let mut adapter = initialized();
        let failure = adapter.initialize(HeadlessMap::new()).unwrap_err();
        assert_eq!(failure.error, MapError::AlreadyInitialized);
        // The rejected engine comes back untouched
        assert!(failure.into_engine().scheduler().is_empty());
        assert_eq!(adapter.engine().unwrap().scheduler().len(), 3);
    }

    #[test]
    fn test_failed_initialize_rolls_back_and_returns_engine() {
        let mut map = HeadlessMap::new();
        map.add_source(SOURCE_ID, FeatureCollection::default()).unwrap();

        let mut adapter = MapSyncAdapter::new(CategoryStyles::default(), DEFAULT_ICON_SIZE)
            .with_click_handler(|_| {});
        let failure = adapter.initialize(map).unwrap_err();
        assert_eq!(failure.error, MapError::DuplicateSource(SOURCE_ID.to_string()));
        assert_eq!(failure.to_string(), "source 'stations' already exists");
        assert!(!adapter.is_initialized());

        let mut map = failure.into_engine();
        assert!(map.scheduler().is_empty());
        assert!(map.layer(LAYER_ID).is_none());
        assert_eq!(map.listener_count(), 0);
        // The caller's own source survives the rollback
        assert!(map.source(SOURCE_ID).is_some());

        map.remove_source(SOURCE_ID);
        adapter.initialize(map).unwrap();
        assert_eq!(adapter.engine().unwrap().listener_count(), 1);
    }

    #[test]
    fn test_reinitialize_after_teardown_keeps_handlers() {
        let clicks = Arc::new(Mutex::new(Vec::new()));
        let sink = clicks.clone();
        let mut adapter = MapSyncAdapter::new(CategoryStyles::default(), DEFAULT_ICON_SIZE)
            .with_click_handler(move |station| sink.lock().unwrap().push(station.id.clone()));

        adapter.initialize(HeadlessMap::new()).unwrap();
        let map = adapter.teardown().unwrap();
        adapter.initialize(map).unwrap();
        adapter.update_data(&snapshots()).unwrap();

        let map = adapter.engine_mut().unwrap();
        assert_eq!(map.listener_count(), 1);
        assert_eq!(map.dispatch(LayerEvent::Click, LAYER_ID, "72"), 1);
        assert_eq!(*clicks.lock().unwrap(), vec!["72".to_string()]);
    }

    #[test]
    fn test_leave_handler_pairs_with_hover() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let (enter, leave) = (events.clone(), events.clone());
        let mut adapter = MapSyncAdapter::new(CategoryStyles::default(), DEFAULT_ICON_SIZE)
            .with_hover_handler(move |station| {
                enter.lock().unwrap().push(format!("enter {}", station.id))
            })
            .with_leave_handler(move |station| {
                leave.lock().unwrap().push(format!("leave {}", station.id))
            });
        adapter.initialize(HeadlessMap::new()).unwrap();
        adapter.update_data(&snapshots()).unwrap();

        let map = adapter.engine_mut().unwrap();
        assert_eq!(map.listener_count(), 2);
        map.dispatch(LayerEvent::MouseEnter, LAYER_ID, "79");
        map.dispatch(LayerEvent::MouseLeave, LAYER_ID, "79");
        assert_eq!(
            *events.lock().unwrap(),
            vec!["enter 79".to_string(), "leave 79".to_string()]
        );

        adapter.teardown();
        assert!(!adapter.is_initialized());
    }

    #[test]
    fn test_update_before_initialize_fails() {
        let mut adapter: MapSyncAdapter<HeadlessMap> =
            MapSyncAdapter::new(CategoryStyles::default(), DEFAULT_ICON_SIZE);
        assert_eq!(
            adapter.update_data(&snapshots()),
            Err(MapError::NotInitialized)
        );
    }

    #[test]
    fn test_update_replaces_source_wholesale() {
        let mut adapter = initialized();
        adapter.update_data(&snapshots()).unwrap();
        assert_eq!(adapter.engine().unwrap().source(SOURCE_ID).unwrap().len(), 2);

        let fewer = &snapshots()[1..];
        adapter.update_data(fewer).unwrap();
        let source = adapter.engine().unwrap().source(SOURCE_ID).unwrap();
        assert_eq!(source.len(), 1);
        assert!(source.get("72").is_none());
        assert!(source.get("79").is_some());
    }

    #[test]
    fn test_update_is_idempotent() {
        let mut adapter = initialized();
        adapter.update_data(&snapshots()).unwrap();
        let first = adapter.engine().unwrap().source(SOURCE_ID).unwrap().clone();

        adapter.update_data(&snapshots()).unwrap();
        let second = adapter.engine().unwrap().source(SOURCE_ID).unwrap();
        assert_eq!(&first, second);
        assert_eq!(adapter.engine().unwrap().source_updates(), 2);
    }

    #[test]
    fn test_marker_icon_follows_category() {
        let mut adapter = initialized();
        adapter.update_data(&snapshots()).unwrap();
        let map = adapter.engine().unwrap();
        let layer = map.layer(LAYER_ID).unwrap();
        let source = map.source(SOURCE_ID).unwrap();

        assert_eq!(layer.icon_image.resolve(source.get("72").unwrap()), "pulse-red");
        assert_eq!(layer.icon_image.resolve(source.get("79").unwrap()), "pulse-green");
    }

    #[test]
    fn test_click_passes_full_snapshot() {
        let clicked = Arc::new(Mutex::new(Vec::new()));
        let sink = clicked.clone();
        let mut adapter = MapSyncAdapter::new(CategoryStyles::default(), DEFAULT_ICON_SIZE)
            .with_click_handler(move |station| sink.lock().unwrap().push(station.clone()));
        adapter.initialize(HeadlessMap::new()).unwrap();
        adapter.update_data(&snapshots()).unwrap();

        let map = adapter.engine_mut().unwrap();
        assert_eq!(map.dispatch(LayerEvent::Click, LAYER_ID, "72"), 1);

        let clicked = clicked.lock().unwrap();
        assert_eq!(clicked.len(), 1);
        assert_eq!(clicked[0], snapshots()[0]);
    }

    #[test]
    fn test_hover_listens_on_mouse_enter() {
        let hovered = Arc::new(Mutex::new(Vec::new()));
        let sink = hovered.clone();
        let mut adapter = MapSyncAdapter::new(CategoryStyles::default(), DEFAULT_ICON_SIZE)
            .with_hover_handler(move |station| sink.lock().unwrap().push(station.id.clone()));
        adapter.initialize(HeadlessMap::new()).unwrap();
        adapter.update_data(&snapshots()).unwrap();

        let map = adapter.engine_mut().unwrap();
        assert_eq!(map.dispatch(LayerEvent::Click, LAYER_ID, "79"), 0);
        assert_eq!(map.dispatch(LayerEvent::MouseEnter, LAYER_ID, "79"), 1);
        assert_eq!(*hovered.lock().unwrap(), vec!["79".to_string()]);
    }

    #[test]
    fn test_teardown_releases_everything() {
        let mut adapter = MapSyncAdapter::new(CategoryStyles::default(), DEFAULT_ICON_SIZE)
            .with_click_handler(|_| {});
        adapter.initialize(HeadlessMap::new()).unwrap();
        adapter.update_data(&snapshots()).unwrap();
        assert_eq!(adapter.engine().unwrap().listener_count(), 1);

        let mut map = adapter.teardown().unwrap();
        assert!(!adapter.is_initialized());
        assert!(map.scheduler().is_empty());
        assert!(map.source(SOURCE_ID).is_none());
        assert!(map.layer(LAYER_ID).is_none());
        assert_eq!(map.listener_count(), 0);

        // No repaint callbacks survive teardown
        assert!(!map.repaint(500));
        assert_eq!(
            adapter.update_data(&snapshots()),
            Err(MapError::NotInitialized)
        );
        assert!(adapter.teardown().is_none());
    }

    #[test]
    fn test_custom_styles_reach_icons() {
        let mut styles = CategoryStyles::default();
        styles.critical.color = crate::risk::Rgb::new(10, 20, 30);
        let mut adapter = MapSyncAdapter::new(styles, DEFAULT_ICON_SIZE);
        adapter.initialize(HeadlessMap::new()).unwrap();

        let map = adapter.engine_mut().unwrap();
        map.repaint(0);
        let pixels = map.image("pulse-red").unwrap().pixels();
        let center = ((50 * DEFAULT_ICON_SIZE + 50) * 4) as usize;
        assert_eq!(&pixels[center..center + 4], &[10, 20, 30, 255]);
    }
}
