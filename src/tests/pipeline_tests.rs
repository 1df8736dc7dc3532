//! # Pipeline Tests
//!
//! Exercise the path from poll outcome to map engine exactly as the live loop
//! runs it: poll events are folded into a [`Dashboard`] that owns a
//! [`MapSyncAdapter`] over a [`HeadlessMap`].

use crate::{format_at_risk, format_status, Dashboard, PollEvent};
use async_trait::async_trait;
use bike_pulse_lib::feed::{FeedError, HttpClient, HttpReply};
use bike_pulse_lib::headless::HeadlessMap;
use bike_pulse_lib::map_sync::{MapSyncAdapter, LAYER_ID, SOURCE_ID};
use bike_pulse_lib::poller::DataPoller;
use bike_pulse_lib::pulse::DEFAULT_ICON_SIZE;
use bike_pulse_lib::risk::{CategoryStyles, RiskCategory};
use bike_pulse_lib::{NetworkState, Position, StationSnapshot};
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn station(id: &str, bikes: u32, capacity: u32) -> StationSnapshot {
    StationSnapshot::classified(
        id,
        format!("Station {}", id),
        bikes,
        capacity,
        Position {
            lon: -73.98,
            lat: 40.75,
        },
    )
}

fn dashboard() -> Dashboard<HeadlessMap> {
    let mut adapter = MapSyncAdapter::new(CategoryStyles::default(), DEFAULT_ICON_SIZE);
    adapter.initialize(HeadlessMap::new()).unwrap();
    Dashboard::new(adapter)
}

fn source_len(dashboard: &Dashboard<HeadlessMap>) -> usize {
    dashboard
        .adapter
        .engine()
        .and_then(|map| map.source(SOURCE_ID))
        .map(|source| source.len())
        .unwrap_or(0)
}

#[test]
fn successful_poll_updates_state_and_markers() {
    let mut dashboard = dashboard();
    dashboard
        .apply(PollEvent::Stations(vec![
            station("1", 0, 10),
            station("2", 5, 10),
            station("3", 10, 10),
        ]))
        .unwrap();

    let state = dashboard.state.as_ref().unwrap();
    assert_eq!(state.stats.total_stations, 3);
    assert_eq!(state.stats.total_bikes, 15);
    assert_eq!(state.stats.system_load_percent, 50);
    assert_eq!(source_len(&dashboard), 3);
    assert!(dashboard.last_error.is_none());
}

#[test]
fn failed_poll_keeps_previous_data() {
    let mut dashboard = dashboard();
    dashboard
        .apply(PollEvent::Stations(vec![station("1", 0, 10), station("2", 9, 10)]))
        .unwrap();
    let updates_before = dashboard.adapter.engine().unwrap().source_updates();

    dashboard
        .apply(PollEvent::Failed("network error: HTTP status 502".to_string()))
        .unwrap();

    assert_eq!(
        dashboard.last_error.as_deref(),
        Some("network error: HTTP status 502")
    );
    assert_eq!(dashboard.state.as_ref().unwrap().stats.total_stations, 2);
    assert_eq!(source_len(&dashboard), 2);
    assert_eq!(
        dashboard.adapter.engine().unwrap().source_updates(),
        updates_before
    );

    // The next good poll clears the error
    dashboard
        .apply(PollEvent::Stations(vec![station("3", 4, 10)]))
        .unwrap();
    assert!(dashboard.last_error.is_none());
    assert_eq!(source_len(&dashboard), 1);
}

#[test]
fn repaint_animates_registered_markers() {
    let mut dashboard = dashboard();
    assert!(dashboard.repaint(0));
    assert!(dashboard.repaint(600));
    assert_eq!(dashboard.adapter.engine().unwrap().scheduler().ticks(), 2);

    dashboard.adapter.teardown();
    assert!(!dashboard.repaint(900));
}

#[test]
fn at_risk_report_lists_worst_first() {
    let state = NetworkState::from_snapshots(vec![
        station("healthy", 9, 10),
        station("b", 1, 10),
        station("a", 0, 10),
        station("c", 0, 10),
    ]);
    let report = format_at_risk(&state);
    let lines: Vec<&str> = report.lines().collect();

    assert_eq!(lines[0], "Most at risk (3 critical)");
    assert!(lines[1].contains("[a]"));
    assert!(lines[2].contains("[c]"));
    assert!(lines[3].contains("[b]"));
    assert_eq!(lines.len(), 4);
}

#[test]
fn status_before_first_poll() {
    let mut dashboard = dashboard();
    dashboard
        .apply(PollEvent::Failed("decode error: expected value".to_string()))
        .unwrap();
    dashboard.repaint(0);

    let status = format_status(&dashboard, Utc::now());
    assert!(status.starts_with("No station data yet\n"));
    assert!(status.contains("Last error: decode error: expected value"));
    assert!(status.contains('@'));
}

/// Serves a two-station payload, except on the second call which reports failure.
struct StaticFeed {
    calls: AtomicUsize,
}

#[async_trait]
impl HttpClient for StaticFeed {
    async fn get(&self, _url: &str) -> Result<HttpReply, FeedError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let body = if call == 1 {
            r#"{"success": false, "error": "GBFS unreachable"}"#
        } else {
            r#"{"success": true, "stations": [
                {"id": "72", "name": "W 52 St & 11 Ave", "bikes": 1, "capacity": 39, "lat": 40.767, "lon": -73.993},
                {"id": "79", "name": "Franklin St & W Broadway", "bikes": 30, "capacity": 33, "lat": 40.719, "lon": -74.006}
            ]}"#
        };
        Ok(HttpReply {
            status: 200,
            body: body.as_bytes().to_vec(),
        })
    }
}

#[tokio::test(start_paused = true)]
async fn poller_events_drive_the_map() {
    let feed = Arc::new(StaticFeed {
        calls: AtomicUsize::new(0),
    });
    let mut poller = DataPoller::new(feed.clone(), "http://test/api/stations");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let error_tx = tx.clone();
    poller
        .start(
            Duration::from_secs(60),
            move |stations| {
                let _ = tx.send(PollEvent::Stations(stations));
            },
            move |message| {
                let _ = error_tx.send(PollEvent::Failed(message));
            },
        )
        .unwrap();

    let mut dashboard = dashboard();
    for _ in 0..3 {
        let event = rx.recv().await.unwrap();
        dashboard.apply(event).unwrap();
    }
    poller.stop().await;

    // Poll 1 succeeded, poll 2 failed, poll 3 succeeded again
    assert_eq!(feed.calls.load(Ordering::SeqCst), 3);
    assert!(dashboard.last_error.is_none());
    let state = dashboard.state.as_ref().unwrap();
    assert_eq!(state.stats.critical_count, 1);
    assert_eq!(state.stats.healthy_count, 1);

    let map = dashboard.adapter.engine().unwrap();
    let layer = map.layer(LAYER_ID).unwrap();
    let source = map.source(SOURCE_ID).unwrap();
    assert_eq!(
        layer.icon_image.resolve(source.get("72").unwrap()),
        RiskCategory::Critical.icon_name()
    );
}
