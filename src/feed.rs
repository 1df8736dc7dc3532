//! # Station Feed Fetching and Decoding
//!
//! This module handles all network operations for the station feed served by
//! the bike-pulse backend, and turns its JSON payload into classified
//! [`StationSnapshot`]s.
//!
//! ## Data Source
//! - **URL**: `<base-url>/api/stations`
//! - **Format**: `{ "success": bool, "stations": [...], "error"?: string }`
//! - **Station**: `{ id, name, bikes, capacity, lat, lon, ... }`; extra fields
//!   such as a server-computed `risk` or `pulse_speed` are ignored because
//!   classification always happens here, from raw bikes and capacity
//!
//! ## Error Handling
//! Every failure is one of two displayable kinds:
//! - [`FeedError::Network`]: transport errors, non-2xx statuses, and
//!   `success: false` responses
//! - [`FeedError::Decode`]: malformed JSON or a station lacking a numeric
//!   bike count, capacity or valid coordinate pair
//!
//! Neither is fatal. The poller reports them and tries again on schedule.

use crate::{Position, StationSnapshot};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while fetching and decoding the station feed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeedError {
    /// Transport failure, non-2xx response, or the backend reported failure
    #[error("network error: {0}")]
    Network(String),

    /// Payload was not the expected shape
    #[error("decode error: {0}")]
    Decode(String),
}

/// Status and body of an HTTP response.
#[derive(Clone, Debug)]
pub struct HttpReply {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Minimal HTTP capability the poller needs; swapped for a scripted client in tests.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get(&self, url: &str) -> Result<HttpReply, FeedError>;
}

/// Production client backed by `reqwest`.
pub struct ReqwestClient(reqwest::Client);

impl ReqwestClient {
    /// Build a client whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FeedError::Network(e.to_string()))?;
        Ok(Self(client))
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get(&self, url: &str) -> Result<HttpReply, FeedError> {
        let response = self
            .0
            .get(url)
            .send()
            .await
            .map_err(|e| FeedError::Network(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| FeedError::Network(e.to_string()))?;
        Ok(HttpReply {
            status,
            body: body.to_vec(),
        })
    }
}

/// Full URL of the stations endpoint under `base_url`.
pub fn stations_url(base_url: &str) -> String {
    format!("{}/api/stations", base_url.trim_end_matches('/'))
}

/// Fetch the feed once and decode it into classified snapshots.
pub async fn fetch_stations(
    client: &dyn HttpClient,
    url: &str,
) -> Result<Vec<StationSnapshot>, FeedError> {
    let reply = client.get(url).await?;
    if !reply.is_success() {
        let detail = serde_json::from_slice::<FeedResponse>(&reply.body)
            .ok()
            .and_then(|body| body.error);
        return Err(FeedError::Network(match detail {
            Some(detail) => format!("HTTP status {}: {}", reply.status, detail),
            None => format!("HTTP status {}", reply.status),
        }));
    }
    decode_payload(&reply.body)
}

// -- Private Implementation --

#[derive(Deserialize)]
struct FeedResponse {
    success: bool,
    #[serde(default)]
    stations: Vec<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct RawStation {
    id: String,
    name: String,
    bikes: u32,
    capacity: u32,
    lat: f64,
    lon: f64,
}

/// Decode a feed payload, validate every station and classify it.
///
/// Validation is all-or-nothing: one malformed station rejects the whole
/// payload, so a poll never delivers a partial network.
pub fn decode_payload(bytes: &[u8]) -> Result<Vec<StationSnapshot>, FeedError> {
    let response: FeedResponse =
        serde_json::from_slice(bytes).map_err(|e| FeedError::Decode(e.to_string()))?;

    if !response.success {
        return Err(FeedError::Network(
            response
                .error
                .unwrap_or_else(|| "Failed to fetch station data".to_string()),
        ));
    }

    let mut snapshots = Vec::with_capacity(response.stations.len());
    for (index, value) in response.stations.into_iter().enumerate() {
        let raw: RawStation = serde_json::from_value(value)
            .map_err(|e| FeedError::Decode(format!("station #{}: {}", index, e)))?;
        let position = validate_position(&raw)?;
        snapshots.push(StationSnapshot::classified(
            raw.id,
            raw.name,
            raw.bikes,
            raw.capacity,
            position,
        ));
    }

    Ok(snapshots)
}

fn validate_position(raw: &RawStation) -> Result<Position, FeedError> {
    let valid = raw.lat.is_finite()
        && raw.lon.is_finite()
        && (-90.0..=90.0).contains(&raw.lat)
        && (-180.0..=180.0).contains(&raw.lon);
    if !valid {
        return Err(FeedError::Decode(format!(
            "station {}: invalid coordinates ({}, {})",
            raw.id, raw.lat, raw.lon
        )));
    }
    Ok(Position {
        lon: raw.lon,
        lat: raw.lat,
    })
}
