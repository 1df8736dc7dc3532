//! # Station Feed Poller
//!
//! [`DataPoller`] fetches the station feed immediately on start and then on a
//! fixed interval, handing each decoded snapshot list or error message to the
//! caller's callbacks.
//!
//! ## Scheduling
//! A single tokio task owns both the interval timer and the in-flight fetch.
//! At most one fetch is outstanding: a tick that fires while the previous
//! fetch is still running is skipped, and the timer keeps its schedule, so a
//! slow feed never causes a burst of queued requests.
//!
//! ## Shutdown
//! [`DataPoller::stop`] signals the task and waits for it to exit. Any fetch
//! still in flight is dropped with the task, and its result never reaches a
//! callback.

use crate::feed::{fetch_stations, FeedError, HttpClient};
use crate::StationSnapshot;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Default time between two polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Polling,
    Stopped,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PollerError {
    #[error("poller is already running")]
    AlreadyStarted,

    #[error("poller has been stopped and cannot be restarted")]
    Stopped,

    #[error("poll interval must be positive")]
    ZeroInterval,
}

type FetchFuture = Pin<Box<dyn Future<Output = Result<Vec<StationSnapshot>, FeedError>> + Send>>;

struct InFlight {
    fetch: FetchFuture,
    started: Instant,
}

pub struct DataPoller {
    client: Arc<dyn HttpClient>,
    url: String,
    state: PollerState,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl DataPoller {
    pub fn new(client: Arc<dyn HttpClient>, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            state: PollerState::Idle,
            shutdown: None,
            task: None,
        }
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Spawn the polling task on the current tokio runtime.
    ///
    /// The first poll fires immediately. A poller runs at most once: it can
    /// be neither started twice nor restarted after [`DataPoller::stop`].
    pub fn start<S, E>(
        &mut self,
        interval: Duration,
        on_success: S,
        on_error: E,
    ) -> Result<(), PollerError>
    where
        S: FnMut(Vec<StationSnapshot>) + Send + 'static,
        E: FnMut(String) + Send + 'static,
    {
        match self.state {
            PollerState::Polling => return Err(PollerError::AlreadyStarted),
            PollerState::Stopped => return Err(PollerError::Stopped),
            PollerState::Idle => {}
        }
        if interval.is_zero() {
            return Err(PollerError::ZeroInterval);
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run(
            self.client.clone(),
            self.url.clone(),
            interval,
            shutdown_rx,
            on_success,
            on_error,
        ));

        info!(url = %self.url, interval_secs = interval.as_secs_f64(), "Poller started");
        self.shutdown = Some(shutdown_tx);
        self.task = Some(task);
        self.state = PollerState::Polling;
        Ok(())
    }

    /// Stop polling and wait for the task to exit.
    ///
    /// No callback fires once this returns. Stopping an idle or already
    /// stopped poller only marks it stopped.
    pub async fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Poller task ended abnormally");
            }
            info!("Poller stopped");
        }
        self.state = PollerState::Stopped;
    }
}

impl Drop for DataPoller {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run<S, E>(
    client: Arc<dyn HttpClient>,
    url: String,
    period: Duration,
    mut shutdown: oneshot::Receiver<()>,
    mut on_success: S,
    mut on_error: E,
) where
    S: FnMut(Vec<StationSnapshot>) + Send + 'static,
    E: FnMut(String) + Send + 'static,
{
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut in_flight: Option<InFlight> = None;

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => break,

            (result, elapsed) = next_result(&mut in_flight) => {
                in_flight = None;
                match result {
                    Ok(stations) => {
                        info!(
                            stations = stations.len(),
                            elapsed_ms = elapsed.as_millis() as u64,
                            "Station feed updated"
                        );
                        on_success(stations);
                    }
                    Err(e) => {
                        warn!(error = %e, "Station poll failed");
                        on_error(e.to_string());
                    }
                }
            }

            _ = ticker.tick() => {
                if in_flight.is_some() {
                    warn!("Previous poll still outstanding, skipping tick");
                    continue;
                }
                debug!(url = %url, "Polling station feed");
                let client = client.clone();
                let url = url.clone();
                in_flight = Some(InFlight {
                    fetch: Box::pin(async move { fetch_stations(client.as_ref(), &url).await }),
                    started: Instant::now(),
                });
            }
        }
    }

    if in_flight.is_some() {
        debug!("Dropping in-flight poll on shutdown");
    }
}

/// Resolve with the outstanding fetch's result, or never if none is running.
///
/// Dropping this future leaves the fetch in place, so losing a `select!` race
/// to the ticker does not lose progress.
async fn next_result(
    slot: &mut Option<InFlight>,
) -> (Result<Vec<StationSnapshot>, FeedError>, Duration) {
    match slot {
        Some(in_flight) => {
            let result = (&mut in_flight.fetch).await;
            (result, in_flight.started.elapsed())
        }
        None => std::future::pending().await,
    }
}
