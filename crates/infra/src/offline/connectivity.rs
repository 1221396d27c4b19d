//! Online/offline detection.
//!
//! State changes come from two sources:
//!
//! - platform events ([`ConnectivityMonitor::handle_platform_event`]), which
//!   always invoke the matching callback;
//! - a polling loop and on-demand rechecks that probe a health endpoint and
//!   only invoke callbacks when the probe disagrees with the current state.
//!
//! Subscribers get every published state through a `watch` channel.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clinview_domain::Config;
use reqwest::Method;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::http::HttpClient;

/// Monitor lifecycle errors
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Connectivity monitor already running")]
    AlreadyRunning,

    #[error("Connectivity monitor not running")]
    NotRunning,

    #[error("Polling task did not stop within {0:?}")]
    Timeout(Duration),

    #[error("Polling task join failed: {0}")]
    TaskJoinFailed(String),
}

pub type MonitorResult<T> = Result<T, MonitorError>;

/// Snapshot of the believed connectivity
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectivityState {
    pub is_online: bool,
    /// Always `!is_online`
    pub is_offline: bool,
    /// Set by an offline to online transition, cleared by the next update
    pub was_offline: bool,
    pub last_online_time: Option<DateTime<Utc>>,
    pub last_offline_time: Option<DateTime<Utc>>,
}

impl ConnectivityState {
    fn initial(online: bool) -> Self {
        let now = Utc::now();
        Self {
            is_online: online,
            is_offline: !online,
            was_offline: false,
            last_online_time: online.then_some(now),
            last_offline_time: (!online).then_some(now),
        }
    }

    /// State after observing `online`; `stamp` refreshes the timestamp even
    /// without a transition
    fn next(&self, online: bool, stamp: bool) -> Self {
        let changed = self.is_online != online;
        let now = Utc::now();
        let stamp = stamp || changed;
        Self {
            is_online: online,
            is_offline: !online,
            was_offline: online && self.is_offline,
            last_online_time: if online && stamp { Some(now) } else { self.last_online_time },
            last_offline_time: if !online && stamp { Some(now) } else { self.last_offline_time },
        }
    }
}

/// Platform connectivity notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    Online,
    Offline,
}

/// Polling configuration
#[derive(Debug, Clone)]
pub struct ConnectivityConfig {
    /// URL probed with `HEAD`
    pub health_endpoint: String,
    /// Zero disables polling
    pub poll_interval: Duration,
    pub probe_timeout: Duration,
    /// How long `stop` waits for the polling task
    pub join_timeout: Duration,
}

impl ConnectivityConfig {
    pub fn new(health_endpoint: impl Into<String>) -> Self {
        Self {
            health_endpoint: health_endpoint.into(),
            poll_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
            join_timeout: Duration::from_secs(5),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.offline.poll_interval_ms),
            probe_timeout: Duration::from_millis(config.offline.probe_timeout_ms),
            ..Self::new(config.health_endpoint())
        }
    }
}

/// Reachability check behind polling and rechecks
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// Whether the server answered
    async fn probe(&self) -> bool;
}

/// `HEAD <endpoint>`; any status below 500 counts as reachable
#[derive(Debug, Clone)]
pub struct HttpProbe {
    http: HttpClient,
    endpoint: String,
}

impl HttpProbe {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, crate::http::HttpError> {
        Ok(Self { http: HttpClient::builder().timeout(timeout).build()?, endpoint: endpoint.into() })
    }
}

#[async_trait]
impl ConnectivityProbe for HttpProbe {
    async fn probe(&self) -> bool {
        let request = self.http.request(Method::HEAD, &self.endpoint);
        match self.http.send(request).await {
            Ok(response) => response.status().as_u16() < 500,
            Err(err) => {
                debug!(endpoint = %self.endpoint, error = %err, "Connectivity probe failed");
                false
            }
        }
    }
}

/// Callback receiving the state that triggered it
pub type ConnectivityCallback = Arc<dyn Fn(&ConnectivityState) + Send + Sync>;

struct MonitorInner {
    state: watch::Sender<ConnectivityState>,
    probe: Arc<dyn ConnectivityProbe>,
    probe_timeout: Duration,
    on_online: parking_lot::RwLock<Option<ConnectivityCallback>>,
    on_offline: parking_lot::RwLock<Option<ConnectivityCallback>>,
}

impl MonitorInner {
    /// Publish an observation; returns whether `is_online` flipped
    fn apply(&self, online: bool, from_platform: bool) -> bool {
        let mut transitioned = false;
        let mut published = None;
        self.state.send_if_modified(|state| {
            transitioned = state.is_online != online;
            if !transitioned && !from_platform && !state.was_offline {
                return false;
            }
            *state = state.next(online, from_platform);
            published = Some(state.clone());
            true
        });

        if transitioned {
            info!(online, "Connectivity changed");
        }
        if let Some(state) = published.filter(|_| transitioned || from_platform) {
            self.fire(&state);
        }
        transitioned
    }

    fn fire(&self, state: &ConnectivityState) {
        // Released before the call so callbacks may re-register.
        let callback =
            if state.is_online { self.on_online.read().clone() } else { self.on_offline.read().clone() };
        if let Some(callback) = callback {
            callback(state);
        }
    }

    /// Probe once under the probe timeout and publish the result
    async fn check(&self) -> bool {
        let online = tokio::time::timeout(self.probe_timeout, self.probe.probe())
            .await
            .unwrap_or_else(|_| {
                debug!(timeout_ms = self.probe_timeout.as_millis() as u64, "Connectivity probe timed out");
                false
            });
        self.apply(online, false);
        online
    }
}

/// Event-driven and polling connectivity detector
pub struct ConnectivityMonitor {
    inner: Arc<MonitorInner>,
    config: ConnectivityConfig,
    shutdown: CancellationToken,
    poll_cancellation: CancellationToken,
    task_handle: Option<JoinHandle<()>>,
}

impl fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("config", &self.config)
            .field("state", &*self.inner.state.borrow())
            .field("running", &self.is_running())
            .finish()
    }
}

impl ConnectivityMonitor {
    /// Monitor starting from the platform-reported flag
    pub fn new(
        config: ConnectivityConfig,
        probe: Arc<dyn ConnectivityProbe>,
        initially_online: bool,
    ) -> Self {
        let (state, _) = watch::channel(ConnectivityState::initial(initially_online));
        let shutdown = CancellationToken::new();
        Self {
            inner: Arc::new(MonitorInner {
                state,
                probe,
                probe_timeout: config.probe_timeout,
                on_online: parking_lot::RwLock::new(None),
                on_offline: parking_lot::RwLock::new(None),
            }),
            config,
            poll_cancellation: shutdown.child_token(),
            shutdown,
            task_handle: None,
        }
    }

    /// Monitor probing `config.health_endpoint` over HTTP
    pub fn with_http_probe(
        config: ConnectivityConfig,
        initially_online: bool,
    ) -> Result<Self, crate::http::HttpError> {
        let probe = HttpProbe::new(config.health_endpoint.clone(), config.probe_timeout)?;
        Ok(Self::new(config, Arc::new(probe), initially_online))
    }

    pub fn on_online<F>(&self, callback: F)
    where
        F: Fn(&ConnectivityState) + Send + Sync + 'static,
    {
        *self.inner.on_online.write() = Some(Arc::new(callback));
    }

    pub fn on_offline<F>(&self, callback: F)
    where
        F: Fn(&ConnectivityState) + Send + Sync + 'static,
    {
        *self.inner.on_offline.write() = Some(Arc::new(callback));
    }

    pub fn state(&self) -> ConnectivityState {
        self.inner.state.borrow().clone()
    }

    pub fn is_online(&self) -> bool {
        self.inner.state.borrow().is_online
    }

    /// Receiver of every published state
    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.inner.state.subscribe()
    }

    /// Apply a platform online/offline notification
    pub fn handle_platform_event(&self, event: ConnectivityEvent) {
        debug!(?event, "Platform connectivity event");
        self.inner.apply(event == ConnectivityEvent::Online, true);
    }

    /// Probe now and return the result.
    ///
    /// Independent of the polling loop; dropping the monitor abandons an
    /// in-flight recheck as offline.
    #[instrument(skip(self))]
    pub async fn recheck_connectivity(&self) -> bool {
        let cancel = self.shutdown.child_token();
        tokio::select! {
            _ = cancel.cancelled() => false,
            online = self.inner.check() => online,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task_handle.is_some()
    }

    /// Spawn the polling loop; a zero interval leaves polling off
    #[instrument(skip(self))]
    pub fn start(&mut self) -> MonitorResult<()> {
        if self.is_running() {
            return Err(MonitorError::AlreadyRunning);
        }

        let interval = self.config.poll_interval;
        if interval.is_zero() {
            debug!("Connectivity polling disabled");
            return Ok(());
        }

        self.poll_cancellation = self.shutdown.child_token();
        let cancel = self.poll_cancellation.clone();
        let inner = Arc::clone(&self.inner);

        self.task_handle = Some(tokio::spawn(async move {
            Self::poll_loop(inner, interval, cancel).await;
        }));
        info!(interval_ms = interval.as_millis() as u64, "Connectivity monitor started");
        Ok(())
    }

    /// Cancel the polling loop and wait for it to finish
    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> MonitorResult<()> {
        let Some(handle) = self.task_handle.take() else {
            return Err(MonitorError::NotRunning);
        };

        self.poll_cancellation.cancel();
        let join_timeout = self.config.join_timeout;
        match tokio::time::timeout(join_timeout, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(error = %err, "Polling task panicked");
                return Err(MonitorError::TaskJoinFailed(err.to_string()));
            }
            Err(_) => {
                warn!("Polling task did not complete within timeout");
                return Err(MonitorError::Timeout(join_timeout));
            }
        }

        info!("Connectivity monitor stopped");
        Ok(())
    }

    async fn poll_loop(inner: Arc<MonitorInner>, interval: Duration, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Connectivity polling cancelled");
                    break;
                }
                _ = tokio::time::sleep(interval) => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = inner.check() => {}
                    }
                }
            }
        }
    }
}

impl Drop for ConnectivityMonitor {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct FakeProbe {
        online: AtomicBool,
        calls: AtomicUsize,
    }

    impl FakeProbe {
        fn new(online: bool) -> Arc<Self> {
            Arc::new(Self { online: AtomicBool::new(online), calls: AtomicUsize::new(0) })
        }

        fn set(&self, online: bool) {
            self.online.store(online, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ConnectivityProbe for FakeProbe {
        async fn probe(&self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.online.load(Ordering::SeqCst)
        }
    }

    struct HangingProbe;

    #[async_trait]
    impl ConnectivityProbe for HangingProbe {
        async fn probe(&self) -> bool {
            std::future::pending::<()>().await;
            true
        }
    }

    fn counters(monitor: &ConnectivityMonitor) -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let online = Arc::new(AtomicUsize::new(0));
        let offline = Arc::new(AtomicUsize::new(0));
        let on = Arc::clone(&online);
        monitor.on_online(move |_| {
            on.fetch_add(1, Ordering::SeqCst);
        });
        let off = Arc::clone(&offline);
        monitor.on_offline(move |_| {
            off.fetch_add(1, Ordering::SeqCst);
        });
        (online, offline)
    }

    fn monitor_with(probe: Arc<dyn ConnectivityProbe>, online: bool) -> ConnectivityMonitor {
        ConnectivityMonitor::new(ConnectivityConfig::new("http://unused/metadata"), probe, online)
    }

    #[test]
    fn test_initial_state_from_platform_flag() {
        let monitor = monitor_with(FakeProbe::new(true), false);
        let state = monitor.state();

        assert!(!state.is_online);
        assert!(state.is_offline);
        assert!(!state.was_offline);
        assert!(state.last_offline_time.is_some());
        assert!(state.last_online_time.is_none());
    }

    /// Validates platform event handling.
    ///
    /// Assertions:
    /// - Going offline then online sets `was_offline` exactly on reconnect.
    /// - Callbacks fire for every platform event, even repeated ones.
    /// - The next update clears `was_offline`.
    #[test]
    fn test_platform_events() {
        let monitor = monitor_with(FakeProbe::new(true), true);
        let (online, offline) = counters(&monitor);

        monitor.handle_platform_event(ConnectivityEvent::Offline);
        let state = monitor.state();
        assert!(state.is_offline);
        assert!(!state.was_offline);
        assert_eq!(offline.load(Ordering::SeqCst), 1);

        monitor.handle_platform_event(ConnectivityEvent::Online);
        let state = monitor.state();
        assert!(state.is_online);
        assert!(state.was_offline);
        assert_eq!(online.load(Ordering::SeqCst), 1);

        monitor.handle_platform_event(ConnectivityEvent::Online);
        assert!(!monitor.state().was_offline);
        assert_eq!(online.load(Ordering::SeqCst), 2);
    }

    /// A callback may replace the registered callbacks while it runs.
    #[test]
    fn test_callback_can_reregister() {
        let monitor = monitor_with(FakeProbe::new(true), false);
        let replaced = Arc::new(AtomicUsize::new(0));

        let inner = Arc::downgrade(&monitor.inner);
        let hits = Arc::clone(&replaced);
        monitor.on_online(move |_| {
            let Some(inner) = inner.upgrade() else { return };
            let hits = Arc::clone(&hits);
            *inner.on_online.write() = Some(Arc::new(move |_: &ConnectivityState| {
                hits.fetch_add(1, Ordering::SeqCst);
            }));
        });

        monitor.handle_platform_event(ConnectivityEvent::Online);
        assert_eq!(replaced.load(Ordering::SeqCst), 0);

        monitor.handle_platform_event(ConnectivityEvent::Online);
        assert_eq!(replaced.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recheck_corrects_state_once() {
        let probe = FakeProbe::new(false);
        let monitor = monitor_with(probe.clone(), true);
        let (online, offline) = counters(&monitor);

        assert!(!monitor.recheck_connectivity().await);
        assert!(monitor.state().is_offline);
        assert!(!monitor.recheck_connectivity().await);
        assert_eq!(offline.load(Ordering::SeqCst), 1);

        probe.set(true);
        assert!(monitor.recheck_connectivity().await);
        assert!(monitor.state().was_offline);
        assert_eq!(online.load(Ordering::SeqCst), 1);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_timeout_counts_as_offline() {
        let monitor = monitor_with(Arc::new(HangingProbe), true);
        assert!(!monitor.recheck_connectivity().await);
        assert!(monitor.state().is_offline);
    }

    /// Validates the polling loop.
    ///
    /// Assertions:
    /// - Nothing is probed before the first interval elapses.
    /// - A disagreeing probe flips the state and fires the callback once.
    /// - `was_offline` is cleared by the following tick.
    /// - `stop` ends polling.
    #[tokio::test(start_paused = true)]
    async fn test_polling_loop() {
        let probe = FakeProbe::new(true);
        let mut monitor = monitor_with(probe.clone(), true);
        let (online, offline) = counters(&monitor);
        let mut updates = monitor.subscribe();

        monitor.start().expect("start");
        assert!(matches!(monitor.start(), Err(MonitorError::AlreadyRunning)));

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);

        probe.set(false);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(monitor.state().is_offline);
        assert_eq!(offline.load(Ordering::SeqCst), 1);
        assert!(updates.has_changed().expect("sender alive"));
        updates.borrow_and_update();

        probe.set(true);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(monitor.state().was_offline);
        assert_eq!(online.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(!monitor.state().was_offline);
        assert_eq!(online.load(Ordering::SeqCst), 1);

        monitor.stop().await.expect("stop");
        let calls = probe.calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), calls);
        assert!(matches!(monitor.stop().await, Err(MonitorError::NotRunning)));
    }

    #[tokio::test]
    async fn test_zero_interval_disables_polling() {
        let config = ConnectivityConfig {
            poll_interval: Duration::ZERO,
            ..ConnectivityConfig::new("http://unused/metadata")
        };
        let mut monitor = ConnectivityMonitor::new(config, FakeProbe::new(true), true);

        monitor.start().expect("start");
        assert!(!monitor.is_running());
    }

    #[test]
    fn test_config_from_app_config() {
        let mut config = Config::for_base_url("https://fhir.example.org/r4");
        config.offline.poll_interval_ms = 0;

        let connectivity = ConnectivityConfig::from_config(&config);
        assert_eq!(connectivity.health_endpoint, "https://fhir.example.org/r4/metadata");
        assert!(connectivity.poll_interval.is_zero());
        assert_eq!(connectivity.probe_timeout, Duration::from_secs(5));
    }
}
