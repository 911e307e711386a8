//! Inbound request tracking from asynchronous lifecycle signals.
//!
//! A request is in flight from [`RequestMetric::request_started`] until the
//! first of its completion signals (finish, request close, response close)
//! arrives. Completion signals race freely: the first one settles the request
//! and decrements the active gauge, later ones are ignored for that purpose.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use healthwatch_types::{DurationHistogram, Metrics, RequestCounts, RequestData};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::metric::{Metric, MonitorOptions};
use crate::stats::round_to_two_decimals;

/// How long a request may stay in flight before it is counted as a zombie.
pub const ZOMBIE_TIMEOUT: Duration = Duration::from_secs(30);

/// Identity of one tracked request within a [`RequestMetric`].
///
/// Carries the start instant, so a finish signal can be timed even after a
/// close signal already settled the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId {
    seq: u64,
    started_at: Instant,
}

impl RequestId {
    /// When the request started.
    pub fn started_at(&self) -> Instant {
        self.started_at
    }
}

#[derive(Debug)]
struct InFlight {
    zombie_timer: Option<AbortHandle>,
}

impl InFlight {
    fn disarm(&mut self) {
        if let Some(timer) = self.zombie_timer.take() {
            timer.abort();
        }
    }
}

/// Counters for the current measurement window, plus the live requests.
#[derive(Debug, Default)]
struct RequestWindow {
    in_flight: HashMap<RequestId, InFlight>,
    total: u64,
    zombie: u64,
    client_errors: u64,
    server_errors: u64,
    connections: u64,
    durations: DurationHistogram,
}

impl RequestWindow {
    fn sample(&self) -> RequestData {
        let errors = self.client_errors + self.server_errors;
        let error_rate = if self.total == 0 {
            0.0
        } else {
            round_to_two_decimals(100.0 * errors as f64 / self.total as f64)
        };

        RequestData {
            count: RequestCounts {
                total: self.total,
                active: self.in_flight.len() as u64,
                zombie: self.zombie,
                client_errors: self.client_errors,
                server_errors: self.server_errors,
                connections: self.connections,
            },
            duration: self.durations,
            error_rate,
        }
    }

    /// Start a new window. In-flight requests carry over.
    fn reset(&mut self) {
        self.total = 0;
        self.zombie = 0;
        self.client_errors = 0;
        self.server_errors = 0;
        self.connections = 0;
        self.durations = DurationHistogram::new();
    }

    fn settle(&mut self, id: RequestId) -> Option<InFlight> {
        let mut request = self.in_flight.remove(&id)?;
        request.disarm();
        Some(request)
    }

    fn classify(&mut self, status: u16) {
        match status {
            400..=499 => self.client_errors += 1,
            500..=u16::MAX => self.server_errors += 1,
            _ => {}
        }
    }
}

struct RequestState {
    next_id: AtomicU64,
    zombie_timeout: Duration,
    window: Mutex<RequestWindow>,
}

impl RequestState {
    fn mark_zombie(&self, id: RequestId) {
        let mut window = self.window.lock();
        if let Some(request) = window.in_flight.get_mut(&id) {
            request.zombie_timer = None;
            window.zombie += 1;
            debug!("Request {:?} still active after {:?}", id, self.zombie_timeout);
        }
    }
}

/// Collaborator reporting request counts, durations and error rate.
///
/// Handles are cheap to clone and share the same counters. Without a tokio
/// runtime on the calling thread requests are still counted, but no zombie
/// timer is armed.
///
/// ```rust
/// use healthwatch_sdk::RequestMetric;
///
/// let requests = RequestMetric::new();
/// let id = requests.request_started();
/// requests.response_finished(id, 503);
///
/// let sample = requests.sample();
/// assert_eq!(sample.count.total, 1);
/// assert_eq!(sample.count.active, 0);
/// assert_eq!(sample.count.server_errors, 1);
/// assert_eq!(sample.error_rate, 100.0);
/// ```
#[derive(Clone)]
pub struct RequestMetric {
    state: Arc<RequestState>,
}

impl RequestMetric {
    pub fn new() -> Self {
        Self::with_zombie_timeout(ZOMBIE_TIMEOUT)
    }

    pub fn with_zombie_timeout(zombie_timeout: Duration) -> Self {
        Self {
            state: Arc::new(RequestState {
                next_id: AtomicU64::new(0),
                zombie_timeout,
                window: Mutex::new(RequestWindow::default()),
            }),
        }
    }

    /// A request arrived.
    pub fn request_started(&self) -> RequestId {
        let id = RequestId {
            seq: self.state.next_id.fetch_add(1, Ordering::Relaxed),
            started_at: Instant::now(),
        };
        let zombie_timer = self.arm_zombie_timer(id);

        let mut window = self.state.window.lock();
        window.total += 1;
        window.in_flight.insert(
            id,
            InFlight { zombie_timer },
        );

        trace!("Request {:?} started ({} active)", id, window.in_flight.len());
        id
    }

    /// The response was fully sent with `status`.
    ///
    /// The status and duration are recorded even if a close signal already
    /// settled the request; settling only decides when `active` drops.
    pub fn response_finished(&self, id: RequestId, status: u16) {
        let elapsed = id.started_at.elapsed();
        let mut window = self.state.window.lock();
        window.classify(status);
        window.durations.record(elapsed.as_secs_f64() * 1000.0);
        window.settle(id);

        trace!("Request {:?} finished with {} after {:?}", id, status, elapsed);
    }

    /// The client side of the request closed.
    pub fn request_closed(&self, id: RequestId) {
        self.close(id, "request");
    }

    /// The response stream closed, possibly before finishing.
    pub fn response_closed(&self, id: RequestId) {
        self.close(id, "response");
    }

    /// A raw connection was accepted.
    pub fn connection_accepted(&self) {
        self.state.window.lock().connections += 1;
    }

    /// Track a request in this metric only.
    pub fn track(&self) -> TrackedRequest {
        TrackedRequest::start(std::slice::from_ref(self))
    }

    /// Current counters without resetting the window.
    pub fn sample(&self) -> RequestData {
        self.state.window.lock().sample()
    }

    pub fn active(&self) -> u64 {
        self.state.window.lock().in_flight.len() as u64
    }

    fn close(&self, id: RequestId, side: &str) {
        if self.state.window.lock().settle(id).is_some() {
            trace!("Request {:?} settled by {} close", id, side);
        }
    }

    fn arm_zombie_timer(&self, id: RequestId) -> Option<AbortHandle> {
        let runtime = Handle::try_current().ok()?;
        let state: Weak<RequestState> = Arc::downgrade(&self.state);
        let timeout = self.state.zombie_timeout;

        let task = runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(state) = state.upgrade() {
                state.mark_zombie(id);
            }
        });
        Some(task.abort_handle())
    }
}

impl Default for RequestMetric {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RequestMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestMetric")
            .field("zombie_timeout", &self.state.zombie_timeout)
            .field("sample", &self.sample())
            .finish()
    }
}

impl Metric for RequestMetric {
    fn measure(&self, _options: &MonitorOptions) -> Metrics {
        Metrics::builder().request(self.sample()).build()
    }

    fn after_measure(&self, _options: &MonitorOptions) {
        self.state.window.lock().reset();
    }

    /// Disarm zombie timers; in-flight requests remain counted.
    fn stop(&self, _options: &MonitorOptions) {
        let mut window = self.state.window.lock();
        for request in window.in_flight.values_mut() {
            request.disarm();
        }
    }
}

/// One request reported to one or more [`RequestMetric`]s.
///
/// Dropping the guard without calling [`finish`](Self::finish) reports an
/// abnormal response close.
///
/// ```rust
/// use healthwatch_sdk::{RequestMetric, TrackedRequest};
///
/// let short = RequestMetric::new();
/// let long = RequestMetric::new();
///
/// let request = TrackedRequest::start(&[short.clone(), long.clone()]);
/// assert_eq!(long.active(), 1);
/// request.finish(200);
/// assert_eq!(short.active(), 0);
///
/// drop(TrackedRequest::start(&[short.clone()]));
/// assert_eq!(short.sample().count.total, 2);
/// assert_eq!(short.active(), 0);
/// ```
#[derive(Debug)]
#[must_use = "dropping the guard immediately closes the request"]
pub struct TrackedRequest {
    entries: Vec<(RequestMetric, RequestId)>,
}

impl TrackedRequest {
    pub fn start(metrics: &[RequestMetric]) -> Self {
        Self {
            entries: metrics
                .iter()
                .map(|metric| (metric.clone(), metric.request_started()))
                .collect(),
        }
    }

    /// The response was sent with `status`.
    pub fn finish(mut self, status: u16) {
        for (metric, id) in self.entries.drain(..) {
            metric.response_finished(id, status);
        }
    }

    /// The client went away before a response was sent.
    pub fn abort(mut self) {
        for (metric, id) in self.entries.drain(..) {
            metric.request_closed(id);
        }
    }
}

impl Drop for TrackedRequest {
    fn drop(&mut self) {
        for (metric, id) in self.entries.drain(..) {
            metric.response_closed(id);
        }
    }
}
