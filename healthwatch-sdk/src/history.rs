//! Bounded snapshot history with memoized derived statistics.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use healthwatch_types::{MetricField, Metrics, Snapshot};
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::trace;

use crate::clock::{self, Clock};
use crate::error::{Error, ObserverError, Result};
use crate::memo::{Invalidate, Memo, MemoKey};
use crate::observer::Observer;

/// History construction options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HistoryOptions {
    /// Maximum number of snapshots kept; the oldest is evicted first.
    pub limit: usize,
}

impl HistoryOptions {
    pub const DEFAULT_LIMIT: usize = 60;

    pub fn with_limit(limit: usize) -> Self {
        Self { limit }
    }
}

impl Default for HistoryOptions {
    fn default() -> Self {
        Self {
            limit: Self::DEFAULT_LIMIT,
        }
    }
}

/// Read-only view of the snapshots, handed to custom statistics.
#[derive(Clone, Copy)]
pub struct Window<'a> {
    entries: &'a VecDeque<Arc<Snapshot>>,
}

impl<'a> Window<'a> {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn latest(&self) -> Option<&'a Snapshot> {
        self.entries.back().map(|snapshot| &**snapshot)
    }

    /// Snapshots from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &'a Snapshot> + 'a {
        self.entries.iter().map(|snapshot| &**snapshot)
    }

    /// One entry per snapshot, `None` where the field was not reported.
    pub fn values_of(&self, field: &MetricField) -> Vec<Option<f64>> {
        self.iter().map(|snapshot| snapshot.value(field)).collect()
    }

    /// Map every snapshot through `f`.
    pub fn project<T>(&self, f: impl FnMut(&Snapshot) -> T) -> Vec<T> {
        self.iter().map(f).collect()
    }
}

impl fmt::Debug for Window<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Window").field("len", &self.len()).finish()
    }
}

/// Typed handle to a statistic registered on a [`History`].
pub struct StatisticKey<A: ?Sized, R> {
    name: Arc<str>,
    _marker: PhantomData<fn(&A) -> R>,
}

impl<A: ?Sized, R> StatisticKey<A, R> {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<A: ?Sized, R> Clone for StatisticKey<A, R> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            _marker: PhantomData,
        }
    }
}

impl<A: ?Sized, R> fmt::Debug for StatisticKey<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StatisticKey").field(&self.name).finish()
    }
}

type StatisticFn<A, R> = dyn Fn(&Window<'_>, &A) -> R + Send + Sync;

struct Statistic<A: ?Sized, R> {
    func: Box<StatisticFn<A, R>>,
    cache: Memo<R>,
}

trait StoredStatistic: Invalidate {
    fn as_any(&self) -> &dyn Any;
}

impl<A, R> Invalidate for Statistic<A, R>
where
    A: ?Sized + 'static,
    R: Clone + Send + 'static,
{
    fn clear(&self) {
        self.cache.clear();
    }
}

impl<A, R> StoredStatistic for Statistic<A, R>
where
    A: ?Sized + 'static,
    R: Clone + Send + 'static,
{
    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct HistoryInner {
    limit: usize,
    clock: Arc<dyn Clock>,
    entries: RwLock<VecDeque<Arc<Snapshot>>>,
    statistics: RwLock<HashMap<Arc<str>, Arc<dyn StoredStatistic>>>,
}

/// Size-bounded, ordered sequence of snapshots.
///
/// Clones share the same storage. Every mutation invalidates the cached
/// results of all registered statistics, so between two appends each
/// statistic is computed at most once per distinct argument.
///
/// ```rust
/// use healthwatch_sdk::{History, HistoryOptions, ManualClock, MetricField, Metrics};
/// use std::sync::Arc;
///
/// let history = History::with_clock(HistoryOptions::with_limit(2), Arc::new(ManualClock::new(0)));
/// for jobs in [1.0, 2.0, 3.0] {
///     history.append(Metrics::builder().custom("jobs", jobs).build());
/// }
///
/// let jobs = MetricField::Custom("jobs".into());
/// assert_eq!(history.len(), 2);
/// assert_eq!(history.values_of(&jobs), vec![Some(2.0), Some(3.0)]);
/// ```
#[derive(Clone)]
pub struct History {
    inner: Arc<HistoryInner>,
}

impl History {
    pub fn new(options: HistoryOptions) -> Self {
        Self::with_clock(options, clock::system())
    }

    /// A zero limit is raised to one.
    pub fn with_clock(options: HistoryOptions, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(HistoryInner {
                limit: options.limit.max(1),
                clock,
                entries: RwLock::new(VecDeque::with_capacity(options.limit.max(1))),
                statistics: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Stamp `metrics` and push it, evicting the oldest snapshot when full.
    ///
    /// Timestamps strictly increase: a clock reading that does not move past
    /// the latest snapshot is bumped by one millisecond.
    pub fn append(&self, metrics: Metrics) -> Arc<Snapshot> {
        let mut entries = self.inner.entries.write();

        let now = self.inner.clock.now_ms();
        let timestamp_ms = match entries.back() {
            Some(latest) => now.max(latest.timestamp_ms + 1),
            None => now,
        };

        let snapshot = Arc::new(Snapshot::new(timestamp_ms, metrics));
        entries.push_back(snapshot.clone());
        while entries.len() > self.inner.limit {
            entries.pop_front();
        }

        self.invalidate();
        trace!("History appended snapshot at {} ({} kept)", timestamp_ms, entries.len());
        snapshot
    }

    /// Drop every snapshot and cached statistic.
    pub fn clear(&self) {
        let mut entries = self.inner.entries.write();
        entries.clear();
        self.invalidate();
    }

    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.read().is_empty()
    }

    pub fn limit(&self) -> usize {
        self.inner.limit
    }

    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.inner.entries.read().back().cloned()
    }

    /// All snapshots from oldest to newest.
    pub fn snapshots(&self) -> Vec<Arc<Snapshot>> {
        self.inner.entries.read().iter().cloned().collect()
    }

    /// One entry per snapshot, `None` where the field was not reported.
    pub fn values_of(&self, field: &MetricField) -> Vec<Option<f64>> {
        let entries = self.inner.entries.read();
        Window { entries: &entries }.values_of(field)
    }

    /// Map every snapshot through `f`.
    pub fn project<T>(&self, f: impl FnMut(&Snapshot) -> T) -> Vec<T> {
        let entries = self.inner.entries.read();
        Window { entries: &entries }.project(f)
    }

    /// Register a named statistic computed from the snapshots.
    ///
    /// Results are cached per argument key until the next append or clear.
    /// Fails with [`Error::DuplicateStatistic`] when `name` is taken.
    ///
    /// `func` runs while the history is read-locked: it must only read the
    /// [`Window`] it is given and never call back into this history.
    pub fn register_statistic<A, R, F>(
        &self,
        name: impl Into<String>,
        func: F,
    ) -> Result<StatisticKey<A, R>>
    where
        A: MemoKey + ?Sized + 'static,
        R: Clone + Send + 'static,
        F: Fn(&Window<'_>, &A) -> R + Send + Sync + 'static,
    {
        let name: Arc<str> = Arc::from(name.into());
        let mut statistics = self.inner.statistics.write();

        if statistics.contains_key(&name) {
            return Err(Error::DuplicateStatistic(name.to_string()));
        }

        let statistic: Arc<dyn StoredStatistic> = Arc::new(Statistic::<A, R> {
            func: Box::new(func),
            cache: Memo::new(),
        });
        statistics.insert(name.clone(), statistic);

        Ok(StatisticKey {
            name,
            _marker: PhantomData,
        })
    }

    /// Evaluate a registered statistic, served from cache when possible.
    ///
    /// Returns `None` if the key was registered on a different history.
    pub fn statistic<A, R>(&self, key: &StatisticKey<A, R>, args: &A) -> Option<R>
    where
        A: MemoKey + ?Sized + 'static,
        R: Clone + Send + 'static,
    {
        let stored = self.inner.statistics.read().get(&key.name).cloned()?;
        let statistic = stored.as_any().downcast_ref::<Statistic<A, R>>()?;

        let entries = self.inner.entries.read();
        let window = Window { entries: &entries };
        Some(
            statistic
                .cache
                .get_or_compute(args.memo_key(), || (statistic.func)(&window, args)),
        )
    }

    /// Names of all registered statistics.
    pub fn statistic_names(&self) -> Vec<String> {
        self.inner
            .statistics
            .read()
            .keys()
            .map(|name| name.to_string())
            .collect()
    }

    // Callers hold the entries write lock, so no reader can cache a result
    // computed from the previous contents after this returns.
    fn invalidate(&self) {
        for statistic in self.inner.statistics.read().values() {
            statistic.clear();
        }
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new(HistoryOptions::default())
    }
}

impl fmt::Debug for History {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("History")
            .field("limit", &self.inner.limit)
            .field("len", &self.len())
            .field("statistics", &self.inner.statistics.read().len())
            .finish()
    }
}

impl Observer<Metrics> for History {
    fn next(&self, value: &Metrics) -> std::result::Result<(), ObserverError> {
        self.append(value.clone());
        Ok(())
    }

    fn complete(&self) {
        self.clear();
    }
}
