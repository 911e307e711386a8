//! Call caches keyed by stringified arguments.
//!
//! Entries are never evicted on their own; the owner decides when the cached
//! values are stale and calls `clear()`. [`History`](crate::History) does this
//! on every append, so a cache holds at most one entry per distinct query per
//! tick.

use std::collections::HashMap;
use std::fmt;

use healthwatch_types::MetricField;
use parking_lot::Mutex;

/// Separator between the keys of individual arguments.
pub const KEY_DELIMITER: &str = "-";

/// Conversion of call arguments into a cache key.
///
/// Tuples join the keys of their elements with [`KEY_DELIMITER`], so
/// `(MetricField::CpuPercent, 5)` and `"cpuUsage.percent-5"` share an entry.
pub trait MemoKey {
    fn memo_key(&self) -> String;
}

impl MemoKey for () {
    fn memo_key(&self) -> String {
        String::new()
    }
}

impl MemoKey for str {
    fn memo_key(&self) -> String {
        self.to_owned()
    }
}

impl MemoKey for String {
    fn memo_key(&self) -> String {
        self.clone()
    }
}

impl MemoKey for MetricField {
    fn memo_key(&self) -> String {
        self.path()
    }
}

impl<T: MemoKey + ?Sized> MemoKey for &T {
    fn memo_key(&self) -> String {
        (**self).memo_key()
    }
}

impl<T: MemoKey> MemoKey for Option<T> {
    fn memo_key(&self) -> String {
        match self {
            Some(value) => value.memo_key(),
            None => "undefined".to_owned(),
        }
    }
}

impl<T: MemoKey> MemoKey for [T] {
    fn memo_key(&self) -> String {
        self.iter()
            .map(MemoKey::memo_key)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl<T: MemoKey> MemoKey for Vec<T> {
    fn memo_key(&self) -> String {
        self.as_slice().memo_key()
    }
}

macro_rules! impl_memo_key_display {
    ($($ty:ty),* $(,)?) => {
        $(
            impl MemoKey for $ty {
                fn memo_key(&self) -> String {
                    self.to_string()
                }
            }
        )*
    };
}

impl_memo_key_display!(bool, char, i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64);

macro_rules! impl_memo_key_tuple {
    ($($name:ident),+) => {
        impl<$($name: MemoKey),+> MemoKey for ($($name,)+) {
            #[allow(non_snake_case)]
            fn memo_key(&self) -> String {
                let ($($name,)+) = self;
                [$($name.memo_key()),+].join(KEY_DELIMITER)
            }
        }
    };
}

impl_memo_key_tuple!(A);
impl_memo_key_tuple!(A, B);
impl_memo_key_tuple!(A, B, C);
impl_memo_key_tuple!(A, B, C, D);

/// A bare cache: key to value, cleared explicitly.
pub struct Memo<R> {
    entries: Mutex<HashMap<String, R>>,
}

impl<R: Clone> Memo<R> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached value for `key`, computing and storing it on a miss.
    ///
    /// The lock is not held while `compute` runs, so a computation may itself
    /// query the cache.
    pub fn get_or_compute(&self, key: String, compute: impl FnOnce() -> R) -> R {
        if let Some(hit) = self.entries.lock().get(&key) {
            return hit.clone();
        }

        let value = compute();
        self.entries
            .lock()
            .entry(key)
            .or_insert(value)
            .clone()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl<R: Clone> Default for Memo<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> fmt::Debug for Memo<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memo")
            .field("entries", &self.entries.lock().len())
            .finish()
    }
}

/// Anything holding memoized results that can be invalidated.
pub trait Invalidate: Send + Sync {
    /// Drop every cached result.
    fn clear(&self);

    /// Whether calls are served from a cache.
    fn is_memoized(&self) -> bool {
        true
    }
}

impl<R: Clone + Send> Invalidate for Memo<R> {
    fn clear(&self) {
        Memo::clear(self);
    }
}

/// A function paired with a cache of its results.
///
/// ```rust
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
/// use healthwatch_sdk::memo::memo;
///
/// let calls = Arc::new(AtomicUsize::new(0));
/// let counter = calls.clone();
/// let square = memo(move |x: &u32| {
///     counter.fetch_add(1, Ordering::SeqCst);
///     x * x
/// });
///
/// assert_eq!(square.call(&4), 16);
/// assert_eq!(square.call(&4), 16);
/// assert_eq!(calls.load(Ordering::SeqCst), 1);
///
/// square.clear();
/// assert_eq!(square.call(&4), 16);
/// assert_eq!(calls.load(Ordering::SeqCst), 2);
/// ```
pub struct Memoized<A: ?Sized, R> {
    func: Box<dyn Fn(&A) -> R + Send + Sync>,
    cache: Memo<R>,
}

impl<A: MemoKey + ?Sized, R: Clone> Memoized<A, R> {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&A) -> R + Send + Sync + 'static,
    {
        Self {
            func: Box::new(func),
            cache: Memo::new(),
        }
    }

    pub fn call(&self, args: &A) -> R {
        self.cache.get_or_compute(args.memo_key(), || (self.func)(args))
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    /// Number of cached argument keys.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

impl<A: MemoKey + ?Sized, R: Clone + Send> Invalidate for Memoized<A, R> {
    fn clear(&self) {
        self.cache.clear();
    }
}

impl<A: ?Sized, R> fmt::Debug for Memoized<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memoized")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

/// Wrap `func` in a [`Memoized`] cache.
pub fn memo<A, R, F>(func: F) -> Memoized<A, R>
where
    A: MemoKey + ?Sized,
    R: Clone,
    F: Fn(&A) -> R + Send + Sync + 'static,
{
    Memoized::new(func)
}
