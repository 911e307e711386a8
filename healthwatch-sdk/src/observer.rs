//! Push-based multicast of monitor output to subscribers.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::warn;

use crate::error::ObserverError;

/// A subscriber to a [`Subject`].
///
/// A failure in `next`, whether returned or panicked, is routed to the same
/// observer's `error` and never reaches the publisher or other subscribers.
pub trait Observer<T>: Send + Sync {
    fn next(&self, value: &T) -> Result<(), ObserverError>;

    fn error(&self, error: ObserverError) {
        warn!("Subscriber failed: {}", error);
    }

    fn complete(&self) {}
}

/// Observer backed by a closure.
pub struct FnObserver<F> {
    func: F,
}

impl<T, F> Observer<T> for FnObserver<F>
where
    F: Fn(&T) + Send + Sync,
{
    fn next(&self, value: &T) -> Result<(), ObserverError> {
        (self.func)(value);
        Ok(())
    }
}

impl<F> fmt::Debug for FnObserver<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnObserver")
    }
}

/// Subscribe a closure that only cares about values.
pub fn from_fn<T, F>(func: F) -> Arc<dyn Observer<T>>
where
    T: 'static,
    F: Fn(&T) + Send + Sync + 'static,
{
    Arc::new(FnObserver { func })
}

type Entry<T> = (u64, Arc<dyn Observer<T>>);

struct Subscribers<T> {
    next_id: AtomicU64,
    entries: RwLock<Vec<Entry<T>>>,
}

trait Detach: Send + Sync {
    fn detach(&self, id: u64) -> bool;
}

impl<T: 'static> Detach for Subscribers<T> {
    fn detach(&self, id: u64) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }
}

/// Multicast point: every published value goes to every current subscriber.
///
/// Publishing iterates a copy of the subscriber list, so observers may
/// subscribe or unsubscribe while being notified.
pub struct Subject<T> {
    subscribers: Arc<Subscribers<T>>,
}

impl<T: 'static> Subject<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Subscribers {
                next_id: AtomicU64::new(0),
                entries: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn subscribe(&self, observer: Arc<dyn Observer<T>>) -> Subscription {
        let id = self.subscribers.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.entries.write().push((id, observer));

        let subscribers: Arc<dyn Detach> = self.subscribers.clone();
        Subscription {
            id,
            subject: Arc::downgrade(&subscribers),
        }
    }

    /// Deliver `value` to every subscriber, isolating their failures.
    pub fn publish(&self, value: &T) {
        for (_, observer) in self.snapshot() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| observer.next(value)));
            let failure = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(error)) => error,
                Err(payload) => ObserverError::Panicked(panic_message(payload.as_ref())),
            };

            if panic::catch_unwind(AssertUnwindSafe(|| observer.error(failure))).is_err() {
                warn!("Subscriber panicked while handling its own error");
            }
        }
    }

    /// Signal completion to every subscriber.
    ///
    /// Subscribers stay attached, so a restarted monitor keeps feeding them.
    pub fn complete(&self) {
        for (_, observer) in self.snapshot() {
            if panic::catch_unwind(AssertUnwindSafe(|| observer.complete())).is_err() {
                warn!("Subscriber panicked on completion");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.entries.read().is_empty()
    }

    fn snapshot(&self) -> Vec<Entry<T>> {
        self.subscribers.entries.read().clone()
    }
}

impl<T: 'static> Default for Subject<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Subject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subject")
            .field("subscribers", &self.subscribers.entries.read().len())
            .finish()
    }
}

/// Token returned by `subscribe`; dropping it keeps the subscription alive.
pub struct Subscription {
    id: u64,
    subject: Weak<dyn Detach>,
}

impl Subscription {
    /// Detach the observer. Returns `false` if it was already detached or the
    /// subject is gone.
    pub fn unsubscribe(self) -> bool {
        self.subject
            .upgrade()
            .map(|subject| subject.detach(self.id))
            .unwrap_or(false)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        values: Mutex<Vec<u32>>,
        errors: Mutex<Vec<ObserverError>>,
        completed: Mutex<bool>,
    }

    impl Observer<u32> for Recorder {
        fn next(&self, value: &u32) -> Result<(), ObserverError> {
            if *value == 13 {
                return Err(ObserverError::Rejected("unlucky".into()));
            }
            self.values.lock().push(*value);
            Ok(())
        }

        fn error(&self, error: ObserverError) {
            self.errors.lock().push(error);
        }

        fn complete(&self) {
            *self.completed.lock() = true;
        }
    }

    struct Panicking;

    impl Observer<u32> for Panicking {
        fn next(&self, _: &u32) -> Result<(), ObserverError> {
            panic!("boom");
        }
    }

    #[test]
    fn publishes_to_all_subscribers() {
        let subject = Subject::<u32>::new();
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());

        subject.subscribe(first.clone());
        subject.subscribe(second.clone());
        subject.publish(&1);
        subject.publish(&2);

        assert_eq!(*first.values.lock(), vec![1, 2]);
        assert_eq!(*second.values.lock(), vec![1, 2]);
    }

    #[test]
    fn rejected_value_goes_to_error_channel() {
        let subject = Subject::<u32>::new();
        let recorder = Arc::new(Recorder::default());
        subject.subscribe(recorder.clone());

        subject.publish(&13);
        subject.publish(&14);

        assert_eq!(*recorder.values.lock(), vec![14]);
        assert_eq!(
            *recorder.errors.lock(),
            vec![ObserverError::Rejected("unlucky".into())]
        );
    }

    #[test]
    fn panicking_subscriber_is_isolated() {
        let subject = Subject::<u32>::new();
        let recorder = Arc::new(Recorder::default());
        subject.subscribe(Arc::new(Panicking));
        subject.subscribe(recorder.clone());

        subject.publish(&7);

        assert_eq!(*recorder.values.lock(), vec![7]);
    }

    #[test]
    fn unsubscribe_detaches_once() {
        let subject = Subject::<u32>::new();
        let recorder = Arc::new(Recorder::default());
        let subscription = subject.subscribe(recorder.clone());
        assert_eq!(subject.len(), 1);

        assert!(subscription.unsubscribe());
        assert!(subject.is_empty());

        subject.publish(&1);
        assert!(recorder.values.lock().is_empty());
    }

    #[test]
    fn unsubscribe_during_publish() {
        let subject = Arc::new(Subject::<u32>::new());
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let received = Arc::new(Mutex::new(Vec::new()));

        let handle = slot.clone();
        let sink = received.clone();
        let subscription = subject.subscribe(from_fn(move |value: &u32| {
            sink.lock().push(*value);
            if let Some(subscription) = handle.lock().take() {
                subscription.unsubscribe();
            }
        }));
        *slot.lock() = Some(subscription);

        subject.publish(&1);
        subject.publish(&2);

        assert_eq!(*received.lock(), vec![1]);
    }

    #[test]
    fn complete_notifies_and_keeps_subscribers() {
        let subject = Subject::<u32>::new();
        let recorder = Arc::new(Recorder::default());
        subject.subscribe(recorder.clone());

        subject.complete();

        assert!(*recorder.completed.lock());
        assert_eq!(subject.len(), 1);
    }

    #[test]
    fn unsubscribe_after_subject_dropped() {
        let subject = Subject::<u32>::new();
        let subscription = subject.subscribe(from_fn(|_: &u32| {}));
        drop(subject);

        assert!(!subscription.unsubscribe());
    }
}
