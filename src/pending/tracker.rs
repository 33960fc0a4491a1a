//! Pending operation tracker.
//!
//! Every operation settles exactly once: by `resolve`, by `fail`, or by its
//! deadline firing. Later attempts are refused.

use crate::core::{now, Error, InstanceId, RequestId, Result, Timestamp};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// What a pending operation is waiting for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PendingKind {
    /// A launched instance to become ready and add an intent listener
    AwaitIntentListener { intent: String },
    /// A launched instance to become ready and add a context listener
    AwaitContextListener { context_type: Option<String> },
    /// A target instance to answer a raised intent
    AwaitIntentResult { raise_id: RequestId },
    /// The user to pick an intent candidate
    Disambiguation,
}

impl PendingKind {
    /// Error delivered when the deadline fires.
    fn timeout_error(&self, subject: &InstanceId) -> Error {
        match self {
            PendingKind::AwaitIntentListener { .. } | PendingKind::AwaitContextListener { .. } => {
                Error::AppTimeout(subject.to_string())
            }
            PendingKind::AwaitIntentResult { .. } | PendingKind::Disambiguation => Error::Timeout,
        }
    }
}

/// Handle to a pending operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PendingHandle(u64);

impl std::fmt::Display for PendingHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pending-{}", self.0)
    }
}

/// Receiving side of a pending operation.
#[derive(Debug)]
pub struct PendingReceiver<T> {
    handle: PendingHandle,
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> PendingReceiver<T> {
    /// Handle of the operation.
    pub fn handle(&self) -> PendingHandle {
        self.handle
    }

    /// Wait for the operation to settle.
    pub async fn wait(self) -> Result<T> {
        self.rx
            .await
            .map_err(|_| Error::Internal(format!("{} dropped without settling", self.handle)))?
    }
}

struct PendingEntry<T> {
    kind: PendingKind,
    subject: InstanceId,
    sender: oneshot::Sender<Result<T>>,
    created: Timestamp,
    timer: Option<JoinHandle<()>>,
}

struct TrackerInner<T> {
    next_id: u64,
    entries: HashMap<PendingHandle, PendingEntry<T>>,
}

/// Registry of timeout-bound operations.
pub struct PendingTracker<T> {
    inner: Arc<Mutex<TrackerInner<T>>>,
}

impl<T> Clone for PendingTracker<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> Default for PendingTracker<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> PendingTracker<T> {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(TrackerInner {
                next_id: 1,
                entries: HashMap::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start tracking an operation about `subject`.
    ///
    /// With a deadline, a timer task fails the operation when it expires.
    /// Must be called from within a tokio runtime in that case.
    pub fn create(
        &self,
        kind: PendingKind,
        subject: &InstanceId,
        deadline: Option<Duration>,
    ) -> (PendingHandle, PendingReceiver<T>) {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.lock();
        let handle = PendingHandle(inner.next_id);
        inner.next_id += 1;

        let timer = deadline.map(|after| {
            let weak = Arc::downgrade(&self.inner);
            tokio::spawn(async move {
                tokio::time::sleep(after).await;
                expire(&weak, handle);
            })
        });

        tracing::debug!(%handle, subject = %subject, ?kind, ?deadline, "pending operation created");
        inner.entries.insert(
            handle,
            PendingEntry {
                kind,
                subject: subject.clone(),
                sender: tx,
                created: now(),
                timer,
            },
        );
        (handle, PendingReceiver { handle, rx })
    }

    /// Resolve an operation. Returns `false` if it had already settled.
    pub fn resolve(&self, handle: PendingHandle, value: T) -> bool {
        self.settle(handle, Ok(value))
    }

    /// Fail an operation. Returns `false` if it had already settled.
    pub fn fail(&self, handle: PendingHandle, error: Error) -> bool {
        self.settle(handle, Err(error))
    }

    fn settle(&self, handle: PendingHandle, outcome: Result<T>) -> bool {
        let entry = self.lock().entries.remove(&handle);
        match entry {
            Some(entry) => {
                complete(handle, entry, outcome);
                true
            }
            None => {
                tracing::warn!(%handle, "attempt to settle an operation that already settled");
                false
            }
        }
    }

    /// Fail every operation about `subject` with `InstanceGone`.
    pub fn fail_subject(&self, subject: &InstanceId) -> usize {
        let drained = self.drain(|_, s| s == subject);
        let count = drained.len();
        for (handle, entry) in drained {
            complete(handle, entry, Err(Error::InstanceGone(subject.clone())));
        }
        count
    }

    /// Resolve every operation matching `predicate` with a copy of `value`.
    pub fn resolve_matching<F>(&self, predicate: F, value: T) -> usize
    where
        F: Fn(&PendingKind, &InstanceId) -> bool,
        T: Clone,
    {
        let drained = self.drain(predicate);
        let count = drained.len();
        for (handle, entry) in drained {
            complete(handle, entry, Ok(value.clone()));
        }
        count
    }

    fn drain<F>(&self, predicate: F) -> Vec<(PendingHandle, PendingEntry<T>)>
    where
        F: Fn(&PendingKind, &InstanceId) -> bool,
    {
        let mut inner = self.lock();
        let mut handles: Vec<PendingHandle> = inner
            .entries
            .iter()
            .filter(|(_, e)| predicate(&e.kind, &e.subject))
            .map(|(h, _)| *h)
            .collect();
        handles.sort();
        handles
            .into_iter()
            .filter_map(|h| inner.entries.remove(&h).map(|e| (h, e)))
            .collect()
    }

    /// Check if an operation is still pending.
    pub fn is_pending(&self, handle: PendingHandle) -> bool {
        self.lock().entries.contains_key(&handle)
    }

    /// Kind of a pending operation.
    pub fn kind(&self, handle: PendingHandle) -> Option<PendingKind> {
        self.lock().entries.get(&handle).map(|e| e.kind.clone())
    }

    /// Number of pending operations.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Check if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn complete<T>(handle: PendingHandle, entry: PendingEntry<T>, outcome: Result<T>) {
    if let Some(timer) = entry.timer {
        timer.abort();
    }
    let elapsed_ms = (now() - entry.created).num_milliseconds();
    match &outcome {
        Ok(_) => tracing::debug!(%handle, subject = %entry.subject, elapsed_ms, "pending resolved"),
        Err(e) => tracing::debug!(%handle, subject = %entry.subject, error = %e, "pending failed"),
    }
    if entry.sender.send(outcome).is_err() {
        tracing::debug!(%handle, "pending operation settled after its waiter went away");
    }
}

fn expire<T>(inner: &Weak<Mutex<TrackerInner<T>>>, handle: PendingHandle) {
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let entry = inner
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .entries
        .remove(&handle);
    match entry {
        Some(entry) => {
            let error = entry.kind.timeout_error(&entry.subject);
            tracing::info!(
                %handle,
                subject = %entry.subject,
                kind = ?entry.kind,
                "pending operation timed out"
            );
            complete(handle, PendingEntry { timer: None, ..entry }, Err(error));
        }
        None => tracing::debug!(%handle, "deadline fired after settlement"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject() -> InstanceId {
        InstanceId::new("i-1")
    }

    #[tokio::test]
    async fn test_resolve_once() {
        let tracker: PendingTracker<u32> = PendingTracker::new();
        let (handle, rx) = tracker.create(PendingKind::Disambiguation, &subject(), None);

        assert!(tracker.resolve(handle, 7));
        assert!(!tracker.resolve(handle, 8));
        assert!(!tracker.fail(handle, Error::Timeout));
        assert_eq!(rx.wait().await, Ok(7));
        assert!(tracker.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_fails_with_timeout() {
        let tracker: PendingTracker<u32> = PendingTracker::new();
        let raise_id = RequestId::new("r-1");
        let (handle, rx) = tracker.create(
            PendingKind::AwaitIntentResult { raise_id },
            &subject(),
            Some(Duration::from_millis(100)),
        );

        tokio::time::advance(Duration::from_millis(150)).await;
        assert_eq!(rx.wait().await, Err(Error::Timeout));
        assert!(!tracker.resolve(handle, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_listener_wait_times_out_as_app_timeout() {
        let tracker: PendingTracker<()> = PendingTracker::new();
        let (_, rx) = tracker.create(
            PendingKind::AwaitIntentListener {
                intent: "ViewChart".to_string(),
            },
            &subject(),
            Some(Duration::from_millis(20_000)),
        );
        assert_eq!(rx.wait().await, Err(Error::AppTimeout("i-1".to_string())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolution_beats_deadline() {
        let tracker: PendingTracker<&'static str> = PendingTracker::new();
        let (handle, rx) = tracker.create(
            PendingKind::Disambiguation,
            &subject(),
            Some(Duration::from_millis(100)),
        );
        assert!(tracker.resolve(handle, "done"));

        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(rx.wait().await, Ok("done"));
    }

    #[tokio::test]
    async fn test_fail_subject() {
        let tracker: PendingTracker<u32> = PendingTracker::new();
        let (_, a) = tracker.create(PendingKind::Disambiguation, &subject(), None);
        let (_, b) = tracker.create(PendingKind::Disambiguation, &InstanceId::new("i-2"), None);

        assert_eq!(tracker.fail_subject(&subject()), 1);
        assert_eq!(tracker.fail_subject(&subject()), 0);
        assert_eq!(a.wait().await, Err(Error::InstanceGone(subject())));
        assert_eq!(tracker.len(), 1);
        drop(b);
    }

    #[tokio::test]
    async fn test_resolve_matching() {
        let tracker: PendingTracker<()> = PendingTracker::new();
        let (_, chart) = tracker.create(
            PendingKind::AwaitIntentListener {
                intent: "ViewChart".to_string(),
            },
            &subject(),
            None,
        );
        let (other, _rx) = tracker.create(
            PendingKind::AwaitIntentListener {
                intent: "StartChat".to_string(),
            },
            &subject(),
            None,
        );

        let wanted = PendingKind::AwaitIntentListener {
            intent: "ViewChart".to_string(),
        };
        let resolved = tracker.resolve_matching(|kind, s| s == &subject() && kind == &wanted, ());
        assert_eq!(resolved, 1);
        assert_eq!(chart.wait().await, Ok(()));
        assert!(tracker.is_pending(other));
    }

    #[tokio::test]
    async fn test_dropped_waiter_is_harmless() {
        let tracker: PendingTracker<u32> = PendingTracker::new();
        let (handle, rx) = tracker.create(PendingKind::Disambiguation, &subject(), None);
        drop(rx);
        assert!(tracker.resolve(handle, 1));
    }
}
