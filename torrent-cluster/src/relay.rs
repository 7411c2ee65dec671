//! Per-job event relay.
//!
//! A [`JobRelay`] is handed back by every `Cluster::add`. The poll monitor
//! publishes through it; callers either take a broadcast receiver with
//! [`JobRelay::subscribe`] or register callbacks for one event kind with
//! [`JobRelay::on`]. Cancelling the relay stops the monitor and silences it.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use transmission_client::{JobSnapshot, RpcError};

const CHANNEL_CAPACITY: usize = 64;

/// Kinds of events a relay publishes.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::AsRefStr,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EventKind {
    Poll,
    Download,
    Complete,
    NoSeeds,
    Error,
    Timeout,
}

impl EventKind {
    /// Terminal kinds end the job's polling.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Complete | Self::NoSeeds | Self::Error | Self::Timeout
        )
    }
}

/// Why a job ended in `error`.
#[derive(Debug, Clone)]
pub enum JobFailure {
    /// The member could not be asked.
    Transport(Arc<RpcError>),
    /// The member reports an error on the job itself.
    Job(JobSnapshot),
}

impl JobFailure {
    pub fn is_unreachable(&self) -> bool {
        match self {
            Self::Transport(err) => err.is_unreachable(),
            Self::Job(_) => false,
        }
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(err) => write!(f, "{err}"),
            Self::Job(snapshot) => write!(
                f,
                "job error {} on {}: {}",
                snapshot.error, snapshot.host, snapshot.error_message
            ),
        }
    }
}

/// Payload of a `timeout` event.
#[derive(Debug, Clone, PartialEq)]
pub enum TimeoutPayload {
    /// The member flags the job as stalled.
    Stalled(JobSnapshot),
    /// The member stopped reporting the job for too long.
    Missing {
        host: String,
        hash: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub enum JobEvent {
    Poll { hash: String },
    Download(JobSnapshot),
    Complete(JobSnapshot),
    NoSeeds(JobSnapshot),
    Error(JobFailure),
    Timeout(TimeoutPayload),
}

impl JobEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Poll { .. } => EventKind::Poll,
            Self::Download(_) => EventKind::Download,
            Self::Complete(_) => EventKind::Complete,
            Self::NoSeeds(_) => EventKind::NoSeeds,
            Self::Error(_) => EventKind::Error,
            Self::Timeout(_) => EventKind::Timeout,
        }
    }

    /// The snapshot carried by the event, if any.
    pub fn snapshot(&self) -> Option<&JobSnapshot> {
        match self {
            Self::Download(s) | Self::Complete(s) | Self::NoSeeds(s) => Some(s),
            Self::Error(JobFailure::Job(s)) => Some(s),
            Self::Timeout(TimeoutPayload::Stalled(s)) => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Active,
    Finished(EventKind),
    Cancelled,
}

type Listener = Arc<dyn Fn(&JobEvent) + Send + Sync>;
type RemovalHook = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

struct RelayInner {
    hash: String,
    sender: broadcast::Sender<JobEvent>,
    listeners: RwLock<Vec<(EventKind, Listener)>>,
    state: Mutex<RelayState>,
    /// Held for a whole emission; `cancel` waits on it. Reentrant so a
    /// listener may cancel its own relay.
    dispatch: ReentrantMutex<()>,
    token: CancellationToken,
    removal: Mutex<Option<RemovalHook>>,
}

/// Cheaply cloneable handle on one job's event stream.
#[derive(Clone)]
pub struct JobRelay {
    inner: Arc<RelayInner>,
}

impl JobRelay {
    pub fn new(hash: impl Into<String>) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(RelayInner {
                hash: hash.into(),
                sender,
                listeners: RwLock::new(Vec::new()),
                state: Mutex::new(RelayState::Active),
                dispatch: ReentrantMutex::new(()),
                token: CancellationToken::new(),
                removal: Mutex::new(None),
            }),
        }
    }

    pub fn hash(&self) -> &str {
        &self.inner.hash
    }

    pub fn state(&self) -> RelayState {
        *self.inner.state.lock()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Receive every event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.sender.subscribe()
    }

    /// Call `listener` for each event of `kind`, in registration order.
    pub fn on<F>(&self, kind: EventKind, listener: F)
    where
        F: Fn(&JobEvent) + Send + Sync + 'static,
    {
        self.inner.listeners.write().push((kind, Arc::new(listener)));
    }

    /// Publish an event. Returns `false` when the relay no longer accepts
    /// events because it was cancelled or already saw a terminal event.
    pub fn emit(&self, event: JobEvent) -> bool {
        let kind = event.kind();
        let _dispatch = self.inner.dispatch.lock();
        {
            let mut state = self.inner.state.lock();
            if *state != RelayState::Active || self.inner.token.is_cancelled() {
                debug!(hash = %self.inner.hash, event = %kind, "Dropping event on inactive relay");
                return false;
            }
            if kind.is_terminal() {
                *state = RelayState::Finished(kind);
            }
        }

        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .read()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            listener(&event);
        }

        // No receivers is fine; listeners may be the only audience.
        let _ = self.inner.sender.send(event);
        true
    }

    /// Stop polling. Nothing is published after this returns; an emission
    /// already in flight on another thread finishes first.
    pub fn cancel(&self) {
        let _dispatch = self.inner.dispatch.lock();
        {
            let mut state = self.inner.state.lock();
            if *state == RelayState::Active {
                *state = RelayState::Cancelled;
            }
        }
        self.inner.token.cancel();
    }

    /// Stop polling and remove the job from its member.
    ///
    /// Removal runs in the background and only logs its outcome. Returns the
    /// removal task, or `None` if removal already ran or was never set up.
    pub fn cancel_remove(&self) -> Option<JoinHandle<()>> {
        self.cancel();
        let hook = self.inner.removal.lock().take()?;
        Some(tokio::spawn(hook()))
    }

    pub(crate) fn cancellation_token(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    pub(crate) fn set_removal_hook(&self, hook: RemovalHook) {
        *self.inner.removal.lock() = Some(hook);
    }
}

impl fmt::Debug for JobRelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRelay")
            .field("hash", &self.inner.hash)
            .field("state", &self.state())
            .field("subscribers", &self.inner.sender.receiver_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::str::FromStr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    fn poll() -> JobEvent {
        JobEvent::Poll {
            hash: "abc".to_string(),
        }
    }

    fn missing() -> JobEvent {
        JobEvent::Timeout(TimeoutPayload::Missing {
            host: "h".to_string(),
            hash: "abc".to_string(),
            reason: "gone".to_string(),
        })
    }

    #[test]
    fn test_event_kind_names() {
        assert_eq!(EventKind::NoSeeds.to_string(), "noseeds");
        assert_eq!(EventKind::from_str("timeout").unwrap(), EventKind::Timeout);
        assert!(!EventKind::Download.is_terminal());
        assert!(EventKind::Error.is_terminal());
    }

    #[test]
    fn test_listeners_run_in_order_for_their_kind() {
        let relay = JobRelay::new("abc");
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second"] {
            let seen = seen.clone();
            relay.on(EventKind::Poll, move |_| seen.lock().push(tag));
        }
        let other = seen.clone();
        relay.on(EventKind::Timeout, move |_| other.lock().push("timeout"));

        assert!(relay.emit(poll()));
        assert_eq!(*seen.lock(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let relay = JobRelay::new("abc");
        let mut rx = relay.subscribe();

        relay.emit(poll());
        relay.emit(missing());

        assert_eq!(rx.recv().await.unwrap().kind(), EventKind::Poll);
        assert_eq!(rx.recv().await.unwrap().kind(), EventKind::Timeout);
        assert_eq!(relay.state(), RelayState::Finished(EventKind::Timeout));
    }

    #[test]
    fn test_terminal_event_closes_relay() {
        let relay = JobRelay::new("abc");
        assert!(relay.emit(missing()));
        assert!(!relay.emit(poll()));
    }

    #[test]
    fn test_emission_after_cancel_is_dropped() {
        let relay = JobRelay::new("abc");
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        relay.on(EventKind::Poll, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let mut rx = relay.subscribe();

        relay.cancel();

        assert!(!relay.emit(poll()));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(rx.try_recv().is_err());
        assert_eq!(relay.state(), RelayState::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_remove_runs_hook_once() {
        let relay = JobRelay::new("abc");
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        relay.set_removal_hook(Box::new(move || {
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        }));

        relay.cancel_remove().unwrap().await.unwrap();
        assert!(relay.cancel_remove().is_none());

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(relay.is_cancelled());
    }

    #[test]
    fn test_cancel_waits_for_in_flight_emission() {
        let relay = JobRelay::new("abc");
        let mut rx = relay.subscribe();
        let (entered_tx, entered_rx) = mpsc::channel();
        relay.on(EventKind::Poll, move |_| {
            entered_tx.send(()).unwrap();
            std::thread::sleep(Duration::from_millis(50));
        });

        let emitter = {
            let relay = relay.clone();
            std::thread::spawn(move || relay.emit(poll()))
        };
        entered_rx.recv().unwrap();
        relay.cancel();

        // The in-flight event reached subscribers before cancel returned.
        assert_eq!(rx.try_recv().unwrap().kind(), EventKind::Poll);
        assert!(emitter.join().unwrap());
        assert!(!relay.emit(poll()));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_listener_may_cancel_its_own_relay() {
        let relay = JobRelay::new("abc");
        let handle = relay.clone();
        relay.on(EventKind::Poll, move |_| handle.cancel());

        assert!(relay.emit(poll()));
        assert_eq!(relay.state(), RelayState::Cancelled);
        assert!(!relay.emit(poll()));
    }
}
