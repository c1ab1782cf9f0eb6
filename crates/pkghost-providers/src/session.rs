//! Streaming call bridge.
//!
//! Providers push results one flat tuple at a time through a [`YieldFn`].
//! Callers want a lazy, cancellable sequence. [`spawn_stream`] runs the
//! provider call on a blocking task, maps each tuple to a record, and feeds
//! a bounded queue that the returned [`StreamSession`] drains as a
//! [`Stream`].
//!
//! Cancellation is cooperative. The yield callback reports "ok to continue"
//! as `!(session cancelled || caller cancelled)`, and the bridge stops
//! enqueuing once that turns false.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures::Stream;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::binder::panic_message;
use crate::error::{CallError, CallResult};
use crate::router::{CapabilityRouter, capability};
use crate::value::YieldFn;

/// Default bound on records buffered between producer and consumer.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Lifecycle of a [`StreamSession`]. Every state but `Running` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// The producer is still running.
    Running = 0,
    /// The producer finished on its own.
    Completed = 1,
    /// The session or the caller asked the producer to stop.
    Cancelled = 2,
    /// The producer failed; output is truncated.
    Faulted = 3,
}

impl SessionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Completed,
            2 => Self::Cancelled,
            3 => Self::Faulted,
            _ => Self::Running,
        }
    }

    /// Whether no further transition can happen.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self != Self::Running
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Faulted => "faulted",
        })
    }
}

/// Per-call options for [`spawn_stream`].
#[derive(Debug, Clone, Copy)]
pub struct CallOptions {
    /// Raise the session's cancellation signal when the provider fails.
    pub cancel_on_exception: bool,
    /// Records buffered before the producer waits.
    pub queue_capacity: usize,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            cancel_on_exception: true,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// A lazily drained sequence of records from one provider call.
///
/// Dropping a running session cancels it; the producer task runs to
/// completion and its remaining output is discarded.
pub struct StreamSession<T> {
    id: Uuid,
    rx: mpsc::Receiver<T>,
    token: CancellationToken,
    state: Arc<AtomicU8>,
}

impl<T> StreamSession<T> {
    fn new(rx: mpsc::Receiver<T>) -> Self {
        Self {
            id: Uuid::new_v4(),
            rx,
            token: CancellationToken::new(),
            state: Arc::new(AtomicU8::new(SessionState::Running as u8)),
        }
    }

    /// An empty session that is already in a terminal state.
    #[must_use]
    pub fn finished(state: SessionState) -> Self {
        let (_tx, rx) = mpsc::channel(1);
        let session = Self::new(rx);
        if state == SessionState::Cancelled {
            session.token.cancel();
        }
        session.state.store(state as u8, Ordering::Release);
        session
    }

    /// Session id, as it appears in logs.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Ask the producer to stop. Records already queued stay deliverable.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// A token that cancels this session when triggered.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Wait for the next record. `None` once the producer is done and the
    /// queue is drained.
    pub async fn next_record(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Drain the whole session.
    pub async fn collect_all(mut self) -> Vec<T> {
        let mut out = Vec::new();
        while let Some(record) = self.rx.recv().await {
            out.push(record);
        }
        out
    }
}

impl<T> Stream for StreamSession<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl<T> Drop for StreamSession<T> {
    fn drop(&mut self) {
        if self.state() == SessionState::Running {
            debug!(session = %self.id, "Stream session dropped while running; cancelling");
            self.token.cancel();
        }
    }
}

impl<T> fmt::Debug for StreamSession<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("cancel_requested", &self.token.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Run a push-style provider call and expose its output as a session.
///
/// `map` turns one yielded tuple into a record; a tuple it rejects is
/// skipped with a warning. `call` receives the yield callback plus a
/// per-call router whose `IsCancelled` reflects the session.
///
/// Provider errors and panics are reported through the router's `Error`
/// capability and `tracing`, never returned. An `Unsupported` error means
/// the member is absent and simply yields an empty, completed session.
/// [`CallError::Declined`] ends the session cancelled without a report.
///
/// Must be called from within a Tokio runtime; otherwise the session is
/// returned already faulted.
pub fn spawn_stream<T, M, C>(
    label: &str,
    router: &CapabilityRouter,
    options: CallOptions,
    map: M,
    call: C,
) -> StreamSession<T>
where
    T: Send + 'static,
    M: Fn(&[Value]) -> Option<T> + Send + Sync + 'static,
    C: FnOnce(YieldFn, CapabilityRouter) -> CallResult<()> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(options.queue_capacity.max(1));
    let session = StreamSession::new(rx);

    let Ok(handle) = Handle::try_current() else {
        warn!(operation = label, "Streaming call made outside an async runtime");
        router.error(&format!("{label}: no async runtime available"));
        session
            .state
            .store(SessionState::Faulted as u8, Ordering::Release);
        return session;
    };

    let token = session.token.clone();
    let call_router = {
        let token = token.clone();
        let caller = router.clone();
        router
            .layered()
            .with_predicate(capability::IS_CANCELLED, move |_| {
                token.is_cancelled() || caller.is_cancelled()
            })
            .build()
    };

    let sender = Arc::new(Mutex::new(Some(tx)));
    let yield_fn: YieldFn = {
        let sender = Arc::clone(&sender);
        let token = token.clone();
        let call_router = call_router.clone();
        let handle = handle.clone();
        let label = label.to_owned();
        Arc::new(move |tuple: Vec<Value>| {
            // One ok-to-continue query per yield; a refusal cancels the session.
            if call_router.is_cancelled() {
                token.cancel();
                return false;
            }
            let Some(record) = map(&tuple) else {
                warn!(operation = %label, tuple = ?tuple, "Skipping malformed result tuple");
                return true;
            };
            let tx = sender.lock().ok().and_then(|guard| guard.clone());
            let Some(tx) = tx else {
                return false;
            };
            let sent = handle.block_on(async {
                tokio::select! {
                    () = token.cancelled() => false,
                    res = tx.send(record) => res.is_ok(),
                }
            });
            if !sent {
                token.cancel();
                return false;
            }
            !token.is_cancelled()
        })
    };

    let state = Arc::clone(&session.state);
    let caller = router.clone();
    let label = label.to_owned();
    let session_id = session.id;
    debug!(session = %session_id, operation = %label, "Starting provider call");

    handle.spawn_blocking(move || {
        let outcome = catch_unwind(AssertUnwindSafe(|| call(yield_fn, call_router)))
            .unwrap_or_else(|payload| {
                Err(CallError::Panicked {
                    member: label.clone(),
                    message: panic_message(payload.as_ref()),
                })
            });

        let final_state = match outcome {
            Err(CallError::Declined(reason)) => {
                debug!(session = %session_id, operation = %label, reason = %reason, "Provider call declined");
                token.cancel();
                SessionState::Cancelled
            },
            Ok(()) | Err(CallError::Unsupported(_)) => {
                if token.is_cancelled() {
                    SessionState::Cancelled
                } else {
                    SessionState::Completed
                }
            },
            Err(e) => {
                warn!(session = %session_id, operation = %label, error = %e, "Provider call failed");
                caller.error(&format!("{label}: {e}"));
                if options.cancel_on_exception {
                    token.cancel();
                }
                SessionState::Faulted
            },
        };

        state.store(final_state as u8, Ordering::Release);
        if let Ok(mut guard) = sender.lock() {
            guard.take();
        }
        debug!(session = %session_id, operation = %label, state = %final_state, "Provider call finished");
    });

    session
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingRouter;
    use futures::StreamExt;
    use serde_json::json;
    use std::sync::atomic::AtomicBool;

    fn first_string(tuple: &[Value]) -> Option<String> {
        tuple.first()?.as_str().map(str::to_owned)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn records_arrive_in_yield_order() {
        let router = CapabilityRouter::empty();
        let session = spawn_stream(
            "test",
            &router,
            CallOptions::default(),
            first_string,
            |out, _| {
                for name in ["a", "b", "c"] {
                    if !out(vec![json!(name)]) {
                        break;
                    }
                }
                Ok(())
            },
        );
        let state = Arc::clone(&session.state);
        let got: Vec<String> = session.collect().await;
        assert_eq!(got, ["a", "b", "c"]);
        assert_eq!(
            SessionState::from_u8(state.load(Ordering::Acquire)),
            SessionState::Completed
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn caller_cancellation_truncates_output() {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let router = CapabilityRouter::builder()
            .with_predicate(capability::IS_CANCELLED, move |_| flag.load(Ordering::SeqCst))
            .build();
        let mut session = spawn_stream(
            "test",
            &router,
            CallOptions::default(),
            first_string,
            move |out, _| {
                let mut i = 0_u32;
                loop {
                    if i == 2 {
                        cancelled.store(true, Ordering::SeqCst);
                    }
                    if !out(vec![json!(format!("r{i}"))]) {
                        break;
                    }
                    i = i.saturating_add(1);
                }
                Ok(())
            },
        );
        let mut got = Vec::new();
        while let Some(r) = session.next_record().await {
            got.push(r);
        }
        assert_eq!(got, ["r0", "r1"]);
        assert_eq!(session.state(), SessionState::Cancelled);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn refusal_after_records_were_sent_cancels_the_session() {
        use std::sync::atomic::AtomicUsize;

        // Ok-to-continue until the third query.
        let queries = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&queries);
        let router = CapabilityRouter::builder()
            .with_predicate(capability::IS_CANCELLED, move |_| {
                counter.fetch_add(1, Ordering::SeqCst) >= 2
            })
            .build();
        let returns = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&returns);
        let mut session = spawn_stream(
            "FindPackage",
            &router,
            CallOptions::default(),
            first_string,
            move |out, _| {
                for name in ["one", "two", "three", "four"] {
                    let more = out(vec![json!(name)]);
                    seen.lock().unwrap().push(more);
                    if !more {
                        break;
                    }
                }
                Ok(())
            },
        );

        let mut got = Vec::new();
        while let Some(r) = session.next_record().await {
            got.push(r);
        }
        assert_eq!(got, ["one", "two"]);
        assert_eq!(*returns.lock().unwrap(), [true, true, false]);
        assert_eq!(queries.load(Ordering::SeqCst), 3);
        assert_eq!(session.state(), SessionState::Cancelled);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn declined_calls_end_cancelled_without_an_error() {
        let recorder = RecordingRouter::new();
        let mut session: StreamSession<String> = spawn_stream(
            "InstallPackage",
            &recorder.router(),
            CallOptions::default(),
            first_string,
            |_, _| Err(CallError::Declined("untrusted source".into())),
        );
        assert!(session.next_record().await.is_none());
        assert_eq!(session.state(), SessionState::Cancelled);
        assert!(recorder.errors().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn provider_error_faults_and_reports() {
        let recorder = RecordingRouter::new();
        let session = spawn_stream(
            "FindPackage",
            &recorder.router(),
            CallOptions::default(),
            first_string,
            |out, _| {
                out(vec![json!("one")]);
                Err(CallError::failed("disk on fire"))
            },
        );
        let token = session.cancellation_token();
        let state = Arc::clone(&session.state);
        let got = session.collect_all().await;
        assert_eq!(got, ["one"]);
        assert_eq!(
            SessionState::from_u8(state.load(Ordering::Acquire)),
            SessionState::Faulted
        );
        assert!(token.is_cancelled());
        assert_eq!(recorder.errors().len(), 1);
        assert!(recorder.errors()[0].contains("disk on fire"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn install_style_errors_do_not_raise_cancellation() {
        let recorder = RecordingRouter::new();
        let options = CallOptions {
            cancel_on_exception: false,
            ..CallOptions::default()
        };
        let session = spawn_stream(
            "InstallPackage",
            &recorder.router(),
            options,
            first_string,
            |_, _| Err(CallError::failed("nope")),
        );
        let token = session.cancellation_token();
        let state = Arc::clone(&session.state);
        assert!(session.collect_all().await.is_empty());
        assert!(!token.is_cancelled());
        assert_eq!(
            SessionState::from_u8(state.load(Ordering::Acquire)),
            SessionState::Faulted
        );
        assert_eq!(recorder.errors().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn panics_become_faults() {
        let recorder = RecordingRouter::new();
        let mut session: StreamSession<String> = spawn_stream(
            "GetInstalledPackages",
            &recorder.router(),
            CallOptions::default(),
            first_string,
            |_, _| panic!("provider bug"),
        );
        assert!(session.next_record().await.is_none());
        assert_eq!(session.state(), SessionState::Faulted);
        assert!(recorder.errors()[0].contains("provider bug"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unsupported_member_is_an_empty_completed_session() {
        let recorder = RecordingRouter::new();
        let mut session: StreamSession<String> = spawn_stream(
            "FindPackageByUri",
            &recorder.router(),
            CallOptions::default(),
            first_string,
            |_, _| Err(CallError::Unsupported("FindPackageByUri".into())),
        );
        assert!(session.next_record().await.is_none());
        assert_eq!(session.state(), SessionState::Completed);
        assert!(recorder.errors().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn malformed_tuples_are_skipped() {
        let router = CapabilityRouter::empty();
        let session = spawn_stream(
            "test",
            &router,
            CallOptions::default(),
            first_string,
            |out, _| {
                out(vec![json!("ok")]);
                out(vec![json!(42)]);
                out(vec![json!("fine")]);
                Ok(())
            },
        );
        assert_eq!(session.collect_all().await, ["ok", "fine"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn session_cancel_stops_a_blocked_producer() {
        let router = CapabilityRouter::empty();
        let options = CallOptions {
            queue_capacity: 1,
            ..CallOptions::default()
        };
        let mut session = spawn_stream("test", &router, options, first_string, |out, _| {
            let mut i = 0_u32;
            while out(vec![json!(format!("r{i}"))]) {
                i = i.saturating_add(1);
            }
            Ok(())
        });
        assert_eq!(session.next_record().await.as_deref(), Some("r0"));
        session.cancel();
        while session.next_record().await.is_some() {}
        assert_eq!(session.state(), SessionState::Cancelled);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn per_call_router_reports_session_cancellation() {
        let router = CapabilityRouter::empty();
        let seen = Arc::new(AtomicBool::new(false));
        let seen_in_call = Arc::clone(&seen);
        let session: StreamSession<String> = spawn_stream(
            "test",
            &router,
            CallOptions::default(),
            first_string,
            move |_, call_router| {
                while !call_router.is_cancelled() {
                    std::thread::sleep(std::time::Duration::from_millis(5));
                }
                seen_in_call.store(true, Ordering::SeqCst);
                Ok(())
            },
        );
        session.cancel();
        let state = Arc::clone(&session.state);
        assert!(session.collect_all().await.is_empty());
        assert!(seen.load(Ordering::SeqCst));
        assert_eq!(
            SessionState::from_u8(state.load(Ordering::Acquire)),
            SessionState::Cancelled
        );
    }

    #[test]
    fn outside_a_runtime_the_session_is_faulted() {
        let recorder = RecordingRouter::new();
        let session: StreamSession<String> = spawn_stream(
            "test",
            &recorder.router(),
            CallOptions::default(),
            first_string,
            |_, _| Ok(()),
        );
        assert_eq!(session.state(), SessionState::Faulted);
        assert_eq!(recorder.errors().len(), 1);
    }

    #[test]
    fn finished_sessions_are_terminal() {
        let s: StreamSession<()> = StreamSession::finished(SessionState::Cancelled);
        assert_eq!(s.state(), SessionState::Cancelled);
        assert!(s.cancellation_token().is_cancelled());
        assert!(s.state().is_terminal());
    }
}
