//! Subscription handles returned by adapters

use std::cell::Cell;
use std::fmt;
use std::sync::Arc;

use parking_lot::ReentrantMutex;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Lifecycle of one websocket session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Subscribed,
    BackingOff,
    /// Terminal
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Subscribed => "subscribed",
            SessionState::BackingOff => "backing_off",
            SessionState::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serializes callback invocations against cancellation. Reentrant so a
/// callback may cancel its own subscription.
pub(crate) struct CallbackGate {
    open: ReentrantMutex<Cell<bool>>,
}

impl CallbackGate {
    pub(crate) fn new() -> Self {
        Self {
            open: ReentrantMutex::new(Cell::new(true)),
        }
    }

    /// Run `f` unless the gate is closed. Returns false when closed.
    pub(crate) fn invoke<F: FnOnce()>(&self, f: F) -> bool {
        let open = self.open.lock();
        if !open.get() {
            return false;
        }
        f();
        true
    }

    /// Blocks until an in-flight invocation on another thread returns
    pub(crate) fn close(&self) {
        self.open.lock().set(false);
    }
}

struct HandleInner {
    cancel: CancellationToken,
    gate: Arc<CallbackGate>,
    state: watch::Receiver<SessionState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Cancellation handle for one subscription. Clones share the session.
#[derive(Clone)]
pub struct SubscriptionHandle {
    inner: Arc<HandleInner>,
}

impl SubscriptionHandle {
    pub(crate) fn new(
        cancel: CancellationToken,
        gate: Arc<CallbackGate>,
        state: watch::Receiver<SessionState>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                cancel,
                gate,
                state,
                task: Mutex::new(Some(task)),
            }),
        }
    }

    /// Stop the session. Idempotent; once this returns the callback is
    /// never invoked again.
    pub fn cancel(&self) {
        self.inner.cancel.cancel();
        self.inner.gate.close();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.clone()
    }

    /// Wait for the session task to finish. Only the first caller waits.
    pub async fn join(&self) {
        let task = self.inner.task.lock().await.take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    /// Wait until the session reports `target`. False if the session ended first.
    pub async fn wait_for(&self, target: SessionState) -> bool {
        let mut state = self.watch_state();
        let reached = state.wait_for(|s| *s == target).await.is_ok();
        reached
    }
}
