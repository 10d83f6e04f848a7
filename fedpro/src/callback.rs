//! Callback delivery.
//!
//! Callbacks arrive from the session as events and are handed to a
//! [`CallbackHandler`] one at a time, in arrival order. Two delivery models
//! exist: a dedicated task that dispatches as callbacks arrive, and an evoked
//! model where the application pumps callbacks explicitly. Every dispatched
//! callback is answered on the wire once the handler returns.

use async_trait::async_trait;
use bytes::Bytes;
use fedpro_session::{SessionError, SessionEvent};
use fedpro_wire::SequenceNumber;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, warn};

/// Application hook receiving callbacks from the server.
#[async_trait]
pub trait CallbackHandler: Send + Sync {
    /// Process one callback. The callback is answered on the wire after this
    /// returns, whether it succeeded or not.
    async fn dispatch_callback(&self, payload: Bytes) -> anyhow::Result<()>;

    /// The connection dropped; delivery pauses until the session resumes.
    fn connection_lost(&self, _reason: &str) {}

    /// The session is gone for good and no further callbacks will arrive.
    fn session_lost(&self, _reason: &str) {}
}

/// How callbacks reach the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackMode {
    /// The application pumps callbacks via `evoke_callback`
    Evoked,
    /// A dedicated task dispatches callbacks as they arrive
    Dedicated,
}

/// Capability to answer a callback on the wire.
#[async_trait]
pub trait CallbackResponder: Send + Sync {
    /// Send the response for the callback with the given sequence number.
    async fn respond(
        &self,
        responding_to: SequenceNumber,
        blob: Bytes,
    ) -> Result<(), SessionError>;
}

struct QueuedCallback {
    sequence_number: SequenceNumber,
    payload: Bytes,
}

tokio::task_local! {
    static IN_CALLBACK: ();
}

fn in_callback() -> bool {
    IN_CALLBACK.try_with(|_| ()).is_ok()
}

struct Inner {
    handler: Arc<dyn CallbackHandler>,
    responder: Arc<dyn CallbackResponder>,
    items: Mutex<mpsc::UnboundedReceiver<QueuedCallback>>,
    // Callbacks pulled off the queue but parked by a disable that raced
    // the pull; delivered ahead of the queue once re-enabled.
    stash: std::sync::Mutex<VecDeque<QueuedCallback>>,
    // Held for the duration of each dispatch; disabling waits on it.
    dispatching: Mutex<()>,
    enabled: watch::Sender<bool>,
}

impl Inner {
    /// Run one callback through the handler and answer it on the wire.
    ///
    /// Returns whether the callback was dispatched; a disable that landed
    /// after the callback was pulled wins, and the callback is parked
    /// instead.
    async fn dispatch_one(&self, item: QueuedCallback) -> bool {
        let _guard = self.dispatching.lock().await;
        if !*self.enabled.borrow() {
            self.stash_item(item);
            return false;
        }
        let handler = self.handler.clone();
        let payload = item.payload;
        let result = IN_CALLBACK
            .scope((), async move { handler.dispatch_callback(payload).await })
            .await;
        if let Err(e) = result {
            warn!(error = %e, "callback handler failed");
        }
        if let Err(e) = self.responder.respond(item.sequence_number, Bytes::new()).await {
            debug!(error = %e, "callback response not sent");
        }
        true
    }

    fn stash_item(&self, item: QueuedCallback) {
        self.stash
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(item);
    }

    fn unstash_item(&self) -> Option<QueuedCallback> {
        self.stash
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }

    /// Pull the next callback, honoring the enabled gate: the wait starts
    /// only while enabled and is abandoned the moment delivery is disabled.
    async fn next_enabled(&self) -> Option<QueuedCallback> {
        // Receiver created from the sender; wait_for cannot fail.
        let mut enabled = self.enabled.subscribe();
        loop {
            let _ = enabled.wait_for(|e| *e).await;
            if let Some(item) = self.unstash_item() {
                return Some(item);
            }
            let mut items = self.items.lock().await;
            tokio::select! {
                biased;
                _ = enabled.wait_for(|e| !*e) => continue,
                item = items.recv() => return item,
            }
        }
    }
}

/// Pulls callbacks out of the session event stream and feeds the handler.
pub struct CallbackDispatcher {
    inner: Arc<Inner>,
    mode: CallbackMode,
}

impl CallbackDispatcher {
    /// Start dispatching over the given session event stream.
    pub fn new(
        mut events: mpsc::UnboundedReceiver<SessionEvent>,
        handler: Arc<dyn CallbackHandler>,
        responder: Arc<dyn CallbackResponder>,
        mode: CallbackMode,
    ) -> Self {
        let (items_tx, items_rx) = mpsc::unbounded_channel();
        let (enabled, _) = watch::channel(true);
        let inner = Arc::new(Inner {
            handler: handler.clone(),
            responder,
            items: Mutex::new(items_rx),
            stash: std::sync::Mutex::new(VecDeque::new()),
            dispatching: Mutex::new(()),
            enabled,
        });

        // Split lifecycle notifications from callbacks; the latter queue up
        // for dispatch while the former fire right away.
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    SessionEvent::Callback {
                        sequence_number,
                        payload,
                    } => {
                        if items_tx
                            .send(QueuedCallback {
                                sequence_number,
                                payload,
                            })
                            .is_err()
                        {
                            return;
                        }
                    }
                    SessionEvent::ConnectionLost { reason } => {
                        handler.connection_lost(&reason);
                    }
                    SessionEvent::SessionLost { reason } => {
                        handler.session_lost(&reason);
                    }
                }
            }
        });

        if mode == CallbackMode::Dedicated {
            let worker = inner.clone();
            tokio::spawn(async move {
                while let Some(item) = worker.next_enabled().await {
                    worker.dispatch_one(item).await;
                }
            });
        }

        Self { inner, mode }
    }

    /// The delivery model this dispatcher runs.
    pub fn mode(&self) -> CallbackMode {
        self.mode
    }

    /// Dispatch one pending callback, waiting up to `wait` for one to
    /// arrive. Returns whether a callback was dispatched.
    ///
    /// Only meaningful in [`CallbackMode::Evoked`].
    pub async fn evoke_callback(&self, wait: Duration) -> bool {
        let item = tokio::time::timeout(wait, self.inner.next_enabled()).await;
        match item {
            Ok(Some(item)) => self.inner.dispatch_one(item).await,
            _ => false,
        }
    }

    /// Dispatch pending callbacks for at least `min_time`, at most
    /// `max_time`, returning early once the queue runs dry after the
    /// minimum. Returns whether anything was dispatched.
    pub async fn evoke_multiple_callbacks(&self, min_time: Duration, max_time: Duration) -> bool {
        let start = tokio::time::Instant::now();
        let min_deadline = start + min_time;
        let max_deadline = start + max_time;
        let mut dispatched = false;
        loop {
            let now = tokio::time::Instant::now();
            if now >= max_deadline {
                return dispatched;
            }
            let wait = if now < min_deadline {
                max_deadline.min(min_deadline) - now
            } else {
                Duration::ZERO
            };
            match tokio::time::timeout(wait, self.inner.next_enabled()).await {
                Ok(Some(item)) => {
                    if self.inner.dispatch_one(item).await {
                        dispatched = true;
                    }
                }
                _ => return dispatched,
            }
        }
    }

    /// Resume callback delivery.
    pub fn enable_callbacks(&self) {
        self.inner.enabled.send_replace(true);
    }

    /// Pause callback delivery.
    ///
    /// Waits for an in-progress callback to finish, unless called from
    /// inside the handler itself.
    pub async fn disable_callbacks(&self) {
        self.inner.enabled.send_replace(false);
        if !in_callback() {
            let _guard = self.inner.dispatching.lock().await;
        }
    }
}
