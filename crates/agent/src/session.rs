//! Stream sessions: one backend generation delivered as ordered text
//! fragments with explicit completion, error, and cancellation.
//!
//! A session owns a bounded channel fed by a single producer task. The
//! consumer pulls with [`StreamSession::next_fragment`]; once a terminal
//! value (`End`, `Error`, `Cancelled`) has been observed it is returned again
//! on every later call and no fragment follows it.
//!
//! ```text
//! Pending ──start──▶ Streaming ──▶ Completed | Errored | Cancelled
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tauti_core::error::ProviderError;
use tauti_core::provider::{Provider, ProviderRequest};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Interval used by [`StreamSession::poll_next_fragment`] for consumers that
/// cannot await push delivery.
pub const POLL_INTERVAL: Duration = Duration::from_millis(40);

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Pending,
    Streaming,
    Completed,
    Errored,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Errored | Self::Cancelled)
    }
}

/// What the consumer gets from one pull.
#[derive(Debug, Clone)]
pub enum Next {
    Fragment(String),
    End,
    Error(ProviderError),
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("No active session with id {0}")]
    UnknownSession(Uuid),
}

/// Producer → consumer signal.
enum Signal {
    Fragment(String),
    End,
    Error(ProviderError),
}

/// Cancels a session (or a whole turn) from anywhere.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

pub struct StreamSession {
    id: Uuid,
    state: SessionState,
    terminal: Option<Next>,
    rx: mpsc::Receiver<Signal>,
    pending: Option<(Arc<dyn Provider>, ProviderRequest, mpsc::Sender<Signal>)>,
    token: CancellationToken,
    producer: Option<JoinHandle<()>>,
}

impl StreamSession {
    /// Create a session without starting generation. The session's token is
    /// a child of `parent`: cancelling the parent cancels the session.
    pub fn new(
        provider: Arc<dyn Provider>,
        request: ProviderRequest,
        parent: &CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        Self {
            id: Uuid::new_v4(),
            state: SessionState::Pending,
            terminal: None,
            rx,
            pending: Some((provider, request, tx)),
            token: parent.child_token(),
            producer: None,
        }
    }

    /// Create and start a session.
    ///
    /// With `request.stream` set, the producer streams from the backend and
    /// falls back to one blocking call if the stream cannot be established.
    /// Without it, the blocking call is used directly; its text arrives as a
    /// single fragment either way.
    pub fn open(
        provider: Arc<dyn Provider>,
        request: ProviderRequest,
        parent: &CancellationToken,
    ) -> Self {
        let mut session = Self::new(provider, request, parent);
        session.start();
        session
    }

    /// Spawn the producer. No-op unless the session is `Pending`.
    pub fn start(&mut self) {
        let Some((provider, request, tx)) = self.pending.take() else {
            return;
        };

        debug!(
            session_id = %self.id,
            provider = provider.name(),
            model = %request.model,
            stream = request.stream,
            "Opening stream session"
        );

        let token = self.token.clone();
        let id = self.id;
        self.producer = Some(tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!(session_id = %id, "Producer stopped by cancellation");
                }
                _ = produce(id, provider, request, tx) => {}
            }
        }));
        self.state = SessionState::Streaming;
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        if !self.state.is_terminal() && self.token.is_cancelled() {
            return SessionState::Cancelled;
        }
        self.state
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle::new(self.token.clone())
    }

    /// Cancel generation. No fragment is returned after this call.
    pub fn cancel(&mut self) {
        self.token.cancel();
        if let Some(producer) = self.producer.take() {
            producer.abort();
        }
        if !self.state.is_terminal() {
            self.finish(Next::Cancelled);
        }
    }

    /// Wait for the next fragment or the terminal value. Starts a `Pending`
    /// session.
    pub async fn next_fragment(&mut self) -> Next {
        if let Some(terminal) = &self.terminal {
            return terminal.clone();
        }
        self.start();

        let received = tokio::select! {
            biased;
            _ = self.token.cancelled() => None,
            signal = self.rx.recv() => Some(signal),
        };

        match received {
            None => {
                self.cancel();
                Next::Cancelled
            }
            Some(Some(signal)) => self.accept(signal),
            Some(None) => self.disconnected(),
        }
    }

    /// Non-blocking pull: `None` while the session is streaming and nothing
    /// is buffered.
    pub fn try_next_fragment(&mut self) -> Option<Next> {
        if let Some(terminal) = &self.terminal {
            return Some(terminal.clone());
        }
        if self.token.is_cancelled() {
            self.cancel();
            return Some(Next::Cancelled);
        }
        self.start();

        match self.rx.try_recv() {
            Ok(signal) => Some(self.accept(signal)),
            Err(mpsc::error::TryRecvError::Empty) => None,
            Err(mpsc::error::TryRecvError::Disconnected) => Some(self.disconnected()),
        }
    }

    /// Pull by polling every [`POLL_INTERVAL`].
    pub async fn poll_next_fragment(&mut self) -> Next {
        loop {
            if let Some(next) = self.try_next_fragment() {
                return next;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    fn accept(&mut self, signal: Signal) -> Next {
        match signal {
            Signal::Fragment(text) => Next::Fragment(text),
            Signal::End => {
                debug!(session_id = %self.id, "Stream session completed");
                self.finish(Next::End)
            }
            Signal::Error(e) => {
                warn!(session_id = %self.id, error = %e, "Stream session errored");
                self.finish(Next::Error(e))
            }
        }
    }

    /// The producer went away without a terminal signal.
    fn disconnected(&mut self) -> Next {
        if self.token.is_cancelled() {
            self.cancel();
            return Next::Cancelled;
        }
        self.finish(Next::Error(ProviderError::StreamInterrupted(
            "producer stopped before completion".into(),
        )))
    }

    fn finish(&mut self, terminal: Next) -> Next {
        self.state = match terminal {
            Next::End => SessionState::Completed,
            Next::Error(_) => SessionState::Errored,
            Next::Cancelled => SessionState::Cancelled,
            Next::Fragment(_) => self.state,
        };
        self.terminal = Some(terminal.clone());
        self.rx.close();
        terminal
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.token.cancel();
        if let Some(producer) = self.producer.take() {
            producer.abort();
        }
    }
}

async fn produce(
    id: Uuid,
    provider: Arc<dyn Provider>,
    request: ProviderRequest,
    tx: mpsc::Sender<Signal>,
) {
    if request.stream {
        match provider.stream(request.clone()).await {
            Ok(mut chunks) => {
                while let Some(item) = chunks.recv().await {
                    match item {
                        Ok(chunk) => {
                            if let Some(text) = chunk.content.filter(|t| !t.is_empty())
                                && tx.send(Signal::Fragment(text)).await.is_err()
                            {
                                return; // consumer gone
                            }
                            if chunk.done {
                                let _ = tx.send(Signal::End).await;
                                return;
                            }
                        }
                        Err(e) => {
                            let _ = tx.send(Signal::Error(e)).await;
                            return;
                        }
                    }
                }
                let _ = tx
                    .send(Signal::Error(ProviderError::StreamInterrupted(
                        "backend stream closed without a completion marker".into(),
                    )))
                    .await;
                return;
            }
            Err(e) => {
                warn!(
                    session_id = %id,
                    provider = provider.name(),
                    error = %e,
                    "Streaming unavailable, falling back to a blocking call"
                );
            }
        }
    }

    match provider.complete(request).await {
        Ok(response) => {
            if !response.content.is_empty()
                && tx.send(Signal::Fragment(response.content)).await.is_err()
            {
                return;
            }
            let _ = tx.send(Signal::End).await;
        }
        Err(e) => {
            let _ = tx.send(Signal::Error(e)).await;
        }
    }
}

/// Addressable cancel handles, keyed by session (or turn) id.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    handles: Arc<Mutex<HashMap<Uuid, CancelHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: Uuid, handle: CancelHandle) {
        self.lock().insert(id, handle);
    }

    pub fn register(&self, session: &StreamSession) {
        self.insert(session.id(), session.cancel_handle());
    }

    pub fn remove(&self, id: &Uuid) {
        self.lock().remove(id);
    }

    /// Cancel and forget the session with `id`.
    pub fn cancel(&self, id: &Uuid) -> Result<(), SessionError> {
        let handle = self.lock().remove(id).ok_or(SessionError::UnknownSession(*id))?;
        handle.cancel();
        Ok(())
    }

    pub fn cancel_all(&self) {
        for (_, handle) in self.lock().drain() {
            handle.cancel();
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, CancelHandle>> {
        self.handles.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
