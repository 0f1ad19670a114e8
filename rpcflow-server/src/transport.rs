//! Transport boundary
//!
//! rpcflow does not own a socket. A host transport hands the endpoint an
//! [`InboundRequest`] (path, raw body and the ambient [`CallerIdentity`]) and
//! gets back bytes to send, or writes them itself through a [`ResponseSink`].
//! Cancellation travels the other way through an [`AbortSignal`].

use async_trait::async_trait;
use rpcflow_core::Result;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// Identity of the caller as established by the host transport
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallerIdentity {
    /// Whether the transport authenticated the caller
    pub authenticated: bool,
    /// Caller name, when known
    pub name: Option<String>,
    /// Roles granted to the caller
    pub roles: Vec<String>,
    /// Free-form claims
    pub claims: HashMap<String, String>,
}

impl CallerIdentity {
    /// An unauthenticated caller with no roles
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// An authenticated caller
    pub fn authenticated(name: impl Into<String>) -> Self {
        Self {
            authenticated: true,
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Adds a role
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    /// Adds a claim
    pub fn with_claim(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.claims.insert(key.into(), value.into());
        self
    }

    /// True when the caller holds `role`
    pub fn is_in_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// A request as delivered by the host transport
#[derive(Debug, Clone)]
pub struct InboundRequest {
    /// Request path, matched against registered routes
    pub path: String,
    /// Raw request body
    pub body: Vec<u8>,
    /// Ambient identity used by authorization
    pub caller: Arc<CallerIdentity>,
}

impl InboundRequest {
    /// Anonymous request
    pub fn new(path: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            body: body.into(),
            caller: Arc::new(CallerIdentity::anonymous()),
        }
    }

    /// Attaches a caller identity
    pub fn with_caller(mut self, caller: CallerIdentity) -> Self {
        self.caller = Arc::new(caller);
        self
    }
}

/// Bytes to send back to the caller
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundResponse {
    /// Status code for transports that have one
    pub status: u16,
    /// Always `application/json`
    pub content_type: &'static str,
    /// Serialized response or batch of responses
    pub body: Vec<u8>,
    /// Hint that the transport may compress the body
    pub compress: bool,
}

impl OutboundResponse {
    /// Body as text
    pub fn body_str(&self) -> &str {
        std::str::from_utf8(&self.body).unwrap_or_default()
    }
}

/// Writable response channel exposed by the host transport
///
/// Handlers and filters may stream output here directly. Once anything was
/// written, `has_started` turns true and the pipeline will not write again.
#[async_trait]
pub trait ResponseSink: Send + Sync {
    /// Writes a complete response
    async fn write(&self, response: OutboundResponse) -> Result<()>;

    /// True once a response has been started
    fn has_started(&self) -> bool;
}

/// Sink that keeps the response in memory
#[derive(Debug, Default)]
pub struct BufferedSink {
    started: AtomicBool,
    buffer: Mutex<Option<OutboundResponse>>,
}

impl BufferedSink {
    /// An empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns the buffered response
    pub fn take(&self) -> Option<OutboundResponse> {
        self.buffer.lock().ok()?.take()
    }
}

#[async_trait]
impl ResponseSink for BufferedSink {
    async fn write(&self, response: OutboundResponse) -> Result<()> {
        self.started.store(true, Ordering::Release);
        if let Ok(mut slot) = self.buffer.lock() {
            *slot = Some(response);
        }
        Ok(())
    }

    fn has_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }
}

/// Trigger side of an [`AbortSignal`]
#[derive(Debug)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    /// Aborts every call observing the paired signal
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }
}

/// Cancellation signal from the host transport
///
/// Cloning is cheap; every clone observes the same trigger.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

impl AbortSignal {
    /// A connected handle and signal
    pub fn new() -> (AbortHandle, AbortSignal) {
        let (tx, rx) = watch::channel(false);
        (AbortHandle { tx }, AbortSignal { rx })
    }

    /// A signal that never fires
    pub fn never() -> Self {
        let (_, signal) = Self::new();
        signal
    }

    /// True once the handle fired
    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when the handle fires; pends forever if the handle is gone
    pub async fn aborted(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|aborted| *aborted).await.is_err() {
            futures::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_caller_identity_roles() {
        let caller = CallerIdentity::authenticated("alice")
            .with_role("admin")
            .with_claim("tenant", "acme");

        assert!(caller.authenticated);
        assert!(caller.is_in_role("admin"));
        assert!(!caller.is_in_role("ops"));
        assert_eq!(caller.claims.get("tenant").map(String::as_str), Some("acme"));
        assert!(!CallerIdentity::anonymous().authenticated);
    }

    #[tokio::test]
    async fn test_buffered_sink_marks_started() {
        let sink = BufferedSink::new();
        assert!(!sink.has_started());

        sink.write(OutboundResponse {
            status: 200,
            content_type: "application/json",
            body: b"{}".to_vec(),
            compress: false,
        })
        .await
        .unwrap();

        assert!(sink.has_started());
        assert_eq!(sink.take().unwrap().body_str(), "{}");
        assert!(sink.take().is_none());
    }

    #[tokio::test]
    async fn test_abort_signal_fires() {
        let (handle, signal) = AbortSignal::new();
        assert!(!signal.is_aborted());

        let waiter = tokio::spawn({
            let signal = signal.clone();
            async move { signal.aborted().await }
        });
        handle.abort();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(signal.is_aborted());
    }

    #[tokio::test]
    async fn test_never_signal_stays_pending() {
        let signal = AbortSignal::never();
        let waited = tokio::time::timeout(Duration::from_millis(20), signal.aborted()).await;
        assert!(waited.is_err());
        assert!(!signal.is_aborted());
    }
}
