//! Whole-document sync between execution contexts
//!
//! Every committed mutation is handed to a [`SyncOutbox`] without blocking.
//! A [`SyncPublisher`] task drains it, keeps only the newest document, and
//! pushes it through a [`SyncTransport`] with bounded backoff. Receivers
//! replace their copy wholesale when the payload's revision is newer.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use timelock_api::{DegradedReason, SyncPayload};
use timelock_util::{RetryExhausted, RetryPolicy};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::{CoreEvent, EventDispatcher};

/// Sync errors
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error("Sync channel closed")]
    ChannelClosed,

    #[error("Transport error: {0}")]
    Transport(String),

    /// The receiver refused the payload because it already holds a newer
    /// revision. Retrying cannot help.
    #[error("Receiver is at revision {current}, offered {offered}")]
    Superseded { offered: u64, current: u64 },
}

/// Carries payloads to the other context
#[async_trait]
pub trait SyncTransport: Send + Sync {
    async fn publish(&self, payload: &SyncPayload) -> Result<(), SyncError>;
}

/// True if `payload` should replace a local document at `local_revision`
pub fn is_newer(local_revision: u64, payload: &SyncPayload) -> bool {
    payload.revision > local_revision
}

/// Named in-process broadcast channel
#[derive(Clone)]
pub struct LocalSyncChannel {
    name: String,
    tx: broadcast::Sender<SyncPayload>,
}

impl LocalSyncChannel {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            name: name.into(),
            tx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncPayload> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl SyncTransport for LocalSyncChannel {
    async fn publish(&self, payload: &SyncPayload) -> Result<(), SyncError> {
        match self.tx.send(payload.clone()) {
            Ok(receivers) => {
                debug!(channel = %self.name, revision = payload.revision, receivers, "Payload broadcast");
            }
            Err(_) => {
                debug!(channel = %self.name, revision = payload.revision, "No receivers for payload");
            }
        }
        Ok(())
    }
}

/// Last sync failure, shared between the engine and its publisher
#[derive(Debug, Default)]
pub struct SyncHealth {
    failure: Mutex<Option<String>>,
}

impl SyncHealth {
    fn slot(&self) -> MutexGuard<'_, Option<String>> {
        self.failure.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a failure. Returns true if this starts a degraded period.
    pub fn mark_failed(&self, detail: impl Into<String>) -> bool {
        let mut slot = self.slot();
        let newly = slot.is_none();
        *slot = Some(detail.into());
        newly
    }

    /// Record a success. Returns true if this ends a degraded period.
    pub fn mark_ok(&self) -> bool {
        self.slot().take().is_some()
    }

    pub fn failure(&self) -> Option<String> {
        self.slot().clone()
    }
}

/// Engine-side, non-blocking entry point of the publisher
#[derive(Clone)]
pub struct SyncOutbox {
    tx: mpsc::UnboundedSender<SyncPayload>,
    health: Arc<SyncHealth>,
}

impl SyncOutbox {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SyncPayload>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                health: Arc::new(SyncHealth::default()),
            },
            rx,
        )
    }

    pub fn health(&self) -> Arc<SyncHealth> {
        self.health.clone()
    }

    pub fn send(&self, payload: SyncPayload) -> Result<(), SyncError> {
        if self.tx.send(payload).is_err() {
            self.health.mark_failed("publisher stopped");
            return Err(SyncError::ChannelClosed);
        }
        Ok(())
    }
}

/// Background task draining a [`SyncOutbox`]
pub struct SyncPublisher {
    transport: Arc<dyn SyncTransport>,
    retry: RetryPolicy,
    health: Arc<SyncHealth>,
    dispatcher: Option<EventDispatcher>,
}

impl SyncPublisher {
    pub fn new(transport: Arc<dyn SyncTransport>, retry: RetryPolicy, outbox: &SyncOutbox) -> Self {
        Self {
            transport,
            retry,
            health: outbox.health(),
            dispatcher: None,
        }
    }

    /// Report degradation and recovery to these listeners
    pub fn with_dispatcher(mut self, dispatcher: EventDispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Run until every outbox handle is dropped
    pub async fn run(self, mut rx: mpsc::UnboundedReceiver<SyncPayload>) {
        while let Some(mut payload) = rx.recv().await {
            // Only the newest document matters
            while let Ok(queued) = rx.try_recv() {
                if queued.revision >= payload.revision {
                    payload = queued;
                }
            }

            match publish_with_retry(self.transport.as_ref(), &payload, &self.retry).await {
                Ok(()) => {
                    if self.health.mark_ok() {
                        info!(revision = payload.revision, "Sync recovered");
                        self.notify(CoreEvent::Recovered);
                    }
                }
                Err(e) => {
                    warn!(revision = payload.revision, error = %e, "Sync publish failed");
                    if self.health.mark_failed(e.to_string()) {
                        self.notify(CoreEvent::Degraded(DegradedReason::SyncUnavailable {
                            detail: e.to_string(),
                        }));
                    }
                }
            }
        }
        debug!("Sync publisher stopped");
    }

    fn notify(&self, event: CoreEvent) {
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.dispatch(&event);
        }
    }
}

/// Publish with the policy's backoff, sleeping on the async timer
pub async fn publish_with_retry(
    transport: &dyn SyncTransport,
    payload: &SyncPayload,
    retry: &RetryPolicy,
) -> Result<(), RetryExhausted<SyncError>> {
    let mut backoff = retry.backoff();
    let mut attempt = 1;

    loop {
        match transport.publish(payload).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt >= retry.max_attempts || matches!(e, SyncError::Superseded { .. }) => {
                return Err(RetryExhausted {
                    attempts: attempt,
                    last_error: e,
                });
            }
            Err(e) => {
                let delay = backoff.next_delay();
                debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "Retrying publish");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use timelock_api::{ContextRole, SessionDocument};

    fn payload(revision: u64) -> SyncPayload {
        let mut doc = SessionDocument::new();
        doc.revision = revision;
        SyncPayload::new(doc, ContextRole::Foreground, timelock_util::now())
    }

    /// Fails the first `failures` publishes
    struct FlakyTransport {
        failures: u32,
        calls: AtomicU32,
        delivered: Mutex<Vec<u64>>,
    }

    impl FlakyTransport {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
                delivered: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SyncTransport for FlakyTransport {
        async fn publish(&self, payload: &SyncPayload) -> Result<(), SyncError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(SyncError::Transport("unreachable".into()));
            }
            self.delivered.lock().unwrap().push(payload.revision);
            Ok(())
        }
    }

    fn fast_retry(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(1), Duration::from_millis(2))
    }

    #[test]
    fn revision_rule() {
        assert!(is_newer(4, &payload(5)));
        assert!(!is_newer(5, &payload(5)));
        assert!(!is_newer(5, &payload(4)));
    }

    #[tokio::test]
    async fn local_channel_delivers_to_subscribers() {
        let channel = LocalSyncChannel::new("session", 8);
        let mut rx = channel.subscribe();

        channel.publish(&payload(3)).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().revision, 3);
        assert_eq!(channel.name(), "session");
    }

    #[tokio::test]
    async fn local_channel_without_receivers_is_ok() {
        let channel = LocalSyncChannel::new("session", 8);
        assert!(channel.publish(&payload(1)).await.is_ok());
    }

    #[tokio::test]
    async fn publish_retries_transient_failures() {
        let transport = FlakyTransport::new(2);
        publish_with_retry(&transport, &payload(1), &fast_retry(3))
            .await
            .unwrap();
        assert_eq!(*transport.delivered.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn publish_gives_up_after_attempts() {
        let transport = FlakyTransport::new(10);
        let err = publish_with_retry(&transport, &payload(1), &fast_retry(2))
            .await
            .unwrap_err();
        assert_eq!(err.attempts, 2);
    }

    #[tokio::test]
    async fn publisher_coalesces_and_reports_degradation() {
        let transport = Arc::new(FlakyTransport::new(1));
        let (outbox, rx) = SyncOutbox::channel();
        let dispatcher = EventDispatcher::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        dispatcher.register(move |e| {
            sink.lock().unwrap().push(e.clone());
            Ok(())
        });

        let health = outbox.health();
        let publisher = SyncPublisher::new(transport.clone(), RetryPolicy::no_retry(), &outbox)
            .with_dispatcher(dispatcher);

        outbox.send(payload(1)).unwrap();
        outbox.send(payload(2)).unwrap();
        outbox.send(payload(3)).unwrap();
        drop(outbox);

        publisher.run(rx).await;

        // All three were queued before the task ran, so they collapse into one
        // failed attempt at revision 3
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert!(health.failure().is_some());
        assert!(matches!(
            events.lock().unwrap().as_slice(),
            [CoreEvent::Degraded(DegradedReason::SyncUnavailable { .. })]
        ));
    }

    #[tokio::test]
    async fn publisher_recovers() {
        let transport = Arc::new(FlakyTransport::new(1));
        let (outbox, rx) = SyncOutbox::channel();
        let health = outbox.health();
        let publisher = SyncPublisher::new(transport.clone(), RetryPolicy::no_retry(), &outbox);
        let task = tokio::spawn(publisher.run(rx));

        outbox.send(payload(1)).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(health.failure().is_some());

        outbox.send(payload(2)).unwrap();
        drop(outbox);
        task.await.unwrap();

        assert!(health.failure().is_none());
        assert_eq!(*transport.delivered.lock().unwrap(), vec![2]);
    }

    #[test]
    fn outbox_reports_stopped_publisher() {
        let (outbox, rx) = SyncOutbox::channel();
        drop(rx);

        assert!(matches!(outbox.send(payload(1)), Err(SyncError::ChannelClosed)));
        assert_eq!(outbox.health().failure().as_deref(), Some("publisher stopped"));
    }

    struct AheadTransport {
        calls: AtomicU32,
    }

    #[async_trait]
    impl SyncTransport for AheadTransport {
        async fn publish(&self, payload: &SyncPayload) -> Result<(), SyncError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(SyncError::Superseded {
                offered: payload.revision,
                current: payload.revision + 3,
            })
        }
    }

    #[tokio::test]
    async fn superseded_publish_is_not_retried() {
        let transport = AheadTransport {
            calls: AtomicU32::new(0),
        };

        let err = publish_with_retry(&transport, &payload(2), &fast_retry(3))
            .await
            .unwrap_err();

        assert_eq!(err.attempts, 1);
        assert!(matches!(err.last_error, SyncError::Superseded { offered: 2, current: 5 }));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }
}
