//! Resilient subscription to the sampler.
//!
//! The consumer keeps one subscription open and hands every notification
//! to the [`TraceProcessor`]. When the sampler goes away it waits a fixed
//! delay and subscribes again. Only a terminal error under
//! [`ErrorPolicy::FailStop`] ends the loop with an error.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use tracescale_core::ErrorPolicy;

use crate::error::ConsumerError;
use crate::processor::TraceProcessor;
use crate::source::SampleSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// How a single subscription ended.
enum SessionEnd {
    Shutdown,
    Failed(ConsumerError),
}

/// Keeps a sampler subscription alive and forwards it to a [`TraceProcessor`].
pub struct TraceConsumer {
    source: Arc<dyn SampleSource>,
    processor: Arc<TraceProcessor>,
    reconnect_delay: Duration,
    error_policy: ErrorPolicy,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl TraceConsumer {
    pub fn new(
        source: Arc<dyn SampleSource>,
        processor: Arc<TraceProcessor>,
        reconnect_delay: Duration,
        error_policy: ErrorPolicy,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        Self {
            source,
            processor,
            reconnect_delay,
            error_policy,
            state_tx,
            state_rx,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Watch connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn processor(&self) -> &Arc<TraceProcessor> {
        &self.processor
    }

    /// Consume until shutdown, reconnecting on recoverable errors.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), ConsumerError> {
        info!(
            reconnect_delay = ?self.reconnect_delay,
            error_policy = %self.error_policy,
            "trace consumer started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let err = match self.consume_once(&mut shutdown).await {
                SessionEnd::Shutdown => break,
                SessionEnd::Failed(e) => e,
            };
            self.set_state(ConnectionState::Disconnected);

            let retry = err.is_transient() || self.error_policy == ErrorPolicy::RetryAll;
            if !retry {
                error!(error = %err, "sampler stream failed, stopping consumer");
                return Err(err);
            }
            warn!(error = %err, retry_in = ?self.reconnect_delay, "sampler stream lost, reconnecting");

            tokio::select! {
                _ = tokio::time::sleep(self.reconnect_delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        self.set_state(ConnectionState::Disconnected);
        info!("trace consumer stopped");
        Ok(())
    }

    async fn consume_once(&self, shutdown: &mut watch::Receiver<bool>) -> SessionEnd {
        self.set_state(ConnectionState::Connecting);
        let mut stream = tokio::select! {
            subscribed = self.source.subscribe() => match subscribed {
                Ok(stream) => stream,
                Err(e) => return SessionEnd::Failed(e),
            },
            _ = shutdown.changed() => return SessionEnd::Shutdown,
        };

        let mut first = true;
        loop {
            let item = tokio::select! {
                item = stream.next() => item,
                _ = shutdown.changed() => return SessionEnd::Shutdown,
            };

            let notification = match item {
                Some(Ok(notification)) => notification,
                Some(Err(e)) => return SessionEnd::Failed(e),
                None => {
                    return SessionEnd::Failed(ConsumerError::UpstreamUnavailable(
                        "sampler closed the stream".into(),
                    ));
                }
            };

            if first {
                first = false;
                self.set_state(ConnectionState::Connected);
                info!("connected to sampler");
                self.processor.start_worker();
            }

            match self.processor.process(notification).await {
                Ok(queued) => debug!(queued, "notification processed"),
                Err(e) => warn!(error = %e, "skipping notification"),
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }
}
