//! Multicast of accepted batches.
//!
//! Each subscriber owns a bounded queue. Publishing never waits: a full
//! queue loses that batch for that subscriber only, and a closed queue is
//! removed. Dropping a [`Subscription`] detaches it from the hub.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures_core::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use tracescale_proto::trace::TracesData;

pub type Batch = Arc<TracesData>;

struct HubInner {
    subscribers: Mutex<HashMap<u64, mpsc::Sender<Batch>>>,
    next_id: AtomicU64,
    buffer: usize,
}

#[derive(Clone)]
pub struct TraceHub {
    inner: Arc<HubInner>,
}

impl TraceHub {
    pub fn new(buffer: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                buffer: buffer.max(1),
            }),
        }
    }

    /// Attach a subscriber. It observes batches published from now on.
    pub fn subscribe(&self) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.buffer);
        let count = {
            let mut subscribers = self.inner.subscribers.lock();
            subscribers.insert(id, tx);
            subscribers.len()
        };
        info!(subscriber = id, subscribers = count, "subscriber attached");
        Subscription {
            id,
            rx,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Offer a batch to every subscriber. Returns how many queued it.
    pub fn publish(&self, batch: TracesData) -> usize {
        let batch = Arc::new(batch);
        let mut subscribers = self.inner.subscribers.lock();
        let mut delivered = 0;
        let mut closed = Vec::new();

        for (id, tx) in subscribers.iter() {
            match tx.try_send(Arc::clone(&batch)) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(subscriber = id, "subscriber queue full, dropping batch");
                }
                Err(TrySendError::Closed(_)) => closed.push(*id),
            }
        }
        for id in closed {
            subscribers.remove(&id);
            debug!(subscriber = id, "removed closed subscriber");
        }
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }
}

/// One subscriber's view of the hub.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<Batch>,
    hub: Weak<HubInner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn recv(&mut self) -> Option<Batch> {
        self.rx.recv().await
    }
}

impl Stream for Subscription {
    type Item = Batch;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.subscribers.lock().remove(&self.id);
        }
        info!(subscriber = self.id, "subscriber detached");
    }
}
