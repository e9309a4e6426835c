//! Keyed subscriptions to adapter events
//!
//! A subscription owns a background task that forwards matching events to a
//! handler. Dropping the subscription unregisters it, so every disposal path
//! releases the registration.

use std::future::Future;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::adapter::{AdapterEvent, AdapterEventKind, BluetoothAdapter};

// ----------------------------------------------------------------------------
// Event Subscription
// ----------------------------------------------------------------------------

/// Registration of a handler for a set of adapter event kinds
#[derive(Debug)]
pub struct EventSubscription {
    kinds: Vec<AdapterEventKind>,
    task: JoinHandle<()>,
}

impl EventSubscription {
    /// Register `handler` for `kinds` on the adapter's event source
    ///
    /// Must be called from within a tokio runtime.
    pub fn register<A, F, Fut>(adapter: &A, kinds: &[AdapterEventKind], handler: F) -> Self
    where
        A: BluetoothAdapter + ?Sized,
        F: FnMut(AdapterEvent) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::from_receiver(adapter.subscribe(), kinds, handler)
    }

    /// Register against an already obtained event receiver
    pub fn from_receiver<F, Fut>(
        mut events: broadcast::Receiver<AdapterEvent>,
        kinds: &[AdapterEventKind],
        mut handler: F,
    ) -> Self
    where
        F: FnMut(AdapterEvent) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let kinds = kinds.to_vec();
        let filter = kinds.clone();

        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) if filter.contains(&event.kind()) => handler(event).await,
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Adapter event subscriber lagged, {} events skipped", skipped);
                    }
                    Err(RecvError::Closed) => {
                        debug!("Adapter event source closed");
                        break;
                    }
                }
            }
        });

        Self { kinds, task }
    }

    pub fn kinds(&self) -> &[AdapterEventKind] {
        &self.kinds
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop forwarding events
    pub fn unregister(self) {
        drop(self);
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.task.abort();
        debug!("Unregistered adapter event handler for {:?}", self.kinds);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bluechat_core::Device;
    use tokio::sync::mpsc;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_only_registered_kinds_reach_handler() {
        let (source, _) = broadcast::channel(16);
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();

        let subscription = EventSubscription::from_receiver(
            source.subscribe(),
            &[AdapterEventKind::LinkConnected],
            move |event| {
                let seen_tx = seen_tx.clone();
                async move {
                    let _ = seen_tx.send(event);
                }
            },
        );
        assert_eq!(subscription.kinds(), &[AdapterEventKind::LinkConnected]);
        assert!(subscription.is_active());

        let device = Device::named("Pixel", "AA");
        source.send(AdapterEvent::DeviceFound(device.clone())).unwrap();
        source.send(AdapterEvent::LinkConnected(device.clone())).unwrap();

        let event = timeout(Duration::from_secs(1), seen_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, AdapterEvent::LinkConnected(device));
        assert!(seen_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unregister_stops_delivery() {
        let (source, _) = broadcast::channel(16);
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<AdapterEvent>();

        let subscription = EventSubscription::from_receiver(
            source.subscribe(),
            &[AdapterEventKind::DeviceFound],
            move |event| {
                let seen_tx = seen_tx.clone();
                async move {
                    let _ = seen_tx.send(event);
                }
            },
        );
        assert!(subscription.is_active());
        subscription.unregister();

        // The handler (and its sender) is dropped with the aborted task
        let closed = timeout(Duration::from_secs(1), seen_rx.recv()).await.unwrap();
        assert!(closed.is_none());
        assert_eq!(source.receiver_count(), 0);
    }
}
