// In-process event bus
//
// Single MPSC channel drained by a dedicated worker task, so subscriber
// delivery never re-enters the publishing component's state. Delivery is
// at-most-once; durable state is always recoverable from persistence.

use std::sync::Arc;

use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::debug;

use deepr_contracts::{events::topic_matches, DeeprEvent};

struct Subscriber {
    pattern: String,
    tx: mpsc::UnboundedSender<DeeprEvent>,
}

struct BusInner {
    subscribers: RwLock<Vec<Subscriber>>,
}

/// Process-scoped pub/sub handle
///
/// Construct with `init`, tear down with `shutdown`; cloning shares the
/// same channel and subscriber set.
#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::UnboundedSender<DeeprEvent>,
    inner: Arc<BusInner>,
    shutdown_tx: watch::Sender<bool>,
    drainer: Arc<JoinHandle<()>>,
}

impl EventBus {
    /// Start the bus and its drainer task
    pub fn init() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<DeeprEvent>();
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let inner = Arc::new(BusInner {
            subscribers: RwLock::new(Vec::new()),
        });

        let drain_inner = inner.clone();
        let drainer = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        debug!("Event bus drainer shutting down");
                        break;
                    }
                    event = rx.recv() => {
                        let Some(event) = event else { break };
                        let topic = event.topic();
                        let mut subscribers = drain_inner.subscribers.write().await;
                        subscribers.retain(|sub| {
                            if !topic_matches(&sub.pattern, &topic) {
                                return true;
                            }
                            // Drop subscribers whose receiver is gone
                            sub.tx.send(event.clone()).is_ok()
                        });
                    }
                }
            }
        });

        Self {
            tx,
            inner,
            shutdown_tx,
            drainer: Arc::new(drainer),
        }
    }

    /// Publish an event; never blocks the caller
    ///
    /// Events published after shutdown are silently dropped.
    pub fn publish(&self, event: DeeprEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to every event whose topic starts with `pattern`
    pub async fn subscribe(&self, pattern: impl Into<String>) -> mpsc::UnboundedReceiver<DeeprEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.subscribers.write().await.push(Subscriber {
            pattern: pattern.into(),
            tx,
        });
        rx
    }

    /// Stop the drainer; queued events not yet drained are lost
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        self.drainer.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn subscriber_receives_matching_events() {
        let bus = EventBus::init();
        let job_id = Uuid::now_v7();
        let mut rx = bus.subscribe(format!("jobs.{}", job_id)).await;

        bus.publish(DeeprEvent::JobProgress {
            job_id,
            progress_fraction: 0.5,
        });
        bus.publish(DeeprEvent::JobProgress {
            job_id: Uuid::now_v7(),
            progress_fraction: 0.9,
        });

        let event = rx.recv().await.unwrap();
        match event {
            DeeprEvent::JobProgress {
                job_id: got,
                progress_fraction,
            } => {
                assert_eq!(got, job_id);
                assert!((progress_fraction - 0.5).abs() < f64::EPSILON);
            }
            other => panic!("unexpected event {:?}", other),
        }

        // The non-matching event was filtered; nothing else is queued
        assert!(rx.try_recv().is_err());
        bus.shutdown();
    }

    #[tokio::test]
    async fn events_for_one_entity_arrive_in_publish_order() {
        let bus = EventBus::init();
        let job_id = Uuid::now_v7();
        let mut rx = bus.subscribe(format!("jobs.{}", job_id)).await;

        for i in 1..=5 {
            bus.publish(DeeprEvent::JobProgress {
                job_id,
                progress_fraction: i as f64 / 10.0,
            });
        }

        for i in 1..=5 {
            match rx.recv().await.unwrap() {
                DeeprEvent::JobProgress {
                    progress_fraction, ..
                } => assert!((progress_fraction - i as f64 / 10.0).abs() < f64::EPSILON),
                other => panic!("unexpected event {:?}", other),
            }
        }
        bus.shutdown();
    }

    #[tokio::test]
    async fn dropped_subscriber_is_pruned() {
        let bus = EventBus::init();
        let rx = bus.subscribe("jobs").await;
        drop(rx);

        bus.publish(DeeprEvent::JobProgress {
            job_id: Uuid::now_v7(),
            progress_fraction: 0.1,
        });

        // Drainer prunes on first failed delivery
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(bus.inner.subscribers.read().await.is_empty());
        bus.shutdown();
    }
}
