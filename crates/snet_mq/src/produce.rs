//! Production fan-out
//!
//! A bounded MPMC queue feeding a fixed pool of workers. Each worker pulls
//! one request, resolves its targets against the live instance map and
//! delivers to every open target concurrently.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::event::{EventPublisher, HostEvent};
use crate::instance::PluginInstance;
use crate::{HostError, HostResult};

/// Instance map shared between the host and the workers
pub(crate) type InstanceMap = Arc<DashMap<String, Arc<PluginInstance>>>;

// ─────────────────────────────────────────────────────────────────────────────
// Payload
// ─────────────────────────────────────────────────────────────────────────────

/// Message content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Payload {
    Text(String),
    Binary(Vec<u8>),
}

impl Payload {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Text(s) => s.as_bytes(),
            Payload::Binary(b) => b,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::Text(s)
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::Text(s.to_string())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(b: Vec<u8>) -> Self {
        Payload::Binary(b)
    }
}

/// One queued produce
#[derive(Debug, Clone)]
pub struct ProduceRequest {
    pub topic: String,
    pub payload: Payload,
    /// Instance keys; empty = every open instance
    pub targets: Vec<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Produce Queue
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) struct ProduceQueue {
    tx: Mutex<Option<flume::Sender<ProduceRequest>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    token: CancellationToken,
}

impl ProduceQueue {
    /// Create the channel and spawn `workers` consumers
    pub(crate) fn start(
        capacity: usize,
        workers: usize,
        instances: InstanceMap,
        events: EventPublisher,
        token: CancellationToken,
    ) -> Self {
        let (tx, rx) = flume::bounded(capacity);

        let handles = (0..workers)
            .map(|id| {
                let rx = rx.clone();
                let instances = Arc::clone(&instances);
                let events = events.clone();
                let token = token.clone();
                tokio::spawn(run_worker(id, rx, instances, events, token))
            })
            .collect();

        info!(workers, capacity, "Produce queue started");

        Self {
            tx: Mutex::new(Some(tx)),
            workers: Mutex::new(handles),
            token,
        }
    }

    /// Enqueue, waiting while the queue is full
    pub(crate) async fn enqueue(&self, request: ProduceRequest) -> HostResult<()> {
        let tx = self.tx.lock().clone().ok_or(HostError::ShutDown)?;
        tx.send_async(request).await.map_err(|_| HostError::ShutDown)
    }

    /// Number of requests waiting
    #[cfg(test)]
    pub(crate) fn pending(&self) -> usize {
        self.tx.lock().as_ref().map(|tx| tx.len()).unwrap_or(0)
    }

    /// Complete the queue, let workers drain it, then cancel them
    pub(crate) async fn shutdown(&self, drain_timeout: Duration) {
        // Dropping the last sender lets workers exit once the queue is empty
        self.tx.lock().take();

        let handles = std::mem::take(&mut *self.workers.lock());
        let mut joined = Box::pin(join_all(handles));

        if tokio::time::timeout(drain_timeout, &mut joined).await.is_err() {
            warn!("Produce queue did not drain in time, cancelling workers");
            self.token.cancel();
            joined.await;
        }
        self.token.cancel();
        debug!("Produce workers stopped");
    }
}

async fn run_worker(
    id: usize,
    rx: flume::Receiver<ProduceRequest>,
    instances: InstanceMap,
    events: EventPublisher,
    token: CancellationToken,
) {
    debug!(worker = id, "Produce worker started");
    loop {
        let request = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            received = rx.recv_async() => match received {
                Ok(request) => request,
                Err(_) => break,
            },
        };
        deliver(&instances, &events, request).await;
    }
    debug!(worker = id, "Produce worker stopped");
}

/// Resolve targets and deliver to every open one
pub(crate) async fn deliver(instances: &InstanceMap, events: &EventPublisher, request: ProduceRequest) {
    let ProduceRequest {
        topic,
        payload,
        targets,
    } = request;

    let resolved: Vec<Arc<PluginInstance>> = if targets.is_empty() {
        instances.iter().map(|e| Arc::clone(e.value())).collect()
    } else {
        let mut found = Vec::with_capacity(targets.len());
        let mut unknown = Vec::new();
        for key in targets {
            match instances.get(&key) {
                Some(instance) => found.push(Arc::clone(instance.value())),
                None => unknown.push(key),
            }
        }
        if !unknown.is_empty() {
            warn!(topic = %topic, keys = ?unknown, "Produce addressed unknown instances");
            events.publish(HostEvent::UnknownTargets {
                topic: topic.clone(),
                keys: unknown,
            });
        }
        found
    };

    let deliveries = resolved
        .into_iter()
        .filter(|instance| instance.is_open())
        .map(|instance| {
            let topic = topic.as_str();
            let payload = &payload;
            async move {
                let result = instance.backend.produce(topic, payload).await;
                (instance.key.clone(), result)
            }
        });

    for (key, result) in join_all(deliveries).await {
        if result.success {
            debug!(instance = %key, topic = %topic, "Produced");
        } else {
            warn!(instance = %key, topic = %topic, message = %result.message, "Produce failed");
        }
        events.publish(HostEvent::Produced {
            key,
            topic: topic.clone(),
            result,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_conversions() {
        assert_eq!(Payload::from("abc").len(), 3);
        assert_eq!(Payload::from(vec![1u8, 2]).as_bytes(), &[1, 2]);
        assert!(Payload::from(String::new()).is_empty());
    }

    #[tokio::test]
    async fn test_queue_rejects_after_shutdown() {
        let instances: InstanceMap = Arc::new(DashMap::new());
        let queue = ProduceQueue::start(
            4,
            2,
            instances,
            EventPublisher::new(8),
            CancellationToken::new(),
        );
        queue
            .enqueue(ProduceRequest {
                topic: "t".into(),
                payload: "x".into(),
                targets: Vec::new(),
            })
            .await
            .unwrap();

        queue.shutdown(Duration::from_secs(1)).await;
        assert_eq!(queue.pending(), 0);

        let result = queue
            .enqueue(ProduceRequest {
                topic: "t".into(),
                payload: "y".into(),
                targets: Vec::new(),
            })
            .await;
        assert!(matches!(result, Err(HostError::ShutDown)));
    }
}
