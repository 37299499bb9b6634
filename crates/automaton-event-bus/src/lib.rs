#![allow(dead_code)]

//! Generic pub/sub plus the per-session outbound fan-out used by the Client
//! Gateway, with a bounded-buffer coalescing rule for non-critical events so
//! a slow client can't build unbounded backlog.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use automaton_core_types::{OrchestratorError, OutboundEvent};

/// Trait implemented by payload types that can be carried on the bus.
pub trait Event: Clone + Send + Sync + std::fmt::Debug + 'static {}

impl<T> Event for T where T: Clone + Send + Sync + std::fmt::Debug + 'static {}

#[async_trait]
pub trait EventBus<E>: Send + Sync
where
    E: Event,
{
    async fn publish(&self, event: E) -> Result<(), OrchestratorError>;
    fn subscribe(&self) -> broadcast::Receiver<E>;
}

/// Simple in-memory broadcast bus suitable for unit tests and any fan-out
/// that doesn't need per-subscriber backpressure handling.
pub struct InMemoryBus<E>
where
    E: Event,
{
    sender: broadcast::Sender<E>,
}

impl<E> InMemoryBus<E>
where
    E: Event,
{
    pub fn new(capacity: usize) -> Arc<Self> {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Arc::new(Self { sender })
    }
}

#[async_trait]
impl<E> EventBus<E> for InMemoryBus<E>
where
    E: Event,
{
    async fn publish(&self, event: E) -> Result<(), OrchestratorError> {
        // No subscribers is not an error: a session may have zero attached
        // clients between recording actions and the next `get_scripts` poll.
        let _ = self.sender.send(event);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<E> {
        self.sender.subscribe()
    }
}

const DEFAULT_CLIENT_BUFFER: usize = 64;
const HIGH_WATER: usize = DEFAULT_CLIENT_BUFFER / 2;
const LOW_WATER: usize = DEFAULT_CLIENT_BUFFER / 4;

/// One client's outbound queue: a bounded ring buffer that coalesces
/// non-critical events (keep-newest) on overflow and otherwise never drops.
struct ClientBuffer {
    queue: Mutex<VecDeque<OutboundEvent>>,
    capacity: usize,
    notify: mpsc::Sender<()>,
}

/// Per-client handle returned to the Gateway; `drain` pulls everything
/// currently queued for delivery over the client's transport.
pub struct ClientOutbox {
    buffer: Arc<ClientBuffer>,
    notify_rx: mpsc::Receiver<()>,
}

impl ClientOutbox {
    /// Wait until at least one event is queued, then drain all of them.
    pub async fn recv_batch(&mut self) -> Option<Vec<OutboundEvent>> {
        if self.notify_rx.recv().await.is_none() {
            return None;
        }
        let mut queue = self.buffer.queue.lock();
        if queue.is_empty() {
            return Some(Vec::new());
        }
        Some(queue.drain(..).collect())
    }

    pub fn depth(&self) -> usize {
        self.buffer.queue.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.buffer.capacity
    }
}

/// Enqueues events for one client, applying the spec's backpressure policy:
/// critical events are always pushed (growing the buffer past its soft
/// capacity if needed); a non-critical event already pending under the same
/// `coalesce_key` is replaced in place rather than appended.
#[derive(Clone)]
pub struct ClientSender {
    buffer: Arc<ClientBuffer>,
}

impl ClientSender {
    pub fn push(&self, event: OutboundEvent) {
        let mut queue = self.buffer.queue.lock();
        if let Some(key) = event.coalesce_key() {
            if let Some(existing) = queue.iter_mut().find(|e| e.coalesce_key() == Some(key)) {
                *existing = event;
                drop(queue);
                let _ = self.buffer.notify.try_send(());
                return;
            }
        }
        if queue.len() >= self.buffer.capacity && !event.is_critical() {
            debug!("dropping non-critical event; client outbox at capacity");
            return;
        }
        queue.push_back(event);
        drop(queue);
        let _ = self.buffer.notify.try_send(());
    }

    /// Depth as a fraction of capacity, used by the Screenshot Streamer to
    /// adapt JPEG quality.
    pub fn load_factor(&self) -> f64 {
        let queue = self.buffer.queue.lock();
        queue.len() as f64 / self.buffer.capacity.max(1) as f64
    }
}

pub fn client_channel(capacity: usize) -> (ClientSender, ClientOutbox) {
    let capacity = capacity.max(1);
    let (notify, notify_rx) = mpsc::channel(capacity + 1);
    let buffer = Arc::new(ClientBuffer {
        queue: Mutex::new(VecDeque::with_capacity(capacity)),
        capacity,
        notify,
    });
    (
        ClientSender { buffer: buffer.clone() },
        ClientOutbox { buffer, notify_rx },
    )
}

/// Fan-out registry for one session: every attached client gets its own
/// [`ClientSender`]; publishing broadcasts to all of them.
#[derive(Default)]
pub struct SessionFanout {
    clients: Mutex<Vec<(u64, ClientSender)>>,
    next_id: std::sync::atomic::AtomicU64,
}

impl SessionFanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, capacity: usize) -> (u64, ClientOutbox) {
        let (sender, outbox) = client_channel(capacity.max(DEFAULT_CLIENT_BUFFER));
        let id = self.next_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.clients.lock().push((id, sender));
        (id, outbox)
    }

    pub fn detach(&self, id: u64) {
        self.clients.lock().retain(|(cid, _)| *cid != id);
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    /// Broadcast to every attached client.
    pub fn broadcast(&self, event: OutboundEvent) {
        let clients = self.clients.lock();
        if clients.is_empty() {
            warn!("broadcast with no attached clients; event dropped");
            return;
        }
        for (_, sender) in clients.iter() {
            sender.push(event.clone());
        }
    }

    /// Average load factor across attached clients, used to drive adaptive
    /// screenshot quality.
    pub fn average_load_factor(&self) -> f64 {
        let clients = self.clients.lock();
        if clients.is_empty() {
            return 0.0;
        }
        clients.iter().map(|(_, s)| s.load_factor()).sum::<f64>() / clients.len() as f64
    }
}

pub const HIGH_WATER_MARK: f64 = HIGH_WATER as f64 / DEFAULT_CLIENT_BUFFER as f64;
pub const LOW_WATER_MARK: f64 = LOW_WATER as f64 / DEFAULT_CLIENT_BUFFER as f64;

#[cfg(test)]
mod tests {
    use super::*;
    use automaton_core_types::{ExecutionId, SessionId};

    #[test]
    fn coalesces_real_time_screenshots_keeping_newest() {
        let fanout = SessionFanout::new();
        let (_id, mut outbox) = fanout.attach(8);
        for frame_id in 0..5u64 {
            fanout.broadcast(OutboundEvent::RealTimeScreenshot {
                data: format!("frame-{frame_id}"),
                url: "https://x".into(),
                frame_id,
            });
        }
        let batch = outbox.buffer.queue.lock();
        assert_eq!(batch.len(), 1);
        match &batch[0] {
            OutboundEvent::RealTimeScreenshot { frame_id, .. } => assert_eq!(*frame_id, 4),
            _ => panic!("expected real_time_screenshot"),
        }
    }

    #[test]
    fn never_drops_critical_events_even_past_capacity() {
        let fanout = SessionFanout::new();
        let (_id, outbox) = fanout.attach(2);
        let exec_id = ExecutionId::new();
        for step in 0..10u32 {
            fanout.broadcast(OutboundEvent::ExecutionProgress {
                execution_id: exec_id,
                current_step: step,
                total_steps: 10,
                progress: (step * 10) as u8,
                status: automaton_core_types::ExecutionStatus::Running,
                step: automaton_core_types::StepLogEntry {
                    step,
                    description: "x".into(),
                    result: automaton_core_types::ActionResult::success(None, None, 1),
                },
            });
        }
        assert_eq!(outbox.depth(), 10);
    }

    #[tokio::test]
    async fn detach_stops_future_broadcasts_reaching_client() {
        let fanout = SessionFanout::new();
        let (id, mut outbox) = fanout.attach(8);
        fanout.detach(id);
        fanout.broadcast(OutboundEvent::Status {
            session_id: SessionId::new(),
            detail: serde_json::json!({}),
        });
        // No client left attached; broadcast is a documented no-op/log.
        assert_eq!(fanout.client_count(), 0);
        drop(outbox.notify_rx.try_recv());
    }
}
