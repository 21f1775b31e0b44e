// ============================================================================
// In-memory broker for tests and local runs
// ============================================================================
//
// One `InMemoryBroker` plays the server; each `session()` is an independent
// connection + channel implementing `Broker`. Semantics follow AMQP where the
// core depends on them: durable queues, exclusive consumers, manual ack,
// unacked deliveries requeued when their channel closes.

use super::*;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

/// Observable broker operations, in the order they happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    Declared { session: u64, queue: String },
    Published { session: u64, queue: String },
    ConsumeStarted { session: u64, queue: String, exclusive: bool },
    ConsumeDenied { session: u64, queue: String },
    Acked { session: u64, queue: String },
    Rejected { session: u64, queue: String, requeue: bool },
    ConsumerCancelled { session: u64, queue: String },
    ChannelClosed { session: u64 },
    ConnectionClosed { session: u64 },
}

#[derive(Debug, Clone)]
struct StoredMessage {
    body: Vec<u8>,
    redelivered: bool,
}

struct InboundDelivery {
    tag: u64,
    message: StoredMessage,
}

struct ConsumerSlot {
    id: u64,
    session: u64,
    tx: mpsc::UnboundedSender<InboundDelivery>,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<StoredMessage>,
    consumers: Vec<ConsumerSlot>,
    exclusive_holder: Option<u64>,
    cursor: usize,
}

struct Unacked {
    queue: String,
    session: u64,
    message: StoredMessage,
}

struct SessionState {
    channel_open: bool,
    connection_open: bool,
}

#[derive(Default)]
struct State {
    queues: HashMap<String, QueueState>,
    unacked: HashMap<u64, Unacked>,
    sessions: HashMap<u64, SessionState>,
    events: Vec<BrokerEvent>,
    next_tag: u64,
    next_id: u64,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn channel_open(&self, session: u64) -> bool {
        self.sessions
            .get(&session)
            .map(|s| s.channel_open && s.connection_open)
            .unwrap_or(false)
    }

    /// Hand ready messages to consumers round-robin
    fn dispatch(&mut self, queue: &str) {
        loop {
            let Some(q) = self.queues.get_mut(queue) else {
                return;
            };
            if q.consumers.is_empty() {
                return;
            }
            let Some(message) = q.ready.pop_front() else {
                return;
            };

            let index = q.cursor % q.consumers.len();
            q.cursor = q.cursor.wrapping_add(1);

            self.next_tag += 1;
            let tag = self.next_tag;
            let slot = &q.consumers[index];
            let session = slot.session;
            let sent = slot.tx.send(InboundDelivery {
                tag,
                message: message.clone(),
            });

            if sent.is_ok() {
                self.unacked.insert(
                    tag,
                    Unacked {
                        queue: queue.to_string(),
                        session,
                        message,
                    },
                );
            } else {
                // Receiver gone: drop the consumer and put the message back
                let removed = q.consumers.remove(index);
                if q.exclusive_holder == Some(removed.id) {
                    q.exclusive_holder = None;
                }
                q.ready.push_front(message);
            }
        }
    }

    fn requeue(&mut self, unacked: Unacked) {
        let queue = unacked.queue.clone();
        if let Some(q) = self.queues.get_mut(&queue) {
            let mut message = unacked.message;
            message.redelivered = true;
            q.ready.push_front(message);
        }
        self.dispatch(&queue);
    }

    fn remove_consumer(&mut self, queue: &str, consumer_id: u64) -> bool {
        let Some(q) = self.queues.get_mut(queue) else {
            return false;
        };
        let before = q.consumers.len();
        q.consumers.retain(|slot| slot.id != consumer_id);
        if q.exclusive_holder == Some(consumer_id) {
            q.exclusive_holder = None;
        }
        before != q.consumers.len()
    }

    fn close_channel(&mut self, session: u64) {
        if let Some(s) = self.sessions.get_mut(&session) {
            s.channel_open = false;
        }

        let mut touched = Vec::new();
        for (name, q) in self.queues.iter_mut() {
            let holder = q.exclusive_holder;
            let before = q.consumers.len();
            let mut released = Vec::new();
            q.consumers.retain(|slot| {
                let keep = slot.session != session;
                if !keep {
                    released.push(slot.id);
                }
                keep
            });
            if holder.map(|h| released.contains(&h)).unwrap_or(false) {
                q.exclusive_holder = None;
            }
            if before != q.consumers.len() {
                touched.push(name.clone());
            }
        }

        let mut tags: Vec<u64> = self
            .unacked
            .iter()
            .filter(|(_, u)| u.session == session)
            .map(|(tag, _)| *tag)
            .collect();
        // Highest tag first so push_front restores the original order
        tags.sort_unstable_by(|a, b| b.cmp(a));
        for tag in tags {
            if let Some(unacked) = self.unacked.remove(&tag) {
                self.requeue(unacked);
            }
        }

        for queue in touched {
            self.dispatch(&queue);
        }
    }
}

/// Shared in-memory broker ("server")
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<State>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        lock_state(&self.state)
    }

    /// Open a new connection + channel
    pub fn session(&self) -> InMemorySession {
        let mut state = self.lock();
        let id = state.next_id();
        state.sessions.insert(
            id,
            SessionState {
                channel_open: true,
                connection_open: true,
            },
        );
        InMemorySession {
            id,
            state: Arc::clone(&self.state),
        }
    }

    /// Declare `queue` and append `body` without going through a session
    pub fn seed(&self, queue: &str, body: impl Into<Vec<u8>>) {
        let mut state = self.lock();
        state
            .queues
            .entry(queue.to_string())
            .or_default()
            .ready
            .push_back(StoredMessage {
                body: body.into(),
                redelivered: false,
            });
        state.dispatch(queue);
    }

    pub fn events(&self) -> Vec<BrokerEvent> {
        self.lock().events.clone()
    }

    pub fn queue_exists(&self, queue: &str) -> bool {
        self.lock().queues.contains_key(queue)
    }

    /// Messages waiting for a consumer
    pub fn ready_count(&self, queue: &str) -> usize {
        self.lock()
            .queues
            .get(queue)
            .map(|q| q.ready.len())
            .unwrap_or(0)
    }

    /// Messages delivered but neither acked nor rejected
    pub fn unacked_count(&self, queue: &str) -> usize {
        self.lock()
            .unacked
            .values()
            .filter(|u| u.queue == queue)
            .count()
    }

    pub fn consumer_count(&self, queue: &str) -> usize {
        self.lock()
            .queues
            .get(queue)
            .map(|q| q.consumers.len())
            .unwrap_or(0)
    }

    pub fn has_exclusive_consumer(&self, queue: &str) -> bool {
        self.lock()
            .queues
            .get(queue)
            .map(|q| q.exclusive_holder.is_some())
            .unwrap_or(false)
    }

    /// Bodies currently waiting in `queue`, oldest first
    pub fn ready_bodies(&self, queue: &str) -> Vec<Vec<u8>> {
        self.lock()
            .queues
            .get(queue)
            .map(|q| q.ready.iter().map(|m| m.body.clone()).collect())
            .unwrap_or_default()
    }
}

fn lock_state(state: &Arc<Mutex<State>>) -> MutexGuard<'_, State> {
    // A panicking test thread must not wedge the remaining assertions
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One connection + channel on an `InMemoryBroker`
pub struct InMemorySession {
    id: u64,
    state: Arc<Mutex<State>>,
}

impl InMemorySession {
    pub fn id(&self) -> u64 {
        self.id
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        lock_state(&self.state)
    }
}

#[async_trait]
impl Broker for InMemorySession {
    async fn declare(&self, queue: &QueueName) -> Result<(), BrokerError> {
        let mut state = self.lock();
        if !state.channel_open(self.id) {
            return Err(BrokerError::Closed);
        }
        state.queues.entry(queue.to_string()).or_default();
        state.events.push(BrokerEvent::Declared {
            session: self.id,
            queue: queue.to_string(),
        });
        Ok(())
    }

    async fn publish(&self, routing_key: &QueueName, body: &[u8]) -> Result<(), BrokerError> {
        let mut state = self.lock();
        if !state.channel_open(self.id) {
            return Err(BrokerError::Closed);
        }
        state.events.push(BrokerEvent::Published {
            session: self.id,
            queue: routing_key.to_string(),
        });

        // Default exchange drops messages for undeclared queues
        if let Some(q) = state.queues.get_mut(routing_key.as_str()) {
            q.ready.push_back(StoredMessage {
                body: body.to_vec(),
                redelivered: false,
            });
            state.dispatch(routing_key.as_str());
        }
        Ok(())
    }

    async fn consume(
        &self,
        queue: &QueueName,
        options: ConsumeOptions,
    ) -> Result<Claim, BrokerError> {
        let mut guard = self.lock();
        let state = &mut *guard;
        if !state.channel_open(self.id) {
            return Err(BrokerError::Closed);
        }

        let consumer_id = state.next_id();
        let Some(q) = state.queues.get_mut(queue.as_str()) else {
            return Err(BrokerError::QueueNotFound(queue.to_string()));
        };

        let taken = q.exclusive_holder.is_some() || (options.exclusive && !q.consumers.is_empty());
        if taken {
            state.events.push(BrokerEvent::ConsumeDenied {
                session: self.id,
                queue: queue.to_string(),
            });
            return Ok(Claim::Denied {
                reason: format!("queue '{}' in exclusive use", queue),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        q.consumers.push(ConsumerSlot {
            id: consumer_id,
            session: self.id,
            tx,
        });
        if options.exclusive {
            q.exclusive_holder = Some(consumer_id);
        }
        state.events.push(BrokerEvent::ConsumeStarted {
            session: self.id,
            queue: queue.to_string(),
            exclusive: options.exclusive,
        });
        state.dispatch(queue.as_str());

        Ok(Claim::Granted(Box::new(InMemoryConsumer {
            id: consumer_id,
            session: self.id,
            queue: queue.to_string(),
            state: Arc::clone(&self.state),
            rx,
            cancelled: false,
        })))
    }

    async fn queue_stats(&self, queue: &QueueName) -> Result<QueueStats, BrokerError> {
        let state = self.lock();
        if !state.channel_open(self.id) {
            return Err(BrokerError::Closed);
        }
        let q = state
            .queues
            .get(queue.as_str())
            .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))?;
        Ok(QueueStats {
            messages: q.ready.len() as u32,
            consumers: q.consumers.len() as u32,
        })
    }

    async fn close_channel(&self) -> Result<(), BrokerError> {
        let mut state = self.lock();
        let open = state
            .sessions
            .get(&self.id)
            .map(|s| s.channel_open)
            .unwrap_or(false);
        if !open {
            return Err(BrokerError::Closed);
        }
        state.close_channel(self.id);
        state.events.push(BrokerEvent::ChannelClosed { session: self.id });
        Ok(())
    }

    async fn close_connection(&self) -> Result<(), BrokerError> {
        let mut state = self.lock();
        let (channel_open, connection_open) = state
            .sessions
            .get(&self.id)
            .map(|s| (s.channel_open, s.connection_open))
            .unwrap_or((false, false));
        if !connection_open {
            return Err(BrokerError::Closed);
        }
        if channel_open {
            state.close_channel(self.id);
        }
        if let Some(s) = state.sessions.get_mut(&self.id) {
            s.connection_open = false;
        }
        state
            .events
            .push(BrokerEvent::ConnectionClosed { session: self.id });
        Ok(())
    }
}

struct InMemoryConsumer {
    id: u64,
    session: u64,
    queue: String,
    state: Arc<Mutex<State>>,
    rx: mpsc::UnboundedReceiver<InboundDelivery>,
    cancelled: bool,
}

#[async_trait]
impl Consumer for InMemoryConsumer {
    async fn next(&mut self) -> Option<Result<Box<dyn Delivery>, BrokerError>> {
        if self.cancelled {
            return None;
        }
        loop {
            let inbound = self.rx.recv().await?;

            // Skip deliveries requeued by a channel close while buffered here
            let live = lock_state(&self.state).unacked.contains_key(&inbound.tag);
            if !live {
                continue;
            }

            return Some(Ok(Box::new(InMemoryDelivery {
                tag: inbound.tag,
                session: self.session,
                queue: self.queue.clone(),
                body: inbound.message.body,
                redelivered: inbound.message.redelivered,
                state: Arc::clone(&self.state),
            })));
        }
    }

    async fn cancel(&mut self) -> Result<(), BrokerError> {
        if self.cancelled {
            return Ok(());
        }
        self.cancelled = true;
        self.rx.close();

        let mut state = lock_state(&self.state);
        state.remove_consumer(&self.queue, self.id);

        // Buffered but never handed out: back to the queue
        let mut pending = Vec::new();
        while let Ok(inbound) = self.rx.try_recv() {
            pending.push(inbound.tag);
        }
        for tag in pending.into_iter().rev() {
            if let Some(unacked) = state.unacked.remove(&tag) {
                state.requeue(unacked);
            }
        }

        state.events.push(BrokerEvent::ConsumerCancelled {
            session: self.session,
            queue: self.queue.clone(),
        });
        Ok(())
    }
}

impl Drop for InMemoryConsumer {
    fn drop(&mut self) {
        if self.cancelled {
            return;
        }
        let mut state = lock_state(&self.state);
        state.remove_consumer(&self.queue, self.id);
    }
}

struct InMemoryDelivery {
    tag: u64,
    session: u64,
    queue: String,
    body: Vec<u8>,
    redelivered: bool,
    state: Arc<Mutex<State>>,
}

#[async_trait]
impl Delivery for InMemoryDelivery {
    fn body(&self) -> &[u8] {
        &self.body
    }

    fn delivery_tag(&self) -> u64 {
        self.tag
    }

    fn redelivered(&self) -> bool {
        self.redelivered
    }

    async fn ack(&self) -> Result<(), BrokerError> {
        let mut state = lock_state(&self.state);
        if !state.channel_open(self.session) {
            return Err(BrokerError::Closed);
        }
        state
            .unacked
            .remove(&self.tag)
            .ok_or_else(|| BrokerError::Acknowledge(format!("unknown delivery tag {}", self.tag)))?;
        state.events.push(BrokerEvent::Acked {
            session: self.session,
            queue: self.queue.clone(),
        });
        Ok(())
    }

    async fn reject(&self, requeue: bool) -> Result<(), BrokerError> {
        let mut state = lock_state(&self.state);
        if !state.channel_open(self.session) {
            return Err(BrokerError::Closed);
        }
        let unacked = state
            .unacked
            .remove(&self.tag)
            .ok_or_else(|| BrokerError::Acknowledge(format!("unknown delivery tag {}", self.tag)))?;
        state.events.push(BrokerEvent::Rejected {
            session: self.session,
            queue: self.queue.clone(),
            requeue,
        });
        if requeue {
            state.requeue(unacked);
        }
        Ok(())
    }
}
