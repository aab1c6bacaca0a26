//! Operation queues and subscriptions.
//!
//! Every operation is published to two queues: one for its type and one for
//! its record. A client subscribes to the queues of the types and records it
//! cares about, so the same operation usually arrives more than once; the
//! queue layer drops repeats by operation id and hands each operation to its
//! listeners exactly once.
//!
//! Transports push deliveries into an in-process channel. Nothing reaches a
//! listener until [`OperationQueues::drain`] is called, so a transport
//! callback never re-enters a listener and listeners run with no lock held.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::codec;
use crate::eager::RecordSubscriber;
use crate::types::{Operation, SyncError};

// ── Scopes and options ────────────────────────────────────────────────────

/// A subscription unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Type(String),
    Record(String, String),
}

impl Scope {
    /// `{root}/{type}/operations` or `{root}/{type}/{id}/operations`.
    pub fn queue_path(&self, root: &str) -> String {
        match self {
            Scope::Type(model) => format!("{root}/{model}/operations"),
            Scope::Record(model, id) => format!("{root}/{model}/{id}/operations"),
        }
    }

    /// The scopes an operation is published to.
    pub fn for_operation(op: &Operation) -> Result<Vec<Scope>, SyncError> {
        match op.path.as_slice() {
            [] => Err(SyncError::MalformedPath("empty path".to_string())),
            [model] => Ok(vec![Scope::Type(model.clone())]),
            [model, id, ..] => Ok(vec![
                Scope::Type(model.clone()),
                Scope::Record(model.clone(), id.clone()),
            ]),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Type(model) => f.write_str(model),
            Scope::Record(model, id) => write!(f, "{model}/{id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueOptions {
    /// Prefix of every queue path.
    pub root: String,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            root: "operation-queues".to_string(),
        }
    }
}

// ── Wire ──────────────────────────────────────────────────────────────────

/// Queue item. The operation is stored as JSON text so that stores which
/// strip `null` members keep its `value` key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedOperation {
    pub operation: String,
}

impl QueuedOperation {
    pub fn new(op: &Operation) -> Self {
        Self {
            operation: codec::encode(op),
        }
    }

    pub fn to_payload(&self) -> Result<String, SyncError> {
        serde_json::to_string(self).map_err(|e| SyncError::Codec(e.to_string()))
    }

    pub fn from_payload(payload: &str) -> Result<Self, SyncError> {
        serde_json::from_str(payload).map_err(|e| SyncError::Codec(e.to_string()))
    }

    pub fn decode(&self) -> Result<Operation, SyncError> {
        codec::decode(&self.operation)
    }
}

/// One item as delivered by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub queue: String,
    pub payload: String,
}

// ── Transport ─────────────────────────────────────────────────────────────

/// Remote queue store.
///
/// Each queue keeps only its latest item. `listen` delivers that item right
/// away if there is one, then every later push, until `unlisten`.
pub trait Transport: Send + Sync {
    fn push(&self, queue: &str, payload: String) -> Result<(), SyncError>;
    fn listen(&self, queue: &str, sink: Sender<Delivery>) -> Result<(), SyncError>;
    fn unlisten(&self, queue: &str);
}

/// In-process [`Transport`]. Clones share the same queues.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    inner: Arc<Mutex<MemoryQueues>>,
}

#[derive(Default)]
struct MemoryQueues {
    tails: HashMap<String, String>,
    sinks: HashMap<String, Vec<Sender<Delivery>>>,
    push_count: usize,
    fail_on_push: bool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest item of `queue`.
    pub fn tail(&self, queue: &str) -> Option<String> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .tails
            .get(queue)
            .cloned()
    }

    pub fn push_count(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).push_count
    }

    pub fn listener_count(&self, queue: &str) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .sinks
            .get(queue)
            .map_or(0, Vec::len)
    }

    /// Make every later push fail.
    pub fn set_fail_on_push(&self, fail: bool) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).fail_on_push = fail;
    }
}

impl Transport for MemoryTransport {
    fn push(&self, queue: &str, payload: String) -> Result<(), SyncError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.push_count += 1;
        if inner.fail_on_push {
            return Err(SyncError::Transport(format!("push to {queue} refused")));
        }
        if let Some(sinks) = inner.sinks.get_mut(queue) {
            sinks.retain(|sink| {
                sink.send(Delivery {
                    queue: queue.to_string(),
                    payload: payload.clone(),
                })
                .is_ok()
            });
        }
        inner.tails.insert(queue.to_string(), payload);
        Ok(())
    }

    fn listen(&self, queue: &str, sink: Sender<Delivery>) -> Result<(), SyncError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(payload) = inner.tails.get(queue) {
            let delivery = Delivery {
                queue: queue.to_string(),
                payload: payload.clone(),
            };
            sink.send(delivery)
                .map_err(|_| SyncError::Transport(format!("listener for {queue} is gone")))?;
        }
        inner.sinks.entry(queue.to_string()).or_default().push(sink);
        Ok(())
    }

    fn unlisten(&self, queue: &str) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).sinks.remove(queue);
    }
}

// ── Listeners ─────────────────────────────────────────────────────────────

/// Receives each distinct operation once.
pub trait OperationListener: Send + Sync {
    fn on_operation(&self, op: &Operation);
}

impl<F> OperationListener for F
where
    F: Fn(&Operation) + Send + Sync,
{
    fn on_operation(&self, op: &Operation) {
        self(op)
    }
}

// ── Queues ────────────────────────────────────────────────────────────────

/// Subscriptions, publishing and exactly-once delivery for one client.
///
/// Ids of delivered operations are remembered for the life of the value so
/// that late repeats are still dropped; the set grows with every distinct
/// operation until [`forget_seen`](Self::forget_seen) is called.
pub struct OperationQueues<T: Transport> {
    transport: T,
    options: QueueOptions,
    subscriptions: Mutex<IndexSet<String>>,
    seen: Mutex<HashSet<String>>,
    listeners: Mutex<Vec<Arc<dyn OperationListener>>>,
    sender: Sender<Delivery>,
    receiver: Mutex<Receiver<Delivery>>,
    draining: Mutex<()>,
}

impl<T: Transport> OperationQueues<T> {
    pub fn new(transport: T) -> Self {
        Self::with_options(transport, QueueOptions::default())
    }

    pub fn with_options(transport: T, options: QueueOptions) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            transport,
            options,
            subscriptions: Mutex::new(IndexSet::new()),
            seen: Mutex::new(HashSet::new()),
            listeners: Mutex::new(Vec::new()),
            sender,
            receiver: Mutex::new(receiver),
            draining: Mutex::new(()),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn options(&self) -> &QueueOptions {
        &self.options
    }

    /// Starts listening on the scope's queue. Subscribing twice is a no-op.
    pub fn subscribe(&self, scope: &Scope) -> Result<(), SyncError> {
        let queue = scope.queue_path(&self.options.root);
        let mut subscriptions = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        if subscriptions.contains(&queue) {
            return Ok(());
        }
        self.transport.listen(&queue, self.sender.clone())?;
        debug!(%scope, queue = %queue, "subscribed");
        subscriptions.insert(queue);
        Ok(())
    }

    pub fn subscribe_to_type(&self, model: &str) -> Result<(), SyncError> {
        self.subscribe(&Scope::Type(model.to_string()))
    }

    pub fn subscribe_to_record(&self, model: &str, id: &str) -> Result<(), SyncError> {
        self.subscribe(&Scope::Record(model.to_string(), id.to_string()))
    }

    pub fn subscribe_to_records(&self, model: &str, ids: &[String]) -> Result<(), SyncError> {
        ids.iter().try_for_each(|id| self.subscribe_to_record(model, id))
    }

    pub fn is_subscribed(&self, scope: &Scope) -> bool {
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&scope.queue_path(&self.options.root))
    }

    /// Queue paths currently listened to, in subscription order.
    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// Stops listening on the scope's queue. Deliveries already received for
    /// it are dropped by the next [`drain`](Self::drain).
    pub fn unsubscribe(&self, scope: &Scope) {
        let queue = scope.queue_path(&self.options.root);
        let removed = self
            .subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .shift_remove(&queue);
        if removed {
            self.transport.unlisten(&queue);
            debug!(%scope, "unsubscribed");
        }
    }

    pub fn unsubscribe_all(&self) {
        let queues: Vec<String> = self
            .subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for queue in &queues {
            self.transport.unlisten(queue);
        }
        debug!(count = queues.len(), "unsubscribed from all queues");
    }

    /// Publishes `op` to its type queue and its record queue.
    pub fn enqueue(&self, op: &Operation) -> Result<(), SyncError> {
        if op.id.is_empty() {
            return Err(SyncError::MissingOperationId);
        }
        let payload = QueuedOperation::new(op).to_payload()?;
        for scope in Scope::for_operation(op)? {
            self.transport.push(&scope.queue_path(&self.options.root), payload.clone())?;
        }
        trace!(op = %op, "enqueued");
        Ok(())
    }

    pub fn on_operation(&self, listener: Arc<dyn OperationListener>) {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner()).push(listener);
    }

    /// Hands every pending, first-seen operation to the listeners in arrival
    /// order and returns them. Keeps going until nothing is pending, so
    /// deliveries caused by the listeners themselves are included.
    ///
    /// Concurrent calls run one after the other. A listener must not call
    /// `drain` itself; it would wait on its own caller.
    pub fn drain(&self) -> Vec<Operation> {
        let _draining = self.draining.lock().unwrap_or_else(|e| e.into_inner());
        let mut delivered = Vec::new();
        loop {
            let next = self.receiver.lock().unwrap_or_else(|e| e.into_inner()).try_recv();
            let Ok(delivery) = next else {
                break;
            };
            if let Some(op) = self.accept(delivery) {
                let listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner()).clone();
                for listener in &listeners {
                    listener.on_operation(&op);
                }
                delivered.push(op);
            }
        }
        delivered
    }

    /// Clears the set of delivered ids. A repeat of an operation delivered
    /// before this call reaches the listeners again.
    pub fn forget_seen(&self) {
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        debug!(count = seen.len(), "forgetting delivered ids");
        seen.clear();
    }

    fn accept(&self, delivery: Delivery) -> Option<Operation> {
        let subscribed = self
            .subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&delivery.queue);
        if !subscribed {
            trace!(queue = %delivery.queue, "delivery for dropped subscription");
            return None;
        }
        let op = match QueuedOperation::from_payload(&delivery.payload).and_then(|q| q.decode()) {
            Ok(op) => op,
            Err(err) => {
                warn!(queue = %delivery.queue, %err, "undecodable delivery");
                return None;
            }
        };
        if !self.seen.lock().unwrap_or_else(|e| e.into_inner()).insert(op.id.clone()) {
            trace!(id = %op.id, "duplicate delivery");
            return None;
        }
        debug!(op = %op, queue = %delivery.queue, "received");
        Some(op)
    }
}

impl<T: Transport> RecordSubscriber for OperationQueues<T> {
    fn subscribe_to_record(&self, model: &str, id: &str) -> Result<(), SyncError> {
        OperationQueues::subscribe_to_record(self, model, id)
    }

    fn subscribe_to_records(&self, model: &str, ids: &[String]) -> Result<(), SyncError> {
        OperationQueues::subscribe_to_records(self, model, ids)
    }
}
