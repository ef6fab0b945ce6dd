//! Progress channel.
//!
//! A `ProgressRegistry` is created once at process start and handed to every
//! snapshot operation by reference. Observers subscribe with `subscribe` and
//! receive every event broadcast afterwards until they unsubscribe or drop
//! their receiver. Broadcasting never fails: observers whose channel has
//! closed are pruned on the next broadcast. `shutdown` drops all senders,
//! which ends every observer's stream.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Connect,
    Platform,
    Attach,
    Load,
    Snapshot,
    Transfer,
    Persist,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProgressEvent {
    Progress { stage: Stage, message: String },
    Complete { message: String },
    Error { message: String },
}

impl ProgressEvent {
    pub fn progress(stage: Stage, message: impl Into<String>) -> Self {
        ProgressEvent::Progress {
            stage,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberId(u64);

#[derive(Default)]
pub struct ProgressRegistry {
    next_id: AtomicU64,
    subscribers: Mutex<BTreeMap<SubscriberId, mpsc::UnboundedSender<ProgressEvent>>>,
}

impl ProgressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> (SubscriberId, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.add(tx);
        (id, rx)
    }

    /// Register an existing sender, e.g. one owned by a websocket task.
    pub fn add(&self, sender: mpsc::UnboundedSender<ProgressEvent>) -> SubscriberId {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.lock().insert(id, sender);
        id
    }

    pub fn remove(&self, id: SubscriberId) -> bool {
        self.subscribers.lock().remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn broadcast(&self, event: ProgressEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|id, sender| match sender.send(event.clone()) {
            Ok(()) => true,
            Err(_) => {
                tracing::debug!(subscriber = id.0, "pruning closed progress observer");
                false
            }
        });
    }

    pub fn shutdown(&self) {
        self.subscribers.lock().clear();
    }
}
