use std::sync::Arc;

use dashmap::DashMap;

use crate::{errors::PushError, event_loop::Mailbox, id::next_id};

pub type WorkerId = u64;

/// Concurrent lookup from worker ids to mailboxes, so workers can address peers
/// they hold no direct handle to.
///
/// Cloning shares the same table.
pub struct Directory<E> {
    entries: Arc<DashMap<WorkerId, Mailbox<E>>>,
}

impl<E> Clone for Directory<E> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<E> Default for Directory<E> {
    fn default() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
        }
    }
}

impl<E> Directory<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `mailbox` under a fresh id.
    pub fn register(&self, mailbox: Mailbox<E>) -> WorkerId {
        let id = next_id();
        self.entries.insert(id, mailbox);
        id
    }

    pub fn unregister(&self, id: WorkerId) -> bool {
        self.entries.remove(&id).is_some()
    }

    pub fn get(&self, id: WorkerId) -> Option<Mailbox<E>> {
        self.entries.get(&id).map(|entry| entry.value().clone())
    }

    /// Pushes `event` to worker `id`, blocking while its queue is full.
    ///
    /// An unknown id is reported like a dropped queue, as `Disconnected`.
    pub fn send(&self, id: WorkerId, event: E) -> Result<(), PushError<E>> {
        // Clone out so no map shard stays locked while the push blocks.
        match self.get(id) {
            Some(mailbox) => mailbox.push(event),
            None => Err(PushError::Disconnected(event)),
        }
    }

    pub fn ids(&self) -> Vec<WorkerId> {
        self.entries.iter().map(|entry| *entry.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<E: Clone> Directory<E> {
    /// Pushes a copy of `event` to every registered worker and returns how many
    /// accepted it.
    pub fn broadcast(&self, event: E) -> usize {
        let mailboxes: Vec<Mailbox<E>> = self
            .entries
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        mailboxes
            .iter()
            .filter(|mailbox| mailbox.push(event.clone()).is_ok())
            .count()
    }
}
