use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use prl_core::{PostEvent, PostRecord, PostRecordId, PostRecordState};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityKind {
    PostRecord,
    PostEvent,
}

#[derive(Clone, Debug, PartialEq)]
pub enum StoreChange {
    RecordInserted(PostRecord),
    RecordStateChanged { id: PostRecordId, state: PostRecordState },
    EventInserted(PostEvent),
}

impl StoreChange {
    pub fn kind(&self) -> EntityKind {
        match self {
            StoreChange::RecordInserted(_) | StoreChange::RecordStateChanged { .. } => EntityKind::PostRecord,
            StoreChange::EventInserted(_) => EntityKind::PostEvent,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&StoreChange) + Send + Sync>;

/// Store-owned publish/subscribe, keyed by entity kind.
///
/// Callbacks run synchronously on the writing thread after the write has
/// landed, outside any store lock.
#[derive(Default)]
pub struct ChangeFeed {
    next_id: AtomicU64,
    subscribers: RwLock<HashMap<EntityKind, Vec<(SubscriptionId, Callback)>>>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, kind: EntityKind, callback: F) -> SubscriptionId
    where
        F: Fn(&StoreChange) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut subs = self.subscribers.write().unwrap_or_else(PoisonError::into_inner);
        subs.entry(kind).or_default().push((id, Arc::new(callback)));
        id
    }

    /// Returns false if the subscription was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscribers.write().unwrap_or_else(PoisonError::into_inner);
        let mut removed = false;
        for list in subs.values_mut() {
            let before = list.len();
            list.retain(|(sid, _)| *sid != id);
            removed |= list.len() != before;
        }
        removed
    }

    pub fn subscriber_count(&self, kind: EntityKind) -> usize {
        let subs = self.subscribers.read().unwrap_or_else(PoisonError::into_inner);
        subs.get(&kind).map_or(0, Vec::len)
    }

    pub fn publish(&self, change: &StoreChange) {
        // snapshot so a callback may subscribe or unsubscribe without deadlocking
        let callbacks: Vec<Callback> = {
            let subs = self.subscribers.read().unwrap_or_else(PoisonError::into_inner);
            match subs.get(&change.kind()) {
                Some(list) => list.iter().map(|(_, cb)| cb.clone()).collect(),
                None => return,
            }
        };
        for cb in callbacks {
            cb(change);
        }
    }
}
