use std::sync::{Mutex, MutexGuard};

use anyhow::anyhow;
use prl_core::{EpochMs, PostEvent, PostRecord, PostRecordId, PostRecordState};

use crate::changes::{ChangeFeed, StoreChange};
use crate::traits::{EventFilter, LoadOptions, RecordFilter, Storage};

/// In-memory storage for tests. Not durable, but good for unit/small scenario tests.
#[derive(Default)]
pub struct InMemoryStorage {
    inner: Mutex<Inner>,
    changes: ChangeFeed,
}

#[derive(Default)]
struct Inner {
    // insertion order doubles as the created_at tiebreaker
    records: Vec<PostRecord>,
    events: Vec<PostEvent>,
}

impl Inner {
    fn events_for(&self, id: &PostRecordId) -> Vec<PostEvent> {
        self.events.iter().filter(|e| &e.post_record_id == id).cloned().collect()
    }

    fn load(&self, record: &PostRecord, load: LoadOptions) -> PostRecord {
        let mut r = record.clone();
        r.events = if load.with_events { self.events_for(&r.id) } else { vec![] };
        r
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| anyhow!("in-memory storage lock poisoned"))
    }
}

impl Storage for InMemoryStorage {
    fn insert_record(&self, mut record: PostRecord) -> anyhow::Result<PostRecord> {
        record.events.clear();
        self.lock()?.records.push(record.clone());
        self.changes.publish(&StoreChange::RecordInserted(record.clone()));
        Ok(record)
    }

    fn find_record(&self, id: &PostRecordId, load: LoadOptions) -> anyhow::Result<Option<PostRecord>> {
        let inner = self.lock()?;
        Ok(inner.records.iter().find(|r| &r.id == id).map(|r| inner.load(r, load)))
    }

    fn find_records(&self, filter: &RecordFilter, load: LoadOptions) -> anyhow::Result<Vec<PostRecord>> {
        let inner = self.lock()?;
        let mut matched: Vec<(usize, &PostRecord)> =
            inner.records.iter().enumerate().filter(|(_, r)| filter.matches(r)).collect();
        matched.sort_by(|(ia, a), (ib, b)| b.created_at_ms.cmp(&a.created_at_ms).then(ib.cmp(ia)));
        Ok(matched.into_iter().map(|(_, r)| inner.load(r, load)).collect())
    }

    fn update_record_state(&self, id: &PostRecordId, state: PostRecordState, now_ms: EpochMs) -> anyhow::Result<()> {
        let updated = {
            let mut inner = self.lock()?;
            match inner.records.iter_mut().find(|r| &r.id == id) {
                Some(r) => {
                    r.state = state;
                    if state.is_terminal() {
                        r.completed_at_ms = Some(now_ms);
                    }
                    true
                }
                None => false,
            }
        };
        if updated {
            self.changes.publish(&StoreChange::RecordStateChanged { id: id.clone(), state });
        }
        Ok(())
    }

    fn insert_event(&self, event: PostEvent) -> anyhow::Result<PostEvent> {
        self.lock()?.events.push(event.clone());
        self.changes.publish(&StoreChange::EventInserted(event.clone()));
        Ok(event)
    }

    fn find_events(&self, filter: &EventFilter) -> anyhow::Result<Vec<PostEvent>> {
        let inner = self.lock()?;
        Ok(inner.events.iter().filter(|e| filter.matches(e)).cloned().collect())
    }

    fn changes(&self) -> &ChangeFeed {
        &self.changes
    }
}
