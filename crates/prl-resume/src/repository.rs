use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use prl_core::{AccountId, FileId, PostEvent, PostEventType, PostRecordId};
use prl_storage::{EventFilter, Storage};

/// Typed access over the event ledger. Reads of an unknown record return empty results.
#[derive(Clone)]
pub struct PostEventRepository {
    storage: Arc<dyn Storage>,
}

impl PostEventRepository {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Events are facts, not keys: duplicates are stored as given.
    pub fn insert(&self, event: PostEvent) -> Result<PostEvent> {
        self.storage.insert_event(event)
    }

    /// Empty `event_types` returns every event of the record.
    pub fn find_by_record(&self, post_record_id: &PostRecordId, event_types: &[PostEventType]) -> Result<Vec<PostEvent>> {
        self.storage.find_events(&EventFilter::of_types(post_record_id.clone(), event_types))
    }

    /// Source urls published so far in this attempt by every account other than `exclude_account_id`.
    pub fn get_source_urls_from_post(
        &self,
        post_record_id: &PostRecordId,
        exclude_account_id: &AccountId,
    ) -> Result<Vec<String>> {
        let events = self.find_by_record(post_record_id, &PostEventType::POSTED)?;
        Ok(events
            .into_iter()
            .filter(|e| e.account_id.as_ref().is_some_and(|a| a != exclude_account_id))
            .filter_map(|e| e.source_url)
            .collect())
    }

    pub fn get_failed_events(&self, post_record_id: &PostRecordId) -> Result<Vec<PostEvent>> {
        self.find_by_record(post_record_id, &PostEventType::FAILURES)
    }

    pub fn get_completed_accounts(&self, post_record_id: &PostRecordId) -> Result<BTreeSet<AccountId>> {
        let events = self.find_by_record(post_record_id, &[PostEventType::PostAttemptCompleted])?;
        Ok(events.into_iter().filter_map(|e| e.account_id).collect())
    }

    pub fn get_posted_files(&self, post_record_id: &PostRecordId, account_id: &AccountId) -> Result<BTreeSet<FileId>> {
        let events = self.find_by_record(post_record_id, &[PostEventType::FilePosted])?;
        Ok(events
            .into_iter()
            .filter(|e| e.account_id.as_ref() == Some(account_id))
            .filter_map(|e| e.file_id)
            .collect())
    }
}
