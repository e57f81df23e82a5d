use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::{ids::*, types::ResumeMode};

/// In-memory reconstruction of prior progress for one new attempt.
///
/// Built fresh on every resume and never persisted. Maps are ordered by
/// account id so iteration is stable for the lifetime of the context.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ResumeContext {
    pub prior_post_record_id: PostRecordId,
    /// Mode of the record being created, not of the records aggregated.
    pub resume_mode: ResumeMode,
    pub completed_account_ids: BTreeSet<AccountId>,
    pub posted_files_by_account: BTreeMap<AccountId, BTreeSet<FileId>>,
    pub source_urls_by_account: BTreeMap<AccountId, Vec<String>>,
}

impl ResumeContext {
    pub fn empty(prior_post_record_id: PostRecordId, resume_mode: ResumeMode) -> Self {
        Self {
            prior_post_record_id,
            resume_mode,
            completed_account_ids: BTreeSet::new(),
            posted_files_by_account: BTreeMap::new(),
            source_urls_by_account: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.completed_account_ids.is_empty()
            && self.posted_files_by_account.is_empty()
            && self.source_urls_by_account.is_empty()
    }

    pub fn should_skip_account(&self, account_id: &AccountId) -> bool {
        self.completed_account_ids.contains(account_id)
    }

    pub fn should_skip_file(&self, account_id: &AccountId, file_id: &FileId) -> bool {
        match self.resume_mode {
            ResumeMode::Restart => false,
            // completed accounts are already skipped wholesale; the rest retry every file
            ResumeMode::ContinueRetry => false,
            ResumeMode::Continue => self
                .posted_files_by_account
                .get(account_id)
                .is_some_and(|files| files.contains(file_id)),
        }
    }

    pub fn source_urls_for_account(&self, account_id: &AccountId) -> Vec<String> {
        self.source_urls_by_account.get(account_id).cloned().unwrap_or_default()
    }

    pub fn all_source_urls(&self) -> Vec<String> {
        self.source_urls_by_account.values().flatten().cloned().collect()
    }

    /// Urls from every other account, so an account never links back to its own prior post.
    pub fn source_urls_excluding_account(&self, exclude_account_id: &AccountId) -> Vec<String> {
        self.source_urls_by_account
            .iter()
            .filter(|(account, _)| *account != exclude_account_id)
            .flat_map(|(_, urls)| urls.iter().cloned())
            .collect()
    }
}
