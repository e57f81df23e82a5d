use serde::{Deserialize, Serialize};

use crate::{ids::*, time::EpochMs, types::*};

/// One attempt to dispatch a submission to a set of accounts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PostRecord {
    pub id: PostRecordId,
    pub submission_id: SubmissionId,
    pub state: PostRecordState,
    pub resume_mode: ResumeMode,
    pub created_at_ms: EpochMs,
    pub completed_at_ms: Option<EpochMs>,
    /// Empty unless the record was loaded with its events.
    #[serde(default)]
    pub events: Vec<PostEvent>,
}

impl PostRecord {
    pub fn pending(submission_id: SubmissionId, resume_mode: ResumeMode, created_at_ms: EpochMs) -> Self {
        Self {
            id: PostRecordId::new(),
            submission_id,
            state: PostRecordState::Pending,
            resume_mode,
            created_at_ms,
            completed_at_ms: None,
            events: vec![],
        }
    }
}

/// Failure detail attached to `*_FAILED` events.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostEventError {
    pub message: String,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub retryable: bool,
}

impl PostEventError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), stage: None, retryable: false }
    }
}

/// One immutable fact appended to the ledger during an attempt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PostEvent {
    pub id: PostEventId,
    pub post_record_id: PostRecordId,
    pub event_type: PostEventType,
    /// Absent for record-level events.
    pub account_id: Option<AccountId>,
    /// Present only for per-file events.
    pub file_id: Option<FileId>,
    /// Present for successful publish events.
    pub source_url: Option<String>,
    #[serde(default)]
    pub error: Option<PostEventError>,
    /// Opaque to the engine.
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    pub created_at_ms: EpochMs,
}

impl PostEvent {
    pub fn new(post_record_id: PostRecordId, event_type: PostEventType, created_at_ms: EpochMs) -> Self {
        Self {
            id: PostEventId::new(),
            post_record_id,
            event_type,
            account_id: None,
            file_id: None,
            source_url: None,
            error: None,
            metadata: None,
            created_at_ms,
        }
    }

    pub fn attempt_started(record: &PostRecordId, account: &AccountId, at: EpochMs) -> Self {
        Self::new(record.clone(), PostEventType::PostAttemptStarted, at).with_account(account.clone())
    }

    pub fn attempt_completed(record: &PostRecordId, account: &AccountId, at: EpochMs) -> Self {
        Self::new(record.clone(), PostEventType::PostAttemptCompleted, at).with_account(account.clone())
    }

    pub fn attempt_failed(record: &PostRecordId, account: &AccountId, error: PostEventError, at: EpochMs) -> Self {
        Self::new(record.clone(), PostEventType::PostAttemptFailed, at)
            .with_account(account.clone())
            .with_error(error)
    }

    pub fn file_posted(
        record: &PostRecordId,
        account: &AccountId,
        file: &FileId,
        source_url: Option<String>,
        at: EpochMs,
    ) -> Self {
        let mut ev = Self::new(record.clone(), PostEventType::FilePosted, at)
            .with_account(account.clone())
            .with_file(file.clone());
        ev.source_url = source_url;
        ev
    }

    pub fn file_failed(record: &PostRecordId, account: &AccountId, file: &FileId, error: PostEventError, at: EpochMs) -> Self {
        Self::new(record.clone(), PostEventType::FileFailed, at)
            .with_account(account.clone())
            .with_file(file.clone())
            .with_error(error)
    }

    pub fn message_posted(record: &PostRecordId, account: &AccountId, source_url: Option<String>, at: EpochMs) -> Self {
        let mut ev = Self::new(record.clone(), PostEventType::MessagePosted, at).with_account(account.clone());
        ev.source_url = source_url;
        ev
    }

    pub fn message_failed(record: &PostRecordId, account: &AccountId, error: PostEventError, at: EpochMs) -> Self {
        Self::new(record.clone(), PostEventType::MessageFailed, at)
            .with_account(account.clone())
            .with_error(error)
    }

    pub fn with_account(mut self, account: AccountId) -> Self {
        self.account_id = Some(account);
        self
    }

    pub fn with_file(mut self, file: FileId) -> Self {
        self.file_id = Some(file);
        self
    }

    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }

    pub fn with_error(mut self, error: PostEventError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}
