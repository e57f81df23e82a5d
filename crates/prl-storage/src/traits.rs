use prl_core::{EpochMs, PostEvent, PostEventType, PostRecord, PostRecordId, PostRecordState, SubmissionId};

use crate::changes::ChangeFeed;

/// Which relations to load alongside a record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoadOptions {
    pub with_events: bool,
}

impl LoadOptions {
    pub const BARE: LoadOptions = LoadOptions { with_events: false };
    pub const WITH_EVENTS: LoadOptions = LoadOptions { with_events: true };
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordFilter {
    pub submission_id: SubmissionId,
    /// Empty matches every state.
    pub states: Vec<PostRecordState>,
}

impl RecordFilter {
    pub fn submission(submission_id: SubmissionId) -> Self {
        Self { submission_id, states: vec![] }
    }

    /// `DONE` and `FAILED` records of one submission.
    pub fn terminal(submission_id: SubmissionId) -> Self {
        Self { submission_id, states: PostRecordState::TERMINAL.to_vec() }
    }

    pub fn matches(&self, record: &PostRecord) -> bool {
        record.submission_id == self.submission_id && (self.states.is_empty() || self.states.contains(&record.state))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventFilter {
    pub post_record_id: PostRecordId,
    /// Empty matches every type.
    pub event_types: Vec<PostEventType>,
}

impl EventFilter {
    pub fn record(post_record_id: PostRecordId) -> Self {
        Self { post_record_id, event_types: vec![] }
    }

    pub fn of_types(post_record_id: PostRecordId, event_types: &[PostEventType]) -> Self {
        Self { post_record_id, event_types: event_types.to_vec() }
    }

    pub fn matches(&self, event: &PostEvent) -> bool {
        event.post_record_id == self.post_record_id
            && (self.event_types.is_empty() || self.event_types.contains(&event.event_type))
    }
}

/// Record and event store the resume engine reads from.
///
/// Events are append-only. Records change only through `update_record_state`.
pub trait Storage: Send + Sync {
    /// Persist a record. Any events on the value are ignored; events are appended separately.
    fn insert_record(&self, record: PostRecord) -> anyhow::Result<PostRecord>;
    fn find_record(&self, id: &PostRecordId, load: LoadOptions) -> anyhow::Result<Option<PostRecord>>;
    /// Newest first by `created_at_ms`; records created in the same millisecond keep insertion order reversed.
    fn find_records(&self, filter: &RecordFilter, load: LoadOptions) -> anyhow::Result<Vec<PostRecord>>;
    /// Sets `completed_at_ms` when `state` is terminal. Unknown ids are a no-op.
    fn update_record_state(&self, id: &PostRecordId, state: PostRecordState, now_ms: EpochMs) -> anyhow::Result<()>;

    fn insert_event(&self, event: PostEvent) -> anyhow::Result<PostEvent>;
    /// In insertion order.
    fn find_events(&self, filter: &EventFilter) -> anyhow::Result<Vec<PostEvent>>;

    fn changes(&self) -> &ChangeFeed;
}
