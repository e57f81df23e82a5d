use thiserror::Error;

use crate::{PostRecordId, PostRecordState};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResumeError {
    #[error("post record {record_id} not found")]
    NotFound { record_id: PostRecordId },

    #[error("post record {record_id} cannot move from {from} to {to}")]
    InvalidTransition {
        record_id: PostRecordId,
        from: PostRecordState,
        to: PostRecordState,
    },

    #[error("unknown {kind} value: {value:?}")]
    UnknownValue { kind: &'static str, value: String },
}
