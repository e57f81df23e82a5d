use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ResumeError;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PostRecordState {
    Pending,
    Running,
    Done,
    Failed,
}

impl PostRecordState {
    pub const TERMINAL: [PostRecordState; 2] = [PostRecordState::Done, PostRecordState::Failed];

    pub fn as_str(&self) -> &'static str {
        match self {
            PostRecordState::Pending => "PENDING",
            PostRecordState::Running => "RUNNING",
            PostRecordState::Done => "DONE",
            PostRecordState::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PostRecordState::Done | PostRecordState::Failed)
    }

    /// `PENDING -> RUNNING -> {DONE|FAILED}`; a pending attempt may also fail before it starts.
    pub fn can_transition_to(&self, next: PostRecordState) -> bool {
        use PostRecordState::*;
        matches!(
            (self, next),
            (Pending, Running) | (Pending, Failed) | (Running, Done) | (Running, Failed)
        )
    }
}

impl fmt::Display for PostRecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PostRecordState {
    type Err = ResumeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(PostRecordState::Pending),
            "RUNNING" => Ok(PostRecordState::Running),
            "DONE" => Ok(PostRecordState::Done),
            "FAILED" => Ok(PostRecordState::Failed),
            _ => Err(ResumeError::UnknownValue { kind: "post record state", value: s.to_string() }),
        }
    }
}

/// Policy a record was created under. Later resumes read the record's events through it.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResumeMode {
    /// Ignore history, except crash recovery of the record being resumed.
    Restart,
    /// Skip completed accounts and files that were already posted.
    Continue,
    /// Skip completed accounts only; everything else is retried in full.
    ContinueRetry,
}

impl ResumeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResumeMode::Restart => "RESTART",
            ResumeMode::Continue => "CONTINUE",
            ResumeMode::ContinueRetry => "CONTINUE_RETRY",
        }
    }
}

impl fmt::Display for ResumeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResumeMode {
    type Err = ResumeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "RESTART" => Ok(ResumeMode::Restart),
            "CONTINUE" => Ok(ResumeMode::Continue),
            "CONTINUE_RETRY" => Ok(ResumeMode::ContinueRetry),
            _ => Err(ResumeError::UnknownValue { kind: "resume mode", value: s.to_string() }),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PostEventType {
    PostAttemptStarted,
    PostAttemptCompleted,
    PostAttemptFailed,
    FilePosted,
    FileFailed,
    MessagePosted,
    MessageFailed,
}

impl PostEventType {
    pub const POSTED: [PostEventType; 2] = [PostEventType::FilePosted, PostEventType::MessagePosted];
    pub const FAILURES: [PostEventType; 3] = [
        PostEventType::PostAttemptFailed,
        PostEventType::FileFailed,
        PostEventType::MessageFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PostEventType::PostAttemptStarted => "POST_ATTEMPT_STARTED",
            PostEventType::PostAttemptCompleted => "POST_ATTEMPT_COMPLETED",
            PostEventType::PostAttemptFailed => "POST_ATTEMPT_FAILED",
            PostEventType::FilePosted => "FILE_POSTED",
            PostEventType::FileFailed => "FILE_FAILED",
            PostEventType::MessagePosted => "MESSAGE_POSTED",
            PostEventType::MessageFailed => "MESSAGE_FAILED",
        }
    }

    /// Successful publish events, the only ones that carry a source url.
    pub fn is_posted(&self) -> bool {
        Self::POSTED.contains(self)
    }

    pub fn is_failure(&self) -> bool {
        Self::FAILURES.contains(self)
    }
}

impl fmt::Display for PostEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PostEventType {
    type Err = ResumeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "POST_ATTEMPT_STARTED" => Ok(PostEventType::PostAttemptStarted),
            "POST_ATTEMPT_COMPLETED" => Ok(PostEventType::PostAttemptCompleted),
            "POST_ATTEMPT_FAILED" => Ok(PostEventType::PostAttemptFailed),
            "FILE_POSTED" => Ok(PostEventType::FilePosted),
            "FILE_FAILED" => Ok(PostEventType::FileFailed),
            "MESSAGE_POSTED" => Ok(PostEventType::MessagePosted),
            "MESSAGE_FAILED" => Ok(PostEventType::MessageFailed),
            _ => Err(ResumeError::UnknownValue { kind: "post event type", value: s.to_string() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_documented_transitions_are_allowed() {
        use PostRecordState::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Pending.can_transition_to(Failed));
        assert!(Running.can_transition_to(Done));
        assert!(Running.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Done));
        assert!(!Done.can_transition_to(Running));
        assert!(!Failed.can_transition_to(Running));
        assert!(!Running.can_transition_to(Pending));
    }

    #[test]
    fn persisted_names_parse_back() {
        assert_eq!("CONTINUE_RETRY".parse::<ResumeMode>().unwrap(), ResumeMode::ContinueRetry);
        assert_eq!("continue-retry".parse::<ResumeMode>().unwrap(), ResumeMode::ContinueRetry);
        assert_eq!("FILE_POSTED".parse::<PostEventType>().unwrap(), PostEventType::FilePosted);
        assert_eq!("running".parse::<PostRecordState>().unwrap(), PostRecordState::Running);
        assert!(matches!(
            "SOMETIMES".parse::<ResumeMode>(),
            Err(ResumeError::UnknownValue { kind: "resume mode", .. })
        ));
    }

    #[test]
    fn serde_uses_screaming_snake_names() {
        let s = serde_json::to_string(&PostEventType::PostAttemptCompleted).unwrap();
        assert_eq!(s, "\"POST_ATTEMPT_COMPLETED\"");
        let m: ResumeMode = serde_json::from_str("\"CONTINUE_RETRY\"").unwrap();
        assert_eq!(m, ResumeMode::ContinueRetry);
    }
}
