use std::sync::Arc;

use anyhow::Result;
use prl_core::{
    build_resume_context, now_ms, PostRecord, PostRecordId, PostRecordState, ResumeContext, ResumeError, ResumeMode,
    SubmissionId,
};
use prl_storage::{LoadOptions, RecordFilter, Storage};
use tracing::{debug, info, warn};

/// Creates post records and builds the resume context for chained attempts.
#[derive(Clone)]
pub struct PostRecordFactory {
    storage: Arc<dyn Storage>,
}

impl PostRecordFactory {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// New attempt with no history. Callers pick this over `create_from_prior`
    /// when the submission has never run or its latest attempt is `DONE`.
    pub fn create_fresh(&self, submission_id: &SubmissionId) -> Result<PostRecord> {
        let record = self
            .storage
            .insert_record(PostRecord::pending(submission_id.clone(), ResumeMode::Restart, now_ms()))?;
        info!(record_id = %record.id, submission_id = %submission_id, "created fresh post record");
        Ok(record)
    }

    pub fn create_from_prior(&self, prior_post_record_id: &PostRecordId, resume_mode: ResumeMode) -> Result<PostRecord> {
        let prior = self
            .storage
            .find_record(prior_post_record_id, LoadOptions::BARE)?
            .ok_or_else(|| ResumeError::NotFound { record_id: prior_post_record_id.clone() })?;
        let record = self
            .storage
            .insert_record(PostRecord::pending(prior.submission_id.clone(), resume_mode, now_ms()))?;
        info!(
            record_id = %record.id,
            prior_record_id = %prior.id,
            submission_id = %record.submission_id,
            mode = %resume_mode,
            "created chained post record"
        );
        Ok(record)
    }

    /// Reconstruct what earlier attempts of `submission_id` already achieved.
    ///
    /// The prior record may still be `RUNNING` (crash recovery). A missing
    /// prior record only disables that branch.
    pub fn build_resume_context(
        &self,
        submission_id: &SubmissionId,
        prior_post_record_id: &PostRecordId,
        resume_mode: ResumeMode,
    ) -> Result<ResumeContext> {
        let current = self.storage.find_record(prior_post_record_id, LoadOptions::WITH_EVENTS)?;
        let build = build_resume_context(prior_post_record_id, current.as_ref(), resume_mode, || {
            self.storage
                .find_records(&RecordFilter::terminal(submission_id.clone()), LoadOptions::WITH_EVENTS)
        })?;

        debug!(
            submission_id = %submission_id,
            prior_record_id = %prior_post_record_id,
            mode = %resume_mode,
            aggregated = build.aggregated.len(),
            stop = ?build.stop,
            completed_accounts = build.context.completed_account_ids.len(),
            "built resume context"
        );
        if build.malformed_events > 0 {
            warn!(
                submission_id = %submission_id,
                skipped = build.malformed_events,
                "skipped ledger events missing account or file ids"
            );
        }
        Ok(build.context)
    }

    /// Build the resume context from the prior attempt, close the prior if it
    /// never finished, then chain a new attempt onto it.
    ///
    /// A `PENDING` or `RUNNING` prior is moved to `FAILED` so the submission
    /// keeps a single non-terminal record and the prior's events stay in the
    /// terminal history for later resumes. The context is built before that
    /// move, while a crashed prior still counts as `RUNNING`.
    pub fn resume_from_prior(
        &self,
        prior_post_record_id: &PostRecordId,
        resume_mode: ResumeMode,
    ) -> Result<(PostRecord, ResumeContext)> {
        let prior = self
            .storage
            .find_record(prior_post_record_id, LoadOptions::BARE)?
            .ok_or_else(|| ResumeError::NotFound { record_id: prior_post_record_id.clone() })?;
        let context = self.build_resume_context(&prior.submission_id, prior_post_record_id, resume_mode)?;
        if !prior.state.is_terminal() {
            warn!(record_id = %prior.id, state = %prior.state, "closing unfinished prior post record as FAILED");
            self.transition(prior_post_record_id, PostRecordState::Failed)?;
        }
        let record = self.create_from_prior(prior_post_record_id, resume_mode)?;
        Ok((record, context))
    }

    /// Move a record along `PENDING -> RUNNING -> {DONE|FAILED}`.
    pub fn transition(&self, post_record_id: &PostRecordId, next: PostRecordState) -> Result<PostRecord> {
        let record = self
            .storage
            .find_record(post_record_id, LoadOptions::BARE)?
            .ok_or_else(|| ResumeError::NotFound { record_id: post_record_id.clone() })?;
        if !record.state.can_transition_to(next) {
            return Err(ResumeError::InvalidTransition {
                record_id: post_record_id.clone(),
                from: record.state,
                to: next,
            }
            .into());
        }
        let now = now_ms();
        self.storage.update_record_state(post_record_id, next, now)?;
        info!(record_id = %post_record_id, from = %record.state, to = %next, "post record state changed");
        Ok(PostRecord {
            state: next,
            completed_at_ms: if next.is_terminal() { Some(now) } else { record.completed_at_ms },
            ..record
        })
    }
}
