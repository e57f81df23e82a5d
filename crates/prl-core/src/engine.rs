use crate::{
    context::ResumeContext,
    ids::PostRecordId,
    model::PostRecord,
    types::{PostEventType, PostRecordState, ResumeMode},
};

/// Where the walk over prior attempts stopped, and why.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// `RESTART` on a record that is not running: nothing carries forward.
    FreshRestart,
    /// `RESTART` on a running record: only that record is aggregated.
    CrashRecovery,
    /// Hit a `DONE` record; it and everything older were excluded.
    CompletedSession,
    /// Hit a `RESTART`-tagged record; it was included, everything older excluded.
    RestartBoundary,
    /// Ran out of terminal records.
    HistoryExhausted,
}

/// Result of the pure resume build, with enough detail for the shell to log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResumeBuild {
    pub context: ResumeContext,
    /// Records aggregated, newest first.
    pub aggregated: Vec<PostRecordId>,
    pub stop: StopReason,
    pub malformed_events: usize,
}

/// Walk terminal records (newest first) and collect those whose events count.
///
/// `DONE` stops before the record; a `RESTART`-tagged record stops after it.
pub fn collect_history_chain(terminal_newest_first: &[PostRecord]) -> (Vec<&PostRecord>, StopReason) {
    let mut chain = Vec::new();
    for record in terminal_newest_first {
        if record.state == PostRecordState::Done {
            return (chain, StopReason::CompletedSession);
        }
        chain.push(record);
        if record.resume_mode == ResumeMode::Restart {
            return (chain, StopReason::RestartBoundary);
        }
    }
    (chain, StopReason::HistoryExhausted)
}

/// Prepend the running record to the chain, deduplicating by id.
pub fn combine_with_current<'a>(current: Option<&'a PostRecord>, chain: Vec<&'a PostRecord>) -> Vec<&'a PostRecord> {
    match current {
        Some(cur) if cur.state == PostRecordState::Running => {
            let mut combined = Vec::with_capacity(chain.len() + 1);
            combined.push(cur);
            combined.extend(chain.into_iter().filter(|r| r.id != cur.id));
            combined
        }
        _ => chain,
    }
}

/// Fold the events of `records` into a context. Returns the context and the
/// number of events skipped for missing ids.
pub fn aggregate<'a, I>(
    prior_post_record_id: PostRecordId,
    resume_mode: ResumeMode,
    records: I,
    include_posted_files: bool,
) -> (ResumeContext, usize)
where
    I: IntoIterator<Item = &'a PostRecord>,
{
    let mut ctx = ResumeContext::empty(prior_post_record_id, resume_mode);
    let mut malformed = 0;

    for record in records {
        for ev in &record.events {
            let Some(account) = ev.account_id.as_ref() else {
                if ev.event_type.is_posted() || ev.event_type == PostEventType::PostAttemptCompleted {
                    malformed += 1;
                }
                continue;
            };

            if ev.event_type.is_posted() {
                if let Some(url) = &ev.source_url {
                    ctx.source_urls_by_account.entry(account.clone()).or_default().push(url.clone());
                }
            }

            match ev.event_type {
                PostEventType::PostAttemptCompleted => {
                    ctx.completed_account_ids.insert(account.clone());
                }
                PostEventType::FilePosted if include_posted_files => match &ev.file_id {
                    Some(file) => {
                        ctx.posted_files_by_account.entry(account.clone()).or_default().insert(file.clone());
                    }
                    None => malformed += 1,
                },
                _ => {}
            }
        }
    }

    (ctx, malformed)
}

/// Build the resume context for a new attempt.
///
/// `current` is the record being resumed from, if it exists. `load_history`
/// returns the submission's `DONE`/`FAILED` records newest first, each with
/// its events; it is only called for `CONTINUE` and `CONTINUE_RETRY`.
pub fn build_resume_context<E, F>(
    prior_post_record_id: &PostRecordId,
    current: Option<&PostRecord>,
    resume_mode: ResumeMode,
    load_history: F,
) -> Result<ResumeBuild, E>
where
    F: FnOnce() -> Result<Vec<PostRecord>, E>,
{
    let running = current.filter(|r| r.state == PostRecordState::Running);

    if resume_mode == ResumeMode::Restart {
        return Ok(match running {
            // the record's own events must not be dropped, so posted files count even here
            Some(cur) => {
                let (context, malformed_events) = aggregate(prior_post_record_id.clone(), resume_mode, [cur], true);
                ResumeBuild { context, aggregated: vec![cur.id.clone()], stop: StopReason::CrashRecovery, malformed_events }
            }
            None => ResumeBuild {
                context: ResumeContext::empty(prior_post_record_id.clone(), resume_mode),
                aggregated: vec![],
                stop: StopReason::FreshRestart,
                malformed_events: 0,
            },
        });
    }

    let history = load_history()?;
    let (chain, stop) = collect_history_chain(&history);
    let records = combine_with_current(running, chain);

    if records.is_empty() {
        return Ok(ResumeBuild {
            context: ResumeContext::empty(prior_post_record_id.clone(), resume_mode),
            aggregated: vec![],
            stop,
            malformed_events: 0,
        });
    }

    let include_posted_files = resume_mode == ResumeMode::Continue;
    let aggregated = records.iter().map(|r| r.id.clone()).collect();
    let (context, malformed_events) =
        aggregate(prior_post_record_id.clone(), resume_mode, records, include_posted_files);
    Ok(ResumeBuild { context, aggregated, stop, malformed_events })
}
