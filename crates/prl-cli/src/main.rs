use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use prl_core::{
    now_ms, AccountId, FileId, PostEvent, PostEventError, PostEventType, PostRecordId, PostRecordState, ResumeMode,
    SubmissionId,
};
use prl_resume::{Config, Ledger};

#[derive(Parser)]
#[command(name = "prl", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Initialize the ledger in the current directory (creates .prl/, config, db)
    Init,

    /// List every attempt of a submission, newest first
    Status {
        #[arg(long)]
        submission: String,
    },

    /// Start a fresh attempt with no history
    RecordNew {
        #[arg(long)]
        submission: String,
    },

    /// Start an attempt chained from a prior one and print its resume context
    RecordResume {
        #[arg(long)]
        prior: String,
        #[arg(long, default_value = "CONTINUE")]
        mode: ResumeMode,
    },

    /// Move an attempt to RUNNING, DONE or FAILED
    RecordState {
        #[arg(long)]
        record: String,
        #[arg(long)]
        state: PostRecordState,
    },

    /// Append an event to an attempt
    EventAdd {
        #[arg(long)]
        record: String,
        #[arg(long = "type")]
        event_type: PostEventType,
        #[arg(long)]
        account: Option<String>,
        #[arg(long)]
        file: Option<String>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        error: Option<String>,
    },

    /// Print the resume context a new attempt would get, without creating one
    Context {
        #[arg(long)]
        submission: String,
        #[arg(long)]
        prior: String,
        #[arg(long, default_value = "CONTINUE")]
        mode: ResumeMode,
    },

    /// List failure events of an attempt
    Failures {
        #[arg(long)]
        record: String,
    },

    /// Source urls published in an attempt, optionally excluding one account
    SourceUrls {
        #[arg(long)]
        record: String,
        #[arg(long)]
        exclude_account: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    let root = std::env::current_dir()?;
    let cli = Cli::parse();

    let cfg = match cli.cmd {
        Command::Init => Ledger::init(&root)?,
        _ => Config::load_or_init(&root)?,
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.logging.filter));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    if matches!(cli.cmd, Command::Init) {
        println!("Initialized ledger at {}", cfg.db_path(&root).display());
        return Ok(());
    }
    let ledger = Ledger::open(&root, &cfg)?;

    match cli.cmd {
        Command::Init => {}
        Command::Status { submission } => {
            let records = ledger.history(&SubmissionId::from_str(submission))?;
            println!("Attempts: {}", records.len());
            for r in records {
                println!(
                    "- {} [{}] mode={} created_at={} events={}",
                    r.id,
                    r.state,
                    r.resume_mode,
                    r.created_at_ms,
                    r.events.len()
                );
            }
        }
        Command::RecordNew { submission } => {
            let r = ledger.records.create_fresh(&SubmissionId::from_str(submission))?;
            println!("{}", r.id);
        }
        Command::RecordResume { prior, mode } => {
            let (r, ctx) = ledger.records.resume_from_prior(&PostRecordId::from_str(prior), mode)?;
            println!("{}", r.id);
            println!("{}", serde_json::to_string_pretty(&ctx)?);
        }
        Command::RecordState { record, state } => {
            let r = ledger.records.transition(&PostRecordId::from_str(record), state)?;
            println!("{} -> {}", r.id, r.state);
        }
        Command::EventAdd { record, event_type, account, file, url, error } => {
            let mut ev = PostEvent::new(PostRecordId::from_str(record), event_type, now_ms());
            ev.account_id = account.map(AccountId::from_str);
            ev.file_id = file.map(FileId::from_str);
            ev.source_url = url;
            ev.error = error.map(PostEventError::new);
            let ev = ledger.events.insert(ev)?;
            println!("{}", ev.id);
        }
        Command::Context { submission, prior, mode } => {
            let ctx = ledger.records.build_resume_context(
                &SubmissionId::from_str(submission),
                &PostRecordId::from_str(prior),
                mode,
            )?;
            println!("{}", serde_json::to_string_pretty(&ctx)?);
        }
        Command::Failures { record } => {
            for ev in ledger.events.get_failed_events(&PostRecordId::from_str(record))? {
                let account = ev.account_id.as_ref().map_or("-", |a| a.as_str());
                let message = ev.error.as_ref().map_or("", |e| e.message.as_str());
                println!("{} {} {}", ev.event_type, account, message);
            }
        }
        Command::SourceUrls { record, exclude_account } => {
            let record = PostRecordId::from_str(record);
            let urls = match exclude_account {
                Some(a) => ledger.events.get_source_urls_from_post(&record, &AccountId::from_str(a))?,
                None => ledger
                    .events
                    .find_by_record(&record, &PostEventType::POSTED)?
                    .into_iter()
                    .filter(|e| e.account_id.is_some())
                    .filter_map(|e| e.source_url)
                    .collect(),
            };
            for url in urls {
                println!("{}", url);
            }
        }
    }

    Ok(())
}
