use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use prl_core::{PostRecord, SubmissionId};
use prl_storage::{LoadOptions, RecordFilter, Storage};
use prl_storage_sqlite::SqliteStorage;

use crate::{Config, PostEventRepository, PostRecordFactory};

/// Store, record factory and event repository sharing one backend.
#[derive(Clone)]
pub struct Ledger {
    pub storage: Arc<dyn Storage>,
    pub records: PostRecordFactory,
    pub events: PostEventRepository,
}

impl Ledger {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            records: PostRecordFactory::new(storage.clone()),
            events: PostEventRepository::new(storage.clone()),
            storage,
        }
    }

    /// Open the SQLite ledger configured for `root`.
    pub fn open(root: &Path, cfg: &Config) -> Result<Self> {
        let storage = SqliteStorage::open(&cfg.db_path(root))?;
        Ok(Self::new(Arc::new(storage)))
    }

    /// Write the default config if missing and create the database.
    pub fn init(root: &Path) -> Result<Config> {
        let cfg = Config::load_or_init(root)?;
        let _ = SqliteStorage::open(&cfg.db_path(root))?;
        Ok(cfg)
    }

    /// Every record of a submission, newest first, with events.
    pub fn history(&self, submission_id: &SubmissionId) -> Result<Vec<PostRecord>> {
        self.storage
            .find_records(&RecordFilter::submission(submission_id.clone()), LoadOptions::WITH_EVENTS)
    }
}
