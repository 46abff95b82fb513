use chrono::{NaiveDateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::coordinator::{self, SlotOutcome};
use crate::error::IngestError;
use crate::fetcher::Fetcher;
use crate::loader::{FileLoadOutcome, Loader};
use crate::source::PageviewSource;
use crate::store::LocalStore;
use crate::warehouse::{Connector, WarehouseSession};
use crate::window::{SelectionMode, TimeSelection};

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub mode: SelectionMode,
    pub slots: Vec<SlotOutcome>,
    pub files: Vec<FileLoadOutcome>,
    pub rows_loaded: usize,
    pub rows_rejected: usize,
}

/// Owns the open session and closes it exactly once, on every exit path.
struct SessionGuard {
    session: Box<dyn WarehouseSession>,
    released: bool,
}

impl SessionGuard {
    fn new(session: Box<dyn WarehouseSession>) -> Self {
        Self {
            session,
            released: false,
        }
    }

    fn session(&mut self) -> &mut dyn WarehouseSession {
        self.session.as_mut()
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match self.session.close() {
            Ok(()) => info!("warehouse connection closed"),
            Err(err) => warn!("closing warehouse connection failed: {err}"),
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Resolve, fetch, connect, set up, load.
pub struct Workflow<S: PageviewSource, C: Connector> {
    settings: Settings,
    fetcher: Fetcher<S>,
    connector: C,
}

impl<S: PageviewSource, C: Connector> Workflow<S, C> {
    pub fn new(settings: Settings, source: S, connector: C) -> Self {
        let store = LocalStore::new(settings.data_dir.clone());
        let fetcher = Fetcher::new(source, store, settings.base_url.clone());
        Self {
            settings,
            fetcher,
            connector,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &LocalStore {
        self.fetcher.store()
    }

    pub fn run(&self, selection: TimeSelection) -> Result<RunReport, IngestError> {
        self.run_at(selection, Utc::now().naive_utc())
    }

    /// Like [`Workflow::run`] with an explicit "now" for the current-hour mode.
    pub fn run_at(
        &self,
        selection: TimeSelection,
        now: NaiveDateTime,
    ) -> Result<RunReport, IngestError> {
        self.execute(selection, now).inspect_err(|err| {
            error!(stage = err.stage(), "aborting run: {err}");
        })
    }

    fn execute(
        &self,
        selection: TimeSelection,
        now: NaiveDateTime,
    ) -> Result<RunReport, IngestError> {
        let slots = selection.resolve(now)?;
        let outcomes = if selection.is_single_hour() {
            let slot = slots[0];
            info!(slot = %slot, "processing single hour");
            let fetched = self.fetcher.process(slot);
            if !fetched {
                return Err(IngestError::TargetHourUnavailable(slot.to_string()));
            }
            vec![SlotOutcome { slot, fetched }]
        } else {
            coordinator::download_all(&self.fetcher, &slots, self.settings.max_workers)?
        };

        let warehouse = &self.settings.warehouse;
        warehouse.validate()?;
        let session = self.connector.connect(warehouse)?;
        info!(account = %warehouse.account, "connected to warehouse");
        let mut guard = SessionGuard::new(session);

        let files = {
            let mut loader = Loader::new(guard.session(), warehouse.schema.clone());
            loader.try_ensure_objects(
                &warehouse.schema,
                &self.settings.stage_name,
                &self.settings.table_name,
            )?;
            loader.load_directory(
                self.fetcher.store(),
                &self.settings.stage_name,
                &self.settings.table_name,
            )?
        };
        guard.release();

        Ok(RunReport {
            mode: selection.mode(),
            rows_loaded: files.iter().map(|file| file.rows_loaded).sum(),
            rows_rejected: files.iter().map(|file| file.rows_rejected).sum(),
            slots: outcomes,
            files,
        })
    }
}
