use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::info;

use crate::analyzer::SeoAnalyzer;
use crate::client::{ApiClient, Completer};
use crate::config::{Settings, SqliteOptions};
use crate::db;
use crate::store::AnalysisStore;

/// Composition root: owns the connection and every long-lived component.
pub struct Toolkit {
    pub conn: Connection,
    pub settings: Settings,
    pub store: AnalysisStore,
    pub analyzer: SeoAnalyzer,
    pub client: Box<dyn Completer>,
    injected_client: bool,
}

impl Toolkit {
    /// Opens the on-disk database and builds the HTTP client from settings.
    pub fn open() -> Result<Toolkit> {
        let conn = db::connect()?;
        let settings = Settings::load(&SqliteOptions::new(&conn))?;
        let client = ApiClient::from_settings(&settings).context("Failed to create HTTP client")?;
        info!(db = ?db::path(), model = %settings.model, "toolkit ready");
        Ok(Self::assemble(conn, settings, Box::new(client), false))
    }

    /// Uses the given connection and completer as-is (tests, embedding).
    pub fn with_client(conn: Connection, client: Box<dyn Completer>) -> Result<Toolkit> {
        db::init_schema(&conn)?;
        let settings = Settings::load(&SqliteOptions::new(&conn))?;
        Ok(Self::assemble(conn, settings, client, true))
    }

    fn assemble(
        conn: Connection,
        settings: Settings,
        client: Box<dyn Completer>,
        injected_client: bool,
    ) -> Toolkit {
        Toolkit {
            store: AnalysisStore::new(Duration::from_secs(settings.cache_ttl)),
            analyzer: SeoAnalyzer::new(&settings.site_url, settings.store_raw_response),
            conn,
            settings,
            client,
            injected_client,
        }
    }

    pub fn options(&self) -> SqliteOptions<'_> {
        SqliteOptions::new(&self.conn)
    }

    /// Re-reads settings after an option changed.
    pub fn reload_settings(&mut self) -> Result<()> {
        let settings = Settings::load(&self.options())?;
        self.analyzer = SeoAnalyzer::new(&settings.site_url, settings.store_raw_response);
        if !self.injected_client {
            self.client = Box::new(ApiClient::from_settings(&settings)?);
        }
        self.settings = settings;
        Ok(())
    }

    pub fn batch_ceiling(&self) -> Option<Duration> {
        match self.settings.batch_time_limit {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}
