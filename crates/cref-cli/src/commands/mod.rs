use cref_core::config::Config;
use cref_db::Database;

pub mod datasets;
pub mod executions;
pub mod providers;
pub mod solve;

pub struct AppContext {
    pub config: Config,
    pub db: Database,
}

impl AppContext {
    pub fn new(config: Config) -> crate::error::Result<Self> {
        let db = Database::open(&config.database_path())?;
        Ok(Self { config, db })
    }
}
