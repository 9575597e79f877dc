//! SeaORM-based database access
//!
//! The gateway persists its metadata (services, providers, models, version
//! record) in a single SQLite file under the root directory. All access goes
//! through the repositories in [`repositories`], which implement the
//! persistence port semantics.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sea_orm::{ConnectOptions, Database as SeaOrmDatabase, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use tracing::info;

pub mod migrations;
pub mod repositories;

use migrations::Migrator;

/// Database connection manager.
#[derive(Clone)]
pub struct Database {
    pub connection: Arc<DatabaseConnection>,
}

impl Database {
    /// Open (creating if necessary) the SQLite database at `url`.
    ///
    /// `sqlite::memory:` is accepted for tests.
    pub async fn new(url: &str) -> Result<Self> {
        let connection_url = Self::ensure_sqlite_auto_creation(url);

        let mut connect_options = ConnectOptions::new(&connection_url);
        connect_options
            .max_connections(10)
            .min_connections(1)
            .connect_timeout(Duration::from_secs(5))
            .acquire_timeout(Duration::from_secs(3))
            .sqlx_logging(false);

        let connection = SeaOrmDatabase::connect(connect_options)
            .await
            .with_context(|| format!("failed to open database at {connection_url}"))?;

        info!("database connection established");
        Ok(Self {
            connection: Arc::new(connection),
        })
    }

    /// Apply pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        Migrator::up(self.connection.as_ref(), None)
            .await
            .context("database migration failed")?;
        Ok(())
    }

    pub fn connection(&self) -> Arc<DatabaseConnection> {
        self.connection.clone()
    }

    /// SQLite only creates the backing file when `mode=rwc` is requested.
    fn ensure_sqlite_auto_creation(url: &str) -> String {
        if url.starts_with("sqlite:")
            && !url.contains(":memory:")
            && !url.contains("mode=")
        {
            let sep = if url.contains('?') { '&' } else { '?' };
            format!("{url}{sep}mode=rwc")
        } else {
            url.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_file_urls_gain_create_mode() {
        assert_eq!(
            Database::ensure_sqlite_auto_creation("sqlite://./aog.db"),
            "sqlite://./aog.db?mode=rwc"
        );
        assert_eq!(
            Database::ensure_sqlite_auto_creation("sqlite::memory:"),
            "sqlite::memory:"
        );
    }

    #[tokio::test]
    async fn in_memory_database_migrates() {
        let db = Database::new("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
    }
}
