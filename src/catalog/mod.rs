//! Typed accessors over the persistent catalog: storage targets, files,
//! scans, change events, and checkpoints.
//!
//! The catalog handle is shared across every concurrently running scan, so
//! it is pool-backed (`r2d2` + `r2d2_sqlite`) rather than a single
//! `rusqlite::Connection` behind a mutex.

pub mod checkpoints;
pub mod events;
pub mod files;
pub mod schema;
pub mod scans;
pub mod targets;

use std::path::Path;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;

use crate::error::{CatalogError, FixityError};

#[derive(Clone)]
pub struct Catalog {
    pool: Pool<SqliteConnectionManager>,
}

impl Catalog {
    /// Opens the catalog at `path` and verifies its schema version. Does
    /// not create or migrate the schema — that is the responsibility of an
    /// external migration tool that runs before this crate starts.
    pub fn open(path: &Path) -> Result<Self, FixityError> {
        let manager = schema::connection_manager(path);
        let pool = Pool::new(manager).map_err(|e| FixityError::from(CatalogError::from(e)))?;
        let catalog = Catalog { pool };
        catalog.check_schema_version()?;
        Ok(catalog)
    }

    /// Opens an in-memory catalog with the schema already created. Only
    /// meant for tests: production callers rely on an external migrator.
    pub fn open_in_memory_for_tests() -> Result<Self, FixityError> {
        let manager = schema::in_memory_connection_manager();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| FixityError::from(CatalogError::from(e)))?;
        let catalog = Catalog { pool };
        catalog.bootstrap_schema_for_tests()?;
        Ok(catalog)
    }

    pub(crate) fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, FixityError> {
        self.pool
            .get()
            .map_err(|e| FixityError::from(CatalogError::from(e)))
    }

    fn check_schema_version(&self) -> Result<(), FixityError> {
        let conn = self.conn()?;
        let found: i64 = conn
            .query_row("SELECT version FROM schema_version", [], |row| row.get(0))
            .map_err(|e| FixityError::from(CatalogError::from(e)))?;
        if found != schema::CURRENT_SCHEMA_VERSION {
            return Err(FixityError::SchemaMismatch {
                found,
                expected: schema::CURRENT_SCHEMA_VERSION,
            });
        }
        Ok(())
    }

    fn bootstrap_schema_for_tests(&self) -> Result<(), FixityError> {
        let conn = self.conn()?;
        conn.execute_batch(schema::SCHEMA)
            .map_err(|e| FixityError::from(CatalogError::from(e)))?;
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [schema::CURRENT_SCHEMA_VERSION],
        )
        .map_err(|e| FixityError::from(CatalogError::from(e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_catalog_reports_current_schema_version() {
        let catalog = Catalog::open_in_memory_for_tests().unwrap();
        catalog.check_schema_version().unwrap();
    }
}
