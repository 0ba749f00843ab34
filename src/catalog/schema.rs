//! Catalog schema and connection setup.
//!
//! `WAL` journaling and `synchronous = NORMAL` favor throughput over durable
//! guarantees on every write; `foreign_keys = ON` is required because the
//! schema relies on `ON DELETE CASCADE` for `scans`/`change_events` cleanup
//! when a target is removed, which SQLite only enforces per connection when
//! that pragma is set.

use r2d2_sqlite::SqliteConnectionManager;

pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// Full schema, including tables the core never reads or writes
/// (`users`, `sessions`, `webhooks`, `webhook_deliveries`, `config`) that
/// exist so the excluded HTTP/session/webhook layers share this catalog
/// without a second migration path.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS storage_targets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    kind TEXT NOT NULL CHECK (kind IN ('local','nfs','smb')),
    root_path TEXT NOT NULL,
    server TEXT,
    share TEXT,
    credential_ref TEXT,
    enabled INTEGER NOT NULL DEFAULT 1,
    parallel_workers INTEGER NOT NULL DEFAULT 4,
    random_sample_percent INTEGER NOT NULL DEFAULT 5,
    checksum_algorithm TEXT NOT NULL DEFAULT 'blake3',
    checkpoint_interval INTEGER NOT NULL DEFAULT 500,
    batch_size INTEGER NOT NULL DEFAULT 500,
    large_change_threshold_count INTEGER,
    large_change_threshold_percent REAL,
    large_change_threshold_bytes INTEGER,
    schedule_cron TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    storage_target_id INTEGER NOT NULL REFERENCES storage_targets(id) ON DELETE CASCADE,
    path TEXT NOT NULL,
    size INTEGER NOT NULL,
    mtime INTEGER NOT NULL,
    first_seen INTEGER NOT NULL,
    last_seen INTEGER NOT NULL,
    current_checksum TEXT,
    checksum_type TEXT,
    last_checksummed_at INTEGER,
    deleted_at INTEGER,
    UNIQUE(storage_target_id, path)
);
CREATE INDEX IF NOT EXISTS idx_files_target_path ON files(storage_target_id, path);
CREATE INDEX IF NOT EXISTS idx_files_sampling ON files(storage_target_id, last_checksummed_at);
CREATE INDEX IF NOT EXISTS idx_files_last_seen ON files(storage_target_id, last_seen);

CREATE TABLE IF NOT EXISTS scans (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    storage_target_id INTEGER NOT NULL REFERENCES storage_targets(id) ON DELETE CASCADE,
    status TEXT NOT NULL CHECK (status IN ('pending','running','completed','failed','partial')),
    files_scanned INTEGER NOT NULL DEFAULT 0,
    files_added INTEGER NOT NULL DEFAULT 0,
    files_deleted INTEGER NOT NULL DEFAULT 0,
    files_modified INTEGER NOT NULL DEFAULT 0,
    files_verified INTEGER NOT NULL DEFAULT 0,
    errors_count INTEGER NOT NULL DEFAULT 0,
    deleted_or_modified_old_bytes INTEGER NOT NULL DEFAULT 0,
    error_messages TEXT NOT NULL DEFAULT '[]',
    is_large_change INTEGER NOT NULL DEFAULT 0,
    resumed_from INTEGER REFERENCES scans(id),
    started_at INTEGER NOT NULL,
    completed_at INTEGER
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_one_running_scan_per_target
    ON scans(storage_target_id) WHERE status = 'running';
CREATE INDEX IF NOT EXISTS idx_scans_target_started ON scans(storage_target_id, started_at);

CREATE TABLE IF NOT EXISTS change_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    scan_id INTEGER NOT NULL REFERENCES scans(id) ON DELETE CASCADE,
    file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
    path TEXT NOT NULL,
    event_type TEXT NOT NULL CHECK (event_type IN ('added','deleted','modified','verified')),
    old_checksum TEXT,
    new_checksum TEXT,
    old_size INTEGER,
    new_size INTEGER,
    occurred_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_change_events_scan ON change_events(scan_id, id);

CREATE TABLE IF NOT EXISTS scan_checkpoints (
    scan_id INTEGER PRIMARY KEY REFERENCES scans(id) ON DELETE CASCADE,
    last_processed_path TEXT NOT NULL,
    files_processed INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    expires_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS webhooks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    storage_target_id INTEGER REFERENCES storage_targets(id) ON DELETE CASCADE,
    url TEXT NOT NULL,
    secret TEXT,
    enabled INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS webhook_deliveries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    webhook_id INTEGER NOT NULL REFERENCES webhooks(id) ON DELETE CASCADE,
    change_event_id INTEGER NOT NULL REFERENCES change_events(id),
    delivered_at INTEGER,
    status_code INTEGER,
    attempt INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS config (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Per-connection setup applied by the `r2d2` manager's customizer: WAL
/// journaling and relaxed synchronous mode for throughput, plus
/// `foreign_keys = ON` for cascading deletes.
pub fn configure_connection(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
    conn.execute_batch(
        r#"
        PRAGMA synchronous = NORMAL;
        PRAGMA wal_autocheckpoint = 10000;
        PRAGMA journal_size_limit = 67108864;
        PRAGMA foreign_keys = ON;
        "#,
    )?;
    Ok(())
}

pub fn connection_manager(path: &std::path::Path) -> SqliteConnectionManager {
    SqliteConnectionManager::file(path).with_init(configure_connection)
}

pub fn in_memory_connection_manager() -> SqliteConnectionManager {
    SqliteConnectionManager::memory().with_init(|conn| {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
    })
}
