//! DDL for the dashboard tables.
//!
//! Every statement is idempotent so `init_schema` can run on each start.
//! Timestamps are RFC3339 text and flags are INTEGER 0/1 on both engines.

use crate::db::backend::SessionBackend;
use crate::db::session::ResilientSession;
use crate::db::statement::Statement;
use crate::error::DbError;

pub const POSTGRES_INIT: &str = r#"
CREATE TABLE IF NOT EXISTS api_configs (
    id BIGSERIAL PRIMARY KEY,
    config_key VARCHAR(100) NOT NULL,
    config_value TEXT,
    description VARCHAR(255),
    is_active INTEGER NOT NULL DEFAULT 1,
    updated_at TEXT,
    updated_by VARCHAR(100)
);

CREATE UNIQUE INDEX IF NOT EXISTS ix_api_configs_config_key ON api_configs (config_key);

CREATE TABLE IF NOT EXISTS file_uploads (
    id BIGSERIAL PRIMARY KEY,
    original_filename VARCHAR(500) NOT NULL,
    stored_path VARCHAR(1000) NOT NULL,
    file_type VARCHAR(50) NOT NULL,
    file_size BIGINT,
    uploaded_by VARCHAR(100),
    processed INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,
    created_at TEXT NOT NULL
);

ALTER TABLE file_uploads ADD COLUMN IF NOT EXISTS storage_url VARCHAR(1000);

CREATE INDEX IF NOT EXISTS ix_file_uploads_type_created ON file_uploads (file_type, created_at);
"#;

pub const SQLITE_INIT: &str = r#"
CREATE TABLE IF NOT EXISTS api_configs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    config_key TEXT NOT NULL,
    config_value TEXT,
    description TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    updated_at TEXT,
    updated_by TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS ix_api_configs_config_key ON api_configs (config_key);

CREATE TABLE IF NOT EXISTS file_uploads (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    original_filename TEXT NOT NULL,
    stored_path TEXT NOT NULL,
    storage_url TEXT,
    file_type TEXT NOT NULL,
    file_size INTEGER,
    uploaded_by TEXT,
    processed INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS ix_file_uploads_type_created ON file_uploads (file_type, created_at);
"#;

/// Split a DDL script into single statements; the drivers prepare one at a time.
pub fn statements(script: &str) -> impl Iterator<Item = &str> {
    script.split(';').map(str::trim).filter(|s| !s.is_empty())
}

/// Create missing tables and columns, then commit.
pub async fn init_schema<B: SessionBackend>(
    session: &mut ResilientSession<B>,
    postgres: bool,
) -> Result<(), DbError> {
    let script = if postgres { POSTGRES_INIT } else { SQLITE_INIT };
    for sql in statements(script) {
        session.execute(&Statement::new(sql)).await?;
    }
    session.commit().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripts_split_into_statements() {
        assert_eq!(statements(SQLITE_INIT).count(), 4);
        assert_eq!(statements(POSTGRES_INIT).count(), 5);
        assert!(statements(SQLITE_INIT).all(|s| !s.ends_with(';')));
    }
}
