use rusqlite::Connection;

use std::env;
use std::sync::OnceLock;

use crate::dns::{DnsCacheEntry, DnsDomain, DnsProvider};

pub fn new_connection() -> Connection {
    new_connection_result().expect("Failed to open database")
}

pub fn new_connection_result() -> Result<Connection, rusqlite::Error> {
    let db_url = get_database_url();
    let db_path = db_url.strip_prefix("sqlite://").unwrap_or(&db_url);
    let conn = Connection::open(db_path).map_err(|e| {
        log::error!(
            "Failed to open database at '{}': {} (cwd: {:?})",
            db_path,
            e,
            std::env::current_dir()
        );
        e
    })?;

    // Set busy timeout first (this doesn't require any locks)
    let _ = conn.execute("PRAGMA busy_timeout = 30000;", []);

    // Try to enable WAL mode (only needs to succeed once per database)
    // This may fail if another connection has an active transaction, which is OK
    let _ = conn.execute("PRAGMA journal_mode = WAL;", []);

    // NORMAL sync is safe with WAL mode
    let _ = conn.execute("PRAGMA synchronous = NORMAL;", []);

    Ok(conn)
}

/// Create every table this application uses. Run once at startup so later
/// request handlers never race on schema changes.
pub fn create_tables(conn: &Connection) -> Result<(), rusqlite::Error> {
    DnsCacheEntry::create_table_if_not_exists(conn)?;
    DnsProvider::create_table_if_not_exists(conn)?;
    DnsDomain::create_table_if_not_exists(conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at INTEGER DEFAULT (strftime('%s', 'now'))
        )",
        [],
    )?;

    // Insert default settings if they don't exist
    conn.execute(
        "INSERT OR IGNORE INTO settings (key, value) VALUES
            ('dns_sync_interval_seconds', '60')",
        [],
    )?;

    Ok(())
}

/// Get a setting value from the database
pub fn get_setting(key: &str) -> Option<String> {
    let conn = new_connection();
    get_setting_conn(&conn, key)
}

pub fn get_setting_conn(conn: &Connection, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT value FROM settings WHERE key = ?1",
        [key],
        |row| row.get(0),
    )
    .ok()
}

/// Get a setting value as i64, with a default fallback
pub fn get_setting_i64(key: &str, default: i64) -> i64 {
    get_setting(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Set a setting value in the database
pub fn set_setting_conn(conn: &Connection, key: &str, value: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, strftime('%s', 'now'))
         ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = strftime('%s', 'now')",
        rusqlite::params![key, value],
    )?;
    Ok(())
}

#[cfg(test)]
pub fn new_test_connection() -> Connection {
    let conn = Connection::open_in_memory().expect("Failed to create in-memory database");

    conn.execute("PRAGMA foreign_keys = ON;", [])
        .expect("Failed to set foreign key pragma");

    create_tables(&conn).expect("Failed to create tables");

    conn
}

static RESOLVED_DB_PATH: OnceLock<String> = OnceLock::new();

fn get_database_url() -> String {
    RESOLVED_DB_PATH
        .get_or_init(|| {
            let db_path = env::var("DATABASE_URL").unwrap_or_else(|_| "clus.db".to_string());

            // Convert relative paths to absolute to avoid issues with working directory changes
            if !db_path.starts_with('/')
                && !db_path.starts_with("sqlite://")
                && db_path != ":memory:"
                && let Ok(cwd) = env::current_dir()
            {
                let abs_path = cwd.join(&db_path).to_string_lossy().to_string();
                log::info!("Database path resolved to: {}", abs_path);
                return abs_path;
            }

            db_path
        })
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_roundtrip() {
        let conn = new_test_connection();

        assert_eq!(get_setting_conn(&conn, "no_such_key"), None);

        set_setting_conn(&conn, "dns_sync_interval_seconds", "120").unwrap();
        assert_eq!(
            get_setting_conn(&conn, "dns_sync_interval_seconds"),
            Some("120".to_string())
        );

        // Overwrite keeps a single row
        set_setting_conn(&conn, "dns_sync_interval_seconds", "30").unwrap();
        assert_eq!(
            get_setting_conn(&conn, "dns_sync_interval_seconds"),
            Some("30".to_string())
        );
    }

    #[test]
    fn test_default_settings_seeded() {
        let conn = new_test_connection();
        assert_eq!(
            get_setting_conn(&conn, "dns_sync_interval_seconds"),
            Some("60".to_string())
        );
    }

    #[test]
    fn test_create_tables_idempotent() {
        let conn = new_test_connection();
        create_tables(&conn).unwrap();
        create_tables(&conn).unwrap();
    }
}
