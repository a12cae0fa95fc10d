//! Reverse-lookup cache. One row per address; a row is served only while
//! its expire timestamp lies in the future, and the whole table is cleared
//! whenever the controller's nameserver set changes.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};

#[derive(Debug, Clone, PartialEq)]
pub struct DnsCacheEntry {
    pub addr: String,
    pub ptr: String,
    /// Unix seconds after which the entry no longer counts as cached.
    pub expire: i64,
}

impl DnsCacheEntry {
    pub fn new(addr: &str, ptr: &str, expire: i64) -> Self {
        Self {
            addr: addr.to_string(),
            ptr: ptr.to_string(),
            expire,
        }
    }

    pub fn create_table_if_not_exists(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS dns_cache (
                addr TEXT PRIMARY KEY,
                ptr TEXT NOT NULL,
                expire INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    pub fn get(conn: &Connection, addr: &str) -> rusqlite::Result<Option<Self>> {
        conn.query_row(
            "SELECT addr, ptr, expire FROM dns_cache WHERE addr = ?1",
            [addr],
            |row| {
                Ok(Self {
                    addr: row.get(0)?,
                    ptr: row.get(1)?,
                    expire: row.get(2)?,
                })
            },
        )
        .optional()
    }

    pub fn upsert(&self, conn: &Connection) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT INTO dns_cache (addr, ptr, expire) VALUES (?1, ?2, ?3)
             ON CONFLICT(addr) DO UPDATE SET ptr = excluded.ptr, expire = excluded.expire",
            rusqlite::params![self.addr, self.ptr, self.expire],
        )?;
        Ok(())
    }

    pub fn clear_all(conn: &Connection) -> rusqlite::Result<usize> {
        conn.execute("DELETE FROM dns_cache", [])
    }

    pub fn is_fresh(&self, now: i64) -> bool {
        self.expire > now
    }
}

pub fn now_timestamp() -> i64 {
    Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[test]
    fn test_upsert_and_get() {
        let conn = db::new_test_connection();
        let entry = DnsCacheEntry::new("10.0.0.5", "host.example.com", 1_900_000_000);
        entry.upsert(&conn).unwrap();

        let fetched = DnsCacheEntry::get(&conn, "10.0.0.5").unwrap().unwrap();
        assert_eq!(fetched, entry);
        assert!(DnsCacheEntry::get(&conn, "10.0.0.6").unwrap().is_none());
    }

    #[test]
    fn test_upsert_replaces_existing_row() {
        let conn = db::new_test_connection();
        DnsCacheEntry::new("10.0.0.5", "old.example.com", 100)
            .upsert(&conn)
            .unwrap();
        DnsCacheEntry::new("10.0.0.5", "new.example.com", 200)
            .upsert(&conn)
            .unwrap();

        let fetched = DnsCacheEntry::get(&conn, "10.0.0.5").unwrap().unwrap();
        assert_eq!(fetched.ptr, "new.example.com");
        assert_eq!(fetched.expire, 200);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM dns_cache", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_is_fresh_is_strict() {
        let entry = DnsCacheEntry::new("10.0.0.5", "host.example.com", 1000);
        assert!(entry.is_fresh(999));
        assert!(!entry.is_fresh(1000));
        assert!(!entry.is_fresh(1001));
    }

    #[test]
    fn test_clear_all() {
        let conn = db::new_test_connection();
        DnsCacheEntry::new("10.0.0.5", "a.example.com", 100)
            .upsert(&conn)
            .unwrap();
        DnsCacheEntry::new("10.0.0.6", "b.example.com", 100)
            .upsert(&conn)
            .unwrap();

        assert_eq!(DnsCacheEntry::clear_all(&conn).unwrap(), 2);
        assert!(DnsCacheEntry::get(&conn, "10.0.0.5").unwrap().is_none());
    }
}
