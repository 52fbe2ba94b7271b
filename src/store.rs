//! SQLite persistence for interned dictionaries and clustering results.
//!
//! Dictionary tables are keyed by the dense id with a unique value column;
//! writes are insert-or-ignore so replaying a corpus never duplicates rows.

use std::path::Path;

use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension};

use crate::cluster::ClusterLabel;
use crate::error::{ClusterError, Result};
use crate::intern::{DictionarySink, InternDictionary, InternTables};
use crate::normalize::Category;

const INTERNED: [Category; 4] = [
    Category::IpPort,
    Category::BlockId,
    Category::Path,
    Category::Timestamp,
];

pub fn table_name(category: Category) -> Option<&'static str> {
    match category {
        Category::IpPort => Some("ip_dict"),
        Category::BlockId => Some("block_dict"),
        Category::Path => Some("path_dict"),
        Category::Timestamp => Some("timestamp_dict"),
        Category::Number => None,
    }
}

fn to_count(n: i64) -> Result<usize> {
    usize::try_from(n).map_err(|_| ClusterError::Validation(format!("invalid row count {n}")))
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        info!("opened store {}", path.display());
        Self::init(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        for category in INTERNED {
            if let Some(table) = table_name(category) {
                conn.execute(
                    &format!(
                        "CREATE TABLE IF NOT EXISTS {table} (
                            id INTEGER PRIMARY KEY,
                            value TEXT NOT NULL UNIQUE
                        )"
                    ),
                    [],
                )?;
            }
        }
        conn.execute(
            "CREATE TABLE IF NOT EXISTS clustered_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                compressed_log TEXT NOT NULL,
                cluster_id INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(Self { conn })
    }

    /// Rebuilds the interning state persisted by earlier runs.
    pub fn load_tables(&self) -> Result<InternTables> {
        let mut tables = InternTables::new();
        for category in INTERNED {
            let Some(table) = table_name(category) else {
                continue;
            };
            let mut stmt = self
                .conn
                .prepare(&format!("SELECT id, value FROM {table} ORDER BY id"))?;
            let entries = stmt
                .query_map([], |row| Ok((row.get::<_, u32>(0)?, row.get::<_, String>(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            let dict = InternDictionary::from_entries(entries)?;
            debug!("loaded {} {} entries", dict.len(), category);
            if let Some(slot) = tables.dictionary_mut(category) {
                *slot = dict;
            }
        }
        Ok(tables)
    }

    pub fn dictionary_len(&self, category: Category) -> Result<usize> {
        let Some(table) = table_name(category) else {
            return Ok(0);
        };
        let n: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
        to_count(n)
    }

    /// Appends clustered lines in one transaction.
    pub fn insert_results<'a, I>(&mut self, rows: I) -> Result<usize>
    where
        I: IntoIterator<Item = (&'a str, ClusterLabel)>,
    {
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO clustered_logs (compressed_log, cluster_id) VALUES (?1, ?2)",
            )?;
            for (text, label) in rows {
                stmt.execute(params![text, label.id()])?;
                inserted += 1;
            }
        }
        tx.commit()?;
        info!("stored {} clustered lines", inserted);
        Ok(inserted)
    }

    pub fn result_count(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM clustered_logs", [], |row| row.get(0))?;
        to_count(n)
    }
}

impl DictionarySink for SqliteStore {
    fn record(&mut self, category: Category, id: u32, value: &str) -> Result<()> {
        let Some(table) = table_name(category) else {
            return Ok(());
        };
        let changed = self
            .conn
            .prepare_cached(&format!(
                "INSERT OR IGNORE INTO {table} (id, value) VALUES (?1, ?2)"
            ))?
            .execute(params![id, value])?;
        if changed == 0 {
            self.check_existing(table, category, id, value)?;
            debug!("{} entry {} = {:?} already stored", category, id, value);
        }
        Ok(())
    }
}

impl SqliteStore {
    // An ignored insert is only fine if the exact pair is already present.
    fn check_existing(&self, table: &str, category: Category, id: u32, value: &str) -> Result<()> {
        let stored: Option<String> = self
            .conn
            .query_row(
                &format!("SELECT value FROM {table} WHERE id = ?1"),
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(stored) = stored.filter(|v| v != value) {
            return Err(ClusterError::Validation(format!(
                "{category} id {id} is stored as {stored:?}, not {value:?}; \
                 seed the tables from the store before interning"
            )));
        }
        let stored_id: Option<u32> = self
            .conn
            .query_row(
                &format!("SELECT id FROM {table} WHERE value = ?1"),
                params![value],
                |row| row.get(0),
            )
            .optional()?;
        match stored_id {
            Some(other) if other != id => Err(ClusterError::Validation(format!(
                "{category} value {value:?} is stored with id {other}, not {id}"
            ))),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_is_idempotent() {
        let mut store = SqliteStore::in_memory().unwrap();
        store.record(Category::IpPort, 1, "10.0.0.1").unwrap();
        store.record(Category::IpPort, 1, "10.0.0.1").unwrap();
        store.record(Category::IpPort, 2, "10.0.0.2").unwrap();
        assert_eq!(store.dictionary_len(Category::IpPort).unwrap(), 2);
        assert_eq!(store.dictionary_len(Category::Path).unwrap(), 0);
    }

    #[test]
    fn conflicting_entries_are_rejected() {
        let mut store = SqliteStore::in_memory().unwrap();
        store.record(Category::IpPort, 1, "10.0.0.1").unwrap();
        let err = store.record(Category::IpPort, 1, "10.9.9.9").unwrap_err();
        assert!(matches!(err, ClusterError::Validation(_)));
        let err = store.record(Category::IpPort, 2, "10.0.0.1").unwrap_err();
        assert!(matches!(err, ClusterError::Validation(_)));
        let tables = store.load_tables().unwrap();
        assert_eq!(tables.resolve(Category::IpPort, 1), Some("10.0.0.1"));
        assert_eq!(tables.ip.len(), 1);
    }

    #[test]
    fn unseeded_tables_cannot_reuse_stored_ids() {
        let mut store = SqliteStore::in_memory().unwrap();
        store.record(Category::IpPort, 1, "10.0.0.1").unwrap();
        let mut fresh = InternTables::new();
        assert!(fresh
            .intern(Category::IpPort, "10.9.9.9", Some(&mut store))
            .is_err());

        let mut seeded = store.load_tables().unwrap();
        let id = seeded
            .intern(Category::IpPort, "10.9.9.9", Some(&mut store))
            .unwrap();
        assert_eq!(id, 2);
        assert_eq!(
            store.load_tables().unwrap().resolve(Category::IpPort, 2),
            Some("10.9.9.9")
        );
    }

    #[test]
    fn tables_round_trip_through_store() {
        let mut store = SqliteStore::in_memory().unwrap();
        let mut tables = InternTables::new();
        for value in ["blk_1", "blk_2", "blk_1"] {
            tables
                .intern(Category::BlockId, value, Some(&mut store))
                .unwrap();
        }
        tables
            .intern(Category::Timestamp, "081109 203615", Some(&mut store))
            .unwrap();
        assert_eq!(store.load_tables().unwrap(), tables);
    }

    #[test]
    fn results_are_appended() {
        let mut store = SqliteStore::in_memory().unwrap();
        let n = store
            .insert_results(vec![
                ("^1 #1", ClusterLabel::Member(0)),
                ("^2 @1", ClusterLabel::Noise),
            ])
            .unwrap();
        assert_eq!(n, 2);
        store
            .insert_results(vec![("^1 #1", ClusterLabel::Member(0))])
            .unwrap();
        assert_eq!(store.result_count().unwrap(), 3);
    }
}
