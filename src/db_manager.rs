use crate::protocol::{CatalogEntry, ScopeCode};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;

/// Entries of a scope as read back from the cache tables.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredScope {
    pub fetched_at_ms: i64,
    pub entries: Vec<CatalogEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScopeLoad {
    Missing,
    Complete(StoredScope),
    /// A record exists but its rows do not add up to a complete scope.
    Corrupt(String),
}

/// One owned physical copy of a printing.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionRecord {
    pub id: String,
    pub catalog_id: String,
    pub name: String,
    pub scope: String,
    pub collector_number: String,
    pub foil: bool,
    pub condition: String,
    pub added_at_ms: i64,
}

pub struct DbManager {
    conn: Connection,
}

impl DbManager {
    pub fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, rusqlite::Error> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, rusqlite::Error> {
        let db_manager = Self { conn };
        db_manager.initialize_schema()?;
        Ok(db_manager)
    }

    fn initialize_schema(&self) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS scope_cache_records (
                scope TEXT PRIMARY KEY,
                fetched_at_ms INTEGER NOT NULL,
                entry_count INTEGER NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS scope_cache_entries (
                scope TEXT NOT NULL,
                position INTEGER NOT NULL,
                id TEXT NOT NULL,
                name TEXT NOT NULL,
                collector_number TEXT NOT NULL,
                attributes TEXT NOT NULL,
                PRIMARY KEY(scope, position)
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS collection (
                id TEXT PRIMARY KEY,
                catalog_id TEXT NOT NULL,
                name TEXT NOT NULL,
                scope TEXT NOT NULL,
                collector_number TEXT NOT NULL,
                foil INTEGER NOT NULL,
                condition TEXT NOT NULL,
                added_at_ms INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    pub fn load_scope(&self, scope: &ScopeCode) -> Result<ScopeLoad, rusqlite::Error> {
        let record = self
            .conn
            .query_row(
                "SELECT fetched_at_ms, entry_count FROM scope_cache_records WHERE scope = ?1",
                params![scope.as_str()],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;
        let Some((fetched_at_ms, entry_count)) = record else {
            return Ok(ScopeLoad::Missing);
        };

        let mut stmt = self.conn.prepare(
            "SELECT id, name, collector_number, attributes FROM scope_cache_entries
             WHERE scope = ?1 ORDER BY position ASC",
        )?;
        let rows = stmt.query_map(params![scope.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, name, collector_number, attributes_json) = row?;
            let attributes = match serde_json::from_str::<BTreeMap<String, serde_json::Value>>(
                &attributes_json,
            ) {
                Ok(attributes) => attributes,
                Err(error) => {
                    return Ok(ScopeLoad::Corrupt(format!(
                        "unreadable attributes for entry {id}: {error}"
                    )))
                }
            };
            entries.push(CatalogEntry {
                id,
                name,
                scope: scope.clone(),
                collector_number,
                attributes,
            });
        }

        if entries.len() as i64 != entry_count {
            return Ok(ScopeLoad::Corrupt(format!(
                "record lists {entry_count} entries but {} rows are stored",
                entries.len()
            )));
        }

        Ok(ScopeLoad::Complete(StoredScope {
            fetched_at_ms,
            entries,
        }))
    }

    /// Writes a fully fetched scope, replacing any previous record atomically.
    pub fn replace_scope(
        &mut self,
        scope: &ScopeCode,
        entries: &[CatalogEntry],
        fetched_at_ms: i64,
    ) -> Result<(), rusqlite::Error> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM scope_cache_entries WHERE scope = ?1",
            params![scope.as_str()],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO scope_cache_entries (scope, position, id, name, collector_number, attributes)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for (position, entry) in entries.iter().enumerate() {
                let attributes = serde_json::to_string(&entry.attributes)
                    .map_err(|error| rusqlite::Error::ToSqlConversionFailure(Box::new(error)))?;
                stmt.execute(params![
                    scope.as_str(),
                    position as i64,
                    entry.id,
                    entry.name,
                    entry.collector_number,
                    attributes
                ])?;
            }
        }
        tx.execute(
            "INSERT OR REPLACE INTO scope_cache_records (scope, fetched_at_ms, entry_count)
             VALUES (?1, ?2, ?3)",
            params![scope.as_str(), fetched_at_ms, entries.len() as i64],
        )?;
        tx.commit()
    }

    pub fn delete_scope(&mut self, scope: &ScopeCode) -> Result<(), rusqlite::Error> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM scope_cache_records WHERE scope = ?1",
            params![scope.as_str()],
        )?;
        tx.execute(
            "DELETE FROM scope_cache_entries WHERE scope = ?1",
            params![scope.as_str()],
        )?;
        tx.commit()
    }

    pub fn cached_scope_codes(&self) -> Result<Vec<String>, rusqlite::Error> {
        let mut stmt = self
            .conn
            .prepare("SELECT scope FROM scope_cache_records ORDER BY scope ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.collect()
    }

    pub fn insert_collection_record(
        &self,
        record: &CollectionRecord,
    ) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "INSERT INTO collection (id, catalog_id, name, scope, collector_number, foil, condition, added_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.id,
                record.catalog_id,
                record.name,
                record.scope,
                record.collector_number,
                record.foil,
                record.condition,
                record.added_at_ms
            ],
        )?;
        Ok(())
    }

    pub fn collection_records(&self) -> Result<Vec<CollectionRecord>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(
            "SELECT id, catalog_id, name, scope, collector_number, foil, condition, added_at_ms
             FROM collection ORDER BY added_at_ms ASC, rowid ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(CollectionRecord {
                id: row.get(0)?,
                catalog_id: row.get(1)?,
                name: row.get(2)?,
                scope: row.get(3)?,
                collector_number: row.get(4)?,
                foil: row.get(5)?,
                condition: row.get(6)?,
                added_at_ms: row.get(7)?,
            })
        })?;
        rows.collect()
    }

    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> Result<usize, rusqlite::Error> {
        self.conn.execute(sql, [])
    }
}
