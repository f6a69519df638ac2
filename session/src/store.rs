//! Durable cohort storage.
//!
//! [`CohortStore`] is the persistence boundary: put, get, delete and list by
//! cohort name, plus a read-only query pass-through for inspection.
//! [`SqliteCohortStore`] keeps each cohort's entity set as one JSON document
//! with a SHA-256 checksum verified on every load, the identifier
//! high-water marks next to it, and one row per entity for ad-hoc queries.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use serde_json::Value;
use sha2::{Digest, Sha256};

use healthsim_types::{
    Cohort, CohortCriteria, CohortName, CohortSummary, EntityId, EntityKind, EntitySet,
};

use crate::SessionError;

/// How `put` treats an existing cohort of the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Fail with `DuplicateCohortName`.
    Create,
    Overwrite,
}

/// Rows returned by [`CohortStore::query`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

pub trait CohortStore: Send + Sync {
    /// Write `cohort` atomically. Concurrent writers are serialized.
    fn put(&self, cohort: &Cohort, mode: WriteMode) -> Result<(), SessionError>;
    fn get(&self, name: &CohortName) -> Result<Cohort, SessionError>;
    fn delete(&self, name: &CohortName) -> Result<(), SessionError>;
    /// Stored cohorts ordered by name.
    fn list(&self) -> Result<Vec<CohortSummary>, SessionError>;
    /// Run one read-only `SELECT` statement.
    fn query(&self, sql: &str) -> Result<QueryRows, SessionError>;
}

/// How long a writer waits on another connection's write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SqliteCohortStore {
    db: Mutex<Connection>,
}

impl SqliteCohortStore {
    const SCHEMA: &'static str = r"
        CREATE TABLE IF NOT EXISTS cohorts (
            name TEXT PRIMARY KEY,
            description TEXT,
            criteria TEXT NOT NULL,
            saved_at TEXT NOT NULL,
            entity_count INTEGER NOT NULL,
            entities TEXT NOT NULL,
            checksum TEXT NOT NULL
        );

        -- Highest sequence ever allocated per kind, deleted entities included
        CREATE TABLE IF NOT EXISTS cohort_high_water (
            cohort TEXT NOT NULL,
            kind TEXT NOT NULL,
            seq INTEGER NOT NULL,
            PRIMARY KEY (cohort, kind),
            FOREIGN KEY (cohort) REFERENCES cohorts(name) ON DELETE CASCADE
        );

        -- One row per entity for inspection queries; the cohort document is authoritative
        CREATE TABLE IF NOT EXISTS cohort_entities (
            cohort TEXT NOT NULL,
            id TEXT NOT NULL,
            kind TEXT NOT NULL,
            body TEXT NOT NULL,
            PRIMARY KEY (cohort, id),
            FOREIGN KEY (cohort) REFERENCES cohorts(name) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_cohort_entities_kind
        ON cohort_entities(kind);
    ";

    /// Open or create the cohort database at `path`.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let db = Connection::open(path)
            .with_context(|| format!("Failed to open cohort store at {}", path.display()))?;
        Self::initialize(db)
    }

    /// Open an in-memory cohort store (for testing).
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let db = Connection::open_in_memory().context("Failed to open in-memory cohort store")?;
        Self::initialize(db)
    }

    fn initialize(db: Connection) -> anyhow::Result<Self> {
        db.busy_timeout(BUSY_TIMEOUT)
            .context("Failed to set cohort store busy timeout")?;
        db.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL; PRAGMA foreign_keys=ON;",
        )
        .context("Failed to set cohort store pragmas")?;
        db.execute_batch(Self::SCHEMA)
            .context("Failed to create cohort store schema")?;
        Ok(Self { db: Mutex::new(db) })
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| anyhow!("cohort store connection lock poisoned"))
    }
}

impl CohortStore for SqliteCohortStore {
    fn put(&self, cohort: &Cohort, mode: WriteMode) -> Result<(), SessionError> {
        let entities =
            serde_json::to_string(&cohort.entities).context("Failed to serialize cohort entities")?;
        let checksum = sha256_hex(entities.as_bytes());
        let criteria =
            serde_json::to_string(&cohort.criteria).context("Failed to serialize criteria")?;
        let rows = entity_rows(&cohort.entities)?;
        let name = cohort.name.as_str();

        let mut db = self.lock()?;
        // IMMEDIATE takes the write lock up front, so the existence check and
        // the write cannot interleave with another writer.
        let tx = db
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("Failed to begin cohort write")?;

        let exists: bool = tx
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM cohorts WHERE name = ?1)",
                params![name],
                |row| row.get(0),
            )
            .context("Failed to check for existing cohort")?;
        let mut marks: BTreeMap<String, i64> = cohort
            .high_water
            .iter()
            .map(|(kind, seq)| (kind.as_str().to_string(), *seq as i64))
            .collect();
        if exists {
            if mode == WriteMode::Create {
                return Err(SessionError::DuplicateCohortName {
                    name: cohort.name.clone(),
                });
            }
            // A replaced cohort never hands out a sequence it already used.
            let mut stmt = tx
                .prepare("SELECT kind, seq FROM cohort_high_water WHERE cohort = ?1")
                .context("Failed to prepare high-water query")?;
            let previous = stmt
                .query_map(params![name], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })
                .context("Failed to read high-water marks")?;
            for mark in previous {
                let (kind, seq) = mark.context("Failed to read high-water row")?;
                let entry = marks.entry(kind).or_insert(seq);
                *entry = (*entry).max(seq);
            }
            drop(stmt);
            tx.execute("DELETE FROM cohorts WHERE name = ?1", params![name])
                .context("Failed to replace cohort")?;
        }

        tx.execute(
            "INSERT INTO cohorts (name, description, criteria, saved_at, entity_count, entities, checksum)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                name,
                cohort.description,
                criteria,
                cohort.saved_at.to_rfc3339(),
                cohort.entities.len() as i64,
                entities,
                checksum,
            ],
        )
        .context("Failed to insert cohort")?;

        {
            let mut stmt = tx
                .prepare("INSERT INTO cohort_high_water (cohort, kind, seq) VALUES (?1, ?2, ?3)")
                .context("Failed to prepare high-water insert")?;
            for (kind, seq) in &marks {
                stmt.execute(params![name, kind, seq])
                    .context("Failed to insert high-water mark")?;
            }

            let mut stmt = tx
                .prepare(
                    "INSERT INTO cohort_entities (cohort, id, kind, body) VALUES (?1, ?2, ?3, ?4)",
                )
                .context("Failed to prepare entity insert")?;
            for (id, body) in &rows {
                stmt.execute(params![name, id.to_string(), id.kind().as_str(), body])
                    .context("Failed to insert entity row")?;
            }
        }

        tx.commit().context("Failed to commit cohort write")?;
        tracing::debug!(cohort = %cohort.name, checksum = %checksum, "Stored cohort");
        Ok(())
    }

    fn get(&self, name: &CohortName) -> Result<Cohort, SessionError> {
        let db = self.lock()?;
        let row = db
            .query_row(
                "SELECT description, criteria, saved_at, entities, checksum
                 FROM cohorts WHERE name = ?1",
                params![name.as_str()],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()
            .context("Failed to read cohort")?;
        let Some((description, criteria, saved_at, entities, expected)) = row else {
            return Err(SessionError::CohortNotFound { name: name.clone() });
        };

        let actual = sha256_hex(entities.as_bytes());
        if actual != expected {
            return Err(SessionError::ChecksumMismatch {
                name: name.clone(),
                expected,
                actual,
            });
        }

        let entities: EntitySet = serde_json::from_str(&entities)
            .with_context(|| format!("Failed to decode entities of cohort {name}"))?;
        let criteria: CohortCriteria = serde_json::from_str(&criteria)
            .with_context(|| format!("Failed to decode criteria of cohort {name}"))?;
        let saved_at = parse_timestamp(&saved_at)?;

        let mut stmt = db
            .prepare("SELECT kind, seq FROM cohort_high_water WHERE cohort = ?1")
            .context("Failed to prepare high-water query")?;
        let marks = stmt
            .query_map(params![name.as_str()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .context("Failed to read high-water marks")?;
        let mut high_water = BTreeMap::new();
        for mark in marks {
            let (kind, seq) = mark.context("Failed to read high-water row")?;
            let kind = EntityKind::ALL
                .into_iter()
                .find(|candidate| candidate.as_str() == kind)
                .ok_or_else(|| anyhow!("unknown entity kind {kind:?} in cohort {name}"))?;
            high_water.insert(kind, seq as u64);
        }

        tracing::debug!(cohort = %name, "Read cohort");
        Ok(Cohort {
            name: name.clone(),
            description,
            criteria,
            saved_at,
            entities,
            high_water,
        })
    }

    fn delete(&self, name: &CohortName) -> Result<(), SessionError> {
        let mut db = self.lock()?;
        let tx = db
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("Failed to begin cohort delete")?;
        let removed = tx
            .execute("DELETE FROM cohorts WHERE name = ?1", params![name.as_str()])
            .context("Failed to delete cohort")?;
        if removed == 0 {
            return Err(SessionError::CohortNotFound { name: name.clone() });
        }
        tx.commit().context("Failed to commit cohort delete")?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<CohortSummary>, SessionError> {
        let db = self.lock()?;
        let mut stmt = db
            .prepare("SELECT name, saved_at, entity_count FROM cohorts ORDER BY name")
            .context("Failed to prepare cohort listing")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })
            .context("Failed to list cohorts")?;

        let mut summaries = Vec::new();
        for row in rows {
            let (name, saved_at, entity_count) = row.context("Failed to read cohort row")?;
            summaries.push(CohortSummary {
                name: CohortName::new(name.as_str())
                    .with_context(|| format!("Stored cohort has an invalid name: {name:?}"))?,
                saved_at: parse_timestamp(&saved_at)?,
                entity_count: entity_count as usize,
            });
        }
        Ok(summaries)
    }

    fn query(&self, sql: &str) -> Result<QueryRows, SessionError> {
        let statement = sql.trim().trim_end_matches(';');
        let is_select = statement
            .get(..6)
            .is_some_and(|head| head.eq_ignore_ascii_case("select"));
        if !is_select {
            return Err(SessionError::WriteQuery);
        }

        let db = self.lock()?;
        let mut stmt = db.prepare(statement).context("Failed to prepare query")?;
        if !stmt.readonly() {
            return Err(SessionError::WriteQuery);
        }
        let columns: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        let width = columns.len();
        let rows = stmt
            .query_map([], |row| {
                (0..width)
                    .map(|index| row.get_ref(index).map(json_value))
                    .collect::<rusqlite::Result<Vec<Value>>>()
            })
            .context("Failed to run query")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read query rows")?;
        Ok(QueryRows { columns, rows })
    }
}

/// `(id, JSON body)` for every entity in the set.
fn entity_rows(entities: &EntitySet) -> anyhow::Result<Vec<(EntityId, String)>> {
    let document = serde_json::to_value(entities).context("Failed to serialize entity rows")?;
    let mut rows = Vec::with_capacity(entities.len());
    for collection in document.as_object().into_iter().flat_map(|map| map.values()) {
        for entity in collection.as_array().into_iter().flatten() {
            let id: EntityId = entity
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow!("serialized entity has no id"))?
                .parse()
                .context("Serialized entity has a malformed id")?;
            rows.push((id, entity.to_string()));
        }
    }
    Ok(rows)
}

fn json_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(n) => Value::from(n),
        ValueRef::Real(x) => Value::from(x),
        ValueRef::Text(text) => Value::String(String::from_utf8_lossy(text).into_owned()),
        ValueRef::Blob(bytes) => Value::String(hex(bytes)),
    }
}

fn parse_timestamp(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .with_context(|| format!("Malformed cohort timestamp: {raw:?}"))
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex(&Sha256::digest(bytes))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
