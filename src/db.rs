use crate::error::{DictError, Result};
use crate::models::{Category, IdentityKey, Language, WordEntry};
use crate::store::DictionaryStore;
use async_trait::async_trait;
use log::{debug, info, warn};
use rusqlite::{Connection, ErrorCode, OpenFlags, OptionalExtension, Transaction, params};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task;

// --- Schema Definition ---

const SCHEMA_VERSION: u32 = 1;

const CREATE_METADATA_TABLE: &str = "
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);";

const CREATE_WORDS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS words (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    word TEXT NOT NULL,
    word_lower TEXT NOT NULL, -- Trimmed lowercase form, half of the identity key
    language TEXT NOT NULL, -- Stored as TEXT (e.g., 'English')
    category TEXT NOT NULL, -- Stored as TEXT (e.g., 'profanity')
    UNIQUE (word_lower, language)
);";

const CREATE_VARIATIONS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS variations (
    word_id INTEGER NOT NULL,
    position INTEGER NOT NULL, -- Display order within the entry
    text TEXT NOT NULL,
    PRIMARY KEY (word_id, position),
    FOREIGN KEY (word_id) REFERENCES words(id) ON DELETE CASCADE
);";

// --- Indices ---

const CREATE_WORDS_LANGUAGE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_words_language ON words (language);";
const CREATE_WORDS_CATEGORY_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_words_category ON words (category);";
const CREATE_VARIATIONS_WORD_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_variations_word ON variations (word_id);";

// --- Initialization Function ---

/// Creates all necessary tables and indices in the database if they don't exist.
/// Also checks and sets the schema version.
pub fn initialize_database(conn: &mut Connection) -> Result<()> {
    info!(
        "Initializing database schema (version {})...",
        SCHEMA_VERSION
    );
    let tx = conn.transaction()?;

    tx.execute(CREATE_METADATA_TABLE, [])?;
    tx.execute(CREATE_WORDS_TABLE, [])?;
    tx.execute(CREATE_VARIATIONS_TABLE, [])?;

    tx.execute(CREATE_WORDS_LANGUAGE_INDEX, [])?;
    tx.execute(CREATE_WORDS_CATEGORY_INDEX, [])?;
    tx.execute(CREATE_VARIATIONS_WORD_INDEX, [])?;

    // Check schema version
    let existing_version_str: Option<String> = tx
        .query_row(
            "SELECT value FROM metadata WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;

    match existing_version_str {
        Some(v_str) => {
            let existing_version: u32 = v_str.parse().map_err(|e| {
                DictError::Internal(format!(
                    "Failed to parse existing schema version '{}': {}",
                    v_str, e
                ))
            })?;
            match existing_version.cmp(&SCHEMA_VERSION) {
                std::cmp::Ordering::Less => {
                    warn!(
                        "Database schema version ({}) is older than expected ({}). Migration needed.",
                        existing_version, SCHEMA_VERSION
                    );
                    tx.execute(
                        "UPDATE metadata SET value = ?1 WHERE key = 'schema_version'",
                        params![SCHEMA_VERSION.to_string()],
                    )?;
                    info!("Updated schema version in metadata table.");
                }
                std::cmp::Ordering::Greater => {
                    warn!(
                        "Database schema version ({}) is newer than expected ({}). Using potentially incompatible schema.",
                        existing_version, SCHEMA_VERSION
                    );
                }
                std::cmp::Ordering::Equal => {
                    debug!(
                        "Database schema version ({}) matches expected version.",
                        existing_version
                    );
                }
            }
        }
        None => {
            tx.execute(
                "INSERT INTO metadata (key, value) VALUES ('schema_version', ?1)",
                params![SCHEMA_VERSION.to_string()],
            )?;
            info!("Set initial schema version in metadata table.");
        }
    }

    tx.commit()?;
    info!("Database schema initialization complete.");
    Ok(())
}

/// Helper to clear all dictionary data, keeping the metadata table.
pub fn clear_database_data(tx: &Transaction) -> Result<()> {
    info!("Clearing existing data from database tables...");
    // Referencing table first
    tx.execute("DELETE FROM variations", [])?;
    tx.execute("DELETE FROM words", [])?;
    info!("Finished clearing data.");
    Ok(())
}

// Opens/creates the database file with the flags and pragmas the store relies on.
fn open_db_connection(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
    )
    .map_err(map_store_error)?;

    // WAL so readers don't block the importer
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    debug!("Journal mode: {}", mode);
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(conn)
}

/// Sorts SQLite failures into the gateway's error classes.
fn map_store_error(e: rusqlite::Error) -> DictError {
    match e.sqlite_error_code() {
        Some(ErrorCode::ConstraintViolation) => DictError::StoreRejected(e.to_string()),
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::CannotOpen) => {
            DictError::StoreUnavailable(e.to_string())
        }
        _ => DictError::Database(e),
    }
}

// --- SqliteStore ---

/// Dictionary store backed by a local SQLite file.
#[derive(Clone)] // Clone is cheap due to Arc<Mutex<...>>
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    db_file_path: Arc<PathBuf>,
}

impl SqliteStore {
    /// Opens (or creates) the database at `path` and makes sure the schema exists.
    pub fn open(path: &Path) -> Result<Self> {
        info!("Using database path: {:?}", path);
        let mut conn = open_db_connection(path)?;
        initialize_database(&mut conn)?;
        Ok(SqliteStore {
            conn: Arc::new(Mutex::new(conn)),
            db_file_path: Arc::new(path.to_path_buf()),
        })
    }

    /// A throwaway store that lives only as long as this value.
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        initialize_database(&mut conn)?;
        Ok(SqliteStore {
            conn: Arc::new(Mutex::new(conn)),
            db_file_path: Arc::new(PathBuf::from(":memory:")),
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_file_path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| DictError::Internal("Mutex poisoned".to_string()))
    }

    /// Removes every entry, keeping the schema.
    pub fn clear(&self) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        clear_database_data(&tx)?;
        tx.commit()?;
        Ok(())
    }

    pub fn load_all(&self) -> Result<Vec<WordEntry>> {
        let conn = self.lock()?;

        let mut variations: HashMap<i64, Vec<String>> = HashMap::new();
        let mut var_stmt =
            conn.prepare("SELECT word_id, text FROM variations ORDER BY word_id, position")?;
        let var_iter = var_stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in var_iter {
            let (word_id, text) = row?;
            variations.entry(word_id).or_default().push(text);
        }

        let mut stmt =
            conn.prepare("SELECT id, word, language, category FROM words ORDER BY id")?;
        let entry_iter = stmt.query_map([], |row| {
            let id: i64 = row.get(0)?;
            let language_str: String = row.get(2)?;
            let category_str: String = row.get(3)?;
            // Explicitly map DictError from helpers to rusqlite::Error within the closure
            let language = string_to_language(&language_str).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
            })?;
            let category = string_to_category(&category_str).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
            })?;
            Ok((
                id,
                WordEntry {
                    id: Some(id.to_string()),
                    word: row.get(1)?,
                    language,
                    category,
                    variations: Vec::new(),
                },
            ))
        })?;

        let mut entries = Vec::new();
        for entry_result in entry_iter {
            let (id, mut entry) = entry_result?;
            entry.variations = variations.remove(&id).unwrap_or_default();
            entries.push(entry);
        }
        if !variations.is_empty() {
            warn!(
                "{} variation groups reference missing words.",
                variations.len()
            );
        }
        debug!("Loaded {} entries from {:?}", entries.len(), self.db_file_path);
        Ok(entries)
    }

    pub fn insert_entry(&self, entry: &WordEntry) -> Result<WordEntry> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let key = IdentityKey::new(&entry.word, entry.language);
        tx.execute(
            "INSERT INTO words (word, word_lower, language, category) VALUES (?1, ?2, ?3, ?4)",
            params![
                entry.word,
                key.word,
                entry.language.as_str(),
                entry.category.as_str()
            ],
        )
        .map_err(map_store_error)?;
        let id = tx.last_insert_rowid();
        insert_variations(&tx, id, &entry.variations)?;
        tx.commit().map_err(map_store_error)?;

        let mut stored = entry.clone();
        stored.id = Some(id.to_string());
        Ok(stored)
    }

    pub fn update_entry(&self, id: &str, entry: &WordEntry) -> Result<WordEntry> {
        let numeric = parse_id(id)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let key = IdentityKey::new(&entry.word, entry.language);
        let changed = tx
            .execute(
                "UPDATE words SET word = ?1, word_lower = ?2, language = ?3, category = ?4 WHERE id = ?5",
                params![
                    entry.word,
                    key.word,
                    entry.language.as_str(),
                    entry.category.as_str(),
                    numeric
                ],
            )
            .map_err(map_store_error)?;
        if changed == 0 {
            return Err(DictError::NotFound(format!("no entry with id '{}'", id)));
        }
        tx.execute("DELETE FROM variations WHERE word_id = ?1", params![numeric])?;
        insert_variations(&tx, numeric, &entry.variations)?;
        tx.commit().map_err(map_store_error)?;

        let mut stored = entry.clone();
        stored.id = Some(id.to_string());
        Ok(stored)
    }

    pub fn delete_entry(&self, id: &str) -> Result<()> {
        let numeric = parse_id(id)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM variations WHERE word_id = ?1", params![numeric])?;
        let removed = tx
            .execute("DELETE FROM words WHERE id = ?1", params![numeric])
            .map_err(map_store_error)?;
        if removed == 0 {
            return Err(DictError::NotFound(format!("no entry with id '{}'", id)));
        }
        tx.commit().map_err(map_store_error)?;
        Ok(())
    }
}

fn insert_variations(tx: &Transaction, word_id: i64, variations: &[String]) -> Result<()> {
    let mut stmt =
        tx.prepare("INSERT INTO variations (word_id, position, text) VALUES (?1, ?2, ?3)")?;
    for (position, text) in variations.iter().enumerate() {
        stmt.execute(params![word_id, position as i64, text])
            .map_err(map_store_error)?;
    }
    Ok(())
}

fn parse_id(id: &str) -> Result<i64> {
    id.parse()
        .map_err(|_| DictError::NotFound(format!("no entry with id '{}'", id)))
}

impl SqliteStore {
    // rusqlite blocks, so every gateway call runs on the blocking pool.
    async fn run_blocking<T, F>(&self, job: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&SqliteStore) -> Result<T> + Send + 'static,
    {
        let store = self.clone();
        task::spawn_blocking(move || job(&store)).await?
    }
}

#[async_trait]
impl DictionaryStore for SqliteStore {
    async fn fetch_all(&self) -> Result<Vec<WordEntry>> {
        self.run_blocking(|store| store.load_all()).await
    }

    async fn insert(&self, entry: &WordEntry) -> Result<WordEntry> {
        let entry = entry.clone();
        self.run_blocking(move |store| store.insert_entry(&entry)).await
    }

    async fn update(&self, id: &str, entry: &WordEntry) -> Result<WordEntry> {
        let (id, entry) = (id.to_string(), entry.clone());
        self.run_blocking(move |store| store.update_entry(&id, &entry)).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.run_blocking(move |store| store.delete_entry(&id)).await
    }
}

// --- Enum to String Conversion Helpers ---

pub fn string_to_language(s: &str) -> Result<Language> {
    Language::ALL
        .into_iter()
        .find(|language| language.as_str() == s)
        .ok_or_else(|| DictError::Internal(format!("Invalid language string in DB: {}", s)))
}

pub fn string_to_category(s: &str) -> Result<Category> {
    Category::ALL
        .into_iter()
        .find(|category| category.as_str() == s)
        .ok_or_else(|| DictError::Internal(format!("Invalid category string in DB: {}", s)))
}
