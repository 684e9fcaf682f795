// Declare modules
pub mod db;
pub mod error;
pub mod export;
pub mod group;
pub mod models;
pub mod normalize;
pub mod parse;
pub mod progress;
pub mod reconcile;
pub mod rest;
pub mod store;

// Re-export key types for easier use
pub use error::{DictError, ImportFailure, Result};
pub use group::{GroupBrowser, GroupEdit, GroupFilter, Page};
pub use models::{
    Category,
    ExportDocument,
    IdentityKey,
    ImportCandidate,
    ImportPolicy,
    InputFormat,
    Language,
    ReconciliationResult,
    WordEntry,
    WordGroup,
};
pub use store::{DictionaryStore, MemoryStore};

use crate::db::SqliteStore;
use crate::progress::ProgressCallback;
use crate::rest::RestStore;
use directories_next::ProjectDirs;
use log::{error, info};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

// --- Constants ---

pub const APP_SUBDIR: &str = "moddict";
const DB_FILENAME: &str = "moddict.db";

// --- ModerationDictionary Struct ---

/// Where the dictionary lives.
#[derive(Debug, Default, Clone)]
pub struct StoreOptions {
    /// Optional path to a specific database file to use or create.
    /// If None, the default location based on ProjectDirs will be used.
    pub db_path: Option<PathBuf>,
    /// Base URL of the admin API. Takes precedence over `db_path`.
    pub api_url: Option<String>,
    /// Bearer token sent with every API request.
    pub api_token: Option<String>,
}

/// The main moderation dictionary interface.
#[derive(Clone)] // Clone is cheap due to Arc
pub struct ModerationDictionary {
    store: Arc<dyn DictionaryStore>,
}

impl ModerationDictionary {
    /// Opens the dictionary in the default database file.
    pub async fn open() -> Result<Self> {
        Self::open_with_options(StoreOptions::default()).await
    }

    pub async fn open_with_options(options: StoreOptions) -> Result<Self> {
        if let Some(url) = options.api_url {
            let store = RestStore::new(url, options.api_token)?;
            return Ok(Self::with_store(Arc::new(store)));
        }

        let db_path = match options.db_path {
            Some(path) => path,
            None => Self::get_default_db_path()?,
        };
        info!("Using database file: {}", db_path.display());
        let store = tokio::task::spawn_blocking(move || SqliteStore::open(&db_path)).await??;
        Ok(Self::with_store(Arc::new(store)))
    }

    pub fn with_store(store: Arc<dyn DictionaryStore>) -> Self {
        ModerationDictionary { store }
    }

    pub fn store(&self) -> &dyn DictionaryStore {
        self.store.as_ref()
    }

    /// Gets the default path for the SQLite database file.
    pub fn get_default_db_path() -> Result<PathBuf> {
        let project_dirs = ProjectDirs::from("org", "ModDict", APP_SUBDIR)
            .ok_or(DictError::DataDirNotFound)?;
        let data_dir = project_dirs.data_dir();
        fs::create_dir_all(data_dir)?; // Ensure the directory exists
        Ok(data_dir.join(DB_FILENAME))
    }

    /// Clears the dictionary database file(s).
    ///
    /// If `db_path_override` is `Some`, it attempts to delete that specific file.
    /// If `db_path_override` is `None`, it calculates the default database path and attempts to delete that file.
    pub fn clear_database(db_path_override: Option<PathBuf>) -> Result<()> {
        let path_to_clear = match db_path_override {
            Some(path) => path,
            None => Self::get_default_db_path()?,
        };
        info!("Attempting to clear database file: {:?}", path_to_clear);

        if !path_to_clear.exists() {
            info!("Database file not found, nothing to clear: {:?}", path_to_clear);
            return Ok(()); // Not an error if the file doesn't exist
        }

        if let Err(e) = fs::remove_file(&path_to_clear) {
            error!("Failed to delete database file {:?}: {}", path_to_clear, e);
            return Err(DictError::Io(e));
        }
        info!("Successfully deleted database file: {:?}", path_to_clear);
        for extension in ["db-wal", "db-shm"] {
            let side_file = path_to_clear.with_extension(extension);
            if side_file.exists() {
                let _ = fs::remove_file(side_file); // Ignore error if deletion fails
            }
        }
        Ok(())
    }

    // --- Dictionary Operations ---

    pub async fn entries(&self) -> Result<Vec<WordEntry>> {
        self.store.fetch_all().await
    }

    /// Parses an uploaded file and reconciles its records into the store.
    ///
    /// A file that cannot be parsed fails before anything is written, with
    /// an empty partial result.
    pub async fn import_upload(
        &self,
        bytes: Vec<u8>,
        file_name: Option<String>,
        format: Option<InputFormat>,
        policy: ImportPolicy,
        progress: Option<ProgressCallback>,
    ) -> std::result::Result<ReconciliationResult, ImportFailure> {
        let (format, candidates) = parse::parse_upload(bytes, file_name, format).await?;
        info!("Parsed {} records as {}", candidates.len(), format);
        self.import_candidates(candidates, policy, progress).await
    }

    pub async fn import_candidates(
        &self,
        candidates: Vec<ImportCandidate>,
        policy: ImportPolicy,
        progress: Option<ProgressCallback>,
    ) -> std::result::Result<ReconciliationResult, ImportFailure> {
        reconcile::import_words(self.store.as_ref(), candidates, policy, progress).await
    }

    pub async fn export(
        &self,
        language: Option<Language>,
        category: Option<Category>,
    ) -> Result<ExportDocument> {
        export::export_words(self.store.as_ref(), language, category).await
    }

    /// All groups, unfiltered, in store order.
    pub async fn groups(&self) -> Result<Vec<WordGroup>> {
        Ok(group::build_groups(&self.store.fetch_all().await?))
    }

    /// One page of the groups matching `filter`.
    pub async fn group_page(
        &self,
        filter: &GroupFilter,
        page: usize,
        page_size: usize,
    ) -> Result<Page<WordGroup>> {
        let groups = group::filter_groups(&self.groups().await?, filter);
        group::paginate(&groups, page, page_size)
    }

    /// A browser over the current groups, starting at page 1.
    pub async fn browse(&self, page_size: usize) -> Result<GroupBrowser> {
        Ok(GroupBrowser::new(&self.store.fetch_all().await?, page_size))
    }

    /// Looks up the entry for `word` in `language` as a group, whether or
    /// not it has variations.
    pub async fn find_group(&self, word: &str, language: Language) -> Result<WordGroup> {
        let key = IdentityKey::new(word, language);
        store::find_by_identity(self.store.as_ref(), &key)
            .await?
            .map(|entry| WordGroup::from(&entry))
            .ok_or_else(|| DictError::NotFound(format!("no entry for {}", key)))
    }

    /// Adds a single entry. Input goes through the same normalization as
    /// imports; an existing identity is refused.
    pub async fn add_word(
        &self,
        word: &str,
        language: Option<&str>,
        category: Option<&str>,
        variations: &[String],
    ) -> Result<WordEntry> {
        let entry = WordEntry {
            id: None,
            word: normalize::normalize_word(Some(word))?,
            language: normalize::normalize_language(language),
            category: normalize::normalize_category(category),
            variations: normalize::normalize_variations(variations),
        };
        if store::find_by_identity(self.store.as_ref(), &entry.identity())
            .await?
            .is_some()
        {
            return Err(DictError::DuplicateIdentity {
                word: entry.word,
                language: entry.language,
            });
        }
        info!("Adding '{}' ({}, {})", entry.word, entry.language, entry.category);
        self.store.insert(&entry).await
    }

    pub async fn edit_group(&self, original: &WordGroup, edit: &GroupEdit) -> Result<WordEntry> {
        group::edit_group(self.store.as_ref(), original, edit).await
    }

    pub async fn delete_group(&self, group: &WordGroup) -> Result<()> {
        group::delete_group(self.store.as_ref(), group).await
    }
}
