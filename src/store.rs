//! The Dictionary Store Gateway.
//!
//! Persistence is an external collaborator. The engine only needs the four
//! operations of [`DictionaryStore`]; [`MemoryStore`] backs tests and
//! scratch sessions, `SqliteStore` and `RestStore` are the real backends.

use crate::error::{DictError, Result};
use crate::models::{IdentityKey, WordEntry};
use async_trait::async_trait;
use log::debug;
use std::collections::BTreeMap;
use std::sync::RwLock;

/// Persistence contract for word entries.
///
/// Implementations report an unreachable backend as
/// [`DictError::StoreUnavailable`] and per-record refusals (e.g. a duplicate
/// identity) as [`DictError::StoreRejected`].
#[async_trait]
pub trait DictionaryStore: Send + Sync {
    async fn fetch_all(&self) -> Result<Vec<WordEntry>>;
    /// Stores a new entry and returns it with its assigned id.
    async fn insert(&self, entry: &WordEntry) -> Result<WordEntry>;
    async fn update(&self, id: &str, entry: &WordEntry) -> Result<WordEntry>;
    async fn delete(&self, id: &str) -> Result<()>;
}

/// Finds the stored entry with the given identity, if any.
pub async fn find_by_identity<S>(store: &S, key: &IdentityKey) -> Result<Option<WordEntry>>
where
    S: DictionaryStore + ?Sized,
{
    Ok(store
        .fetch_all()
        .await?
        .into_iter()
        .find(|entry| &entry.identity() == key))
}

// ── MemoryStore ──

#[derive(Default)]
struct MemoryState {
    next_id: u64,
    entries: BTreeMap<u64, WordEntry>,
}

/// In-memory store. Ids are sequential integers rendered as strings, so
/// `fetch_all` returns entries in insertion order.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store pre-populated with `entries` (ids are reassigned).
    pub fn with_entries(entries: impl IntoIterator<Item = WordEntry>) -> Self {
        let store = Self::new();
        {
            let mut state = store.inner.write().unwrap_or_else(|e| e.into_inner());
            for mut entry in entries {
                state.next_id += 1;
                let id = state.next_id;
                entry.id = Some(id.to_string());
                state.entries.insert(id, entry);
            }
        }
        store
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn parse_id(id: &str) -> Result<u64> {
    id.parse()
        .map_err(|_| DictError::NotFound(format!("no entry with id '{}'", id)))
}

fn poisoned<T>(_: T) -> DictError {
    DictError::Internal("Lock poisoned".to_string())
}

fn ensure_unique(state: &MemoryState, entry: &WordEntry, except: Option<u64>) -> Result<()> {
    let key = entry.identity();
    let clash = state
        .entries
        .iter()
        .any(|(id, stored)| Some(*id) != except && stored.identity() == key);
    if clash {
        return Err(DictError::StoreRejected(format!(
            "an entry for {} already exists",
            key
        )));
    }
    Ok(())
}

#[async_trait]
impl DictionaryStore for MemoryStore {
    async fn fetch_all(&self) -> Result<Vec<WordEntry>> {
        let state = self.inner.read().map_err(poisoned)?;
        Ok(state.entries.values().cloned().collect())
    }

    async fn insert(&self, entry: &WordEntry) -> Result<WordEntry> {
        let mut state = self.inner.write().map_err(poisoned)?;
        ensure_unique(&state, entry, None)?;
        state.next_id += 1;
        let id = state.next_id;
        let mut stored = entry.clone();
        stored.id = Some(id.to_string());
        state.entries.insert(id, stored.clone());
        debug!("MemoryStore: inserted '{}' as {}", stored.word, id);
        Ok(stored)
    }

    async fn update(&self, id: &str, entry: &WordEntry) -> Result<WordEntry> {
        let numeric = parse_id(id)?;
        let mut state = self.inner.write().map_err(poisoned)?;
        if !state.entries.contains_key(&numeric) {
            return Err(DictError::NotFound(format!("no entry with id '{}'", id)));
        }
        ensure_unique(&state, entry, Some(numeric))?;
        let mut stored = entry.clone();
        stored.id = Some(id.to_string());
        state.entries.insert(numeric, stored.clone());
        Ok(stored)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let numeric = parse_id(id)?;
        let mut state = self.inner.write().map_err(poisoned)?;
        state
            .entries
            .remove(&numeric)
            .map(|_| ())
            .ok_or_else(|| DictError::NotFound(format!("no entry with id '{}'", id)))
    }
}
