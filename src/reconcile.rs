//! Bulk reconciliation of import candidates against the stored dictionary.
//!
//! [`Reconciler::decide`] is the pure per-record decision; [`import_words`]
//! applies decisions to a store one record at a time and tallies the
//! [`ReconciliationResult`].

use crate::error::{DictError, ImportFailure, Result};
use crate::models::{IdentityKey, ImportCandidate, ImportPolicy, ReconciliationResult, WordEntry};
use crate::normalize;
use crate::progress::{ProgressCallback, ProgressUpdate, report};
use crate::store::DictionaryStore;
use log::{debug, info, warn};
use std::collections::HashMap;

const STAGE: &str = "Reconciling words";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    /// Present in the store before this batch started.
    Stored,
    /// Inserted by an earlier candidate of this batch.
    Batch,
}

#[derive(Debug, Clone)]
struct Slot {
    origin: Origin,
    entry: WordEntry,
}

/// What to do with one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The identity is new: insert the normalized entry.
    Insert(WordEntry),
    /// Overwrite category and variations of a pre-existing entry.
    Overwrite { id: String, entry: WordEntry },
    /// A later duplicate of an entry this batch inserted; last one wins.
    Replace { id: String, entry: WordEntry },
    /// The identity exists and the policy forbids overwriting.
    KeepExisting,
    /// Invalid record, counted as skipped.
    SkipInvalid,
    /// Invalid record, reported with this message.
    Reject(String),
}

/// Tracks which identities exist while a batch is applied.
pub struct Reconciler {
    policy: ImportPolicy,
    index: HashMap<IdentityKey, Slot>,
}

impl Reconciler {
    pub fn new(existing: Vec<WordEntry>, policy: ImportPolicy) -> Self {
        let mut index = HashMap::with_capacity(existing.len());
        for entry in existing {
            if entry.id.is_none() {
                warn!("Stored entry '{}' has no id; it cannot be updated", entry.word);
                continue;
            }
            let key = entry.identity();
            let slot = Slot {
                origin: Origin::Stored,
                entry,
            };
            if let Some(previous) = index.insert(key.clone(), slot) {
                warn!(
                    "Store holds more than one entry for {} (id {:?}); the later one wins",
                    key, previous.entry.id
                );
            }
        }
        Reconciler { policy, index }
    }

    pub fn decide(&self, candidate: &ImportCandidate) -> Decision {
        let word = match normalize::normalize_word(candidate.word.as_deref()) {
            Ok(word) => word,
            Err(_) if self.policy.skip_invalid => return Decision::SkipInvalid,
            Err(_) => {
                return Decision::Reject(format!(
                    "Record {}: word is missing or empty",
                    candidate.position
                ));
            }
        };

        let incoming = WordEntry {
            id: None,
            word,
            language: normalize::normalize_language(candidate.language.as_deref()),
            category: normalize::normalize_category(candidate.category.as_deref()),
            variations: normalize::normalize_variations(&candidate.variations),
        };

        let Some(slot) = self.index.get(&incoming.identity()) else {
            return Decision::Insert(incoming);
        };
        // Slots are only created for entries that carry an id.
        let id = slot.entry.id.clone().unwrap_or_default();

        match slot.origin {
            Origin::Batch => Decision::Replace {
                entry: WordEntry {
                    id: Some(id.clone()),
                    ..incoming
                },
                id,
            },
            Origin::Stored if self.policy.overwrite_existing => {
                let mut merged = slot.entry.clone();
                merged.category = incoming.category;
                merged.variations = incoming.variations;
                Decision::Overwrite { id, entry: merged }
            }
            Origin::Stored => Decision::KeepExisting,
        }
    }

    /// Records an entry this batch inserted.
    pub fn commit_insert(&mut self, stored: WordEntry) {
        if stored.id.is_none() {
            warn!(
                "Store returned '{}' without an id; later duplicates in this batch will not be merged",
                stored.word
            );
            return;
        }
        self.index.insert(
            stored.identity(),
            Slot {
                origin: Origin::Batch,
                entry: stored,
            },
        );
    }

    /// Refreshes the tracked copy of an entry after an update.
    pub fn commit_update(&mut self, stored: WordEntry) {
        let key = stored.identity();
        let origin = self
            .index
            .get(&key)
            .map(|slot| slot.origin)
            .unwrap_or(Origin::Stored);
        self.index.insert(
            key,
            Slot {
                origin,
                entry: stored,
            },
        );
    }
}

/// Applies `candidates` to `store` under `policy`, in order.
///
/// Record-level problems end up in the result. A fatal store error stops
/// the run; the returned [`ImportFailure`] holds the error unchanged and
/// the tally of everything processed before it. Writes already made are
/// not rolled back, and nothing is retried.
pub async fn import_words<S>(
    store: &S,
    candidates: Vec<ImportCandidate>,
    policy: ImportPolicy,
    mut progress: Option<ProgressCallback>,
) -> std::result::Result<ReconciliationResult, ImportFailure>
where
    S: DictionaryStore + ?Sized,
{
    let total_items = candidates.len() as u64;
    info!(
        "Reconciling {} candidate records (overwrite_existing={}, skip_invalid={})...",
        total_items, policy.overwrite_existing, policy.skip_invalid
    );

    let existing = store.fetch_all().await?;
    debug!("Loaded {} existing entries for reconciliation.", existing.len());
    let mut reconciler = Reconciler::new(existing, policy);
    let mut result = ReconciliationResult::default();

    let mut keep_going = report(
        &mut progress,
        ProgressUpdate::new_stage(STAGE.to_string(), Some(total_items)),
    );

    for (processed, candidate) in candidates.iter().enumerate() {
        if processed > 0 {
            keep_going = report(
                &mut progress,
                ProgressUpdate {
                    stage_description: STAGE.to_string(),
                    current_item: processed as u64,
                    total_items: Some(total_items),
                    message: candidate.word.clone(),
                },
            );
        }
        if !keep_going {
            info!(
                "Import cancelled after {} of {} records.",
                processed, total_items
            );
            result.cancelled = true;
            break;
        }

        let decision = reconciler.decide(candidate);
        if let Err(error) = apply(store, &mut reconciler, &mut result, candidate, decision).await {
            warn!(
                "Aborting import at record {}: {}",
                candidate.position, error
            );
            return Err(ImportFailure {
                error,
                partial: result,
            });
        }
    }

    if !result.cancelled {
        report(
            &mut progress,
            ProgressUpdate {
                stage_description: STAGE.to_string(),
                current_item: total_items,
                total_items: Some(total_items),
                message: Some("Import complete.".to_string()),
            },
        );
    }

    info!(
        "Import finished: {} imported, {} updated, {} skipped, {} errors (of {}).",
        result.imported,
        result.updated,
        result.skipped,
        result.errors.len(),
        result.total
    );
    debug_assert!(result.is_consistent());
    Ok(result)
}

async fn apply<S>(
    store: &S,
    reconciler: &mut Reconciler,
    result: &mut ReconciliationResult,
    candidate: &ImportCandidate,
    decision: Decision,
) -> Result<()>
where
    S: DictionaryStore + ?Sized,
{
    match decision {
        Decision::SkipInvalid => {
            debug!("Record {}: invalid, skipped", candidate.position);
            result.skipped += 1;
        }
        Decision::Reject(message) => {
            debug!("{}", message);
            result.errors.push(message);
        }
        Decision::KeepExisting => {
            debug!("Record {}: already stored, kept", candidate.position);
            result.skipped += 1;
        }
        Decision::Insert(entry) => match store.insert(&entry).await {
            Ok(saved) => {
                debug!("Record {}: inserted '{}'", candidate.position, saved.word);
                reconciler.commit_insert(saved);
                result.imported += 1;
            }
            Err(e) => record_store_error(result, candidate, &entry, e)?,
        },
        Decision::Overwrite { id, entry } | Decision::Replace { id, entry } => {
            match store.update(&id, &entry).await {
                Ok(saved) => {
                    debug!("Record {}: updated '{}' ({})", candidate.position, saved.word, id);
                    reconciler.commit_update(saved);
                    result.updated += 1;
                }
                Err(e) => record_store_error(result, candidate, &entry, e)?,
            }
        }
    }
    result.total += 1;
    Ok(())
}

fn record_store_error(
    result: &mut ReconciliationResult,
    candidate: &ImportCandidate,
    entry: &WordEntry,
    error: DictError,
) -> Result<()> {
    if error.is_fatal() {
        return Err(error);
    }
    result.errors.push(format!(
        "Record {}: could not save '{}': {}",
        candidate.position, entry.word, error
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, InputFormat, Language};
    use crate::parse::parse_candidates;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn candidate(position: usize, word: &str, language: &str, category: &str) -> ImportCandidate {
        ImportCandidate {
            position,
            word: Some(word.to_string()),
            language: Some(language.to_string()),
            category: Some(category.to_string()),
            variations: Vec::new(),
        }
    }

    fn policy(overwrite_existing: bool, skip_invalid: bool) -> ImportPolicy {
        ImportPolicy {
            overwrite_existing,
            skip_invalid,
        }
    }

    #[tokio::test]
    async fn test_csv_scenario_into_empty_dictionary() {
        let csv = "word,language,category\nbadword,English,profanity\nmasamang salita,Filipino,bullying\n";
        let candidates = parse_candidates(csv, InputFormat::Csv).unwrap();
        let store = MemoryStore::new();

        let result = import_words(&store, candidates, policy(false, true), None)
            .await
            .unwrap();

        assert_eq!(result.total, 2);
        assert_eq!(result.imported, 2);
        assert_eq!(result.updated, 0);
        assert_eq!(result.skipped, 0);
        assert!(result.errors.is_empty());
        let stored = store.fetch_all().await.unwrap();
        assert_eq!(stored[1].language, Language::Filipino);
        assert_eq!(stored[1].category, Category::Bullying);
    }

    #[tokio::test]
    async fn test_duplicates_within_batch_last_one_wins() {
        let store = MemoryStore::new();
        let mut later = candidate(2, "GAGO", "filipino", "slur");
        later.variations = vec!["gaga".to_string()];
        let batch = vec![candidate(1, "gago", "Filipino", "profanity"), later];

        let result = import_words(&store, batch, policy(false, true), None)
            .await
            .unwrap();

        assert_eq!(result.imported, 1);
        assert_eq!(result.updated, 1);
        assert_eq!(result.total, 2);
        let stored = store.fetch_all().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].word, "GAGO");
        assert_eq!(stored[0].category, Category::Slur);
        assert_eq!(stored[0].variations, vec!["gaga"]);
    }

    #[tokio::test]
    async fn test_existing_entry_kept_without_overwrite() {
        let original = WordEntry::new("Gago", Language::Filipino, Category::Profanity)
            .with_variations(["gaga"]);
        let store = MemoryStore::with_entries(vec![original]);

        let result = import_words(
            &store,
            vec![candidate(1, "gago", "Filipino", "slur")],
            policy(false, true),
            None,
        )
        .await
        .unwrap();

        assert_eq!(result.skipped, 1);
        assert_eq!(result.imported + result.updated, 0);
        let stored = store.fetch_all().await.unwrap();
        assert_eq!(stored[0].category, Category::Profanity);
        assert_eq!(stored[0].variations, vec!["gaga"]);
    }

    #[tokio::test]
    async fn test_existing_entry_overwritten_keeps_stored_word() {
        let original = WordEntry::new("Gago", Language::Filipino, Category::Profanity)
            .with_variations(["gaga"]);
        let store = MemoryStore::with_entries(vec![original]);
        let mut incoming = candidate(1, "GAGO", "Tagalog", "hate speech");
        incoming.variations = vec!["gagoh".to_string(), "gagoh".to_string()];

        let result = import_words(&store, vec![incoming], policy(true, true), None)
            .await
            .unwrap();

        assert_eq!(result.updated, 1);
        let stored = store.fetch_all().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].word, "Gago");
        assert_eq!(stored[0].category, Category::Slur);
        assert_eq!(stored[0].variations, vec!["gagoh"]);
    }

    #[tokio::test]
    async fn test_invalid_records_skipped_or_reported() {
        let batch = || {
            vec![
                candidate(1, "ok", "English", "profanity"),
                candidate(2, "   ", "English", "profanity"),
                ImportCandidate {
                    position: 3,
                    ..Default::default()
                },
            ]
        };

        let store = MemoryStore::new();
        let skipped = import_words(&store, batch(), policy(false, true), None)
            .await
            .unwrap();
        assert_eq!(skipped.skipped, 2);
        assert!(skipped.errors.is_empty());

        let store = MemoryStore::new();
        let reported = import_words(&store, batch(), policy(false, false), None)
            .await
            .unwrap();
        assert_eq!(reported.skipped, 0);
        assert_eq!(reported.errors.len(), 2);
        assert!(reported.errors[0].starts_with("Record 2:"));
        assert!(reported.errors[1].starts_with("Record 3:"));
        // Invalid records are never persisted either way.
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_totals_always_add_up() {
        let seed = vec![
            WordEntry::new("badword", Language::English, Category::Profanity),
            WordEntry::new("ulol", Language::Filipino, Category::Bullying),
        ];
        let batch = vec![
            candidate(1, "badword", "English", "slur"),
            candidate(2, "", "English", "slur"),
            candidate(3, "newword", "English", "spam"),
            candidate(4, "NEWWORD", "English", "threat"),
            candidate(5, "ulol", "Tagalog", "other"),
            candidate(6, "ulol", "English", "other"),
        ];
        for overwrite in [false, true] {
            for skip_invalid in [false, true] {
                let store = MemoryStore::with_entries(seed.clone());
                let result = import_words(&store, batch.clone(), policy(overwrite, skip_invalid), None)
                    .await
                    .unwrap();
                assert!(result.is_consistent(), "inconsistent: {:?}", result);
                assert_eq!(result.total, batch.len());
                assert_eq!(result.imported, 2);
            }
        }
    }

    #[tokio::test]
    async fn test_same_batch_twice_is_idempotent() {
        let batch = vec![
            candidate(1, "gago", "Filipino", "profanity"),
            candidate(2, "badword", "English", "slur"),
            candidate(3, "Gago", "Filipino", "bullying"),
        ];
        let store = MemoryStore::new();
        import_words(&store, batch.clone(), policy(true, true), None)
            .await
            .unwrap();
        let first = store.fetch_all().await.unwrap();

        let second_run = import_words(&store, batch, policy(true, true), None)
            .await
            .unwrap();
        assert_eq!(second_run.imported, 0);
        assert_eq!(store.fetch_all().await.unwrap(), first);
    }

    #[test]
    fn test_decide_is_pure() {
        let mut stored = WordEntry::new("gago", Language::Filipino, Category::Profanity);
        stored.id = Some("7".to_string());
        let reconciler = Reconciler::new(vec![stored], policy(false, false));

        assert_eq!(
            reconciler.decide(&candidate(1, "gago", "filipino", "slur")),
            Decision::KeepExisting
        );
        assert!(matches!(
            reconciler.decide(&candidate(2, "gago", "English", "slur")),
            Decision::Insert(_)
        ));
        assert!(matches!(
            reconciler.decide(&candidate(3, " ", "English", "slur")),
            Decision::Reject(_)
        ));
    }

    /// Wraps a MemoryStore and fails in configurable ways.
    struct FlakyStore {
        inner: MemoryStore,
        inserts: AtomicUsize,
        fail_after_inserts: usize,
        reject_word: Option<&'static str>,
    }

    #[async_trait]
    impl DictionaryStore for FlakyStore {
        async fn fetch_all(&self) -> Result<Vec<WordEntry>> {
            self.inner.fetch_all().await
        }

        async fn insert(&self, entry: &WordEntry) -> Result<WordEntry> {
            if self.reject_word == Some(entry.word.as_str()) {
                return Err(DictError::StoreRejected("blocked by backend".to_string()));
            }
            if self.inserts.fetch_add(1, Ordering::SeqCst) >= self.fail_after_inserts {
                return Err(DictError::StoreUnavailable("connection refused".to_string()));
            }
            self.inner.insert(entry).await
        }

        async fn update(&self, id: &str, entry: &WordEntry) -> Result<WordEntry> {
            self.inner.update(id, entry).await
        }

        async fn delete(&self, id: &str) -> Result<()> {
            self.inner.delete(id).await
        }
    }

    #[tokio::test]
    async fn test_unavailable_store_aborts_with_partial_result() {
        let store = FlakyStore {
            inner: MemoryStore::new(),
            inserts: AtomicUsize::new(0),
            fail_after_inserts: 2,
            reject_word: None,
        };
        let batch = vec![
            candidate(1, "one", "English", "other"),
            candidate(2, "", "English", "other"),
            candidate(3, "two", "English", "other"),
            candidate(4, "three", "English", "other"),
            candidate(5, "four", "English", "other"),
        ];

        let failure = import_words(&store, batch, policy(false, true), None)
            .await
            .unwrap_err();

        assert!(matches!(failure.error, DictError::StoreUnavailable(_)));
        assert_eq!(failure.partial.total, 3);
        assert_eq!(failure.partial.imported, 2);
        assert_eq!(failure.partial.skipped, 1);
        assert!(failure.partial.is_consistent());
        assert_eq!(store.inner.len(), 2);
    }

    #[tokio::test]
    async fn test_rejected_record_is_folded_into_errors() {
        let store = FlakyStore {
            inner: MemoryStore::new(),
            inserts: AtomicUsize::new(0),
            fail_after_inserts: usize::MAX,
            reject_word: Some("blocked"),
        };
        let batch = vec![
            candidate(1, "blocked", "English", "other"),
            candidate(2, "fine", "English", "other"),
        ];

        let result = import_words(&store, batch, policy(false, true), None)
            .await
            .unwrap();

        assert_eq!(result.imported, 1);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("blocked"));
        assert!(result.is_consistent());
    }

    #[tokio::test]
    async fn test_progress_callback_can_cancel() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let callback: ProgressCallback = Box::new(move |_update| {
            // Stage start and the first record pass; the second record stops the run.
            seen.fetch_add(1, Ordering::SeqCst) < 1
        });
        let store = MemoryStore::new();
        let batch = vec![
            candidate(1, "one", "English", "other"),
            candidate(2, "two", "English", "other"),
            candidate(3, "three", "English", "other"),
        ];

        let result = import_words(&store, batch, policy(false, true), Some(callback))
            .await
            .unwrap();

        assert!(result.cancelled);
        assert_eq!(result.total, 1);
        assert_eq!(store.len(), 1);
        assert!(result.is_consistent());
    }
}
