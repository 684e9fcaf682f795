//! Main word + variations grouping over the flat dictionary.
//!
//! Groups are derived views. They are rebuilt from [`WordEntry`] values on
//! every read and every edit goes back through exactly one entry.

use crate::error::{DictError, Result};
use crate::models::{Category, Language, WordEntry, WordGroup};
use crate::normalize;
use crate::store::DictionaryStore;
use log::{debug, info};
use serde::Serialize;

/// Groups for all entries that have at least one variation, in entry order.
///
/// Entries without variations are simply not displayed as groups; they are
/// still in the dictionary.
pub fn build_groups(entries: &[WordEntry]) -> Vec<WordGroup> {
    entries
        .iter()
        .filter(|entry| !entry.variations.is_empty())
        .map(WordGroup::from)
        .collect()
}

/// Search and exact-match filters over groups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupFilter {
    /// Case-insensitive substring of the main word or any variation.
    pub search: Option<String>,
    pub language: Option<Language>,
    pub category: Option<Category>,
}

impl GroupFilter {
    /// Builds a filter from raw UI input. Blank values mean "no filter";
    /// language and category go through the normalizer.
    pub fn from_raw(search: Option<&str>, language: Option<&str>, category: Option<&str>) -> Self {
        GroupFilter {
            search: present(search).map(str::to_lowercase),
            language: present(language).map(|l| normalize::normalize_language(Some(l))),
            category: present(category).map(|c| normalize::normalize_category(Some(c))),
        }
    }

    pub fn matches(&self, group: &WordGroup) -> bool {
        if self.language.is_some_and(|language| language != group.language) {
            return false;
        }
        if self.category.is_some_and(|category| category != group.category) {
            return false;
        }
        match self.search.as_deref() {
            None => true,
            Some(term) => {
                let term = term.to_lowercase();
                group.main_word.to_lowercase().contains(&term)
                    || group
                        .variations
                        .iter()
                        .any(|variation| variation.to_lowercase().contains(&term))
            }
        }
    }
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

pub fn filter_groups(groups: &[WordGroup], filter: &GroupFilter) -> Vec<WordGroup> {
    groups
        .iter()
        .filter(|group| filter.matches(group))
        .cloned()
        .collect()
}

/// One window of a paginated sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    /// 1-based.
    pub page: usize,
    pub page_size: usize,
    pub total_items: usize,
    pub total_pages: usize,
}

/// Cuts page `page` (1-based) of `page_size` items out of `items`.
///
/// Page 1 of an empty sequence is an empty page; any page past the end is
/// [`DictError::PageOutOfRange`].
pub fn paginate<T: Clone>(items: &[T], page: usize, page_size: usize) -> Result<Page<T>> {
    if page_size == 0 {
        return Err(DictError::InvalidArgument(
            "page size must be at least 1".to_string(),
        ));
    }
    let total_pages = items.len().div_ceil(page_size);
    if page == 0 || page > total_pages.max(1) {
        return Err(DictError::PageOutOfRange { page, total_pages });
    }
    let start = (page - 1) * page_size;
    let end = (start + page_size).min(items.len());
    Ok(Page {
        items: items[start..end].to_vec(),
        page,
        page_size,
        total_items: items.len(),
        total_pages,
    })
}

/// Browsing state for the group list: filter plus current page.
///
/// Changing any part of the filter goes back to page 1.
#[derive(Debug, Clone)]
pub struct GroupBrowser {
    groups: Vec<WordGroup>,
    filter: GroupFilter,
    page: usize,
    page_size: usize,
}

impl GroupBrowser {
    pub fn new(entries: &[WordEntry], page_size: usize) -> Self {
        GroupBrowser {
            groups: build_groups(entries),
            filter: GroupFilter::default(),
            page: 1,
            page_size: page_size.max(1),
        }
    }

    /// Rebuilds the groups from a fresh read of the dictionary. Keeps the
    /// filter and pulls the page back if the list got shorter.
    pub fn refresh(&mut self, entries: &[WordEntry]) {
        self.groups = build_groups(entries);
        let last_page = self.filtered().len().div_ceil(self.page_size).max(1);
        if self.page > last_page {
            debug!("Page {} no longer exists after refresh, moving to {}", self.page, last_page);
            self.page = last_page;
        }
    }

    pub fn filter(&self) -> &GroupFilter {
        &self.filter
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn set_filter(&mut self, filter: GroupFilter) {
        self.filter = filter;
        self.page = 1;
    }

    pub fn set_search(&mut self, search: Option<&str>) {
        self.filter.search = present(search).map(str::to_lowercase);
        self.page = 1;
    }

    pub fn set_language(&mut self, language: Option<Language>) {
        self.filter.language = language;
        self.page = 1;
    }

    pub fn set_category(&mut self, category: Option<Category>) {
        self.filter.category = category;
        self.page = 1;
    }

    pub fn set_page_size(&mut self, page_size: usize) {
        self.page_size = page_size.max(1);
        self.page = 1;
    }

    pub fn go_to_page(&mut self, page: usize) -> Result<()> {
        // Validate against the current filtered list before moving.
        paginate(&self.filtered(), page, self.page_size)?;
        self.page = page;
        Ok(())
    }

    pub fn filtered(&self) -> Vec<WordGroup> {
        filter_groups(&self.groups, &self.filter)
    }

    pub fn current_page(&self) -> Result<Page<WordGroup>> {
        paginate(&self.filtered(), self.page, self.page_size)
    }
}

/// Changes to apply to a group. `None` leaves the field as it is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupEdit {
    pub main_word: Option<String>,
    pub language: Option<String>,
    pub category: Option<String>,
    pub variations: Option<Vec<String>>,
}

/// Applies `edit` as a single update of the entry behind `original`.
pub async fn edit_group<S>(store: &S, original: &WordGroup, edit: &GroupEdit) -> Result<WordEntry>
where
    S: DictionaryStore + ?Sized,
{
    let entries = store.fetch_all().await?;
    let key = original.identity();
    let current = entries
        .iter()
        .find(|entry| entry.identity() == key)
        .ok_or_else(|| DictError::NotFound(format!("no entry for {}", key)))?;
    let id = current
        .id
        .clone()
        .ok_or_else(|| DictError::Internal(format!("stored entry for {} has no id", key)))?;

    let mut updated = current.clone();
    if let Some(word) = edit.main_word.as_deref() {
        updated.word = normalize::normalize_word(Some(word))?;
    }
    if let Some(language) = edit.language.as_deref() {
        updated.language = normalize::normalize_language(Some(language));
    }
    if let Some(category) = edit.category.as_deref() {
        updated.category = normalize::normalize_category(Some(category));
    }
    if let Some(variations) = &edit.variations {
        updated.variations = normalize::normalize_variations(variations);
    }

    let new_key = updated.identity();
    if new_key != key && entries.iter().any(|entry| entry.identity() == new_key) {
        return Err(DictError::DuplicateIdentity {
            word: updated.word,
            language: updated.language,
        });
    }

    info!("Updating group {} as entry {}", key, id);
    store.update(&id, &updated).await
}

/// Deletes the one entry behind `group`, variations included.
pub async fn delete_group<S>(store: &S, group: &WordGroup) -> Result<()>
where
    S: DictionaryStore + ?Sized,
{
    let key = group.identity();
    let entry = crate::store::find_by_identity(store, &key)
        .await?
        .ok_or_else(|| DictError::NotFound(format!("no entry for {}", key)))?;
    let id = entry
        .id
        .ok_or_else(|| DictError::Internal(format!("stored entry for {} has no id", key)))?;
    info!("Deleting group {} (entry {})", key, id);
    store.delete(&id).await
}
