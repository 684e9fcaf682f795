use serde::{Deserialize, Serialize};
use std::fmt;

// --- Enumerations ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Language {
    English,
    Filipino,
}

impl Language {
    pub const ALL: [Language; 2] = [Language::English, Language::Filipino];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::English => "English",
            Language::Filipino => "Filipino",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Profanity,
    Slur,
    Bullying,
    Sexual,
    Other,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Profanity,
        Category::Slur,
        Category::Bullying,
        Category::Sexual,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Profanity => "profanity",
            Category::Slur => "slur",
            Category::Bullying => "bullying",
            Category::Sexual => "sexual",
            Category::Other => "other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Dictionary Records ---

/// The canonical dictionary record.
///
/// Identity is `(lowercase(word), language)`, see [`WordEntry::identity`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordEntry {
    /// Store-assigned identifier. `None` until the entry has been inserted.
    #[serde(default, alias = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub word: String,
    pub language: Language,
    pub category: Category,
    #[serde(default)]
    pub variations: Vec<String>,
}

impl WordEntry {
    pub fn new(word: impl Into<String>, language: Language, category: Category) -> Self {
        WordEntry {
            id: None,
            word: word.into(),
            language,
            category,
            variations: Vec::new(),
        }
    }

    pub fn with_variations<I, S>(mut self, variations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.variations = variations.into_iter().map(Into::into).collect();
        self
    }

    pub fn identity(&self) -> IdentityKey {
        IdentityKey::new(&self.word, self.language)
    }
}

/// The `(word, language)` pair that uniquely determines a [`WordEntry`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityKey {
    pub word: String,
    pub language: Language,
}

impl IdentityKey {
    pub fn new(word: &str, language: Language) -> Self {
        IdentityKey {
            word: word.trim().to_lowercase(),
            language,
        }
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.word, self.language)
    }
}

/// A raw record as read from an upload, before normalization.
///
/// Every field may be missing or use loose spelling. Candidates are never
/// written to a store directly; the reconciler normalizes them first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportCandidate {
    /// 1-based line number (text formats) or element number (JSON).
    pub position: usize,
    pub word: Option<String>,
    pub language: Option<String>,
    pub category: Option<String>,
    pub variations: Vec<String>,
}

impl ImportCandidate {
    pub fn new(position: usize, word: impl Into<String>) -> Self {
        ImportCandidate {
            position,
            word: Some(word.into()),
            ..Default::default()
        }
    }
}

/// Caller-supplied policy for a bulk import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportPolicy {
    /// Replace category and variations of entries that already exist.
    pub overwrite_existing: bool,
    /// Count invalid records as skipped instead of reporting them as errors.
    pub skip_invalid: bool,
}

impl Default for ImportPolicy {
    fn default() -> Self {
        ImportPolicy {
            overwrite_existing: false,
            skip_invalid: true,
        }
    }
}

/// Summary of one bulk-import run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub total: usize,
    pub imported: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
    /// Set when the progress callback stopped the run early.
    #[serde(default)]
    pub cancelled: bool,
}

impl ReconciliationResult {
    /// `total == imported + updated + skipped + errors.len()`.
    pub fn is_consistent(&self) -> bool {
        self.total == self.imported + self.updated + self.skipped + self.errors.len()
    }

    /// The first `limit` error messages and how many were left out.
    pub fn error_preview(&self, limit: usize) -> (&[String], usize) {
        let shown = self.errors.len().min(limit);
        (&self.errors[..shown], self.errors.len() - shown)
    }
}

// --- Derived Views ---

/// Display cluster of one entry and its variations.
///
/// Built fresh from [`WordEntry`] values on every read; edits go back
/// through the entry identified by `main_word` and `language`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WordGroup {
    pub main_word: String,
    pub language: Language,
    pub category: Category,
    pub variations: Vec<String>,
    pub word_count: usize,
}

impl WordGroup {
    pub fn identity(&self) -> IdentityKey {
        IdentityKey::new(&self.main_word, self.language)
    }
}

impl From<&WordEntry> for WordGroup {
    fn from(entry: &WordEntry) -> Self {
        WordGroup {
            main_word: entry.word.clone(),
            language: entry.language,
            category: entry.category,
            variations: entry.variations.clone(),
            word_count: 1 + entry.variations.len(),
        }
    }
}

/// Serializable export of (part of) the dictionary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportDocument {
    pub words: Vec<WordEntry>,
    #[serde(rename = "totalCount")]
    pub total_count: usize,
}

// --- Upload Formats ---

/// The upload and export shapes the parser understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputFormat {
    /// A JSON array of word objects, or an object with a `words` array.
    Json,
    /// Comma- or tab-separated rows after a header line.
    Csv,
    /// `word|language|category` per line.
    Pipe,
    /// One bare word per line.
    WordList,
}

// Implement Display for InputFormat for easier printing
impl std::fmt::Display for InputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                InputFormat::Json => "json",
                InputFormat::Csv => "csv",
                InputFormat::Pipe => "pipe",
                InputFormat::WordList => "words",
            }
        )
    }
}

// Implement FromStr for InputFormat for CLI parsing etc.
impl std::str::FromStr for InputFormat {
    type Err = String; // Simple error type
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(InputFormat::Json),
            "csv" | "tsv" => Ok(InputFormat::Csv),
            "pipe" | "psv" => Ok(InputFormat::Pipe),
            "words" | "txt" | "text" | "list" => Ok(InputFormat::WordList),
            _ => Err(format!("Invalid format: {}", s)),
        }
    }
}
