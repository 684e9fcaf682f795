//! Normalization of loosely-typed word, language and category input.
//!
//! This is the only place that decides defaults. Every other module asks
//! these functions instead of spelling out `English` or `other` itself.

use crate::error::{DictError, Result};
use crate::models::{Category, IdentityKey, Language};

/// Language used when the input names no recognizable language.
pub const DEFAULT_LANGUAGE: Language = Language::English;

/// Category used when neither an exact name nor a keyword matches.
pub const DEFAULT_CATEGORY: Category = Category::Other;

const FILIPINO_MARKERS: [&str; 2] = ["filipino", "tagalog"];

// Checked in order; the first keyword found wins.
const CATEGORY_KEYWORDS: [(&str, Category); 6] = [
    ("hate", Category::Slur),
    ("harassment", Category::Slur),
    ("violence", Category::Bullying),
    ("threat", Category::Bullying),
    ("spam", Category::Other),
    ("misinformation", Category::Other),
];

/// Language and category assigned to bare words from a plain word list.
pub fn word_list_defaults() -> (Language, Category) {
    (Language::English, Category::Profanity)
}

/// Maps any input onto a [`Language`]. Never fails.
pub fn normalize_language(input: Option<&str>) -> Language {
    let lowered = input.unwrap_or_default().to_lowercase();
    if FILIPINO_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        Language::Filipino
    } else {
        DEFAULT_LANGUAGE
    }
}

/// Maps any input onto a [`Category`]. Never fails.
pub fn normalize_category(input: Option<&str>) -> Category {
    let lowered = input.unwrap_or_default().trim().to_lowercase();

    if let Some(exact) = Category::ALL.iter().find(|c| c.as_str() == lowered) {
        return *exact;
    }

    CATEGORY_KEYWORDS
        .iter()
        .find(|(keyword, _)| lowered.contains(keyword))
        .map(|(_, category)| *category)
        .unwrap_or(DEFAULT_CATEGORY)
}

/// Trims the word; an empty result is an [`DictError::InvalidWord`].
pub fn normalize_word(input: Option<&str>) -> Result<String> {
    let trimmed = input.unwrap_or_default().trim();
    if trimmed.is_empty() {
        return Err(DictError::InvalidWord);
    }
    Ok(trimmed.to_string())
}

/// Trims variations, drops blanks and exact duplicates. First occurrence keeps
/// its position.
pub fn normalize_variations<S: AsRef<str>>(variations: &[S]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(variations.len());
    for variation in variations {
        let trimmed = variation.as_ref().trim();
        if !trimmed.is_empty() && !out.iter().any(|v| v == trimmed) {
            out.push(trimmed.to_string());
        }
    }
    out
}

/// Identity key for a raw word and language pair.
pub fn identity_key(word: &str, language: Language) -> IdentityKey {
    IdentityKey::new(word, language)
}
