//! Exporting the dictionary in the upload formats.
//!
//! Every rendering except the word list re-imports to the same entries, so
//! an export followed by an overwriting import is a no-op on the store.

use crate::error::{DictError, Result};
use crate::models::{Category, ExportDocument, InputFormat, Language, WordEntry};
use crate::parse::escape;
use crate::store::DictionaryStore;
use csv::{Terminator, WriterBuilder};
use log::{debug, warn};

const CSV_HEADER: [&str; 4] = ["word", "language", "category", "variations"];

/// Collects entries matching the optional language and category filters.
/// Store ids are dropped; they mean nothing to another store.
pub async fn export_words<S>(
    store: &S,
    language: Option<Language>,
    category: Option<Category>,
) -> Result<ExportDocument>
where
    S: DictionaryStore + ?Sized,
{
    let words: Vec<WordEntry> = store
        .fetch_all()
        .await?
        .into_iter()
        .filter(|entry| language.is_none_or(|l| l == entry.language))
        .filter(|entry| category.is_none_or(|c| c == entry.category))
        .map(|entry| WordEntry { id: None, ..entry })
        .collect();
    debug!("Exporting {} entries", words.len());
    Ok(ExportDocument {
        total_count: words.len(),
        words,
    })
}

pub fn render_export(doc: &ExportDocument, format: InputFormat) -> Result<String> {
    Ok(match format {
        InputFormat::Json => serde_json::to_string_pretty(doc)? + "\n",
        InputFormat::Csv => render_csv(&doc.words)?,
        InputFormat::Pipe => render_lines(&doc.words, pipe_line),
        InputFormat::WordList => {
            let lossy = doc.words.iter().any(|e| {
                e.language != Language::English
                    || e.category != Category::Profanity
                    || !e.variations.is_empty()
            });
            if lossy {
                warn!("Word list export drops language, category and variations");
            }
            render_lines(&doc.words, |entry| flatten(&entry.word))
        }
    })
}

fn render_csv(words: &[WordEntry]) -> Result<String> {
    let mut writer = WriterBuilder::new()
        .terminator(Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(CSV_HEADER)?;
    for entry in words {
        writer.write_record([
            flatten(&entry.word),
            entry.language.to_string(),
            entry.category.to_string(),
            flatten(&join_escaped(&entry.variations, ';', &[';'])),
        ])?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| DictError::Internal(format!("CSV export failed: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| DictError::Internal(format!("CSV export failed: {}", e)))
}

fn pipe_line(entry: &WordEntry) -> String {
    let mut line = format!(
        "{}|{}|{}",
        escape(&flatten(&entry.word), &['|']),
        entry.language,
        entry.category
    );
    if !entry.variations.is_empty() {
        line.push('|');
        line.push_str(&flatten(&join_escaped(&entry.variations, ',', &['|', ','])));
    }
    line
}

fn join_escaped(items: &[String], separator: char, specials: &[char]) -> String {
    items
        .iter()
        .map(|item| escape(item, specials))
        .collect::<Vec<_>>()
        .join(&separator.to_string())
}

fn render_lines(words: &[WordEntry], line: impl Fn(&WordEntry) -> String) -> String {
    words.iter().map(|entry| line(entry) + "\n").collect()
}

// Readers split records on line breaks and pick the CSV delimiter by tabs.
fn flatten(field: &str) -> String {
    field.replace(['\t', '\r', '\n'], " ")
}
