use crate::error::{DictError, Result};
use crate::models::{ImportCandidate, InputFormat};
use crate::normalize;
use csv::{ReaderBuilder, StringRecord, Trim};
use flate2::read::GzDecoder;
use log::{debug, warn};
use serde_json::Value;
use std::io::Read;
use std::path::Path;
use tokio::task;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const BYTE_ORDER_MARK: char = '\u{feff}';

/// Decodes, detects and parses an uploaded file using spawn_blocking.
///
/// An explicit `format` skips detection. Returns the format that was used
/// along with the candidates in file order.
pub async fn parse_upload(
    bytes: Vec<u8>,
    file_name: Option<String>,
    format: Option<InputFormat>,
) -> Result<(InputFormat, Vec<ImportCandidate>)> {
    debug!(
        "Starting upload parsing of {} bytes (using spawn_blocking)...",
        bytes.len()
    );
    let parsed = task::spawn_blocking(move || -> Result<(InputFormat, Vec<ImportCandidate>)> {
        let content = decode_upload(&bytes)?;
        let format = match format {
            Some(format) => format,
            None => detect_format(file_name.as_deref(), &content)?,
        };
        let candidates = parse_candidates(&content, format)?;
        Ok((format, candidates))
    })
    .await??;
    debug!(
        "Parsed {} candidate records as {}.",
        parsed.1.len(),
        parsed.0
    );
    Ok(parsed)
}

/// Turns raw upload bytes into text: gunzips when the gzip magic is present
/// and strips a leading byte order mark.
pub fn decode_upload(bytes: &[u8]) -> Result<String> {
    let raw = if bytes.starts_with(&GZIP_MAGIC) {
        debug!("Upload is gzip-compressed, decompressing...");
        let mut decoder = GzDecoder::new(bytes);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).map_err(|e| {
            DictError::UnsupportedFormat(format!("corrupt gzip data: {}", e))
        })?;
        out
    } else {
        bytes.to_vec()
    };

    let text = String::from_utf8(raw)
        .map_err(|_| DictError::UnsupportedFormat("content is not UTF-8 text".to_string()))?;
    if text.starts_with(BYTE_ORDER_MARK) {
        Ok(text[BYTE_ORDER_MARK.len_utf8()..].to_string())
    } else {
        Ok(text)
    }
}

/// Picks a format from the file extension, falling back to the content.
pub fn detect_format(file_name: Option<&str>, content: &str) -> Result<InputFormat> {
    if content.trim().is_empty() {
        return Err(DictError::UnsupportedFormat("upload is empty".to_string()));
    }

    match file_name.and_then(extension_of).as_deref() {
        Some("json") => return Ok(InputFormat::Json),
        Some("csv") | Some("tsv") => return Ok(InputFormat::Csv),
        _ => {}
    }

    let sniffed = sniff_format(content);
    debug!("Detected upload format from content: {}", sniffed);
    Ok(sniffed)
}

fn extension_of(file_name: &str) -> Option<String> {
    let lowered = file_name.to_lowercase();
    let name = lowered.strip_suffix(".gz").unwrap_or(&lowered);
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_string)
}

fn sniff_format(content: &str) -> InputFormat {
    let trimmed = content.trim_start();
    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        return InputFormat::Json;
    }
    if content.lines().any(|line| line.contains('|')) {
        return InputFormat::Pipe;
    }
    let first_line = content
        .lines()
        .find(|line| !line.trim().is_empty())
        .unwrap_or_default();
    if is_csv_header(first_line) {
        InputFormat::Csv
    } else {
        InputFormat::WordList
    }
}

// A plain word list may hold commas too; only a header row marks CSV.
fn is_csv_header(line: &str) -> bool {
    (line.contains(',') || line.contains('\t'))
        && line
            .split([',', '\t'])
            .any(|field| field.trim().trim_matches('"').eq_ignore_ascii_case("word"))
}

/// Parses already-decoded text in the given format.
pub fn parse_candidates(content: &str, format: InputFormat) -> Result<Vec<ImportCandidate>> {
    match format {
        InputFormat::Json => parse_json(content),
        InputFormat::Csv => parse_delimited(content),
        InputFormat::Pipe => Ok(parse_pipe(content)),
        InputFormat::WordList => Ok(parse_word_list(content)),
    }
}

// --- JSON ---

fn parse_json(content: &str) -> Result<Vec<ImportCandidate>> {
    let document: Value = serde_json::from_str(content)
        .map_err(|e| DictError::UnsupportedFormat(format!("invalid JSON: {}", e)))?;

    let items = match &document {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("words") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(DictError::UnsupportedFormat(
                    "JSON object has no `words` array".to_string(),
                ));
            }
        },
        _ => {
            return Err(DictError::UnsupportedFormat(
                "JSON must be an array or an object with a `words` array".to_string(),
            ));
        }
    };

    if items.is_empty() {
        return Err(DictError::UnsupportedFormat(
            "JSON word array is empty".to_string(),
        ));
    }

    Ok(items
        .iter()
        .enumerate()
        .map(|(index, item)| json_candidate(index + 1, item))
        .collect())
}

fn json_candidate(position: usize, item: &Value) -> ImportCandidate {
    match item {
        Value::Object(object) => ImportCandidate {
            position,
            word: object.get("word").and_then(scalar_text),
            language: object.get("language").and_then(scalar_text),
            category: object.get("category").and_then(scalar_text),
            variations: object
                .get("variations")
                .map(json_variations)
                .unwrap_or_default(),
        },
        // A bare string element is a word with no other fields.
        Value::String(word) => ImportCandidate::new(position, word.as_str()),
        other => {
            warn!(
                "JSON element {} is not an object ({}); treating it as an empty record",
                position, other
            );
            ImportCandidate {
                position,
                ..Default::default()
            }
        }
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn json_variations(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(scalar_text).collect(),
        Value::String(list) => split_list(list, ','),
        _ => Vec::new(),
    }
}

// --- Line Formats ---

fn parse_delimited(content: &str) -> Result<Vec<ImportCandidate>> {
    let mut candidates = Vec::new();
    for (index, line) in content.lines().enumerate().skip(1) {
        // Tab or comma is decided per line, header excluded.
        let delimiter = if line.contains('\t') { b'\t' } else { b',' };
        let fields = read_csv_line(line, delimiter).map_err(|e| {
            DictError::UnsupportedFormat(format!("line {}: {}", index + 1, e))
        })?;
        if let Some(candidate) = fields.and_then(|f| row_candidate(index + 1, &f, ';')) {
            candidates.push(candidate);
        }
    }
    Ok(candidates)
}

fn read_csv_line(line: &str, delimiter: u8) -> csv::Result<Option<Vec<String>>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .delimiter(delimiter)
        .from_reader(line.as_bytes());
    let mut record = StringRecord::new();
    if !reader.read_record(&mut record)? {
        return Ok(None);
    }
    Ok(Some(record.iter().map(str::to_string).collect()))
}

fn parse_pipe(content: &str) -> Vec<ImportCandidate> {
    content
        .lines()
        .enumerate()
        .filter_map(|(index, line)| {
            let mut fields: Vec<String> = split_unescaped(line, '|')
                .iter()
                .map(|f| f.trim().to_string())
                .collect();
            // The variations column is unescaped item by item later.
            for field in fields.iter_mut().take(3) {
                *field = unescape(field);
            }
            row_candidate(index + 1, &fields, ',')
        })
        .collect()
}

fn parse_word_list(content: &str) -> Vec<ImportCandidate> {
    let (language, category) = normalize::word_list_defaults();
    content
        .lines()
        .enumerate()
        .filter_map(|(index, line)| {
            let word = line.trim();
            if word.is_empty() {
                return None;
            }
            Some(ImportCandidate {
                position: index + 1,
                word: Some(word.to_string()),
                language: Some(language.to_string()),
                category: Some(category.to_string()),
                variations: Vec::new(),
            })
        })
        .collect()
}

/// Builds a candidate from `word, language, category[, variations]` fields.
/// Rows without a word are whitespace, not data, and yield `None`.
fn row_candidate(position: usize, fields: &[String], variation_separator: char) -> Option<ImportCandidate> {
    let word = fields.first()?;
    if word.is_empty() {
        return None;
    }
    let optional = |index: usize| fields.get(index).filter(|f| !f.is_empty()).cloned();
    Some(ImportCandidate {
        position,
        word: Some(word.clone()),
        language: optional(1),
        category: optional(2),
        variations: fields
            .get(3)
            .map(|list| split_list(list, variation_separator))
            .unwrap_or_default(),
    })
}

// --- Separator Escapes ---

const ESCAPE: char = '\\';
const ESCAPABLE: [char; 4] = [ESCAPE, '|', ',', ';'];

/// Prefixes `\` and every char in `separators` with a backslash, so the
/// value survives being split on those separators.
pub(crate) fn escape(text: &str, separators: &[char]) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c == ESCAPE || separators.contains(&c) {
            out.push(ESCAPE);
        }
        out.push(c);
    }
    out
}

/// Splits on `separator` where it is not escaped. Escapes are kept.
fn split_unescaped(text: &str, separator: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == ESCAPE {
            current.push(c);
            if let Some(next) = chars.next_if(|n| ESCAPABLE.contains(n)) {
                current.push(next);
            }
        } else if c == separator {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    parts.push(current);
    parts
}

/// Drops the backslash in front of `\`, `|`, `,` and `;`. Any other
/// backslash is literal.
fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == ESCAPE {
            if let Some(escaped) = chars.next_if(|n| ESCAPABLE.contains(n)) {
                out.push(escaped);
                continue;
            }
        }
        out.push(c);
    }
    out
}

fn split_list(list: &str, separator: char) -> Vec<String> {
    split_unescaped(list, separator)
        .iter()
        .map(|item| unescape(item.trim()))
        .filter(|item| !item.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    const SAMPLE_CSV: &str = "word,language,category\n\
badword,English,profanity\n\
masamang salita,Filipino,bullying\n";

    fn words(candidates: &[ImportCandidate]) -> Vec<&str> {
        candidates
            .iter()
            .map(|c| c.word.as_deref().unwrap_or_default())
            .collect()
    }

    #[test]
    fn test_parse_csv_skips_header() {
        let candidates = parse_candidates(SAMPLE_CSV, InputFormat::Csv).unwrap();
        assert_eq!(words(&candidates), vec!["badword", "masamang salita"]);
        assert_eq!(candidates[1].language.as_deref(), Some("Filipino"));
        assert_eq!(candidates[1].category.as_deref(), Some("bullying"));
        assert_eq!(candidates[0].position, 2);
    }

    #[test]
    fn test_parse_tsv_strips_quotes_and_drops_blank_words() {
        let content = "word\tlanguage\tcategory\n\
\"gago\"\t\"Filipino\"\t\"profanity\"\n\
  \t\tslur\n\
\n\
\"damn, it\"\tEnglish\tprofanity\n";
        let candidates = parse_candidates(content, InputFormat::Csv).unwrap();
        assert_eq!(words(&candidates), vec!["gago", "damn, it"]);
        assert_eq!(candidates[0].language.as_deref(), Some("Filipino"));
    }

    #[test]
    fn test_parse_csv_variations_column() {
        let content = "word,language,category,variations\ngago,Filipino,profanity,gaga; gagoh\n";
        let candidates = parse_candidates(content, InputFormat::Csv).unwrap();
        assert_eq!(candidates[0].variations, vec!["gaga", "gagoh"]);
    }

    #[test]
    fn test_parse_csv_quoted_fields() {
        let content = "word,language,category,variations\n\
\"\"\"gago\"\"\",Filipino,profanity,\"g\\;go;gaga\"\n\
\"some, phrase\",English,bullying,\n";
        let candidates = parse_candidates(content, InputFormat::Csv).unwrap();
        assert_eq!(words(&candidates), vec!["\"gago\"", "some, phrase"]);
        assert_eq!(candidates[0].variations, vec!["g;go", "gaga"]);
        assert!(candidates[1].variations.is_empty());
    }

    #[test]
    fn test_parse_pipe_escaped_separators() {
        let content = "f\\|ck|English|profanity|f\\,ck,fck\nback\\slash|English\n";
        let candidates = parse_candidates(content, InputFormat::Pipe).unwrap();
        assert_eq!(words(&candidates), vec!["f|ck", "back\\slash"]);
        assert_eq!(candidates[0].language.as_deref(), Some("English"));
        assert_eq!(candidates[0].variations, vec!["f,ck", "fck"]);
    }

    #[test]
    fn test_escape_survives_split() {
        let tricky = ["a|b", "c,d", "e\\", "\\,"];
        let joined = tricky
            .iter()
            .map(|v| escape(v, &['|', ',']))
            .collect::<Vec<_>>()
            .join(",");
        assert_eq!(split_list(&joined, ','), tricky);
    }

    #[test]
    fn test_parse_csv_header_only_is_empty() {
        let candidates = parse_candidates("word,language,category\n", InputFormat::Csv).unwrap();
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_parse_pipe_missing_trailing_fields() {
        let content = "gago|Filipino|profanity|gaga,gagoh\nbwisit\n|English|slur\nulol|tagalog\n";
        let candidates = parse_candidates(content, InputFormat::Pipe).unwrap();
        assert_eq!(words(&candidates), vec!["gago", "bwisit", "ulol"]);
        assert_eq!(candidates[0].variations, vec!["gaga", "gagoh"]);
        assert_eq!(candidates[1].language, None);
        assert_eq!(candidates[1].category, None);
        assert_eq!(candidates[2].language.as_deref(), Some("tagalog"));
        assert_eq!(candidates[2].position, 4);
    }

    #[test]
    fn test_parse_word_list_uses_list_defaults() {
        let candidates = parse_candidates("crap\n\n  heck  \n", InputFormat::WordList).unwrap();
        assert_eq!(words(&candidates), vec!["crap", "heck"]);
        assert_eq!(candidates[0].language.as_deref(), Some("English"));
        assert_eq!(candidates[0].category.as_deref(), Some("profanity"));
    }

    #[test]
    fn test_parse_json_bare_array_and_words_object() {
        let bare = r#"[{"word": "gago", "language": "Filipino", "variations": ["gaga"]}]"#;
        let wrapped = r#"{"words": [{"word": "gago", "language": "Filipino", "variations": ["gaga"]}], "totalCount": 1}"#;
        let a = parse_candidates(bare, InputFormat::Json).unwrap();
        let b = parse_candidates(wrapped, InputFormat::Json).unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].variations, vec!["gaga"]);
        assert_eq!(a[0].category, None);
    }

    #[test]
    fn test_parse_json_loose_fields() {
        let content = r#"[{"word": 42, "variations": "a, b"}, 7, "plain", {"language": "English"}]"#;
        let candidates = parse_candidates(content, InputFormat::Json).unwrap();
        assert_eq!(candidates.len(), 4);
        assert_eq!(candidates[0].word.as_deref(), Some("42"));
        assert_eq!(candidates[0].variations, vec!["a", "b"]);
        assert_eq!(candidates[1].word, None);
        assert_eq!(candidates[2].word.as_deref(), Some("plain"));
        assert_eq!(candidates[3].word, None);
        assert_eq!(candidates[3].position, 4);
    }

    #[test]
    fn test_parse_json_rejects_unsupported_shapes() {
        for content in ["[]", r#"{"words": []}"#, r#"{"items": [1]}"#, "42", "{not json"] {
            let result = parse_candidates(content, InputFormat::Json);
            assert!(
                matches!(result, Err(DictError::UnsupportedFormat(_))),
                "expected UnsupportedFormat for {:?}, got {:?}",
                content,
                result
            );
        }
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(detect_format(Some("words.JSON"), "x").unwrap(), InputFormat::Json);
        assert_eq!(detect_format(Some("words.tsv.gz"), "x").unwrap(), InputFormat::Csv);
        assert_eq!(detect_format(None, "  [ {} ]").unwrap(), InputFormat::Json);
        assert_eq!(detect_format(Some("a.txt"), "a|English\n").unwrap(), InputFormat::Pipe);
        assert_eq!(detect_format(None, SAMPLE_CSV).unwrap(), InputFormat::Csv);
        assert_eq!(detect_format(None, "one\ntwo words\n").unwrap(), InputFormat::WordList);
        assert!(matches!(
            detect_format(Some("a.csv"), " \n\t"),
            Err(DictError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_word_list_with_commas_is_not_csv() {
        let content = "damn, it\nheck\n";
        let format = detect_format(None, content).unwrap();
        assert_eq!(format, InputFormat::WordList);
        let candidates = parse_candidates(content, format).unwrap();
        assert_eq!(words(&candidates), vec!["damn, it", "heck"]);

        assert_eq!(
            detect_format(None, "Word\tLanguage\ngago\tFilipino\n").unwrap(),
            InputFormat::Csv
        );
    }

    #[test]
    fn test_decode_upload_gzip_and_bom() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all("\u{feff}hello\n".as_bytes()).unwrap();
        let compressed = encoder.finish().unwrap();
        assert_eq!(decode_upload(&compressed).unwrap(), "hello\n");
        assert!(matches!(
            decode_upload(&[0xff, 0xfe, 0x00]),
            Err(DictError::UnsupportedFormat(_))
        ));
    }

    #[tokio::test]
    async fn test_parse_upload_detects_and_parses() {
        let (format, candidates) =
            parse_upload(SAMPLE_CSV.as_bytes().to_vec(), Some("dict.csv".to_string()), None)
                .await
                .unwrap();
        assert_eq!(format, InputFormat::Csv);
        assert_eq!(candidates.len(), 2);

        let forced = parse_upload(b"a|b|c\n".to_vec(), None, Some(InputFormat::WordList))
            .await
            .unwrap();
        assert_eq!(forced.0, InputFormat::WordList);
        assert_eq!(forced.1[0].word.as_deref(), Some("a|b|c"));
    }
}
