//! Command-line interface for the moderation dictionary.
//!
//! This CLI imports word lists, exports the dictionary, and browses and
//! edits word groups in a local database or through the admin API.

use clap::{Parser, Subcommand};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use log::{LevelFilter, debug, error, info};
use moddict::{
    DictError, GroupEdit, GroupFilter, ImportPolicy, InputFormat, ModerationDictionary,
    ReconciliationResult, StoreOptions,
    error::Result,
    export::render_export,
    normalize::{normalize_category, normalize_language},
    progress::{ProgressCallback, ProgressUpdate},
};
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};

const ERROR_PREVIEW_LIMIT: usize = 10;

#[derive(Parser, Debug)]
#[command(author, version, about = "Moderation dictionary CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a custom database file (optional)
    #[arg(long, global = true)]
    db_path: Option<String>,

    /// Base URL of the dictionary admin API; overrides the local database
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Bearer token for the admin API
    #[arg(long, global = true)]
    api_token: Option<String>,

    /// Set verbosity level (use -v, -vv, or -vvv for increasing verbosity)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Import words from a JSON, CSV, pipe-delimited or plain word list file
    Import {
        /// The file to import (may be gzip-compressed)
        file: PathBuf,
        /// Force the format instead of detecting it (json, csv, pipe, words)
        #[arg(long)]
        format: Option<InputFormat>,
        /// Overwrite category and variations of words that already exist
        #[arg(long, default_value_t = false)]
        overwrite: bool,
        /// Report records without a word as errors instead of skipping them
        #[arg(long, default_value_t = false)]
        report_invalid: bool,
    },
    /// Export the dictionary
    Export {
        /// Output format (json, csv, pipe, words)
        #[arg(long, default_value = "json")]
        format: InputFormat,
        /// Only export this language
        #[arg(long)]
        language: Option<String>,
        /// Only export this category
        #[arg(long)]
        category: Option<String>,
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List word groups (words with variations)
    Groups {
        /// Case-insensitive search over main words and variations
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        language: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long, default_value_t = 10)]
        page_size: usize,
    },
    /// Add a single word
    Add {
        word: String,
        #[arg(long)]
        language: Option<String>,
        #[arg(long)]
        category: Option<String>,
        /// A variation of the word (repeatable)
        #[arg(long = "variation")]
        variations: Vec<String>,
    },
    /// Edit the group of a word
    EditGroup {
        /// Main word of the group
        word: String,
        /// Language of the group
        #[arg(long)]
        language: Option<String>,
        #[arg(long)]
        new_word: Option<String>,
        #[arg(long)]
        new_language: Option<String>,
        #[arg(long)]
        new_category: Option<String>,
        /// Replacement variations, comma-separated (empty to clear)
        #[arg(long, value_delimiter = ',')]
        variations: Option<Vec<String>>,
    },
    /// Delete a word together with its variations
    DeleteGroup {
        word: String,
        #[arg(long)]
        language: Option<String>,
    },
    /// Clear the dictionary database
    ClearDb,
}

/// Sets up logging based on verbosity level.
fn setup_logging(verbose: u8) {
    let log_level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter(None, log_level)
        .format(|buf, record| writeln!(buf, "[{}] {}", record.level(), record.args()))
        .init();
}

/// Creates a progress callback that drives a single progress bar.
fn create_progress_callback(pb: ProgressBar) -> ProgressCallback {
    Box::new(move |update: ProgressUpdate| {
        if update.current_item == 0 {
            pb.set_length(update.total_items.unwrap_or(0));
            pb.set_prefix(update.stage_description.clone());
        }
        pb.set_position(update.current_item);
        if let Some(msg) = update.message {
            pb.set_message(msg);
        }
        true
    })
}

fn new_progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::default_bar().template(
        "{prefix:>12.cyan.bold} [{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} ({percent}%) {msg}",
    ) {
        pb.set_style(style.progress_chars("##-"));
    }
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn fail(context: &str, e: impl std::fmt::Display) -> ! {
    error!("{}: {}", context, e);
    eprintln!("{}", format!("{}: {}", context, e).red());
    std::process::exit(1);
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    if let Commands::ClearDb = cli.command {
        info!("Clearing database...");
        let db_path_to_clear = cli.db_path.map(PathBuf::from);
        match ModerationDictionary::clear_database(db_path_to_clear) {
            Ok(_) => println!("{}", "Database cleared successfully.".green()),
            Err(e) => fail("Error clearing database", e),
        }
        return Ok(());
    }

    let options = StoreOptions {
        db_path: cli.db_path.map(PathBuf::from),
        api_url: cli.api_url,
        api_token: cli.api_token,
    };
    let dict = match ModerationDictionary::open_with_options(options).await {
        Ok(dict) => dict,
        Err(e) => fail("Error opening dictionary", e),
    };

    let outcome = match cli.command {
        Commands::Import {
            file,
            format,
            overwrite,
            report_invalid,
        } => {
            let policy = ImportPolicy {
                overwrite_existing: overwrite,
                skip_invalid: !report_invalid,
            };
            handle_import(&dict, file, format, policy).await
        }
        Commands::Export {
            format,
            language,
            category,
            output,
        } => handle_export(&dict, format, language, category, output).await,
        Commands::Groups {
            search,
            language,
            category,
            page,
            page_size,
        } => {
            let filter =
                GroupFilter::from_raw(search.as_deref(), language.as_deref(), category.as_deref());
            handle_groups(&dict, &filter, page, page_size).await
        }
        Commands::Add {
            word,
            language,
            category,
            variations,
        } => dict
            .add_word(&word, language.as_deref(), category.as_deref(), &variations)
            .await
            .map(|entry| {
                println!(
                    "Added {} ({}, {})",
                    entry.word.bold().cyan(),
                    entry.language,
                    entry.category.to_string().italic()
                );
            }),
        Commands::EditGroup {
            word,
            language,
            new_word,
            new_language,
            new_category,
            variations,
        } => {
            let edit = GroupEdit {
                main_word: new_word,
                language: new_language,
                category: new_category,
                variations,
            };
            handle_edit_group(&dict, &word, language.as_deref(), &edit).await
        }
        Commands::DeleteGroup { word, language } => {
            let language = normalize_language(language.as_deref());
            match dict.find_group(&word, language).await {
                Ok(group) => dict.delete_group(&group).await.map(|_| {
                    println!(
                        "Deleted {} and {} variation(s).",
                        group.main_word.bold().cyan(),
                        group.variations.len()
                    );
                }),
                Err(e) => Err(e),
            }
        }
        Commands::ClearDb => Ok(()),
    };

    if let Err(e) = outcome {
        fail("Error", e);
    }
    Ok(())
}

async fn handle_import(
    dict: &ModerationDictionary,
    file: PathBuf,
    format: Option<InputFormat>,
    policy: ImportPolicy,
) -> Result<()> {
    info!("Importing {:?} with {:?}", file, policy);
    let start = Instant::now();
    let bytes = tokio::fs::read(&file).await?;
    let file_name = file.file_name().map(|name| name.to_string_lossy().into_owned());

    let pb = new_progress_bar();
    let callback = create_progress_callback(pb.clone());
    let outcome = dict
        .import_upload(bytes, file_name, format, policy, Some(callback))
        .await;
    pb.finish_and_clear();
    std::io::stdout().flush().ok();
    debug!("Import of {:?} took: {:?}", file, start.elapsed());

    match outcome {
        Ok(result) => {
            print_summary(&result);
            Ok(())
        }
        Err(failure) => {
            if failure.partial.total > 0 {
                println!("{}", "Processed before the failure:".yellow());
                print_summary(&failure.partial);
            }
            Err(failure.error)
        }
    }
}

/// Prints the counts exactly as returned, with the first errors.
fn print_summary(result: &ReconciliationResult) {
    println!("{}", "Import summary".bold());
    println!("  Total:    {}", result.total);
    println!("  Imported: {}", result.imported.to_string().green());
    println!("  Updated:  {}", result.updated.to_string().cyan());
    println!("  Skipped:  {}", result.skipped.to_string().yellow());
    println!("  Errors:   {}", result.errors.len().to_string().red());
    if result.cancelled {
        println!("{}", "  Import was cancelled before the end of the file.".yellow());
    }

    let (shown, hidden) = result.error_preview(ERROR_PREVIEW_LIMIT);
    for message in shown {
        println!("    {}", message.as_str().dimmed());
    }
    if hidden > 0 {
        println!("    … and {} more", hidden);
    }
}

async fn handle_export(
    dict: &ModerationDictionary,
    format: InputFormat,
    language: Option<String>,
    category: Option<String>,
    output: Option<PathBuf>,
) -> Result<()> {
    let language = language.as_deref().map(|l| normalize_language(Some(l)));
    let category = category.as_deref().map(|c| normalize_category(Some(c)));
    let doc = dict.export(language, category).await?;
    let rendered = render_export(&doc, format)?;

    match output {
        Some(path) => {
            tokio::fs::write(&path, rendered).await?;
            println!(
                "Exported {} words to {}",
                doc.total_count.to_string().green(),
                path.display()
            );
        }
        None => print!("{}", rendered),
    }
    Ok(())
}

async fn handle_groups(
    dict: &ModerationDictionary,
    filter: &GroupFilter,
    page: usize,
    page_size: usize,
) -> Result<()> {
    let page = dict.group_page(filter, page, page_size).await?;
    if page.total_items == 0 {
        println!("{}", "No word groups found.".yellow());
        return Ok(());
    }

    println!(
        "Page {}/{} ({} groups)",
        page.page, page.total_pages, page.total_items
    );
    for group in &page.items {
        println!(
            "\n{} ~ {}, {} ({} words)",
            group.main_word.bold().cyan(),
            group.language,
            group.category.to_string().italic(),
            group.word_count
        );
        println!("    {}", group.variations.join(", ").green());
    }
    Ok(())
}

async fn handle_edit_group(
    dict: &ModerationDictionary,
    word: &str,
    language: Option<&str>,
    edit: &GroupEdit,
) -> Result<()> {
    if *edit == GroupEdit::default() {
        return Err(DictError::InvalidArgument(
            "nothing to change; pass --new-word, --new-language, --new-category or --variations"
                .to_string(),
        ));
    }
    let group = dict.find_group(word, normalize_language(language)).await?;
    let saved = dict.edit_group(&group, edit).await?;
    println!(
        "Updated {} ({}, {}): {}",
        saved.word.bold().cyan(),
        saved.language,
        saved.category.to_string().italic(),
        saved.variations.join(", ").green()
    );
    Ok(())
}
