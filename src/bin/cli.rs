//! papere CLI - sort paper PDFs into category folders and search arXiv from the terminal
//!
//! Usage: papere-cli [OPTIONS] <COMMAND>
//!
//! Supports JSON output for scripting.

use chrono::{Datelike, Local};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use papere_lib::chat::session::TurnOutput;
use papere_lib::chat::{CardStyle, ChatEvent, ChatSession, ReferenceTag, SessionOptions};
use papere_lib::llm::gemini::GeminiClient;
use papere_lib::papers::arxiv::ArxivClient;
use papere_lib::papers::pdf_extractor::PdfTextSource;
use papere_lib::papers::{PaperRecord, SearchProvider, SortCriterion};
use papere_lib::settings;
use papere_lib::sorting::categories::list_categories;
use papere_lib::sorting::classifier::Classifier;
use papere_lib::sorting::organizer::FileOrganizer;
use papere_lib::sorting::pipeline::{grammar_for, DocumentOutcome, DocumentReport, SortPipeline};
use papere_lib::sorting::Naming;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// ============================================================================
// Logging Infrastructure
// ============================================================================

const LOG_PREFIX: &str = "papere-";
const LOG_RETENTION_DAYS: i64 = 7;

fn app_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|p| p.join("com.papere.app"))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Remove `papere-YYYY-MM-DD.log` files older than the retention window
fn clean_old_logs(log_dir: &std::path::Path) {
    let Ok(entries) = fs::read_dir(log_dir) else {
        return;
    };
    let cutoff = (Local::now() - chrono::Duration::days(LOG_RETENTION_DAYS)).date_naive();
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let date = name
            .strip_prefix(LOG_PREFIX)
            .and_then(|s| s.strip_suffix(".log"))
            .and_then(|d| chrono::NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());
        if date.is_some_and(|d| d < cutoff) {
            let _ = fs::remove_file(&path);
        }
    }
}

/// Initialize logging to stderr and today's log file; returns the log file path
fn init_logging(verbose: bool) -> Option<PathBuf> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("papere_lib={0},papere_cli={0}", default_level)));

    let log_dir = app_data_dir().join("logs");
    let log_file = fs::create_dir_all(&log_dir).ok().and_then(|_| {
        clean_old_logs(&log_dir);
        let today = Local::now();
        let log_path = log_dir.join(format!(
            "{}{:04}-{:02}-{:02}.log",
            LOG_PREFIX,
            today.year(),
            today.month(),
            today.day()
        ));
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .ok()
            .map(|file| (file, log_path))
    });

    let (file_layer, log_path) = match log_file {
        Some((file, path)) => (
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file))),
            Some(path),
        ),
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr).with_target(false))
        .with(file_layer)
        .try_init();

    log_path
}

// ============================================================================
// Main CLI Structure
// ============================================================================

#[derive(Parser)]
#[command(name = "papere-cli")]
#[command(version, about = "Sort research papers with an LLM and search arXiv", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON for scripting
    #[arg(long, global = true)]
    json: bool,

    /// Detailed logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify every PDF in a folder and move it into a category folder
    Sort {
        /// Folder with the PDFs to sort
        #[arg(default_value = "papers")]
        input: PathBuf,
        /// Root of the category folders (default: the input folder)
        #[arg(long, short)]
        output: Option<PathBuf>,
        /// File naming: title (rename from extracted title) or original
        #[arg(long)]
        naming: Option<String>,
    },
    /// List the categories under a folder
    Categories {
        /// Root of the category folders
        #[arg(default_value = "papers")]
        root: PathBuf,
    },
    /// Run one arXiv query (ti:, au:, abs:, cat:, all: ... syntax)
    Search {
        query: String,
        /// Maximum results
        #[arg(long, short)]
        max: Option<usize>,
        /// Ordering: relevance, updated, submitted
        #[arg(long, default_value = "relevance")]
        sort: String,
    },
    /// Interactive literature-search chat
    Chat {
        /// Search/refine rounds per question (1-5)
        #[arg(long, short)]
        iterations: Option<u32>,
        /// Card style for cited papers: html or heading
        #[arg(long)]
        card_style: Option<String>,
        /// Reference tag the model uses: paper or paper-card
        #[arg(long, default_value = "paper")]
        tag: String,
    },
    /// Settings management
    Config {
        #[command(subcommand)]
        cmd: ConfigCommands,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// List all settings
    List,
    /// Get a setting value
    Get {
        /// Setting key
        key: String,
    },
    /// Set a setting value
    Set {
        /// Setting key
        key: String,
        /// Setting value
        value: String,
    },
    /// Remove the stored Gemini API key
    ClearKey,
    /// Show accumulated processing stats
    Stats,
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() {
    // Ignore SIGPIPE so piping through head/tail doesn't kill the process.
    #[cfg(unix)]
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }

    // println! panics on a closed pipe even with SIGPIPE ignored; exit quietly instead.
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        if info.to_string().contains("Broken pipe") {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    if let Some(log_path) = init_logging(cli.verbose) {
        tracing::debug!("Logging to: {}", log_path.display());
    }

    if let Err(e) = run_cli(cli).await {
        tracing::error!("{}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run_cli(cli: Cli) -> Result<(), String> {
    settings::init(app_data_dir());

    match cli.command {
        Commands::Sort { input, output, naming } => handle_sort(input, output, naming, cli.json).await,
        Commands::Categories { root } => handle_categories(root, cli.json),
        Commands::Search { query, max, sort } => handle_search(&query, max, &sort, cli.json).await,
        Commands::Chat { iterations, card_style, tag } => handle_chat(iterations, card_style, &tag, cli.json).await,
        Commands::Config { cmd } => handle_config(cmd, cli.json),
        Commands::Completions { shell } => {
            generate(shell, &mut Cli::command(), "papere-cli", &mut io::stdout());
            Ok(())
        }
    }
}

fn parse_naming(value: &str) -> Result<Naming, String> {
    Naming::from_str(value).ok_or_else(|| format!("Unknown naming '{}'. Valid: title, original", value))
}

fn parse_card_style(value: &str) -> Result<CardStyle, String> {
    CardStyle::from_str(value).ok_or_else(|| format!("Unknown card style '{}'. Valid: html, heading", value))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("Failed to serialize output: {}", e))
}

// ============================================================================
// Sort
// ============================================================================

fn print_document(doc: &DocumentReport) {
    let name = doc
        .source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| doc.source.display().to_string());

    match &doc.outcome {
        DocumentOutcome::Sorted { target, category, title, explanation } => {
            println!("{}", "=".repeat(53));
            println!("PROCESSED: {} -> {}", name, target.display());
            println!("TITLE: {}", title.as_deref().unwrap_or("-"));
            println!("EXPLANATION:\n{}", explanation);
            println!("CATEGORY: {}", category);
            println!("{}\n", "=".repeat(53));
        }
        DocumentOutcome::Skipped { reason } => println!("Skipping {} - {}", name, reason),
        DocumentOutcome::Failed { message, .. } => println!("Failed to process {}: {}", name, message),
    }
}

async fn handle_sort(input: PathBuf, output: Option<PathBuf>, naming: Option<String>, json: bool) -> Result<(), String> {
    let config = settings::current();
    let naming = match naming {
        Some(value) => parse_naming(&value)?,
        None => config.naming,
    };
    let output = output.unwrap_or_else(|| input.clone());

    if !json {
        println!("Processing PDFs from {}", input.display());
        println!("Output directory: {}", output.display());
    }

    let client = GeminiClient::from_settings(config.classifier_model.clone())?;
    let classifier = Classifier::new(client, grammar_for(naming)).with_excerpt_chars(config.excerpt_chars);
    let pipeline = SortPipeline::new(classifier, FileOrganizer::new(naming), PdfTextSource);

    let report = pipeline
        .run_with_progress(&input, &output, |doc| {
            if !json {
                print_document(doc);
            }
        })
        .await
        .map_err(|e| e.to_string())?;

    if let Err(e) = settings::add_sort_results(report.sorted_count() as u64, report.failed_count() as u64) {
        tracing::warn!("Failed to save processing stats: {}", e);
    }

    if json {
        println!("{}", to_json(&report)?);
    } else {
        report.print_summary();
    }
    Ok(())
}

fn handle_categories(root: PathBuf, json: bool) -> Result<(), String> {
    let categories = list_categories(&root).map_err(|e| e.to_string())?;
    if json {
        println!("{}", to_json(&categories)?);
    } else if categories.is_empty() {
        println!("No categories under {}", root.display());
    } else {
        for category in &categories {
            println!("{}", category);
        }
    }
    Ok(())
}

// ============================================================================
// Search
// ============================================================================

fn print_paper(index: usize, paper: &PaperRecord) {
    let date = paper
        .published
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "????-??-??".to_string());
    println!("{:3}. {} ({})", index, paper.title, date);
    if !paper.authors.is_empty() {
        println!("     {}", paper.authors.join(", "));
    }
    if let Some(journal_ref) = &paper.journal_ref {
        println!("     Journal Reference: {}", journal_ref);
    }
    if let Some(url) = paper.abs_url.as_ref().or(paper.pdf_url.as_ref()) {
        println!("     {}", url);
    }
}

async fn handle_search(query: &str, max: Option<usize>, sort: &str, json: bool) -> Result<(), String> {
    let sort = SortCriterion::from_str(sort)
        .ok_or_else(|| format!("Unknown sort '{}'. Valid: relevance, updated, submitted", sort))?;
    let max = max.unwrap_or_else(|| settings::current().search_max_results);

    let client = ArxivClient::new()?;
    let papers = client.search(query, max, sort).await.map_err(|e| e.to_string())?;

    if json {
        println!("{}", to_json(&papers)?);
    } else if papers.is_empty() {
        println!("No papers found for: {}", query);
    } else {
        for (i, paper) in papers.iter().enumerate() {
            print_paper(i + 1, paper);
        }
    }
    Ok(())
}

// ============================================================================
// Chat
// ============================================================================

/// Streams an answer to stdout one settled line at a time.
///
/// A complete line can only change while it still holds a complete, not yet
/// rewritten reference tag; a newline inside a tag abandons it.
struct AnswerPrinter {
    open: &'static str,
    close: &'static str,
    printed: usize,
}

impl AnswerPrinter {
    fn new(tag: ReferenceTag) -> Self {
        Self { open: tag.open(), close: tag.close(), printed: 0 }
    }

    /// Newly settled text of the growing answer
    fn settled<'t>(&mut self, text: &'t str) -> &'t str {
        let Some(pending) = text.get(self.printed..) else {
            return "";
        };
        let mut end = 0;
        for line in pending.split_inclusive('\n') {
            let unrewritten = line
                .find(self.open)
                .is_some_and(|at| line[at..].contains(self.close));
            if !line.ends_with('\n') || unrewritten {
                break;
            }
            end += line.len();
        }
        self.printed += end;
        &pending[..end]
    }

    /// Whatever the final answer holds past the printed part
    fn rest<'t>(&mut self, text: &'t str) -> &'t str {
        let rest = text.get(self.printed..).unwrap_or(text);
        self.printed = text.len();
        rest
    }
}

fn print_turn(out: &TurnOutput, printer: &mut AnswerPrinter) {
    println!("{}\n", printer.rest(&out.answer));
    if !out.cited.is_empty() {
        println!("Cited papers:");
        for (i, paper) in out.cited.iter().enumerate() {
            print_paper(i + 1, paper);
        }
        println!();
    }
}

async fn handle_chat(iterations: Option<u32>, card_style: Option<String>, tag: &str, json: bool) -> Result<(), String> {
    let config = settings::current();
    let mut options = SessionOptions::from_settings(&config);
    if let Some(iterations) = iterations {
        options.iterations = iterations;
    }
    if let Some(style) = card_style {
        options.card_style = parse_card_style(&style)?;
    }
    options.tag = ReferenceTag::from_name(tag)
        .ok_or_else(|| format!("Unknown tag '{}'. Valid: paper, paper-card", tag))?;

    let llm = GeminiClient::from_settings(config.chat_model.clone())?;
    let search = ArxivClient::new()?;
    let tag = options.tag;
    let mut session = ChatSession::new(llm, search, options);

    if !json {
        println!("Paper-e: ask for papers. /papers lists the last cited papers, /quit exits.");
    }

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        if !json {
            print!("> ");
            let _ = io::stdout().flush();
        }
        let Some(line) = lines.next() else {
            break;
        };
        let line = line.map_err(|e| format!("Failed to read input: {}", e))?;
        let prompt = line.trim();

        match prompt {
            "" => continue,
            "/quit" | "/exit" => break,
            "/papers" => {
                if json {
                    println!("{}", to_json(&session.last_cited())?);
                } else if session.last_cited().is_empty() {
                    println!("No papers cited yet.");
                } else {
                    for (i, paper) in session.last_cited().iter().enumerate() {
                        print_paper(i + 1, paper);
                    }
                }
                continue;
            }
            _ => {}
        }

        let mut printer = AnswerPrinter::new(tag);
        let mut answering = false;
        let result = session
            .turn(prompt, |event| {
                if json {
                    return;
                }
                match event {
                    ChatEvent::Queries { iteration, queries } => {
                        if iteration > 1 {
                            println!("Iteration {}", iteration);
                        }
                        for query in queries {
                            println!("Processing query: {}", query);
                        }
                    }
                    ChatEvent::KeptQueries { .. } => println!("No refined queries detected. Retaining previous queries."),
                    ChatEvent::PaperAdded(title) => tracing::debug!("Added document: '{}'", title),
                    ChatEvent::Notice(notice) => println!("{}", notice),
                    ChatEvent::Answer(text) => {
                        if !answering {
                            answering = true;
                            println!();
                        }
                        print!("{}", printer.settled(text));
                        let _ = io::stdout().flush();
                    }
                }
            })
            .await;

        match result {
            Ok(out) if json => println!("{}", to_json(&out)?),
            Ok(out) => print_turn(&out, &mut printer),
            Err(e) => {
                tracing::error!("Chat turn failed: {}", e);
                eprintln!("Error: {}", e);
            }
        }
    }

    Ok(())
}

// ============================================================================
// Config
// ============================================================================

fn handle_config(cmd: ConfigCommands, json: bool) -> Result<(), String> {
    match cmd {
        ConfigCommands::List => {
            let s = settings::current();
            let key = settings::get_masked_api_key();
            if json {
                let value = serde_json::json!({
                    "gemini_api_key": settings::has_api_key(),
                    "classifier_model": s.classifier_model,
                    "chat_model": s.chat_model,
                    "naming": s.naming,
                    "excerpt_chars": s.excerpt_chars,
                    "reference_tolerance": s.reference_tolerance,
                    "rescan_every": s.rescan_every_chunks,
                    "search_max_results": s.search_max_results,
                    "iterations": s.refinement_iterations,
                    "card_style": s.card_style,
                    "default_query_fallback": s.default_query_fallback,
                });
                println!("{}", to_json(&value)?);
            } else {
                println!("gemini-api-key:         {}", key.as_deref().unwrap_or("not set"));
                println!("classifier-model:       {}", s.classifier_model);
                println!("chat-model:             {}", s.chat_model);
                println!("naming:                 {}", s.naming.as_str());
                println!("excerpt-chars:          {}", s.excerpt_chars);
                println!("reference-tolerance:    {}", s.reference_tolerance);
                println!("rescan-every:           {}", s.rescan_every_chunks);
                println!("search-max-results:     {}", s.search_max_results);
                println!("iterations:             {}", s.refinement_iterations);
                println!("card-style:             {}", s.card_style.as_str());
                println!("default-query-fallback: {}", s.default_query_fallback);
            }
        }
        ConfigCommands::Get { key } => {
            let s = settings::current();
            let value: String = match key.as_str() {
                "gemini-api-key" => settings::get_masked_api_key().unwrap_or_else(|| "not set".to_string()),
                "classifier-model" => s.classifier_model,
                "chat-model" => s.chat_model,
                "naming" => s.naming.as_str().to_string(),
                "excerpt-chars" => s.excerpt_chars.to_string(),
                "reference-tolerance" => s.reference_tolerance.to_string(),
                "rescan-every" => s.rescan_every_chunks.to_string(),
                "search-max-results" => s.search_max_results.to_string(),
                "iterations" => s.refinement_iterations.to_string(),
                "card-style" => s.card_style.as_str().to_string(),
                "default-query-fallback" => s.default_query_fallback.to_string(),
                _ => return Err(format!("Unknown config key: {}", key)),
            };

            if json {
                let mut map = serde_json::Map::new();
                map.insert(key, serde_json::Value::String(value));
                println!("{}", serde_json::Value::Object(map));
            } else {
                println!("{}", value);
            }
        }
        ConfigCommands::Set { key, value } => {
            let number = || value.parse::<usize>().map_err(|_| "Invalid number".to_string());
            match key.as_str() {
                "gemini-api-key" => settings::set_api_key(value.clone())?,
                "classifier-model" => settings::set_classifier_model(value.clone())?,
                "chat-model" => settings::set_chat_model(value.clone())?,
                "naming" => settings::set_naming(parse_naming(&value)?)?,
                "excerpt-chars" => settings::set_excerpt_chars(number()?)?,
                "reference-tolerance" => settings::set_reference_tolerance(number()?)?,
                "rescan-every" => settings::set_rescan_every_chunks(number()?)?,
                "search-max-results" => settings::set_search_max_results(number()?)?,
                "iterations" => {
                    let v = value.parse::<u32>().map_err(|_| "Invalid number")?;
                    settings::set_refinement_iterations(v)?;
                }
                "card-style" => settings::set_card_style(parse_card_style(&value)?)?,
                "default-query-fallback" => {
                    let v = value.parse::<bool>().map_err(|_| "Invalid boolean (use true/false)")?;
                    settings::set_default_query_fallback(v)?;
                }
                _ => return Err(format!("Unknown config key: {}", key)),
            }

            if json {
                println!(r#"{{"status":"ok"}}"#);
            } else if key == "gemini-api-key" {
                println!("Set {}", key);
            } else {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigCommands::ClearKey => {
            settings::set_api_key(String::new())?;
            if json {
                println!(r#"{{"status":"ok"}}"#);
            } else {
                println!("Gemini API key cleared");
            }
        }
        ConfigCommands::Stats => {
            let stats = settings::get_processing_stats();
            if json {
                println!("{}", to_json(&stats)?);
            } else {
                println!("Documents sorted:    {}", stats.documents_sorted);
                println!("Documents failed:    {}", stats.documents_failed);
                println!("Batch runs:          {}", stats.batch_runs);
                println!("Gemini input tokens:  {}", stats.total_gemini_input_tokens);
                println!("Gemini output tokens: {}", stats.total_gemini_output_tokens);
            }
        }
    }
    Ok(())
}
