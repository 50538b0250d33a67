//! Application settings storage
//!
//! Stores configuration like the Gemini API key and sorting/chat tunables in a JSON
//! file in the app data directory.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::RwLock;

use crate::chat::cards::CardStyle;
use crate::sorting::Naming;

/// Global settings instance
static SETTINGS: RwLock<Option<Settings>> = RwLock::new(None);

/// Path to config file (set during init)
static CONFIG_PATH: RwLock<Option<PathBuf>> = RwLock::new(None);

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProcessingStats {
    #[serde(default)]
    pub documents_sorted: u64,
    #[serde(default)]
    pub documents_failed: u64,
    #[serde(default)]
    pub batch_runs: u32,
    #[serde(default)]
    pub total_gemini_input_tokens: u64,
    #[serde(default)]
    pub total_gemini_output_tokens: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub gemini_api_key: Option<String>,
    #[serde(default = "default_classifier_model")]
    pub classifier_model: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    /// How sorted files are named in their category directory
    #[serde(default)]
    pub naming: Naming,
    /// Characters of document text handed to the classifier
    #[serde(default = "default_excerpt_chars")]
    pub excerpt_chars: usize,
    /// Maximum edit distance between a cited title and a known paper
    #[serde(default = "default_reference_tolerance")]
    pub reference_tolerance: usize,
    /// Rewrite reference tags every N streamed chunks
    #[serde(default = "default_rescan_every")]
    pub rescan_every_chunks: usize,
    #[serde(default = "default_search_max_results")]
    pub search_max_results: usize,
    /// Search/refine rounds per chat turn (1-5)
    #[serde(default = "default_refinement_iterations")]
    pub refinement_iterations: u32,
    #[serde(default)]
    pub card_style: CardStyle,
    /// Search `all:<prompt>` when the model proposes no query
    #[serde(default)]
    pub default_query_fallback: bool,
    #[serde(default)]
    pub processing_stats: ProcessingStats,
}

fn default_classifier_model() -> String {
    "gemini-2.0-flash-thinking-exp-01-21".to_string()
}

fn default_chat_model() -> String {
    "gemini-2.0-flash-lite-preview-02-05".to_string()
}

fn default_excerpt_chars() -> usize {
    15_000
}

fn default_reference_tolerance() -> usize {
    5
}

fn default_rescan_every() -> usize {
    1
}

fn default_search_max_results() -> usize {
    100
}

fn default_refinement_iterations() -> u32 {
    1
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            classifier_model: default_classifier_model(),
            chat_model: default_chat_model(),
            naming: Naming::default(),
            excerpt_chars: default_excerpt_chars(),
            reference_tolerance: default_reference_tolerance(),
            rescan_every_chunks: default_rescan_every(),
            search_max_results: default_search_max_results(),
            refinement_iterations: default_refinement_iterations(),
            card_style: CardStyle::default(),
            default_query_fallback: false,
            processing_stats: ProcessingStats::default(),
        }
    }
}

impl Settings {
    /// Load settings from disk or create default
    fn load(path: &PathBuf) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => {
                    serde_json::from_str(&content).unwrap_or_default()
                }
                Err(_) => Settings::default(),
            }
        } else {
            Settings::default()
        }
    }

    /// Save settings to disk
    fn save(&self, path: &PathBuf) -> Result<(), String> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize settings: {}", e))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create config directory: {}", e))?;
        }

        fs::write(path, content)
            .map_err(|e| format!("Failed to write settings: {}", e))?;

        Ok(())
    }
}

/// Initialize settings with the app data directory
pub fn init(app_data_dir: PathBuf) {
    let config_path = app_data_dir.join("settings.json");
    let settings = Settings::load(&config_path);

    if let Ok(mut guard) = CONFIG_PATH.write() {
        *guard = Some(config_path);
    }
    if let Ok(mut guard) = SETTINGS.write() {
        *guard = Some(settings);
    }
}

/// Snapshot of the current settings (defaults when not initialized)
pub fn current() -> Settings {
    SETTINGS
        .read()
        .ok()
        .and_then(|guard| guard.clone())
        .unwrap_or_default()
}

/// Apply `update` to the settings and persist them
fn update(update: impl FnOnce(&mut Settings)) -> Result<(), String> {
    let mut settings_guard = SETTINGS.write()
        .map_err(|_| "Failed to acquire settings lock")?;

    let settings = settings_guard.get_or_insert_with(Settings::default);
    update(settings);

    let config_path = CONFIG_PATH.read()
        .map_err(|_| "Failed to acquire config path lock")?
        .clone()
        .ok_or("Settings not initialized")?;

    settings.save(&config_path)
}

// ==================== Gemini API Key ====================

/// Get the Gemini API key (checks env var first, then stored setting)
pub fn get_api_key() -> Option<String> {
    if let Ok(key) = std::env::var("GEMINI_API_KEY") {
        if !key.is_empty() {
            return Some(key);
        }
    }

    let guard = SETTINGS.read().ok()?;
    let settings = guard.as_ref()?;
    settings.gemini_api_key.clone()
}

/// Check if API key is available
pub fn has_api_key() -> bool {
    get_api_key().map(|k| !k.is_empty()).unwrap_or(false)
}

/// Set and save the API key (empty string clears it)
pub fn set_api_key(key: String) -> Result<(), String> {
    update(|settings| {
        settings.gemini_api_key = if key.is_empty() { None } else { Some(key) };
    })?;
    tracing::info!("Gemini API key saved to settings");
    Ok(())
}

/// Get masked API key for display (shows first 8 / last 4 chars)
pub fn get_masked_api_key() -> Option<String> {
    get_api_key().map(|key| mask_key(&key))
}

fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() > 12 {
        let head: String = chars[..8].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    } else {
        "*".repeat(chars.len())
    }
}

// ==================== Sorting ====================

pub fn set_naming(naming: Naming) -> Result<(), String> {
    update(|settings| settings.naming = naming)
}

pub fn set_classifier_model(model: String) -> Result<(), String> {
    if model.trim().is_empty() {
        return Err("Model name cannot be empty".to_string());
    }
    update(|settings| settings.classifier_model = model)
}

pub fn set_excerpt_chars(chars: usize) -> Result<(), String> {
    if chars == 0 {
        return Err("Excerpt length must be at least 1 character".to_string());
    }
    update(|settings| settings.excerpt_chars = chars)
}

// ==================== Chat ====================

pub fn set_chat_model(model: String) -> Result<(), String> {
    if model.trim().is_empty() {
        return Err("Model name cannot be empty".to_string());
    }
    update(|settings| settings.chat_model = model)
}

pub fn set_reference_tolerance(tolerance: usize) -> Result<(), String> {
    update(|settings| settings.reference_tolerance = tolerance)
}

pub fn set_rescan_every_chunks(chunks: usize) -> Result<(), String> {
    update(|settings| settings.rescan_every_chunks = chunks.max(1))
}

pub fn set_search_max_results(max: usize) -> Result<(), String> {
    if max == 0 {
        return Err("Maximum results must be at least 1".to_string());
    }
    update(|settings| settings.search_max_results = max)
}

pub fn set_refinement_iterations(iterations: u32) -> Result<(), String> {
    if !(1..=5).contains(&iterations) {
        return Err("Iterations must be between 1 and 5".to_string());
    }
    update(|settings| settings.refinement_iterations = iterations)
}

pub fn set_card_style(style: CardStyle) -> Result<(), String> {
    update(|settings| settings.card_style = style)
}

pub fn set_default_query_fallback(enabled: bool) -> Result<(), String> {
    update(|settings| settings.default_query_fallback = enabled)
}

// ==================== Processing Stats ====================

/// Get processing stats
pub fn get_processing_stats() -> ProcessingStats {
    current().processing_stats
}

/// Record the outcome counts of one batch run (additive)
pub fn add_sort_results(sorted: u64, failed: u64) -> Result<(), String> {
    update(|settings| {
        let stats = &mut settings.processing_stats;
        stats.documents_sorted += sorted;
        stats.documents_failed += failed;
        stats.batch_runs += 1;
    })
}

/// Add Gemini API token usage
pub fn add_gemini_tokens(input_tokens: u64, output_tokens: u64) -> Result<(), String> {
    update(|settings| {
        settings.processing_stats.total_gemini_input_tokens += input_tokens;
        settings.processing_stats.total_gemini_output_tokens += output_tokens;
    })
}
