//! Application configuration for Grove.
//!
//! User config lives at `~/.grove/grove.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{GroveError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "grove.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".grove";

/// Pages are truncated to this many characters before classification.
pub const DEFAULT_MAX_PAGE_CHARS: usize = 12_000;

/// Minimum `relevance_score` for a page to enter the manifest.
pub const DEFAULT_RELEVANCE_THRESHOLD: u8 = 4;

// ---------------------------------------------------------------------------
// Config structs (matching grove.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Where the corpus and the built artifacts live.
    #[serde(default)]
    pub paths: PathsConfig,

    /// Phase-1 classification settings.
    #[serde(default)]
    pub classification: ClassificationConfig,

    /// Model service bridge settings.
    #[serde(default)]
    pub bridge: BridgeConfig,
}

/// `[paths]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory holding `<page_id>.md` and `<page_id>_timing.json` files.
    #[serde(default = "default_corpus_dir")]
    pub corpus_dir: String,

    /// Directory the manifest and tree are written to.
    #[serde(default = "default_context_dir")]
    pub context_dir: String,

    #[serde(default = "default_manifest_file")]
    pub manifest_file: String,

    #[serde(default = "default_tree_file")]
    pub tree_file: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            corpus_dir: default_corpus_dir(),
            context_dir: default_context_dir(),
            manifest_file: default_manifest_file(),
            tree_file: default_tree_file(),
        }
    }
}

impl PathsConfig {
    /// Full path of the manifest file.
    pub fn manifest_path(&self) -> PathBuf {
        Path::new(&self.context_dir).join(&self.manifest_file)
    }

    /// Full path of the knowledge tree file.
    pub fn tree_path(&self) -> PathBuf {
        Path::new(&self.context_dir).join(&self.tree_file)
    }
}

fn default_corpus_dir() -> String {
    "pages".into()
}
fn default_context_dir() -> String {
    "context".into()
}
fn default_manifest_file() -> String {
    "page_manifest.json".into()
}
fn default_tree_file() -> String {
    "knowledge_tree.json".into()
}

/// How an existing manifest is judged fresh enough to reuse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheKey {
    /// The manifest file exists. Staleness is the caller's problem.
    #[default]
    Existence,
    /// The manifest exists and its digest sidecar matches the current corpus.
    ContentHash,
}

/// `[classification]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationConfig {
    #[serde(default = "default_max_page_chars")]
    pub max_page_chars: usize,

    #[serde(default = "default_relevance_threshold")]
    pub relevance_threshold: u8,

    #[serde(default)]
    pub cache_key: CacheKey,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            max_page_chars: DEFAULT_MAX_PAGE_CHARS,
            relevance_threshold: DEFAULT_RELEVANCE_THRESHOLD,
            cache_key: CacheKey::default(),
        }
    }
}

fn default_max_page_chars() -> usize {
    DEFAULT_MAX_PAGE_CHARS
}
fn default_relevance_threshold() -> u8 {
    DEFAULT_RELEVANCE_THRESHOLD
}

/// `[bridge]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Runtime used to launch the bridge script (e.g. "bun").
    #[serde(default = "default_bridge_command")]
    pub command: String,

    #[serde(default = "default_bridge_script")]
    pub script: String,

    #[serde(default = "default_working_dir")]
    pub working_dir: String,

    /// Model used for per-page classification.
    #[serde(default = "default_classifier_model")]
    pub classifier_model: String,

    /// Model used for tree construction.
    #[serde(default = "default_tree_model")]
    pub tree_model: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            command: default_bridge_command(),
            script: default_bridge_script(),
            working_dir: default_working_dir(),
            classifier_model: default_classifier_model(),
            tree_model: default_tree_model(),
            api_key_env: default_api_key_env(),
        }
    }
}

fn default_bridge_command() -> String {
    "bun".into()
}
fn default_bridge_script() -> String {
    "bridge/src/index.ts".into()
}
fn default_working_dir() -> String {
    ".".into()
}
fn default_classifier_model() -> String {
    "qwen3:14b".into()
}
fn default_tree_model() -> String {
    "gemini-2.5-flash".into()
}
fn default_api_key_env() -> String {
    "GEMINI_API_KEY".into()
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.grove/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| GroveError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.grove/grove.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| GroveError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| GroveError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| GroveError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let content = toml::to_string_pretty(&AppConfig::default())
        .map_err(|e| GroveError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| GroveError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that the model API key env var is set and non-empty.
pub fn validate_api_key(config: &AppConfig) -> Result<()> {
    let var_name = &config.bridge.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(()),
        _ => Err(GroveError::config(format!(
            "model API key not found. Set the {var_name} environment variable."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let toml_str = toml::to_string_pretty(&AppConfig::default()).expect("serialize");
        assert!(toml_str.contains("corpus_dir"));
        assert!(toml_str.contains("GEMINI_API_KEY"));
        assert!(toml_str.contains(r#"cache_key = "existence""#));
    }

    #[test]
    fn config_roundtrip() {
        let toml_str = toml::to_string_pretty(&AppConfig::default()).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.classification.max_page_chars, 12_000);
        assert_eq!(parsed.classification.relevance_threshold, 4);
        assert_eq!(parsed.bridge.command, "bun");
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[paths]
context_dir = "/tmp/ad7980/context"

[classification]
cache_key = "content_hash"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.paths.corpus_dir, "pages");
        assert_eq!(
            config.paths.manifest_path(),
            PathBuf::from("/tmp/ad7980/context/page_manifest.json")
        );
        assert_eq!(config.classification.cache_key, CacheKey::ContentHash);
        assert_eq!(config.classification.relevance_threshold, 4);
    }

    #[test]
    fn load_config_from_reports_parse_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("grove.toml");
        std::fs::write(&path, "[classification]\nrelevance_threshold = \"high\"\n").expect("write");
        let err = load_config_from(&path).unwrap_err();
        assert!(err.to_string().contains("failed to parse"));
    }

    #[test]
    fn api_key_validation() {
        let mut config = AppConfig::default();
        // Unique env var name so other tests are unaffected
        config.bridge.api_key_env = "GROVE_TEST_NONEXISTENT_KEY_12345".into();
        let result = validate_api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }
}
