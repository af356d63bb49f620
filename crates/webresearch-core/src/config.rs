use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::{ResearchError, SecretValue, require_env};

const DEFAULT_CONFIG_PATH: &str = "webresearch.toml";
const CONFIG_PATH_ENV: &str = "WEBRESEARCH_CONFIG";
const LLM_BASE_URL_ENV: &str = "LLM_BASE_URL";
const LLM_MODEL_ENV: &str = "LLM_MODEL";

/// Top-level configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub research: ResearchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Resolve the configured LLM secret value (from environment only).
    pub fn llm_api_key(&self) -> Result<SecretValue, ResearchError> {
        require_env(&self.llm.api_key_env)
    }

    /// Resolve the configured search secret value (from environment only).
    pub fn search_api_key(&self) -> Result<SecretValue, ResearchError> {
        require_env(&self.search.api_key_env)
    }
}

/// Helper to load configuration with guard rails.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a provided path or discoverable defaults.
    ///
    /// Resolution order:
    /// 1. Explicit `path` argument.
    /// 2. `WEBRESEARCH_CONFIG` environment variable.
    /// 3. `webresearch.toml` in the current working directory.
    ///
    /// Only the implicit default file may be absent; built-in defaults are
    /// used in that case. `LLM_BASE_URL` and `LLM_MODEL` override the file.
    pub fn load(path: Option<PathBuf>) -> Result<Config, ResearchError> {
        let (candidate, explicit) = resolve_path(path);

        let mut config = if !explicit && !candidate.exists() {
            Config::default()
        } else {
            let raw = fs::read_to_string(&candidate)
                .map_err(|err| ResearchError::config_io(candidate.clone(), err))?;
            Self::parse(&raw)?
        };

        apply_env_overrides(&mut config);
        Self::validate(&config)?;
        Ok(config)
    }

    /// Parse a TOML document without touching the environment.
    pub fn parse(raw: &str) -> Result<Config, ResearchError> {
        toml::from_str(raw).map_err(|err| ResearchError::InvalidConfiguration(err.to_string()))
    }

    pub fn validate(config: &Config) -> Result<(), ResearchError> {
        if config.llm.api_key_env.trim().is_empty() {
            return Err(ResearchError::InvalidConfiguration(
                "llm.api_key_env must reference an environment variable".into(),
            ));
        }
        if config.search.api_key_env.trim().is_empty() {
            return Err(ResearchError::InvalidConfiguration(
                "search.api_key_env must reference an environment variable".into(),
            ));
        }

        let research = &config.research;
        for (name, value) in [
            ("research.num_searches", research.num_searches as u64),
            ("research.num_rewordings", research.num_rewordings as u64),
            ("research.results_per_query", research.results_per_query as u64),
            ("research.results_per_topic", research.results_per_topic as u64),
            ("research.search_timeout_secs", research.search_timeout_secs),
            ("research.model_timeout_secs", research.model_timeout_secs),
        ] {
            if value == 0 {
                return Err(ResearchError::InvalidConfiguration(format!(
                    "{name} must be at least 1"
                )));
            }
        }

        Ok(())
    }
}

fn resolve_path(path: Option<PathBuf>) -> (PathBuf, bool) {
    if let Some(path) = path {
        return (path, true);
    }

    if let Ok(from_env) = env::var(CONFIG_PATH_ENV) {
        if !from_env.trim().is_empty() {
            return (PathBuf::from(from_env), true);
        }
    }

    (Path::new(DEFAULT_CONFIG_PATH).to_path_buf(), false)
}

fn apply_env_overrides(config: &mut Config) {
    if let Some(url) = non_empty_env(LLM_BASE_URL_ENV) {
        config.llm.base_url = url;
    }
    if let Some(model) = non_empty_env(LLM_MODEL_ENV) {
        config.llm.model = model;
    }
}

fn non_empty_env(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "LlmConfig::default_base_url")]
    pub base_url: String,
    #[serde(default = "LlmConfig::default_model")]
    pub model: String,
    #[serde(default = "LlmConfig::default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "LlmConfig::default_max_tokens")]
    pub max_tokens: u32,
}

impl LlmConfig {
    fn default_base_url() -> String {
        "https://api.openai.com/v1".to_string()
    }

    fn default_model() -> String {
        "gpt-4o-mini".to_string()
    }

    fn default_api_key_env() -> String {
        "LLM_API_KEY".to_string()
    }

    const fn default_max_tokens() -> u32 {
        1000
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: Self::default_base_url(),
            model: Self::default_model(),
            api_key_env: Self::default_api_key_env(),
            max_tokens: Self::default_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "SearchConfig::default_base_url")]
    pub base_url: String,
    #[serde(default = "SearchConfig::default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "SearchConfig::default_search_depth")]
    pub search_depth: String,
}

impl SearchConfig {
    fn default_base_url() -> String {
        "https://api.tavily.com".to_string()
    }

    fn default_api_key_env() -> String {
        "TAVILY_API_KEY".to_string()
    }

    fn default_search_depth() -> String {
        "basic".to_string()
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            base_url: Self::default_base_url(),
            api_key_env: Self::default_api_key_env(),
            search_depth: Self::default_search_depth(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResearchConfig {
    #[serde(default = "ResearchConfig::default_num_searches")]
    pub num_searches: u32,
    #[serde(default = "ResearchConfig::default_num_rewordings")]
    pub num_rewordings: u32,
    #[serde(default = "ResearchConfig::default_results_per_query")]
    pub results_per_query: usize,
    #[serde(default = "ResearchConfig::default_results_per_topic")]
    pub results_per_topic: usize,
    #[serde(default = "ResearchConfig::default_search_timeout_secs")]
    pub search_timeout_secs: u64,
    #[serde(default = "ResearchConfig::default_model_timeout_secs")]
    pub model_timeout_secs: u64,
    #[serde(default)]
    pub fail_when_all_searches_fail: bool,
}

impl ResearchConfig {
    const fn default_num_searches() -> u32 {
        3
    }

    const fn default_num_rewordings() -> u32 {
        3
    }

    const fn default_results_per_query() -> usize {
        3
    }

    const fn default_results_per_topic() -> usize {
        2
    }

    const fn default_search_timeout_secs() -> u64 {
        30
    }

    const fn default_model_timeout_secs() -> u64 {
        60
    }
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            num_searches: Self::default_num_searches(),
            num_rewordings: Self::default_num_rewordings(),
            results_per_query: Self::default_results_per_query(),
            results_per_topic: Self::default_results_per_topic(),
            search_timeout_secs: Self::default_search_timeout_secs(),
            model_timeout_secs: Self::default_model_timeout_secs(),
            fail_when_all_searches_fail: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
    /// Directory for per-session journals; journals are disabled when unset.
    #[serde(default = "LoggingConfig::default_dir")]
    pub dir: Option<PathBuf>,
    #[serde(default = "LoggingConfig::default_retention_days")]
    pub retention_days: u64,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }

    fn default_dir() -> Option<PathBuf> {
        Some(PathBuf::from("logs"))
    }

    const fn default_retention_days() -> u64 {
        30
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            dir: Self::default_dir(),
            retention_days: Self::default_retention_days(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_document_yields_defaults() {
        let config = ConfigLoader::parse("").expect("empty config parses");
        assert_eq!(config.research.num_searches, 3);
        assert_eq!(config.research.num_rewordings, 3);
        assert_eq!(config.research.results_per_query, 3);
        assert_eq!(config.research.results_per_topic, 2);
        assert_eq!(config.research.search_timeout_secs, 30);
        assert_eq!(config.research.model_timeout_secs, 60);
        assert!(!config.research.fail_when_all_searches_fail);
        assert_eq!(config.search.api_key_env, "TAVILY_API_KEY");
        assert_eq!(config.llm.max_tokens, 1000);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = ConfigLoader::parse(
            r#"
            [llm]
            model = "local-model"

            [research]
            num_rewordings = 5
            fail_when_all_searches_fail = true

            [logging]
            dir = "/tmp/webresearch-logs"
            "#,
        )
        .expect("config parses");

        assert_eq!(config.llm.model, "local-model");
        assert_eq!(config.llm.base_url, "https://api.openai.com/v1");
        assert_eq!(config.research.num_rewordings, 5);
        assert_eq!(config.research.num_searches, 3);
        assert!(config.research.fail_when_all_searches_fail);
        assert_eq!(
            config.logging.dir.as_deref(),
            Some(Path::new("/tmp/webresearch-logs"))
        );
    }

    #[test]
    fn zero_bounds_are_rejected() {
        let config = ConfigLoader::parse("[research]\nnum_searches = 0\n").unwrap();
        let err = ConfigLoader::validate(&config).unwrap_err();
        assert!(matches!(err, ResearchError::InvalidConfiguration(msg) if msg.contains("num_searches")));
    }

    #[test]
    fn explicit_missing_file_is_an_io_error() {
        let err = ConfigLoader::load(Some(PathBuf::from("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(err, ResearchError::ConfigIo { .. }));
    }

    #[test]
    fn explicit_file_is_loaded() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "[search]\nsearch_depth = \"advanced\"").unwrap();

        let config = ConfigLoader::load(Some(file.path().to_path_buf())).expect("config loads");
        assert_eq!(config.search.search_depth, "advanced");
    }
}
