use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use webresearch_core::{Config, ConfigLoader};

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub listen_addr: String,
    pub max_concurrency: usize,
    pub research: Config,
}

impl ApiConfig {
    const DEFAULT_LISTEN_ADDR: &'static str = "0.0.0.0:8000";
    const DEFAULT_MAX_CONCURRENCY: usize = 5;

    /// Listener settings come from `WEBRESEARCH_API_*` variables; research
    /// settings from the regular configuration file.
    pub fn from_env() -> Result<Self> {
        let listen_addr = env::var("WEBRESEARCH_API_ADDR")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| Self::DEFAULT_LISTEN_ADDR.to_string());

        let max_concurrency = env::var("WEBRESEARCH_MAX_CONCURRENT_SESSIONS")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(Self::DEFAULT_MAX_CONCURRENCY);

        let research = ConfigLoader::load(env::var("WEBRESEARCH_CONFIG").ok().map(PathBuf::from))
            .context("failed to load research configuration")?;

        Ok(Self {
            listen_addr,
            max_concurrency,
            research,
        })
    }
}
