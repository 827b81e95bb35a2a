// src/config/mod.rs
//! Digest configuration (TOML). Every field has a default, so an absent file
//! or an empty one yields a working local setup.
//!
//! Resolution order:
//! 1) explicit path (CLI `--config`)
//! 2) $DIGEST_CONFIG_PATH
//! 3) config/digest.toml
//! 4) defaults

pub mod secrets;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::render::DEFAULT_MAX_CHUNK;
use crate::state::{DEFAULT_LOCK_PATH, DEFAULT_STATE_PATH};

pub const ENV_CONFIG_PATH: &str = "DIGEST_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/digest.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DigestConfig {
    /// Source catalog file; the built-in catalog is used when unset.
    pub sources_path: Option<PathBuf>,
    /// Prometheus textfile written after each run.
    pub metrics_textfile: Option<PathBuf>,
    pub state: StateConfig,
    pub fetch: FetchConfig,
    pub parser: ParserConfig,
    pub telegram: TelegramConfig,
    pub render: RenderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StateConfig {
    pub path: PathBuf,
    pub lock_path: PathBuf,
    /// 0 disables stale-lock takeover.
    pub lock_stale_secs: u64,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_STATE_PATH),
            lock_path: PathBuf::from(DEFAULT_LOCK_PATH),
            lock_stale_secs: 6 * 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
    pub workers: usize,
    pub timeout_secs: u64,
    pub retries: u8,
    pub max_releases: usize,
    pub web_max_lines: usize,
    /// "ENV" (or unset) reads GITHUB_TOKEN; unauthenticated when neither is set.
    pub github_token: Option<String>,
    pub github_api_base: Option<String>,
    pub user_agent: Option<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            timeout_secs: 30,
            retries: 3,
            max_releases: 10,
            web_max_lines: 200,
            github_token: None,
            github_api_base: None,
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParserKind {
    /// Claude when an API key resolves, rules otherwise.
    Auto,
    Claude,
    Rules,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ParserConfig {
    pub provider: ParserKind,
    /// "ENV" (or unset) reads ANTHROPIC_API_KEY.
    pub api_key: Option<String>,
    pub api_base: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub retries: u8,
    /// On-disk cache of parsed records; disabled when unset.
    pub cache_dir: Option<PathBuf>,
    /// Cache entries older than this are pruned at startup; 0 keeps all.
    pub cache_max_age_days: u64,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            provider: ParserKind::Auto,
            api_key: None,
            api_base: None,
            model: crate::parse::claude::DEFAULT_MODEL.to_string(),
            max_tokens: 2048,
            timeout_secs: 120,
            retries: 3,
            cache_dir: Some(PathBuf::from("state/parse_cache")),
            cache_max_age_days: 30,
        }
    }
}

impl ParserConfig {
    pub fn cache_max_age(&self) -> Option<Duration> {
        (self.cache_max_age_days > 0)
            .then(|| Duration::from_secs(self.cache_max_age_days * 24 * 3600))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TelegramConfig {
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
    pub api_base: Option<String>,
    pub timeout_secs: u64,
    pub retries: u8,
    pub silent: bool,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            chat_id: None,
            api_base: None,
            timeout_secs: 10,
            retries: 3,
            silent: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderConfig {
    pub max_chunk: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            max_chunk: DEFAULT_MAX_CHUNK,
        }
    }
}

impl DigestConfig {
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let cfg: DigestConfig = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        cfg.validate()
            .with_context(|| format!("validating config {}", path.display()))?;
        Ok(cfg)
    }

    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(p) = explicit {
            return Self::load_from(p);
        }
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            } else {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
        }
        let default_p = PathBuf::from(DEFAULT_CONFIG_PATH);
        if default_p.exists() {
            return Self::load_from(&default_p);
        }
        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<()> {
        if self.fetch.workers == 0 {
            bail!("fetch.workers must be at least 1");
        }
        if self.render.max_chunk < 200 || self.render.max_chunk > 4096 {
            bail!("render.max_chunk must be within 200..=4096");
        }
        if self.fetch.max_releases == 0 || self.fetch.max_releases > 100 {
            bail!("fetch.max_releases must be within 1..=100");
        }
        Ok(())
    }

    pub fn lock_stale_after(&self) -> Option<Duration> {
        (self.state.lock_stale_secs > 0).then(|| Duration::from_secs(self.state.lock_stale_secs))
    }

    pub fn github_token(&self) -> Option<String> {
        secrets::resolve(self.fetch.github_token.as_deref(), secrets::GITHUB_TOKEN)
    }

    pub fn anthropic_key(&self) -> Option<String> {
        secrets::resolve(self.parser.api_key.as_deref(), secrets::ANTHROPIC_API_KEY)
    }

    /// Bot token and chat id; both are required to deliver.
    pub fn telegram_credentials(&self) -> Result<(String, String)> {
        let token = secrets::require(self.telegram.bot_token.as_deref(), secrets::TELEGRAM_BOT_TOKEN)?;
        let chat = secrets::require(self.telegram.chat_id.as_deref(), secrets::TELEGRAM_CHAT_ID)?;
        Ok((token, chat))
    }
}
