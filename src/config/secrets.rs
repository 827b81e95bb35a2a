// src/config/secrets.rs
//! Secret values in the config file follow one convention: the literal
//! `"ENV"` (any case), an empty string or a missing key means "read it from the
//! environment variable named for that secret". Anything else is used as-is.

use std::env;

pub const TELEGRAM_BOT_TOKEN: &str = "TELEGRAM_BOT_TOKEN";
pub const TELEGRAM_CHAT_ID: &str = "TELEGRAM_CHAT_ID";
pub const ANTHROPIC_API_KEY: &str = "ANTHROPIC_API_KEY";
pub const GITHUB_TOKEN: &str = "GITHUB_TOKEN";

/// Resolve an optional secret; `None` when neither the file nor the
/// environment provides a non-empty value.
pub fn resolve(configured: Option<&str>, env_var: &str) -> Option<String> {
    match configured.map(str::trim) {
        Some(v) if !v.is_empty() && !v.eq_ignore_ascii_case("env") => Some(v.to_string()),
        _ => env::var(env_var)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty()),
    }
}

/// Like `resolve`, but a missing value is a configuration error.
pub fn require(configured: Option<&str>, env_var: &str) -> anyhow::Result<String> {
    resolve(configured, env_var).ok_or_else(|| anyhow::anyhow!("Missing {env_var} env var"))
}
