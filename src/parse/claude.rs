// src/parse/claude.rs
//! Remote parser backed by the Anthropic Messages API.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{parse_response, ParseRequest, ReleaseParser, StructuredRecord, MAX_TRY_THIS};
use crate::error::ParseError;
use crate::retry::RetryPolicy;

pub const DEFAULT_API_BASE: &str = "https://api.anthropic.com";
pub const DEFAULT_MODEL: &str = "claude-3-5-haiku-latest";
const API_VERSION: &str = "2023-06-01";

/// Raw text beyond this many characters is cut before it is sent.
const MAX_INPUT_CHARS: usize = 60_000;

const SYSTEM_PROMPT: &str = "You turn software release notes into a compact digest entry. \
Reply with ONE JSON object and nothing else, shaped exactly as \
{\"summary\": string, \"try_this\": [string], \"categories\": {string: [string]}}. \
`summary` is one line naming the product and, when given, the version range. \
`try_this` holds at most 3 user-facing features worth trying right away; leave it empty for pure fix releases. \
`categories` maps category names to short item descriptions; use only the category names you are given, \
omit empty categories, and put anything that fits nowhere under \"Other Changes\". No Markdown.";

pub struct ClaudeParser {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    timeout: Duration,
    retry: RetryPolicy,
}

impl ClaudeParser {
    pub fn new(http: reqwest::Client, api_key: String) -> Self {
        Self {
            http,
            api_base: DEFAULT_API_BASE.to_string(),
            api_key,
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 2048,
            timeout: Duration::from_secs(120),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, n: u32) -> Self {
        self.max_tokens = n.max(256);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn call(&self, prompt: &str) -> Result<String, ParseError> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            max_tokens: u32,
            temperature: f32,
            system: &'a str,
            messages: Vec<Msg<'a>>,
        }
        #[derive(Deserialize)]
        struct Resp {
            content: Vec<Block>,
        }
        #[derive(Deserialize)]
        struct Block {
            #[serde(rename = "type")]
            kind: String,
            #[serde(default)]
            text: String,
        }

        let req = Req {
            model: &self.model,
            max_tokens: self.max_tokens,
            temperature: 0.0,
            system: SYSTEM_PROMPT,
            messages: vec![Msg {
                role: "user",
                content: prompt,
            }],
        };

        let send = self
            .http
            .post(format!("{}/v1/messages", self.api_base))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .timeout(self.timeout)
            .json(&req)
            .send();
        let resp = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| ParseError::Timeout(self.timeout))??;

        let status = resp.status();
        if !status.is_success() {
            return Err(ParseError::Status {
                status: status.as_u16(),
            });
        }
        let body = resp.text().await?;
        let parsed: Resp =
            serde_json::from_str(&body).map_err(|e| ParseError::Shape(format!("envelope: {e}")))?;
        let text: String = parsed
            .content
            .into_iter()
            .filter(|b| b.kind == "text")
            .map(|b| b.text)
            .collect();
        Ok(text)
    }
}

/// User turn sent with every request.
pub fn build_prompt(req: &ParseRequest) -> String {
    let mut out = String::new();
    out.push_str(&format!("Product: {}\n", req.source_name));
    if !req.versions.is_empty() {
        out.push_str(&format!("Versions (newest first): {}\n", req.versions.join(", ")));
    }
    if let Some(prev) = &req.previous {
        if !req.versions.is_empty() {
            out.push_str(&format!("Previously reported version: {prev}\n"));
        }
    }
    out.push_str(&format!(
        "Allowed categories: {}\n",
        req.vocabulary().join(", ")
    ));
    out.push_str(&format!("At most {MAX_TRY_THIS} try_this entries.\n\n"));
    out.push_str("Release notes:\n");
    let text: String = req.raw_text.chars().take(MAX_INPUT_CHARS).collect();
    out.push_str(&text);
    out
}

#[async_trait::async_trait]
impl ReleaseParser for ClaudeParser {
    async fn parse(&self, req: &ParseRequest) -> Result<StructuredRecord, ParseError> {
        let prompt = build_prompt(req);
        let text = self
            .retry
            .run(&req.source_name, || self.call(&prompt))
            .await?;
        parse_response(&text)
    }

    fn name(&self) -> &'static str {
        "claude"
    }
}
