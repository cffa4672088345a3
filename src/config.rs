//! Configuration parsing and validation.
//!
//! Settings come from a TOML file (default `./config/triage.toml`); every
//! section and key is optional and falls back to the defaults below.
//! Credentials are never read from the file. They come from the
//! environment via [`Secrets::from_env`].
//!
//! # Environment
//!
//! | Variable | Effect |
//! |----------|--------|
//! | `ZOHO_CLIENT_ID`, `ZOHO_CLIENT_SECRET`, `ZOHO_REFRESH_TOKEN` | Helpdesk OAuth refresh grant (required for helpdesk commands) |
//! | `ZOHO_ORG_ID`, `ZOHO_BASE_URL`, `ZOHO_ACCOUNTS_URL` | Override `[helpdesk]` keys |
//! | `ANTHROPIC_API_KEY` | Enables the classifier; absent → heuristic triage |
//! | `CLAUDE_MODEL` | Overrides `triage.model` |
//! | `MAIL_RELAY_TOKEN` | Bearer token for the notification relay |

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use helpdesk_triage_core::triage::{AutoReplySettings, FALLBACK_CATEGORY};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub helpdesk: HelpdeskConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub triage: TriageConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub similarity: SimilarityConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/triage.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct HelpdeskConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Full OAuth token endpoint.
    #[serde(default = "default_accounts_url")]
    pub accounts_url: String,
    #[serde(default)]
    pub org_id: Option<String>,
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

impl Default for HelpdeskConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            accounts_url: default_accounts_url(),
            org_id: None,
            timeout_secs: default_http_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "https://desk.zoho.com/api/v1".to_string()
}
fn default_accounts_url() -> String {
    "https://accounts.zoho.com/oauth/v2/token".to_string()
}
fn default_http_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollerConfig {
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
    #[serde(default = "default_active_statuses")]
    pub active_statuses: Vec<String>,
    /// Upper bound for each per-ticket step (triage, persist, each write-back).
    #[serde(default = "default_step_timeout")]
    pub step_timeout_secs: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            batch_limit: default_batch_limit(),
            active_statuses: default_active_statuses(),
            step_timeout_secs: default_step_timeout(),
        }
    }
}

fn default_interval() -> u64 {
    20
}
fn default_batch_limit() -> usize {
    10
}
fn default_active_statuses() -> Vec<String> {
    ["Open", "On Hold", "In Progress", "Escalated"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_step_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct TriageConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_categories")]
    pub categories: Vec<String>,
    #[serde(default = "default_auto_reply_categories")]
    pub auto_reply_categories: Vec<String>,
    #[serde(default)]
    pub auto_reply_enabled: bool,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_http_timeout(),
            api_url: default_api_url(),
            categories: default_categories(),
            auto_reply_categories: default_auto_reply_categories(),
            auto_reply_enabled: false,
            confidence_threshold: default_confidence_threshold(),
        }
    }
}

impl TriageConfig {
    pub fn auto_reply(&self) -> AutoReplySettings {
        AutoReplySettings {
            enabled: self.auto_reply_enabled,
            categories: self.auto_reply_categories.clone(),
            confidence_threshold: self.confidence_threshold,
        }
    }
}

fn default_model() -> String {
    "claude-3-5-haiku-latest".to_string()
}
fn default_max_tokens() -> u32 {
    600
}
fn default_temperature() -> f64 {
    0.3
}
fn default_api_url() -> String {
    "https://api.anthropic.com/v1/messages".to_string()
}
fn default_categories() -> Vec<String> {
    ["Billing", "Technical", "Account", "Shipping", "Sales", "Other"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_auto_reply_categories() -> Vec<String> {
    ["Account", "Billing", "Shipping"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_confidence_threshold() -> f64 {
    0.8
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
    /// Ollama base URL.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_true")]
    pub reuse_by_signature: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            max_retries: default_max_retries(),
            timeout_secs: default_http_timeout(),
            url: None,
            reuse_by_signature: true,
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct SimilarityConfig {
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_num_candidates")]
    pub num_candidates: usize,
    #[serde(default = "default_index_window")]
    pub index_window_days: i64,
    #[serde(default = "default_fallback_window")]
    pub fallback_window_days: i64,
    #[serde(default)]
    pub same_site: bool,
    #[serde(default = "default_true")]
    pub index_enabled: bool,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            top_k: default_top_k(),
            num_candidates: default_num_candidates(),
            index_window_days: default_index_window(),
            fallback_window_days: default_fallback_window(),
            same_site: false,
            index_enabled: true,
        }
    }
}

fn default_threshold() -> f64 {
    0.9
}
fn default_top_k() -> usize {
    5
}
fn default_num_candidates() -> usize {
    100
}
fn default_index_window() -> i64 {
    30
}
fn default_fallback_window() -> i64 {
    180
}

/// Notification delivery. Without both `recipient` and `relay_url` the
/// notifier is a no-op.
#[derive(Debug, Deserialize, Clone)]
pub struct NotifyConfig {
    #[serde(default)]
    pub recipient: Option<String>,
    #[serde(default)]
    pub relay_url: Option<String>,
    #[serde(default = "default_from")]
    pub from: String,
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            recipient: None,
            relay_url: None,
            from: default_from(),
            timeout_secs: default_http_timeout(),
        }
    }
}

fn default_from() -> String {
    "triage-bot@localhost".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

/// Credentials read from the environment.
#[derive(Clone, Default)]
pub struct Secrets {
    pub zoho_client_id: Option<String>,
    pub zoho_client_secret: Option<String>,
    pub zoho_refresh_token: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub mail_relay_token: Option<String>,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let set = |v: &Option<String>| if v.is_some() { "<set>" } else { "<unset>" };
        f.debug_struct("Secrets")
            .field("zoho_client_id", &set(&self.zoho_client_id))
            .field("zoho_client_secret", &set(&self.zoho_client_secret))
            .field("zoho_refresh_token", &set(&self.zoho_refresh_token))
            .field("anthropic_api_key", &set(&self.anthropic_api_key))
            .field("mail_relay_token", &set(&self.mail_relay_token))
            .finish()
    }
}

/// OAuth client credentials for the helpdesk, all present.
#[derive(Clone)]
pub struct HelpdeskCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

impl Secrets {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            zoho_client_id: get("ZOHO_CLIENT_ID"),
            zoho_client_secret: get("ZOHO_CLIENT_SECRET"),
            zoho_refresh_token: get("ZOHO_REFRESH_TOKEN"),
            anthropic_api_key: get("ANTHROPIC_API_KEY"),
            mail_relay_token: get("MAIL_RELAY_TOKEN"),
        }
    }

    /// Helpdesk credentials, or an error naming every missing variable.
    pub fn helpdesk_credentials(&self) -> Result<HelpdeskCredentials> {
        let mut missing = Vec::new();
        if self.zoho_client_id.is_none() {
            missing.push("ZOHO_CLIENT_ID");
        }
        if self.zoho_client_secret.is_none() {
            missing.push("ZOHO_CLIENT_SECRET");
        }
        if self.zoho_refresh_token.is_none() {
            missing.push("ZOHO_REFRESH_TOKEN");
        }
        match (
            &self.zoho_client_id,
            &self.zoho_client_secret,
            &self.zoho_refresh_token,
        ) {
            (Some(id), Some(secret), Some(token)) => Ok(HelpdeskCredentials {
                client_id: id.clone(),
                client_secret: secret.clone(),
                refresh_token: token.clone(),
            }),
            _ => bail!("Missing environment variables: {}", missing.join(", ")),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let mut config = parse_config(&content)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Parse and validate TOML text without touching the environment.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Overlay the non-secret environment overrides.
pub fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
    if let Some(v) = get("ZOHO_ORG_ID") {
        config.helpdesk.org_id = Some(v);
    }
    if let Some(v) = get("ZOHO_BASE_URL") {
        config.helpdesk.base_url = v;
    }
    if let Some(v) = get("ZOHO_ACCOUNTS_URL") {
        config.helpdesk.accounts_url = v;
    }
    if let Some(v) = get("CLAUDE_MODEL") {
        config.triage.model = v;
    }
}

fn validate(config: &Config) -> Result<()> {
    // Validate poller
    if config.poller.interval_secs == 0 {
        bail!("poller.interval_secs must be > 0");
    }
    if config.poller.batch_limit == 0 {
        bail!("poller.batch_limit must be > 0");
    }
    if config.poller.active_statuses.is_empty() {
        bail!("poller.active_statuses must not be empty");
    }
    if config.poller.step_timeout_secs == 0 {
        bail!("poller.step_timeout_secs must be > 0");
    }

    // Validate similarity
    let sim = &config.similarity;
    if !(-1.0..=1.0).contains(&sim.threshold) {
        bail!("similarity.threshold must be in [-1.0, 1.0]");
    }
    if sim.top_k == 0 {
        bail!("similarity.top_k must be >= 1");
    }
    if sim.num_candidates < sim.top_k.saturating_add(1) {
        bail!("similarity.num_candidates must be >= top_k + 1");
    }
    if sim.index_window_days <= 0 || sim.fallback_window_days <= 0 {
        bail!("similarity window sizes must be > 0 days");
    }

    // Validate triage
    let triage = &config.triage;
    if triage.categories.is_empty() {
        bail!("triage.categories must not be empty");
    }
    if !triage
        .categories
        .iter()
        .any(|c| c.eq_ignore_ascii_case(FALLBACK_CATEGORY))
    {
        bail!("triage.categories must include '{}'", FALLBACK_CATEGORY);
    }
    for c in &triage.auto_reply_categories {
        if !triage.categories.iter().any(|k| k.eq_ignore_ascii_case(c)) {
            bail!("triage.auto_reply_categories: '{}' is not in triage.categories", c);
        }
    }
    if !(0.0..=1.0).contains(&triage.confidence_threshold) {
        bail!("triage.confidence_threshold must be in [0.0, 1.0]");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "local" => {}
        "ollama" => {
            if config.embedding.model.is_none() || config.embedding.dims.unwrap_or(0) == 0 {
                bail!("embedding.model and embedding.dims must be set when provider is 'ollama'");
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be local or ollama.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_empty_file_gives_defaults() {
        let cfg = parse_config("").unwrap();
        assert_eq!(cfg.poller.interval_secs, 20);
        assert_eq!(cfg.poller.batch_limit, 10);
        assert_eq!(
            cfg.poller.active_statuses,
            vec!["Open", "On Hold", "In Progress", "Escalated"]
        );
        assert_eq!(cfg.similarity.threshold, 0.9);
        assert_eq!(cfg.similarity.top_k, 5);
        assert_eq!(cfg.triage.model, "claude-3-5-haiku-latest");
        assert_eq!(cfg.triage.max_tokens, 600);
        assert_eq!(cfg.triage.categories.len(), 6);
        assert!(cfg.embedding.reuse_by_signature);
        assert!(cfg.similarity.index_enabled);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(parse_config("[similarity]\nthreshold = 1.5").is_err());
        assert!(parse_config("[similarity]\ntop_k = 0").is_err());
        assert!(parse_config("[similarity]\ntop_k = 10\nnum_candidates = 10").is_err());
        assert!(parse_config("[poller]\ninterval_secs = 0").is_err());
        assert!(parse_config("[triage]\ncategories = []").is_err());
        assert!(parse_config("[triage]\ncategories = [\"Billing\"]").is_err());
        assert!(parse_config(
            "[triage]\ncategories = [\"Billing\", \"Other\"]\nauto_reply_categories = [\"Shipping\"]"
        )
        .is_err());
        assert!(parse_config("[embedding]\nprovider = \"openai\"").is_err());
        assert!(parse_config("[embedding]\nprovider = \"ollama\"").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("ZOHO_ORG_ID", "org-9"),
            ("CLAUDE_MODEL", "claude-x"),
            ("ZOHO_BASE_URL", "  "),
        ]
        .into_iter()
        .collect();
        let mut cfg = parse_config("").unwrap();
        apply_env_overrides(&mut cfg, |k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.helpdesk.org_id.as_deref(), Some("org-9"));
        assert_eq!(cfg.triage.model, "claude-x");
        assert_eq!(cfg.helpdesk.base_url, "https://desk.zoho.com/api/v1");
    }

    #[test]
    fn test_missing_credentials_listed() {
        let secrets = Secrets::from_lookup(|k| (k == "ZOHO_CLIENT_ID").then(|| "id".to_string()));
        let err = secrets.helpdesk_credentials().err().unwrap().to_string();
        assert!(err.contains("ZOHO_CLIENT_SECRET"));
        assert!(err.contains("ZOHO_REFRESH_TOKEN"));
        assert!(!err.contains("ZOHO_CLIENT_ID"));
    }
}
