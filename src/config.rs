use crate::models::EmailAction;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub account: AccountConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub automations: Vec<AutomationConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AccountConfig {
    /// Name substituted for {my_name} in reply templates.
    #[serde(default)]
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Falls back to the GEMINI_API_KEY environment variable.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_ai_timeout")]
    pub timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key: None,
            timeout_secs: default_ai_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_lookback")]
    pub lookback_secs: u64,
    #[serde(default = "default_max_results")]
    pub max_results: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            lookback_secs: default_lookback(),
            max_results: default_max_results(),
        }
    }
}

/// One `[[automations]]` entry: a label display name (resolved to a label
/// id at startup), the follow-up action, and an optional reply template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationConfig {
    pub label: String,
    pub action: EmailAction,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_model() -> String {
    "gemini-1.5-flash".to_string()
}

fn default_ai_timeout() -> u64 {
    30
}

fn default_poll_interval() -> u64 {
    30
}

fn default_lookback() -> u64 {
    3600
}

fn default_max_results() -> u32 {
    25
}

fn default_true() -> bool {
    true
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut config = match std::fs::read_to_string("settings.toml") {
            Ok(content) => toml::from_str(&content).context("settings.toml is not valid")?,
            Err(_) => Self::default(),
        };

        if config.ai.api_key.is_none() {
            config.ai.api_key = std::env::var("GEMINI_API_KEY").ok().filter(|k| !k.is_empty());
        }
        // Missing model credentials are fatal before the loop starts.
        if config.ai.api_key.is_none() {
            bail!("no AI API key: set ai.api_key in settings.toml or the GEMINI_API_KEY environment variable");
        }

        Ok(config)
    }
}
