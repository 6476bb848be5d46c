use serde::{Deserialize, Serialize};

/// Which back-end serves generation requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorKind {
    /// Messages-style JSON API over HTTP.
    #[default]
    Messages,
    /// Deterministic stub output, no network.
    Placeholder,
}

/// Environment variable consulted when `api_key` is empty.
pub const API_KEY_ENV: &str = "FOLIO_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    #[serde(default)]
    pub kind: GeneratorKind,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_model_id")]
    pub model_id: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Per-request timeout for the HTTP back-end.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_model_id() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_max_tokens() -> u32 {
    8000
}

fn default_temperature() -> f32 {
    0.7
}

fn default_timeout_secs() -> u64 {
    300
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            kind: GeneratorKind::default(),
            endpoint: None,
            model_id: default_model_id(),
            api_key: String::new(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl GeneratorConfig {
    /// A placeholder configuration, handy for dry runs and tests.
    pub fn placeholder() -> Self {
        Self {
            kind: GeneratorKind::Placeholder,
            ..Self::default()
        }
    }

    pub fn base_url(&self) -> &str {
        match &self.endpoint {
            Some(url) => url.trim_end_matches('/'),
            None => "https://api.anthropic.com",
        }
    }

    /// The configured key, falling back to [`API_KEY_ENV`].
    pub fn resolved_api_key(&self) -> Option<String> {
        if !self.api_key.is_empty() {
            return Some(self.api_key.clone());
        }
        std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty())
    }
}
