use serde::Deserialize;

/// Prompt enhancement through a text completion model
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PromptConfig {
    /// Cloud folder the completion model is billed to
    pub folder_id: String,
    /// Completion model name
    #[serde(default = "default_model")]
    pub model: String,
    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Completion length limit
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Base URL override
    #[serde(default)]
    pub base_url: Option<String>,
}

fn default_model() -> String {
    "yandexgpt-lite".to_owned()
}

#[allow(clippy::missing_const_for_fn)]
fn default_temperature() -> f64 {
    0.6
}

#[allow(clippy::missing_const_for_fn)]
fn default_max_tokens() -> u32 {
    200
}
