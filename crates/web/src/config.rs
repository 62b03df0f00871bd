use std::env;

use hserver_http::connection::DEFAULT_MAX_BODY_SIZE;
use serde::Deserialize;

/// Application settings, fixed once the application is built.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Trust `X-Forwarded-*` headers set by a reverse proxy
    pub proxy: bool,
    /// Environment tag, `development` unless configured
    pub env: String,
    /// Largest request body buffered before the pipeline runs
    pub max_body_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self { proxy: false, env: "development".to_owned(), max_body_size: DEFAULT_MAX_BODY_SIZE }
    }
}

impl Settings {
    /// Defaults overridden by `HSERVER_ENV` and `HSERVER_PROXY`.
    pub fn from_env() -> Self {
        Self::from_vars(|key| env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut settings = Self::default();
        if let Some(value) = var("HSERVER_ENV").filter(|value| !value.trim().is_empty()) {
            settings.env = value.trim().to_owned();
        }
        if let Some(value) = var("HSERVER_PROXY") {
            settings.proxy = matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        settings
    }
}
