use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::time::Duration;

const DEFAULT_MODEL: &str = "gpt-oss";
const DEFAULT_GREETING: &str = "Hello! 👋 How can I help you today?";

/// Runtime settings, read from the environment once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub model: String,
    /// Empty disables the greeting bubble on the chat page.
    pub greeting: String,
    pub base_url: String,
    /// Applies to buffered calls only. Streamed calls never time out.
    pub connection_timeout: Duration,
    pub keep_alive: String,
    pub num_predict: i64,
    pub bind_addr: SocketAddr,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let base_url = match lookup("OLLAMA_URL").map(|url| url.trim().to_string()) {
            Some(url) if !url.is_empty() => url,
            _ => format!(
                "http://{}:{}",
                var("OLLAMA_HOST", "127.0.0.1"),
                var("OLLAMA_PORT", "11434")
            ),
        };

        let timeout_secs: f64 = var("OLLAMA_CONNECTION_TIMEOUT", "60")
            .trim()
            .parse()
            .context("OLLAMA_CONNECTION_TIMEOUT must be a number of seconds")?;
        let connection_timeout = Duration::try_from_secs_f64(timeout_secs)
            .context("OLLAMA_CONNECTION_TIMEOUT must be a non-negative number of seconds")?;

        let num_predict: i64 = var("OLLAMA_NUM_PREDICT", "256")
            .trim()
            .parse()
            .context("OLLAMA_NUM_PREDICT must be an integer")?;

        let host = var("APP_HOST", "0.0.0.0");
        let port: u16 = var("APP_PORT", "8080")
            .trim()
            .parse()
            .context("APP_PORT must be a port number")?;
        let bind_addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .with_context(|| format!("APP_HOST {host:?} is not an IP address"))?;

        Ok(Self {
            model: var("OLLAMA_MODEL", DEFAULT_MODEL),
            greeting: var("OLLAMA_DEFAULT_PROMPT", DEFAULT_GREETING),
            base_url,
            connection_timeout,
            keep_alive: var("OLLAMA_KEEP_ALIVE", "30m"),
            num_predict,
            bind_addr,
        })
    }

    pub fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url.trim_end_matches('/'))
    }
}
