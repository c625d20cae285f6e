//! Typed application configuration.
//!
//! Layered the usual way: built-in defaults, then an optional TOML file,
//! then `PARLEY_*` environment variables (e.g. `PARLEY_SERVER__PORT`).
//! The generation API key may also come from `OPENAI_API_KEY`.

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::audio::{DEFAULT_FRAME_SIZE, DEFAULT_SEGMENT_CHARS};

const APP_NAME: &str = "parley";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub genai: GenAiConfig,
    pub stream: StreamConfig,
    pub speech: SpeechConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origins; empty means reflect any origin.
    pub cors_origins: Vec<String>,
    /// Upper bound for request bodies (speech uploads), in MiB.
    pub max_upload_size_mb: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8787,
            cors_origins: Vec::new(),
            max_upload_size_mb: 25,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file path; defaults to the platform data directory.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenAiConfig {
    /// OpenAI-compatible API root.
    pub base_url: String,
    /// Bearer token; falls back to `OPENAI_API_KEY`.
    pub api_key: String,
    pub title_model: String,
    pub tts_model: String,
    pub tts_voice: String,
    pub stt_model: String,
}

impl Default for GenAiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            title_model: "gpt-4o-mini".to_string(),
            tts_model: "gpt-4o-mini-tts".to_string(),
            tts_voice: "nova".to_string(),
            stt_model: "whisper-1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Deadline between generation fragments; expiry fails the session.
    pub fragment_timeout_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            fragment_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Target audio frame size in bytes.
    pub frame_size: usize,
    /// Maximum characters per synthesis call.
    pub segment_chars: usize,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            frame_size: DEFAULT_FRAME_SIZE,
            segment_chars: DEFAULT_SEGMENT_CHARS,
        }
    }
}

impl AppConfig {
    /// Load configuration from an optional file plus the environment.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        match file {
            Some(path) => {
                builder = builder.add_source(File::from(path));
            }
            None => {
                if let Some(default_path) = default_config_path() {
                    builder = builder.add_source(File::from(default_path).required(false));
                }
            }
        }

        let settings = builder
            .add_source(Environment::with_prefix("PARLEY").separator("__"))
            .build()
            .context("loading configuration")?;

        let mut app: AppConfig = settings
            .try_deserialize()
            .context("deserializing configuration")?;

        if app.genai.api_key.is_empty()
            && let Ok(key) = std::env::var("OPENAI_API_KEY")
        {
            app.genai.api_key = key;
        }

        Ok(app)
    }

    /// Resolve the SQLite file path, defaulting under the data directory.
    pub fn database_path(&self) -> PathBuf {
        self.database.path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(APP_NAME)
                .join("chat.db")
        })
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_NAME).join("config.toml"))
}
