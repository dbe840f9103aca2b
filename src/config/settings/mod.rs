
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use url::Url;

use crate::embeddings::ollama::DEFAULT_EMBEDDING_DIMENSION;

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

const DEFAULT_SYSTEM_PROMPT: &str = "You are DocIntel, an assistant that answers questions \
about the user's documents. Answer only from the supplied context and prior conversation. \
When the context does not contain the answer, say so plainly instead of guessing.";

const DEFAULT_REFERENCE_HINT: &str = "Provide references wherever available.";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default = "ProviderConfig::default_chat")]
    pub chat: ProviderConfig,
    #[serde(default = "ProviderConfig::default_judge")]
    pub judge: ProviderConfig,
    #[serde(default = "ProviderConfig::default_extraction")]
    pub extraction: ProviderConfig,
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub prompts: PromptConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl Default for Config {
    #[inline]
    fn default() -> Self {
        Self {
            chat: ProviderConfig::default_chat(),
            judge: ProviderConfig::default_judge(),
            extraction: ProviderConfig::default_extraction(),
            ollama: OllamaConfig::default(),
            retrieval: RetrievalConfig::default(),
            memory: MemoryConfig::default(),
            evaluation: EvaluationConfig::default(),
            retry: RetryConfig::default(),
            prompts: PromptConfig::default(),
            base_dir: PathBuf::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProviderKind {
    #[serde(rename = "gemini")]
    Gemini,
    #[serde(rename = "openai")]
    OpenAi,
}

impl ProviderKind {
    pub const ALL: [Self; 2] = [Self::Gemini, Self::OpenAi];

    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::OpenAi => "openai",
        }
    }

    #[inline]
    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::Gemini => GEMINI_BASE_URL,
            Self::OpenAi => OPENAI_BASE_URL,
        }
    }
}

impl fmt::Display for ProviderKind {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gemini" => Ok(Self::Gemini),
            "openai" => Ok(Self::OpenAi),
            other => Err(ConfigError::InvalidProvider(other.to_string())),
        }
    }
}

/// One generative model endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    pub provider: ProviderKind,
    pub model: String,
    pub base_url: String,
    pub api_key_env: String,
    pub timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl ProviderConfig {
    #[inline]
    pub fn default_chat() -> Self {
        Self {
            provider: ProviderKind::Gemini,
            model: "gemini-2.5-flash-lite".to_string(),
            base_url: GEMINI_BASE_URL.to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            timeout_secs: 60,
            temperature: None,
        }
    }

    #[inline]
    pub fn default_judge() -> Self {
        Self {
            provider: ProviderKind::OpenAi,
            model: "gpt-5-nano".to_string(),
            base_url: OPENAI_BASE_URL.to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 60,
            temperature: None,
        }
    }

    #[inline]
    pub fn default_extraction() -> Self {
        Self {
            model: "gemini-2.5-flash".to_string(),
            timeout_secs: 300,
            ..Self::default_chat()
        }
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        self.endpoint()?;

        if self.api_key_env.trim().is_empty() {
            return Err(ConfigError::InvalidApiKeyEnv(self.api_key_env.clone()));
        }

        if !(1..=600).contains(&self.timeout_secs) {
            return Err(ConfigError::InvalidTimeout(self.timeout_secs));
        }

        if let Some(temperature) = self.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(ConfigError::InvalidTemperature(temperature));
            }
        }

        Ok(())
    }

    /// Parsed base URL; only http and https are accepted
    #[inline]
    pub fn endpoint(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.base_url)
            .map_err(|_| ConfigError::InvalidUrl(self.base_url.clone()))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidProtocol(url.scheme().to_string()));
        }
        Ok(url)
    }

    /// Read the API key from the configured environment variable
    #[inline]
    pub fn api_key(&self) -> Result<String, ConfigError> {
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(ConfigError::MissingApiKey(self.api_key_env.clone())),
        }
    }

    /// Switch provider, resetting the endpoint when it still points at the
    /// previous provider's default
    #[inline]
    pub fn set_provider(&mut self, provider: ProviderKind) {
        if self.base_url == self.provider.default_base_url() {
            self.base_url = provider.default_base_url().to_string();
        }
        self.provider = provider;
    }

    #[inline]
    pub fn set_model(&mut self, model: String) -> Result<(), ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model));
        }
        self.model = model;
        Ok(())
    }

    #[inline]
    pub fn set_base_url(&mut self, base_url: String) -> Result<(), ConfigError> {
        let candidate = Self {
            base_url: base_url.clone(),
            ..self.clone()
        };
        candidate.endpoint()?;
        self.base_url = base_url;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OllamaConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub model: String,
    pub batch_size: u32,
    pub embedding_dimension: u32,
}

impl Default for OllamaConfig {
    #[inline]
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            model: "nomic-embed-text:latest".to_string(),
            batch_size: 16,
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSION,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub min_score: f32,
}

impl Default for RetrievalConfig {
    #[inline]
    fn default() -> Self {
        Self {
            top_k: crate::retrieval::DEFAULT_TOP_K,
            min_score: crate::retrieval::DEFAULT_MIN_SCORE,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MemoryBackend {
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MemoryConfig {
    pub max_messages: usize,
    pub backend: MemoryBackend,
}

impl Default for MemoryConfig {
    #[inline]
    fn default() -> Self {
        Self {
            max_messages: crate::memory::DEFAULT_MAX_MESSAGES,
            backend: MemoryBackend::Sqlite,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JudgeKind {
    Llm,
    Lexical,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EvaluationConfig {
    /// 0 disables evaluation entirely
    pub max_attempts: u32,
    pub score_threshold: f32,
    pub relevance_threshold: f32,
    pub judge: JudgeKind,
}

impl Default for EvaluationConfig {
    #[inline]
    fn default() -> Self {
        Self {
            max_attempts: 2,
            score_threshold: 0.7,
            relevance_threshold: 0.6,
            judge: JudgeKind::Llm,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub multiplier: f64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    #[inline]
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 300,
            multiplier: 2.0,
            max_backoff_ms: 3000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PromptConfig {
    pub system: String,
    /// Appended to every question sent to the chat model
    pub reference_hint: String,
}

impl Default for PromptConfig {
    #[inline]
    fn default() -> Self {
        Self {
            system: DEFAULT_SYSTEM_PROMPT.to_string(),
            reference_hint: DEFAULT_REFERENCE_HINT.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(u32),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid provider: {0} (must be 'gemini' or 'openai')")]
    InvalidProvider(String),
    #[error("Invalid API key variable: {0:?} (cannot be empty)")]
    InvalidApiKeyEnv(String),
    #[error("Missing API key: environment variable {0} is not set")]
    MissingApiKey(String),
    #[error("Invalid timeout: {0} (must be between 1 and 600 seconds)")]
    InvalidTimeout(u64),
    #[error("Invalid temperature: {0} (must be between 0.0 and 2.0)")]
    InvalidTemperature(f32),
    #[error("Invalid embedding dimension: {0} (must be between 64 and 4096)")]
    InvalidEmbeddingDimension(u32),
    #[error("Invalid top_k: {0} (must be between 1 and 50)")]
    InvalidTopK(usize),
    #[error("Invalid {0}: {1} (must be between 0.0 and 1.0)")]
    InvalidFraction(&'static str, f32),
    #[error("Invalid memory window: {0} (must be between 2 and 10000 messages)")]
    InvalidMemoryWindow(usize),
    #[error("Invalid evaluation attempts: {0} (must be between 0 and 10)")]
    InvalidEvaluationAttempts(u32),
    #[error("Invalid retry attempts: {0} (must be between 1 and 10)")]
    InvalidRetryAttempts(u32),
    #[error("Invalid backoff multiplier: {0} (must be between 1.0 and 10.0)")]
    InvalidBackoffMultiplier(f64),
    #[error("Initial backoff ({0}ms) must not exceed max backoff ({1}ms)")]
    BackoffOrder(u64, u64),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl From<ConfigError> for crate::DocIntelError {
    #[inline]
    fn from(error: ConfigError) -> Self {
        Self::Config(error.to_string())
    }
}

impl Config {
    /// Resolve the configuration directory: `DOCINTEL_HOME` when set,
    /// otherwise `~/.docintel`
    #[inline]
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        if let Some(home) = std::env::var_os("DOCINTEL_HOME").filter(|v| !v.is_empty()) {
            return Ok(PathBuf::from(home));
        }
        dirs::home_dir()
            .map(|home| home.join(".docintel"))
            .ok_or(ConfigError::DirectoryError)
    }

    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        if !config_path.exists() {
            return Ok(Self {
                base_dir: config_dir.as_ref().to_path_buf(),
                ..Self::default()
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();

        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    /// Get the base directory for the application
    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.chat.validate()?;
        self.judge.validate()?;
        self.extraction.validate()?;
        self.ollama.validate()?;
        self.validate_retrieval()?;
        self.validate_memory()?;
        self.validate_evaluation()?;
        self.validate_retry()?;
        Ok(())
    }

    fn validate_retrieval(&self) -> Result<(), ConfigError> {
        let retrieval = &self.retrieval;
        if !(1..=50).contains(&retrieval.top_k) {
            return Err(ConfigError::InvalidTopK(retrieval.top_k));
        }
        check_fraction("min_score", retrieval.min_score)
    }

    fn validate_memory(&self) -> Result<(), ConfigError> {
        // A window must hold at least one user/assistant pair
        if !(2..=10_000).contains(&self.memory.max_messages) {
            return Err(ConfigError::InvalidMemoryWindow(self.memory.max_messages));
        }
        Ok(())
    }

    fn validate_evaluation(&self) -> Result<(), ConfigError> {
        let evaluation = &self.evaluation;
        if evaluation.max_attempts > 10 {
            return Err(ConfigError::InvalidEvaluationAttempts(
                evaluation.max_attempts,
            ));
        }
        check_fraction("score_threshold", evaluation.score_threshold)?;
        check_fraction("relevance_threshold", evaluation.relevance_threshold)
    }

    fn validate_retry(&self) -> Result<(), ConfigError> {
        let retry = &self.retry;
        if !(1..=10).contains(&retry.max_attempts) {
            return Err(ConfigError::InvalidRetryAttempts(retry.max_attempts));
        }
        if !(1.0..=10.0).contains(&retry.multiplier) {
            return Err(ConfigError::InvalidBackoffMultiplier(retry.multiplier));
        }
        if retry.initial_backoff_ms > retry.max_backoff_ms {
            return Err(ConfigError::BackoffOrder(
                retry.initial_backoff_ms,
                retry.max_backoff_ms,
            ));
        }
        Ok(())
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join("config.toml")
    }

    /// Get the path for the SQLite conversation database
    #[inline]
    pub fn database_path(&self) -> PathBuf {
        self.get_base_dir().join("conversations.db")
    }

    /// Get the path for the vector database directory
    #[inline]
    pub fn vector_database_path(&self) -> PathBuf {
        self.get_base_dir().join("vectors")
    }

    #[inline]
    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        self.ollama.ollama_url()
    }
}

fn check_fraction(name: &'static str, value: f32) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidFraction(name, value))
    }
}

impl OllamaConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol != "http" && self.protocol != "https" {
            return Err(ConfigError::InvalidProtocol(self.protocol.clone()));
        }

        self.ollama_url()?;

        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }

        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if self.batch_size == 0 || self.batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        if !(64..=4096).contains(&self.embedding_dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(
                self.embedding_dimension,
            ));
        }

        Ok(())
    }

    #[inline]
    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
    }

    #[inline]
    pub fn set_host(&mut self, host: String) -> Result<(), ConfigError> {
        let temp_config = OllamaConfig {
            host: host.clone(),
            ..self.clone()
        };
        temp_config.validate()?;
        self.host = host;
        Ok(())
    }

    #[inline]
    pub fn set_port(&mut self, port: u16) -> Result<(), ConfigError> {
        if port == 0 {
            return Err(ConfigError::InvalidPort(port));
        }
        self.port = port;
        Ok(())
    }

    #[inline]
    pub fn set_model(&mut self, model: String) -> Result<(), ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model));
        }
        self.model = model;
        Ok(())
    }
}
