// Configuration management module
// TOML settings under the config directory plus the interactive setup

pub mod interactive;
pub mod settings;


pub use interactive::{run_interactive_config, show_config};
pub use settings::{
    Config, ConfigError, EvaluationConfig, JudgeKind, MemoryBackend, MemoryConfig, OllamaConfig,
    PromptConfig, ProviderConfig, ProviderKind, RetrievalConfig, RetryConfig,
};
