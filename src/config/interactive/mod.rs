#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Select};
use std::path::Path;

use super::{
    Config, ConfigError, EvaluationConfig, JudgeKind, MemoryBackend, OllamaConfig, ProviderConfig,
    ProviderKind,
};

#[inline]
pub fn run_interactive_config(config_dir: &Path) -> Result<()> {
    eprintln!("{}", style("🔧 DocIntel Configuration Setup").bold().cyan());
    eprintln!();

    let mut config = load_existing_config(config_dir)?;

    eprintln!("{}", style("Chat Model").bold().yellow());
    eprintln!("The model that answers questions from retrieved context.");
    configure_provider(&mut config.chat)?;

    eprintln!();
    eprintln!("{}", style("Judge Model").bold().yellow());
    eprintln!("The model that grades answers for groundedness and relevance.");
    configure_provider(&mut config.judge)?;

    eprintln!();
    eprintln!("{}", style("Extraction Model").bold().yellow());
    eprintln!("A multimodal model that reads PDFs during ingestion.");
    configure_provider(&mut config.extraction)?;

    eprintln!();
    eprintln!("{}", style("Ollama Embeddings").bold().yellow());
    configure_ollama(&mut config.ollama)?;

    eprintln!();
    eprintln!("{}", style("Answer Evaluation").bold().yellow());
    configure_evaluation(&mut config.evaluation)?;

    let backends = &["sqlite", "memory"];
    let backend_index = Select::new()
        .with_prompt("Conversation memory backend")
        .default(usize::from(config.memory.backend == MemoryBackend::Memory))
        .items(backends)
        .interact()?;
    config.memory.backend = if backend_index == 0 {
        MemoryBackend::Sqlite
    } else {
        MemoryBackend::Memory
    };

    eprintln!();
    eprintln!("{}", style("Testing configuration...").yellow());

    if test_ollama_connection(&config.ollama) {
        eprintln!("{}", style("✓ Ollama connection successful!").green());
    } else {
        eprintln!(
            "{}",
            style("⚠ Warning: Could not connect to Ollama").yellow()
        );
        eprintln!("You can continue, but make sure Ollama is running before ingesting.");
    }

    for provider in [&config.chat, &config.judge, &config.extraction] {
        if let Err(e) = provider.api_key() {
            eprintln!("{} {}", style("⚠").yellow(), e);
        }
    }

    eprintln!();
    if Confirm::new()
        .with_prompt("Save configuration?")
        .default(true)
        .interact()?
    {
        config.save().context("Failed to save configuration")?;
        eprintln!("{}", style("✓ Configuration saved successfully!").green());
        eprintln!(
            "Configuration saved to: {}",
            style(config.config_file_path().display()).cyan()
        );
    } else {
        eprintln!("Configuration not saved.");
    }

    Ok(())
}

#[inline]
pub fn show_config(config_dir: &Path) -> Result<()> {
    let config = Config::load(config_dir).context("Failed to load configuration")?;

    eprintln!("{}", style("📋 Current Configuration").bold().cyan());

    for (title, provider) in [
        ("Chat", &config.chat),
        ("Judge", &config.judge),
        ("Extraction", &config.extraction),
    ] {
        eprintln!();
        eprintln!("{}", style(format!("{} Model:", title)).bold().yellow());
        eprintln!("  Provider: {}", style(provider.provider).cyan());
        eprintln!("  Model: {}", style(&provider.model).cyan());
        eprintln!("  Endpoint: {}", style(&provider.base_url).cyan());
        let key_state = if provider.api_key().is_ok() {
            style("set").green()
        } else {
            style("missing").red()
        };
        eprintln!("  API key ({}): {}", provider.api_key_env, key_state);
    }

    eprintln!();
    eprintln!("{}", style("Embeddings:").bold().yellow());
    match config.ollama_url() {
        Ok(url) => eprintln!("  Ollama URL: {}", style(url).cyan()),
        Err(e) => eprintln!("  Ollama URL: {} ({})", style("Invalid").red(), e),
    }
    eprintln!("  Model: {}", style(&config.ollama.model).cyan());
    eprintln!(
        "  Dimension: {}",
        style(config.ollama.embedding_dimension).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Pipeline:").bold().yellow());
    eprintln!(
        "  Retrieval: top {} above {}",
        style(config.retrieval.top_k).cyan(),
        style(config.retrieval.min_score).cyan()
    );
    eprintln!(
        "  Memory: {:?}, window {}",
        config.memory.backend,
        style(config.memory.max_messages).cyan()
    );
    eprintln!(
        "  Evaluation: {:?} judge, {} attempts, score >= {}, relevance >= {}",
        config.evaluation.judge,
        style(config.evaluation.max_attempts).cyan(),
        config.evaluation.score_threshold,
        config.evaluation.relevance_threshold
    );
    eprintln!(
        "  Transient retry: {} attempts, {}ms x{} up to {}ms",
        config.retry.max_attempts,
        config.retry.initial_backoff_ms,
        config.retry.multiplier,
        config.retry.max_backoff_ms
    );

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );

    Ok(())
}

fn load_existing_config(config_dir: &Path) -> Result<Config> {
    Config::load(config_dir).map_or_else(
        |_| {
            eprintln!(
                "{}",
                style("No existing configuration found. Using defaults.").yellow()
            );
            Ok(Config {
                base_dir: config_dir.to_path_buf(),
                ..Config::default()
            })
        },
        |config| {
            eprintln!("{}", style("Found existing configuration.").green());
            Ok(config)
        },
    )
}

fn configure_provider(provider: &mut ProviderConfig) -> Result<()> {
    let names: Vec<&str> = ProviderKind::ALL.iter().map(|p| p.as_str()).collect();
    let default_index = ProviderKind::ALL
        .iter()
        .position(|&p| p == provider.provider)
        .unwrap_or(0);

    let provider_index = Select::new()
        .with_prompt("Provider")
        .default(default_index)
        .items(&names)
        .interact()?;
    provider.set_provider(ProviderKind::ALL[provider_index]);

    let model: String = Input::new()
        .with_prompt("Model")
        .default(provider.model.clone())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Model name cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let current = provider.clone();
    let base_url: String = Input::new()
        .with_prompt("API base URL")
        .default(provider.base_url.clone())
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            ProviderConfig {
                base_url: input.clone(),
                ..current.clone()
            }
            .endpoint()
            .map(|_| ())
        })
        .interact_text()?;

    let api_key_env: String = Input::new()
        .with_prompt("Environment variable holding the API key")
        .default(provider.api_key_env.clone())
        .interact_text()?;

    provider.set_model(model)?;
    provider.set_base_url(base_url)?;
    provider.api_key_env = api_key_env;

    Ok(())
}

fn configure_ollama(ollama: &mut OllamaConfig) -> Result<()> {
    let host: String = Input::new()
        .with_prompt("Ollama host")
        .default(ollama.host.clone())
        .interact_text()?;

    let port: u16 = Input::new()
        .with_prompt("Ollama port")
        .default(ollama.port)
        .validate_with(|input: &u16| -> Result<(), &str> {
            if *input == 0 {
                Err("Port must be greater than 0")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let model: String = Input::new()
        .with_prompt("Embedding model")
        .default(ollama.model.clone())
        .interact_text()?;

    ollama.set_host(host)?;
    ollama.set_port(port)?;
    ollama.set_model(model)?;

    Ok(())
}

fn configure_evaluation(evaluation: &mut EvaluationConfig) -> Result<()> {
    let judges = &["llm", "lexical"];
    let judge_index = Select::new()
        .with_prompt("Judge")
        .default(usize::from(evaluation.judge == JudgeKind::Lexical))
        .items(judges)
        .interact()?;
    evaluation.judge = if judge_index == 0 {
        JudgeKind::Llm
    } else {
        JudgeKind::Lexical
    };

    evaluation.max_attempts = Input::new()
        .with_prompt("Answer attempts before returning an unvalidated answer (0 disables)")
        .default(evaluation.max_attempts)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if *input > 10 {
                Err("At most 10 attempts")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    Ok(())
}

fn test_ollama_connection(ollama: &OllamaConfig) -> bool {
    let url = format!(
        "{}://{}:{}/api/version",
        ollama.protocol, ollama.host, ollama.port
    );

    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(std::time::Duration::from_secs(5)))
        .build()
        .into();

    match agent.get(&url).call() {
        Ok(_) => true,
        Err(ureq::Error::StatusCode(code)) if (400..500).contains(&code) => true,
        Err(_) => false,
    }
}
