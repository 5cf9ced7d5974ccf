use anyhow::{Context, Result};
use console::style;
use dialoguer::{Input, Password, Select};
use std::path::PathBuf;
use tabula_core::ProviderKind;
use tabula_core::config::{Config, get_config_path};
use tabula_core::data::Dataset;

const BANNER: &str = r"
    -------------------------------------

     _        _           _
    | |_ __ _| |__  _   _| | __ _
    | __/ _` | '_ \| | | | |/ _` |
    | || (_| | |_) | |_| | | (_| |
     \__\__,_|_.__/ \__,_|_|\__,_|

    -------------------------------------
";

fn print_step(step: usize, total: usize, title: &str) {
    println!();
    println!(
        "{}",
        style(format!("[{}/{}] {}", step, total, title))
            .cyan()
            .bold()
    );
    println!();
}

fn setup_provider() -> Result<ProviderKind> {
    let names: Vec<&str> = ProviderKind::ALL.iter().map(|k| k.as_str()).collect();

    let selection = Select::new()
        .with_prompt("Select your model provider")
        .items(&names)
        .default(0)
        .interact()
        .context("Failed to select provider")?;

    Ok(ProviderKind::ALL[selection])
}

fn setup_api_key(kind: ProviderKind) -> Result<String> {
    if !kind.requires_api_key() {
        println!("  {} {} runs locally, no key needed", style("✓").green(), kind.as_str());
        return Ok(String::new());
    }

    if let Some(var) = kind
        .api_key_env_vars()
        .iter()
        .find(|var| std::env::var(var).is_ok_and(|v| !v.trim().is_empty()))
    {
        println!("  {} Using key from {}", style("✓").green(), style(var).cyan());
        return Ok(String::new());
    }

    let api_key = Password::new()
        .with_prompt(format!("Enter your {} API key", kind.as_str()))
        .interact()
        .context("Failed to read API key")?;

    if api_key.trim().is_empty() {
        return Err(anyhow::anyhow!("API key cannot be empty"));
    }

    Ok(api_key.trim().to_string())
}

fn default_models(kind: ProviderKind) -> &'static [&'static str] {
    match kind {
        ProviderKind::OpenAI => &["gpt-4o", "gpt-4o-mini", "gpt-5", "gpt-5-mini"],
        ProviderKind::OpenRouter => &["openai/gpt-4o", "anthropic/claude-sonnet-4", "deepseek/deepseek-chat"],
        ProviderKind::Ollama => &["llama3.2", "qwen2.5", "mistral"],
        ProviderKind::Glm => &["glm-4.6", "glm-4.5-air"],
    }
}

fn setup_model(kind: ProviderKind) -> Result<String> {
    let models = default_models(kind);

    let selection = Select::new()
        .with_prompt("Select your model")
        .items(models)
        .default(0)
        .interact()
        .context("Failed to select model")?;

    Ok(models[selection].to_string())
}

fn setup_dataset() -> Result<PathBuf> {
    let path: String = Input::new()
        .with_prompt("Path to your dataset (CSV or JSON records)")
        .validate_with(|input: &String| -> Result<(), String> {
            let path = PathBuf::from(input.trim());
            if path.is_file() {
                Ok(())
            } else {
                Err(format!("{} is not a readable file", path.display()))
            }
        })
        .interact_text()
        .context("Failed to read dataset path")?;

    let path = PathBuf::from(path.trim());
    let dataset = Dataset::load(&path)?;
    println!(
        "  {} Loaded `{}`: {} rows, {} columns",
        style("✓").green(),
        dataset.name(),
        dataset.row_count(),
        dataset.columns().len()
    );

    Ok(std::fs::canonicalize(&path).unwrap_or(path))
}

pub fn run_onboard() -> Result<Config> {
    println!("{}", style(BANNER).cyan().bold());

    println!("  {}", style("Welcome to tabula!").white().bold());
    println!(
        "  {}",
        style("This wizard connects a model and a dataset in a few steps.").dim()
    );
    println!();

    print_step(1, 4, "Provider");
    let kind = setup_provider()?;

    print_step(2, 4, "API Key");
    let api_key = setup_api_key(kind)?;

    print_step(3, 4, "Model");
    let model = setup_model(kind)?;

    print_step(4, 4, "Dataset");
    let dataset = setup_dataset()?;

    let config = Config {
        provider: Some(kind.as_str().to_string()),
        api_key,
        model,
        dataset: Some(dataset),
        ..Default::default()
    };

    for dir in [config.charts_dir(), config.reports_dir()] {
        if let Err(e) = std::fs::create_dir_all(&dir) {
            eprintln!(
                "  {} Warning: Could not create {}: {}",
                style("!").yellow(),
                dir.display(),
                e
            );
        }
    }

    println!();
    println!("  {} Configuration complete!", style("✓").green().bold());
    println!(
        "  {} Config saved to {}",
        style("→").green(),
        style(get_config_path().display()).cyan()
    );
    println!(
        "  {} Charts and reports go to {}",
        style("→").green(),
        style(config.workspace_dir.display()).cyan()
    );
    println!();
    println!(
        "  {} You can now run: {}",
        style("→").green(),
        style("tabula chat").cyan().bold()
    );
    println!();

    Ok(config)
}
