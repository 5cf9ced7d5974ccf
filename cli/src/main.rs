use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use tabula_core::data::Datastore;
use tabula_core::{
    AgentLoop, Answer, CapabilityAdapter, CapabilityDescriptor, CapabilityRegistry, Config,
    ContextBuilder, OrchestratorError, ReasoningClient, SessionId, SessionManager, config,
    create_provider, register_default_capabilities,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod onboard;

#[derive(Parser)]
#[command(name = "tabula")]
#[command(about = "tabula - ask questions about your data in plain language", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure provider, model and dataset
    Onboard,
    /// Ask a single question with -m, or start an interactive session
    Chat {
        #[arg(short, long)]
        message: Option<String>,
    },
    /// List the analysis capabilities offered to the model
    Capabilities,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("TABULA_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn build_registry(config: &Config, datastore: Arc<Datastore>) -> Result<CapabilityRegistry> {
    let mut registry = CapabilityRegistry::new();
    register_default_capabilities(&mut registry, datastore, &config.workspace_dir)?;
    Ok(registry)
}

fn datastore_for(config: &Config) -> Result<Arc<Datastore>> {
    let path = config.dataset.clone().context(
        "No dataset configured. Run 'tabula onboard' or set `dataset` in the config file.",
    )?;
    Ok(Arc::new(Datastore::from_path(path)))
}

async fn build_manager(config: &Config) -> Result<SessionManager> {
    let provider = create_provider(config)?;
    let datastore = datastore_for(config)?;

    std::fs::create_dir_all(&config.workspace_dir).with_context(|| {
        format!(
            "Could not create workspace at {}",
            config.workspace_dir.display()
        )
    })?;

    let mut context_builder = ContextBuilder::new(&config.workspace_dir);
    match datastore.dataset().await {
        Ok(dataset) => {
            context_builder = context_builder.with_dataset_preamble(dataset.schema_summary());
        }
        Err(e) => {
            eprintln!("{} {}", style("!").yellow(), e);
        }
    }

    let registry = build_registry(config, datastore)?;
    let reasoning = ReasoningClient::new(provider, context_builder)
        .with_temperature(config.temperature)
        .with_retry_backoff(config.reasoning_retry_backoff());
    let agent = AgentLoop::new(reasoning, CapabilityAdapter::new(Arc::new(registry)))
        .with_max_iterations(config.max_iterations)
        .with_observation_max_chars(config.observation_max_chars);

    Ok(SessionManager::new(Arc::new(agent)).with_max_history(config.history_limit()))
}

/// Runs one query; Ctrl-C cancels it instead of killing the process.
async fn ask(
    manager: &SessionManager,
    session: SessionId,
    query: &str,
) -> Result<Answer, OrchestratorError> {
    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let result = manager.ask_with_cancel(session, query, &cancel).await;
    watcher.abort();
    result
}

fn print_answer(answer: &Answer) {
    println!("{}", answer.text);

    let artifacts = answer.artifacts();
    if !artifacts.is_empty() {
        println!();
        for path in artifacts {
            println!("  {} {}", style("→").green(), style(path.display()).cyan());
        }
    }
    println!(
        "{}",
        style(format!(
            "({} step(s), {} round(s))",
            answer.steps.len(),
            answer.iterations
        ))
        .dim()
    );
}

fn print_manifest(manifest: &[CapabilityDescriptor]) {
    for descriptor in manifest {
        println!("{}", style(&descriptor.name).cyan().bold());
        println!("  {}", descriptor.description);
        for (name, spec) in &descriptor.parameters {
            let marker = if spec.required { "*" } else { " " };
            println!(
                "    {}{} ({}) {}",
                marker,
                name,
                spec.param_type,
                style(&spec.description).dim()
            );
        }
    }
}

async fn print_history(manager: &SessionManager, session: SessionId) -> Result<()> {
    let history = manager.history(session).await?;
    if history.is_empty() {
        println!("{}", style("(no turns yet)").dim());
        return Ok(());
    }
    for turn in history {
        let first_line = turn.content.lines().next().unwrap_or_default();
        println!(
            "{} {:<16} {}",
            style(turn.timestamp.format("%H:%M:%S")).dim(),
            style(turn.role).bold(),
            first_line
        );
    }
    Ok(())
}

async fn repl(manager: &SessionManager) -> Result<()> {
    println!("{}", style("tabula").cyan().bold());
    println!("Ask about your data. /new resets, /tools lists capabilities, /history shows turns, Ctrl+D exits.\n");

    let session = manager.new_session().await;
    let stdin = io::stdin();

    loop {
        print!("> ");
        let _ = io::stdout().flush();

        let mut input = String::new();
        match stdin.lock().read_line(&mut input) {
            Ok(0) | Err(_) => {
                println!("\nGoodbye!");
                break;
            }
            Ok(_) => {}
        }

        let input = input.trim();
        match input {
            "" => continue,
            "/exit" | "/quit" => break,
            "/new" => {
                manager.reset(session).await?;
                println!("{}", style("Session cleared.").dim());
                continue;
            }
            "/tools" => {
                print_manifest(manager.agent().manifest());
                continue;
            }
            "/history" => {
                print_history(manager, session).await?;
                continue;
            }
            _ => {}
        }

        println!("\n{}\n", style("Analysing...").dim());
        match ask(manager, session, input).await {
            Ok(answer) => print_answer(&answer),
            Err(OrchestratorError::Cancelled { .. }) => {
                println!("{}", style("Cancelled.").yellow());
            }
            Err(e) => eprintln!("{} {}", style("Error:").red().bold(), e),
        }
        println!();
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let command = cli.command.unwrap_or_else(|| {
        if !config::config_exists() {
            Commands::Onboard
        } else {
            Commands::Chat { message: None }
        }
    });

    match command {
        Commands::Onboard => {
            let onboard_config = onboard::run_onboard().context("Onboarding failed")?;
            config::save_config(&onboard_config)?;
        }
        Commands::Capabilities => {
            let config = Config::load_or_init()?;
            // The datastore loads lazily, so listing works without a dataset.
            let datastore = Datastore::from_path(config.dataset.clone().unwrap_or_default());
            let registry = build_registry(&config, Arc::new(datastore))?;
            print_manifest(registry.manifest());
        }
        Commands::Chat { message } => {
            let config = config::load_config()?;
            let manager = build_manager(&config).await?;

            if let Some(msg) = message {
                let session = manager.new_session().await;
                let answer = ask(&manager, session, &msg)
                    .await
                    .context("Analysis failed")?;
                print_answer(&answer);
            } else {
                repl(&manager).await?;
            }
        }
    }

    Ok(())
}
