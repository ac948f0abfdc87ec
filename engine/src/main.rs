use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::info;

use cortexos_agent::Agent;
use cortexos_core::{ConfigStore, Engine};
use cortexos_pool::WorkerFrame;
use cortexos_providers::{EchoProvider, GenericHttpProvider, ProviderRegistry};
use cortexos_server::{serve, AppState};
use cortexos_tools::ToolRegistry;
use cortexos_types::{ExecutionOptions, PoolMode, ReasoningStrategyKind};

#[derive(Parser, Debug)]
#[command(name = "cortexos")]
#[command(about = "Turns a natural-language software-engineering request into a DAG of agent tasks")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one prompt to completion and print the result as JSON.
    Run {
        prompt: String,
        #[arg(long, default_value = ".")]
        working_dir: PathBuf,
        #[arg(long, default_value = "echo")]
        provider: String,
        #[arg(long)]
        model: Option<String>,
        #[arg(long, default_value_t = 4)]
        max_workers: usize,
        #[arg(long, value_enum, default_value = "in-process")]
        pool_mode: PoolModeArg,
        #[arg(long, default_value_t = false)]
        no_sandbox: bool,
        #[arg(long, default_value_t = false)]
        no_auto_fix: bool,
        #[arg(long)]
        reflexion: bool,
        #[arg(long, value_enum, default_value = "plain")]
        reasoning_strategy: ReasoningStrategyArg,
        #[arg(long, default_value_t = 5.0)]
        budget_per_run: f64,
        #[arg(long, default_value_t = 50.0)]
        budget_per_day: f64,
    },
    /// Serve the HTTP API (run submission, SSE progress, webhook intake).
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        hostname: String,
        #[arg(long, default_value_t = 8787)]
        port: u16,
        #[arg(long, default_value = "webhook")]
        webhook_path: String,
    },
    /// Internal: act as a forked worker speaking the `WorkerFrame` stdio
    /// protocol (spawned by a `PoolMode::Forked` agent pool).
    #[command(hide = true)]
    Worker,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum PoolModeArg {
    InProcess,
    Forked,
}

impl From<PoolModeArg> for PoolMode {
    fn from(value: PoolModeArg) -> Self {
        match value {
            PoolModeArg::InProcess => PoolMode::InProcess,
            PoolModeArg::Forked => PoolMode::Forked,
        }
    }
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum ReasoningStrategyArg {
    Plain,
    React,
    Reflexion,
    TreeOfThought,
    Debate,
}

impl From<ReasoningStrategyArg> for ReasoningStrategyKind {
    fn from(value: ReasoningStrategyArg) -> Self {
        match value {
            ReasoningStrategyArg::Plain => ReasoningStrategyKind::Plain,
            ReasoningStrategyArg::React => ReasoningStrategyKind::ReAct,
            ReasoningStrategyArg::Reflexion => ReasoningStrategyKind::Reflexion,
            ReasoningStrategyArg::TreeOfThought => ReasoningStrategyKind::TreeOfThought,
            ReasoningStrategyArg::Debate => ReasoningStrategyKind::Debate,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if matches!(cli.command, Command::Worker) {
        return run_worker().await;
    }

    tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_target(false)
        .init();

    match cli.command {
        Command::Run {
            prompt,
            working_dir,
            provider,
            model,
            max_workers,
            pool_mode,
            no_sandbox,
            no_auto_fix,
            reflexion,
            reasoning_strategy,
            budget_per_run,
            budget_per_day,
        } => {
            std::env::set_var("CORTEXOS_PROVIDER", &provider);
            if let Some(model) = &model {
                std::env::set_var("CORTEXOS_MODEL", model);
            }

            let engine = build_engine(&working_dir).await?;
            let options = ExecutionOptions {
                working_dir,
                provider,
                model,
                max_workers,
                pool_mode: pool_mode.into(),
                sandbox_enabled: !no_sandbox,
                auto_fix_enabled: !no_auto_fix,
                reflexion_enabled: reflexion,
                reasoning_strategy: reasoning_strategy.into(),
                budget_per_run,
                budget_per_day,
                streaming: false,
            };

            let result = engine.execute(prompt, options, CancellationToken::new()).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            std::process::exit(result.exit_code());
        }
        Command::Serve {
            hostname,
            port,
            webhook_path,
        } => {
            let engine = build_engine(&PathBuf::from(".")).await?;
            let webhook_secret = std::env::var("CORTEXOS_WEBHOOK_SECRET")
                .ok()
                .map(String::into_bytes);
            let state = AppState::new(engine, webhook_path, webhook_secret);
            let addr: SocketAddr = format!("{hostname}:{port}")
                .parse()
                .context("invalid hostname or port")?;
            info!("starting cortexos on http://{addr}");
            serve(addr, state).await?;
        }
        Command::Worker => unreachable!("handled above"),
    }

    Ok(())
}

async fn build_engine(working_dir: &PathBuf) -> anyhow::Result<Engine> {
    let config_path = working_dir.join(".cortexos").join("config.json");
    let config = ConfigStore::new(&config_path, None).await?;
    let app_config = config.get().await;

    let providers = ProviderRegistry::new();
    providers.register(Arc::new(EchoProvider::default())).await;
    for (id, provider_config) in &app_config.providers {
        let Some(url) = &provider_config.url else {
            continue;
        };
        providers
            .register(Arc::new(GenericHttpProvider::new(
                id.clone(),
                url.clone(),
                provider_config.api_key.clone(),
            )))
            .await;
    }
    if let Some(default_provider) = &app_config.default_provider {
        providers.set_default(default_provider.clone()).await;
    }

    Ok(Engine::new(providers, ToolRegistry::new()))
}

/// Speaks the `WorkerFrame` protocol over stdio: announce readiness, read
/// one `Execute` frame, run it, write the `Result` frame, exit. Provider
/// and model are picked up from the environment the parent process
/// forked with (`CORTEXOS_PROVIDER` / `CORTEXOS_MODEL`), since
/// `AgentTask` itself carries neither.
async fn run_worker() -> anyhow::Result<()> {
    let provider_id = std::env::var("CORTEXOS_PROVIDER").unwrap_or_else(|_| "echo".to_string());
    let model = std::env::var("CORTEXOS_MODEL").unwrap_or_else(|_| format!("{provider_id}-default"));

    let provider: Arc<dyn cortexos_providers::Provider> = if provider_id == "echo" {
        Arc::new(EchoProvider::default())
    } else {
        let url = std::env::var("CORTEXOS_PROVIDER_URL").unwrap_or_default();
        let api_key = std::env::var("CORTEXOS_PROVIDER_API_KEY").ok();
        Arc::new(GenericHttpProvider::new(provider_id, url, api_key))
    };
    let agent = Agent::new(provider, ToolRegistry::new(), model);

    let mut stdout = tokio::io::stdout();
    let ready = serde_json::to_string(&WorkerFrame::Ready)?;
    stdout.write_all(ready.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    let Some(line) = lines.next_line().await? else {
        return Ok(());
    };

    let frame: WorkerFrame = serde_json::from_str(&line)?;
    let WorkerFrame::Execute { task } = frame else {
        let error = serde_json::to_string(&WorkerFrame::Error {
            message: "expected an execute frame".to_string(),
        })?;
        stdout.write_all(error.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
        return Ok(());
    };

    let result = agent.run(task, CancellationToken::new()).await;
    let reply = serde_json::to_string(&WorkerFrame::Result { result })?;
    stdout.write_all(reply.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;
    Ok(())
}
