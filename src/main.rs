use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use dataflow_crew::config::{AppConfig, EngineKind};
use dataflow_crew::facade::Facade;
use dataflow_crew::frontend::run_repl;
use dataflow_crew::llm_client::OpenAiLlmClient;
use dataflow_crew::orchestrator::{EchoCrewEngine, HierarchicalLlmEngine, SharedCrewEngine};
use dataflow_crew::status::{StatusPanel, StatusProbe};

#[derive(Parser, Debug)]
#[command(
    name = "dataflow-chat",
    about = "Chat with your data through a coordinator and a team of specialist agents"
)]
struct Cli {
    /// Optional one-shot prompt; if omitted the CLI enters interactive mode.
    #[arg(short, long)]
    prompt: Option<String>,

    /// CSV file to analyze; loaded before the first turn.
    #[arg(short, long)]
    file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the full ingest, clean, analyze, visualize, and report pipeline on one file.
    Pipeline {
        /// Path to the CSV file.
        path: String,
    },
    /// Check the LLM backend and every configured tool adapter, then exit.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();

    let config = AppConfig::from_env().context("Invalid configuration")?;
    let engine = build_engine(&config);
    let facade = Facade::new(
        config.facade_config().context("Failed to load tool adapter specs")?,
        engine,
    );
    let panel = StatusPanel::new(
        StatusProbe::new(config.status_timeout)?,
        config.ollama_health_url(),
        config.llm.model.clone(),
    );

    let outcome = match cli.command {
        Some(Commands::Pipeline { path }) => run_pipeline(&facade, &path).await,
        Some(Commands::Status) => {
            println!("{}", panel.render(&facade).await);
            Ok(())
        }
        None => match cli.prompt {
            Some(prompt) => {
                run_single(&facade, prompt, cli.file).await;
                Ok(())
            }
            None => run_repl(&facade, &panel, cli.file.as_deref()).await,
        },
    };

    facade.shutdown().await;
    outcome
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .try_init();
}

fn build_engine(config: &AppConfig) -> SharedCrewEngine {
    match config.engine {
        EngineKind::Llm => {
            info!(
                model = %config.llm.model,
                api_base = %config.llm.api_base,
                "Using LLM-driven hierarchical engine"
            );
            let llm_client = OpenAiLlmClient::shared(&config.llm);
            Arc::new(HierarchicalLlmEngine::new(llm_client))
        }
        EngineKind::Echo => {
            info!("Using echo engine (offline)");
            EchoCrewEngine::shared()
        }
    }
}

async fn run_single(facade: &Facade, prompt: String, file: Option<PathBuf>) {
    let message = match file {
        Some(path) => format!("{prompt}\n\nFile: {}", path.display()),
        None => prompt,
    };

    let result = facade.chat(&message).await;
    println!("\nAssistant:\n{}\n", result.to_text());
}

async fn run_pipeline(facade: &Facade, path: &str) -> anyhow::Result<()> {
    let output = facade.run_pipeline(path).await.map_err(|err| {
        error!(?err, "Pipeline run failed");
        err
    })?;

    println!("\n{}\n", output.into_text());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn prompt_and_file_parse_without_subcommand() {
        let cli = Cli::try_parse_from([
            "dataflow-chat",
            "--prompt",
            "What are the main trends?",
            "--file",
            "sales.csv",
        ])
        .expect("parse");

        assert_eq!(cli.prompt.as_deref(), Some("What are the main trends?"));
        assert_eq!(cli.file, Some(PathBuf::from("sales.csv")));
        assert!(cli.command.is_none());
    }

    #[test]
    fn pipeline_subcommand_takes_a_path() {
        let cli = Cli::try_parse_from(["dataflow-chat", "pipeline", "data/q3.csv"]).expect("parse");
        match cli.command {
            Some(Commands::Pipeline { path }) => assert_eq!(path, "data/q3.csv"),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn status_subcommand_parses() {
        let cli = Cli::try_parse_from(["dataflow-chat", "status"]).expect("parse");
        assert!(matches!(cli.command, Some(Commands::Status)));
    }
}
