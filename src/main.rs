//! noencode-rag - Retrieval over external stdio tools, no embeddings.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use noencode_rag::ai::{GenerationError, Provider};
use noencode_rag::config::{
    validate_sources, AppConfig, ConfigError, ConfigLoader, KnowledgeSourceConfig,
};
use noencode_rag::display;
use noencode_rag::knowledge::{KnowledgeStore, RetrievalError, ToolKnowledgeSource};
use noencode_rag::orchestrator::{OrchestratorError, RetrievalOrchestrator};
use noencode_rag::tool::{ServerError, ToolServer};

#[derive(Parser)]
#[command(
    name = "noencode-rag",
    about = "Retrieval-augmented answers from external knowledge tools",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Config file to use instead of the default search paths.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Retrieve context for a question and generate an answer.
    Ask(QueryArgs),
    /// Retrieve and print context only; no generator is needed.
    Retrieve(QueryArgs),
    /// Serve a stub tool on stdin/stdout that echoes the query back.
    EchoTool {
        /// Tool name to register.
        #[arg(long, default_value = "KnowledgeTool")]
        tool_name: String,
        /// Argument key holding the query.
        #[arg(long, default_value = "query")]
        query_param: String,
        /// Text placed before the echoed query.
        #[arg(long, default_value = "Echo: ")]
        prefix: String,
        /// Return a `[score, text]` pair with this score.
        #[arg(long, allow_negative_numbers = true)]
        score: Option<f64>,
    },
}

#[derive(Args)]
struct QueryArgs {
    /// The question to ask.
    query: String,

    /// Keep at most this many context nodes.
    #[arg(long)]
    top_k: Option<usize>,

    /// Print machine-readable JSON instead of colored text.
    #[arg(long)]
    json: bool,

    /// Do not truncate long contexts.
    #[arg(long)]
    raw: bool,

    #[command(flatten)]
    source: SourceArgs,
}

/// Ad-hoc tool source; replaces the configured sources when `--command` is given.
#[derive(Args)]
struct SourceArgs {
    /// Executable of the knowledge tool.
    #[arg(long)]
    command: Option<String>,
    /// Argument for the tool executable (repeatable).
    #[arg(long = "arg", allow_hyphen_values = true)]
    args: Vec<String>,
    /// Tool to invoke.
    #[arg(long, default_value = "KnowledgeTool")]
    tool_name: String,
    /// Argument key the query is passed under.
    #[arg(long, default_value = "query")]
    query_param: String,
    /// Per-request timeout in milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,
}

impl SourceArgs {
    fn to_config(&self) -> Option<KnowledgeSourceConfig> {
        let command = self.command.as_ref()?;
        let config = KnowledgeSourceConfig::new(
            self.tool_name.clone(),
            command.clone(),
            self.args.clone(),
            self.tool_name.clone(),
            self.query_param.clone(),
        );
        Some(match self.timeout_ms {
            Some(ms) => config.with_timeout(Duration::from_millis(ms)),
            None => config,
        })
    }
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
    #[error(transparent)]
    Server(#[from] ServerError),
    #[error("Failed to encode output: {0}")]
    Json(#[from] serde_json::Error),
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    // stdout carries answers and, for echo-tool, the wire protocol.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn load_config(path: Option<PathBuf>) -> Result<AppConfig, ConfigError> {
    let loader = path.map_or_else(ConfigLoader::new, ConfigLoader::with_path);
    loader.load()
}

fn build_store(config: &AppConfig, args: &SourceArgs) -> Result<KnowledgeStore, ConfigError> {
    let sources = match args.to_config() {
        Some(source) => vec![source],
        None => config.sources.clone(),
    };
    if sources.is_empty() {
        return Err(ConfigError::NoSources);
    }
    validate_sources(&sources)?;

    let mut store = KnowledgeStore::new().with_source_timeout(config.retrieval.source_timeout());
    for source in sources {
        store.add_source(ToolKnowledgeSource::new(source));
    }
    Ok(store)
}

async fn run_retrieve(config: AppConfig, args: QueryArgs) -> Result<(), CliError> {
    let store = build_store(&config, &args.source)?;
    let top_k = args.top_k.or(config.retrieval.top_k);

    let result = store.retrieve_detailed(&args.query, top_k).await;
    store.shutdown().await;
    let retrieval = result?;

    if args.json {
        let value = display::retrieval_json(&args.query, &retrieval.nodes, &retrieval.failures);
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        display::print_failures(&retrieval.failures);
        display::print_contexts(&retrieval.nodes, args.raw);
    }
    Ok(())
}

async fn run_ask(config: AppConfig, args: QueryArgs) -> Result<(), CliError> {
    let generator = Provider::from_config(&config.ai)?;
    tracing::info!(model = %generator.model(), "Using generator");

    let store = build_store(&config, &args.source)?;
    let orchestrator = RetrievalOrchestrator::new(store, Arc::new(generator))
        .with_top_k(args.top_k.or(config.retrieval.top_k))
        .with_separator(config.retrieval.separator.clone());

    let result = orchestrator.answer(&args.query).await;
    orchestrator.shutdown().await;
    let answer = result?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&display::answer_json(&answer))?);
    } else {
        display::print_failures(&answer.failures);
        display::print_answer(&answer);
        println!();
        display::print_contexts(&answer.nodes, args.raw);
    }
    Ok(())
}

async fn run_echo_tool(
    tool_name: String,
    query_param: String,
    prefix: String,
    score: Option<f64>,
) -> Result<(), CliError> {
    let server = ToolServer::echo(tool_name, query_param, prefix, score);
    tracing::info!(tools = ?server.tool_names(), "Serving stub tool on stdio");
    server.serve(tokio::io::stdin(), tokio::io::stdout()).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::EchoTool {
            tool_name,
            query_param,
            prefix,
            score,
        } => run_echo_tool(tool_name, query_param, prefix, score).await,
        Commands::Ask(args) => match load_config(cli.config) {
            Ok(config) => run_ask(config, args).await,
            Err(e) => Err(e.into()),
        },
        Commands::Retrieve(args) => match load_config(cli.config) {
            Ok(config) => run_retrieve(config, args).await,
            Err(e) => Err(e.into()),
        },
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            display::print_error(&e.to_string());
            ExitCode::FAILURE
        }
    }
}
