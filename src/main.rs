//! # FloatChat CLI (`floatchat`)
//!
//! The `floatchat` binary starts the HTTP API or runs the conversational
//! pipeline once from the command line.
//!
//! ## Usage
//!
//! ```bash
//! floatchat --config ./config/floatchat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `floatchat serve` | Start the HTTP API server |
//! | `floatchat ask "<question>"` | Run the RAG pipeline once and print the answer |
//!
//! Secrets come from the environment (a `.env` file is honored):
//! `GEMINI_API_KEY` for the generation service, and optionally
//! `DATABASE_URL` to override the configured connection string.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use floatchat::chroma::ChromaClient;
use floatchat::config::load_config;
use floatchat::generation::GeminiClient;
use floatchat::pipeline::Pipeline;
use floatchat::retry::RetryPolicy;
use floatchat::server;
use floatchat::store::{self, PgExecutor, SqlExecutor};

/// FloatChat — natural-language querying and aggregation over Argo float
/// ocean profiles.
#[derive(Parser)]
#[command(
    name = "floatchat",
    about = "FloatChat — a multi-agent RAG pipeline and aggregation API for Argo float data",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/floatchat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server.
    ///
    /// Serves the conversational `/query` endpoint and the dashboard
    /// aggregation endpoints, with permissive CORS for browser clients.
    Serve,

    /// Run the conversational pipeline once and print the answer.
    Ask {
        /// The natural-language question.
        question: String,

        /// Number of documents to retrieve from the vector store.
        #[arg(long)]
        k: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("floatchat=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    let generator = Arc::new(GeminiClient::new(&config.llm)?);
    let searcher = Arc::new(ChromaClient::new(&config.chroma)?);
    let pool = store::connect(&config.database).await?;
    let executor: Arc<dyn SqlExecutor> = Arc::new(PgExecutor::new(pool));
    let policy = RetryPolicy::from_config(&config.llm);

    let pipeline = Arc::new(Pipeline::new(
        generator,
        searcher,
        executor.clone(),
        policy,
    ));

    match cli.command {
        Commands::Serve => server::run_server(&config, pipeline, executor).await,
        Commands::Ask { question, k } => {
            let k = k.unwrap_or(config.chroma.default_top_k);
            let response = pipeline.run(&question, k).await?;

            println!("{}", response.final_answer);
            println!();
            println!("generated SQL: {}", response.generated_sql);
            println!(
                "retrieved {} documents, {} result rows",
                response.retrieved_docs.len(),
                response.sql_results.len()
            );
            Ok(())
        }
    }
}
