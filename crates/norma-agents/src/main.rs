use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use norma_agents::audit::{AuditStore, MemoryAuditStore, PgAuditStore};
use norma_agents::{telemetry, AnalysisService, PipelineConfig};
use retrieval::{HashEncoder, MemoryVectorIndex, PgVectorIndex, VectorIndex};

#[derive(Parser)]
#[command(name = "norma", about = "Regulatory impact analysis pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP server.
    Serve {
        /// Bind address override (default from NORMA_BIND_ADDR).
        #[arg(long)]
        bind: Option<String>,
    },
    /// Run one offline indexing cycle over the repository.
    Index {
        /// Repository path override (default from REPO_PATH).
        #[arg(long)]
        repo: Option<PathBuf>,
    },
    /// Run a single analysis from the terminal and print the final state.
    Analyze {
        /// Regulatory text inline.
        #[arg(long, conflicts_with = "file")]
        text: Option<String>,
        /// Read the regulatory text from a file.
        #[arg(long, short)]
        file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init();

    let cli = Cli::parse();
    let mut config = PipelineConfig::from_env();

    match cli.command {
        Command::Serve { bind } => {
            if let Some(bind) = bind {
                config.bind_addr = bind;
            }
            let service = Arc::new(build_service(config.clone()).await?);
            norma_agents::server::serve(service, &config.bind_addr).await
        }
        Command::Index { repo } => {
            if let Some(repo) = repo {
                config.repo_path = repo;
            }
            let service = build_service(config).await?;
            let report = service.index_repository().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Analyze { text, file } => {
            let regulatory_text = match (text, file) {
                (Some(text), _) => text,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("cannot read {}", path.display()))?,
                (None, None) => anyhow::bail!("pass --text or --file"),
            };
            let service = build_service(config).await?;
            let outcome = service.analyze(&regulatory_text, None, None).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(())
        }
    }
}

/// Construct the process-wide resources. A configured `DATABASE_URL` selects
/// the Postgres stores; otherwise the in-memory pair keeps local runs and
/// demos self-contained.
async fn build_service(config: PipelineConfig) -> Result<AnalysisService> {
    let encoder = Arc::new(
        HashEncoder::from_model_id(&config.embedding_model)
            .with_context(|| format!("bad EMBEDDING_MODEL {:?}", config.embedding_model))?,
    );

    let (index, audit): (Arc<dyn VectorIndex>, Arc<dyn AuditStore>) =
        match config.database_url.as_deref() {
            Some(url) => {
                let index = PgVectorIndex::connect(url, encoder.dimension())
                    .await
                    .context("cannot connect vector index")?;
                let audit = PgAuditStore::connect(url)
                    .await
                    .context("cannot connect audit store")?;
                info!("using postgres-backed stores");
                (Arc::new(index), Arc::new(audit))
            }
            None => {
                warn!("DATABASE_URL not set, using in-memory stores");
                (
                    Arc::new(MemoryVectorIndex::new(encoder.dimension())),
                    Arc::new(MemoryAuditStore::new()),
                )
            }
        };

    AnalysisService::from_config(config, encoder, index, audit).map_err(Into::into)
}
