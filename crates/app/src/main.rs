use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use paper_rag_core::{
    ingest_folder, CharacterNgramProvider, DistanceMetric, EmbeddingProvider,
    HttpEmbeddingProvider, LocalObjectStore, Pipeline, PipelineOptions, QdrantStore, QueryRequest,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "paper-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// JSON file with pipeline options; the flags below override it
    #[arg(long, env = "PAPER_RAG_CONFIG")]
    config: Option<PathBuf>,

    /// Root directory of the local object store
    #[arg(long, env = "PAPER_RAG_STORAGE_ROOT", default_value = "./data")]
    storage_root: PathBuf,

    /// Bucket receiving uploaded PDFs
    #[arg(long, env = "PAPER_RAG_PDF_BUCKET")]
    pdf_bucket: Option<String>,

    /// Bucket receiving extracted text
    #[arg(long, env = "PAPER_RAG_TEXT_BUCKET")]
    text_bucket: Option<String>,

    /// Qdrant base URL
    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333")]
    qdrant_url: String,

    /// Qdrant collection
    #[arg(long, env = "QDRANT_COLLECTION", default_value = "paper_chunks")]
    qdrant_collection: String,

    /// Timeout for a single vector store request, in seconds
    #[arg(long, default_value = "30")]
    store_timeout_secs: u64,

    /// Where embeddings come from
    #[arg(long, value_enum, env = "PAPER_RAG_EMBEDDING_PROVIDER", default_value_t = ProviderKind::Http)]
    embedding_provider: ProviderKind,

    /// Base URL of the embedding model runtime
    #[arg(
        long,
        env = "EMBEDDING_ENDPOINT",
        default_value = "https://bedrock-runtime.us-east-1.amazonaws.com"
    )]
    embedding_endpoint: String,

    /// Bearer token for the embedding runtime
    #[arg(long, env = "EMBEDDING_API_KEY", hide_env_values = true)]
    embedding_api_key: Option<String>,

    /// Embedding model id
    #[arg(long, env = "EMBEDDING_MODEL_ID")]
    embedding_model: Option<String>,

    /// Embedding dimensionality; must match the collection's vector size
    #[arg(long, env = "EMBEDDING_DIMENSIONS")]
    embedding_dimensions: Option<usize>,

    /// Embedding calls in flight per document
    #[arg(long)]
    embedding_concurrency: Option<usize>,

    /// Timeout for one embedding call, in milliseconds
    #[arg(long)]
    embedding_timeout_ms: Option<u64>,

    /// Attempts per embedding request on throttling or server errors
    #[arg(long, default_value = "3")]
    embedding_max_attempts: usize,

    /// Maximum characters per chunk
    #[arg(long)]
    chunk_max_chars: Option<usize>,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProviderKind {
    /// Remote model runtime over HTTP.
    Http,
    /// Offline character n-gram hashing.
    Local,
}

#[derive(Subcommand)]
enum Command {
    /// Create the vector collection if it does not exist.
    Setup,
    /// Upload every PDF of a folder for one user and index it.
    Ingest {
        /// Folder that contains PDFs recursively.
        #[arg(long)]
        folder: PathBuf,
        /// Owner of the documents.
        #[arg(long)]
        user_id: String,
    },
    /// Ingest one extracted text object from a trigger event.
    IngestEvent {
        /// Trigger JSON, or `-` to read it from stdin.
        #[arg(long)]
        event: String,
    },
    /// Extract the text of an uploaded PDF into the text bucket.
    IndexPdf {
        /// Bucket holding the PDF; defaults to the configured PDF bucket.
        #[arg(long)]
        bucket: Option<String>,
        /// Object key of the PDF.
        #[arg(long)]
        key: String,
        /// Continue with ingestion once the text is stored.
        #[arg(long, default_value_t = false)]
        ingest: bool,
    },
    /// Retrieve the chunks closest to a question.
    Query {
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        question: String,
        /// Restrict to these papers; repeat for several.
        #[arg(long = "paper-id")]
        paper_ids: Vec<String>,
        /// Number of chunks to return.
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// Remove every vector of one document.
    Delete {
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        paper_id: String,
    },
}

fn load_options(cli: &Cli) -> anyhow::Result<PipelineOptions> {
    let mut options = match &cli.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("invalid config {}", path.display()))?
        }
        None => PipelineOptions::default(),
    };

    if let Some(bucket) = &cli.pdf_bucket {
        options.pdf_bucket = bucket.clone();
    }
    if let Some(bucket) = &cli.text_bucket {
        options.text_bucket = bucket.clone();
    }
    if let Some(model) = &cli.embedding_model {
        options.embedding.model_id = model.clone();
    }
    if let Some(dimensions) = cli.embedding_dimensions {
        options.embedding.dimensions = dimensions;
    }
    if let Some(concurrency) = cli.embedding_concurrency {
        options.embedding.concurrency = concurrency;
    }
    if let Some(timeout_ms) = cli.embedding_timeout_ms {
        options.embedding.timeout = Duration::from_millis(timeout_ms);
    }
    if let Some(max_chars) = cli.chunk_max_chars {
        options.chunk_max_chars = max_chars;
    }

    Ok(options)
}

fn embedding_provider(
    cli: &Cli,
    options: &PipelineOptions,
) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    Ok(match cli.embedding_provider {
        ProviderKind::Http => Arc::new(
            HttpEmbeddingProvider::new(
                &cli.embedding_endpoint,
                cli.embedding_api_key.clone(),
                options.embedding.timeout,
                cli.embedding_max_attempts,
            )
            .context("failed to configure embedding provider")?,
        ),
        ProviderKind::Local => Arc::new(CharacterNgramProvider),
    })
}

fn read_event(event: &str) -> anyhow::Result<serde_json::Value> {
    let raw = if event == "-" {
        std::io::read_to_string(std::io::stdin()).context("failed to read event from stdin")?
    } else {
        event.to_string()
    };
    serde_json::from_str(&raw).context("event is not valid JSON")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let options = load_options(&cli)?;

    let provider = embedding_provider(&cli, &options)?;
    let vector = QdrantStore::new(
        &cli.qdrant_url,
        &cli.qdrant_collection,
        options.embedding.dimensions,
        DistanceMetric::Cosine,
        Duration::from_secs(cli.store_timeout_secs),
    )
    .context("failed to configure qdrant")?;
    let objects = LocalObjectStore::new(&cli.storage_root);

    let pipeline = Pipeline::new(options, objects, provider, vector)?;
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        model = %pipeline.options().embedding.model_id,
        dimensions = pipeline.options().embedding.dimensions,
        "paper-rag boot"
    );

    match cli.command {
        Command::Setup => {
            pipeline.index().ensure_collection().await?;
            println!("{}", json!({ "collection": cli.qdrant_collection, "ready": true }));
        }
        Command::Ingest { folder, user_id } => {
            pipeline.index().ensure_collection().await?;
            let report = ingest_folder(&pipeline, &folder, &user_id).await?;

            for skipped in &report.skipped_files {
                warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped pdf");
            }
            for document in &report.documents {
                println!("{}", serde_json::to_string(document)?);
            }

            let chunk_count: usize = report.documents.iter().map(|doc| doc.num_chunks).sum();
            info!(
                folder = %folder.display(),
                documents = report.documents.len(),
                skipped = report.skipped_files.len(),
                chunk_count,
                "folder ingested"
            );
        }
        Command::IngestEvent { event } => {
            let event = read_event(&event)?;
            let report = pipeline.ingest_event(&event).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::IndexPdf { bucket, key, ingest } => {
            let bucket = bucket.unwrap_or_else(|| pipeline.options().pdf_bucket.clone());
            let trigger = pipeline.index_pdf(&bucket, &key).await?;
            if ingest {
                let report = pipeline.ingest(&trigger).await?;
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", serde_json::to_string_pretty(&trigger)?);
            }
        }
        Command::Query {
            user_id,
            question,
            paper_ids,
            top_k,
        } => {
            let request = QueryRequest {
                question,
                user_id,
                paper_ids: (!paper_ids.is_empty()).then_some(paper_ids),
                top_k,
            };
            let response = pipeline.query(&request).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::Delete { user_id, paper_id } => {
            pipeline.delete_document(&user_id, &paper_id).await?;
            println!("{}", json!({ "user_id": user_id, "paper_id": paper_id, "deleted": true }));
        }
    }

    Ok(())
}
