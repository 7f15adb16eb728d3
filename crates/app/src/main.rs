use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use notemind_core::{
    CharacterNgramEmbedder, Embedder, FileExtractor, GeminiGenerator, HttpEmbedder,
    HttpEmbedderConfig, IngestOutcome, IngestionOptions, PipelineConfig, RetrievalPipeline,
    DEFAULT_GEMINI_MODEL,
};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "notemind", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding per-subject index and metadata files
    #[arg(long, env = "NOTEMIND_DATA_DIR", default_value = "embeddings")]
    data_dir: PathBuf,

    /// Characters per chunk
    #[arg(long, default_value = "300")]
    chunk_size: usize,

    /// Characters shared by neighbouring chunks
    #[arg(long, default_value = "50")]
    chunk_overlap: usize,

    /// Embedding backend
    #[arg(long, value_enum, env = "NOTEMIND_EMBEDDER", default_value_t = EmbedderKind::Ngram)]
    embedder: EmbedderKind,

    /// Base URL of an OpenAI-compatible embeddings API
    #[arg(long, env = "NOTEMIND_EMBEDDING_URL", default_value = "http://localhost:11434/v1")]
    embedding_url: String,

    /// Embedding model name for the http backend
    #[arg(long, env = "NOTEMIND_EMBEDDING_MODEL", default_value = "all-minilm")]
    embedding_model: String,

    /// Vector width produced by the embedding model
    #[arg(long, env = "NOTEMIND_EMBEDDING_DIMENSIONS", default_value = "384")]
    embedding_dimensions: usize,

    /// Bearer token for the embeddings API
    #[arg(long, env = "NOTEMIND_EMBEDDING_API_KEY", hide_env_values = true)]
    embedding_api_key: Option<String>,

    /// Gemini API key used to answer questions
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    gemini_api_key: Option<String>,

    /// Gemini model used to answer questions
    #[arg(long, env = "NOTEMIND_GEMINI_MODEL", default_value = DEFAULT_GEMINI_MODEL)]
    gemini_model: String,
}

#[derive(Clone, Copy, ValueEnum)]
enum EmbedderKind {
    /// Local hashed character trigrams
    Ngram,
    /// OpenAI-compatible embeddings endpoint
    Http,
}

#[derive(Subcommand)]
enum Command {
    /// Extract, chunk and embed a document into a subject.
    Ingest {
        /// PDF, DOCX, TXT or image file.
        #[arg(long)]
        file: PathBuf,
        /// Subject the document belongs to.
        #[arg(long)]
        subject: String,
        /// Treat the document as handwritten and send it through OCR.
        #[arg(long, default_value_t = false)]
        handwritten: bool,
    },
    /// Answer a question from a subject's notes.
    Ask {
        #[arg(long)]
        subject: String,
        #[arg(long)]
        query: String,
        /// Number of chunks handed to the model.
        #[arg(long, default_value = "5")]
        top_k: usize,
    },
    /// Print the retrieved notes for a question without calling the model.
    Context {
        #[arg(long)]
        subject: String,
        #[arg(long)]
        query: String,
        #[arg(long, default_value = "5")]
        top_k: usize,
    },
    /// List subjects with a persisted index.
    Subjects,
}

fn build_embedder(cli: &Cli) -> anyhow::Result<Box<dyn Embedder>> {
    match cli.embedder {
        EmbedderKind::Ngram => Ok(Box::new(CharacterNgramEmbedder::new(
            cli.embedding_dimensions,
        )?)),
        EmbedderKind::Http => {
            let mut config = HttpEmbedderConfig::new(
                &cli.embedding_url,
                &cli.embedding_model,
                cli.embedding_dimensions,
            );
            config.api_key = cli.embedding_api_key.clone();
            Ok(Box::new(HttpEmbedder::new(config)?))
        }
    }
}

fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    let top_k = match &cli.command {
        Command::Ask { top_k, .. } | Command::Context { top_k, .. } => *top_k,
        _ => notemind_core::DEFAULT_TOP_K,
    };
    let config = PipelineConfig {
        data_dir: cli.data_dir.clone(),
        ingestion: IngestionOptions {
            chunk_max_chars: cli.chunk_size,
            chunk_overlap_chars: cli.chunk_overlap,
        },
        top_k,
    };

    let embedder = build_embedder(&cli)?;
    let generator = GeminiGenerator::new(cli.gemini_api_key.clone(), cli.gemini_model.clone());
    let pipeline = RetrievalPipeline::new(config, embedder, FileExtractor::from_env(), generator)?;

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        data_dir = %cli.data_dir.display(),
        "notemind boot"
    );

    match cli.command {
        Command::Ingest {
            file,
            subject,
            handwritten,
        } => {
            let outcome = pipeline.ingest_file(&file, &subject, handwritten)?;
            match &outcome {
                IngestOutcome::Indexed(report) => {
                    info!(
                        subject = %report.subject,
                        chunks = report.chunks_added,
                        total = report.total_chunks,
                        "document ingested"
                    );
                }
                IngestOutcome::Skipped { file, .. } => {
                    warn!(file = %file, "no readable text found, nothing was indexed");
                }
            }
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::Ask { subject, query, .. } => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            let answer = runtime.block_on(pipeline.ask(&query, &subject))?;
            println!("{answer}");
        }
        Command::Context {
            subject,
            query,
            top_k,
        } => {
            let context = pipeline.retrieve(&query, &subject, top_k)?;
            println!("{context}");
        }
        Command::Subjects => {
            for subject in pipeline.subjects()? {
                println!("{subject}");
            }
        }
    }

    Ok(())
}
