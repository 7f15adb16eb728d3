pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod generation;
pub mod index;
pub mod models;
pub mod pipeline;
mod runtime;
pub mod store;
pub mod traits;

pub use chunking::{build_chunk_records, chunk_text, ChunkingConfig, Chunks};
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, HttpEmbedder, HttpEmbedderConfig,
    DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{IngestError, SearchError};
pub use extractor::{DocumentExtractor, DocumentFormat, FileExtractor, OcrEndpointConfig, PageText};
pub use generation::{study_prompt, GeminiGenerator, DEFAULT_GEMINI_MODEL};
pub use index::FlatL2Index;
pub use models::{
    ChunkRecord, IngestOutcome, IngestReport, IngestionOptions, PipelineConfig, RetrievedChunk,
    SearchHit, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE, DEFAULT_DATA_DIR, DEFAULT_TOP_K,
};
pub use pipeline::{digest_file, RetrievalPipeline};
pub use store::{validate_subject, SubjectIndex, SubjectStore};
pub use traits::AnswerGenerator;
