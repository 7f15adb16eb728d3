use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_CHUNK_SIZE: usize = 300;
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;
pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_DATA_DIR: &str = "embeddings";

/// Provenance for one stored chunk. Position `i` in a subject's record list
/// matches vector `i` in its index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkRecord {
    pub subject: String,
    pub file: String,
    pub page: u32,
    pub chunk: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub distance: f32,
    pub position: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub distance: f32,
    pub position: usize,
    pub record: ChunkRecord,
}

impl RetrievedChunk {
    pub fn render(&self) -> String {
        format!("{}\n(Page {})", self.record.chunk, self.record.page)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestReport {
    pub subject: String,
    pub file: String,
    pub checksum: Option<String>,
    pub pages: usize,
    pub chunks_added: usize,
    pub total_chunks: usize,
    pub revision: u64,
    pub ingested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestOutcome {
    Indexed(IngestReport),
    /// Nothing readable was found; no index was created or touched.
    Skipped { subject: String, file: String },
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub chunk_max_chars: usize,
    pub chunk_overlap_chars: usize,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_max_chars: DEFAULT_CHUNK_SIZE,
            chunk_overlap_chars: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub data_dir: PathBuf,
    pub ingestion: IngestionOptions,
    pub top_k: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            ingestion: IngestionOptions::default(),
            top_k: DEFAULT_TOP_K,
        }
    }
}
