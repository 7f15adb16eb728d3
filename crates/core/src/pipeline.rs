use crate::chunking::{build_chunk_records, ChunkingConfig};
use crate::embeddings::Embedder;
use crate::extractor::{DocumentExtractor, DocumentFormat, PageText};
use crate::models::{IngestOutcome, IngestReport, PipelineConfig, RetrievedChunk};
use crate::runtime::run_blocking;
use crate::store::{validate_subject, SubjectIndex, SubjectStore};
use crate::traits::AnswerGenerator;
use crate::{IngestError, SearchError};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Ingests documents into per-subject indexes and answers questions against
/// them. Collaborators are injected; nothing is loaded lazily or globally.
pub struct RetrievalPipeline<E, X, G>
where
    E: Embedder,
    X: DocumentExtractor,
    G: AnswerGenerator,
{
    embedder: E,
    extractor: X,
    generator: G,
    store: SubjectStore,
    chunking: ChunkingConfig,
    top_k: usize,
}

impl<E, X, G> RetrievalPipeline<E, X, G>
where
    E: Embedder,
    X: DocumentExtractor,
    G: AnswerGenerator + Send + Sync,
{
    pub fn new(
        config: PipelineConfig,
        embedder: E,
        extractor: X,
        generator: G,
    ) -> Result<Self, IngestError> {
        let chunking = ChunkingConfig::try_from(&config.ingestion)?;
        Ok(Self {
            embedder,
            extractor,
            generator,
            store: SubjectStore::new(config.data_dir),
            chunking,
            top_k: config.top_k,
        })
    }

    pub fn store(&self) -> &SubjectStore {
        &self.store
    }

    pub fn default_top_k(&self) -> usize {
        self.top_k
    }

    pub fn subjects(&self) -> Result<Vec<String>, IngestError> {
        self.store.list_subjects()
    }

    /// Extracts a file and ingests its pages under `subject`.
    pub fn ingest_file(
        &self,
        path: &Path,
        subject: &str,
        handwritten: bool,
    ) -> Result<IngestOutcome, IngestError> {
        validate_subject(subject)?;
        let format = DocumentFormat::from_path(path)?;
        let file = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?;

        let pages = self.extractor.extract_pages(path, format, handwritten)?;
        let checksum = digest_file(path)?;
        info!(
            path = %path.display(),
            ?format,
            handwritten,
            pages = pages.len(),
            "document extracted"
        );

        let mut outcome = self.ingest_pages(&pages, subject, file)?;
        if let IngestOutcome::Indexed(report) = &mut outcome {
            report.checksum = Some(checksum);
        }
        Ok(outcome)
    }

    /// Chunks, embeds and appends `pages` to the subject, then persists it.
    /// A document without any text is skipped and leaves disk untouched.
    pub fn ingest_pages(
        &self,
        pages: &[PageText],
        subject: &str,
        file: &str,
    ) -> Result<IngestOutcome, IngestError> {
        validate_subject(subject)?;
        let records = build_chunk_records(pages, subject, file, self.chunking);

        if records.is_empty() {
            warn!(subject, file, "no readable text found, skipping embedding");
            return Ok(IngestOutcome::Skipped {
                subject: subject.to_string(),
                file: file.to_string(),
            });
        }

        let mut target = self.load_or_create(subject)?;

        info!(subject, file, chunk_count = records.len(), "embedding chunks");
        let texts = records
            .iter()
            .map(|record| record.chunk.clone())
            .collect::<Vec<_>>();
        let vectors = self.embedder.embed(&texts)?;

        let chunks_added = records.len();
        target.append(&vectors, records)?;
        let revision = self.store.save(&mut target)?;

        info!(subject, file, chunks_added, total = target.len(), "subject ingested");
        Ok(IngestOutcome::Indexed(IngestReport {
            subject: subject.to_string(),
            file: file.to_string(),
            checksum: None,
            pages: pages.len(),
            chunks_added,
            total_chunks: target.len(),
            revision,
            ingested_at: Utc::now(),
        }))
    }

    /// Nearest chunks for `query`, closest first.
    pub fn search(
        &self,
        query: &str,
        subject: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, SearchError> {
        let loaded = self.store.load(subject)?;
        self.ensure_compatible(&loaded)?;

        if query.trim().is_empty() {
            return Err(SearchError::Request("query is empty".to_string()));
        }

        let query_vector = self.embedder.embed_query(query)?;
        let hits = loaded.index.search(&query_vector, top_k)?;

        hits.into_iter()
            .map(|hit| {
                let record = loaded.record(hit.position).cloned().ok_or_else(|| {
                    IngestError::MissingIndexOrMetadata {
                        subject: subject.to_string(),
                        details: format!("no metadata at position {}", hit.position),
                    }
                })?;
                Ok::<_, SearchError>(RetrievedChunk {
                    distance: hit.distance,
                    position: hit.position,
                    record,
                })
            })
            .collect()
    }

    /// Retrieved chunks rendered as `"{chunk}\n(Page N)"`, joined by blank lines.
    pub fn retrieve(&self, query: &str, subject: &str, top_k: usize) -> Result<String, SearchError> {
        let chunks = self.search(query, subject, top_k)?;
        Ok(chunks
            .iter()
            .map(RetrievedChunk::render)
            .collect::<Vec<_>>()
            .join("\n\n"))
    }

    /// Retrieves context with the default top-k and asks the generator.
    pub async fn ask(&self, query: &str, subject: &str) -> Result<String, SearchError> {
        let context = run_blocking(|| self.retrieve(query, subject, self.top_k))?;
        info!(subject, context_chars = context.len(), "asking answer generator");
        self.generator.answer(&context, query).await
    }

    fn load_or_create(&self, subject: &str) -> Result<SubjectIndex, IngestError> {
        let target = self.store.load_or_create(
            subject,
            self.embedder.model_id(),
            self.embedder.dimensions(),
        )?;
        self.ensure_compatible(&target)?;
        Ok(target)
    }

    fn ensure_compatible(&self, subject: &SubjectIndex) -> Result<(), IngestError> {
        if subject.index.dimension() != self.embedder.dimensions() {
            return Err(IngestError::DimensionMismatch {
                expected: subject.index.dimension(),
                actual: self.embedder.dimensions(),
            });
        }
        if subject.model_id != self.embedder.model_id() {
            warn!(
                subject = %subject.subject,
                stored = %subject.model_id,
                current = %self.embedder.model_id(),
                "subject was indexed with a different embedding model"
            );
        }
        Ok(())
    }
}

pub fn digest_file(path: &Path) -> Result<String, IngestError> {
    let bytes = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::extractor::FileExtractor;
    use crate::models::IngestionOptions;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::{tempdir, TempDir};

    #[derive(Default)]
    struct RecordingGenerator {
        seen: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl AnswerGenerator for RecordingGenerator {
        async fn answer(&self, context: &str, query: &str) -> Result<String, SearchError> {
            self.seen
                .lock()
                .unwrap()
                .push((context.to_string(), query.to_string()));
            Ok(format!("answer to {query}"))
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl AnswerGenerator for FailingGenerator {
        async fn answer(&self, _context: &str, _query: &str) -> Result<String, SearchError> {
            Err(SearchError::BackendResponse {
                backend: "fake".to_string(),
                details: "quota exceeded".to_string(),
            })
        }
    }

    fn pipeline_in<G: AnswerGenerator + Send + Sync>(
        dir: &TempDir,
        generator: G,
    ) -> RetrievalPipeline<CharacterNgramEmbedder, FileExtractor, G> {
        let config = PipelineConfig {
            data_dir: dir.path().join("embeddings"),
            ..PipelineConfig::default()
        };
        RetrievalPipeline::new(
            config,
            CharacterNgramEmbedder::new(64).unwrap(),
            FileExtractor::new(None),
            generator,
        )
        .unwrap()
    }

    fn page(number: u32, text: &str) -> PageText {
        PageText {
            number,
            text: text.to_string(),
        }
    }

    fn indexed(outcome: IngestOutcome) -> IngestReport {
        match outcome {
            IngestOutcome::Indexed(report) => report,
            IngestOutcome::Skipped { .. } => panic!("expected the document to be indexed"),
        }
    }

    #[test]
    fn invalid_chunking_is_rejected_up_front() {
        let dir = tempdir().unwrap();
        let config = PipelineConfig {
            data_dir: dir.path().to_path_buf(),
            ingestion: IngestionOptions {
                chunk_max_chars: 50,
                chunk_overlap_chars: 50,
            },
            top_k: 5,
        };
        let result = RetrievalPipeline::new(
            config,
            CharacterNgramEmbedder::new(8).unwrap(),
            FileExtractor::new(None),
            RecordingGenerator::default(),
        );
        assert!(matches!(result, Err(IngestError::InvalidConfiguration(_))));
    }

    #[test]
    fn single_page_document_is_chunked_and_searchable() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let pipeline = pipeline_in(&dir, RecordingGenerator::default());

        let text = format!(
            "{}{}{}",
            "Photosynthesis converts light energy into chemical energy. ".repeat(5),
            "The Krebs cycle runs inside the mitochondrial matrix. ".repeat(5),
            "Ribosomes translate messenger RNA into protein chains. ".repeat(3),
        );
        let text = text.chars().take(650).collect::<String>();
        assert_eq!(text.chars().count(), 650);

        let report = indexed(pipeline.ingest_pages(&[page(1, &text)], "biology", "bio.txt")?);
        assert_eq!(report.chunks_added, 3);
        assert_eq!(report.total_chunks, 3);
        assert_eq!(report.revision, 1);

        let stored = pipeline.store().load("biology")?;
        assert_eq!(stored.records[0].chunk, &text[0..300]);
        assert_eq!(stored.records[1].chunk, &text[250..550]);
        assert_eq!(stored.records[2].chunk, &text[500..650]);

        let hits = pipeline.search("Krebs cycle mitochondrial matrix", "biology", 2)?;
        assert!(hits.len() <= 2);
        assert!(hits.windows(2).all(|pair| pair[0].distance <= pair[1].distance));
        assert!(hits.iter().all(|hit| hit.record.subject == "biology"));
        Ok(())
    }

    #[test]
    fn context_is_rendered_nearest_first_with_pages() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let pipeline = pipeline_in(&dir, RecordingGenerator::default());

        pipeline.ingest_pages(
            &[
                page(1, "Newton's second law relates force, mass and acceleration."),
                page(4, "Ohm's law relates voltage, current and resistance."),
            ],
            "physics",
            "laws.pdf",
        )?;

        let context = pipeline.retrieve("Ohm's law voltage current resistance", "physics", 2)?;
        assert_eq!(
            context,
            "Ohm's law relates voltage, current and resistance.\n(Page 4)\n\n\
             Newton's second law relates force, mass and acceleration.\n(Page 1)"
        );
        Ok(())
    }

    #[test]
    fn subjects_are_isolated() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let pipeline = pipeline_in(&dir, RecordingGenerator::default());

        pipeline.ingest_pages(&[page(1, "Integrals measure area.")], "math", "calc.txt")?;
        pipeline.ingest_pages(&[page(1, "Verbs conjugate by tense.")], "french", "grammar.txt")?;

        let hits = pipeline.search("Verbs conjugate by tense.", "math", 5)?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.subject, "math");
        assert_eq!(hits[0].record.file, "calc.txt");
        Ok(())
    }

    #[test]
    fn repeated_ingestion_accumulates() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let pipeline = pipeline_in(&dir, RecordingGenerator::default());

        pipeline.ingest_pages(&[page(1, "Mercury is closest.")], "astro", "a.txt")?;
        let report = indexed(pipeline.ingest_pages(&[page(1, "Mercury is closest.")], "astro", "a.txt")?);

        assert_eq!(report.chunks_added, 1);
        assert_eq!(report.total_chunks, 2);
        assert_eq!(report.revision, 2);
        assert_eq!(pipeline.search("Mercury", "astro", 5)?.len(), 2);
        Ok(())
    }

    #[test]
    fn empty_document_is_skipped_and_subject_stays_unknown() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let pipeline = pipeline_in(&dir, RecordingGenerator::default());

        let outcome = pipeline.ingest_pages(&[page(1, ""), page(2, "")], "empty", "blank.txt")?;
        assert!(matches!(outcome, IngestOutcome::Skipped { .. }));
        assert!(!pipeline.store().index_path("empty").exists());

        let result = pipeline.retrieve("anything", "empty", 5);
        assert!(matches!(
            result,
            Err(SearchError::Store(IngestError::SubjectNotFound(_)))
        ));
        Ok(())
    }

    #[test]
    fn unknown_subject_leaves_no_state() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let pipeline = pipeline_in(&dir, RecordingGenerator::default());

        let result = pipeline.retrieve("what is entropy?", "thermo", 5);
        assert!(matches!(
            result,
            Err(SearchError::Store(IngestError::SubjectNotFound(_)))
        ));
        assert!(!pipeline.store().root().exists());
        assert!(pipeline.subjects()?.is_empty());
        Ok(())
    }

    #[test]
    fn embedder_width_must_match_stored_index() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let pipeline = pipeline_in(&dir, RecordingGenerator::default());
        pipeline.ingest_pages(&[page(1, "Enzymes lower activation energy.")], "chem", "c.txt")?;

        let narrower = RetrievalPipeline::new(
            PipelineConfig {
                data_dir: dir.path().join("embeddings"),
                ..PipelineConfig::default()
            },
            CharacterNgramEmbedder::new(32)?,
            FileExtractor::new(None),
            RecordingGenerator::default(),
        )?;

        assert!(matches!(
            narrower.retrieve("enzymes", "chem", 5),
            Err(SearchError::Store(IngestError::DimensionMismatch {
                expected: 64,
                actual: 32
            }))
        ));
        assert!(matches!(
            narrower.ingest_pages(&[page(1, "Catalysts.")], "chem", "d.txt"),
            Err(IngestError::DimensionMismatch { .. })
        ));
        Ok(())
    }

    #[test]
    fn empty_query_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let pipeline = pipeline_in(&dir, RecordingGenerator::default());
        pipeline.ingest_pages(&[page(1, "Vectors have magnitude.")], "linalg", "v.txt")?;

        assert!(matches!(
            pipeline.retrieve("   ", "linalg", 5),
            Err(SearchError::Request(_))
        ));
        Ok(())
    }

    #[test]
    fn unknown_subject_wins_over_empty_query() {
        let dir = tempdir().unwrap();
        let pipeline = pipeline_in(&dir, RecordingGenerator::default());

        assert!(matches!(
            pipeline.retrieve("", "never-ingested", 5),
            Err(SearchError::Store(IngestError::SubjectNotFound(_)))
        ));
        assert!(!pipeline.store().root().exists());
    }

    #[test]
    fn text_files_are_ingested_with_checksum() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let pipeline = pipeline_in(&dir, RecordingGenerator::default());
        let path = dir.path().join("lecture.txt");
        fs::write(&path, "Supply and demand set the market price.")?;

        let report = indexed(pipeline.ingest_file(&path, "economics", false)?);
        assert_eq!(report.file, "lecture.txt");
        assert_eq!(report.pages, 1);
        assert_eq!(report.checksum, Some(digest_file(&path)?));
        assert_eq!(pipeline.subjects()?, vec!["economics"]);
        Ok(())
    }

    #[test]
    fn unsupported_files_fail_before_touching_the_store() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let pipeline = pipeline_in(&dir, RecordingGenerator::default());
        let path = dir.path().join("slides.pptx");
        fs::write(&path, b"not really slides")?;

        assert!(matches!(
            pipeline.ingest_file(&path, "economics", false),
            Err(IngestError::UnsupportedFormat(_))
        ));
        assert!(!pipeline.store().root().exists());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn ask_forwards_context_and_query() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let pipeline = pipeline_in(&dir, RecordingGenerator::default());
        pipeline.ingest_pages(&[page(3, "The cell membrane is selectively permeable.")], "bio", "m.txt")?;

        let answer = pipeline.ask("What is the cell membrane?", "bio").await?;
        assert_eq!(answer, "answer to What is the cell membrane?");

        let seen = pipeline.generator.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "The cell membrane is selectively permeable.\n(Page 3)");
        assert_eq!(seen[0].1, "What is the cell membrane?");
        Ok(())
    }

    #[tokio::test]
    async fn ask_works_on_current_thread_runtime() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let pipeline = pipeline_in(&dir, RecordingGenerator::default());
        pipeline.ingest_pages(&[page(2, "Osmosis moves water across membranes.")], "bio", "o.txt")?;

        let answer = pipeline.ask("What is osmosis?", "bio").await?;
        assert_eq!(answer, "answer to What is osmosis?");
        assert_eq!(pipeline.generator.seen.lock().unwrap().len(), 1);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn generator_failures_propagate() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let pipeline = pipeline_in(&dir, FailingGenerator);
        pipeline.ingest_pages(&[page(1, "Plate tectonics.")], "geo", "g.txt")?;

        let result = pipeline.ask("tectonics", "geo").await;
        assert!(matches!(result, Err(SearchError::BackendResponse { .. })));
        Ok(())
    }
}
