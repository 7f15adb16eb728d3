//! Per-subject persistence. Each subject owns two files in the data directory,
//! `{subject}_index.json` and `{subject}_meta.json`, which are always written
//! and read as a pair.
//!
//! There is no locking: one writer per subject at a time. Files are replaced by
//! rename so readers never see a partial write, and every save bumps the
//! index revision.

use crate::error::IngestError;
use crate::index::FlatL2Index;
use crate::models::ChunkRecord;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::info;
use walkdir::WalkDir;

const INDEX_SUFFIX: &str = "_index.json";
const META_SUFFIX: &str = "_meta.json";

const SUBJECT_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9 ._-]{0,127}$";

static SUBJECT_RE: OnceLock<Regex> = OnceLock::new();

fn subject_re() -> Result<&'static Regex, IngestError> {
    if let Some(re) = SUBJECT_RE.get() {
        return Ok(re);
    }
    let compiled = Regex::new(SUBJECT_PATTERN)?;
    Ok(SUBJECT_RE.get_or_init(|| compiled))
}

pub fn validate_subject(subject: &str) -> Result<(), IngestError> {
    if subject_re()?.is_match(subject) && !subject.contains("..") {
        Ok(())
    } else {
        Err(IngestError::InvalidSubject(subject.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedIndex {
    model_id: String,
    revision: u64,
    updated_at: DateTime<Utc>,
    index: FlatL2Index,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedMetadata {
    revision: u64,
    records: Vec<ChunkRecord>,
}

/// A subject's vector index together with its parallel chunk records.
#[derive(Debug, Clone)]
pub struct SubjectIndex {
    pub subject: String,
    pub model_id: String,
    pub revision: u64,
    pub index: FlatL2Index,
    pub records: Vec<ChunkRecord>,
}

impl SubjectIndex {
    pub fn new(
        subject: impl Into<String>,
        model_id: impl Into<String>,
        dimension: usize,
    ) -> Result<Self, IngestError> {
        Ok(Self {
            subject: subject.into(),
            model_id: model_id.into(),
            revision: 0,
            index: FlatL2Index::build(dimension)?,
            records: Vec::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Appends vectors and their records at the same positions.
    pub fn append(
        &mut self,
        vectors: &[Vec<f32>],
        records: Vec<ChunkRecord>,
    ) -> Result<(), IngestError> {
        if vectors.len() != records.len() {
            return Err(IngestError::Embedding(format!(
                "embedding count {} doesn't match chunk count {}",
                vectors.len(),
                records.len()
            )));
        }

        self.index.add(vectors)?;
        self.records.extend(records);
        Ok(())
    }

    pub fn record(&self, position: usize) -> Option<&ChunkRecord> {
        self.records.get(position)
    }
}

#[derive(Debug, Clone)]
pub struct SubjectStore {
    root: PathBuf,
}

impl SubjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index_path(&self, subject: &str) -> PathBuf {
        self.root.join(format!("{subject}{INDEX_SUFFIX}"))
    }

    pub fn metadata_path(&self, subject: &str) -> PathBuf {
        self.root.join(format!("{subject}{META_SUFFIX}"))
    }

    pub fn load(&self, subject: &str) -> Result<SubjectIndex, IngestError> {
        validate_subject(subject)?;
        let index_path = self.index_path(subject);
        let metadata_path = self.metadata_path(subject);

        let missing = |details: &str| IngestError::MissingIndexOrMetadata {
            subject: subject.to_string(),
            details: details.to_string(),
        };

        match (index_path.is_file(), metadata_path.is_file()) {
            (false, false) => return Err(IngestError::SubjectNotFound(subject.to_string())),
            (true, false) => return Err(missing("metadata file is missing")),
            (false, true) => return Err(missing("index file is missing")),
            (true, true) => {}
        }

        let persisted: PersistedIndex = serde_json::from_slice(&fs::read(&index_path)?)?;
        let metadata: PersistedMetadata = serde_json::from_slice(&fs::read(&metadata_path)?)?;

        persisted.index.validate().map_err(|details| missing(&details))?;
        if persisted.index.len() != metadata.records.len() {
            return Err(missing(&format!(
                "index holds {} vectors but metadata holds {} records",
                persisted.index.len(),
                metadata.records.len()
            )));
        }
        if persisted.revision != metadata.revision {
            return Err(missing(&format!(
                "index revision {} does not match metadata revision {}",
                persisted.revision, metadata.revision
            )));
        }

        Ok(SubjectIndex {
            subject: subject.to_string(),
            model_id: persisted.model_id,
            revision: persisted.revision,
            index: persisted.index,
            records: metadata.records,
        })
    }

    /// Loads the subject, or starts an empty one when nothing is persisted yet.
    pub fn load_or_create(
        &self,
        subject: &str,
        model_id: &str,
        dimension: usize,
    ) -> Result<SubjectIndex, IngestError> {
        match self.load(subject) {
            Ok(existing) => Ok(existing),
            Err(IngestError::SubjectNotFound(_)) => SubjectIndex::new(subject, model_id, dimension),
            Err(error) => Err(error),
        }
    }

    /// Writes both files and returns the new revision.
    pub fn save(&self, subject: &mut SubjectIndex) -> Result<u64, IngestError> {
        validate_subject(&subject.subject)?;
        fs::create_dir_all(&self.root)?;

        let revision = subject.revision + 1;
        let persisted = PersistedIndex {
            model_id: subject.model_id.clone(),
            revision,
            updated_at: Utc::now(),
            index: subject.index.clone(),
        };
        let metadata = PersistedMetadata {
            revision,
            records: subject.records.clone(),
        };

        write_replace(&self.index_path(&subject.subject), &serde_json::to_vec(&persisted)?)?;
        write_replace(
            &self.metadata_path(&subject.subject),
            &serde_json::to_vec_pretty(&metadata)?,
        )?;

        subject.revision = revision;
        info!(
            subject = %subject.subject,
            revision,
            chunks = subject.len(),
            "subject persisted"
        );
        Ok(revision)
    }

    /// Subjects with a persisted index, sorted by name.
    pub fn list_subjects(&self) -> Result<Vec<String>, IngestError> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }

        let mut subjects = BTreeSet::new();
        for entry in WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|item| item.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }

            let subject = entry
                .file_name()
                .to_str()
                .and_then(|name| name.strip_suffix(INDEX_SUFFIX));

            if let Some(subject) = subject {
                if validate_subject(subject).is_ok() {
                    subjects.insert(subject.to_string());
                }
            }
        }

        Ok(subjects.into_iter().collect())
    }
}

fn write_replace(path: &Path, bytes: &[u8]) -> Result<(), IngestError> {
    let mut staging = path.as_os_str().to_owned();
    staging.push(".tmp");
    let staging = PathBuf::from(staging);

    fs::write(&staging, bytes)?;
    fs::rename(&staging, path)?;
    Ok(())
}
