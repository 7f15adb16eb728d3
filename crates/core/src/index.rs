use crate::error::IngestError;
use crate::models::SearchHit;
use serde::{Deserialize, Serialize};

/// Exhaustive squared-L2 index. Vectors are stored row-major in one buffer and
/// addressed by insertion position; there is no removal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatL2Index {
    dimension: usize,
    data: Vec<f32>,
}

impl FlatL2Index {
    pub fn build(dimension: usize) -> Result<Self, IngestError> {
        if dimension == 0 {
            return Err(IngestError::InvalidConfiguration(
                "index dimension must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            dimension,
            data: Vec::new(),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.data.len() / self.dimension
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        let start = position.checked_mul(self.dimension)?;
        self.data.get(start..start + self.dimension)
    }

    /// Appends in order. All vectors are checked first, so a rejected batch
    /// leaves the index unchanged.
    pub fn add(&mut self, vectors: &[Vec<f32>]) -> Result<(), IngestError> {
        if let Some(bad) = vectors.iter().find(|vector| vector.len() != self.dimension) {
            return Err(IngestError::DimensionMismatch {
                expected: self.dimension,
                actual: bad.len(),
            });
        }

        self.data.reserve(vectors.len() * self.dimension);
        for vector in vectors {
            self.data.extend_from_slice(vector);
        }
        Ok(())
    }

    /// Up to `top_k` nearest vectors by ascending squared distance. Equal
    /// distances keep ascending insertion order.
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchHit>, IngestError> {
        if query.len() != self.dimension {
            return Err(IngestError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if top_k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits = self
            .data
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(position, vector)| SearchHit {
                distance: squared_l2(query, vector),
                position,
            })
            .collect::<Vec<_>>();

        hits.sort_by(|left, right| {
            left.distance
                .total_cmp(&right.distance)
                .then(left.position.cmp(&right.position))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.dimension == 0 {
            return Err("index dimension is zero".to_string());
        }
        if self.data.len() % self.dimension != 0 {
            return Err(format!(
                "index buffer of {} floats is not a multiple of dimension {}",
                self.data.len(),
                self.dimension
            ));
        }
        Ok(())
    }
}

fn squared_l2(left: &[f32], right: &[f32]) -> f32 {
    left.iter()
        .zip(right)
        .map(|(a, b)| {
            let delta = a - b;
            delta * delta
        })
        .sum()
}
