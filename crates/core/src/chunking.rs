use crate::error::IngestError;
use crate::extractor::PageText;
use crate::models::{ChunkRecord, IngestionOptions};

/// Fixed-size sliding window over characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl ChunkingConfig {
    pub fn new(max_chars: usize, overlap_chars: usize) -> Result<Self, IngestError> {
        if max_chars == 0 {
            return Err(IngestError::InvalidConfiguration(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        if overlap_chars >= max_chars {
            return Err(IngestError::InvalidConfiguration(format!(
                "chunk overlap {overlap_chars} must be smaller than chunk size {max_chars}"
            )));
        }
        Ok(Self {
            max_chars,
            overlap_chars,
        })
    }

    pub fn stride(&self) -> usize {
        self.max_chars - self.overlap_chars
    }
}

impl TryFrom<&IngestionOptions> for ChunkingConfig {
    type Error = IngestError;

    fn try_from(value: &IngestionOptions) -> Result<Self, Self::Error> {
        Self::new(value.chunk_max_chars, value.chunk_overlap_chars)
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        let options = IngestionOptions::default();
        Self {
            max_chars: options.chunk_max_chars,
            overlap_chars: options.chunk_overlap_chars,
        }
    }
}

/// Lazy iterator over the windows of one text. Slices borrow from the input.
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    text: &'a str,
    // Byte offset of every char, plus a trailing `text.len()` sentinel.
    boundaries: Vec<usize>,
    config: ChunkingConfig,
    start: usize,
}

impl Chunks<'_> {
    fn char_count(&self) -> usize {
        self.boundaries.len() - 1
    }
}

impl<'a> Iterator for Chunks<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        let total = self.char_count();
        if self.start >= total {
            return None;
        }

        let end = (self.start + self.config.max_chars).min(total);
        let piece = &self.text[self.boundaries[self.start]..self.boundaries[end]];
        self.start += self.config.stride();
        Some(piece)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.char_count().saturating_sub(self.start);
        let count = remaining.div_ceil(self.config.stride());
        (count, Some(count))
    }
}

impl ExactSizeIterator for Chunks<'_> {}

pub fn chunk_text(text: &str, config: ChunkingConfig) -> Chunks<'_> {
    let mut boundaries = text
        .char_indices()
        .map(|(offset, _)| offset)
        .collect::<Vec<_>>();
    boundaries.push(text.len());

    Chunks {
        text,
        boundaries,
        config,
        start: 0,
    }
}

pub fn build_chunk_records(
    pages: &[PageText],
    subject: &str,
    file: &str,
    config: ChunkingConfig,
) -> Vec<ChunkRecord> {
    pages
        .iter()
        .flat_map(|page| {
            chunk_text(&page.text, config).map(move |chunk| ChunkRecord {
                subject: subject.to_string(),
                file: file.to_string(),
                page: page.number,
                chunk: chunk.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(len: usize) -> String {
        (0..len)
            .map(|index| char::from(b'a' + (index % 26) as u8))
            .collect()
    }

    #[test]
    fn default_config_is_300_by_50() {
        let config = ChunkingConfig::default();
        assert_eq!(config.max_chars, 300);
        assert_eq!(config.overlap_chars, 50);
        assert_eq!(config.stride(), 250);
    }

    #[test]
    fn six_hundred_fifty_chars_make_three_windows() {
        let text = sample(650);
        let chunks = chunk_text(&text, ChunkingConfig::default()).collect::<Vec<_>>();

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], &text[0..300]);
        assert_eq!(chunks[1], &text[250..550]);
        assert_eq!(chunks[2], &text[500..650]);
    }

    #[test]
    fn windows_cover_text_without_gaps() {
        for (len, size, overlap) in [(1, 3, 0), (10, 3, 1), (99, 10, 9), (1000, 300, 50)] {
            let text = sample(len);
            let config = ChunkingConfig::new(size, overlap).unwrap();
            let chunks = chunk_text(&text, config).collect::<Vec<_>>();

            let mut covered = 0;
            for (index, chunk) in chunks.iter().enumerate() {
                let start = index * config.stride();
                assert!(start <= covered, "gap before chunk {index}");
                assert_eq!(*chunk, &text[start..(start + size).min(len)]);
                covered = start + chunk.len();
            }
            assert!(covered >= len);
        }
    }

    #[test]
    fn empty_text_yields_nothing() {
        assert_eq!(chunk_text("", ChunkingConfig::default()).count(), 0);
    }

    #[test]
    fn iterator_is_restartable() {
        let text = sample(700);
        let chunks = chunk_text(&text, ChunkingConfig::default());
        let first = chunks.clone().collect::<Vec<_>>();
        let second = chunks.collect::<Vec<_>>();
        assert_eq!(first, second);
    }

    #[test]
    fn size_hint_matches_count() {
        let text = sample(650);
        let chunks = chunk_text(&text, ChunkingConfig::default());
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn multibyte_text_is_split_on_characters() {
        let text = "éàü".repeat(5);
        let config = ChunkingConfig::new(4, 1).unwrap();
        let chunks = chunk_text(&text, config).collect::<Vec<_>>();

        assert_eq!(chunks[0].chars().count(), 4);
        assert_eq!(chunks[0], "éàüé");
        assert_eq!(chunks[1], "éàüé");
        assert_eq!(chunks.len(), 5);
    }

    #[test]
    fn overlap_not_smaller_than_size_is_rejected() {
        assert!(matches!(
            ChunkingConfig::new(50, 50),
            Err(IngestError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            ChunkingConfig::new(10, 20),
            Err(IngestError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            ChunkingConfig::new(0, 0),
            Err(IngestError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn records_carry_page_and_file() {
        let pages = vec![
            PageText {
                number: 1,
                text: sample(400),
            },
            PageText {
                number: 2,
                text: String::new(),
            },
            PageText {
                number: 3,
                text: "short".to_string(),
            },
        ];

        let records = build_chunk_records(&pages, "biology", "cells.pdf", ChunkingConfig::default());

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].page, 1);
        assert_eq!(records[1].page, 1);
        assert_eq!(records[2].page, 3);
        assert_eq!(records[2].chunk, "short");
        assert!(records
            .iter()
            .all(|record| record.subject == "biology" && record.file == "cells.pdf"));
    }
}
