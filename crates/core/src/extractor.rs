use crate::error::IngestError;
use crate::runtime::run_blocking;
use base64::{engine::general_purpose::STANDARD, Engine};
use lopdf::Document;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

/// Document kinds the extractor knows how to read, resolved once from the file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Txt,
    Image,
}

impl DocumentFormat {
    pub fn from_path(path: &Path) -> Result<Self, IngestError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "pdf" => Ok(Self::Pdf),
            "docx" => Ok(Self::Docx),
            "txt" => Ok(Self::Txt),
            "png" | "jpg" | "jpeg" => Ok(Self::Image),
            "" => Err(IngestError::UnsupportedFormat(format!(
                "no file extension: {}",
                path.display()
            ))),
            other => Err(IngestError::UnsupportedFormat(format!(".{other}"))),
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Docx => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
            Self::Txt => "text/plain",
            Self::Image => "image/*",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct LlmOcrRequest {
    document_base64: String,
    mime_type: &'static str,
    source_path: String,
    handwritten: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct LlmOcrResponse {
    pages: Option<Vec<LlmOcrPage>>,
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct LlmOcrPage {
    #[serde(default)]
    page: Option<u32>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OcrEndpointConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
}

impl OcrEndpointConfig {
    /// Reads `LLM_OCR_ENDPOINT` and `LLM_OCR_API_KEY`; `None` when no endpoint is set.
    pub fn from_env() -> Option<Self> {
        let endpoint = std::env::var("LLM_OCR_ENDPOINT").ok()?;
        let endpoint = endpoint.trim().to_string();
        if endpoint.is_empty() {
            return None;
        }

        let api_key = std::env::var("LLM_OCR_API_KEY")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|key| !key.is_empty());

        Some(Self { endpoint, api_key })
    }
}

/// Turns a file into page-numbered text.
pub trait DocumentExtractor {
    fn extract_pages(
        &self,
        path: &Path,
        format: DocumentFormat,
        handwritten: bool,
    ) -> Result<Vec<PageText>, IngestError>;
}

/// Native text extraction for PDF and plain text, with a multimodal OCR
/// endpoint for scans, handwriting, images and Word documents.
#[derive(Debug, Clone, Default)]
pub struct FileExtractor {
    ocr: Option<OcrEndpointConfig>,
}

impl FileExtractor {
    pub fn new(ocr: Option<OcrEndpointConfig>) -> Self {
        Self { ocr }
    }

    pub fn from_env() -> Self {
        Self::new(OcrEndpointConfig::from_env())
    }

    fn ocr_or_unsupported(
        &self,
        path: &Path,
        format: DocumentFormat,
        handwritten: bool,
    ) -> Result<Vec<PageText>, IngestError> {
        match &self.ocr {
            Some(config) => extract_with_llm_ocr(config, path, format, handwritten),
            None => Err(IngestError::UnsupportedFormat(format!(
                "{format:?} extraction needs LLM_OCR_ENDPOINT: {}",
                path.display()
            ))),
        }
    }
}

impl DocumentExtractor for FileExtractor {
    fn extract_pages(
        &self,
        path: &Path,
        format: DocumentFormat,
        handwritten: bool,
    ) -> Result<Vec<PageText>, IngestError> {
        match format {
            DocumentFormat::Txt => extract_plain_text(path),
            DocumentFormat::Pdf if handwritten => {
                info!(path = %path.display(), "handwritten pdf, using OCR");
                self.ocr_or_unsupported(path, format, handwritten)
            }
            DocumentFormat::Pdf => match extract_pdf_text(path) {
                Ok(pages) => Ok(pages),
                Err(IngestError::PdfParse(parse_error)) => match &self.ocr {
                    None => Err(IngestError::PdfParse(parse_error)),
                    Some(config) => {
                        info!(path = %path.display(), "no text layer, falling back to OCR");
                        extract_with_llm_ocr(config, path, format, handwritten).map_err(
                            |ocr_error| {
                                IngestError::PdfParse(format!(
                                    "{parse_error}; multimodal OCR fallback failed: {ocr_error}"
                                ))
                            },
                        )
                    }
                },
                Err(error) => Err(error),
            },
            DocumentFormat::Docx | DocumentFormat::Image => {
                self.ocr_or_unsupported(path, format, handwritten)
            }
        }
    }
}

fn extract_plain_text(path: &Path) -> Result<Vec<PageText>, IngestError> {
    let text = std::fs::read_to_string(path)?;
    Ok(vec![PageText { number: 1, text }])
}

fn extract_pdf_text(path: &Path) -> Result<Vec<PageText>, IngestError> {
    let document = Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

    let mut pages = Vec::new();
    for (page_no, _page_id) in document.get_pages() {
        let text = document
            .extract_text(&[page_no])
            .map_err(|error| IngestError::PdfParse(error.to_string()))?;

        if !text.trim().is_empty() {
            pages.push(PageText {
                number: page_no,
                text,
            });
        }
    }

    if pages.is_empty() {
        return Err(IngestError::PdfParse(format!(
            "pdf had no readable page text: {}",
            path.display()
        )));
    }

    Ok(pages)
}

fn extract_with_llm_ocr(
    config: &OcrEndpointConfig,
    path: &Path,
    format: DocumentFormat,
    handwritten: bool,
) -> Result<Vec<PageText>, IngestError> {
    run_blocking(|| extract_with_llm_ocr_blocking(config, path, format, handwritten))
}

fn extract_with_llm_ocr_blocking(
    config: &OcrEndpointConfig,
    path: &Path,
    format: DocumentFormat,
    handwritten: bool,
) -> Result<Vec<PageText>, IngestError> {
    let document = std::fs::read(path)?;
    let payload = LlmOcrRequest {
        document_base64: STANDARD.encode(document),
        mime_type: format.mime_type(),
        source_path: path.to_string_lossy().to_string(),
        handwritten,
    };

    let mut request = Client::new()
        .post(&config.endpoint)
        .header("content-type", "application/json")
        .json(&payload);

    if let Some(api_key) = &config.api_key {
        request = request.bearer_auth(api_key);
    }

    debug!(endpoint = %config.endpoint, ?format, "multimodal OCR request");
    let response = request.send()?;

    if !response.status().is_success() {
        return Err(IngestError::OcrFailed(format!(
            "multimodal OCR request to {} returned {}",
            config.endpoint,
            response.status()
        )));
    }

    let payload: LlmOcrResponse = response.json()?;
    payload_to_pages(&payload, path)
}

fn payload_to_pages(payload: &LlmOcrResponse, path: &Path) -> Result<Vec<PageText>, IngestError> {
    if let Some(listed) = &payload.pages {
        let listed = listed
            .iter()
            .filter_map(|page| {
                let text = page.text.as_deref().map(str::trim)?;
                if text.is_empty() {
                    return None;
                }
                Some(PageText {
                    number: page.page.unwrap_or(1),
                    text: text.to_string(),
                })
            })
            .collect::<Vec<_>>();

        if !listed.is_empty() {
            return Ok(listed);
        }
    }

    if let Some(raw_text) = &payload.text {
        let pages = raw_text
            .split('\u{000c}')
            .enumerate()
            .filter_map(|(index, chunk)| {
                let normalized = chunk.trim();
                if normalized.is_empty() {
                    None
                } else {
                    Some(PageText {
                        number: (index + 1) as u32,
                        text: normalized.to_string(),
                    })
                }
            })
            .collect::<Vec<_>>();

        if !pages.is_empty() {
            return Ok(pages);
        }
    }

    Err(IngestError::OcrFailed(format!(
        "multimodal OCR response was empty for {}",
        path.display()
    )))
}
