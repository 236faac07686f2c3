use std::sync::Arc;
use std::time::Instant;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use lopdf::Document;
use tracing::{debug, info, warn};

use crate::config::ManualEntryPolicy;
use crate::error::{AppError, AppResult};
use crate::models::{AssignRequest, ManualEntry, Record, Scalar};
use crate::services::gemini::LanguageModel;
use crate::services::response_parser::parse_records;

pub const EXTRACTION_INSTRUCTION: &str = "From the PDF below, extract all data under the headers 'Assigned To' and 'IMEI'.
Return it in this exact JSON format (no explanation):
[
  { \"name\": \"Narok\", \"imei\": \"355234850433208\" },
  ...
]";

const DATA_URL_PREFIX: &str = "data:application/pdf;base64,";

const LENIENT: GeneralPurposeConfig =
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent);
const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT);
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT);

/// What a request asks the extractor to work from.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionInput {
    /// Base64 text of a PDF.
    Document(String),
    Manual(Vec<ManualEntry>),
}

impl ExtractionInput {
    /// Exactly one of a non-empty document or a non-empty manual list is accepted.
    pub fn from_request(request: &AssignRequest) -> AppResult<Self> {
        let document = request
            .base64pdf
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty());
        let manual = request.imeis.as_ref().filter(|m| !m.is_empty());

        match (document, manual) {
            (Some(document), None) => Ok(ExtractionInput::Document(document.to_string())),
            (None, Some(entries)) => Ok(ExtractionInput::Manual(entries.clone())),
            (Some(_), Some(_)) => Err(AppError::invalid_input(
                "Provide either base64pdf or imeis, not both.",
            )),
            (None, None) => Err(AppError::invalid_input(
                "Missing base64 PDF data or IMEI list.",
            )),
        }
    }
}

pub struct Extractor {
    model: Arc<dyn LanguageModel>,
    manual_policy: ManualEntryPolicy,
}

impl Extractor {
    pub fn new(model: Arc<dyn LanguageModel>, manual_policy: ManualEntryPolicy) -> Self {
        Self {
            model,
            manual_policy,
        }
    }

    pub async fn extract(&self, input: ExtractionInput) -> AppResult<Vec<Record>> {
        match input {
            ExtractionInput::Document(document) => self.extract_from_pdf(&document).await,
            ExtractionInput::Manual(entries) => normalize_manual(entries, &self.manual_policy),
        }
    }

    async fn extract_from_pdf(&self, document: &str) -> AppResult<Vec<Record>> {
        let start = Instant::now();
        let payload = document.strip_prefix(DATA_URL_PREFIX).unwrap_or(document);
        let payload = validate_pdf(payload)?;

        let text = self
            .model
            .extract_text(EXTRACTION_INSTRUCTION, &payload)
            .await?;

        let records = parse_records(&text).map_err(|e| {
            warn!(reason = %e.reason, "Model response could not be parsed");
            AppError::from(e)
        })?;

        info!(
            records = records.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Records extracted from PDF"
        );
        Ok(records)
    }
}

/// Decodes the payload to confirm it is a PDF before spending a model call on it.
///
/// Line breaks, missing padding and the URL-safe alphabet are tolerated. The
/// returned text is the same document in padded standard base64.
fn validate_pdf(payload: &str) -> AppResult<String> {
    let compact: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = STANDARD_LENIENT
        .decode(&compact)
        .or_else(|_| URL_SAFE_LENIENT.decode(&compact))?;
    if bytes.is_empty() {
        return Err(AppError::invalid_input("base64pdf decodes to an empty document"));
    }
    if !bytes.starts_with(b"%PDF") {
        return Err(AppError::invalid_input("base64pdf is not a PDF document"));
    }

    // The model reads the document; a broken xref table is only worth a warning.
    match Document::load_mem(&bytes) {
        Ok(doc) => debug!(pages = doc.get_pages().len(), bytes = bytes.len(), "PDF decoded"),
        Err(e) => warn!("PDF structure validation failed: {}, sending to model anyway", e),
    }
    Ok(STANDARD.encode(&bytes))
}

/// Turns manual entries into records, in order, duplicates kept.
pub fn normalize_manual(
    entries: Vec<ManualEntry>,
    policy: &ManualEntryPolicy,
) -> AppResult<Vec<Record>> {
    if entries.is_empty() {
        return Err(AppError::invalid_input("IMEI list is empty."));
    }

    let records = entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| match entry {
            ManualEntry::Identifier(imei) => {
                let imei = non_blank(Some(imei), "imei", index)?;
                match policy {
                    ManualEntryPolicy::Label(label) => Ok(Record::new(imei, label.clone())),
                    ManualEntryPolicy::Reject => Err(AppError::invalid_input(format!(
                        "imeis[{}] must be an object with 'imei' and 'name'",
                        index
                    ))),
                }
            }
            ManualEntry::Assigned { imei, name } => Ok(Record::new(
                non_blank(imei, "imei", index)?,
                non_blank(name, "name", index)?,
            )),
        })
        .collect::<AppResult<Vec<_>>>()?;

    info!(records = records.len(), "Records taken from manual list");
    Ok(records)
}

fn non_blank(value: Option<Scalar>, field: &str, index: usize) -> AppResult<String> {
    value
        .map(Scalar::into_string)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            AppError::invalid_input(format!("imeis[{}] has a missing or empty '{}'", index, field))
        })
}
