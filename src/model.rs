//! Data model for one retrieval run.
//!
//! Everything here is JSON-serializable with a camelCase surface so the
//! terminal [`RetrievalResult`] can cross process boundaries unchanged.
//! Document bytes serialize as base64.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::ErrorInfo;

/// The fixed pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    ResolveIdentifier,
    LocateSourceRecord,
    ExtractReference,
    LocateTargetRecord,
    CaptureDocument,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: [Stage; 5] = [
        Stage::ResolveIdentifier,
        Stage::LocateSourceRecord,
        Stage::ExtractReference,
        Stage::LocateTargetRecord,
        Stage::CaptureDocument,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::ResolveIdentifier => "resolveIdentifier",
            Stage::LocateSourceRecord => "locateSourceRecord",
            Stage::ExtractReference => "extractReference",
            Stage::LocateTargetRecord => "locateTargetRecord",
            Stage::CaptureDocument => "captureDocument",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Identifiers the caller may already know, letting an adapter skip work.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KnownIdentifiers {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parcel_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instrument_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub book_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<String>,
}

/// Immutable input: one street address, one target document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalRequest {
    pub address: String,
    #[serde(default)]
    pub known: KnownIdentifiers,
}

impl RetrievalRequest {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            known: KnownIdentifiers::default(),
        }
    }
}

/// A recording reference: how the recorder's office indexes one document.
///
/// Exactly one variant — modern jurisdictions issue instrument numbers,
/// older recordings are indexed by book and page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordingReference {
    #[serde(rename_all = "camelCase")]
    Instrument { instrument_number: String },
    #[serde(rename_all = "camelCase")]
    BookPage {
        book_number: String,
        page_number: String,
    },
}

impl RecordingReference {
    pub fn instrument(number: impl Into<String>) -> Self {
        RecordingReference::Instrument {
            instrument_number: number.into(),
        }
    }

    pub fn book_page(book: impl Into<String>, page: impl Into<String>) -> Self {
        RecordingReference::BookPage {
            book_number: book.into(),
            page_number: page.into(),
        }
    }

    /// Canonical deduplication key: separators stripped, leading zeros
    /// normalized away, case-folded.
    pub fn normalized_key(&self) -> String {
        fn norm(s: &str) -> String {
            let digits: String = s
                .chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .collect::<String>()
                .to_ascii_uppercase();
            let trimmed = digits.trim_start_matches('0');
            if trimmed.is_empty() {
                "0".to_string()
            } else {
                trimmed.to_string()
            }
        }
        match self {
            RecordingReference::Instrument { instrument_number } => {
                format!("i:{}", norm(instrument_number))
            }
            RecordingReference::BookPage {
                book_number,
                page_number,
            } => format!("bp:{}:{}", norm(book_number), norm(page_number)),
        }
    }
}

impl std::fmt::Display for RecordingReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordingReference::Instrument { instrument_number } => {
                write!(f, "instrument {instrument_number}")
            }
            RecordingReference::BookPage {
                book_number,
                page_number,
            } => write!(f, "book {book_number} page {page_number}"),
        }
    }
}

/// Expected binary type of the captured document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Pdf,
    Tiff,
    Png,
    Jpeg,
}

impl DocumentKind {
    /// Leading-byte signatures for this kind. TIFF has two byte orders.
    pub fn signatures(&self) -> &'static [&'static [u8]] {
        match self {
            DocumentKind::Pdf => &[b"%PDF"],
            DocumentKind::Tiff => &[b"II*\x00", b"MM\x00*"],
            DocumentKind::Png => &[b"\x89PNG\r\n\x1a\n"],
            DocumentKind::Jpeg => &[b"\xff\xd8\xff"],
        }
    }

    /// Whether `bytes` starts with one of this kind's magic markers.
    pub fn matches_signature(&self, bytes: &[u8]) -> bool {
        self.signatures().iter().any(|sig| bytes.starts_with(sig))
    }

    /// Content-type prefix used when filtering intercepted responses.
    pub fn mime_prefix(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => "application/pdf",
            DocumentKind::Tiff => "image/tiff",
            DocumentKind::Png => "image/png",
            DocumentKind::Jpeg => "image/jpeg",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => "pdf",
            DocumentKind::Tiff => "tif",
            DocumentKind::Png => "png",
            DocumentKind::Jpeg => "jpg",
        }
    }
}

fn serialize_base64<S: serde::Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
}

fn deserialize_base64<'de, D: serde::Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(d)?;
    base64::engine::general_purpose::STANDARD
        .decode(encoded.as_bytes())
        .map_err(serde::de::Error::custom)
}

/// The captured document. Constructed only after the signature check passes;
/// the core never writes it anywhere — storage is the caller's decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedDocument {
    #[serde(
        serialize_with = "serialize_base64",
        deserialize_with = "deserialize_base64"
    )]
    pub bytes: Vec<u8>,
    pub byte_length: usize,
    pub mime_signature_valid: bool,
    pub source_url: String,
    pub kind: DocumentKind,
    /// Suggested filename, derived from the recording reference once the
    /// pipeline knows it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl CapturedDocument {
    /// Filename suggestion for callers that persist the bytes.
    pub fn suggested_filename(&self, reference: Option<&RecordingReference>) -> String {
        let stem = match reference {
            Some(RecordingReference::Instrument { instrument_number }) => {
                format!("deed-{instrument_number}")
            }
            Some(RecordingReference::BookPage {
                book_number,
                page_number,
            }) => format!("deed-bk{book_number}-pg{page_number}"),
            None => "deed".to_string(),
        };
        format!("{stem}.{}", self.kind.extension())
    }
}

/// One entry in the append-only audit trail of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageResult {
    pub stage: Stage,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    #[serde(default)]
    pub skipped: bool,
    pub elapsed_ms: u64,
}

impl StageResult {
    pub fn skipped(stage: Stage, reason: &str) -> Self {
        Self {
            stage,
            success: true,
            data: Some(serde_json::json!({ "reason": reason })),
            error: None,
            skipped: true,
            elapsed_ms: 0,
        }
    }

    pub fn succeeded(stage: Stage, data: Option<serde_json::Value>, elapsed_ms: u64) -> Self {
        Self {
            stage,
            success: true,
            data,
            error: None,
            skipped: false,
            elapsed_ms,
        }
    }

    pub fn failed(stage: Stage, error: ErrorInfo, elapsed_ms: u64) -> Self {
        Self {
            stage,
            success: false,
            data: None,
            error: Some(error),
            skipped: false,
            elapsed_ms,
        }
    }
}

/// Terminal, immutable aggregate for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalResult {
    pub success: bool,
    pub steps: Vec<StageResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<CapturedDocument>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names_are_camel_case() {
        assert_eq!(Stage::ResolveIdentifier.name(), "resolveIdentifier");
        let json = serde_json::to_string(&Stage::CaptureDocument).unwrap();
        assert_eq!(json, "\"captureDocument\"");
    }

    #[test]
    fn test_reference_serializes_as_one_variant() {
        let inst = RecordingReference::instrument("2023000123");
        let json = serde_json::to_value(&inst).unwrap();
        assert_eq!(json["instrumentNumber"], "2023000123");
        assert!(json.get("bookNumber").is_none());

        let bp = RecordingReference::book_page("1234", "567");
        let json = serde_json::to_value(&bp).unwrap();
        assert_eq!(json["bookNumber"], "1234");
        assert_eq!(json["pageNumber"], "567");
    }

    #[test]
    fn test_normalized_key_strips_separators_and_zeros() {
        let a = RecordingReference::instrument("2023-000123");
        let b = RecordingReference::instrument("2023000123");
        assert_eq!(a.normalized_key(), b.normalized_key());

        let c = RecordingReference::book_page("0042", "007");
        let d = RecordingReference::book_page("42", "7");
        assert_eq!(c.normalized_key(), d.normalized_key());

        // Book/page and instrument never collide even on equal digits
        let e = RecordingReference::instrument("427");
        assert_ne!(c.normalized_key(), e.normalized_key());
    }

    #[test]
    fn test_signature_matching() {
        assert!(DocumentKind::Pdf.matches_signature(b"%PDF-1.7 rest"));
        assert!(!DocumentKind::Pdf.matches_signature(b"<html><body>"));
        assert!(DocumentKind::Tiff.matches_signature(b"II*\x00data"));
        assert!(DocumentKind::Tiff.matches_signature(b"MM\x00*data"));
        assert!(!DocumentKind::Tiff.matches_signature(b"%PDF-1.7"));
        assert!(DocumentKind::Jpeg.matches_signature(&[0xff, 0xd8, 0xff, 0xe0]));
        assert!(!DocumentKind::Png.matches_signature(b""));
    }

    #[test]
    fn test_document_bytes_round_trip_base64() {
        let doc = CapturedDocument {
            bytes: b"%PDF-1.4 tiny".to_vec(),
            byte_length: 13,
            mime_signature_valid: true,
            source_url: "https://recorder.example.gov/doc/1".to_string(),
            kind: DocumentKind::Pdf,
            filename: None,
        };
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["bytes"], "JVBERi0xLjQgdGlueQ==");
        assert_eq!(json["byteLength"], 13);
        let back: CapturedDocument = serde_json::from_value(json).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn test_suggested_filename() {
        let doc = CapturedDocument {
            bytes: b"%PDF".to_vec(),
            byte_length: 4,
            mime_signature_valid: true,
            source_url: String::new(),
            kind: DocumentKind::Pdf,
            filename: None,
        };
        let r = RecordingReference::instrument("2023000123");
        assert_eq!(doc.suggested_filename(Some(&r)), "deed-2023000123.pdf");
        assert_eq!(doc.suggested_filename(None), "deed.pdf");
    }

    #[test]
    fn test_request_deserializes_without_known_block() {
        let req: RetrievalRequest =
            serde_json::from_str(r#"{"address":"123 Main St, Springfield"}"#).unwrap();
        assert_eq!(req.address, "123 Main St, Springfield");
        assert_eq!(req.known, KnownIdentifiers::default());
    }
}
