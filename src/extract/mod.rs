//! Reference extractor — mines recording references out of page content.
//!
//! Two complementary passes. The structured-row pass (see [`tables`]) is
//! preferred because table headers disambiguate date, type, and reference
//! columns. The free-text regex pass catches references that only appear in
//! prose ("recorded under Instrument No. 2023000123"). Results are
//! deduplicated by normalized value and ordered most-recent-first, since
//! the orchestrator always wants the newest matching transaction.

pub mod tables;

use chrono::NaiveDate;
use regex::Regex;

use crate::error::ConfigError;
use crate::model::RecordingReference;

pub use tables::{parse_date, scan_tables, RecordRow};

/// Where an extracted reference came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceSource {
    /// A classified table row. Carries date and document type.
    Row,
    /// A regex hit over raw page text.
    Text,
}

/// One recording reference with the context needed to rank and filter it.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedReference {
    pub reference: RecordingReference,
    pub date: Option<NaiveDate>,
    pub doc_type: Option<String>,
    pub source: ReferenceSource,
}

/// Jurisdiction-specific identifier shapes and filters.
///
/// Adapters build one of these per site: what an instrument number looks
/// like there, how book/page pairs are written, and which document types
/// are not conveyances (the per-jurisdiction business rule the core does
/// not guess at).
#[derive(Debug, Clone)]
pub struct JurisdictionRules {
    instrument_patterns: Vec<Regex>,
    book_page_patterns: Vec<Regex>,
    /// Plain "1234/567" shape. Only trusted inside classified reference
    /// cells — in free text it would swallow dates.
    row_book_page: Regex,
    pub min_instrument_digits: usize,
    pub max_instrument_digits: usize,
    exclude_doc_types: Vec<String>,
}

impl JurisdictionRules {
    /// Compile adapter-supplied patterns. Book/page patterns must expose
    /// two capture groups (book, page).
    pub fn new(
        instrument_patterns: &[&str],
        book_page_patterns: &[&str],
        min_instrument_digits: usize,
        max_instrument_digits: usize,
        exclude_doc_types: &[&str],
    ) -> Result<Self, ConfigError> {
        if min_instrument_digits > max_instrument_digits {
            return Err(ConfigError::DigitBounds {
                min: min_instrument_digits,
                max: max_instrument_digits,
            });
        }
        let compile = |p: &&str| {
            Regex::new(p).map_err(|source| ConfigError::InvalidPattern {
                pattern: p.to_string(),
                source,
            })
        };
        Ok(Self {
            instrument_patterns: instrument_patterns
                .iter()
                .map(compile)
                .collect::<Result<_, _>>()?,
            book_page_patterns: book_page_patterns
                .iter()
                .map(compile)
                .collect::<Result<_, _>>()?,
            row_book_page: Regex::new(r"^\s*(\d{1,5})\s*/\s*(\d{1,4})\s*$")
                .expect("row book/page regex is valid"),
            min_instrument_digits,
            max_instrument_digits,
            exclude_doc_types: exclude_doc_types
                .iter()
                .map(|s| s.to_lowercase())
                .collect(),
        })
    }

    /// Shapes common across US county recorders: year-prefixed instrument
    /// numbers and labeled book/page pairs. No doc-type exclusions —
    /// which transactions "count" is an adapter decision.
    pub fn default_rules() -> Self {
        Self::new(
            &[r"\b(?:19|20)\d{2}-?\d{5,9}\b"],
            &[r"(?i)\b(?:book|bk)\.?\s*(\d{1,5})\s*[,/\-]?\s*(?:page|pg)\.?\s*(\d{1,4})\b"],
            7,
            14,
            &[],
        )
        .expect("default rules are valid")
    }

    /// Same shapes as [`default_rules`], excluding the given document types
    /// (case-insensitive substring match, e.g. "affidavit").
    ///
    /// [`default_rules`]: JurisdictionRules::default_rules
    pub fn default_rules_excluding(doc_types: &[&str]) -> Self {
        Self::new(
            &[r"\b(?:19|20)\d{2}-?\d{5,9}\b"],
            &[r"(?i)\b(?:book|bk)\.?\s*(\d{1,5})\s*[,/\-]?\s*(?:page|pg)\.?\s*(\d{1,4})\b"],
            7,
            14,
            doc_types,
        )
        .expect("default rules are valid")
    }

    fn is_excluded(&self, doc_type: Option<&str>) -> bool {
        let Some(doc_type) = doc_type else {
            return false;
        };
        let t = doc_type.to_lowercase();
        self.exclude_doc_types.iter().any(|ex| t.contains(ex))
    }

    /// Plausibility gate for an instrument-number candidate.
    fn plausible_instrument(&self, digits: &str) -> bool {
        let n = digits.len();
        if n < self.min_instrument_digits || n > self.max_instrument_digits {
            return false;
        }
        // Page hit-counters and padding artifacts: when one digit makes up
        // nearly the whole value ("2000000000") it is not an instrument
        // number. Real instrument numbers mix year and serial digits.
        let mut counts = [0usize; 10];
        for b in digits.bytes() {
            counts[(b - b'0') as usize] += 1;
        }
        let dominant = counts.iter().max().copied().unwrap_or(0);
        if dominant * 10 >= n * 8 {
            return false;
        }
        true
    }

    fn instrument_from(&self, text: &str) -> Option<RecordingReference> {
        for re in &self.instrument_patterns {
            for m in re.find_iter(text) {
                let digits: String = m
                    .as_str()
                    .chars()
                    .filter(|c| c.is_ascii_digit())
                    .collect();
                if self.plausible_instrument(&digits) {
                    return Some(RecordingReference::instrument(digits));
                }
            }
        }
        None
    }

    fn book_page_from(&self, text: &str, allow_plain: bool) -> Option<RecordingReference> {
        for re in &self.book_page_patterns {
            if let Some(caps) = re.captures(text) {
                if let (Some(book), Some(page)) = (caps.get(1), caps.get(2)) {
                    return Some(RecordingReference::book_page(
                        book.as_str(),
                        page.as_str(),
                    ));
                }
            }
        }
        if allow_plain {
            if let Some(caps) = self.row_book_page.captures(text) {
                return Some(RecordingReference::book_page(&caps[1], &caps[2]));
            }
        }
        None
    }
}

/// Mine recording references from page text and classified table rows.
///
/// Row hits outrank text hits for the same normalized value. The returned
/// list is deduplicated and ordered by recency: dated entries newest first,
/// undated entries after them in discovery order.
pub fn extract(
    page_text: &str,
    rows: &[RecordRow],
    rules: &JurisdictionRules,
) -> Vec<ExtractedReference> {
    let mut found: Vec<ExtractedReference> = Vec::new();
    let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();

    let mut push = |entry: ExtractedReference, seen: &mut std::collections::HashSet<String>| {
        if seen.insert(entry.reference.normalized_key()) {
            found.push(entry);
        }
    };

    // Pass 1: structured rows, the trustworthy source.
    for row in rows {
        if rules.is_excluded(row.doc_type.as_deref()) {
            tracing::debug!(doc_type = ?row.doc_type, "row excluded by doc-type filter");
            continue;
        }
        let Some(text) = row.reference_text.as_deref() else {
            continue;
        };
        let reference = rules
            .instrument_from(text)
            .or_else(|| rules.book_page_from(text, true));
        if let Some(reference) = reference {
            push(
                ExtractedReference {
                    reference,
                    date: row.date,
                    doc_type: row.doc_type.clone(),
                    source: ReferenceSource::Row,
                },
                &mut seen,
            );
        }
    }

    // Pass 2: free text. No dates, no doc types — just shapes.
    for re in &rules.instrument_patterns {
        for m in re.find_iter(page_text) {
            let digits: String = m
                .as_str()
                .chars()
                .filter(|c| c.is_ascii_digit())
                .collect();
            if !rules.plausible_instrument(&digits) {
                continue;
            }
            push(
                ExtractedReference {
                    reference: RecordingReference::instrument(digits),
                    date: None,
                    doc_type: None,
                    source: ReferenceSource::Text,
                },
                &mut seen,
            );
        }
    }
    for re in &rules.book_page_patterns {
        for caps in re.captures_iter(page_text) {
            if let (Some(book), Some(page)) = (caps.get(1), caps.get(2)) {
                push(
                    ExtractedReference {
                        reference: RecordingReference::book_page(book.as_str(), page.as_str()),
                        date: None,
                        doc_type: None,
                        source: ReferenceSource::Text,
                    },
                    &mut seen,
                );
            }
        }
    }

    // Most recent first; undated entries keep discovery order at the tail.
    found.sort_by(|a, b| match (a.date, b.date) {
        (Some(da), Some(db)) => db.cmp(&da),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });

    found
}
