//! Structured-row scanning over tabular DOM content.
//!
//! Assessor and recorder sites list transactions in HTML tables. Rows are
//! worth more than free text because the header tells us which column is
//! the date, which is the document type, and which is the reference —
//! disambiguation a regex over raw text cannot do.

use chrono::NaiveDate;
use scraper::{Html, Selector};

/// One transaction row pulled from a results table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordRow {
    /// Raw cell texts, in document order.
    pub cells: Vec<String>,
    /// Recording/transaction date, when a column carried one.
    pub date: Option<NaiveDate>,
    /// Document type label ("Warranty Deed", "Tax Affidavit", ...).
    pub doc_type: Option<String>,
    /// The cell text most likely to hold the recording reference.
    pub reference_text: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Column {
    Date,
    DocType,
    Reference,
    Other,
}

fn classify_header(text: &str) -> Column {
    let t = text.to_lowercase();
    if t.contains("date") || t.contains("recorded") || t.contains("filed") {
        Column::Date
    } else if t.contains("instrument")
        || t.contains("document #")
        || t.contains("doc #")
        || t.contains("doc no")
        || t.contains("reference")
        || t.contains("book")
        || t.contains("page")
        || t.contains("number")
    {
        Column::Reference
    } else if t.contains("type") || t.contains("document") || t.contains("description") {
        Column::DocType
    } else {
        Column::Other
    }
}

/// Parse the date formats county sites actually emit.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    for fmt in ["%m/%d/%Y", "%m-%d-%Y", "%Y-%m-%d", "%m/%d/%y", "%B %d, %Y", "%b %d, %Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }
    None
}

fn cell_text(cell: scraper::ElementRef<'_>) -> String {
    cell.text().collect::<String>().trim().to_string()
}

/// Scan every table in `html` into classified [`RecordRow`]s.
///
/// Tables with a header row get header-driven column classification.
/// Headerless tables fall back to per-cell heuristics: a parseable date is
/// the date, a digit-heavy cell is the reference, a wordy cell is the type.
pub fn scan_tables(html: &str) -> Vec<RecordRow> {
    let document = Html::parse_document(html);
    let table_sel = Selector::parse("table").expect("table selector is valid");
    let tr_sel = Selector::parse("tr").expect("tr selector is valid");
    let th_sel = Selector::parse("th").expect("th selector is valid");
    let td_sel = Selector::parse("td").expect("td selector is valid");

    let mut rows = Vec::new();

    for table in document.select(&table_sel) {
        let mut columns: Option<Vec<Column>> = None;

        for tr in table.select(&tr_sel) {
            let headers: Vec<String> = tr.select(&th_sel).map(cell_text).collect();
            if !headers.is_empty() {
                columns = Some(headers.iter().map(|h| classify_header(h)).collect());
                continue;
            }

            let cells: Vec<String> = tr.select(&td_sel).map(cell_text).collect();
            if cells.is_empty() {
                continue;
            }

            let row = match &columns {
                Some(cols) => classify_by_header(&cells, cols),
                None => classify_by_heuristic(&cells),
            };
            rows.push(row);
        }
    }

    rows
}

fn classify_by_header(cells: &[String], columns: &[Column]) -> RecordRow {
    let mut row = RecordRow {
        cells: cells.to_vec(),
        ..Default::default()
    };
    for (i, cell) in cells.iter().enumerate() {
        match columns.get(i).copied().unwrap_or(Column::Other) {
            Column::Date => {
                if row.date.is_none() {
                    row.date = parse_date(cell);
                }
            }
            Column::DocType => {
                if row.doc_type.is_none() && !cell.is_empty() {
                    row.doc_type = Some(cell.clone());
                }
            }
            Column::Reference => {
                // Book and page may arrive as two classified columns;
                // join them so the pattern pass sees both numbers.
                match &mut row.reference_text {
                    Some(existing) if !cell.is_empty() => {
                        existing.push('/');
                        existing.push_str(cell);
                    }
                    None if !cell.is_empty() => row.reference_text = Some(cell.clone()),
                    _ => {}
                }
            }
            Column::Other => {}
        }
    }
    row
}

fn digit_share(s: &str) -> f32 {
    if s.is_empty() {
        return 0.0;
    }
    let digits = s.chars().filter(|c| c.is_ascii_digit()).count();
    digits as f32 / s.chars().count() as f32
}

fn classify_by_heuristic(cells: &[String]) -> RecordRow {
    let mut row = RecordRow {
        cells: cells.to_vec(),
        ..Default::default()
    };
    for cell in cells {
        if cell.is_empty() {
            continue;
        }
        if row.date.is_none() {
            if let Some(d) = parse_date(cell) {
                row.date = Some(d);
                continue;
            }
        }
        if row.reference_text.is_none() && digit_share(cell) > 0.6 {
            row.reference_text = Some(cell.clone());
            continue;
        }
        if row.doc_type.is_none() && digit_share(cell) < 0.3 {
            row.doc_type = Some(cell.clone());
        }
    }
    row
}
