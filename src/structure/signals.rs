//! Signal extraction from a table-extraction record.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::LazyLock;

/// Header or field-name fragments that mark a date column.
const DATE_MARKERS: [&str; 3] = ["date", "ημερ", "дат"];

static RE_ISO_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9]{4}[-/.][0-9]{1,2}[-/.][0-9]{1,2}").unwrap());
static RE_DMY_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9]{1,2}[-/.][0-9]{1,2}[-/.][0-9]{2,4}").unwrap());
static RE_MONTH_EN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec|january|february|march|april|june|july|august|september|october|november|december)\b",
    )
    .unwrap()
});
static RE_MONTH_EL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(ιαν|φεβ|μαρ|απρ|μαι|ιουν|ιουλ|αυγ|σεπ|οκτ|νοε|δεκ)\b").unwrap()
});
static RE_DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[0-9]+").unwrap());

/// Table extraction as produced by the layout extractor. Every field is
/// optional on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TableExtraction {
    pub data_rows: usize,
    pub total_tokens: usize,
    pub data_tokens: usize,
    pub columns_detected: usize,
    pub tables: Vec<Table>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Table {
    pub column_count: usize,
    pub rows: Vec<TableRow>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TableRow {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub cells: Vec<Cell>,
}

impl TableRow {
    pub fn is_header(&self) -> bool {
        self.kind.as_deref() == Some("header")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Cell {
    pub content: Option<String>,
    pub column_index: Option<usize>,
}

impl Cell {
    fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordCandidates {
    pub candidates: Option<Vec<RecordCandidate>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordCandidate {
    pub fields: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StructureSignals {
    pub data_row_count: usize,
    pub column_count: usize,
    pub cell_fill_rate: f64,
    /// Share of date fields that parse as dates; -1 when no date column is expected.
    pub date_field_rate: f64,
    /// Mean characters per data row.
    pub token_density: f64,
    pub header_dominance_ratio: f64,
}

impl StructureSignals {
    pub fn empty() -> Self {
        Self {
            data_row_count: 0,
            column_count: 0,
            cell_fill_rate: 0.0,
            date_field_rate: -1.0,
            token_density: 0.0,
            header_dominance_ratio: 0.0,
        }
    }

    pub fn expects_dates(&self) -> bool {
        self.date_field_rate >= 0.0
    }
}

fn is_date_label(text: &str) -> bool {
    let lower = text.to_lowercase();
    DATE_MARKERS.iter().any(|m| lower.contains(m))
}

/// Character count, matching how token density is measured upstream.
fn char_len(text: &str) -> usize {
    text.chars().count()
}

pub fn extract_signals(
    table: Option<&TableExtraction>,
    candidates: Option<&RecordCandidates>,
) -> StructureSignals {
    let Some(table) = table else {
        return StructureSignals::empty();
    };

    let mut column_count = table.columns_detected;
    if column_count == 0 {
        column_count = table.tables.first().map_or(0, |t| t.column_count);
    }

    let mut total_cells = 0usize;
    let mut filled_cells = 0usize;
    let mut header_chars = 0usize;
    let mut data_chars = 0usize;
    let mut date_columns = 0usize;

    for row in table.tables.iter().flat_map(|t| t.rows.iter()) {
        if row.is_header() {
            for cell in &row.cells {
                header_chars += char_len(cell.text());
                if is_date_label(cell.text()) {
                    date_columns += 1;
                }
            }
        } else {
            for cell in &row.cells {
                total_cells += 1;
                if !cell.text().trim().is_empty() {
                    filled_cells += 1;
                }
                data_chars += char_len(cell.text());
            }
        }
    }

    let ratio = |num: usize, den: usize| if den > 0 { num as f64 / den as f64 } else { 0.0 };

    StructureSignals {
        data_row_count: table.data_rows,
        column_count,
        cell_fill_rate: ratio(filled_cells, total_cells),
        date_field_rate: date_field_rate(date_columns, candidates),
        token_density: ratio(data_chars, table.data_rows),
        header_dominance_ratio: ratio(header_chars, header_chars + data_chars),
    }
}

fn date_field_rate(date_columns: usize, candidates: Option<&RecordCandidates>) -> f64 {
    let Some(list) = candidates.and_then(|c| c.candidates.as_ref()) else {
        return -1.0;
    };
    if date_columns == 0 {
        return -1.0;
    }

    let mut attempts = 0usize;
    let mut successes = 0usize;
    for fields in list.iter().filter_map(|c| c.fields.as_ref()) {
        for (key, value) in fields {
            if !is_date_label(key) {
                continue;
            }
            attempts += 1;
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                _ => String::new(),
            };
            if looks_like_date(&text) {
                successes += 1;
            }
        }
    }

    if attempts > 0 {
        successes as f64 / attempts as f64
    } else {
        -1.0
    }
}

/// Loose date heuristic: numeric dates, English or Greek month names, or
/// at least two digit groups with a year-sized one.
pub fn looks_like_date(value: &str) -> bool {
    let t = value.trim();
    if char_len(t) < 4 {
        return false;
    }
    if RE_ISO_DATE.is_match(t) || RE_DMY_DATE.is_match(t) {
        return true;
    }
    if RE_MONTH_EN.is_match(t) || RE_MONTH_EL.is_match(t) {
        return true;
    }
    let groups: Vec<&str> = RE_DIGITS.find_iter(t).map(|m| m.as_str()).collect();
    groups.len() >= 2 && groups.iter().any(|g| g.len() >= 4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ledger_extraction() -> TableExtraction {
        serde_json::from_value(json!({
            "data_rows": 2,
            "columns_detected": 3,
            "tables": [{
                "column_count": 3,
                "rows": [
                    {"type": "header", "cells": [
                        {"content": "No", "column_index": 0},
                        {"content": "Date of baptism", "column_index": 1},
                        {"content": "Name", "column_index": 2}
                    ]},
                    {"type": "row", "cells": [
                        {"content": "1"},
                        {"content": "12/03/1891"},
                        {"content": "Ioannis Papadopoulos"}
                    ]},
                    {"type": "row", "cells": [
                        {"content": "2"},
                        {"content": "  "},
                        {"content": "Maria"}
                    ]}
                ]
            }]
        }))
        .unwrap()
    }

    #[test]
    fn test_signals_from_ledger() {
        let table = ledger_extraction();
        let signals = extract_signals(Some(&table), None);

        assert_eq!(signals.data_row_count, 2);
        assert_eq!(signals.column_count, 3);
        assert!((signals.cell_fill_rate - 5.0 / 6.0).abs() < 1e-9);
        // 1 + 10 + 20 + 1 + 2 + 5 characters over two rows
        assert!((signals.token_density - 19.5).abs() < 1e-9);
        // 2 + 15 + 4 header characters against 39 data characters
        assert!((signals.header_dominance_ratio - 21.0 / 60.0).abs() < 1e-9);
        // date column present but no candidates supplied
        assert_eq!(signals.date_field_rate, -1.0);
    }

    #[test]
    fn test_date_field_rate_from_candidates() {
        let table = ledger_extraction();
        let candidates: RecordCandidates = serde_json::from_value(json!({
            "candidates": [
                {"fields": {"baptism_date": "12/03/1891", "name": "Ioannis"}},
                {"fields": {"baptism_date": "illegible"}},
                {"fields": {"ημερομηνία": "5 Μαρ 1890"}},
                {}
            ]
        }))
        .unwrap();
        let signals = extract_signals(Some(&table), Some(&candidates));
        assert!((signals.date_field_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_table_yields_empty_signals() {
        let signals = extract_signals(None, None);
        assert_eq!(signals, StructureSignals::empty());
        assert!(!signals.expects_dates());
    }

    #[test]
    fn test_column_count_falls_back_to_first_table() {
        let table: TableExtraction =
            serde_json::from_value(json!({"tables": [{"column_count": 7, "rows": []}]})).unwrap();
        assert_eq!(extract_signals(Some(&table), None).column_count, 7);
    }

    #[test]
    fn test_looks_like_date() {
        assert!(looks_like_date("1891-03-12"));
        assert!(looks_like_date("12.3.91"));
        assert!(looks_like_date("March 4, 1890"));
        assert!(looks_like_date("4 ιαν 1890"));
        assert!(looks_like_date("day 4 of 1890"));
        assert!(!looks_like_date("abc"));
        assert!(!looks_like_date("illegible"));
        assert!(!looks_like_date("12 34"));
    }
}
