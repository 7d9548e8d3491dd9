use anyhow::{Context, Result};
use chrono::NaiveDate;
use encoding_rs::EUC_KR;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Decodes a CSV export: UTF-8 (BOM stripped) when valid, EUC-KR otherwise.
///
/// Returns the text and the name of the encoding that was applied.
pub fn decode_bytes(bytes: &[u8]) -> (String, &'static str) {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    if let Ok(s) = std::str::from_utf8(bytes) {
        return (s.to_string(), "utf-8");
    }

    let (cow, _, had_errors) = EUC_KR.decode(bytes);
    if had_errors {
        tracing::warn!("input is neither valid UTF-8 nor clean EUC-KR; undecodable bytes replaced");
    }
    (cow.into_owned(), "euc-kr")
}

/// Header-addressed rows of one CSV file.
#[derive(Debug, Clone)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<csv::StringRecord>,
}

impl Table {
    pub fn parse(text: &str) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());

        let headers = reader
            .headers()
            .context("failed to read CSV header")?
            .iter()
            .map(normalize_header)
            .collect();

        let mut rows = Vec::new();
        for (idx, record) in reader.records().enumerate() {
            // Header is line 1.
            let record = record.with_context(|| format!("malformed CSV record at line {}", idx + 2))?;
            rows.push(record);
        }
        Ok(Self { headers, rows })
    }

    pub fn from_path(path: &std::path::Path) -> Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let (text, encoding) = decode_bytes(&bytes);
        tracing::debug!(path = %path.display(), encoding, bytes = bytes.len(), "decoded CSV input");
        Self::parse(&text).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = &csv::StringRecord> {
        self.rows.iter()
    }

    /// First column whose header matches one of `aliases` (case-insensitive).
    pub fn column(&self, aliases: &[&str]) -> Option<usize> {
        aliases.iter().find_map(|alias| {
            let alias = normalize_header(alias);
            self.headers.iter().position(|h| *h == alias)
        })
    }

    pub fn require_column(&self, field: &str, aliases: &[&str]) -> Result<usize> {
        self.column(aliases).with_context(|| {
            format!(
                "missing required column {field} (accepted headers: {}; found: {})",
                aliases.join(", "),
                self.headers.join(", ")
            )
        })
    }
}

fn normalize_header(h: &str) -> String {
    h.trim().trim_start_matches('\u{feff}').to_lowercase()
}

/// Cell text, `None` when the column is absent or the cell is blank.
pub fn cell<'a>(row: &'a csv::StringRecord, col: Option<usize>) -> Option<&'a str> {
    col.and_then(|c| row.get(c)).map(str::trim).filter(|s| !s.is_empty())
}

/// Accepts `YYYY-MM-DD`, `YYYYMMDD` and `YYYY/MM/DD`.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let t = s.trim();
    ["%Y-%m-%d", "%Y%m%d", "%Y/%m/%d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(t, fmt).ok())
}

/// Numeric cell with thousands separators and a trailing `%` tolerated; anything else is missing.
pub fn parse_number(s: &str) -> Option<f64> {
    let t = s.trim().trim_end_matches('%').replace(',', "");
    let t = t.trim();
    if t.is_empty() || t == "-" {
        return None;
    }
    t.parse::<f64>().ok().filter(|v| v.is_finite())
}
