//! Pure record pipeline: CSV parsing, field normalization, PI code
//! extraction, filter evaluation, and row shaping.
//!
//! Everything here is side-effect free so the pipeline can be exercised
//! without a server or a network fetch.

use std::sync::LazyLock;

use regex::Regex;

use crate::report::{HistoryFilters, HistoryRow, ReportError};

const ENTITY_COLUMN: &str = "Entity";
const TYPE_COLUMN: &str = "Type";
const YEAR_COLUMN: &str = "Year";
const AREA_COLUMN: &str = "Performance_Area";
const INDICATOR_COLUMN: &str = "Performance_Indicator";
const RATINGS_COLUMN: &str = "Ratings";
const SCORE_COLUMN: &str = "Score";

// One or two digits with a trailing word boundary, so a requested "PI1"
// never matches a record carrying "PI10" and vice versa.
static PI_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^PI\d{1,2}\b").expect("PI code pattern must compile"));

/// One parsed CSV row. Values are the raw strings as parsed; all
/// comparisons go through the normalizers below.
#[derive(Debug, Clone, Default)]
pub struct Record {
    pub entity: String,
    pub record_type: String,
    pub year: String,
    pub performance_area: String,
    pub performance_indicator: String,
    pub ratings: String,
    pub score: String,
}

struct ColumnIndex {
    entity: usize,
    record_type: Option<usize>,
    year: usize,
    performance_area: Option<usize>,
    performance_indicator: usize,
    ratings: usize,
    score: usize,
}

impl ColumnIndex {
    fn resolve(headers: &csv::StringRecord) -> Result<Self, ReportError> {
        let find = |name: &str| headers.iter().position(|header| header == name);
        let require = |name: &'static str| {
            find(name).ok_or_else(|| {
                ReportError::parse(format!("CSV header is missing required column `{name}`"))
            })
        };

        Ok(Self {
            entity: require(ENTITY_COLUMN)?,
            record_type: find(TYPE_COLUMN),
            year: require(YEAR_COLUMN)?,
            performance_area: find(AREA_COLUMN),
            performance_indicator: require(INDICATOR_COLUMN)?,
            ratings: require(RATINGS_COLUMN)?,
            score: require(SCORE_COLUMN)?,
        })
    }

    fn record(&self, row: &csv::StringRecord) -> Record {
        let field = |index: usize| row.get(index).unwrap_or("").to_string();
        Record {
            entity: field(self.entity),
            record_type: self.record_type.map(field).unwrap_or_default(),
            year: field(self.year),
            performance_area: self.performance_area.map(field).unwrap_or_default(),
            performance_indicator: field(self.performance_indicator),
            ratings: field(self.ratings),
            score: field(self.score),
        }
    }
}

/// Parses raw CSV text into records, header row first. Fields are trimmed,
/// blank lines are skipped, and any malformed row fails the whole parse.
pub fn parse_records(csv_text: &str) -> Result<Vec<Record>, ReportError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(csv_text.as_bytes());

    let headers = reader
        .headers()
        .map_err(|err| ReportError::parse(format!("failed to read CSV header: {err}")))?
        .clone();
    let columns = ColumnIndex::resolve(&headers)?;

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|err| ReportError::parse(format!("malformed CSV row: {err}")))?;
        records.push(columns.record(&row));
    }
    Ok(records)
}

/// Canonicalizes a field for comparison: trim, uppercase, and fold
/// non-breaking spaces into regular ones. Empty input yields `None`.
pub fn normalize_field(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_uppercase().replace('\u{00A0}', " ").trim().to_string())
}

/// Lenient integer coercion used on record fields: parses a leading
/// base-10 token and yields `None` (never an error) for anything else.
pub fn parse_int_lenient(value: &str) -> Option<i64> {
    let trimmed = value.trim();
    let (sign, body) = match trimmed.strip_prefix('-') {
        Some(rest) => (-1_i64, rest),
        None => (1_i64, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let end = body
        .find(|ch: char| !ch.is_ascii_digit())
        .unwrap_or(body.len());
    if end == 0 {
        return None;
    }
    body[..end].parse::<i64>().ok().map(|parsed| sign * parsed)
}

/// Pulls the short PI code off the front of a free-text indicator field,
/// e.g. `"PI2 — Compliance"` yields `"PI2"`. The digits must follow `PI`
/// immediately and end on a word boundary.
pub fn extract_pi_code(value: &str) -> Option<String> {
    let normalized = normalize_field(value)?;
    PI_CODE
        .find(&normalized)
        .map(|found| found.as_str().to_string())
}

fn normalized_filter(value: Option<&str>) -> Option<String> {
    value.and_then(normalize_field)
}

/// Conjunction of all active filters. A record with an unparsable `Year`
/// never matches, bounds or not; a present score filter never matches an
/// unparsable record score.
pub fn matches_filters(record: &Record, filters: &HistoryFilters) -> bool {
    let Some(year) = parse_int_lenient(&record.year) else {
        return false;
    };
    if filters.start_year.is_some_and(|start| year < start) {
        return false;
    }
    if filters.end_year.is_some_and(|end| year > end) {
        return false;
    }

    if normalize_field(&record.entity) != normalize_field(&filters.entity) {
        return false;
    }
    if extract_pi_code(&record.performance_indicator) != normalize_field(&filters.pi) {
        return false;
    }

    if let Some(wanted) = normalized_filter(filters.record_type.as_deref()) {
        if normalize_field(&record.record_type) != Some(wanted) {
            return false;
        }
    }
    if let Some(wanted) = normalized_filter(filters.performance_area.as_deref()) {
        if normalize_field(&record.performance_area) != Some(wanted) {
            return false;
        }
    }
    if let Some(wanted) = normalized_filter(filters.ratings.as_deref()) {
        if normalize_field(&record.ratings) != Some(wanted) {
            return false;
        }
    }
    if let Some(wanted) = filters.score {
        if parse_int_lenient(&record.score) != Some(wanted) {
            return false;
        }
    }

    true
}

/// Filters and projects the record set, preserving file order. Returns the
/// capped rows together with the match count before the cap was applied.
pub fn shape(records: &[Record], filters: &HistoryFilters) -> (Vec<HistoryRow>, usize) {
    let matched: Vec<&Record> = records
        .iter()
        .filter(|record| matches_filters(record, filters))
        .collect();
    let total = matched.len();
    let cap = filters.limit.unwrap_or(total);
    let rows = matched.into_iter().take(cap).map(to_row).collect();
    (rows, total)
}

fn to_row(record: &Record) -> HistoryRow {
    HistoryRow {
        entity: record.entity.clone(),
        record_type: record.record_type.clone(),
        year: parse_int_lenient(&record.year),
        performance_area: record.performance_area.clone(),
        performance_indicator: record.performance_indicator.clone(),
        ratings: record.ratings.clone(),
        score: parse_int_lenient(&record.score),
    }
}
