use std::fmt;

use async_trait::async_trait;
use serde::Serialize;

use crate::records;

pub const RESULT_LIMIT_MIN: usize = 1;
pub const RESULT_LIMIT_MAX: usize = 1000;

/// Validated history filters, after transport intake and coercion.
///
/// `entity` and `pi` are always present; every other field is an optional
/// predicate that is vacuously true when absent.
#[derive(Debug, Clone)]
pub struct HistoryFilters {
    pub entity: String,
    pub pi: String,
    pub record_type: Option<String>,
    pub performance_area: Option<String>,
    pub ratings: Option<String>,
    pub score: Option<i64>,
    pub start_year: Option<i64>,
    pub end_year: Option<i64>,
    pub limit: Option<usize>,
}

/// Supplies the raw CSV text of the reporting dataset.
///
/// The dataset is re-fetched on every report run; implementations must not
/// cache or retry.
#[async_trait]
pub trait DatasetSource: Send + Sync + 'static {
    async fn fetch_csv(&self) -> Result<String, ReportError>;
}

#[derive(Debug, Clone)]
pub struct ReportError {
    pub kind: ReportErrorKind,
    pub message: String,
    pub field: Option<String>,
}

#[derive(Debug, Clone)]
pub enum ReportErrorKind {
    InvalidParameter,
    Configuration,
    Upstream { status: Option<u16> },
    Parse,
    Internal,
}

impl ReportError {
    pub fn invalid_param(field: impl Into<String>, message: impl Into<String>) -> Self {
        ReportError {
            kind: ReportErrorKind::InvalidParameter,
            message: message.into(),
            field: Some(field.into()),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        ReportError {
            kind: ReportErrorKind::Configuration,
            message: message.into(),
            field: None,
        }
    }

    pub fn upstream(message: impl Into<String>, status: Option<u16>) -> Self {
        ReportError {
            kind: ReportErrorKind::Upstream { status },
            message: message.into(),
            field: None,
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        ReportError {
            kind: ReportErrorKind::Parse,
            message: message.into(),
            field: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ReportError {
            kind: ReportErrorKind::Internal,
            message: message.into(),
            field: None,
        }
    }
}

impl fmt::Display for ReportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ReportError {}

/// One shaped output row. `performance_indicator` carries the original
/// free-text field, not the extracted code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryRow {
    #[serde(rename = "Entity")]
    pub entity: String,
    #[serde(rename = "Type")]
    pub record_type: String,
    #[serde(rename = "Year")]
    pub year: Option<i64>,
    #[serde(rename = "Performance_Area")]
    pub performance_area: String,
    #[serde(rename = "PerformanceIndicator")]
    pub performance_indicator: String,
    #[serde(rename = "Ratings")]
    pub ratings: String,
    #[serde(rename = "Score")]
    pub score: Option<i64>,
}

/// Echo of the effective filters, returned for caller verification.
#[derive(Debug, Clone, Serialize)]
pub struct FilterEcho {
    pub entity: String,
    pub pi: String,
    #[serde(rename = "type")]
    pub record_type: Option<String>,
    pub performance_area: Option<String>,
    pub ratings: Option<String>,
    pub score: Option<i64>,
    pub start_year: Option<i64>,
    pub end_year: Option<i64>,
    pub limit: Option<usize>,
}

impl From<&HistoryFilters> for FilterEcho {
    fn from(filters: &HistoryFilters) -> Self {
        FilterEcho {
            entity: filters.entity.clone(),
            pi: filters.pi.clone(),
            record_type: filters.record_type.clone(),
            performance_area: filters.performance_area.clone(),
            ratings: filters.ratings.clone(),
            score: filters.score,
            start_year: filters.start_year,
            end_year: filters.end_year,
            limit: filters.limit,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryResponse {
    pub filters: FilterEcho,
    pub total_records: usize,
    pub returned_records: usize,
    pub rows: Vec<HistoryRow>,
}

/// Runs one full report pass: fetch the dataset, parse it, evaluate the
/// filter conjunction, and shape the result set. One fetch per call, no
/// state carried between calls.
pub async fn run_history_report(
    source: &dyn DatasetSource,
    filters: &HistoryFilters,
) -> Result<HistoryResponse, ReportError> {
    let csv_text = source.fetch_csv().await?;
    let parsed = records::parse_records(&csv_text)?;
    let (rows, total_records) = records::shape(&parsed, filters);
    let returned_records = rows.len();
    debug_assert!(returned_records <= total_records);

    tracing::debug!(
        records = parsed.len(),
        total_records,
        returned_records,
        "history report evaluated"
    );

    Ok(HistoryResponse {
        filters: FilterEcho::from(filters),
        total_records,
        returned_records,
        rows,
    })
}
