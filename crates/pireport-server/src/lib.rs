pub mod config;
pub mod records;
pub mod report;
mod server;

pub use config::{CorsConfig, ServerConfig};
pub use report::{
    DatasetSource, FilterEcho, HistoryFilters, HistoryResponse, HistoryRow, RESULT_LIMIT_MAX,
    RESULT_LIMIT_MIN, ReportError, ReportErrorKind, run_history_report,
};
pub use server::{DynDatasetSource, ServerError, build_api_router, build_app_router, serve};
