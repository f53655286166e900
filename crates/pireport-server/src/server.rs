//! HTTP surface for the reporting pipeline.

use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Extension, Json, Router,
    body::{Body, Bytes},
    extract::{MatchedPath, Query},
    http::{
        HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode,
        header::{ALLOW, CONTENT_TYPE},
    },
    response::IntoResponse,
    routing::get,
};
use serde::{Deserialize, Serialize, de::Deserializer};
use thiserror::Error;
use tokio::{net::TcpListener, sync::watch};
use tower_http::{
    add_extension::AddExtensionLayer,
    classify::ServerErrorsFailureClass,
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer, ExposeHeaders},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::{CorsConfig, ServerConfig};
use crate::report::{
    DatasetSource, HistoryFilters, HistoryResponse, RESULT_LIMIT_MAX, RESULT_LIMIT_MIN,
    ReportError, ReportErrorKind, run_history_report,
};

const HEALTHZ_PATH: &str = "/v1/healthz";
const HISTORY_PATH: &str = "/v1/history";
const HEALTHZ_STATUS: &str = "ok";
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);
const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";
const HISTORY_ALLOW_METHODS: &str = "GET, POST";
const HEALTHZ_ALLOW_METHODS: &str = "GET";
const ERROR_INVALID_PARAMETER: &str = "invalid_parameter";
const ERROR_NOT_FOUND: &str = "not_found";
const ERROR_METHOD_NOT_ALLOWED: &str = "method_not_allowed";
const ERROR_CONFIGURATION: &str = "configuration_error";
const ERROR_UPSTREAM: &str = "upstream_error";
const ERROR_PARSE: &str = "dataset_parse_error";
const ERROR_INTERNAL: &str = "internal_server_error";
const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Serialize, Copy, Clone, PartialEq, Eq)]
struct HealthzResponse {
    status: &'static str,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum ShutdownEvent {
    Pending,
    CtrlC,
    SigTerm,
    ListenerFailed,
}

pub type DynDatasetSource = Arc<dyn DatasetSource>;
type ApiStateHandle = Arc<ApiState>;

#[derive(Clone)]
struct ApiState {
    dataset: DynDatasetSource,
}

/// Raw history parameters as they arrive on the wire, before validation.
/// The same struct is fed by the GET query string and the POST JSON body;
/// numeric fields accept both JSON numbers and strings.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct HistoryParams {
    #[serde(deserialize_with = "deserialize_scalar")]
    entity: Option<String>,
    #[serde(deserialize_with = "deserialize_scalar")]
    pi: Option<String>,
    #[serde(rename = "type", deserialize_with = "deserialize_scalar")]
    record_type: Option<String>,
    #[serde(deserialize_with = "deserialize_scalar")]
    performance_area: Option<String>,
    #[serde(deserialize_with = "deserialize_scalar")]
    ratings: Option<String>,
    #[serde(deserialize_with = "deserialize_scalar")]
    score: Option<String>,
    #[serde(deserialize_with = "deserialize_scalar")]
    start_year: Option<String>,
    #[serde(deserialize_with = "deserialize_scalar")]
    end_year: Option<String>,
    #[serde(deserialize_with = "deserialize_scalar")]
    limit: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct ApiErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<String>,
}

#[derive(Debug, Clone)]
struct ApiError {
    status: StatusCode,
    body: ApiErrorBody,
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("listen address may not be empty")]
    EmptyListenAddr,
    #[error("invalid listen address `{address}`: {source}")]
    InvalidListenAddr {
        address: String,
        #[source]
        source: std::net::AddrParseError,
    },
    #[error("failed to bind to {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to determine local address: {source}")]
    LocalAddr {
        #[source]
        source: std::io::Error,
    },
    #[error("axum server error: {source}")]
    Serve {
        #[source]
        source: std::io::Error,
    },
    #[error("invalid CORS configuration: {reason}")]
    CorsConfig { reason: String },
}

impl HistoryParams {
    fn into_filters(self) -> Result<HistoryFilters, ApiError> {
        debug_assert!(RESULT_LIMIT_MIN <= RESULT_LIMIT_MAX);
        let HistoryParams {
            entity,
            pi,
            record_type,
            performance_area,
            ratings,
            score,
            start_year,
            end_year,
            limit,
        } = self;

        let entity = sanitize_optional(entity);
        let pi = sanitize_optional(pi);
        let mut missing = Vec::new();
        if entity.is_none() {
            missing.push("entity");
        }
        if pi.is_none() {
            missing.push("pi");
        }
        let (Some(entity), Some(pi)) = (entity, pi) else {
            return Err(ApiError::invalid_param(
                missing.first().copied().unwrap_or("entity"),
                format!("missing required parameters: {}", missing.join(", ")),
            ));
        };

        let record_type = sanitize_optional(record_type);
        let performance_area = sanitize_optional(performance_area);
        let ratings = sanitize_optional(ratings);
        let score = parse_int_param("score", score)?;
        let start_year = parse_int_param("start_year", start_year)?;
        let end_year = parse_int_param("end_year", end_year)?;
        if let (Some(start), Some(end)) = (start_year, end_year) {
            if start > end {
                return Err(ApiError::invalid_param(
                    "start_year",
                    "start_year cannot be greater than end_year",
                ));
            }
        }
        let limit = match parse_int_param("limit", limit)? {
            Some(value)
                if value < RESULT_LIMIT_MIN as i64 || value > RESULT_LIMIT_MAX as i64 =>
            {
                return Err(ApiError::invalid_param(
                    "limit",
                    format!("must be between {RESULT_LIMIT_MIN} and {RESULT_LIMIT_MAX}"),
                ));
            }
            Some(value) => Some(value as usize),
            None => None,
        };

        Ok(HistoryFilters {
            entity,
            pi,
            record_type,
            performance_area,
            ratings,
            score,
            start_year,
            end_year,
            limit,
        })
    }
}

impl ApiError {
    fn new(status: StatusCode, error: &'static str, message: impl Into<String>) -> Self {
        ApiError {
            status,
            body: ApiErrorBody {
                error,
                message: message.into(),
                field: None,
                request_id: None,
            },
        }
    }

    fn with_field(mut self, field: &str) -> Self {
        debug_assert!(!field.is_empty());
        self.body.field = Some(field.to_string());
        self
    }

    fn with_request_id(mut self, request_id: Option<&str>) -> Self {
        if let Some(id) = request_id {
            debug_assert!(!id.is_empty());
            self.body.request_id = Some(id.to_string());
        }
        self
    }

    fn invalid_param(field: &str, message: impl Into<String>) -> Self {
        debug_assert!(!field.is_empty());
        ApiError::new(StatusCode::BAD_REQUEST, ERROR_INVALID_PARAMETER, message).with_field(field)
    }

    fn internal() -> Self {
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            ERROR_INTERNAL,
            "internal server error",
        )
    }

    fn resource_not_found(path: &str) -> Self {
        debug_assert!(path.starts_with('/'));
        ApiError::new(
            StatusCode::NOT_FOUND,
            ERROR_NOT_FOUND,
            format!("resource `{path}` not found"),
        )
    }

    fn method_not_allowed(method: &str, path: &str) -> Self {
        debug_assert!(!method.is_empty());
        debug_assert!(path.starts_with('/'));
        ApiError::new(
            StatusCode::METHOD_NOT_ALLOWED,
            ERROR_METHOD_NOT_ALLOWED,
            format!("method `{method}` not allowed for `{path}`"),
        )
    }
}

impl From<ReportError> for ApiError {
    fn from(error: ReportError) -> Self {
        match error.kind {
            ReportErrorKind::InvalidParameter => {
                let field = error.field.unwrap_or_else(|| "parameter".to_string());
                ApiError::invalid_param(&field, error.message)
            }
            ReportErrorKind::Configuration => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                ERROR_CONFIGURATION,
                error.message,
            ),
            ReportErrorKind::Upstream { status } => {
                tracing::warn!(status, message = %error.message, "dataset fetch failed");
                ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ERROR_UPSTREAM,
                    error.message,
                )
            }
            ReportErrorKind::Parse => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                ERROR_PARSE,
                error.message,
            ),
            ReportErrorKind::Internal => {
                tracing::error!(message = %error.message, "history report failed");
                ApiError::internal()
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (
            self.status,
            [(CONTENT_TYPE, JSON_CONTENT_TYPE)],
            Json(self.body),
        )
            .into_response()
    }
}

fn json_ok<T: Serialize>(body: T) -> axum::response::Response {
    ([(CONTENT_TYPE, JSON_CONTENT_TYPE)], Json(body)).into_response()
}

fn sanitize_optional(value: Option<String>) -> Option<String> {
    value.and_then(|raw| {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

/// Strict integer coercion for validated filter fields: absent or empty
/// means "no filter", anything else must parse in full.
fn parse_int_param(field: &str, value: Option<String>) -> Result<Option<i64>, ApiError> {
    debug_assert!(!field.is_empty());
    let Some(raw) = sanitize_optional(value) else {
        return Ok(None);
    };
    raw.parse::<i64>()
        .map(Some)
        .map_err(|_| ApiError::invalid_param(field, format!("`{raw}` is not an integer")))
}

fn deserialize_scalar<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Text(String),
        Int(i64),
    }

    let value = Option::<Scalar>::deserialize(deserializer)?;
    Ok(value.map(|scalar| match scalar {
        Scalar::Text(text) => text,
        Scalar::Int(number) => number.to_string(),
    }))
}

pub fn build_api_router(dataset: DynDatasetSource) -> Router {
    debug_assert!(HISTORY_PATH.starts_with("/v1/"));
    debug_assert!(HEALTHZ_PATH.ends_with("healthz"));

    let state: ApiStateHandle = Arc::new(ApiState { dataset });
    Router::new()
        .route(
            HEALTHZ_PATH,
            get(healthz).fallback(method_not_allowed_handler),
        )
        .route(
            HISTORY_PATH,
            get(history_get)
                .post(history_post)
                .fallback(method_not_allowed_handler),
        )
        .layer(AddExtensionLayer::new(state))
}

pub async fn serve(config: ServerConfig, dataset: DynDatasetSource) -> Result<(), ServerError> {
    debug_assert!(config.listen_addr.len() <= 128);
    debug_assert!(!config.listen_addr.contains('\n'));

    let listen_addr = parse_listen_addr(&config.listen_addr)?;
    let listener = bind_listener(listen_addr).await?;

    let local_addr = listener
        .local_addr()
        .map_err(|source| ServerError::LocalAddr { source })?;
    tracing::info!(%local_addr, "pireport server listening");

    let (shutdown_tx, shutdown_rx) = watch::channel(ShutdownEvent::Pending);
    let shutdown_future = broadcast_shutdown(shutdown_tx);

    let app = build_app_router(&config, dataset)?;

    let mut server_future = Box::pin(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_future)
            .await
    });

    let drain_rx = shutdown_rx.clone();
    let mut drain_timeout = Box::pin(drain_timeout_future(drain_rx));

    tokio::select! {
        result = server_future.as_mut() => {
            if let Err(source) = result {
                return Err(ServerError::Serve { source });
            }
        }
        _ = drain_timeout.as_mut() => {
            // Timeout elapsed; dropping the server future forces termination.
        }
    }

    let final_event = *shutdown_rx.borrow();
    if final_event == ShutdownEvent::Pending {
        tracing::info!("server stopped without external shutdown signal");
    } else {
        tracing::info!(?final_event, "server shutdown complete");
    }

    Ok(())
}

pub fn build_app_router(
    config: &ServerConfig,
    dataset: DynDatasetSource,
) -> Result<Router, ServerError> {
    let mut router = Router::new()
        .merge(build_api_router(dataset))
        .fallback(not_found_handler);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<_>| {
            let path = matched_path_or_uri(request);
            let request_id =
                header_request_id(request.headers()).unwrap_or_else(|| "-".to_string());
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                path = %path,
                request_id = %request_id
            )
        })
        .on_response(
            |response: &axum::response::Response, latency: Duration, span: &tracing::Span| {
                let status = response.status().as_u16();
                let latency_ms = latency.as_millis().min(u128::from(u64::MAX)) as u64;
                tracing::info!(parent: span, status, latency_ms, "request completed");
            },
        )
        .on_failure(
            |error: ServerErrorsFailureClass, latency: Duration, span: &tracing::Span| {
                let latency_ms = latency.as_millis().min(u128::from(u64::MAX)) as u64;
                tracing::error!(parent: span, latency_ms, error = %error, "request failed");
            },
        );

    if config.cors.enabled {
        let cors_layer = build_cors_layer(&config.cors)?;
        router = router.layer(cors_layer);
    }

    router = router.layer(trace_layer);

    let request_id_header = HeaderName::from_static(REQUEST_ID_HEADER);
    let make_request_id = MakeRequestUuid;
    router = router
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(SetRequestIdLayer::new(request_id_header, make_request_id));

    Ok(router)
}

fn build_cors_layer(config: &CorsConfig) -> Result<CorsLayer, ServerError> {
    debug_assert!(!config.allow_origins.is_empty());
    let origins: Vec<HeaderValue> = config
        .allow_origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin).map_err(|err| ServerError::CorsConfig {
                reason: format!("origin `{origin}` is not a valid header value: {err}"),
            })
        })
        .collect::<Result<_, _>>()?;

    let methods: Vec<Method> = config
        .allow_methods
        .iter()
        .map(|method| {
            Method::from_bytes(method.as_bytes()).map_err(|_| ServerError::CorsConfig {
                reason: format!("method `{method}` failed to parse post-validation"),
            })
        })
        .collect::<Result<_, _>>()?;

    let allow_headers: Vec<HeaderName> = config
        .allow_headers
        .iter()
        .map(|name| {
            HeaderName::from_bytes(name.as_bytes()).map_err(|err| ServerError::CorsConfig {
                reason: format!("header `{name}` is invalid: {err}"),
            })
        })
        .collect::<Result<_, _>>()?;

    let expose_headers: Vec<HeaderName> = config
        .expose_headers
        .iter()
        .map(|name| {
            HeaderName::from_bytes(name.as_bytes()).map_err(|err| ServerError::CorsConfig {
                reason: format!("expose-header `{name}` is invalid: {err}"),
            })
        })
        .collect::<Result<_, _>>()?;

    let mut cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(AllowMethods::list(methods))
        .allow_credentials(config.allow_credentials)
        .max_age(Duration::from_secs(config.max_age_secs));

    if !allow_headers.is_empty() {
        cors = cors.allow_headers(AllowHeaders::list(allow_headers));
    }

    if !expose_headers.is_empty() {
        cors = cors.expose_headers(ExposeHeaders::list(expose_headers));
    }

    Ok(cors)
}

async fn history_get(
    Extension(state): Extension<ApiStateHandle>,
    Query(params): Query<HistoryParams>,
) -> Result<axum::response::Response, ApiError> {
    run_history(state, params).await
}

async fn history_post(
    Extension(state): Extension<ApiStateHandle>,
    body: Bytes,
) -> Result<axum::response::Response, ApiError> {
    // An absent body falls through to the missing-parameter check, the same
    // way an empty query string does on GET.
    let params = if body.is_empty() {
        HistoryParams::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|err| ApiError::invalid_param("body", format!("invalid JSON body: {err}")))?
    };
    run_history(state, params).await
}

async fn run_history(
    state: ApiStateHandle,
    params: HistoryParams,
) -> Result<axum::response::Response, ApiError> {
    let filters = params.into_filters()?;
    let report: HistoryResponse = run_history_report(state.dataset.as_ref(), &filters)
        .await
        .map_err(ApiError::from)?;
    Ok(json_ok(report))
}

async fn healthz() -> axum::response::Response {
    debug_assert_eq!(HEALTHZ_STATUS, "ok");
    json_ok(HealthzResponse {
        status: HEALTHZ_STATUS,
    })
}

fn allowed_methods(path: &str) -> Option<&'static str> {
    match path {
        HISTORY_PATH => Some(HISTORY_ALLOW_METHODS),
        HEALTHZ_PATH => Some(HEALTHZ_ALLOW_METHODS),
        _ => None,
    }
}

async fn method_not_allowed_handler(request: Request<Body>) -> axum::response::Response {
    debug_assert!(request.uri().path().starts_with('/'));
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let request_id = header_request_id(request.headers());
    let mut response = ApiError::method_not_allowed(&method, &path)
        .with_request_id(request_id.as_deref())
        .into_response();
    if let Some(allow) = allowed_methods(&path) {
        response
            .headers_mut()
            .insert(ALLOW, HeaderValue::from_static(allow));
    }
    response
}

async fn not_found_handler(request: Request<Body>) -> axum::response::Response {
    debug_assert!(request.uri().path().starts_with('/'));
    let path = request.uri().path().to_string();
    let request_id = header_request_id(request.headers());
    ApiError::resource_not_found(&path)
        .with_request_id(request_id.as_deref())
        .into_response()
}

fn matched_path_or_uri<B>(request: &Request<B>) -> String {
    if let Some(path) = request.extensions().get::<MatchedPath>() {
        let resolved = path.as_str();
        debug_assert!(resolved.starts_with('/'));
        return resolved.to_string();
    }
    let fallback = request.uri().path().to_string();
    debug_assert!(fallback.starts_with('/'));
    fallback
}

fn header_request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| value.to_string())
}

async fn wait_for_shutdown() -> ShutdownEvent {
    debug_assert!(DRAIN_TIMEOUT >= Duration::from_secs(1));

    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => ShutdownEvent::CtrlC,
            Err(error) => {
                tracing::warn!(%error, "failed to capture Ctrl+C signal");
                ShutdownEvent::ListenerFailed
            }
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => match term.recv().await {
                Some(_) => ShutdownEvent::SigTerm,
                None => ShutdownEvent::ListenerFailed,
            },
            Err(error) => {
                tracing::warn!(%error, "failed to capture SIGTERM");
                ShutdownEvent::ListenerFailed
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending();

    tokio::select! {
        event = ctrl_c => event,
        event = sigterm => event,
    }
}

fn parse_listen_addr(addr: &str) -> Result<SocketAddr, ServerError> {
    debug_assert!(addr.len() <= 128);

    let trimmed = addr.trim();
    if trimmed.is_empty() {
        return Err(ServerError::EmptyListenAddr);
    }

    trimmed
        .parse()
        .map_err(|source| ServerError::InvalidListenAddr {
            address: trimmed.to_string(),
            source,
        })
}

async fn bind_listener(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    debug_assert!(addr.port() > 0);

    TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind {
            address: addr.to_string(),
            source,
        })
}

fn broadcast_shutdown(
    sender: watch::Sender<ShutdownEvent>,
) -> impl Future<Output = ()> + Send + 'static {
    debug_assert!(!sender.is_closed());
    async move {
        let event = wait_for_shutdown().await;
        debug_assert!(event != ShutdownEvent::Pending);
        if let Err(error) = sender.send(event) {
            tracing::warn!(?event, %error, "failed to broadcast shutdown event");
        }
    }
}

fn drain_timeout_future(
    mut receiver: watch::Receiver<ShutdownEvent>,
) -> impl Future<Output = ()> + Send + 'static {
    debug_assert!(DRAIN_TIMEOUT.as_secs() >= 1);
    async move {
        if receiver.changed().await.is_ok() {
            let event = *receiver.borrow_and_update();
            debug_assert!(event != ShutdownEvent::Pending);
            tracing::info!(?event, "shutdown signal received; draining connections");
            tokio::time::sleep(DRAIN_TIMEOUT).await;
            tracing::warn!(
                ?event,
                seconds = DRAIN_TIMEOUT.as_secs(),
                "graceful shutdown timed out; continuing shutdown"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    const FIXTURE_CSV: &str = "\
Entity,Type,Year,Performance_Area,Performance_Indicator,Ratings,Score
CTBTO,Annual,2018,Verification,PI2 — Compliance,Good,4
CTBTO,Annual,2019,Verification,PI2 — Compliance,Good,3
CTBTO,Annual,2020,Verification,PI10 — Outreach,Fair,2
IAEA,Annual,2019,Safeguards,PI2 — Compliance,Good,4
CTBTO,Annual,unknown,Verification,PI2 — Compliance,Good,4
";

    struct FixtureSource;

    #[async_trait]
    impl DatasetSource for FixtureSource {
        async fn fetch_csv(&self) -> Result<String, ReportError> {
            Ok(FIXTURE_CSV.to_string())
        }
    }

    struct UnconfiguredSource;

    #[async_trait]
    impl DatasetSource for UnconfiguredSource {
        async fn fetch_csv(&self) -> Result<String, ReportError> {
            Err(ReportError::configuration(
                "dataset CSV URL is not configured",
            ))
        }
    }

    fn params(entity: Option<&str>, pi: Option<&str>) -> HistoryParams {
        HistoryParams {
            entity: entity.map(|value| value.to_string()),
            pi: pi.map(|value| value.to_string()),
            ..HistoryParams::default()
        }
    }

    async fn response_json(response: axum::response::Response) -> Value {
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("body must be collected")
            .to_bytes();
        serde_json::from_slice(body_bytes.as_ref()).expect("body must be valid JSON")
    }

    #[test]
    fn missing_required_parameters_are_named() {
        let error = params(None, None)
            .into_filters()
            .expect_err("missing params must fail");
        assert_eq!(error.status, StatusCode::BAD_REQUEST);
        assert_eq!(error.body.message, "missing required parameters: entity, pi");

        let error = params(Some("CTBTO"), None)
            .into_filters()
            .expect_err("missing pi must fail");
        assert_eq!(error.body.message, "missing required parameters: pi");
        assert_eq!(error.body.field.as_deref(), Some("pi"));
    }

    #[test]
    fn empty_strings_count_as_absent() {
        let error = params(Some("  "), Some(""))
            .into_filters()
            .expect_err("blank params must fail");
        assert_eq!(error.body.message, "missing required parameters: entity, pi");
    }

    #[test]
    fn non_integer_year_is_rejected() {
        let mut raw = params(Some("CTBTO"), Some("PI2"));
        raw.start_year = Some("twenty".to_string());
        let error = raw.into_filters().expect_err("bad year must fail");
        assert_eq!(error.status, StatusCode::BAD_REQUEST);
        assert_eq!(error.body.field.as_deref(), Some("start_year"));
    }

    #[test]
    fn absent_year_means_no_bound() {
        let mut raw = params(Some("CTBTO"), Some("PI2"));
        raw.end_year = Some(String::new());
        let filters = raw.into_filters().expect("empty year is no bound");
        assert_eq!(filters.start_year, None);
        assert_eq!(filters.end_year, None);
    }

    #[test]
    fn inverted_year_range_is_rejected() {
        let mut raw = params(Some("CTBTO"), Some("PI2"));
        raw.start_year = Some("2024".to_string());
        raw.end_year = Some("2018".to_string());
        let error = raw.into_filters().expect_err("inverted range must fail");
        assert_eq!(error.status, StatusCode::BAD_REQUEST);
        assert!(error.body.message.contains("start_year"));
    }

    #[test]
    fn limit_bounds_are_enforced() {
        for bad in ["0", "1001"] {
            let mut raw = params(Some("CTBTO"), Some("PI2"));
            raw.limit = Some(bad.to_string());
            let error = raw.into_filters().expect_err("out-of-range limit must fail");
            assert_eq!(error.body.field.as_deref(), Some("limit"));
        }

        let mut raw = params(Some("CTBTO"), Some("PI2"));
        raw.limit = Some("1000".to_string());
        let filters = raw.into_filters().expect("limit 1000 is allowed");
        assert_eq!(filters.limit, Some(1000));
    }

    #[test]
    fn json_numbers_and_strings_coerce_alike() {
        let from_numbers: HistoryParams = serde_json::from_value(json!({
            "entity": "CTBTO",
            "pi": "PI2",
            "start_year": 2018,
            "end_year": "2024",
            "score": 4
        }))
        .expect("params must deserialize");
        let filters = from_numbers.into_filters().expect("params must validate");
        assert_eq!(filters.start_year, Some(2018));
        assert_eq!(filters.end_year, Some(2024));
        assert_eq!(filters.score, Some(4));
    }

    #[test]
    fn type_field_uses_wire_name() {
        let raw: HistoryParams = serde_json::from_value(json!({
            "entity": "CTBTO",
            "pi": "PI2",
            "type": "Annual"
        }))
        .expect("params must deserialize");
        let filters = raw.into_filters().expect("params must validate");
        assert_eq!(filters.record_type.as_deref(), Some("Annual"));
    }

    #[tokio::test]
    async fn history_get_filters_end_to_end() {
        let app = build_api_router(Arc::new(FixtureSource));
        let response = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/v1/history?entity=CTBTO&pi=PI2&start_year=2018&end_year=2024")
                    .body(Body::empty())
                    .expect("request builds"),
            )
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .expect("content-type present")
            .to_str()
            .expect("content-type ascii");
        assert_eq!(content_type, JSON_CONTENT_TYPE);

        let value = response_json(response).await;
        assert_eq!(value["total_records"], json!(2));
        assert_eq!(value["returned_records"], json!(2));
        assert_eq!(value["rows"][0]["Year"], json!(2018));
        assert_eq!(value["rows"][1]["Year"], json!(2019));
        assert_eq!(
            value["rows"][0]["PerformanceIndicator"],
            json!("PI2 — Compliance")
        );
        assert_eq!(value["filters"]["entity"], json!("CTBTO"));
    }

    #[tokio::test]
    async fn history_post_matches_get() {
        let app = build_api_router(Arc::new(FixtureSource));
        let payload = json!({
            "entity": "ctbto",
            "pi": "pi2",
            "start_year": 2018,
            "end_year": 2024
        });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(HISTORY_PATH)
                    .header(CONTENT_TYPE, "application/json")
                    .body(Body::from(payload.to_string()))
                    .expect("request builds"),
            )
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::OK);
        let value = response_json(response).await;
        assert_eq!(value["total_records"], json!(2));
    }

    #[tokio::test]
    async fn history_rejects_unknown_method_with_allow_header() {
        let app = build_api_router(Arc::new(FixtureSource));
        let response = app
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri(HISTORY_PATH)
                    .body(Body::empty())
                    .expect("request builds"),
            )
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        let allow = response
            .headers()
            .get(ALLOW)
            .expect("Allow header present")
            .to_str()
            .expect("Allow header ascii");
        assert_eq!(allow, HISTORY_ALLOW_METHODS);

        let value = response_json(response).await;
        assert_eq!(value["error"], json!(ERROR_METHOD_NOT_ALLOWED));
    }

    #[tokio::test]
    async fn unconfigured_dataset_is_a_500() {
        let app = build_api_router(Arc::new(UnconfiguredSource));
        let response = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/v1/history?entity=CTBTO&pi=PI2")
                    .body(Body::empty())
                    .expect("request builds"),
            )
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let value = response_json(response).await;
        assert_eq!(value["error"], json!(ERROR_CONFIGURATION));
        assert_eq!(value["message"], json!("dataset CSV URL is not configured"));
    }

    #[tokio::test]
    async fn unknown_path_is_a_json_404() {
        let config = ServerConfig {
            listen_addr: "127.0.0.1:8080".to_string(),
            cors: CorsConfig::default(),
        };
        let router =
            build_app_router(&config, Arc::new(FixtureSource)).expect("router builds");
        let response = router
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/v1/missing")
                    .body(Body::empty())
                    .expect("request builds"),
            )
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let value = response_json(response).await;
        assert_eq!(value["error"], json!(ERROR_NOT_FOUND));
    }
}
