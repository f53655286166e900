//! Upstream dataset retrieval over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use pireport_server::{DatasetSource, ReportError};
use reqwest::Client;
use url::Url;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = "pireport/0.1";

/// Fetches the configured CSV dataset. One request per report run, no
/// retries and no caching; a missing or invalid URL is reported when the
/// fetch is attempted, not at construction.
#[derive(Debug, Clone)]
pub struct HttpDatasetSource {
    csv_url: Option<String>,
    http: Client,
}

impl HttpDatasetSource {
    pub fn from_config(csv_url: Option<&str>) -> Result<Self, ReportError> {
        let http = Client::builder()
            .timeout(FETCH_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| ReportError::internal(format!("failed to build HTTP client: {err}")))?;

        Ok(Self {
            csv_url: csv_url.map(|raw| raw.to_string()),
            http,
        })
    }
}

#[async_trait]
impl DatasetSource for HttpDatasetSource {
    async fn fetch_csv(&self) -> Result<String, ReportError> {
        let Some(raw) = self.csv_url.as_deref() else {
            return Err(ReportError::configuration(
                "dataset CSV URL is not configured",
            ));
        };
        let url = Url::parse(raw).map_err(|_| {
            ReportError::configuration(format!("invalid dataset CSV URL `{raw}`"))
        })?;

        tracing::debug!(%url, "fetching reporting dataset");
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|err| ReportError::upstream(format!("failed to fetch dataset: {err}"), None))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ReportError::upstream(
                format!("dataset fetch returned HTTP {status}"),
                Some(status.as_u16()),
            ));
        }

        response
            .text()
            .await
            .map_err(|err| ReportError::upstream(format!("failed to read dataset body: {err}"), None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_url_is_a_configuration_error() {
        let source = HttpDatasetSource::from_config(None).expect("client builds");
        let error = source.fetch_csv().await.expect_err("fetch must fail");
        assert!(matches!(
            error.kind,
            pireport_server::ReportErrorKind::Configuration
        ));
    }

    #[tokio::test]
    async fn invalid_url_is_a_configuration_error() {
        let source =
            HttpDatasetSource::from_config(Some("not a url")).expect("client builds");
        let error = source.fetch_csv().await.expect_err("fetch must fail");
        assert!(matches!(
            error.kind,
            pireport_server::ReportErrorKind::Configuration
        ));
        assert!(error.message.contains("not a url"));
    }
}
