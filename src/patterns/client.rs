//! Pattern distribution service client
//!
//! Patterns are shared between services through a small JSON API:
//!
//! | Call | Route |
//! |---|---|
//! | fetch | `GET /patterns?service=` |
//! | upsert | `POST /patterns/update` |
//! | delete | `POST /patterns/delete` |
//! | publish analysis | `POST /publish` |
//! | history | `GET /history?correlationId=&start=&end=` |
//! | status | `GET /status` |
//!
//! Any non-success status is a failure of that call.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::ErrorPattern;
use crate::config::PatternConfig;
use crate::context::ErrorAnalysis;
use crate::errors::PatternServiceError;

/// Health report of the distribution service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub healthy: bool,
    #[serde(default)]
    pub pattern_count: Option<u64>,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Serialize)]
struct DeleteRequest<'a> {
    id: &'a str,
    service_name: &'a str,
}

/// Remote store for sharing error patterns across services.
#[async_trait]
pub trait PatternDistribution: Send + Sync {
    async fn get_patterns(&self, service: &str) -> Result<Vec<ErrorPattern>, PatternServiceError>;

    async fn update_pattern(&self, pattern: &ErrorPattern) -> Result<(), PatternServiceError>;

    async fn delete_pattern(
        &self,
        service: &str,
        pattern_id: &str,
    ) -> Result<(), PatternServiceError>;

    async fn publish(&self, analysis: &ErrorAnalysis) -> Result<(), PatternServiceError>;

    async fn history(
        &self,
        correlation_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ErrorAnalysis>, PatternServiceError>;

    async fn status(&self) -> Result<ServiceStatus, PatternServiceError>;
}

pub struct HttpPatternClient {
    client: Client,
    base_url: String,
}

impl HttpPatternClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, PatternServiceError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Build from configuration; fails when no service URL is set.
    pub fn from_config(config: &PatternConfig) -> Result<Self, PatternServiceError> {
        let url = config
            .service_url
            .as_deref()
            .ok_or(PatternServiceError::NotConfigured)?;
        Self::new(url, Duration::from_secs(config.request_timeout_secs))
    }

    fn url(&self, route: &str) -> String {
        format!("{}{}", self.base_url, route)
    }

    fn url_with_params(
        &self,
        route: &str,
        params: &[(&str, &str)],
    ) -> Result<Url, PatternServiceError> {
        Url::parse_with_params(&self.url(route), params)
            .map_err(|e| PatternServiceError::InvalidUrl(e.to_string()))
    }

    async fn check(response: Response) -> Result<Response, PatternServiceError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(PatternServiceError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[async_trait]
impl PatternDistribution for HttpPatternClient {
    async fn get_patterns(&self, service: &str) -> Result<Vec<ErrorPattern>, PatternServiceError> {
        debug!(service, "Fetching patterns");
        let url = self.url_with_params("/patterns", &[("service", service)])?;
        let response = self.client.get(url).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn update_pattern(&self, pattern: &ErrorPattern) -> Result<(), PatternServiceError> {
        let response = self
            .client
            .post(self.url("/patterns/update"))
            .json(pattern)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn delete_pattern(
        &self,
        service: &str,
        pattern_id: &str,
    ) -> Result<(), PatternServiceError> {
        let response = self
            .client
            .post(self.url("/patterns/delete"))
            .json(&DeleteRequest {
                id: pattern_id,
                service_name: service,
            })
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn publish(&self, analysis: &ErrorAnalysis) -> Result<(), PatternServiceError> {
        let response = self
            .client
            .post(self.url("/publish"))
            .json(analysis)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn history(
        &self,
        correlation_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ErrorAnalysis>, PatternServiceError> {
        let (start, end) = (start.to_rfc3339(), end.to_rfc3339());
        let url = self.url_with_params(
            "/history",
            &[
                ("correlationId", correlation_id),
                ("start", start.as_str()),
                ("end", end.as_str()),
            ],
        )?;
        let response = self.client.get(url).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn status(&self) -> Result<ServiceStatus, PatternServiceError> {
        let response = self.client.get(self.url("/status")).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }
}
