//! Typed client for the `/api/v1` routes.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use hhrec_core::{HouseholdKey, RequestKind, RequestLogEntry, ResultRecord};

use crate::error::ClientError;
use crate::poller::ResultSource;

/// Body of a `202 Accepted` enqueue response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EnqueueResponse {
    pub status: String,
    pub household_key: HouseholdKey,
}

#[derive(Debug, Deserialize)]
struct RequestsResponse {
    requests: Vec<RequestLogEntry>,
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    /// `base_url` is the server root, e.g. `http://localhost:8080`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn health(&self) -> Result<bool, ClientError> {
        let resp = self.http.get(self.url("/health")).send().await?;
        Ok(resp.status().is_success())
    }

    /// Queue a lookup job for `household_key`.
    pub async fn enqueue(&self, household_key: HouseholdKey) -> Result<EnqueueResponse, ClientError> {
        let resp = self
            .http
            .post(self.url("/api/v1/recommendations:enqueue"))
            .json(&json!({ "household_key": household_key }))
            .send()
            .await?;

        expect_json(resp, StatusCode::ACCEPTED).await
    }

    /// Processed result, `None` while the job has not completed.
    pub async fn result(&self, household_key: HouseholdKey) -> Result<Option<ResultRecord>, ClientError> {
        self.optional_record(&format!("/api/v1/results/{household_key}")).await
    }

    /// Synchronous catalog read, `None` for an unknown household.
    pub async fn recommendations(&self, household_key: HouseholdKey) -> Result<Option<ResultRecord>, ClientError> {
        self.optional_record(&format!("/api/v1/recommendations/{household_key}"))
            .await
    }

    pub async fn log_request(
        &self,
        requester: &str,
        household_key: HouseholdKey,
        request_kind: RequestKind,
    ) -> Result<RequestLogEntry, ClientError> {
        let resp = self
            .http
            .post(self.url("/api/v1/requests"))
            .json(&json!({
                "requester": requester,
                "household_key": household_key,
                "request_kind": request_kind,
            }))
            .send()
            .await?;

        expect_json(resp, StatusCode::CREATED).await
    }

    /// The requester's most recent lookups, newest first.
    pub async fn recent_requests(&self, requester: &str) -> Result<Vec<RequestLogEntry>, ClientError> {
        let mut url = reqwest::Url::parse(&self.url("/api/v1/requests"))
            .map_err(|e| ClientError::Network(format!("invalid base url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| ClientError::Network("base url cannot carry a path".to_string()))?
            .push(requester);

        let resp = self.http.get(url).send().await?;

        let body: RequestsResponse = expect_json(resp, StatusCode::OK).await?;
        Ok(body.requests)
    }

    async fn optional_record(&self, path: &str) -> Result<Option<ResultRecord>, ClientError> {
        let resp = self.http.get(self.url(path)).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        expect_json(resp, StatusCode::OK).await.map(Some)
    }
}

async fn expect_json<T: DeserializeOwned>(resp: reqwest::Response, expected: StatusCode) -> Result<T, ClientError> {
    let status = resp.status();
    if status != expected {
        let body = resp.text().await.unwrap_or_default();
        return Err(ClientError::Api {
            status: status.as_u16(),
            body,
        });
    }
    resp.json::<T>().await.map_err(|e| ClientError::Decode(e.to_string()))
}

#[async_trait]
impl ResultSource for ApiClient {
    async fn fetch(&self, household_key: HouseholdKey) -> Result<Option<ResultRecord>, ClientError> {
        self.result(household_key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_trimmed() {
        let client = ApiClient::new("http://localhost:8080/");
        assert_eq!(client.url("/health"), "http://localhost:8080/health");
    }

    #[tokio::test]
    async fn unreachable_server_is_a_network_error() {
        // Port 9 (discard) on localhost is closed in test environments.
        let client = ApiClient::new("http://127.0.0.1:9");
        let err = client.health().await.unwrap_err();
        assert!(matches!(err, ClientError::Network(_)));
    }
}
