//! reqwest-backed [`RequestExecutor`].
//!
//! This is the shipping transport for the Armazém backend. All non-success
//! responses funnel through [`ApiError::from_response`] so the rest of the
//! crate only ever sees classified failures.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::auth::{Permissions, Session};
use crate::config::Config;

use super::{ApiError, RequestExecutor};

// ============================================================================
// Constants
// ============================================================================

/// Production API base URL
const API_BASE_URL: &str = "https://api.armazem.app";

/// Homologation (test) API base URL
const TEST_API_BASE_URL: &str = "https://hml.api.armazem.app";

/// HTTP request timeout in seconds.
/// 30s allows for slow warehouse-floor connections while failing fast enough
/// for a usable login screen.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Header carrying the secondary session identifier on transactional calls
const SECONDARY_SESSION_HEADER: &str = "X-Secondary-Session";

/// Endpoints that mutate stock and therefore demand the secondary session
/// identifier. Calling one without it is a re-auth condition, decided locally
/// without a round trip.
const TRANSACTIONAL_ENDPOINTS: &[&str] = &[
    "movements/confirm",
    "picking/confirm",
    "inventory/adjust",
    "orders/close",
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    user_id: i64,
    session_token: String,
    #[serde(default)]
    secondary_session_id: Option<String>,
    #[serde(default)]
    is_test_environment: Option<bool>,
}

/// HTTP executor for the Armazém backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpExecutor {
    client: Client,
    base_url: String,
    test_environment: bool,
}

impl HttpExecutor {
    pub fn new(config: &Config) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        let base_url = match config.base_url {
            Some(ref url) => url.trim_end_matches('/').to_string(),
            None if config.test_environment => TEST_API_BASE_URL.to_string(),
            None => API_BASE_URL.to_string(),
        };

        Ok(Self {
            client,
            base_url,
            test_environment: config.test_environment,
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    /// Check if a response is successful. Returns `Ok(None)` for a rate limit
    /// (caller should back off and retry), `Err` for everything else.
    async fn check_response(
        response: reqwest::Response,
    ) -> Result<Option<reqwest::Response>, ApiError> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_response(status, &body))
        }
    }

    /// POST with bounded exponential backoff on 429s, the only transport-level
    /// retry this client performs.
    async fn post_json(
        &self,
        url: &str,
        headers: header::HeaderMap,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, ApiError> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = self
                .client
                .post(url)
                .headers(headers.clone())
                .json(payload)
                .send()
                .await?;

            match Self::check_response(response).await? {
                Some(response) => {
                    return response
                        .json()
                        .await
                        .map_err(|e| ApiError::InvalidResponse(e.to_string()));
                }
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited);
                    }
                    warn!(url, retry = retries, backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2;
                }
            }
        }
    }

    /// GET with the same bounded 429 backoff as [`post_json`](Self::post_json).
    async fn get_json(
        &self,
        url: &str,
        headers: header::HeaderMap,
    ) -> Result<serde_json::Value, ApiError> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = self
                .client
                .get(url)
                .headers(headers.clone())
                .send()
                .await?;

            match Self::check_response(response).await? {
                Some(response) => {
                    return response
                        .json()
                        .await
                        .map_err(|e| ApiError::InvalidResponse(e.to_string()));
                }
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited);
                    }
                    warn!(url, retry = retries, backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2;
                }
            }
        }
    }

    fn bearer_headers(token: &str) -> Result<header::HeaderMap, ApiError> {
        let mut headers = header::HeaderMap::new();
        let value = header::HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| ApiError::InvalidResponse(format!("invalid token: {}", e)))?;
        headers.insert(header::AUTHORIZATION, value);
        Ok(headers)
    }

    fn is_transactional(endpoint: &str) -> bool {
        let endpoint = endpoint.trim_start_matches('/');
        TRANSACTIONAL_ENDPOINTS.iter().any(|e| *e == endpoint)
    }
}

#[async_trait]
impl RequestExecutor for HttpExecutor {
    async fn login(
        &self,
        username: &str,
        password: &str,
        device_token: &str,
    ) -> Result<Session, ApiError> {
        let url = self.url("auth/login");
        let payload = serde_json::json!({
            "username": username,
            "password": password,
            "deviceToken": device_token,
        });

        let body = self.post_json(&url, header::HeaderMap::new(), &payload).await?;
        let login: LoginResponse = serde_json::from_value(body)
            .map_err(|e| ApiError::InvalidResponse(format!("login response: {}", e)))?;

        Ok(Session {
            user_id: login.user_id,
            username: username.to_string(),
            session_token: login.session_token,
            secondary_session_id: login.secondary_session_id,
            is_test_environment: login.is_test_environment.unwrap_or(self.test_environment),
        })
    }

    async fn fetch_permissions(&self, token: &str) -> Result<Permissions, ApiError> {
        let url = self.url("auth/permissions");
        let body = self.get_json(&url, Self::bearer_headers(token)?).await?;
        serde_json::from_value(body)
            .map_err(|e| ApiError::InvalidResponse(format!("permissions response: {}", e)))
    }

    async fn call(
        &self,
        token: &str,
        secondary_session_id: Option<&str>,
        endpoint: &str,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, ApiError> {
        let mut headers = Self::bearer_headers(token)?;

        if Self::is_transactional(endpoint) {
            match secondary_session_id {
                Some(secondary) => {
                    let value = header::HeaderValue::from_str(secondary)
                        .map_err(|e| ApiError::InvalidResponse(format!("invalid secondary id: {}", e)))?;
                    headers.insert(SECONDARY_SESSION_HEADER, value);
                }
                None => {
                    debug!(endpoint, "Transactional call without secondary session id");
                    return Err(ApiError::ReauthRequired);
                }
            }
        }

        self.post_json(&self.url(endpoint), headers, &payload).await
    }

    async fn logout(&self, token: &str) -> Result<(), ApiError> {
        let url = self.url("auth/logout");
        let response = self
            .client
            .post(&url)
            .headers(Self::bearer_headers(token)?)
            .send()
            .await?;

        Self::check_response(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn executor_for(server: &MockServer) -> HttpExecutor {
        HttpExecutor::new(&Config {
            base_url: Some(server.uri()),
            ..Config::default()
        })
        .expect("build executor")
    }

    #[test]
    fn transactional_endpoints_are_recognized() {
        assert!(HttpExecutor::is_transactional("movements/confirm"));
        assert!(HttpExecutor::is_transactional("/picking/confirm"));
        assert!(!HttpExecutor::is_transactional("stock/lookup"));
    }

    #[tokio::test]
    async fn transactional_call_without_secondary_id_fails_locally() {
        let executor = HttpExecutor::new(&Config::default()).expect("build executor");
        let result = executor
            .call("token", None, "inventory/adjust", serde_json::json!({}))
            .await;
        assert!(matches!(result, Err(ApiError::ReauthRequired)));
    }

    #[test]
    fn base_url_follows_environment() {
        let prod = HttpExecutor::new(&Config::default()).expect("build executor");
        assert_eq!(prod.base_url, API_BASE_URL);

        let test = HttpExecutor::new(&Config {
            test_environment: true,
            ..Config::default()
        })
        .expect("build executor");
        assert_eq!(test.base_url, TEST_API_BASE_URL);

        let custom = HttpExecutor::new(&Config {
            base_url: Some("http://localhost:8080/".to_string()),
            ..Config::default()
        })
        .expect("build executor");
        assert_eq!(custom.base_url, "http://localhost:8080");
    }

    #[tokio::test]
    async fn rate_limited_permissions_fetch_backs_off_and_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/permissions"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/auth/permissions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "warehouseCodes": "1",
                "warehouseNames": "1 - ATACADO",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let permissions = executor_for(&server)
            .fetch_permissions("tok")
            .await
            .expect("permissions after backoff");
        assert_eq!(permissions.warehouse_codes, "1");
    }

    #[tokio::test]
    async fn permissions_failure_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/permissions"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(serde_json::json!({ "reauthRequired": true })),
            )
            .mount(&server)
            .await;

        let result = executor_for(&server).fetch_permissions("tok").await;
        assert!(matches!(result, Err(ApiError::ReauthRequired)));
    }
}
