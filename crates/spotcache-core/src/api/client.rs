//! HTTP client for the food-spot REST API.
//!
//! Every data endpoint returns the raw JSON payload. Payload shapes vary
//! between endpoints and releases; turning them into lists is the query
//! layer's job.

use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::{header, Client, Method, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::auth::SessionData;

use super::ApiError;

/// HTTP request timeout in seconds.
/// Fetch timeouts live here; the query cache never times out a fetch itself.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    #[serde(alias = "accessToken")]
    token: String,
}

/// The remote operations the query layer fetches through.
///
/// Futures are `'static` so they can run as detached fetch tasks.
pub trait SpotApi: Send + Sync {
    fn popular_spots(&self) -> BoxFuture<'static, Result<Value>>;
    fn favourites(&self, token: &str) -> BoxFuture<'static, Result<Value>>;
    fn profile(&self, token: &str) -> BoxFuture<'static, Result<Value>>;
    fn user_reviews(&self, token: &str, user_id: &str) -> BoxFuture<'static, Result<Value>>;
}

/// API client for the food-spot service.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Create a new ApiClient with the given token, sharing the connection pool.
    pub fn with_token(&self, token: impl Into<String>) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            token: Some(token.into()),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Build a URL from path segments, percent-encoding each one.
    /// Use this whenever a segment comes from server data.
    fn segments_url(&self, segments: &[&str]) -> Result<String> {
        let mut url = Url::parse(&self.base_url)
            .with_context(|| format!("Invalid API base URL: {}", self.base_url))?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("API base URL cannot have a path: {}", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url.into())
    }

    /// Exchange credentials for a session.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<SessionData> {
        let url = self.url("auth/login");
        let response = self
            .client
            .post(&url)
            .header(header::ACCEPT, "application/json")
            .json(&LoginRequest { username, password })
            .send()
            .await
            .context("Failed to send authentication request")?;

        let response = Self::check_response(response).await?;
        let auth: AuthResponse = response
            .json()
            .await
            .context("Failed to parse auth response")?;
        if auth.token.is_empty() {
            anyhow::bail!("Authentication response carried an empty token");
        }
        debug!(username = username, "Authenticated");

        Ok(SessionData::new(auth.token, username))
    }

    fn auth_headers(&self) -> Result<header::HeaderMap> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );
        if let Some(ref token) = self.token {
            headers.insert(
                header::AUTHORIZATION,
                header::HeaderValue::from_str(&format!("Bearer {}", token))?,
            );
        }
        Ok(headers)
    }

    /// Ok(None) means rate limited and worth retrying.
    async fn check_response_for_retry(
        response: reqwest::Response,
    ) -> Result<Option<reqwest::Response>> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body).into())
        }
    }

    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body).into())
        }
    }

    /// Send a request, backing off on 429, and return the JSON body.
    /// An empty body is returned as `null`.
    async fn request_json(&self, method: Method, url: String) -> Result<Value> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = self
                .client
                .request(method.clone(), &url)
                .headers(self.auth_headers()?)
                .send()
                .await
                .map_err(ApiError::from)
                .with_context(|| format!("Failed to send {} request to {}", method, url))?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => {
                    let text = response
                        .text()
                        .await
                        .with_context(|| format!("Failed to read response body from {}", url))?;
                    return parse_body(&text)
                        .with_context(|| format!("Failed to parse JSON response from {}", url));
                }
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited.into());
                    }
                    warn!(url = %url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2;
                }
            }
        }
    }

    async fn get(&self, path: &str) -> Result<Value> {
        self.request_json(Method::GET, self.url(path)).await
    }

    // ===== Data Fetching Methods =====

    pub async fn fetch_popular_spots(&self) -> Result<Value> {
        self.get("spots/popular").await
    }

    pub async fn fetch_favourites(&self) -> Result<Value> {
        self.get("users/me/favourites").await
    }

    pub async fn fetch_profile(&self) -> Result<Value> {
        self.get("users/me").await
    }

    pub async fn fetch_user_reviews(&self, user_id: &str) -> Result<Value> {
        let url = self.segments_url(&["users", user_id, "reviews"])?;
        self.request_json(Method::GET, url).await
    }
}

fn parse_body(text: &str) -> serde_json::Result<Value> {
    if text.trim().is_empty() {
        Ok(Value::Null)
    } else {
        serde_json::from_str(text)
    }
}

impl SpotApi for ApiClient {
    fn popular_spots(&self) -> BoxFuture<'static, Result<Value>> {
        let client = self.clone();
        async move { client.fetch_popular_spots().await }.boxed()
    }

    fn favourites(&self, token: &str) -> BoxFuture<'static, Result<Value>> {
        let client = self.with_token(token);
        async move { client.fetch_favourites().await }.boxed()
    }

    fn profile(&self, token: &str) -> BoxFuture<'static, Result<Value>> {
        let client = self.with_token(token);
        async move { client.fetch_profile().await }.boxed()
    }

    fn user_reviews(&self, token: &str, user_id: &str) -> BoxFuture<'static, Result<Value>> {
        let client = self.with_token(token);
        let user_id = user_id.to_string();
        async move { client.fetch_user_reviews(&user_id).await }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_url_joins_cleanly() {
        let client = ApiClient::new("https://api.example.com/v1/").unwrap();
        assert_eq!(client.base_url(), "https://api.example.com/v1");
        assert_eq!(client.url("/spots/popular"), "https://api.example.com/v1/spots/popular");
        assert_eq!(client.url("users/me"), "https://api.example.com/v1/users/me");
    }

    #[test]
    fn test_segments_are_escaped() {
        let client = ApiClient::new("https://api.example.com/v1").unwrap();
        assert_eq!(
            client.segments_url(&["users", "u1", "reviews"]).unwrap(),
            "https://api.example.com/v1/users/u1/reviews"
        );
        assert_eq!(
            client.segments_url(&["users", "../admin?x=1", "reviews"]).unwrap(),
            "https://api.example.com/v1/users/..%2Fadmin%3Fx=1/reviews"
        );

        let bare = ApiClient::new("http://localhost:8080").unwrap();
        assert_eq!(
            bare.segments_url(&["users", "7", "reviews"]).unwrap(),
            "http://localhost:8080/users/7/reviews"
        );
    }

    #[test]
    fn test_with_token_sets_bearer() {
        let client = ApiClient::new("http://localhost").unwrap();
        assert!(client.auth_headers().unwrap().get(header::AUTHORIZATION).is_none());

        let authed = client.with_token("abc");
        let headers = authed.auth_headers().unwrap();
        assert_eq!(headers.get(header::AUTHORIZATION).unwrap(), "Bearer abc");
        assert!(client.token.is_none());
    }

    #[test]
    fn test_parse_body() {
        assert_eq!(parse_body("").unwrap(), Value::Null);
        assert_eq!(parse_body("  \n").unwrap(), Value::Null);
        assert_eq!(parse_body(r#"{"data":[1]}"#).unwrap(), json!({"data": [1]}));
        assert!(parse_body("<html>").is_err());
    }

    #[test]
    fn test_auth_response_accepts_either_field() {
        let a: AuthResponse = serde_json::from_str(r#"{"token":"t1"}"#).unwrap();
        let b: AuthResponse = serde_json::from_str(r#"{"accessToken":"t2","user":{}}"#).unwrap();
        assert_eq!(a.token, "t1");
        assert_eq!(b.token, "t2");
    }
}
