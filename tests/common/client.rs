//! HTTP client for end-to-end tests
//!
//! This module wraps reqwest and provides methods for all server endpoints.
//! When API routes or request formats change, update only this file.

use super::constants::*;
use pezzottify_library_server::feed::{parse_body, FeedBody};
use reqwest::{Response, StatusCode};
use std::time::Duration;

/// HTTP test client, optionally sending Basic credentials
pub struct TestClient {
    /// The underlying reqwest client (public for custom requests in tests)
    pub client: reqwest::Client,
    /// The base URL of the test server
    pub base_url: String,
    password: Option<String>,
}

/// A decoded feed response
pub struct FeedResponse {
    pub status: StatusCode,
    pub modified: Option<usize>,
    pub deleted: Option<usize>,
    pub last_modified: Option<i64>,
    pub body: FeedBody,
}

fn header<T: std::str::FromStr>(response: &Response, name: &str) -> Option<T> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

impl TestClient {
    /// Creates a client that sends no credentials
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self {
            client,
            base_url,
            password: None,
        }
    }

    /// Creates a client sending Basic credentials with the given password
    pub fn with_password(base_url: String, password: &str) -> Self {
        Self {
            password: Some(password.to_string()),
            ..Self::new(base_url)
        }
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(format!("{}{}", self.base_url, path));
        match &self.password {
            Some(password) => request.basic_auth("client", Some(password)),
            None => request,
        }
    }

    // ========================================================================
    // Server info
    // ========================================================================

    pub async fn info(&self) -> Response {
        self.get("/info").send().await.expect("Info request failed")
    }

    pub async fn start_scan(&self) -> Response {
        let request = self.client.post(format!("{}/scan", self.base_url));
        let request = match &self.password {
            Some(password) => request.basic_auth("client", Some(password)),
            None => request,
        };
        request.send().await.expect("Scan request failed")
    }

    // ========================================================================
    // Feeds
    // ========================================================================

    /// Requests a feed, sending `X-Modified-Since` when given
    pub async fn get_feed_raw(&self, entity: &str, since: Option<&str>) -> Response {
        let mut request = self.get(&format!("/feeds/{}", entity));
        if let Some(since) = since {
            request = request.header("X-Modified-Since", since);
        }
        request.send().await.expect("Feed request failed")
    }

    /// Requests and decodes a feed
    pub async fn get_feed(&self, entity: &str, since: Option<i64>) -> FeedResponse {
        let since = since.map(|s| s.to_string());
        let response = self.get_feed_raw(entity, since.as_deref()).await;
        let status = response.status();
        let modified = header(&response, "X-Records-Modified");
        let deleted = header(&response, "X-Records-Deleted");
        let last_modified = header(&response, "X-Last-Modified");
        let bytes = response.bytes().await.expect("Failed to read feed body");
        let body = if status == StatusCode::OK {
            parse_body(&bytes).expect("Malformed feed body")
        } else {
            FeedBody::default()
        };
        FeedResponse {
            status,
            modified,
            deleted,
            last_modified,
            body,
        }
    }

    // ========================================================================
    // Content
    // ========================================================================

    pub async fn stream_song(&self, id: i64, range: Option<&str>) -> Response {
        let mut request = self.get(&format!("/songs/{}", id));
        if let Some(range) = range {
            request = request.header("Range", range);
        }
        request.send().await.expect("Song request failed")
    }

    pub async fn get_image(&self, entity: &str, size: &str, id: i64) -> Response {
        self.get(&format!("/image/{}/{}/{}", entity, size, id))
            .send()
            .await
            .expect("Image request failed")
    }
}
