use reqwest::{self, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::{collections::HashMap, time::Duration};
use thiserror::Error;

/// Custom error type for HTTP requests.
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("Could not build HTTP client: {0}")]
    Build(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("HTTP error: {0} ({1}). Response body: {2}")]
    HttpError(reqwest::Url, u16, String),
    #[error("Error deserializing JSON: {0}")]
    JsonError(String),
    #[error("API error {code}: {message}")]
    Api { code: String, message: String },
    #[error("Other error: {0}")]
    Other(String),
}

impl RequestError {
    /// Transport failures, throttling and server errors are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            RequestError::Transport(_) => true,
            RequestError::HttpError(_, status, _) => {
                *status == StatusCode::TOO_MANY_REQUESTS.as_u16() || *status >= 500
            }
            _ => false,
        }
    }
}

pub enum Method {
    Get,
    Post(Option<Vec<u8>>),
}

/// Thin wrapper over a configured `reqwest::Client`, constructed once per run
/// and passed to whoever needs it.
#[derive(Clone)]
pub struct HttpClient {
    inner: reqwest::Client,
}

impl HttpClient {
    pub fn new(timeout: Duration) -> Result<Self, RequestError> {
        let inner = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RequestError::Build(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Makes an HTTP request to the specified url with optional parameters.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,                    // Absolute URL.
        params: HashMap<&str, &str>,  // Optional query parameters.
        headers: HashMap<&str, &str>, // Optional header parameters.
        token: Option<&str>,
    ) -> Result<T, RequestError> {
        // Construct the URL.
        let url = if !params.is_empty() {
            reqwest::Url::parse_with_params(url, &params)
                .map_err(|e| RequestError::Other(e.to_string()))?
        } else {
            reqwest::Url::parse(url).map_err(|e| RequestError::Other(e.to_string()))?
        };

        // Construct the request
        let mut req: RequestBuilder = match method {
            Method::Get => self.inner.get(url.as_str()),
            Method::Post(body) => {
                let req = self
                    .inner
                    .post(url.as_str())
                    .header("Content-Type", "application/json; charset=utf-8");
                match body {
                    Some(body) => req.body(body),
                    None => req,
                }
            }
        };

        if let Some(token) = token {
            req = req.bearer_auth(token)
        }

        for (k, v) in headers {
            req = req.header(k, v);
        }

        let response = req
            .send()
            .await
            .map_err(|e| RequestError::Transport(e.to_string()))?;

        // Get the response status code.
        let status = response.status();

        // Handle non-success status codes.
        if !status.is_success() {
            let body = response
                .text()
                .await
                .map_err(|e| RequestError::Transport(e.to_string()))?;
            return Err(RequestError::HttpError(url, status.as_u16(), body));
        }

        // Deserialize the JSON response.
        response
            .json()
            .await
            .map_err(|e| RequestError::JsonError(e.to_string()))
    }
}
