//! Pinning service client.
//!
//! [`PinningService`] is the seam the publisher talks to. [`PinataClient`] is
//! the HTTP implementation, [`Retrying`] wraps any service with bounded
//! exponential backoff for transient failures.

use log::{debug, warn};
use rand::Rng;
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::path::Path;
use std::thread;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::PublishError;
use crate::metadata::IPFS_SCHEME;

pub const API_KEY_ENV: &str = "PINATA_API_KEY";
pub const API_SECRET_ENV: &str = "PINATA_API_SECRET";

const PIN_FILE_PATH: &str = "/pinning/pinFileToIPFS";
const PIN_JSON_PATH: &str = "/pinning/pinJSONToIPFS";

/// What the pinning service hands back for every pinned object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PinResponse {
    pub ipfs_hash: String,
    pub pin_size: u64,
    pub timestamp: String,
}

impl PinResponse {
    pub fn uri(&self) -> String {
        format!("{}{}", IPFS_SCHEME, self.ipfs_hash)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PinError {
    #[error("Failed to send request: {source}")]
    RequestFailed {
        #[from]
        source: reqwest::Error,
    },
    #[error("Request failed: status: {status} message: {message}")]
    RequestFailedWithStatus { status: u16, message: String },
    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },
}

impl PinError {
    /// Transport failures, rate limiting and server errors are worth another
    /// attempt. Everything else (bad credentials, malformed requests) is not.
    pub fn is_transient(&self) -> bool {
        match self {
            PinError::RequestFailed { .. } => true,
            PinError::RequestFailedWithStatus { status, .. } => *status == 429 || (500..600).contains(status),
            PinError::InvalidResponse { .. } => false,
        }
    }
}

pub trait PinningService: Sync {
    /// Pins raw file content, tagged with `name`.
    fn pin_file(&self, name: &str, content: Vec<u8>) -> Result<PinResponse, PinError>;

    /// Pins a JSON document, tagged with `name`.
    fn pin_json(&self, name: &str, content: &Value) -> Result<PinResponse, PinError>;
}

impl<S: PinningService + ?Sized> PinningService for &S {
    fn pin_file(&self, name: &str, content: Vec<u8>) -> Result<PinResponse, PinError> {
        (**self).pin_file(name, content)
    }

    fn pin_json(&self, name: &str, content: &Value) -> Result<PinResponse, PinError> {
        (**self).pin_json(name, content)
    }
}

#[derive(Clone)]
pub struct PinataCredentials {
    pub api_key: String,
    pub api_secret: String,
}

impl PinataCredentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    /// Reads `PINATA_API_KEY` and `PINATA_API_SECRET`. Empty values count as missing.
    pub fn from_env() -> Result<Self, PublishError> {
        let read = |var: &'static str| {
            std::env::var(var)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or(PublishError::MissingCredential(var))
        };
        Ok(Self::new(read(API_KEY_ENV)?, read(API_SECRET_ENV)?))
    }
}

impl fmt::Debug for PinataCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinataCredentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug)]
pub struct PinataClient {
    http: Client,
    api_url: String,
    credentials: PinataCredentials,
}

impl PinataClient {
    pub fn new(api_url: &str, credentials: PinataCredentials, timeout: Duration) -> Result<Self, PinError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.http
            .post(format!("{}{}", self.api_url, path))
            .header("pinata_api_key", &self.credentials.api_key)
            .header("pinata_secret_api_key", &self.credentials.api_secret)
    }

    fn send(&self, request: RequestBuilder) -> Result<PinResponse, PinError> {
        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().unwrap_or_default();
            return Err(PinError::RequestFailedWithStatus {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.text()?;
        serde_json::from_str(&body).map_err(|e| PinError::InvalidResponse {
            message: format!("{}: {}", e, body),
        })
    }
}

impl PinningService for PinataClient {
    fn pin_file(&self, name: &str, content: Vec<u8>) -> Result<PinResponse, PinError> {
        let part = Part::bytes(content)
            .file_name(name.to_string())
            .mime_str(mime_type(name))?;
        let form = Form::new()
            .part("file", part)
            .text("pinataMetadata", json!({ "name": name }).to_string());

        debug!("POST {} ({})", PIN_FILE_PATH, name);
        self.send(self.post(PIN_FILE_PATH).multipart(form))
    }

    fn pin_json(&self, name: &str, content: &Value) -> Result<PinResponse, PinError> {
        let body = json!({
            "pinataContent": content,
            "pinataMetadata": { "name": name },
        });

        debug!("POST {} ({})", PIN_JSON_PATH, name);
        self.send(self.post(PIN_JSON_PATH).json(&body))
    }
}

/// 拡張子から MIME タイプを推定
pub fn mime_type(file_name: &str) -> &'static str {
    let path = Path::new(file_name);
    let is_svg = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("svg"));
    if is_svg {
        return "image/svg+xml";
    }
    image::ImageFormat::from_path(path)
        .map(|format| format.to_mime_type())
        .unwrap_or("application/octet-stream")
}

/// Retries transient failures of the wrapped service.
#[derive(Debug)]
pub struct Retrying<S> {
    inner: S,
    policy: RetryConfig,
}

impl<S: PinningService> Retrying<S> {
    pub fn new(inner: S, policy: RetryConfig) -> Self {
        Self { inner, policy }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    fn run<T>(&self, name: &str, mut call: impl FnMut() -> Result<T, PinError>) -> Result<T, PinError> {
        let mut attempt = 1;
        loop {
            match call() {
                Err(err) if err.is_transient() && attempt < self.policy.max_attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        "Pinning {} failed (attempt {}/{}): {}. Retrying in {:?}",
                        name, attempt, self.policy.max_attempts, err, delay
                    );
                    thread::sleep(delay);
                    attempt += 1;
                },
                result => return result,
            }
        }
    }

    /// Exponential delay for the given (1-based) attempt with up to 50% jitter,
    /// never above `max_backoff_ms`.
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .policy
            .initial_backoff_ms
            .saturating_mul(1u64 << (attempt - 1).min(20))
            .min(self.policy.max_backoff_ms);
        let jitter = rand::thread_rng().gen_range(0..=exp / 2);
        Duration::from_millis((exp + jitter).min(self.policy.max_backoff_ms))
    }
}

impl<S: PinningService> PinningService for Retrying<S> {
    fn pin_file(&self, name: &str, content: Vec<u8>) -> Result<PinResponse, PinError> {
        self.run(name, || self.inner.pin_file(name, content.clone()))
    }

    fn pin_json(&self, name: &str, content: &Value) -> Result<PinResponse, PinError> {
        self.run(name, || self.inner.pin_json(name, content))
    }
}
