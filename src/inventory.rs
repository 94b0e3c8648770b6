//! Client of the inventory service, where this process annotates its addresses and where the
//! local sensor is registered.
//!
//! Every request is signed with the API secret: the signed message is made of the method, the
//! URI path, the body checksum, the content type and the timestamp, each followed by a newline.

use crate::annotation::Annotation;
use crate::credentials::Credentials;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use reqwest::blocking::Client;
use reqwest::{Method, StatusCode};
use sha2::{Digest, Sha256};
use std::time::Duration;
use thiserror::Error;

pub const API_PREFIX: &str = "/openapi/v1";
const CONTENT_TYPE: &str = "application/json";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S+0000";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum InventoryError {
    /// The service answers 204 when the record to delete no longer exists.
    #[error("Other Error (204)")]
    NoContent,
    #[error("inventory service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("inventory request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("could not create annotation payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("could not sign request")]
    Signing,
}

impl InventoryError {
    /// The sensor was already removed on the service side.
    pub fn is_already_removed(&self) -> bool {
        matches!(self, InventoryError::NoContent)
    }
}

/// Operations of the inventory service used by the lifecycle
pub trait Inventory: Send + Sync {
    /// Read-only call checking connectivity and API privileges
    fn probe(&self) -> Result<(), InventoryError>;

    fn annotate(&self, scope: &str, annotation: &Annotation) -> Result<(), InventoryError>;

    fn delete_sensor(&self, id: &str) -> Result<(), InventoryError>;
}

pub struct HttpInventory {
    base: String,
    credentials: Credentials,
    client: Client,
}

impl HttpInventory {
    pub fn new(base_url: &str, credentials: Credentials) -> Result<Self, InventoryError> {
        // appliances are commonly deployed with self-signed certificates
        let client = Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("ship/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(HttpInventory {
            base: base_url.trim_end_matches('/').to_string(),
            credentials,
            client,
        })
    }

    fn send(&self, method: Method, path: &str, body: Option<Vec<u8>>) -> Result<(), InventoryError> {
        let uri_path = format!("{API_PREFIX}{path}");
        let url = format!("{}{uri_path}", self.base);
        let timestamp = chrono::Utc::now().format(TIMESTAMP_FORMAT).to_string();
        let cksum = body.as_deref().map(checksum).unwrap_or_default();
        let message = signing_message(method.as_str(), &uri_path, &cksum, CONTENT_TYPE, &timestamp);
        let signature = sign(self.credentials.secret(), &message)?;

        log::debug!("{method} {url}");
        let mut request = self
            .client
            .request(method, &url)
            .header("Id", self.credentials.key())
            .header("Authorization", signature)
            .header("Timestamp", timestamp)
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE);
        if let Some(body) = body {
            request = request.header("X-Tetration-Cksum", cksum).body(body);
        }
        let response = request.send()?;
        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NO_CONTENT => Err(InventoryError::NoContent),
            status => Err(InventoryError::Status {
                status: status.as_u16(),
                body: response.text().unwrap_or_default(),
            }),
        }
    }
}

impl Inventory for HttpInventory {
    fn probe(&self) -> Result<(), InventoryError> {
        self.send(Method::GET, "/sensors", None)
    }

    fn annotate(&self, scope: &str, annotation: &Annotation) -> Result<(), InventoryError> {
        let payload = serde_json::to_vec(annotation)?;
        self.send(
            Method::POST,
            &format!("/inventory/tags/{scope}"),
            Some(payload),
        )
    }

    fn delete_sensor(&self, id: &str) -> Result<(), InventoryError> {
        self.send(Method::DELETE, &format!("/sensors/{id}"), None)
    }
}

/// Hex-encoded SHA-256 of a request body
pub fn checksum(body: &[u8]) -> String {
    format!("{:x}", Sha256::digest(body))
}

pub fn signing_message(
    method: &str,
    uri_path: &str,
    checksum: &str,
    content_type: &str,
    timestamp: &str,
) -> String {
    format!("{method}\n{uri_path}\n{checksum}\n{content_type}\n{timestamp}\n")
}

pub fn sign(secret: &str, message: &str) -> Result<String, InventoryError> {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).map_err(|_| InventoryError::Signing)?;
    mac.update(message.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}
