use std::collections::BTreeMap;
use std::time::Duration;

use actix_web::http::header::{HeaderName, HeaderValue};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;
use url::Url;

use crate::config::DelegationConfig;

use super::extract::AuthRequest;

/// Headers granted by an authorization endpoint, to be set on the forwarded
/// request.
pub type Grant = Vec<(HeaderName, HeaderValue)>;

/// Why a delegated authorization did not succeed.
#[derive(Error, Debug)]
pub enum DelegationError {
    #[error("rule has no authorization endpoint")]
    NoEndpoint,

    #[error("error contacting endpoint: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("endpoint answered with status {0}")]
    Status(u16),

    #[error("couldn't decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("endpoint granted an invalid header {0:?}")]
    InvalidHeader(String),
}

impl DelegationError {
    /// Status code answered by the endpoint, if it answered with one other
    /// than 200.
    pub fn status(&self) -> Option<u16> {
        match self {
            DelegationError::Status(code) => Some(*code),
            _ => None,
        }
    }
}

/// Makes the actual authorization decision for a governed request.
///
/// Implementations are shared by all concurrent evaluations.
#[async_trait]
pub trait Delegator: Send + Sync {
    async fn delegate(&self, endpoint: &Url, req: &AuthRequest) -> Result<Grant, DelegationError>;
}

/// Delegates over HTTP: the credentials are POSTed as JSON to the endpoint,
/// which answers 200 with a JSON object of headers to grant.
pub struct HttpDelegator {
    client: reqwest::Client,
}

impl HttpDelegator {
    pub fn new(cfg: &DelegationConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .connect_timeout(Duration::from_secs(cfg.connect_timeout_secs))
            .pool_max_idle_per_host(cfg.pool_max_idle_per_host)
            .build()
            .context("build delegation client")?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Delegator for HttpDelegator {
    async fn delegate(&self, endpoint: &Url, req: &AuthRequest) -> Result<Grant, DelegationError> {
        let resp = self.client.post(endpoint.clone()).json(req).send().await?;

        let status = resp.status();
        if status != StatusCode::OK {
            return Err(DelegationError::Status(status.as_u16()));
        }

        let body = resp.bytes().await?;
        let headers: BTreeMap<String, String> = serde_json::from_slice(&body)?;
        into_grant(headers)
    }
}

pub fn into_grant(headers: BTreeMap<String, String>) -> Result<Grant, DelegationError> {
    let mut grant = Vec::with_capacity(headers.len());
    for (name, value) in headers {
        let header_name = match HeaderName::from_bytes(name.as_bytes()) {
            Ok(header_name) => header_name,
            Err(_) => return Err(DelegationError::InvalidHeader(name)),
        };
        let header_value = match HeaderValue::from_str(&value) {
            Ok(header_value) => header_value,
            Err(_) => return Err(DelegationError::InvalidHeader(name)),
        };
        grant.push((header_name, header_value));
    }
    Ok(grant)
}
