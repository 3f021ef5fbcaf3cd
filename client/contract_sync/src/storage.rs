//! File-storage boundary: opaque blobs in, content identifiers out.
//!
//! Project icons and banners are pinned on IPFS through its HTTP API
//! (`/api/v0/add`). The contract only ever stores the `ipfs://<cid>`
//! identifier; browsers fetch the file from a public gateway.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use crate::errors::{Result, SyncError};

const IPFS_SCHEME: &str = "ipfs://";

#[async_trait]
pub trait FileStore: Send + Sync {
    /// Store `bytes` and return their content identifier.
    async fn upload(&self, file_name: &str, bytes: Vec<u8>) -> Result<String>;

    /// URL a browser can fetch `identifier` from.
    fn resolve(&self, identifier: &str) -> Result<String>;
}

/// Response of `POST /api/v0/add`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AddResponse {
    hash: String,
}

pub struct IpfsStore {
    client: Client,
    api_url: String,
    gateway_url: String,
    /// `Authorization` header value for pinning services that require one.
    auth: Option<String>,
}

impl IpfsStore {
    pub fn new(
        api_url: &str,
        gateway_url: &str,
        credentials: Option<(&str, &str)>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        let auth = credentials.map(|(id, secret)| {
            format!("Basic {}", general_purpose::STANDARD.encode(format!("{id}:{secret}")))
        });
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            gateway_url: gateway_url.trim_end_matches('/').to_string(),
            auth,
        })
    }
}

#[async_trait]
impl FileStore for IpfsStore {
    async fn upload(&self, file_name: &str, bytes: Vec<u8>) -> Result<String> {
        let size = bytes.len();
        let form = Form::new().part("file", Part::bytes(bytes).file_name(file_name.to_string()));

        let mut req = self
            .client
            .post(format!("{}/api/v0/add?pin=true", self.api_url))
            .multipart(form);
        if let Some(auth) = &self.auth {
            req = req.header(reqwest::header::AUTHORIZATION, auth);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| SyncError::Storage(format!("upload of {file_name} failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(SyncError::Storage(format!(
                "upload of {file_name} returned HTTP {}",
                resp.status()
            )));
        }
        let added: AddResponse = resp
            .json()
            .await
            .map_err(|e| SyncError::Storage(format!("unreadable add response: {e}")))?;

        info!("Pinned {file_name} ({size} bytes) as {}", added.hash);
        Ok(format!("{IPFS_SCHEME}{}", added.hash))
    }

    fn resolve(&self, identifier: &str) -> Result<String> {
        let cid = identifier.strip_prefix(IPFS_SCHEME).unwrap_or(identifier);
        if cid.is_empty() || cid.starts_with('/') || cid.contains(char::is_whitespace) {
            return Err(SyncError::Storage(format!("not a content identifier: {identifier:?}")));
        }
        debug!("Resolving {cid} via {}", self.gateway_url);
        Ok(format!("{}/ipfs/{cid}", self.gateway_url))
    }
}
