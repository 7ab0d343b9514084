//! Token metadata enrichment for minted NFTs.
//!
//! [`MetadataFetcher`] is the outbound HTTP seam used by the mint
//! synchronizer. [`HttpMetadataFetcher`] resolves the token URI (rewriting
//! `ipfs://` to a gateway), issues a GET, and parses the body leniently:
//! anything that is not the expected schema degrades to missing fields
//! rather than failing the event. A client error other than 429 means
//! the document is gone for good and also degrades to empty metadata.
//! Transport failures, 429 and 5xx are errors, retried next tick.

use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;

use crate::error::ReconcileError;

/// Metadata document served at a token URI.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TokenMetadata {
    /// Display name.
    pub name: Option<String>,
    /// Description.
    pub description: Option<String>,
    /// Full-size image URL (`image_url`, falling back to `image`).
    pub image_url: Option<String>,
    /// Preview image URL.
    pub image_preview_url: Option<String>,
    /// Thumbnail image URL.
    pub image_thumbnail_url: Option<String>,
    /// Original image URL.
    pub image_original_url: Option<String>,
    /// Traits (`traits`, falling back to `attributes`).
    pub traits: Option<serde_json::Value>,
    /// Royalty configuration.
    pub royalties: Option<serde_json::Value>,
}

impl TokenMetadata {
    /// Parses a metadata body, tolerating any schema deviation.
    ///
    /// A body that is not JSON, or JSON that is not an object, yields
    /// empty metadata. Fields of the wrong type are treated as absent.
    #[must_use]
    pub fn parse(body: &[u8]) -> Self {
        let Ok(serde_json::Value::Object(doc)) = serde_json::from_slice(body) else {
            return Self::default();
        };
        let text = |key: &str| {
            doc.get(key)
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)
        };
        let structured = |key: &str| {
            doc.get(key)
                .filter(|v| v.is_array() || v.is_object())
                .cloned()
        };
        Self {
            name: text("name"),
            description: text("description"),
            image_url: text("image_url").or_else(|| text("image")),
            image_preview_url: text("image_preview_url"),
            image_thumbnail_url: text("image_thumbnail_url"),
            image_original_url: text("image_original_url"),
            traits: structured("traits").or_else(|| structured("attributes")),
            royalties: structured("royalties"),
        }
    }
}

/// Fetches metadata for a token URI.
pub trait MetadataFetcher: Send + Sync {
    /// Fetches and parses the metadata document at `token_uri`.
    fn fetch(
        &self,
        token_uri: &str,
    ) -> impl Future<Output = Result<TokenMetadata, ReconcileError>> + Send;
}

/// Rewrites `ipfs://` URIs to an HTTP gateway; other URIs pass through.
#[must_use]
pub fn resolve_token_uri(token_uri: &str, ipfs_gateway: &str) -> String {
    let token_uri = token_uri.trim();
    match token_uri.strip_prefix("ipfs://") {
        Some(path) => {
            let path = path.strip_prefix("ipfs/").unwrap_or(path);
            format!("{}/ipfs/{path}", ipfs_gateway.trim_end_matches('/'))
        }
        None => token_uri.to_string(),
    }
}

/// `reqwest`-backed [`MetadataFetcher`].
#[derive(Debug, Clone)]
pub struct HttpMetadataFetcher {
    client: reqwest::Client,
    ipfs_gateway: String,
}

impl HttpMetadataFetcher {
    /// Builds a fetcher with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Internal`] if the HTTP client cannot be
    /// constructed.
    pub fn new(timeout: Duration, ipfs_gateway: &str) -> Result<Self, ReconcileError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ReconcileError::Internal(format!("http client: {e}")))?;
        Ok(Self {
            client,
            ipfs_gateway: ipfs_gateway.to_string(),
        })
    }
}

impl MetadataFetcher for HttpMetadataFetcher {
    async fn fetch(&self, token_uri: &str) -> Result<TokenMetadata, ReconcileError> {
        let url = resolve_token_uri(token_uri, &self.ipfs_gateway);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ReconcileError::Metadata(format!("GET {url}: {e}")))?;
        let status = response.status();
        if is_permanent_failure(status) {
            tracing::warn!(%url, %status, "token metadata unavailable, minting without it");
            return Ok(TokenMetadata::default());
        }
        let response = response
            .error_for_status()
            .map_err(|e| ReconcileError::Metadata(format!("GET {url}: {e}")))?;
        let body = response
            .bytes()
            .await
            .map_err(|e| ReconcileError::Metadata(format!("GET {url}: {e}")))?;

        tracing::debug!(%url, bytes = body.len(), "token metadata fetched");
        Ok(TokenMetadata::parse(&body))
    }
}

fn is_permanent_failure(status: StatusCode) -> bool {
    status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS
}
