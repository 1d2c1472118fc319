//! REST client for the Merkle mirror service
//!
//! Endpoints, each scoped to a tree by the `contractname` header:
//! - `POST /start`
//! - `GET /metadata/latestLeaf`
//! - `GET /leaf/index/{i}`
//! - `GET /siblingPath/{i}`

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{with_retry, LatestLeaf, MerkleMirror, MirrorLeaf, MirrorNode, RetryPolicy};
use crate::config::MirrorConfig;
use crate::error::MirrorError;

/// Header naming the tree a request is about
pub const CONTRACT_NAME_HEADER: &str = "contractname";

/// Mirror client over HTTP
#[derive(Clone, Debug)]
pub struct HttpMirrorClient {
    client: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl HttpMirrorClient {
    /// Create a client from config
    pub fn new(config: &MirrorConfig) -> Result<Self, MirrorError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| MirrorError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            retry: config.retry_policy(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        tree: &str,
        path: &str,
        leaf_index: Option<u64>,
    ) -> Result<T, MirrorError> {
        let url = format!("{}{}", self.base_url, path);
        let url = &url;
        let client = &self.client;
        with_retry(&self.retry, path, || async move {
            debug!(tree, url, "GET");
            let response = client
                .get(url.as_str())
                .header(CONTRACT_NAME_HEADER, tree)
                .send()
                .await?;
            let response = check_status(response, tree, leaf_index).await?;
            Ok(response.json::<T>().await?)
        })
        .await
    }
}

/// Map non-success statuses onto mirror errors
async fn check_status(response: Response, tree: &str, leaf_index: Option<u64>) -> Result<Response, MirrorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        if let Some(index) = leaf_index {
            return Err(MirrorError::NotFound {
                tree: tree.to_string(),
                index,
            });
        }
        return Err(MirrorError::UnknownTree(tree.to_string()));
    }
    let body = response.text().await.unwrap_or_default();
    Err(MirrorError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl MerkleMirror for HttpMirrorClient {
    /// One request; cold-start retries belong to `start_event_filter_with_retry`
    async fn start_event_filter(&self, tree: &str) -> Result<(), MirrorError> {
        let url = format!("{}/start", self.base_url);
        debug!(tree, url, "POST");
        let response = self
            .client
            .post(url.as_str())
            .header(CONTRACT_NAME_HEADER, tree)
            .send()
            .await?;
        check_status(response, tree, None).await?;
        Ok(())
    }

    async fn latest_leaf(&self, tree: &str) -> Result<LatestLeaf, MirrorError> {
        self.get_json(tree, "/metadata/latestLeaf", None).await
    }

    async fn leaf_by_index(&self, tree: &str, leaf_index: u64) -> Result<MirrorLeaf, MirrorError> {
        self.get_json(tree, &format!("/leaf/index/{}", leaf_index), Some(leaf_index))
            .await
    }

    async fn sibling_path(&self, tree: &str, leaf_index: u64) -> Result<Vec<MirrorNode>, MirrorError> {
        self.get_json(tree, &format!("/siblingPath/{}", leaf_index), Some(leaf_index))
            .await
    }
}
