//! Data-plane client for the Qdrant HTTP API.
//!
//! The collection reconciler only needs two calls: a health check and an
//! idempotent create-or-update of a collection. Both go through
//! [`DatabaseOps`] so tests can substitute an in-memory database.

use std::time::Duration;

use async_trait::async_trait;
use kube::ResourceExt;
use reqwest::StatusCode;
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use crate::controller::error::{Error, Result};
use crate::crd::{HTTP_PORT, QdrantCluster, QdrantCollectionSpec};

/// Header Qdrant reads the API key from.
pub const API_KEY_HEADER: &str = "api-key";

/// Where and how to reach one cluster's HTTP API.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatabaseEndpoint {
    pub base_url: String,
    pub api_key: Option<String>,
}

impl DatabaseEndpoint {
    /// Endpoint of the client service of `cluster`.
    pub fn for_cluster(cluster: &QdrantCluster, api_key: Option<String>) -> Self {
        let namespace = cluster.namespace().unwrap_or_else(|| "default".to_string());
        Self {
            base_url: format!(
                "http://{}.{}.svc.cluster.local:{}",
                cluster.name_any(),
                namespace,
                HTTP_PORT
            ),
            api_key,
        }
    }
}

/// Operations against a database cluster's data plane.
#[async_trait]
pub trait DatabaseOps: Send + Sync {
    /// Succeeds when the database reports ready.
    async fn health(&self, endpoint: &DatabaseEndpoint) -> Result<()>;

    /// Create the collection, or update it in place if it already exists.
    async fn upsert_collection(
        &self,
        endpoint: &DatabaseEndpoint,
        name: &str,
        spec: &QdrantCollectionSpec,
    ) -> Result<()>;
}

/// Request body for `PUT /collections/{name}`.
pub fn create_collection_body(spec: &QdrantCollectionSpec) -> Value {
    let mut body = Map::new();
    body.insert(
        "vectors".to_string(),
        json!({
            "size": spec.vector_size,
            "distance": spec.distance.to_string(),
        }),
    );
    if let Some(shards) = spec.shard_number {
        body.insert("shard_number".to_string(), json!(shards));
    }
    body.extend(update_params(spec));
    Value::Object(body)
}

/// Request body for `PATCH /collections/{name}`. Vector size and shard count
/// cannot change after creation, so only the mutable parameters are sent.
pub fn update_collection_body(spec: &QdrantCollectionSpec) -> Value {
    json!({ "params": Value::Object(update_params(spec)) })
}

fn update_params(spec: &QdrantCollectionSpec) -> Map<String, Value> {
    let mut params = Map::new();
    if let Some(rf) = spec.replication_factor {
        params.insert("replication_factor".to_string(), json!(rf));
    }
    if let Some(wcf) = spec.write_consistency_factor {
        params.insert("write_consistency_factor".to_string(), json!(wcf));
    }
    if let Some(on_disk) = spec.on_disk_payload {
        params.insert("on_disk_payload".to_string(), json!(on_disk));
    }
    params
}

/// `reqwest`-backed [`DatabaseOps`].
#[derive(Clone, Debug)]
pub struct QdrantHttpClient {
    http: reqwest::Client,
}

impl QdrantHttpClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Database(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http })
    }

    fn request(
        &self,
        method: reqwest::Method,
        endpoint: &DatabaseEndpoint,
        path: &str,
    ) -> reqwest::RequestBuilder {
        let url = format!("{}{}", endpoint.base_url, path);
        let builder = self.http.request(method, url);
        match &endpoint.api_key {
            Some(key) => builder.header(API_KEY_HEADER, key),
            None => builder,
        }
    }
}

async fn into_error(response: reqwest::Response, action: &str) -> Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Error::Database(format!("{action} returned {status}: {body}"))
}

#[async_trait]
impl DatabaseOps for QdrantHttpClient {
    async fn health(&self, endpoint: &DatabaseEndpoint) -> Result<()> {
        let response = self
            .request(reqwest::Method::GET, endpoint, "/readyz")
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(into_error(response, "health check").await)
        }
    }

    async fn upsert_collection(
        &self,
        endpoint: &DatabaseEndpoint,
        name: &str,
        spec: &QdrantCollectionSpec,
    ) -> Result<()> {
        let path = format!("/collections/{name}");

        let response = self
            .request(reqwest::Method::PUT, endpoint, &path)
            .json(&create_collection_body(spec))
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {
                info!(collection = %name, "Created collection");
                Ok(())
            }
            StatusCode::CONFLICT => {
                debug!(collection = %name, "Collection exists, updating parameters");
                let response = self
                    .request(reqwest::Method::PATCH, endpoint, &path)
                    .json(&update_collection_body(spec))
                    .send()
                    .await?;
                if response.status().is_success() {
                    Ok(())
                } else {
                    Err(into_error(response, "update collection").await)
                }
            }
            _ => Err(into_error(response, "create collection").await),
        }
    }
}
