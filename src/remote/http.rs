use super::{LinkageFilter, LinkagePayload, LinkageRecord, RemoteCollaborator};
use crate::config::CanvasConfig;
use crate::core::{CanvasError, Entity, EntityKind, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

#[derive(Debug, Serialize)]
struct CreateEntityBody<'a> {
    name: &'a str,
}

/// REST client for the canvas backend.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: Client,
    base_url: String,
}

impl HttpRemote {
    pub fn new(config: &CanvasConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
        })
    }

    /// Reuse an existing client, e.g. one shared with the rest of the app.
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response> {
        let response = request.send().await?;
        let status = response.status();
        debug!(%status, what, "remote call completed");

        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::NOT_FOUND {
            return Err(CanvasError::not_found(format!("{what}: {body}")));
        }
        Err(CanvasError::remote(status.as_u16(), format!("{what}: {body}")))
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> Result<T> {
        let response = self.send(request, what).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl RemoteCollaborator for HttpRemote {
    async fn list_entities(&self, kind: EntityKind) -> Result<Vec<Entity>> {
        let url = self.url(&format!("/entities/{}", kind.path_segment()));
        self.send_json(self.client.get(url), "list entities").await
    }

    async fn create_entity(&self, kind: EntityKind, name: &str) -> Result<Entity> {
        let url = self.url(&format!("/entities/{}", kind.path_segment()));
        let request = self.client.post(url).json(&CreateEntityBody { name });
        self.send_json(request, "create entity").await
    }

    async fn list_linkages(&self, filter: &LinkageFilter) -> Result<Vec<LinkageRecord>> {
        let request = self.client.get(self.url("/linkages")).query(filter);
        self.send_json(request, "list linkages").await
    }

    async fn create_linkage(&self, payload: &LinkagePayload) -> Result<LinkageRecord> {
        let request = self.client.post(self.url("/linkages")).json(payload);
        self.send_json(request, "create linkage").await
    }

    async fn update_linkage(&self, id: &str, payload: &LinkagePayload) -> Result<LinkageRecord> {
        let request = self
            .client
            .put(self.url(&format!("/linkages/{id}")))
            .json(payload);
        self.send_json(request, "update linkage").await
    }

    async fn delete_linkage(&self, id: &str) -> Result<()> {
        let request = self.client.delete(self.url(&format!("/linkages/{id}")));
        self.send(request, "delete linkage").await?;
        Ok(())
    }
}
