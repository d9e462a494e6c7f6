//! Actor API client over HTTPS with the client certificate.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use tracing::{debug, info};

use crate::domain::{ApiError, ResourceDescriptor, ResourceKind};
use crate::ports::ControlPlane;

use super::security::TransportSecurityContext;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Where the actor API lives and who is calling it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorApiSettings {
    /// API host.
    pub host: String,
    /// API port.
    pub port: u16,
    /// Actor identity; first path segment of every URL.
    pub common_name: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl ActorApiSettings {
    /// `https://host:port/<common name>`
    pub fn base_url(&self) -> String {
        format!("https://{}:{}/{}", self.host, self.port, self.common_name)
    }
}

/// [`ControlPlane`] bound to one resource collection.
pub struct ActorApiClient {
    client: Client,
    base_url: String,
    kind: ResourceKind,
}

impl ActorApiClient {
    /// Client for `kind`, authenticating with `security`.
    pub fn new(
        settings: &ActorApiSettings,
        kind: ResourceKind,
        security: &TransportSecurityContext,
    ) -> Result<Self, ApiError> {
        let client = Client::builder()
            .use_preconfigured_tls((*security.client_config()).clone())
            .https_only(true)
            .timeout(settings.timeout)
            .build()
            .map_err(|e| ApiError::Client(e.to_string()))?;

        Ok(Self {
            client,
            base_url: settings.base_url(),
            kind,
        })
    }

    fn collection_url(&self) -> String {
        format!("{}/{}", self.base_url, self.kind.collection())
    }

    fn resource_url(&self, id: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.kind.collection(), id)
    }

    fn operation(&self, verb: &str) -> String {
        format!("{} {}", verb, self.kind.to_string().to_lowercase())
    }

    async fn execute(&self, operation: &str, request: RequestBuilder) -> Result<Vec<u8>, ApiError> {
        let response = request.send().await.map_err(|e| ApiError::Transport {
            operation: operation.to_string(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| ApiError::Transport {
            operation: operation.to_string(),
            reason: e.to_string(),
        })?;
        debug!(
            status = status.as_u16(),
            bytes = body.len(),
            "[actor-api] {} answered",
            operation
        );

        check_status(operation, status.as_u16(), &body)?;
        Ok(body.to_vec())
    }
}

/// Map a non-2xx status to [`ApiError::Status`].
pub(crate) fn check_status(operation: &str, status: u16, body: &[u8]) -> Result<(), ApiError> {
    if (200..300).contains(&status) {
        return Ok(());
    }
    Err(ApiError::Status {
        operation: operation.to_string(),
        status,
        body: String::from_utf8_lossy(body).into_owned(),
    })
}

/// Parse a 2xx body into a descriptor.
pub(crate) fn parse_descriptor(operation: &str, body: &[u8]) -> Result<ResourceDescriptor, ApiError> {
    ResourceDescriptor::from_json(body).map_err(|reason| ApiError::InvalidResponse {
        operation: operation.to_string(),
        reason,
    })
}

#[async_trait]
impl ControlPlane for ActorApiClient {
    fn kind(&self) -> ResourceKind {
        self.kind
    }

    async fn create(&self, selector: &str) -> Result<ResourceDescriptor, ApiError> {
        let operation = self.operation("create");
        let url = self.collection_url();
        info!("[actor-api] POST {} selector='{}'", url, selector);

        let request = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "selector": selector }));
        let body = self.execute(&operation, request).await?;
        parse_descriptor(&operation, &body)
    }

    async fn get(&self, id: &str) -> Result<ResourceDescriptor, ApiError> {
        let operation = self.operation("get");
        let url = self.resource_url(id);
        debug!("[actor-api] GET {}", url);

        let body = self.execute(&operation, self.client.get(&url)).await?;
        parse_descriptor(&operation, &body)
    }

    async fn delete(&self, id: &str) -> Result<(), ApiError> {
        let operation = self.operation("delete");
        let url = self.resource_url(id);
        info!("[actor-api] DELETE {}", url);

        self.execute(&operation, self.client.delete(&url)).await?;
        Ok(())
    }
}
