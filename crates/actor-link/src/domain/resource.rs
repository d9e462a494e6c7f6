//! Control-plane resources: deliveries and subscriptions.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::endpoint::{Endpoint, LinkRole};
use super::errors::EndpointError;

/// Kind of resource provisioned through the actor API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// Outbound route; yields a send target.
    Delivery,
    /// Inbound route; yields a receive source.
    Subscription,
}

impl ResourceKind {
    /// Collection path segment in the actor API.
    pub fn collection(&self) -> &'static str {
        match self {
            Self::Delivery => "deliveries",
            Self::Subscription => "subscriptions",
        }
    }

    /// Link role used on endpoints of this kind.
    pub fn role(&self) -> LinkRole {
        match self {
            Self::Delivery => LinkRole::Sender,
            Self::Subscription => LinkRole::Receiver,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delivery => write!(f, "Delivery"),
            Self::Subscription => write!(f, "Subscription"),
        }
    }
}

/// Provisioning status reported by the control plane.
///
/// Unknown strings are kept verbatim in [`ResourceStatus::Other`] so they
/// can be logged; every status other than `REQUESTED` is terminal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ResourceStatus {
    /// Still being provisioned.
    Requested,
    /// Usable; endpoints are populated.
    Created,
    /// Provisioning failed.
    Failed,
    /// Any other value.
    Other(String),
}

impl ResourceStatus {
    /// Wire representation.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Requested => "REQUESTED",
            Self::Created => "CREATED",
            Self::Failed => "FAILED",
            Self::Other(s) => s,
        }
    }

    /// Whether the poller keeps waiting on this status.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Requested)
    }
}

impl From<String> for ResourceStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "REQUESTED" => Self::Requested,
            "CREATED" => Self::Created,
            "FAILED" => Self::Failed,
            _ => Self::Other(value),
        }
    }
}

impl From<ResourceStatus> for String {
    fn from(value: ResourceStatus) -> Self {
        match value {
            ResourceStatus::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One endpoint entry as advertised in a status response.
///
/// Deliveries carry `target`, subscriptions carry `source`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointEntry {
    /// Broker host.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Send target (deliveries).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Receive source (subscriptions).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl EndpointEntry {
    /// Validate this entry into an [`Endpoint`] for the given role.
    pub fn to_endpoint(&self, role: LinkRole) -> Result<Endpoint, EndpointError> {
        let address = match role {
            LinkRole::Sender => self.target.as_deref(),
            LinkRole::Receiver => self.source.as_deref(),
        }
        .ok_or(EndpointError::MissingAddress(role.address_field()))?;

        Endpoint::new(self.host.clone(), self.port, address)
    }
}

/// Observation of a delivery or subscription.
///
/// Only the control plane mutates a resource; the client replaces its copy
/// on every poll. Fields beyond `id`, `status` and `endpoints` are kept in
/// `extra` for logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// Resource id assigned at creation.
    pub id: String,
    /// Current provisioning status.
    pub status: ResourceStatus,
    /// Advertised endpoints; only the first is ever used.
    #[serde(default)]
    pub endpoints: Vec<EndpointEntry>,
    /// Remaining response fields.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ResourceDescriptor {
    /// Parse and validate a response body.
    ///
    /// Rejects missing/mistyped required fields and an empty `id`.
    pub fn from_json(body: &[u8]) -> Result<Self, String> {
        let descriptor: Self = serde_json::from_slice(body).map_err(|e| e.to_string())?;
        if descriptor.id.trim().is_empty() {
            return Err("resource id is empty".to_string());
        }
        Ok(descriptor)
    }

    /// First advertised endpoint, validated for `role`.
    ///
    /// `None` when the endpoint list is empty.
    pub fn first_endpoint(&self, role: LinkRole) -> Option<Result<Endpoint, EndpointError>> {
        self.endpoints.first().map(|entry| entry.to_endpoint(role))
    }

    /// Indented JSON rendering for logs.
    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| format!("{:?}", self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_requested_without_endpoints() {
        let descriptor =
            ResourceDescriptor::from_json(br#"{"id":"d1","status":"REQUESTED"}"#).unwrap();
        assert_eq!(descriptor.id, "d1");
        assert_eq!(descriptor.status, ResourceStatus::Requested);
        assert!(descriptor.endpoints.is_empty());
        assert!(descriptor.first_endpoint(LinkRole::Sender).is_none());
    }

    #[test]
    fn test_parse_created_delivery_endpoint() {
        let body = br#"{"id":"d1","status":"CREATED","endpoints":[{"host":"h","port":5671,"target":"/t1"}]}"#;
        let descriptor = ResourceDescriptor::from_json(body).unwrap();

        let endpoint = descriptor
            .first_endpoint(LinkRole::Sender)
            .unwrap()
            .unwrap();
        assert_eq!(endpoint.uri(), "amqps://h:5671");
        assert_eq!(endpoint.address(), "/t1");
    }

    #[test]
    fn test_only_first_endpoint_is_used() {
        let body = br#"{"id":"s1","status":"CREATED","endpoints":[
            {"host":"a","port":5671,"source":"/s/a"},
            {"host":"b","port":5672,"source":"/s/b"}]}"#;
        let descriptor = ResourceDescriptor::from_json(body).unwrap();

        let endpoint = descriptor
            .first_endpoint(LinkRole::Receiver)
            .unwrap()
            .unwrap();
        assert_eq!(endpoint.host(), "a");
        assert_eq!(endpoint.address(), "/s/a");
    }

    #[test]
    fn test_endpoint_missing_role_address() {
        let body = br#"{"id":"d1","status":"CREATED","endpoints":[{"host":"h","port":5671,"source":"/s"}]}"#;
        let descriptor = ResourceDescriptor::from_json(body).unwrap();

        assert_eq!(
            descriptor.first_endpoint(LinkRole::Sender),
            Some(Err(EndpointError::MissingAddress("target")))
        );
    }

    #[test]
    fn test_unknown_status_is_kept_and_terminal() {
        let descriptor =
            ResourceDescriptor::from_json(br#"{"id":"d1","status":"DELETING","owner":"x"}"#)
                .unwrap();
        assert_eq!(
            descriptor.status,
            ResourceStatus::Other("DELETING".to_string())
        );
        assert!(!descriptor.status.is_pending());
        assert_eq!(descriptor.extra.get("owner"), Some(&serde_json::json!("x")));
        assert!(descriptor.to_pretty_json().contains("\"DELETING\""));
    }

    #[test]
    fn test_rejects_missing_or_empty_id() {
        assert!(ResourceDescriptor::from_json(br#"{"status":"REQUESTED"}"#).is_err());
        assert!(ResourceDescriptor::from_json(br#"{"id":"","status":"REQUESTED"}"#).is_err());
        assert!(ResourceDescriptor::from_json(br#"{"id":"d1"}"#).is_err());
        assert!(ResourceDescriptor::from_json(b"not json").is_err());
    }

    #[test]
    fn test_kind_collection_and_role() {
        assert_eq!(ResourceKind::Delivery.collection(), "deliveries");
        assert_eq!(ResourceKind::Subscription.collection(), "subscriptions");
        assert_eq!(ResourceKind::Delivery.role(), LinkRole::Sender);
        assert_eq!(ResourceKind::Subscription.role(), LinkRole::Receiver);
    }
}
