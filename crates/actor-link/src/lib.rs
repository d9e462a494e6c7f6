//! # Actor Link
//!
//! Endpoint acquisition and AMQP 1.0 link lifecycle for actor API
//! deliveries and subscriptions.
//!
//! A client authenticated by an X.509 certificate asks the actor API
//! control plane for a delivery (outbound route) or a subscription
//! (inbound route), polls it until it is CREATED, then opens a
//! mutually-authenticated AMQP link to the advertised endpoint and sends
//! or receives messages until told to stop.
//!
//! ## Feature-Gated Adapters
//!
//! The core library (domain, ports, service) carries no TLS, HTTP or AMQP
//! stack. Adapters are feature-gated:
//!
//! - `tls` - Credential provider (rustls client config, certificate CN)
//! - `http` - Actor API client (reqwest over mTLS)
//! - `amqp` - AMQP 1.0 connector (tokio-rustls + SASL EXTERNAL + fe2o3-amqp)
//! - `test-utils` - Scripted control plane and recording AMQP stack
//!
//! ## Architecture
//!
//! The crate follows Hexagonal Architecture with:
//! - **Domain Layer:** Endpoints, resource descriptors, messages, errors
//! - **Ports Layer:** `ControlPlane` and the AMQP connection/session/link traits
//! - **Service Layer:** Poller, link session manager, sender/receiver loops
//! - **Adapters Layer:** Concrete implementations (feature-gated)
//!
//! ## Example
//!
//! ```rust
//! use actor_link::{Endpoint, LinkRole, ResourceDescriptor};
//!
//! let descriptor = ResourceDescriptor::from_json(
//!     br#"{"id":"d1","status":"CREATED","endpoints":[{"host":"h","port":5671,"target":"/t1"}]}"#,
//! )
//! .unwrap();
//!
//! let endpoint: Endpoint = descriptor.first_endpoint(LinkRole::Sender).unwrap().unwrap();
//! assert_eq!(endpoint.uri(), "amqps://h:5671");
//! assert_eq!(endpoint.address(), "/t1");
//! ```

// =============================================================================
// CORE MODULES
// =============================================================================

pub mod domain;
pub mod ports;
pub mod service;

// =============================================================================
// FEATURE-GATED MODULES
// =============================================================================

/// Adapters for the actor API, credentials and the AMQP stack.
#[cfg(feature = "tls")]
pub mod adapters;

/// Test utilities (scripted doubles).
/// Requires feature: `test-utils` (or running tests)
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// =============================================================================
// RE-EXPORTS
// =============================================================================

pub use domain::{
    decode, ApiError, ApplicationProperties, BodyValue, ConnectError, ConnectStage,
    CredentialError, DecodeError, DecodedMessage, Endpoint, EndpointEntry, EndpointError,
    FlowError, InboundBody, InboundMessage, LinkError, LinkRole, OutboundMessage, PropertyValue,
    ProvisionError, ResourceDescriptor, ResourceKind, ResourceStatus, AMQPS_SCHEME,
};
pub use ports::{
    ControlPlane, LinkConnector, LinkReceiver, LinkSender, TransportConnection, TransportSession,
};
pub use service::{
    message_body, ExchangeSettings, ExchangeSummary, FlowSettings, FlowSummary, LinkFlow,
    LinkSession, LinkSessionManager, PollSettings, ReceiverLoop, ResourcePoller, SenderLoop,
    Shutdown, ShutdownTrigger,
};
