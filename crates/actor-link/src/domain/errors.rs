//! Error taxonomy for endpoint acquisition and link lifecycle.
//!
//! Provisioning and connect failures propagate and end the run; per-message
//! failures ([`LinkError`] from send/receive, [`DecodeError`]) are logged at
//! the loop boundary and never abort it on their own.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use super::resource::{ResourceKind, ResourceStatus};

/// An endpoint descriptor failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointError {
    /// Host is empty.
    #[error("endpoint host is empty")]
    EmptyHost,
    /// Port is not a number in 1..=65535.
    #[error("endpoint port '{0}' is not a valid port")]
    InvalidPort(String),
    /// Target/source address is empty.
    #[error("endpoint address is empty")]
    EmptyAddress,
    /// The advertised endpoint lacks the field for this link role.
    #[error("endpoint has no '{0}' address")]
    MissingAddress(&'static str),
}

/// Client certificate, key or CA material could not be loaded.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// File missing or unreadable.
    #[error("failed to read {what} from {}: {reason}", path.display())]
    Read {
        /// Which input ("certificate chain and key", "CA certificate").
        what: &'static str,
        /// Path that was read.
        path: PathBuf,
        /// I/O error description.
        reason: String,
    },
    /// PEM framing or DER content is broken.
    #[error("malformed PEM in {}: {reason}", path.display())]
    MalformedPem {
        /// Offending file.
        path: PathBuf,
        /// Parser error description.
        reason: String,
    },
    /// No certificate section in the chain file.
    #[error("no certificate found in {}", .0.display())]
    NoCertificate(PathBuf),
    /// No private key section in the chain file.
    #[error("no private key found in {}", .0.display())]
    NoPrivateKey(PathBuf),
    /// CA file holds no parseable certificate.
    #[error("no usable CA certificate in {}", .0.display())]
    NoCaCertificate(PathBuf),
    /// The private key does not belong to the leaf certificate.
    #[error("private key does not match the client certificate: {0}")]
    KeyMismatch(String),
    /// The TLS stack rejected the material.
    #[error("TLS configuration rejected: {0}")]
    Tls(String),
}

/// Control-plane request failure. Never retried by the client itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// Connect, TLS or I/O failure.
    #[error("{operation}: transport failure: {reason}")]
    Transport {
        /// e.g. "create delivery".
        operation: String,
        /// Underlying error.
        reason: String,
    },
    /// Non-2xx status.
    #[error("{operation}: HTTP {status}: {body}")]
    Status {
        /// e.g. "get subscription".
        operation: String,
        /// Status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },
    /// Body is not a valid descriptor.
    #[error("{operation}: invalid response: {reason}")]
    InvalidResponse {
        /// e.g. "create delivery".
        operation: String,
        /// What failed to parse.
        reason: String,
    },
    /// The HTTP client could not be built.
    #[error("HTTP client setup failed: {0}")]
    Client(String),
}

/// Why a resource never became usable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProvisionError {
    /// Control-plane request failed.
    #[error(transparent)]
    Api(#[from] ApiError),
    /// Resource left REQUESTED for something other than CREATED.
    #[error("{kind} {id} reached terminal status {status}")]
    ResourceFailed {
        /// Resource kind.
        kind: ResourceKind,
        /// Resource id.
        id: String,
        /// Observed terminal status.
        status: ResourceStatus,
    },
    /// Polling deadline expired while still REQUESTED.
    #[error("{kind} {id} still REQUESTED after {attempts} polls")]
    PollTimeout {
        /// Resource kind.
        kind: ResourceKind,
        /// Resource id.
        id: String,
        /// Number of `get` calls made.
        attempts: u32,
    },
    /// CREATED without any endpoint.
    #[error("{kind} {id} is CREATED but advertises no endpoint")]
    NoEndpoint {
        /// Resource kind.
        kind: ResourceKind,
        /// Resource id.
        id: String,
    },
    /// First endpoint failed validation.
    #[error("{kind} {id} advertises an unusable endpoint: {source}")]
    InvalidEndpoint {
        /// Resource kind.
        kind: ResourceKind,
        /// Resource id.
        id: String,
        /// Validation failure.
        #[source]
        source: EndpointError,
    },
    /// Shutdown requested while waiting for the resource.
    #[error("provisioning interrupted by shutdown")]
    Interrupted,
}

/// Failure of an operation on an established connection, session or link.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// TCP/TLS/SASL or connection-level protocol failure.
    #[error("transport failure: {0}")]
    Transport(String),
    /// The enclosing session ended.
    #[error("session ended: {0}")]
    SessionEnded(String),
    /// The peer detached the link.
    #[error("link detached: {0}")]
    Detached(String),
    /// The handle was already closed locally.
    #[error("link is closed")]
    Closed,
    /// Peer settled a delivery with a non-accepted outcome.
    #[error("delivery not accepted: {0}")]
    NotAccepted(String),
    /// Message could not be encoded.
    #[error("message encoding failed: {0}")]
    Encode(String),
    /// Anything else reported by the AMQP stack.
    #[error("{0}")]
    Other(String),
}

impl LinkError {
    /// True when the link/session/connection handle is no longer usable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::SessionEnded(_) | Self::Detached(_) | Self::Closed
        )
    }
}

/// Step of link establishment that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStage {
    /// TCP connect, TLS handshake, SASL, AMQP open.
    Connection,
    /// Session begin.
    Session,
    /// Link attach.
    Link,
}

impl fmt::Display for ConnectStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => write!(f, "open connection"),
            Self::Session => write!(f, "begin session"),
            Self::Link => write!(f, "attach link"),
        }
    }
}

/// Link session could not be established.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to {stage} on {uri}: {source}")]
pub struct ConnectError {
    /// Failing step.
    pub stage: ConnectStage,
    /// Connection URI.
    pub uri: String,
    /// Underlying failure.
    #[source]
    pub source: LinkError,
}

/// A received message could not be fully decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Body bytes are not UTF-8. `lossy` keeps a printable rendition.
    #[error("body is not valid UTF-8 ({reason})")]
    InvalidUtf8 {
        /// Body with invalid sequences replaced.
        lossy: String,
        /// Decoder message.
        reason: String,
    },
    /// Properties document is not a JSON object.
    #[error("application properties must be a JSON object: {0}")]
    InvalidProperties(String),
}

/// Terminal failure of a whole provision-connect-exchange run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    /// Resource never became usable.
    #[error(transparent)]
    Provision(#[from] ProvisionError),
    /// Link session could not be opened.
    #[error(transparent)]
    Connect(#[from] ConnectError),
    /// Exchange loop hit an unrecoverable link error.
    #[error("message exchange stopped: {0}")]
    Link(LinkError),
}
