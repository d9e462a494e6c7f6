//! Domain layer: endpoint, resource and message types plus the error taxonomy.
//!
//! Pure data and validation rules. No I/O.

pub mod endpoint;
pub mod errors;
pub mod message;
pub mod resource;

pub use endpoint::{Endpoint, LinkRole, AMQPS_SCHEME};
pub use errors::{
    ApiError, ConnectError, ConnectStage, CredentialError, DecodeError, EndpointError, FlowError,
    LinkError, ProvisionError,
};
pub use message::{
    decode, ApplicationProperties, BodyValue, DecodedMessage, InboundBody, InboundMessage,
    OutboundMessage, PropertyValue,
};
pub use resource::{EndpointEntry, ResourceDescriptor, ResourceKind, ResourceStatus};
