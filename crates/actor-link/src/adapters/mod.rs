//! Adapters: credential provider, actor API client, AMQP connector.

pub mod security;

#[cfg(feature = "http")]
pub mod actor_api;

#[cfg(feature = "amqp")]
pub mod amqp;

#[cfg(test)]
mod test_pki;

pub use security::{load_credentials, TransportSecurityContext};

#[cfg(feature = "http")]
pub use actor_api::{ActorApiClient, ActorApiSettings, DEFAULT_REQUEST_TIMEOUT};

#[cfg(feature = "amqp")]
pub use amqp::{AmqpConnector, AmqpSettings, SaslIdentity, DEFAULT_MAX_FRAME_SIZE};
