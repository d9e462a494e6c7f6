//! # Driven Ports (Outbound SPI)
//!
//! Interfaces for the external collaborators: the actor API control plane
//! and the AMQP 1.0 stack. Adapters live in `crate::adapters`; scripted
//! doubles live in `crate::test_utils`.

use async_trait::async_trait;

use crate::domain::{
    ApiError, Endpoint, InboundMessage, LinkError, OutboundMessage, ResourceDescriptor,
    ResourceKind,
};

/// Actor API operations on one resource collection.
///
/// Each call is a single request; none of them retry. Retry policy belongs
/// to the poller.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Collection this client is bound to.
    fn kind(&self) -> ResourceKind;

    /// Create a resource for `selector`. Any 2xx is success.
    async fn create(&self, selector: &str) -> Result<ResourceDescriptor, ApiError>;

    /// Fetch the current descriptor, including endpoints once created.
    async fn get(&self, id: &str) -> Result<ResourceDescriptor, ApiError>;

    /// Delete a resource.
    async fn delete(&self, id: &str) -> Result<(), ApiError>;
}

/// Opens secured AMQP connections.
///
/// Implementations own the transport security context: TLS with client
/// certificate and SASL EXTERNAL.
#[async_trait]
pub trait LinkConnector: Send + Sync {
    /// Establish TCP, TLS, SASL and AMQP open against `endpoint`.
    async fn connect(&self, endpoint: &Endpoint)
        -> Result<Box<dyn TransportConnection>, LinkError>;
}

/// An open AMQP connection.
#[async_trait]
pub trait TransportConnection: Send {
    /// Begin a session on this connection.
    async fn begin_session(&mut self) -> Result<Box<dyn TransportSession>, LinkError>;

    /// Close the connection. Called at most once.
    async fn close(&mut self) -> Result<(), LinkError>;
}

/// A begun AMQP session.
#[async_trait]
pub trait TransportSession: Send {
    /// Attach a sending link to `target`.
    async fn attach_sender(
        &mut self,
        name: &str,
        target: &str,
    ) -> Result<Box<dyn LinkSender>, LinkError>;

    /// Attach a receiving link to `source`.
    async fn attach_receiver(
        &mut self,
        name: &str,
        source: &str,
    ) -> Result<Box<dyn LinkReceiver>, LinkError>;

    /// End the session. Called at most once.
    async fn end(&mut self) -> Result<(), LinkError>;
}

/// Attached sending link.
#[async_trait]
pub trait LinkSender: Send {
    /// Send one message and wait for its settlement.
    ///
    /// A non-accepted outcome is [`LinkError::NotAccepted`].
    async fn send(&mut self, message: OutboundMessage) -> Result<(), LinkError>;

    /// Detach and close the link. Called at most once.
    async fn close(&mut self) -> Result<(), LinkError>;
}

/// Attached receiving link.
#[async_trait]
pub trait LinkReceiver: Send {
    /// Wait for the next message.
    async fn recv(&mut self) -> Result<InboundMessage, LinkError>;

    /// Settle `message` with the accepted outcome.
    async fn accept(&mut self, message: &InboundMessage) -> Result<(), LinkError>;

    /// Detach and close the link. Called at most once.
    async fn close(&mut self) -> Result<(), LinkError>;
}
