//! # AMQP 1.0 Connector
//!
//! TCP, then TLS 1.3 with the client certificate, then SASL EXTERNAL, then
//! the AMQP open. Sessions and links are thin wrappers over fe2o3-amqp
//! handles.

mod convert;
mod sasl;

pub use convert::{from_amqp_properties, outbound_message, to_amqp_properties};
pub use sasl::{authenticate_external, EXTERNAL, SASL_HEADER};

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use fe2o3_amqp::connection::ConnectionHandle;
use fe2o3_amqp::link::delivery::Delivery;
use fe2o3_amqp::link::{LinkStateError, RecvError, SendError};
use fe2o3_amqp::session::SessionHandle;
use fe2o3_amqp::types::messaging::{Body, Outcome};
use fe2o3_amqp::types::primitives::Value;
use fe2o3_amqp::{Connection, Receiver, Sender, Session};
use rustls_pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info};

use crate::domain::{Endpoint, InboundMessage, LinkError, OutboundMessage};
use crate::ports::{
    LinkConnector, LinkReceiver, LinkSender, TransportConnection, TransportSession,
};

use super::security::TransportSecurityContext;

/// Default maximum frame size.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 65_536;

/// What to put in the SASL EXTERNAL initial response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaslIdentity {
    /// Empty response; the broker derives identity from the certificate.
    #[default]
    None,
    /// The client certificate's common name.
    CommonName,
}

/// Connection options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmqpSettings {
    /// Container id sent in the open frame.
    pub container_id: String,
    /// Idle timeout advertised to the peer. `None` disables it.
    pub idle_timeout: Option<Duration>,
    /// Maximum frame size.
    pub max_frame_size: u32,
    /// SASL EXTERNAL initial response.
    pub sasl_identity: SaslIdentity,
}

impl Default for AmqpSettings {
    fn default() -> Self {
        Self {
            container_id: "actor-link".to_string(),
            idle_timeout: None,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            sasl_identity: SaslIdentity::None,
        }
    }
}

/// [`LinkConnector`] over fe2o3-amqp.
pub struct AmqpConnector {
    security: TransportSecurityContext,
    settings: AmqpSettings,
}

impl AmqpConnector {
    /// Connector presenting `security` on every connection.
    pub fn new(security: TransportSecurityContext, settings: AmqpSettings) -> Self {
        Self { security, settings }
    }

    fn sasl_response(&self) -> Option<&str> {
        match self.settings.sasl_identity {
            SaslIdentity::None => None,
            SaslIdentity::CommonName => self.security.common_name(),
        }
    }
}

#[async_trait]
impl LinkConnector for AmqpConnector {
    async fn connect(
        &self,
        endpoint: &Endpoint,
    ) -> Result<Box<dyn TransportConnection>, LinkError> {
        let host = endpoint.host();
        let tcp = TcpStream::connect((host, endpoint.port()))
            .await
            .map_err(|e| LinkError::Transport(format!("TCP connect failed: {}", e)))?;
        debug!("[link] TCP connected to {}:{}", host, endpoint.port());

        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| LinkError::Transport(format!("invalid server name '{}': {}", host, e)))?;
        let mut tls = TlsConnector::from(self.security.client_config())
            .connect(server_name, tcp)
            .await
            .map_err(|e| LinkError::Transport(format!("TLS handshake failed: {}", e)))?;
        debug!("[link] TLS established with {}", host);

        authenticate_external(&mut tls, host, self.sasl_response()).await?;

        let mut builder = Connection::builder()
            .container_id(self.settings.container_id.clone())
            .hostname(host)
            .max_frame_size(self.settings.max_frame_size);
        if let Some(idle) = self.settings.idle_timeout {
            builder = builder.idle_time_out(idle.as_millis().min(u128::from(u32::MAX)) as u32);
        }
        let handle = builder
            .open_with_stream(tls)
            .await
            .map_err(|e| LinkError::Transport(format!("AMQP open failed: {}", e)))?;

        info!(
            container_id = %self.settings.container_id,
            "[link] Connection open to {}",
            endpoint.uri()
        );
        Ok(Box::new(AmqpConnection { handle }))
    }
}

struct AmqpConnection {
    handle: ConnectionHandle<()>,
}

#[async_trait]
impl TransportConnection for AmqpConnection {
    async fn begin_session(&mut self) -> Result<Box<dyn TransportSession>, LinkError> {
        let handle = Session::begin(&mut self.handle)
            .await
            .map_err(|e| LinkError::Transport(e.to_string()))?;
        Ok(Box::new(AmqpSession { handle }))
    }

    async fn close(&mut self) -> Result<(), LinkError> {
        self.handle
            .close()
            .await
            .map_err(|e| LinkError::Transport(e.to_string()))
    }
}

struct AmqpSession {
    handle: SessionHandle<()>,
}

#[async_trait]
impl TransportSession for AmqpSession {
    async fn attach_sender(
        &mut self,
        name: &str,
        target: &str,
    ) -> Result<Box<dyn LinkSender>, LinkError> {
        let link = Sender::attach(&mut self.handle, name.to_string(), target.to_string())
            .await
            .map_err(|e| LinkError::Detached(e.to_string()))?;
        Ok(Box::new(AmqpSender { link: Some(link) }))
    }

    async fn attach_receiver(
        &mut self,
        name: &str,
        source: &str,
    ) -> Result<Box<dyn LinkReceiver>, LinkError> {
        let link = Receiver::attach(&mut self.handle, name.to_string(), source.to_string())
            .await
            .map_err(|e| LinkError::Detached(e.to_string()))?;
        Ok(Box::new(AmqpReceiver {
            link: Some(link),
            pending: HashMap::new(),
            next_sequence: 0,
        }))
    }

    async fn end(&mut self) -> Result<(), LinkError> {
        self.handle
            .end()
            .await
            .map_err(|e| LinkError::SessionEnded(e.to_string()))
    }
}

struct AmqpSender {
    link: Option<Sender>,
}

fn send_error(error: SendError) -> LinkError {
    match error {
        SendError::LinkStateError(LinkStateError::IllegalSessionState) => {
            LinkError::SessionEnded(error.to_string())
        }
        SendError::LinkStateError(_) => LinkError::Detached(error.to_string()),
        other => LinkError::Other(other.to_string()),
    }
}

fn recv_error(error: RecvError) -> LinkError {
    match error {
        RecvError::LinkStateError(LinkStateError::IllegalSessionState) => {
            LinkError::SessionEnded(error.to_string())
        }
        RecvError::LinkStateError(_) => LinkError::Detached(error.to_string()),
        other => LinkError::Other(other.to_string()),
    }
}

#[async_trait]
impl LinkSender for AmqpSender {
    async fn send(&mut self, message: OutboundMessage) -> Result<(), LinkError> {
        let link = self.link.as_mut().ok_or(LinkError::Closed)?;
        let outcome = link
            .send(outbound_message(message.body, &message.properties))
            .await
            .map_err(send_error)?;

        match outcome {
            Outcome::Accepted(_) => Ok(()),
            other => Err(LinkError::NotAccepted(format!("{:?}", other))),
        }
    }

    async fn close(&mut self) -> Result<(), LinkError> {
        match self.link.take() {
            Some(link) => link
                .close()
                .await
                .map_err(|e| LinkError::Detached(e.to_string())),
            None => Ok(()),
        }
    }
}

struct AmqpReceiver {
    link: Option<Receiver>,
    pending: HashMap<u64, Delivery<Body<Value>>>,
    next_sequence: u64,
}

#[async_trait]
impl LinkReceiver for AmqpReceiver {
    async fn recv(&mut self) -> Result<InboundMessage, LinkError> {
        let link = self.link.as_mut().ok_or(LinkError::Closed)?;
        let delivery: Delivery<Body<Value>> = link.recv().await.map_err(recv_error)?;

        self.next_sequence += 1;
        let message = InboundMessage {
            sequence: self.next_sequence,
            body: convert::inbound_body(delivery.body()),
            properties: from_amqp_properties(delivery.message().application_properties.as_ref()),
        };
        self.pending.insert(self.next_sequence, delivery);
        Ok(message)
    }

    async fn accept(&mut self, message: &InboundMessage) -> Result<(), LinkError> {
        let link = self.link.as_mut().ok_or(LinkError::Closed)?;
        let delivery = self.pending.remove(&message.sequence).ok_or_else(|| {
            LinkError::Other(format!("no pending delivery #{}", message.sequence))
        })?;
        link.accept(&delivery)
            .await
            .map_err(|e| LinkError::Other(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), LinkError> {
        self.pending.clear();
        match self.link.take() {
            Some(link) => link
                .close()
                .await
                .map_err(|e| LinkError::Detached(e.to_string())),
            None => Ok(()),
        }
    }
}
