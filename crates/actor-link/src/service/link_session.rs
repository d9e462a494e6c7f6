//! Link session lifecycle: connection, session and one link as a unit.
//!
//! A [`LinkSession`] is only handed out fully established. Partial state
//! left by a failed open is torn down before the error is returned, and
//! [`LinkSession::close`] releases link, session and connection in that
//! order, each at most once.

use tracing::{debug, info, warn};

use crate::domain::{ConnectError, ConnectStage, Endpoint, LinkError, LinkRole};
use crate::ports::{
    LinkConnector, LinkReceiver, LinkSender, TransportConnection, TransportSession,
};

/// The single attached link of a session.
pub enum Link {
    /// Sending link bound to a target.
    Sender(Box<dyn LinkSender>),
    /// Receiving link bound to a source.
    Receiver(Box<dyn LinkReceiver>),
}

impl Link {
    fn role(&self) -> LinkRole {
        match self {
            Self::Sender(_) => LinkRole::Sender,
            Self::Receiver(_) => LinkRole::Receiver,
        }
    }

    async fn close(self) -> Result<(), LinkError> {
        match self {
            Self::Sender(mut sender) => sender.close().await,
            Self::Receiver(mut receiver) => receiver.close().await,
        }
    }
}

/// Which handles failed to close cleanly.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CloseReport {
    /// `(handle, error)` per failed close step.
    pub failures: Vec<(&'static str, LinkError)>,
}

impl CloseReport {
    /// Whether every close step succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Established connection + session + link.
pub struct LinkSession {
    endpoint: Endpoint,
    role: LinkRole,
    link: Option<Link>,
    session: Option<Box<dyn TransportSession>>,
    connection: Option<Box<dyn TransportConnection>>,
}

impl LinkSession {
    /// Endpoint this session is connected to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Direction of the attached link.
    pub fn role(&self) -> LinkRole {
        self.role
    }

    /// Whether [`close`](Self::close) has not run yet.
    pub fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    /// The sending link, if this is a sender session.
    pub fn sender(&mut self) -> Option<&mut dyn LinkSender> {
        match self.link.as_mut() {
            Some(Link::Sender(sender)) => Some(sender.as_mut()),
            _ => None,
        }
    }

    /// The receiving link, if this is a receiver session.
    pub fn receiver(&mut self) -> Option<&mut dyn LinkReceiver> {
        match self.link.as_mut() {
            Some(Link::Receiver(receiver)) => Some(receiver.as_mut()),
            _ => None,
        }
    }

    /// Close link, session and connection, in that order.
    ///
    /// Best-effort: a failing step is logged and the next one still runs.
    /// Calling this again is a no-op.
    pub async fn close(&mut self) -> CloseReport {
        let mut report = CloseReport::default();
        if !self.is_open() {
            return report;
        }

        if let Some(link) = self.link.take() {
            if let Err(e) = link.close().await {
                warn!("[link] Error closing {} link: {}", self.role, e);
                report.failures.push(("link", e));
            }
        }
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.end().await {
                warn!("[link] Error ending session: {}", e);
                report.failures.push(("session", e));
            }
        }
        if let Some(mut connection) = self.connection.take() {
            if let Err(e) = connection.close().await {
                warn!("[link] Error closing connection: {}", e);
                report.failures.push(("connection", e));
            }
        }

        info!("[link] Closed {} session to {}", self.role, self.endpoint.uri());
        report
    }
}

impl Drop for LinkSession {
    fn drop(&mut self) {
        if self.is_open() {
            warn!(
                "[link] {} session to {} dropped without close",
                self.role,
                self.endpoint.uri()
            );
        }
    }
}

/// Opens [`LinkSession`]s through a [`LinkConnector`].
pub struct LinkSessionManager<'a, K: ?Sized> {
    connector: &'a K,
    link_name_prefix: String,
}

impl<'a, K> LinkSessionManager<'a, K>
where
    K: LinkConnector + ?Sized,
{
    /// Manager naming links `<prefix>-sender` / `<prefix>-receiver`.
    pub fn new(connector: &'a K, link_name_prefix: impl Into<String>) -> Self {
        Self {
            connector,
            link_name_prefix: link_name_prefix.into(),
        }
    }

    /// Connect, begin a session and attach one link for `role`.
    pub async fn open(
        &self,
        endpoint: &Endpoint,
        role: LinkRole,
    ) -> Result<LinkSession, ConnectError> {
        let uri = endpoint.uri();
        let fail = |stage, source| ConnectError {
            stage,
            uri: uri.clone(),
            source,
        };

        info!("[link] Connecting to {}", uri);
        let mut connection = self
            .connector
            .connect(endpoint)
            .await
            .map_err(|e| fail(ConnectStage::Connection, e))?;

        let mut session = match connection.begin_session().await {
            Ok(session) => session,
            Err(e) => {
                discard_connection(connection).await;
                return Err(fail(ConnectStage::Session, e));
            }
        };

        let name = format!("{}-{}", self.link_name_prefix, role);
        let attached = match role {
            LinkRole::Sender => session
                .attach_sender(&name, endpoint.address())
                .await
                .map(Link::Sender),
            LinkRole::Receiver => session
                .attach_receiver(&name, endpoint.address())
                .await
                .map(Link::Receiver),
        };
        let link = match attached {
            Ok(link) => link,
            Err(e) => {
                if let Err(end_err) = session.end().await {
                    debug!("[link] Ignoring session end failure after attach error: {}", end_err);
                }
                discard_connection(connection).await;
                return Err(fail(ConnectStage::Link, e));
            }
        };

        info!(
            role = %link.role(),
            address = endpoint.address(),
            "[link] Attached {} link to {} on {}",
            role,
            endpoint.address(),
            uri
        );

        Ok(LinkSession {
            endpoint: endpoint.clone(),
            role,
            link: Some(link),
            session: Some(session),
            connection: Some(connection),
        })
    }
}

async fn discard_connection(mut connection: Box<dyn TransportConnection>) {
    if let Err(e) = connection.close().await {
        debug!("[link] Ignoring connection close failure after open error: {}", e);
    }
}
