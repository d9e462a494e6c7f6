//! Provision, connect, exchange, clean up.

use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::domain::{
    ApplicationProperties, DecodedMessage, Endpoint, FlowError, LinkError, LinkRole, ResourceKind,
};
use crate::ports::{ControlPlane, LinkConnector};

use super::exchange::{ExchangeSettings, ReceiverLoop, ReceiverReport, SenderLoop, SenderReport};
use super::link_session::{CloseReport, LinkSession, LinkSessionManager};
use super::poller::{ready_endpoint, PollSettings, ResourcePoller};
use super::shutdown::Shutdown;

/// Everything a run needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct FlowSettings {
    /// Status polling cadence.
    pub poll: PollSettings,
    /// Sender/receiver pacing.
    pub exchange: ExchangeSettings,
    /// Properties attached to every sent message.
    pub properties: ApplicationProperties,
    /// Delete the provisioned resource when the run ends.
    pub delete_on_exit: bool,
    /// Prefix of attached link names.
    pub link_name_prefix: String,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            poll: PollSettings::default(),
            exchange: ExchangeSettings::default(),
            properties: ApplicationProperties::new(),
            delete_on_exit: false,
            link_name_prefix: "actor-link".to_string(),
        }
    }
}

/// Loop totals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeSummary {
    /// Sender loop ran.
    Sent(SenderReport),
    /// Receiver loop ran.
    Received(ReceiverReport),
}

/// Result of a run that stopped on request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowSummary {
    /// Provisioned resource, absent for direct runs.
    pub resource_id: Option<String>,
    /// Endpoint the link was attached to.
    pub endpoint: Endpoint,
    /// Loop totals.
    pub exchange: ExchangeSummary,
    /// Close outcome of the link session.
    pub close: CloseReport,
}

/// Runs one provisioned or direct link flow.
pub struct LinkFlow<'a, K: ?Sized> {
    connector: &'a K,
    settings: FlowSettings,
    inbox: Option<mpsc::UnboundedSender<DecodedMessage>>,
}

impl<'a, K> LinkFlow<'a, K>
where
    K: LinkConnector + ?Sized,
{
    /// Flow opening links through `connector`.
    pub fn new(connector: &'a K, settings: FlowSettings) -> Self {
        Self {
            connector,
            settings,
            inbox: None,
        }
    }

    /// Hand every message the receiver loop decodes to `inbox`.
    pub fn with_inbox(mut self, inbox: mpsc::UnboundedSender<DecodedMessage>) -> Self {
        self.inbox = Some(inbox);
        self
    }

    /// Create a resource, wait for it, then exchange messages on its endpoint.
    ///
    /// Deliveries run the sender loop, subscriptions the receiver loop. No
    /// link is opened unless the resource reaches CREATED.
    pub async fn run_provisioned<C>(
        &self,
        control_plane: &C,
        selector: &str,
        mut shutdown: Shutdown,
    ) -> Result<FlowSummary, FlowError>
    where
        C: ControlPlane + ?Sized,
    {
        let kind = control_plane.kind();
        let poller = ResourcePoller::new(control_plane, self.settings.poll.clone());
        let descriptor = poller.provision(selector, &mut shutdown).await?;

        let result = match ready_endpoint(kind, &descriptor) {
            Ok(endpoint) => {
                info!("[flow] Using {} endpoint {}", kind, endpoint);
                self.run_direct(&endpoint, kind.role(), shutdown).await
            }
            Err(e) => Err(e.into()),
        };

        if self.settings.delete_on_exit {
            self.delete(control_plane, kind, &descriptor.id).await;
        }

        result.map(|summary| FlowSummary {
            resource_id: Some(descriptor.id),
            ..summary
        })
    }

    /// Exchange messages on an already known endpoint.
    ///
    /// The link session is closed exactly once on every exit path,
    /// including a panic inside the loop, which is re-raised afterwards.
    pub async fn run_direct(
        &self,
        endpoint: &Endpoint,
        role: LinkRole,
        mut shutdown: Shutdown,
    ) -> Result<FlowSummary, FlowError> {
        let manager = LinkSessionManager::new(self.connector, self.settings.link_name_prefix.clone());
        let mut session = manager.open(endpoint, role).await?;

        let outcome = AssertUnwindSafe(self.exchange(&mut session, &mut shutdown))
            .catch_unwind()
            .await;

        info!("[flow] Closing {} link to {}", role, endpoint.uri());
        let close = session.close().await;

        match outcome {
            Ok(Ok(exchange)) => Ok(FlowSummary {
                resource_id: None,
                endpoint: endpoint.clone(),
                exchange,
                close,
            }),
            Ok(Err(e)) => Err(e),
            Err(panic) => {
                error!("[flow] Message loop panicked; link session closed");
                std::panic::resume_unwind(panic)
            }
        }
    }

    async fn exchange(
        &self,
        session: &mut LinkSession,
        shutdown: &mut Shutdown,
    ) -> Result<ExchangeSummary, FlowError> {
        let exchange = &self.settings.exchange;
        match session.role() {
            LinkRole::Sender => {
                let sender = session
                    .sender()
                    .ok_or(FlowError::Link(LinkError::Closed))?;
                let mut sending =
                    SenderLoop::new(self.settings.properties.clone(), exchange.send_interval);
                Ok(ExchangeSummary::Sent(sending.run(sender, shutdown).await))
            }
            LinkRole::Receiver => {
                let receiver = session
                    .receiver()
                    .ok_or(FlowError::Link(LinkError::Closed))?;
                let mut receiving = ReceiverLoop::new(exchange.receive_retry_delay);
                if let Some(inbox) = &self.inbox {
                    receiving = receiving.with_inbox(inbox.clone());
                }
                match receiving.run(receiver, shutdown).await {
                    (report, None) => Ok(ExchangeSummary::Received(report)),
                    (_, Some(fatal)) => Err(FlowError::Link(fatal)),
                }
            }
        }
    }

    async fn delete<C>(&self, control_plane: &C, kind: ResourceKind, id: &str)
    where
        C: ControlPlane + ?Sized,
    {
        match control_plane.delete(id).await {
            Ok(()) => info!("[flow] Deleted {} {}", kind, id),
            Err(e) => warn!("[flow] Failed to delete {} {}: {}", kind, id, e),
        }
    }
}
