//! # Link Runtime
//!
//! Wires configuration, credentials, the actor API client and the AMQP
//! connector into one [`LinkFlow`] run.
//!
//! ## Startup Sequence
//!
//! 1. Load configuration from the environment
//! 2. Load the client certificate chain, key and CA
//! 3. Build the actor API client (provisioned modes only)
//! 4. Provision, connect and exchange until shutdown
//! 5. Close the link session and optionally delete the resource

pub mod config;

pub use config::{ApiConfig, ConfigError, EndpointSource, LinkMode, RuntimeConfig};

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use actor_link::adapters::{load_credentials, ActorApiClient, AmqpConnector};
use actor_link::{
    ControlPlane, ExchangeSummary, FlowError, FlowSummary, LinkConnector, LinkFlow,
    ProvisionError, Shutdown,
};

/// How a run ended without error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The link was established and stopped on request.
    Completed(FlowSummary),
    /// Shutdown arrived before the resource was ready.
    Interrupted,
}

/// One configured run.
pub struct LinkRuntime {
    config: RuntimeConfig,
}

impl LinkRuntime {
    /// Runtime for `config`.
    pub fn new(config: RuntimeConfig) -> Self {
        Self { config }
    }

    /// Configuration in use.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Load credentials, build the adapters and run until `shutdown`.
    pub async fn run(&self, shutdown: Shutdown) -> Result<RunOutcome> {
        let security = load_credentials(&self.config.chain_and_key_path, &self.config.ca_path)
            .context("Failed to load client credentials")?;
        info!(
            chain_len = security.chain_len(),
            "[runtime] Loaded client certificate (CN: {})",
            security.common_name().unwrap_or("<none>")
        );

        let connector = AmqpConnector::new(security.clone(), self.config.amqp.clone());

        match &self.config.endpoint {
            EndpointSource::Provisioned(api) => {
                let client = ActorApiClient::new(&api.settings, self.config.mode.kind(), &security)
                    .context("Failed to build actor API client")?;
                info!("[runtime] Actor API at {}", api.settings.base_url());
                self.run_with(&connector, Some(&client), shutdown).await
            }
            EndpointSource::Direct(_) => self.run_with(&connector, None, shutdown).await,
        }
    }

    /// Run with explicit collaborators.
    ///
    /// Provisioned modes require `control_plane`; direct modes ignore it.
    pub async fn run_with(
        &self,
        connector: &dyn LinkConnector,
        control_plane: Option<&dyn ControlPlane>,
        shutdown: Shutdown,
    ) -> Result<RunOutcome> {
        let flow = LinkFlow::new(connector, self.config.flow_settings());
        let mode = self.config.mode;

        let result = match (&self.config.endpoint, control_plane) {
            (EndpointSource::Provisioned(api), Some(control_plane)) => {
                flow.run_provisioned(control_plane, &api.selector, shutdown)
                    .await
            }
            (EndpointSource::Provisioned(_), None) => {
                bail!("{} mode requires an actor API client", mode)
            }
            (EndpointSource::Direct(endpoint), _) => {
                flow.run_direct(endpoint, mode.kind().role(), shutdown).await
            }
        };

        match result {
            Ok(summary) => {
                log_summary(&summary);
                Ok(RunOutcome::Completed(summary))
            }
            Err(FlowError::Provision(ProvisionError::Interrupted)) => {
                info!("[runtime] Stopped before the {} was ready", mode.kind());
                Ok(RunOutcome::Interrupted)
            }
            Err(e) => Err(anyhow::Error::new(e).context(format!("{} run failed", mode))),
        }
    }
}

fn log_summary(summary: &FlowSummary) {
    match &summary.exchange {
        ExchangeSummary::Sent(report) => info!(
            attempted = report.attempted,
            settled = report.settled,
            failed = report.failed,
            "[runtime] Sender finished on {}",
            summary.endpoint
        ),
        ExchangeSummary::Received(report) => info!(
            received = report.received,
            accepted = report.accepted,
            decode_failures = report.decode_failures,
            "[runtime] Receiver finished on {}",
            summary.endpoint
        ),
    }
    for (step, error) in &summary.close.failures {
        warn!("[runtime] Close step '{}' failed: {}", step, error);
    }
}
