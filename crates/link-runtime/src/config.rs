//! # Runtime Configuration
//!
//! Built once at startup from environment variables, validated, logged,
//! then passed by reference. The lookup function is injectable so tests
//! never touch the process environment.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use actor_link::adapters::{ActorApiSettings, AmqpSettings, SaslIdentity, DEFAULT_MAX_FRAME_SIZE};
use actor_link::{
    ApplicationProperties, DecodeError, Endpoint, EndpointError, ExchangeSettings, FlowSettings,
    LinkRole, PollSettings, ResourceKind,
};
use thiserror::Error;
use tracing::info;

/// What the runtime does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LinkMode {
    /// Provision a delivery, then send.
    Delivery,
    /// Provision a subscription, then receive.
    Subscription,
    /// Send to a configured endpoint.
    DeliveryDirect,
    /// Receive from a configured endpoint.
    SubscriptionDirect,
}

impl LinkMode {
    /// Resource kind this mode works with.
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Delivery | Self::DeliveryDirect => ResourceKind::Delivery,
            Self::Subscription | Self::SubscriptionDirect => ResourceKind::Subscription,
        }
    }

    /// Whether the endpoint comes from configuration instead of the API.
    pub fn is_direct(&self) -> bool {
        matches!(self, Self::DeliveryDirect | Self::SubscriptionDirect)
    }

    /// Command-line name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delivery => "delivery",
            Self::Subscription => "subscription",
            Self::DeliveryDirect => "delivery-direct",
            Self::SubscriptionDirect => "subscription-direct",
        }
    }
}

impl fmt::Display for LinkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required variable is unset or empty.
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    /// A variable does not parse.
    #[error("invalid value '{value}' for {name}: {reason}")]
    Invalid {
        /// Variable name.
        name: &'static str,
        /// Raw value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
    /// The properties document is not a JSON object.
    #[error("invalid MESSAGE_APPLICATION_PROPERTIES_JSON: {0}")]
    Properties(#[source] DecodeError),
    /// The direct endpoint is incomplete.
    #[error("invalid direct endpoint: {0}")]
    Endpoint(#[source] EndpointError),
}

/// Actor API coordinates for provisioned modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    /// Host, port, identity and request timeout.
    pub settings: ActorApiSettings,
    /// Selector sent on create.
    pub selector: String,
    /// Status polling cadence.
    pub poll: PollSettings,
    /// Delete the resource after the exchange.
    pub delete_on_exit: bool,
}

/// Where the endpoint comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointSource {
    /// Provision through the actor API.
    Provisioned(ApiConfig),
    /// Use this endpoint as is.
    Direct(Endpoint),
}

/// Complete runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Run mode.
    pub mode: LinkMode,
    /// PEM with the client chain and its key.
    pub chain_and_key_path: PathBuf,
    /// PEM with the trusted CA.
    pub ca_path: PathBuf,
    /// Endpoint source.
    pub endpoint: EndpointSource,
    /// Properties attached to every sent message.
    pub properties: ApplicationProperties,
    /// Sender/receiver pacing.
    pub exchange: ExchangeSettings,
    /// AMQP connection options.
    pub amqp: AmqpSettings,
}

impl RuntimeConfig {
    /// Load from the process environment.
    pub fn from_env(mode: LinkMode) -> Result<Self, ConfigError> {
        Self::from_lookup(mode, |name| std::env::var(name).ok())
    }

    /// Load through `lookup`, which returns a variable's value if set.
    pub fn from_lookup<F>(mode: LinkMode, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup: &lookup };

        let properties = ApplicationProperties::from_json_str(
            &vars
                .optional("MESSAGE_APPLICATION_PROPERTIES_JSON")
                .unwrap_or_else(|| "{}".to_string()),
        )
        .map_err(ConfigError::Properties)?;

        let endpoint = if mode.is_direct() {
            let address_var = match mode.kind().role() {
                LinkRole::Sender => "ENDPOINT_TARGET",
                LinkRole::Receiver => "ENDPOINT_SOURCE",
            };
            let endpoint = Endpoint::parse(
                &vars.required("ENDPOINT_HOST")?,
                &vars.required("ENDPOINT_PORT")?,
                &vars.required(address_var)?,
            )
            .map_err(ConfigError::Endpoint)?;
            EndpointSource::Direct(endpoint)
        } else {
            let selector_var = match mode.kind() {
                ResourceKind::Delivery => "ACTOR_API_DELIVERY_SELECTOR",
                ResourceKind::Subscription => "ACTOR_API_SUBSCRIPTION_SELECTOR",
            };
            let poll_timeout = vars.parse_or("ACTOR_API_POLL_TIMEOUT_SECS", 300u64)?;
            EndpointSource::Provisioned(ApiConfig {
                settings: ActorApiSettings {
                    host: vars.required("ACTOR_API_HOST")?,
                    port: vars.parse_required("ACTOR_API_PORT")?,
                    common_name: vars.required("ACTOR_COMMON_NAME")?,
                    timeout: Duration::from_secs(vars.parse_or("ACTOR_API_TIMEOUT_SECS", 30)?),
                },
                selector: vars.required(selector_var)?,
                poll: PollSettings {
                    interval: Duration::from_secs(
                        vars.parse_or("ACTOR_API_POLL_INTERVAL_SECS", 2)?,
                    ),
                    timeout: (poll_timeout > 0).then(|| Duration::from_secs(poll_timeout)),
                },
                delete_on_exit: vars.parse_or("ACTOR_API_DELETE_ON_EXIT", false)?,
            })
        };

        let idle_ms = vars.parse_or("AMQP_IDLE_TIMEOUT_MS", 0u64)?;
        let sasl_identity = match vars.optional("AMQP_SASL_IDENTITY").as_deref() {
            None | Some("none") => SaslIdentity::None,
            Some("cn") => SaslIdentity::CommonName,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "AMQP_SASL_IDENTITY",
                    value: other.to_string(),
                    reason: "expected 'cn' or 'none'".to_string(),
                })
            }
        };

        Ok(Self {
            mode,
            chain_and_key_path: PathBuf::from(vars.required("ACTOR_CERTIFICATE_CHAIN_AND_KEY_PEM")?),
            ca_path: PathBuf::from(vars.required("CA_CERTIFICATE_PEM")?),
            endpoint,
            properties,
            exchange: ExchangeSettings {
                send_interval: Duration::from_millis(vars.parse_or("MESSAGE_SEND_INTERVAL_MS", 1000)?),
                receive_retry_delay: Duration::from_millis(
                    vars.parse_or("RECEIVE_RETRY_DELAY_MS", 1000)?,
                ),
            },
            amqp: AmqpSettings {
                container_id: vars
                    .optional("AMQP_CONTAINER_ID")
                    .unwrap_or_else(|| format!("actor-link-{}", mode)),
                idle_timeout: (idle_ms > 0).then(|| Duration::from_millis(idle_ms)),
                max_frame_size: vars.parse_or("AMQP_MAX_FRAME_SIZE", DEFAULT_MAX_FRAME_SIZE)?,
                sasl_identity,
            },
        })
    }

    /// Flow settings derived from this configuration.
    pub fn flow_settings(&self) -> FlowSettings {
        let (poll, delete_on_exit) = match &self.endpoint {
            EndpointSource::Provisioned(api) => (api.poll.clone(), api.delete_on_exit),
            EndpointSource::Direct(_) => (PollSettings::default(), false),
        };
        FlowSettings {
            poll,
            exchange: self.exchange.clone(),
            properties: self.properties.clone(),
            delete_on_exit,
            link_name_prefix: self.amqp.container_id.clone(),
        }
    }

    /// Log every value, one line each.
    pub fn log_summary(&self) {
        info!("[runtime] LINK_MODE: {}", self.mode);
        match &self.endpoint {
            EndpointSource::Provisioned(api) => {
                info!("[runtime] ACTOR_API_HOST: {}", api.settings.host);
                info!("[runtime] ACTOR_API_PORT: {}", api.settings.port);
                info!("[runtime] ACTOR_COMMON_NAME: {}", api.settings.common_name);
                info!("[runtime] {} selector: {}", self.mode.kind(), api.selector);
                info!("[runtime] ACTOR_API_TIMEOUT_SECS: {}", api.settings.timeout.as_secs());
                info!("[runtime] ACTOR_API_POLL_INTERVAL_SECS: {}", api.poll.interval.as_secs());
                info!(
                    "[runtime] ACTOR_API_POLL_TIMEOUT_SECS: {}",
                    api.poll.timeout.map(|t| t.as_secs()).unwrap_or(0)
                );
                info!("[runtime] ACTOR_API_DELETE_ON_EXIT: {}", api.delete_on_exit);
            }
            EndpointSource::Direct(endpoint) => {
                info!("[runtime] ENDPOINT_HOST: {}", endpoint.host());
                info!("[runtime] ENDPOINT_PORT: {}", endpoint.port());
                info!("[runtime] ENDPOINT address: {}", endpoint.address());
            }
        }
        info!(
            "[runtime] ACTOR_CERTIFICATE_CHAIN_AND_KEY_PEM: {}",
            self.chain_and_key_path.display()
        );
        info!("[runtime] CA_CERTIFICATE_PEM: {}", self.ca_path.display());
        info!(
            "[runtime] MESSAGE_APPLICATION_PROPERTIES_JSON: {}",
            self.properties.to_json()
        );
        info!(
            "[runtime] MESSAGE_SEND_INTERVAL_MS: {}",
            self.exchange.send_interval.as_millis()
        );
        info!(
            "[runtime] RECEIVE_RETRY_DELAY_MS: {}",
            self.exchange.receive_retry_delay.as_millis()
        );
        info!("[runtime] AMQP_CONTAINER_ID: {}", self.amqp.container_id);
        info!(
            "[runtime] AMQP_IDLE_TIMEOUT_MS: {}",
            self.amqp.idle_timeout.map(|t| t.as_millis()).unwrap_or(0)
        );
        info!("[runtime] AMQP_MAX_FRAME_SIZE: {}", self.amqp.max_frame_size);
        info!("[runtime] AMQP_SASL_IDENTITY: {:?}", self.amqp.sasl_identity);
    }
}

struct Vars<'a, F> {
    lookup: &'a F,
}

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|value| !value.trim().is_empty())
    }

    fn required(&self, name: &'static str) -> Result<String, ConfigError> {
        self.optional(name).ok_or(ConfigError::Missing(name))
    }

    fn parse_required<T>(&self, name: &'static str) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: fmt::Display,
    {
        let raw = self.required(name)?;
        parse(name, raw)
    }

    fn parse_or<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: fmt::Display,
    {
        match self.optional(name) {
            Some(raw) => parse(name, raw),
            None => Ok(default),
        }
    }
}

fn parse<T>(name: &'static str, raw: String) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        value: raw.clone(),
        reason: e.to_string(),
    })
}
