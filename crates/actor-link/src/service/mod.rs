//! # Link Service
//!
//! Wires the domain to the ports: the resource poller, the link session
//! manager, the sender/receiver loops and the flow that strings them
//! together with guaranteed cleanup.
//!
//! Control flow is strictly sequential per run: provision, connect,
//! exchange, close. The only concurrency is the stop signal, observed at
//! loop boundaries and during waits.

mod exchange;
mod flow;
mod link_session;
mod poller;
pub mod shutdown;

pub use exchange::{
    message_body, ExchangeSettings, ReceiverLoop, ReceiverReport, SenderLoop, SenderReport,
    DEFAULT_RECEIVE_RETRY_DELAY, DEFAULT_SEND_INTERVAL,
};
pub use flow::{ExchangeSummary, FlowSettings, FlowSummary, LinkFlow};
pub use link_session::{CloseReport, Link, LinkSession, LinkSessionManager};
pub use poller::{
    ready_endpoint, PollSettings, ResourcePoller, DEFAULT_POLL_INTERVAL, DEFAULT_POLL_TIMEOUT,
};
pub use shutdown::{Shutdown, ShutdownTrigger};

#[cfg(test)]
mod tests;
