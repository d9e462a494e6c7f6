//! Sender and receiver loops over an attached link.

use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::domain::{
    decode, ApplicationProperties, DecodeError, DecodedMessage, InboundMessage, LinkError,
    OutboundMessage,
};
use crate::ports::{LinkReceiver, LinkSender};

use super::shutdown::Shutdown;

/// Default pause between sends.
pub const DEFAULT_SEND_INTERVAL: Duration = Duration::from_secs(1);

/// Default pause after a transient receive error.
pub const DEFAULT_RECEIVE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Loop pacing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSettings {
    /// Pause between consecutive sends.
    pub send_interval: Duration,
    /// Pause after a non-fatal receive error.
    pub receive_retry_delay: Duration,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            send_interval: DEFAULT_SEND_INTERVAL,
            receive_retry_delay: DEFAULT_RECEIVE_RETRY_DELAY,
        }
    }
}

/// Body text of the `counter`-th message.
pub fn message_body(counter: u64, at: DateTime<Local>) -> String {
    format!("Hello World! Message #{} at {}", counter, at.format("%H:%M:%S"))
}

/// Totals of a finished sender loop.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SenderReport {
    /// Messages handed to the link.
    pub attempted: u64,
    /// Messages settled with the accepted outcome.
    pub settled: u64,
    /// Messages that failed to send or were not accepted.
    pub failed: u64,
}

/// Periodic sender. One counter per instance, starting at 1.
pub struct SenderLoop {
    properties: ApplicationProperties,
    interval: Duration,
    counter: u64,
}

impl SenderLoop {
    /// Sender stamping every message with `properties`.
    pub fn new(properties: ApplicationProperties, interval: Duration) -> Self {
        Self {
            properties,
            interval,
            counter: 0,
        }
    }

    /// Number of the last message built; 0 before the first send.
    pub fn counter(&self) -> u64 {
        self.counter
    }

    fn next_message(&mut self) -> OutboundMessage {
        self.counter += 1;
        OutboundMessage::text(
            message_body(self.counter, Local::now()),
            self.properties.clone(),
        )
    }

    /// Build and send the next message, waiting for settlement.
    ///
    /// The counter advances even if the send fails.
    pub async fn send_next(&mut self, sender: &mut dyn LinkSender) -> Result<(), LinkError> {
        let message = self.next_message();
        info!(
            "[sender] Sending message: body='{}', properties={}",
            String::from_utf8_lossy(&message.body),
            message.properties.to_json()
        );
        sender.send(message).await?;
        info!("[sender] Message settled");
        Ok(())
    }

    /// Send until `shutdown` fires.
    ///
    /// Per-message failures are logged and do not stop the loop. A send that
    /// is in flight when the stop arrives completes first.
    pub async fn run(&mut self, sender: &mut dyn LinkSender, shutdown: &mut Shutdown) -> SenderReport {
        let mut report = SenderReport::default();

        while !shutdown.is_triggered() {
            report.attempted += 1;
            match self.send_next(sender).await {
                Ok(()) => report.settled += 1,
                Err(e) => {
                    warn!(counter = self.counter, "[sender] Error sending message: {}", e);
                    report.failed += 1;
                }
            }

            if !shutdown.sleep(self.interval).await {
                break;
            }
        }

        info!(
            "[sender] Stopping message sending... Sent {} messages total.",
            self.counter
        );
        report
    }
}

/// Totals of a finished receiver loop.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReceiverReport {
    /// Messages taken off the link.
    pub received: u64,
    /// Messages acknowledged with the accepted outcome.
    pub accepted: u64,
    /// Messages whose body was not valid UTF-8.
    pub decode_failures: u64,
    /// Acknowledgements that failed.
    pub accept_failures: u64,
    /// Non-fatal receive errors.
    pub receive_errors: u64,
}

/// Receive loop: decode, log, accept.
pub struct ReceiverLoop {
    retry_delay: Duration,
    inbox: Option<mpsc::UnboundedSender<DecodedMessage>>,
}

enum Next {
    Stop,
    Received(Result<InboundMessage, LinkError>),
}

impl ReceiverLoop {
    /// Loop pausing `retry_delay` after a transient receive error.
    pub fn new(retry_delay: Duration) -> Self {
        Self {
            retry_delay,
            inbox: None,
        }
    }

    /// Also forward every decoded message to `inbox`.
    ///
    /// A closed inbox does not stop the loop.
    pub fn with_inbox(mut self, inbox: mpsc::UnboundedSender<DecodedMessage>) -> Self {
        self.inbox = Some(inbox);
        self
    }

    /// Receive until `shutdown` fires or the link fails fatally.
    ///
    /// A fatal error is returned together with the totals so far.
    pub async fn run(
        &self,
        receiver: &mut dyn LinkReceiver,
        shutdown: &mut Shutdown,
    ) -> (ReceiverReport, Option<LinkError>) {
        let mut report = ReceiverReport::default();

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.triggered() => Next::Stop,
                received = receiver.recv() => Next::Received(received),
            };

            match next {
                Next::Stop => break,
                Next::Received(Ok(message)) => {
                    report.received += 1;
                    self.handle(receiver, &message, &mut report).await;
                }
                Next::Received(Err(e)) if e.is_fatal() => {
                    error!("[receiver] Error receiving message: {}", e);
                    info!(
                        "[receiver] Stopping message receiving... Received {} messages total.",
                        report.received
                    );
                    return (report, Some(e));
                }
                Next::Received(Err(e)) => {
                    warn!("[receiver] Error receiving message: {}", e);
                    report.receive_errors += 1;
                    if !shutdown.sleep(self.retry_delay).await {
                        break;
                    }
                }
            }
        }

        info!(
            "[receiver] Stopping message receiving... Received {} messages total.",
            report.received
        );
        (report, None)
    }

    async fn handle(
        &self,
        receiver: &mut dyn LinkReceiver,
        message: &InboundMessage,
        report: &mut ReceiverReport,
    ) {
        match decode(message) {
            Ok(decoded) => {
                info!(
                    "[receiver] Message received: body='{}', properties={}",
                    decoded.body,
                    decoded.properties.to_json()
                );
                if let Some(inbox) = &self.inbox {
                    if inbox.send(decoded).is_err() {
                        debug!("[receiver] Inbox closed, message only logged");
                    }
                }
            }
            Err(DecodeError::InvalidUtf8 { lossy, reason }) => {
                warn!(
                    "[receiver] Message received with undecodable body ({}): body='{}', properties={}",
                    reason,
                    lossy,
                    message.properties.to_json()
                );
                report.decode_failures += 1;
            }
            Err(e) => {
                warn!("[receiver] Message received but could not be decoded: {}", e);
                report.decode_failures += 1;
            }
        }

        match receiver.accept(message).await {
            Ok(()) => report.accepted += 1,
            Err(e) => {
                warn!(sequence = message.sequence, "[receiver] Error accepting message: {}", e);
                report.accept_failures += 1;
            }
        }
    }
}
