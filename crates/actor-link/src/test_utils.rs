//! Test utilities for the link service.
//!
//! Scripted doubles for the control plane and the AMQP stack. Enable with
//! the `test-utils` feature flag.
//!
//! # Example
//!
//! ```rust,ignore
//! use actor_link::test_utils::{descriptor, ScriptedControlPlane};
//! use actor_link::ResourceKind;
//!
//! let api = ScriptedControlPlane::new(ResourceKind::Delivery)
//!     .respond(Ok(descriptor("d1", "REQUESTED")))
//!     .respond(Ok(descriptor("d1", "CREATED").with_target("h", 5671, "/t1")));
//! assert_eq!(api.create_calls(), 0);
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::domain::{
    ApiError, ApplicationProperties, Endpoint, EndpointEntry, InboundBody, InboundMessage,
    LinkError, OutboundMessage, ResourceDescriptor, ResourceKind, ResourceStatus,
};
use crate::ports::{
    ControlPlane, LinkConnector, LinkReceiver, LinkSender, TransportConnection, TransportSession,
};

/// Descriptor with the given id and status and no endpoints.
pub fn descriptor(id: &str, status: &str) -> ResourceDescriptor {
    ResourceDescriptor {
        id: id.to_string(),
        status: ResourceStatus::from(status.to_string()),
        endpoints: Vec::new(),
        extra: serde_json::Map::new(),
    }
}

impl ResourceDescriptor {
    /// Append a delivery endpoint.
    pub fn with_target(mut self, host: &str, port: u16, target: &str) -> Self {
        self.endpoints.push(EndpointEntry {
            host: host.to_string(),
            port,
            target: Some(target.to_string()),
            source: None,
        });
        self
    }

    /// Append a subscription endpoint.
    pub fn with_source(mut self, host: &str, port: u16, source: &str) -> Self {
        self.endpoints.push(EndpointEntry {
            host: host.to_string(),
            port,
            target: None,
            source: Some(source.to_string()),
        });
        self
    }
}

/// Received message with a single UTF-8 data section.
pub fn text_message(sequence: u64, body: &str, properties: ApplicationProperties) -> InboundMessage {
    InboundMessage {
        sequence,
        body: InboundBody::Data(vec![body.as_bytes().to_vec()]),
        properties,
    }
}

// =============================================================================
// CONTROL PLANE
// =============================================================================

#[derive(Default)]
struct ApiState {
    responses: VecDeque<Result<ResourceDescriptor, ApiError>>,
    last: Option<Result<ResourceDescriptor, ApiError>>,
    repeat_last: bool,
    create_calls: u32,
    get_calls: u32,
    selectors: Vec<String>,
    requested_ids: Vec<String>,
    deleted: Vec<String>,
    delete_error: Option<ApiError>,
    call_times: Vec<Instant>,
}

/// Control plane answering `create` and `get` from a script, in order.
///
/// Once the script runs out the last answer is repeated if
/// [`repeat_last`](Self::repeat_last) was set, otherwise calls fail.
pub struct ScriptedControlPlane {
    kind: ResourceKind,
    state: Mutex<ApiState>,
}

impl ScriptedControlPlane {
    /// Empty script for `kind`.
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            state: Mutex::new(ApiState::default()),
        }
    }

    /// Queue the next answer.
    pub fn respond(self, response: Result<ResourceDescriptor, ApiError>) -> Self {
        self.state.lock().responses.push_back(response);
        self
    }

    /// Keep returning the last answer when the script is exhausted.
    pub fn repeat_last(self) -> Self {
        self.state.lock().repeat_last = true;
        self
    }

    /// Make `delete` fail with `error`.
    pub fn fail_delete(self, error: ApiError) -> Self {
        self.state.lock().delete_error = Some(error);
        self
    }

    /// Number of `create` calls.
    pub fn create_calls(&self) -> u32 {
        self.state.lock().create_calls
    }

    /// Number of `get` calls.
    pub fn get_calls(&self) -> u32 {
        self.state.lock().get_calls
    }

    /// Selectors passed to `create`.
    pub fn selectors(&self) -> Vec<String> {
        self.state.lock().selectors.clone()
    }

    /// Ids passed to `get`.
    pub fn requested_ids(&self) -> Vec<String> {
        self.state.lock().requested_ids.clone()
    }

    /// Ids passed to `delete`.
    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().deleted.clone()
    }

    /// Instants of every `create` and `get` call.
    pub fn call_times(&self) -> Vec<Instant> {
        self.state.lock().call_times.clone()
    }

    fn next(&self, operation: &str) -> Result<ResourceDescriptor, ApiError> {
        let mut state = self.state.lock();
        state.call_times.push(Instant::now());
        match state.responses.pop_front() {
            Some(response) => {
                state.last = Some(response.clone());
                response
            }
            None => match (&state.last, state.repeat_last) {
                (Some(last), true) => last.clone(),
                _ => Err(ApiError::Transport {
                    operation: operation.to_string(),
                    reason: "script exhausted".to_string(),
                }),
            },
        }
    }
}

#[async_trait]
impl ControlPlane for ScriptedControlPlane {
    fn kind(&self) -> ResourceKind {
        self.kind
    }

    async fn create(&self, selector: &str) -> Result<ResourceDescriptor, ApiError> {
        {
            let mut state = self.state.lock();
            state.create_calls += 1;
            state.selectors.push(selector.to_string());
        }
        self.next(&format!("create {}", self.kind.collection()))
    }

    async fn get(&self, id: &str) -> Result<ResourceDescriptor, ApiError> {
        {
            let mut state = self.state.lock();
            state.get_calls += 1;
            state.requested_ids.push(id.to_string());
        }
        self.next(&format!("get {}", self.kind.collection()))
    }

    async fn delete(&self, id: &str) -> Result<(), ApiError> {
        let mut state = self.state.lock();
        state.deleted.push(id.to_string());
        match &state.delete_error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

// =============================================================================
// AMQP STACK
// =============================================================================

/// Observable step on the recorded AMQP stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Connection opened to this URI.
    Connect(String),
    /// Session begun.
    BeginSession,
    /// Sending link attached.
    AttachSender {
        /// Link name.
        name: String,
        /// Target address.
        address: String,
    },
    /// Receiving link attached.
    AttachReceiver {
        /// Link name.
        name: String,
        /// Source address.
        address: String,
    },
    /// Message handed to a sending link.
    Send,
    /// Delivery accepted, by sequence.
    Accept(u64),
    /// Link closed.
    CloseLink,
    /// Session ended.
    EndSession,
    /// Connection closed.
    CloseConnection,
}

#[derive(Default)]
struct StackState {
    events: Vec<LinkEvent>,
    sent: Vec<OutboundMessage>,
    accepted: Vec<u64>,
    deliveries: VecDeque<Result<InboundMessage, LinkError>>,
    sends: u64,
    reject_sends: Vec<u64>,
    panic_on_send: Option<u64>,
    fail_connect: bool,
    fail_begin_session: bool,
    fail_attach: bool,
    fail_link_close: bool,
    fail_session_end: bool,
    fail_connection_close: bool,
}

/// In-memory AMQP stack that journals every call.
///
/// Receivers hand out the scripted deliveries in order and then wait
/// forever, like an idle source.
#[derive(Clone, Default)]
pub struct RecordingConnector {
    state: Arc<Mutex<StackState>>,
}

impl RecordingConnector {
    /// Stack where every call succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    fn configure(self, f: impl FnOnce(&mut StackState)) -> Self {
        f(&mut self.state.lock());
        self
    }

    /// Fail the connection step.
    pub fn fail_connect(self) -> Self {
        self.configure(|s| s.fail_connect = true)
    }

    /// Fail session begin.
    pub fn fail_begin_session(self) -> Self {
        self.configure(|s| s.fail_begin_session = true)
    }

    /// Fail link attach.
    pub fn fail_attach(self) -> Self {
        self.configure(|s| s.fail_attach = true)
    }

    /// Fail link close.
    pub fn fail_link_close(self) -> Self {
        self.configure(|s| s.fail_link_close = true)
    }

    /// Fail session end.
    pub fn fail_session_end(self) -> Self {
        self.configure(|s| s.fail_session_end = true)
    }

    /// Fail connection close.
    pub fn fail_connection_close(self) -> Self {
        self.configure(|s| s.fail_connection_close = true)
    }

    /// Settle the `nth` send (1-based) with a rejected outcome.
    pub fn reject_send(self, nth: u64) -> Self {
        self.configure(|s| s.reject_sends.push(nth))
    }

    /// Panic inside the `nth` send (1-based).
    pub fn panic_on_send(self, nth: u64) -> Self {
        self.configure(|s| s.panic_on_send = Some(nth))
    }

    /// Queue a receive result.
    pub fn deliver(self, delivery: Result<InboundMessage, LinkError>) -> Self {
        self.configure(|s| s.deliveries.push_back(delivery))
    }

    /// Journal so far.
    pub fn events(&self) -> Vec<LinkEvent> {
        self.state.lock().events.clone()
    }

    /// Occurrences of `event` in the journal.
    pub fn count(&self, event: &LinkEvent) -> usize {
        self.state.lock().events.iter().filter(|e| *e == event).count()
    }

    /// Messages handed to sending links.
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.state.lock().sent.clone()
    }

    /// Accepted delivery sequences.
    pub fn accepted(&self) -> Vec<u64> {
        self.state.lock().accepted.clone()
    }

    /// A sending link on this stack, without a connection.
    pub fn sender(&self, _target: &str) -> Box<dyn LinkSender> {
        Box::new(RecordedSender {
            state: self.state.clone(),
        })
    }

    /// A receiving link on this stack, without a connection.
    pub fn receiver(&self, _source: &str) -> Box<dyn LinkReceiver> {
        Box::new(RecordedReceiver {
            state: self.state.clone(),
        })
    }

    fn record(&self, event: LinkEvent) {
        self.state.lock().events.push(event);
    }
}

fn record(state: &Mutex<StackState>, event: LinkEvent) {
    state.lock().events.push(event);
}

#[async_trait]
impl LinkConnector for RecordingConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn TransportConnection>, LinkError> {
        if self.state.lock().fail_connect {
            return Err(LinkError::Transport("connection refused".into()));
        }
        self.record(LinkEvent::Connect(endpoint.uri()));
        Ok(Box::new(RecordedConnection {
            state: self.state.clone(),
        }))
    }
}

struct RecordedConnection {
    state: Arc<Mutex<StackState>>,
}

#[async_trait]
impl TransportConnection for RecordedConnection {
    async fn begin_session(&mut self) -> Result<Box<dyn TransportSession>, LinkError> {
        if self.state.lock().fail_begin_session {
            return Err(LinkError::Other("begin rejected".into()));
        }
        record(&self.state, LinkEvent::BeginSession);
        Ok(Box::new(RecordedSession {
            state: self.state.clone(),
        }))
    }

    async fn close(&mut self) -> Result<(), LinkError> {
        record(&self.state, LinkEvent::CloseConnection);
        if self.state.lock().fail_connection_close {
            return Err(LinkError::Transport("close failed".into()));
        }
        Ok(())
    }
}

struct RecordedSession {
    state: Arc<Mutex<StackState>>,
}

#[async_trait]
impl TransportSession for RecordedSession {
    async fn attach_sender(
        &mut self,
        name: &str,
        target: &str,
    ) -> Result<Box<dyn LinkSender>, LinkError> {
        if self.state.lock().fail_attach {
            return Err(LinkError::Detached("amqp:not-found".into()));
        }
        record(
            &self.state,
            LinkEvent::AttachSender {
                name: name.to_string(),
                address: target.to_string(),
            },
        );
        Ok(Box::new(RecordedSender {
            state: self.state.clone(),
        }))
    }

    async fn attach_receiver(
        &mut self,
        name: &str,
        source: &str,
    ) -> Result<Box<dyn LinkReceiver>, LinkError> {
        if self.state.lock().fail_attach {
            return Err(LinkError::Detached("amqp:not-found".into()));
        }
        record(
            &self.state,
            LinkEvent::AttachReceiver {
                name: name.to_string(),
                address: source.to_string(),
            },
        );
        Ok(Box::new(RecordedReceiver {
            state: self.state.clone(),
        }))
    }

    async fn end(&mut self) -> Result<(), LinkError> {
        record(&self.state, LinkEvent::EndSession);
        if self.state.lock().fail_session_end {
            return Err(LinkError::SessionEnded("end failed".into()));
        }
        Ok(())
    }
}

struct RecordedSender {
    state: Arc<Mutex<StackState>>,
}

#[async_trait]
impl LinkSender for RecordedSender {
    async fn send(&mut self, message: OutboundMessage) -> Result<(), LinkError> {
        let (nth, rejected, panics) = {
            let mut state = self.state.lock();
            state.sends += 1;
            let nth = state.sends;
            state.events.push(LinkEvent::Send);
            state.sent.push(message);
            (
                nth,
                state.reject_sends.contains(&nth),
                state.panic_on_send == Some(nth),
            )
        };
        if panics {
            panic!("induced failure on send #{}", nth);
        }
        if rejected {
            return Err(LinkError::NotAccepted("rejected".into()));
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), LinkError> {
        record(&self.state, LinkEvent::CloseLink);
        if self.state.lock().fail_link_close {
            return Err(LinkError::Detached("close failed".into()));
        }
        Ok(())
    }
}

struct RecordedReceiver {
    state: Arc<Mutex<StackState>>,
}

#[async_trait]
impl LinkReceiver for RecordedReceiver {
    async fn recv(&mut self) -> Result<InboundMessage, LinkError> {
        let next = self.state.lock().deliveries.pop_front();
        match next {
            Some(delivery) => delivery,
            None => std::future::pending().await,
        }
    }

    async fn accept(&mut self, message: &InboundMessage) -> Result<(), LinkError> {
        let mut state = self.state.lock();
        state.events.push(LinkEvent::Accept(message.sequence));
        state.accepted.push(message.sequence);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), LinkError> {
        record(&self.state, LinkEvent::CloseLink);
        if self.state.lock().fail_link_close {
            return Err(LinkError::Detached("close failed".into()));
        }
        Ok(())
    }
}
