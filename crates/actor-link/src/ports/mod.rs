//! Ports layer: trait seams for the control plane and the AMQP stack.

pub mod outbound;

pub use outbound::{
    ControlPlane, LinkConnector, LinkReceiver, LinkSender, TransportConnection, TransportSession,
};
