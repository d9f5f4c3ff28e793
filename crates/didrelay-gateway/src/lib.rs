//! didrelay Gateway - real-time WebSocket relay for DID endpoints
//!
//! Clients connect over WebSocket, register the identifier they answer to,
//! and send envelopes addressed to other identifiers. The relay forwards each
//! envelope to whichever connection currently holds the target identifier,
//! byte-for-byte, and silently drops it when nobody does. Nothing is stored.

mod client;
mod connection;
mod gateway;
mod hub;
mod protocol;
mod session;

pub use client::{ClientError, RelayClient};
pub use gateway::{Gateway, GatewayError};
pub use hub::{DispatchOutcome, DropReason, HubOptions, RegisterError, RelayHub, RouteOutcome};
pub use protocol::{DecodeError, Envelope, RoutedMessage, REGISTER_TYPE};
pub use session::{Session, SessionError, SessionHandle, SessionState};

pub use didrelay_config::GatewayConfig;
