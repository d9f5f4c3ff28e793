//! Relay hub
//!
//! Owns the routing table from identifier to live session. Every table
//! operation is a single atomic DashMap call on one key, so a registration,
//! a cleanup and a lookup for the same identifier can never interleave
//! half-way. Sends happen after the shard guard has been released.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::protocol::{Envelope, RoutedMessage};
use crate::session::SessionHandle;
use didrelay_config::GatewayConfig;
use didrelay_observability::RelayMetrics;

/// Hub behaviour switches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubOptions {
    /// Close the previous session when another one registers its identifier
    pub close_superseded: bool,
    /// Frames a session may have waiting before sends to it fail
    pub outbound_queue: usize,
}

impl From<&GatewayConfig> for HubOptions {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            close_superseded: config.close_superseded,
            outbound_queue: config.outbound_queue,
        }
    }
}

impl Default for HubOptions {
    fn default() -> Self {
        Self::from(&GatewayConfig::default())
    }
}

/// Why a routed message was not delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Nobody is registered under the target identifier
    NoRoute,
    /// The registered session is no longer open
    TargetClosed,
    /// Queueing the frame on the target failed, or its queue was full
    SendFailed,
}

impl DropReason {
    /// Metric label for this reason
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::NoRoute => "no_route",
            DropReason::TargetClosed => "target_closed",
            DropReason::SendFailed => "send_failed",
        }
    }
}

/// Result of a single forwarding attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Delivered,
    Dropped(DropReason),
}

/// What the hub did with a dispatched envelope
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// Identifier bound; `superseded` is set when another session lost it
    Registered { superseded: bool },
    Routed(RouteOutcome),
}

/// Registration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegisterError {
    #[error("identifier must not be empty")]
    EmptyIdentifier,
    #[error("session {0} is already closed")]
    SessionClosed(String),
}

/// Routing table shared by every connection
#[derive(Debug, Default)]
pub struct RelayHub {
    table: DashMap<String, SessionHandle>,
    options: HubOptions,
}

impl RelayHub {
    /// Create an empty hub with default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty hub with explicit options
    pub fn with_options(options: HubOptions) -> Self {
        Self {
            table: DashMap::new(),
            options,
        }
    }

    /// Options this hub was built with
    pub fn options(&self) -> &HubOptions {
        &self.options
    }

    /// Route a decoded envelope on behalf of `session`
    pub fn dispatch(
        &self,
        session: &SessionHandle,
        envelope: Envelope,
    ) -> Result<DispatchOutcome, RegisterError> {
        match envelope {
            Envelope::Register { did } => {
                let superseded = self.register(&did, session)?;
                Ok(DispatchOutcome::Registered {
                    superseded: superseded.is_some(),
                })
            }
            Envelope::Routed(message) => Ok(DispatchOutcome::Routed(self.route(&message))),
        }
    }

    /// Point `identifier` at `session`, replacing any previous holder.
    ///
    /// Returns the session that held the identifier before, if it was a
    /// different one. That session is left open unless
    /// [`HubOptions::close_superseded`] is set; either way it is no longer
    /// reachable. If `session` was registered under another identifier, that
    /// older entry is removed.
    pub fn register(
        &self,
        identifier: &str,
        session: &SessionHandle,
    ) -> Result<Option<SessionHandle>, RegisterError> {
        if identifier.is_empty() {
            return Err(RegisterError::EmptyIdentifier);
        }
        if !session.is_open() {
            return Err(RegisterError::SessionClosed(session.id().to_string()));
        }

        let previous_identifier = session.bind(identifier);
        let replaced = self
            .table
            .insert(identifier.to_string(), Arc::clone(session));

        if let Some(previous) = previous_identifier.filter(|previous| previous != identifier) {
            self.table
                .remove_if(&previous, |_, held| Arc::ptr_eq(held, session));
            debug!("Session {} moved from {} to {}", session.id(), previous, identifier);
        }

        let superseded = replaced.filter(|prior| !Arc::ptr_eq(prior, session));
        if let Some(ref prior) = superseded {
            info!(
                "Identifier {} taken over by session {} (was {})",
                identifier,
                session.id(),
                prior.id()
            );
            if self.options.close_superseded {
                prior.close();
            }
        }

        RelayMetrics::record_registration();
        RelayMetrics::set_registered(self.table.len());
        info!("Registered: {}", identifier);

        Ok(superseded)
    }

    /// Forward a routed message to its target, best effort.
    ///
    /// The frame is handed over unmodified. Misses are silent drops; a failed
    /// send, including one to a target whose queue is full, also closes the
    /// target and removes its entry.
    pub fn route(&self, message: &RoutedMessage) -> RouteOutcome {
        let target = self
            .table
            .get(&message.to)
            .map(|entry| Arc::clone(entry.value()));

        let Some(target) = target else {
            info!("Drop: Target {} not connected", message.to);
            return Self::dropped(DropReason::NoRoute);
        };

        if !target.is_open() {
            info!("Drop: Target {} is closing", message.to);
            self.unregister(&target);
            return Self::dropped(DropReason::TargetClosed);
        }

        match target.send(message.frame()) {
            Ok(()) => {
                debug!(
                    "Relayed {} from {} to {}",
                    message.kind.as_deref().unwrap_or("message"),
                    message.from.as_deref().unwrap_or("<unknown>"),
                    message.to
                );
                RelayMetrics::record_relayed();
                RouteOutcome::Delivered
            }
            Err(e) => {
                warn!("Drop: send to {} failed: {}", message.to, e);
                target.close();
                self.unregister(&target);
                Self::dropped(DropReason::SendFailed)
            }
        }
    }

    fn dropped(reason: DropReason) -> RouteOutcome {
        RelayMetrics::record_dropped(reason.as_str());
        RouteOutcome::Dropped(reason)
    }

    /// Remove the entry for `session`'s identifier if it still points at
    /// exactly this session. Returns whether an entry was removed.
    pub fn unregister(&self, session: &SessionHandle) -> bool {
        let Some(identifier) = session.identifier() else {
            return false;
        };
        let removed = self
            .table
            .remove_if(&identifier, |_, held| Arc::ptr_eq(held, session))
            .is_some();
        if removed {
            RelayMetrics::set_registered(self.table.len());
        }
        removed
    }

    /// Session currently registered under `identifier`
    pub fn lookup(&self, identifier: &str) -> Option<SessionHandle> {
        self.table
            .get(identifier)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Number of registered identifiers
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether no identifier is registered
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// All registered identifiers, in no particular order
    pub fn identifiers(&self) -> Vec<String> {
        self.table.iter().map(|entry| entry.key().clone()).collect()
    }
}
