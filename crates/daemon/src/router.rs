//! Connection-level request router.
//!
//! Forwarding open and cancel requests arrive on the transport connection,
//! outside any session. The `RequestRouter` resolves the request name once
//! through a dispatch table built at construction, then hands the typed
//! request to the [`ForwardRegistry`].

use std::collections::HashMap;
use std::sync::Arc;

use protocol::{ForwardAddress, GlobalRequestKind, RequestReply};
use tracing::{debug, info, warn};

use crate::forwarding::{ForwardError, ForwardRegistry};
use crate::transport::SharedTransport;

/// Result type for router operations: the bound port to report, if any.
pub type RouterResult = Result<Option<u32>, RouterError>;

/// Errors that can occur during request routing.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// The request name is not in the dispatch table.
    #[error("unknown request: {0}")]
    UnknownRequest(String),

    /// The address does not match the request (a path for a TCP forward, or
    /// the reverse).
    #[error("{request} cannot take address {address}")]
    AddressMismatch {
        request: &'static str,
        address: ForwardAddress,
    },

    /// Reverse forwarding is turned off.
    #[error("remote forwarding is disabled")]
    RemoteDisabled,

    /// Forwarding registry error.
    #[error(transparent)]
    Forward(#[from] ForwardError),
}

impl RouterError {
    /// Convert the error to a rejection for the caller.
    pub fn to_reply(&self) -> RequestReply {
        RequestReply::Rejected {
            reason: self.to_string(),
        }
    }
}

/// Routes forwarding requests to the registry.
pub struct RequestRouter {
    table: HashMap<&'static str, GlobalRequestKind>,
    registry: Arc<ForwardRegistry>,
    allow_remote: bool,
}

impl RequestRouter {
    /// Builds the dispatch table for every request kind.
    pub fn new(registry: Arc<ForwardRegistry>, allow_remote: bool) -> Self {
        let table = GlobalRequestKind::ALL
            .iter()
            .map(|kind| (kind.name(), *kind))
            .collect();
        Self {
            table,
            registry,
            allow_remote,
        }
    }

    /// The registry requests are routed to.
    pub fn registry(&self) -> &Arc<ForwardRegistry> {
        &self.registry
    }

    /// Whether `name` is a request this router handles.
    pub fn handles(&self, name: &str) -> bool {
        self.table.contains_key(name)
    }

    /// Looks up a request name.
    pub fn resolve(&self, name: &str) -> Result<GlobalRequestKind, RouterError> {
        self.table
            .get(name)
            .copied()
            .ok_or_else(|| RouterError::UnknownRequest(name.to_string()))
    }

    /// Handles one request and returns the reply for the caller.
    pub async fn route(
        &self,
        name: &str,
        address: ForwardAddress,
        transport: SharedTransport,
    ) -> RequestReply {
        let conn_id = transport.connection_id().to_string();
        match self.dispatch(name, address, transport).await {
            Ok(bound_port) => {
                debug!(conn_id = %conn_id, request = %name, "Request accepted");
                RequestReply::Accepted { bound_port }
            }
            Err(e) => {
                warn!(conn_id = %conn_id, request = %name, "Request rejected: {}", e);
                e.to_reply()
            }
        }
    }

    /// Resolves and performs one request.
    pub async fn dispatch(
        &self,
        name: &str,
        address: ForwardAddress,
        transport: SharedTransport,
    ) -> RouterResult {
        let kind = self.resolve(name)?;

        if address.kind() != kind.forward_kind() {
            return Err(RouterError::AddressMismatch {
                request: kind.name(),
                address,
            });
        }

        match kind {
            GlobalRequestKind::OpenForward(_) => self.handle_open(address, transport).await,
            GlobalRequestKind::CancelForward(_) => self.handle_cancel(address, transport).await,
        }
    }

    async fn handle_open(&self, address: ForwardAddress, transport: SharedTransport) -> RouterResult {
        if !self.allow_remote {
            return Err(RouterError::RemoteDisabled);
        }

        let requested_any_port = matches!(address, ForwardAddress::Tcp { port: 0, .. });
        let bound = self.registry.open(address, transport).await?;
        info!(address = %bound, "Forward opened");

        // Only a request for port 0 learns the port in the reply.
        match bound {
            ForwardAddress::Tcp { port, .. } if requested_any_port => Ok(Some(port)),
            _ => Ok(None),
        }
    }

    async fn handle_cancel(&self, address: ForwardAddress, transport: SharedTransport) -> RouterResult {
        self.registry
            .cancel_owned(transport.connection_id(), &address)
            .await?;
        info!(address = %address, "Forward cancelled");
        Ok(None)
    }
}
