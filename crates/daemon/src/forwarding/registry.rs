//! The table of live reverse forwards.

use std::collections::HashMap;

use protocol::ForwardAddress;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::listener::ForwardListener;
use super::{bind_host, ForwardError};
use crate::transport::{ConnectionId, SharedTransport};

struct ForwardEntry {
    owner: ConnectionId,
    stop: CancellationToken,
    accept_task: JoinHandle<()>,
}

/// Live forwarded listeners, keyed by bind address.
///
/// Shared by every connection of a server. One lock covers the whole table,
/// so checking for an existing listener and binding a new one cannot race.
/// Tests can create as many independent registries as they like.
#[derive(Default)]
pub struct ForwardRegistry {
    entries: Mutex<HashMap<ForwardAddress, ForwardEntry>>,
}

impl ForwardRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts forwarding `address` on behalf of `transport`'s connection.
    ///
    /// Returns the address the listener is registered under; for a TCP
    /// request with port 0 it carries the port actually bound, and a
    /// wildcard host is spelled `0.0.0.0`.
    pub async fn open(
        &self,
        address: ForwardAddress,
        transport: SharedTransport,
    ) -> Result<ForwardAddress, ForwardError> {
        let mut entries = self.entries.lock().await;

        let requested = registry_key(&address);
        if entries.contains_key(&requested) {
            return Err(ForwardError::AlreadyForwarding(requested));
        }

        let listener = ForwardListener::bind(&address).await?;
        let bound = registry_key(&listener.address());
        if entries.contains_key(&bound) {
            return Err(ForwardError::AlreadyForwarding(bound));
        }

        let owner = transport.connection_id().to_string();
        let stop = CancellationToken::new();
        let accept_task = tokio::spawn(listener.serve(transport, stop.clone()));

        tracing::info!(conn_id = %owner, address = %bound, "Forwarding started");

        entries.insert(
            bound.clone(),
            ForwardEntry {
                owner,
                stop,
                accept_task,
            },
        );

        Ok(bound)
    }

    /// Stops forwarding `address`, whichever connection opened it.
    ///
    /// When this returns the listener is closed and the address can be
    /// opened again. Connections already being proxied keep running.
    pub async fn cancel(&self, address: &ForwardAddress) -> Result<(), ForwardError> {
        let key = registry_key(address);
        let mut entries = self.entries.lock().await;
        let entry = entries
            .remove(&key)
            .ok_or_else(|| ForwardError::NotForwarding(address.clone()))?;
        close_entry(&key, entry).await;
        Ok(())
    }

    /// Stops forwarding `address` if connection `conn` owns it.
    ///
    /// A forward owned by another connection is reported as not forwarding.
    pub async fn cancel_owned(&self, conn: &str, address: &ForwardAddress) -> Result<(), ForwardError> {
        let key = registry_key(address);
        let mut entries = self.entries.lock().await;
        match entries.get(&key) {
            Some(entry) if entry.owner == conn => {}
            _ => return Err(ForwardError::NotForwarding(address.clone())),
        }
        if let Some(entry) = entries.remove(&key) {
            close_entry(&key, entry).await;
        }
        Ok(())
    }

    /// Stops every forward owned by connection `conn`. Returns how many
    /// were stopped.
    pub async fn release_connection(&self, conn: &str) -> usize {
        let mut entries = self.entries.lock().await;
        let owned: Vec<ForwardAddress> = entries
            .iter()
            .filter(|(_, entry)| entry.owner == conn)
            .map(|(address, _)| address.clone())
            .collect();

        for address in &owned {
            if let Some(entry) = entries.remove(address) {
                close_entry(address, entry).await;
            }
        }

        if !owned.is_empty() {
            tracing::info!(conn_id = %conn, count = owned.len(), "Released forwards for closed connection");
        }
        owned.len()
    }

    /// Whether a listener is registered for `address`.
    pub async fn is_listening(&self, address: &ForwardAddress) -> bool {
        self.entries.lock().await.contains_key(&registry_key(address))
    }

    /// Number of live listeners.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Addresses of all live listeners.
    pub async fn addresses(&self) -> Vec<ForwardAddress> {
        self.entries.lock().await.keys().cloned().collect()
    }
}

/// The table key for `address`. TCP hosts that name the same bind address
/// (`""`, `*`, `0.0.0.0`) share one key.
fn registry_key(address: &ForwardAddress) -> ForwardAddress {
    match address {
        ForwardAddress::Tcp { host, port } => ForwardAddress::tcp(bind_host(host), *port),
        ForwardAddress::Unix { .. } => address.clone(),
    }
}

async fn close_entry(address: &ForwardAddress, entry: ForwardEntry) {
    entry.stop.cancel();
    if let Err(e) = entry.accept_task.await {
        tracing::warn!(address = %address, "Forward accept task failed: {}", e);
    }
    if let ForwardAddress::Unix { path } = address {
        if let Err(e) = std::fs::remove_file(path) {
            tracing::debug!(address = %address, "Could not remove socket file: {}", e);
        }
    }
    tracing::info!(conn_id = %entry.owner, address = %address, "Forwarding stopped");
}

impl Drop for ForwardRegistry {
    fn drop(&mut self) {
        for entry in self.entries.get_mut().values() {
            entry.stop.cancel();
        }
    }
}
