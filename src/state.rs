//! Address table and the tracker that keeps it in sync with the runtime.
//!
//! The table maps network ID to [`Network`].  It is shared between the
//! dispatch loop, which owns the only [`StateTracker`] and therefore is the
//! only writer, and the DNS handlers, which read it through
//! [`AddressTable::query_endpoint`].  All access goes through a read-write
//! lock, and no remote call is ever made while the lock is held.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::RwLock;

use crate::error::TrackerError;
use crate::runtime::ContainerInspector;
use crate::types::{
    normalize_container_name, ContainerListing, Endpoint, Network, NetworkEvent, NetworkListing,
};

/// Shared handle on the network ID -> Network map.
///
/// Ordered by network ID so a container name present on several networks
/// always resolves to the endpoint on the smallest network ID.
#[derive(Debug, Clone, Default)]
pub struct AddressTable {
    inner: Arc<RwLock<BTreeMap<String, Network>>>,
}

impl AddressTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// First endpoint whose container name matches `name` ignoring ASCII
    /// case, scanning networks in ID order.
    pub async fn query_endpoint(&self, name: &str) -> Option<Endpoint> {
        let networks = self.inner.read().await;
        networks
            .values()
            .flat_map(|nw| nw.endpoints.values())
            .find(|ep| ep.container_name.eq_ignore_ascii_case(name))
            .cloned()
    }

    pub async fn network_count(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn endpoint_count(&self) -> usize {
        let networks = self.inner.read().await;
        networks.values().map(|nw| nw.endpoints.len()).sum()
    }

    /// Log a human readable dump of the table.
    pub async fn print_status(&self) {
        let networks = self.inner.read().await;
        info!("Networks ({}):", networks.len());
        for nw in networks.values() {
            info!(" - {}", nw);
            for endpoint in nw.endpoints.values() {
                info!("   - {}", endpoint);
            }
        }
    }
}

#[cfg(test)]
impl AddressTable {
    pub(crate) async fn network(&self, network_id: &str) -> Option<Network> {
        self.inner.read().await.get(network_id).cloned()
    }
}

/// Sole writer of the [`AddressTable`].
pub struct StateTracker {
    table: AddressTable,
    inspector: Arc<dyn ContainerInspector>,
}

impl StateTracker {
    pub fn new(table: AddressTable, inspector: Arc<dyn ContainerInspector>) -> Self {
        Self { table, inspector }
    }

    pub fn table(&self) -> &AddressTable {
        &self.table
    }

    /// Populate the table from the startup listing.
    ///
    /// Networks are indexed first since attachments are looked up by
    /// network ID.  Inconsistencies in the listing are logged and skipped.
    pub async fn load_snapshot(
        &self,
        networks: Vec<NetworkListing>,
        containers: Vec<ContainerListing>,
    ) {
        let mut table = self.table.inner.write().await;

        for listing in networks {
            if table.contains_key(&listing.id) {
                warn!("Snapshot lists network {} twice, skipping", listing.id);
                continue;
            }
            let nw = Network::new(listing.id, listing.name);
            debug!("Snapshot network: {}", nw);
            table.insert(nw.id.clone(), nw);
        }

        for container in containers {
            let container_name = match normalize_container_name(&container.name) {
                Ok(name) => name,
                Err(e) => {
                    warn!("Skipping snapshot container {}: {}", container.id, e);
                    continue;
                }
            };

            for attachment in container.attachments {
                let Some(nw) = table.get_mut(&attachment.network_id) else {
                    debug!(
                        "Container {} is attached to unlisted network {}",
                        container_name, attachment.network_id
                    );
                    continue;
                };
                if nw.endpoints.contains_key(&container.id) {
                    warn!(
                        "Snapshot lists container {} twice on network {}",
                        container_name, nw
                    );
                    continue;
                }
                let endpoint = Endpoint {
                    container_id: container.id.clone(),
                    container_name: container_name.clone(),
                    ipv4_address: attachment.ipv4_address,
                    ipv6_address: attachment.ipv6_address,
                };
                debug!("Snapshot endpoint on {}: {}", nw, endpoint);
                nw.endpoints.insert(container.id.clone(), endpoint);
            }
        }

        info!(
            "Snapshot loaded: {} networks, {} endpoints",
            table.len(),
            table.values().map(|nw| nw.endpoints.len()).sum::<usize>()
        );
    }

    /// Apply one lifecycle event to the table.
    pub async fn apply_event(&self, event: NetworkEvent) -> Result<(), TrackerError> {
        match event {
            NetworkEvent::Create { network_id, name } => {
                self.handle_create(network_id, name).await
            }
            NetworkEvent::Destroy { network_id } => self.handle_destroy(network_id).await,
            NetworkEvent::Connect {
                network_id,
                container_id,
            } => self.handle_connect(network_id, container_id).await,
            NetworkEvent::Disconnect {
                network_id,
                container_id,
            } => self.handle_disconnect(network_id, container_id).await,
            NetworkEvent::Unknown { action } => Err(TrackerError::UnhandledEvent(action)),
        }
    }

    async fn handle_create(&self, network_id: String, name: String) -> Result<(), TrackerError> {
        require("create", "id", &network_id)?;
        require("create", "name", &name)?;

        let mut table = self.table.inner.write().await;
        if let Some(existing) = table.get(&network_id) {
            info!("Skipping already known network: {}", existing);
            return Ok(());
        }
        let nw = Network::new(network_id, name);
        info!("Added network: {}", nw);
        table.insert(nw.id.clone(), nw);
        Ok(())
    }

    async fn handle_destroy(&self, network_id: String) -> Result<(), TrackerError> {
        require("destroy", "id", &network_id)?;

        let mut table = self.table.inner.write().await;
        match table.remove(&network_id) {
            Some(nw) => info!(
                "Removed network {} with {} endpoints",
                nw,
                nw.endpoints.len()
            ),
            None => debug!("Destroy for unknown network {}, ignoring", network_id),
        }
        Ok(())
    }

    async fn handle_connect(
        &self,
        network_id: String,
        container_id: String,
    ) -> Result<(), TrackerError> {
        require("connect", "id", &network_id)?;
        require("connect", "container", &container_id)?;

        // Cheap early exit before the inspection round-trip.
        if !self.table.inner.read().await.contains_key(&network_id) {
            return Err(TrackerError::UnknownNetwork(network_id));
        }

        // Event payloads don't carry addresses, ask the runtime. This must
        // happen outside the write lock.
        let endpoint = self
            .inspector
            .inspect_endpoint(&container_id, &network_id)
            .await?;

        let mut table = self.table.inner.write().await;
        let nw = table
            .get_mut(&network_id)
            .ok_or_else(|| TrackerError::UnknownNetwork(network_id.clone()))?;
        if nw.endpoints.contains_key(&container_id) {
            return Err(TrackerError::DuplicateEndpoint {
                container: container_id,
                network: network_id,
            });
        }
        info!("Container connected to network {}: {}", nw, endpoint);
        nw.endpoints.insert(container_id, endpoint);
        Ok(())
    }

    async fn handle_disconnect(
        &self,
        network_id: String,
        container_id: String,
    ) -> Result<(), TrackerError> {
        require("disconnect", "id", &network_id)?;
        require("disconnect", "container", &container_id)?;

        let mut table = self.table.inner.write().await;
        let nw = table
            .get_mut(&network_id)
            .ok_or_else(|| TrackerError::UnknownNetwork(network_id.clone()))?;
        match nw.endpoints.remove(&container_id) {
            Some(endpoint) => {
                info!("Container disconnected from network {}: {}", nw, endpoint);
                Ok(())
            }
            None => Err(TrackerError::UnknownEndpoint {
                container: container_id,
                network: network_id,
            }),
        }
    }
}

fn require(
    action: &'static str,
    attribute: &'static str,
    value: &str,
) -> Result<(), TrackerError> {
    if value.is_empty() {
        return Err(TrackerError::MissingAttribute { action, attribute });
    }
    Ok(())
}
