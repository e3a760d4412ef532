use crate::error::TrackerError;
use crate::types::{ContainerListing, Endpoint, NetworkEvent, NetworkListing};
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

pub mod docker;
pub use docker::DockerRuntime;

/// Point lookups against the container runtime.
#[async_trait]
pub trait ContainerInspector: Send + Sync {
    /// Resolve a container's current name and its addresses on one network.
    /// Fails if the container is unknown or not attached to `network_id`.
    async fn inspect_endpoint(
        &self,
        container_id: &str,
        network_id: &str,
    ) -> Result<Endpoint, TrackerError>;
}

#[async_trait]
pub trait ContainerRuntime: ContainerInspector {
    /// List every network and running container currently known.
    async fn snapshot(&self) -> Result<(Vec<NetworkListing>, Vec<ContainerListing>)>;

    /// Start consuming network lifecycle events.
    fn subscribe(&self) -> EventSource;
}

/// Receiving half of the event feed: decoded events plus an out-of-band
/// error channel. Anything arriving on `errors` means the feed is dead.
pub struct EventSource {
    pub events: mpsc::Receiver<NetworkEvent>,
    pub errors: mpsc::Receiver<anyhow::Error>,
}
