use super::{ContainerInspector, ContainerRuntime, EventSource};
use crate::error::TrackerError;
use crate::types::{
    normalize_container_name, parse_address, Attachment, ContainerListing, Endpoint,
    NetworkEvent, NetworkListing,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bollard::container::ListContainersOptions;
use bollard::models::{ContainerSummary, EndpointSettings, EventMessage};
use bollard::network::ListNetworksOptions;
use bollard::system::EventsOptions;
use bollard::Docker;
use futures_util::stream::StreamExt;
use log::{debug, info, warn};
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Buffered events between the Docker stream and the dispatch loop.
const EVENT_CHANNEL_CAPACITY: usize = 128;

/// Network actions the daemon subscribes to.
const NETWORK_ACTIONS: [&str; 4] = ["create", "destroy", "connect", "disconnect"];

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect to the local Docker daemon and make sure it answers.
    pub async fn connect() -> Result<Self> {
        // Handles the unix socket on Linux and honours DOCKER_HOST.
        let docker = Docker::connect_with_local_defaults()?;
        docker
            .ping()
            .await
            .map_err(|e| anyhow!("Docker daemon is not reachable: {}", e))?;
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerInspector for DockerRuntime {
    async fn inspect_endpoint(
        &self,
        container_id: &str,
        network_id: &str,
    ) -> Result<Endpoint, TrackerError> {
        let detail = self
            .docker
            .inspect_container(container_id, None)
            .await
            .map_err(|e| TrackerError::Inspect {
                container: container_id.to_string(),
                reason: e.to_string(),
            })?;

        let settings = detail
            .network_settings
            .and_then(|s| s.networks)
            .and_then(|networks| {
                networks
                    .into_values()
                    .find(|ep| ep.network_id.as_deref() == Some(network_id))
            })
            .ok_or_else(|| TrackerError::NotAttached {
                container: container_id.to_string(),
                network: network_id.to_string(),
            })?;

        let container_name =
            normalize_container_name(detail.name.as_deref().unwrap_or_default())?;
        Ok(Endpoint {
            container_id: container_id.to_string(),
            container_name,
            ipv4_address: parse_address(settings.ip_address.as_deref()),
            ipv6_address: parse_address(settings.global_ipv6_address.as_deref()),
        })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn snapshot(&self) -> Result<(Vec<NetworkListing>, Vec<ContainerListing>)> {
        let networks = self
            .docker
            .list_networks(None::<ListNetworksOptions<String>>)
            .await?
            .into_iter()
            .filter_map(|n| {
                Some(NetworkListing {
                    id: n.id?,
                    name: n.name.unwrap_or_default(),
                })
            })
            .collect();

        let opts = ListContainersOptions::<String> {
            all: false,
            ..Default::default()
        };
        let containers = self
            .docker
            .list_containers(Some(opts))
            .await?
            .into_iter()
            .filter_map(container_listing)
            .collect();

        Ok((networks, containers))
    }

    fn subscribe(&self) -> EventSource {
        let (event_tx, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (error_tx, errors) = mpsc::channel(1);

        let opts = EventsOptions::<String> {
            filters: HashMap::from([
                ("type".to_string(), vec!["network".to_string()]),
                (
                    "event".to_string(),
                    NETWORK_ACTIONS.iter().map(|s| s.to_string()).collect(),
                ),
            ]),
            ..Default::default()
        };
        let docker = self.docker.clone();

        tokio::spawn(async move {
            let mut stream = docker.events(Some(opts));
            info!("Listening for Docker network events...");
            let failure = loop {
                match stream.next().await {
                    Some(Ok(message)) => {
                        let event = decode_event(message);
                        debug!("Network event: {:?}", event);
                        if event_tx.send(event).await.is_err() {
                            // Dispatch loop is gone, nobody left to tell.
                            return;
                        }
                    }
                    Some(Err(e)) => break anyhow!("Docker event stream failed: {}", e),
                    None => break anyhow!("Docker event stream ended"),
                }
            };
            if error_tx.send(failure).await.is_err() {
                warn!("Event stream failed after the dispatch loop stopped");
            }
        });

        EventSource { events, errors }
    }
}

/// Turns a Docker event into a [`NetworkEvent`].
fn decode_event(message: EventMessage) -> NetworkEvent {
    let action = message.action.unwrap_or_default();
    let actor = message.actor.unwrap_or_default();
    let actor_id = actor.id.unwrap_or_default();
    let attributes = actor.attributes.unwrap_or_default();
    NetworkEvent::decode(&action, &actor_id, |key| {
        attributes.get(key).map(String::as_str)
    })
}

fn container_listing(summary: ContainerSummary) -> Option<ContainerListing> {
    let id = summary.id?;
    let name = summary
        .names
        .and_then(|names| names.into_iter().next())
        .unwrap_or_default();
    let attachments = summary
        .network_settings
        .and_then(|s| s.networks)
        .unwrap_or_default()
        .into_values()
        .filter_map(attachment)
        .collect();
    Some(ContainerListing {
        id,
        name,
        attachments,
    })
}

fn attachment(settings: EndpointSettings) -> Option<Attachment> {
    Some(Attachment {
        ipv4_address: parse_address(settings.ip_address.as_deref()),
        ipv6_address: parse_address(settings.global_ipv6_address.as_deref()),
        network_id: settings.network_id.filter(|id| !id.is_empty())?,
    })
}
