//! Data structures used throughout the daemon.
//!
//! The address table is made of [`Network`]s, each owning the
//! [`Endpoint`]s of the containers attached to it.  Snapshot listings and
//! [`NetworkEvent`]s are the runtime-neutral shapes the container runtime
//! backend translates its API objects into before they reach the tracker.

use std::collections::BTreeMap;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use crate::error::TrackerError;

/// Width used when abbreviating IDs in diagnostics.
const SHORT_ID_LEN: usize = 12;

/// One container's attachment to one network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub container_id: String,
    /// Lookup key for DNS queries, without the API's leading '/'.
    pub container_name: String,
    pub ipv4_address: Option<Ipv4Addr>,
    pub ipv6_address: Option<Ipv6Addr>,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "id:{} name:{}",
            short_id(&self.container_id),
            self.container_name
        )?;
        if let Some(ipv4) = self.ipv4_address {
            write!(f, " {}", ipv4)?;
        }
        if let Some(ipv6) = self.ipv6_address {
            write!(f, " {}", ipv6)?;
        }
        Ok(())
    }
}

/// A named address-translation domain and the endpoints attached to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Network {
    pub id: String,
    /// Advisory, only used in diagnostics.
    pub name: String,
    /// containerID -> Endpoint
    pub endpoints: BTreeMap<String, Endpoint>,
}

impl Network {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            endpoints: BTreeMap::new(),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "id:{} name:{}", short_id(&self.id), self.name)
    }
}

/// A network as reported by the bulk snapshot.
#[derive(Debug, Clone)]
pub struct NetworkListing {
    pub id: String,
    pub name: String,
}

/// A container as reported by the bulk snapshot.
#[derive(Debug, Clone)]
pub struct ContainerListing {
    pub id: String,
    /// Raw name as the API reports it, e.g. `/web`.
    pub name: String,
    pub attachments: Vec<Attachment>,
}

/// A container's recorded addresses on one network.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub network_id: String,
    pub ipv4_address: Option<Ipv4Addr>,
    pub ipv6_address: Option<Ipv6Addr>,
}

/// A network lifecycle event, decoded once at the event source boundary.
///
/// Identifiers are passed through as received; an empty string means the
/// attribute was absent and is rejected by the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    Create { network_id: String, name: String },
    Destroy { network_id: String },
    Connect { network_id: String, container_id: String },
    Disconnect { network_id: String, container_id: String },
    Unknown { action: String },
}

impl NetworkEvent {
    /// Builds an event from the actor ID, action label and attribute lookup
    /// the event feed provides.
    pub fn decode<'a>(
        action: &str,
        actor_id: &str,
        attribute: impl Fn(&str) -> Option<&'a str>,
    ) -> Self {
        let network_id = actor_id.to_string();
        let attr = |key: &str| attribute(key).unwrap_or_default().to_string();
        match action {
            "create" => NetworkEvent::Create {
                network_id,
                name: attr("name"),
            },
            "destroy" => NetworkEvent::Destroy { network_id },
            "connect" => NetworkEvent::Connect {
                network_id,
                container_id: attr("container"),
            },
            "disconnect" => NetworkEvent::Disconnect {
                network_id,
                container_id: attr("container"),
            },
            other => NetworkEvent::Unknown {
                action: other.to_string(),
            },
        }
    }

    pub fn action(&self) -> &str {
        match self {
            NetworkEvent::Create { .. } => "create",
            NetworkEvent::Destroy { .. } => "destroy",
            NetworkEvent::Connect { .. } => "connect",
            NetworkEvent::Disconnect { .. } => "disconnect",
            NetworkEvent::Unknown { action } => action.as_str(),
        }
    }
}

/// Strips the leading '/' the container API puts in front of names.
pub fn normalize_container_name(raw: &str) -> Result<String, TrackerError> {
    match raw.strip_prefix('/') {
        Some(name) if !name.is_empty() => Ok(name.to_string()),
        _ => Err(TrackerError::InvalidContainerName(raw.to_string())),
    }
}

/// Parses an address string from the API. Empty or invalid strings mean
/// the address family is not configured.
pub fn parse_address<T: FromStr>(raw: Option<&str>) -> Option<T> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse().ok())
}

pub fn short_id(id: &str) -> &str {
    id.get(..SHORT_ID_LEN).unwrap_or(id)
}
