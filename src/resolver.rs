//! Maps a DNS question onto the address table.
//!
//! Only names under the managed zone are answered (`web.rt.` looks up the
//! container named `web`).  Every unanswerable case, whether it is out of
//! zone, unknown, or asks for a missing address family, comes back as
//! `None`.

use hickory_server::proto::rr::rdata::{A, AAAA};
use hickory_server::proto::rr::{RData, RecordType};
use log::debug;

use crate::state::AddressTable;

#[derive(Debug, Clone)]
pub struct Resolver {
    table: AddressTable,
    /// Trailing part every managed name must end with, e.g. `.rt.`.
    suffix: String,
}

impl Resolver {
    /// `zone` is given without surrounding dots, e.g. `rt`.
    pub fn new(table: AddressTable, zone: &str) -> Self {
        Self {
            table,
            suffix: format!(".{}.", zone.trim_matches('.')).to_ascii_lowercase(),
        }
    }

    /// Container label in front of the zone suffix, compared ignoring ASCII
    /// case. The label must be non-empty.
    fn strip_zone<'a>(&self, name: &'a str) -> Option<&'a str> {
        let split = name.len().checked_sub(self.suffix.len())?;
        let (label, tail) = (name.get(..split)?, name.get(split..)?);
        (!label.is_empty() && tail.eq_ignore_ascii_case(&self.suffix)).then_some(label)
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Resolve a fully qualified question name to at most one record.
    pub async fn resolve(&self, name: &str, query_type: RecordType) -> Option<RData> {
        let Some(container_name) = self.strip_zone(name) else {
            debug!("{} is outside {}", name, self.suffix);
            return None;
        };

        let endpoint = self.table.query_endpoint(container_name).await?;
        debug!("Matched {}: {}", container_name, endpoint);

        match query_type {
            RecordType::A => endpoint.ipv4_address.map(|ip| RData::A(A(ip))),
            RecordType::AAAA => endpoint.ipv6_address.map(|ip| RData::AAAA(AAAA(ip))),
            _ => None,
        }
    }
}
