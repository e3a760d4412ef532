use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub dns_bind: SocketAddr,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_ip: Option<String>,
    /// Zone the server answers for, `rt` means names like `web.rt.`.
    pub zone: String,
    pub status_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dns_bind: SocketAddr::from(([0, 0, 0, 0], 53)),
            bind_ip: None,
            zone: "rt".into(),
            status_interval_secs: 60,
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::from_figment(
            Figment::from(Serialized::defaults(Config::default()))
                .merge(Toml::file("container-dns.toml"))
                .merge(Json::file("container-dns.json"))
                .merge(Env::prefixed("CONTAINER_DNS_")),
        )
    }

    fn from_figment(figment: Figment) -> anyhow::Result<Self> {
        let mut config: Config = figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        // If bind_ip is set, override the IP part of dns_bind
        if let Some(ref ip) = config.bind_ip {
            let port = config.dns_bind.port();
            config.dns_bind = format!("{}:{}", ip, port)
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid bind_ip: {}", e))?;
        }

        config.zone = config.zone.trim_matches('.').to_string();
        if config.zone.is_empty() {
            anyhow::bail!("zone must not be empty");
        }
        if config.status_interval_secs == 0 {
            anyhow::bail!("status_interval_secs must be greater than zero");
        }

        Ok(config)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs)
    }
}
