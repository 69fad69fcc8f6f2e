use anyhow::{bail, Result};

/// Host and port of the broker, resolved from `MQTT_CLUSTER_URL`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    /// Scheme asked for TLS explicitly (`mqtts://`, `ssl://`)
    pub tls_hint: Option<bool>,
}

impl BrokerEndpoint {
    /// Accepts `host`, `host:port`, and `scheme://host[:port][/]`
    pub fn parse(url: &str, default_port: u16) -> Result<Self> {
        let url = url.trim();
        let (tls_hint, rest) = match url.split_once("://") {
            Some((scheme, rest)) => {
                let hint = match scheme.to_ascii_lowercase().as_str() {
                    "mqtt" | "tcp" => false,
                    "mqtts" | "ssl" | "tls" => true,
                    other => bail!("unsupported broker scheme '{}'", other),
                };
                (Some(hint), rest)
            }
            None => (None, url),
        };

        let authority = rest.split('/').next().unwrap_or_default();
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => match port.parse::<u16>() {
                Ok(port) => (host, port),
                Err(_) => bail!("invalid broker port '{}'", port),
            },
            None => (authority, default_port),
        };

        if host.is_empty() {
            bail!("broker url '{}' has no host", url);
        }

        Ok(Self {
            host: host.to_string(),
            port,
            tls_hint,
        })
    }
}
