//! Outbound HTTP client selection with optional proxying.
//!
//! Proxying is best effort: a proxy URL that cannot be parsed or turned into
//! a client never fails the send. The call goes out over a direct connection
//! instead.

use relay_types::config::TransportConfig;
use std::time::Duration;
use tracing::{debug, warn};

/// How a transport reaches the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyRoute {
    /// Direct connection.
    Direct,
    /// Through a SOCKS5 proxy.
    Socks5 { host: String },
    /// Through an HTTP(S) forward proxy.
    Http { host: String },
}

/// An HTTP client built for a single channel invocation.
#[derive(Debug, Clone)]
pub struct Transport {
    pub client: reqwest::Client,
    pub route: ProxyRoute,
}

/// Build a client for `proxy_url` (empty for a direct connection).
pub fn select_transport(proxy_url: &str, config: &TransportConfig) -> Transport {
    let proxy_url = proxy_url.trim();
    if proxy_url.is_empty() {
        return direct(config);
    }

    match proxied(proxy_url, config) {
        Ok(transport) => {
            debug!(route = ?transport.route, "Using proxied transport");
            transport
        }
        Err(e) => {
            warn!(error = %e, "Proxy unusable, falling back to direct connection");
            direct(config)
        }
    }
}

fn direct(config: &TransportConfig) -> Transport {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .build()
        .unwrap_or_default();
    Transport {
        client,
        route: ProxyRoute::Direct,
    }
}

fn proxied(proxy_url: &str, config: &TransportConfig) -> Result<Transport, String> {
    let parsed = url::Url::parse(proxy_url).map_err(|e| format!("invalid proxy URL: {e}"))?;
    let host = parsed
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| "proxy URL has no host".to_string())?
        .to_string();

    let builder = reqwest::Client::builder().timeout(Duration::from_secs(config.request_timeout_secs));

    let scheme = parsed.scheme();
    if scheme == "socks5" || scheme == "socks5h" {
        // socks5h: target hostnames are resolved by the proxy, not locally.
        // reqwest takes SOCKS5 username/password from the URL's user-info.
        let (_, rest) = proxy_url
            .split_once("://")
            .ok_or_else(|| "proxy URL has no scheme separator".to_string())?;
        let proxy =
            reqwest::Proxy::all(format!("socks5h://{rest}")).map_err(|e| e.to_string())?;
        let client = builder
            .proxy(proxy)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .tcp_keepalive(Duration::from_secs(config.keepalive_secs))
            .build()
            .map_err(|e| e.to_string())?;
        return Ok(Transport {
            client,
            route: ProxyRoute::Socks5 { host },
        });
    }

    let mut proxy = reqwest::Proxy::all(proxy_url).map_err(|e| e.to_string())?;
    if !parsed.username().is_empty() {
        proxy = proxy.basic_auth(parsed.username(), parsed.password().unwrap_or_default());
    }
    let client = builder
        .proxy(proxy)
        .build()
        .map_err(|e| e.to_string())?;
    Ok(Transport {
        client,
        route: ProxyRoute::Http { host },
    })
}
