//! `relay channels`: list configured ways.

use relay_channels::credential::CredentialCache;
use relay_channels::dispatcher::ChannelRegistry;
use relay_channels::transport::{select_transport, ProxyRoute};
use relay_channels::validate::ConfigInsValidator;
use relay_types::config::RelayConfig;
use std::path::Path;
use std::sync::Arc;

pub fn run(config_path: &Path) -> anyhow::Result<i32> {
    let config = super::load_config(config_path)?;
    let rows = rows(&config);
    if rows.is_empty() {
        println!("No channels configured in {}", config_path.display());
        return Ok(0);
    }

    let width = |col: usize, min: usize| rows.iter().map(|r| r[col].len()).max().unwrap_or(0).max(min);
    let (id_w, name_w, kind_w, fmt_w) = (width(0, 2), width(1, 4), width(2, 4), width(3, 7));
    println!(
        "{:id_w$}  {:name_w$}  {:kind_w$}  {:fmt_w$}  ROUTE",
        "ID", "NAME", "KIND", "FORMATS"
    );
    for [id, name, kind, formats, route] in rows {
        println!("{id:id_w$}  {name:name_w$}  {kind:kind_w$}  {formats:fmt_w$}  {route}");
    }
    Ok(0)
}

/// One `[id, name, kind, formats, route]` row per configured way.
fn rows(config: &RelayConfig) -> Vec<[String; 5]> {
    let registry = ChannelRegistry::new(
        Arc::new(CredentialCache::new()),
        Arc::new(ConfigInsValidator),
        config.transport.clone(),
    );

    config
        .ways
        .iter()
        .map(|way| {
            let kind = way.auth.kind();
            let formats = registry
                .get(kind)
                .map(|d| {
                    d.capability()
                        .formats()
                        .iter()
                        .map(|f| f.as_str())
                        .collect::<Vec<_>>()
                        .join(",")
                })
                .unwrap_or_else(|| "-".to_string());
            let route = match select_transport(way.auth.proxy_url(), &config.transport).route {
                ProxyRoute::Direct => "direct".to_string(),
                ProxyRoute::Socks5 { host } => format!("socks5 {host}"),
                ProxyRoute::Http { host } => format!("http {host}"),
            };
            let name = way.name.clone().unwrap_or_else(|| "-".to_string());
            [way.id.clone(), name, kind.to_string(), formats, route]
        })
        .collect()
}
