//! `relay send`: deliver one message through a configured instance.

use crate::cli::SendArgs;
use anyhow::Context;
use relay_channels::credential::CredentialCache;
use relay_channels::dispatcher::ChannelRegistry;
use relay_channels::validate::ConfigInsValidator;
use relay_types::message::UnifiedMessageContent;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

pub fn run(config_path: &Path, args: SendArgs) -> anyhow::Result<i32> {
    let config = super::load_config(config_path)?;
    debug!(
        path = %config_path.display(),
        ways = config.ways.len(),
        instances = config.instances.len(),
        "Loaded relay config"
    );
    let ins = config
        .instance(&args.instance)
        .with_context(|| format!("unknown instance: {}", args.instance))?;
    let way = config
        .way(&ins.way_id)
        .with_context(|| format!("instance {} references unknown way {}", ins.id, ins.way_id))?;

    let content = build_content(&args);
    let registry = ChannelRegistry::new(
        Arc::new(CredentialCache::new()),
        Arc::new(ConfigInsValidator),
        config.transport.clone(),
    );

    let rt = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    info!(instance = %ins.id, way = %way.id, channel = %way.auth.kind(), "Sending message");
    let result = rt.block_on(registry.dispatch(&way.auth, ins, &content));
    debug!(success = result.is_success(), "Dispatch finished");

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else if result.is_success() {
        println!("{}", result.response_body);
    } else {
        eprintln!("{}", result.error_message);
        if !result.response_body.is_empty() {
            eprintln!("response: {}", result.response_body);
        }
    }

    Ok(if result.is_success() { 0 } else { 1 })
}

fn build_content(args: &SendArgs) -> UnifiedMessageContent {
    let mut content = UnifiedMessageContent::new(args.body.clone(), args.format)
        .with_mention_all(args.at_all)
        .with_mentions(args.at.iter().cloned());
    if let Some(title) = &args.title {
        content = content.with_title(title.clone());
    }
    if let Some(url) = &args.url {
        content = content.with_url(url.clone());
    }
    content
}
