pub mod channels;
pub mod send;

use anyhow::Context;
use relay_types::config::RelayConfig;
use std::path::Path;

/// Load the relay configuration, naming the file on failure.
pub(crate) fn load_config(path: &Path) -> anyhow::Result<RelayConfig> {
    RelayConfig::load(path)
        .with_context(|| format!("failed to load config from {}", path.display()))
}
