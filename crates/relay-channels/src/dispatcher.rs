//! The common `send_unified` contract and the per-kind dispatcher registry.
//!
//! Dispatchers are the boundary where every error collapses into a
//! [`DeliveryResult`]: nothing past this point returns a structured fault.

use crate::credential::CredentialCache;
use crate::dingtalk::DingTalkChannel;
use crate::validate::InsValidator;
use crate::webhook::WebhookChannel;
use crate::wechat_corp::WeChatCorpAccountChannel;
use async_trait::async_trait;
use relay_types::capability::{ChannelCapability, ChannelKind};
use relay_types::config::{ChannelAuth, InsConfig, SendTaskIns, TransportConfig};
use relay_types::error::RelayResult;
use relay_types::message::{DeliveryResult, UnifiedMessageContent};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Returned when the auth object handed to a dispatcher belongs to another
/// channel kind.
pub const TYPE_CONVERSION_FAILED: &str = "type conversion failed";

/// A channel that can deliver a unified message.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Channel kind and accepted formats.
    fn capability(&self) -> &ChannelCapability;

    /// Deliver `content` using `auth` and the task instance `ins`.
    async fn send_unified(
        &self,
        auth: &ChannelAuth,
        ins: &SendTaskIns,
        content: &UnifiedMessageContent,
    ) -> DeliveryResult;
}

/// Run the instance validator, mapping failures to a `DeliveryResult`.
pub(crate) fn validate_ins(
    validator: &dyn InsValidator,
    ins: &SendTaskIns,
) -> Result<InsConfig, DeliveryResult> {
    validator.validate_diff_ins(ins).map_err(|e| {
        if e.is_empty() {
            DeliveryResult::failed(format!("instance {} failed validation", ins.id))
        } else {
            DeliveryResult::failed(e)
        }
    })
}

/// Message used when the validator returns another kind's config.
pub(crate) fn config_check_failed(kind: ChannelKind) -> DeliveryResult {
    DeliveryResult::failed(format!("{kind} config check failed"))
}

/// Collapse a client outcome into a `DeliveryResult`.
pub(crate) fn finish(kind: ChannelKind, outcome: RelayResult<String>) -> DeliveryResult {
    match outcome {
        Ok(body) => DeliveryResult::delivered(body),
        Err(e) => {
            let body = e.response_body().unwrap_or_default().to_string();
            warn!(channel = %kind, error = %e, "Send failed");
            DeliveryResult::failed_with_body(body, format!("send failed: {e}"))
        }
    }
}

/// Lookup table from channel kind to its dispatcher.
pub struct ChannelRegistry {
    dispatchers: HashMap<ChannelKind, Arc<dyn Dispatcher>>,
}

impl ChannelRegistry {
    /// Registry with every built-in channel, sharing one credential cache
    /// and validator.
    pub fn new(
        cache: Arc<CredentialCache>,
        validator: Arc<dyn InsValidator>,
        transport: TransportConfig,
    ) -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(
            WeChatCorpAccountChannel::new(Arc::clone(&cache), Arc::clone(&validator))
                .with_transport(transport.clone()),
        ));
        registry.register(Arc::new(
            DingTalkChannel::new(Arc::clone(&validator)).with_transport(transport.clone()),
        ));
        registry.register(Arc::new(
            WebhookChannel::new(validator).with_transport(transport),
        ));
        registry
    }

    /// Registry with no channels.
    pub fn empty() -> Self {
        Self {
            dispatchers: HashMap::new(),
        }
    }

    /// Add or replace the dispatcher for its declared kind.
    pub fn register(&mut self, dispatcher: Arc<dyn Dispatcher>) {
        let kind = dispatcher.capability().kind();
        self.dispatchers.insert(kind, dispatcher);
    }

    pub fn get(&self, kind: ChannelKind) -> Option<Arc<dyn Dispatcher>> {
        self.dispatchers.get(&kind).cloned()
    }

    /// Capabilities of all registered channels, ordered by kind.
    pub fn capabilities(&self) -> Vec<ChannelCapability> {
        let mut caps: Vec<ChannelCapability> = self
            .dispatchers
            .values()
            .map(|d| d.capability().clone())
            .collect();
        caps.sort_by_key(|c| c.kind());
        caps
    }

    /// Route a send to the dispatcher for `auth`'s kind.
    pub async fn dispatch(
        &self,
        auth: &ChannelAuth,
        ins: &SendTaskIns,
        content: &UnifiedMessageContent,
    ) -> DeliveryResult {
        let kind = auth.kind();
        let Some(dispatcher) = self.get(kind) else {
            return DeliveryResult::failed(format!("unsupported channel: {kind}"));
        };

        info!(channel = %kind, ins = %ins.id, "Dispatching unified message");
        let result = dispatcher.send_unified(auth, ins, content).await;
        if result.is_success() {
            info!(channel = %kind, ins = %ins.id, "Message delivered");
        }
        result
    }
}
