//! Generic outbound HTTP webhook channel.
//!
//! Messages are POSTed as JSON to the configured URL. When a secret is set,
//! each request carries `X-Webhook-Signature: sha256=<hex-digest>` where the
//! digest is `HMAC-SHA256(secret, body)`.
//!
//! Payload:
//! ```json
//! {
//!   "format": "markdown",
//!   "title": "optional title",
//!   "body": "message body",
//!   "url": "optional link",
//!   "at_all": false,
//!   "at_users": ["u1"]
//! }
//! ```

use crate::dispatcher::{
    config_check_failed, finish, validate_ins, Dispatcher, TYPE_CONVERSION_FAILED,
};
use crate::reply::{read_body, send_error};
use crate::transport::{select_transport, Transport};
use crate::validate::InsValidator;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use relay_types::capability::{ChannelCapability, ChannelKind};
use relay_types::config::{ChannelAuth, InsConfig, SendTaskIns, TransportConfig, WebhookAuth};
use relay_types::error::{RelayError, RelayResult};
use relay_types::message::{DeliveryResult, FormatKind, Target, UnifiedMessageContent};
use serde::Serialize;
use sha2::Sha256;
use std::sync::Arc;
use tracing::debug;
use zeroize::Zeroizing;

/// Header carrying the request signature.
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

/// JSON body posted to the webhook.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload<'a> {
    pub format: FormatKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<&'a str>,
    pub body: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<&'a str>,
    pub at_all: bool,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    pub at_users: &'a [String],
}

/// Client for one webhook endpoint.
pub struct WebhookClient {
    url: String,
    /// SECURITY: shared secret for HMAC-SHA256 signatures (zeroized on drop).
    secret: Zeroizing<String>,
    proxy_url: String,
    transport: TransportConfig,
}

impl WebhookClient {
    pub fn new(auth: &WebhookAuth) -> Self {
        Self {
            url: auth.url.clone(),
            secret: Zeroizing::new(auth.secret.clone()),
            proxy_url: auth.proxy_url.clone(),
            transport: TransportConfig::default(),
        }
    }

    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    /// Compute the `sha256=<hex>` signature of `data`.
    fn compute_signature(secret: &str, data: &[u8]) -> RelayResult<String> {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .map_err(|e| RelayError::Auth(format!("invalid webhook secret: {e}")))?;
        mac.update(data);
        Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
    }

    /// POST `payload`; any 2xx response body is returned verbatim.
    pub async fn send(&self, payload: &WebhookPayload<'_>) -> RelayResult<String> {
        let target = url::Url::parse(&self.url)
            .map_err(|e| RelayError::Validation(format!("invalid webhook url {:?}: {e}", self.url)))?;
        if !matches!(target.scheme(), "http" | "https") {
            return Err(RelayError::Validation(format!(
                "webhook url must be http(s), got {}",
                target.scheme()
            )));
        }

        let body = serde_json::to_vec(payload)
            .map_err(|e| RelayError::Validation(format!("failed to encode payload: {e}")))?;

        let Transport { client, route } = select_transport(&self.proxy_url, &self.transport);
        debug!(?route, host = target.host_str().unwrap_or(""), "Posting webhook");
        let mut req = client
            .post(target)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if !self.secret.is_empty() {
            req = req.header(SIGNATURE_HEADER, Self::compute_signature(&self.secret, &body)?);
        }

        let resp = req.body(body).send().await.map_err(send_error)?;
        read_body(resp).await
    }
}

/// Dispatcher for generic webhooks.
pub struct WebhookChannel {
    capability: ChannelCapability,
    validator: Arc<dyn InsValidator>,
    transport: TransportConfig,
}

impl WebhookChannel {
    pub fn new(validator: Arc<dyn InsValidator>) -> Self {
        Self {
            capability: ChannelCapability::new(
                ChannelKind::Webhook,
                vec![FormatKind::Markdown, FormatKind::Text, FormatKind::Html],
            ),
            validator,
            transport: TransportConfig::default(),
        }
    }

    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }
}

#[async_trait]
impl Dispatcher for WebhookChannel {
    fn capability(&self) -> &ChannelCapability {
        &self.capability
    }

    async fn send_unified(
        &self,
        auth: &ChannelAuth,
        ins: &SendTaskIns,
        content: &UnifiedMessageContent,
    ) -> DeliveryResult {
        let ChannelAuth::Webhook(auth) = auth else {
            return DeliveryResult::failed(TYPE_CONVERSION_FAILED);
        };

        match validate_ins(self.validator.as_ref(), ins) {
            Ok(InsConfig::Webhook(_)) => {}
            Ok(_) => return config_check_failed(ChannelKind::Webhook),
            Err(failed) => return failed,
        }

        let (format, rendered) = match content.negotiate(&self.capability) {
            Ok(negotiated) => negotiated,
            Err(e) => return DeliveryResult::failed(e.to_string()),
        };

        let (at_all, at_users) = match content.resolve_target("") {
            Target::Everyone => (true, Vec::new()),
            Target::Users(ids) => (false, ids),
            Target::Default(_) => (false, Vec::new()),
        };

        let payload = WebhookPayload {
            format,
            title: content.title(),
            body: &rendered,
            url: content.url(),
            at_all,
            at_users: &at_users,
        };

        let client = WebhookClient::new(auth).with_transport(self.transport.clone());
        finish(ChannelKind::Webhook, client.send(&payload).await)
    }
}
