//! DingTalk custom robot channel.
//!
//! Posts to the robot send endpoint with the robot's access token. When the
//! robot has a signing secret, every request carries a millisecond timestamp
//! and an HMAC-SHA256 signature in the query string.

use crate::dispatcher::{
    config_check_failed, finish, validate_ins, Dispatcher, TYPE_CONVERSION_FAILED,
};
use crate::reply::{check_errcode, read_body, send_error};
use crate::transport::{select_transport, Transport};
use crate::validate::InsValidator;
use async_trait::async_trait;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use relay_types::capability::{ChannelCapability, ChannelKind};
use relay_types::config::{ChannelAuth, DingTalkAuth, InsConfig, SendTaskIns, TransportConfig};
use relay_types::error::{RelayError, RelayResult};
use relay_types::message::{DeliveryResult, FormatKind, Target, UnifiedMessageContent};
use serde::Serialize;
use sha2::Sha256;
use std::sync::Arc;
use tracing::debug;
use zeroize::Zeroizing;

const DINGTALK_API_BASE: &str = "https://oapi.dingtalk.com";

/// Markdown title shown in notifications when the message has none.
const DEFAULT_MARKDOWN_TITLE: &str = "Notification";

/// Longest title derived from a markdown body.
const MAX_DERIVED_TITLE_CHARS: usize = 64;

/// Who a robot message mentions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mentions {
    pub at_all: bool,
    pub user_ids: Vec<String>,
    pub mobiles: Vec<String>,
}

impl Mentions {
    /// Mentions for a resolved target; `default_mobiles` backs the
    /// channel-default tier.
    pub fn from_target(target: Target, default_mobiles: &[String]) -> Self {
        match target {
            Target::Everyone => Self {
                at_all: true,
                ..Self::default()
            },
            Target::Users(user_ids) => Self {
                user_ids,
                ..Self::default()
            },
            Target::Default(_) => Self {
                mobiles: default_mobiles.to_vec(),
                ..Self::default()
            },
        }
    }

    /// `@` markers DingTalk needs inside markdown text to highlight mentions.
    fn markers(&self) -> String {
        if self.at_all {
            return "@all".to_string();
        }
        self.user_ids
            .iter()
            .chain(self.mobiles.iter())
            .map(|id| format!("@{id}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn as_at(&self) -> At<'_> {
        At {
            is_at_all: self.at_all,
            at_user_ids: &self.user_ids,
            at_mobiles: &self.mobiles,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct At<'a> {
    is_at_all: bool,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    at_user_ids: &'a [String],
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    at_mobiles: &'a [String],
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct Markdown<'a> {
    title: &'a str,
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Link<'a> {
    title: &'a str,
    text: &'a str,
    message_url: &'a str,
    pic_url: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(tag = "msgtype", rename_all = "lowercase")]
enum MessageBody<'a> {
    Text { text: Content<'a>, at: At<'a> },
    Markdown { markdown: Markdown<'a>, at: At<'a> },
    Link { link: Link<'a> },
}

/// Client for one DingTalk robot.
pub struct DingTalkClient {
    /// SECURITY: robot access token, zeroized on drop.
    access_token: Zeroizing<String>,
    /// SECURITY: signing secret, zeroized on drop.
    secret: Zeroizing<String>,
    proxy_url: String,
    api_base: String,
    transport: TransportConfig,
}

impl DingTalkClient {
    pub fn new(auth: &DingTalkAuth) -> Self {
        Self {
            access_token: Zeroizing::new(auth.access_token.clone()),
            secret: Zeroizing::new(auth.secret.clone()),
            proxy_url: auth.proxy_url.clone(),
            api_base: DINGTALK_API_BASE.to_string(),
            transport: TransportConfig::default(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    pub async fn send_text(&self, content: &str, mentions: &Mentions) -> RelayResult<String> {
        self.send(MessageBody::Text {
            text: Content { content },
            at: mentions.as_at(),
        })
        .await
    }

    /// Send markdown; mention markers are appended so DingTalk highlights them.
    pub async fn send_markdown(
        &self,
        title: &str,
        text: &str,
        mentions: &Mentions,
    ) -> RelayResult<String> {
        let markers = mentions.markers();
        let text = if markers.is_empty() {
            text.to_string()
        } else {
            format!("{text}\n\n{markers}")
        };
        self.send(MessageBody::Markdown {
            markdown: Markdown {
                title,
                text: &text,
            },
            at: mentions.as_at(),
        })
        .await
    }

    /// Send a link card.
    pub async fn send_link(&self, title: &str, text: &str, url: &str) -> RelayResult<String> {
        self.send(MessageBody::Link {
            link: Link {
                title,
                text,
                message_url: url,
                pic_url: "",
            },
        })
        .await
    }

    /// DingTalk signature: `Base64(HMAC-SHA256(secret, "{timestamp}\n{secret}"))`.
    fn compute_signature(secret: &str, timestamp: i64) -> RelayResult<String> {
        let string_to_sign = format!("{timestamp}\n{secret}");
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .map_err(|e| RelayError::Auth(format!("invalid dingtalk secret: {e}")))?;
        mac.update(string_to_sign.as_bytes());
        Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
    }

    /// Query parameters for the send URL.
    fn query(&self, timestamp: i64) -> RelayResult<Vec<(&'static str, String)>> {
        let mut query = vec![("access_token", self.access_token.as_str().to_string())];
        if !self.secret.is_empty() {
            query.push(("timestamp", timestamp.to_string()));
            query.push(("sign", Self::compute_signature(&self.secret, timestamp)?));
        }
        Ok(query)
    }

    async fn send(&self, body: MessageBody<'_>) -> RelayResult<String> {
        if self.access_token.trim().is_empty() {
            return Err(RelayError::Validation(
                "dingtalk access_token must not be empty".to_string(),
            ));
        }
        let query = self.query(Utc::now().timestamp_millis())?;

        let Transport { client, route } = select_transport(&self.proxy_url, &self.transport);
        debug!(?route, "Sending DingTalk robot message");
        let resp = client
            .post(format!("{}/robot/send", self.api_base))
            .query(&query)
            .json(&body)
            .send()
            .await
            .map_err(send_error)?;

        let body = read_body(resp).await?;
        check_errcode("dingtalk", body)
    }
}

/// First non-empty line of a markdown body, without heading markers.
fn derive_title(markdown: &str) -> String {
    markdown
        .lines()
        .map(|l| l.trim_start_matches('#').trim())
        .find(|l| !l.is_empty())
        .map(|l| l.chars().take(MAX_DERIVED_TITLE_CHARS).collect())
        .unwrap_or_else(|| DEFAULT_MARKDOWN_TITLE.to_string())
}

/// Dispatcher for DingTalk robots.
pub struct DingTalkChannel {
    capability: ChannelCapability,
    validator: Arc<dyn InsValidator>,
    transport: TransportConfig,
    api_base: String,
}

impl DingTalkChannel {
    pub fn new(validator: Arc<dyn InsValidator>) -> Self {
        Self {
            capability: ChannelCapability::new(
                ChannelKind::DingTalk,
                vec![FormatKind::Markdown, FormatKind::Text],
            ),
            validator,
            transport: TransportConfig::default(),
            api_base: DINGTALK_API_BASE.to_string(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }
}

#[async_trait]
impl Dispatcher for DingTalkChannel {
    fn capability(&self) -> &ChannelCapability {
        &self.capability
    }

    async fn send_unified(
        &self,
        auth: &ChannelAuth,
        ins: &SendTaskIns,
        content: &UnifiedMessageContent,
    ) -> DeliveryResult {
        let ChannelAuth::DingTalk(auth) = auth else {
            return DeliveryResult::failed(TYPE_CONVERSION_FAILED);
        };

        let config = match validate_ins(self.validator.as_ref(), ins) {
            Ok(InsConfig::DingTalk(config)) => config,
            Ok(_) => return config_check_failed(ChannelKind::DingTalk),
            Err(failed) => return failed,
        };

        let (format, rendered) = match content.negotiate(&self.capability) {
            Ok(negotiated) => negotiated,
            Err(e) => return DeliveryResult::failed(e.to_string()),
        };

        let mentions = Mentions::from_target(content.resolve_target(""), &config.at_mobiles);

        let client = DingTalkClient::new(auth)
            .with_api_base(self.api_base.as_str())
            .with_transport(self.transport.clone());

        let outcome = match format {
            FormatKind::Markdown => {
                let title = content
                    .title()
                    .map(str::to_string)
                    .unwrap_or_else(|| derive_title(&rendered));
                client.send_markdown(&title, &rendered, &mentions).await
            }
            FormatKind::Text => match (content.title(), content.url()) {
                (Some(title), Some(url)) => client.send_link(title, &rendered, url).await,
                _ => client.send_text(&rendered, &mentions).await,
            },
            other => return DeliveryResult::failed(format!("unknown content type: {other}")),
        };

        finish(ChannelKind::DingTalk, outcome)
    }
}
