//! WeChat Work (enterprise WeChat) application channel.
//!
//! Messages are sent through the application message API. Authentication uses
//! an access token obtained from `/cgi-bin/gettoken` with the corp ID and the
//! application secret; tokens are shared through the [`CredentialCache`]
//! (provider TTL is 2 hours).

use crate::credential::{CredentialCache, IssuedToken, TokenIssuer};
use crate::dispatcher::{
    config_check_failed, finish, validate_ins, Dispatcher, TYPE_CONVERSION_FAILED,
};
use crate::reply::{check_errcode, read_body, send_error};
use crate::transport::{select_transport, Transport};
use crate::validate::InsValidator;
use async_trait::async_trait;
use relay_types::capability::{ChannelCapability, ChannelKind};
use relay_types::config::{
    ChannelAuth, InsConfig, SendTaskIns, TransportConfig, WeChatCorpAccountAuth,
};
use relay_types::error::{RelayError, RelayResult};
use relay_types::message::{DeliveryResult, FormatKind, UnifiedMessageContent};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use zeroize::Zeroizing;

/// Production API host.
const WECOM_API_BASE: &str = "https://qyapi.weixin.qq.com";

/// Recipient sentinel for everyone visible to the application.
const WECOM_TO_ALL: &str = "@all";

/// Separator between user IDs in `touser`.
const WECOM_USER_SEPARATOR: &str = "|";

#[derive(Debug, Deserialize)]
struct TokenReply {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    expires_in: i64,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct TextCard<'a> {
    title: &'a str,
    description: &'a str,
    url: &'a str,
}

/// Message body, discriminated by `msgtype`.
#[derive(Debug, Serialize)]
#[serde(tag = "msgtype", rename_all = "lowercase")]
enum MessageBody<'a> {
    Text { text: Content<'a> },
    Markdown { markdown: Content<'a> },
    Textcard { textcard: TextCard<'a> },
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    touser: &'a str,
    agentid: i64,
    #[serde(flatten)]
    body: MessageBody<'a>,
}

/// Client for one WeChat Work application.
pub struct WeChatCorpAccountClient {
    corp_id: String,
    agent_id: i64,
    /// SECURITY: application secret, zeroized on drop.
    agent_secret: Zeroizing<String>,
    proxy_url: String,
    api_base: String,
    transport: TransportConfig,
    cache: Arc<CredentialCache>,
}

impl WeChatCorpAccountClient {
    /// Create a client for the application described by `auth`.
    pub fn new(auth: &WeChatCorpAccountAuth, cache: Arc<CredentialCache>) -> Self {
        Self {
            corp_id: auth.corp_id.clone(),
            agent_id: auth.agent_id,
            agent_secret: Zeroizing::new(auth.agent_secret.clone()),
            proxy_url: auth.proxy_url.clone(),
            api_base: WECOM_API_BASE.to_string(),
            transport: TransportConfig::default(),
            cache,
        }
    }

    /// Point the client at another API host (tests, private deployments).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    pub async fn send_text(&self, to_user: &str, content: &str) -> RelayResult<String> {
        self.send(SendRequest {
            touser: to_user,
            agentid: self.agent_id,
            body: MessageBody::Text {
                text: Content { content },
            },
        })
        .await
    }

    pub async fn send_markdown(&self, to_user: &str, content: &str) -> RelayResult<String> {
        self.send(SendRequest {
            touser: to_user,
            agentid: self.agent_id,
            body: MessageBody::Markdown {
                markdown: Content { content },
            },
        })
        .await
    }

    /// Send a text card: a title, a short description and a link.
    pub async fn send_text_card(
        &self,
        to_user: &str,
        title: &str,
        description: &str,
        url: &str,
    ) -> RelayResult<String> {
        self.send(SendRequest {
            touser: to_user,
            agentid: self.agent_id,
            body: MessageBody::Textcard {
                textcard: TextCard {
                    title,
                    description,
                    url,
                },
            },
        })
        .await
    }

    async fn send(&self, req: SendRequest<'_>) -> RelayResult<String> {
        if req.touser.trim().is_empty() {
            return Err(RelayError::Validation(
                "wechat_corp_account recipient must not be empty".to_string(),
            ));
        }
        if self.agent_id <= 0 {
            return Err(RelayError::Validation(format!(
                "wechat_corp_account agent_id must be positive, got {}",
                self.agent_id
            )));
        }

        let token = self.cache.get_token(self).await?;

        let Transport { client, route } = self.transport();
        debug!(?route, agent_id = self.agent_id, "Sending WeChat Work message");
        let resp = client
            .post(format!("{}/cgi-bin/message/send", self.api_base))
            .query(&[("access_token", token.as_str())])
            .json(&req)
            .send()
            .await
            .map_err(send_error)?;

        let body = read_body(resp).await?;
        check_errcode("wechat_corp_account", body)
    }

    fn transport(&self) -> Transport {
        select_transport(&self.proxy_url, &self.transport)
    }
}

#[async_trait]
impl TokenIssuer for WeChatCorpAccountClient {
    fn identity(&self) -> Vec<(&'static str, String)> {
        vec![
            ("corp_id", self.corp_id.clone()),
            ("agent_id", self.agent_id.to_string()),
            ("agent_secret", self.agent_secret.as_str().to_string()),
        ]
    }

    async fn issue_token(&self) -> RelayResult<IssuedToken> {
        let Transport { client, .. } = self.transport();
        let resp = client
            .get(format!("{}/cgi-bin/gettoken", self.api_base))
            .query(&[
                ("corpid", self.corp_id.as_str()),
                ("corpsecret", self.agent_secret.as_str()),
            ])
            .send()
            .await
            .map_err(send_error)?;

        let body = read_body(resp).await?;
        let reply: TokenReply = serde_json::from_str(&body).map_err(|e| RelayError::Transport {
            message: format!("malformed wechat_corp_account token response: {e}"),
            body: Some(body.clone()),
        })?;
        if reply.errcode != 0 {
            return Err(RelayError::Auth(format!(
                "access token request rejected: {} (errcode={})",
                reply.errmsg, reply.errcode
            )));
        }
        Ok(IssuedToken {
            token: reply.access_token,
            ttl_secs: reply.expires_in,
        })
    }
}

/// Dispatcher for WeChat Work applications.
pub struct WeChatCorpAccountChannel {
    capability: ChannelCapability,
    cache: Arc<CredentialCache>,
    validator: Arc<dyn InsValidator>,
    transport: TransportConfig,
    api_base: String,
}

impl WeChatCorpAccountChannel {
    pub fn new(cache: Arc<CredentialCache>, validator: Arc<dyn InsValidator>) -> Self {
        Self {
            capability: ChannelCapability::new(
                ChannelKind::WeChatCorpAccount,
                vec![FormatKind::Markdown, FormatKind::Text],
            ),
            cache,
            validator,
            transport: TransportConfig::default(),
            api_base: WECOM_API_BASE.to_string(),
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
impl Dispatcher for WeChatCorpAccountChannel {
    fn capability(&self) -> &ChannelCapability {
        &self.capability
    }

    async fn send_unified(
        &self,
        auth: &ChannelAuth,
        ins: &SendTaskIns,
        content: &UnifiedMessageContent,
    ) -> DeliveryResult {
        let ChannelAuth::WeChatCorpAccount(auth) = auth else {
            return DeliveryResult::failed(TYPE_CONVERSION_FAILED);
        };

        let config = match validate_ins(self.validator.as_ref(), ins) {
            Ok(InsConfig::WeChatCorpAccount(config)) => config,
            Ok(_) => return config_check_failed(ChannelKind::WeChatCorpAccount),
            Err(failed) => return failed,
        };

        let (format, rendered) = match content.negotiate(&self.capability) {
            Ok(negotiated) => negotiated,
            Err(e) => return DeliveryResult::failed(e.to_string()),
        };

        let to_user = content
            .resolve_target(&config.to_account)
            .render(WECOM_TO_ALL, WECOM_USER_SEPARATOR);

        let client = WeChatCorpAccountClient::new(auth, Arc::clone(&self.cache))
            .with_api_base(self.api_base.as_str())
            .with_transport(self.transport.clone());

        let outcome = match format {
            FormatKind::Markdown => client.send_markdown(&to_user, &rendered).await,
            FormatKind::Text => match (content.title(), content.url()) {
                (Some(title), Some(url)) => {
                    client.send_text_card(&to_user, title, &rendered, url).await
                }
                _ => client.send_text(&to_user, &rendered).await,
            },
            other => return DeliveryResult::failed(format!("unknown content type: {other}")),
        };

        finish(ChannelKind::WeChatCorpAccount, outcome)
    }
}
