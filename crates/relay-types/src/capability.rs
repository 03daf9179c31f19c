//! Channel kinds and the content formats each one accepts.
//!
//! A channel's capability is declared once when its dispatcher is built and
//! never changes afterwards.

use crate::message::FormatKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed set of implemented channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChannelKind {
    /// WeChat Work (enterprise WeChat) self-built application.
    #[serde(rename = "wechat_corp_account")]
    WeChatCorpAccount,
    /// DingTalk custom group robot.
    #[serde(rename = "dingtalk")]
    DingTalk,
    /// Generic outbound HTTP webhook.
    #[serde(rename = "webhook")]
    Webhook,
}

impl ChannelKind {
    /// Stable string identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::WeChatCorpAccount => "wechat_corp_account",
            ChannelKind::DingTalk => "dingtalk",
            ChannelKind::Webhook => "webhook",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The formats a channel accepts, in preference order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelCapability {
    kind: ChannelKind,
    formats: Vec<FormatKind>,
}

impl ChannelCapability {
    /// Declare a capability. Repeated formats keep their first position.
    pub fn new(kind: ChannelKind, formats: Vec<FormatKind>) -> Self {
        let mut unique = Vec::with_capacity(formats.len());
        for f in formats {
            if !unique.contains(&f) {
                unique.push(f);
            }
        }
        Self {
            kind,
            formats: unique,
        }
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Accepted formats, most preferred first.
    pub fn formats(&self) -> &[FormatKind] {
        &self.formats
    }
}
