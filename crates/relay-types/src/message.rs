//! Provider-agnostic message content, format negotiation and target resolution.

use crate::capability::ChannelCapability;
use crate::error::{RelayError, RelayResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A rendering format a message body can be expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatKind {
    /// Plain text.
    Text,
    /// Markdown.
    Markdown,
    /// HTML.
    Html,
}

impl FormatKind {
    /// Stable lowercase identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            FormatKind::Text => "text",
            FormatKind::Markdown => "markdown",
            FormatKind::Html => "html",
        }
    }
}

impl fmt::Display for FormatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FormatKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(FormatKind::Text),
            "markdown" | "md" => Ok(FormatKind::Markdown),
            "html" => Ok(FormatKind::Html),
            other => Err(format!("unknown format: {other}")),
        }
    }
}

/// The message handed to a channel dispatcher.
///
/// Built once per send and never mutated while it is being dispatched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedMessageContent {
    /// Optional title (used by card-style sends).
    #[serde(default)]
    pub title: Option<String>,
    /// Message body, authored in `format`.
    pub body: String,
    /// Format `body` is written in.
    #[serde(default = "default_format")]
    pub format: FormatKind,
    /// Extra renditions pre-rendered by the caller.
    #[serde(default)]
    pub alternatives: BTreeMap<FormatKind, String>,
    /// Optional link-out target.
    #[serde(default)]
    pub url: Option<String>,
    /// Mention everyone in the conversation.
    #[serde(default)]
    pub mention_all: bool,
    /// Explicit users to mention, in order, without duplicates.
    #[serde(default)]
    pub mention_user_ids: Vec<String>,
}

fn default_format() -> FormatKind {
    FormatKind::Text
}

impl UnifiedMessageContent {
    /// Plain-text content.
    pub fn text(body: impl Into<String>) -> Self {
        Self::new(body, FormatKind::Text)
    }

    /// Markdown content.
    pub fn markdown(body: impl Into<String>) -> Self {
        Self::new(body, FormatKind::Markdown)
    }

    /// Content whose body is authored in `format`.
    pub fn new(body: impl Into<String>, format: FormatKind) -> Self {
        Self {
            title: None,
            body: body.into(),
            format,
            alternatives: BTreeMap::new(),
            url: None,
            mention_all: false,
            mention_user_ids: Vec::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Register an alternative rendition of the body.
    pub fn with_alternative(mut self, format: FormatKind, body: impl Into<String>) -> Self {
        self.alternatives.insert(format, body.into());
        self
    }

    pub fn with_mention_all(mut self, mention_all: bool) -> Self {
        self.mention_all = mention_all;
        self
    }

    /// Set the explicit mention list. Empty and repeated IDs are dropped,
    /// first occurrence wins.
    pub fn with_mentions<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mention_user_ids = dedup_ids(ids.into_iter().map(Into::into));
        self
    }

    /// Title, if set and non-blank.
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref().filter(|t| !t.trim().is_empty())
    }

    /// Link target, if set and non-blank.
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref().filter(|u| !u.trim().is_empty())
    }

    /// Formats this content can render, native format first.
    pub fn offered_formats(&self) -> Vec<FormatKind> {
        let mut formats = vec![self.format];
        formats.extend(self.alternatives.keys().filter(|k| **k != self.format));
        formats
    }

    /// Render the body in `format`, if this content can produce it.
    ///
    /// No conversion happens: only the native body and caller-supplied
    /// alternatives are available.
    pub fn render(&self, format: FormatKind) -> Option<&str> {
        if format == self.format {
            Some(self.body.as_str())
        } else {
            self.alternatives.get(&format).map(String::as_str)
        }
    }

    /// Pick the channel's most preferred format this content can render.
    pub fn negotiate(&self, capability: &ChannelCapability) -> RelayResult<(FormatKind, String)> {
        capability
            .formats()
            .iter()
            .find_map(|kind| self.render(*kind).map(|text| (*kind, text.to_string())))
            .ok_or_else(|| {
                RelayError::unsupported_format(&self.offered_formats(), capability.formats())
            })
    }

    /// Resolve who the message goes to.
    ///
    /// Precedence: mention-all, then explicit mentions, then `default`.
    pub fn resolve_target(&self, default: &str) -> Target {
        if self.mention_all {
            return Target::Everyone;
        }
        let ids = dedup_ids(self.mention_user_ids.iter().cloned());
        if !ids.is_empty() {
            return Target::Users(ids);
        }
        Target::Default(default.to_string())
    }
}

fn dedup_ids(ids: impl Iterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for id in ids {
        let id = id.trim().to_string();
        if !id.is_empty() && !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

/// A resolved delivery target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Everyone in the conversation.
    Everyone,
    /// An explicit list of users.
    Users(Vec<String>),
    /// The channel's configured default recipient.
    Default(String),
}

impl Target {
    /// Render the target as a provider recipient string.
    pub fn render(&self, everyone: &str, separator: &str) -> String {
        match self {
            Target::Everyone => everyone.to_string(),
            Target::Users(ids) => ids.join(separator),
            Target::Default(default) => default.clone(),
        }
    }
}

/// Normalized outcome of one send.
///
/// A non-empty `error_message` marks failure; `response_body` may still hold
/// the provider's raw reply for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryResult {
    pub response_body: String,
    pub error_message: String,
}

impl DeliveryResult {
    pub fn delivered(response_body: impl Into<String>) -> Self {
        Self {
            response_body: response_body.into(),
            error_message: String::new(),
        }
    }

    pub fn failed(error_message: impl Into<String>) -> Self {
        Self {
            response_body: String::new(),
            error_message: error_message.into(),
        }
    }

    pub fn failed_with_body(
        response_body: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            response_body: response_body.into(),
            error_message: error_message.into(),
        }
    }

    /// Whether the send succeeded.
    pub fn is_success(&self) -> bool {
        self.error_message.is_empty()
    }
}
