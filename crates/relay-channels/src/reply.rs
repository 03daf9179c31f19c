//! Shared handling of `{errcode, errmsg}` provider replies.

use relay_types::error::{RelayError, RelayResult};
use serde::Deserialize;
use tracing::warn;

/// Reply envelope used by WeChat Work and DingTalk.
///
/// WeChat Work adds the `invalid*` fields listing recipients it could not
/// deliver to.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrcodeReply {
    #[serde(default)]
    pub errcode: i64,
    #[serde(default)]
    pub errmsg: String,
    #[serde(default)]
    pub invaliduser: String,
    #[serde(default)]
    pub invalidparty: String,
    #[serde(default)]
    pub invalidtag: String,
}

impl ErrcodeReply {
    /// Auxiliary diagnostics such as `invaliduser=bob`, comma separated.
    fn diagnostics(&self) -> String {
        [
            ("invaliduser", &self.invaliduser),
            ("invalidparty", &self.invalidparty),
            ("invalidtag", &self.invalidtag),
        ]
        .iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ")
    }
}

/// Read a response body, turning non-2xx statuses into transport errors.
pub(crate) async fn read_body(resp: reqwest::Response) -> RelayResult<String> {
    let status = resp.status();
    let body = resp
        .text()
        .await
        .map_err(|e| RelayError::transport(format!("failed to read response: {e}")))?;
    if !status.is_success() {
        return Err(RelayError::Transport {
            message: format!("HTTP {status}"),
            body: Some(body),
        });
    }
    Ok(body)
}

/// Interpret an `{errcode, errmsg}` body, returning it verbatim on success.
///
/// A non-zero code becomes [`RelayError::Delivery`] with any recipient
/// diagnostics appended to the message and the raw body kept.
pub(crate) fn check_errcode(channel: &str, body: String) -> RelayResult<String> {
    let reply: ErrcodeReply = match serde_json::from_str(&body) {
        Ok(r) => r,
        Err(e) => {
            return Err(RelayError::Transport {
                message: format!("malformed {channel} response: {e}"),
                body: Some(body),
            })
        }
    };

    let diagnostics = reply.diagnostics();
    if reply.errcode != 0 {
        let message = if diagnostics.is_empty() {
            reply.errmsg.clone()
        } else {
            format!("{} ({diagnostics})", reply.errmsg)
        };
        return Err(RelayError::Delivery {
            code: reply.errcode,
            message,
            body,
        });
    }

    if !diagnostics.is_empty() {
        warn!(channel, %diagnostics, "Message partially delivered");
    }
    Ok(body)
}

/// Map a reqwest send failure.
pub(crate) fn send_error(e: reqwest::Error) -> RelayError {
    if e.is_timeout() {
        RelayError::transport(format!("request timed out: {e}"))
    } else {
        RelayError::transport(format!("request failed: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_returns_raw_body() {
        let body = r#"{"errcode":0,"errmsg":"ok","msgid":"m1"}"#.to_string();
        assert_eq!(check_errcode("wecom", body.clone()).unwrap(), body);
    }

    #[test]
    fn test_error_code_with_invalid_user() {
        let body = r#"{"errcode":81013,"errmsg":"user & party & tag all invalid","invaliduser":"bob"}"#;
        let err = check_errcode("wecom", body.to_string()).unwrap_err();
        match err {
            RelayError::Delivery {
                code,
                ref message,
                ref body,
            } => {
                assert_eq!(code, 81013);
                assert_eq!(message, "user & party & tag all invalid (invaliduser=bob)");
                assert!(body.contains("81013"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_multiple_diagnostics_joined() {
        let body = r#"{"errcode":40003,"errmsg":"invalid","invaliduser":"a|b","invalidtag":"7"}"#;
        let err = check_errcode("wecom", body.to_string()).unwrap_err();
        assert_eq!(err.to_string(), "invalid (invaliduser=a|b, invalidtag=7)");
    }

    #[test]
    fn test_malformed_body_is_transport_error_with_body() {
        let err = check_errcode("dingtalk", "<html>bad gateway</html>".to_string()).unwrap_err();
        assert!(matches!(err, RelayError::Transport { .. }));
        assert_eq!(err.response_body(), Some("<html>bad gateway</html>"));
    }
}
