//! Instance validation: turning a task's stored instance data into a
//! channel-specific configuration.

use relay_types::capability::ChannelKind;
use relay_types::config::{DingTalkIns, InsConfig, SendTaskIns, WeChatCorpAccountIns, WebhookIns};
use serde::de::DeserializeOwned;

/// Materializes a channel config from a task instance.
///
/// An `Err` carries the human-readable reason the instance is unusable.
pub trait InsValidator: Send + Sync {
    fn validate_diff_ins(&self, ins: &SendTaskIns) -> Result<InsConfig, String>;
}

/// Default validator: deserializes `ins.config` into the shape the
/// instance's channel kind expects.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfigInsValidator;

impl InsValidator for ConfigInsValidator {
    fn validate_diff_ins(&self, ins: &SendTaskIns) -> Result<InsConfig, String> {
        if ins.way_id.trim().is_empty() {
            return Err(format!("instance {} has no way_id", ins.id));
        }
        match ins.kind {
            ChannelKind::WeChatCorpAccount => {
                parse::<WeChatCorpAccountIns>(ins).map(InsConfig::WeChatCorpAccount)
            }
            ChannelKind::DingTalk => {
                let config = parse::<DingTalkIns>(ins)?;
                if let Some(bad) = config
                    .at_mobiles
                    .iter()
                    .find(|m| m.is_empty() || !m.chars().all(|c| c.is_ascii_digit() || c == '+'))
                {
                    return Err(format!("invalid mobile number in at_mobiles: {bad:?}"));
                }
                Ok(InsConfig::DingTalk(config))
            }
            ChannelKind::Webhook => parse::<WebhookIns>(ins).map(InsConfig::Webhook),
        }
    }
}

fn parse<T: DeserializeOwned>(ins: &SendTaskIns) -> Result<T, String> {
    let value = if ins.config.is_null() {
        serde_json::Value::Object(Default::default())
    } else {
        ins.config.clone()
    };
    serde_json::from_value(value)
        .map_err(|e| format!("invalid {} instance config: {e}", ins.kind))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ins(kind: ChannelKind, config: serde_json::Value) -> SendTaskIns {
        SendTaskIns {
            id: "ins-1".to_string(),
            task_id: "task-1".to_string(),
            way_id: "way-1".to_string(),
            kind,
            config,
        }
    }

    #[test]
    fn test_wechat_instance() {
        let config = ConfigInsValidator
            .validate_diff_ins(&ins(
                ChannelKind::WeChatCorpAccount,
                json!({"to_account": "zhangsan"}),
            ))
            .unwrap();
        assert_eq!(
            config,
            InsConfig::WeChatCorpAccount(WeChatCorpAccountIns {
                to_account: "zhangsan".to_string()
            })
        );
    }

    #[test]
    fn test_null_config_uses_defaults() {
        let config = ConfigInsValidator
            .validate_diff_ins(&ins(ChannelKind::Webhook, serde_json::Value::Null))
            .unwrap();
        assert_eq!(config.kind(), ChannelKind::Webhook);
    }

    #[test]
    fn test_wrong_shape_rejected() {
        let err = ConfigInsValidator
            .validate_diff_ins(&ins(ChannelKind::DingTalk, json!({"at_mobiles": "138"})))
            .unwrap_err();
        assert!(err.starts_with("invalid dingtalk instance config"));
    }

    #[test]
    fn test_bad_mobile_rejected() {
        let err = ConfigInsValidator
            .validate_diff_ins(&ins(
                ChannelKind::DingTalk,
                json!({"at_mobiles": ["13800000000", "abc"]}),
            ))
            .unwrap_err();
        assert!(err.contains("abc"));
    }

    #[test]
    fn test_missing_way_rejected() {
        let mut i = ins(ChannelKind::Webhook, json!({}));
        i.way_id = String::new();
        assert!(ConfigInsValidator.validate_diff_ins(&i).is_err());
    }
}
