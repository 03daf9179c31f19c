//! Integration tests for the dispatch pipeline.
//!
//! These tests build a real `ChannelRegistry` around the WeChat Work
//! dispatcher, point it at a mockito server standing in for the provider API,
//! and drive unified messages through `dispatch` end to end.

use mockito::{Matcher, ServerGuard};
use relay_channels::credential::CredentialCache;
use relay_channels::dispatcher::{ChannelRegistry, TYPE_CONVERSION_FAILED};
use relay_channels::validate::{ConfigInsValidator, InsValidator};
use relay_channels::wechat_corp::WeChatCorpAccountChannel;
use relay_types::capability::ChannelKind;
use relay_types::config::{
    ChannelAuth, DingTalkIns, InsConfig, SendTaskIns, WeChatCorpAccountAuth,
};
use relay_types::message::UnifiedMessageContent;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Mock validators
// ---------------------------------------------------------------------------

/// Rejects every instance with a fixed reason, counting calls.
struct RejectingValidator {
    reason: String,
    calls: AtomicUsize,
}

impl InsValidator for RejectingValidator {
    fn validate_diff_ins(&self, _ins: &SendTaskIns) -> Result<InsConfig, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.reason.clone())
    }
}

/// Always returns a DingTalk config regardless of the instance.
struct WrongKindValidator;

impl InsValidator for WrongKindValidator {
    fn validate_diff_ins(&self, _ins: &SendTaskIns) -> Result<InsConfig, String> {
        Ok(InsConfig::DingTalk(DingTalkIns::default()))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn wecom_auth(secret: &str) -> ChannelAuth {
    ChannelAuth::WeChatCorpAccount(WeChatCorpAccountAuth {
        corp_id: "ww0123".to_string(),
        agent_id: 1000002,
        agent_secret: secret.to_string(),
        proxy_url: String::new(),
    })
}

fn wecom_ins(to_account: &str) -> SendTaskIns {
    SendTaskIns {
        id: "ins-ops".to_string(),
        task_id: "task-1".to_string(),
        way_id: "ops-wecom".to_string(),
        kind: ChannelKind::WeChatCorpAccount,
        config: serde_json::json!({ "to_account": to_account }),
    }
}

fn registry_for(
    server: &ServerGuard,
    cache: Arc<CredentialCache>,
    validator: Arc<dyn InsValidator>,
) -> ChannelRegistry {
    let mut registry = ChannelRegistry::empty();
    registry.register(Arc::new(
        WeChatCorpAccountChannel::new(cache, validator).with_api_base(server.url()),
    ));
    registry
}

async fn mock_token(server: &mut ServerGuard, hits: usize) -> mockito::Mock {
    server
        .mock("GET", "/cgi-bin/gettoken")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"errcode":0,"errmsg":"ok","access_token":"tok-1","expires_in":7200}"#)
        .expect(hits)
        .create_async()
        .await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_card_path_end_to_end() {
    let mut server = mockito::Server::new_async().await;
    let token = mock_token(&mut server, 1).await;
    let send = server
        .mock("POST", "/cgi-bin/message/send")
        .match_query(Matcher::UrlEncoded("access_token".into(), "tok-1".into()))
        .match_body(Matcher::PartialJson(serde_json::json!({
            "touser": "zhangsan|lisi",
            "agentid": 1000002,
            "msgtype": "textcard",
            "textcard": {"title": "Alert", "description": "disk 95%", "url": "http://x"}
        })))
        .with_status(200)
        .with_body(r#"{"errcode":0,"errmsg":"ok","msgid":"abc"}"#)
        .create_async()
        .await;

    let registry = registry_for(
        &server,
        Arc::new(CredentialCache::new()),
        Arc::new(ConfigInsValidator),
    );
    let content = UnifiedMessageContent::text("disk 95%")
        .with_title("Alert")
        .with_url("http://x");
    let result = registry
        .dispatch(&wecom_auth("app-secret"), &wecom_ins("zhangsan|lisi"), &content)
        .await;

    assert!(result.is_success(), "{}", result.error_message);
    assert!(result.response_body.contains("abc"));
    token.assert_async().await;
    send.assert_async().await;
}

#[tokio::test]
async fn test_independent_auth_objects_share_cached_token() {
    let mut server = mockito::Server::new_async().await;
    let token = mock_token(&mut server, 1).await;
    let send = server
        .mock("POST", "/cgi-bin/message/send")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"errcode":0,"errmsg":"ok"}"#)
        .expect(3)
        .create_async()
        .await;

    let cache = Arc::new(CredentialCache::new());
    let registry = registry_for(&server, Arc::clone(&cache), Arc::new(ConfigInsValidator));

    for to in ["a", "b", "c"] {
        let result = registry
            .dispatch(
                &wecom_auth("app-secret"),
                &wecom_ins(to),
                &UnifiedMessageContent::text("hi"),
            )
            .await;
        assert!(result.is_success(), "{}", result.error_message);
    }

    token.assert_async().await;
    send.assert_async().await;
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn test_concurrent_dispatches_fetch_token_once() {
    let mut server = mockito::Server::new_async().await;
    let token = mock_token(&mut server, 1).await;
    let send = server
        .mock("POST", "/cgi-bin/message/send")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"errcode":0,"errmsg":"ok"}"#)
        .expect(6)
        .create_async()
        .await;

    let registry = Arc::new(registry_for(
        &server,
        Arc::new(CredentialCache::new()),
        Arc::new(ConfigInsValidator),
    ));

    let mut handles = Vec::new();
    for i in 0..6 {
        let registry = Arc::clone(&registry);
        handles.push(tokio::spawn(async move {
            registry
                .dispatch(
                    &wecom_auth("app-secret"),
                    &wecom_ins(&format!("user{i}")),
                    &UnifiedMessageContent::text("hi"),
                )
                .await
        }));
    }
    for handle in handles {
        let result = handle.await.unwrap();
        assert!(result.is_success(), "{}", result.error_message);
    }

    token.assert_async().await;
    send.assert_async().await;
}

#[tokio::test]
async fn test_validator_error_short_circuits_before_io() {
    let mut server = mockito::Server::new_async().await;
    let token = mock_token(&mut server, 0).await;

    let validator = Arc::new(RejectingValidator {
        reason: "instance disabled".to_string(),
        calls: AtomicUsize::new(0),
    });
    let registry = registry_for(
        &server,
        Arc::new(CredentialCache::new()),
        Arc::clone(&validator) as Arc<dyn InsValidator>,
    );
    let result = registry
        .dispatch(
            &wecom_auth("app-secret"),
            &wecom_ins("ops"),
            &UnifiedMessageContent::text("hi"),
        )
        .await;

    assert_eq!(result.error_message, "instance disabled");
    assert!(result.response_body.is_empty());
    assert_eq!(validator.calls.load(Ordering::SeqCst), 1);
    token.assert_async().await;
}

#[tokio::test]
async fn test_wrong_config_kind_fails_check() {
    let server = mockito::Server::new_async().await;
    let registry = registry_for(
        &server,
        Arc::new(CredentialCache::new()),
        Arc::new(WrongKindValidator),
    );
    let result = registry
        .dispatch(
            &wecom_auth("app-secret"),
            &wecom_ins("ops"),
            &UnifiedMessageContent::text("hi"),
        )
        .await;
    assert_eq!(
        result.error_message,
        "wechat_corp_account config check failed"
    );
}

#[tokio::test]
async fn test_empty_secret_fails_without_caching() {
    let mut server = mockito::Server::new_async().await;
    let token = mock_token(&mut server, 0).await;

    let cache = Arc::new(CredentialCache::new());
    let registry = registry_for(&server, Arc::clone(&cache), Arc::new(ConfigInsValidator));
    let result = registry
        .dispatch(
            &wecom_auth(""),
            &wecom_ins("ops"),
            &UnifiedMessageContent::text("hi"),
        )
        .await;

    assert_eq!(
        result.error_message,
        "send failed: missing credential field: agent_secret"
    );
    assert!(cache.is_empty());
    token.assert_async().await;
}

#[tokio::test]
async fn test_dispatcher_rejects_foreign_auth() {
    let server = mockito::Server::new_async().await;
    let registry = registry_for(
        &server,
        Arc::new(CredentialCache::new()),
        Arc::new(ConfigInsValidator),
    );
    let dispatcher = registry.get(ChannelKind::WeChatCorpAccount).unwrap();
    let foreign = ChannelAuth::DingTalk(Default::default());
    let result = dispatcher
        .send_unified(&foreign, &wecom_ins("ops"), &UnifiedMessageContent::text("hi"))
        .await;
    assert_eq!(result.error_message, TYPE_CONVERSION_FAILED);
}
