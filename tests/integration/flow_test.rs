//! End-to-end flow scenarios over in-memory storage.

use std::sync::Arc;
use std::time::Duration;

use inbox_pkce::auth::callback::CallbackParams;
use inbox_pkce::auth::flow::AuthorizationEndpoint;
use inbox_pkce::auth::pkce::compute_challenge;
use inbox_pkce::auth::storage::{MemoryStorage, SessionStorage};
use inbox_pkce::auth::FlowContext;
use inbox_pkce::FlowError;
use pretty_assertions::assert_eq;

use crate::common::{flow_with_ttl, memory_flow, EXPIRED_RECORD};

const KEY: &str = "whatsapp cloud flow";

fn endpoint() -> AuthorizationEndpoint {
    AuthorizationEndpoint::new(
        "https://www.facebook.com/v19.0/dialog/oauth",
        "1234567890",
        "https://app.example.com/inboxes/callback",
    )
    .with_scope("whatsapp_business_management")
}

/// Simulates the provider: reads the authorization URL, answers with a code
/// and the state it was given.
fn provider_redirect(authorization_url: &str, code: &str) -> String {
    let query = authorization_url.split_once('?').map_or("", |(_, q)| q);
    let state = query
        .split('&')
        .filter_map(|p| p.split_once('='))
        .find(|(k, _)| *k == "state")
        .map_or("", |(_, v)| v);
    format!("https://app.example.com/inboxes/callback?code={code}&state={state}")
}

#[tokio::test]
async fn test_full_round_trip() {
    let (flow, _) = memory_flow();
    let context = FlowContext::new("whatsapp_cloud")
        .with_account("42")
        .with_display_name("Support_EU_2024");

    let start = flow.begin(KEY, context.clone()).unwrap();
    let url = endpoint().authorization_url(&start);
    assert!(url.contains(&format!("code_challenge={}", start.code_challenge())));

    let callback = CallbackParams::from_url(&provider_redirect(&url, "AUTH_CODE"));

    // Full-page redirect: the wizard recovers its key from the state alone.
    let returned_state = callback.state.clone().unwrap();
    let (key, resumed) = flow.resume(&returned_state).expect("flow resumes");
    assert_eq!(key, KEY);
    assert_eq!(resumed, context);

    let expected_challenge = start.code_challenge().clone();
    let token = flow
        .finish(&key, "AUTH_CODE", &returned_state, |code, verifier| async move {
            // The token endpoint would check this.
            assert_eq!(compute_challenge(verifier.expose_secret()), expected_challenge);
            Ok(format!("token-for-{code}"))
        })
        .await
        .unwrap();

    assert_eq!(token, "token-for-AUTH_CODE");
    assert!(flow.store().retrieve(KEY).is_none());
}

#[tokio::test]
async fn test_callback_after_expiry_is_rejected() {
    let storage = Arc::new(MemoryStorage::new());
    let flow = flow_with_ttl(storage.clone(), Duration::from_millis(100));

    let start = flow.begin(KEY, FlowContext::new("whatsapp_cloud")).unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    let err = flow.complete(KEY, "code", start.state()).unwrap_err();
    assert!(matches!(err, FlowError::Expired { .. }));
    assert!(storage.get("oauth_pkce::whatsapp cloud flow").unwrap().is_none());
}

#[tokio::test]
async fn test_replayed_callback_is_rejected() {
    let (flow, _) = memory_flow();
    let start = flow.begin(KEY, FlowContext::new("whatsapp_cloud")).unwrap();

    flow.finish(KEY, "code", start.state(), |_, _| async { Ok(()) })
        .await
        .unwrap();

    let err = flow.complete(KEY, "code", start.state()).unwrap_err();
    assert!(matches!(err, FlowError::Expired { .. }));
}

#[test]
fn test_forged_state_is_rejected_and_clears_record() {
    let (flow, _) = memory_flow();
    let start = flow.begin(KEY, FlowContext::new("whatsapp_cloud")).unwrap();

    let forged = CallbackParams::new("attacker-code", "attacker-state");
    let err = flow.handle_callback(KEY, &forged).unwrap_err();
    assert!(err.is_security_related());

    // The legitimate callback arriving afterwards must restart.
    let err = flow.complete(KEY, "code", start.state()).unwrap_err();
    assert!(matches!(err, FlowError::Expired { .. }));
}

#[test]
fn test_restarted_flow_replaces_previous() {
    let (flow, storage) = memory_flow();
    flow.begin(KEY, FlowContext::new("whatsapp_cloud")).unwrap();
    let second = flow.begin(KEY, FlowContext::new("whatsapp_cloud")).unwrap();

    let owned: Vec<String> = storage
        .keys()
        .unwrap()
        .into_iter()
        .filter(|k| k.starts_with("oauth_pkce::"))
        .collect();
    assert_eq!(owned.len(), 1);

    let done = flow.complete(KEY, "code", second.state()).unwrap();
    assert_eq!(done.code_verifier(), second.code_verifier());
}

#[test]
fn test_concurrent_wizards_are_independent() {
    let (flow, _) = memory_flow();
    let wa = flow.begin("whatsapp", FlowContext::new("whatsapp_cloud")).unwrap();
    let fb = flow.begin("facebook", FlowContext::new("facebook_page")).unwrap();
    assert_ne!(wa.state(), fb.state());

    assert!(flow.complete("whatsapp", "c", fb.state()).is_err());
    assert!(flow.complete("facebook", "c", fb.state()).is_ok());
}

#[test]
fn test_cancel_all_preserves_unrelated_keys() {
    let (flow, storage) = memory_flow();
    storage.set("user_prefs", r#"{"theme":"dark"}"#).unwrap();
    storage.set("draft_message", "hello").unwrap();

    flow.begin("a", FlowContext::new("whatsapp_cloud")).unwrap();
    flow.begin("b", FlowContext::new("facebook_page")).unwrap();

    assert_eq!(flow.cancel_all(), 2);
    assert_eq!(storage.get("user_prefs").unwrap().as_deref(), Some(r#"{"theme":"dark"}"#));
    assert_eq!(storage.get("draft_message").unwrap().as_deref(), Some("hello"));
}

#[test]
fn test_orphaned_expired_record_reads_as_absent() {
    let (flow, storage) = memory_flow();
    storage.set("oauth_pkce::orphan", EXPIRED_RECORD).unwrap();

    assert!(flow.store().retrieve("orphan").is_none());
    assert!(storage.get("oauth_pkce::orphan").unwrap().is_none());
}
