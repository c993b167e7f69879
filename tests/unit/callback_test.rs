//! Callback delivery through the hub into a running flow.

use std::time::Duration;

use inbox_pkce::auth::callback::{CallbackHub, CallbackParams};
use inbox_pkce::auth::FlowContext;
use inbox_pkce::FlowError;

use crate::common::memory_flow;

#[tokio::test]
async fn test_popup_callback_completes_flow() {
    let (flow, _) = memory_flow();
    let hub = CallbackHub::new();
    let mut subscription = hub.subscribe();

    let start = flow
        .begin("facebook page flow", FlowContext::new("facebook_page"))
        .unwrap();

    let popup = hub.clone();
    let url = format!(
        "https://app.example.com/callback?code=AQBx&state={}#_=_",
        urlencoding::encode(start.state())
    );
    tokio::spawn(async move {
        popup.publish_url(&url);
    });

    let params = subscription
        .recv_timeout(Duration::from_secs(1))
        .await
        .expect("callback delivered");
    let done = flow.handle_callback("facebook page flow", &params).unwrap();
    assert_eq!(done.code(), "AQBx");
}

#[tokio::test]
async fn test_popup_denied_callback() {
    let (flow, _) = memory_flow();
    let hub = CallbackHub::new();
    let mut subscription = hub.subscribe();
    flow.begin("k", FlowContext::new("facebook_page")).unwrap();

    assert_eq!(hub.publish_url("/callback?error=access_denied"), 1);
    let params = subscription.recv().await.unwrap();

    assert!(matches!(
        flow.handle_callback("k", &params),
        Err(FlowError::Denied { .. })
    ));
    assert!(flow.store().retrieve("k").is_none());
}

#[test]
fn test_params_new_matches_parsed() {
    assert_eq!(
        CallbackParams::from_url("/cb?code=c&state=s"),
        CallbackParams::new("c", "s")
    );
}
