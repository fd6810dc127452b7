//! Two sessions visiting the same origin in separate tabs never see each
//! other's cookies on outbound requests.

mod common;

use common::build_core;
use session_isolation_core::host::{HostEvent, TabId};
use session_isolation_core::tier::Tier;

#[tokio::test]
async fn l1_each_session_only_sees_its_own_cookies_on_request() {
    let (core, _host) = build_core(Tier::Enterprise, false);

    let a = core.create_session(Some("https://bank.test/")).await.unwrap();
    let b = core.create_session(Some("https://bank.test/")).await.unwrap();

    core.handle_event(HostEvent::HeadersReceived {
        tab_id: TabId(1),
        url: "https://bank.test/".to_string(),
        headers: vec![("Set-Cookie".to_string(), "session=a-secret; Path=/".to_string())],
    })
    .await;
    core.handle_event(HostEvent::HeadersReceived {
        tab_id: TabId(2),
        url: "https://bank.test/".to_string(),
        headers: vec![("Set-Cookie".to_string(), "session=b-secret; Path=/".to_string())],
    })
    .await;

    let rewritten_a = core
        .handle_event(HostEvent::BeforeSendHeaders {
            tab_id: TabId(1),
            url: "https://bank.test/".to_string(),
            headers: vec![("Cookie".to_string(), "ambient=leaked".to_string())],
        })
        .await
        .unwrap();
    let rewritten_b = core
        .handle_event(HostEvent::BeforeSendHeaders {
            tab_id: TabId(2),
            url: "https://bank.test/".to_string(),
            headers: vec![("Cookie".to_string(), "ambient=leaked".to_string())],
        })
        .await
        .unwrap();

    let cookie_header_a = rewritten_a.iter().find(|(name, _)| name == "Cookie").unwrap();
    let cookie_header_b = rewritten_b.iter().find(|(name, _)| name == "Cookie").unwrap();

    assert_eq!(cookie_header_a.1, "session=a-secret");
    assert_eq!(cookie_header_b.1, "session=b-secret");
    assert_ne!(a, b);
}

#[tokio::test]
async fn unbound_tab_requests_pass_through_untouched() {
    let (core, _host) = build_core(Tier::Free, false);
    let headers = vec![("Cookie".to_string(), "ambient=1".to_string())];
    let out = core
        .handle_event(HostEvent::BeforeSendHeaders {
            tab_id: TabId(404),
            url: "https://nowhere.test/".to_string(),
            headers: headers.clone(),
        })
        .await
        .unwrap();
    assert_eq!(out, headers);
}
