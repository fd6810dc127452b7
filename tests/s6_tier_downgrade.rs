//! A tier downgrade (Enterprise -> Premium) commits only after its 5-second
//! debounce elapses, preserves the session instead of discarding it, and
//! switches export to the Premium (unencrypted) wire format once committed.

mod common;

use common::build_core_with_oracle;
use session_isolation_core::host::HostEvent;
use session_isolation_core::tier::Tier;

#[tokio::test]
async fn downgrade_is_debounced_then_commits_and_session_survives() {
    let (core, _host, oracle) = build_core_with_oracle(Tier::Enterprise, true);
    let sid = core.create_session(None).await.unwrap();

    oracle.set(Tier::Premium, false).await;
    core.handle_event(HostEvent::PeriodicTick).await;

    // Not yet past the configured debounce: still Enterprise, so encrypted
    // export without a passphrase is rejected.
    let still_enterprise = core.export_sessions(&[sid], None).await;
    assert!(still_enterprise.is_err());

    // `common::test_config()` shrinks `tier_change_debounce` to 10ms so this
    // test doesn't need a real 5s (spec §4.6) sleep to observe the commit.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    core.handle_event(HostEvent::PeriodicTick).await;

    // Committed to Premium: export no longer requires (or produces) AES
    // encryption, so a `None` passphrase now succeeds and round-trips.
    let exported = core.export_sessions(&[sid], None).await.unwrap();
    let decoded = session_isolation_core::export::decode(&exported, None).unwrap();
    assert_eq!(decoded.sessions.len(), 1);
}
