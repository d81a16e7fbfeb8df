//! Contract: session renewal is threshold-driven and counter-resetting
//!
//! Only failures carrying a credential-expiry signature count toward the
//! renewal threshold. Once crossed, the next call re-authenticates before
//! attempting its operation; a successful re-authentication resets the
//! counter to zero. A failed re-authentication is surfaced and retried on
//! the next call, never in a tight loop.

mod common;

use std::sync::Arc;

use common::*;
use wanmon_core::traits::{DeviceBackend, PortId};
use wanmon_core::{Error, SessionManager};

const PORT: PortId = PortId(0);

#[tokio::test]
async fn renewal_triggers_after_three_expiry_failures() {
    let backend = ScriptedBackend::new();
    for _ in 0..3 {
        backend.push_query_err(Error::auth("token expired"));
    }
    backend.push_query("203.0.113.45");

    let session = SessionManager::new(Arc::clone(&backend) as Arc<dyn DeviceBackend>, 3);

    for _ in 0..3 {
        assert!(session.query_wan_address(PORT).await.is_err());
    }
    assert_eq!(backend.auth_calls(), 1, "no renewal below the threshold");
    assert_eq!(session.consecutive_failures().await, 3);

    // Threshold crossed: this call re-authenticates first, then queries
    let raw = session.query_wan_address(PORT).await.unwrap();
    assert_eq!(raw, "203.0.113.45");
    assert_eq!(backend.auth_calls(), 2, "re-authenticated before the operation");
    assert_eq!(session.consecutive_failures().await, 0, "success resets the counter");
}

#[tokio::test]
async fn non_expiry_failures_do_not_count() {
    let backend = ScriptedBackend::new();
    for _ in 0..5 {
        backend.push_query_err(Error::query("device unreachable"));
    }

    let session = SessionManager::new(Arc::clone(&backend) as Arc<dyn DeviceBackend>, 3);

    for _ in 0..5 {
        assert!(session.query_wan_address(PORT).await.is_err());
    }
    assert_eq!(backend.auth_calls(), 1, "plain query failures never force renewal");
    assert_eq!(session.consecutive_failures().await, 0);
}

#[tokio::test]
async fn failed_renewal_is_retried_on_the_next_call() {
    let backend = ScriptedBackend::new();
    for _ in 0..3 {
        backend.push_query_err(Error::auth("token expired"));
    }
    backend.push_query("203.0.113.45");
    // Initial handshake succeeds, the renewal attempt fails once
    backend.push_auth_result(Ok(()));
    backend.push_auth_result(Err(Error::auth("controller offline")));

    let session = SessionManager::new(Arc::clone(&backend) as Arc<dyn DeviceBackend>, 3);

    for _ in 0..3 {
        assert!(session.query_wan_address(PORT).await.is_err());
    }

    // Renewal fails: the error propagates and the query is never issued
    let err = session.query_wan_address(PORT).await.unwrap_err();
    assert!(matches!(err, Error::Auth(_)));
    assert_eq!(backend.auth_calls(), 2);
    assert_eq!(backend.query_calls(), 3, "no query behind a dead session");

    // Next call: renewal succeeds, query goes through
    let raw = session.query_wan_address(PORT).await.unwrap();
    assert_eq!(raw, "203.0.113.45");
    assert_eq!(backend.auth_calls(), 3);
    assert_eq!(session.consecutive_failures().await, 0);
}

#[tokio::test]
async fn issued_at_is_recorded_on_handshake() {
    let backend = ScriptedBackend::new();
    backend.set_default_query("203.0.113.45");

    let session = SessionManager::new(Arc::clone(&backend) as Arc<dyn DeviceBackend>, 3);
    assert!(session.issued_at().await.is_none());

    session.query_wan_address(PORT).await.unwrap();
    assert!(session.issued_at().await.is_some());
}
