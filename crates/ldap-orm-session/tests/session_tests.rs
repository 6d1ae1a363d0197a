//! Session behaviour that needs no running server.

use std::sync::Once;

use ldap_orm::directory::{Directory, SearchRequest, SearchScope};
use ldap_orm::timestamp::Dialect;
use ldap_orm_session::{ConnectionSettings, LdapSession, SessionConfig, SessionState};

static INIT: Once = Once::new();

fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init()
            .ok();
    });
}

/// Nothing listens on port 1 of the loopback interface.
fn unreachable_config() -> SessionConfig {
    init_test_logging();
    SessionConfig::new("ldap://127.0.0.1:1", "cn=admin,dc=example,dc=com", "secret").with_connection(
        ConnectionSettings::new()
            .with_connection_timeout(2)
            .with_bind_retries(2)
            .with_retry_delay_ms(10),
    )
}

#[tokio::test]
async fn test_connect_to_unreachable_server_fails() {
    let mut session = LdapSession::new(unreachable_config()).unwrap();

    let err = session.connect().await.unwrap_err();

    assert_eq!(err.error_code(), "CONNECTION_FAILED");
    assert!(err.to_string().contains("after 2 attempts"));
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(!session.is_connected());
}

#[tokio::test]
async fn test_operations_connect_lazily() {
    let mut session = LdapSession::new(unreachable_config()).unwrap();
    let request = SearchRequest::new("dc=example,dc=com", SearchScope::Subtree, "(objectClass=*)");

    let err = session.search(&request).await.unwrap_err();

    assert_eq!(err.error_code(), "CONNECTION_FAILED");
    assert!(!session.is_connected());
}

#[tokio::test]
async fn test_connect_with_rejects_invalid_config() {
    let config = SessionConfig::new("ldap.example.com", "cn=admin", "secret");

    let err = LdapSession::connect_with(config).await.unwrap_err();
    assert_eq!(err.error_code(), "INVALID_CONFIG");
}

#[tokio::test]
async fn test_disconnect_without_connection() {
    let mut session = LdapSession::new(unreachable_config()).unwrap();
    session.disconnect().await;
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn test_set_config_replaces_settings() {
    let mut session = LdapSession::new(unreachable_config()).unwrap();
    assert_eq!(session.dialect(), Dialect::Generic);

    session
        .set_config(unreachable_config().with_active_directory())
        .await
        .unwrap();
    assert_eq!(session.dialect(), Dialect::ActiveDirectory);

    let invalid = SessionConfig::new("ldap://127.0.0.1:1", "", "secret");
    assert!(session.set_config(invalid).await.is_err());
    assert!(session.config().active_directory);
}

#[test]
fn test_into_manager_does_not_connect() {
    let config = unreachable_config()
        .with_base_dn("dc=example,dc=com")
        .with_page_size(100);
    let manager = LdapSession::new(config).unwrap().into_manager();

    assert_eq!(manager.directory().state(), SessionState::Disconnected);
    assert!(!manager.has_more_pages());
}
