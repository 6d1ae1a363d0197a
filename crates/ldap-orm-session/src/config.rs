//! Session configuration
//!
//! Connection parameters for an [`LdapSession`](crate::session::LdapSession)
//! plus the defaults handed to the entity manager built on top of it.

use std::time::Duration;

use ldap_orm::error::{OrmError, OrmResult};
use ldap_orm::timestamp::Dialect;
use serde::{Deserialize, Serialize};

const REDACTED: &str = "***REDACTED***";

/// Only simple binds with a plaintext password are supported.
pub const PASSWORD_TYPE_PLAINTEXT: &str = "plaintext";

/// Timeouts and retry policy for one connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Connection timeout in seconds.
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,

    /// Per-operation timeout in seconds.
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_secs: u64,

    /// Bind attempts before giving up.
    #[serde(default = "default_bind_retries")]
    pub bind_retries: u32,

    /// Delay between bind attempts in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_connection_timeout() -> u64 {
    30
}

fn default_operation_timeout() -> u64 {
    60
}

fn default_bind_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connection_timeout_secs: default_connection_timeout(),
            operation_timeout_secs: default_operation_timeout(),
            bind_retries: default_bind_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl ConnectionSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connection_timeout(mut self, secs: u64) -> Self {
        self.connection_timeout_secs = secs;
        self
    }

    pub fn with_operation_timeout(mut self, secs: u64) -> Self {
        self.operation_timeout_secs = secs;
        self
    }

    pub fn with_bind_retries(mut self, retries: u32) -> Self {
        self.bind_retries = retries;
        self
    }

    pub fn with_retry_delay_ms(mut self, delay_ms: u64) -> Self {
        self.retry_delay_ms = delay_ms;
        self
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Configuration for an LDAP session.
#[derive(Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Server URI, `ldap://host:port` or `ldaps://host:port`.
    pub uri: String,

    /// DN used for the simple bind.
    pub bind_dn: String,

    /// Bind password.
    pub password: String,

    /// How `password` is encoded. Only `"plaintext"` is accepted.
    #[serde(default = "default_password_type")]
    pub password_type: String,

    /// Upgrade a plain connection with StartTLS before binding.
    #[serde(default)]
    pub use_tls: bool,

    /// Server is Active Directory; selects the FILETIME timestamp dialect.
    #[serde(default)]
    pub active_directory: bool,

    /// Non-zero chases search references returned by the server.
    #[serde(default)]
    pub follow_referrals: i32,

    /// Timeouts and bind retry policy.
    #[serde(default)]
    pub connection: ConnectionSettings,

    /// Default page size for retrievals; `None` disables paging.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<i32>,

    /// Default size limit for retrievals.
    #[serde(default = "default_max_results")]
    pub max_results: i32,

    /// How deep linked entries are hydrated.
    #[serde(default = "default_max_link_depth")]
    pub max_link_depth: usize,

    /// Search base for entity types without a search-base template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_dn: Option<String>,
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("uri", &self.uri)
            .field("bind_dn", &self.bind_dn)
            .field("password", &REDACTED)
            .field("password_type", &self.password_type)
            .field("use_tls", &self.use_tls)
            .field("active_directory", &self.active_directory)
            .field("follow_referrals", &self.follow_referrals)
            .field("connection", &self.connection)
            .field("page_size", &self.page_size)
            .field("max_results", &self.max_results)
            .field("max_link_depth", &self.max_link_depth)
            .field("base_dn", &self.base_dn)
            .finish()
    }
}

fn default_password_type() -> String {
    PASSWORD_TYPE_PLAINTEXT.to_string()
}

fn default_max_results() -> i32 {
    20_000
}

fn default_max_link_depth() -> usize {
    3
}

impl SessionConfig {
    /// Create a config with the required fields.
    pub fn new(
        uri: impl Into<String>,
        bind_dn: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            uri: uri.into(),
            bind_dn: bind_dn.into(),
            password: password.into(),
            password_type: default_password_type(),
            use_tls: false,
            active_directory: false,
            follow_referrals: 0,
            connection: ConnectionSettings::default(),
            page_size: None,
            max_results: default_max_results(),
            max_link_depth: default_max_link_depth(),
            base_dn: None,
        }
    }

    /// Enable StartTLS.
    #[must_use]
    pub fn with_tls(mut self) -> Self {
        self.use_tls = true;
        self
    }

    /// Mark the server as Active Directory.
    #[must_use]
    pub fn with_active_directory(mut self) -> Self {
        self.active_directory = true;
        self
    }

    pub fn with_follow_referrals(mut self, follow: i32) -> Self {
        self.follow_referrals = follow;
        self
    }

    pub fn with_connection(mut self, connection: ConnectionSettings) -> Self {
        self.connection = connection;
        self
    }

    pub fn with_page_size(mut self, page_size: i32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn with_max_results(mut self, max_results: i32) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_max_link_depth(mut self, depth: usize) -> Self {
        self.max_link_depth = depth;
        self
    }

    pub fn with_base_dn(mut self, base_dn: impl Into<String>) -> Self {
        self.base_dn = Some(base_dn.into());
        self
    }

    /// Timestamp dialect implied by `active_directory`.
    #[must_use]
    pub fn dialect(&self) -> Dialect {
        Dialect::from_active_directory(self.active_directory)
    }

    #[must_use]
    pub fn follows_referrals(&self) -> bool {
        self.follow_referrals != 0
    }

    pub fn validate(&self) -> OrmResult<()> {
        let scheme = self.uri.split_once("://").map(|(scheme, _)| scheme.to_ascii_lowercase());
        let secure = match scheme.as_deref() {
            Some("ldap") => false,
            Some("ldaps") => true,
            _ => {
                return Err(OrmError::InvalidConfiguration {
                    message: format!("uri must start with ldap:// or ldaps://, got '{}'", self.uri),
                })
            }
        };

        if secure && self.use_tls {
            return Err(OrmError::InvalidConfiguration {
                message: "cannot use StartTLS on an ldaps:// connection".to_string(),
            });
        }

        if self.bind_dn.is_empty() {
            return Err(OrmError::InvalidConfiguration {
                message: "bind_dn is required".to_string(),
            });
        }

        if self.password.is_empty() {
            return Err(OrmError::InvalidConfiguration {
                message: "password is required".to_string(),
            });
        }

        if self.password_type != PASSWORD_TYPE_PLAINTEXT {
            return Err(OrmError::InvalidConfiguration {
                message: format!("unsupported password_type '{}'", self.password_type),
            });
        }

        if self.connection.bind_retries == 0 {
            return Err(OrmError::InvalidConfiguration {
                message: "bind_retries must be at least 1".to_string(),
            });
        }

        if matches!(self.page_size, Some(size) if size <= 0) {
            return Err(OrmError::InvalidConfiguration {
                message: "page_size must be positive".to_string(),
            });
        }

        Ok(())
    }

    /// Copy with the password masked, safe to log or serialize.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        config.password = REDACTED.to_string();
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SessionConfig {
        SessionConfig::new(
            "ldap://ldap.example.com:389",
            "cn=admin,dc=example,dc=com",
            "secret",
        )
    }

    #[test]
    fn test_session_config_new() {
        let config = config();

        assert_eq!(config.password_type, "plaintext");
        assert!(!config.use_tls);
        assert!(!config.active_directory);
        assert_eq!(config.follow_referrals, 0);
        assert_eq!(config.max_results, 20_000);
        assert_eq!(config.max_link_depth, 3);
        assert_eq!(config.page_size, None);
        assert_eq!(config.dialect(), Dialect::Generic);
    }

    #[test]
    fn test_connection_settings_defaults() {
        let settings = ConnectionSettings::default();

        assert_eq!(settings.connection_timeout(), Duration::from_secs(30));
        assert_eq!(settings.operation_timeout(), Duration::from_secs(60));
        assert_eq!(settings.bind_retries, 3);
        assert_eq!(settings.retry_delay(), Duration::from_millis(1000));
    }

    #[test]
    fn test_session_config_from_json_uses_defaults() {
        let json = r#"{
            "uri": "ldaps://dc01.corp.example.com",
            "bind_dn": "CN=svc,DC=corp,DC=example,DC=com",
            "password": "secret",
            "active_directory": true,
            "connection": { "bind_retries": 5 }
        }"#;

        let config: SessionConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.dialect(), Dialect::ActiveDirectory);
        assert_eq!(config.password_type, "plaintext");
        assert_eq!(config.connection.bind_retries, 5);
        assert_eq!(config.connection.connection_timeout_secs, 30);
        assert_eq!(config.max_results, 20_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_session_config_missing_required_field() {
        let json = r#"{ "uri": "ldap://localhost", "bind_dn": "cn=admin" }"#;
        assert!(serde_json::from_str::<SessionConfig>(json).is_err());
    }

    #[test]
    fn test_session_config_validation() {
        assert!(config().validate().is_ok());
        assert!(config().with_tls().validate().is_ok());

        let mut bad_scheme = config();
        bad_scheme.uri = "http://ldap.example.com".to_string();
        assert!(bad_scheme.validate().is_err());

        let mut starttls_on_ldaps = config().with_tls();
        starttls_on_ldaps.uri = "ldaps://ldap.example.com".to_string();
        assert!(starttls_on_ldaps.validate().is_err());

        let mut no_password = config();
        no_password.password.clear();
        let err = no_password.validate().unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIG");

        let mut hashed = config();
        hashed.password_type = "md5".to_string();
        assert!(hashed.validate().is_err());

        assert!(config().with_page_size(0).validate().is_err());
    }

    #[test]
    fn test_session_config_redacted() {
        let config = config();

        let redacted = config.redacted();
        assert_eq!(redacted.password, "***REDACTED***");
        assert_eq!(config.password, "secret");

        let debug = format!("{config:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("***REDACTED***"));
    }

    #[test]
    fn test_session_config_serialization() {
        let config = config().with_base_dn("dc=example,dc=com").with_page_size(500);

        let json = serde_json::to_string(&config).unwrap();
        let parsed: SessionConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.base_dn.as_deref(), Some("dc=example,dc=com"));
        assert_eq!(parsed.page_size, Some(500));
        assert_eq!(parsed.connection, ConnectionSettings::default());
    }
}
