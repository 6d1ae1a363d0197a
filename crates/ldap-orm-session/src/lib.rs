//! # LDAP ORM session
//!
//! [`LdapSession`] implements the `ldap-orm` [`Directory`](ldap_orm::directory::Directory)
//! trait over an [ldap3](https://docs.rs/ldap3) connection.
//!
//! ## Features
//!
//! - Lazy connect with bind retries and optional StartTLS
//! - Simple paged results with caller-held cookies
//! - Optional one-hop referral chasing
//! - Active Directory timestamp dialect selected from configuration
//!
//! ## Example
//!
//! ```ignore
//! use ldap_orm::entities::InetOrgPerson;
//! use ldap_orm_session::{LdapSession, SessionConfig};
//!
//! let config = SessionConfig::new("ldap://ldap.example.com", "cn=admin,dc=example,dc=com", "secret")
//!     .with_tls()
//!     .with_base_dn("dc=example,dc=com");
//! let mut manager = LdapSession::connect_with(config).await?.into_manager();
//!
//! let person = manager.repository::<InetOrgPerson>().find_by_uid("jdoe").await?;
//! ```

pub mod config;
pub mod session;

pub use config::{ConnectionSettings, SessionConfig};
pub use session::{LdapSession, SessionState};
