//! # LDAP ORM
//!
//! Maps typed Rust structs onto LDAP directory entries.
//!
//! The crate is transport-agnostic: every directory call goes through the
//! [`Directory`](directory::Directory) trait. `ldap-orm-session` implements it
//! over a live connection. The `test-util` feature adds `memory::InMemoryDirectory`
//! for tests.
//!
//! ## Features
//!
//! - Declarative field-to-attribute metadata with MUST, operational,
//!   sequence and link fields
//! - RFC 4515 filter building from expressions or JSON trees
//! - GeneralizedTime and Active Directory FILETIME timestamps
//! - Upserts through a minimal change set
//! - Recursive deletes, renames, group membership and integer sequences
//! - Paged retrieval with linked-entry resolution
//!
//! ## Example
//!
//! ```ignore
//! use ldap_orm::prelude::*;
//! use ldap_orm::entities::InetOrgPerson;
//!
//! let mut manager = EntityManager::new(directory).with_search_base("dc=example,dc=com");
//!
//! let mut person = InetOrgPerson::new("jdoe", "John Doe", "Doe", "ou=people,dc=example,dc=com");
//! person.mail = vec!["jdoe@example.com".to_string()];
//! manager.persist(&mut person, PersistOptions::new()).await?;
//!
//! let found = manager.repository::<InetOrgPerson>().find_by_uid("jdoe").await?;
//! ```

pub mod changeset;
pub mod directory;
pub mod entities;
pub mod entity;
pub mod entry;
pub mod error;
pub mod filter;
pub mod manager;
pub mod mapper;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod metadata;
pub mod repository;
pub mod template;
pub mod timestamp;
pub mod value;

pub use error::{OrmError, OrmResult};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::changeset::{ChangeOperandSet, ChangeSetEngine};
    pub use crate::directory::{
        Directory, Modification, PageControl, SearchPage, SearchRequest, SearchScope,
    };
    pub use crate::entity::{Entity, EntityRecord, EntityState};
    pub use crate::entry::{DirectoryEntry, EntryValue};
    pub use crate::error::{OrmError, OrmResult};
    pub use crate::filter::{Comparison, FilterExpression, FilterValue};
    pub use crate::impl_entity;
    pub use crate::manager::{
        EntityManager, PersistOptions, PersistOutcome, RetrieveOptions, SearchFilter,
    };
    pub use crate::mapper::EntityMapper;
    #[cfg(any(test, feature = "test-util"))]
    pub use crate::memory::InMemoryDirectory;
    pub use crate::metadata::{EntityMetadata, FieldKind, LinkTarget};
    pub use crate::repository::Repository;
    pub use crate::template::{HandlebarsRenderer, TemplateRenderer};
    pub use crate::timestamp::Dialect;
    pub use crate::value::FieldValue;
}
