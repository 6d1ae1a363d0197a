//! Shared fixtures for the entity manager integration tests.
//!
//! Every test runs against an in-memory directory seeded with a small
//! `dc=example,dc=com` tree.

#![allow(dead_code)]

use std::sync::Once;

use ldap_orm::entity::EntityState;
use ldap_orm::entry::DirectoryEntry;
use ldap_orm::manager::EntityManager;
use ldap_orm::memory::InMemoryDirectory;
use ldap_orm::metadata::{EntityMetadata, FieldKind};
use ldap_orm::timestamp::Dialect;

pub const BASE: &str = "dc=example,dc=com";
pub const PEOPLE: &str = "ou=people,dc=example,dc=com";
pub const GROUPS: &str = "ou=groups,dc=example,dc=com";
pub const SEQUENCES: &str = "ou=sequences,dc=example,dc=com";
pub const UID_SEQUENCE: &str = "cn=uidNumber,ou=sequences,dc=example,dc=com";

static INIT: Once = Once::new();

/// Route `tracing` output to the test harness. Set `RUST_LOG` to see it.
pub fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init()
            .ok();
    });
}

fn container(dn: &str, ou: &str) -> DirectoryEntry {
    DirectoryEntry::new(dn)
        .with("objectClass", ["top", "organizationalUnit"])
        .with("ou", [ou])
}

/// Base tree with people, groups and a `uidNumber` sequence starting at 1000.
pub fn directory() -> InMemoryDirectory {
    InMemoryDirectory::new(Dialect::Generic)
        .with_entry(
            DirectoryEntry::new(BASE)
                .with("objectClass", ["top", "domain"])
                .with("dc", ["example"]),
        )
        .with_entry(container(PEOPLE, "people"))
        .with_entry(container(GROUPS, "groups"))
        .with_entry(container(SEQUENCES, "sequences"))
        .with_entry(
            DirectoryEntry::new(UID_SEQUENCE)
                .with("objectClass", ["top", "integerSequence"])
                .with("cn", ["uidNumber"])
                .with("nextValue", ["1000"]),
        )
}

pub fn person_entry(uid: &str, cn: &str, sn: &str) -> DirectoryEntry {
    DirectoryEntry::new(format!("uid={uid},{PEOPLE}"))
        .with("objectClass", ["top", "person", "organizationalPerson", "inetOrgPerson"])
        .with("uid", [uid])
        .with("cn", [cn])
        .with("sn", [sn])
}

pub fn group_entry(cn: &str, members: &[&str]) -> DirectoryEntry {
    DirectoryEntry::new(format!("cn={cn},{GROUPS}"))
        .with("objectClass", ["top", "groupOfNames"])
        .with("cn", [cn])
        .with("member", members.iter().copied())
}

pub fn manager(directory: InMemoryDirectory) -> EntityManager<InMemoryDirectory> {
    init_test_logging();
    EntityManager::new(directory).with_search_base(BASE)
}

/// POSIX account whose `uidNumber` comes from a sequence.
#[derive(Debug, Clone, Default)]
pub struct PosixAccount {
    pub uid: Option<String>,
    pub cn: Option<String>,
    pub uid_number: Option<i64>,
    pub home_directory: Option<String>,
    pub state: EntityState,
}

fn posix_account_metadata() -> EntityMetadata {
    EntityMetadata::builder("posixAccount")
        .dn_template("uid={{ entity.uid }},ou=people,dc=example,dc=com")
        .search_base("ou=people,dc=example,dc=com")
        .attribute("uid", "uid", FieldKind::Text)
        .must()
        .attribute("cn", "cn", FieldKind::Text)
        .must()
        .attribute("uid_number", "uidNumber", FieldKind::Integer)
        .must()
        .sequence("cn=uidNumber,ou=sequences,dc=example,dc=com")
        .attribute("home_directory", "homeDirectory", FieldKind::Text)
        .unique_identifier("uid")
        .build()
        .expect("posixAccount metadata")
}

ldap_orm::impl_entity!(
    PosixAccount,
    posix_account_metadata,
    fields: [uid, cn, uid_number, home_directory]
);

impl PosixAccount {
    pub fn new(uid: &str) -> Self {
        Self {
            uid: Some(uid.to_string()),
            cn: Some(uid.to_string()),
            home_directory: Some(format!("/home/{uid}")),
            ..Default::default()
        }
    }
}
