//! Entity manager against an Active Directory flavoured directory.

mod common;

use chrono::{Duration, TimeZone, Utc};
use ldap_orm::entities::{AdGroup, AdUser};
use ldap_orm::prelude::*;
use ldap_orm::timestamp::encode_ad_timestamp;

const DOMAIN: &str = "DC=corp,DC=example,DC=com";
const USERS: &str = "OU=Users,DC=corp,DC=example,DC=com";
const JDOE: &str = "CN=John Doe,OU=Users,DC=corp,DC=example,DC=com";
const ADMINS: &str = "CN=Admins,OU=Users,DC=corp,DC=example,DC=com";

fn directory() -> InMemoryDirectory {
    InMemoryDirectory::new(Dialect::ActiveDirectory)
        .with_entry(DirectoryEntry::new(DOMAIN).with("objectClass", ["top", "domainDNS"]))
        .with_entry(
            DirectoryEntry::new(USERS)
                .with("objectClass", ["top", "organizationalUnit"])
                .with("ou", ["Users"]),
        )
}

fn jdoe_entry() -> DirectoryEntry {
    DirectoryEntry::new(JDOE)
        .with("objectClass", ["top", "person", "organizationalPerson", "user"])
        .with("cn", ["John Doe"])
        .with("distinguishedName", [JDOE])
        .with("sAMAccountName", ["jdoe"])
        .with("userPrincipalName", ["jdoe@corp.example.com"])
        .with("userAccountControl", ["512"])
        .with("pwdLastSet", ["131453992854800000"])
        .with("whenChanged", ["20170725024805.0Z"])
        .with("memberOf", [ADMINS])
}

fn manager(directory: InMemoryDirectory) -> EntityManager<InMemoryDirectory> {
    common::init_test_logging();
    EntityManager::new(directory).with_search_base(DOMAIN)
}

#[tokio::test]
async fn test_filetime_is_decoded() {
    let mut dir = directory();
    dir.insert(jdoe_entry());
    let mut manager = manager(dir);

    let user = manager
        .repository::<AdUser>()
        .find_by_sam_account_name("jdoe")
        .await
        .unwrap()
        .unwrap();

    let expected = Utc.with_ymd_and_hms(2017, 7, 24, 19, 48, 5).unwrap() + Duration::milliseconds(480);
    assert_eq!(user.pwd_last_set, Some(expected));
    assert_eq!(
        user.when_changed,
        Some(Utc.with_ymd_and_hms(2017, 7, 25, 2, 48, 5).unwrap())
    );
    assert_eq!(user.domain().as_deref(), Some("corp.example.com"));
    assert_eq!(user.distinguished_name.as_deref(), Some(JDOE));
}

#[tokio::test]
async fn test_unresolvable_group_stays_stub() {
    let mut dir = directory();
    dir.insert(jdoe_entry());
    let mut manager = manager(dir);

    let user = manager
        .repository::<AdUser>()
        .find_by_user_principal_name("jdoe@corp.example.com")
        .await
        .unwrap()
        .unwrap();

    assert_eq!(user.member_of.len(), 1);
    assert_eq!(user.member_of[0].dn(), Some(ADMINS));
    assert_eq!(user.member_of[0].cn, None);
}

#[tokio::test]
async fn test_create_then_update_user() {
    let mut manager = manager(directory());
    let expires = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();

    let mut user = AdUser::new("John Doe", "jdoe", USERS);
    user.account_expires = Some(expires);
    let outcome = manager.persist(&mut user, PersistOptions::new()).await.unwrap();
    assert_eq!(outcome, PersistOutcome::Created);

    let stored = manager.directory().get(JDOE).unwrap();
    assert_eq!(stored.texts("objectClass"), vec!["top", "user"]);
    assert_eq!(
        stored.first_text("accountExpires"),
        Some(encode_ad_timestamp(&expires).as_str())
    );
    assert_eq!(stored.first_text("distinguishedName"), Some(JDOE));

    user.title = Some("Engineer".to_string());
    let outcome = manager.persist(&mut user, PersistOptions::new()).await.unwrap();
    assert_eq!(
        outcome,
        PersistOutcome::Updated {
            modified: vec!["title".to_string()],
            deleted: vec![],
        }
    );
}

#[tokio::test]
async fn test_existence_check_by_distinguished_name() {
    let mut dir = directory();
    dir.insert(jdoe_entry());
    let mut manager = manager(dir);

    let probe = AdUser::new("John Doe", "jdoe", USERS);
    let found = manager.entity_exists(&probe).await.unwrap().unwrap();
    assert_eq!(found.sam_account_name.as_deref(), Some("jdoe"));

    let probe = AdUser::new("Jane Roe", "jroe", USERS);
    assert!(manager.entity_exists(&probe).await.unwrap().is_none());
}

#[tokio::test]
async fn test_group_membership_round_trip() {
    let mut dir = directory();
    dir.insert(jdoe_entry());
    let mut manager = manager(dir);

    let mut admins = AdGroup::new("Admins", USERS);
    admins.member = vec![JDOE.to_string()];
    manager.persist(&mut admins, PersistOptions::new()).await.unwrap();

    manager.group_add(ADMINS, JDOE).await.unwrap();
    manager.group_remove(ADMINS, JDOE).await.unwrap();
    // Server answers unwillingToPerform for a member that is not there.
    manager.group_remove(ADMINS, JDOE).await.unwrap();

    assert!(manager.directory().get(ADMINS).unwrap().texts("member").is_empty());
}
