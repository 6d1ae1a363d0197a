//! Active Directory `user` and `group`.
//!
//! Both are keyed by `distinguishedName`, which AD exposes as a searchable
//! attribute. Timestamps such as `pwdLastSet` are FILETIME values and need
//! an entity manager running in the Active Directory dialect.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::directory::Directory;
use crate::entity::{Entity, EntityState};
use crate::error::OrmResult;
use crate::metadata::{EntityMetadata, FieldKind, LinkTarget};
use crate::repository::Repository;

/// `userAccountControl` flag of a disabled account.
pub const UAC_ACCOUNT_DISABLE: i64 = 0x0002;
/// `userAccountControl` flag of a regular user account.
pub const UAC_NORMAL_ACCOUNT: i64 = 0x0200;

const DOMAIN_COMPONENT_PATTERN: &str = r"(?i)\bdc=([^,]+)";

static DOMAIN_COMPONENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(DOMAIN_COMPONENT_PATTERN).expect("valid domain component regex"));

/// DNS domain of a DN: its `dc` components joined with dots, lowercased.
pub(crate) fn domain_of(dn: &str) -> Option<String> {
    let components: Vec<&str> = DOMAIN_COMPONENT
        .captures_iter(dn)
        .filter_map(|cap| cap.get(1).map(|m| m.as_str().trim()))
        .collect();
    (!components.is_empty()).then(|| components.join(".").to_lowercase())
}

#[derive(Debug, Clone, Default)]
pub struct AdUser {
    pub distinguished_name: Option<String>,
    pub cn: Option<String>,
    pub name: Option<String>,
    pub sn: Option<String>,
    pub given_name: Option<String>,
    pub display_name: Option<String>,
    pub sam_account_name: Option<String>,
    pub user_principal_name: Option<String>,
    pub employee_id: Option<String>,
    pub mail: Option<String>,
    pub title: Option<String>,
    pub department: Option<String>,
    pub company: Option<String>,
    pub co: Option<String>,
    pub manager: Option<String>,
    pub proxy_addresses: Vec<String>,
    pub user_account_control: Option<i64>,
    pub account_expires: Option<DateTime<Utc>>,
    pub member_of: Vec<AdGroup>,
    pub pwd_last_set: Option<DateTime<Utc>>,
    pub last_logon_timestamp: Option<DateTime<Utc>>,
    pub when_created: Option<DateTime<Utc>>,
    pub when_changed: Option<DateTime<Utc>>,
    /// `dc` values of the DN, filled on hydration.
    pub domain_components: Vec<String>,
    pub parent: Option<String>,
    state: EntityState,
}

impl AdUser {
    pub fn new(cn: impl Into<String>, sam_account_name: impl Into<String>, parent: impl Into<String>) -> Self {
        Self {
            cn: Some(cn.into()),
            sam_account_name: Some(sam_account_name.into()),
            parent: Some(parent.into()),
            user_account_control: Some(UAC_NORMAL_ACCOUNT),
            ..Default::default()
        }
    }

    /// DNS domain the account lives in, e.g. `corp.example.com`.
    pub fn domain(&self) -> Option<String> {
        if !self.domain_components.is_empty() {
            return Some(self.domain_components.join(".").to_lowercase());
        }
        self.dn()
            .or(self.distinguished_name.as_deref())
            .or(self.parent.as_deref())
            .and_then(domain_of)
    }

    /// `DOMAIN\sAMAccountName` using the first domain label.
    pub fn down_level_logon_name(&self) -> Option<String> {
        let domain = self.domain()?;
        let netbios = domain.split('.').next()?.to_uppercase();
        Some(format!("{netbios}\\{}", self.sam_account_name.as_deref()?))
    }

    pub fn is_disabled(&self) -> bool {
        self.user_account_control
            .is_some_and(|uac| uac & UAC_ACCOUNT_DISABLE != 0)
    }

    pub fn set_disabled(&mut self, disabled: bool) {
        let uac = self.user_account_control.unwrap_or(UAC_NORMAL_ACCOUNT);
        self.user_account_control = Some(if disabled {
            uac | UAC_ACCOUNT_DISABLE
        } else {
            uac & !UAC_ACCOUNT_DISABLE
        });
    }
}

fn ad_user_metadata() -> EntityMetadata {
    EntityMetadata::builder("user")
        .dn_template("CN={{ entity.cn }},{{{ entity.parent }}}")
        .attribute("distinguished_name", "distinguishedName", FieldKind::Text)
        .attribute("cn", "cn", FieldKind::Text)
        .must()
        .attribute("name", "name", FieldKind::Text)
        .attribute("sn", "sn", FieldKind::Text)
        .attribute("given_name", "givenName", FieldKind::Text)
        .attribute("display_name", "displayName", FieldKind::Text)
        .attribute("sam_account_name", "sAMAccountName", FieldKind::Text)
        .attribute("user_principal_name", "userPrincipalName", FieldKind::Text)
        .attribute("employee_id", "employeeId", FieldKind::Text)
        .attribute("mail", "mail", FieldKind::Text)
        .attribute("title", "title", FieldKind::Text)
        .attribute("department", "department", FieldKind::Text)
        .attribute("company", "company", FieldKind::Text)
        .attribute("co", "co", FieldKind::Text)
        .attribute("manager", "manager", FieldKind::Text)
        .attribute("proxy_addresses", "proxyAddresses", FieldKind::TextList)
        .attribute("user_account_control", "userAccountControl", FieldKind::Integer)
        .attribute("account_expires", "accountExpires", FieldKind::DateTime)
        .attribute(
            "member_of",
            "memberOf",
            FieldKind::LinkList(LinkTarget::of::<AdGroup>()),
        )
        .operational()
        .attribute("pwd_last_set", "pwdLastSet", FieldKind::DateTime)
        .operational()
        .attribute("last_logon_timestamp", "lastLogonTimestamp", FieldKind::DateTime)
        .operational()
        .attribute("when_created", "whenCreated", FieldKind::DateTime)
        .operational()
        .attribute("when_changed", "whenChanged", FieldKind::DateTime)
        .operational()
        .unique_identifier("distinguished_name")
        .dn_regex("domain_components", DOMAIN_COMPONENT_PATTERN)
        .parent_link("parent")
        .build()
        .expect("AD user metadata is valid")
}

crate::impl_entity!(
    AdUser,
    ad_user_metadata,
    fields: [
        distinguished_name,
        cn,
        name,
        sn,
        given_name,
        display_name,
        sam_account_name,
        user_principal_name,
        employee_id,
        mail,
        title,
        department,
        company,
        co,
        manager,
        proxy_addresses,
        user_account_control,
        account_expires,
        pwd_last_set,
        last_logon_timestamp,
        when_created,
        when_changed,
        domain_components,
        parent
    ],
    links: [member_of]
);

#[derive(Debug, Clone, Default)]
pub struct AdGroup {
    pub distinguished_name: Option<String>,
    pub cn: Option<String>,
    pub sam_account_name: Option<String>,
    pub description: Option<String>,
    pub mail: Option<String>,
    pub group_type: Option<i64>,
    pub managed_by: Option<String>,
    pub member: Vec<String>,
    pub member_of: Vec<AdGroup>,
    pub when_changed: Option<DateTime<Utc>>,
    pub parent: Option<String>,
    state: EntityState,
}

impl AdGroup {
    pub fn new(cn: impl Into<String>, parent: impl Into<String>) -> Self {
        let cn = cn.into();
        Self {
            sam_account_name: Some(cn.clone()),
            cn: Some(cn),
            parent: Some(parent.into()),
            ..Default::default()
        }
    }
}

fn ad_group_metadata() -> EntityMetadata {
    EntityMetadata::builder("group")
        .dn_template("CN={{ entity.cn }},{{{ entity.parent }}}")
        .attribute("distinguished_name", "distinguishedName", FieldKind::Text)
        .attribute("cn", "cn", FieldKind::Text)
        .must()
        .attribute("sam_account_name", "sAMAccountName", FieldKind::Text)
        .attribute("description", "description", FieldKind::Text)
        .attribute("mail", "mail", FieldKind::Text)
        .attribute("group_type", "groupType", FieldKind::Integer)
        .attribute("managed_by", "managedBy", FieldKind::Text)
        .attribute("member", "member", FieldKind::TextList)
        .attribute(
            "member_of",
            "memberOf",
            FieldKind::LinkList(LinkTarget::of::<AdGroup>()),
        )
        .operational()
        .attribute("when_changed", "whenChanged", FieldKind::DateTime)
        .operational()
        .unique_identifier("distinguished_name")
        .parent_link("parent")
        .build()
        .expect("AD group metadata is valid")
}

crate::impl_entity!(
    AdGroup,
    ad_group_metadata,
    fields: [
        distinguished_name,
        cn,
        sam_account_name,
        description,
        mail,
        group_type,
        managed_by,
        member,
        when_changed,
        parent
    ],
    links: [member_of]
);

impl<D: Directory> Repository<'_, D, AdUser> {
    pub async fn find_by_sam_account_name(&mut self, name: &str) -> OrmResult<Option<AdUser>> {
        self.find_one_by("sam_account_name", name).await
    }

    pub async fn find_by_user_principal_name(&mut self, upn: &str) -> OrmResult<Option<AdUser>> {
        self.find_one_by("user_principal_name", upn).await
    }
}

impl<D: Directory> Repository<'_, D, AdGroup> {
    pub async fn find_by_sam_account_name(&mut self, name: &str) -> OrmResult<Option<AdGroup>> {
        self.find_one_by("sam_account_name", name).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::entry::DirectoryEntry;
    use crate::mapper::EntityMapper;
    use crate::timestamp::Dialect;

    // =========================================================================
    // Domain
    // =========================================================================

    #[test]
    fn test_domain_of() {
        assert_eq!(
            domain_of("CN=John,OU=Users,DC=Corp,DC=Example,DC=com").as_deref(),
            Some("corp.example.com")
        );
        assert_eq!(domain_of("cn=john,ou=users"), None);
    }

    #[test]
    fn test_domain_from_parent() {
        let user = AdUser::new("John", "jdoe", "OU=Users,DC=CORP,DC=LOCAL");
        assert_eq!(user.domain().as_deref(), Some("corp.local"));
        assert_eq!(user.down_level_logon_name().as_deref(), Some("CORP\\jdoe"));
    }

    // =========================================================================
    // Account control
    // =========================================================================

    #[test]
    fn test_disable_flag() {
        let mut user = AdUser::new("John", "jdoe", "DC=corp,DC=local");
        assert!(!user.is_disabled());
        user.set_disabled(true);
        assert_eq!(user.user_account_control, Some(0x202));
        assert!(user.is_disabled());
        user.set_disabled(false);
        assert_eq!(user.user_account_control, Some(0x200));
    }

    // =========================================================================
    // Hydration
    // =========================================================================

    #[test]
    fn test_hydrate_ad_user() {
        let dn = "CN=John Doe,OU=Users,DC=corp,DC=example,DC=com";
        let entry = DirectoryEntry::new(dn)
            .with("objectClass", ["top", "person", "organizationalPerson", "user"])
            .with("cn", ["John Doe"])
            .with("distinguishedName", [dn])
            .with("sAMAccountName", ["jdoe"])
            .with("userAccountControl", ["514"])
            .with("pwdLastSet", ["131453992854800000"])
            .with("whenChanged", ["20170725024805.0Z"])
            .with(
                "memberOf",
                [
                    "CN=Admins,OU=Groups,DC=corp,DC=example,DC=com",
                    "CN=Staff,OU=Groups,DC=corp,DC=example,DC=com",
                ],
            );
        let mapper = EntityMapper::with_default_renderer(Dialect::ActiveDirectory);
        let user = AdUser::from_record(mapper.hydrate(AdUser::metadata(), &entry).unwrap()).unwrap();

        assert_eq!(user.domain().as_deref(), Some("corp.example.com"));
        assert_eq!(user.domain_components, vec!["corp", "example", "com"]);
        assert!(user.is_disabled());
        assert_eq!(user.member_of.len(), 2);
        assert_eq!(user.member_of[1].dn(), Some("CN=Staff,OU=Groups,DC=corp,DC=example,DC=com"));
        assert_eq!(
            user.when_changed,
            Some(Utc.with_ymd_and_hms(2017, 7, 25, 2, 48, 5).unwrap())
        );
        let pwd_last_set = user.pwd_last_set.unwrap();
        assert_eq!(pwd_last_set.timestamp(), 1_500_925_685);
        assert_eq!(user.parent.as_deref(), Some("OU=Users,DC=corp,DC=example,DC=com"));
    }

    #[test]
    fn test_operational_attributes() {
        let metadata = AdUser::metadata();
        let operational: Vec<_> = metadata.operational_attributes().collect();
        assert!(operational.contains(&"pwdLastSet"));
        assert!(operational.contains(&"whenChanged"));
        assert!(operational.contains(&"memberOf"));
    }
}
