//! `person` and `inetOrgPerson`.

use chrono::{DateTime, Utc};

use crate::directory::Directory;
use crate::entities::GroupOfNames;
use crate::entity::EntityState;
use crate::error::OrmResult;
use crate::metadata::{EntityMetadata, FieldKind, LinkTarget};
use crate::repository::Repository;

/// RFC 4519 `person`.
#[derive(Debug, Clone, Default)]
pub struct Person {
    pub cn: Option<String>,
    pub sn: Option<String>,
    pub description: Option<String>,
    pub see_also: Vec<String>,
    pub telephone_number: Option<String>,
    /// Tagged values such as `{CLEAR}secret`; only the clear value is written.
    pub user_password: Vec<String>,
    pub parent: Option<String>,
    state: EntityState,
}

impl Person {
    pub fn new(cn: impl Into<String>, sn: impl Into<String>, parent: impl Into<String>) -> Self {
        Self {
            cn: Some(cn.into()),
            sn: Some(sn.into()),
            parent: Some(parent.into()),
            ..Default::default()
        }
    }
}

fn person_metadata() -> EntityMetadata {
    EntityMetadata::builder("person")
        .dn_template("cn={{ entity.cn }},{{{ entity.parent }}}")
        .attribute("cn", "cn", FieldKind::Text)
        .must()
        .attribute("sn", "sn", FieldKind::Text)
        .must()
        .attribute("description", "description", FieldKind::Text)
        .attribute("see_also", "seeAlso", FieldKind::TextList)
        .attribute("telephone_number", "telephoneNumber", FieldKind::Text)
        .attribute("user_password", "userPassword", FieldKind::TextList)
        .unique_identifier("cn")
        .parent_link("parent")
        .build()
        .expect("person metadata is valid")
}

crate::impl_entity!(
    Person,
    person_metadata,
    fields: [cn, sn, description, see_also, telephone_number, user_password, parent]
);

/// RFC 2798 `inetOrgPerson`, keyed by `uid`.
#[derive(Debug, Clone, Default)]
pub struct InetOrgPerson {
    pub uid: Option<String>,
    pub cn: Option<String>,
    pub sn: Option<String>,
    pub given_name: Option<String>,
    pub display_name: Option<String>,
    pub initials: Option<String>,
    pub mail: Vec<String>,
    pub telephone_number: Option<String>,
    pub mobile: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub employee_number: Option<String>,
    pub employee_type: Option<String>,
    pub department_number: Vec<String>,
    pub manager: Vec<String>,
    pub preferred_language: Option<String>,
    pub jpeg_photo: Option<Vec<u8>>,
    pub uid_number: Option<i64>,
    pub user_password: Vec<String>,
    pub member_of: Vec<GroupOfNames>,
    pub create_timestamp: Option<DateTime<Utc>>,
    pub modify_timestamp: Option<DateTime<Utc>>,
    pub parent: Option<String>,
    state: EntityState,
}

impl InetOrgPerson {
    pub fn new(
        uid: impl Into<String>,
        cn: impl Into<String>,
        sn: impl Into<String>,
        parent: impl Into<String>,
    ) -> Self {
        Self {
            uid: Some(uid.into()),
            cn: Some(cn.into()),
            sn: Some(sn.into()),
            parent: Some(parent.into()),
            ..Default::default()
        }
    }

    /// DNs of the groups this person belongs to.
    pub fn group_dns(&self) -> Vec<&str> {
        self.member_of
            .iter()
            .filter_map(|group| crate::entity::Entity::dn(group))
            .collect()
    }
}

fn inet_org_person_metadata() -> EntityMetadata {
    EntityMetadata::builder("inetOrgPerson")
        .dn_template("uid={{ entity.uid }},{{{ entity.parent }}}")
        .attribute("uid", "uid", FieldKind::Text)
        .attribute("cn", "cn", FieldKind::Text)
        .must()
        .attribute("sn", "sn", FieldKind::Text)
        .must()
        .attribute("given_name", "givenName", FieldKind::Text)
        .attribute("display_name", "displayName", FieldKind::Text)
        .attribute("initials", "initials", FieldKind::Text)
        .attribute("mail", "mail", FieldKind::TextList)
        .attribute("telephone_number", "telephoneNumber", FieldKind::Text)
        .attribute("mobile", "mobile", FieldKind::Text)
        .attribute("title", "title", FieldKind::Text)
        .attribute("description", "description", FieldKind::Text)
        .attribute("employee_number", "employeeNumber", FieldKind::Text)
        .attribute("employee_type", "employeeType", FieldKind::Text)
        .attribute("department_number", "departmentNumber", FieldKind::TextList)
        .attribute("manager", "manager", FieldKind::TextList)
        .attribute("preferred_language", "preferredLanguage", FieldKind::Text)
        .attribute("jpeg_photo", "jpegPhoto", FieldKind::Binary)
        .attribute("uid_number", "uidNumber", FieldKind::Integer)
        .attribute("user_password", "userPassword", FieldKind::TextList)
        .attribute(
            "member_of",
            "memberOf",
            FieldKind::LinkList(LinkTarget::of::<GroupOfNames>()),
        )
        .operational()
        .attribute("create_timestamp", "createTimestamp", FieldKind::DateTime)
        .operational()
        .attribute("modify_timestamp", "modifyTimestamp", FieldKind::DateTime)
        .operational()
        .unique_identifier("uid")
        .parent_link("parent")
        .build()
        .expect("inetOrgPerson metadata is valid")
}

crate::impl_entity!(
    InetOrgPerson,
    inet_org_person_metadata,
    fields: [
        uid,
        cn,
        sn,
        given_name,
        display_name,
        initials,
        mail,
        telephone_number,
        mobile,
        title,
        description,
        employee_number,
        employee_type,
        department_number,
        manager,
        preferred_language,
        jpeg_photo,
        uid_number,
        user_password,
        create_timestamp,
        modify_timestamp,
        parent
    ],
    links: [member_of]
);

impl<D: Directory> Repository<'_, D, Person> {
    pub async fn find_by_cn(&mut self, cn: &str) -> OrmResult<Option<Person>> {
        self.find_one_by("cn", cn).await
    }
}

impl<D: Directory> Repository<'_, D, InetOrgPerson> {
    pub async fn find_by_uid(&mut self, uid: &str) -> OrmResult<Option<InetOrgPerson>> {
        self.find_one_by("uid", uid).await
    }

    pub async fn find_by_mail(&mut self, mail: &str) -> OrmResult<Vec<InetOrgPerson>> {
        self.find_by("mail", mail).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;
    use crate::mapper::EntityMapper;
    use crate::timestamp::Dialect;

    #[test]
    fn test_dn_from_parent() {
        let person = InetOrgPerson::new("jdoe", "John Doe", "Doe", "ou=people,dc=example,dc=com");
        let mapper = EntityMapper::with_default_renderer(Dialect::Generic);
        assert_eq!(
            mapper.record_dn(&person.to_record()).unwrap(),
            "uid=jdoe,ou=people,dc=example,dc=com"
        );
    }

    #[test]
    fn test_dn_escapes_rdn_value() {
        let person = Person::new("Doe, John", "Doe", "dc=example,dc=com");
        let mapper = EntityMapper::with_default_renderer(Dialect::Generic);
        assert_eq!(
            mapper.record_dn(&person.to_record()).unwrap(),
            "cn=Doe\\, John,dc=example,dc=com"
        );
    }

    #[test]
    fn test_metadata() {
        let metadata = InetOrgPerson::metadata();
        assert_eq!(metadata.object_class(), "inetOrgPerson");
        assert_eq!(metadata.unique_identifier().unwrap().attribute, "uid");
        let must: Vec<_> = metadata.must_fields().map(|f| f.name.as_str()).collect();
        assert_eq!(must, vec!["cn", "sn"]);
        assert!(metadata
            .operational_attributes()
            .any(|a| a == "modifyTimestamp"));
    }
}
