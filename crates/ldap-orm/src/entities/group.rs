use crate::directory::Directory;
use crate::entity::EntityState;
use crate::error::OrmResult;
use crate::filter::FilterValue;
use crate::metadata::{EntityMetadata, FieldKind};
use crate::repository::Repository;

/// RFC 4519 `groupOfNames`. The schema requires at least one member.
#[derive(Debug, Clone, Default)]
pub struct GroupOfNames {
    pub cn: Option<String>,
    pub description: Option<String>,
    pub member: Vec<String>,
    pub owner: Vec<String>,
    pub business_category: Vec<String>,
    pub o: Option<String>,
    pub ou: Option<String>,
    pub see_also: Vec<String>,
    pub parent: Option<String>,
    state: EntityState,
}

impl GroupOfNames {
    pub fn new(cn: impl Into<String>, parent: impl Into<String>) -> Self {
        Self {
            cn: Some(cn.into()),
            parent: Some(parent.into()),
            ..Default::default()
        }
    }

    /// Case-insensitive membership test on the loaded member list.
    pub fn has_member(&self, dn: &str) -> bool {
        self.member.iter().any(|m| m.eq_ignore_ascii_case(dn))
    }
}

fn group_of_names_metadata() -> EntityMetadata {
    EntityMetadata::builder("groupOfNames")
        .dn_template("cn={{ entity.cn }},{{{ entity.parent }}}")
        .attribute("cn", "cn", FieldKind::Text)
        .must()
        .attribute("description", "description", FieldKind::Text)
        .attribute("member", "member", FieldKind::TextList)
        .must()
        .attribute("owner", "owner", FieldKind::TextList)
        .attribute("business_category", "businessCategory", FieldKind::TextList)
        .attribute("o", "o", FieldKind::Text)
        .attribute("ou", "ou", FieldKind::Text)
        .attribute("see_also", "seeAlso", FieldKind::TextList)
        .unique_identifier("cn")
        .parent_link("parent")
        .build()
        .expect("groupOfNames metadata is valid")
}

crate::impl_entity!(
    GroupOfNames,
    group_of_names_metadata,
    fields: [cn, description, member, owner, business_category, o, ou, see_also, parent]
);

impl<D: Directory> Repository<'_, D, GroupOfNames> {
    pub async fn find_by_cn(&mut self, cn: &str) -> OrmResult<Option<GroupOfNames>> {
        self.find_one_by("cn", cn).await
    }

    /// Groups listing `dn` as a member.
    pub async fn find_by_member(&mut self, dn: &str) -> OrmResult<Vec<GroupOfNames>> {
        self.find_by("member", FilterValue::from(dn)).await
    }
}
