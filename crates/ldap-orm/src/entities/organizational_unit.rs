use crate::directory::Directory;
use crate::entity::EntityState;
use crate::error::OrmResult;
use crate::metadata::{EntityMetadata, FieldKind};
use crate::repository::Repository;

#[derive(Debug, Clone, Default)]
pub struct OrganizationalUnit {
    pub ou: Option<String>,
    pub description: Option<String>,
    pub business_category: Vec<String>,
    pub telephone_number: Option<String>,
    pub street: Option<String>,
    pub postal_code: Option<String>,
    pub l: Option<String>,
    pub st: Option<String>,
    pub see_also: Vec<String>,
    pub parent: Option<String>,
    state: EntityState,
}

impl OrganizationalUnit {
    pub fn new(ou: impl Into<String>, parent: impl Into<String>) -> Self {
        Self {
            ou: Some(ou.into()),
            parent: Some(parent.into()),
            ..Default::default()
        }
    }
}

fn organizational_unit_metadata() -> EntityMetadata {
    EntityMetadata::builder("organizationalUnit")
        .dn_template("ou={{ entity.ou }},{{{ entity.parent }}}")
        .attribute("ou", "ou", FieldKind::Text)
        .must()
        .attribute("description", "description", FieldKind::Text)
        .attribute("business_category", "businessCategory", FieldKind::TextList)
        .attribute("telephone_number", "telephoneNumber", FieldKind::Text)
        .attribute("street", "street", FieldKind::Text)
        .attribute("postal_code", "postalCode", FieldKind::Text)
        .attribute("l", "l", FieldKind::Text)
        .attribute("st", "st", FieldKind::Text)
        .attribute("see_also", "seeAlso", FieldKind::TextList)
        .unique_identifier("ou")
        .parent_link("parent")
        .build()
        .expect("organizationalUnit metadata is valid")
}

crate::impl_entity!(
    OrganizationalUnit,
    organizational_unit_metadata,
    fields: [
        ou,
        description,
        business_category,
        telephone_number,
        street,
        postal_code,
        l,
        st,
        see_also,
        parent
    ]
);

impl<D: Directory> Repository<'_, D, OrganizationalUnit> {
    pub async fn find_by_ou(&mut self, ou: &str) -> OrmResult<Option<OrganizationalUnit>> {
        self.find_one_by("ou", ou).await
    }
}
