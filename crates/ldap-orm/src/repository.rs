//! Repository facade
//!
//! Query sugar over [`EntityManager::retrieve`]. Lookups take field names
//! and translate them to attributes; typed shortcuts such as
//! `find_by_uid` live next to the stock entity types.

use std::marker::PhantomData;

use serde_json::Value;

use crate::directory::Directory;
use crate::entity::Entity;
use crate::error::{OrmError, OrmResult};
use crate::filter::{FilterExpression, FilterValue};
use crate::manager::{EntityManager, RetrieveOptions};

/// Queries for one entity type.
pub struct Repository<'a, D: Directory, T: Entity> {
    manager: &'a mut EntityManager<D>,
    /// Fields or attributes to fetch; empty fetches every mapped attribute.
    attributes: Vec<String>,
    _entity: PhantomData<fn() -> T>,
}

impl<'a, D: Directory, T: Entity> Repository<'a, D, T> {
    pub fn new(manager: &'a mut EntityManager<D>) -> Self {
        Self {
            manager,
            attributes: Vec::new(),
            _entity: PhantomData,
        }
    }

    /// Restrict the finders to these fields. Attribute names are accepted
    /// as well; MUST attributes are always fetched.
    pub fn with_attributes<S: Into<String>>(mut self, attributes: impl IntoIterator<Item = S>) -> Self {
        self.attributes = attributes.into_iter().map(Into::into).collect();
        self
    }

    fn options(&self) -> OrmResult<RetrieveOptions> {
        let attributes = self
            .attributes
            .iter()
            .map(|name| Self::attribute_for(name.as_str()))
            .collect::<OrmResult<Vec<_>>>()?;
        Ok(RetrieveOptions::new().with_attributes(attributes))
    }

    /// Attribute mapped to `field`. Attribute names are accepted as well.
    pub fn attribute_for(field: &str) -> OrmResult<String> {
        let metadata = T::metadata();
        metadata
            .attribute_for(field)
            .or_else(|| {
                metadata
                    .field_for_attribute(field)
                    .map(|f| f.attribute.as_str())
            })
            .map(str::to_string)
            .ok_or_else(|| OrmError::UnknownField {
                object_class: metadata.object_class().to_string(),
                field: field.to_string(),
            })
    }

    /// Retrieval with explicit options.
    pub async fn find(&mut self, options: RetrieveOptions) -> OrmResult<Vec<T>> {
        self.manager.retrieve(options).await
    }

    /// Every entity of this type below the search base.
    pub async fn find_all(&mut self) -> OrmResult<Vec<T>> {
        let options = self.options()?;
        self.find(options).await
    }

    /// Entities whose `field` equals `value`. The field may carry a
    /// comparison suffix, e.g. `"uid_number>="`.
    pub async fn find_by(&mut self, field: &str, value: impl Into<FilterValue>) -> OrmResult<Vec<T>> {
        let expression = Self::comparison(field, value.into())?;
        self.find_by_filter(expression).await
    }

    /// First entity whose `field` equals `value`.
    pub async fn find_one_by(
        &mut self,
        field: &str,
        value: impl Into<FilterValue>,
    ) -> OrmResult<Option<T>> {
        let expression = Self::comparison(field, value.into())?;
        let options = self.options()?.with_filter(expression).with_max(1);
        Ok(self.find(options).await?.into_iter().next())
    }

    /// Entities matching an associative filter tree keyed by attribute name.
    pub async fn find_by_complex(&mut self, tree: &Value) -> OrmResult<Vec<T>> {
        let expression = FilterExpression::from_json(tree)?;
        self.find_by_filter(expression).await
    }

    pub async fn find_by_filter(&mut self, expression: FilterExpression) -> OrmResult<Vec<T>> {
        let options = self.options()?.with_filter(expression);
        self.find(options).await
    }

    fn comparison(field: &str, value: FilterValue) -> OrmResult<FilterExpression> {
        let (name, suffix) = crate::filter::parse_attribute_token(field);
        Ok(FilterExpression::Compare {
            attribute: Self::attribute_for(name)?,
            comparison: suffix.comparison(),
            values: vec![value],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityState;
    use crate::entry::DirectoryEntry;
    use crate::memory::InMemoryDirectory;
    use crate::metadata::{EntityMetadata, FieldKind};
    use crate::timestamp::Dialect;

    #[derive(Debug, Clone, Default)]
    struct Host {
        cn: Option<String>,
        ip: Option<String>,
        rank: Option<i64>,
        state: EntityState,
    }

    fn host_metadata() -> EntityMetadata {
        EntityMetadata::builder("ipHost")
            .search_base("ou=hosts,dc=example,dc=com")
            .dn_template("cn={{ entity.cn }},ou=hosts,dc=example,dc=com")
            .attribute("cn", "cn", FieldKind::Text)
            .attribute("ip", "ipHostNumber", FieldKind::Text)
            .attribute("rank", "rank", FieldKind::Integer)
            .unique_identifier("cn")
            .build()
            .expect("host metadata")
    }

    crate::impl_entity!(Host, host_metadata, fields: [cn, ip, rank]);

    fn manager() -> EntityManager<InMemoryDirectory> {
        let mut dir = InMemoryDirectory::new(Dialect::Generic).with_entry(
            DirectoryEntry::new("ou=hosts,dc=example,dc=com").with("objectClass", ["organizationalUnit"]),
        );
        for (cn, ip, rank) in [("web", "10.0.0.1", "1"), ("db", "10.0.0.2", "5"), ("cache", "10.0.0.3", "9")] {
            dir.insert(
                DirectoryEntry::new(format!("cn={cn},ou=hosts,dc=example,dc=com"))
                    .with("objectClass", ["top", "ipHost"])
                    .with("cn", [cn])
                    .with("ipHostNumber", [ip])
                    .with("rank", [rank]),
            );
        }
        EntityManager::new(dir)
    }

    #[tokio::test]
    async fn test_find_all() {
        let mut manager = manager();
        let hosts: Vec<Host> = manager.repository::<Host>().find_all().await.unwrap();
        assert_eq!(hosts.len(), 3);
    }

    #[tokio::test]
    async fn test_find_by_field_name() {
        let mut manager = manager();
        let hosts = manager
            .repository::<Host>()
            .find_by("ip", "10.0.0.2")
            .await
            .unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].cn.as_deref(), Some("db"));
    }

    #[tokio::test]
    async fn test_find_by_with_suffix() {
        let mut manager = manager();
        let hosts = manager
            .repository::<Host>()
            .find_by("rank>", 5i64)
            .await
            .unwrap();
        assert_eq!(hosts.len(), 2);
    }

    #[tokio::test]
    async fn test_find_one_by() {
        let mut manager = manager();
        let mut repo = manager.repository::<Host>();
        let host = repo.find_one_by("cn", "cache").await.unwrap().unwrap();
        assert_eq!(host.rank, Some(9));
        assert!(repo.find_one_by("cn", "nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_field() {
        let mut manager = manager();
        let err = manager
            .repository::<Host>()
            .find_by("owner", "x")
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "UNKNOWN_FIELD");
    }

    #[tokio::test]
    async fn test_find_by_complex() {
        let mut manager = manager();
        let tree = serde_json::json!({ "|": { "cn": ["web", "cache"] } });
        let hosts = manager
            .repository::<Host>()
            .find_by_complex(&tree)
            .await
            .unwrap();
        assert_eq!(hosts.len(), 2);

        let err = manager
            .repository::<Host>()
            .find_by_complex(&serde_json::json!("cn=web"))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_FILTER");
    }

    #[tokio::test]
    async fn test_with_attributes_projects_finders() {
        let mut manager = manager();
        let hosts = manager
            .repository::<Host>()
            .with_attributes(["cn", "rank"])
            .find_by("cn", "db")
            .await
            .unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].cn.as_deref(), Some("db"));
        assert_eq!(hosts[0].rank, Some(5));
        assert_eq!(hosts[0].ip, None);

        let host = manager
            .repository::<Host>()
            .with_attributes(["ipHostNumber"])
            .find_one_by("cn", "web")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(host.ip.as_deref(), Some("10.0.0.1"));
        assert_eq!(host.cn, None);

        let err = manager
            .repository::<Host>()
            .with_attributes(["owner"])
            .find_all()
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "UNKNOWN_FIELD");
    }
}
