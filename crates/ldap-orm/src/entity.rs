//! Entities
//!
//! An entity is a plain struct with one Rust field per mapped attribute and
//! an [`EntityState`] holding its DN and retrieval bookkeeping. The
//! [`impl_entity!`](crate::impl_entity) macro generates the [`Entity`] impl
//! that exposes the fields by name to the mapper.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::OrmResult;
use crate::metadata::EntityMetadata;
use crate::value::FieldValue;

/// Per-instance bookkeeping shared by every entity type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityState {
    dn: Option<String>,
    not_retrieved: BTreeSet<String>,
    hydrated: bool,
}

impl EntityState {
    pub fn dn(&self) -> Option<&str> {
        self.dn.as_deref()
    }

    pub fn set_dn(&mut self, dn: impl Into<String>) {
        self.dn = Some(dn.into());
    }

    /// Attributes (lowercase) that were absent or not requested when the
    /// entity was retrieved.
    pub fn not_retrieved(&self) -> &BTreeSet<String> {
        &self.not_retrieved
    }

    pub fn is_not_retrieved(&self, attribute: &str) -> bool {
        self.not_retrieved.contains(&attribute.to_lowercase())
    }

    pub fn mark_not_retrieved(&mut self, attribute: &str) {
        self.not_retrieved.insert(attribute.to_lowercase());
    }

    pub fn clear_not_retrieved(&mut self, attribute: &str) {
        self.not_retrieved.remove(&attribute.to_lowercase());
    }

    /// Whether the entity was loaded from the directory rather than built
    /// by application code.
    pub fn is_hydrated(&self) -> bool {
        self.hydrated
    }

    pub fn set_hydrated(&mut self, hydrated: bool) {
        self.hydrated = hydrated;
    }
}

/// Type-erased snapshot of an entity: its metadata, set field values and
/// state. Linked entities travel through the mapper in this form.
#[derive(Clone)]
pub struct EntityRecord {
    metadata: &'static EntityMetadata,
    values: BTreeMap<String, FieldValue>,
    state: EntityState,
}

impl EntityRecord {
    pub fn new(metadata: &'static EntityMetadata) -> Self {
        Self {
            metadata,
            values: BTreeMap::new(),
            state: EntityState::default(),
        }
    }

    /// Record carrying only a DN, used for links that were not resolved.
    pub fn stub(metadata: &'static EntityMetadata, dn: impl Into<String>) -> Self {
        let mut record = Self::new(metadata);
        record.state.set_dn(dn);
        record
    }

    pub fn metadata(&self) -> &'static EntityMetadata {
        self.metadata
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.values.get(field)
    }

    /// Set or clear (`None`) a field value.
    pub fn set(&mut self, field: impl Into<String>, value: Option<FieldValue>) {
        let field = field.into();
        match value {
            Some(value) => {
                self.values.insert(field, value);
            }
            None => {
                self.values.remove(&field);
            }
        }
    }

    pub fn values(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = (&str, &mut FieldValue)> {
        self.values.iter_mut().map(|(k, v)| (k.as_str(), v))
    }

    pub fn dn(&self) -> Option<&str> {
        self.state.dn()
    }

    pub fn state(&self) -> &EntityState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut EntityState {
        &mut self.state
    }

    pub fn into_parts(self) -> (BTreeMap<String, FieldValue>, EntityState) {
        (self.values, self.state)
    }
}

impl PartialEq for EntityRecord {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.metadata, other.metadata)
            && self.values == other.values
            && self.state == other.state
    }
}

impl std::fmt::Debug for EntityRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityRecord")
            .field("object_class", &self.metadata.object_class())
            .field("values", &self.values)
            .field("state", &self.state)
            .finish()
    }
}

/// A typed entity mapped to a directory object class.
pub trait Entity: Default + Send + Sync + 'static {
    /// Cached metadata for this type.
    fn metadata() -> &'static EntityMetadata;

    /// Read a field by name. `None` when unset or unknown.
    fn field(&self, name: &str) -> Option<FieldValue>;

    /// Write a field by name. `None` clears it.
    fn set_field(&mut self, name: &str, value: Option<FieldValue>) -> OrmResult<()>;

    fn state(&self) -> &EntityState;

    fn state_mut(&mut self) -> &mut EntityState;

    fn dn(&self) -> Option<&str> {
        self.state().dn()
    }

    fn set_dn(&mut self, dn: impl Into<String>) {
        self.state_mut().set_dn(dn);
    }

    /// Value of the field mapped to `cn`.
    fn common_name(&self) -> Option<String> {
        Self::metadata()
            .common_name_field()
            .and_then(|f| self.field(&f.name))
            .and_then(|v| v.as_text())
    }

    fn not_retrieved_attributes(&self) -> &BTreeSet<String> {
        self.state().not_retrieved()
    }

    fn to_record(&self) -> EntityRecord {
        let metadata = Self::metadata();
        let mut record = EntityRecord::new(metadata);
        for name in metadata.field_names() {
            if let Some(value) = self.field(name) {
                record.set(name, Some(value));
            }
        }
        *record.state_mut() = self.state().clone();
        record
    }

    /// Build a typed entity from a record. The common-name field is set
    /// before any other.
    fn from_record(record: EntityRecord) -> OrmResult<Self> {
        let (mut values, state) = record.into_parts();
        let mut entity = Self::default();

        if let Some(cn) = Self::metadata().common_name_field() {
            if let Some(value) = values.remove(&cn.name) {
                entity.set_field(&cn.name, Some(value))?;
            }
        }
        for (name, value) in values {
            entity.set_field(&name, Some(value))?;
        }

        *entity.state_mut() = state;
        Ok(entity)
    }
}

/// Implement [`Entity`] for a struct.
///
/// The struct must derive `Default`, have a `state: EntityState` field, and
/// list every field named in its metadata. Scalar and text-list fields go in
/// `fields`, fields holding other entities in `links`.
///
/// ```ignore
/// #[derive(Debug, Clone, Default)]
/// pub struct Person {
///     pub cn: Option<String>,
///     pub sn: Option<String>,
///     pub groups: Vec<GroupOfNames>,
///     state: EntityState,
/// }
///
/// impl_entity!(Person, person_metadata, fields: [cn, sn], links: [groups]);
/// ```
#[macro_export]
macro_rules! impl_entity {
    (
        $entity:ty,
        $metadata:path,
        fields: [$($field:ident),* $(,)?]
        $(, links: [$($link:ident),* $(,)?])?
    ) => {
        impl $crate::entity::Entity for $entity {
            fn metadata() -> &'static $crate::metadata::EntityMetadata {
                static METADATA: ::std::sync::OnceLock<$crate::metadata::EntityMetadata> =
                    ::std::sync::OnceLock::new();
                METADATA.get_or_init($metadata)
            }

            fn field(&self, name: &str) -> Option<$crate::value::FieldValue> {
                match name {
                    $(stringify!($field) => $crate::value::FieldConvert::to_field_value(&self.$field),)*
                    $($(stringify!($link) => $crate::value::LinkConvert::to_field_value(&self.$link),)*)?
                    _ => None,
                }
            }

            fn set_field(
                &mut self,
                name: &str,
                value: Option<$crate::value::FieldValue>,
            ) -> $crate::error::OrmResult<()> {
                match name {
                    $(stringify!($field) => {
                        self.$field = $crate::value::FieldConvert::from_field_value(name, value)?;
                    })*
                    $($(stringify!($link) => {
                        self.$link = $crate::value::LinkConvert::from_field_value(name, value)?;
                    })*)?
                    _ => {
                        return Err($crate::error::OrmError::UnknownField {
                            object_class: <Self as $crate::entity::Entity>::metadata()
                                .object_class()
                                .to_string(),
                            field: name.to_string(),
                        });
                    }
                }
                Ok(())
            }

            fn state(&self) -> &$crate::entity::EntityState {
                &self.state
            }

            fn state_mut(&mut self) -> &mut $crate::entity::EntityState {
                &mut self.state
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::FieldKind;

    #[derive(Debug, Clone, Default)]
    struct Account {
        cn: Option<String>,
        login_count: Option<i64>,
        aliases: Vec<String>,
        state: EntityState,
    }

    fn account_metadata() -> EntityMetadata {
        EntityMetadata::builder("account")
            .attribute("cn", "cn", FieldKind::Text)
            .must()
            .attribute("login_count", "logonCount", FieldKind::Integer)
            .attribute("aliases", "alias", FieldKind::TextList)
            .build()
            .expect("account metadata")
    }

    crate::impl_entity!(Account, account_metadata, fields: [cn, login_count, aliases]);

    #[test]
    fn test_metadata_is_cached() {
        assert!(std::ptr::eq(Account::metadata(), Account::metadata()));
    }

    #[test]
    fn test_field_access_by_name() {
        let mut account = Account::default();
        account.set_field("cn", Some("svc".into())).unwrap();
        account.set_field("login_count", Some(FieldValue::Integer(3))).unwrap();
        assert_eq!(account.cn.as_deref(), Some("svc"));
        assert_eq!(account.field("login_count"), Some(FieldValue::Integer(3)));
        assert_eq!(account.common_name().as_deref(), Some("svc"));

        account.set_field("login_count", None).unwrap();
        assert_eq!(account.login_count, None);
    }

    #[test]
    fn test_unknown_field() {
        let mut account = Account::default();
        let err = account.set_field("nope", None).unwrap_err();
        assert_eq!(err.error_code(), "UNKNOWN_FIELD");
        assert!(account.field("nope").is_none());
    }

    #[test]
    fn test_record_round_trip() {
        let mut account = Account {
            cn: Some("svc".to_string()),
            aliases: vec!["a".to_string(), "b".to_string()],
            ..Default::default()
        };
        account.set_dn("cn=svc,dc=example,dc=com");
        account.state_mut().mark_not_retrieved("logonCount");

        let record = account.to_record();
        assert_eq!(record.get("cn"), Some(&FieldValue::Text("svc".to_string())));
        assert!(record.get("login_count").is_none());

        let back = Account::from_record(record).unwrap();
        assert_eq!(back.cn, account.cn);
        assert_eq!(back.aliases, account.aliases);
        assert_eq!(back.dn(), Some("cn=svc,dc=example,dc=com"));
        assert!(back.state().is_not_retrieved("LOGONCOUNT"));
    }
}
