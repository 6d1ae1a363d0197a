//! Entity metadata
//!
//! Declarative description of how an entity type's fields map to directory
//! attributes. Metadata is built once per type with [`EntityMetadataBuilder`]
//! and cached by the entity's [`Entity::metadata`](crate::entity::Entity::metadata)
//! implementation.
//!
//! ```ignore
//! EntityMetadata::builder("inetOrgPerson")
//!     .dn_template("uid={{ entity.uid }},ou=people,dc=example,dc=com")
//!     .search_base("ou=people,dc=example,dc=com")
//!     .attribute("cn", "cn", FieldKind::Text).must()
//!     .attribute("sn", "sn", FieldKind::Text).must()
//!     .attribute("uid", "uid", FieldKind::Text)
//!     .attribute("mail", "mail", FieldKind::TextList)
//!     .attribute("member_of", "memberOf", FieldKind::LinkList(LinkTarget::of::<GroupOfNames>()))
//!     .attribute("modify_timestamp", "modifyTimestamp", FieldKind::DateTime).operational()
//!     .unique_identifier("uid")
//!     .build()
//! ```

use std::collections::HashMap;

use regex::Regex;

use crate::entity::Entity;
use crate::error::{OrmError, OrmResult};

/// Entity type a link field resolves to.
#[derive(Clone, Copy)]
pub struct LinkTarget {
    metadata: fn() -> &'static EntityMetadata,
}

impl LinkTarget {
    /// Target described by a metadata accessor.
    pub fn new(metadata: fn() -> &'static EntityMetadata) -> Self {
        Self { metadata }
    }

    pub fn of<T: Entity>() -> Self {
        Self {
            metadata: T::metadata,
        }
    }

    pub fn metadata(&self) -> &'static EntityMetadata {
        (self.metadata)()
    }
}

impl std::fmt::Debug for LinkTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LinkTarget")
    }
}

/// Value type of a mapped field.
#[derive(Debug, Clone, Copy)]
pub enum FieldKind {
    Text,
    Integer,
    Boolean,
    DateTime,
    Binary,
    /// Multi-valued text.
    TextList,
    /// DN of a single linked entry.
    Link(LinkTarget),
    /// DNs of linked entries, resolved into full entities on retrieval.
    LinkList(LinkTarget),
}

impl FieldKind {
    pub fn is_multi_valued(&self) -> bool {
        matches!(self, FieldKind::TextList | FieldKind::LinkList(_))
    }

    pub fn link_target(&self) -> Option<LinkTarget> {
        match self {
            FieldKind::Link(target) | FieldKind::LinkList(target) => Some(*target),
            _ => None,
        }
    }
}

/// One field-to-attribute mapping.
#[derive(Debug, Clone)]
pub struct FieldMetadata {
    pub name: String,
    pub attribute: String,
    pub kind: FieldKind,
    /// Always treated as a sequence of values.
    pub array: bool,
    pub must: bool,
    /// Maintained by the server; never written.
    pub operational: bool,
    /// Template of the `integerSequence` entry that supplies a value when
    /// the field is unset.
    pub sequence: Option<String>,
}

/// Field filled from capture group 1 of a regex matched against the DN.
#[derive(Debug, Clone)]
pub struct DnRegexField {
    pub name: String,
    pub pattern: Regex,
}

/// Immutable mapping description for one entity type.
#[derive(Debug)]
pub struct EntityMetadata {
    object_class: String,
    fields: Vec<FieldMetadata>,
    by_field: HashMap<String, usize>,
    by_attribute: HashMap<String, usize>,
    unique_identifier: Option<usize>,
    common_name: Option<usize>,
    dn_template: Option<String>,
    search_base_template: Option<String>,
    parent_link: Option<String>,
    dn_regex_fields: Vec<DnRegexField>,
}

impl EntityMetadata {
    pub fn builder(object_class: impl Into<String>) -> EntityMetadataBuilder {
        EntityMetadataBuilder::new(object_class)
    }

    pub fn object_class(&self) -> &str {
        &self.object_class
    }

    /// Mapped fields in declaration order.
    pub fn fields(&self) -> &[FieldMetadata] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldMetadata> {
        self.by_field.get(name).map(|&i| &self.fields[i])
    }

    /// Reverse lookup, case-insensitive.
    pub fn field_for_attribute(&self, attribute: &str) -> Option<&FieldMetadata> {
        self.by_attribute
            .get(&attribute.to_lowercase())
            .map(|&i| &self.fields[i])
    }

    pub fn attribute_for(&self, field: &str) -> Option<&str> {
        self.field(field).map(|f| f.attribute.as_str())
    }

    pub fn attributes(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.attribute.as_str())
    }

    pub fn must_fields(&self) -> impl Iterator<Item = &FieldMetadata> {
        self.fields.iter().filter(|f| f.must)
    }

    pub fn operational_attributes(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|f| f.operational)
            .map(|f| f.attribute.as_str())
    }

    pub fn sequence_fields(&self) -> impl Iterator<Item = &FieldMetadata> {
        self.fields.iter().filter(|f| f.sequence.is_some())
    }

    pub fn link_fields(&self) -> impl Iterator<Item = &FieldMetadata> {
        self.fields.iter().filter(|f| f.kind.link_target().is_some())
    }

    pub fn unique_identifier(&self) -> Option<&FieldMetadata> {
        self.unique_identifier.map(|i| &self.fields[i])
    }

    /// Field mapped to `cn`, if any.
    pub fn common_name_field(&self) -> Option<&FieldMetadata> {
        self.common_name.map(|i| &self.fields[i])
    }

    pub fn dn_template(&self) -> Option<&str> {
        self.dn_template.as_deref()
    }

    pub fn search_base_template(&self) -> Option<&str> {
        self.search_base_template.as_deref()
    }

    pub fn parent_link_field(&self) -> Option<&str> {
        self.parent_link.as_deref()
    }

    pub fn dn_regex_fields(&self) -> &[DnRegexField] {
        &self.dn_regex_fields
    }

    /// Every settable field name: mapped fields, DN-regex fields and the
    /// parent link.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .map(|f| f.name.as_str())
            .chain(self.dn_regex_fields.iter().map(|f| f.name.as_str()))
            .chain(self.parent_link.as_deref())
    }
}

/// Builder for [`EntityMetadata`].
///
/// Flag methods (`must`, `operational`, `array`, `sequence`) apply to the
/// most recently declared attribute.
#[derive(Debug)]
pub struct EntityMetadataBuilder {
    object_class: String,
    fields: Vec<FieldMetadata>,
    unique_identifier: Option<String>,
    dn_template: Option<String>,
    search_base_template: Option<String>,
    parent_link: Option<String>,
    dn_regex_fields: Vec<(String, String)>,
    errors: Vec<String>,
}

impl EntityMetadataBuilder {
    fn new(object_class: impl Into<String>) -> Self {
        Self {
            object_class: object_class.into(),
            fields: Vec::new(),
            unique_identifier: None,
            dn_template: None,
            search_base_template: None,
            parent_link: None,
            dn_regex_fields: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Map a field to a directory attribute.
    pub fn attribute(
        mut self,
        field: impl Into<String>,
        attribute: impl Into<String>,
        kind: FieldKind,
    ) -> Self {
        self.fields.push(FieldMetadata {
            name: field.into(),
            attribute: attribute.into(),
            array: kind.is_multi_valued(),
            kind,
            must: false,
            operational: false,
            sequence: None,
        });
        self
    }

    fn last_field(&mut self, flag: &str) -> Option<&mut FieldMetadata> {
        if self.fields.is_empty() {
            self.errors
                .push(format!("'{flag}' used before any attribute was declared"));
        }
        self.fields.last_mut()
    }

    pub fn must(mut self) -> Self {
        if let Some(field) = self.last_field("must") {
            field.must = true;
        }
        self
    }

    pub fn operational(mut self) -> Self {
        if let Some(field) = self.last_field("operational") {
            field.operational = true;
        }
        self
    }

    pub fn array(mut self) -> Self {
        if let Some(field) = self.last_field("array") {
            field.array = true;
        }
        self
    }

    pub fn sequence(mut self, template: impl Into<String>) -> Self {
        let template = template.into();
        if let Some(field) = self.last_field("sequence") {
            field.sequence = Some(template);
        }
        self
    }

    pub fn unique_identifier(mut self, field: impl Into<String>) -> Self {
        self.unique_identifier = Some(field.into());
        self
    }

    pub fn dn_template(mut self, template: impl Into<String>) -> Self {
        self.dn_template = Some(template.into());
        self
    }

    pub fn search_base(mut self, template: impl Into<String>) -> Self {
        self.search_base_template = Some(template.into());
        self
    }

    /// Field receiving the parent DN of hydrated entries.
    pub fn parent_link(mut self, field: impl Into<String>) -> Self {
        self.parent_link = Some(field.into());
        self
    }

    /// Field filled with every capture-group-1 match of `pattern` in the DN.
    pub fn dn_regex(mut self, field: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.dn_regex_fields.push((field.into(), pattern.into()));
        self
    }

    pub fn build(self) -> OrmResult<EntityMetadata> {
        let object_class = self.object_class;
        let invalid = |message: String| OrmError::InvalidMetadata {
            object_class: object_class.clone(),
            message,
        };

        if object_class.is_empty() {
            return Err(invalid("object class is empty".to_string()));
        }
        if let Some(message) = self.errors.into_iter().next() {
            return Err(invalid(message));
        }

        let mut by_field = HashMap::with_capacity(self.fields.len());
        let mut by_attribute = HashMap::with_capacity(self.fields.len());

        for (i, field) in self.fields.iter().enumerate() {
            if field.name.is_empty() || field.attribute.is_empty() {
                return Err(invalid(format!("field #{i} has an empty name or attribute")));
            }
            if by_field.insert(field.name.clone(), i).is_some() {
                return Err(invalid(format!("field '{}' declared twice", field.name)));
            }
            if let Some(previous) = by_attribute.insert(field.attribute.to_lowercase(), i) {
                return Err(invalid(format!(
                    "attribute '{}' mapped by both '{}' and '{}'",
                    field.attribute, self.fields[previous].name, field.name
                )));
            }
        }

        let unique_identifier = match self.unique_identifier {
            Some(name) => Some(
                *by_field
                    .get(&name)
                    .ok_or_else(|| invalid(format!("unique identifier '{name}' is not a mapped field")))?,
            ),
            None => None,
        };

        let mut dn_regex_fields = Vec::with_capacity(self.dn_regex_fields.len());
        for (name, pattern) in self.dn_regex_fields {
            if by_field.contains_key(&name) {
                return Err(invalid(format!("DN-regex field '{name}' is also a mapped field")));
            }
            let pattern = Regex::new(&pattern)
                .map_err(|e| invalid(format!("invalid DN regex for '{name}': {e}")))?;
            if pattern.captures_len() < 2 {
                return Err(invalid(format!("DN regex for '{name}' has no capture group")));
            }
            dn_regex_fields.push(DnRegexField { name, pattern });
        }

        if let Some(parent) = &self.parent_link {
            if by_field.contains_key(parent) {
                return Err(invalid(format!("parent link '{parent}' is also a mapped field")));
            }
        }

        let common_name = by_attribute.get("cn").copied();

        Ok(EntityMetadata {
            object_class,
            fields: self.fields,
            by_field,
            by_attribute,
            unique_identifier,
            common_name,
            dn_template: self.dn_template,
            search_base_template: self.search_base_template,
            parent_link: self.parent_link,
            dn_regex_fields,
        })
    }
}
