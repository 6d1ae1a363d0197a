//! Entity mapper
//!
//! Converts entity records to directory entries (serialization) and
//! directory entries back to entity records (hydration). Linked entries are
//! hydrated as DN-only stubs here; the
//! [`EntityManager`](crate::manager::EntityManager) resolves them.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::entity::EntityRecord;
use crate::entry::{parent_dn, DirectoryEntry, EntryValue};
use crate::error::{OrmError, OrmResult};
use crate::metadata::{EntityMetadata, FieldKind, FieldMetadata};
use crate::template::{HandlebarsRenderer, TemplateRenderer};
use crate::timestamp::{looks_like_timestamp, Dialect};
use crate::value::{bool_literal, FieldValue};

const PASSWORD_ATTRIBUTE: &str = "userPassword";
const CLEAR_PASSWORD_TAG: &str = "{CLEAR}";

/// Bidirectional converter between entity records and directory entries.
#[derive(Clone)]
pub struct EntityMapper {
    dialect: Dialect,
    renderer: Arc<dyn TemplateRenderer>,
}

impl std::fmt::Debug for EntityMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityMapper")
            .field("dialect", &self.dialect)
            .finish_non_exhaustive()
    }
}

impl EntityMapper {
    pub fn new(dialect: Dialect, renderer: Arc<dyn TemplateRenderer>) -> Self {
        Self { dialect, renderer }
    }

    /// Mapper with the [`HandlebarsRenderer`].
    pub fn with_default_renderer(dialect: Dialect) -> Self {
        Self::new(dialect, Arc::new(HandlebarsRenderer::new()))
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Variables exposed to templates: `entity.<field>` and `dn`.
    pub fn template_variables(&self, record: &EntityRecord) -> Value {
        let mut fields = Map::new();
        for (name, value) in record.values() {
            if let Some(json) = self.field_json(value) {
                fields.insert(name.to_string(), json);
            }
        }

        let mut variables = Map::new();
        variables.insert("entity".to_string(), Value::Object(fields));
        if let Some(dn) = record.dn() {
            variables.insert("dn".to_string(), Value::String(dn.to_string()));
        }
        Value::Object(variables)
    }

    fn field_json(&self, value: &FieldValue) -> Option<Value> {
        Some(match value {
            FieldValue::Text(s) => Value::String(s.clone()),
            FieldValue::Integer(n) => Value::from(*n),
            FieldValue::Boolean(b) => Value::Bool(*b),
            FieldValue::DateTime(d) => Value::String(self.dialect.encode(d)),
            FieldValue::Binary(_) => return None,
            FieldValue::TextList(items) => {
                Value::Array(items.iter().cloned().map(Value::String).collect())
            }
            FieldValue::Link(record) => Value::String(record.dn()?.to_string()),
            FieldValue::LinkList(records) => Value::Array(
                records
                    .iter()
                    .filter_map(|r| r.dn().map(|dn| Value::String(dn.to_string())))
                    .collect(),
            ),
        })
    }

    /// Render a template against a record.
    pub fn render(&self, template: &str, record: &EntityRecord) -> OrmResult<String> {
        self.renderer
            .render(template, &self.template_variables(record))
    }

    /// The record's DN, or its rendered DN template.
    pub fn record_dn(&self, record: &EntityRecord) -> OrmResult<String> {
        if let Some(dn) = record.dn().filter(|dn| !dn.is_empty()) {
            return Ok(dn.to_string());
        }
        let metadata = record.metadata();
        let template = metadata
            .dn_template()
            .ok_or_else(|| OrmError::InvalidMetadata {
                object_class: metadata.object_class().to_string(),
                message: "entity has no DN and no DN template".to_string(),
            })?;
        self.render(template, record)
    }

    /// Rendered search-base template of an entity type.
    pub fn search_base(&self, metadata: &'static EntityMetadata) -> OrmResult<Option<String>> {
        metadata
            .search_base_template()
            .map(|template| self.render(template, &EntityRecord::new(metadata)))
            .transpose()
    }

    /// Fail on the first unset MUST field. Sequence-backed fields are
    /// exempt: they are filled during persist.
    pub fn check_must(&self, record: &EntityRecord) -> OrmResult<()> {
        let metadata = record.metadata();
        for field in metadata.must_fields() {
            if field.sequence.is_some() || is_object_class(field) {
                continue;
            }
            let set = record.get(&field.name).is_some_and(|v| !v.is_empty());
            if !set {
                return Err(OrmError::MissingMustAttribute {
                    object_class: metadata.object_class().to_string(),
                    field: field.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Serialize a record. Unset fields become attributes with no values.
    pub fn to_entry(&self, record: &EntityRecord) -> OrmResult<DirectoryEntry> {
        let metadata = record.metadata();
        let dn = match (record.dn(), metadata.dn_template()) {
            (Some(dn), _) => dn.to_string(),
            (None, Some(_)) => self.record_dn(record)?,
            (None, None) => String::new(),
        };

        let mut entry = DirectoryEntry::new(dn);
        entry.set("objectClass", ["top", metadata.object_class()]);

        for field in metadata.fields() {
            if is_object_class(field) {
                continue;
            }
            let values = match record.get(&field.name) {
                Some(value) => self.serialize_value(value)?,
                None => Vec::new(),
            };

            if field.attribute.eq_ignore_ascii_case(PASSWORD_ATTRIBUTE) {
                if let Some(FieldValue::TextList(_)) = record.get(&field.name) {
                    match clear_password(&values) {
                        Some(password) => entry.set(&field.attribute, [password]),
                        None => debug!(
                            object_class = %metadata.object_class(),
                            "No {{CLEAR}} password value, attribute dropped"
                        ),
                    }
                    continue;
                }
            }

            entry.set(&field.attribute, values);
        }

        Ok(entry)
    }

    fn serialize_value(&self, value: &FieldValue) -> OrmResult<Vec<EntryValue>> {
        Ok(match value {
            FieldValue::Text(s) => vec![EntryValue::from(s.as_str())],
            FieldValue::Integer(n) => vec![EntryValue::from(n.to_string())],
            FieldValue::Boolean(b) => vec![EntryValue::from(bool_literal(*b))],
            FieldValue::DateTime(d) => vec![EntryValue::from(self.dialect.encode(d))],
            FieldValue::Binary(bytes) => vec![EntryValue::Binary(bytes.clone())],
            FieldValue::TextList(items) => items.iter().map(|s| EntryValue::from(s.as_str())).collect(),
            FieldValue::Link(record) => vec![EntryValue::from(self.record_dn(record)?)],
            FieldValue::LinkList(records) => records
                .iter()
                .map(|r| self.record_dn(r).map(EntryValue::from))
                .collect::<OrmResult<_>>()?,
        })
    }

    /// Build a record from an entry.
    ///
    /// Absent mapped attributes are recorded as not retrieved. Linked
    /// entries come back as stubs carrying only their DN.
    pub fn hydrate(
        &self,
        metadata: &'static EntityMetadata,
        entry: &DirectoryEntry,
    ) -> OrmResult<EntityRecord> {
        let mut record = EntityRecord::new(metadata);
        record.state_mut().set_dn(entry.dn());
        record.state_mut().set_hydrated(true);

        for field in metadata.fields() {
            let attribute = entry.get(&field.attribute).filter(|a| !a.is_empty());
            let Some(attribute) = attribute else {
                record.state_mut().mark_not_retrieved(&field.attribute);
                continue;
            };
            if let Some(value) = self.cast(field, &attribute.values)? {
                record.set(field.name.clone(), Some(value));
            }
        }

        for regex_field in metadata.dn_regex_fields() {
            let matches: Vec<String> = regex_field
                .pattern
                .captures_iter(entry.dn())
                .filter_map(|cap| cap.get(1).map(|m| m.as_str().to_string()))
                .collect();
            if !matches.is_empty() {
                record.set(regex_field.name.clone(), Some(FieldValue::TextList(matches)));
            }
        }

        if let Some(parent_field) = metadata.parent_link_field() {
            if let Some(parent) = parent_dn(entry.dn()) {
                record.set(parent_field, Some(FieldValue::Text(parent.to_string())));
            }
        }

        Ok(record)
    }

    fn cast(&self, field: &FieldMetadata, values: &[EntryValue]) -> OrmResult<Option<FieldValue>> {
        let texts = || values.iter().filter_map(EntryValue::as_text);
        let first = texts().next();

        if field.array && !matches!(field.kind, FieldKind::LinkList(_) | FieldKind::Binary) {
            return Ok(Some(FieldValue::TextList(texts().map(str::to_string).collect())));
        }

        Ok(match field.kind {
            FieldKind::Text => first.map(|s| FieldValue::Text(s.to_string())),
            FieldKind::TextList => Some(FieldValue::TextList(texts().map(str::to_string).collect())),
            FieldKind::Integer => match first {
                Some(s) => Some(FieldValue::Integer(s.trim().parse().map_err(|e| {
                    OrmError::invalid_value(&field.name, format!("'{s}': {e}"))
                })?)),
                None => None,
            },
            FieldKind::Boolean => match first {
                Some(s) if s.eq_ignore_ascii_case("TRUE") => Some(FieldValue::Boolean(true)),
                Some(s) if s.eq_ignore_ascii_case("FALSE") => Some(FieldValue::Boolean(false)),
                Some(s) => {
                    return Err(OrmError::invalid_value(
                        &field.name,
                        format!("'{s}' is not TRUE or FALSE"),
                    ))
                }
                None => None,
            },
            FieldKind::DateTime => match first {
                Some(s) if looks_like_timestamp(s) => match self.dialect.decode(s) {
                    Ok(decoded) => Some(FieldValue::DateTime(decoded)),
                    Err(e) => {
                        warn!(field = %field.name, value = %s, error = %e, "Undecodable timestamp skipped");
                        None
                    }
                },
                Some(s) => {
                    debug!(field = %field.name, value = %s, "Value is not a timestamp, skipped");
                    None
                }
                None => None,
            },
            FieldKind::Binary => values
                .first()
                .map(|v| FieldValue::Binary(v.as_bytes().to_vec())),
            FieldKind::Link(target) => first.map(|dn| {
                FieldValue::Link(Box::new(EntityRecord::stub(target.metadata(), dn)))
            }),
            FieldKind::LinkList(target) => Some(FieldValue::LinkList(
                texts()
                    .map(|dn| EntityRecord::stub(target.metadata(), dn))
                    .collect(),
            )),
        })
    }
}

fn is_object_class(field: &FieldMetadata) -> bool {
    field.attribute.eq_ignore_ascii_case("objectClass")
}

/// The `{CLEAR}`-tagged value with its tag removed.
fn clear_password(values: &[EntryValue]) -> Option<String> {
    values
        .iter()
        .filter_map(EntryValue::as_text)
        .find_map(|v| v.strip_prefix(CLEAR_PASSWORD_TAG))
        .map(str::to_string)
}
