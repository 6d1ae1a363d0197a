//! Field values
//!
//! [`FieldValue`] is the type-erased form of an entity field. Typed struct
//! fields convert to and from it through [`FieldConvert`] (scalar and list
//! fields) and [`LinkConvert`] (fields holding linked entities).

use chrono::{DateTime, Utc};

use crate::entity::{Entity, EntityRecord};
use crate::error::{OrmError, OrmResult};
use crate::timestamp;

/// Value of one entity field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Boolean(bool),
    DateTime(DateTime<Utc>),
    Binary(Vec<u8>),
    TextList(Vec<String>),
    Link(Box<EntityRecord>),
    LinkList(Vec<EntityRecord>),
}

impl FieldValue {
    /// Empty strings and empty lists. Zero and `false` are values.
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Text(s) => s.is_empty(),
            FieldValue::Binary(b) => b.is_empty(),
            FieldValue::TextList(v) => v.iter().all(String::is_empty),
            FieldValue::LinkList(v) => v.is_empty(),
            FieldValue::Integer(_)
            | FieldValue::Boolean(_)
            | FieldValue::DateTime(_)
            | FieldValue::Link(_) => false,
        }
    }

    /// Single-string view used by filters, templates and lookups.
    pub fn as_text(&self) -> Option<String> {
        match self {
            FieldValue::Text(s) => Some(s.clone()),
            FieldValue::Integer(n) => Some(n.to_string()),
            FieldValue::Boolean(b) => Some(bool_literal(*b).to_string()),
            FieldValue::DateTime(d) => Some(timestamp::encode_generalized_time(d)),
            FieldValue::TextList(v) => v.first().cloned(),
            FieldValue::Link(record) => record.dn().map(str::to_string),
            FieldValue::Binary(_) | FieldValue::LinkList(_) => None,
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            FieldValue::Text(_) => "text",
            FieldValue::Integer(_) => "integer",
            FieldValue::Boolean(_) => "boolean",
            FieldValue::DateTime(_) => "date-time",
            FieldValue::Binary(_) => "binary",
            FieldValue::TextList(_) => "text list",
            FieldValue::Link(_) => "link",
            FieldValue::LinkList(_) => "link list",
        }
    }
}

/// Directory spelling of a boolean.
pub fn bool_literal(value: bool) -> &'static str {
    if value {
        "TRUE"
    } else {
        "FALSE"
    }
}

fn mismatch(field: &str, expected: &str, value: &FieldValue) -> OrmError {
    OrmError::invalid_value(
        field,
        format!("expected {expected}, got {}", value.kind_name()),
    )
}

/// Conversion between a typed field and [`FieldValue`].
///
/// `None` means unset. Setting `None` clears the field.
pub trait FieldConvert: Sized {
    fn to_field_value(&self) -> Option<FieldValue>;
    fn from_field_value(field: &str, value: Option<FieldValue>) -> OrmResult<Self>;
}

impl FieldConvert for Option<String> {
    fn to_field_value(&self) -> Option<FieldValue> {
        self.clone().map(FieldValue::Text)
    }

    fn from_field_value(field: &str, value: Option<FieldValue>) -> OrmResult<Self> {
        match value {
            None => Ok(None),
            Some(v @ (FieldValue::Binary(_) | FieldValue::LinkList(_))) => {
                Err(mismatch(field, "text", &v))
            }
            Some(v) => Ok(v.as_text()),
        }
    }
}

impl FieldConvert for Option<i64> {
    fn to_field_value(&self) -> Option<FieldValue> {
        self.map(FieldValue::Integer)
    }

    fn from_field_value(field: &str, value: Option<FieldValue>) -> OrmResult<Self> {
        match value {
            None => Ok(None),
            Some(FieldValue::Integer(n)) => Ok(Some(n)),
            Some(FieldValue::Text(s)) => s
                .trim()
                .parse()
                .map(Some)
                .map_err(|e| OrmError::invalid_value(field, format!("'{s}': {e}"))),
            Some(v) => Err(mismatch(field, "integer", &v)),
        }
    }
}

impl FieldConvert for Option<bool> {
    fn to_field_value(&self) -> Option<FieldValue> {
        self.map(FieldValue::Boolean)
    }

    fn from_field_value(field: &str, value: Option<FieldValue>) -> OrmResult<Self> {
        match value {
            None => Ok(None),
            Some(FieldValue::Boolean(b)) => Ok(Some(b)),
            Some(FieldValue::Text(s)) if s.eq_ignore_ascii_case("TRUE") => Ok(Some(true)),
            Some(FieldValue::Text(s)) if s.eq_ignore_ascii_case("FALSE") => Ok(Some(false)),
            Some(v) => Err(mismatch(field, "boolean", &v)),
        }
    }
}

impl FieldConvert for Option<DateTime<Utc>> {
    fn to_field_value(&self) -> Option<FieldValue> {
        self.map(FieldValue::DateTime)
    }

    fn from_field_value(field: &str, value: Option<FieldValue>) -> OrmResult<Self> {
        match value {
            None => Ok(None),
            Some(FieldValue::DateTime(d)) => Ok(Some(d)),
            Some(FieldValue::Text(s)) => timestamp::decode_ad_timestamp(&s).map(Some),
            Some(v) => Err(mismatch(field, "date-time", &v)),
        }
    }
}

impl FieldConvert for Option<Vec<u8>> {
    fn to_field_value(&self) -> Option<FieldValue> {
        self.clone().map(FieldValue::Binary)
    }

    fn from_field_value(field: &str, value: Option<FieldValue>) -> OrmResult<Self> {
        match value {
            None => Ok(None),
            Some(FieldValue::Binary(b)) => Ok(Some(b)),
            Some(FieldValue::Text(s)) => Ok(Some(s.into_bytes())),
            Some(v) => Err(mismatch(field, "binary", &v)),
        }
    }
}

impl FieldConvert for Vec<String> {
    fn to_field_value(&self) -> Option<FieldValue> {
        (!self.is_empty()).then(|| FieldValue::TextList(self.clone()))
    }

    fn from_field_value(field: &str, value: Option<FieldValue>) -> OrmResult<Self> {
        match value {
            None => Ok(Vec::new()),
            Some(FieldValue::TextList(v)) => Ok(v),
            Some(FieldValue::Text(s)) => Ok(vec![s]),
            Some(FieldValue::LinkList(records)) => Ok(records
                .iter()
                .filter_map(|r| r.dn().map(str::to_string))
                .collect()),
            Some(v) => Err(mismatch(field, "text list", &v)),
        }
    }
}

/// Conversion for fields holding linked entities.
pub trait LinkConvert: Sized {
    fn to_field_value(&self) -> Option<FieldValue>;
    fn from_field_value(field: &str, value: Option<FieldValue>) -> OrmResult<Self>;
}

fn stub<T: Entity>(dn: String) -> T {
    let mut entity = T::default();
    entity.state_mut().set_dn(dn);
    entity
}

impl<T: Entity> LinkConvert for Option<T> {
    fn to_field_value(&self) -> Option<FieldValue> {
        self.as_ref()
            .map(|entity| FieldValue::Link(Box::new(entity.to_record())))
    }

    fn from_field_value(field: &str, value: Option<FieldValue>) -> OrmResult<Self> {
        match value {
            None => Ok(None),
            Some(FieldValue::Link(record)) => T::from_record(*record).map(Some),
            Some(FieldValue::Text(dn)) => Ok(Some(stub(dn))),
            Some(v) => Err(mismatch(field, "link", &v)),
        }
    }
}

impl<T: Entity> LinkConvert for Vec<T> {
    fn to_field_value(&self) -> Option<FieldValue> {
        (!self.is_empty()).then(|| FieldValue::LinkList(self.iter().map(Entity::to_record).collect()))
    }

    fn from_field_value(field: &str, value: Option<FieldValue>) -> OrmResult<Self> {
        match value {
            None => Ok(Vec::new()),
            Some(FieldValue::LinkList(records)) => {
                records.into_iter().map(T::from_record).collect()
            }
            Some(FieldValue::TextList(dns)) => Ok(dns.into_iter().map(stub).collect()),
            Some(v) => Err(mismatch(field, "link list", &v)),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Boolean(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        FieldValue::DateTime(value)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(value: Vec<String>) -> Self {
        FieldValue::TextList(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emptiness() {
        assert!(FieldValue::Text(String::new()).is_empty());
        assert!(FieldValue::TextList(vec![]).is_empty());
        assert!(!FieldValue::Integer(0).is_empty());
        assert!(!FieldValue::Boolean(false).is_empty());
    }

    #[test]
    fn test_text_conversions() {
        let v = <Option<String>>::from_field_value("cn", Some(FieldValue::Integer(42))).unwrap();
        assert_eq!(v.as_deref(), Some("42"));
        let v = <Option<String>>::from_field_value("cn", Some(FieldValue::Boolean(true))).unwrap();
        assert_eq!(v.as_deref(), Some("TRUE"));
        assert!(<Option<String>>::from_field_value("cn", Some(FieldValue::Binary(vec![1]))).is_err());
    }

    #[test]
    fn test_integer_conversions() {
        let v = <Option<i64>>::from_field_value("n", Some(FieldValue::Text(" 1000 ".into()))).unwrap();
        assert_eq!(v, Some(1000));
        let err = <Option<i64>>::from_field_value("n", Some(FieldValue::Text("abc".into())))
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_VALUE");
    }

    #[test]
    fn test_boolean_conversions() {
        let v = <Option<bool>>::from_field_value("b", Some(FieldValue::Text("false".into()))).unwrap();
        assert_eq!(v, Some(false));
        assert!(<Option<bool>>::from_field_value("b", Some(FieldValue::Text("yes".into()))).is_err());
    }

    #[test]
    fn test_list_conversions() {
        let v = <Vec<String>>::from_field_value("mail", Some(FieldValue::Text("a@x".into()))).unwrap();
        assert_eq!(v, vec!["a@x".to_string()]);
        assert_eq!(FieldConvert::to_field_value(&Vec::<String>::new()), None);
        assert_eq!(<Vec<String>>::from_field_value("mail", None).unwrap(), Vec::<String>::new());
    }
}
