//! LDAP search filter construction
//!
//! Filters are built either directly from [`FilterExpression`] values or
//! parsed from an associative JSON tree:
//!
//! ```text
//! {"&": {"objectClass": "person", "|": [{"sn": "Doe"}, {"sn": "Smith"}]}}
//! ```
//!
//! Tree rules:
//! - `&`, `|` and `!` keys open a boolean node over the clauses of their
//!   value (an object, or an array of objects);
//! - numeric keys (`"0"`, `"1"`, ...) splice the clauses of their object
//!   value into the enclosing node, which is how one node repeats a key;
//! - any other key is an attribute token, optionally suffixed with `>=`,
//!   `<=`, `>` or `<`; a scalar value yields one comparison, an array of
//!   scalars yields an OR group of comparisons.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::error::{OrmError, OrmResult};
use crate::timestamp::Dialect;
use crate::value::bool_literal;

/// Filter used when an expression has no clauses.
pub const MATCH_ALL: &str = "(objectClass=*)";

/// Filter matching no entry; an OR group without operands renders as this.
pub const MATCH_NONE: &str = "(!(objectClass=*))";

/// Comparison rendered into a filter item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Equal,
    GreaterOrEqual,
    LessOrEqual,
}

impl Comparison {
    pub fn symbol(self) -> &'static str {
        match self {
            Comparison::Equal => "=",
            Comparison::GreaterOrEqual => ">=",
            Comparison::LessOrEqual => "<=",
        }
    }
}

/// Operator suffix found on an attribute token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorSuffix {
    None,
    Greater,
    Less,
    GreaterOrEqual,
    LessOrEqual,
}

impl OperatorSuffix {
    pub fn as_str(self) -> &'static str {
        match self {
            OperatorSuffix::None => "=",
            OperatorSuffix::Greater => ">",
            OperatorSuffix::Less => "<",
            OperatorSuffix::GreaterOrEqual => ">=",
            OperatorSuffix::LessOrEqual => "<=",
        }
    }

    /// LDAP has no strict ordering match, so `>` and `<` widen to `>=` and
    /// `<=`.
    pub fn comparison(self) -> Comparison {
        match self {
            OperatorSuffix::None => Comparison::Equal,
            OperatorSuffix::Greater | OperatorSuffix::GreaterOrEqual => Comparison::GreaterOrEqual,
            OperatorSuffix::Less | OperatorSuffix::LessOrEqual => Comparison::LessOrEqual,
        }
    }
}

/// Split an attribute token into name and operator suffix. Two-character
/// suffixes are matched before one-character ones.
pub fn parse_attribute_token(token: &str) -> (&str, OperatorSuffix) {
    if let Some(name) = token.strip_suffix(">=") {
        (name, OperatorSuffix::GreaterOrEqual)
    } else if let Some(name) = token.strip_suffix("<=") {
        (name, OperatorSuffix::LessOrEqual)
    } else if let Some(name) = token.strip_suffix('>') {
        (name, OperatorSuffix::Greater)
    } else if let Some(name) = token.strip_suffix('<') {
        (name, OperatorSuffix::Less)
    } else {
        (token, OperatorSuffix::None)
    }
}

/// Right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Text(String),
    Integer(i64),
    Boolean(bool),
    DateTime(DateTime<Utc>),
}

impl FilterValue {
    fn render(&self, dialect: Dialect) -> String {
        match self {
            FilterValue::Text(s) => escape(s),
            FilterValue::Integer(n) => n.to_string(),
            FilterValue::Boolean(b) => bool_literal(*b).to_string(),
            FilterValue::DateTime(d) => dialect.encode(d),
        }
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::Text(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::Text(value)
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        FilterValue::Integer(value)
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        FilterValue::Boolean(value)
    }
}

impl From<DateTime<Utc>> for FilterValue {
    fn from(value: DateTime<Utc>) -> Self {
        FilterValue::DateTime(value)
    }
}

/// Filter expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpression {
    /// `(attr op value)`; several values render as an OR group.
    Compare {
        attribute: String,
        comparison: Comparison,
        values: Vec<FilterValue>,
    },
    And(Vec<FilterExpression>),
    Or(Vec<FilterExpression>),
    Not(Box<FilterExpression>),
    /// Pre-built filter string, inserted as is.
    Raw(String),
}

impl FilterExpression {
    /// `(attribute=value)`.
    pub fn eq(attribute: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        FilterExpression::Compare {
            attribute: attribute.into(),
            comparison: Comparison::Equal,
            values: vec![value.into()],
        }
    }

    /// Comparison from an attribute token such as `"age>="`.
    pub fn compare(token: &str, value: impl Into<FilterValue>) -> Self {
        let (attribute, suffix) = parse_attribute_token(token);
        FilterExpression::Compare {
            attribute: attribute.to_string(),
            comparison: suffix.comparison(),
            values: vec![value.into()],
        }
    }

    /// `(|(attribute=v1)(attribute=v2)...)`. No values matches nothing.
    pub fn any_of<V: Into<FilterValue>>(
        attribute: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        FilterExpression::Compare {
            attribute: attribute.into(),
            comparison: Comparison::Equal,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn and(children: Vec<FilterExpression>) -> Self {
        FilterExpression::And(children)
    }

    pub fn or(children: Vec<FilterExpression>) -> Self {
        FilterExpression::Or(children)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(child: FilterExpression) -> Self {
        FilterExpression::Not(Box::new(child))
    }

    pub fn raw(filter: impl Into<String>) -> Self {
        FilterExpression::Raw(filter.into())
    }

    /// An expression that places no restriction: an AND without operands
    /// or a blank raw filter. An empty OR matches nothing and is not empty.
    pub fn is_empty(&self) -> bool {
        match self {
            FilterExpression::And(children) => children.is_empty(),
            FilterExpression::Raw(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Restrict this expression to one object class.
    pub fn with_object_class(self, object_class: &str) -> Self {
        let class = FilterExpression::eq("objectClass", object_class);
        if self.is_empty() {
            return class;
        }
        match self {
            FilterExpression::And(mut children) => {
                children.insert(0, class);
                FilterExpression::And(children)
            }
            other => FilterExpression::And(vec![class, other]),
        }
    }

    /// Parse an associative JSON tree.
    pub fn from_json(tree: &Value) -> OrmResult<Self> {
        let Value::Object(map) = tree else {
            return Err(OrmError::invalid_filter(format!(
                "expected an object tree, got {}",
                json_kind(tree)
            )));
        };

        let mut clauses = parse_clauses(map)?;
        Ok(match clauses.len() {
            1 => clauses.remove(0),
            _ => FilterExpression::And(clauses),
        })
    }

    /// Render as an RFC 4515 filter string.
    pub fn format(&self, dialect: Dialect) -> String {
        if self.is_empty() {
            return MATCH_ALL.to_string();
        }
        let mut out = String::new();
        self.write(&mut out, dialect);
        out
    }

    fn write(&self, out: &mut String, dialect: Dialect) {
        match self {
            FilterExpression::Compare {
                attribute,
                comparison,
                values,
            } => {
                let item = |out: &mut String, value: &FilterValue| {
                    out.push('(');
                    out.push_str(attribute);
                    out.push_str(comparison.symbol());
                    out.push_str(&value.render(dialect));
                    out.push(')');
                };
                match values.as_slice() {
                    [] => out.push_str(MATCH_NONE),
                    [single] => item(out, single),
                    many => {
                        out.push_str("(|");
                        for value in many {
                            item(out, value);
                        }
                        out.push(')');
                    }
                }
            }
            FilterExpression::And(children) => write_node(out, '&', children, dialect),
            FilterExpression::Or(children) => write_node(out, '|', children, dialect),
            FilterExpression::Not(child) => {
                out.push_str("(!");
                child.write(out, dialect);
                out.push(')');
            }
            FilterExpression::Raw(filter) => {
                let filter = filter.trim();
                if filter.starts_with('(') {
                    out.push_str(filter);
                } else {
                    out.push('(');
                    out.push_str(filter);
                    out.push(')');
                }
            }
        }
    }
}

fn write_node(out: &mut String, op: char, children: &[FilterExpression], dialect: Dialect) {
    if children.is_empty() {
        out.push_str(if op == '&' { MATCH_ALL } else { MATCH_NONE });
        return;
    }
    out.push('(');
    out.push(op);
    for child in children {
        child.write(out, dialect);
    }
    out.push(')');
}

/// Format a parsed or built expression; `None` matches everything.
pub fn format(expr: Option<&FilterExpression>, dialect: Dialect) -> String {
    expr.map(|e| e.format(dialect))
        .unwrap_or_else(|| MATCH_ALL.to_string())
}

/// Escape an assertion value. `*` is kept as the substring wildcard.
pub fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\5c"),
            '=' => escaped.push_str("\\3d"),
            ',' => escaped.push_str("\\2c"),
            '(' => escaped.push_str("\\28"),
            ')' => escaped.push_str("\\29"),
            '\0' => escaped.push_str("\\00"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn parse_clauses(map: &Map<String, Value>) -> OrmResult<Vec<FilterExpression>> {
    let mut clauses = Vec::with_capacity(map.len());

    for (key, value) in map {
        if !key.is_empty() && key.bytes().all(|b| b.is_ascii_digit()) {
            let Value::Object(inner) = value else {
                return Err(OrmError::invalid_filter(format!(
                    "numeric key '{key}' must hold an object, got {}",
                    json_kind(value)
                )));
            };
            clauses.extend(parse_clauses(inner)?);
            continue;
        }

        match key.as_str() {
            "&" => clauses.push(FilterExpression::And(parse_operands(key, value)?)),
            "|" => clauses.push(FilterExpression::Or(parse_operands(key, value)?)),
            "!" => {
                let mut operands = parse_operands(key, value)?;
                if operands.len() != 1 {
                    return Err(OrmError::invalid_filter(format!(
                        "'!' takes exactly one clause, got {}",
                        operands.len()
                    )));
                }
                clauses.push(FilterExpression::not(operands.remove(0)));
            }
            token => {
                let (attribute, suffix) = parse_attribute_token(token);
                if attribute.is_empty() {
                    return Err(OrmError::invalid_filter(format!(
                        "attribute token '{token}' has no attribute name"
                    )));
                }
                clauses.push(FilterExpression::Compare {
                    attribute: attribute.to_string(),
                    comparison: suffix.comparison(),
                    values: parse_values(attribute, value)?,
                });
            }
        }
    }

    Ok(clauses)
}

fn parse_operands(op: &str, value: &Value) -> OrmResult<Vec<FilterExpression>> {
    match value {
        Value::Object(map) => parse_clauses(map),
        Value::Array(items) => {
            let mut operands = Vec::with_capacity(items.len());
            for item in items {
                let Value::Object(map) = item else {
                    return Err(OrmError::invalid_filter(format!(
                        "operands of '{op}' must be objects, got {}",
                        json_kind(item)
                    )));
                };
                operands.extend(parse_clauses(map)?);
            }
            Ok(operands)
        }
        other => Err(OrmError::invalid_filter(format!(
            "operator '{op}' needs an object or array, got {}",
            json_kind(other)
        ))),
    }
}

fn parse_scalar(attribute: &str, value: &Value) -> OrmResult<FilterValue> {
    match value {
        Value::String(s) => Ok(FilterValue::Text(s.clone())),
        Value::Bool(b) => Ok(FilterValue::Boolean(*b)),
        Value::Number(n) => Ok(match n.as_i64() {
            Some(i) => FilterValue::Integer(i),
            None => FilterValue::Text(n.to_string()),
        }),
        other => Err(OrmError::invalid_filter(format!(
            "value of '{attribute}' must be a scalar, got {}",
            json_kind(other)
        ))),
    }
}

fn parse_values(attribute: &str, value: &Value) -> OrmResult<Vec<FilterValue>> {
    match value {
        Value::Array(items) if items.is_empty() => Err(OrmError::invalid_filter(format!(
            "value list of '{attribute}' is empty"
        ))),
        Value::Array(items) => items.iter().map(|v| parse_scalar(attribute, v)).collect(),
        scalar => Ok(vec![parse_scalar(attribute, scalar)?]),
    }
}
