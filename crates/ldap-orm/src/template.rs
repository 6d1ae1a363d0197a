//! DN template rendering
//!
//! DN templates, search-base templates and sequence-path templates are
//! rendered through the [`TemplateRenderer`] trait so applications can plug
//! in their own engine. [`HandlebarsRenderer`] is the default: handlebars in
//! strict mode with an LDAP escape function in place of HTML escaping.

use handlebars::Handlebars;
use serde_json::{Map, Value};

use crate::entry::escape_dn_value;
use crate::error::{OrmError, OrmResult};

/// Renders a template string against a variables object.
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, template: &str, variables: &Value) -> OrmResult<String>;
}

/// Handlebars rendering for directory names.
///
/// `{{ entity.cn }}` inserts an escaped value; `{{{ entity.parent }}}`
/// inserts it as is, e.g. a parent DN:
/// `cn={{ entity.cn }},{{{ entity.parent }}}`.
///
/// Null and empty values are removed before rendering, so strict mode
/// rejects a placeholder that resolves to nothing. Lists render their first
/// value and booleans render as `TRUE`/`FALSE`.
pub struct HandlebarsRenderer {
    handlebars: Handlebars<'static>,
}

impl std::fmt::Debug for HandlebarsRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlebarsRenderer").finish_non_exhaustive()
    }
}

impl Default for HandlebarsRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlebarsRenderer {
    /// Renderer escaping values as RDN values (RFC 4514).
    pub fn new() -> Self {
        Self::with_escape_fn(escape_dn_value)
    }

    /// Renderer escaping values as filter assertion values (RFC 4515).
    pub fn for_filters() -> Self {
        Self::with_escape_fn(crate::filter::escape)
    }

    pub fn with_escape_fn<F>(escape: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);
        handlebars.register_escape_fn(escape);
        Self { handlebars }
    }

    /// Drop nulls and empty values, reduce lists to their first value.
    fn normalize(value: &Value) -> Option<Value> {
        match value {
            Value::Null => None,
            Value::String(s) if s.is_empty() => None,
            Value::String(_) | Value::Number(_) => Some(value.clone()),
            Value::Bool(b) => Some(Value::String(if *b { "TRUE" } else { "FALSE" }.to_string())),
            Value::Array(items) => items.first().and_then(Self::normalize),
            Value::Object(fields) => Some(Value::Object(
                fields
                    .iter()
                    .filter_map(|(k, v)| Self::normalize(v).map(|v| (k.clone(), v)))
                    .collect::<Map<_, _>>(),
            )),
        }
    }
}

impl TemplateRenderer for HandlebarsRenderer {
    fn render(&self, template: &str, variables: &Value) -> OrmResult<String> {
        let variables = Self::normalize(variables).unwrap_or(Value::Object(Map::new()));
        self.handlebars
            .render_template(template, &variables)
            .map_err(|e| OrmError::Template {
                message: format!("cannot render '{template}': {e}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn render(template: &str, vars: &Value) -> OrmResult<String> {
        HandlebarsRenderer::new().render(template, vars)
    }

    #[test]
    fn test_render_simple() {
        let vars = json!({ "entity": { "cn": "Test" } });
        let out = render("cn={{ entity.cn }},dc=example,dc=com", &vars).unwrap();
        assert_eq!(out, "cn=Test,dc=example,dc=com");
    }

    #[test]
    fn test_render_escapes_values() {
        let vars = json!({ "entity": { "cn": "Doe, John" } });
        let out = render("cn={{entity.cn}},ou=people", &vars).unwrap();
        assert_eq!(out, "cn=Doe\\, John,ou=people");
    }

    #[test]
    fn test_render_triple_stash_is_raw() {
        let vars = json!({ "entity": { "cn": "a", "parent": "ou=people,dc=example" } });
        let out = render("cn={{ entity.cn }},{{{ entity.parent }}}", &vars).unwrap();
        assert_eq!(out, "cn=a,ou=people,dc=example");
    }

    #[test]
    fn test_render_numbers_lists_and_booleans() {
        let vars = json!({ "entity": { "uid_number": 1000, "mail": ["a@x", "b@x"], "active": true } });
        assert_eq!(render("uidNumber={{ entity.uid_number }}", &vars).unwrap(), "uidNumber=1000");
        assert_eq!(render("{{ entity.mail }}", &vars).unwrap(), "a@x");
        assert_eq!(render("{{ entity.active }}", &vars).unwrap(), "TRUE");
    }

    #[test]
    fn test_render_missing_variable() {
        let vars = json!({ "entity": {} });
        let err = render("cn={{ entity.cn }}", &vars).unwrap_err();
        assert_eq!(err.error_code(), "TEMPLATE_ERROR");
    }

    #[test]
    fn test_render_empty_value_is_missing() {
        let vars = json!({ "entity": { "cn": "", "mail": [], "sn": null } });
        assert!(render("cn={{ entity.cn }}", &vars).is_err());
        assert!(render("mail={{ entity.mail }}", &vars).is_err());
        assert!(render("sn={{ entity.sn }}", &vars).is_err());
    }

    #[test]
    fn test_render_filter_context() {
        let vars = json!({ "entity": { "cn": "a(b)*" } });
        let out = HandlebarsRenderer::for_filters()
            .render("(cn={{ entity.cn }})", &vars)
            .unwrap();
        assert_eq!(out, "(cn=a\\28b\\29*)");
    }

    #[test]
    fn test_render_without_placeholders() {
        let out = render("cn=uidSequence,dc=example,dc=com", &Value::Null).unwrap();
        assert_eq!(out, "cn=uidSequence,dc=example,dc=com");
    }

    #[test]
    fn test_render_syntax_error() {
        let err = render("cn={{ entity.cn", &json!({ "entity": { "cn": "x" } })).unwrap_err();
        assert_eq!(err.error_code(), "TEMPLATE_ERROR");
    }
}
