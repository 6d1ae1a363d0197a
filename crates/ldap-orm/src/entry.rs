//! Wire-level directory entries.

use std::collections::BTreeMap;

/// A single attribute value as exchanged with the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntryValue {
    Text(String),
    Binary(Vec<u8>),
}

impl EntryValue {
    /// Text view of the value. Binary values that are valid UTF-8 are
    /// returned as text as well.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            EntryValue::Text(s) => Some(s),
            EntryValue::Binary(b) => std::str::from_utf8(b).ok(),
        }
    }

    /// Raw bytes of the value.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            EntryValue::Text(s) => s.as_bytes(),
            EntryValue::Binary(b) => b,
        }
    }

    /// An empty string counts as no value.
    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

impl From<String> for EntryValue {
    fn from(value: String) -> Self {
        EntryValue::Text(value)
    }
}

impl From<&str> for EntryValue {
    fn from(value: &str) -> Self {
        EntryValue::Text(value.to_string())
    }
}

impl From<Vec<u8>> for EntryValue {
    fn from(value: Vec<u8>) -> Self {
        EntryValue::Binary(value)
    }
}

/// An attribute with the spelling it was first seen with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryAttribute {
    pub name: String,
    pub values: Vec<EntryValue>,
}

impl EntryAttribute {
    /// No values, or a single empty value.
    pub fn is_empty(&self) -> bool {
        self.values.iter().all(EntryValue::is_empty)
    }
}

/// A directory entry: DN plus attributes, looked up case-insensitively.
///
/// An attribute present with no values stands for "null" on the entity
/// side and is dropped before an add.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    dn: String,
    attributes: BTreeMap<String, EntryAttribute>,
}

impl DirectoryEntry {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn dn(&self) -> &str {
        &self.dn
    }

    pub fn set_dn(&mut self, dn: impl Into<String>) {
        self.dn = dn.into();
    }

    /// Builder-style insert.
    pub fn with<V: Into<EntryValue>>(
        mut self,
        name: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.set(name, values);
        self
    }

    /// Replace all values of an attribute.
    pub fn set<V: Into<EntryValue>>(&mut self, name: &str, values: impl IntoIterator<Item = V>) {
        let values = values.into_iter().map(Into::into).collect();
        let key = name.to_lowercase();
        match self.attributes.get_mut(&key) {
            Some(attr) => attr.values = values,
            None => {
                self.attributes.insert(
                    key,
                    EntryAttribute {
                        name: name.to_string(),
                        values,
                    },
                );
            }
        }
    }

    /// Append values to an attribute, creating it if needed.
    pub fn append<V: Into<EntryValue>>(
        &mut self,
        name: &str,
        values: impl IntoIterator<Item = V>,
    ) {
        self.attributes
            .entry(name.to_lowercase())
            .or_insert_with(|| EntryAttribute {
                name: name.to_string(),
                values: Vec::new(),
            })
            .values
            .extend(values.into_iter().map(Into::into));
    }

    pub fn get(&self, name: &str) -> Option<&EntryAttribute> {
        self.attributes.get(&name.to_lowercase())
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut EntryAttribute> {
        self.attributes.get_mut(&name.to_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.attributes.contains_key(&name.to_lowercase())
    }

    pub fn remove(&mut self, name: &str) -> Option<EntryAttribute> {
        self.attributes.remove(&name.to_lowercase())
    }

    /// Values of an attribute, empty when absent.
    pub fn values(&self, name: &str) -> &[EntryValue] {
        self.get(name).map(|a| a.values.as_slice()).unwrap_or(&[])
    }

    /// All text values of an attribute in server order.
    pub fn texts(&self, name: &str) -> Vec<String> {
        self.values(name)
            .iter()
            .filter_map(|v| v.as_text().map(str::to_string))
            .collect()
    }

    /// First text value of an attribute.
    pub fn first_text(&self, name: &str) -> Option<&str> {
        self.values(name).first().and_then(EntryValue::as_text)
    }

    pub fn attributes(&self) -> impl Iterator<Item = &EntryAttribute> {
        self.attributes.values()
    }

    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.values().map(|a| a.name.as_str())
    }

    /// Drop attributes that carry no value.
    pub fn retain_non_empty(&mut self) {
        self.attributes.retain(|_, attr| !attr.is_empty());
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

/// Escape a value for use inside an RDN (RFC 4514).
pub fn escape_dn_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    let last = value.chars().count().saturating_sub(1);

    for (i, c) in value.chars().enumerate() {
        match c {
            ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=' => {
                escaped.push('\\');
                escaped.push(c);
            }
            '#' if i == 0 => escaped.push_str("\\#"),
            ' ' if i == 0 || i == last => escaped.push_str("\\ "),
            '\0' => escaped.push_str("\\00"),
            _ => escaped.push(c),
        }
    }

    escaped
}

/// The DN with its first RDN removed. Returns `None` for a single-RDN DN.
pub fn parent_dn(dn: &str) -> Option<&str> {
    let mut escaped = false;
    for (i, c) in dn.char_indices() {
        match c {
            '\\' if !escaped => escaped = true,
            ',' if !escaped => {
                let parent = dn[i + 1..].trim_start();
                return (!parent.is_empty()).then_some(parent);
            }
            _ => escaped = false,
        }
    }
    None
}

/// Value of the first RDN, e.g. `jdoe` for `uid=jdoe,ou=people,...`.
pub fn first_rdn_value(dn: &str) -> Option<&str> {
    let rdn = match parent_dn(dn) {
        Some(parent) => dn[..dn.len() - parent.len()].trim_end_matches(|c: char| c == ',' || c == ' '),
        None => dn,
    };
    rdn.split_once('=').map(|(_, v)| v.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_lookup() {
        let entry = DirectoryEntry::new("cn=a,dc=example,dc=com")
            .with("memberOf", ["cn=g1", "cn=g2"]);
        assert_eq!(entry.texts("MEMBEROF"), vec!["cn=g1", "cn=g2"]);
        assert_eq!(entry.get("memberof").map(|a| a.name.as_str()), Some("memberOf"));
        assert!(entry.contains("MemberOf"));
    }

    #[test]
    fn test_set_replaces_values() {
        let mut entry = DirectoryEntry::new("cn=a").with("mail", ["a@example.com"]);
        entry.set("MAIL", ["b@example.com"]);
        assert_eq!(entry.texts("mail"), vec!["b@example.com"]);
        assert_eq!(entry.len(), 1);
    }

    #[test]
    fn test_append_and_retain() {
        let mut entry = DirectoryEntry::new("cn=a");
        entry.append("member", ["cn=x"]);
        entry.append("member", ["cn=y"]);
        entry.set("description", Vec::<String>::new());
        entry.set("title", [""]);
        entry.retain_non_empty();
        assert_eq!(entry.texts("member"), vec!["cn=x", "cn=y"]);
        assert!(!entry.contains("description"));
        assert!(!entry.contains("title"));
    }

    #[test]
    fn test_binary_value_as_text() {
        let value = EntryValue::Binary(vec![0xff, 0xfe]);
        assert_eq!(value.as_text(), None);
        assert_eq!(EntryValue::Binary(b"abc".to_vec()).as_text(), Some("abc"));
    }

    #[test]
    fn test_escape_dn_value() {
        assert_eq!(escape_dn_value("John Doe"), "John Doe");
        assert_eq!(escape_dn_value("Doe, John"), "Doe\\, John");
        assert_eq!(escape_dn_value(" lead"), "\\ lead");
        assert_eq!(escape_dn_value("trail "), "trail\\ ");
        assert_eq!(escape_dn_value("#hash"), "\\#hash");
        assert_eq!(escape_dn_value("a=b+c"), "a\\=b\\+c");
        assert_eq!(escape_dn_value(""), "");
    }

    #[test]
    fn test_parent_dn() {
        assert_eq!(
            parent_dn("cn=Test,ou=people,dc=example,dc=com"),
            Some("ou=people,dc=example,dc=com")
        );
        assert_eq!(parent_dn("cn=Doe\\, John,dc=example"), Some("dc=example"));
        assert_eq!(parent_dn("dc=com"), None);
    }

    #[test]
    fn test_first_rdn_value() {
        assert_eq!(first_rdn_value("uid=jdoe,ou=people,dc=example,dc=com"), Some("jdoe"));
        assert_eq!(first_rdn_value("dc=com"), Some("com"));
        assert_eq!(first_rdn_value("garbage"), None);
    }
}
