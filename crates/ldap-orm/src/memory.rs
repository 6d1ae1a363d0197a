//! In-memory directory
//!
//! A [`Directory`] backed by a map of entries. It evaluates RFC 4515
//! filters, honours scopes, size limits and paging cookies, and answers
//! with the result codes a server would (16, 20, 32, 53, 66, 68). In the
//! Active Directory dialect it maintains `distinguishedName` the way AD does.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::directory::{Directory, Modification, SearchPage, SearchRequest, SearchScope};
use crate::entry::{parent_dn, DirectoryEntry, EntryValue};
use crate::error::{
    OrmError, OrmResult, RC_ATTRIBUTE_OR_VALUE_EXISTS, RC_ENTRY_ALREADY_EXISTS,
    RC_NO_SUCH_ATTRIBUTE, RC_NO_SUCH_OBJECT, RC_UNWILLING_TO_PERFORM,
};
use crate::timestamp::Dialect;

/// LDAP result code: notAllowedOnNonLeaf.
const RC_NOT_ALLOWED_ON_NON_LEAF: u32 = 66;
/// LDAP result code: protocolError, used for unparseable filters.
const RC_PROTOCOL_ERROR: u32 = 2;

/// Operation received by an [`InMemoryDirectory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedOperation {
    Search(SearchRequest),
    Add(String),
    Modify(String, Vec<Modification>),
    Delete(String),
    Rename {
        dn: String,
        new_rdn: String,
        new_parent: Option<String>,
    },
}

/// Directory held in memory.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    dialect: Dialect,
    entries: BTreeMap<String, DirectoryEntry>,
    operations: Vec<RecordedOperation>,
}

fn normalize_dn(dn: &str) -> String {
    dn.split(',')
        .map(str::trim)
        .collect::<Vec<_>>()
        .join(",")
        .to_lowercase()
}

impl InMemoryDirectory {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            ..Default::default()
        }
    }

    /// Seed an entry without recording an operation.
    pub fn insert(&mut self, entry: DirectoryEntry) {
        self.entries.insert(normalize_dn(entry.dn()), entry);
    }

    pub fn with_entry(mut self, entry: DirectoryEntry) -> Self {
        self.insert(entry);
        self
    }

    pub fn get(&self, dn: &str) -> Option<&DirectoryEntry> {
        self.entries.get(&normalize_dn(dn))
    }

    pub fn contains(&self, dn: &str) -> bool {
        self.entries.contains_key(&normalize_dn(dn))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Operations received so far, oldest first.
    pub fn operations(&self) -> &[RecordedOperation] {
        &self.operations
    }

    /// Write operations (everything but searches).
    pub fn writes(&self) -> Vec<&RecordedOperation> {
        self.operations
            .iter()
            .filter(|op| !matches!(op, RecordedOperation::Search(_)))
            .collect()
    }

    pub fn clear_operations(&mut self) {
        self.operations.clear();
    }

    fn in_scope(&self, base: &str, scope: SearchScope, dn: &str) -> bool {
        match scope {
            SearchScope::Base => dn == base,
            SearchScope::OneLevel => parent_dn(dn) == Some(base),
            SearchScope::Subtree => {
                base.is_empty() || dn == base || dn.ends_with(&format!(",{base}"))
            }
        }
    }

    fn project(entry: &DirectoryEntry, attributes: &[String]) -> DirectoryEntry {
        if attributes.is_empty() || attributes.iter().any(|a| a == "*") {
            return entry.clone();
        }
        let mut projected = DirectoryEntry::new(entry.dn());
        for name in attributes {
            if let Some(attr) = entry.get(name) {
                projected.set(&attr.name, attr.values.iter().cloned());
            }
        }
        projected
    }
}

fn values_match(a: &EntryValue, b: &EntryValue) -> bool {
    match (a.as_text(), b.as_text()) {
        (Some(x), Some(y)) => x.eq_ignore_ascii_case(y),
        _ => a.as_bytes() == b.as_bytes(),
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn search(&mut self, request: &SearchRequest) -> OrmResult<SearchPage> {
        self.operations
            .push(RecordedOperation::Search(request.clone()));

        let base = normalize_dn(&request.base);
        if !base.is_empty() && !self.entries.contains_key(&base) {
            return Err(OrmError::directory(
                "search",
                &request.base,
                RC_NO_SUCH_OBJECT,
                "No such object",
            ));
        }

        let filter = MemFilter::parse(&request.filter).map_err(|message| {
            OrmError::directory("search", &request.base, RC_PROTOCOL_ERROR, message)
        })?;

        let mut matched: Vec<DirectoryEntry> = self
            .entries
            .iter()
            .filter(|(dn, _)| self.in_scope(&base, request.scope, dn))
            .filter(|(_, entry)| filter.matches(entry))
            .map(|(_, entry)| Self::project(entry, &request.attributes))
            .collect();

        if request.size_limit > 0 {
            matched.truncate(request.size_limit as usize);
        }

        let mut page = SearchPage::default();
        match &request.page {
            Some(control) if control.size > 0 => {
                let offset = std::str::from_utf8(&control.cookie)
                    .ok()
                    .and_then(|s| s.parse::<usize>().ok())
                    .unwrap_or(0);
                let end = (offset + control.size as usize).min(matched.len());
                page.entries = matched.get(offset..end).map(<[_]>::to_vec).unwrap_or_default();
                if end < matched.len() {
                    page.cookie = end.to_string().into_bytes();
                }
            }
            _ => page.entries = matched,
        }

        Ok(page)
    }

    async fn add(&mut self, entry: &DirectoryEntry) -> OrmResult<()> {
        self.operations
            .push(RecordedOperation::Add(entry.dn().to_string()));

        let key = normalize_dn(entry.dn());
        if self.entries.contains_key(&key) {
            return Err(OrmError::directory(
                "add",
                entry.dn(),
                RC_ENTRY_ALREADY_EXISTS,
                "Already exists",
            ));
        }
        let mut stored = entry.clone();
        stored.retain_non_empty();
        if self.dialect == Dialect::ActiveDirectory {
            stored.set("distinguishedName", [entry.dn()]);
        }
        self.entries.insert(key, stored);
        Ok(())
    }

    async fn modify(&mut self, dn: &str, modifications: &[Modification]) -> OrmResult<()> {
        self.operations
            .push(RecordedOperation::Modify(dn.to_string(), modifications.to_vec()));

        let key = normalize_dn(dn);
        let Some(current) = self.entries.get(&key) else {
            return Err(OrmError::directory("modify", dn, RC_NO_SUCH_OBJECT, "No such object"));
        };

        // Applied to a copy so a failing modification leaves the entry untouched.
        let mut updated = current.clone();
        for modification in modifications {
            match modification {
                Modification::Add(attr, values) => {
                    for value in values {
                        if updated.values(attr).iter().any(|v| values_match(v, value)) {
                            return Err(OrmError::directory(
                                "modify",
                                dn,
                                RC_ATTRIBUTE_OR_VALUE_EXISTS,
                                format!("Attribute or value exists: {attr}"),
                            ));
                        }
                        updated.append(attr, [value.clone()]);
                    }
                }
                Modification::Replace(attr, values) => {
                    if values.is_empty() {
                        updated.remove(attr);
                    } else {
                        updated.set(attr, values.iter().cloned());
                    }
                }
                Modification::Delete(attr, values) => {
                    let no_such_attribute = || {
                        let code = if self.dialect == Dialect::ActiveDirectory
                            && attr.eq_ignore_ascii_case("member")
                        {
                            RC_UNWILLING_TO_PERFORM
                        } else {
                            RC_NO_SUCH_ATTRIBUTE
                        };
                        OrmError::directory(
                            "modify",
                            dn,
                            code,
                            format!("No such attribute: {attr}"),
                        )
                    };
                    let Some(existing) = updated.get_mut(attr) else {
                        return Err(no_such_attribute());
                    };
                    if values.is_empty() {
                        updated.remove(attr);
                        continue;
                    }
                    for value in values {
                        let before = existing.values.len();
                        existing.values.retain(|v| !values_match(v, value));
                        if existing.values.len() == before {
                            return Err(no_such_attribute());
                        }
                    }
                    if existing.values.is_empty() {
                        updated.remove(attr);
                    }
                }
            }
        }

        self.entries.insert(key, updated);
        Ok(())
    }

    async fn delete(&mut self, dn: &str) -> OrmResult<()> {
        self.operations
            .push(RecordedOperation::Delete(dn.to_string()));

        let key = normalize_dn(dn);
        if !self.entries.contains_key(&key) {
            return Err(OrmError::directory("delete", dn, RC_NO_SUCH_OBJECT, "No such object"));
        }
        if self
            .entries
            .keys()
            .any(|other| parent_dn(other) == Some(key.as_str()))
        {
            return Err(OrmError::directory(
                "delete",
                dn,
                RC_NOT_ALLOWED_ON_NON_LEAF,
                "Operation not allowed on non-leaf",
            ));
        }
        self.entries.remove(&key);
        Ok(())
    }

    async fn rename(
        &mut self,
        dn: &str,
        new_rdn: &str,
        new_parent: Option<&str>,
        delete_old_rdn: bool,
    ) -> OrmResult<()> {
        self.operations.push(RecordedOperation::Rename {
            dn: dn.to_string(),
            new_rdn: new_rdn.to_string(),
            new_parent: new_parent.map(str::to_string),
        });

        let key = normalize_dn(dn);
        let Some(mut entry) = self.entries.remove(&key) else {
            return Err(OrmError::directory("rename", dn, RC_NO_SUCH_OBJECT, "No such object"));
        };

        let parent = new_parent.or_else(|| parent_dn(dn));
        let new_dn = match parent {
            Some(parent) => format!("{new_rdn},{parent}"),
            None => new_rdn.to_string(),
        };
        let new_key = normalize_dn(&new_dn);
        if self.entries.contains_key(&new_key) {
            self.entries.insert(key, entry);
            return Err(OrmError::directory("rename", dn, RC_ENTRY_ALREADY_EXISTS, "Already exists"));
        }

        if delete_old_rdn {
            let old_rdn = dn.split(',').next().unwrap_or_default();
            if let Some((attr, value)) = old_rdn.split_once('=') {
                if let Some(existing) = entry.get_mut(attr.trim()) {
                    existing
                        .values
                        .retain(|v| !values_match(v, &EntryValue::from(value.trim())));
                }
            }
        }
        if let Some((attr, value)) = new_rdn.split_once('=') {
            let value = EntryValue::from(value.trim());
            if !entry.values(attr.trim()).iter().any(|v| values_match(v, &value)) {
                entry.append(attr.trim(), [value]);
            }
        }
        entry.retain_non_empty();
        if self.dialect == Dialect::ActiveDirectory {
            entry.set("distinguishedName", [new_dn.as_str()]);
        }
        entry.set_dn(new_dn);

        // Move descendants along with the entry.
        let suffix = format!(",{key}");
        let descendants: Vec<String> = self
            .entries
            .keys()
            .filter(|k| k.ends_with(&suffix))
            .cloned()
            .collect();
        for old_key in descendants {
            if let Some(mut child) = self.entries.remove(&old_key) {
                let relative = old_key.len() - key.len();
                let prefix = child
                    .dn()
                    .get(..child.dn().len().saturating_sub(dn.len()))
                    .filter(|p| p.len() == relative)
                    .map_or_else(|| old_key[..relative].to_string(), str::to_string);
                child.set_dn(format!("{prefix}{}", entry.dn()));
                self.entries.insert(normalize_dn(child.dn()), child);
            }
        }

        self.entries.insert(new_key, entry);
        Ok(())
    }
}

/// Parsed RFC 4515 filter, evaluated against stored entries.
#[derive(Debug, Clone, PartialEq)]
enum MemFilter {
    And(Vec<MemFilter>),
    Or(Vec<MemFilter>),
    Not(Box<MemFilter>),
    Present(String),
    Equal(String, Vec<String>),
    GreaterOrEqual(String, String),
    LessOrEqual(String, String),
}

impl MemFilter {
    fn parse(input: &str) -> Result<Self, String> {
        let (filter, rest) = Self::parse_filter(input.trim())?;
        if !rest.trim().is_empty() {
            return Err(format!("trailing input after filter: '{rest}'"));
        }
        Ok(filter)
    }

    fn parse_filter(input: &str) -> Result<(Self, &str), String> {
        let body = input
            .strip_prefix('(')
            .ok_or_else(|| format!("expected '(' at '{input}'"))?;

        match body.chars().next() {
            Some('&') => {
                let (children, rest) = Self::parse_list(&body[1..])?;
                Ok((MemFilter::And(children), rest))
            }
            Some('|') => {
                let (children, rest) = Self::parse_list(&body[1..])?;
                Ok((MemFilter::Or(children), rest))
            }
            Some('!') => {
                let (child, rest) = Self::parse_filter(&body[1..])?;
                let rest = rest
                    .strip_prefix(')')
                    .ok_or_else(|| "unterminated '!' clause".to_string())?;
                Ok((MemFilter::Not(Box::new(child)), rest))
            }
            Some(_) => {
                let end = body
                    .find(')')
                    .ok_or_else(|| format!("unterminated item '{body}'"))?;
                Ok((Self::parse_item(&body[..end])?, &body[end + 1..]))
            }
            None => Err("empty filter".to_string()),
        }
    }

    fn parse_list(mut input: &str) -> Result<(Vec<Self>, &str), String> {
        let mut children = Vec::new();
        loop {
            if let Some(rest) = input.strip_prefix(')') {
                return Ok((children, rest));
            }
            if input.is_empty() {
                return Err("unterminated filter list".to_string());
            }
            let (child, rest) = Self::parse_filter(input)?;
            children.push(child);
            input = rest;
        }
    }

    fn parse_item(item: &str) -> Result<Self, String> {
        let eq = item
            .find('=')
            .ok_or_else(|| format!("no operator in '{item}'"))?;
        let value = &item[eq + 1..];
        let (attribute, op) = match item[..eq].chars().last() {
            Some('>') => (&item[..eq - 1], '>'),
            Some('<') => (&item[..eq - 1], '<'),
            Some('~') => (&item[..eq - 1], '='),
            _ => (&item[..eq], '='),
        };
        if attribute.is_empty() {
            return Err(format!("no attribute in '{item}'"));
        }
        let attribute = attribute.to_string();

        Ok(match op {
            '>' => MemFilter::GreaterOrEqual(attribute, unescape(value)?),
            '<' => MemFilter::LessOrEqual(attribute, unescape(value)?),
            _ if value == "*" => MemFilter::Present(attribute),
            _ => MemFilter::Equal(
                attribute,
                value
                    .split('*')
                    .map(unescape)
                    .collect::<Result<Vec<_>, _>>()?,
            ),
        })
    }

    fn matches(&self, entry: &DirectoryEntry) -> bool {
        match self {
            MemFilter::And(children) => children.iter().all(|c| c.matches(entry)),
            MemFilter::Or(children) => children.iter().any(|c| c.matches(entry)),
            MemFilter::Not(child) => !child.matches(entry),
            MemFilter::Present(attr) => {
                attr.eq_ignore_ascii_case("objectClass") || entry.contains(attr)
            }
            MemFilter::Equal(attr, parts) => entry
                .texts(attr)
                .iter()
                .any(|v| wildcard_match(&v.to_lowercase(), parts)),
            MemFilter::GreaterOrEqual(attr, bound) => entry
                .texts(attr)
                .iter()
                .any(|v| compare_values(v, bound).is_ge()),
            MemFilter::LessOrEqual(attr, bound) => entry
                .texts(attr)
                .iter()
                .any(|v| compare_values(v, bound).is_le()),
        }
    }
}

fn unescape(value: &str) -> Result<String, String> {
    let mut bytes = Vec::with_capacity(value.len());
    let mut iter = value.bytes();
    while let Some(b) = iter.next() {
        if b == b'\\' {
            let hex: Vec<u8> = iter.by_ref().take(2).collect();
            let hex = std::str::from_utf8(&hex).map_err(|e| e.to_string())?;
            let byte = u8::from_str_radix(hex, 16)
                .map_err(|_| format!("invalid escape '\\{hex}' in '{value}'"))?;
            bytes.push(byte);
        } else {
            bytes.push(b);
        }
    }
    String::from_utf8(bytes).map_err(|e| e.to_string())
}

/// Substring/equality match. `parts` are the value split on `*`.
fn wildcard_match(value: &str, parts: &[String]) -> bool {
    let parts: Vec<String> = parts.iter().map(|p| p.to_lowercase()).collect();
    match parts.as_slice() {
        [] => false,
        [exact] => value == exact,
        [first, middle @ .., last] => {
            let Some(mut rest) = value.strip_prefix(first.as_str()) else {
                return false;
            };
            for part in middle {
                match rest.find(part.as_str()) {
                    Some(i) => rest = &rest[i + part.len()..],
                    None => return false,
                }
            }
            rest.len() >= last.len() && rest.ends_with(last.as_str())
        }
    }
}

fn compare_values(value: &str, bound: &str) -> std::cmp::Ordering {
    match (value.parse::<i64>(), bound.parse::<i64>()) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => value.to_lowercase().cmp(&bound.to_lowercase()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::PageControl;

    fn directory() -> InMemoryDirectory {
        InMemoryDirectory::new(Dialect::Generic)
            .with_entry(DirectoryEntry::new("dc=example,dc=com").with("objectClass", ["domain"]))
            .with_entry(
                DirectoryEntry::new("ou=people,dc=example,dc=com")
                    .with("objectClass", ["organizationalUnit"]),
            )
            .with_entry(
                DirectoryEntry::new("cn=Alice,ou=people,dc=example,dc=com")
                    .with("objectClass", ["top", "person"])
                    .with("cn", ["Alice"])
                    .with("sn", ["Smith"])
                    .with("uidNumber", ["1001"]),
            )
            .with_entry(
                DirectoryEntry::new("cn=Bob,ou=people,dc=example,dc=com")
                    .with("objectClass", ["top", "person"])
                    .with("cn", ["Bob"])
                    .with("sn", ["Jones"])
                    .with("uidNumber", ["999"]),
            )
    }

    async fn search_dns(dir: &mut InMemoryDirectory, filter: &str) -> Vec<String> {
        let request = SearchRequest::new("dc=example,dc=com", SearchScope::Subtree, filter);
        dir.search(&request)
            .await
            .unwrap()
            .entries
            .iter()
            .map(|e| e.dn().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_filter_evaluation() {
        let mut dir = directory();
        assert_eq!(
            search_dns(&mut dir, "(&(objectClass=person)(sn=smith))").await,
            vec!["cn=Alice,ou=people,dc=example,dc=com"]
        );
        assert_eq!(search_dns(&mut dir, "(|(cn=a*)(cn=*ob))").await.len(), 2);
        assert_eq!(search_dns(&mut dir, "(uidNumber>=1000)").await.len(), 1);
        assert_eq!(search_dns(&mut dir, "(!(objectClass=person))").await.len(), 2);
        assert_eq!(search_dns(&mut dir, "(cn=\\41lice)").await.len(), 1);
    }

    #[tokio::test]
    async fn test_scopes() {
        let mut dir = directory();
        let children = dir.list_children("ou=people,dc=example,dc=com").await.unwrap();
        assert_eq!(children.len(), 2);
        let entry = dir.read("cn=Bob,ou=people,dc=example,dc=com", &[]).await.unwrap();
        assert_eq!(entry.unwrap().first_text("sn"), Some("Jones"));
        assert!(dir.read("cn=Nobody,dc=example,dc=com", &[]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_paging() {
        let mut dir = directory();
        let mut request = SearchRequest::new("dc=example,dc=com", SearchScope::Subtree, "(objectClass=*)")
            .with_page(PageControl {
                size: 3,
                ..Default::default()
            });
        let first = dir.search(&request).await.unwrap();
        assert_eq!(first.entries.len(), 3);
        assert!(first.has_more_pages());

        if let Some(page) = request.page.as_mut() {
            page.cookie = first.cookie.clone();
        }
        let second = dir.search(&request).await.unwrap();
        assert_eq!(second.entries.len(), 1);
        assert!(!second.has_more_pages());
    }

    #[tokio::test]
    async fn test_modify_result_codes() {
        let mut dir = directory();
        let dn = "cn=Alice,ou=people,dc=example,dc=com";

        let err = dir
            .modify(dn, &[Modification::Delete("mail".into(), vec![])])
            .await
            .unwrap_err();
        assert_eq!(err.result_code(), Some(RC_NO_SUCH_ATTRIBUTE));

        let err = dir
            .modify(dn, &[Modification::Add("sn".into(), vec!["Smith".into()])])
            .await
            .unwrap_err();
        assert_eq!(err.result_code(), Some(RC_ATTRIBUTE_OR_VALUE_EXISTS));

        dir.modify(dn, &[Modification::Replace("sn".into(), vec!["Smythe".into()])])
            .await
            .unwrap();
        assert_eq!(dir.get(dn).unwrap().first_text("sn"), Some("Smythe"));
    }

    #[tokio::test]
    async fn test_failed_modify_is_atomic() {
        let mut dir = directory();
        let dn = "cn=Bob,ou=people,dc=example,dc=com";
        let result = dir
            .modify(
                dn,
                &[
                    Modification::Replace("sn".into(), vec!["Changed".into()]),
                    Modification::Delete("mail".into(), vec![]),
                ],
            )
            .await;
        assert!(result.is_err());
        assert_eq!(dir.get(dn).unwrap().first_text("sn"), Some("Jones"));
    }

    #[tokio::test]
    async fn test_delete_non_leaf() {
        let mut dir = directory();
        let err = dir.delete("ou=people,dc=example,dc=com").await.unwrap_err();
        assert_eq!(err.result_code(), Some(66));
    }

    #[tokio::test]
    async fn test_rename_moves_entry() {
        let mut dir = directory();
        dir.rename("cn=Bob,ou=people,dc=example,dc=com", "cn=Robert", None, true)
            .await
            .unwrap();
        let entry = dir.get("cn=Robert,ou=people,dc=example,dc=com").unwrap();
        assert_eq!(entry.texts("cn"), vec!["Robert"]);
        assert!(!dir.contains("cn=Bob,ou=people,dc=example,dc=com"));
    }

    #[test]
    fn test_wildcard_match() {
        let parts = |s: &str| s.split('*').map(str::to_string).collect::<Vec<_>>();
        assert!(wildcard_match("alice", &parts("a*e")));
        assert!(wildcard_match("alice", &parts("*lic*")));
        assert!(!wildcard_match("alice", &parts("b*")));
        assert!(!wildcard_match("ab", &parts("ab*b")));
    }
}
