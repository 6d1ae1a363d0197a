//! Directory primitives
//!
//! [`Directory`] is the seam between the mapping engine and a concrete
//! directory connection: `ldap-orm-session` implements it over ldap3, and
//! the in-memory directory behind the `test-util` feature implements it for
//! tests.

use async_trait::async_trait;

use crate::entry::{DirectoryEntry, EntryValue};
use crate::error::OrmResult;
use crate::timestamp::Dialect;

/// Search scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    /// The base entry only.
    Base,
    /// Immediate children of the base.
    OneLevel,
    /// The base and everything below it.
    Subtree,
}

/// Simple paged results control (RFC 2696).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageControl {
    pub size: i32,
    /// Opaque cookie from the previous page; empty for the first page.
    pub cookie: Vec<u8>,
    pub critical: bool,
}

/// One search call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub base: String,
    pub scope: SearchScope,
    pub filter: String,
    /// Requested attributes; empty requests all user attributes.
    pub attributes: Vec<String>,
    /// Server-side size limit; 0 for none.
    pub size_limit: i32,
    pub page: Option<PageControl>,
}

impl SearchRequest {
    pub fn new(base: impl Into<String>, scope: SearchScope, filter: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            scope,
            filter: filter.into(),
            attributes: Vec::new(),
            size_limit: 0,
            page: None,
        }
    }

    pub fn with_attributes<S: Into<String>>(mut self, attributes: impl IntoIterator<Item = S>) -> Self {
        self.attributes = attributes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_size_limit(mut self, size_limit: i32) -> Self {
        self.size_limit = size_limit;
        self
    }

    pub fn with_page(mut self, page: PageControl) -> Self {
        self.page = Some(page);
        self
    }
}

/// Result of one search call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPage {
    pub entries: Vec<DirectoryEntry>,
    /// Cookie for the next page; empty when the result set is exhausted or
    /// paging was not requested.
    pub cookie: Vec<u8>,
    /// Referral URLs returned instead of entries.
    pub referrals: Vec<String>,
}

impl SearchPage {
    pub fn has_more_pages(&self) -> bool {
        !self.cookie.is_empty()
    }
}

/// One change within a modify operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Modification {
    /// Add values to an attribute.
    Add(String, Vec<EntryValue>),
    /// Replace all values of an attribute.
    Replace(String, Vec<EntryValue>),
    /// Remove the listed values, or the whole attribute when empty.
    Delete(String, Vec<EntryValue>),
}

impl Modification {
    pub fn attribute(&self) -> &str {
        match self {
            Modification::Add(a, _) | Modification::Replace(a, _) | Modification::Delete(a, _) => a,
        }
    }
}

/// Raw directory operations against one connection.
///
/// Methods take `&mut self`: a connection is used by one caller at a time,
/// and paging state belongs to it.
#[async_trait]
pub trait Directory: Send {
    /// Timestamp dialect of the server.
    fn dialect(&self) -> Dialect;

    async fn search(&mut self, request: &SearchRequest) -> OrmResult<SearchPage>;

    async fn add(&mut self, entry: &DirectoryEntry) -> OrmResult<()>;

    async fn modify(&mut self, dn: &str, modifications: &[Modification]) -> OrmResult<()>;

    async fn delete(&mut self, dn: &str) -> OrmResult<()>;

    async fn rename(
        &mut self,
        dn: &str,
        new_rdn: &str,
        new_parent: Option<&str>,
        delete_old_rdn: bool,
    ) -> OrmResult<()>;

    /// Base-scope read. A missing entry is `Ok(None)`.
    async fn read(&mut self, dn: &str, attributes: &[String]) -> OrmResult<Option<DirectoryEntry>> {
        let request = SearchRequest::new(dn, SearchScope::Base, crate::filter::MATCH_ALL)
            .with_attributes(attributes.iter().cloned());
        match self.search(&request).await {
            Ok(page) => Ok(page.entries.into_iter().next()),
            Err(e) if e.result_code() == Some(crate::error::RC_NO_SUCH_OBJECT) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// DNs of the immediate children of `dn`.
    async fn list_children(&mut self, dn: &str) -> OrmResult<Vec<String>> {
        let request = SearchRequest::new(dn, SearchScope::OneLevel, crate::filter::MATCH_ALL)
            .with_attributes(["1.1"]);
        let page = self.search(&request).await?;
        Ok(page
            .entries
            .into_iter()
            .map(|entry| entry.dn().to_string())
            .collect())
    }
}
