//! Entity manager
//!
//! Ties the mapper, the change-set engine and a [`Directory`] together:
//! retrieval with paging and link resolution, upserts, recursive deletes,
//! group membership, renames and sequence values.

use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::changeset::{ChangeOperandSet, ChangeSetEngine};
use crate::directory::{Directory, Modification, PageControl, SearchRequest, SearchScope};
use crate::entity::{Entity, EntityRecord};
use crate::entry::{parent_dn, DirectoryEntry, EntryValue};
use crate::error::{OrmError, OrmResult, RC_NO_SUCH_OBJECT};
use crate::filter::{self, FilterExpression};
use crate::mapper::EntityMapper;
use crate::metadata::{EntityMetadata, FieldKind};
use crate::repository::Repository;
use crate::template::{HandlebarsRenderer, TemplateRenderer};
use crate::value::FieldValue;

/// Default upper bound on entries returned by one retrieval.
pub const DEFAULT_MAX_RESULTS: i32 = 20_000;
/// Default depth of linked-entry resolution.
pub const DEFAULT_MAX_LINK_DEPTH: usize = 3;
/// Default multi-valued attribute holding group members.
pub const DEFAULT_MEMBERSHIP_ATTRIBUTE: &str = "member";

const SEQUENCE_OBJECT_CLASS: &str = "integerSequence";
const SEQUENCE_NEXT_VALUE: &str = "nextValue";
const SEQUENCE_INCREMENT: &str = "increment";
const SEQUENCE_ATTEMPTS: usize = 5;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Search filter for a retrieval.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchFilter {
    Expression(FilterExpression),
    /// RFC 4515 string, AND-ed with the object class.
    Raw(String),
}

impl From<FilterExpression> for SearchFilter {
    fn from(value: FilterExpression) -> Self {
        SearchFilter::Expression(value)
    }
}

impl From<&str> for SearchFilter {
    fn from(value: &str) -> Self {
        SearchFilter::Raw(value.to_string())
    }
}

impl From<String> for SearchFilter {
    fn from(value: String) -> Self {
        SearchFilter::Raw(value)
    }
}

/// Options for [`EntityManager::retrieve`].
#[derive(Debug, Clone, Default)]
pub struct RetrieveOptions {
    /// Attributes to fetch. Empty fetches every mapped attribute. MUST
    /// attributes are always added.
    pub attributes: Vec<String>,
    pub filter: Option<SearchFilter>,
    /// Size limit; the manager default when unset.
    pub max: Option<i32>,
    /// Search base; the rendered search-base template when unset.
    pub search_base: Option<String>,
    /// Page size; the manager default when unset.
    pub page_size: Option<i32>,
    /// Cookie returned by the previous page.
    pub page_cookie: Vec<u8>,
    pub page_critical: bool,
    /// Fetch only the unique identifier.
    pub check_only: bool,
}

impl RetrieveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, filter: impl Into<SearchFilter>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_attributes<S: Into<String>>(mut self, attributes: impl IntoIterator<Item = S>) -> Self {
        self.attributes = attributes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max(mut self, max: i32) -> Self {
        self.max = Some(max);
        self
    }

    pub fn with_search_base(mut self, base: impl Into<String>) -> Self {
        self.search_base = Some(base.into());
        self
    }

    pub fn with_page(mut self, size: i32, cookie: Vec<u8>) -> Self {
        self.page_size = Some(size);
        self.page_cookie = cookie;
        self
    }

    pub fn with_page_critical(mut self, critical: bool) -> Self {
        self.page_critical = critical;
        self
    }

    pub fn check_only(mut self) -> Self {
        self.check_only = true;
        self
    }
}

/// Options for [`EntityManager::persist`].
#[derive(Debug, Clone)]
pub struct PersistOptions {
    /// Skip the existence check and add directly.
    pub assume_new: bool,
    /// Enforce MUST fields before touching the directory.
    pub check_must: bool,
    /// Attributes cleared on purpose. They are deleted even if they were
    /// never retrieved.
    pub cleared_attributes: Vec<String>,
    /// Values appended to existing attributes on update.
    pub append: Vec<(String, Vec<EntryValue>)>,
}

impl Default for PersistOptions {
    fn default() -> Self {
        Self {
            assume_new: false,
            check_must: true,
            cleared_attributes: Vec::new(),
            append: Vec::new(),
        }
    }
}

impl PersistOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assume_new(mut self) -> Self {
        self.assume_new = true;
        self
    }

    pub fn skip_must_check(mut self) -> Self {
        self.check_must = false;
        self
    }

    pub fn clear(mut self, attribute: impl Into<String>) -> Self {
        self.cleared_attributes.push(attribute.into());
        self
    }

    pub fn append<V: Into<EntryValue>>(
        mut self,
        attribute: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.append
            .push((attribute.into(), values.into_iter().map(Into::into).collect()));
        self
    }
}

/// What [`EntityManager::persist`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistOutcome {
    Created,
    Updated {
        modified: Vec<String>,
        deleted: Vec<String>,
    },
    Unchanged,
}

/// Entity-level operations over one directory connection.
pub struct EntityManager<D: Directory> {
    directory: D,
    mapper: EntityMapper,
    changes: ChangeSetEngine,
    membership_attribute: String,
    max_results: i32,
    max_link_depth: usize,
    page_size: Option<i32>,
    page_cookie: Vec<u8>,
    search_base: Option<String>,
}

impl<D: Directory> std::fmt::Debug for EntityManager<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityManager")
            .field("mapper", &self.mapper)
            .field("membership_attribute", &self.membership_attribute)
            .field("max_results", &self.max_results)
            .field("max_link_depth", &self.max_link_depth)
            .field("page_size", &self.page_size)
            .field("search_base", &self.search_base)
            .finish_non_exhaustive()
    }
}

impl<D: Directory> EntityManager<D> {
    pub fn new(directory: D) -> Self {
        let dialect = directory.dialect();
        Self {
            directory,
            mapper: EntityMapper::new(dialect, Arc::new(HandlebarsRenderer::new())),
            changes: ChangeSetEngine::new(),
            membership_attribute: DEFAULT_MEMBERSHIP_ATTRIBUTE.to_string(),
            max_results: DEFAULT_MAX_RESULTS,
            max_link_depth: DEFAULT_MAX_LINK_DEPTH,
            page_size: None,
            page_cookie: Vec::new(),
            search_base: None,
        }
    }

    /// Use another template engine for DN, search-base and sequence templates.
    pub fn with_renderer(mut self, renderer: Arc<dyn TemplateRenderer>) -> Self {
        self.mapper = EntityMapper::new(self.directory.dialect(), renderer);
        self
    }

    /// Extend the set of attributes never written on update.
    pub fn with_restricted_attributes<S: AsRef<str>>(
        mut self,
        attributes: impl IntoIterator<Item = S>,
    ) -> Self {
        self.changes = self.changes.with_restricted(attributes);
        self
    }

    pub fn with_membership_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.membership_attribute = attribute.into();
        self
    }

    pub fn with_max_results(mut self, max_results: i32) -> Self {
        self.max_results = max_results;
        self
    }

    /// Depth of linked-entry resolution; 0 leaves links as DN stubs.
    pub fn with_max_link_depth(mut self, depth: usize) -> Self {
        self.max_link_depth = depth;
        self
    }

    /// Default page size for retrievals.
    pub fn with_page_size(mut self, page_size: Option<i32>) -> Self {
        self.page_size = page_size;
        self
    }

    /// Base used for entity types without a search-base template.
    pub fn with_search_base(mut self, base: impl Into<String>) -> Self {
        self.search_base = Some(base.into());
        self
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }

    pub fn directory_mut(&mut self) -> &mut D {
        &mut self.directory
    }

    pub fn into_directory(self) -> D {
        self.directory
    }

    pub fn mapper(&self) -> &EntityMapper {
        &self.mapper
    }

    /// Cookie returned by the last paged retrieval.
    pub fn page_cookie(&self) -> &[u8] {
        &self.page_cookie
    }

    pub fn has_more_pages(&self) -> bool {
        !self.page_cookie.is_empty()
    }

    /// Typed query facade for one entity type.
    pub fn repository<T: Entity>(&mut self) -> Repository<'_, D, T> {
        Repository::new(self)
    }

    pub fn check_must<T: Entity>(&self, entity: &T) -> OrmResult<()> {
        self.mapper.check_must(&entity.to_record())
    }

    /// The entity's DN, or its rendered DN template.
    pub fn build_dn<T: Entity>(&self, entity: &T) -> OrmResult<String> {
        self.mapper.record_dn(&entity.to_record())
    }

    pub fn to_entry<T: Entity>(&self, entity: &T) -> OrmResult<DirectoryEntry> {
        self.mapper.to_entry(&entity.to_record())
    }

    fn search_base(&self, metadata: &'static EntityMetadata) -> OrmResult<String> {
        self.mapper
            .search_base(metadata)?
            .or_else(|| self.search_base.clone())
            .ok_or_else(|| OrmError::InvalidMetadata {
                object_class: metadata.object_class().to_string(),
                message: "no search base given and no search-base template declared".to_string(),
            })
    }

    /// Attributes to request: the requested ones plus MUST attributes, or
    /// every mapped attribute.
    fn requested_attributes(metadata: &EntityMetadata, options: &RetrieveOptions) -> OrmResult<Vec<String>> {
        if options.check_only {
            let unique = metadata
                .unique_identifier()
                .ok_or_else(|| OrmError::MissingUniqueIdentifier {
                    object_class: metadata.object_class().to_string(),
                    message: "check-only retrieval needs a unique identifier".to_string(),
                })?;
            return Ok(vec![unique.attribute.clone()]);
        }
        if options.attributes.is_empty() {
            return Ok(metadata.attributes().map(str::to_string).collect());
        }

        let mut attributes = options.attributes.clone();
        for field in metadata.must_fields() {
            if !attributes
                .iter()
                .any(|a| a.eq_ignore_ascii_case(&field.attribute))
            {
                attributes.push(field.attribute.clone());
            }
        }
        Ok(attributes)
    }

    /// Search for entities of type `T`.
    ///
    /// The filter is AND-ed with the object class. When paging is in use
    /// the returned cookie is available from [`page_cookie`](Self::page_cookie).
    #[instrument(skip(self, options), fields(object_class = %T::metadata().object_class()))]
    pub async fn retrieve<T: Entity>(&mut self, options: RetrieveOptions) -> OrmResult<Vec<T>> {
        let metadata = T::metadata();
        let dialect = self.mapper.dialect();
        let object_class = metadata.object_class();

        let filter = match &options.filter {
            None => FilterExpression::eq("objectClass", object_class).format(dialect),
            Some(SearchFilter::Expression(expr)) => expr
                .clone()
                .with_object_class(object_class)
                .format(dialect),
            Some(SearchFilter::Raw(raw)) => {
                let raw = FilterExpression::raw(raw.as_str()).format(dialect);
                format!("(&(objectClass={}){raw})", filter::escape(object_class))
            }
        };

        let base = match &options.search_base {
            Some(base) => base.clone(),
            None => self.search_base(metadata)?,
        };

        let mut request = SearchRequest::new(base, SearchScope::Subtree, filter)
            .with_attributes(Self::requested_attributes(metadata, &options)?)
            .with_size_limit(options.max.unwrap_or(self.max_results));
        if let Some(size) = options.page_size.or(self.page_size) {
            request = request.with_page(PageControl {
                size,
                cookie: options.page_cookie.clone(),
                critical: options.page_critical,
            });
        }

        debug!(base = %request.base, filter = %request.filter, "Retrieving entities");
        let page = self.directory.search(&request).await?;
        self.page_cookie = page.cookie;
        if !page.referrals.is_empty() {
            debug!(referrals = ?page.referrals, "Search returned referrals");
        }

        let mut entities = Vec::with_capacity(page.entries.len());
        for entry in &page.entries {
            let record = self.mapper.hydrate(metadata, entry)?;
            let record = if options.check_only {
                record
            } else {
                self.resolve_links(record, Vec::new()).await?
            };
            entities.push(T::from_record(record)?);
        }

        debug!(count = entities.len(), more = self.has_more_pages(), "Retrieved entities");
        Ok(entities)
    }

    /// Base-scope lookup of one entry.
    #[instrument(skip(self))]
    pub async fn retrieve_by_dn<T: Entity>(&mut self, dn: &str) -> OrmResult<Option<T>> {
        let metadata = T::metadata();
        let attributes: Vec<String> = metadata.attributes().map(str::to_string).collect();
        let Some(entry) = self.directory.read(dn, &attributes).await? else {
            return Ok(None);
        };
        let record = self.mapper.hydrate(metadata, &entry)?;
        let record = self.resolve_links(record, Vec::new()).await?;
        T::from_record(record).map(Some)
    }

    /// Replace link stubs with hydrated records.
    ///
    /// `path` holds the lowercase DNs from the root record down to this
    /// one; links back into the path and links beyond the depth limit stay
    /// stubs.
    fn resolve_links(&mut self, mut record: EntityRecord, mut path: Vec<String>) -> BoxFuture<'_, OrmResult<EntityRecord>> {
        Box::pin(async move {
            let metadata = record.metadata();
            if path.len() >= self.max_link_depth || metadata.link_fields().next().is_none() {
                return Ok(record);
            }
            if let Some(dn) = record.dn() {
                path.push(dn.to_lowercase());
            }

            for field in metadata.link_fields() {
                let Some(value) = record.get(&field.name).cloned() else {
                    continue;
                };
                let resolved = match value {
                    FieldValue::Link(stub) => {
                        FieldValue::Link(Box::new(self.resolve_link(*stub, &path).await?))
                    }
                    FieldValue::LinkList(stubs) => {
                        let mut records = Vec::with_capacity(stubs.len());
                        for stub in stubs {
                            records.push(self.resolve_link(stub, &path).await?);
                        }
                        FieldValue::LinkList(records)
                    }
                    other => other,
                };
                record.set(field.name.clone(), Some(resolved));
            }

            Ok(record)
        })
    }

    async fn resolve_link(&mut self, stub: EntityRecord, path: &[String]) -> OrmResult<EntityRecord> {
        let Some(dn) = stub.dn().map(str::to_string) else {
            return Ok(stub);
        };
        if path.contains(&dn.to_lowercase()) {
            debug!(dn = %dn, "Link cycle detected, keeping stub");
            return Ok(stub);
        }

        let metadata = stub.metadata();
        let attributes: Vec<String> = metadata.attributes().map(str::to_string).collect();
        match self.directory.read(&dn, &attributes).await? {
            Some(entry) => {
                let record = self.mapper.hydrate(metadata, &entry)?;
                self.resolve_links(record, path.to_vec()).await
            }
            None => {
                debug!(dn = %dn, "Linked entry not found, keeping stub");
                Ok(stub)
            }
        }
    }

    /// The stored counterpart of `entity`, found by its unique identifier
    /// below the parent of its DN.
    #[instrument(skip(self, entity), fields(object_class = %T::metadata().object_class()))]
    pub async fn entity_exists<T: Entity>(&mut self, entity: &T) -> OrmResult<Option<T>> {
        let metadata = T::metadata();
        let unique = metadata
            .unique_identifier()
            .ok_or_else(|| OrmError::MissingUniqueIdentifier {
                object_class: metadata.object_class().to_string(),
                message: "no unique identifier declared".to_string(),
            })?;
        let dn = self.build_dn(entity)?;
        let attributes: Vec<String> = metadata.attributes().map(str::to_string).collect();
        let is_dn_attribute = unique.attribute.eq_ignore_ascii_case("distinguishedName")
            || unique.attribute.eq_ignore_ascii_case("dn");

        let value = entity
            .field(&unique.name)
            .filter(|v| !v.is_empty())
            .and_then(|v| v.as_text())
            .or_else(|| is_dn_attribute.then(|| dn.clone()))
            .ok_or_else(|| OrmError::MissingUniqueIdentifier {
                object_class: metadata.object_class().to_string(),
                message: format!("field '{}' is empty", unique.name),
            })?;

        // Generic servers have no DN attribute to search on.
        let entries = if is_dn_attribute && self.mapper.dialect() == crate::timestamp::Dialect::Generic {
            self.directory
                .read(&value, &attributes)
                .await?
                .into_iter()
                .collect::<Vec<_>>()
        } else {
            let filter = FilterExpression::eq(unique.attribute.as_str(), value.as_str())
                .with_object_class(metadata.object_class())
                .format(self.mapper.dialect());
            let base = parent_dn(&dn).unwrap_or(&dn).to_string();
            let request = SearchRequest::new(base, SearchScope::Subtree, filter)
                .with_attributes(attributes);
            match self.directory.search(&request).await {
                Ok(page) => page.entries,
                Err(e) if e.result_code() == Some(RC_NO_SUCH_OBJECT) => Vec::new(),
                Err(e) => return Err(e),
            }
        };

        match entries.as_slice() {
            [] => Ok(None),
            [entry] => T::from_record(self.mapper.hydrate(metadata, entry)?).map(Some),
            many => Err(OrmError::MultipleEntitiesFound {
                attribute: unique.attribute.clone(),
                value,
                count: many.len(),
            }),
        }
    }

    /// Add or update an entity.
    ///
    /// MUST fields are checked before any directory call. An existing entry
    /// is updated through the change set: replaced attributes in one modify,
    /// then one delete per emptied attribute. A delete of an attribute that
    /// is already gone is not an error.
    #[instrument(skip(self, entity, options), fields(object_class = %T::metadata().object_class()))]
    pub async fn persist<T: Entity>(
        &mut self,
        entity: &mut T,
        options: PersistOptions,
    ) -> OrmResult<PersistOutcome> {
        let metadata = T::metadata();
        if options.check_must {
            self.check_must(entity)?;
        }

        let dn = self.build_dn(entity)?;
        entity.set_dn(dn.clone());

        let existing = if options.assume_new {
            None
        } else {
            self.entity_exists(entity).await?
        };

        self.fill_sequences(entity).await?;
        let entry = self.to_entry(entity)?;

        let Some(original) = existing else {
            let mut entry = entry;
            entry.retain_non_empty();
            entry.remove("dn");
            entry.remove("distinguishedName");
            self.directory.add(&entry).await?;

            let state = entity.state_mut();
            state.set_hydrated(true);
            for attribute in metadata.attributes() {
                state.clear_not_retrieved(attribute);
            }
            info!(dn = %dn, "Entity created");
            return Ok(PersistOutcome::Created);
        };

        let original_entry = self.to_entry(&original)?;
        let mut not_retrieved: BTreeSet<String> = if entity.state().is_hydrated() {
            entity.state().not_retrieved().clone()
        } else {
            // A fresh entity never observed the stored entry.
            metadata
                .fields()
                .iter()
                .filter(|f| entity.field(&f.name).is_none())
                .map(|f| f.attribute.to_lowercase())
                .collect()
        };
        for cleared in &options.cleared_attributes {
            not_retrieved.remove(&cleared.to_lowercase());
        }

        let mut changes = self.changes.diff(
            &original_entry,
            &entry,
            &not_retrieved,
            metadata.operational_attributes(),
        );
        changes.to_add.extend(options.append);

        self.apply_changes(&dn, &changes).await?;

        if changes.is_empty() {
            debug!(dn = %dn, "Entity unchanged");
            return Ok(PersistOutcome::Unchanged);
        }
        info!(
            dn = %dn,
            modified = changes.to_modify.len(),
            deleted = changes.to_delete.len(),
            "Entity updated"
        );
        Ok(PersistOutcome::Updated {
            modified: changes.to_modify.keys().cloned().collect(),
            deleted: changes.to_delete.keys().cloned().collect(),
        })
    }

    async fn apply_changes(&mut self, dn: &str, changes: &ChangeOperandSet) -> OrmResult<()> {
        let replacements = changes.replacements();
        if !replacements.is_empty() {
            debug!(dn = %dn, count = replacements.len(), "Replacing attributes");
            self.directory.modify(dn, &replacements).await?;
        }

        for deletion in changes.deletions() {
            match self.directory.modify(dn, std::slice::from_ref(&deletion)).await {
                Ok(()) => {}
                Err(e) if e.is_no_such_attribute() => {
                    debug!(dn = %dn, attribute = %deletion.attribute(), "Attribute already absent");
                }
                Err(e) => return Err(e),
            }
        }

        for addition in changes.additions() {
            match self.directory.modify(dn, std::slice::from_ref(&addition)).await {
                Ok(()) => {}
                Err(e) if e.result_code() == Some(crate::error::RC_ATTRIBUTE_OR_VALUE_EXISTS) => {
                    debug!(dn = %dn, attribute = %addition.attribute(), "Value already present");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    /// Fill unset sequence-backed fields from their `integerSequence` entries.
    async fn fill_sequences<T: Entity>(&mut self, entity: &mut T) -> OrmResult<()> {
        let metadata = T::metadata();
        for field in metadata.sequence_fields() {
            if entity.field(&field.name).is_some_and(|v| !v.is_empty()) {
                continue;
            }
            let Some(template) = field.sequence.as_deref() else {
                continue;
            };
            let sequence_dn = self.mapper.render(template, &entity.to_record())?;
            let next = self.next_sequence_value(&sequence_dn).await?;
            let value = match field.kind {
                FieldKind::Integer => FieldValue::Integer(next),
                FieldKind::TextList => FieldValue::TextList(vec![next.to_string()]),
                _ => FieldValue::Text(next.to_string()),
            };
            debug!(field = %field.name, value = next, "Sequence value assigned");
            entity.set_field(&field.name, Some(value))?;
        }
        Ok(())
    }

    /// Take the next value of an `integerSequence` entry.
    ///
    /// The counter is advanced with a delete-old/add-new modify, which the
    /// server rejects if another client advanced it first; the read is then
    /// retried.
    #[instrument(skip(self))]
    pub async fn next_sequence_value(&mut self, dn: &str) -> OrmResult<i64> {
        let invalid = |message: String| OrmError::InvalidSequence {
            dn: dn.to_string(),
            message,
        };

        for attempt in 1..=SEQUENCE_ATTEMPTS {
            let request = SearchRequest::new(
                dn,
                SearchScope::Base,
                format!("(objectClass={SEQUENCE_OBJECT_CLASS})"),
            )
            .with_attributes([SEQUENCE_NEXT_VALUE, SEQUENCE_INCREMENT]);

            let entry = match self.directory.search(&request).await {
                Ok(page) => page.entries.into_iter().next(),
                Err(e) if e.result_code() == Some(RC_NO_SUCH_OBJECT) => None,
                Err(e) => return Err(e),
            }
            .ok_or_else(|| invalid("sequence entry not found".to_string()))?;

            let next: i64 = entry
                .first_text(SEQUENCE_NEXT_VALUE)
                .ok_or_else(|| invalid(format!("{SEQUENCE_NEXT_VALUE} is not set")))?
                .trim()
                .parse()
                .map_err(|e| invalid(format!("{SEQUENCE_NEXT_VALUE}: {e}")))?;
            let increment: i64 = match entry.first_text(SEQUENCE_INCREMENT) {
                Some(raw) => raw
                    .trim()
                    .parse()
                    .map_err(|e| invalid(format!("{SEQUENCE_INCREMENT}: {e}")))?,
                None => 1,
            };

            let swap = [
                Modification::Delete(SEQUENCE_NEXT_VALUE.to_string(), vec![next.to_string().into()]),
                Modification::Add(
                    SEQUENCE_NEXT_VALUE.to_string(),
                    vec![(next + increment).to_string().into()],
                ),
            ];
            match self.directory.modify(dn, &swap).await {
                Ok(()) => return Ok(next),
                Err(e) if e.is_no_such_attribute() => {
                    warn!(attempt, "Sequence advanced concurrently, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        Err(invalid(format!(
            "counter kept changing after {SEQUENCE_ATTEMPTS} attempts"
        )))
    }

    /// Delete an entity by its DN.
    pub async fn delete<T: Entity>(&mut self, entity: &T, recursive: bool) -> OrmResult<()> {
        let dn = self.build_dn(entity)?;
        self.delete_by_dn(&dn, recursive).await
    }

    /// Delete an entry. With `recursive`, every descendant is deleted
    /// first, children before parents.
    #[instrument(skip(self))]
    pub async fn delete_by_dn(&mut self, dn: &str, recursive: bool) -> OrmResult<()> {
        if !recursive {
            self.directory.delete(dn).await?;
            info!(dn = %dn, "Entry deleted");
            return Ok(());
        }

        let mut stack = vec![(dn.to_string(), false)];
        let mut deleted = 0usize;
        while let Some((current, expanded)) = stack.pop() {
            if expanded {
                self.directory.delete(&current).await?;
                deleted += 1;
                continue;
            }
            let children = self.directory.list_children(&current).await?;
            stack.push((current, true));
            stack.extend(children.into_iter().map(|child| (child, false)));
        }

        info!(dn = %dn, deleted, "Subtree deleted");
        Ok(())
    }

    async fn is_member(&mut self, group_dn: &str, member_dn: &str) -> OrmResult<bool> {
        let filter = format!(
            "({}={})",
            self.membership_attribute,
            filter::escape(member_dn)
        );
        let request = SearchRequest::new(group_dn, SearchScope::Base, filter).with_attributes(["1.1"]);
        Ok(!self.directory.search(&request).await?.entries.is_empty())
    }

    /// Add a member to a group. An existing membership is not an error.
    #[instrument(skip(self))]
    pub async fn group_add(&mut self, group_dn: &str, member_dn: &str) -> OrmResult<()> {
        let add = [Modification::Add(
            self.membership_attribute.clone(),
            vec![member_dn.into()],
        )];
        match self.directory.modify(group_dn, &add).await {
            Ok(()) => {
                info!(group = %group_dn, member = %member_dn, "Member added");
                Ok(())
            }
            Err(e) => match self.is_member(group_dn, member_dn).await {
                Ok(true) => {
                    debug!(group = %group_dn, member = %member_dn, "Already a member");
                    Ok(())
                }
                _ => Err(e),
            },
        }
    }

    /// Remove a member from a group. A missing membership is not an error.
    #[instrument(skip(self))]
    pub async fn group_remove(&mut self, group_dn: &str, member_dn: &str) -> OrmResult<()> {
        let remove = [Modification::Delete(
            self.membership_attribute.clone(),
            vec![member_dn.into()],
        )];
        match self.directory.modify(group_dn, &remove).await {
            Ok(()) => {
                info!(group = %group_dn, member = %member_dn, "Member removed");
                Ok(())
            }
            Err(e) => match self.is_member(group_dn, member_dn).await {
                Ok(false) => {
                    debug!(group = %group_dn, member = %member_dn, "Not a member");
                    Ok(())
                }
                _ => Err(e),
            },
        }
    }

    /// Rename or move an entry. Returns the new DN.
    #[instrument(skip(self))]
    pub async fn rename(
        &mut self,
        dn: &str,
        new_rdn: &str,
        new_parent: Option<&str>,
        delete_old_rdn: bool,
    ) -> OrmResult<String> {
        let parent = new_parent.or_else(|| parent_dn(dn));
        let new_dn = match parent {
            Some(parent) => format!("{new_rdn},{parent}"),
            None => new_rdn.to_string(),
        };

        self.directory
            .rename(dn, new_rdn, new_parent, delete_old_rdn)
            .await
            .map_err(|e| OrmError::Rename {
                dn: dn.to_string(),
                message: e.to_string(),
            })?;

        info!(from = %dn, to = %new_dn, "Entry renamed");
        Ok(new_dn)
    }

    /// Rename an entity's entry and update its DN.
    pub async fn rename_entity<T: Entity>(
        &mut self,
        entity: &mut T,
        new_rdn: &str,
        new_parent: Option<&str>,
    ) -> OrmResult<()> {
        let dn = self.build_dn(entity)?;
        let new_dn = self.rename(&dn, new_rdn, new_parent, true).await?;
        entity.set_dn(new_dn);
        Ok(())
    }
}
