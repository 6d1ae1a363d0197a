//! ldap3-backed directory session
//!
//! [`LdapSession`] owns one connection and implements
//! [`Directory`] so an [`EntityManager`] can run on top of it.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use ldap3::controls::{Control, ControlType, PagedResults, RawControl};
use ldap3::{
    parse_refs, Ldap, LdapConnAsync, LdapConnSettings, LdapError, LdapResult, Mod, Scope,
    SearchEntry, SearchOptions, SearchResult,
};
use tracing::{debug, info, instrument, warn};
use url::Url;

use ldap_orm::directory::{Directory, Modification, SearchPage, SearchRequest, SearchScope};
use ldap_orm::entry::{DirectoryEntry, EntryValue};
use ldap_orm::error::{OrmError, OrmResult};
use ldap_orm::manager::EntityManager;
use ldap_orm::timestamp::Dialect;

use crate::config::SessionConfig;

/// LDAP result code: sizeLimitExceeded.
const RC_SIZE_LIMIT_EXCEEDED: u32 = 4;
/// LDAP result code: referral.
const RC_REFERRAL: u32 = 10;
/// LDAP result code: invalidCredentials.
const RC_INVALID_CREDENTIALS: u32 = 49;

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Bound,
}

/// A bound LDAP connection.
///
/// Operations connect lazily; [`connect`](Self::connect) can be called up
/// front to fail fast.
pub struct LdapSession {
    config: SessionConfig,
    state: SessionState,
    ldap: Option<Ldap>,
}

impl std::fmt::Debug for LdapSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapSession")
            .field("config", &self.config)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl LdapSession {
    /// Create a session. Does not connect.
    pub fn new(config: SessionConfig) -> OrmResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: SessionState::Disconnected,
            ldap: None,
        })
    }

    /// Create a session and bind immediately.
    pub async fn connect_with(config: SessionConfig) -> OrmResult<Self> {
        let mut session = Self::new(config)?;
        session.connect().await?;
        Ok(session)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Replace the configuration. The current connection is closed; the next
    /// operation reconnects with the new settings.
    pub async fn set_config(&mut self, config: SessionConfig) -> OrmResult<()> {
        config.validate()?;
        self.disconnect().await;
        self.config = config;
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Bound
    }

    /// Open the connection and bind. A no-op when already bound.
    ///
    /// StartTLS failures are returned at once; any other failure is retried
    /// `bind_retries` times with `retry_delay_ms` between attempts.
    #[instrument(skip(self), fields(uri = %self.config.uri, bind_dn = %self.config.bind_dn))]
    pub async fn connect(&mut self) -> OrmResult<()> {
        if self.state == SessionState::Bound && self.ldap.is_some() {
            return Ok(());
        }

        self.state = SessionState::Connecting;
        let attempts = self.config.connection.bind_retries.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match open(&self.config, &self.config.uri).await {
                Ok(ldap) => {
                    self.ldap = Some(ldap);
                    self.state = SessionState::Bound;
                    info!(attempt, "Connected to LDAP server");
                    return Ok(());
                }
                Err(e @ OrmError::TlsNegotiationFailed { .. }) => {
                    self.state = SessionState::Disconnected;
                    return Err(e);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Cannot bind to LDAP server");
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(self.config.connection.retry_delay()).await;
                    }
                }
            }
        }

        self.state = SessionState::Disconnected;
        let message = format!(
            "cannot bind to {} as {} after {} attempts",
            self.config.uri, self.config.bind_dn, attempts
        );
        Err(match last_error {
            Some(source) => OrmError::connection_failed_with_source(message, source),
            None => OrmError::connection_failed(message),
        })
    }

    /// Unbind and drop the connection.
    pub async fn disconnect(&mut self) {
        if let Some(mut ldap) = self.ldap.take() {
            if let Err(e) = ldap.unbind().await {
                debug!(error = %e, "LDAP unbind failed");
            }
            info!(uri = %self.config.uri, "Disconnected from LDAP server");
        }
        self.state = SessionState::Disconnected;
    }

    /// Change the referral policy. Reconnects when the policy changes.
    pub async fn set_follow_referrals(&mut self, follow: i32) -> OrmResult<()> {
        if self.config.follow_referrals == follow {
            return Ok(());
        }
        self.disconnect().await;
        self.config.follow_referrals = follow;
        self.connect().await
    }

    /// Wrap the session in an entity manager configured from the session
    /// defaults.
    pub fn into_manager(self) -> EntityManager<Self> {
        let max_results = self.config.max_results;
        let max_link_depth = self.config.max_link_depth;
        let page_size = self.config.page_size;
        let base_dn = self.config.base_dn.clone();

        let manager = EntityManager::new(self)
            .with_max_results(max_results)
            .with_max_link_depth(max_link_depth)
            .with_page_size(page_size);
        match base_dn {
            Some(base) => manager.with_search_base(base),
            None => manager,
        }
    }

    /// Handle to the bound connection, connecting first if needed.
    async fn handle(&mut self) -> OrmResult<Ldap> {
        self.connect().await?;
        self.ldap
            .clone()
            .ok_or_else(|| OrmError::connection_failed("session is not bound"))
    }

    fn timeout(&self) -> Duration {
        self.config.connection.operation_timeout()
    }

    /// Map a transport error and drop the connection so the next call
    /// reconnects.
    fn transport_error(&mut self, operation: &'static str, dn: &str, e: LdapError) -> OrmError {
        warn!(operation, dn = %dn, error = %e, "LDAP transport error");
        self.ldap = None;
        self.state = SessionState::Disconnected;
        OrmError::directory_with_source(operation, dn, e)
    }

    /// Repeat a search on the servers named by its referrals. One hop only;
    /// referrals returned by those servers are passed through.
    async fn chase_referrals(&mut self, request: &SearchRequest, page: &mut SearchPage) {
        for url in std::mem::take(&mut page.referrals) {
            match self.search_referral(&url, request).await {
                Ok(referred) => {
                    debug!(referral = %url, count = referred.entries.len(), "Followed referral");
                    page.entries.extend(referred.entries);
                    page.referrals.extend(referred.referrals);
                }
                Err(e) => {
                    warn!(referral = %url, error = %e, "Cannot follow referral");
                    page.referrals.push(url);
                }
            }
        }
    }

    async fn search_referral(&mut self, url: &str, request: &SearchRequest) -> OrmResult<SearchPage> {
        let (server, base) = parse_referral(url)?;

        let mut referred = request.clone();
        referred.page = None;
        if let Some(base) = base {
            referred.base = base;
        }

        let mut ldap = open(&self.config, &server).await?;
        let result = run_search(&mut ldap, &referred, self.timeout())
            .await
            .map_err(|e| OrmError::directory_with_source("search", &referred.base, e))
            .and_then(|result| result);
        if let Err(e) = ldap.unbind().await {
            debug!(error = %e, "LDAP unbind failed");
        }
        result
    }
}

#[async_trait]
impl Directory for LdapSession {
    fn dialect(&self) -> Dialect {
        self.config.dialect()
    }

    #[instrument(skip(self, request), fields(base = %request.base, filter = %request.filter))]
    async fn search(&mut self, request: &SearchRequest) -> OrmResult<SearchPage> {
        let mut ldap = self.handle().await?;
        let mut page = match run_search(&mut ldap, request, self.timeout()).await {
            Ok(result) => result?,
            Err(e) => return Err(self.transport_error("search", &request.base, e)),
        };
        debug!(count = page.entries.len(), more = page.has_more_pages(), "Search completed");

        if self.config.follows_referrals() && !page.referrals.is_empty() {
            self.chase_referrals(request, &mut page).await;
        }
        Ok(page)
    }

    #[instrument(skip(self, entry), fields(dn = %entry.dn()))]
    async fn add(&mut self, entry: &DirectoryEntry) -> OrmResult<()> {
        let mut ldap = self.handle().await?;
        let attrs: Vec<(Vec<u8>, HashSet<Vec<u8>>)> = entry
            .attributes()
            .filter(|attr| !attr.is_empty())
            .map(|attr| (attr.name.as_bytes().to_vec(), value_set(&attr.values)))
            .collect();

        let result = match ldap.with_timeout(self.timeout()).add(entry.dn(), attrs).await {
            Ok(result) => result,
            Err(e) => return Err(self.transport_error("add", entry.dn(), e)),
        };
        check_result("add", entry.dn(), result)?;
        info!("Entry added");
        Ok(())
    }

    #[instrument(skip(self, modifications), fields(count = modifications.len()))]
    async fn modify(&mut self, dn: &str, modifications: &[Modification]) -> OrmResult<()> {
        let mut ldap = self.handle().await?;
        let mods: Vec<Mod<Vec<u8>>> = modifications.iter().map(to_mod).collect();

        let result = match ldap.with_timeout(self.timeout()).modify(dn, mods).await {
            Ok(result) => result,
            Err(e) => return Err(self.transport_error("modify", dn, e)),
        };
        check_result("modify", dn, result)?;
        info!("Entry modified");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&mut self, dn: &str) -> OrmResult<()> {
        let mut ldap = self.handle().await?;
        let result = match ldap.with_timeout(self.timeout()).delete(dn).await {
            Ok(result) => result,
            Err(e) => return Err(self.transport_error("delete", dn, e)),
        };
        check_result("delete", dn, result)?;
        info!("Entry deleted");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn rename(
        &mut self,
        dn: &str,
        new_rdn: &str,
        new_parent: Option<&str>,
        delete_old_rdn: bool,
    ) -> OrmResult<()> {
        let mut ldap = self.handle().await?;
        let result = match ldap
            .with_timeout(self.timeout())
            .modifydn(dn, new_rdn, delete_old_rdn, new_parent)
            .await
        {
            Ok(result) => result,
            Err(e) => return Err(self.transport_error("rename", dn, e)),
        };
        check_result("rename", dn, result)?;
        info!("Entry renamed");
        Ok(())
    }
}

/// Connect to `uri` and bind with the configured credentials.
async fn open(config: &SessionConfig, uri: &str) -> OrmResult<Ldap> {
    debug!(uri = %uri, starttls = config.use_tls, "Connecting to LDAP server");

    let settings = LdapConnSettings::new()
        .set_conn_timeout(config.connection.connection_timeout())
        .set_starttls(config.use_tls);

    let (conn, mut ldap) = LdapConnAsync::with_settings(settings, uri)
        .await
        .map_err(|e| connect_error(config, uri, e))?;

    tokio::spawn(async move {
        if let Err(e) = conn.drive().await {
            warn!(error = %e, "LDAP connection driver error");
        }
    });

    if config.use_tls {
        debug!("TLS enabled for LDAP connection");
    }

    let result = ldap
        .with_timeout(config.connection.operation_timeout())
        .simple_bind(&config.bind_dn, &config.password)
        .await
        .map_err(|e| {
            OrmError::connection_failed_with_source(
                format!("LDAP bind failed for {}", config.bind_dn),
                e,
            )
        })?;

    if result.rc != 0 {
        let reason = if result.rc == RC_INVALID_CREDENTIALS {
            "invalid credentials".to_string()
        } else {
            result.text
        };
        return Err(OrmError::connection_failed(format!(
            "LDAP bind as {} failed with code {}: {}",
            config.bind_dn, result.rc, reason
        )));
    }

    Ok(ldap)
}

/// With StartTLS on, anything past the socket layer failed during the
/// TLS upgrade.
fn connect_error(config: &SessionConfig, uri: &str, e: LdapError) -> OrmError {
    let transport = matches!(e, LdapError::Io { .. } | LdapError::Timeout { .. });
    if config.use_tls && !transport {
        OrmError::tls_failed_with_source(format!("unable to enable TLS for {uri}"), e)
    } else {
        OrmError::connection_failed_with_source(format!("failed to connect to {uri}"), e)
    }
}

/// Run one search. The outer error is a transport failure, the inner one a
/// server-side result.
async fn run_search(
    ldap: &mut Ldap,
    request: &SearchRequest,
    timeout: Duration,
) -> Result<OrmResult<SearchPage>, LdapError> {
    let mut controls = Vec::new();
    if let Some(page) = &request.page {
        let mut raw: RawControl = PagedResults {
            size: page.size,
            cookie: page.cookie.clone(),
        }
        .into();
        raw.crit = page.critical;
        controls.push(raw);
    }

    let SearchResult(entries, result) = ldap
        .with_search_options(SearchOptions::new().sizelimit(request.size_limit))
        .with_controls(controls)
        .with_timeout(timeout)
        .search(
            &request.base,
            to_scope(request.scope),
            &request.filter,
            request.attributes.clone(),
        )
        .await?;

    let mut page = SearchPage::default();
    match result.rc {
        0 => {}
        RC_SIZE_LIMIT_EXCEEDED => debug!(limit = request.size_limit, "Size limit exceeded"),
        RC_REFERRAL => page.referrals.extend(result.refs.iter().cloned()),
        rc => {
            return Ok(Err(OrmError::directory(
                "search",
                &request.base,
                rc,
                result.text,
            )))
        }
    }

    for entry in entries {
        if entry.is_ref() {
            page.referrals.extend(parse_refs(entry.0));
            continue;
        }
        page.entries.push(to_entry(SearchEntry::construct(entry)));
    }

    page.cookie = result
        .ctrls
        .iter()
        .find_map(|Control(ctype, raw)| match ctype {
            Some(ControlType::PagedResults) => Some(raw.parse::<PagedResults>().cookie),
            _ => None,
        })
        .unwrap_or_default();

    Ok(Ok(page))
}

fn check_result(operation: &'static str, dn: &str, result: LdapResult) -> OrmResult<()> {
    if result.rc != 0 {
        debug!(operation, dn = %dn, rc = result.rc, text = %result.text, "Operation rejected");
        return Err(OrmError::directory(operation, dn, result.rc, result.text));
    }
    Ok(())
}

fn to_scope(scope: SearchScope) -> Scope {
    match scope {
        SearchScope::Base => Scope::Base,
        SearchScope::OneLevel => Scope::OneLevel,
        SearchScope::Subtree => Scope::Subtree,
    }
}

fn to_entry(search: SearchEntry) -> DirectoryEntry {
    let mut entry = DirectoryEntry::new(search.dn);
    for (name, values) in search.attrs {
        entry.set(&name, values);
    }
    for (name, values) in search.bin_attrs {
        entry.append(&name, values.into_iter().map(EntryValue::Binary));
    }
    entry
}

fn value_set(values: &[EntryValue]) -> HashSet<Vec<u8>> {
    values.iter().map(|v| v.as_bytes().to_vec()).collect()
}

fn to_mod(modification: &Modification) -> Mod<Vec<u8>> {
    match modification {
        Modification::Add(attr, values) => Mod::Add(attr.as_bytes().to_vec(), value_set(values)),
        Modification::Replace(attr, values) => {
            Mod::Replace(attr.as_bytes().to_vec(), value_set(values))
        }
        Modification::Delete(attr, values) => {
            Mod::Delete(attr.as_bytes().to_vec(), value_set(values))
        }
    }
}

/// Split a referral URL into the server URI and the optional base DN.
fn parse_referral(referral: &str) -> OrmResult<(String, Option<String>)> {
    let unsupported = |reason: &str| {
        OrmError::connection_failed(format!("unsupported referral '{referral}': {reason}"))
    };

    let url = Url::parse(referral).map_err(|e| unsupported(&e.to_string()))?;
    let scheme = url.scheme();
    if scheme != "ldap" && scheme != "ldaps" {
        return Err(unsupported("not an LDAP URL"));
    }
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| unsupported("missing host"))?;

    let server = match url.port() {
        Some(port) => format!("{scheme}://{host}:{port}"),
        None => format!("{scheme}://{host}"),
    };

    let path = url.path().trim_start_matches('/');
    let base = urlencoding::decode(path)
        .map_err(|e| unsupported(&e.to_string()))?
        .into_owned();
    Ok((server, (!base.is_empty()).then_some(base)))
}
