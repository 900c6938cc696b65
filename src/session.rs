//! Catalog session: breadcrumbed traversal of an OPDS catalog tree.
//!
//! The session is a state machine over `Idle → Loading → Viewing/Failed`
//! with a two-layer API:
//!
//! - `request_*` methods allocate a [`NavRequest`] carrying a monotonically
//!   increasing sequence number and the resolved target URL, without
//!   touching navigation state;
//! - [`CatalogSession::apply`] commits the fetched result. Stack mutations
//!   happen only here, on success, so a failed fetch or parse leaves the
//!   prior feed, breadcrumbs and stacks fully intact. Results whose
//!   sequence number is no longer current are discarded: if a caller
//!   issues a new request while one is in flight, the newer request wins.
//!
//! Only the session-owning task mutates the session: spawn
//! [`CatalogSession::load`] wherever you like, then hand the result back
//! to the owner and `apply` it there. Callers that do not need to overlap
//! requests can use the async convenience methods ([`CatalogSession::open`],
//! [`CatalogSession::enter`], ...) which combine both layers.

use crate::config::ServerProfile;
use crate::opds::{parse_feed, Feed, FetchError, Fetcher, NavEntry, ParseError};
use thiserror::Error;
use url::Url;

/// Breadcrumb label of the catalog root.
pub const ROOT_LABEL: &str = "Home";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("No catalog is open")]
    NoCatalog,
    #[error("Current feed is not a navigation feed")]
    NotNavigation,
    #[error("Entry has no target URL")]
    EmptyEntryUrl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Idle,
    Loading,
    Viewing,
    Failed,
}

/// One level of the back stack: where to return to, and the breadcrumb
/// label that entering it added.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackEntry {
    pub url: String,
    pub label: String,
}

/// Stack mutation to perform once the fetch behind a request succeeds.
#[derive(Debug, Clone)]
enum NavAction {
    Open,
    Enter { label: String },
    Back,
    Search { label: String },
    NextPage,
    Refresh,
}

/// An issued navigation request: resolved URL, credentials, and the
/// deferred stack action. Feed it to [`CatalogSession::load`] and hand the
/// result to [`CatalogSession::apply`].
#[derive(Debug, Clone)]
pub struct NavRequest {
    seq: u64,
    url: String,
    action: NavAction,
    profile: ServerProfile,
}

impl NavRequest {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn profile(&self) -> &ServerProfile {
        &self.profile
    }
}

/// Outcome of applying a fetch result to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The result was committed and is now the current feed.
    Applied,
    /// A newer request superseded this one; the result was discarded.
    Stale,
    /// The fetch or parse failed; prior state is untouched.
    Failed,
}

#[derive(Debug, Default)]
pub struct CatalogSession {
    profile: Option<ServerProfile>,
    current_url: Option<String>,
    current_feed: Option<Feed>,
    back_stack: Vec<BackEntry>,
    breadcrumbs: Vec<String>,
    /// Previously visited page URLs within the current acquisition feed.
    /// Scoped to lateral paging only; cleared by any real navigation.
    page_stack: Vec<String>,
    phase: SessionPhase,
    seq: u64,
    last_error: Option<String>,
}

impl CatalogSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// The current feed. Remains available in the `Failed` phase so a
    /// failed load can be retried from where the user was.
    pub fn current_feed(&self) -> Option<&Feed> {
        self.current_feed.as_ref()
    }

    pub fn current_url(&self) -> Option<&str> {
        self.current_url.as_deref()
    }

    pub fn breadcrumbs(&self) -> &[String] {
        &self.breadcrumbs
    }

    pub fn back_stack(&self) -> &[BackEntry] {
        &self.back_stack
    }

    pub fn page_stack(&self) -> &[String] {
        &self.page_stack
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    // ------------------------------------------------------------------
    // Request layer
    // ------------------------------------------------------------------

    /// Starts loading a server's root catalog. Stacks reset only once the
    /// load succeeds; until then the prior view stays current.
    pub fn request_open(&mut self, profile: ServerProfile) -> NavRequest {
        self.begin(profile.url.clone(), NavAction::Open, profile)
    }

    /// Descends into a navigation entry. The entry URL is resolved against
    /// the current feed URL when relative.
    pub fn request_enter(&mut self, entry: &NavEntry) -> Result<NavRequest, SessionError> {
        if !matches!(self.current_feed, Some(Feed::Navigation(_))) {
            return Err(SessionError::NotNavigation);
        }
        if entry.url.is_empty() {
            return Err(SessionError::EmptyEntryUrl);
        }
        let profile = self.profile.clone().ok_or(SessionError::NoCatalog)?;
        let url = self.resolve(&entry.url)?;
        Ok(self.begin(
            url,
            NavAction::Enter {
                label: entry.title.clone(),
            },
            profile,
        ))
    }

    /// Returns to the previous catalog level. `None` when already at the
    /// root. The back target is always refetched live, never cached.
    pub fn request_back(&mut self) -> Option<NavRequest> {
        let target = self.back_stack.last()?.url.clone();
        let profile = self.profile.clone()?;
        Some(self.begin(target, NavAction::Back, profile))
    }

    /// Searches the catalog by appending a `q=` parameter to the profile's
    /// base URL. Allowed from either feed kind, but a catalog must be open.
    pub fn request_search(&mut self, query: &str) -> Result<NavRequest, SessionError> {
        let profile = self.profile.clone().ok_or(SessionError::NoCatalog)?;
        if self.current_url.is_none() {
            return Err(SessionError::NoCatalog);
        }
        let mut url = Url::parse(&profile.url)?;
        url.query_pairs_mut().append_pair("q", query);
        let url = url.to_string();
        Ok(self.begin(
            url,
            NavAction::Search {
                label: query.to_string(),
            },
            profile,
        ))
    }

    /// Advances to the next page of the current acquisition feed. `None`
    /// when the feed has no `next` link. Paging is lateral movement:
    /// breadcrumbs and the back stack are untouched.
    pub fn request_next_page(&mut self) -> Result<Option<NavRequest>, SessionError> {
        let next = match self.current_feed.as_ref().and_then(Feed::next_url) {
            Some(next) => next.to_string(),
            None => return Ok(None),
        };
        let profile = self.profile.clone().ok_or(SessionError::NoCatalog)?;
        let url = self.resolve(&next)?;
        Ok(Some(self.begin(url, NavAction::NextPage, profile)))
    }

    /// Refetches the current URL with no stack mutation. `None` when
    /// nothing is open yet.
    pub fn request_refresh(&mut self) -> Option<NavRequest> {
        let url = self.current_url.clone()?;
        let profile = self.profile.clone()?;
        Some(self.begin(url, NavAction::Refresh, profile))
    }

    fn begin(&mut self, url: String, action: NavAction, profile: ServerProfile) -> NavRequest {
        self.seq += 1;
        self.phase = SessionPhase::Loading;
        NavRequest {
            seq: self.seq,
            url,
            action,
            profile,
        }
    }

    fn resolve(&self, href: &str) -> Result<String, url::ParseError> {
        match self.current_url.as_deref() {
            Some(base) => Ok(Url::parse(base)?.join(href)?.to_string()),
            None => Ok(Url::parse(href)?.to_string()),
        }
    }

    // ------------------------------------------------------------------
    // Apply layer
    // ------------------------------------------------------------------

    /// Fetches and parses the feed behind a request. Pure with respect to
    /// session state, so it is safe to run in a spawned task.
    pub async fn load(fetcher: &Fetcher, request: &NavRequest) -> Result<Feed, SessionError> {
        let bytes = fetcher.fetch(&request.url, &request.profile).await?;
        Ok(parse_feed(&bytes)?)
    }

    /// Commits a fetch result. Must be called by the session owner.
    pub fn apply(&mut self, request: NavRequest, result: Result<Feed, SessionError>) -> ApplyOutcome {
        if request.seq != self.seq {
            tracing::debug!(
                seq = request.seq,
                current = self.seq,
                url = %request.url,
                "Discarding superseded fetch result"
            );
            return ApplyOutcome::Stale;
        }

        match result {
            Ok(feed) => {
                self.commit(request, feed);
                ApplyOutcome::Applied
            }
            Err(e) => {
                self.fail(&e);
                ApplyOutcome::Failed
            }
        }
    }

    fn commit(&mut self, request: NavRequest, feed: Feed) {
        let previous_url = self.current_url.take();

        match request.action {
            NavAction::Open => {
                self.back_stack.clear();
                self.page_stack.clear();
                self.breadcrumbs = vec![ROOT_LABEL.to_string()];
                self.profile = Some(request.profile);
            }
            NavAction::Enter { label } | NavAction::Search { label } => {
                if let Some(url) = previous_url.clone() {
                    self.back_stack.push(BackEntry {
                        url,
                        label: label.clone(),
                    });
                }
                self.breadcrumbs.push(label);
                self.page_stack.clear();
            }
            NavAction::Back => {
                self.back_stack.pop();
                self.breadcrumbs.pop();
                self.page_stack.clear();
            }
            NavAction::NextPage => {
                if let Some(url) = previous_url.clone() {
                    self.page_stack.push(url);
                }
            }
            NavAction::Refresh => {}
        }

        self.current_url = Some(request.url);
        self.current_feed = Some(feed);
        self.phase = SessionPhase::Viewing;
        self.last_error = None;
    }

    fn fail(&mut self, error: &SessionError) {
        // A failed load is not navigation: feed, stacks and breadcrumbs
        // stay as they were, only the phase and diagnostic change.
        self.last_error = Some(error.to_string());
        self.phase = SessionPhase::Failed;
    }

    // ------------------------------------------------------------------
    // Convenience layer
    // ------------------------------------------------------------------

    /// Opens a server's root catalog.
    pub async fn open(
        &mut self,
        fetcher: &Fetcher,
        profile: ServerProfile,
    ) -> Result<(), SessionError> {
        let request = self.request_open(profile);
        self.dispatch(fetcher, request).await
    }

    /// Enters a navigation entry.
    pub async fn enter(
        &mut self,
        fetcher: &Fetcher,
        entry: &NavEntry,
    ) -> Result<(), SessionError> {
        let request = self.request_enter(entry)?;
        self.dispatch(fetcher, request).await
    }

    /// Goes back one level. Returns `false` as a no-op at the root.
    pub async fn back(&mut self, fetcher: &Fetcher) -> Result<bool, SessionError> {
        match self.request_back() {
            None => Ok(false),
            Some(request) => self.dispatch(fetcher, request).await.map(|_| true),
        }
    }

    /// Searches the catalog.
    pub async fn search(&mut self, fetcher: &Fetcher, query: &str) -> Result<(), SessionError> {
        let request = self.request_search(query)?;
        self.dispatch(fetcher, request).await
    }

    /// Fetches the next acquisition page. Returns `false` as a no-op when
    /// there is none.
    pub async fn next_page(&mut self, fetcher: &Fetcher) -> Result<bool, SessionError> {
        match self.request_next_page()? {
            None => Ok(false),
            Some(request) => self.dispatch(fetcher, request).await.map(|_| true),
        }
    }

    /// Refetches the current feed. Returns `false` when nothing is open.
    pub async fn refresh(&mut self, fetcher: &Fetcher) -> Result<bool, SessionError> {
        match self.request_refresh() {
            None => Ok(false),
            Some(request) => self.dispatch(fetcher, request).await.map(|_| true),
        }
    }

    async fn dispatch(&mut self, fetcher: &Fetcher, request: NavRequest) -> Result<(), SessionError> {
        match Self::load(fetcher, &request).await {
            Ok(feed) => {
                self.apply(request, Ok(feed));
                Ok(())
            }
            Err(e) => {
                if request.seq == self.seq {
                    self.fail(&e);
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthKind;
    use crate::opds::{AcquisitionFeed, NavigationFeed};
    use pretty_assertions::assert_eq;

    fn profile() -> ServerProfile {
        ServerProfile {
            name: "shelf".into(),
            url: "http://books.example/opds".into(),
            auth: AuthKind::None,
            username: None,
            password: None,
        }
    }

    fn nav_feed(title: &str) -> Feed {
        Feed::Navigation(NavigationFeed {
            title: title.into(),
            entries: vec![NavEntry {
                title: "Fiction".into(),
                url: "fiction.xml".into(),
                content: String::new(),
            }],
        })
    }

    fn acq_feed(next: Option<&str>) -> Feed {
        Feed::Acquisition(AcquisitionFeed {
            title: "Shelf".into(),
            entries: Vec::new(),
            next_url: next.map(String::from),
            total_results: 0,
        })
    }

    /// Session viewing the root navigation feed.
    fn opened_session() -> CatalogSession {
        let mut session = CatalogSession::new();
        let request = session.request_open(profile());
        assert_eq!(session.apply(request, Ok(nav_feed("Root"))), ApplyOutcome::Applied);
        session
    }

    #[test]
    fn test_open_resets_to_home() {
        let session = opened_session();
        assert_eq!(session.phase(), SessionPhase::Viewing);
        assert_eq!(session.breadcrumbs(), ["Home"]);
        assert!(session.back_stack().is_empty());
        assert_eq!(session.current_url(), Some("http://books.example/opds"));
    }

    #[test]
    fn test_enter_pushes_back_stack_and_breadcrumb() {
        let mut session = opened_session();
        let entry = NavEntry {
            title: "Fiction".into(),
            url: "fiction.xml".into(),
            content: String::new(),
        };

        let request = session.request_enter(&entry).unwrap();
        // Relative href resolved against the current feed URL
        assert_eq!(request.url(), "http://books.example/fiction.xml");

        session.apply(request, Ok(acq_feed(None)));
        assert_eq!(session.breadcrumbs(), ["Home", "Fiction"]);
        assert_eq!(
            session.back_stack(),
            [BackEntry {
                url: "http://books.example/opds".into(),
                label: "Fiction".into(),
            }]
        );
        // Invariant: breadcrumb depth is back-stack depth plus one
        assert_eq!(session.back_stack().len(), session.breadcrumbs().len() - 1);
    }

    #[test]
    fn test_enter_requires_navigation_feed() {
        let mut session = opened_session();
        let request = session.request_refresh().unwrap();
        session.apply(request, Ok(acq_feed(None)));

        let entry = NavEntry {
            title: "X".into(),
            url: "x.xml".into(),
            content: String::new(),
        };
        assert!(matches!(
            session.request_enter(&entry),
            Err(SessionError::NotNavigation)
        ));
    }

    #[test]
    fn test_enter_rejects_empty_url() {
        let mut session = opened_session();
        let entry = NavEntry {
            title: "Broken".into(),
            url: String::new(),
            content: String::new(),
        };
        assert!(matches!(
            session.request_enter(&entry),
            Err(SessionError::EmptyEntryUrl)
        ));
    }

    #[test]
    fn test_back_is_noop_at_root() {
        let mut session = opened_session();
        assert!(session.request_back().is_none());
        assert_eq!(session.phase(), SessionPhase::Viewing);
    }

    #[test]
    fn test_back_pops_and_refetches_parent() {
        let mut session = opened_session();
        let entry = NavEntry {
            title: "Fiction".into(),
            url: "fiction.xml".into(),
            content: String::new(),
        };
        let request = session.request_enter(&entry).unwrap();
        session.apply(request, Ok(nav_feed("Fiction")));

        let request = session.request_back().unwrap();
        // Back always refetches the recorded URL, never a cached feed
        assert_eq!(request.url(), "http://books.example/opds");
        session.apply(request, Ok(nav_feed("Root")));

        assert_eq!(session.breadcrumbs(), ["Home"]);
        assert!(session.back_stack().is_empty());
    }

    #[test]
    fn test_failed_load_preserves_prior_state() {
        let mut session = opened_session();
        let before_feed = session.current_feed().cloned();
        let entry = NavEntry {
            title: "Fiction".into(),
            url: "fiction.xml".into(),
            content: String::new(),
        };

        let request = session.request_enter(&entry).unwrap();
        let outcome = session.apply(
            request,
            Err(SessionError::Parse(crate::opds::ParseError::Malformed(
                "boom".into(),
            ))),
        );

        assert_eq!(outcome, ApplyOutcome::Failed);
        assert_eq!(session.phase(), SessionPhase::Failed);
        assert_eq!(session.current_feed(), before_feed.as_ref());
        assert_eq!(session.breadcrumbs(), ["Home"]);
        assert!(session.back_stack().is_empty());
        assert!(session.last_error().unwrap().contains("boom"));
    }

    #[test]
    fn test_superseded_result_is_discarded() {
        let mut session = opened_session();
        let entry_a = NavEntry {
            title: "A".into(),
            url: "a.xml".into(),
            content: String::new(),
        };
        let entry_b = NavEntry {
            title: "B".into(),
            url: "b.xml".into(),
            content: String::new(),
        };

        let first = session.request_enter(&entry_a).unwrap();
        let second = session.request_enter(&entry_b).unwrap();

        // The slower first response arrives after the second request was
        // issued: last request wins.
        assert_eq!(session.apply(first, Ok(nav_feed("A"))), ApplyOutcome::Stale);
        assert_eq!(session.breadcrumbs(), ["Home"]);

        assert_eq!(
            session.apply(second, Ok(nav_feed("B"))),
            ApplyOutcome::Applied
        );
        assert_eq!(session.breadcrumbs(), ["Home", "B"]);
        assert_eq!(session.back_stack().len(), 1);
    }

    #[test]
    fn test_search_appends_query_parameter() {
        let mut session = opened_session();
        let request = session.request_search("dune messiah").unwrap();
        assert_eq!(
            request.url(),
            "http://books.example/opds?q=dune+messiah"
        );

        session.apply(request, Ok(acq_feed(None)));
        assert_eq!(session.breadcrumbs(), ["Home", "dune messiah"]);
    }

    #[test]
    fn test_search_base_with_existing_query_uses_ampersand() {
        let mut session = CatalogSession::new();
        let mut p = profile();
        p.url = "http://books.example/opds?lang=en".into();
        let request = session.request_open(p);
        session.apply(request, Ok(nav_feed("Root")));

        let request = session.request_search("ships").unwrap();
        assert_eq!(
            request.url(),
            "http://books.example/opds?lang=en&q=ships"
        );
    }

    #[test]
    fn test_search_allowed_from_acquisition_feed() {
        let mut session = opened_session();
        let request = session.request_refresh().unwrap();
        session.apply(request, Ok(acq_feed(None)));
        assert!(session.request_search("anything").is_ok());
    }

    #[test]
    fn test_next_page_noop_without_next_link() {
        let mut session = opened_session();
        let request = session.request_refresh().unwrap();
        session.apply(request, Ok(acq_feed(None)));
        assert!(session.request_next_page().unwrap().is_none());
    }

    #[test]
    fn test_next_page_resolves_and_keeps_breadcrumbs() {
        let mut session = opened_session();
        let request = session.request_refresh().unwrap();
        session.apply(request, Ok(acq_feed(Some("page2.xml"))));

        let request = session.request_next_page().unwrap().unwrap();
        assert_eq!(request.url(), "http://books.example/page2.xml");

        session.apply(request, Ok(acq_feed(None)));
        assert_eq!(session.breadcrumbs(), ["Home"]);
        assert!(session.back_stack().is_empty());
        assert_eq!(session.page_stack(), ["http://books.example/opds"]);
    }

    #[test]
    fn test_entering_clears_page_stack() {
        let mut session = opened_session();
        let request = session.request_refresh().unwrap();
        session.apply(request, Ok(acq_feed(Some("page2.xml"))));
        let request = session.request_next_page().unwrap().unwrap();
        session.apply(request, Ok(acq_feed(None)));
        assert_eq!(session.page_stack().len(), 1);

        // Paging cursor is scoped to one feed context; navigating away
        // via refresh-to-nav + enter clears it.
        let request = session.request_refresh().unwrap();
        session.apply(request, Ok(nav_feed("Root")));
        let entry = NavEntry {
            title: "Fiction".into(),
            url: "fiction.xml".into(),
            content: String::new(),
        };
        let request = session.request_enter(&entry).unwrap();
        session.apply(request, Ok(acq_feed(None)));
        assert!(session.page_stack().is_empty());
    }

    #[test]
    fn test_refresh_mutates_no_stacks() {
        let mut session = opened_session();
        let entry = NavEntry {
            title: "Fiction".into(),
            url: "fiction.xml".into(),
            content: String::new(),
        };
        let request = session.request_enter(&entry).unwrap();
        session.apply(request, Ok(nav_feed("Fiction")));

        let crumbs_before = session.breadcrumbs().to_vec();
        let request = session.request_refresh().unwrap();
        session.apply(request, Ok(nav_feed("Fiction")));
        assert_eq!(session.breadcrumbs(), crumbs_before.as_slice());
        assert_eq!(session.back_stack().len(), 1);
    }

    #[test]
    fn test_refresh_is_idempotent_on_feed_value() {
        let mut session = opened_session();
        let request = session.request_refresh().unwrap();
        session.apply(request, Ok(nav_feed("Root")));
        let first = session.current_feed().cloned();

        let request = session.request_refresh().unwrap();
        session.apply(request, Ok(nav_feed("Root")));
        assert_eq!(session.current_feed(), first.as_ref());
    }

    #[test]
    fn test_reopen_resets_stacks() {
        let mut session = opened_session();
        let entry = NavEntry {
            title: "Fiction".into(),
            url: "fiction.xml".into(),
            content: String::new(),
        };
        let request = session.request_enter(&entry).unwrap();
        session.apply(request, Ok(nav_feed("Fiction")));
        assert_eq!(session.back_stack().len(), 1);

        let request = session.request_open(profile());
        session.apply(request, Ok(nav_feed("Root")));
        assert!(session.back_stack().is_empty());
        assert_eq!(session.breadcrumbs(), ["Home"]);
    }

    #[test]
    fn test_failed_open_keeps_previous_catalog_for_retry() {
        let mut session = opened_session();
        let mut other = profile();
        other.url = "http://other.example/opds".into();

        let request = session.request_open(other);
        session.apply(
            request,
            Err(SessionError::Fetch(crate::opds::FetchError::Timeout)),
        );

        assert_eq!(session.phase(), SessionPhase::Failed);
        // The previously viewed catalog is still the effective current one
        assert!(session.current_feed().is_some());
        assert_eq!(session.current_url(), Some("http://books.example/opds"));
    }
}
