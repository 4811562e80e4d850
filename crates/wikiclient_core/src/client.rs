use std::sync::Arc;

use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::config::{ClientOptions, WikiConfig};
use crate::error::Result;
use crate::events::{EventBus, EventSink};
use crate::pages::PageManager;
use crate::poller::ChangePoller;
use crate::request::RequestExecutor;
use crate::revisions::RevisionManager;
use crate::search::{CategoryManager, MetaManager, SearchManager};
use crate::transport::{HttpTransport, ReqwestTransport};
use crate::users::UserManager;

/// One wiki session: a shared executor plus the managers built on it.
///
/// Every manager and the change poller share the executor, so they share
/// its rate limiter, cookies and token cache. Events from the poller and
/// from page fetches are delivered through [`WikiClient::events`].
pub struct WikiClient {
    options: ClientOptions,
    executor: Arc<RequestExecutor>,
    events: Arc<EventBus>,
    pages: PageManager,
    users: UserManager,
    revisions: RevisionManager,
    search: SearchManager,
    categories: CategoryManager,
    meta: MetaManager,
    poller: ChangePoller,
}

impl WikiClient {
    pub fn new(options: ClientOptions) -> Result<Self> {
        let transport = Arc::new(ReqwestTransport::new(options.timeout())?);
        Self::with_parts(options, transport, Arc::new(SystemClock))
    }

    pub fn from_config(config: &WikiConfig) -> Result<Self> {
        Self::new(config.resolve()?)
    }

    pub fn with_parts(
        options: ClientOptions,
        transport: Arc<dyn HttpTransport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let executor = Arc::new(RequestExecutor::with_parts(&options, transport, clock)?);
        let events = Arc::new(EventBus::new());
        let sink: Arc<dyn EventSink> = events.clone();
        let cache_size = options.cache_size;
        info!(host = %options.host, api_path = %options.api_path, "wiki client ready");

        Ok(Self {
            pages: PageManager::new(Arc::clone(&executor), Arc::clone(&sink), cache_size),
            users: UserManager::new(Arc::clone(&executor), cache_size),
            revisions: RevisionManager::new(Arc::clone(&executor), cache_size),
            search: SearchManager::new(Arc::clone(&executor)),
            categories: CategoryManager::new(Arc::clone(&executor)),
            meta: MetaManager::new(Arc::clone(&executor)),
            poller: ChangePoller::new(Arc::clone(&executor), sink),
            options,
            executor,
            events,
        })
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn executor(&self) -> &Arc<RequestExecutor> {
        &self.executor
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn pages(&self) -> &PageManager {
        &self.pages
    }

    pub fn users(&self) -> &UserManager {
        &self.users
    }

    pub fn revisions(&self) -> &RevisionManager {
        &self.revisions
    }

    pub fn search(&self) -> &SearchManager {
        &self.search
    }

    pub fn categories(&self) -> &CategoryManager {
        &self.categories
    }

    pub fn meta(&self) -> &MetaManager {
        &self.meta
    }

    pub fn poller(&self) -> &ChangePoller {
        &self.poller
    }

    /// Start the change poller at the configured interval.
    pub fn start_polling(&self) -> Result<bool> {
        self.poller.start_polling(self.options.poll_interval())
    }

    pub fn stop_polling(&self) -> bool {
        self.poller.stop_polling()
    }

    pub fn login(&self, username: &str, password: &str) -> Result<String> {
        self.users.login(username, password)
    }
}
