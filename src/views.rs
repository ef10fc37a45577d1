use reqwest::Url;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::client::ApiClient;
use crate::endpoints::{Endpoints, ListParams};
use crate::models::{Page, Task, TaskList, TaskStatus, DEFAULT_PAGE_SIZE};
use crate::session::{Session, SessionController};

pub const HOME: &str = "/";

type EndpointBuilder = Box<dyn Fn(&Endpoints, &ListParams) -> Url + Send + Sync>;
type RedirectGuard = Box<dyn Fn() -> Option<&'static str> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded,
    Redirect(&'static str),
    LoginRequired,
    Failed,
}

/// A paginated, filterable list of tasks.
///
/// The four list screens share this flow and differ only in the endpoint
/// builder and redirect guard they inject.
pub struct TaskCollectionView {
    title: String,
    client: ApiClient,
    session: SessionController,
    session_rx: watch::Receiver<Session>,
    build_endpoint: EndpointBuilder,
    redirect: Option<RedirectGuard>,
    status: Option<TaskStatus>,
    page_size: u32,

    tasks: Vec<Task>,
    pagination: Page,
    loading: bool,
    error: Option<String>,
}

impl TaskCollectionView {
    pub fn new(
        title: impl Into<String>,
        session: &SessionController,
        build_endpoint: impl Fn(&Endpoints, &ListParams) -> Url + Send + Sync + 'static,
    ) -> Self {
        Self {
            title: title.into(),
            client: session.client().clone(),
            session: session.clone(),
            session_rx: session.subscribe(),
            build_endpoint: Box::new(build_endpoint),
            redirect: None,
            status: None,
            page_size: DEFAULT_PAGE_SIZE,
            tasks: Vec::new(),
            pagination: Page::default(),
            loading: false,
            error: None,
        }
    }

    pub fn all_tasks(session: &SessionController, status: Option<TaskStatus>) -> Self {
        Self::new("All Tasks", session, Endpoints::all_tasks_page).with_status(status)
    }

    pub fn my_tasks(session: &SessionController, status: Option<TaskStatus>) -> Self {
        Self::new("My Tasks", session, Endpoints::my_tasks_page).with_status(status)
    }

    pub fn user_tasks(
        session: &SessionController,
        username: impl Into<String>,
        status: Option<TaskStatus>,
    ) -> Self {
        let username = username.into();
        let missing = username.trim().is_empty();
        let title = format!("{username}'s Tasks");
        Self::new(title, session, move |endpoints, params| {
            endpoints.user_tasks_page(&username, params)
        })
        .with_redirect(move || missing.then_some(HOME))
        .with_status(status)
    }

    pub fn search(
        session: &SessionController,
        query: impl Into<String>,
        status: Option<TaskStatus>,
    ) -> Self {
        let query = query.into();
        let missing = query.trim().is_empty();
        let title = format!("Search Results for \"{query}\"");
        Self::new(title, session, move |endpoints, params| {
            endpoints.search_page(&query, params)
        })
        .with_redirect(move || missing.then_some(HOME))
        .with_status(status)
    }

    #[must_use]
    pub fn with_redirect(
        mut self,
        guard: impl Fn() -> Option<&'static str> + Send + Sync + 'static,
    ) -> Self {
        self.redirect = Some(Box::new(guard));
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: Option<TaskStatus>) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self.pagination.page_size = self.page_size;
        self
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn pagination(&self) -> &Page {
        &self.pagination
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn status_filter(&self) -> Option<TaskStatus> {
        self.status
    }

    pub fn endpoint(&self, page: u32) -> Url {
        let params = ListParams {
            page,
            page_size: self.page_size,
            status: self.status,
        };
        (self.build_endpoint)(self.client.endpoints(), &params)
    }

    pub fn sync_session(&mut self) -> bool {
        let authenticated = self.session_rx.borrow_and_update().is_authenticated();
        if !authenticated && !self.tasks.is_empty() {
            debug!(view = %self.title, "Session ended, discarding tasks");
        }
        if !authenticated {
            self.tasks.clear();
            self.pagination = Page {
                page_size: self.page_size,
                ..Page::default()
            };
            self.error = None;
        }
        authenticated
    }

    pub async fn load(&mut self, page: u32) -> LoadOutcome {
        if let Some(target) = self.redirect.as_ref().and_then(|guard| guard()) {
            debug!(view = %self.title, target, "Redirecting before fetch");
            return LoadOutcome::Redirect(target);
        }
        if !self.sync_session() {
            return LoadOutcome::LoginRequired;
        }

        let url = self.endpoint(page);
        self.loading = true;
        self.error = None;
        let result = self.client.get::<TaskList>(url).await;
        self.loading = false;

        match result {
            Ok(list) => {
                self.pagination = list.page(page, self.page_size);
                self.tasks = list.results;
                info!(
                    view = %self.title,
                    page = self.pagination.current_page,
                    count = self.tasks.len(),
                    "Loaded tasks"
                );
                LoadOutcome::Loaded
            }
            Err(err) => {
                warn!(view = %self.title, error = %err, "Failed to fetch tasks");
                self.session.handle_error(&err);
                if err.is_session_expired() {
                    self.sync_session();
                }
                self.error = Some(err.to_string());
                LoadOutcome::Failed
            }
        }
    }

    pub async fn reload(&mut self) -> LoadOutcome {
        self.load(self.pagination.current_page.max(1)).await
    }

    // Pages outside `1..=total_pages` are ignored.
    pub async fn change_page(&mut self, page: u32) -> Option<LoadOutcome> {
        if !self.pagination.contains(page) {
            debug!(view = %self.title, page, "Ignoring out-of-range page");
            return None;
        }
        Some(self.load(page).await)
    }

    pub async fn next_page(&mut self) -> Option<LoadOutcome> {
        self.change_page(self.pagination.current_page.saturating_add(1)).await
    }

    pub async fn previous_page(&mut self) -> Option<LoadOutcome> {
        self.change_page(self.pagination.current_page.saturating_sub(1)).await
    }

    pub async fn set_status_filter(&mut self, status: Option<TaskStatus>) -> Option<LoadOutcome> {
        if self.status == status {
            return None;
        }
        self.status = status;
        Some(self.load(1).await)
    }

    pub fn replace_task(&mut self, task: Task) -> bool {
        match self.tasks.iter_mut().find(|t| t.id == task.id) {
            Some(slot) => {
                *slot = task;
                true
            }
            None => false,
        }
    }

    pub fn remove_task(&mut self, id: i64) -> bool {
        let before = self.tasks.len();
        self.tasks.retain(|t| t.id != id);
        if self.tasks.len() == before {
            return false;
        }
        self.pagination.item_removed();
        true
    }
}
