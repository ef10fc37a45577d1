use reqwest::Url;

use crate::error::ClientError;
use crate::models::TaskStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListParams {
    pub page: u32,
    pub page_size: u32,
    pub status: Option<TaskStatus>,
}

#[derive(Debug, Clone)]
pub struct Endpoints {
    base: Url,
}

impl Endpoints {
    pub fn new(base: &str) -> Result<Self, ClientError> {
        let trimmed = base.trim().trim_end_matches('/');
        let base = Url::parse(&format!("{trimmed}/"))
            .map_err(|e| ClientError::Config(format!("invalid API base url {base:?}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(ClientError::Config(format!("invalid API base url {base}")));
        }
        Ok(Self { base })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn at(&self, path: &str) -> Url {
        // `path` never starts with '/', so it is resolved below the base path.
        self.base
            .join(path)
            .unwrap_or_else(|_| self.base.clone())
    }

    pub fn login(&self) -> Url {
        self.at("api/login/")
    }

    pub fn register(&self) -> Url {
        self.at("api/register/")
    }

    pub fn token_refresh(&self) -> Url {
        self.at("api/token/refresh/")
    }

    pub fn me(&self) -> Url {
        self.at("api/users/me/")
    }

    pub fn logout(&self) -> Url {
        self.at("api/logout/")
    }

    pub fn tasks(&self) -> Url {
        self.at("api/tasks/")
    }

    pub fn my_tasks(&self) -> Url {
        self.at("api/tasks/my_tasks/")
    }

    pub fn search(&self) -> Url {
        self.at("api/tasks/search/")
    }

    pub fn task(&self, id: i64) -> Url {
        self.at(&format!("api/tasks/{id}/"))
    }

    pub fn complete_task(&self, id: i64) -> Url {
        self.at(&format!("api/tasks/{id}/complete/"))
    }

    pub fn can_edit_title(&self, id: i64) -> Url {
        self.at(&format!("api/tasks/{id}/can_edit_title/"))
    }

    /// Endpoints that hand out credentials. A 401 from one of these is a
    /// plain failure and never triggers a token refresh.
    pub fn is_auth_endpoint(&self, url: &Url) -> bool {
        [self.token_refresh(), self.login(), self.register()]
            .iter()
            .any(|auth| auth.path() == url.path())
    }

    pub fn all_tasks_page(&self, params: &ListParams) -> Url {
        with_list_params(self.tasks(), &[], params)
    }

    pub fn my_tasks_page(&self, params: &ListParams) -> Url {
        with_list_params(self.my_tasks(), &[], params)
    }

    pub fn user_tasks_page(&self, username: &str, params: &ListParams) -> Url {
        with_list_params(self.tasks(), &[("username", username)], params)
    }

    pub fn search_page(&self, query: &str, params: &ListParams) -> Url {
        with_list_params(self.search(), &[("q", query)], params)
    }
}

fn with_list_params(mut url: Url, leading: &[(&str, &str)], params: &ListParams) -> Url {
    {
        let mut query = url.query_pairs_mut();
        query.extend_pairs(leading.iter().copied());
        query.append_pair("page", &params.page.to_string());
        query.append_pair("page_size", &params.page_size.to_string());
        if let Some(status) = params.status {
            query.append_pair("status", status.as_str());
        }
    }
    url
}
