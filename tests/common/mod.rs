//! In-process fake of the task backend, for driving the client end to end.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use axum::extract::{Path, Query, Request, State};
use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use rand::Rng;
use serde::Serialize;
use serde_json::{json, Value};
use time::{Duration, OffsetDateTime};
use tokio::net::TcpListener;

use taskdesk::db::{self, DbPool};
use taskdesk::App;

const REFRESH_COOKIE: &str = "refresh_token";

struct UserRecord {
    id: i64,
    username: String,
    password_hash: String,
    first_name: String,
    last_name: String,
}

impl UserRecord {
    fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "username": self.username,
            "first_name": self.first_name,
            "last_name": self.last_name,
        })
    }
}

#[derive(Clone, Serialize)]
struct TaskRecord {
    id: i64,
    title: String,
    description: String,
    status: String,
    user: String,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
}

#[derive(Default)]
pub struct Backend {
    users: Vec<UserRecord>,
    tasks: Vec<TaskRecord>,
    access_tokens: HashMap<String, String>,
    refresh_tokens: HashMap<String, String>,
    next_task_id: i64,
    requests: Vec<String>,
    last_patch: Option<Value>,
    refresh_disabled: bool,
    refresh_hands_out_bad_tokens: bool,
    me_failures: u32,
    logout_broken: bool,
    omit_pagination: bool,
}

pub type Shared = Arc<Mutex<Backend>>;

fn lock(state: &Shared) -> MutexGuard<'_, Backend> {
    state.lock().unwrap()
}

// Cheap parameters; these hashes only live for one test.
fn hasher() -> Argon2<'static> {
    Argon2::new(
        Algorithm::Argon2id,
        Version::V0x13,
        Params::new(1024, 1, 1, None).unwrap(),
    )
}

fn hash_password(password: &str) -> String {
    let mut salt_bytes = [0u8; 16];
    rand::rng().fill(&mut salt_bytes);
    let salt = SaltString::encode_b64(&salt_bytes).unwrap();
    hasher()
        .hash_password(password.as_bytes(), &salt)
        .unwrap()
        .to_string()
}

fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    hasher()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

fn generate_token() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    (0..48)
        .map(|_| CHARSET[rng.random_range(0..CHARSET.len())] as char)
        .collect()
}

fn detail(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "detail": message }))).into_response()
}

fn unauthorized() -> Response {
    detail(
        StatusCode::UNAUTHORIZED,
        "Given token not valid for any token type",
    )
}

fn authenticate(state: &Shared, headers: &HeaderMap) -> Result<String, Response> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or_else(unauthorized)?;
    lock(state)
        .access_tokens
        .get(token)
        .cloned()
        .ok_or_else(unauthorized)
}

async fn record(State(state): State<Shared>, req: Request, next: Next) -> Response {
    let line = match req.uri().query() {
        Some(query) => format!("{} {}?{}", req.method(), req.uri().path(), query),
        None => format!("{} {}", req.method(), req.uri().path()),
    };
    lock(&state).requests.push(line);
    next.run(req).await
}

async fn login(State(state): State<Shared>, jar: CookieJar, Json(body): Json<Value>) -> Response {
    let username = body["username"].as_str().unwrap_or_default();
    let password = body["password"].as_str().unwrap_or_default();

    let mut backend = lock(&state);
    let Some(user) = backend
        .users
        .iter()
        .find(|u| u.username == username && verify_password(password, &u.password_hash))
    else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "non_field_errors": ["Unable to log in with provided credentials."] })),
        )
            .into_response();
    };
    let user_json = user.to_json();
    let username = user.username.clone();

    let access = generate_token();
    let refresh = generate_token();
    backend.access_tokens.insert(access.clone(), username.clone());
    backend.refresh_tokens.insert(refresh.clone(), username);

    let cookie = Cookie::build((REFRESH_COOKIE, refresh.clone()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(Duration::days(14));

    let mut response = user_json;
    response["access"] = json!(access);
    response["refresh"] = json!(refresh);
    (jar.add(cookie), Json(response)).into_response()
}

async fn register(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    let username = body["username"].as_str().unwrap_or_default().to_string();
    let password = body["password"].as_str().unwrap_or_default();
    let first_name = body["first_name"].as_str().unwrap_or_default().to_string();
    let last_name = body["last_name"].as_str().unwrap_or_default().to_string();

    let mut backend = lock(&state);
    if backend
        .users
        .iter()
        .any(|u| u.username.eq_ignore_ascii_case(&username))
    {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "username": ["A user with that username already exists."] })),
        )
            .into_response();
    }

    let id = backend.users.len() as i64 + 1;
    let user = UserRecord {
        id,
        username,
        password_hash: hash_password(password),
        first_name,
        last_name,
    };
    let user_json = user.to_json();
    backend.users.push(user);

    (
        StatusCode::CREATED,
        Json(json!({
            "user": user_json,
            "refresh": generate_token(),
            "access": generate_token(),
        })),
    )
        .into_response()
}

async fn refresh_token(State(state): State<Shared>, jar: CookieJar) -> Response {
    let mut backend = lock(&state);
    let username = jar
        .get(REFRESH_COOKIE)
        .and_then(|c| backend.refresh_tokens.get(c.value()).cloned());
    let Some(username) = username.filter(|_| !backend.refresh_disabled) else {
        return detail(StatusCode::UNAUTHORIZED, "Token is invalid or expired");
    };

    let access = generate_token();
    if !backend.refresh_hands_out_bad_tokens {
        backend.access_tokens.insert(access.clone(), username.clone());
    }
    let user = backend
        .users
        .iter()
        .find(|u| u.username == username)
        .map(UserRecord::to_json);
    Json(json!({ "access": access, "user": user })).into_response()
}

async fn me(State(state): State<Shared>, headers: HeaderMap) -> Response {
    let username = match authenticate(&state, &headers) {
        Ok(username) => username,
        Err(resp) => return resp,
    };
    let mut backend = lock(&state);
    if backend.me_failures > 0 {
        backend.me_failures -= 1;
        return detail(StatusCode::INTERNAL_SERVER_ERROR, "Server error");
    }
    match backend.users.iter().find(|u| u.username == username) {
        Some(user) => Json(user.to_json()).into_response(),
        None => detail(StatusCode::NOT_FOUND, "Not found."),
    }
}

async fn logout(State(state): State<Shared>, jar: CookieJar) -> Response {
    let mut backend = lock(&state);
    if backend.logout_broken {
        return detail(StatusCode::INTERNAL_SERVER_ERROR, "Server error");
    }
    if let Some(cookie) = jar.get(REFRESH_COOKIE) {
        backend.refresh_tokens.remove(cookie.value());
    }
    let removal = Cookie::build((REFRESH_COOKIE, "")).path("/");
    (
        jar.remove(removal),
        Json(json!({ "detail": "Successfully logged out." })),
    )
        .into_response()
}

fn paginate(
    tasks: Vec<TaskRecord>,
    params: &HashMap<String, String>,
    omit_pagination: bool,
) -> Response {
    let page_size: usize = params
        .get("page_size")
        .and_then(|s| s.parse().ok())
        .unwrap_or(10usize)
        .clamp(1, 100);
    let page: usize = params.get("page").and_then(|s| s.parse().ok()).unwrap_or(1);

    let total_items = tasks.len();
    let total_pages = total_items.div_ceil(page_size).max(1);
    if page < 1 || page > total_pages {
        return detail(StatusCode::NOT_FOUND, "Invalid page.");
    }

    let results: Vec<TaskRecord> = tasks
        .into_iter()
        .skip((page - 1) * page_size)
        .take(page_size)
        .collect();

    if omit_pagination {
        return Json(json!({ "count": total_items, "results": results })).into_response();
    }

    Json(json!({
        "pagination": {
            "next": null,
            "previous": null,
            "current_page": page,
            "total_pages": total_pages,
            "page_size": page_size,
            "total_items": total_items,
        },
        "results": results,
    }))
    .into_response()
}

fn filtered(backend: &Backend, keep: impl Fn(&TaskRecord) -> bool, params: &HashMap<String, String>) -> Vec<TaskRecord> {
    let mut tasks: Vec<TaskRecord> = backend
        .tasks
        .iter()
        .filter(|t| keep(t))
        .filter(|t| params.get("status").is_none_or(|s| &t.status == s))
        .cloned()
        .collect();
    // Newest first.
    tasks.sort_by(|a, b| b.id.cmp(&a.id));
    tasks
}

async fn list_tasks(
    State(state): State<Shared>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if let Err(resp) = authenticate(&state, &headers) {
        return resp;
    }
    let backend = lock(&state);
    let owner = params.get("username").cloned();
    let tasks = filtered(
        &backend,
        |t| owner.as_ref().is_none_or(|o| &t.user == o),
        &params,
    );
    paginate(tasks, &params, backend.omit_pagination)
}

async fn my_tasks(
    State(state): State<Shared>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let username = match authenticate(&state, &headers) {
        Ok(username) => username,
        Err(resp) => return resp,
    };
    let backend = lock(&state);
    let tasks = filtered(&backend, |t| t.user == username, &params);
    paginate(tasks, &params, backend.omit_pagination)
}

async fn search_tasks(
    State(state): State<Shared>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if let Err(resp) = authenticate(&state, &headers) {
        return resp;
    }
    let Some(query) = params.get("q").filter(|q| !q.is_empty()).map(|q| q.to_lowercase()) else {
        return detail(StatusCode::BAD_REQUEST, "Search term 'q' is required");
    };
    let backend = lock(&state);
    let tasks = filtered(&backend, |t| t.title.to_lowercase().contains(&query), &params);
    paginate(tasks, &params, backend.omit_pagination)
}

async fn create_task(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let username = match authenticate(&state, &headers) {
        Ok(username) => username,
        Err(resp) => return resp,
    };
    let title = body["title"].as_str().unwrap_or_default();
    if title.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "title": ["This field may not be blank."] })),
        )
            .into_response();
    }
    let description = body["description"].as_str().unwrap_or_default();
    let task = insert_task(&mut lock(&state), &username, title, description, "NEW");
    (StatusCode::CREATED, Json(task)).into_response()
}

fn insert_task(
    backend: &mut Backend,
    owner: &str,
    title: &str,
    description: &str,
    status: &str,
) -> TaskRecord {
    backend.next_task_id += 1;
    let task = TaskRecord {
        id: backend.next_task_id,
        title: title.to_string(),
        description: description.to_string(),
        status: status.to_string(),
        user: owner.to_string(),
        created_at: OffsetDateTime::now_utc(),
    };
    backend.tasks.push(task.clone());
    task
}

/// Looks up a task the caller owns; mirrors the backend's creator-only rule.
fn owned_task<'a>(backend: &'a mut Backend, id: i64, username: &str) -> Result<&'a mut TaskRecord, Response> {
    let task = backend
        .tasks
        .iter_mut()
        .find(|t| t.id == id)
        .ok_or_else(|| detail(StatusCode::NOT_FOUND, "No Task matches the given query."))?;
    if task.user != username {
        return Err(detail(
            StatusCode::FORBIDDEN,
            "You do not have permission to perform this action.",
        ));
    }
    Ok(task)
}

async fn get_task(State(state): State<Shared>, headers: HeaderMap, Path(id): Path<i64>) -> Response {
    if let Err(resp) = authenticate(&state, &headers) {
        return resp;
    }
    let backend = lock(&state);
    match backend.tasks.iter().find(|t| t.id == id) {
        Some(task) => Json(task.clone()).into_response(),
        None => detail(StatusCode::NOT_FOUND, "No Task matches the given query."),
    }
}

async fn patch_task(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<Value>,
) -> Response {
    let username = match authenticate(&state, &headers) {
        Ok(username) => username,
        Err(resp) => return resp,
    };
    let mut backend = lock(&state);
    backend.last_patch = Some(body.clone());
    let task = match owned_task(&mut backend, id, &username) {
        Ok(task) => task,
        Err(resp) => return resp,
    };
    if let Some(title) = body["title"].as_str() {
        task.title = title.to_string();
    }
    if let Some(description) = body["description"].as_str() {
        task.description = description.to_string();
    }
    if let Some(status) = body["status"].as_str() {
        task.status = status.to_string();
    }
    Json(task.clone()).into_response()
}

async fn delete_task(State(state): State<Shared>, headers: HeaderMap, Path(id): Path<i64>) -> Response {
    let username = match authenticate(&state, &headers) {
        Ok(username) => username,
        Err(resp) => return resp,
    };
    let mut backend = lock(&state);
    if let Err(resp) = owned_task(&mut backend, id, &username) {
        return resp;
    }
    backend.tasks.retain(|t| t.id != id);
    StatusCode::NO_CONTENT.into_response()
}

async fn complete_task(State(state): State<Shared>, headers: HeaderMap, Path(id): Path<i64>) -> Response {
    let username = match authenticate(&state, &headers) {
        Ok(username) => username,
        Err(resp) => return resp,
    };
    let mut backend = lock(&state);
    match owned_task(&mut backend, id, &username) {
        Ok(task) => {
            task.status = "COMPLETED".to_string();
            Json(task.clone()).into_response()
        }
        Err(resp) => resp,
    }
}

async fn can_edit_title(State(state): State<Shared>, headers: HeaderMap, Path(id): Path<i64>) -> Response {
    if let Err(resp) = authenticate(&state, &headers) {
        return resp;
    }
    let backend = lock(&state);
    let Some(task) = backend.tasks.iter().find(|t| t.id == id) else {
        return detail(StatusCode::NOT_FOUND, "No Task matches the given query.");
    };
    let now = OffsetDateTime::now_utc();
    let cutoff = task.created_at + Duration::minutes(5);
    Json(json!({
        "can_edit": now < cutoff,
        "cutoff_time": cutoff.format(&time::format_description::well_known::Rfc3339).unwrap(),
    }))
    .into_response()
}

fn create_backend(state: Shared) -> Router {
    Router::new()
        .route("/api/login/", post(login))
        .route("/api/register/", post(register))
        .route("/api/token/refresh/", post(refresh_token))
        .route("/api/users/me/", get(me))
        .route("/api/logout/", post(logout))
        .route("/api/tasks/", get(list_tasks).post(create_task))
        .route("/api/tasks/my_tasks/", get(my_tasks))
        .route("/api/tasks/search/", get(search_tasks))
        .route(
            "/api/tasks/{id}/",
            get(get_task).patch(patch_task).delete(delete_task),
        )
        .route("/api/tasks/{id}/complete/", post(complete_task))
        .route("/api/tasks/{id}/can_edit_title/", get(can_edit_title))
        .layer(
            tower::ServiceBuilder::new()
                .layer(tower_http::trace::TraceLayer::new_for_http())
                .layer(middleware::from_fn_with_state(state.clone(), record)),
        )
        .with_state(state)
}

pub struct TestServer {
    pub addr: String,
    pub backend: Shared,
}

impl TestServer {
    pub async fn new() -> Self {
        let backend: Shared = Arc::new(Mutex::new(Backend::default()));
        let app = create_backend(backend.clone());

        // Bind to random available port
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = format!("http://{}", listener.local_addr().unwrap());

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        TestServer { addr, backend }
    }

    /// A fresh client with its own in-memory data file.
    pub fn app(&self) -> App {
        self.app_with_db(db::init_memory_db().unwrap())
    }

    pub fn app_with_db(&self, db: DbPool) -> App {
        App::with_db(&self.addr, db).expect("client")
    }

    pub fn add_user(&self, username: &str, password: &str, first_name: &str) {
        let mut backend = lock(&self.backend);
        let id = backend.users.len() as i64 + 1;
        backend.users.push(UserRecord {
            id,
            username: username.to_string(),
            password_hash: hash_password(password),
            first_name: first_name.to_string(),
            last_name: String::new(),
        });
    }

    pub fn add_task(&self, owner: &str, title: &str, status: &str) -> i64 {
        insert_task(&mut lock(&self.backend), owner, title, "", status).id
    }

    /// The next task created gets this id.
    pub fn set_next_task_id(&self, id: i64) {
        lock(&self.backend).next_task_id = id - 1;
    }

    pub fn age_task(&self, id: i64, minutes: i64) {
        let mut backend = lock(&self.backend);
        if let Some(task) = backend.tasks.iter_mut().find(|t| t.id == id) {
            task.created_at -= Duration::minutes(minutes);
        }
    }

    pub fn task_status(&self, id: i64) -> Option<String> {
        lock(&self.backend)
            .tasks
            .iter()
            .find(|t| t.id == id)
            .map(|t| t.status.clone())
    }

    pub fn has_task(&self, id: i64) -> bool {
        lock(&self.backend).tasks.iter().any(|t| t.id == id)
    }

    /// Every access token handed out so far stops working.
    pub fn expire_access_tokens(&self) {
        lock(&self.backend).access_tokens.clear();
    }

    pub fn set_refresh_disabled(&self, disabled: bool) {
        lock(&self.backend).refresh_disabled = disabled;
    }

    /// Refresh still answers 200, but the access token it returns is never accepted.
    pub fn set_refresh_hands_out_bad_tokens(&self, bad: bool) {
        lock(&self.backend).refresh_hands_out_bad_tokens = bad;
    }

    /// The next `count` calls to the current-user endpoint answer 500.
    pub fn fail_me(&self, count: u32) {
        lock(&self.backend).me_failures = count;
    }

    /// List endpoints answer with a bare `count` instead of a pagination block.
    pub fn set_omit_pagination(&self, omit: bool) {
        lock(&self.backend).omit_pagination = omit;
    }

    pub fn set_logout_broken(&self, broken: bool) {
        lock(&self.backend).logout_broken = broken;
    }

    pub fn requests(&self) -> Vec<String> {
        lock(&self.backend).requests.clone()
    }

    pub fn clear_requests(&self) {
        lock(&self.backend).requests.clear();
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.requests()
            .iter()
            .filter(|line| line.starts_with(prefix))
            .count()
    }

    pub fn last_patch(&self) -> Option<Value> {
        lock(&self.backend).last_patch.clone()
    }
}
