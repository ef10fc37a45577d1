use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cookies::PersistentJar;
use crate::db::DbPool;
use crate::endpoints::Endpoints;
use crate::error::ClientError;
use crate::models::TokenResponse;
use crate::token_store::TokenStore;

#[derive(Default)]
struct RefreshGate {
    token: Option<String>,
}

/// Every call carries the bearer token and the cookie jar. A 401 triggers at
/// most one refresh and one retry.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    endpoints: Arc<Endpoints>,
    tokens: TokenStore,
    refresh_gate: Arc<Mutex<RefreshGate>>,
    // Bumped once per completed refresh; lets a caller tell whether the
    // gate already holds a fresh outcome for the 401 it just saw.
    refresh_generation: Arc<AtomicU64>,
}

impl ApiClient {
    pub fn new(endpoints: Endpoints, db: DbPool) -> Result<Self, ClientError> {
        let jar = Arc::new(PersistentJar::load(db.clone())?);
        let http = reqwest::Client::builder()
            .cookie_provider(jar)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            http,
            endpoints: Arc::new(endpoints),
            tokens: TokenStore::new(db),
            refresh_gate: Arc::new(Mutex::new(RefreshGate::default())),
            refresh_generation: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    pub async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, ClientError> {
        self.request(Method::GET, url, None::<&()>).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        url: Url,
        body: &B,
    ) -> Result<T, ClientError> {
        self.request(Method::POST, url, Some(body)).await
    }

    pub async fn patch<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        url: Url,
        body: &B,
    ) -> Result<T, ClientError> {
        self.request(Method::PATCH, url, Some(body)).await
    }

    pub async fn delete(&self, url: Url) -> Result<(), ClientError> {
        // The backend may answer with an empty body or a detail message.
        let _: Value = self.request(Method::DELETE, url, None::<&()>).await?;
        Ok(())
    }

    pub async fn request<T, B>(
        &self,
        method: Method,
        url: Url,
        body: Option<&B>,
    ) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let body = body.map(serde_json::to_vec).transpose()?;

        let generation = self.refresh_generation.load(Ordering::Acquire);
        let token = self.tokens.read();
        let (status, bytes) = self.send(&method, &url, body.as_deref(), token.as_deref()).await?;

        let (status, bytes) = if status == StatusCode::UNAUTHORIZED
            && !self.endpoints.is_auth_endpoint(&url)
        {
            debug!(%method, path = url.path(), "Access token rejected, refreshing");
            let Some(fresh) = self.refresh_after(generation).await else {
                return Err(ClientError::SessionExpired);
            };

            let (status, bytes) = self.send(&method, &url, body.as_deref(), Some(&fresh)).await?;
            if status == StatusCode::UNAUTHORIZED {
                warn!(%method, path = url.path(), "Refreshed token rejected");
                self.tokens.clear();
                return Err(ClientError::SessionExpired);
            }
            (status, bytes)
        } else {
            (status, bytes)
        };

        if !status.is_success() {
            debug!(%method, path = url.path(), %status, "Request failed");
            return Err(ClientError::from_response(status, &bytes));
        }

        parse_body(&bytes)
    }

    async fn send(
        &self,
        method: &Method,
        url: &Url,
        body: Option<&[u8]>,
        token: Option<&str>,
    ) -> Result<(StatusCode, Vec<u8>), ClientError> {
        let mut req = self
            .http
            .request(method.clone(), url.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json");
        if let Some(token) = token {
            req = req.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(body) = body {
            req = req.body(body.to_vec());
        }

        let resp = req.send().await?;
        let status = resp.status();
        let bytes = resp.bytes().await?;
        Ok((status, bytes.to_vec()))
    }

    // Any failure clears the stored token.
    pub async fn refresh(&self) -> bool {
        let generation = self.refresh_generation.load(Ordering::Acquire);
        self.refresh_after(generation).await.is_some()
    }

    /// Refreshes unless a refresh finished after `seen` was sampled, in which
    /// case that refresh's outcome is reused. Returns the token the caller
    /// must retry with.
    async fn refresh_after(&self, seen: u64) -> Option<String> {
        let mut gate = self.refresh_gate.lock().await;
        if self.refresh_generation.load(Ordering::Acquire) != seen {
            debug!("Reusing concurrent refresh outcome");
            return gate.token.clone();
        }

        let token = match self.request_new_token().await {
            Ok(token) => match self.tokens.save(&token) {
                Ok(()) => {
                    info!("Access token refreshed");
                    Some(token)
                }
                Err(err) => {
                    warn!(error = %err, "Failed to store refreshed token");
                    None
                }
            },
            Err(err) => {
                warn!(error = %err, "Token refresh failed");
                None
            }
        };

        if token.is_none() {
            self.tokens.clear();
        }
        gate.token.clone_from(&token);
        self.refresh_generation.fetch_add(1, Ordering::Release);
        token
    }

    async fn request_new_token(&self) -> Result<String, ClientError> {
        let resp = self
            .http
            .post(self.endpoints.token_refresh())
            .send()
            .await?;
        let status = resp.status();
        let bytes = resp.bytes().await?;
        if !status.is_success() {
            return Err(ClientError::from_response(status, &bytes));
        }
        let body: TokenResponse = serde_json::from_slice(&bytes)?;
        Ok(body.access)
    }

    // Never refreshes.
    pub async fn post_logout(&self) -> Result<(), ClientError> {
        let token = self.tokens.read();
        let (status, bytes) = self
            .send(&Method::POST, &self.endpoints.logout(), None, token.as_deref())
            .await?;
        if !status.is_success() {
            return Err(ClientError::from_response(status, &bytes));
        }
        Ok(())
    }
}

fn parse_body<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ClientError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(serde_json::from_value(Value::Null)?);
    }
    Ok(serde_json::from_slice(bytes)?)
}
