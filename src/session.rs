use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::client::ApiClient;
use crate::error::ClientError;
use crate::models::{Credentials, NewUser, TokenResponse, User};

const MIN_USERNAME_LEN: usize = 4;
const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Checking,
    Authenticated(User),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPrompt {
    None,
    Login,
    Register,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub state: AuthState,
    pub prompt: AuthPrompt,
}

impl Session {
    fn checking() -> Self {
        Self {
            state: AuthState::Checking,
            prompt: AuthPrompt::None,
        }
    }

    fn signed_out() -> Self {
        Self {
            state: AuthState::Unauthenticated,
            prompt: AuthPrompt::Login,
        }
    }

    fn signed_in(user: User) -> Self {
        Self {
            state: AuthState::Authenticated(user),
            prompt: AuthPrompt::None,
        }
    }

    pub fn user(&self) -> Option<&User> {
        match &self.state {
            AuthState::Authenticated(user) => Some(user),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.state, AuthState::Authenticated(_))
    }
}

/// Owns the session and publishes every change to subscribers.
#[derive(Clone)]
pub struct SessionController {
    client: ApiClient,
    state: Arc<watch::Sender<Session>>,
}

impl SessionController {
    pub fn new(client: ApiClient) -> Self {
        let (state, _) = watch::channel(Session::checking());
        Self {
            client,
            state: Arc::new(state),
        }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> Session {
        self.state.borrow().clone()
    }

    pub fn current_user(&self) -> Option<User> {
        self.state.borrow().user().cloned()
    }

    pub async fn startup(&self) -> Session {
        self.state.send_replace(Session::checking());

        let session = match self.fetch_me().await {
            Ok(user) => Session::signed_in(user),
            // The pipeline already tried the refresh cookie and it was refused.
            Err(ClientError::SessionExpired) => Session::signed_out(),
            Err(err) => {
                info!(error = %err, "No usable access token, trying refresh");
                self.session_from_refresh().await
            }
        };

        if let Some(user) = session.user() {
            info!(username = %user.username, "Session restored");
        }
        self.state.send_replace(session.clone());
        session
    }

    async fn session_from_refresh(&self) -> Session {
        if !self.client.refresh().await {
            return Session::signed_out();
        }
        match self.fetch_me().await {
            Ok(user) => Session::signed_in(user),
            Err(err) => {
                warn!(error = %err, "Fetching user after refresh failed");
                Session::signed_out()
            }
        }
    }

    async fn fetch_me(&self) -> Result<User, ClientError> {
        self.client.get(self.client.endpoints().me()).await
    }

    pub async fn login(&self, credentials: &Credentials) -> Result<User, ClientError> {
        if credentials.username.trim().is_empty() || credentials.password.is_empty() {
            return Err(ClientError::validation("Username and password are required"));
        }

        let tokens: TokenResponse = self
            .client
            .post(self.client.endpoints().login(), credentials)
            .await?;
        self.client.tokens().save(&tokens.access)?;

        let user = self.fetch_me().await.inspect_err(|err| {
            warn!(error = %err, "Fetching user after login failed");
            self.client.tokens().clear();
        })?;
        info!(username = %user.username, "User logged in");
        self.state.send_replace(Session::signed_in(user.clone()));
        Ok(user)
    }

    pub async fn register(&self, new_user: &NewUser) -> Result<User, ClientError> {
        validate_registration(new_user)?;

        let _: serde_json::Value = self
            .client
            .post(self.client.endpoints().register(), new_user)
            .await?;
        info!(username = %new_user.username, "User registered");

        self.login(&new_user.credentials()).await
    }

    pub async fn logout(&self) {
        if let Err(err) = self.client.post_logout().await {
            warn!(error = %err, "Logout request failed");
        }
        self.client.tokens().clear();
        self.state.send_replace(Session::signed_out());
        info!("User logged out");
    }

    pub fn show_prompt(&self, prompt: AuthPrompt) {
        self.state.send_modify(|session| session.prompt = prompt);
    }

    pub fn expire(&self) {
        self.client.tokens().clear();
        self.state.send_if_modified(|session| {
            if *session == Session::signed_out() {
                return false;
            }
            *session = Session::signed_out();
            true
        });
    }

    pub fn handle_error(&self, err: &ClientError) {
        if err.is_session_expired() {
            warn!("Session expired");
            self.expire();
        }
    }
}

fn validate_registration(new_user: &NewUser) -> Result<(), ClientError> {
    if new_user.username.trim().chars().count() < MIN_USERNAME_LEN {
        return Err(ClientError::validation(format!(
            "Username must be at least {MIN_USERNAME_LEN} characters"
        )));
    }
    if new_user.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ClientError::validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    if new_user.first_name.trim().is_empty() {
        return Err(ClientError::validation("First name is required"));
    }
    Ok(())
}
