pub mod client;
pub mod config;
pub mod cookies;
pub mod db;
pub mod editor;
pub mod endpoints;
pub mod error;
pub mod models;
pub mod session;
pub mod token_store;
pub mod views;

use client::ApiClient;
use config::Config;
use db::DbPool;
use endpoints::Endpoints;
use error::ClientError;
use session::SessionController;

pub use error::ClientError as Error;

#[derive(Clone)]
pub struct App {
    pub session: SessionController,
    pub page_size: u32,
}

impl App {
    pub fn open(config: &Config) -> Result<Self, ClientError> {
        let db = db::init_db(&config.data_path)?;
        let app = Self::with_db(&config.api_base, db)?;
        Ok(Self {
            page_size: config.page_size,
            ..app
        })
    }

    pub fn with_db(api_base: &str, db: DbPool) -> Result<Self, ClientError> {
        let endpoints = Endpoints::new(api_base)?;
        let client = ApiClient::new(endpoints, db)?;
        tracing::info!(api_base = %client.endpoints().base(), "Client ready");

        Ok(Self {
            session: SessionController::new(client),
            page_size: models::DEFAULT_PAGE_SIZE,
        })
    }

    pub fn client(&self) -> &ApiClient {
        self.session.client()
    }
}
