use tracing::warn;

use crate::db::{self, DbPool};
use crate::error::ClientError;

#[derive(Clone)]
pub struct TokenStore {
    db: DbPool,
}

impl TokenStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    pub fn save(&self, token: &str) -> Result<(), ClientError> {
        db::save_token(&self.db, token)
    }

    // Storage failures read as "no token".
    pub fn read(&self) -> Option<String> {
        match db::get_token(&self.db) {
            Ok(token) => token,
            Err(err) => {
                warn!(error = %err, "Failed to read access token");
                None
            }
        }
    }

    pub fn clear(&self) {
        if let Err(err) = db::delete_token(&self.db) {
            warn!(error = %err, "Failed to clear access token");
        }
    }

    pub fn has_token(&self) -> bool {
        self.read().is_some()
    }
}
