use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::HeaderValue;
use reqwest::Url;
use tracing::{debug, warn};

use crate::db::{self, DbPool};
use crate::error::ClientError;

/// Cookie jar that outlives the process: the latest `Set-Cookie` per origin
/// and name is stored and replayed into a fresh [`Jar`] on load.
pub struct PersistentJar {
    jar: Jar,
    db: DbPool,
}

impl PersistentJar {
    pub fn load(db: DbPool) -> Result<Self, ClientError> {
        let jar = Jar::default();
        for (url, header) in db::list_cookies(&db)? {
            match Url::parse(&url) {
                Ok(url) => jar.add_cookie_str(&header, &url),
                Err(err) => warn!(%url, error = %err, "Skipping stored cookie with invalid url"),
            }
        }
        Ok(Self { jar, db })
    }

    fn persist(&self, header: &HeaderValue, url: &Url) {
        let Ok(raw) = header.to_str() else {
            return;
        };
        let Some(name) = cookie_name(raw) else {
            return;
        };
        let origin = url.origin().ascii_serialization();
        if let Err(err) = db::upsert_cookie(&self.db, &origin, name, url.as_str(), raw) {
            warn!(cookie = name, error = %err, "Failed to persist cookie");
        } else {
            debug!(cookie = name, %origin, "Persisted cookie");
        }
    }
}

impl CookieStore for PersistentJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        let headers: Vec<&HeaderValue> = cookie_headers.collect();
        for header in &headers {
            self.persist(header, url);
        }
        self.jar.set_cookies(&mut headers.into_iter(), url);
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        self.jar.cookies(url)
    }
}

fn cookie_name(set_cookie: &str) -> Option<&str> {
    let pair = set_cookie.split(';').next()?;
    let (name, _) = pair.split_once('=')?;
    let name = name.trim();
    (!name.is_empty()).then_some(name)
}
