use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rusqlite::{Connection, OptionalExtension, Result};

use crate::error::ClientError;

pub type DbPool = Arc<Mutex<Connection>>;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS access_token (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        token TEXT NOT NULL,
        updated_at INTEGER DEFAULT (strftime('%s', 'now'))
    );

    CREATE TABLE IF NOT EXISTS cookies (
        origin TEXT NOT NULL,
        name TEXT NOT NULL,
        url TEXT NOT NULL,
        header TEXT NOT NULL,
        updated_at INTEGER DEFAULT (strftime('%s', 'now')),
        PRIMARY KEY (origin, name)
    );
";

pub fn init_db(path: impl AsRef<Path>) -> Result<DbPool> {
    let conn = Connection::open(path)?;
    conn.execute_batch(SCHEMA)?;
    Ok(Arc::new(Mutex::new(conn)))
}

pub fn init_memory_db() -> Result<DbPool> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch(SCHEMA)?;
    Ok(Arc::new(Mutex::new(conn)))
}

// A panic while holding the lock cannot leave a half-written row behind
// (every statement is atomic), so a poisoned lock is still usable.
fn lock(pool: &DbPool) -> MutexGuard<'_, Connection> {
    pool.lock().unwrap_or_else(PoisonError::into_inner)
}

// Access token operations
pub fn save_token(pool: &DbPool, token: &str) -> Result<(), ClientError> {
    let conn = lock(pool);
    conn.execute(
        "INSERT INTO access_token (id, token) VALUES (1, ?1)
         ON CONFLICT(id) DO UPDATE SET token = excluded.token, updated_at = strftime('%s', 'now')",
        [token],
    )?;
    Ok(())
}

pub fn get_token(pool: &DbPool) -> Result<Option<String>, ClientError> {
    let conn = lock(pool);
    let token = conn
        .query_row("SELECT token FROM access_token WHERE id = 1", [], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(token)
}

pub fn delete_token(pool: &DbPool) -> Result<(), ClientError> {
    let conn = lock(pool);
    conn.execute("DELETE FROM access_token", [])?;
    Ok(())
}

// Cookie operations
pub fn upsert_cookie(
    pool: &DbPool,
    origin: &str,
    name: &str,
    url: &str,
    header: &str,
) -> Result<(), ClientError> {
    let conn = lock(pool);
    conn.execute(
        "INSERT INTO cookies (origin, name, url, header) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(origin, name) DO UPDATE SET
            url = excluded.url,
            header = excluded.header,
            updated_at = strftime('%s', 'now')",
        (origin, name, url, header),
    )?;
    Ok(())
}

/// Stored `(url, Set-Cookie header)` pairs, oldest first.
pub fn list_cookies(pool: &DbPool) -> Result<Vec<(String, String)>, ClientError> {
    let conn = lock(pool);
    let mut stmt = conn.prepare("SELECT url, header FROM cookies ORDER BY updated_at ASC")?;
    let cookies = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(cookies)
}
