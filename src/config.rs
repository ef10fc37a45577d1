use std::{env, fmt::Display, path::PathBuf, str::FromStr};

use tracing::info;

use crate::error::ClientError;
use crate::models::DEFAULT_PAGE_SIZE;

pub const API_BASE_VAR: &str = "TASKDESK_API_BASE";
pub const DATA_VAR: &str = "TASKDESK_DATA";
pub const PAGE_SIZE_VAR: &str = "TASKDESK_PAGE_SIZE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub api_base: String,
    pub data_path: PathBuf,
    pub page_size: u32,
}

impl Config {
    pub fn load() -> Result<Self, ClientError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ClientError> {
        let page_size: u32 = try_load(&lookup, PAGE_SIZE_VAR, &DEFAULT_PAGE_SIZE.to_string())?;
        if !(1..=100).contains(&page_size) {
            return Err(ClientError::Config(format!(
                "{PAGE_SIZE_VAR} must be between 1 and 100, got {page_size}"
            )));
        }

        Ok(Self {
            api_base: try_load(&lookup, API_BASE_VAR, "http://localhost:8000")?,
            data_path: try_load(&lookup, DATA_VAR, "taskdesk.db")?,
            page_size,
        })
    }
}

fn try_load<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: &str,
) -> Result<T, ClientError>
where
    T::Err: Display,
{
    let raw = lookup(key)
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        });

    raw.trim()
        .parse()
        .map_err(|e| ClientError::Config(format!("invalid {key} value {raw:?}: {e}")))
}
