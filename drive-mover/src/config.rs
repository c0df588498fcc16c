use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::sync::invoker::{DEFAULT_BACKOFF, DEFAULT_REQUESTS_PER_WINDOW, InvokerConfig};
use crate::sync::policy::{DEFAULT_TERMINAL_REASONS, ReasonPolicy};
use crate::sync::scheduler::DEFAULT_CONCURRENCY;

pub const DEFAULT_API_BASE_URL: &str = "https://www.googleapis.com";
pub const DEFAULT_PAGE_SIZE: u32 = 100;

const ENV_ACCESS_TOKEN: &str = "DRIVE_ACCESS_TOKEN";
const ENV_API_BASE_URL: &str = "DRIVE_API_BASE_URL";
const ENV_CONCURRENCY: &str = "DRIVE_MOVER_CONCURRENCY";
const ENV_REQUESTS_PER_SECOND: &str = "DRIVE_MOVER_REQUESTS_PER_SECOND";
const ENV_BACKOFF_MS: &str = "DRIVE_MOVER_BACKOFF_MS";
const ENV_PAGE_SIZE: &str = "DRIVE_MOVER_PAGE_SIZE";
const ENV_TERMINAL_REASONS: &str = "DRIVE_MOVER_TERMINAL_REASONS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("DRIVE_ACCESS_TOKEN is not set")]
    MissingToken,
    #[error("DRIVE_API_BASE_URL is not a valid URL: {0}")]
    InvalidBaseUrl(#[from] url::ParseError),
}

#[derive(Clone, Debug)]
pub struct MoverConfig {
    pub access_token: String,
    pub api_base_url: Url,
    pub concurrency: usize,
    pub requests_per_second: u32,
    pub backoff: Duration,
    pub page_size: u32,
    pub terminal_reasons: Vec<String>,
}

impl MoverConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from any variable source; unset, unparsable and
    /// non-positive numbers fall back to their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let access_token = lookup(ENV_ACCESS_TOKEN)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or(ConfigError::MissingToken)?;
        let api_base_url = match lookup(ENV_API_BASE_URL).filter(|v| !v.trim().is_empty()) {
            Some(value) => Url::parse(value.trim())?,
            None => Url::parse(DEFAULT_API_BASE_URL)?,
        };
        let concurrency = read_u64(&lookup, ENV_CONCURRENCY, DEFAULT_CONCURRENCY as u64) as usize;
        let requests_per_second = read_u64(
            &lookup,
            ENV_REQUESTS_PER_SECOND,
            u64::from(DEFAULT_REQUESTS_PER_WINDOW),
        )
        .min(u64::from(u32::MAX)) as u32;
        let backoff = Duration::from_millis(read_u64(
            &lookup,
            ENV_BACKOFF_MS,
            DEFAULT_BACKOFF.as_millis() as u64,
        ));
        let page_size = read_u64(&lookup, ENV_PAGE_SIZE, u64::from(DEFAULT_PAGE_SIZE))
            .min(u64::from(u32::MAX)) as u32;
        let terminal_reasons = lookup(ENV_TERMINAL_REASONS)
            .map(|value| split_list(&value))
            .filter(|reasons| !reasons.is_empty())
            .unwrap_or_else(|| {
                DEFAULT_TERMINAL_REASONS
                    .iter()
                    .map(|reason| reason.to_string())
                    .collect()
            });

        Ok(Self {
            access_token,
            api_base_url,
            concurrency,
            requests_per_second,
            backoff,
            page_size,
            terminal_reasons,
        })
    }

    pub fn invoker_config(&self) -> InvokerConfig {
        InvokerConfig {
            requests_per_window: self.requests_per_second,
            window_wait: self.backoff,
            retry_delay: self.backoff,
        }
    }

    pub fn policy(&self) -> ReasonPolicy {
        ReasonPolicy::new(self.terminal_reasons.iter().cloned())
    }
}

fn read_u64<F>(lookup: &F, name: &str, default: u64) -> u64
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
