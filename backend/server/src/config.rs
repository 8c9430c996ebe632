use std::{collections::HashSet, env, fmt::Display, fs::read_to_string, str::FromStr};

use tracing::{info, warn};

use crate::error::AppError;

pub const MEMORY_STORE: &str = "memory";

pub struct Config {
    pub port: u16,
    pub redis_url: String,
    pub admin_ids: HashSet<String>,
    pub notify_webhook_url: Option<String>,
    pub notify_webhook_token: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self, AppError> {
        let admin_ids: String = try_load("RAFFLE_ADMIN_IDS", "")?;

        Ok(Self {
            port: try_load("RUST_PORT", "1111")?,
            redis_url: try_load("REDIS_URL", MEMORY_STORE)?,
            admin_ids: parse_ids(&admin_ids),
            notify_webhook_url: var("NOTIFY_WEBHOOK_URL").ok(),
            notify_webhook_token: read_secret("NOTIFY_WEBHOOK_TOKEN"),
        })
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admin_ids.contains(user_id)
    }
}

fn var(key: &str) -> Result<String, ()> {
    env::var(key).map_err(|_| {
        warn!("Environment variable {key} not found, using default");
    })
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T, AppError>
where
    T::Err: Display,
{
    var(key)
        .unwrap_or_else(|_| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e| AppError::Config(format!("Invalid {key} value: {e}")))
}

fn read_secret(secret_name: &str) -> Option<String> {
    let path = format!("/run/secrets/{secret_name}");

    read_to_string(&path)
        .map(|s| s.trim().to_string())
        .map_err(|e| {
            info!("No {secret_name} secret: {e}");
        })
        .ok()
}

fn parse_ids(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::parse_ids;

    #[test]
    fn test_parse_ids() {
        let ids = parse_ids(" admin-1, ,admin-2,");
        assert_eq!(ids.len(), 2);
        assert!(ids.contains("admin-1"));
        assert!(ids.contains("admin-2"));
    }

    #[test]
    fn test_parse_ids_empty() {
        assert!(parse_ids("").is_empty());
    }
}
