use anyhow::{anyhow, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub(crate) struct AppConfig {
    pub(crate) database: DatabaseConfig,
    pub(crate) api: ApiConfig,
    pub(crate) cache: CacheConfig,
    pub(crate) leaderboard: LeaderboardConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub(crate) struct DatabaseConfig {
    pub(crate) url: String,
    pub(crate) min_pool_size: u32,
    pub(crate) max_pool_size: u32,
    pub(crate) max_lifetime_seconds: u64,
    pub(crate) acquire_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub(crate) struct ApiConfig {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) cors_origins: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub(crate) struct CacheConfig {
    pub(crate) leaderboard_ttl_seconds: u64,
    pub(crate) rank_ttl_seconds: u64,
    pub(crate) read_ttl_seconds: u64,
    pub(crate) sweep_interval_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub(crate) struct LeaderboardConfig {
    // 0 disables the periodic refresh; scoring and membership changes still
    // trigger reactive refreshes.
    pub(crate) refresh_interval_seconds: u64,
}

pub(crate) fn load_config() -> Result<AppConfig> {
    let cfg = AppConfig {
        database: DatabaseConfig {
            url: env_required("DATABASE_URL")?,
            min_pool_size: env_u32("DB_MIN_POOL_SIZE", 5),
            max_pool_size: env_u32("DB_MAX_POOL_SIZE", 20),
            max_lifetime_seconds: env_u64("DB_MAX_LIFETIME_SECONDS", 1800),
            acquire_timeout_seconds: env_u64("DB_ACQUIRE_TIMEOUT_SECONDS", 30),
        },
        api: ApiConfig {
            host: env_string("API_HOST", "0.0.0.0"),
            port: env_u16("API_PORT", 8000),
            cors_origins: env_list("CORS_ORIGINS", &["*"]),
        },
        cache: CacheConfig {
            leaderboard_ttl_seconds: env_u64("CACHE_LEADERBOARD_TTL_SECONDS", 3600),
            rank_ttl_seconds: env_u64("CACHE_RANK_TTL_SECONDS", 1800),
            read_ttl_seconds: env_u64("CACHE_READ_TTL_SECONDS", 300),
            sweep_interval_seconds: env_u64("CACHE_SWEEP_INTERVAL_SECONDS", 30),
        },
        leaderboard: LeaderboardConfig {
            refresh_interval_seconds: env_u64("LEADERBOARD_REFRESH_INTERVAL_SECONDS", 0),
        },
    };
    if cfg.database.min_pool_size > cfg.database.max_pool_size {
        return Err(anyhow!("DB_MIN_POOL_SIZE must not exceed DB_MAX_POOL_SIZE"));
    }
    Ok(cfg)
}

fn env_required(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| anyhow!("missing required env var: {key}"))
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_list(key: &str, default: &[&str]) -> Vec<String> {
    match std::env::var(key) {
        Ok(v) => parse_list_value(&v)
            .unwrap_or_else(|| default.iter().map(|s| (*s).to_string()).collect()),
        Err(_) => default.iter().map(|s| (*s).to_string()).collect(),
    }
}

fn parse_list_value(raw: &str) -> Option<Vec<String>> {
    if let Ok(v) = serde_json::from_str::<Vec<String>>(raw) {
        return Some(v.into_iter().filter(|s| !s.trim().is_empty()).collect());
    }
    let parts: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().trim_matches('"').to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_value_accepts_json_arrays() {
        let parsed = parse_list_value(r#"["http://a.example","http://b.example"]"#).unwrap();
        assert_eq!(parsed, vec!["http://a.example", "http://b.example"]);
    }

    #[test]
    fn list_value_accepts_comma_separated() {
        let parsed = parse_list_value("http://a.example, \"http://b.example\"").unwrap();
        assert_eq!(parsed, vec!["http://a.example", "http://b.example"]);
    }

    #[test]
    fn list_value_rejects_empty_input() {
        assert_eq!(parse_list_value(""), None);
        assert_eq!(parse_list_value(" , "), None);
    }
}
