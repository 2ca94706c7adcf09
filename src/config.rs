use std::path::PathBuf;

use crate::model::Sec;

/// Immutable process configuration, parsed once from the environment and
/// passed to components at construction. Nothing reads the environment after
/// startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    /// Ceiling on weekly repeats per reservation request.
    pub repeat_limit: u32,
    /// Widest allowed window for schedule queries, in seconds.
    pub window_limit_sec: Sec,
    /// Permission level that marks a caller as administrator.
    pub admin_permission: i64,
    /// Bypass identity verification (development only).
    pub dev_mode: bool,
    pub jwt_public_key_path: PathBuf,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub metrics_port: Option<u16>,
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            bind: std::env::var("ROOMLEDGER_BIND").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env_parse("ROOMLEDGER_PORT").unwrap_or(8080),
            data_dir: std::env::var("ROOMLEDGER_DATA_DIR")
                .unwrap_or_else(|_| "./data".into())
                .into(),
            repeat_limit: env_parse("ROOMLEDGER_REPEAT_LIMIT").unwrap_or(12),
            window_limit_sec: env_parse("ROOMLEDGER_WINDOW_LIMIT_SECS")
                .unwrap_or(90 * 24 * 3600),
            admin_permission: env_parse("ROOMLEDGER_ADMIN_PERMISSION").unwrap_or(1),
            dev_mode: env_parse("ROOMLEDGER_DEV_MODE").unwrap_or(false),
            jwt_public_key_path: std::env::var("ROOMLEDGER_JWT_PUBLIC_KEY_PATH")
                .unwrap_or_else(|_| "jwt.pub".into())
                .into(),
            jwt_issuer: std::env::var("ROOMLEDGER_JWT_ISSUER").unwrap_or_else(|_| "id".into()),
            jwt_audience: std::env::var("ROOMLEDGER_JWT_AUDIENCE")
                .unwrap_or_else(|_| "roomledger".into()),
            metrics_port: env_parse("ROOMLEDGER_METRICS_PORT"),
        }
    }
}
