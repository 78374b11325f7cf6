use chrono::{Duration, Utc};
use std::env;
use std::path::PathBuf;

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_SESSION_TTL_HOURS: i64 = 720;
const DEFAULT_HASH_MEMORY_KIB: u32 = 19_456;
const DEFAULT_HASH_ITERATIONS: u32 = 2;

/// Credential and session knobs for the auth collaborator.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub session_ttl: Duration,
    pub hash_memory_kib: u32,
    pub hash_iterations: u32,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            session_ttl: Duration::hours(DEFAULT_SESSION_TTL_HOURS),
            hash_memory_kib: DEFAULT_HASH_MEMORY_KIB,
            hash_iterations: DEFAULT_HASH_ITERATIONS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub db_path: PathBuf,
    pub log_dir: Option<PathBuf>,
    pub log_json: bool,
    pub cors_origins: Vec<String>,
    pub auth: AuthSettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{}", DEFAULT_PORT),
            db_path: PathBuf::from("data/tracker.db"),
            log_dir: None,
            log_json: true,
            cors_origins: vec!["*".to_string()],
            auth: AuthSettings::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let port = env_u64("PORT", u64::from(DEFAULT_PORT));
        let bind_addr = env_string("TRACKER_BIND").unwrap_or_else(|| format!("0.0.0.0:{}", port));
        let ttl_hours = env_u64("TRACKER_SESSION_TTL_HOURS", DEFAULT_SESSION_TTL_HOURS as u64);

        Self {
            bind_addr,
            db_path: env_string("TRACKER_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            log_dir: env_string("TRACKER_LOG_DIR").map(PathBuf::from),
            log_json: env_bool("TRACKER_LOG_JSON", defaults.log_json),
            cors_origins: env_list("TRACKER_CORS_ORIGINS").unwrap_or(defaults.cors_origins),
            auth: AuthSettings {
                session_ttl: session_ttl(ttl_hours),
                hash_memory_kib: env_u32("TRACKER_HASH_MEMORY_KIB", DEFAULT_HASH_MEMORY_KIB),
                hash_iterations: env_u32("TRACKER_HASH_ITERATIONS", DEFAULT_HASH_ITERATIONS),
            },
        }
    }
}

/// Hours that do not fit a `Duration`, or that would push an expiry past the
/// calendar, fall back to the default lifetime.
fn session_ttl(hours: u64) -> Duration {
    i64::try_from(hours)
        .ok()
        .and_then(Duration::try_hours)
        .filter(|ttl| Utc::now().checked_add_signed(*ttl).is_some())
        .unwrap_or_else(|| Duration::hours(DEFAULT_SESSION_TTL_HOURS))
}

fn env_string(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .and_then(|v| match v.as_str() {
            "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
            "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_u32(name: &str, default: u32) -> u32 {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_list(name: &str) -> Option<Vec<String>> {
    let items: Vec<String> = env::var(name)
        .ok()?
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToString::to_string)
        .collect();
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

#[cfg(test)]
mod tests {
    use super::{session_ttl, DEFAULT_SESSION_TTL_HOURS};
    use chrono::Duration;

    #[test]
    fn session_ttl_keeps_sane_values() {
        assert_eq!(session_ttl(12), Duration::hours(12));
    }

    #[test]
    fn session_ttl_out_of_range_falls_back_to_default() {
        let default = Duration::hours(DEFAULT_SESSION_TTL_HOURS);
        assert_eq!(session_ttl(3_000_000_000), default);
        assert_eq!(session_ttl(3_000_000_000_000_000), default);
        assert_eq!(session_ttl(u64::MAX), default);
    }
}
