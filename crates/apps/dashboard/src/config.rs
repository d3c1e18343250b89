use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use ingest::DEFAULT_SIMPLIFY_TOLERANCE;

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub data_dir: PathBuf,
    pub cache_ttl: Duration,
    pub admin_password: Option<String>,
    /// `None` leaves the visitor routes open.
    pub visitor_password: Option<String>,
    pub layer_catalog: Option<PathBuf>,
    /// Degrees; `0` disables simplification.
    pub simplify_tolerance: f64,
    pub keep_extra_columns: bool,
    pub max_upload_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let addr = env::var("DASHBOARD_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| format!("invalid DASHBOARD_ADDR '{addr}': {e}"))?;

        Ok(Self {
            addr,
            data_dir: env::var("DASHBOARD_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("datos_web")),
            cache_ttl: Duration::from_secs(env_var_u64("DASHBOARD_CACHE_TTL_SECS", 60)),
            admin_password: env_var_opt("DASHBOARD_ADMIN_PASSWORD"),
            visitor_password: env_var_opt("DASHBOARD_VISITOR_PASSWORD"),
            layer_catalog: env_var_opt("DASHBOARD_LAYER_CATALOG").map(PathBuf::from),
            simplify_tolerance: env_var_f64(
                "DASHBOARD_SIMPLIFY_TOLERANCE",
                DEFAULT_SIMPLIFY_TOLERANCE,
            ),
            keep_extra_columns: env_var_bool("DASHBOARD_KEEP_EXTRA_COLUMNS", false),
            max_upload_bytes: env_var_u64("DASHBOARD_MAX_UPLOAD_MB", 200) as usize * 1024 * 1024,
        })
    }
}

fn env_var_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_var_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_var_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_var_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}
