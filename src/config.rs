use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    pub default_page_size: u32,
    pub max_page_size: u32,
    /// Width of the coarse time bucket stored alongside each index row.
    pub time_bucket_hours: u32,
    pub rebuild_timeout_ms: u64,
    /// Upper bound on located rows a spatial query reads per step.
    pub max_near_candidates: u32,
}

/// Tuning for the lost/found matching pass. All values are illustrative
/// defaults and expected to be adjusted per deployment.
#[derive(Debug, Clone, Deserialize)]
pub struct MatchingConfig {
    pub min_score: f64,
    pub time_window_hours: u32,
    pub radius_km: f64,
    pub distance_decay_km: f64,
    pub category_weight: f64,
    pub text_weight: f64,
    pub location_weight: f64,
    pub queue_capacity: usize,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub image_dir: String,
    pub image_timeout_ms: u64,
    pub max_image_bytes: usize,
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SecurityConfig {
    pub enable_hsts: Option<bool>,
    pub hsts_max_age: Option<u64>,
    pub hsts_include_subdomains: Option<bool>,
    pub csp: Option<String>,
    /// Registration secret that yields an admin account. Unset disables admin sign-up.
    pub admin_secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub search: SearchConfig,
    pub matching: MatchingConfig,
    pub storage: StorageConfig,
    pub security: Option<SecurityConfig>,
}

const DEFAULTS: &str = include_str!("../config/default.toml");

impl Default for AppConfig {
    fn default() -> Self {
        // Fallback: parse the embedded default TOML
        match ::config::Config::builder()
            .add_source(::config::File::from_str(DEFAULTS, ::config::FileFormat::Toml))
            .build()
        {
            Ok(cfg) => match cfg.try_deserialize() {
                Ok(app_cfg) => app_cfg,
                Err(e) => {
                    eprintln!("FATAL: Failed to deserialize default config: {}", e);
                    panic!("Failed to deserialize default config: {}", e);
                }
            },
            Err(e) => {
                eprintln!("FATAL: Failed to parse default config: {}", e);
                panic!("Failed to parse default config: {}", e);
            }
        }
    }
}

pub fn load() -> anyhow::Result<AppConfig> {
    // Load .env first (optional)
    let _ = dotenvy::dotenv();

    let mut builder = ::config::Config::builder()
        .add_source(::config::File::from_str(DEFAULTS, ::config::FileFormat::Toml))
        // Optional local file: fundbuero.toml (in CWD)
        .add_source(::config::File::with_name("fundbuero").required(false));

    if let Ok(custom_path) = std::env::var("FUNDBUERO_CONFIG") {
        builder = builder.add_source(::config::File::with_name(&custom_path).required(false));
    }
    // Environment variables last to have highest precedence
    builder = builder.add_source(::config::Environment::with_prefix("FUNDBUERO").separator("__"));

    let cfg = builder.build()?;
    let app_cfg: AppConfig = cfg.try_deserialize()?;
    validate(&app_cfg)?;
    Ok(app_cfg)
}

pub fn validate(cfg: &AppConfig) -> anyhow::Result<()> {
    // Server
    if cfg.server.port == 0 {
        return Err(anyhow::anyhow!("invalid server.port: {}", cfg.server.port));
    }
    #[cfg(unix)]
    if cfg.server.port < 1024 {
        tracing::warn!("Using privileged port {} - may require elevated permissions", cfg.server.port);
    }
    if cfg.database.max_connections == 0 {
        return Err(anyhow::anyhow!("database.max_connections must be > 0"));
    }

    // Search
    let s = &cfg.search;
    if s.default_page_size == 0 || s.max_page_size == 0 {
        return Err(anyhow::anyhow!("search page sizes must be > 0"));
    }
    if s.default_page_size > s.max_page_size {
        return Err(anyhow::anyhow!("search.default_page_size must be <= search.max_page_size"));
    }
    if s.time_bucket_hours == 0 {
        return Err(anyhow::anyhow!("search.time_bucket_hours must be > 0"));
    }
    if s.rebuild_timeout_ms == 0 {
        return Err(anyhow::anyhow!("search.rebuild_timeout_ms must be > 0"));
    }
    if s.max_near_candidates == 0 {
        return Err(anyhow::anyhow!("search.max_near_candidates must be > 0"));
    }

    // Matching
    let m = &cfg.matching;
    if !(0.0..=1.0).contains(&m.min_score) {
        return Err(anyhow::anyhow!("matching.min_score must be in 0..=1"));
    }
    for (name, w) in [
        ("category_weight", m.category_weight),
        ("text_weight", m.text_weight),
        ("location_weight", m.location_weight),
    ] {
        if !w.is_finite() || w < 0.0 {
            return Err(anyhow::anyhow!("matching.{} must be a non-negative number", name));
        }
    }
    if m.category_weight + m.text_weight + m.location_weight <= 0.0 {
        return Err(anyhow::anyhow!("matching weights must not all be zero"));
    }
    if !(m.radius_km > 0.0) || !(m.distance_decay_km > 0.0) {
        return Err(anyhow::anyhow!("matching.radius_km and matching.distance_decay_km must be > 0"));
    }
    if m.time_window_hours == 0 {
        return Err(anyhow::anyhow!("matching.time_window_hours must be > 0"));
    }
    if m.queue_capacity == 0 || m.queue_capacity > 1_000_000 {
        return Err(anyhow::anyhow!("matching.queue_capacity must be in 1..=1000000"));
    }
    if m.sweep_interval_secs == 0 {
        return Err(anyhow::anyhow!("matching.sweep_interval_secs must be > 0"));
    }

    // Storage
    let st = &cfg.storage;
    if st.image_timeout_ms == 0 {
        return Err(anyhow::anyhow!("storage.image_timeout_ms must be > 0"));
    }
    if st.max_image_bytes == 0 {
        return Err(anyhow::anyhow!("storage.max_image_bytes must be > 0"));
    }
    if st.retry_attempts == 0 || st.retry_attempts > 10 {
        return Err(anyhow::anyhow!("storage.retry_attempts must be in 1..=10"));
    }

    Ok(())
}

pub fn ensure_sqlite_parent_dir(url: &str) -> anyhow::Result<()> {
    if let Some(path) = url.strip_prefix("sqlite://") {
        // sqlite:///C:/... on Windows carries a leading '/' before the drive letter
        #[cfg(windows)]
        let path = {
            let bytes = path.as_bytes();
            if bytes.len() >= 3 && bytes[0] == b'/' && bytes[2] == b':' && bytes[1].is_ascii_alphabetic() {
                &path[1..]
            } else {
                path
            }
        };
        let p = Path::new(path);
        if let Some(parent) = p.parent() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
