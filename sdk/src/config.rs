//! Process-wide configuration.
//!
//! Every knob has a per-call override; the values here are the fallback
//! layer between call arguments and the hard-coded defaults. Environment
//! variables (`UNIFS_*`) seed the initial configuration, mirroring the
//! precedence rule: per-call argument > config key > global default.

use std::sync::OnceLock;

use parking_lot::RwLock;

/// Default cap on concurrent network coroutines per bulk call.
pub const DEFAULT_GATHER_BATCH_SIZE: usize = 128;

/// Smaller cap for bulk operations that open local files, so a wide
/// `get`/`put` cannot exhaust the process file-descriptor limit.
pub const DEFAULT_NOFILES_GATHER_BATCH_SIZE: usize = 8;

/// Default read-buffer block size (5 MiB).
pub const DEFAULT_BLOCK_SIZE: usize = 5 * 1024 * 1024;

/// Configuration options shared across filesystem instances.
#[derive(Debug, Clone)]
pub struct Config {
    /// Max concurrent coroutines per bulk call.
    pub gather_batch_size: Option<usize>,
    /// Same, for operations that open local files.
    pub nofiles_gather_batch_size: Option<usize>,
    /// TTL seconds for directory-listing caches. `None` = entries never
    /// expire by age.
    pub listings_expiry_time: Option<f64>,
    /// Disable directory-listing caches entirely.
    pub use_listings_cache: bool,
    /// Do not reuse cached filesystem instances.
    pub skip_instance_cache: bool,
    /// Implicitly create missing parents in copy/put.
    pub auto_mkdir: bool,
    /// Name of the default read-buffer strategy.
    pub cache_type: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gather_batch_size: None,
            nofiles_gather_batch_size: None,
            listings_expiry_time: None,
            use_listings_cache: true,
            skip_instance_cache: false,
            auto_mkdir: false,
            cache_type: "readahead".to_string(),
        }
    }
}

impl Config {
    /// Build a configuration from `UNIFS_*` environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(n) = env_parse::<usize>("UNIFS_GATHER_BATCH_SIZE") {
            cfg.gather_batch_size = Some(n);
        }
        if let Some(n) = env_parse::<usize>("UNIFS_NOFILES_GATHER_BATCH_SIZE") {
            cfg.nofiles_gather_batch_size = Some(n);
        }
        if let Some(n) = env_parse::<f64>("UNIFS_LISTINGS_EXPIRY_TIME") {
            cfg.listings_expiry_time = Some(n);
        }
        if let Some(v) = env_parse::<bool>("UNIFS_USE_LISTINGS_CACHE") {
            cfg.use_listings_cache = v;
        }
        if let Some(v) = env_parse::<bool>("UNIFS_SKIP_INSTANCE_CACHE") {
            cfg.skip_instance_cache = v;
        }
        if let Some(v) = env_parse::<bool>("UNIFS_AUTO_MKDIR") {
            cfg.auto_mkdir = v;
        }
        if let Ok(v) = std::env::var("UNIFS_CACHE_TYPE") {
            if !v.is_empty() {
                cfg.cache_type = v;
            }
        }
        cfg
    }

    /// Effective batch size for a bulk call.
    pub fn batch_size(&self, per_call: Option<usize>, opens_local_files: bool) -> usize {
        if let Some(n) = per_call {
            return n.max(1);
        }
        if opens_local_files {
            self.nofiles_gather_batch_size
                .unwrap_or(DEFAULT_NOFILES_GATHER_BATCH_SIZE)
        } else {
            self.gather_batch_size.unwrap_or(DEFAULT_GATHER_BATCH_SIZE)
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.parse().ok()
}

fn global() -> &'static RwLock<Config> {
    static CONFIG: OnceLock<RwLock<Config>> = OnceLock::new();
    CONFIG.get_or_init(|| RwLock::new(Config::from_env()))
}

/// Snapshot of the current process configuration.
pub fn config() -> Config {
    global().read().clone()
}

/// Replace the process configuration.
pub fn set_config(cfg: Config) {
    *global().write() = cfg;
}

/// Restore defaults (ignoring the environment). Test isolation hook.
pub fn reset_config() {
    *global().write() = Config::default();
}
