#[cfg(feature = "cli")]
use clap::Parser;

/// # Load Balancer Configuration
///
/// Layered configuration supporting command-line arguments, environment
/// variables, and `.env` file loading. Every duration lives alongside its
/// raw numeric field so callers can read either the primitive (for display/
/// serialization) or the `Duration` (for scheduling) without re-parsing.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "cli", derive(Parser))]
#[cfg_attr(feature = "cli", command(name = "loadbalancer"))]
#[cfg_attr(feature = "cli", command(about = "A reverse-proxy load balancer with TTL-cached health/stats/routing and pooled backend connections"))]
#[cfg_attr(feature = "cli", command(version))]
pub struct Config {
    // =============================================================================
    // CORE SERVER CONFIGURATION
    // =============================================================================

    /// Admin + dispatcher port to listen on
    #[cfg_attr(feature = "cli", arg(short, long, env = "PORT", default_value = "8082"))]
    pub port: u16,

    /// Host to bind to
    #[cfg_attr(feature = "cli", arg(long, env = "HOST", default_value = "0.0.0.0"))]
    pub host: String,

    // =============================================================================
    // HEALTH CACHE CONFIGURATION
    // =============================================================================

    /// Health cache TTL in milliseconds
    #[cfg_attr(feature = "cli", arg(long, env = "HEALTH_CACHE_TTL_MS", default_value = "5000"))]
    pub health_cache_ttl_ms: u64,

    /// Whether the health cache is enabled
    #[cfg_attr(feature = "cli", arg(long, env = "HEALTH_CACHE_ENABLED", default_value = "true"))]
    pub health_cache_enabled: bool,

    // =============================================================================
    // STATS CACHE CONFIGURATION
    // =============================================================================

    /// Stats cache TTL in milliseconds
    #[cfg_attr(feature = "cli", arg(long, env = "STATS_CACHE_TTL_MS", default_value = "1000"))]
    pub stats_cache_ttl_ms: u64,

    /// Whether the stats cache is enabled
    #[cfg_attr(feature = "cli", arg(long, env = "STATS_CACHE_ENABLED", default_value = "true"))]
    pub stats_cache_enabled: bool,

    // =============================================================================
    // ROUTING CACHE CONFIGURATION
    // =============================================================================

    /// Routing cache TTL in milliseconds
    #[cfg_attr(feature = "cli", arg(long, env = "ROUTING_CACHE_TTL_MS", default_value = "2000"))]
    pub routing_cache_ttl_ms: u64,

    /// Whether the routing cache is enabled
    #[cfg_attr(feature = "cli", arg(long, env = "ROUTING_CACHE_ENABLED", default_value = "true"))]
    pub routing_cache_enabled: bool,

    // =============================================================================
    // CONNECTION POOL CONFIGURATION
    // =============================================================================

    /// Maximum idle connections per pooled backend client
    #[cfg_attr(feature = "cli", arg(long, env = "POOL_MAX_IDLE_CONNS", default_value = "10"))]
    pub pool_max_idle_conns: usize,

    /// Maximum lifetime of a pooled connection entry, in seconds
    #[cfg_attr(feature = "cli", arg(long, env = "POOL_MAX_LIFETIME_SECS", default_value = "60"))]
    pub pool_max_lifetime_secs: u64,

    /// Idle timeout for a pooled connection entry, in seconds
    #[cfg_attr(feature = "cli", arg(long, env = "POOL_IDLE_TIMEOUT_SECS", default_value = "30"))]
    pub pool_idle_timeout_secs: u64,

    /// Interval between pool cleanup sweeps, in seconds
    #[cfg_attr(feature = "cli", arg(long, env = "POOL_CLEANUP_INTERVAL_SECS", default_value = "10"))]
    pub pool_cleanup_interval_secs: u64,

    /// Timeout for a single probe/forward request through the pool, in seconds
    #[cfg_attr(feature = "cli", arg(long, env = "POOL_REQUEST_TIMEOUT_SECS", default_value = "2"))]
    pub pool_request_timeout_secs: u64,

    // =============================================================================
    // BATCHER CONFIGURATION
    // =============================================================================

    /// Maximum number of distinct keys per batch before an immediate flush
    #[cfg_attr(feature = "cli", arg(long, env = "BATCH_SIZE", default_value = "10"))]
    pub batch_size: usize,

    /// Per-key deadline from first submission, in milliseconds
    #[cfg_attr(feature = "cli", arg(long, env = "BATCH_TIMEOUT_MS", default_value = "100"))]
    pub batch_timeout_ms: u64,

    /// Periodic flush tick, in milliseconds
    #[cfg_attr(feature = "cli", arg(long, env = "FLUSH_INTERVAL_MS", default_value = "50"))]
    pub flush_interval_ms: u64,

    // =============================================================================
    // HEALTH-CHECK LOOP CONFIGURATION
    // =============================================================================

    /// Interval between health-check ticks, in seconds
    #[cfg_attr(feature = "cli", arg(long, env = "HEALTH_CHECK_INTERVAL_SECS", default_value = "5"))]
    pub health_check_interval_secs: u64,

    /// Whether the background health-check loop is enabled
    #[cfg_attr(feature = "cli", arg(long, env = "ENABLE_HEALTH_CHECKS", default_value = "true"))]
    pub enable_health_checks: bool,

    // =============================================================================
    // LOGGING CONFIGURATION
    // =============================================================================

    /// Log level (error, warn, info, debug, trace)
    #[cfg_attr(feature = "cli", arg(long, env = "RUST_LOG", default_value = "info"))]
    pub log_level: String,

    /// Environment (development, staging, production)
    #[cfg_attr(feature = "cli", arg(long, env = "ENVIRONMENT", default_value = "development"))]
    pub environment: String,

    // =============================================================================
    // SECURITY CONFIGURATION
    // =============================================================================

    /// CORS origin (use * for development only)
    #[cfg_attr(feature = "cli", arg(long, env = "CORS_ORIGIN", default_value = "*"))]
    pub cors_origin: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8082,
            host: "0.0.0.0".to_string(),
            health_cache_ttl_ms: 5000,
            health_cache_enabled: true,
            stats_cache_ttl_ms: 1000,
            stats_cache_enabled: true,
            routing_cache_ttl_ms: 2000,
            routing_cache_enabled: true,
            pool_max_idle_conns: 10,
            pool_max_lifetime_secs: 60,
            pool_idle_timeout_secs: 30,
            pool_cleanup_interval_secs: 10,
            pool_request_timeout_secs: 2,
            batch_size: 10,
            batch_timeout_ms: 100,
            flush_interval_ms: 50,
            health_check_interval_secs: 5,
            enable_health_checks: true,
            log_level: "info".to_string(),
            environment: "development".to_string(),
            cors_origin: "*".to_string(),
        }
    }
}

impl Config {
    /// Parse configuration from command line arguments and environment variables.
    #[cfg(feature = "cli")]
    pub fn parse_args() -> Self {
        let _ = dotenv::dotenv();

        let config = Self::parse();

        config.setup_logging();

        if let Err(err) = config.validate() {
            eprintln!("Configuration validation failed: {}", err);
            std::process::exit(1);
        }

        config
    }

    /// Create a test configuration with default field values.
    pub fn for_test() -> Self {
        Self::default()
    }

    /// Set up logging configuration based on the configured log level.
    #[cfg(feature = "cli")]
    fn setup_logging(&self) {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(&self.log_level)
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .try_init();
    }

    /// Validate configuration values and provide helpful error messages.
    pub fn validate(&self) -> Result<(), String> {
        if self.port == 0 {
            return Err("Port cannot be 0. Please specify a valid port number (1-65535).".to_string());
        }

        if self.host.is_empty() {
            return Err("Host cannot be empty. Please specify a valid host (e.g., '0.0.0.0', 'localhost', or an IP address).".to_string());
        }

        if self.health_cache_ttl_ms == 0 {
            eprintln!("Warning: health cache TTL of 0ms effectively disables caching.");
        }
        if self.stats_cache_ttl_ms == 0 {
            eprintln!("Warning: stats cache TTL of 0ms effectively disables caching.");
        }
        if self.routing_cache_ttl_ms == 0 {
            eprintln!("Warning: routing cache TTL of 0ms effectively disables caching.");
        }

        if self.pool_max_idle_conns == 0 {
            return Err("Pool max idle connections must be greater than 0.".to_string());
        }
        if self.pool_request_timeout_secs == 0 {
            return Err("Pool request timeout must be greater than 0 seconds.".to_string());
        }

        if self.batch_size == 0 {
            return Err("Batch size must be greater than 0.".to_string());
        }
        if self.batch_timeout_ms == 0 {
            return Err("Batch timeout must be greater than 0ms.".to_string());
        }
        if self.flush_interval_ms == 0 {
            return Err("Flush interval must be greater than 0ms.".to_string());
        }

        if self.enable_health_checks && self.health_check_interval_secs == 0 {
            return Err("Health check interval must be greater than 0 seconds when health checks are enabled.".to_string());
        }

        let valid_environments = ["development", "staging", "production"];
        if !valid_environments.contains(&self.environment.as_str()) {
            return Err(format!(
                "Invalid environment '{}'. Valid options are: {}",
                self.environment,
                valid_environments.join(", ")
            ));
        }

        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(format!(
                "Invalid log level '{}'. Valid options are: {}",
                self.log_level,
                valid_log_levels.join(", ")
            ));
        }

        if self.environment == "production" && self.cors_origin == "*" {
            eprintln!("Warning: using CORS origin '*' in production is not recommended.");
        }

        Ok(())
    }

    pub fn health_cache_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.health_cache_ttl_ms)
    }

    pub fn stats_cache_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.stats_cache_ttl_ms)
    }

    pub fn routing_cache_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.routing_cache_ttl_ms)
    }

    pub fn pool_max_lifetime(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.pool_max_lifetime_secs)
    }

    pub fn pool_idle_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.pool_idle_timeout_secs)
    }

    pub fn pool_cleanup_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.pool_cleanup_interval_secs)
    }

    pub fn pool_request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.pool_request_timeout_secs)
    }

    pub fn batch_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.batch_timeout_ms)
    }

    pub fn flush_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.flush_interval_ms)
    }

    pub fn health_check_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.health_check_interval_secs)
    }

    /// Upper bound on how long one `ServerPool::health_check` tick waits on
    /// the health batcher for a single backend: the batcher may hold a
    /// waiter up to `batch_timeout` before its per-key flush fires, the
    /// flush itself probes up to `pool_request_timeout`, and the extra
    /// `flush_interval` covers the periodic-flush tick landing just after
    /// the per-key timeout expires.
    pub fn health_submit_deadline(&self) -> std::time::Duration {
        self.pool_request_timeout() + self.batch_timeout() + self.flush_interval()
    }

    /// Upper bound on how long a `/stats` request waits on the stats
    /// batcher. No network probe is involved, just the coalescing wait, so
    /// this is narrower than `health_submit_deadline`.
    pub fn stats_submit_deadline(&self) -> std::time::Duration {
        self.batch_timeout() + self.flush_interval()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let config = Config::for_test();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_port_fails_validation() {
        let mut config = Config::for_test();
        config.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_host_fails_validation() {
        let mut config = Config::for_test();
        config.host = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_batch_size_fails_validation() {
        let mut config = Config::for_test();
        config.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_environment_fails_validation() {
        let mut config = Config::for_test();
        config.environment = "nonsense".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn duration_helpers_match_raw_fields() {
        let config = Config::for_test();
        assert_eq!(config.health_cache_ttl().as_millis() as u64, config.health_cache_ttl_ms);
        assert_eq!(config.pool_request_timeout().as_secs(), config.pool_request_timeout_secs);
    }
}
