// Application configuration, loaded from environment variables and CLI flags.

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Database URL (SQLite connection string).
    pub database_url: String,
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// Whether to run in local mode (no rate limiting).
    pub local_mode: bool,
    /// Shared secret for the admin routes. Admin routes are disabled when unset.
    pub admin_token: Option<String>,
    /// Interval of the background expiry sweep in seconds; 0 disables it.
    pub expiry_sweep_secs: u64,
}

impl Config {
    /// Load configuration from environment variables and CLI arguments.
    ///
    /// Environment variables:
    /// - `DATABASE_URL` - SQLite connection string (default: `sqlite:itt.db?mode=rwc`)
    /// - `PORT` - HTTP server port (default: 3000)
    /// - `ITT_LOCAL_MODE` - Set to `true` to enable local mode
    /// - `ADMIN_TOKEN` - Shared secret expected in `X-Admin-Token`
    /// - `EXPIRY_SWEEP_SECS` - Expiry sweep interval (default: 300)
    ///
    /// `JWT_SECRET` is read by the auth module when signing tokens.
    ///
    /// CLI flags:
    /// - `--local` - Enable local mode (same as `ITT_LOCAL_MODE=true`)
    /// - `--port <PORT>` - Override the port
    pub fn load() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self::from_sources(&args, |key| std::env::var(key).ok())
    }

    fn from_sources(args: &[String], env: impl Fn(&str) -> Option<String>) -> Self {
        let database_url =
            env("DATABASE_URL").unwrap_or_else(|| "sqlite:itt.db?mode=rwc".to_string());

        // Port: CLI flag --port takes precedence, then env var, then default
        let port = Self::parse_cli_value(args, "--port")
            .and_then(|v| v.parse().ok())
            .or_else(|| env("PORT").and_then(|v| v.parse().ok()))
            .unwrap_or(3000);

        let local_mode = args.iter().any(|a| a == "--local")
            || env("ITT_LOCAL_MODE")
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(false);

        let admin_token = env("ADMIN_TOKEN").filter(|t| !t.trim().is_empty());

        let expiry_sweep_secs = env("EXPIRY_SWEEP_SECS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(300);

        Config {
            database_url,
            port,
            local_mode,
            admin_token,
            expiry_sweep_secs,
        }
    }

    /// Parse a CLI flag value like `--port 8080`.
    fn parse_cli_value(args: &[String], flag: &str) -> Option<String> {
        args.windows(2).find_map(|pair| {
            if pair[0] == flag {
                Some(pair[1].clone())
            } else {
                None
            }
        })
    }
}

/// Global flag indicating local mode is active.
/// This is set once at startup and read by the rate limiter.
static LOCAL_MODE: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(false);

/// Set the local mode flag (called once at startup).
pub fn set_local_mode(enabled: bool) {
    LOCAL_MODE.store(enabled, std::sync::atomic::Ordering::Relaxed);
}

/// Check if local mode is active.
pub fn is_local_mode() -> bool {
    LOCAL_MODE.load(std::sync::atomic::Ordering::Relaxed)
}
