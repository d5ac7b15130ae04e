use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use anyhow::{Context, Result};
use zeroize::Zeroizing;

/// Timing and limit policy consumed by the verification core.
///
/// Built once at startup and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct VerificationPolicy {
    /// The maximum lifetime of an active session.
    pub max_session_duration: Duration,
    /// Consecutive failed challenges that end a session.
    pub max_consecutive_failures: u32,
    /// How long the subject has to perform one challenge.
    pub challenge_timeout: Duration,
    /// Challenges generated per sequence.
    pub challenges_per_sequence: usize,
    /// Successful challenges required before a decision is made.
    pub required_successes: usize,
    /// How long an issued nonce is kept on record.
    pub nonce_ttl: Duration,
    /// Period of the background sweep.
    pub sweep_interval: Duration,
    /// Audit entries older than this are purged by the sweep.
    pub audit_retention: Duration,
}

impl Default for VerificationPolicy {
    fn default() -> Self {
        Self {
            max_session_duration: Duration::from_secs(120),
            max_consecutive_failures: 3,
            challenge_timeout: Duration::from_secs(10),
            challenges_per_sequence: 3,
            required_successes: 3,
            nonce_ttl: Duration::from_secs(24 * 3600),
            sweep_interval: Duration::from_secs(60),
            audit_retention: Duration::from_secs(90 * 86400),
        }
    }
}

/// The application's configuration.
#[derive(Clone)]
pub struct Config {
    /// The address the HTTP server binds to.
    pub bind_addr: SocketAddr,
    /// Prefix for the channel URL handed back to clients, e.g. `wss://api.example.com`.
    pub public_ws_base: Option<String>,
    /// Origins allowed by CORS.
    pub cors_origins: Vec<String>,
    /// The URL of the Redis server.
    pub redis_url: Option<String>,
    /// The URL of the PostgreSQL database.
    pub database_url: Option<String>,
    /// Where the PEM encoded signing key lives.
    pub private_key_path: PathBuf,
    /// Where the PEM encoded verification key lives.
    pub public_key_path: PathBuf,
    /// Base URL of the frame analyzer service.
    pub analyzer_url: Option<String>,
    /// Maximum concurrent analyzer calls.
    pub analyzer_concurrency: usize,
    /// Key guarding the audit query endpoint.
    pub audit_api_key: Option<Zeroizing<String>>,
    /// The verification policy.
    pub policy: VerificationPolicy,
}

impl Config {
    /// Creates a new `Config` from environment variables.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `Config`.
    pub fn from_env() -> Result<Self> {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port: u16 = parse_var("PORT", 8000)?;
        let bind_addr = format!("{}:{}", host, port)
            .parse()
            .context("HOST and PORT must form a valid socket address")?;

        let cors_origins = env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000".to_string())
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        let defaults = VerificationPolicy::default();
        let policy = VerificationPolicy {
            max_session_duration: Duration::from_secs(parse_var(
                "MAX_SESSION_DURATION_SECONDS",
                defaults.max_session_duration.as_secs(),
            )?),
            max_consecutive_failures: parse_var(
                "MAX_CONSECUTIVE_FAILURES",
                defaults.max_consecutive_failures,
            )?,
            challenge_timeout: Duration::from_secs(parse_var(
                "CHALLENGE_TIMEOUT_SECONDS",
                defaults.challenge_timeout.as_secs(),
            )?),
            nonce_ttl: Duration::from_secs(
                parse_var("NONCE_EXPIRY_HOURS", defaults.nonce_ttl.as_secs() / 3600)? * 3600,
            ),
            sweep_interval: Duration::from_secs(parse_var(
                "SWEEP_INTERVAL_SECONDS",
                defaults.sweep_interval.as_secs(),
            )?),
            ..defaults
        };

        if policy.max_consecutive_failures == 0 {
            anyhow::bail!("MAX_CONSECUTIVE_FAILURES must be at least 1");
        }
        if policy.sweep_interval.is_zero() {
            anyhow::bail!("SWEEP_INTERVAL_SECONDS must be at least 1");
        }

        Ok(Self {
            bind_addr,
            public_ws_base: optional_var("PUBLIC_WS_BASE"),
            cors_origins,
            redis_url: optional_var("REDIS_URL"),
            database_url: optional_var("DATABASE_URL"),
            private_key_path: env::var("JWT_PRIVATE_KEY_PATH")
                .unwrap_or_else(|_| "keys/private_key.pem".to_string())
                .into(),
            public_key_path: env::var("JWT_PUBLIC_KEY_PATH")
                .unwrap_or_else(|_| "keys/public_key.pem".to_string())
                .into(),
            analyzer_url: optional_var("ANALYZER_URL"),
            analyzer_concurrency: parse_var("ANALYZER_CONCURRENCY", 32)?,
            audit_api_key: optional_var("AUDIT_API_KEY").map(Zeroizing::new),
            policy,
        })
    }
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}", name)),
        Err(_) => Ok(default),
    }
}
