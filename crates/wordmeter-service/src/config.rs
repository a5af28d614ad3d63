//! Service configuration.

use std::path::Path;

use serde::Deserialize;

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// Path to `RocksDB` data directory (default: "/data/wordmeter").
    pub data_dir: String,

    /// HS256 secret for user JWTs. User routes reject every token when unset.
    pub jwt_secret: Option<String>,

    /// Expected JWT issuer (default: "wordmeter-auth").
    pub auth_issuer: String,

    /// Expected JWT audience (default: "wordmeter").
    pub auth_audience: String,

    /// Service API key for service-to-service auth.
    pub service_api_key: Option<String>,

    /// Admin API key for privileged endpoints.
    pub admin_api_key: Option<String>,

    /// Shared secret the payment gateway signs settlements with.
    pub webhook_secret: Option<String>,

    /// ISO currency for prices and receipts (default: "USD").
    pub currency: String,

    /// Billing cycle length in days (default: 30).
    pub cycle_days: i64,

    /// Seconds between renewal sweeps; 0 disables the scheduler.
    pub renewal_interval_seconds: u64,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,
}

/// Gateway secrets file structure.
#[derive(Debug, Deserialize)]
struct GatewaySecrets {
    webhook_secret: String,
    #[serde(default)]
    jwt_secret: Option<String>,
}

impl ServiceConfig {
    /// Load configuration from environment variables and secrets files.
    #[must_use]
    pub fn from_env() -> Self {
        let (webhook_secret, jwt_secret) = load_gateway_secrets();
        let defaults = Self::default();

        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            data_dir: std::env::var("DATA_DIR").unwrap_or(defaults.data_dir),
            jwt_secret,
            auth_issuer: std::env::var("AUTH_ISSUER").unwrap_or(defaults.auth_issuer),
            auth_audience: std::env::var("AUTH_AUDIENCE").unwrap_or(defaults.auth_audience),
            service_api_key: std::env::var("SERVICE_API_KEY").ok(),
            admin_api_key: std::env::var("ADMIN_API_KEY").ok(),
            webhook_secret,
            currency: std::env::var("BILLING_CURRENCY").unwrap_or(defaults.currency),
            cycle_days: env_parse("BILLING_CYCLE_DAYS").unwrap_or(defaults.cycle_days),
            renewal_interval_seconds: env_parse("RENEWAL_INTERVAL_SECONDS")
                .unwrap_or(defaults.renewal_interval_seconds),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: env_parse("MAX_BODY_BYTES").unwrap_or(defaults.max_body_bytes),
            request_timeout_seconds: env_parse("REQUEST_TIMEOUT_SECONDS")
                .unwrap_or(defaults.request_timeout_seconds),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

/// Load gateway secrets from file or environment.
fn load_gateway_secrets() -> (Option<String>, Option<String>) {
    let secret_paths = [
        ".secrets/gateway.json",
        "wordmeter/.secrets/gateway.json",
        "../.secrets/gateway.json",
    ];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<GatewaySecrets>(path) {
            tracing::info!(path = %path, "Loaded gateway secrets from file");
            return (
                Some(secrets.webhook_secret),
                secrets.jwt_secret.or_else(|| std::env::var("JWT_SECRET").ok()),
            );
        }
    }

    tracing::debug!("Gateway secrets file not found, using environment variables");
    (
        std::env::var("WEBHOOK_SECRET").ok(),
        std::env::var("JWT_SECRET").ok(),
    )
}

/// Load secrets from a JSON file.
fn load_secrets_file<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, std::io::Error> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Secrets file not found",
        ));
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            data_dir: "/data/wordmeter".into(),
            jwt_secret: None,
            auth_issuer: "wordmeter-auth".into(),
            auth_audience: "wordmeter".into(),
            service_api_key: None,
            admin_api_key: None,
            webhook_secret: None,
            currency: "USD".into(),
            cycle_days: 30,
            renewal_interval_seconds: 300,
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
        }
    }
}
