use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub anthropic_api_key: Option<String>,
    pub exchange_api_key: String,
    pub anthropic_model: String,
    pub bind_address: String,
    pub database_url: String,
    pub base_currency: String,
    pub rate_ttl: Duration,
    pub request_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        // Load .env file if present (silently ignored if missing)
        let _ = dotenvy::dotenv();

        let anthropic_api_key = env::var("ANTHROPIC_API_KEY").ok();
        let exchange_api_key = env::var("EXCHANGE_API_KEY").unwrap_or_default();
        let anthropic_model = env::var("ANTHROPIC_MODEL")
            .unwrap_or_else(|_| "claude-3-5-haiku-latest".to_string());
        let bind_address = env::var("BIND_ADDRESS").unwrap_or_else(|_| "127.0.0.1:3000".to_string());
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:data/budget.db".to_string());
        let base_currency = env::var("BASE_CURRENCY")
            .unwrap_or_else(|_| "USD".to_string())
            .to_uppercase();

        let rate_ttl = parse_secs("RATE_TTL_SECS", 3600)?;
        let request_timeout = parse_secs("REQUEST_TIMEOUT_SECS", 30)?;

        Ok(Self {
            anthropic_api_key,
            exchange_api_key,
            anthropic_model,
            bind_address,
            database_url,
            base_currency,
            rate_ttl,
            request_timeout,
        })
    }

    /// The key is only needed once a command actually reaches the model.
    pub fn require_anthropic_key(&self) -> Result<&str, String> {
        self.anthropic_api_key.as_deref().ok_or_else(|| {
            "Missing ANTHROPIC_API_KEY — set it in .env or as an environment variable".to_string()
        })
    }
}

fn parse_secs(var: &str, default: u64) -> Result<Duration, String> {
    match env::var(var) {
        Ok(value) => value
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| format!("{} must be an integer number of seconds, got '{}'", var, value)),
        Err(_) => Ok(Duration::from_secs(default)),
    }
}
