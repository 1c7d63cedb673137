use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Result of a conversion, handed to callers as plain data. `stale` is
/// set when the provider could not be reached and the last cached rate
/// was used past its freshness window.
#[derive(Debug, Clone, Serialize)]
pub struct Conversion {
    pub amount: f64,
    pub rate: f64,
    pub stale: bool,
}

#[derive(Debug, Clone)]
struct RateEntry {
    rate: f64,
    fetched_at: SystemTime,
}

#[derive(Debug)]
pub enum ProviderError {
    Http(reqwest::Error),
    Api {
        status: reqwest::StatusCode,
        body: String,
    },
    MissingRate {
        quote: String,
    },
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Http(err) => write!(f, "HTTP error: {}", err),
            ProviderError::Api { status, body } => write!(f, "API error {}: {}", status, body),
            ProviderError::MissingRate { quote } => {
                write!(f, "provider response carries no rate for {}", quote)
            }
        }
    }
}

/// No rate has ever been cached for the pair and the provider could not
/// supply one; the specific conversion cannot proceed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateUnavailable {
    pub base: String,
    pub quote: String,
}

impl fmt::Display for RateUnavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no exchange rate available for {}/{}", self.base, self.quote)
    }
}

#[async_trait]
pub trait RateProvider: Send + Sync {
    async fn fetch_rate(&self, base: &str, quote: &str) -> Result<f64, ProviderError>;
}

/// Exchange-rate cache with lazy refresh. One entry per currency pair;
/// entries are replaced whole under the write lock, so readers never see
/// a partially written rate. Concurrent refreshes of the same pair are
/// last-writer-wins over idempotent data.
pub struct RateCache {
    entries: RwLock<HashMap<(String, String), RateEntry>>,
    provider: Box<dyn RateProvider>,
    ttl: Duration,
}

impl RateCache {
    pub fn new(provider: Box<dyn RateProvider>, ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            provider,
            ttl,
        }
    }

    /// Convert `amount` from one currency to another. Uses the cached
    /// rate while fresh; on expiry or miss refreshes from the provider;
    /// on refresh failure falls back to the stale cached rate if one
    /// exists, else fails with `RateUnavailable`.
    pub async fn convert(
        &self,
        amount: f64,
        from: &str,
        to: &str,
    ) -> Result<Conversion, RateUnavailable> {
        let base = from.trim().to_uppercase();
        let quote = to.trim().to_uppercase();

        // Same-currency round trips must be lossless
        if base == quote {
            return Ok(Conversion {
                amount,
                rate: 1.0,
                stale: false,
            });
        }

        let key = (base.clone(), quote.clone());
        let cached = self.entries.read().await.get(&key).cloned();

        if let Some(entry) = &cached {
            let fresh = match entry.fetched_at.elapsed() {
                Ok(elapsed) => elapsed < self.ttl,
                // Clock went backwards; treat the entry as fresh
                Err(_) => true,
            };
            if fresh {
                return Ok(Conversion {
                    amount: amount * entry.rate,
                    rate: entry.rate,
                    stale: false,
                });
            }
        }

        match self.provider.fetch_rate(&base, &quote).await {
            Ok(rate) => {
                debug!(base = %base, quote = %quote, rate, "rate refreshed");
                let mut entries = self.entries.write().await;
                entries.insert(
                    key,
                    RateEntry {
                        rate,
                        fetched_at: SystemTime::now(),
                    },
                );
                Ok(Conversion {
                    amount: amount * rate,
                    rate,
                    stale: false,
                })
            }
            Err(err) => {
                warn!(base = %base, quote = %quote, error = %err, "rate refresh failed");
                match cached {
                    Some(entry) => Ok(Conversion {
                        amount: amount * entry.rate,
                        rate: entry.rate,
                        stale: true,
                    }),
                    None => Err(RateUnavailable { base, quote }),
                }
            }
        }
    }
}

/// exchangerate-api.com v6 client.
pub struct HttpRateProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct RatesResponse {
    conversion_rates: HashMap<String, f64>,
}

impl HttpRateProvider {
    pub fn new(api_key: String, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: "https://v6.exchangerate-api.com/v6".to_string(),
            api_key,
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl RateProvider for HttpRateProvider {
    async fn fetch_rate(&self, base: &str, quote: &str) -> Result<f64, ProviderError> {
        let url = format!("{}/{}/latest/{}", self.base_url, self.api_key, base);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(ProviderError::Http)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status, body });
        }

        let rates: RatesResponse = response.json().await.map_err(ProviderError::Http)?;

        rates
            .conversion_rates
            .get(quote)
            .copied()
            .ok_or(ProviderError::MissingRate {
                quote: quote.to_string(),
            })
    }
}
