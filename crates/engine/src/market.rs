//! Market-data lookups for newly observed tokens.
//!
//! Lookups are enrichment only. Callers treat every error as "no data".

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tokenwatch_core::{MarketData, TokenId};
use tracing::debug;

/// Default DexScreener API base.
pub const DEFAULT_MARKET_DATA_URL: &str = "https://api.dexscreener.com";

/// Market-data lookup errors.
#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Unexpected HTTP status: {0}")]
    Status(u16),

    #[error("Rate limited by market-data service")]
    RateLimited,

    #[error("Failed to parse market data: {0}")]
    Parse(String),
}

/// External source of descriptive token attributes.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Look up a token. `Ok(None)` means the service has no data for it.
    async fn lookup(&self, token: &TokenId) -> Result<Option<MarketData>, MarketDataError>;
}

#[derive(Debug, Deserialize)]
struct TokensResponse {
    #[serde(default)]
    pairs: Option<Vec<DexPair>>,
}

#[derive(Debug, Deserialize)]
struct DexPair {
    #[serde(default)]
    url: Option<String>,
    #[serde(rename = "baseToken")]
    base_token: BaseToken,
    #[serde(rename = "priceUsd", default)]
    price_usd: Option<String>,
    #[serde(default)]
    liquidity: Option<Liquidity>,
}

#[derive(Debug, Deserialize)]
struct BaseToken {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    symbol: Option<String>,
    #[serde(rename = "totalSupply", default)]
    total_supply: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Liquidity {
    #[serde(default)]
    usd: Option<f64>,
}

/// Numbers arrive either as JSON numbers or as strings.
fn number(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Convert a `/latest/dex/tokens` reply into [`MarketData`] using its first pair.
pub fn parse_tokens_response(body: &str) -> Result<Option<MarketData>, MarketDataError> {
    let response: TokensResponse =
        serde_json::from_str(body).map_err(|e| MarketDataError::Parse(e.to_string()))?;

    let pair = match response.pairs.and_then(|pairs| pairs.into_iter().next()) {
        Some(pair) => pair,
        None => return Ok(None),
    };

    let data = MarketData {
        name: pair.base_token.name.filter(|s| !s.is_empty()),
        symbol: pair.base_token.symbol.filter(|s| !s.is_empty()),
        supply: pair.base_token.total_supply.as_ref().and_then(number),
        liquidity_usd: pair.liquidity.and_then(|l| l.usd),
        price_usd: pair.price_usd.and_then(|p| p.trim().parse().ok()),
        pair_url: pair.url,
    };

    Ok((!data.is_empty()).then_some(data))
}

/// DexScreener REST client.
pub struct DexScreenerClient {
    client: reqwest::Client,
    base_url: String,
}

impl DexScreenerClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, MarketDataError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("tokenwatch/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Lookup URL for a token: `{base}/latest/dex/tokens/{currency}.{issuer}`.
    pub fn token_url(&self, token: &TokenId) -> String {
        format!(
            "{}/latest/dex/tokens/{}.{}",
            self.base_url, token.currency, token.issuer
        )
    }
}

#[async_trait]
impl MarketDataSource for DexScreenerClient {
    async fn lookup(&self, token: &TokenId) -> Result<Option<MarketData>, MarketDataError> {
        let url = self.token_url(token);
        let response = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(MarketDataError::RateLimited);
        }
        if !status.is_success() {
            return Err(MarketDataError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        let data = parse_tokens_response(&body)?;
        debug!(token = %token, found = data.is_some(), "Market data lookup");
        Ok(data)
    }
}
