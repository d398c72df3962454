use crate::config::Settings;
use crate::domain::Symbol;
use crate::error::ProviderError;
use crate::ingest::types::{DailyQuotesResponse, RawQuote};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::Value;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_PATH: &str = "/v1/quotes/daily";
const DEFAULT_RETRIES: u32 = 3;
const MAX_RETRIES: u32 = 10;
const MAX_BACKOFF_SECS: u64 = 60;
const PROVIDER_NAME: &str = "external_http_json";

#[async_trait::async_trait]
pub trait QuoteProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    /// Daily records for `symbol` with `from <= date <= to`.
    async fn fetch(
        &self,
        symbol: &Symbol,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<RawQuote>, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct HttpJsonQuoteProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    path: String,
    retries: u32,
}

impl HttpJsonQuoteProvider {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let base_url = settings.require_quote_provider_base_url()?.to_string();
        let api_key = settings.quote_provider_api_key.clone();

        let timeout_secs = std::env::var("QUOTE_PROVIDER_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let retries = parse_retries(std::env::var("QUOTE_PROVIDER_RETRIES").ok().as_deref());

        let path = std::env::var("QUOTE_PROVIDER_PATH")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PATH.to_string());

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build quote provider http client")?;

        Ok(Self {
            http,
            base_url,
            api_key,
            path,
            retries,
        })
    }

    fn url(&self) -> String {
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };

        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(api_key) = &self.api_key {
            headers.insert("x-api-key", HeaderValue::from_str(api_key)?);
        }
        Ok(headers)
    }

    async fn fetch_once(
        &self,
        symbol: &Symbol,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<DailyQuotesResponse> {
        let res = self
            .http
            .get(self.url())
            .headers(self.headers()?)
            .query(&[
                ("symbol", symbol.to_string()),
                ("from", from.to_string()),
                ("to", to.to_string()),
            ])
            .send()
            .await
            .context("quote provider request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read quote provider response")?;
        let raw_json = serde_json::from_str::<Value>(&text)
            .with_context(|| format!("quote provider response is not valid JSON: {text}"))?;

        if !status.is_success() {
            anyhow::bail!("quote provider HTTP {status}: {raw_json}");
        }

        serde_json::from_value::<DailyQuotesResponse>(raw_json)
            .context("failed to parse quote provider response into DailyQuotesResponse")
    }
}

/// Checks that the provider answered the question that was asked.
pub fn validate_response(
    resp: &DailyQuotesResponse,
    symbol: &Symbol,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<()> {
    anyhow::ensure!(
        &resp.symbol == symbol,
        "provider symbol mismatch: expected {symbol}, got {}",
        resp.symbol
    );
    anyhow::ensure!(
        resp.from == from && resp.to == to,
        "provider range mismatch: expected {from}..={to}, got {}..={}",
        resp.from,
        resp.to
    );
    Ok(())
}

#[async_trait::async_trait]
impl QuoteProvider for HttpJsonQuoteProvider {
    fn provider_name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn fetch(
        &self,
        symbol: &Symbol,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<RawQuote>, ProviderError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.fetch_once(symbol, from, to).await {
                Ok(resp) => {
                    validate_response(&resp, symbol, from, to).map_err(|err| {
                        ProviderError::InvalidResponse {
                            provider: PROVIDER_NAME,
                            symbol: symbol.clone(),
                            detail: format!("{err:#}"),
                        }
                    })?;
                    return Ok(resp.items);
                }
                Err(err) => {
                    if attempt >= self.retries {
                        return Err(ProviderError::Unavailable {
                            provider: PROVIDER_NAME,
                            symbol: symbol.clone(),
                            detail: format!("{err:#}"),
                        });
                    }
                    let backoff = backoff_for(attempt);
                    tracing::warn!(%symbol, attempt, ?backoff, error = %err, "quote provider fetch failed; retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

fn parse_retries(raw: Option<&str>) -> u32 {
    raw.and_then(|s| s.trim().parse::<u32>().ok())
        .unwrap_or(DEFAULT_RETRIES)
        .clamp(1, MAX_RETRIES)
}

/// 1s, 2s, 4s, ... capped at `MAX_BACKOFF_SECS`.
fn backoff_for(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    Duration::from_secs((1u64 << exp).min(MAX_BACKOFF_SECS))
}
