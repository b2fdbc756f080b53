use crate::config::Settings;
use crate::pricing::{MarketDataProvider, ProviderError};
use anyhow::Context;
use chrono::NaiveDate;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;

const DEFAULT_BASE_URL: &str = "https://api.polygon.io";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_REQ_DELAY_MS: u64 = 250;

/// Daily aggregates from Polygon.io, one request per (symbol, day).
#[derive(Debug)]
pub struct PolygonProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    req_delay: Duration,

    // Shared by every worker task; consecutive requests are at least `req_delay` apart.
    last_request: tokio::sync::Mutex<Option<Instant>>,
}

#[derive(Debug, Deserialize)]
struct AggregatesResponse {
    status: Option<String>,
    #[serde(rename = "resultsCount")]
    results_count: Option<u64>,
    #[serde(default)]
    results: Vec<AggregateBar>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AggregateBar {
    c: f64,
}

#[derive(Debug, Deserialize)]
struct TickerLookupResponse {
    status: Option<String>,
    results: Option<Value>,
    message: Option<String>,
}

impl PolygonProvider {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let api_key = settings.require_polygon_api_key()?.to_string();
        let base_url = settings
            .market_data_base_url
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let timeout_secs = std::env::var("MARKET_DATA_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let req_delay_ms = std::env::var("MARKET_DATA_REQ_DELAY_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_REQ_DELAY_MS);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build market data http client")?;

        Ok(Self {
            http,
            base_url,
            api_key,
            req_delay: Duration::from_millis(req_delay_ms),
            last_request: tokio::sync::Mutex::new(None),
        })
    }

    fn url(&self, symbol: &str, date: NaiveDate) -> String {
        format!(
            "{}/v2/aggs/ticker/{symbol}/range/1/day/{date}/{date}",
            self.base_url.trim_end_matches('/')
        )
    }

    fn ticker_url(&self, symbol: &str) -> String {
        format!(
            "{}/v3/reference/tickers/{symbol}",
            self.base_url.trim_end_matches('/')
        )
    }

    async fn get_text(
        &self,
        url: String,
        query: &[(&str, &str)],
    ) -> Result<(StatusCode, String), ProviderError> {
        self.throttle().await;

        let res = self
            .http
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| ProviderError::Transient(format!("request failed: {e}")))?;

        let status = res.status();
        let text = res
            .text()
            .await
            .map_err(|e| ProviderError::Transient(format!("failed to read response: {e}")))?;
        Ok((status, text))
    }

    async fn throttle(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let ready_at = prev + self.req_delay;
            let now = Instant::now();
            if ready_at > now {
                tokio::time::sleep(ready_at - now).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[async_trait::async_trait]
impl MarketDataProvider for PolygonProvider {
    fn provider_name(&self) -> &'static str {
        "polygon"
    }

    async fn daily_close(
        &self,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<Option<f64>, ProviderError> {
        let (status, text) = self
            .get_text(
                self.url(symbol, date),
                &[("adjusted", "true"), ("apiKey", self.api_key.as_str())],
            )
            .await?;

        classify_status(status, symbol, &text)?;

        let raw_json = serde_json::from_str::<Value>(&text)
            .map_err(|e| ProviderError::Transient(format!("response is not valid JSON: {e}")))?;
        parse_daily_close(raw_json)
    }

    async fn is_listed(&self, symbol: &str) -> Result<bool, ProviderError> {
        let (status, text) = self
            .get_text(self.ticker_url(symbol), &[("apiKey", self.api_key.as_str())])
            .await?;
        parse_ticker_lookup(status, &text)
    }
}

fn classify_status(status: StatusCode, symbol: &str, body: &str) -> Result<(), ProviderError> {
    if status.is_success() {
        return Ok(());
    }
    match status {
        StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST => Err(ProviderError::InvalidSymbol(
            format!("{symbol}: HTTP {status}: {body}"),
        )),
        _ => Err(ProviderError::Transient(format!("HTTP {status}: {body}"))),
    }
}

fn parse_daily_close(raw_json: Value) -> Result<Option<f64>, ProviderError> {
    let parsed = serde_json::from_value::<AggregatesResponse>(raw_json)
        .map_err(|e| ProviderError::Transient(format!("unexpected aggregates shape: {e}")))?;

    match parsed.status.as_deref() {
        Some("OK") | Some("DELAYED") | None => {}
        Some("NOT_FOUND") => {
            return Err(ProviderError::InvalidSymbol(
                parsed.error.unwrap_or_else(|| "not found".to_string()),
            ))
        }
        Some(other) => {
            return Err(ProviderError::Transient(format!(
                "provider status {other}: {}",
                parsed.error.unwrap_or_default()
            )))
        }
    }

    if parsed.results_count == Some(0) {
        return Ok(None);
    }
    Ok(parsed.results.first().map(|bar| bar.c))
}

fn parse_ticker_lookup(status: StatusCode, body: &str) -> Result<bool, ProviderError> {
    if status == StatusCode::NOT_FOUND {
        return Ok(false);
    }
    if !status.is_success() {
        return Err(ProviderError::Transient(format!("HTTP {status}: {body}")));
    }

    let parsed = serde_json::from_str::<TickerLookupResponse>(body)
        .map_err(|e| ProviderError::Transient(format!("unexpected ticker lookup shape: {e}")))?;

    match parsed.status.as_deref() {
        Some("NOT_FOUND") => Ok(false),
        Some("OK") | None => Ok(parsed.results.is_some_and(|r| !r.is_null())),
        Some(other) => Err(ProviderError::Transient(format!(
            "provider status {other}: {}",
            parsed.message.unwrap_or_default()
        ))),
    }
}
