//! Polygon.io aggregates provider.
//!
//! Fetches split-adjusted daily or weekly bars from the v2 aggregates
//! endpoint. Requests are spaced by a fixed delay, retried in a bounded loop
//! with exponential backoff, and gated by a shared circuit breaker.

use super::circuit_breaker::CircuitBreaker;
use super::provider::{BarFetcher, FetchError};
use crate::domain::{Bar, Timeframe};
use chrono::NaiveDate;
use serde::Deserialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "https://api.polygon.io/v2";
pub const DEFAULT_API_KEY_ENV: &str = "POLYGON_API_KEY";

#[derive(Debug, Clone)]
pub struct PolygonConfig {
    pub base_url: String,
    pub api_key: String,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Backoff before retry `n` is `base_delay * 2^(n-1)`.
    pub base_delay: Duration,
    /// Minimum spacing between consecutive requests.
    pub request_delay: Duration,
    pub timeout: Duration,
}

impl PolygonConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            request_delay: Duration::from_millis(100),
            timeout: Duration::from_secs(30),
        }
    }

    /// Read the API key from `env_var`.
    pub fn from_env(env_var: &str) -> Result<Self, FetchError> {
        match std::env::var(env_var) {
            Ok(key) if !key.trim().is_empty() => Ok(Self::new(key.trim())),
            _ => Err(FetchError::AuthenticationRequired(format!(
                "environment variable {env_var} is not set"
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AggsResponse {
    status: Option<String>,
    results: Option<Vec<AggBar>>,
    message: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AggBar {
    t: i64,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    /// Reported as a float for some tickers.
    v: f64,
}

pub struct PolygonProvider {
    client: reqwest::blocking::Client,
    config: PolygonConfig,
    circuit_breaker: Arc<CircuitBreaker>,
    last_request: Mutex<Option<Instant>>,
}

impl PolygonProvider {
    pub fn new(config: PolygonConfig, circuit_breaker: Arc<CircuitBreaker>) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;

        Ok(Self {
            client,
            config,
            circuit_breaker,
            last_request: Mutex::new(None),
        })
    }

    /// Aggregates URL without the API key.
    fn aggregates_url(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: NaiveDate,
        end: NaiveDate,
    ) -> String {
        format!(
            "{}/aggs/ticker/{symbol}/range/1/{}/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            timeframe.timespan(),
            start.format("%Y-%m-%d"),
            end.format("%Y-%m-%d"),
        )
    }

    fn parse_response(symbol: &str, resp: AggsResponse) -> Result<Vec<Bar>, FetchError> {
        let status = resp.status.unwrap_or_default();
        match status.as_str() {
            "OK" | "DELAYED" => {}
            "NOT_AUTHORIZED" => {
                return Err(FetchError::AuthenticationRequired(
                    resp.message.unwrap_or_else(|| "not authorized".into()),
                ))
            }
            "ERROR" => {
                let detail = resp
                    .error
                    .or(resp.message)
                    .unwrap_or_else(|| "unspecified error".into());
                return Err(FetchError::Transient(format!("{symbol}: {detail}")));
            }
            other => {
                return Err(FetchError::ResponseFormatChanged(format!(
                    "unexpected status '{other}' for {symbol}"
                )))
            }
        }

        let results = resp.results.unwrap_or_default();
        if results.is_empty() {
            return Err(FetchError::NoData {
                symbol: symbol.to_string(),
            });
        }

        results
            .into_iter()
            .map(|b| {
                Bar::new(b.t, b.o, b.h, b.l, b.c, b.v.max(0.0).round() as u64).map_err(|source| {
                    FetchError::InvalidBar {
                        symbol: symbol.to_string(),
                        source,
                    }
                })
            })
            .collect()
    }

    /// Sleep until `request_delay` has passed since the previous request.
    fn throttle(&self) {
        let mut last = self
            .last_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.config.request_delay {
                std::thread::sleep(self.config.request_delay - elapsed);
            }
        }
        *last = Some(Instant::now());
    }

    fn fetch_with_retry(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, FetchError> {
        if !self.circuit_breaker.is_allowed() {
            return Err(FetchError::CircuitBreakerTripped);
        }

        let url = self.aggregates_url(symbol, timeframe, start, end);
        let query = [
            ("apikey", self.config.api_key.as_str()),
            ("adjusted", "true"),
            ("sort", "asc"),
        ];
        let mut last_error = None;
        let mut retry_after = Duration::ZERO;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = backoff(self.config.base_delay, attempt).max(retry_after);
                debug!(symbol, attempt, delay_ms = delay.as_millis() as u64, "retrying");
                std::thread::sleep(delay);
                retry_after = Duration::ZERO;
            }

            if !self.circuit_breaker.is_allowed() {
                return Err(FetchError::CircuitBreakerTripped);
            }

            self.throttle();
            match self.client.get(&url).query(&query).send() {
                Ok(resp) => {
                    let status = resp.status();

                    if status == reqwest::StatusCode::UNAUTHORIZED
                        || status == reqwest::StatusCode::FORBIDDEN
                    {
                        return Err(FetchError::AuthenticationRequired(format!(
                            "HTTP {status} for {symbol}"
                        )));
                    }

                    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        self.circuit_breaker.record_failure();
                        let secs = resp
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .unwrap_or(60);
                        warn!(symbol, retry_after_secs = secs, "rate limited");
                        retry_after = Duration::from_secs(secs);
                        last_error = Some(FetchError::RateLimited {
                            retry_after_secs: secs,
                        });
                        continue;
                    }

                    if status == reqwest::StatusCode::NOT_FOUND {
                        return Err(FetchError::NoData {
                            symbol: symbol.to_string(),
                        });
                    }

                    if status.is_server_error() {
                        self.circuit_breaker.record_failure();
                        last_error = Some(FetchError::Transient(format!(
                            "HTTP {status} for {symbol}"
                        )));
                        continue;
                    }

                    if !status.is_success() {
                        return Err(FetchError::ResponseFormatChanged(format!(
                            "HTTP {status} for {symbol}"
                        )));
                    }

                    let body: AggsResponse = resp.json().map_err(|e| {
                        FetchError::ResponseFormatChanged(format!(
                            "failed to parse response for {symbol}: {e}"
                        ))
                    })?;

                    match Self::parse_response(symbol, body) {
                        Err(e @ FetchError::Transient(_)) => {
                            self.circuit_breaker.record_failure();
                            last_error = Some(e);
                            continue;
                        }
                        other => {
                            self.circuit_breaker.record_success();
                            return other;
                        }
                    }
                }
                Err(e) => {
                    if e.is_connect() || e.is_timeout() {
                        last_error = Some(FetchError::Transient(e.to_string()));
                        continue;
                    }
                    return Err(FetchError::Transient(e.to_string()));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| FetchError::Transient("max retries exceeded".into())))
    }
}

impl BarFetcher for PolygonProvider {
    fn name(&self) -> &str {
        "polygon"
    }

    fn fetch(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, FetchError> {
        self.fetch_with_retry(symbol, timeframe, start, end)
    }

    fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }
}

/// Exponential delay before retry `attempt` (1-based), saturating instead of
/// overflowing for large attempt counts.
fn backoff(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_saturates() {
        let base = Duration::from_millis(500);
        assert_eq!(backoff(base, 1), base);
        assert_eq!(backoff(base, 3), Duration::from_secs(2));
        assert_eq!(backoff(base, 33), base.saturating_mul(u32::MAX));
        assert!(backoff(base, 200) >= backoff(base, 32));
    }

    fn parse(json: &str) -> Result<Vec<Bar>, FetchError> {
        let resp: AggsResponse = serde_json::from_str(json).unwrap();
        PolygonProvider::parse_response("AAPL", resp)
    }

    #[test]
    fn url_layout() {
        let mut config = PolygonConfig::new("secret");
        config.base_url = "https://example.test/v2/".into();
        let provider =
            PolygonProvider::new(config, Arc::new(CircuitBreaker::default_provider())).unwrap();
        let d = |day| NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
        assert_eq!(
            provider.aggregates_url("AAPL", Timeframe::Weekly, d(2), d(31)),
            "https://example.test/v2/aggs/ticker/AAPL/range/1/week/2024-01-02/2024-01-31"
        );
    }

    #[test]
    fn parses_ok_results() {
        let bars = parse(
            r#"{"status":"OK","resultsCount":2,"results":[
                {"t":1704171600000,"o":187.15,"h":188.44,"l":183.885,"c":185.64,"v":82488674.0},
                {"t":1704258000000,"o":184.22,"h":185.88,"l":183.43,"c":184.25,"v":58414460}
            ]}"#,
        )
        .unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].timestamp, 1_704_171_600_000);
        assert_eq!(bars[0].volume, 82_488_674);
        assert!((bars[1].close - 184.25).abs() < 1e-9);
    }

    #[test]
    fn delayed_status_is_accepted() {
        let bars = parse(
            r#"{"status":"DELAYED","results":[{"t":1,"o":1,"h":1,"l":1,"c":1,"v":10}]}"#,
        )
        .unwrap();
        assert_eq!(bars.len(), 1);
    }

    #[test]
    fn missing_results_is_no_data() {
        let err = parse(r#"{"status":"OK","resultsCount":0}"#).unwrap_err();
        assert!(err.is_no_data());
    }

    #[test]
    fn not_authorized_status() {
        let err = parse(r#"{"status":"NOT_AUTHORIZED","message":"upgrade your plan"}"#).unwrap_err();
        assert!(matches!(err, FetchError::AuthenticationRequired(msg) if msg.contains("upgrade")));
    }

    #[test]
    fn unknown_status_is_format_change() {
        let err = parse(r#"{"status":"WEIRD"}"#).unwrap_err();
        assert!(matches!(err, FetchError::ResponseFormatChanged(_)));
    }

    #[test]
    fn negative_price_is_invalid_bar() {
        let err = parse(r#"{"status":"OK","results":[{"t":1,"o":-1,"h":1,"l":1,"c":1,"v":1}]}"#)
            .unwrap_err();
        assert!(matches!(err, FetchError::InvalidBar { .. }));
    }

    #[test]
    fn tripped_breaker_refuses_without_network() {
        let breaker = Arc::new(CircuitBreaker::default_provider());
        breaker.trip();
        let provider = PolygonProvider::new(PolygonConfig::new("k"), breaker).unwrap();
        let d = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        assert!(!provider.is_available());
        assert!(matches!(
            provider.fetch("AAPL", Timeframe::Daily, d, d),
            Err(FetchError::CircuitBreakerTripped)
        ));
    }
}
