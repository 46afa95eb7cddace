use crate::candle::Candle;
use crate::config::FetchConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::warn;
use rand::Rng;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Why one page of candles could not be produced.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(StatusCode),
    #[error("unexpected response shape: {0}")]
    Shape(String),
}

/// Request bounds for one page of candles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Why a backfill stopped. Anything but `ApiError` is a normal end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The target number of points was collected.
    Exhausted,
    /// The API returned no rows for the requested window.
    EmptyPage,
    /// Transport failure, bad status or malformed body; collected candles
    /// are kept and the caller decides what to do with the partial history.
    ApiError,
    /// The cursor crossed the configured time boundary.
    WindowBoundary,
}

#[derive(Debug)]
pub struct BackfillOutcome {
    pub candles: Vec<Candle>,
    pub reason: StopReason,
}

/// One paginated candle endpoint. Implementations supply the request shape,
/// the response parsing and the cursor direction; the backfill loop below is
/// shared. Windows are anchored when the source is constructed.
#[async_trait]
pub trait CandleSource: Send + Sync {
    fn token(&self) -> &str;

    fn initial_window(&self) -> Window;

    fn build_request(&self, client: &Client, window: &Window, limit: usize) -> reqwest::RequestBuilder;

    fn parse_page(&self, body: &str) -> Result<Vec<Candle>, SourceError>;

    /// Advance the cursor past the page just received. `None` means the
    /// window boundary was reached and the backfill is done.
    fn next_window(&self, window: &Window, page: &[Candle]) -> Option<Window>;

    async fn fetch_page(
        &self,
        client: &Client,
        window: &Window,
        limit: usize,
    ) -> Result<Vec<Candle>, SourceError> {
        let response = self.build_request(client, window, limit).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status(status));
        }
        let body = response.text().await?;
        self.parse_page(&body)
    }
}

/// Walks the source's windows until the history target is met, the window
/// boundary is crossed, or the API runs dry. A failed page ends the loop but
/// keeps everything collected so far.
pub async fn backfill(client: &Client, source: &dyn CandleSource, cfg: &FetchConfig) -> BackfillOutcome {
    let mut candles: Vec<Candle> = Vec::new();
    let mut remaining = cfg.history_target;
    if remaining == 0 {
        return BackfillOutcome { candles, reason: StopReason::Exhausted };
    }
    let mut window = source.initial_window();

    let reason = loop {
        let limit = cfg.page_size.min(remaining);
        let page = match source.fetch_page(client, &window, limit).await {
            Ok(page) => page,
            Err(err) => {
                warn!("[{}] page request failed: {err}", source.token());
                break StopReason::ApiError;
            }
        };
        if page.is_empty() {
            break StopReason::EmptyPage;
        }

        remaining = remaining.saturating_sub(page.len());
        let next = source.next_window(&window, &page);
        candles.extend(page);

        if remaining == 0 {
            break StopReason::Exhausted;
        }
        match next {
            Some(advanced) => window = advanced,
            None => break StopReason::WindowBoundary,
        }
        pause(cfg.page_delay).await;
    };

    BackfillOutcome { candles, reason }
}

/// Courtesy sleep between requests, uniform within the configured range.
pub async fn pause(range: (f64, f64)) {
    if range.1 <= 0.0 {
        return;
    }
    let secs = rand::rng().random_range(range.0..=range.1);
    tokio::time::sleep(Duration::from_secs_f64(secs)).await;
}

/// Exchanges deliver numeric fields as JSON numbers or as quoted strings,
/// depending on the endpoint.
pub fn lenient_f64(value: &Value) -> Result<f64, SourceError> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| SourceError::Shape(format!("non-float number: {n}"))),
        Value::String(s) => s
            .parse::<f64>()
            .map_err(|_| SourceError::Shape(format!("unparseable number: {s:?}"))),
        other => Err(SourceError::Shape(format!("expected number, got {other}"))),
    }
}

pub fn lenient_i64(value: &Value) -> Result<i64, SourceError> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| SourceError::Shape(format!("non-integer number: {n}"))),
        Value::String(s) => s
            .parse::<i64>()
            .map_err(|_| SourceError::Shape(format!("unparseable integer: {s:?}"))),
        other => Err(SourceError::Shape(format!("expected integer, got {other}"))),
    }
}
