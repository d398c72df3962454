use crate::domain::{Quote, Symbol};
use crate::error::ValidationError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// OHLCV record as delivered by a quote provider, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawQuote {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// Providers without corporate-action data omit this; `close` is used instead.
    #[serde(default)]
    pub adjusted_close: Option<f64>,
}

impl RawQuote {
    pub fn into_quote(self) -> Result<Quote, ValidationError> {
        Quote::new(
            self.date,
            self.open,
            self.high,
            self.low,
            self.close,
            self.volume,
            self.adjusted_close.unwrap_or(self.close),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyQuotesResponse {
    pub symbol: Symbol,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub items: Vec<RawQuote>,
}
