use crate::domain::symbol::Symbol;
use crate::error::ValidationError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One trading day of OHLCV data for a single symbol.
///
/// Built through [`Quote::new`]; every price and the volume are finite and non-negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub adjusted_close: f64,
}

impl Quote {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        date: NaiveDate,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
        adjusted_close: f64,
    ) -> Result<Self, ValidationError> {
        validate_non_negative("open", open)?;
        validate_non_negative("high", high)?;
        validate_non_negative("low", low)?;
        validate_non_negative("close", close)?;
        validate_non_negative("volume", volume)?;
        validate_non_negative("adjusted_close", adjusted_close)?;

        Ok(Self {
            date,
            open,
            high,
            low,
            close,
            volume,
            adjusted_close,
        })
    }
}

fn validate_non_negative(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ValidationError::NegativeOrNotFinite { field, value })
    }
}

/// Read projection of a symbol's quote series, ascending by date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stock {
    pub symbol: Symbol,
    pub quotes: Vec<Quote>,
}

impl Stock {
    pub fn current(&self) -> Option<&Quote> {
        self.quotes.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn rejects_negative_and_nan() {
        let err = Quote::new(d(2014, 10, 17), 1.0, 1.0, 1.0, -0.5, 10.0, 1.0).unwrap_err();
        assert_eq!(
            err,
            ValidationError::NegativeOrNotFinite {
                field: "close",
                value: -0.5
            }
        );
        assert!(Quote::new(d(2014, 10, 17), f64::NAN, 1.0, 1.0, 1.0, 1.0, 1.0).is_err());
    }

    #[test]
    fn current_is_last_quote() {
        let a = Quote::new(d(2014, 10, 17), 18.6, 18.92, 18.48, 18.92, 6100.0, 18.92).unwrap();
        let b = Quote::new(d(2014, 10, 20), 18.9, 19.0, 18.7, 18.8, 4200.0, 18.8).unwrap();
        let stock = Stock {
            symbol: Symbol::parse("IS3N.DE").unwrap(),
            quotes: vec![a, b.clone()],
        };
        assert_eq!(stock.current(), Some(&b));
    }
}
