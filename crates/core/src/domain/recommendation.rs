use crate::domain::quote::Quote;
use crate::domain::symbol::Symbol;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Buy,
    Sell,
}

/// Reference point a recommendation was measured against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    /// Date the caller asked for.
    pub requested: NaiveDate,
    /// Most recent quote at or before `requested`.
    pub quote: Quote,
}

/// A crossed trigger threshold. Derived on every query and never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub symbol: Symbol,
    pub action: Action,
    pub user_email: String,
    pub trigger_name: String,
    pub current: Quote,
    pub baseline: Baseline,
    pub delta: f64,
    pub delta_pct: Option<f64>,
}

impl Recommendation {
    pub fn new(
        symbol: Symbol,
        action: Action,
        user_email: impl Into<String>,
        trigger_name: impl Into<String>,
        current: Quote,
        baseline: Baseline,
    ) -> Self {
        let delta = current.close - baseline.quote.close;
        let delta_pct = (baseline.quote.close != 0.0).then(|| delta / baseline.quote.close * 100.0);

        Self {
            symbol,
            action,
            user_email: user_email.into(),
            trigger_name: trigger_name.into(),
            current,
            baseline,
            delta,
            delta_pct,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn quote(day: u32, close: f64) -> Quote {
        let date = NaiveDate::from_ymd_opt(2014, 10, day).unwrap();
        Quote::new(date, close, close, close, close, 100.0, close).unwrap()
    }

    #[test]
    fn computes_delta_against_baseline() {
        let baseline = Baseline {
            requested: NaiveDate::from_ymd_opt(2014, 10, 19).unwrap(),
            quote: quote(17, 20.0),
        };
        let rec = Recommendation::new(
            Symbol::parse("IS3N.DE").unwrap(),
            Action::Buy,
            "foo@bar",
            "t",
            quote(24, 19.0),
            baseline,
        );
        assert!((rec.delta - -1.0).abs() < 1e-9);
        assert!((rec.delta_pct.unwrap() - -5.0).abs() < 1e-9);
    }

    #[test]
    fn zero_baseline_has_no_pct() {
        let baseline = Baseline {
            requested: NaiveDate::from_ymd_opt(2014, 10, 17).unwrap(),
            quote: quote(17, 0.0),
        };
        let rec = Recommendation::new(
            Symbol::parse("IS3N.DE").unwrap(),
            Action::Sell,
            "foo@bar",
            "t",
            quote(24, 5.0),
            baseline,
        );
        assert_eq!(rec.delta_pct, None);

        let v = serde_json::to_value(&rec).unwrap();
        assert_eq!(v["action"], json!("SELL"));
        assert_eq!(v["symbol"], json!("IS3N.DE"));
    }
}
