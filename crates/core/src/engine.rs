use crate::domain::{Action, Baseline, Quote, Recommendation, Trigger};
use crate::error::ValidationError;
use crate::storage::QuoteStore;
use crate::triggers::TriggerRegistry;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

/// How a trigger's `buy` / `sell` values are read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdMode {
    /// Price levels in the unit of `close`.
    #[default]
    Absolute,
    /// Percent moves of `close` relative to the baseline: down by `buy`%, up by `sell`%.
    PercentChange,
}

impl FromStr for ThresholdMode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "absolute" | "price" => Ok(Self::Absolute),
            "percent" | "percent_change" => Ok(Self::PercentChange),
            other => Err(ValidationError::Invalid {
                field: "TRIGGER_MODE",
                reason: format!("expected absolute|percent, got {other:?}"),
            }),
        }
    }
}

/// Decides whether `trigger` fires for `current` measured against `baseline`.
pub fn evaluate(
    mode: ThresholdMode,
    trigger: &Trigger,
    current: &Quote,
    baseline: &Quote,
) -> Option<Action> {
    match mode {
        ThresholdMode::Absolute => {
            if current.close <= trigger.buy {
                Some(Action::Buy)
            } else if current.close >= trigger.sell {
                Some(Action::Sell)
            } else {
                None
            }
        }
        ThresholdMode::PercentChange => {
            if baseline.close == 0.0 {
                return None;
            }
            let pct = (current.close - baseline.close) / baseline.close * 100.0;
            if pct <= -trigger.buy {
                Some(Action::Buy)
            } else if pct >= trigger.sell {
                Some(Action::Sell)
            } else {
                None
            }
        }
    }
}

/// Turns price movement and registered triggers into recommendations. Never writes anything.
#[derive(Clone)]
pub struct RecommendationEngine {
    store: Arc<dyn QuoteStore>,
    registry: TriggerRegistry,
    mode: ThresholdMode,
}

impl RecommendationEngine {
    pub fn new(store: Arc<dyn QuoteStore>, registry: TriggerRegistry, mode: ThresholdMode) -> Self {
        Self {
            store,
            registry,
            mode,
        }
    }

    pub fn mode(&self) -> ThresholdMode {
        self.mode
    }

    /// Symbols without a current quote, or without a quote at or before `since`, are skipped.
    pub async fn get_change_recommendations(
        &self,
        since: NaiveDate,
    ) -> anyhow::Result<Vec<Recommendation>> {
        let snapshot = self.registry.snapshot().await?;
        let mut out = Vec::new();

        for symbol in &snapshot.symbols {
            let Some(current) = self.store.latest(symbol).await? else {
                tracing::debug!(%symbol, "no quotes yet; skipping");
                continue;
            };
            let Some(baseline) = self.store.at_or_before(symbol, since).await? else {
                tracing::debug!(%symbol, %since, "no baseline quote; skipping");
                continue;
            };

            for (user, trigger) in snapshot.triggers_for(symbol) {
                let Some(action) = evaluate(self.mode, trigger, &current, &baseline) else {
                    continue;
                };
                out.push(Recommendation::new(
                    symbol.clone(),
                    action,
                    &user.email,
                    &trigger.name,
                    current.clone(),
                    Baseline {
                        requested: since,
                        quote: baseline.clone(),
                    },
                ));
            }
        }

        tracing::info!(%since, count = out.len(), mode = ?self.mode, "computed recommendations");
        Ok(out)
    }
}
