use crate::domain::{Quote, Symbol};
use crate::error::ProviderError;
use crate::ingest::provider::QuoteProvider;
use crate::storage::{MergeReport, QuoteStore};
use anyhow::Context;
use chrono::{Duration, NaiveDate};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;

pub const DEFAULT_LOOKBACK_DAYS: u32 = 7;
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Shared stop switch for a running sweep. Checked before each symbol is started.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedQuote {
    pub date: NaiveDate,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SymbolOutcome {
    UpToDate {
        latest: NaiveDate,
    },
    Merged {
        from: NaiveDate,
        to: NaiveDate,
        report: MergeReport,
        rejected: Vec<RejectedQuote>,
    },
    ProviderFailed {
        error: ProviderError,
    },
    StoreFailed {
        detail: String,
    },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolResult {
    pub symbol: Symbol,
    pub outcome: SymbolOutcome,
}

/// Per-symbol summary of one `update_quotes` run, in the order symbols were given.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepReport {
    pub as_of: NaiveDate,
    pub results: Vec<SymbolResult>,
}

impl SweepReport {
    pub fn inserted(&self) -> usize {
        self.results
            .iter()
            .map(|r| match &r.outcome {
                SymbolOutcome::Merged { report, .. } => report.inserted.len(),
                _ => 0,
            })
            .sum()
    }

    pub fn conflicts(&self) -> usize {
        self.results
            .iter()
            .map(|r| match &r.outcome {
                SymbolOutcome::Merged { report, .. } => report.conflicts.len(),
                _ => 0,
            })
            .sum()
    }

    pub fn failed(&self) -> Vec<&SymbolResult> {
        self.results
            .iter()
            .filter(|r| {
                matches!(
                    r.outcome,
                    SymbolOutcome::ProviderFailed { .. } | SymbolOutcome::StoreFailed { .. }
                )
            })
            .collect()
    }

    pub fn cancelled(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.outcome == SymbolOutcome::Cancelled)
            .count()
    }

    pub fn outcome(&self, symbol: &Symbol) -> Option<&SymbolOutcome> {
        self.results
            .iter()
            .find(|r| &r.symbol == symbol)
            .map(|r| &r.outcome)
    }
}

/// Pulls missing days from a [`QuoteProvider`] into a [`QuoteStore`], several symbols at a time.
#[derive(Clone)]
pub struct QuoteSweep {
    store: Arc<dyn QuoteStore>,
    provider: Arc<dyn QuoteProvider>,
    lookback_days: u32,
    concurrency: usize,
}

impl QuoteSweep {
    pub fn new(store: Arc<dyn QuoteStore>, provider: Arc<dyn QuoteProvider>) -> Self {
        Self {
            store,
            provider,
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Days fetched before `as_of` for a symbol with no stored quotes.
    pub fn with_lookback_days(mut self, days: u32) -> Self {
        self.lookback_days = days;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub async fn run(
        &self,
        symbols: Vec<Symbol>,
        as_of: NaiveDate,
        cancel: &CancelFlag,
    ) -> anyhow::Result<SweepReport> {
        let mut outcomes: Vec<Option<SymbolOutcome>> = vec![None; symbols.len()];
        let mut pending = symbols.iter().cloned().enumerate();
        let mut in_flight: JoinSet<(usize, SymbolOutcome)> = JoinSet::new();

        tracing::info!(
            %as_of,
            symbols = symbols.len(),
            provider = self.provider.provider_name(),
            concurrency = self.concurrency,
            "quote sweep started"
        );

        loop {
            while in_flight.len() < self.concurrency && !cancel.is_cancelled() {
                let Some((idx, symbol)) = pending.next() else {
                    break;
                };
                let store = self.store.clone();
                let provider = self.provider.clone();
                let lookback_days = self.lookback_days;
                in_flight.spawn(async move {
                    let outcome =
                        ingest_symbol(store.as_ref(), provider.as_ref(), &symbol, as_of, lookback_days)
                            .await;
                    (idx, outcome)
                });
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };
            let (idx, outcome) = joined.context("quote ingest task panicked")?;
            outcomes[idx] = Some(outcome);
        }

        let results: Vec<SymbolResult> = symbols
            .into_iter()
            .zip(outcomes)
            .map(|(symbol, outcome)| SymbolResult {
                symbol,
                outcome: outcome.unwrap_or(SymbolOutcome::Cancelled),
            })
            .collect();

        let report = SweepReport { as_of, results };
        tracing::info!(
            %as_of,
            inserted = report.inserted(),
            conflicts = report.conflicts(),
            failed = report.failed().len(),
            cancelled = report.cancelled(),
            "quote sweep finished"
        );
        Ok(report)
    }
}

async fn ingest_symbol(
    store: &dyn QuoteStore,
    provider: &dyn QuoteProvider,
    symbol: &Symbol,
    as_of: NaiveDate,
    lookback_days: u32,
) -> SymbolOutcome {
    let latest = match store.latest(symbol).await {
        Ok(latest) => latest,
        Err(err) => {
            tracing::error!(%symbol, error = %err, "failed to read latest quote");
            return SymbolOutcome::StoreFailed {
                detail: format!("{err:#}"),
            };
        }
    };

    let from = match &latest {
        Some(q) if q.date >= as_of => return SymbolOutcome::UpToDate { latest: q.date },
        Some(q) => q.date + Duration::days(1),
        None => as_of - Duration::days(i64::from(lookback_days)),
    };

    let raw = match provider.fetch(symbol, from, as_of).await {
        Ok(raw) => raw,
        Err(error) => {
            tracing::error!(%symbol, %from, to = %as_of, error = %error, "quote provider failed");
            return SymbolOutcome::ProviderFailed { error };
        }
    };

    let mut quotes: Vec<Quote> = Vec::with_capacity(raw.len());
    let mut rejected = Vec::new();
    for item in raw {
        let date = item.date;
        if date < from || date > as_of {
            rejected.push(RejectedQuote {
                date,
                reason: format!("outside requested range {from}..={as_of}"),
            });
            continue;
        }
        match item.into_quote() {
            Ok(q) => quotes.push(q),
            Err(err) => rejected.push(RejectedQuote {
                date,
                reason: err.to_string(),
            }),
        }
    }

    let report = match store.merge(symbol, &quotes).await {
        Ok(report) => report,
        Err(err) => {
            tracing::error!(%symbol, error = %err, "quote merge failed");
            return SymbolOutcome::StoreFailed {
                detail: format!("{err:#}"),
            };
        }
    };

    for conflict in &report.conflicts {
        tracing::warn!(%symbol, date = %conflict.date, error = %conflict, "rejected conflicting quote");
    }
    if !rejected.is_empty() {
        tracing::warn!(%symbol, rejected = rejected.len(), "provider returned unusable records");
    }
    tracing::info!(
        %symbol,
        %from,
        to = %as_of,
        inserted = report.inserted.len(),
        unchanged = report.unchanged.len(),
        "merged quotes"
    );

    SymbolOutcome::Merged {
        from,
        to: as_of,
        report,
        rejected,
    }
}
