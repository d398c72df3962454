use crate::domain::{Quote, Symbol};
use crate::error::ConflictError;
use anyhow::Context;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

pub mod lock;
pub mod memory;
pub mod quotes;

pub async fn migrate(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("sqlx migrations failed")?;
    Ok(())
}

/// Per-symbol daily quote series with at most one quote per calendar date.
///
/// `merge` calls on one symbol are serialized by the implementation and a batch becomes
/// visible to readers all at once. Errors returned here are structural (backend
/// unavailable, broken rows); per-entry conflicts are part of the [`MergeReport`].
#[async_trait::async_trait]
pub trait QuoteStore: Send + Sync {
    async fn merge(&self, symbol: &Symbol, quotes: &[Quote]) -> anyhow::Result<MergeReport>;

    async fn latest(&self, symbol: &Symbol) -> anyhow::Result<Option<Quote>>;

    /// Quotes with `from <= date <= to`, ascending. Missing trading days are not padded.
    async fn window(
        &self,
        symbol: &Symbol,
        from: NaiveDate,
        to: NaiveDate,
    ) -> anyhow::Result<Vec<Quote>>;

    async fn at_or_before(&self, symbol: &Symbol, date: NaiveDate)
        -> anyhow::Result<Option<Quote>>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeReport {
    pub symbol: Symbol,
    pub inserted: Vec<NaiveDate>,
    pub unchanged: Vec<NaiveDate>,
    pub conflicts: Vec<ConflictError>,
}

impl MergeReport {
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }
}

pub(crate) struct MergePlan {
    pub inserts: Vec<Quote>,
    pub report: MergeReport,
}

/// Splits `batch` into new quotes, identical re-deliveries and conflicts against `existing`.
///
/// Duplicated dates inside the batch are checked against the first occurrence.
pub(crate) fn plan_merge(
    symbol: &Symbol,
    existing: &BTreeMap<NaiveDate, Quote>,
    batch: &[Quote],
) -> MergePlan {
    let mut staged: BTreeMap<NaiveDate, Quote> = BTreeMap::new();
    let mut unchanged = Vec::new();
    let mut conflicts = Vec::new();

    for incoming in batch {
        let stored = existing
            .get(&incoming.date)
            .or_else(|| staged.get(&incoming.date));

        match stored {
            Some(stored) if stored == incoming => unchanged.push(incoming.date),
            Some(stored) => conflicts.push(ConflictError {
                symbol: symbol.clone(),
                date: incoming.date,
                stored: stored.clone(),
                incoming: incoming.clone(),
            }),
            None => {
                staged.insert(incoming.date, incoming.clone());
            }
        }
    }

    let inserted = staged.keys().copied().collect();
    MergePlan {
        inserts: staged.into_values().collect(),
        report: MergeReport {
            symbol: symbol.clone(),
            inserted,
            unchanged,
            conflicts,
        },
    }
}
