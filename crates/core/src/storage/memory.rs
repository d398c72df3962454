use crate::domain::{Quote, Symbol};
use crate::storage::{plan_merge, MergeReport, QuoteStore};
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

type Series = Arc<RwLock<BTreeMap<NaiveDate, Quote>>>;

/// Process-local quote store. Each symbol owns its own lock, so merges on different
/// symbols never contend and a reader sees a batch either fully applied or not at all.
#[derive(Debug, Default)]
pub struct MemoryQuoteStore {
    series: RwLock<HashMap<Symbol, Series>>,
}

impl MemoryQuoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn existing(&self, symbol: &Symbol) -> Option<Series> {
        self.series.read().await.get(symbol).cloned()
    }

    async fn get_or_create(&self, symbol: &Symbol) -> Series {
        if let Some(series) = self.existing(symbol).await {
            return series;
        }
        let mut map = self.series.write().await;
        map.entry(symbol.clone()).or_default().clone()
    }
}

#[async_trait::async_trait]
impl QuoteStore for MemoryQuoteStore {
    async fn merge(&self, symbol: &Symbol, quotes: &[Quote]) -> anyhow::Result<MergeReport> {
        let series = self.get_or_create(symbol).await;
        let mut series = series.write().await;

        let plan = plan_merge(symbol, &series, quotes);
        for quote in plan.inserts {
            series.insert(quote.date, quote);
        }

        tracing::debug!(
            %symbol,
            inserted = plan.report.inserted.len(),
            unchanged = plan.report.unchanged.len(),
            conflicts = plan.report.conflicts.len(),
            "memory quote merge"
        );
        Ok(plan.report)
    }

    async fn latest(&self, symbol: &Symbol) -> anyhow::Result<Option<Quote>> {
        let Some(series) = self.existing(symbol).await else {
            return Ok(None);
        };
        let series = series.read().await;
        Ok(series.values().next_back().cloned())
    }

    async fn window(
        &self,
        symbol: &Symbol,
        from: NaiveDate,
        to: NaiveDate,
    ) -> anyhow::Result<Vec<Quote>> {
        if from > to {
            return Ok(Vec::new());
        }
        let Some(series) = self.existing(symbol).await else {
            return Ok(Vec::new());
        };
        let series = series.read().await;
        Ok(series.range(from..=to).map(|(_, q)| q.clone()).collect())
    }

    async fn at_or_before(
        &self,
        symbol: &Symbol,
        date: NaiveDate,
    ) -> anyhow::Result<Option<Quote>> {
        let Some(series) = self.existing(symbol).await else {
            return Ok(None);
        };
        let series = series.read().await;
        Ok(series.range(..=date).next_back().map(|(_, q)| q.clone()))
    }
}
