use crate::catalog::{StockCatalog, DEFAULT_HISTORY_WINDOW_DAYS};
use crate::config::Settings;
use crate::domain::{Quote, Recommendation, Stock, Symbol};
use crate::engine::{RecommendationEngine, ThresholdMode};
use crate::ingest::sweep::{DEFAULT_CONCURRENCY, DEFAULT_LOOKBACK_DAYS};
use crate::ingest::{CancelFlag, QuoteProvider, QuoteSweep, SweepReport};
use crate::storage::QuoteStore;
use crate::triggers::TriggerRegistry;
use crate::users::UserDirectory;
use anyhow::Context;
use chrono::NaiveDate;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceOptions {
    pub lookback_days: u32,
    pub concurrency: usize,
    pub history_days: u32,
    pub threshold_mode: ThresholdMode,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            concurrency: DEFAULT_CONCURRENCY,
            history_days: DEFAULT_HISTORY_WINDOW_DAYS,
            threshold_mode: ThresholdMode::default(),
        }
    }
}

impl ServiceOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            lookback_days: settings.ingest_lookback_days,
            concurrency: settings.ingest_concurrency,
            history_days: settings.history_window_days,
            threshold_mode: settings.threshold_mode,
        }
    }
}

/// Entry point for schedulers and read APIs: ingestion, stock listings and recommendations.
pub struct StockService {
    store: Arc<dyn QuoteStore>,
    registry: TriggerRegistry,
    catalog: StockCatalog,
    engine: RecommendationEngine,
    options: ServiceOptions,
    sweep: Option<QuoteSweep>,
}

impl StockService {
    pub fn new(
        store: Arc<dyn QuoteStore>,
        users: Arc<dyn UserDirectory>,
        options: ServiceOptions,
    ) -> Self {
        let registry = TriggerRegistry::new(users);
        let catalog = StockCatalog::with_history_days(store.clone(), options.history_days);
        let engine =
            RecommendationEngine::new(store.clone(), registry.clone(), options.threshold_mode);

        Self {
            store,
            registry,
            catalog,
            engine,
            options,
            sweep: None,
        }
    }

    /// Enables [`StockService::update_quotes`]. Read-only deployments can skip this.
    pub fn with_provider(mut self, provider: Arc<dyn QuoteProvider>) -> Self {
        self.sweep = Some(
            QuoteSweep::new(self.store.clone(), provider)
                .with_lookback_days(self.options.lookback_days)
                .with_concurrency(self.options.concurrency),
        );
        self
    }

    pub fn catalog(&self) -> &StockCatalog {
        &self.catalog
    }

    /// Registers every symbol that currently has a trigger. Returns how many were new.
    pub async fn sync_catalog(&self) -> anyhow::Result<usize> {
        let mut added = 0;
        for symbol in self.registry.tracked_symbols().await? {
            if self.catalog.register(&symbol).await {
                tracing::debug!(%symbol, "registered symbol");
                added += 1;
            }
        }
        Ok(added)
    }

    pub async fn update_quotes(
        &self,
        as_of: NaiveDate,
        cancel: &CancelFlag,
    ) -> anyhow::Result<SweepReport> {
        let sweep = self
            .sweep
            .as_ref()
            .context("no quote provider configured for this service")?;

        self.sync_catalog().await?;
        let symbols = self.catalog.symbols().await;
        sweep.run(symbols, as_of, cancel).await
    }

    pub async fn list_stocks(&self) -> anyhow::Result<Vec<Stock>> {
        self.sync_catalog().await?;
        self.catalog.list_stocks().await
    }

    pub async fn list_historical_stocks(&self, symbol: &Symbol) -> anyhow::Result<Vec<Quote>> {
        self.sync_catalog().await?;
        self.catalog.list_historical_stocks(symbol).await
    }

    pub async fn get_change_recommendations(
        &self,
        since: NaiveDate,
    ) -> anyhow::Result<Vec<Recommendation>> {
        self.engine.get_change_recommendations(since).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Action, Trigger, User};
    use crate::error::UnknownSymbolError;
    use crate::ingest::fixture::StaticQuoteProvider;
    use crate::ingest::types::RawQuote;
    use crate::ingest::SymbolOutcome;
    use crate::storage::memory::MemoryQuoteStore;
    use crate::users::MemoryUserDirectory;
    use std::collections::HashMap;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2014, 10, day).unwrap()
    }

    fn symbol(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    fn raw(day: u32, open: f64, high: f64, low: f64, close: f64, volume: f64) -> RawQuote {
        RawQuote {
            date: d(day),
            open,
            high,
            low,
            close,
            volume,
            adjusted_close: Some(close),
        }
    }

    // Trading days of October 2014; the 18th/19th and 25th/26th are weekends.
    fn market() -> StaticQuoteProvider {
        let is3n = vec![
            raw(13, 18.95, 19.10, 18.80, 18.86, 8200.0),
            raw(14, 18.80, 18.85, 18.40, 18.52, 12600.0),
            raw(15, 18.45, 18.50, 17.95, 18.10, 21300.0),
            raw(16, 18.00, 18.42, 17.90, 18.35, 15400.0),
            raw(17, 18.600, 18.920, 18.480, 18.920, 6100.0),
            raw(20, 18.90, 18.95, 18.70, 18.81, 5200.0),
            raw(21, 18.85, 19.02, 18.80, 19.00, 7400.0),
            raw(22, 19.05, 19.12, 18.93, 18.98, 9100.0),
            raw(23, 18.95, 19.05, 18.85, 18.92, 11800.0),
            raw(24, 18.91, 19.08, 18.87, 19.07, 29400.0),
            raw(27, 19.00, 19.03, 18.76, 18.84, 10300.0),
            raw(28, 18.90, 19.20, 18.88, 19.15, 8700.0),
        ];
        let dxet = vec![
            raw(16, 28.10, 28.64, 27.95, 28.51, 41000.0),
            raw(17, 28.70, 29.40, 28.62, 29.32, 52300.0),
            raw(20, 29.20, 29.35, 28.90, 29.05, 33900.0),
            raw(21, 29.15, 29.80, 29.10, 29.76, 38100.0),
            raw(22, 29.80, 29.95, 29.41, 29.52, 30200.0),
            raw(23, 29.60, 30.12, 29.55, 30.04, 45500.0),
            raw(24, 30.00, 30.18, 29.71, 29.98, 27800.0),
            raw(27, 29.85, 29.90, 29.30, 29.47, 36400.0),
            raw(28, 29.60, 30.05, 29.58, 30.01, 31000.0),
        ];

        StaticQuoteProvider::new(HashMap::from([
            (symbol("IS3N.DE"), is3n),
            (symbol("DXET.DE"), dxet),
        ]))
    }

    fn foo() -> User {
        User::new(
            "foo@bar",
            "FOO",
            vec![
                Trigger::new("DB X-TR.EO STOXX 50 ETF DR 1C", symbol("DXET.DE"), 100.0, 300.0)
                    .unwrap(),
                Trigger::new("ISHS-CO.MSCI EM.MAR.IMI UC.ETF", symbol("IS3N.DE"), 100.0, 300.0)
                    .unwrap(),
            ],
        )
        .unwrap()
    }

    fn service(store: Arc<MemoryQuoteStore>) -> StockService {
        let users = Arc::new(MemoryUserDirectory::new(vec![foo()]));
        StockService::new(store, users, ServiceOptions::default()).with_provider(Arc::new(market()))
    }

    #[tokio::test]
    async fn fetches_both_stocks_and_a_bounded_history() {
        let store = Arc::new(MemoryQuoteStore::new());
        let svc = service(store.clone());

        let report = svc.update_quotes(d(24), &CancelFlag::new()).await.unwrap();
        assert!(report.failed().is_empty());

        let stocks = svc.list_stocks().await.unwrap();
        assert_eq!(stocks.len(), 2);
        assert_eq!(stocks[0].symbol, symbol("DXET.DE"));
        assert!(stocks.iter().all(|s| s.quotes.len() == 1));

        // The first sweep reaches back to the 17th: six trading days.
        let stored = store.window(&symbol("IS3N.DE"), d(1), d(31)).await.unwrap();
        assert_eq!(stored.len(), 6);
        assert_eq!(
            stored.first().unwrap(),
            &Quote::new(d(17), 18.600, 18.920, 18.480, 18.920, 6100.0, 18.920).unwrap()
        );
        assert_eq!(
            stored.last().unwrap(),
            &Quote::new(d(24), 18.91, 19.08, 18.87, 19.07, 29400.0, 19.07).unwrap()
        );

        // History is the trailing seven calendar days: 18th..=24th, weekend unpadded.
        let history = svc.list_historical_stocks(&symbol("IS3N.DE")).await.unwrap();
        let dates: Vec<NaiveDate> = history.iter().map(|q| q.date).collect();
        assert_eq!(dates, vec![d(20), d(21), d(22), d(23), d(24)]);
        assert_eq!(history.last().unwrap().close, 19.07);
    }

    #[tokio::test]
    async fn update_grows_history_without_duplicates() {
        let store = Arc::new(MemoryQuoteStore::new());
        let svc = service(store.clone());

        svc.update_quotes(d(24), &CancelFlag::new()).await.unwrap();
        let report = svc.update_quotes(d(28), &CancelFlag::new()).await.unwrap();

        match report.outcome(&symbol("IS3N.DE")).unwrap() {
            SymbolOutcome::Merged { from, report, .. } => {
                assert_eq!(*from, d(25));
                assert_eq!(report.inserted, vec![d(27), d(28)]);
            }
            other => panic!("unexpected outcome {other:?}"),
        }

        assert_eq!(svc.list_stocks().await.unwrap().len(), 2);

        let stored = store.window(&symbol("IS3N.DE"), d(1), d(31)).await.unwrap();
        assert_eq!(stored.len(), 8);
        assert!(stored.windows(2).all(|w| w[0].date < w[1].date));

        let history = svc.list_historical_stocks(&symbol("IS3N.DE")).await.unwrap();
        assert!(history.len() <= 7);
        assert_eq!(history.first().unwrap().date, d(22));
        assert_eq!(history.last().unwrap().date, d(28));

        // Re-running an already covered date is a no-op.
        let again = svc.update_quotes(d(28), &CancelFlag::new()).await.unwrap();
        assert_eq!(again.inserted(), 0);
        assert_eq!(store.window(&symbol("IS3N.DE"), d(1), d(31)).await.unwrap().len(), 8);
    }

    fn dates(quotes: &[Quote]) -> Vec<NaiveDate> {
        quotes.iter().map(|q| q.date).collect()
    }

    // The stored series grows 6 -> 8 across the two sweeps (17th..24th, then ..28th).
    // History reads stay inside the trailing seven-day window, so they never reach 8.
    #[tokio::test]
    async fn stored_series_grows_six_then_eight_while_history_stays_bounded() {
        let store = Arc::new(MemoryQuoteStore::new());
        let svc = service(store.clone());
        let is3n = symbol("IS3N.DE");

        svc.update_quotes(d(24), &CancelFlag::new()).await.unwrap();
        let stored = store.window(&is3n, d(1), d(31)).await.unwrap();
        let history = svc.list_historical_stocks(&is3n).await.unwrap();
        assert_eq!(dates(&stored), vec![d(17), d(20), d(21), d(22), d(23), d(24)]);
        assert_eq!(dates(&history), vec![d(20), d(21), d(22), d(23), d(24)]);

        svc.update_quotes(d(28), &CancelFlag::new()).await.unwrap();
        let stored = store.window(&is3n, d(1), d(31)).await.unwrap();
        let history = svc.list_historical_stocks(&is3n).await.unwrap();
        assert_eq!(stored.len(), 8);
        assert_eq!(&dates(&stored)[..6], &[d(17), d(20), d(21), d(22), d(23), d(24)]);
        assert_eq!(dates(&history), vec![d(22), d(23), d(24), d(27), d(28)]);
        assert!(history.iter().all(|q| q.date >= d(28) - chrono::Duration::days(6)));
    }

    #[tokio::test]
    async fn recommends_buy_below_trigger_floor() {
        let svc = service(Arc::new(MemoryQuoteStore::new()));
        svc.update_quotes(d(24), &CancelFlag::new()).await.unwrap();

        let recs = svc.get_change_recommendations(d(23)).await.unwrap();
        assert_eq!(recs.len(), 2);
        assert!(recs.iter().all(|r| r.action == Action::Buy));
        assert!(recs.iter().all(|r| r.baseline.quote.date == d(23)));

        let is3n = recs.iter().find(|r| r.symbol == symbol("IS3N.DE")).unwrap();
        assert!((is3n.delta - (19.07 - 18.92)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn unknown_symbol_history_is_reported() {
        let svc = service(Arc::new(MemoryQuoteStore::new()));
        let err = svc
            .list_historical_stocks(&symbol("NOPE.DE"))
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<UnknownSymbolError>().is_some());
    }

    #[tokio::test]
    async fn update_without_provider_fails() {
        let users = Arc::new(MemoryUserDirectory::new(vec![foo()]));
        let svc = StockService::new(
            Arc::new(MemoryQuoteStore::new()),
            users,
            ServiceOptions::default(),
        );
        assert!(svc.update_quotes(d(24), &CancelFlag::new()).await.is_err());
        assert_eq!(svc.list_stocks().await.unwrap().len(), 2);
    }
}
