use crate::domain::{Quote, Stock, Symbol};
use crate::error::UnknownSymbolError;
use crate::storage::QuoteStore;
use chrono::Duration;
use std::sync::Arc;
use tokio::sync::RwLock;

pub const DEFAULT_HISTORY_WINDOW_DAYS: u32 = 7;

/// Tracked symbols, in registration order, on top of a [`QuoteStore`].
pub struct StockCatalog {
    store: Arc<dyn QuoteStore>,
    symbols: RwLock<Vec<Symbol>>,
    history_days: u32,
}

impl StockCatalog {
    pub fn new(store: Arc<dyn QuoteStore>) -> Self {
        Self::with_history_days(store, DEFAULT_HISTORY_WINDOW_DAYS)
    }

    pub fn with_history_days(store: Arc<dyn QuoteStore>, history_days: u32) -> Self {
        Self {
            store,
            symbols: RwLock::new(Vec::new()),
            history_days: history_days.max(1),
        }
    }

    /// Returns `true` if the symbol was not tracked before.
    pub async fn register(&self, symbol: &Symbol) -> bool {
        let mut symbols = self.symbols.write().await;
        if symbols.contains(symbol) {
            return false;
        }
        symbols.push(symbol.clone());
        true
    }

    pub async fn symbols(&self) -> Vec<Symbol> {
        self.symbols.read().await.clone()
    }

    pub async fn is_registered(&self, symbol: &Symbol) -> bool {
        self.symbols.read().await.contains(symbol)
    }

    /// One [`Stock`] per tracked symbol carrying only its latest quote (or none yet).
    pub async fn list_stocks(&self) -> anyhow::Result<Vec<Stock>> {
        let symbols = self.symbols().await;
        let mut out = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            let quotes = self.store.latest(&symbol).await?.into_iter().collect();
            out.push(Stock { symbol, quotes });
        }
        Ok(out)
    }

    /// Trailing window of `history_days` calendar days ending at the latest stored date.
    ///
    /// Fails with [`UnknownSymbolError`] for a symbol that was never registered.
    pub async fn list_historical_stocks(&self, symbol: &Symbol) -> anyhow::Result<Vec<Quote>> {
        if !self.is_registered(symbol).await {
            return Err(UnknownSymbolError(symbol.clone()).into());
        }

        let Some(latest) = self.store.latest(symbol).await? else {
            return Ok(Vec::new());
        };

        let from = latest.date - Duration::days(i64::from(self.history_days) - 1);
        self.store.window(symbol, from, latest.date).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryQuoteStore;
    use chrono::NaiveDate;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2014, 10, day).unwrap()
    }

    fn quote(day: u32) -> Quote {
        let close = 18.0 + f64::from(day) / 100.0;
        Quote::new(d(day), close, close, close, close, 1000.0, close).unwrap()
    }

    fn symbol(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    #[tokio::test]
    async fn register_is_idempotent_and_ordered() {
        let catalog = StockCatalog::new(Arc::new(MemoryQuoteStore::new()));
        assert!(catalog.register(&symbol("IS3N.DE")).await);
        assert!(catalog.register(&symbol("DXET.DE")).await);
        assert!(!catalog.register(&symbol("IS3N.DE")).await);
        assert_eq!(catalog.symbols().await, vec![symbol("IS3N.DE"), symbol("DXET.DE")]);
    }

    #[tokio::test]
    async fn list_stocks_carries_only_latest_quote() {
        let store = Arc::new(MemoryQuoteStore::new());
        store
            .merge(&symbol("IS3N.DE"), &[quote(17), quote(20), quote(21)])
            .await
            .unwrap();

        let catalog = StockCatalog::new(store);
        catalog.register(&symbol("IS3N.DE")).await;
        catalog.register(&symbol("DXET.DE")).await;

        let stocks = catalog.list_stocks().await.unwrap();
        assert_eq!(stocks.len(), 2);
        assert_eq!(stocks[0].quotes, vec![quote(21)]);
        assert!(stocks[1].quotes.is_empty());
    }

    #[tokio::test]
    async fn history_is_bounded_to_trailing_week() {
        let store = Arc::new(MemoryQuoteStore::new());
        let days = [13, 14, 15, 16, 17, 20, 21, 22, 23, 24];
        let quotes: Vec<Quote> = days.iter().map(|d| quote(*d)).collect();
        store.merge(&symbol("IS3N.DE"), &quotes).await.unwrap();

        let catalog = StockCatalog::new(store);
        catalog.register(&symbol("IS3N.DE")).await;

        let history = catalog.list_historical_stocks(&symbol("IS3N.DE")).await.unwrap();
        assert!(history.len() <= 7);
        assert!(history.iter().all(|q| q.date >= d(18) && q.date <= d(24)));
        assert!(history.windows(2).all(|w| w[0].date < w[1].date));
        assert_eq!(history.first().unwrap().date, d(20));
        assert_eq!(history.last().unwrap().date, d(24));
    }

    #[tokio::test]
    async fn unknown_symbol_is_an_error_and_empty_series_is_not() {
        let catalog = StockCatalog::new(Arc::new(MemoryQuoteStore::new()));
        let err = catalog
            .list_historical_stocks(&symbol("NOPE.DE"))
            .await
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<UnknownSymbolError>(),
            Some(&UnknownSymbolError(symbol("NOPE.DE")))
        );

        catalog.register(&symbol("IS3N.DE")).await;
        assert!(catalog
            .list_historical_stocks(&symbol("IS3N.DE"))
            .await
            .unwrap()
            .is_empty());
    }
}
