use crate::domain::Symbol;
use crate::error::ProviderError;
use crate::ingest::provider::QuoteProvider;
use crate::ingest::types::RawQuote;
use anyhow::Context;
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use std::path::Path;

const PROVIDER_NAME: &str = "static_fixture";

/// Serves quotes from memory. Backs tests and `--quotes-file` worker runs.
#[derive(Debug, Clone, Default)]
pub struct StaticQuoteProvider {
    quotes: HashMap<Symbol, Vec<RawQuote>>,
    failing: HashSet<Symbol>,
}

impl StaticQuoteProvider {
    pub fn new(quotes: HashMap<Symbol, Vec<RawQuote>>) -> Self {
        Self {
            quotes,
            failing: HashSet::new(),
        }
    }

    /// Loads a JSON object of `{"SYMBOL": [RawQuote, ...]}`.
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read quotes file {}", path.display()))?;
        let quotes: HashMap<Symbol, Vec<RawQuote>> = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse quotes file {}", path.display()))?;
        Ok(Self::new(quotes))
    }

    /// Every fetch for `symbol` fails with [`ProviderError::Unavailable`].
    pub fn fail_for(mut self, symbol: Symbol) -> Self {
        self.failing.insert(symbol);
        self
    }
}

#[async_trait::async_trait]
impl QuoteProvider for StaticQuoteProvider {
    fn provider_name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn fetch(
        &self,
        symbol: &Symbol,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<RawQuote>, ProviderError> {
        if self.failing.contains(symbol) {
            return Err(ProviderError::Unavailable {
                provider: PROVIDER_NAME,
                symbol: symbol.clone(),
                detail: "configured to fail".to_string(),
            });
        }

        Ok(self
            .quotes
            .get(symbol)
            .map(|items| {
                items
                    .iter()
                    .filter(|q| q.date >= from && q.date <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2014, 10, day).unwrap()
    }

    #[tokio::test]
    async fn loads_file_and_filters_by_range() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"IS3N.DE": [
                {{"date": "2014-10-17", "open": 18.6, "high": 18.92, "low": 18.48, "close": 18.92, "volume": 6100.0}},
                {{"date": "2014-10-20", "open": 18.9, "high": 18.95, "low": 18.7, "close": 18.81, "volume": 5000.0}}
            ]}}"#
        )
        .unwrap();

        let provider = StaticQuoteProvider::from_json_file(file.path()).unwrap();
        let symbol = Symbol::parse("IS3N.DE").unwrap();

        assert_eq!(provider.fetch(&symbol, d(17), d(24)).await.unwrap().len(), 2);
        assert_eq!(provider.fetch(&symbol, d(18), d(24)).await.unwrap().len(), 1);

        let other = Symbol::parse("DXET.DE").unwrap();
        assert!(provider.fetch(&other, d(17), d(24)).await.unwrap().is_empty());

        let failing = provider.fail_for(other.clone());
        assert!(failing.fetch(&other, d(17), d(24)).await.is_err());
    }
}
