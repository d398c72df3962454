use crate::domain::{Quote, Symbol};
use crate::storage::lock::lock_symbol_for_tx;
use crate::storage::{plan_merge, MergeReport, QuoteStore};
use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

const DEFAULT_INSERT_BATCH: usize = 200;

type QuoteRow = (NaiveDate, f64, f64, f64, f64, f64, f64);

const SELECT_COLUMNS: &str =
    "SELECT trade_date, open, high, low, close, volume, adjusted_close FROM daily_quotes";

/// Quote series persisted in the `daily_quotes` table, keyed by `(symbol, trade_date)`.
#[derive(Debug, Clone)]
pub struct PgQuoteStore {
    pool: sqlx::PgPool,
    insert_batch: usize,
}

impl PgQuoteStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        let insert_batch = std::env::var("QUOTE_INSERT_BATCH")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|n| *n >= 1)
            .unwrap_or(DEFAULT_INSERT_BATCH);

        Self { pool, insert_batch }
    }
}

fn row_to_quote(row: QuoteRow) -> anyhow::Result<Quote> {
    let (date, open, high, low, close, volume, adjusted_close) = row;
    Quote::new(date, open, high, low, close, volume, adjusted_close)
        .with_context(|| format!("invalid daily_quotes row for {date}"))
}

#[async_trait::async_trait]
impl QuoteStore for PgQuoteStore {
    async fn merge(&self, symbol: &Symbol, quotes: &[Quote]) -> anyhow::Result<MergeReport> {
        let mut tx = self.pool.begin().await.context("begin transaction failed")?;
        lock_symbol_for_tx(&mut tx, symbol).await?;

        let dates: Vec<NaiveDate> = quotes.iter().map(|q| q.date).collect();
        let rows = sqlx::query_as::<_, QuoteRow>(&format!(
            "{SELECT_COLUMNS} WHERE symbol = $1 AND trade_date = ANY($2)"
        ))
        .persistent(false)
        .bind(symbol.as_str())
        .bind(dates)
        .fetch_all(&mut *tx)
        .await
        .context("select existing daily_quotes failed")?;

        let mut existing = BTreeMap::new();
        for row in rows {
            let quote = row_to_quote(row)?;
            existing.insert(quote.date, quote);
        }

        let plan = plan_merge(symbol, &existing, quotes);

        for chunk in plan.inserts.chunks(self.insert_batch) {
            let mut qb = sqlx::QueryBuilder::new(
                "INSERT INTO daily_quotes (symbol, trade_date, open, high, low, close, volume, adjusted_close) ",
            );
            qb.push_values(chunk, |mut b, q| {
                b.push_bind(symbol.as_str())
                    .push_bind(q.date)
                    .push_bind(q.open)
                    .push_bind(q.high)
                    .push_bind(q.low)
                    .push_bind(q.close)
                    .push_bind(q.volume)
                    .push_bind(q.adjusted_close);
            });

            qb.build()
                .persistent(false)
                .execute(&mut *tx)
                .await
                .context("batch insert daily_quotes failed")?;
        }

        tx.commit().await.context("commit transaction failed")?;

        tracing::debug!(
            %symbol,
            inserted = plan.report.inserted.len(),
            unchanged = plan.report.unchanged.len(),
            conflicts = plan.report.conflicts.len(),
            "daily_quotes merge"
        );
        Ok(plan.report)
    }

    async fn latest(&self, symbol: &Symbol) -> anyhow::Result<Option<Quote>> {
        let row = sqlx::query_as::<_, QuoteRow>(&format!(
            "{SELECT_COLUMNS} WHERE symbol = $1 ORDER BY trade_date DESC LIMIT 1"
        ))
        .persistent(false)
        .bind(symbol.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("select latest daily_quotes failed")?;

        row.map(row_to_quote).transpose()
    }

    async fn window(
        &self,
        symbol: &Symbol,
        from: NaiveDate,
        to: NaiveDate,
    ) -> anyhow::Result<Vec<Quote>> {
        let rows = sqlx::query_as::<_, QuoteRow>(&format!(
            "{SELECT_COLUMNS} WHERE symbol = $1 AND trade_date BETWEEN $2 AND $3 ORDER BY trade_date ASC"
        ))
        .persistent(false)
        .bind(symbol.as_str())
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .context("select daily_quotes window failed")?;

        rows.into_iter().map(row_to_quote).collect()
    }

    async fn at_or_before(
        &self,
        symbol: &Symbol,
        date: NaiveDate,
    ) -> anyhow::Result<Option<Quote>> {
        let row = sqlx::query_as::<_, QuoteRow>(&format!(
            "{SELECT_COLUMNS} WHERE symbol = $1 AND trade_date <= $2 ORDER BY trade_date DESC LIMIT 1"
        ))
        .persistent(false)
        .bind(symbol.as_str())
        .bind(date)
        .fetch_optional(&self.pool)
        .await
        .context("select daily_quotes at-or-before failed")?;

        row.map(row_to_quote).transpose()
    }
}

/// Writes one row per sweep so operators can see what each scheduled run did.
pub async fn record_sweep_run(
    pool: &sqlx::PgPool,
    as_of_date: NaiveDate,
    status: &str,
    error: Option<&str>,
    summary: Option<Value>,
) -> anyhow::Result<Uuid> {
    let id = Uuid::new_v4();
    let generated_at: DateTime<Utc> = Utc::now();

    sqlx::query(
        "INSERT INTO quote_sweep_runs (id, as_of_date, generated_at, status, error, summary) \
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .persistent(false)
    .bind(id)
    .bind(as_of_date)
    .bind(generated_at)
    .bind(status)
    .bind(error)
    .bind(summary)
    .execute(pool)
    .await
    .context("insert quote_sweep_runs failed")?;

    Ok(id)
}
