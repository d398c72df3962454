use crate::domain::Symbol;
use anyhow::Context;
use chrono::{Datelike, NaiveDate};
use sqlx::pool::PoolConnection;
use sqlx::Postgres;

// Advisory locks. The sweep lock is session-scoped and guards against two workers sweeping the
// same as-of date; the symbol lock is transaction-scoped and serializes merges per symbol.
const SWEEP_NAMESPACE: i64 = 0x5157_4154_4348; // "QWATCH"
const SYMBOL_NAMESPACE: i64 = 0x5157_5359_4D42; // "QWSYMB"

fn lock_key_for_date(as_of_date: NaiveDate) -> i64 {
    SWEEP_NAMESPACE ^ (as_of_date.num_days_from_ce() as i64)
}

// FNV-1a, so every process derives the same key for a symbol.
fn lock_key_for_symbol(symbol: &Symbol) -> i64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in symbol.as_str().bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    SYMBOL_NAMESPACE ^ (hash as i64)
}

/// Session-scoped sweep lock. Postgres ties it to one connection, so the guard keeps that
/// connection checked out of the pool until [`SweepLock::release`].
pub struct SweepLock {
    conn: PoolConnection<Postgres>,
    as_of_date: NaiveDate,
    key: i64,
}

/// `None` when another session already sweeps `as_of_date`.
pub async fn try_acquire_sweep_lock(
    pool: &sqlx::PgPool,
    as_of_date: NaiveDate,
) -> anyhow::Result<Option<SweepLock>> {
    let key = lock_key_for_date(as_of_date);
    let mut conn = pool
        .acquire()
        .await
        .context("failed to acquire connection for sweep lock")?;

    let acquired: (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
        .persistent(false)
        .bind(key)
        .fetch_one(&mut *conn)
        .await
        .with_context(|| format!("failed to acquire sweep lock (key={key})"))?;

    Ok(acquired.0.then_some(SweepLock {
        conn,
        as_of_date,
        key,
    }))
}

impl SweepLock {
    pub fn as_of_date(&self) -> NaiveDate {
        self.as_of_date
    }

    /// Unlocks on the connection that took the lock, then returns it to the pool.
    pub async fn release(mut self) -> anyhow::Result<()> {
        let key = self.key;
        let released: (bool,) = sqlx::query_as("SELECT pg_advisory_unlock($1)")
            .persistent(false)
            .bind(key)
            .fetch_one(&mut *self.conn)
            .await
            .with_context(|| format!("failed to release sweep lock (key={key})"))?;
        anyhow::ensure!(
            released.0,
            "sweep lock for {} was not held by this session (key={key})",
            self.as_of_date
        );
        Ok(())
    }
}

/// Blocks until this transaction owns the symbol; released on commit or rollback.
pub async fn lock_symbol_for_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    symbol: &Symbol,
) -> anyhow::Result<()> {
    let key = lock_key_for_symbol(symbol);
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .persistent(false)
        .bind(key)
        .execute(&mut **tx)
        .await
        .with_context(|| format!("failed to lock symbol {symbol} (key={key})"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_keys_are_stable_and_distinct() {
        let a = Symbol::parse("IS3N.DE").unwrap();
        let b = Symbol::parse("DXET.DE").unwrap();
        assert_eq!(lock_key_for_symbol(&a), lock_key_for_symbol(&a.clone()));
        assert_ne!(lock_key_for_symbol(&a), lock_key_for_symbol(&b));
    }

    #[test]
    fn date_keys_differ_per_day() {
        let d1 = NaiveDate::from_ymd_opt(2014, 10, 24).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2014, 10, 28).unwrap();
        assert_ne!(lock_key_for_date(d1), lock_key_for_date(d2));
    }

    // Needs a scratch database; skipped unless TEST_DATABASE_URL is set.
    #[tokio::test]
    async fn sweep_lock_is_released_on_the_session_that_took_it() {
        let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
            return;
        };
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(3)
            .connect(&url)
            .await
            .unwrap();
        let day = NaiveDate::from_ymd_opt(1999, 1, 4).unwrap();

        let lock = try_acquire_sweep_lock(&pool, day).await.unwrap().unwrap();
        assert_eq!(lock.as_of_date(), day);
        assert!(try_acquire_sweep_lock(&pool, day).await.unwrap().is_none());

        lock.release().await.unwrap();
        let again = try_acquire_sweep_lock(&pool, day).await.unwrap().unwrap();
        again.release().await.unwrap();
    }
}
