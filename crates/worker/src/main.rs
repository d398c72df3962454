use anyhow::Context;
use clap::{Parser, Subcommand};
use quotewatch_core::config::Settings;
use quotewatch_core::ingest::fixture::StaticQuoteProvider;
use quotewatch_core::ingest::provider::HttpJsonQuoteProvider;
use quotewatch_core::ingest::{CancelFlag, QuoteProvider, SweepReport};
use quotewatch_core::service::{ServiceOptions, StockService};
use quotewatch_core::storage::memory::MemoryQuoteStore;
use quotewatch_core::storage::quotes::{record_sweep_run, PgQuoteStore};
use quotewatch_core::users::postgres::PgUserDirectory;
use quotewatch_core::users::{MemoryUserDirectory, UserDirectory};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod seed;

#[derive(Debug, Parser)]
#[command(name = "quotewatch_worker")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch missing daily quotes for every tracked symbol up to the as-of date.
    Update {
        /// Market as-of date (YYYY-MM-DD). Defaults to today's UTC date.
        #[arg(long)]
        as_of_date: Option<String>,

        /// Fetch and validate into memory only: no migrations, no sweep lock, no run record.
        /// Users are still read from the database unless --users-file is given.
        #[arg(long)]
        dry_run: bool,

        /// Serve quotes from a JSON file instead of the HTTP provider.
        #[arg(long)]
        quotes_file: Option<PathBuf>,

        /// Read users from a JSON file instead of the database. Only valid with --dry-run.
        #[arg(long, requires = "dry_run")]
        users_file: Option<PathBuf>,
    },
    /// Print buy/sell recommendations relative to the close on or before a date.
    Recommend {
        #[arg(long)]
        since: String,
    },
    /// Create or replace users and their triggers from a JSON file.
    SeedUser {
        #[arg(long)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    match args.command {
        Command::Update {
            as_of_date,
            dry_run,
            quotes_file,
            users_file,
        } => {
            let as_of_date = resolve_as_of_date(as_of_date.as_deref())?;
            let provider = quote_provider(&settings, quotes_file.as_deref())?;

            if dry_run {
                let users: Arc<dyn UserDirectory> = match users_file {
                    Some(path) => Arc::new(MemoryUserDirectory::new(seed::load_users(&path)?)),
                    None => Arc::new(PgUserDirectory::new(connect(&settings).await?)),
                };
                let report = dry_run_sweep(
                    users,
                    provider,
                    ServiceOptions::from_settings(&settings),
                    as_of_date,
                )
                .await?;
                tracing::info!(
                    %as_of_date,
                    dry_run = true,
                    inserted = report.inserted(),
                    conflicts = report.conflicts(),
                    failed = report.failed().len(),
                    "quote sweep finished"
                );
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(());
            }

            let pool = connect(&settings).await?;
            quotewatch_core::storage::migrate(&pool).await?;
            update(&settings, pool, provider, as_of_date).await
        }
        Command::Recommend { since } => {
            let since = chrono::NaiveDate::parse_from_str(&since, "%Y-%m-%d")
                .with_context(|| format!("invalid --since date {since:?}"))?;
            let pool = connect(&settings).await?;
            quotewatch_core::storage::migrate(&pool).await?;
            recommend(&settings, pool, since).await
        }
        Command::SeedUser { file } => {
            let pool = connect(&settings).await?;
            quotewatch_core::storage::migrate(&pool).await?;
            let users = PgUserDirectory::new(pool);
            for user in seed::load_users(&file)? {
                users.create_user(&user).await?;
                tracing::info!(email = %user.email, triggers = user.triggers.len(), "seeded user");
            }
            Ok(())
        }
    }
}

async fn connect(settings: &Settings) -> anyhow::Result<sqlx::PgPool> {
    let db_url = settings.require_database_url()?;
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .context("connect DATABASE_URL failed")
}

fn quote_provider(
    settings: &Settings,
    quotes_file: Option<&Path>,
) -> anyhow::Result<Arc<dyn QuoteProvider>> {
    let provider: Arc<dyn QuoteProvider> = match quotes_file {
        Some(path) => Arc::new(StaticQuoteProvider::from_json_file(path)?),
        None => Arc::new(HttpJsonQuoteProvider::from_settings(settings)?),
    };
    Ok(provider)
}

/// Runs a full sweep against an in-memory store; nothing is written anywhere.
async fn dry_run_sweep(
    users: Arc<dyn UserDirectory>,
    provider: Arc<dyn QuoteProvider>,
    options: ServiceOptions,
    as_of_date: chrono::NaiveDate,
) -> anyhow::Result<SweepReport> {
    let service = StockService::new(Arc::new(MemoryQuoteStore::new()), users, options)
        .with_provider(provider);
    service.update_quotes(as_of_date, &CancelFlag::new()).await
}

async fn update(
    settings: &Settings,
    pool: sqlx::PgPool,
    provider: Arc<dyn QuoteProvider>,
    as_of_date: chrono::NaiveDate,
) -> anyhow::Result<()> {
    let store = Arc::new(PgQuoteStore::new(pool.clone()));
    let users = Arc::new(PgUserDirectory::new(pool.clone()));
    let service = StockService::new(store, users, ServiceOptions::from_settings(settings))
        .with_provider(provider);

    let Some(lock) =
        quotewatch_core::storage::lock::try_acquire_sweep_lock(&pool, as_of_date).await?
    else {
        tracing::warn!(%as_of_date, "sweep lock not acquired; another run in progress");
        return Ok(());
    };

    let cancel = CancelFlag::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; finishing in-flight symbols");
            on_signal.cancel();
        }
    });

    let result = sweep_and_record(&service, &pool, as_of_date, &cancel).await;

    if let Err(err) = lock.release().await {
        sentry_anyhow::capture_anyhow(&err);
        tracing::error!(%as_of_date, error = %err, "failed to release sweep lock");
    }
    result
}

async fn sweep_and_record(
    service: &StockService,
    pool: &sqlx::PgPool,
    as_of_date: chrono::NaiveDate,
    cancel: &CancelFlag,
) -> anyhow::Result<()> {
    match service.update_quotes(as_of_date, cancel).await {
        Ok(report) => {
            let status = sweep_status(&report);
            tracing::info!(
                %as_of_date,
                inserted = report.inserted(),
                conflicts = report.conflicts(),
                failed = report.failed().len(),
                cancelled = report.cancelled(),
                "quote sweep finished"
            );
            let summary = serde_json::to_value(&report).ok();
            let run_id = record_sweep_run(pool, as_of_date, status, None, summary).await?;
            tracing::info!(%as_of_date, %run_id, status, "recorded sweep run");
            Ok(())
        }
        Err(err) => {
            sentry_anyhow::capture_anyhow(&err);
            tracing::error!(%as_of_date, error = %err, "quote sweep failed");
            let detail = format!("{err:#}");
            if let Err(record_err) =
                record_sweep_run(pool, as_of_date, "failed", Some(&detail), None).await
            {
                tracing::error!(%as_of_date, error = %record_err, "failed to record sweep run");
            }
            Err(err)
        }
    }
}

fn sweep_status(report: &SweepReport) -> &'static str {
    if report.failed().is_empty() && report.cancelled() == 0 {
        "success"
    } else {
        "partial"
    }
}

async fn recommend(settings: &Settings, pool: sqlx::PgPool, since: chrono::NaiveDate) -> anyhow::Result<()> {
    let store = Arc::new(PgQuoteStore::new(pool.clone()));
    let users = Arc::new(PgUserDirectory::new(pool));
    let service = StockService::new(store, users, ServiceOptions::from_settings(settings));

    let recommendations = service.get_change_recommendations(since).await?;
    tracing::info!(%since, count = recommendations.len(), "computed recommendations");
    println!("{}", serde_json::to_string_pretty(&recommendations)?);
    Ok(())
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

fn resolve_as_of_date(as_of_date_arg: Option<&str>) -> anyhow::Result<chrono::NaiveDate> {
    if let Some(s) = as_of_date_arg {
        return chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .with_context(|| format!("invalid --as-of-date {s:?}"));
    }
    Ok(chrono::Utc::now().date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use quotewatch_core::domain::Symbol;
    use quotewatch_core::ingest::types::RawQuote;
    use std::collections::HashMap;

    fn d(day: u32) -> chrono::NaiveDate {
        chrono::NaiveDate::from_ymd_opt(2014, 10, day).unwrap()
    }

    fn raw(day: u32, close: f64) -> RawQuote {
        RawQuote {
            date: d(day),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1000.0,
            adjusted_close: None,
        }
    }

    #[tokio::test]
    async fn dry_run_sweeps_without_a_database() {
        let users = seed::parse_users(
            r#"[{"email":"foo@bar","name":"FOO","triggers":[
                {"name":"ISHS-CO.MSCI EM.MAR.IMI UC.ETF","symbol":"IS3N.DE","buy":100.0,"sell":300.0}
            ]}]"#,
        )
        .unwrap();
        let is3n = Symbol::parse("IS3N.DE").unwrap();
        let provider = StaticQuoteProvider::new(HashMap::from([(
            is3n.clone(),
            vec![raw(23, 18.92), raw(24, 19.07)],
        )]))
        .fail_for(Symbol::parse("NOPE.DE").unwrap());

        let report = dry_run_sweep(
            Arc::new(MemoryUserDirectory::new(users)),
            Arc::new(provider),
            ServiceOptions::default(),
            d(24),
        )
        .await
        .unwrap();

        assert_eq!(report.inserted(), 2);
        assert_eq!(sweep_status(&report), "success");
        assert!(report.outcome(&is3n).is_some());
    }

    #[test]
    fn users_file_requires_dry_run() {
        assert!(Args::try_parse_from(["quotewatch_worker", "update", "--users-file", "u.json"]).is_err());
        assert!(Args::try_parse_from([
            "quotewatch_worker",
            "update",
            "--dry-run",
            "--users-file",
            "u.json",
        ])
        .is_ok());
    }
}
