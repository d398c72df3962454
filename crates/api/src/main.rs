use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Html,
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quotewatch_core::domain::{Quote, Recommendation, Stock, Symbol};
use quotewatch_core::error::UnknownSymbolError;
use quotewatch_core::render::{FileTemplates, Locale, Renderer};
use quotewatch_core::service::{ServiceOptions, StockService};
use quotewatch_core::storage::quotes::PgQuoteStore;
use quotewatch_core::users::postgres::PgUserDirectory;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = quotewatch_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let pool = match settings.require_database_url() {
        Ok(db_url) => match sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
        {
            Ok(pool) => match quotewatch_core::storage::migrate(&pool).await {
                Ok(()) => Some(pool),
                Err(e) => {
                    sentry_anyhow::capture_anyhow(&e);
                    tracing::error!(error = %e, "db migrations failed; starting API in degraded mode");
                    None
                }
            },
            Err(e) => {
                let err = anyhow::Error::new(e);
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(error = %err, "db connect failed; starting API in degraded mode");
                None
            }
        },
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "DATABASE_URL missing; starting API in degraded mode");
            None
        }
    };

    let service = pool.map(|pool| {
        let store = Arc::new(PgQuoteStore::new(pool.clone()));
        let users = Arc::new(PgUserDirectory::new(pool));
        Arc::new(StockService::new(
            store,
            users,
            ServiceOptions::from_settings(&settings),
        ))
    });

    let state = AppState {
        service,
        templates: Arc::new(FileTemplates::new(
            &settings.template_dir,
            settings.template_cache,
        )),
        default_locale: Locale::parse(&settings.default_locale)?,
    };

    let app = Router::new()
        .route("/", get(index))
        .route("/healthz", get(healthz))
        .route("/stocks", get(list_stocks))
        .route("/stocks/:symbol/history", get(list_history))
        .route("/recommendations", get(list_recommendations))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Clone)]
struct AppState {
    service: Option<Arc<StockService>>,
    templates: Arc<FileTemplates>,
    default_locale: Locale,
}

impl AppState {
    fn service(&self) -> Result<&StockService, StatusCode> {
        self.service
            .as_deref()
            .ok_or(StatusCode::SERVICE_UNAVAILABLE)
    }
}

fn internal(err: anyhow::Error) -> StatusCode {
    sentry_anyhow::capture_anyhow(&err);
    tracing::error!(error = %err, "request failed");
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn list_stocks(State(state): State<AppState>) -> Result<Json<Vec<Stock>>, StatusCode> {
    let stocks = state.service()?.list_stocks().await.map_err(internal)?;
    Ok(Json(stocks))
}

async fn list_history(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<Vec<Quote>>, StatusCode> {
    let service = state.service()?;
    let symbol = Symbol::parse(&symbol).map_err(|_| StatusCode::BAD_REQUEST)?;

    match service.list_historical_stocks(&symbol).await {
        Ok(quotes) => Ok(Json(quotes)),
        Err(err) if err.downcast_ref::<UnknownSymbolError>().is_some() => {
            Err(StatusCode::NOT_FOUND)
        }
        Err(err) => Err(internal(err)),
    }
}

#[derive(Debug, Deserialize)]
struct SinceQuery {
    since: String,
}

async fn list_recommendations(
    State(state): State<AppState>,
    Query(query): Query<SinceQuery>,
) -> Result<Json<Vec<Recommendation>>, StatusCode> {
    let service = state.service()?;
    let since =
        NaiveDate::parse_from_str(&query.since, "%Y-%m-%d").map_err(|_| StatusCode::BAD_REQUEST)?;

    let recommendations = service
        .get_change_recommendations(since)
        .await
        .map_err(internal)?;
    Ok(Json(recommendations))
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    lang: Option<String>,
}

async fn index(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<Html<String>, StatusCode> {
    let locale = match query.lang.as_deref() {
        Some(tag) => Locale::parse(tag).map_err(|_| StatusCode::BAD_REQUEST)?,
        None => state.default_locale.clone(),
    };

    let stocks = state.service()?.list_stocks().await.map_err(internal)?;
    let rows: Vec<serde_json::Value> = stocks
        .iter()
        .map(|stock| match stock.current() {
            Some(q) => json!({
                "symbol": stock.symbol.to_string(),
                "date": q.date.to_string(),
                "close": q.close,
            }),
            None => json!({
                "symbol": stock.symbol.to_string(),
                "date": "-",
                "close": "-",
            }),
        })
        .collect();
    let model = json!({ "stocks": rows });

    let templates = state.templates.clone();
    let page = tokio::task::spawn_blocking(move || templates.render("index.html", &model, &locale))
        .await
        .map_err(|e| internal(anyhow::Error::new(e)))?
        .map_err(|e| {
            if e.is_configuration() {
                tracing::error!(error = %e, "index template misconfigured");
            }
            internal(anyhow::Error::new(e))
        })?;

    Ok(Html(page))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &quotewatch_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
