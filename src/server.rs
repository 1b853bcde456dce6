use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use sqlx::{
    SqlitePool,
    migrate::Migrator,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use tower_http::trace::TraceLayer;
use tower_sessions::{
    CachingSessionStore, Expiry, SessionManagerLayer, SessionStore, cookie::time::Duration,
};
use tower_sessions_moka_store::MokaStore;
use tower_sessions_sqlx_store::SqliteStore;
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    api::{ApiDoc, admin, learner, public},
    config::Config,
};

pub static MIGRATOR: Migrator = sqlx::migrate!();

/// Sessions cached in memory in front of the SQLite store.
pub type SessionBackend = CachingSessionStore<MokaStore, SqliteStore>;

/// Shared state of every request handler.
pub struct Server {
    pub database: SqlitePool,
    pub config: Config,
}

impl Server {
    /// Open (creating if needed) the database and bring its schema up to date.
    pub async fn connect(config: Config) -> anyhow::Result<Self> {
        if let Some(dir) = config.database.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create database directory {}", dir.display()))?;
        }
        let options = SqliteConnectOptions::new()
            .filename(&config.database)
            .create_if_missing(true)
            .foreign_keys(true);
        let database = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .with_context(|| format!("open database {}", config.database.display()))?;
        MIGRATOR.run(&database).await.context("run migrations")?;
        info!("database ready at {}", config.database.display());
        Ok(Self { database, config })
    }

    pub fn from_pool(database: SqlitePool, config: Config) -> Self {
        Self { database, config }
    }

    pub async fn session_store(&self) -> anyhow::Result<SessionBackend> {
        let sqlite = SqliteStore::new(self.database.clone());
        sqlite.migrate().await.context("migrate session table")?;
        Ok(CachingSessionStore::new(MokaStore::new(Some(2000)), sqlite))
    }
}

pub fn build_app<S>(server: Arc<Server>, store: S) -> Router
where
    S: SessionStore + Clone,
{
    let sessions = SessionManagerLayer::new(store)
        .with_secure(server.config.tls.is_some())
        .with_expiry(Expiry::OnInactivity(Duration::days(
            server.config.session_expiry_days,
        )));
    Router::new()
        .merge(public::router())
        .nest("/api/learner", learner::router())
        .nest("/api/admin", admin::router())
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(sessions)
        .layer(TraceLayer::new_for_http())
        .with_state(server)
}
