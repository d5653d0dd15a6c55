//! Application state shared by HTTP handlers

use crate::cache::ResultCache;
use crate::config::Config;
use crate::db::{
    Datastore, DefinitionStore, PgDatastore, PgDefinitionStore, PgScheduleLocks,
    PgSearchRunStore, PgUserDirectory, SearchRunStore, UserDirectory,
};
use crate::delivery::{DeliveryRouter, SpoolFileTransfer, SpoolMailTransport};
use crate::fields::{build_modules, CustomFieldStore, FieldRegistry, PgCustomFieldStore};
use crate::services::{ReportExporter, SearchDefinitionService, SearchService};
use crate::workers::{MailOwnerNotifier, ScheduleRunner};
use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

/// Storage the services run against. Postgres in production, in-memory in tests.
#[derive(Clone)]
pub struct Backends {
    pub custom_fields: Arc<dyn CustomFieldStore>,
    pub datastore: Arc<dyn Datastore>,
    pub definitions: Arc<dyn DefinitionStore>,
    pub runs: Arc<dyn SearchRunStore>,
    pub users: Arc<dyn UserDirectory>,
}

impl Backends {
    pub fn postgres(pool: PgPool, config: &Config) -> Self {
        Self {
            custom_fields: Arc::new(PgCustomFieldStore::new(pool.clone())),
            datastore: Arc::new(PgDatastore::new(pool.clone(), config.statement_timeout())),
            definitions: Arc::new(PgDefinitionStore::new(pool.clone())),
            runs: Arc::new(PgSearchRunStore::new(pool.clone())),
            users: Arc::new(PgUserDirectory::new(pool)),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<FieldRegistry>,
    pub users: Arc<dyn UserDirectory>,
    pub cache: ResultCache,
    pub definitions: Arc<SearchDefinitionService>,
    pub search: Arc<SearchService>,
    pub exporter: Arc<ReportExporter>,
}

impl AppState {
    pub fn from_backends(config: Config, backends: Backends) -> anyhow::Result<Self> {
        let registry = Arc::new(build_registry(&config, backends.custom_fields.clone())?);
        let cache = ResultCache::new(config.cache_settings());

        let definitions = Arc::new(SearchDefinitionService::new(
            backends.definitions.clone(),
            registry.clone(),
            backends.users.clone(),
            backends.runs.clone(),
            cache.clone(),
        ));
        let search = Arc::new(SearchService::new(
            registry.clone(),
            backends.definitions.clone(),
            backends.datastore.clone(),
            backends.runs.clone(),
            cache.clone(),
            config.search_settings(),
        ));
        let exporter = Arc::new(ReportExporter::new(
            registry.clone(),
            backends.datastore.clone(),
            config.export_settings(),
        ));

        Ok(Self {
            config: Arc::new(config),
            registry,
            users: backends.users,
            cache,
            definitions,
            search,
            exporter,
        })
    }
}

/// Schedule runner over Postgres, delivering through the configured spool.
pub fn build_schedule_runner(
    pool: PgPool,
    config: &Config,
    exporter: Arc<ReportExporter>,
) -> Arc<ScheduleRunner> {
    let mail = Arc::new(SpoolMailTransport::new(config.schedules.mail_spool_dir()));
    let transfer = Arc::new(SpoolFileTransfer::new(
        config.schedules.transfer_spool_dir(),
    ));
    let sink = Arc::new(DeliveryRouter::new(
        mail.clone(),
        transfer,
        config.delivery_timeout(),
    ));

    Arc::new(ScheduleRunner::new(
        Arc::new(PgDefinitionStore::new(pool.clone())),
        Arc::new(PgUserDirectory::new(pool.clone())),
        Arc::new(PgScheduleLocks::new(pool)),
        exporter,
        sink,
        Arc::new(MailOwnerNotifier::new(mail)),
        config.schedule_runner_config(),
    ))
}

pub fn build_registry(
    config: &Config,
    custom_fields: Arc<dyn CustomFieldStore>,
) -> anyhow::Result<FieldRegistry> {
    let modules = build_modules(&config.modules, config.search.master_company_id);
    tracing::info!(modules = modules.len(), "Registering search modules");
    FieldRegistry::new(modules, custom_fields).context("Failed to build field registry")
}

/// Open the connection pool and, unless disabled, apply pending migrations.
pub async fn connect_pool(config: &Config) -> anyhow::Result<PgPool> {
    let db = &config.database;
    let pool = PgPoolOptions::new()
        .max_connections(db.max_connections)
        .min_connections(db.min_connections)
        .acquire_timeout(Duration::from_secs(db.acquire_timeout_seconds))
        .connect(&db.url)
        .await
        .context("Failed to connect to database")?;

    if db.run_migrations {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run database migrations")?;
        tracing::info!("Database migrations applied");
    }

    Ok(pool)
}
