#![allow(dead_code)]

pub mod builders;
pub mod doubles;
pub mod fixtures;

use anyhow::Context as _;
use axum::{
    body::{Body, Bytes},
    http::{HeaderMap, Method, Request, StatusCode},
    Router,
};
use fieldsearch::{
    api::create_router,
    db::{
        MemoryDatastore, MemoryDefinitionStore, MemoryScheduleLocks, MemorySearchRunStore,
        MemoryUserDirectory, ScheduleStore,
    },
    delivery::DeliveryRouter,
    fields::MemoryCustomFieldStore,
    models::User,
    state::Backends,
    workers::{MailOwnerNotifier, ScheduleRunner, ScheduleRunnerConfig},
    AppState, Config,
};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt as _;

pub use builders::*;
pub use doubles::*;
pub use fixtures::*;

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub config: Config,
    /// Records behind every module table.
    pub records: Arc<MemoryDatastore>,
    /// The datastore the services see; wraps `records`.
    pub datastore: Arc<FlakyDatastore>,
    pub definitions: Arc<MemoryDefinitionStore>,
    pub users: Arc<MemoryUserDirectory>,
    pub runs: Arc<MemorySearchRunStore>,
    pub custom_fields: Arc<MemoryCustomFieldStore>,
}

impl TestApp {
    pub async fn new() -> anyhow::Result<Self> {
        Self::new_with_config(|_| {}).await
    }

    pub async fn new_with_config(configure: impl FnOnce(&mut Config)) -> anyhow::Result<Self> {
        let mut config = test_config();
        configure(&mut config);

        let records = Arc::new(MemoryDatastore::new());
        let datastore = Arc::new(FlakyDatastore::new(records.clone()));
        let definitions = Arc::new(MemoryDefinitionStore::new());
        let users = Arc::new(MemoryUserDirectory::new());
        let runs = Arc::new(MemorySearchRunStore::new());
        let custom_fields = Arc::new(MemoryCustomFieldStore::new());

        for user in [master(), alice(), bob(), carol(), admin()] {
            users.insert(user).await;
        }

        let backends = Backends {
            custom_fields: custom_fields.clone(),
            datastore: datastore.clone(),
            definitions: definitions.clone(),
            runs: runs.clone(),
            users: users.clone(),
        };
        let state = AppState::from_backends(config.clone(), backends)
            .context("initialize AppState")?;
        let router = create_router(state.clone());

        Ok(Self {
            router,
            state,
            config,
            records,
            datastore,
            definitions,
            users,
            runs,
            custom_fields,
        })
    }

    /// Insert the standard order fixtures.
    pub async fn seed_orders(&self) {
        for record in standard_orders() {
            self.records.insert(ORDERS_TABLE, record).await;
        }
    }

    /// A schedule runner over this app's stores, delivering through `mail`.
    pub fn schedule_runner(&self, mail: Arc<RecordingMail>) -> ScheduleRunner {
        self.schedule_runner_with_locks(mail, Arc::new(MemoryScheduleLocks::new()))
    }

    /// Runners built with the same `locks` contend for the same schedules.
    pub fn schedule_runner_with_locks(
        &self,
        mail: Arc<RecordingMail>,
        locks: Arc<MemoryScheduleLocks>,
    ) -> ScheduleRunner {
        self.schedule_runner_over(mail, self.definitions.clone(), locks)
    }

    pub fn schedule_runner_over(
        &self,
        mail: Arc<RecordingMail>,
        schedules: Arc<dyn ScheduleStore>,
        locks: Arc<MemoryScheduleLocks>,
    ) -> ScheduleRunner {
        let sink = Arc::new(DeliveryRouter::new(
            mail.clone(),
            Arc::new(RejectingTransfer),
            Duration::from_secs(5),
        ));
        ScheduleRunner::new(
            schedules,
            self.users.clone(),
            locks,
            self.state.exporter.clone(),
            sink,
            Arc::new(MailOwnerNotifier::new(mail)),
            ScheduleRunnerConfig {
                failure_threshold: self.config.schedules.failure_threshold,
                max_concurrent: 2,
                catch_up: true,
                query_timeout: Duration::from_secs(5),
            },
        )
    }

    pub async fn request_as(
        &self,
        user: Option<&User>,
        method: Method,
        path_and_query: &str,
        body: Option<serde_json::Value>,
    ) -> anyhow::Result<(StatusCode, HeaderMap, Bytes)> {
        let mut request = Request::builder()
            .method(method)
            .uri(path_and_query)
            .header("host", "example.org")
            .header("content-type", "application/json")
            .body(match body {
                Some(json) => Body::from(serde_json::to_vec(&json).context("encode body")?),
                None => Body::empty(),
            })
            .context("build request")?;

        if let Some(user) = user {
            request.extensions_mut().insert(user.clone());
        }

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .context("dispatch request")?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .context("read response body")?;

        Ok((status, headers, body))
    }

    /// Request as `user` and parse the response body as JSON (`null` when empty).
    pub async fn json_as(
        &self,
        user: &User,
        method: Method,
        path_and_query: &str,
        body: Option<serde_json::Value>,
    ) -> anyhow::Result<(StatusCode, serde_json::Value)> {
        let (status, _headers, bytes) = self
            .request_as(Some(user), method, path_and_query, body)
            .await?;
        if bytes.is_empty() {
            return Ok((status, serde_json::Value::Null));
        }
        let json = serde_json::from_slice(&bytes)
            .with_context(|| format!("parse JSON body: {}", String::from_utf8_lossy(&bytes)))?;
        Ok((status, json))
    }
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.modules = vec![order_module(), shipment_module()];
    config.search.master_company_id = Some(MASTER_COMPANY);
    config.search.default_per_page = 50;
    config.search.max_per_page = 500;
    config.search.max_cached_ids = 1_000;
    config.search.retry_attempts = 3;
    config.search.retry_base_delay_ms = 1;
    config.schedules.failure_threshold = 3;
    config
}
