use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fieldsearch::{
    db::search::SecuredQuery,
    db::{Datastore, FailureOutcome, MemoryDatastore, Row, ScheduleStore},
    delivery::{FileTransferClient, MailMessage, MailTransport},
    models::{FileTransferTarget, RunWindow, SearchDefinition},
    Error, Result,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Id requests above this limit are full scans issued by cache warm-ups.
const FULL_SCAN_LIMIT: u64 = 1_000;

/// Delegates to a [`MemoryDatastore`], optionally failing full scans.
pub struct FlakyDatastore {
    inner: Arc<MemoryDatastore>,
    fail_full_scans: AtomicBool,
    full_scans: AtomicUsize,
    scan_delay_ms: AtomicUsize,
}

impl FlakyDatastore {
    pub fn new(inner: Arc<MemoryDatastore>) -> Self {
        Self {
            inner,
            fail_full_scans: AtomicBool::new(false),
            full_scans: AtomicUsize::new(0),
            scan_delay_ms: AtomicUsize::new(0),
        }
    }

    pub fn fail_full_scans(&self, fail: bool) {
        self.fail_full_scans.store(fail, Ordering::SeqCst);
    }

    pub fn set_scan_delay(&self, delay: Duration) {
        self.scan_delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    pub fn full_scans(&self) -> usize {
        self.full_scans.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Datastore for FlakyDatastore {
    async fn count(&self, query: &SecuredQuery) -> Result<u64> {
        self.inner.count(query).await
    }

    async fn ids(&self, query: &SecuredQuery, offset: u64, limit: u64) -> Result<Vec<i64>> {
        if limit > FULL_SCAN_LIMIT {
            self.full_scans.fetch_add(1, Ordering::SeqCst);
            let delay = self.scan_delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay as u64)).await;
            }
            if self.fail_full_scans.load(Ordering::SeqCst) {
                return Err(Error::Internal("replica unavailable".to_string()));
            }
        }
        self.inner.ids(query, offset, limit).await
    }

    async fn hydrate(&self, query: &SecuredQuery, ids: &[i64]) -> Result<Vec<Row>> {
        self.inner.hydrate(query, ids).await
    }
}

/// Records sent mail. Messages to `rejected_domain` fail.
#[derive(Default)]
pub struct RecordingMail {
    sent: Mutex<Vec<MailMessage>>,
    rejected_domain: Option<String>,
}

impl RecordingMail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting(domain: &str) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            rejected_domain: Some(domain.to_string()),
        }
    }

    pub fn sent(&self) -> Vec<MailMessage> {
        self.sent.lock().expect("mail log").clone()
    }

    pub fn sent_to(&self, recipient: &str) -> Vec<MailMessage> {
        self.sent()
            .into_iter()
            .filter(|m| m.recipients.iter().any(|r| r == recipient))
            .collect()
    }
}

#[async_trait]
impl MailTransport for RecordingMail {
    async fn send(&self, message: &MailMessage) -> Result<()> {
        if let Some(domain) = &self.rejected_domain {
            if message.recipients.iter().any(|r| r.ends_with(domain.as_str())) {
                return Err(Error::Internal(format!("mailbox unavailable at {domain}")));
            }
        }
        self.sent.lock().expect("mail log").push(message.clone());
        Ok(())
    }
}

pub struct RejectingTransfer;

#[async_trait]
impl FileTransferClient for RejectingTransfer {
    async fn put(
        &self,
        target: &FileTransferTarget,
        _bytes: &[u8],
        _remote_filename: &str,
    ) -> Result<()> {
        Err(Error::Internal(format!("connection refused by {}", target.host)))
    }
}

/// Lists a fixed snapshot of scheduled definitions, as a runner that listed
/// before another runner fired would see them. Writes go to `inner`.
pub struct StaleListing {
    inner: Arc<dyn ScheduleStore>,
    snapshot: Vec<SearchDefinition>,
}

impl StaleListing {
    pub fn new(inner: Arc<dyn ScheduleStore>, snapshot: Vec<SearchDefinition>) -> Self {
        Self { inner, snapshot }
    }
}

#[async_trait]
impl ScheduleStore for StaleListing {
    async fn scheduled_definitions(&self) -> Result<Vec<SearchDefinition>> {
        Ok(self.snapshot.clone())
    }

    async fn claim_window(&self, schedule_id: i64, window: RunWindow) -> Result<bool> {
        self.inner.claim_window(schedule_id, window).await
    }

    async fn record_success(&self, schedule_id: i64, at: DateTime<Utc>) -> Result<()> {
        self.inner.record_success(schedule_id, at).await
    }

    async fn record_failure(
        &self,
        schedule_id: i64,
        reason: &str,
        threshold: i32,
    ) -> Result<FailureOutcome> {
        self.inner.record_failure(schedule_id, reason, threshold).await
    }
}
