//! Report delivery
//!
//! A [`DeliveryRouter`] sends a rendered report to a schedule's destination
//! through narrow transport traits. The stock transports spool to a directory
//! that an external MTA or transfer agent drains; files are written under a
//! temporary name and renamed into place once complete.

use crate::models::{Destination, FileTransferTarget};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Bytes to deliver and how to name them.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub content_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MailMessage {
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
    pub attachment: Option<Attachment>,
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: &MailMessage) -> Result<()>;
}

#[async_trait]
pub trait FileTransferClient: Send + Sync {
    async fn put(&self, target: &FileTransferTarget, bytes: &[u8], remote_filename: &str)
        -> Result<()>;
}

#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn deliver(&self, delivery: &Delivery, destination: &Destination) -> Result<()>;
}

/// Dispatches deliveries by destination mode. Every delivery is bounded by
/// `timeout`; all failures surface as [`Error::ScheduleDeliveryFailure`].
pub struct DeliveryRouter {
    mail: Arc<dyn MailTransport>,
    transfer: Arc<dyn FileTransferClient>,
    timeout: Duration,
}

impl DeliveryRouter {
    pub fn new(
        mail: Arc<dyn MailTransport>,
        transfer: Arc<dyn FileTransferClient>,
        timeout: Duration,
    ) -> Self {
        Self {
            mail,
            transfer,
            timeout,
        }
    }

    async fn dispatch(&self, delivery: &Delivery, destination: &Destination) -> Result<()> {
        match destination {
            Destination::Email {
                recipients,
                subject,
                body,
            } => {
                let message = MailMessage {
                    recipients: recipients.clone(),
                    subject: subject
                        .clone()
                        .unwrap_or_else(|| format!("Search results: {}", delivery.filename)),
                    body: body.clone().unwrap_or_default(),
                    attachment: Some(Attachment {
                        filename: delivery.filename.clone(),
                        content_type: delivery.content_type.clone(),
                        bytes: delivery.bytes.clone(),
                    }),
                };
                self.mail.send(&message).await
            }
            Destination::FileTransfer(target) => {
                self.transfer
                    .put(target, &delivery.bytes, &delivery.filename)
                    .await
            }
        }
    }
}

#[async_trait]
impl DeliverySink for DeliveryRouter {
    async fn deliver(&self, delivery: &Delivery, destination: &Destination) -> Result<()> {
        let mode = destination.mode();
        match tokio::time::timeout(self.timeout, self.dispatch(delivery, destination)).await {
            Ok(Ok(())) => {
                tracing::info!(
                    mode,
                    filename = %delivery.filename,
                    bytes = delivery.bytes.len(),
                    "Delivered report"
                );
                Ok(())
            }
            Ok(Err(Error::ScheduleDeliveryFailure(msg))) => {
                Err(Error::ScheduleDeliveryFailure(msg))
            }
            Ok(Err(e)) => Err(Error::ScheduleDeliveryFailure(format!("{mode}: {e}"))),
            Err(_) => Err(Error::ScheduleDeliveryFailure(format!(
                "{mode}: delivery exceeded {:?}",
                self.timeout
            ))),
        }
    }
}

/// Writes `bytes` to `dir/name` via a temporary file.
async fn write_atomically(dir: &Path, name: &str, bytes: &[u8]) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| spool_error(dir, e))?;
    let final_path = dir.join(name);
    let tmp_path = dir.join(format!(".{name}.tmp"));
    tokio::fs::write(&tmp_path, bytes)
        .await
        .map_err(|e| spool_error(&tmp_path, e))?;
    tokio::fs::rename(&tmp_path, &final_path)
        .await
        .map_err(|e| spool_error(&final_path, e))?;
    Ok(final_path)
}

fn spool_error(path: &Path, e: std::io::Error) -> Error {
    Error::ScheduleDeliveryFailure(format!("spool write {}: {}", path.display(), e))
}

/// Spools each message as `<id>.json` plus its attachment under `<dir>/<id>/`.
pub struct SpoolMailTransport {
    dir: PathBuf,
}

impl SpoolMailTransport {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl MailTransport for SpoolMailTransport {
    async fn send(&self, message: &MailMessage) -> Result<()> {
        if message.recipients.is_empty() {
            return Err(Error::ScheduleDeliveryFailure(
                "email has no recipients".to_string(),
            ));
        }
        let id = Uuid::new_v4().to_string();
        if let Some(attachment) = &message.attachment {
            write_atomically(&self.dir.join(&id), &attachment.filename, &attachment.bytes).await?;
        }
        let envelope = serde_json::to_vec_pretty(message)
            .map_err(|e| Error::Internal(format!("Failed to encode mail envelope: {e}")))?;
        write_atomically(&self.dir, &format!("{id}.json"), &envelope).await?;
        tracing::debug!(message_id = %id, recipients = message.recipients.len(), "Spooled email");
        Ok(())
    }
}

#[derive(Serialize)]
struct TransferManifest<'a> {
    protocol: &'static str,
    host: &'a str,
    port: u16,
    username: &'a str,
    remote_path: String,
    file: &'a str,
}

/// Spools each transfer as `<id>.json` plus the payload under `<dir>/<id>/`.
/// The manifest omits the password; the transfer agent holds credentials.
pub struct SpoolFileTransfer {
    dir: PathBuf,
}

impl SpoolFileTransfer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl FileTransferClient for SpoolFileTransfer {
    async fn put(
        &self,
        target: &FileTransferTarget,
        bytes: &[u8],
        remote_filename: &str,
    ) -> Result<()> {
        let id = Uuid::new_v4().to_string();
        write_atomically(&self.dir.join(&id), remote_filename, bytes).await?;
        let manifest = TransferManifest {
            protocol: target.protocol.as_str(),
            host: &target.host,
            port: target.port(),
            username: &target.username,
            remote_path: target.remote_path(remote_filename),
            file: remote_filename,
        };
        let encoded = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| Error::Internal(format!("Failed to encode transfer manifest: {e}")))?;
        write_atomically(&self.dir, &format!("{id}.json"), &encoded).await?;
        tracing::debug!(transfer_id = %id, host = %target.host, "Spooled file transfer");
        Ok(())
    }
}
