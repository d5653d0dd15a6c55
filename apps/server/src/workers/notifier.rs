//! Owner notifications for schedules that were auto-disabled

use crate::delivery::{MailMessage, MailTransport};
use crate::models::{Schedule, SearchDefinition, User};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait OwnerNotifier: Send + Sync {
    /// Tell `owner` that `schedule` was disabled after repeated failures.
    async fn schedule_disabled(
        &self,
        owner: &User,
        definition: &SearchDefinition,
        schedule: &Schedule,
        reason: &str,
    ) -> Result<()>;
}

/// Mails the owner through the configured transport.
pub struct MailOwnerNotifier {
    mail: Arc<dyn MailTransport>,
}

impl MailOwnerNotifier {
    pub fn new(mail: Arc<dyn MailTransport>) -> Self {
        Self { mail }
    }
}

#[async_trait]
impl OwnerNotifier for MailOwnerNotifier {
    async fn schedule_disabled(
        &self,
        owner: &User,
        definition: &SearchDefinition,
        schedule: &Schedule,
        reason: &str,
    ) -> Result<()> {
        if owner.email.trim().is_empty() {
            return Err(Error::Validation(format!(
                "user {} has no email address",
                owner.id
            )));
        }
        let message = MailMessage {
            recipients: vec![owner.email.clone()],
            subject: format!("Scheduled search disabled: {}", definition.name),
            body: format!(
                "Hello {},\n\n\
                 The {} schedule for your search \"{}\" failed {} times in a row and has been \
                 disabled.\n\nLast error: {}\n\n\
                 Fix the search or its destination, then re-enable the schedule.\n",
                owner.display_name(),
                schedule.destination.mode().replace('_', " "),
                definition.name,
                schedule.consecutive_failure_count.max(1),
                reason
            ),
            attachment: None,
        };
        self.mail.send(&message).await
    }
}
