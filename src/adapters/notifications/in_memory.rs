//! Recording notification sender for tests.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::foundation::{DomainError, ErrorCode, Timestamp, UserId};
use crate::ports::NotificationSender;

/// One recorded notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentNotification {
    CancellationScheduled {
        user_id: UserId,
        effective_at: Timestamp,
    },
    SubscriptionEnded {
        user_id: UserId,
    },
    TrialExpiringSoon {
        user_id: UserId,
        trial_ends_at: Timestamp,
    },
}

/// Records notifications instead of sending them; can be told to fail so
/// tests can assert that notification failures never affect command results.
#[derive(Default)]
pub struct RecordingNotificationSender {
    sent: Mutex<Vec<SentNotification>>,
    fail: bool,
}

impl RecordingNotificationSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sender whose every call fails.
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    /// All recorded notifications, in send order.
    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().unwrap().clone()
    }

    fn record(&self, notification: SentNotification) -> Result<(), DomainError> {
        if self.fail {
            return Err(DomainError::new(
                ErrorCode::InternalError,
                "Simulated notification failure",
            ));
        }
        self.sent.lock().unwrap().push(notification);
        Ok(())
    }
}

#[async_trait]
impl NotificationSender for RecordingNotificationSender {
    async fn cancellation_scheduled(
        &self,
        user_id: &UserId,
        effective_at: Timestamp,
    ) -> Result<(), DomainError> {
        self.record(SentNotification::CancellationScheduled {
            user_id: *user_id,
            effective_at,
        })
    }

    async fn subscription_ended(&self, user_id: &UserId) -> Result<(), DomainError> {
        self.record(SentNotification::SubscriptionEnded { user_id: *user_id })
    }

    async fn trial_expiring_soon(
        &self,
        user_id: &UserId,
        trial_ends_at: Timestamp,
    ) -> Result<(), DomainError> {
        self.record(SentNotification::TrialExpiringSoon {
            user_id: *user_id,
            trial_ends_at,
        })
    }
}
