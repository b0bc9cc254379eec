//! Notification sender adapters.

mod in_memory;
mod log_sender;

pub use in_memory::{RecordingNotificationSender, SentNotification};
pub use log_sender::LogNotificationSender;
