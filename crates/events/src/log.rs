//! Notifier that writes structured log lines instead of delivering.
//!
//! Useful as a default wiring when no delivery channel is configured.

use core::convert::Infallible;

use crate::notification::Notification;
use crate::notifier::Notifier;

#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

impl Notifier for LogNotifier {
    type Error = Infallible;

    fn notify(&self, notification: Notification) -> Result<(), Self::Error> {
        tracing::info!(
            kind = notification.kind(),
            payload = %serde_json::to_string(&notification).unwrap_or_default(),
            "notification"
        );
        Ok(())
    }
}
