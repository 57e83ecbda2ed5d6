//! In-memory notifier for tests/dev.

use std::sync::Mutex;

use crate::notification::Notification;
use crate::notifier::Notifier;

#[derive(Debug)]
pub enum InMemoryNotifierError {
    /// Delivery failed due to internal lock poisoning.
    Poisoned,
}

/// Collects notifications instead of delivering them.
#[derive(Debug, Default)]
pub struct InMemoryNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything delivered so far, in order.
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl Notifier for InMemoryNotifier {
    type Error = InMemoryNotifierError;

    fn notify(&self, notification: Notification) -> Result<(), Self::Error> {
        let mut sent = self
            .sent
            .lock()
            .map_err(|_| InMemoryNotifierError::Poisoned)?;
        sent.push(notification);
        Ok(())
    }
}
