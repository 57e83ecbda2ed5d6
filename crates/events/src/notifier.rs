use std::sync::Arc;

use crate::notification::Notification;

/// Outbound notification port (fire-and-forget).
///
/// Implementations deliver to a channel (messenger bot, e-mail, a test
/// sink). Callers invoke this only after their transaction commits, never
/// while holding a stock lock, and treat errors as log-and-continue: a
/// failed delivery must not fail the request that caused it.
pub trait Notifier: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn notify(&self, notification: Notification) -> Result<(), Self::Error>;
}

impl<N> Notifier for Arc<N>
where
    N: Notifier + ?Sized,
{
    type Error = N::Error;

    fn notify(&self, notification: Notification) -> Result<(), Self::Error> {
        (**self).notify(notification)
    }
}
