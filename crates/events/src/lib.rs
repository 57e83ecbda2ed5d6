//! Notification events and the outbound notification port.
//!
//! The core never talks to a delivery channel directly: it reports that a
//! notification-worthy change occurred, strictly **after** the owning
//! transaction has committed, and a [`Notifier`] implementation carries it
//! out. Delivery is fire-and-forget; failures are logged by the caller and
//! never surfaced to the request that triggered them.

pub mod in_memory;
pub mod log;
pub mod notification;
pub mod notifier;

pub use in_memory::InMemoryNotifier;
pub use log::LogNotifier;
pub use notification::{LineSummary, Notification};
pub use notifier::Notifier;
