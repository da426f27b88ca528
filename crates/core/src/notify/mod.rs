//! Lifecycle notifications.
//!
//! Controllers emit events through a cloneable [`NotifyHandle`]. A single
//! [`NotificationDispatcher`] task persists each event to the notification
//! log and then fans it out to every registered [`NotificationSink`].

mod dispatcher;
mod events;
mod handle;
mod sink;
mod sqlite;
mod store;

pub use dispatcher::{create_notification_system, NotificationDispatcher};
pub use events::{NotificationEvent, NotificationRecord};
pub use handle::{NotificationEnvelope, NotifyHandle};
pub use sink::{LogSink, NotificationSink};
pub use sqlite::SqliteNotificationStore;
pub use store::{NotificationFilter, NotificationStore, NotifyError};
