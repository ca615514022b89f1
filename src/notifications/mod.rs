//! Reason-routed webhook notifications.
//!
//! [`NotificationRouter`] decides what to send and where; a
//! [`NotificationTransport`] delivers the resulting messages.

mod models;
mod router;
mod transport;

pub use models::{
    Destination, DestinationType, NotificationEvent, OutboundMessage, ReasonFilter,
    DEFAULT_TEMPLATE,
};
pub use router::NotificationRouter;
pub use transport::{NotificationTransport, WebhookTransport};
