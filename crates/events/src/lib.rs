//! Completion events and webhook delivery.
//!
//! The completion handler publishes a [`bus::JobEvent`] for every terminal
//! transition; the webhook dispatcher subscribes and delivers signed
//! callbacks to frontends that registered a `webhook_url` at job creation.

pub mod bus;
pub mod webhook;

pub use bus::{EventBus, JobEvent};
pub use webhook::{WebhookDelivery, WebhookDispatcher};
