//! # Notifications
//!
//! Emails are best-effort. Operations drop a [`Notification`] in the outbox and move on;
//! whoever holds the receiving end delivers it. Delivery never decides whether a ticket
//! was issued.
use serde::Serialize;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::warn;
use uuid::Uuid;

use crate::models::TaskType;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    Verification {
        user_id: String,
        task_type: TaskType,
        username: String,
        raffle_title: String,
    },
    WinnerAnnouncement {
        raffle_id: Uuid,
        raffle_title: String,
        winner_id: String,
        recipients: Vec<String>,
    },
}

#[derive(Clone)]
pub struct Outbox {
    sender: UnboundedSender<Notification>,
}

impl Outbox {
    pub fn channel() -> (Self, UnboundedReceiver<Notification>) {
        let (sender, receiver) = unbounded_channel();

        (Self { sender }, receiver)
    }

    pub fn send(&self, notification: Notification) {
        if let Err(e) = self.sender.send(notification) {
            warn!("Notification outbox closed, dropping {:?}", e.0);
        }
    }
}
