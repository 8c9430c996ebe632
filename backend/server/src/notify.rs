//! # Email Dispatch
//!
//! Drains the ledger outbox. With `NOTIFY_WEBHOOK_URL` set every notification is POSTed as
//! JSON to the mail service behind it, otherwise it is only logged. Failures are logged and
//! dropped, nothing is retried.
use std::time::Duration;

use ledger::Notification;
use reqwest::Client;
use tokio::{sync::mpsc::UnboundedReceiver, task::JoinHandle};
use tracing::{info, warn};

pub struct Webhook {
    client: Client,
    url: String,
    token: Option<String>,
}

impl Webhook {
    pub fn new(url: String, token: Option<String>) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;

        Ok(Self { client, url, token })
    }

    async fn deliver(&self, notification: &Notification) -> Result<(), reqwest::Error> {
        let mut request = self.client.post(&self.url).json(notification);

        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        request.send().await?.error_for_status()?;

        Ok(())
    }
}

pub fn spawn_dispatcher(
    mut receiver: UnboundedReceiver<Notification>,
    webhook: Option<Webhook>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(notification) = receiver.recv().await {
            let Some(webhook) = &webhook else {
                info!("Notification (not delivered, no webhook): {notification:?}");
                continue;
            };

            if let Err(e) = webhook.deliver(&notification).await {
                warn!("Failed to deliver {notification:?}: {e}");
            }
        }

        info!("Notification outbox closed");
    })
}
