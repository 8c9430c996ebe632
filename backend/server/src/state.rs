use std::sync::Arc;

use ledger::{Ledger, Outbox};

use super::{
    config::Config,
    database::{Backend, init_store},
    error::AppError,
    notify::{Webhook, spawn_dispatcher},
};

pub struct State {
    pub config: Config,
    pub ledger: Ledger<Backend>,
}

impl State {
    pub async fn new() -> Result<Arc<Self>, AppError> {
        let config = Config::load()?;

        let store = init_store(&config.redis_url).await?;

        let webhook = config
            .notify_webhook_url
            .clone()
            .map(|url| Webhook::new(url, config.notify_webhook_token.clone()))
            .transpose()
            .map_err(|e| AppError::Config(format!("Notification client: {e}")))?;

        let (outbox, receiver) = Outbox::channel();
        spawn_dispatcher(receiver, webhook);

        Ok(Arc::new(Self {
            config,
            ledger: Ledger::new(store, outbox),
        }))
    }
}
