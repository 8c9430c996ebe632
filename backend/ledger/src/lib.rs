//! # Raffle Ledger
//!
//! Ticket and entry bookkeeping for platform raffles.
//!
//!
//!
//! ## Flow
//!
//! - User joins a raffle, gets exactly one `participation` ticket
//! - User completes a learning task, gets one `task_completion` ticket
//! - User submits a social handle, an admin verifies it, the user gets two `verification` tickets
//! - Admin audits a raffle, drifted entry counts are rewritten from the tickets
//! - Admin repairs known under-counts with `admin_correction` tickets
//! - Admin draws a winner, one ticket is one chance
//!
//!
//!
//! ## Consistency
//!
//! Tickets are the source of truth. `entry_count` is a cache of the ticket total, updated in
//! the same atomic step as every ticket insert (see [`aggregate`]). The audit exists to repair
//! rows written before that rule held, it is not the primary mechanism.
//!
//! Retried calls are safe: a second join is refused by the store guard, a second
//! verification of the same task finds it already `verified` and issues nothing.
use tokio::sync::mpsc::UnboundedReceiver;

pub mod aggregate;
pub mod audit;
pub mod error;
pub mod models;
pub mod notify;
pub mod participation;
pub mod raffles;
pub mod repair;
pub mod store;
pub mod tasks;
pub mod utils;
pub mod winner;

pub use error::{RaffleError, StoreError};
pub use notify::{Notification, Outbox};
pub use store::{MemoryStore, RedisStore, TicketStore};

pub struct Ledger<S> {
    store: S,
    outbox: Outbox,
}

impl<S: TicketStore> Ledger<S> {
    pub fn new(store: S, outbox: Outbox) -> Self {
        Self { store, outbox }
    }

    /// Ledger whose notifications are handed back to the caller.
    pub fn with_receiver(store: S) -> (Self, UnboundedReceiver<Notification>) {
        let (outbox, receiver) = Outbox::channel();

        (Self::new(store, outbox), receiver)
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use chrono::{Duration, Utc};
    use tokio::sync::mpsc::UnboundedReceiver;

    use crate::{
        Ledger, MemoryStore, Notification, TicketStore,
        models::{NewRaffle, Raffle},
    };

    pub fn ledger() -> (Ledger<MemoryStore>, UnboundedReceiver<Notification>) {
        Ledger::with_receiver(MemoryStore::new())
    }

    pub async fn open_raffle<S: TicketStore>(ledger: &Ledger<S>) -> Raffle {
        let now = Utc::now();

        ledger
            .create_raffle(NewRaffle {
                title: "Summer Yield Raffle".to_string(),
                prize_description: "Hardware wallet".to_string(),
                prize_amount: 15_000,
                starts_at: now - Duration::hours(1),
                ends_at: now + Duration::days(7),
            })
            .await
            .unwrap()
    }
}
