//! # Store Selection
//!
//! `REDIS_URL=memory` keeps the ledger in process, handy for local runs. Anything else is a
//! Redis URL and the ledger lives in Redis.
//!
//! ## Redis
//!
//! - Hashes for raffles, entries and tasks, one list per raffle for tickets
//! - Lua scripts keep each ticket append and its entry update in one atomic step
//! - Entry counts are derived, the audit endpoint rebuilds them from the ticket lists
use chrono::{DateTime, Utc};
use ledger::{
    MemoryStore, RedisStore, StoreError, TicketStore,
    aggregate::Reconciliation,
    models::{Raffle, RaffleEntry, RaffleTask, RaffleTicket, TaskType},
    store::{IssueGuard, Issued, Removal, TaskCompletion, Verification},
};
use tracing::info;
use uuid::Uuid;

use crate::config::MEMORY_STORE;

pub enum Backend {
    Memory(MemoryStore),
    Redis(RedisStore),
}

pub async fn init_store(redis_url: &str) -> Result<Backend, StoreError> {
    if redis_url == MEMORY_STORE {
        info!("Using in-process store");
        return Ok(Backend::Memory(MemoryStore::new()));
    }

    info!("Connecting to Redis...");
    Ok(Backend::Redis(RedisStore::connect(redis_url).await?))
}

macro_rules! dispatch {
    ($self:ident, $store:ident => $call:expr) => {
        match $self {
            Backend::Memory($store) => $call.await,
            Backend::Redis($store) => $call.await,
        }
    };
}

impl TicketStore for Backend {
    async fn save_raffle(&self, raffle: &Raffle) -> Result<(), StoreError> {
        dispatch!(self, s => s.save_raffle(raffle))
    }

    async fn raffle(&self, id: Uuid) -> Result<Option<Raffle>, StoreError> {
        dispatch!(self, s => s.raffle(id))
    }

    async fn swap_raffle(&self, expected: &Raffle, raffle: &Raffle) -> Result<bool, StoreError> {
        dispatch!(self, s => s.swap_raffle(expected, raffle))
    }

    async fn raffles(&self) -> Result<Vec<Raffle>, StoreError> {
        dispatch!(self, s => s.raffles())
    }

    async fn issue_tickets(
        &self,
        raffle_id: Uuid,
        user_id: &str,
        tickets: &[RaffleTicket],
        guard: IssueGuard,
    ) -> Result<Issued, StoreError> {
        dispatch!(self, s => s.issue_tickets(raffle_id, user_id, tickets, guard))
    }

    async fn entry(&self, raffle_id: Uuid, user_id: &str) -> Result<Option<RaffleEntry>, StoreError> {
        dispatch!(self, s => s.entry(raffle_id, user_id))
    }

    async fn tickets(&self, raffle_id: Uuid) -> Result<Vec<RaffleTicket>, StoreError> {
        dispatch!(self, s => s.tickets(raffle_id))
    }

    async fn user_tickets(
        &self,
        raffle_id: Uuid,
        user_id: &str,
    ) -> Result<Vec<RaffleTicket>, StoreError> {
        dispatch!(self, s => s.user_tickets(raffle_id, user_id))
    }

    async fn task(&self, task_id: Uuid) -> Result<Option<RaffleTask>, StoreError> {
        dispatch!(self, s => s.task(task_id))
    }

    async fn find_task(
        &self,
        raffle_id: Uuid,
        user_id: &str,
        task_type: &TaskType,
    ) -> Result<Option<RaffleTask>, StoreError> {
        dispatch!(self, s => s.find_task(raffle_id, user_id, task_type))
    }

    async fn tasks(&self, raffle_id: Uuid) -> Result<Vec<RaffleTask>, StoreError> {
        dispatch!(self, s => s.tasks(raffle_id))
    }

    async fn swap_task(
        &self,
        expected: Option<&RaffleTask>,
        task: &RaffleTask,
    ) -> Result<bool, StoreError> {
        dispatch!(self, s => s.swap_task(expected, task))
    }

    async fn complete_task(
        &self,
        task: &RaffleTask,
        ticket: &RaffleTicket,
    ) -> Result<TaskCompletion, StoreError> {
        dispatch!(self, s => s.complete_task(task, ticket))
    }

    async fn verify_task(
        &self,
        task_id: Uuid,
        tickets: &[RaffleTicket],
        now: DateTime<Utc>,
    ) -> Result<Verification, StoreError> {
        dispatch!(self, s => s.verify_task(task_id, tickets, now))
    }

    async fn reconcile(&self, raffle_id: Uuid) -> Result<Vec<Reconciliation>, StoreError> {
        dispatch!(self, s => s.reconcile(raffle_id))
    }

    async fn remove_participant(&self, raffle_id: Uuid, user_id: &str) -> Result<Removal, StoreError> {
        dispatch!(self, s => s.remove_participant(raffle_id, user_id))
    }
}
