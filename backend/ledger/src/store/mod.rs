//! # Ticket Store
//!
//! Persistence seam for raffles, tickets, entries and tasks.
//!
//! Every ticket write goes through the entry trigger atomically with the append, so a
//! successful insert always leaves `entry_count` matching the ticket total. Guards are
//! evaluated inside the same atomic step, which is what makes joins and verifications
//! safe to retry.
use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    aggregate::Reconciliation,
    error::StoreError,
    models::{Raffle, RaffleEntry, RaffleTask, RaffleTicket, TaskType},
};

pub mod memory;
pub mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

/// Precondition checked atomically with a ticket insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueGuard {
    /// The pair has neither an entry nor any ticket.
    FirstJoin,
    /// The pair currently holds exactly this many tickets.
    Holding(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Issued {
    Applied { entry_count: u64 },
    Refused,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskCompletion {
    Issued { task: RaffleTask, entry_count: u64 },
    NotParticipating,
    AlreadyCompleted,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verification {
    /// `submitted -> verified`, tickets issued.
    Verified { task: RaffleTask, entry_count: u64 },
    /// `submitted -> verified` after a username change, tickets were already granted.
    Reverified { task: RaffleTask },
    AlreadyVerified { task: RaffleTask },
    NotSubmitted { task: RaffleTask },
    NotFound,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Removal {
    pub tickets: u64,
    pub tasks: u64,
    pub entry: bool,
}

pub trait TicketStore: Send + Sync {
    fn save_raffle(&self, raffle: &Raffle) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn raffle(&self, id: Uuid) -> impl Future<Output = Result<Option<Raffle>, StoreError>> + Send;

    /// Replaces the raffle only if the stored record still equals `expected`.
    fn swap_raffle(
        &self,
        expected: &Raffle,
        raffle: &Raffle,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    fn raffles(&self) -> impl Future<Output = Result<Vec<Raffle>, StoreError>> + Send;

    /// Appends tickets for a single (raffle, user) pair and sets the entry to the ticket total.
    fn issue_tickets(
        &self,
        raffle_id: Uuid,
        user_id: &str,
        tickets: &[RaffleTicket],
        guard: IssueGuard,
    ) -> impl Future<Output = Result<Issued, StoreError>> + Send;

    fn entry(
        &self,
        raffle_id: Uuid,
        user_id: &str,
    ) -> impl Future<Output = Result<Option<RaffleEntry>, StoreError>> + Send;

    fn tickets(
        &self,
        raffle_id: Uuid,
    ) -> impl Future<Output = Result<Vec<RaffleTicket>, StoreError>> + Send;

    fn user_tickets(
        &self,
        raffle_id: Uuid,
        user_id: &str,
    ) -> impl Future<Output = Result<Vec<RaffleTicket>, StoreError>> + Send;

    fn task(&self, task_id: Uuid)
    -> impl Future<Output = Result<Option<RaffleTask>, StoreError>> + Send;

    fn find_task(
        &self,
        raffle_id: Uuid,
        user_id: &str,
        task_type: &TaskType,
    ) -> impl Future<Output = Result<Option<RaffleTask>, StoreError>> + Send;

    fn tasks(&self, raffle_id: Uuid)
    -> impl Future<Output = Result<Vec<RaffleTask>, StoreError>> + Send;

    /// Replaces the task only if the stored row still equals `expected`.
    fn swap_task(
        &self,
        expected: Option<&RaffleTask>,
        task: &RaffleTask,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Marks a non-social task completed and issues its ticket, participants only.
    fn complete_task(
        &self,
        task: &RaffleTask,
        ticket: &RaffleTicket,
    ) -> impl Future<Output = Result<TaskCompletion, StoreError>> + Send;

    /// Compare-and-swap `submitted -> verified`. The tickets are issued only on the
    /// first verification of the task.
    fn verify_task(
        &self,
        task_id: Uuid,
        tickets: &[RaffleTicket],
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Verification, StoreError>> + Send;

    /// Recomputes every entry of the raffle from its tickets in one atomic step.
    fn reconcile(
        &self,
        raffle_id: Uuid,
    ) -> impl Future<Output = Result<Vec<Reconciliation>, StoreError>> + Send;

    fn remove_participant(
        &self,
        raffle_id: Uuid,
        user_id: &str,
    ) -> impl Future<Output = Result<Removal, StoreError>> + Send;
}
