//! In-process store. Each operation runs under one lock, which plays the role of the
//! transaction around a ticket insert and its entry trigger.
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{IssueGuard, Issued, Removal, TaskCompletion, TicketStore, Verification};
use crate::{
    aggregate::{self, Reconciliation},
    error::StoreError,
    models::{Raffle, RaffleEntry, RaffleTask, RaffleTicket, TaskType, VerificationStatus},
};

#[derive(Default)]
struct Book {
    entries: HashMap<String, u64>,
    tickets: Vec<RaffleTicket>,
    tasks: HashMap<(String, TaskType), RaffleTask>,
}

impl Book {
    fn held(&self, user_id: &str) -> u64 {
        self.tickets.iter().filter(|t| t.user_id == user_id).count() as u64
    }

    fn append(&mut self, user_id: &str, tickets: &[RaffleTicket]) -> u64 {
        self.tickets.extend_from_slice(tickets);
        let held = self.held(user_id);

        aggregate::settle(&mut self.entries, user_id, held)
    }
}

#[derive(Default)]
struct Tables {
    raffles: HashMap<Uuid, Raffle>,
    books: HashMap<Uuid, Book>,
    task_index: HashMap<Uuid, (Uuid, String, TaskType)>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Writes a ticket without the entry trigger, reproducing drift from older data.
    #[cfg(test)]
    pub(crate) fn insert_untracked(&self, ticket: RaffleTicket) {
        let mut tables = self.lock().unwrap();
        tables
            .books
            .entry(ticket.raffle_id)
            .or_default()
            .tickets
            .push(ticket);
    }

    #[cfg(test)]
    pub(crate) fn force_entry_count(&self, raffle_id: Uuid, user_id: &str, count: u64) {
        let mut tables = self.lock().unwrap();
        tables
            .books
            .entry(raffle_id)
            .or_default()
            .entries
            .insert(user_id.to_string(), count);
    }
}

impl TicketStore for MemoryStore {
    async fn save_raffle(&self, raffle: &Raffle) -> Result<(), StoreError> {
        self.lock()?.raffles.insert(raffle.id, raffle.clone());
        Ok(())
    }

    async fn raffle(&self, id: Uuid) -> Result<Option<Raffle>, StoreError> {
        Ok(self.lock()?.raffles.get(&id).cloned())
    }

    async fn swap_raffle(&self, expected: &Raffle, raffle: &Raffle) -> Result<bool, StoreError> {
        let mut tables = self.lock()?;

        if tables.raffles.get(&raffle.id) != Some(expected) {
            return Ok(false);
        }

        tables.raffles.insert(raffle.id, raffle.clone());
        Ok(true)
    }

    async fn raffles(&self) -> Result<Vec<Raffle>, StoreError> {
        let mut raffles: Vec<Raffle> = self.lock()?.raffles.values().cloned().collect();
        raffles.sort_by_key(|r| r.created_at);

        Ok(raffles)
    }

    async fn issue_tickets(
        &self,
        raffle_id: Uuid,
        user_id: &str,
        tickets: &[RaffleTicket],
        guard: IssueGuard,
    ) -> Result<Issued, StoreError> {
        let mut tables = self.lock()?;
        let book = tables.books.entry(raffle_id).or_default();

        let allowed = match guard {
            IssueGuard::FirstJoin => {
                !book.entries.contains_key(user_id) && book.held(user_id) == 0
            }
            IssueGuard::Holding(expected) => book.held(user_id) == expected,
        };

        if !allowed {
            return Ok(Issued::Refused);
        }

        let entry_count = book.append(user_id, tickets);

        Ok(Issued::Applied { entry_count })
    }

    async fn entry(&self, raffle_id: Uuid, user_id: &str) -> Result<Option<RaffleEntry>, StoreError> {
        let tables = self.lock()?;

        Ok(tables
            .books
            .get(&raffle_id)
            .and_then(|book| book.entries.get(user_id))
            .map(|&entry_count| RaffleEntry {
                raffle_id,
                user_id: user_id.to_string(),
                entry_count,
            }))
    }

    async fn tickets(&self, raffle_id: Uuid) -> Result<Vec<RaffleTicket>, StoreError> {
        Ok(self
            .lock()?
            .books
            .get(&raffle_id)
            .map(|book| book.tickets.clone())
            .unwrap_or_default())
    }

    async fn user_tickets(
        &self,
        raffle_id: Uuid,
        user_id: &str,
    ) -> Result<Vec<RaffleTicket>, StoreError> {
        let tables = self.lock()?;

        Ok(tables
            .books
            .get(&raffle_id)
            .map(|book| {
                book.tickets
                    .iter()
                    .filter(|t| t.user_id == user_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn task(&self, task_id: Uuid) -> Result<Option<RaffleTask>, StoreError> {
        let tables = self.lock()?;
        let Some((raffle_id, user_id, task_type)) = tables.task_index.get(&task_id) else {
            return Ok(None);
        };

        Ok(tables
            .books
            .get(raffle_id)
            .and_then(|book| book.tasks.get(&(user_id.clone(), task_type.clone())))
            .cloned())
    }

    async fn find_task(
        &self,
        raffle_id: Uuid,
        user_id: &str,
        task_type: &TaskType,
    ) -> Result<Option<RaffleTask>, StoreError> {
        let tables = self.lock()?;

        Ok(tables
            .books
            .get(&raffle_id)
            .and_then(|book| book.tasks.get(&(user_id.to_string(), task_type.clone())))
            .cloned())
    }

    async fn tasks(&self, raffle_id: Uuid) -> Result<Vec<RaffleTask>, StoreError> {
        let tables = self.lock()?;

        Ok(tables
            .books
            .get(&raffle_id)
            .map(|book| book.tasks.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn swap_task(
        &self,
        expected: Option<&RaffleTask>,
        task: &RaffleTask,
    ) -> Result<bool, StoreError> {
        let mut tables = self.lock()?;
        let key = (task.user_id.clone(), task.task_type.clone());
        let book = tables.books.entry(task.raffle_id).or_default();

        if book.tasks.get(&key) != expected {
            return Ok(false);
        }

        book.tasks.insert(key.clone(), task.clone());
        tables
            .task_index
            .insert(task.id, (task.raffle_id, key.0, key.1));

        Ok(true)
    }

    async fn complete_task(
        &self,
        task: &RaffleTask,
        ticket: &RaffleTicket,
    ) -> Result<TaskCompletion, StoreError> {
        let mut tables = self.lock()?;
        let key = (task.user_id.clone(), task.task_type.clone());
        let book = tables.books.entry(task.raffle_id).or_default();

        if !book.entries.contains_key(&task.user_id) {
            return Ok(TaskCompletion::NotParticipating);
        }

        if book.tasks.get(&key).is_some_and(|t| t.completed) {
            return Ok(TaskCompletion::AlreadyCompleted);
        }

        book.tasks.insert(key.clone(), task.clone());
        let entry_count = book.append(&task.user_id, std::slice::from_ref(ticket));
        tables
            .task_index
            .insert(task.id, (task.raffle_id, key.0, key.1));

        Ok(TaskCompletion::Issued {
            task: task.clone(),
            entry_count,
        })
    }

    async fn verify_task(
        &self,
        task_id: Uuid,
        tickets: &[RaffleTicket],
        now: DateTime<Utc>,
    ) -> Result<Verification, StoreError> {
        let mut tables = self.lock()?;
        let Some((raffle_id, user_id, task_type)) = tables.task_index.get(&task_id).cloned() else {
            return Ok(Verification::NotFound);
        };

        let book = tables.books.entry(raffle_id).or_default();
        let Some(task) = book.tasks.get_mut(&(user_id, task_type)) else {
            return Ok(Verification::NotFound);
        };

        match task.status {
            VerificationStatus::Pending => {
                return Ok(Verification::NotSubmitted { task: task.clone() });
            }
            VerificationStatus::Verified => {
                return Ok(Verification::AlreadyVerified { task: task.clone() });
            }
            VerificationStatus::Submitted => {}
        }

        task.status = VerificationStatus::Verified;
        task.completed = true;
        task.verified_at = Some(now);

        if task.rewarded {
            return Ok(Verification::Reverified { task: task.clone() });
        }

        task.rewarded = true;
        let task = task.clone();
        let entry_count = book.append(&task.user_id, tickets);

        Ok(Verification::Verified { task, entry_count })
    }

    async fn reconcile(&self, raffle_id: Uuid) -> Result<Vec<Reconciliation>, StoreError> {
        let mut tables = self.lock()?;
        let book = tables.books.entry(raffle_id).or_default();

        Ok(aggregate::reconcile(&mut book.entries, &book.tickets))
    }

    async fn remove_participant(&self, raffle_id: Uuid, user_id: &str) -> Result<Removal, StoreError> {
        let mut tables = self.lock()?;
        let Some(book) = tables.books.get_mut(&raffle_id) else {
            return Ok(Removal::default());
        };

        let before = book.tickets.len();
        book.tickets.retain(|t| t.user_id != user_id);
        let tickets = (before - book.tickets.len()) as u64;

        let entry = book.entries.remove(user_id).is_some();

        let mut removed_ids = Vec::new();
        book.tasks.retain(|(owner, _), task| {
            if owner == user_id {
                removed_ids.push(task.id);
                false
            } else {
                true
            }
        });

        for id in &removed_ids {
            tables.task_index.remove(id);
        }

        Ok(Removal {
            tickets,
            tasks: removed_ids.len() as u64,
            entry,
        })
    }
}
