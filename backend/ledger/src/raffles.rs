use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::{
    Ledger,
    error::{RaffleError, StoreError},
    models::{NewRaffle, Raffle, RaffleTask, TicketSource},
    store::{Removal, TicketStore},
};

const SWAP_ATTEMPTS: usize = 3;

/// A user's standing in one raffle, counted from the tickets themselves.
#[derive(Debug, Clone, Serialize)]
pub struct EntryStatus {
    pub raffle_id: Uuid,
    pub user_id: String,
    pub joined: bool,
    /// Cached count on the entry row.
    pub entry_count: Option<u64>,
    pub ticket_count: u64,
    pub by_source: BTreeMap<TicketSource, u64>,
    pub tasks: Vec<RaffleTask>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RemovedParticipant {
    pub tickets_removed: u64,
    pub tasks_removed: u64,
    pub entry_removed: bool,
}

impl From<Removal> for RemovedParticipant {
    fn from(removal: Removal) -> Self {
        Self {
            tickets_removed: removal.tickets,
            tasks_removed: removal.tasks,
            entry_removed: removal.entry,
        }
    }
}

impl<S: TicketStore> Ledger<S> {
    pub async fn create_raffle(&self, new: NewRaffle) -> Result<Raffle, RaffleError> {
        let title = new.title.trim();

        if title.is_empty() {
            return Err(RaffleError::Invalid("title is required".to_string()));
        }

        if new.ends_at <= new.starts_at {
            return Err(RaffleError::Invalid(
                "ends_at must be after starts_at".to_string(),
            ));
        }

        let raffle = Raffle {
            id: Uuid::new_v4(),
            title: title.to_string(),
            prize_description: new.prize_description,
            prize_amount: new.prize_amount,
            starts_at: new.starts_at,
            ends_at: new.ends_at,
            active: true,
            winner: None,
            created_at: Utc::now(),
        };

        self.store.save_raffle(&raffle).await?;
        info!("Created raffle {} ({})", raffle.id, raffle.title);

        Ok(raffle)
    }

    pub async fn raffle(&self, raffle_id: Uuid) -> Result<Raffle, RaffleError> {
        self.store
            .raffle(raffle_id)
            .await?
            .ok_or(RaffleError::RaffleNotFound)
    }

    pub async fn raffles(&self) -> Result<Vec<Raffle>, RaffleError> {
        Ok(self.store.raffles().await?)
    }

    /// Administrative termination. Tickets stay in place.
    pub async fn end_raffle(&self, raffle_id: Uuid) -> Result<Raffle, RaffleError> {
        let raffle = self
            .update_raffle(raffle_id, |raffle| raffle.active = false)
            .await?;
        info!("Ended raffle {raffle_id}");

        Ok(raffle)
    }

    /// Applies `change` to the latest stored raffle and writes it back only if nobody else
    /// wrote in between, so concurrent updates to different fields both survive.
    pub(crate) async fn update_raffle<F>(
        &self,
        raffle_id: Uuid,
        change: F,
    ) -> Result<Raffle, RaffleError>
    where
        F: Fn(&mut Raffle) + Send,
    {
        for _ in 0..SWAP_ATTEMPTS {
            let current = self.raffle(raffle_id).await?;

            let mut raffle = current.clone();
            change(&mut raffle);

            if raffle == current || self.store.swap_raffle(&current, &raffle).await? {
                return Ok(raffle);
            }
        }

        Err(StoreError::Contention.into())
    }

    pub(crate) async fn open_raffle(
        &self,
        raffle_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Raffle, RaffleError> {
        let raffle = self.raffle(raffle_id).await?;

        if !raffle.is_open(now) {
            return Err(RaffleError::RaffleInactive);
        }

        Ok(raffle)
    }

    pub async fn entry_status(
        &self,
        user_id: &str,
        raffle_id: Uuid,
    ) -> Result<EntryStatus, RaffleError> {
        self.raffle(raffle_id).await?;

        let entry = self.store.entry(raffle_id, user_id).await?;
        let tickets = self.store.user_tickets(raffle_id, user_id).await?;

        let mut by_source = BTreeMap::new();
        for ticket in &tickets {
            *by_source.entry(ticket.source).or_insert(0) += 1;
        }

        let mut tasks: Vec<RaffleTask> = self
            .store
            .tasks(raffle_id)
            .await?
            .into_iter()
            .filter(|t| t.user_id == user_id)
            .collect();
        tasks.sort_by(|a, b| a.task_type.as_str().cmp(b.task_type.as_str()));

        Ok(EntryStatus {
            raffle_id,
            user_id: user_id.to_string(),
            joined: entry.is_some() || !tickets.is_empty(),
            entry_count: entry.map(|e| e.entry_count),
            ticket_count: tickets.len() as u64,
            by_source,
            tasks,
        })
    }

    /// Testing utility for admins: wipes the caller's tickets, entry and tasks in one raffle.
    pub async fn remove_self_from_raffle(
        &self,
        user_id: &str,
        raffle_id: Uuid,
    ) -> Result<RemovedParticipant, RaffleError> {
        self.raffle(raffle_id).await?;

        let removal = self.store.remove_participant(raffle_id, user_id).await?;
        info!(
            "Removed {user_id} from raffle {raffle_id}: {} tickets, {} tasks",
            removal.tickets, removal.tasks
        );

        Ok(removal.into())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::testing::{ledger, open_raffle};

    #[tokio::test]
    async fn test_create_raffle_validates() {
        let (ledger, _rx) = ledger();
        let now = Utc::now();

        let blank = ledger
            .create_raffle(NewRaffle {
                title: "  ".to_string(),
                prize_description: String::new(),
                prize_amount: 0,
                starts_at: now,
                ends_at: now + Duration::days(1),
            })
            .await;
        assert!(matches!(blank, Err(RaffleError::Invalid(_))));

        let backwards = ledger
            .create_raffle(NewRaffle {
                title: "Backwards".to_string(),
                prize_description: String::new(),
                prize_amount: 0,
                starts_at: now,
                ends_at: now - Duration::days(1),
            })
            .await;
        assert!(matches!(backwards, Err(RaffleError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_end_raffle_closes_joins() {
        let (ledger, _rx) = ledger();
        let raffle = open_raffle(&ledger).await;

        let ended = ledger.end_raffle(raffle.id).await.unwrap();
        assert!(!ended.active);

        let result = ledger.join_raffle("u1", raffle.id).await;
        assert!(matches!(result, Err(RaffleError::RaffleInactive)));
    }

    #[tokio::test]
    async fn test_end_raffle_keeps_drawn_winner() {
        let (ledger, _rx) = ledger();
        let raffle = open_raffle(&ledger).await;

        ledger.join_raffle("u1", raffle.id).await.unwrap();
        let drawn = ledger.select_winner(raffle.id).await.unwrap();

        let ended = ledger.end_raffle(raffle.id).await.unwrap();
        assert_eq!(ended.winner.as_deref(), Some(drawn.user_id.as_str()));
        assert_eq!(
            ledger.raffle(raffle.id).await.unwrap().winner.as_deref(),
            Some("u1")
        );
    }

    #[tokio::test]
    async fn test_stale_raffle_write_is_refused() {
        let (ledger, _rx) = ledger();
        let raffle = open_raffle(&ledger).await;

        let stale = ledger.raffle(raffle.id).await.unwrap();
        ledger.join_raffle("u1", raffle.id).await.unwrap();
        ledger.select_winner(raffle.id).await.unwrap();

        let mut overwrite = stale.clone();
        overwrite.active = false;
        assert!(!ledger.store().swap_raffle(&stale, &overwrite).await.unwrap());

        let stored = ledger.raffle(raffle.id).await.unwrap();
        assert_eq!(stored.winner.as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn test_remove_self_clears_everything() {
        let (ledger, _rx) = ledger();
        let raffle = open_raffle(&ledger).await;

        ledger.join_raffle("admin", raffle.id).await.unwrap();
        ledger
            .submit_task_username("admin", raffle.id, "instagram", "@admin")
            .await
            .unwrap();
        ledger.join_raffle("other", raffle.id).await.unwrap();

        let removed = ledger
            .remove_self_from_raffle("admin", raffle.id)
            .await
            .unwrap();
        assert_eq!(removed.tickets_removed, 1);
        assert_eq!(removed.tasks_removed, 1);
        assert!(removed.entry_removed);

        let status = ledger.entry_status("admin", raffle.id).await.unwrap();
        assert!(!status.joined);
        assert!(status.tasks.is_empty());

        // can join again afterwards
        ledger.join_raffle("admin", raffle.id).await.unwrap();
        assert_eq!(ledger.store().tickets(raffle.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_raffle() {
        let (ledger, _rx) = ledger();

        let result = ledger.entry_status("u1", Uuid::new_v4()).await;
        assert!(matches!(result, Err(RaffleError::RaffleNotFound)));
    }
}
