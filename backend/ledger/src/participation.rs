use std::slice;

use chrono::Utc;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::{
    Ledger,
    error::RaffleError,
    models::{RaffleTicket, TicketSource},
    store::{IssueGuard, Issued, TicketStore},
};

impl<S: TicketStore> Ledger<S> {
    /// Issues the single `participation` ticket. A repeated join is refused by the store
    /// guard and surfaces as [`RaffleError::AlreadyJoined`] without writing anything.
    pub async fn join_raffle(
        &self,
        user_id: &str,
        raffle_id: Uuid,
    ) -> Result<RaffleTicket, RaffleError> {
        let now = Utc::now();
        let raffle = self.open_raffle(raffle_id, now).await?;

        let ticket = RaffleTicket::new(
            raffle.id,
            user_id,
            TicketSource::Participation,
            json!({ "reason": "joined raffle" }),
            now,
        );

        match self
            .store
            .issue_tickets(raffle.id, user_id, slice::from_ref(&ticket), IssueGuard::FirstJoin)
            .await?
        {
            Issued::Applied { entry_count } => {
                info!("{user_id} joined raffle {raffle_id}, entry count {entry_count}");
                Ok(ticket)
            }
            Issued::Refused => Err(RaffleError::AlreadyJoined),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::{
        models::NewRaffle,
        testing::{ledger, open_raffle},
    };

    #[tokio::test]
    async fn test_join_issues_one_ticket() {
        let (ledger, _rx) = ledger();
        let raffle = open_raffle(&ledger).await;

        let ticket = ledger.join_raffle("u1", raffle.id).await.unwrap();
        assert_eq!(ticket.source, TicketSource::Participation);

        let entry = ledger.store().entry(raffle.id, "u1").await.unwrap().unwrap();
        assert_eq!(entry.entry_count, 1);
    }

    #[tokio::test]
    async fn test_join_twice_is_noop() {
        let (ledger, _rx) = ledger();
        let raffle = open_raffle(&ledger).await;

        ledger.join_raffle("u1", raffle.id).await.unwrap();
        let second = ledger.join_raffle("u1", raffle.id).await;
        assert!(matches!(second, Err(RaffleError::AlreadyJoined)));

        let tickets = ledger.store().tickets(raffle.id).await.unwrap();
        assert_eq!(tickets.len(), 1);
        assert_eq!(
            ledger.store().entry(raffle.id, "u1").await.unwrap().unwrap().entry_count,
            1
        );
    }

    #[tokio::test]
    async fn test_concurrent_joins_issue_one_ticket() {
        let (ledger, _rx) = ledger();
        let raffle = open_raffle(&ledger).await;

        let (a, b, c) = tokio::join!(
            ledger.join_raffle("u1", raffle.id),
            ledger.join_raffle("u1", raffle.id),
            ledger.join_raffle("u1", raffle.id),
        );
        let joined = [a, b, c].into_iter().filter(|r| r.is_ok()).count();

        assert_eq!(joined, 1);
        assert_eq!(ledger.store().tickets(raffle.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_join_closed_raffle() {
        let (ledger, _rx) = ledger();
        let now = Utc::now();

        let ended = ledger
            .create_raffle(NewRaffle {
                title: "Spring Raffle".to_string(),
                prize_description: String::new(),
                prize_amount: 0,
                starts_at: now - Duration::days(10),
                ends_at: now - Duration::days(3),
            })
            .await
            .unwrap();
        let upcoming = ledger
            .create_raffle(NewRaffle {
                title: "Autumn Raffle".to_string(),
                prize_description: String::new(),
                prize_amount: 0,
                starts_at: now + Duration::days(3),
                ends_at: now + Duration::days(10),
            })
            .await
            .unwrap();

        for id in [ended.id, upcoming.id] {
            let result = ledger.join_raffle("u1", id).await;
            assert!(matches!(result, Err(RaffleError::RaffleInactive)));
        }
    }

    #[tokio::test]
    async fn test_join_unknown_raffle() {
        let (ledger, _rx) = ledger();

        let result = ledger.join_raffle("u1", Uuid::new_v4()).await;
        assert!(matches!(result, Err(RaffleError::RaffleNotFound)));
    }
}
