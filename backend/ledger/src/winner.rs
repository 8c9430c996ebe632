//! # Winner Draw
//!
//! Every ticket is one equally weighted chance: the draw picks one ticket uniformly and its
//! owner wins, so a user holding N of T tickets wins with probability N / T.
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::{
    Ledger, error::RaffleError, models::RaffleTicket, notify::Notification, store::TicketStore,
};

#[derive(Debug, Clone, Serialize)]
pub struct WinnerDraw {
    pub raffle_id: Uuid,
    pub user_id: String,
    pub ticket_id: Uuid,
    pub user_tickets: u64,
    pub total_tickets: u64,
    pub drawn_at: DateTime<Utc>,
}

pub fn draw<'a, R>(tickets: &'a [RaffleTicket], rng: &mut R) -> Option<&'a RaffleTicket>
where
    R: Rng + ?Sized,
{
    if tickets.is_empty() {
        return None;
    }

    tickets.get(rng.random_range(0..tickets.len()))
}

impl<S: TicketStore> Ledger<S> {
    /// Draws a winner, records it on the raffle and closes the raffle. Drawing again
    /// replaces the recorded winner.
    pub async fn select_winner(&self, raffle_id: Uuid) -> Result<WinnerDraw, RaffleError> {
        self.raffle(raffle_id).await?;
        let tickets = self.store.tickets(raffle_id).await?;

        let winning = draw(&tickets, &mut rand::rng())
            .cloned()
            .ok_or(RaffleError::NoParticipants)?;

        let user_tickets = tickets
            .iter()
            .filter(|t| t.user_id == winning.user_id)
            .count() as u64;

        let raffle = self
            .update_raffle(raffle_id, |raffle| {
                raffle.winner = Some(winning.user_id.clone());
                raffle.active = false;
            })
            .await?;

        info!(
            "Raffle {raffle_id} won by {} holding {user_tickets} of {} tickets",
            winning.user_id,
            tickets.len()
        );

        let recipients: BTreeSet<String> = tickets.iter().map(|t| t.user_id.clone()).collect();
        self.outbox.send(Notification::WinnerAnnouncement {
            raffle_id,
            raffle_title: raffle.title.clone(),
            winner_id: winning.user_id.clone(),
            recipients: recipients.into_iter().collect(),
        });

        Ok(WinnerDraw {
            raffle_id,
            user_id: winning.user_id,
            ticket_id: winning.id,
            user_tickets,
            total_tickets: tickets.len() as u64,
            drawn_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};
    use serde_json::json;

    use super::*;
    use crate::{
        models::TicketSource,
        testing::{ledger, open_raffle},
    };

    fn tickets(raffle_id: Uuid, holdings: &[(&str, usize)]) -> Vec<RaffleTicket> {
        holdings
            .iter()
            .flat_map(|&(user_id, n)| {
                (0..n).map(move |_| {
                    RaffleTicket::new(
                        raffle_id,
                        user_id,
                        TicketSource::Participation,
                        json!({}),
                        Utc::now(),
                    )
                })
            })
            .collect()
    }

    #[test]
    fn test_weighted_fairness() {
        let pool = tickets(Uuid::new_v4(), &[("a", 1), ("b", 9)]);
        let mut rng = StdRng::seed_from_u64(7);

        let b_wins = (0..10_000)
            .filter(|_| draw(&pool, &mut rng).unwrap().user_id == "b")
            .count();

        // 9000 expected, sd = 30
        assert!((8_850..=9_150).contains(&b_wins), "b won {b_wins} times");
    }

    #[test]
    fn test_empty_pool() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(draw(&[], &mut rng).is_none());
    }

    #[tokio::test]
    async fn test_no_participants() {
        let (ledger, _rx) = ledger();
        let raffle = open_raffle(&ledger).await;

        let result = ledger.select_winner(raffle.id).await;
        assert!(matches!(result, Err(RaffleError::NoParticipants)));
    }

    #[tokio::test]
    async fn test_select_winner_records_and_announces() {
        let (ledger, mut rx) = ledger();
        let raffle = open_raffle(&ledger).await;

        ledger.join_raffle("a", raffle.id).await.unwrap();
        ledger.join_raffle("b", raffle.id).await.unwrap();
        ledger.complete_task("b", raffle.id, "quiz").await.unwrap();

        let drawn = ledger.select_winner(raffle.id).await.unwrap();
        assert_eq!(drawn.total_tickets, 3);
        assert_eq!(drawn.user_tickets, if drawn.user_id == "b" { 2 } else { 1 });

        let stored = ledger.raffle(raffle.id).await.unwrap();
        assert_eq!(stored.winner.as_deref(), Some(drawn.user_id.as_str()));
        assert!(!stored.active);

        match rx.try_recv().unwrap() {
            Notification::WinnerAnnouncement {
                winner_id,
                recipients,
                ..
            } => {
                assert_eq!(winner_id, drawn.user_id);
                assert_eq!(recipients, vec!["a".to_string(), "b".to_string()]);
            }
            other => panic!("unexpected notification {other:?}"),
        }
    }
}
