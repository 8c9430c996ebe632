//! # Targeted Repair
//!
//! For a list of users whose true ticket total is known, tops the ticket history up with
//! `admin_correction` tickets. Under-counts are fixed by addition only. An over-count is
//! reported as an error and left alone, tickets are never deleted here.
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    Ledger,
    error::RaffleError,
    models::{RaffleTicket, TicketSource},
    store::{IssueGuard, Issued, TicketStore},
};

const DEFAULT_REASON: &str = "ticket count mismatch";

#[derive(Debug, Clone, Deserialize)]
pub struct ExpectedCount {
    pub user_id: String,
    pub expected_entry_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairStatus {
    Fixed,
    NoActionNeeded,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairResult {
    pub user_id: String,
    pub status: RepairStatus,
    pub previous_count: Option<u64>,
    pub tickets_added: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RepairResult {
    fn error(user_id: &str, previous_count: Option<u64>, message: String) -> Self {
        Self {
            user_id: user_id.to_string(),
            status: RepairStatus::Error,
            previous_count,
            tickets_added: 0,
            message: Some(message),
        }
    }
}

impl<S: TicketStore> Ledger<S> {
    pub async fn fix_specific_mismatches(
        &self,
        raffle_id: Uuid,
        admin_id: &str,
        reason: Option<&str>,
        expected: &[ExpectedCount],
    ) -> Result<Vec<RepairResult>, RaffleError> {
        if expected.is_empty() {
            return Err(RaffleError::Invalid("no users to repair".to_string()));
        }

        self.raffle(raffle_id).await?;
        let reason = reason.unwrap_or(DEFAULT_REASON);

        let mut results = Vec::with_capacity(expected.len());
        for item in expected {
            let result = match self.repair_user(raffle_id, admin_id, reason, item).await {
                Ok(result) => result,
                Err(e) => RepairResult::error(&item.user_id, None, e.to_string()),
            };

            results.push(result);
        }

        Ok(results)
    }

    async fn repair_user(
        &self,
        raffle_id: Uuid,
        admin_id: &str,
        reason: &str,
        item: &ExpectedCount,
    ) -> Result<RepairResult, RaffleError> {
        let user_id = item.user_id.as_str();
        let actual = self.store.user_tickets(raffle_id, user_id).await?.len() as u64;
        let expected = item.expected_entry_count;

        if expected == actual {
            return Ok(RepairResult {
                user_id: user_id.to_string(),
                status: RepairStatus::NoActionNeeded,
                previous_count: Some(actual),
                tickets_added: 0,
                message: None,
            });
        }

        if expected < actual {
            warn!(
                "Raffle {raffle_id}: {user_id} holds {actual} tickets, more than the expected {expected}"
            );
            return Ok(RepairResult::error(
                user_id,
                Some(actual),
                format!("holds {actual} tickets, more than expected {expected}; not adjusted"),
            ));
        }

        let missing = expected - actual;
        let now = Utc::now();
        let tickets: Vec<RaffleTicket> = (1..=missing)
            .map(|n| {
                RaffleTicket::new(
                    raffle_id,
                    user_id,
                    TicketSource::AdminCorrection,
                    json!({
                        "reason": reason,
                        "previous_count": actual,
                        "new_count": expected,
                        "corrected_by": admin_id,
                        "corrected_at": now,
                        "ticket": n,
                        "of": missing,
                    }),
                    now,
                )
            })
            .collect();

        match self
            .store
            .issue_tickets(raffle_id, user_id, &tickets, IssueGuard::Holding(actual))
            .await?
        {
            Issued::Applied { entry_count } => {
                info!(
                    "{admin_id} added {missing} correction tickets for {user_id} in raffle {raffle_id}, entry count {entry_count}"
                );
                Ok(RepairResult {
                    user_id: user_id.to_string(),
                    status: RepairStatus::Fixed,
                    previous_count: Some(actual),
                    tickets_added: missing,
                    message: None,
                })
            }
            Issued::Refused => Ok(RepairResult::error(
                user_id,
                Some(actual),
                "ticket count changed during repair, rerun".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ledger, open_raffle};

    fn expect(user_id: &str, count: u64) -> ExpectedCount {
        ExpectedCount {
            user_id: user_id.to_string(),
            expected_entry_count: count,
        }
    }

    #[tokio::test]
    async fn test_targeted_repair() {
        let (ledger, _rx) = ledger();
        let raffle = open_raffle(&ledger).await;

        ledger.join_raffle("y", raffle.id).await.unwrap();
        for task in ["a", "b", "c", "d", "e", "f", "g", "h", "i", "j", "k"] {
            ledger.complete_task("y", raffle.id, task).await.unwrap();
        }
        ledger.store().force_entry_count(raffle.id, "y", 14);

        let results = ledger
            .fix_specific_mismatches(raffle.id, "admin-1", None, &[expect("y", 14)])
            .await
            .unwrap();

        assert_eq!(results[0].status, RepairStatus::Fixed);
        assert_eq!(results[0].tickets_added, 2);
        assert_eq!(results[0].previous_count, Some(12));

        let tickets = ledger.store().user_tickets(raffle.id, "y").await.unwrap();
        assert_eq!(tickets.len(), 14);

        let corrections: Vec<_> = tickets
            .iter()
            .filter(|t| t.source == TicketSource::AdminCorrection)
            .collect();
        assert_eq!(corrections.len(), 2);
        assert_eq!(corrections[0].metadata["corrected_by"], "admin-1");
        assert_eq!(corrections[0].metadata["previous_count"], 12);
        assert_eq!(corrections[0].metadata["new_count"], 14);
        assert_eq!(corrections[0].metadata["reason"], DEFAULT_REASON);

        let entry = ledger.store().entry(raffle.id, "y").await.unwrap().unwrap();
        assert_eq!(entry.entry_count, 14);

        let summary = ledger.audit_raffle(raffle.id).await.unwrap();
        assert!(summary.is_clean());
    }

    #[tokio::test]
    async fn test_repair_corrects_undercounted_cache() {
        let (ledger, _rx) = ledger();
        let raffle = open_raffle(&ledger).await;

        ledger.join_raffle("z", raffle.id).await.unwrap();
        ledger.complete_task("z", raffle.id, "quiz").await.unwrap();
        ledger.store().force_entry_count(raffle.id, "z", 1);

        let results = ledger
            .fix_specific_mismatches(raffle.id, "admin-1", None, &[expect("z", 5)])
            .await
            .unwrap();
        assert_eq!(results[0].tickets_added, 3);

        let entry = ledger.store().entry(raffle.id, "z").await.unwrap().unwrap();
        assert_eq!(entry.entry_count, 5);
    }

    #[tokio::test]
    async fn test_repair_statuses() {
        let (ledger, _rx) = ledger();
        let raffle = open_raffle(&ledger).await;

        ledger.join_raffle("ok", raffle.id).await.unwrap();
        ledger.join_raffle("over", raffle.id).await.unwrap();
        ledger.complete_task("over", raffle.id, "quiz").await.unwrap();

        let results = ledger
            .fix_specific_mismatches(
                raffle.id,
                "admin-1",
                Some("missed webhook"),
                &[expect("ok", 1), expect("over", 1), expect("new", 2)],
            )
            .await
            .unwrap();

        assert_eq!(results[0].status, RepairStatus::NoActionNeeded);
        assert_eq!(results[1].status, RepairStatus::Error);
        assert!(results[1].message.is_some());
        assert_eq!(results[2].status, RepairStatus::Fixed);
        assert_eq!(results[2].tickets_added, 2);

        // the over-counted user keeps every ticket
        assert_eq!(
            ledger.store().user_tickets(raffle.id, "over").await.unwrap().len(),
            2
        );
        assert_eq!(
            ledger.store().entry(raffle.id, "new").await.unwrap().unwrap().entry_count,
            2
        );
    }

    #[tokio::test]
    async fn test_repair_rejects_empty_list() {
        let (ledger, _rx) = ledger();
        let raffle = open_raffle(&ledger).await;

        let result = ledger
            .fix_specific_mismatches(raffle.id, "admin-1", None, &[])
            .await;
        assert!(matches!(result, Err(RaffleError::Invalid(_))));
    }
}
