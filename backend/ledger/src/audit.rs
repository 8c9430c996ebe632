//! # Audit
//!
//! Walks every entry of a raffle and rewrites `entry_count` from the tickets, then backfills
//! entries for users holding tickets without one. Safe to run at any time: a reconciled
//! raffle reports every row as `VERIFIED` and nothing is written.
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{Ledger, aggregate::Reconciliation, error::RaffleError, store::TicketStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditStatus {
    Verified,
    Fixed,
    OrphanFixed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditLine {
    pub user_id: String,
    pub old_count: Option<u64>,
    pub new_count: u64,
    pub status: AuditStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditSummary {
    pub raffle_id: Uuid,
    pub total_checked: usize,
    pub mismatches_fixed: usize,
    pub verified: usize,
    pub orphaned_fixed: usize,
    pub report: Vec<AuditLine>,
}

impl AuditSummary {
    pub fn is_clean(&self) -> bool {
        self.mismatches_fixed == 0 && self.orphaned_fixed == 0
    }
}

pub fn summarize(raffle_id: Uuid, reconciliations: Vec<Reconciliation>) -> AuditSummary {
    let mut summary = AuditSummary {
        raffle_id,
        total_checked: 0,
        mismatches_fixed: 0,
        verified: 0,
        orphaned_fixed: 0,
        report: Vec::with_capacity(reconciliations.len()),
    };

    for Reconciliation {
        user_id,
        recorded,
        actual,
    } in reconciliations
    {
        let status = match recorded {
            None => {
                summary.orphaned_fixed += 1;
                AuditStatus::OrphanFixed
            }
            Some(count) if count == actual => {
                summary.total_checked += 1;
                summary.verified += 1;
                AuditStatus::Verified
            }
            Some(_) => {
                summary.total_checked += 1;
                summary.mismatches_fixed += 1;
                AuditStatus::Fixed
            }
        };

        summary.report.push(AuditLine {
            user_id,
            old_count: recorded,
            new_count: actual,
            status,
        });
    }

    summary
}

impl<S: TicketStore> Ledger<S> {
    pub async fn audit_raffle(&self, raffle_id: Uuid) -> Result<AuditSummary, RaffleError> {
        self.raffle(raffle_id).await?;

        let summary = summarize(raffle_id, self.store.reconcile(raffle_id).await?);

        for line in summary
            .report
            .iter()
            .filter(|l| l.status != AuditStatus::Verified)
        {
            warn!(
                "Audit of raffle {raffle_id}: {} {:?} -> {} ({:?})",
                line.user_id, line.old_count, line.new_count, line.status
            );
        }

        info!(
            "Audited raffle {raffle_id}: {} checked, {} fixed, {} verified, {} orphans",
            summary.total_checked, summary.mismatches_fixed, summary.verified, summary.orphaned_fixed
        );

        Ok(summary)
    }
}
