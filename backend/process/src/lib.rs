//! # Raffle Maintenance
//!
//! Offline counterpart of the admin audit endpoint. Runs the same per-raffle reconcile over
//! every raffle in the store, either once or on an interval.
//!
//! ## Audit Pass
//!
//! 1. Load every raffle, active or not. Ended raffles still get drawn from, so their counts
//!    matter too.
//!
//! 2. For each raffle, rebuild every cached entry count from the ticket list in one atomic
//!    step. Users holding tickets without an entry get one.
//!
//! 3. Log one line per raffle that needed fixes, then a total for the pass.
//!
//! A failing raffle does not stop the pass, it is logged and the next raffle is audited.
use indicatif::{ProgressBar, ProgressStyle};
use ledger::{Ledger, TicketStore, audit::AuditSummary};
use tracing::{info, warn};

#[derive(Debug, Default)]
pub struct PassTotals {
    pub raffles: usize,
    pub failed: usize,
    pub mismatches_fixed: usize,
    pub orphaned_fixed: usize,
}

impl PassTotals {
    fn add(&mut self, summary: &AuditSummary) {
        self.raffles += 1;
        self.mismatches_fixed += summary.mismatches_fixed;
        self.orphaned_fixed += summary.orphaned_fixed;
    }
}

pub async fn audit_all<S: TicketStore>(ledger: &Ledger<S>) -> anyhow::Result<PassTotals> {
    let raffles = ledger.raffles().await?;

    let pb = ProgressBar::new(raffles.len() as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
        )?
        .progress_chars("=> "),
    );

    let mut totals = PassTotals::default();

    for raffle in raffles {
        pb.set_message(format!("Auditing {}", raffle.title));

        match ledger.audit_raffle(raffle.id).await {
            Ok(summary) => {
                if !summary.is_clean() {
                    info!(
                        "Raffle {} ({}): {} mismatches fixed, {} orphaned",
                        raffle.id, raffle.title, summary.mismatches_fixed, summary.orphaned_fixed
                    );
                }

                totals.add(&summary);
            }
            Err(e) => {
                warn!("Audit of raffle {} failed: {e}", raffle.id);
                totals.failed += 1;
            }
        }

        pb.inc(1);
    }

    pb.finish_with_message("Done");

    info!(
        "Audited {} raffles: {} mismatches fixed, {} orphaned, {} failed",
        totals.raffles, totals.mismatches_fixed, totals.orphaned_fixed, totals.failed
    );

    Ok(totals)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use ledger::{MemoryStore, models::NewRaffle};

    use super::*;

    fn new_raffle(title: &str) -> NewRaffle {
        NewRaffle {
            title: title.to_string(),
            prize_description: "Hardware wallet".to_string(),
            prize_amount: 100,
            starts_at: Utc::now() - Duration::hours(1),
            ends_at: Utc::now() + Duration::days(7),
        }
    }

    #[tokio::test]
    async fn test_audit_all_clean() {
        let (ledger, _rx) = Ledger::with_receiver(MemoryStore::new());

        let first = ledger.create_raffle(new_raffle("First")).await.unwrap();
        let second = ledger.create_raffle(new_raffle("Second")).await.unwrap();

        ledger.join_raffle("a", first.id).await.unwrap();
        ledger.join_raffle("a", second.id).await.unwrap();
        ledger.complete_task("a", second.id, "quiz").await.unwrap();

        let totals = audit_all(&ledger).await.unwrap();
        assert_eq!(totals.raffles, 2);
        assert_eq!(totals.failed, 0);
        assert_eq!(totals.mismatches_fixed, 0);
        assert_eq!(totals.orphaned_fixed, 0);
    }

    #[tokio::test]
    async fn test_audit_all_empty_store() {
        let (ledger, _rx) = Ledger::with_receiver(MemoryStore::new());

        let totals = audit_all(&ledger).await.unwrap();
        assert_eq!(totals.raffles, 0);
    }
}
