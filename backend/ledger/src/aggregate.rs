//! # Entry Aggregation
//!
//! `entry_count` is derived state: it must equal the number of tickets a user holds in a raffle.
//!
//! - [`settle`] is the insert trigger, run in the same critical section as the ticket append
//! - [`reconcile`] recomputes every count from the tickets and repairs drift
//! - [`tally`] is the compute-on-read view used by status pages and the winner draw
//!
//! The Redis store mirrors these rules inside its Lua scripts.
use std::collections::{BTreeMap, HashMap};

use crate::models::RaffleTicket;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub user_id: String,
    /// `None` when the user held tickets without an entry row.
    pub recorded: Option<u64>,
    pub actual: u64,
}

pub fn tally<'a, I>(tickets: I) -> BTreeMap<String, u64>
where
    I: IntoIterator<Item = &'a RaffleTicket>,
{
    let mut counts = BTreeMap::new();

    for ticket in tickets {
        *counts.entry(ticket.user_id.clone()).or_insert(0) += 1;
    }

    counts
}

/// Sets the entry to the user's ticket total after an append. A drifted count is replaced,
/// never carried forward.
pub fn settle(entries: &mut HashMap<String, u64>, user_id: &str, held: u64) -> u64 {
    entries.insert(user_id.to_string(), held);

    held
}

/// Overwrites every drifted count with the ticket total and backfills missing entries.
/// Tickets are never touched.
pub fn reconcile(
    entries: &mut HashMap<String, u64>,
    tickets: &[RaffleTicket],
) -> Vec<Reconciliation> {
    let actual = tally(tickets);
    let mut report = Vec::with_capacity(entries.len());

    for (user_id, recorded) in entries.iter_mut() {
        let held = actual.get(user_id).copied().unwrap_or(0);

        report.push(Reconciliation {
            user_id: user_id.clone(),
            recorded: Some(*recorded),
            actual: held,
        });

        *recorded = held;
    }

    for (user_id, held) in actual {
        if entries.contains_key(&user_id) {
            continue;
        }

        entries.insert(user_id.clone(), held);
        report.push(Reconciliation {
            user_id,
            recorded: None,
            actual: held,
        });
    }

    report.sort_by(|a, b| a.user_id.cmp(&b.user_id));
    report
}
