//! # Tasks
//!
//! Social tasks (Instagram, X):
//! - **pending** -> **submitted**: user hands in a username, may resubmit at any time
//! - **submitted** -> **verified**: admin only, first verification issues two tickets
//! - a verified task reopens to **submitted** on a username change, verifying it again
//!   issues nothing
//!
//! Learning tasks complete in one step and issue one ticket, joined users only.
use std::collections::HashMap;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    Ledger,
    error::{RaffleError, StoreError},
    models::{
        RaffleTask, RaffleTicket, TaskType, TicketSource, VERIFICATION_TICKETS,
        VerificationStatus,
    },
    notify::Notification,
    store::{TaskCompletion, TicketStore, Verification},
    utils::sanitize_username,
};

const SWAP_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyOutcome {
    Verified,
    Reverified,
    AlreadyVerified,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifiedTask {
    pub task_id: Uuid,
    pub user_id: String,
    pub task_type: TaskType,
    pub outcome: VerifyOutcome,
    pub tickets_awarded: u64,
    pub entry_count: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedTask {
    pub task_id: Uuid,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct VerifyReport {
    pub succeeded: Vec<VerifiedTask>,
    pub failed: Vec<FailedTask>,
}

impl<S: TicketStore> Ledger<S> {
    pub async fn submit_task_username(
        &self,
        user_id: &str,
        raffle_id: Uuid,
        task_type: &str,
        username: &str,
    ) -> Result<RaffleTask, RaffleError> {
        let task_type: TaskType = task_type.parse()?;

        if !task_type.is_social() {
            return Err(RaffleError::Invalid(format!(
                "{task_type} does not take a username"
            )));
        }

        let username = sanitize_username(username)?;
        let now = Utc::now();
        let raffle = self.open_raffle(raffle_id, now).await?;

        if self.store.entry(raffle.id, user_id).await?.is_none() {
            return Err(RaffleError::NotParticipating);
        }

        for _ in 0..SWAP_ATTEMPTS {
            let current = self.store.find_task(raffle.id, user_id, &task_type).await?;

            let mut task = current
                .clone()
                .unwrap_or_else(|| RaffleTask::new(raffle.id, user_id, task_type.clone()));
            task.submit(&username, now);

            if self.store.swap_task(current.as_ref(), &task).await? {
                info!("{user_id} submitted {task_type} username {username} for raffle {raffle_id}");
                return Ok(task);
            }
        }

        Err(StoreError::Contention.into())
    }

    pub async fn complete_task(
        &self,
        user_id: &str,
        raffle_id: Uuid,
        task_type: &str,
    ) -> Result<RaffleTicket, RaffleError> {
        let task_type: TaskType = task_type.parse()?;

        if task_type.is_social() {
            return Err(RaffleError::Invalid(format!(
                "{task_type} needs admin verification"
            )));
        }

        let now = Utc::now();
        let raffle = self.open_raffle(raffle_id, now).await?;

        let mut task = RaffleTask::new(raffle.id, user_id, task_type.clone());
        task.status = VerificationStatus::Verified;
        task.completed = true;
        task.verified_at = Some(now);
        task.rewarded = true;

        let ticket = RaffleTicket::new(
            raffle.id,
            user_id,
            TicketSource::TaskCompletion,
            json!({ "task_id": task.id, "task_type": task_type }),
            now,
        );

        match self.store.complete_task(&task, &ticket).await? {
            TaskCompletion::Issued { entry_count, .. } => {
                info!(
                    "{user_id} completed {task_type} in raffle {raffle_id}, entry count {entry_count}"
                );
                Ok(ticket)
            }
            TaskCompletion::NotParticipating => Err(RaffleError::NotParticipating),
            TaskCompletion::AlreadyCompleted => Err(RaffleError::TaskAlreadyCompleted),
        }
    }

    /// Tasks waiting for an admin decision, oldest submission first.
    pub async fn pending_tasks(&self, raffle_id: Uuid) -> Result<Vec<RaffleTask>, RaffleError> {
        self.raffle(raffle_id).await?;

        let mut tasks: Vec<RaffleTask> = self
            .store
            .tasks(raffle_id)
            .await?
            .into_iter()
            .filter(|t| t.status == VerificationStatus::Submitted)
            .collect();
        tasks.sort_by_key(|t| t.submitted_at);

        Ok(tasks)
    }

    /// Verifies each task independently. One failure never rolls back the others,
    /// every task lands in either `succeeded` or `failed`.
    pub async fn admin_verify_tasks(
        &self,
        task_ids: &[Uuid],
        skip_email: bool,
    ) -> Result<VerifyReport, RaffleError> {
        if task_ids.is_empty() {
            return Err(RaffleError::Invalid("task_ids must not be empty".to_string()));
        }

        let mut report = VerifyReport::default();
        let mut titles: HashMap<Uuid, String> = HashMap::new();

        for &task_id in task_ids {
            match self.verify_task(task_id).await {
                Ok((verified, task)) => {
                    let notify = !skip_email && verified.outcome != VerifyOutcome::AlreadyVerified;

                    if notify {
                        let title = match titles.get(&task.raffle_id) {
                            Some(title) => title.clone(),
                            None => {
                                let title = self.raffle_title(task.raffle_id).await;
                                titles.insert(task.raffle_id, title.clone());
                                title
                            }
                        };

                        self.outbox.send(Notification::Verification {
                            user_id: task.user_id.clone(),
                            task_type: task.task_type.clone(),
                            username: task.username.clone().unwrap_or_default(),
                            raffle_title: title,
                        });
                    }

                    report.succeeded.push(verified);
                }
                Err(e) => {
                    warn!("Verification of task {task_id} failed: {e}");
                    report.failed.push(FailedTask {
                        task_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Verified {} tasks, {} failed",
            report.succeeded.len(),
            report.failed.len()
        );

        Ok(report)
    }

    async fn verify_task(&self, task_id: Uuid) -> Result<(VerifiedTask, RaffleTask), RaffleError> {
        let task = self
            .store
            .task(task_id)
            .await?
            .ok_or(RaffleError::TaskNotFound)?;

        if !task.task_type.is_social() {
            return Err(RaffleError::Invalid(format!(
                "{} is not a verification task",
                task.task_type
            )));
        }

        let now = Utc::now();
        let tickets: Vec<RaffleTicket> = (1..=VERIFICATION_TICKETS)
            .map(|n| {
                RaffleTicket::new(
                    task.raffle_id,
                    &task.user_id,
                    TicketSource::Verification,
                    json!({
                        "task_id": task.id,
                        "task_type": task.task_type,
                        "username": task.username,
                        "ticket": n,
                    }),
                    now,
                )
            })
            .collect();

        let (outcome, task, tickets_awarded, entry_count) =
            match self.store.verify_task(task_id, &tickets, now).await? {
                Verification::Verified { task, entry_count } => {
                    info!(
                        "Verified {} for {} in raffle {}, entry count {entry_count}",
                        task.task_type, task.user_id, task.raffle_id
                    );
                    (
                        VerifyOutcome::Verified,
                        task,
                        VERIFICATION_TICKETS,
                        Some(entry_count),
                    )
                }
                Verification::Reverified { task } => {
                    (VerifyOutcome::Reverified, task, 0, None)
                }
                Verification::AlreadyVerified { task } => {
                    (VerifyOutcome::AlreadyVerified, task, 0, None)
                }
                Verification::NotSubmitted { .. } => return Err(RaffleError::TaskNotSubmitted),
                Verification::NotFound => return Err(RaffleError::TaskNotFound),
            };

        let verified = VerifiedTask {
            task_id,
            user_id: task.user_id.clone(),
            task_type: task.task_type.clone(),
            outcome,
            tickets_awarded,
            entry_count,
        };

        Ok((verified, task))
    }

    async fn raffle_title(&self, raffle_id: Uuid) -> String {
        match self.store.raffle(raffle_id).await {
            Ok(Some(raffle)) => raffle.title,
            Ok(None) => String::new(),
            Err(e) => {
                warn!("Could not load raffle {raffle_id} for email: {e}");
                String::new()
            }
        }
    }
}
