//! # Records
//!
//! Rows owned by the raffle ledger.
//!
//! - **Raffle**: one contest, created by an admin
//! - **RaffleTicket**: append-only unit of chance, tagged with its source
//! - **RaffleEntry**: per (raffle, user) ticket count, only ever written by [`crate::aggregate`]
//! - **RaffleTask**: per (raffle, user, task type) progress, social tasks need admin verification
use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::RaffleError;

/// Number of tickets granted for one admin-verified social task.
pub const VERIFICATION_TICKETS: u64 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Raffle {
    pub id: Uuid,
    pub title: String,
    pub prize_description: String,
    /// Minor currency units.
    pub prize_amount: u64,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub active: bool,
    #[serde(default)]
    pub winner: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Raffle {
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.active && self.starts_at <= now && now < self.ends_at
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewRaffle {
    pub title: String,
    #[serde(default)]
    pub prize_description: String,
    #[serde(default)]
    pub prize_amount: u64,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketSource {
    Participation,
    TaskCompletion,
    Verification,
    /// Not issued by any flow yet.
    Referral,
    AdminCorrection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaffleTicket {
    pub id: Uuid,
    pub raffle_id: Uuid,
    pub user_id: String,
    pub source: TicketSource,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl RaffleTicket {
    pub fn new(
        raffle_id: Uuid,
        user_id: &str,
        source: TicketSource,
        metadata: Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            raffle_id,
            user_id: user_id.to_string(),
            source,
            metadata,
            created_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaffleEntry {
    pub raffle_id: Uuid,
    pub user_id: String,
    pub entry_count: u64,
}

/// Social platforms need a submitted username and admin verification,
/// everything else is a self-completed learning task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum TaskType {
    Instagram,
    X,
    Learning(String),
}

impl TaskType {
    pub fn is_social(&self) -> bool {
        matches!(self, TaskType::Instagram | TaskType::X)
    }

    pub fn as_str(&self) -> &str {
        match self {
            TaskType::Instagram => "instagram",
            TaskType::X => "x",
            TaskType::Learning(name) => name,
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = RaffleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_lowercase();

        match name.as_str() {
            "instagram" => Ok(TaskType::Instagram),
            "x" | "twitter" => Ok(TaskType::X),
            _ if !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') =>
            {
                Ok(TaskType::Learning(name))
            }
            _ => Err(RaffleError::InvalidTaskType(s.to_string())),
        }
    }
}

impl From<TaskType> for String {
    fn from(task_type: TaskType) -> Self {
        task_type.as_str().to_string()
    }
}

impl TryFrom<String> for TaskType {
    type Error = RaffleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    Submitted,
    Verified,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaffleTask {
    pub id: Uuid,
    pub raffle_id: Uuid,
    pub user_id: String,
    pub task_type: TaskType,
    pub status: VerificationStatus,
    pub completed: bool,
    pub username: Option<String>,
    /// Value before the last "change username" resubmission.
    pub previous_username: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub verified_at: Option<DateTime<Utc>>,
    /// Set once the verification tickets for this task have been issued.
    pub rewarded: bool,
}

impl RaffleTask {
    pub fn new(raffle_id: Uuid, user_id: &str, task_type: TaskType) -> Self {
        Self {
            id: Uuid::new_v4(),
            raffle_id,
            user_id: user_id.to_string(),
            task_type,
            status: VerificationStatus::Pending,
            completed: false,
            username: None,
            previous_username: None,
            submitted_at: None,
            verified_at: None,
            rewarded: false,
        }
    }

    /// Moves the task into `submitted`, reopening it when already verified.
    pub fn submit(&mut self, username: &str, now: DateTime<Utc>) {
        if self.username.as_deref() != Some(username) {
            self.previous_username = self.username.take();
        }

        self.username = Some(username.to_string());
        self.status = VerificationStatus::Submitted;
        self.submitted_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_type_parse() {
        assert_eq!("Instagram".parse::<TaskType>().unwrap(), TaskType::Instagram);
        assert_eq!("twitter".parse::<TaskType>().unwrap(), TaskType::X);
        assert_eq!(
            "defi-basics".parse::<TaskType>().unwrap(),
            TaskType::Learning("defi-basics".to_string())
        );
        assert!("".parse::<TaskType>().is_err());
        assert!("a:b".parse::<TaskType>().is_err());
    }

    #[test]
    fn test_task_type_serde() {
        let json = serde_json::to_string(&TaskType::X).unwrap();
        assert_eq!(json, "\"x\"");

        let parsed: TaskType = serde_json::from_str("\"quiz_1\"").unwrap();
        assert_eq!(parsed, TaskType::Learning("quiz_1".to_string()));
        assert!(!parsed.is_social());
    }

    #[test]
    fn test_submit_keeps_previous_username() {
        let mut task = RaffleTask::new(Uuid::new_v4(), "u1", TaskType::Instagram);
        let now = Utc::now();

        task.submit("alice", now);
        assert_eq!(task.status, VerificationStatus::Submitted);
        assert_eq!(task.previous_username, None);

        task.status = VerificationStatus::Verified;
        task.submit("alice_2", now);
        assert_eq!(task.status, VerificationStatus::Submitted);
        assert_eq!(task.username.as_deref(), Some("alice_2"));
        assert_eq!(task.previous_username.as_deref(), Some("alice"));
    }
}
