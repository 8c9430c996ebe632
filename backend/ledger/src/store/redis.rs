//! # Redis
//!
//! RAM database holding the ledger.
//!
//! ## Layout
//!
//! - `raffles`: hash, raffle id -> JSON raffle
//! - `raffle:{id}:entries`: hash, user -> entry count
//! - `raffle:{id}:tickets`: list of JSON tickets, append-only
//! - `raffle:{id}:held`: hash, user -> tickets held, maintained next to every append
//! - `raffle:{id}:tasks`: hash, `user:task_type` -> JSON task
//! - `tasks`: hash, task id -> `raffle|user|task_type`
//!
//! ## Atomicity
//!
//! Every write that touches tickets is a Lua script, so the append, the entry trigger and
//! the guard run as one unit. Redis queues scripts, concurrent joins for the same user
//! therefore serialize. The trigger copies the `held` total into the entry after the append,
//! so an entry that had drifted is corrected by the next ticket it receives.
use std::{sync::LazyLock, time::Duration};

use ::redis::{
    AsyncCommands, Client, Script,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use super::{IssueGuard, Issued, Removal, TaskCompletion, TicketStore, Verification};
use crate::{
    aggregate::Reconciliation,
    error::StoreError,
    models::{Raffle, RaffleEntry, RaffleTask, RaffleTicket, TaskType},
};

const RAFFLES: &str = "raffles";
const TASK_INDEX: &str = "tasks";

static ISSUE: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
local user = ARGV[1]
local guard = ARGV[2]
local held = tonumber(redis.call('HGET', KEYS[3], user) or '0')
if guard == 'first_join' then
    if redis.call('HEXISTS', KEYS[1], user) == 1 or held > 0 then
        return -1
    end
elseif guard == 'holding' then
    if held ~= tonumber(ARGV[3]) then
        return -1
    end
end
for i = 4, #ARGV do
    redis.call('RPUSH', KEYS[2], ARGV[i])
    held = redis.call('HINCRBY', KEYS[3], user, 1)
end
redis.call('HSET', KEYS[1], user, held)
return held
",
    )
});

static SWAP_FIELD: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
if redis.call('HGET', KEYS[1], ARGV[1]) ~= ARGV[2] then
    return 0
end
redis.call('HSET', KEYS[1], ARGV[1], ARGV[3])
return 1
",
    )
});

static SWAP_TASK: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
local current = redis.call('HGET', KEYS[1], ARGV[1])
if ARGV[2] == '' then
    if current then
        return 0
    end
elseif current ~= ARGV[2] then
    return 0
end
redis.call('HSET', KEYS[1], ARGV[1], ARGV[3])
redis.call('HSET', KEYS[2], ARGV[4], ARGV[5])
return 1
",
    )
});

static COMPLETE_TASK: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
local user = ARGV[1]
if redis.call('HEXISTS', KEYS[1], user) == 0 then
    return -1
end
local existing = redis.call('HGET', KEYS[4], ARGV[2])
if existing and cjson.decode(existing).completed then
    return -2
end
redis.call('HSET', KEYS[4], ARGV[2], ARGV[3])
redis.call('HSET', KEYS[5], ARGV[4], ARGV[5])
redis.call('RPUSH', KEYS[2], ARGV[6])
local held = redis.call('HINCRBY', KEYS[3], user, 1)
redis.call('HSET', KEYS[1], user, held)
return held
",
    )
});

static VERIFY_TASK: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
local raw = redis.call('HGET', KEYS[1], ARGV[1])
if not raw then
    return {'not_found', '', 0}
end
local task = cjson.decode(raw)
if task.status == 'pending' then
    return {'not_submitted', raw, 0}
end
if task.status == 'verified' then
    return {'already_verified', raw, 0}
end
task.status = 'verified'
task.completed = true
task.verified_at = ARGV[2]
local outcome = 'reverified'
local count = tonumber(redis.call('HGET', KEYS[2], ARGV[3]) or '0')
if not task.rewarded then
    task.rewarded = true
    outcome = 'verified'
    for i = 4, #ARGV do
        redis.call('RPUSH', KEYS[3], ARGV[i])
        count = redis.call('HINCRBY', KEYS[4], ARGV[3], 1)
    end
    redis.call('HSET', KEYS[2], ARGV[3], count)
end
local encoded = cjson.encode(task)
redis.call('HSET', KEYS[1], ARGV[1], encoded)
return {outcome, encoded, count}
",
    )
});

static RECONCILE: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
local actual = {}
for _, raw in ipairs(redis.call('LRANGE', KEYS[2], 0, -1)) do
    local user = cjson.decode(raw).user_id
    actual[user] = (actual[user] or 0) + 1
end
local report = {}
local seen = {}
local recorded = redis.call('HGETALL', KEYS[1])
for i = 1, #recorded, 2 do
    local user = recorded[i]
    local count = tonumber(recorded[i + 1])
    local held = actual[user] or 0
    seen[user] = true
    if held ~= count then
        redis.call('HSET', KEYS[1], user, held)
    end
    table.insert(report, {user, count, held})
end
redis.call('DEL', KEYS[3])
for user, held in pairs(actual) do
    if not seen[user] then
        redis.call('HSET', KEYS[1], user, held)
        table.insert(report, {user, -1, held})
    end
    redis.call('HSET', KEYS[3], user, held)
end
return report
",
    )
});

static REMOVE: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
local user = ARGV[1]
local kept = {}
local tickets = 0
for _, raw in ipairs(redis.call('LRANGE', KEYS[2], 0, -1)) do
    if cjson.decode(raw).user_id == user then
        tickets = tickets + 1
    else
        table.insert(kept, raw)
    end
end
if tickets > 0 then
    redis.call('DEL', KEYS[2])
    for _, raw in ipairs(kept) do
        redis.call('RPUSH', KEYS[2], raw)
    end
end
redis.call('HDEL', KEYS[3], user)
local entry = redis.call('HDEL', KEYS[1], user)
local tasks = 0
local fields = redis.call('HGETALL', KEYS[4])
for i = 1, #fields, 2 do
    local task = cjson.decode(fields[i + 1])
    if task.user_id == user then
        redis.call('HDEL', KEYS[4], fields[i])
        redis.call('HDEL', KEYS[5], task.id)
        tasks = tasks + 1
    end
end
return {tickets, tasks, entry}
",
    )
});

#[derive(Deserialize)]
struct Held {
    user_id: String,
}

fn entries_key(raffle_id: Uuid) -> String {
    format!("raffle:{raffle_id}:entries")
}

fn tickets_key(raffle_id: Uuid) -> String {
    format!("raffle:{raffle_id}:tickets")
}

fn held_key(raffle_id: Uuid) -> String {
    format!("raffle:{raffle_id}:held")
}

fn tasks_key(raffle_id: Uuid) -> String {
    format!("raffle:{raffle_id}:tasks")
}

fn task_field(user_id: &str, task_type: &TaskType) -> String {
    format!("{user_id}:{task_type}")
}

fn task_locator(task: &RaffleTask) -> String {
    format!("{}|{}|{}", task.raffle_id, task.user_id, task.task_type)
}

fn parse_locator(locator: &str) -> Result<(Uuid, String, TaskType), StoreError> {
    let corrupt = || StoreError::UnexpectedReply(format!("bad task locator {locator}"));

    let (raffle_id, rest) = locator.split_once('|').ok_or_else(corrupt)?;
    let (user_id, task_type) = rest.rsplit_once('|').ok_or_else(corrupt)?;

    let raffle_id = Uuid::parse_str(raffle_id).map_err(|_| corrupt())?;
    let task_type = task_type.parse().map_err(|_| corrupt())?;
    let user_id = user_id.to_string();

    Ok((raffle_id, user_id, task_type))
}

fn count(value: i64) -> u64 {
    value.max(0) as u64
}

#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let config = ConnectionManagerConfig::new()
            .set_number_of_retries(1)
            .set_connection_timeout(Duration::from_millis(100));

        let client = Client::open(redis_url)?;
        let connection = client.get_connection_manager_with_config(config).await?;

        Ok(Self { connection })
    }

    fn connection(&self) -> ConnectionManager {
        self.connection.clone()
    }

    async fn task_at(
        &self,
        raffle_id: Uuid,
        user_id: &str,
        task_type: &TaskType,
    ) -> Result<Option<RaffleTask>, StoreError> {
        let raw: Option<String> = self
            .connection()
            .hget(tasks_key(raffle_id), task_field(user_id, task_type))
            .await?;

        Ok(raw.map(|raw| serde_json::from_str(&raw)).transpose()?)
    }
}

impl TicketStore for RedisStore {
    async fn save_raffle(&self, raffle: &Raffle) -> Result<(), StoreError> {
        let raw = serde_json::to_string(raffle)?;
        let _: () = self
            .connection()
            .hset(RAFFLES, raffle.id.to_string(), raw)
            .await?;

        Ok(())
    }

    async fn raffle(&self, id: Uuid) -> Result<Option<Raffle>, StoreError> {
        let raw: Option<String> = self.connection().hget(RAFFLES, id.to_string()).await?;

        Ok(raw.map(|raw| serde_json::from_str(&raw)).transpose()?)
    }

    async fn swap_raffle(&self, expected: &Raffle, raffle: &Raffle) -> Result<bool, StoreError> {
        let field = raffle.id.to_string();
        let current: Option<String> = self.connection().hget(RAFFLES, &field).await?;

        let Some(current) = current else {
            return Ok(false);
        };

        if serde_json::from_str::<Raffle>(&current)? != *expected {
            return Ok(false);
        }

        let swapped: i64 = SWAP_FIELD
            .key(RAFFLES)
            .arg(&field)
            .arg(current)
            .arg(serde_json::to_string(raffle)?)
            .invoke_async(&mut self.connection())
            .await?;

        Ok(swapped == 1)
    }

    async fn raffles(&self) -> Result<Vec<Raffle>, StoreError> {
        let raws: Vec<String> = self.connection().hvals(RAFFLES).await?;

        let mut raffles = raws
            .iter()
            .map(|raw| serde_json::from_str(raw))
            .collect::<Result<Vec<Raffle>, _>>()?;
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
        let (guard, holding) = match guard {
            IssueGuard::FirstJoin => ("first_join", 0),
            IssueGuard::Holding(n) => ("holding", n),
        };

        let mut invocation = ISSUE.prepare_invoke();
        invocation
            .key(entries_key(raffle_id))
            .key(tickets_key(raffle_id))
            .key(held_key(raffle_id))
            .arg(user_id)
            .arg(guard)
            .arg(holding);

        for ticket in tickets {
            invocation.arg(serde_json::to_string(ticket)?);
        }

        let reply: i64 = invocation.invoke_async(&mut self.connection()).await?;

        Ok(match reply {
            -1 => Issued::Refused,
            n => Issued::Applied {
                entry_count: count(n),
            },
        })
    }

    async fn entry(&self, raffle_id: Uuid, user_id: &str) -> Result<Option<RaffleEntry>, StoreError> {
        let entry_count: Option<u64> = self
            .connection()
            .hget(entries_key(raffle_id), user_id)
            .await?;

        Ok(entry_count.map(|entry_count| RaffleEntry {
            raffle_id,
            user_id: user_id.to_string(),
            entry_count,
        }))
    }

    async fn tickets(&self, raffle_id: Uuid) -> Result<Vec<RaffleTicket>, StoreError> {
        let raws: Vec<String> = self
            .connection()
            .lrange(tickets_key(raffle_id), 0, -1)
            .await?;

        Ok(raws
            .iter()
            .map(|raw| serde_json::from_str(raw))
            .collect::<Result<_, _>>()?)
    }

    async fn user_tickets(
        &self,
        raffle_id: Uuid,
        user_id: &str,
    ) -> Result<Vec<RaffleTicket>, StoreError> {
        let raws: Vec<String> = self
            .connection()
            .lrange(tickets_key(raffle_id), 0, -1)
            .await?;

        let mut tickets = Vec::new();
        for raw in raws {
            let held: Held = serde_json::from_str(&raw)?;
            if held.user_id == user_id {
                tickets.push(serde_json::from_str(&raw)?);
            }
        }

        Ok(tickets)
    }

    async fn task(&self, task_id: Uuid) -> Result<Option<RaffleTask>, StoreError> {
        let locator: Option<String> = self
            .connection()
            .hget(TASK_INDEX, task_id.to_string())
            .await?;

        let Some(locator) = locator else {
            return Ok(None);
        };

        let (raffle_id, user_id, task_type) = parse_locator(&locator)?;
        self.task_at(raffle_id, &user_id, &task_type).await
    }

    async fn find_task(
        &self,
        raffle_id: Uuid,
        user_id: &str,
        task_type: &TaskType,
    ) -> Result<Option<RaffleTask>, StoreError> {
        self.task_at(raffle_id, user_id, task_type).await
    }

    async fn tasks(&self, raffle_id: Uuid) -> Result<Vec<RaffleTask>, StoreError> {
        let raws: Vec<String> = self.connection().hvals(tasks_key(raffle_id)).await?;

        Ok(raws
            .iter()
            .map(|raw| serde_json::from_str(raw))
            .collect::<Result<_, _>>()?)
    }

    /// Compares against the stored JSON of `expected`, reread from Redis so the
    /// serialized forms match byte for byte.
    async fn swap_task(
        &self,
        expected: Option<&RaffleTask>,
        task: &RaffleTask,
    ) -> Result<bool, StoreError> {
        let field = task_field(&task.user_id, &task.task_type);
        let current: Option<String> = self
            .connection()
            .hget(tasks_key(task.raffle_id), &field)
            .await?;

        let stored = current
            .as_deref()
            .map(serde_json::from_str::<RaffleTask>)
            .transpose()?;

        if stored.as_ref() != expected {
            return Ok(false);
        }

        let swapped: i64 = SWAP_TASK
            .key(tasks_key(task.raffle_id))
            .key(TASK_INDEX)
            .arg(&field)
            .arg(current.unwrap_or_default())
            .arg(serde_json::to_string(task)?)
            .arg(task.id.to_string())
            .arg(task_locator(task))
            .invoke_async(&mut self.connection())
            .await?;

        Ok(swapped == 1)
    }

    async fn complete_task(
        &self,
        task: &RaffleTask,
        ticket: &RaffleTicket,
    ) -> Result<TaskCompletion, StoreError> {
        let reply: i64 = COMPLETE_TASK
            .key(entries_key(task.raffle_id))
            .key(tickets_key(task.raffle_id))
            .key(held_key(task.raffle_id))
            .key(tasks_key(task.raffle_id))
            .key(TASK_INDEX)
            .arg(&task.user_id)
            .arg(task_field(&task.user_id, &task.task_type))
            .arg(serde_json::to_string(task)?)
            .arg(task.id.to_string())
            .arg(task_locator(task))
            .arg(serde_json::to_string(ticket)?)
            .invoke_async(&mut self.connection())
            .await?;

        Ok(match reply {
            -1 => TaskCompletion::NotParticipating,
            -2 => TaskCompletion::AlreadyCompleted,
            n => TaskCompletion::Issued {
                task: task.clone(),
                entry_count: count(n),
            },
        })
    }

    async fn verify_task(
        &self,
        task_id: Uuid,
        tickets: &[RaffleTicket],
        now: DateTime<Utc>,
    ) -> Result<Verification, StoreError> {
        let locator: Option<String> = self
            .connection()
            .hget(TASK_INDEX, task_id.to_string())
            .await?;

        let Some(locator) = locator else {
            return Ok(Verification::NotFound);
        };
        let (raffle_id, user_id, task_type) = parse_locator(&locator)?;

        let mut invocation = VERIFY_TASK.prepare_invoke();
        invocation
            .key(tasks_key(raffle_id))
            .key(entries_key(raffle_id))
            .key(tickets_key(raffle_id))
            .key(held_key(raffle_id))
            .arg(task_field(&user_id, &task_type))
            .arg(now.to_rfc3339())
            .arg(&user_id);

        for ticket in tickets {
            invocation.arg(serde_json::to_string(ticket)?);
        }

        let (outcome, raw, entry_count): (String, String, i64) =
            invocation.invoke_async(&mut self.connection()).await?;

        if outcome == "not_found" {
            return Ok(Verification::NotFound);
        }

        let task: RaffleTask = serde_json::from_str(&raw)?;

        Ok(match outcome.as_str() {
            "verified" => Verification::Verified {
                task,
                entry_count: count(entry_count),
            },
            "reverified" => Verification::Reverified { task },
            "already_verified" => Verification::AlreadyVerified { task },
            "not_submitted" => Verification::NotSubmitted { task },
            other => return Err(StoreError::UnexpectedReply(other.to_string())),
        })
    }

    async fn reconcile(&self, raffle_id: Uuid) -> Result<Vec<Reconciliation>, StoreError> {
        let rows: Vec<(String, i64, i64)> = RECONCILE
            .key(entries_key(raffle_id))
            .key(tickets_key(raffle_id))
            .key(held_key(raffle_id))
            .invoke_async(&mut self.connection())
            .await?;

        let mut report: Vec<Reconciliation> = rows
            .into_iter()
            .map(|(user_id, recorded, actual)| Reconciliation {
                user_id,
                recorded: (recorded >= 0).then_some(recorded as u64),
                actual: count(actual),
            })
            .collect();
        report.sort_by(|a, b| a.user_id.cmp(&b.user_id));

        Ok(report)
    }

    async fn remove_participant(&self, raffle_id: Uuid, user_id: &str) -> Result<Removal, StoreError> {
        let (tickets, tasks, entry): (i64, i64, i64) = REMOVE
            .key(entries_key(raffle_id))
            .key(tickets_key(raffle_id))
            .key(held_key(raffle_id))
            .key(tasks_key(raffle_id))
            .key(TASK_INDEX)
            .arg(user_id)
            .invoke_async(&mut self.connection())
            .await?;

        Ok(Removal {
            tickets: count(tickets),
            tasks: count(tasks),
            entry: entry > 0,
        })
    }
}
