use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Corrupt record: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("Store lock poisoned")]
    Poisoned,

    #[error("Record changed concurrently, retry")]
    Contention,

    #[error("Unexpected store reply: {0}")]
    UnexpectedReply(String),
}

#[derive(Error, Debug)]
pub enum RaffleError {
    #[error("Invalid request: {0}")]
    Invalid(String),

    #[error("Raffle not found")]
    RaffleNotFound,

    #[error("Task not found")]
    TaskNotFound,

    #[error("Unknown task type: {0}")]
    InvalidTaskType(String),

    #[error("Already joined this raffle")]
    AlreadyJoined,

    #[error("Join the raffle before completing tasks")]
    NotParticipating,

    #[error("Raffle is not active")]
    RaffleInactive,

    #[error("Raffle has no tickets to draw from")]
    NoParticipants,

    #[error("Task already completed")]
    TaskAlreadyCompleted,

    #[error("Task has no submitted username to verify")]
    TaskNotSubmitted,

    #[error(transparent)]
    Store(#[from] StoreError),
}
