use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::Period;

#[derive(Debug)]
pub enum StoreError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// A reservation already holds this (lab, date, period).
    UniquenessViolation {
        lab_id: Ulid,
        date: NaiveDate,
        period: Period,
        existing: Ulid,
    },
    DuplicateName(String),
    DuplicateWeek {
        school_year: String,
        week_no: u32,
    },
    /// Deletion refused: the entity is still referenced.
    InUse(Ulid, &'static str),
    Invalid(&'static str),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(id) => write!(f, "not found: {id}"),
            StoreError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            StoreError::UniquenessViolation {
                lab_id,
                date,
                period,
                existing,
            } => write!(
                f,
                "lab {lab_id} already reserved on {date} period {period} by reservation {existing}"
            ),
            StoreError::DuplicateName(name) => write!(f, "name already in use: {name}"),
            StoreError::DuplicateWeek {
                school_year,
                week_no,
            } => write!(f, "week {week_no} of {school_year} already exists"),
            StoreError::InUse(id, by) => write!(f, "cannot delete {id}: still referenced by {by}"),
            StoreError::Invalid(msg) => write!(f, "invalid input: {msg}"),
            StoreError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            StoreError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::WalError(e.to_string())
    }
}
