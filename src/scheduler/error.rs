use ulid::Ulid;

use crate::store::StoreError;

#[derive(Debug)]
pub enum ScheduleError {
    /// No active lab of the group exists, or every one is taken at the slot.
    NoEligibleResource { request_id: Ulid, group: String },
    GroupMismatch { required: String, actual: String },
    /// The target lab is already bound to another request at this slot.
    SlotTaken { reservation_id: Ulid, holder: Ulid },
    ResourceInactive(Ulid),
    NotFound(Ulid),
    /// Another batch pass is running on this scheduler.
    ScheduleInProgress,
    LimitExceeded(&'static str),
    Store(StoreError),
}

impl ScheduleError {
    /// Everything except a failing log is an expected outcome the caller can act on.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ScheduleError::Store(StoreError::WalError(_)))
    }
}

impl std::fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduleError::NoEligibleResource { request_id, group } => {
                write!(f, "no free lab in group {group} for request {request_id}")
            }
            ScheduleError::GroupMismatch { required, actual } => {
                write!(f, "lab belongs to group {actual}, request needs {required}")
            }
            ScheduleError::SlotTaken {
                reservation_id,
                holder,
            } => write!(
                f,
                "slot already taken by reservation {reservation_id} of request {holder}"
            ),
            ScheduleError::ResourceInactive(id) => write!(f, "lab {id} is inactive"),
            ScheduleError::NotFound(id) => write!(f, "not found: {id}"),
            ScheduleError::ScheduleInProgress => write!(f, "a scheduling pass is already running"),
            ScheduleError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            ScheduleError::Store(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for ScheduleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ScheduleError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for ScheduleError {
    fn from(e: StoreError) -> Self {
        ScheduleError::Store(e)
    }
}
