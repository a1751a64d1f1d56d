/// Maximum length of a lab, requester, class or group name.
pub const MAX_NAME_LEN: usize = 200;

/// Maximum number of labs per school.
pub const MAX_LABS_PER_SCHOOL: usize = 10_000;

/// Maximum number of live requests per school.
pub const MAX_REQUESTS_PER_SCHOOL: usize = 1_000_000;

/// Highest period number a request may target.
pub const MAX_PERIOD: u32 = 16;

/// Widest ± day window the suggestion search accepts.
pub const MAX_DAY_WINDOW: u32 = 60;

/// Most suggestions a single diagnosis may return.
pub const MAX_TOP_K: usize = 50;

/// Free lab names reported per suggestion.
pub const MAX_FREE_LABS_PER_SUGGESTION: usize = 3;

pub const MAX_SCHOOLS: usize = 1_000;
pub const MAX_SCHOOL_NAME_LEN: usize = 128;
