mod advisor;
mod allocator;
mod error;
mod repository;
mod resolver;

pub use advisor::{candidate_dates, Diagnosis, RequestSummary, Suggestion, CONFLICT_REASON};
pub use allocator::{choose_lab, Assignment, BackfillSummary, ScheduleSummary};
pub use error::ScheduleError;
pub use repository::Repository;
pub use resolver::{GroupResolver, GroupSource};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ulid::Ulid;

use crate::limits::{MAX_DAY_WINDOW, MAX_PERIOD, MAX_TOP_K};
use crate::model::{Request, DEFAULT_GROUP};

/// Knobs for allocation and the suggestion search.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub default_group: String,
    /// Defaults for `explain` when the caller does not pass its own.
    pub max_period: u32,
    pub day_window: u32,
    pub top_k: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            default_group: DEFAULT_GROUP.to_string(),
            max_period: 10,
            day_window: 7,
            top_k: 3,
        }
    }
}

impl SchedulerSettings {
    pub fn validate(&self) -> Result<(), ScheduleError> {
        check_search_bounds(self.max_period, self.day_window, self.top_k)?;
        if self.default_group.trim().is_empty() {
            return Err(ScheduleError::LimitExceeded("default group must not be blank"));
        }
        Ok(())
    }
}

pub(super) fn check_search_bounds(max_period: u32, day_window: u32, top_k: usize) -> Result<(), ScheduleError> {
    if max_period > MAX_PERIOD {
        return Err(ScheduleError::LimitExceeded("max period too large"));
    }
    if day_window > MAX_DAY_WINDOW {
        return Err(ScheduleError::LimitExceeded("day window too wide"));
    }
    if top_k > MAX_TOP_K {
        return Err(ScheduleError::LimitExceeded("too many suggestions requested"));
    }
    Ok(())
}

/// Allocation, batch scheduling and conflict diagnosis over a repository.
///
/// Holds no scheduling state of its own beyond the flag that keeps two batch
/// passes from overlapping; everything else is read from and written to `repo`.
pub struct Scheduler<R: Repository> {
    repo: Arc<R>,
    resolver: GroupResolver,
    settings: SchedulerSettings,
    batch_running: AtomicBool,
}

impl<R: Repository> Scheduler<R> {
    pub fn new(repo: Arc<R>, settings: SchedulerSettings) -> Self {
        Self {
            repo,
            resolver: GroupResolver::new(settings.default_group.clone()),
            settings,
            batch_running: AtomicBool::new(false),
        }
    }

    pub fn repo(&self) -> &Arc<R> {
        &self.repo
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// The group `request` must be satisfied from. Does not persist it.
    pub fn resolve_group(&self, request: &Request) -> Result<String, ScheduleError> {
        Ok(self.resolver.resolve(&*self.repo, request)?)
    }

    pub(super) fn load_request(&self, id: Ulid) -> Result<Request, ScheduleError> {
        self.repo.get_request(id)?.ok_or(ScheduleError::NotFound(id))
    }
}

/// Held for the duration of a batch pass; clears the running flag on drop.
pub(super) struct BatchGuard<'a>(&'a AtomicBool);

impl<'a> BatchGuard<'a> {
    pub(super) fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BatchGuard(flag))
    }
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
