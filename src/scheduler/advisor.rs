use chrono::{Days, NaiveDate};
use serde::Serialize;
use ulid::Ulid;

use crate::limits::MAX_FREE_LABS_PER_SUGGESTION;
use crate::model::*;
use crate::observability;

use super::{check_search_bounds, Repository, ScheduleError, Scheduler};

pub const CONFLICT_REASON: &str = "Every suitable lab is already booked for this date and period.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestSummary {
    pub id: Ulid,
    pub date: NaiveDate,
    pub date_str: String,
    pub period: Period,
    pub group: String,
    pub class_name: String,
}

/// An alternative slot with at least one free lab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Suggestion {
    pub date: NaiveDate,
    pub date_str: String,
    pub period: Period,
    pub free_labs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnosis {
    pub request: RequestSummary,
    pub reason: String,
    /// Who holds the request's own slot right now.
    pub occupied: Vec<Occupant>,
    pub suggestions: Vec<Suggestion>,
}

/// `origin`, then `origin - 1`, `origin + 1`, `origin - 2`, ... out to ±`day_window`.
/// Dates outside chrono's range are skipped.
pub fn candidate_dates(origin: NaiveDate, day_window: u32) -> impl Iterator<Item = NaiveDate> {
    std::iter::once(Some(origin))
        .chain((1..=u64::from(day_window)).flat_map(move |delta| {
            [
                origin.checked_sub_days(Days::new(delta)),
                origin.checked_add_days(Days::new(delta)),
            ]
        }))
        .flatten()
}

impl<R: Repository> Scheduler<R> {
    /// `explain` with the scheduler's configured search bounds.
    pub fn explain_default(&self, request_id: Ulid) -> Result<Diagnosis, ScheduleError> {
        let s = &self.settings;
        self.explain(request_id, s.max_period, s.day_window, s.top_k)
    }

    /// Report who occupies the request's slot and up to `top_k` nearby slots with a
    /// free lab of its group. Read-only.
    pub fn explain(
        &self,
        request_id: Ulid,
        max_period: u32,
        day_window: u32,
        top_k: usize,
    ) -> Result<Diagnosis, ScheduleError> {
        check_search_bounds(max_period, day_window, top_k)?;
        let request = self.load_request(request_id)?;
        let group = self.resolver.resolve(&*self.repo, &request)?;
        let labs = self.repo.find_active_resources_by_group(&group)?;
        let occupied = self
            .repo
            .find_occupants(request.date, request.period, &group)?;

        let mut suggestions = Vec::new();
        let mut scanned = 0u64;
        if top_k > 0 && !labs.is_empty() {
            'search: for date in candidate_dates(request.date, day_window) {
                for period in 1..=max_period {
                    if (date, period) == request.slot() {
                        continue;
                    }
                    scanned += 1;
                    let taken = self.repo.find_occupied_resource_ids(date, period, &group)?;
                    let free_labs: Vec<String> = labs
                        .iter()
                        .filter(|lab| !taken.contains(&lab.id))
                        .take(MAX_FREE_LABS_PER_SUGGESTION)
                        .map(|lab| lab.name.clone())
                        .collect();
                    if free_labs.is_empty() {
                        continue;
                    }
                    suggestions.push(Suggestion {
                        date,
                        date_str: display_date(date),
                        period,
                        free_labs,
                    });
                    if suggestions.len() >= top_k {
                        break 'search;
                    }
                }
            }
        }

        metrics::counter!(observability::SUGGESTION_SEARCHES_TOTAL).increment(1);
        metrics::histogram!(observability::SUGGESTION_CANDIDATES_SCANNED).record(scanned as f64);

        Ok(Diagnosis {
            request: RequestSummary {
                id: request.id,
                date: request.date,
                date_str: display_date(request.date),
                period: request.period,
                group,
                class_name: request.class_name,
            },
            reason: CONFLICT_REASON.to_string(),
            occupied,
            suggestions,
        })
    }
}
