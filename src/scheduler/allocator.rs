use std::collections::HashSet;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::model::*;
use crate::observability;
use crate::store::StoreError;

use super::{BatchGuard, Repository, ScheduleError, Scheduler};

/// A request bound to a lab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Assignment {
    pub reservation: Reservation,
    /// The request was already bound; nothing was created.
    pub already_assigned: bool,
    /// The lab was the request's (or requester's) preferred one.
    pub preferred: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScheduleSummary {
    pub assigned: usize,
    pub conflicts: usize,
    /// Requests that already held a reservation.
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackfillSummary {
    pub created: usize,
    pub conflicts: usize,
}

/// Pick a lab for one slot: the preferred lab if it is among `labs` and free,
/// otherwise the first free lab in `labs` order. The flag tells which pass chose it.
pub fn choose_lab<'a>(
    labs: &'a [Lab],
    occupied: &HashSet<Ulid>,
    preferred: Option<Ulid>,
) -> Option<(&'a Lab, bool)> {
    if let Some(pref) = preferred
        && !occupied.contains(&pref)
        && let Some(lab) = labs.iter().find(|l| l.id == pref)
    {
        return Some((lab, true));
    }
    labs.iter()
        .find(|l| !occupied.contains(&l.id))
        .map(|lab| (lab, false))
}

impl<R: Repository> Scheduler<R> {
    /// Bind one request to a free eligible lab.
    ///
    /// Idempotent: a request that already holds a reservation gets it back, with its
    /// status set to scheduled if it was not already.
    /// On `NoEligibleResource` the request's status is left alone; marking it as a
    /// conflict is the caller's call.
    pub fn assign(&self, request_id: Ulid) -> Result<Assignment, ScheduleError> {
        let request = self.load_request(request_id)?;
        let result = self.assign_request(&request);
        metrics::counter!(
            observability::ASSIGNMENTS_TOTAL,
            "outcome" => observability::assignment_outcome(&result)
        )
        .increment(1);
        result
    }

    pub(super) fn assign_request(&self, request: &Request) -> Result<Assignment, ScheduleError> {
        if let Some(reservation) = self.repo.find_reservation_by_request(request.id)? {
            self.repo.set_request_status(request.id, RequestStatus::Scheduled)?;
            return Ok(Assignment {
                reservation,
                already_assigned: true,
                preferred: false,
            });
        }

        let group = self.resolver.resolve(&*self.repo, request)?;
        self.repo.set_request_group(request.id, &group)?;

        let labs = self.repo.find_active_resources_by_group(&group)?;
        if labs.is_empty() {
            return Err(ScheduleError::NoEligibleResource {
                request_id: request.id,
                group,
            });
        }

        let preferred = match request.preferred_lab {
            Some(lab_id) => Some(lab_id),
            None => self.repo.get_requester_preferred_resource(request.requester_id)?,
        };

        // Each lost race leaves one more lab occupied on the next read, so this
        // ends after at most labs.len() retries.
        let mut retries = 0;
        loop {
            let occupied = self
                .repo
                .find_occupied_resource_ids(request.date, request.period, &group)?;
            let Some((lab, via_preference)) = choose_lab(&labs, &occupied, preferred) else {
                return Err(ScheduleError::NoEligibleResource {
                    request_id: request.id,
                    group,
                });
            };

            match self
                .repo
                .create_reservation(lab.id, request.id, request.date, request.period)
            {
                Ok(reservation) => {
                    self.repo.set_request_status(request.id, RequestStatus::Scheduled)?;
                    debug!(
                        "request {} -> lab {} on {} period {}",
                        request.id, lab.name, request.date, request.period
                    );
                    return Ok(Assignment {
                        reservation,
                        already_assigned: false,
                        preferred: via_preference,
                    });
                }
                Err(StoreError::UniquenessViolation { existing, .. }) => {
                    metrics::counter!(observability::UNIQUENESS_RETRIES_TOTAL).increment(1);
                    retries += 1;
                    if retries > labs.len() {
                        return Err(ScheduleError::NoEligibleResource {
                            request_id: request.id,
                            group,
                        });
                    }
                    debug!(
                        "lab {} taken by {existing} before request {} could commit, retrying",
                        lab.name, request.id
                    );
                }
                Err(StoreError::AlreadyExists(_)) => {
                    // Another writer bound this request between our read and insert.
                    let reservation = self
                        .repo
                        .find_reservation_by_request(request.id)?
                        .ok_or(ScheduleError::NotFound(request.id))?;
                    self.repo.set_request_status(request.id, RequestStatus::Scheduled)?;
                    return Ok(Assignment {
                        reservation,
                        already_assigned: true,
                        preferred: false,
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Unresolved requests in the order a batch pass attempts them: requests with any
    /// preference first, then the rest, each tier first-submitted first.
    pub fn batch_order(&self) -> Result<Vec<Request>, ScheduleError> {
        let backlog = self.repo.list_requests_by_status(&RequestStatus::UNRESOLVED)?;
        let mut keyed = Vec::with_capacity(backlog.len());
        for request in backlog {
            let has_preference = request.preferred_lab.is_some()
                || self
                    .repo
                    .get_requester_preferred_resource(request.requester_id)?
                    .is_some();
            keyed.push((!has_preference, request.created_at, request.seq, request));
        }
        keyed.sort_by_key(|(no_preference, created_at, seq, _)| (*no_preference, *created_at, *seq));
        Ok(keyed.into_iter().map(|(_, _, _, request)| request).collect())
    }

    /// One greedy pass over every pending or approved request. No backtracking:
    /// a lab placed early in the pass is never moved to make room for a later request.
    pub fn run_auto_schedule(&self) -> Result<ScheduleSummary, ScheduleError> {
        let _guard = BatchGuard::acquire(&self.batch_running).ok_or(ScheduleError::ScheduleInProgress)?;
        let started = Instant::now();
        let mut summary = ScheduleSummary::default();

        for request in self.batch_order()? {
            if self.repo.find_reservation_by_request(request.id)?.is_some() {
                summary.skipped += 1;
                continue;
            }
            let result = self.assign_request(&request);
            metrics::counter!(
                observability::ASSIGNMENTS_TOTAL,
                "outcome" => observability::assignment_outcome(&result)
            )
            .increment(1);
            match result {
                Ok(_) => summary.assigned += 1,
                Err(ScheduleError::NoEligibleResource { .. }) => {
                    self.repo.set_request_status(request.id, RequestStatus::Conflict)?;
                    summary.conflicts += 1;
                }
                Err(e) => return Err(e),
            }
        }

        metrics::counter!(observability::BATCH_RUNS_TOTAL).increment(1);
        metrics::histogram!(observability::BATCH_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        info!(
            "auto-schedule: {} assigned, {} conflicts, {} already reserved",
            summary.assigned, summary.conflicts, summary.skipped
        );
        Ok(summary)
    }

    /// Give every request marked scheduled but lacking a reservation a lab, or mark it
    /// a conflict when none is free. Repairs state left by direct status edits.
    pub fn backfill_scheduled(&self) -> Result<BackfillSummary, ScheduleError> {
        let _guard = BatchGuard::acquire(&self.batch_running).ok_or(ScheduleError::ScheduleInProgress)?;
        let mut summary = BackfillSummary::default();

        for request in self.repo.list_requests_by_status(&[RequestStatus::Scheduled])? {
            if self.repo.find_reservation_by_request(request.id)?.is_some() {
                continue;
            }
            match self.assign_request(&request) {
                Ok(_) => summary.created += 1,
                Err(ScheduleError::NoEligibleResource { .. }) => {
                    self.repo.set_request_status(request.id, RequestStatus::Conflict)?;
                    summary.conflicts += 1;
                }
                Err(e) => return Err(e),
            }
        }

        if summary.created > 0 || summary.conflicts > 0 {
            info!(
                "backfill: {} reservations created, {} marked conflict",
                summary.created, summary.conflicts
            );
        }
        Ok(summary)
    }

    /// Put `request_id` on `lab_id` directly, skipping preference and search.
    /// Group match and slot uniqueness still apply; a rejected call changes nothing.
    pub fn manual_assign(&self, request_id: Ulid, lab_id: Ulid) -> Result<Assignment, ScheduleError> {
        let request = self.load_request(request_id)?;
        let lab = self
            .repo
            .get_resource(lab_id)?
            .ok_or(ScheduleError::NotFound(lab_id))?;
        if !lab.active {
            return Err(ScheduleError::ResourceInactive(lab_id));
        }
        let group = self.resolver.resolve(&*self.repo, &request)?;
        if lab.group != group {
            return Err(ScheduleError::GroupMismatch {
                required: group,
                actual: lab.group,
            });
        }
        if let Some(holder) = self.repo.find_reservation_at(lab.id, request.date, request.period)?
            && holder.request_id != request.id
        {
            return Err(ScheduleError::SlotTaken {
                reservation_id: holder.id,
                holder: holder.request_id,
            });
        }

        let previous = self.repo.find_reservation_by_request(request.id)?;
        let reservation = match self.repo.replace_reservation(request.id, lab.id) {
            Ok(r) => r,
            Err(StoreError::UniquenessViolation { existing, .. }) => {
                let holder = self
                    .repo
                    .find_reservation_at(lab.id, request.date, request.period)?
                    .map_or(existing, |r| r.request_id);
                return Err(ScheduleError::SlotTaken {
                    reservation_id: existing,
                    holder,
                });
            }
            Err(e) => return Err(e.into()),
        };
        self.repo.set_request_status(request.id, RequestStatus::Scheduled)?;

        let already_assigned = previous.as_ref().is_some_and(|p| p.id == reservation.id);
        info!(
            "manual assign: request {} -> lab {} on {} period {}",
            request.id, lab.name, request.date, request.period
        );
        Ok(Assignment {
            reservation,
            already_assigned,
            preferred: false,
        })
    }

    /// Administrative status change that keeps the reservation binding consistent.
    ///
    /// Setting `Scheduled` runs a normal assignment and marks the request a conflict
    /// when it fails. Any other status releases the request's reservation.
    pub fn override_status(&self, request_id: Ulid, status: RequestStatus) -> Result<(), ScheduleError> {
        let request = self.load_request(request_id)?;
        if status == RequestStatus::Scheduled {
            return match self.assign_request(&request) {
                Ok(_) => Ok(()),
                Err(e @ ScheduleError::NoEligibleResource { .. }) => {
                    self.repo.set_request_status(request.id, RequestStatus::Conflict)?;
                    warn!("request {} could not be scheduled, marked conflict", request.id);
                    Err(e)
                }
                Err(e) => Err(e),
            };
        }

        if let Some(reservation) = self.repo.find_reservation_by_request(request.id)? {
            self.repo.delete_reservation(reservation.id)?;
        }
        self.repo.set_request_status(request.id, status)?;
        Ok(())
    }
}
