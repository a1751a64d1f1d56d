use chrono::NaiveDate;
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{now_ms, Store, StoreError, Writer};

/// When a request is for: a calendar date, or a weekday of a registration week.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestDate {
    On(NaiveDate),
    /// `weekday` counts from 0 = Monday.
    InWeek { week_id: Ulid, weekday: u32 },
}

#[derive(Debug, Clone)]
pub struct NewRequest {
    pub requester_id: Ulid,
    pub class_name: String,
    pub num_students: u32,
    /// Blank means "infer at allocation time".
    pub group: Option<String>,
    pub when: RequestDate,
    pub period: Period,
    pub preferred_lab: Option<Ulid>,
}

impl Store {
    /// Record a new pending request.
    ///
    /// A preferred lab must be active and its group overrides any group given.
    /// The same requester may hold only one live request per (date, period).
    pub fn submit_request(&self, new: NewRequest) -> Result<Request, StoreError> {
        let class_name = new.class_name.trim().to_string();
        if class_name.is_empty() {
            return Err(StoreError::Invalid("class name is required"));
        }
        if class_name.len() > MAX_NAME_LEN {
            return Err(StoreError::LimitExceeded("class name too long"));
        }
        if new.period == 0 || new.period > MAX_PERIOD {
            return Err(StoreError::Invalid("period out of range"));
        }
        let mut group = match new.group.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(g) if g.len() > MAX_NAME_LEN => {
                return Err(StoreError::LimitExceeded("group name too long"));
            }
            Some(g) => Some(g.to_string()),
        };

        let mut w = self.write();
        if self.requests.len() >= MAX_REQUESTS_PER_SCHOOL {
            return Err(StoreError::LimitExceeded("too many requests"));
        }
        if !self.requesters.contains_key(&new.requester_id) {
            return Err(StoreError::NotFound(new.requester_id));
        }

        let (week_id, date) = match new.when {
            RequestDate::On(date) => (None, date),
            RequestDate::InWeek { week_id, weekday } => {
                let week = self.weeks.get(&week_id).ok_or(StoreError::NotFound(week_id))?;
                if !week.active {
                    return Err(StoreError::Invalid("week is not open for requests"));
                }
                let date = week
                    .date_for_weekday(weekday)
                    .ok_or(StoreError::Invalid("weekday falls outside the week"))?;
                (Some(week_id), date)
            }
        };

        if let Some(lab_id) = new.preferred_lab {
            let lab = self.labs.get(&lab_id).ok_or(StoreError::NotFound(lab_id))?;
            if !lab.active {
                return Err(StoreError::Invalid("preferred lab is not active"));
            }
            group = Some(lab.group.clone());
        }

        if let Some(existing) = self.requests.iter().find(|r| {
            r.requester_id == new.requester_id
                && r.date == date
                && r.period == new.period
                && r.status.is_live()
        }) {
            return Err(StoreError::AlreadyExists(existing.id));
        }

        let seq = w.next_seq;
        w.next_seq += 1;
        let request = Request {
            id: Ulid::new(),
            requester_id: new.requester_id,
            class_name,
            num_students: new.num_students,
            group,
            week_id,
            date,
            period: new.period,
            status: RequestStatus::Pending,
            preferred_lab: new.preferred_lab,
            created_at: now_ms(),
            seq,
        };
        self.commit(
            &mut w,
            Event::RequestSubmitted {
                id: request.id,
                requester_id: request.requester_id,
                class_name: request.class_name.clone(),
                num_students: request.num_students,
                group: request.group.clone(),
                week_id: request.week_id,
                date: request.date,
                period: request.period,
                status: request.status,
                preferred_lab: request.preferred_lab,
                created_at: request.created_at,
                seq: request.seq,
            },
        )?;
        debug!(
            "request {} for {} period {} submitted",
            request.id, request.date, request.period
        );
        Ok(request)
    }

    pub fn set_request_status(&self, id: Ulid, status: RequestStatus) -> Result<(), StoreError> {
        let mut w = self.write();
        let current = self
            .requests
            .get(&id)
            .map(|r| r.status)
            .ok_or(StoreError::NotFound(id))?;
        if current == status {
            return Ok(());
        }
        self.commit(&mut w, Event::RequestStatusSet { id, status })
    }

    pub fn set_request_group(&self, id: Ulid, group: &str) -> Result<(), StoreError> {
        let group = group.trim();
        if group.is_empty() {
            return Err(StoreError::Invalid("group is required"));
        }
        let mut w = self.write();
        let unchanged = self
            .requests
            .get(&id)
            .map(|r| r.group.as_deref() == Some(group))
            .ok_or(StoreError::NotFound(id))?;
        if unchanged {
            return Ok(());
        }
        self.commit(
            &mut w,
            Event::RequestGroupSet {
                id,
                group: group.to_string(),
            },
        )
    }

    /// Delete a request and the reservation bound to it, if any.
    pub fn delete_request(&self, id: Ulid) -> Result<(), StoreError> {
        let mut w = self.write();
        if !self.requests.contains_key(&id) {
            return Err(StoreError::NotFound(id));
        }
        self.remove_request_locked(&mut w, id)?;
        info!("deleted request {id}");
        Ok(())
    }

    /// Cancel the request's reservation, then drop the request. Caller holds the writer lock.
    pub(super) fn remove_request_locked(&self, w: &mut Writer, id: Ulid) -> Result<(), StoreError> {
        if let Some(reservation_id) = self.by_request.get(&id).map(|r| *r.value()) {
            self.cancel_reservation_locked(w, reservation_id)?;
        }
        self.commit(w, Event::RequestDeleted { id })
    }
}
