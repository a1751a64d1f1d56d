use std::collections::{BTreeSet, HashSet};

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::Store;

impl Store {
    pub fn get_lab(&self, id: &Ulid) -> Option<Lab> {
        self.labs.get(id).map(|e| e.value().clone())
    }

    pub fn get_week(&self, id: &Ulid) -> Option<Week> {
        self.weeks.get(id).map(|e| e.value().clone())
    }

    pub fn get_requester(&self, id: &Ulid) -> Option<Requester> {
        self.requesters.get(id).map(|e| e.value().clone())
    }

    pub fn get_request(&self, id: &Ulid) -> Option<Request> {
        self.requests.get(id).map(|e| e.value().clone())
    }

    pub fn get_reservation(&self, id: &Ulid) -> Option<Reservation> {
        self.reservations.get(id).map(|e| e.value().clone())
    }

    pub fn find_lab_by_name(&self, name: &str) -> Option<Lab> {
        let id = *self.lab_names.get(name.trim())?;
        self.get_lab(&id)
    }

    /// All labs, by group then name.
    pub fn list_labs(&self) -> Vec<Lab> {
        let mut labs: Vec<Lab> = self.labs.iter().map(|e| e.value().clone()).collect();
        labs.sort_by(|a, b| a.group.cmp(&b.group).then_with(|| a.name.cmp(&b.name)));
        labs
    }

    /// Active labs of one group, by name. This order decides "first free".
    pub fn active_labs_in_group(&self, group: &str) -> Vec<Lab> {
        let mut labs: Vec<Lab> = self
            .labs
            .iter()
            .filter(|e| e.is_eligible_for(group))
            .map(|e| e.value().clone())
            .collect();
        labs.sort_by(|a, b| a.name.cmp(&b.name));
        labs
    }

    /// Distinct groups with at least one active lab.
    pub fn active_groups(&self) -> Vec<String> {
        let groups: BTreeSet<String> = self
            .labs
            .iter()
            .filter(|e| e.active)
            .map(|e| e.group.clone())
            .collect();
        groups.into_iter().collect()
    }

    /// Weeks, newest school year first, then by week number.
    pub fn list_weeks(&self) -> Vec<Week> {
        let mut weeks: Vec<Week> = self.weeks.iter().map(|e| e.value().clone()).collect();
        weeks.sort_by(|a, b| {
            b.school_year
                .cmp(&a.school_year)
                .then_with(|| a.week_no.cmp(&b.week_no))
        });
        weeks
    }

    pub fn active_weeks(&self) -> Vec<Week> {
        let mut weeks = self.list_weeks();
        weeks.retain(|w| w.active);
        weeks
    }

    /// Requesters by name.
    pub fn list_requesters(&self) -> Vec<Requester> {
        let mut requesters: Vec<Requester> =
            self.requesters.iter().map(|e| e.value().clone()).collect();
        requesters.sort_by(|a, b| a.full_name.cmp(&b.full_name).then_with(|| a.id.cmp(&b.id)));
        requesters
    }

    /// All requests, latest slot first.
    pub fn list_requests(&self) -> Vec<Request> {
        let mut requests: Vec<Request> = self.requests.iter().map(|e| e.value().clone()).collect();
        requests.sort_by(|a, b| (b.date, b.period, b.seq).cmp(&(a.date, a.period, a.seq)));
        requests
    }

    pub fn requests_of(&self, requester_id: Ulid) -> Vec<Request> {
        let mut requests: Vec<Request> = self
            .requests
            .iter()
            .filter(|e| e.requester_id == requester_id)
            .map(|e| e.value().clone())
            .collect();
        requests.sort_by(|a, b| (b.date, b.period, b.seq).cmp(&(a.date, a.period, a.seq)));
        requests
    }

    /// Requests in any of `statuses`, in submission order.
    pub fn requests_by_status(&self, statuses: &[RequestStatus]) -> Vec<Request> {
        let mut requests: Vec<Request> = self
            .requests
            .iter()
            .filter(|e| statuses.contains(&e.status))
            .map(|e| e.value().clone())
            .collect();
        requests.sort_by_key(|r| r.seq);
        requests
    }

    pub fn reservation_for_request(&self, request_id: &Ulid) -> Option<Reservation> {
        let id = *self.by_request.get(request_id)?;
        self.get_reservation(&id)
    }

    pub fn reservation_at(&self, lab_id: Ulid, date: NaiveDate, period: Period) -> Option<Reservation> {
        let key = SlotKey {
            lab_id,
            date,
            period,
        };
        let id = *self.slots.get(&key)?;
        self.get_reservation(&id)
    }

    /// Labs of `group` (active or not) holding a reservation at (date, period).
    pub fn occupied_lab_ids(&self, date: NaiveDate, period: Period, group: &str) -> HashSet<Ulid> {
        self.labs
            .iter()
            .filter(|lab| lab.group == group)
            .filter(|lab| {
                self.slots.contains_key(&SlotKey {
                    lab_id: lab.id,
                    date,
                    period,
                })
            })
            .map(|lab| lab.id)
            .collect()
    }

    /// Who holds each lab of `group` at (date, period), by lab name.
    pub fn occupants(&self, date: NaiveDate, period: Period, group: &str) -> Vec<Occupant> {
        let mut occupants: Vec<Occupant> = self
            .reservations
            .iter()
            .filter(|r| r.date == date && r.period == period)
            .filter_map(|r| {
                let lab = self.labs.get(&r.lab_id)?;
                if lab.group != group {
                    return None;
                }
                let request = self.requests.get(&r.request_id)?;
                let requester_name = self
                    .requesters
                    .get(&request.requester_id)
                    .map(|t| t.full_name.clone())
                    .unwrap_or_default();
                Some(Occupant {
                    lab_name: lab.name.clone(),
                    requester_name,
                    class_name: request.class_name.clone(),
                })
            })
            .collect();
        occupants.sort_by(|a, b| a.lab_name.cmp(&b.lab_name));
        occupants
    }

    /// Reservations joined with lab, request and requester, by (date, period, lab name).
    /// Restricted to one requester when `requester_id` is given.
    pub fn reservation_rows(&self, requester_id: Option<Ulid>) -> Vec<ReservationRow> {
        let mut rows: Vec<ReservationRow> = self
            .reservations
            .iter()
            .filter_map(|r| {
                let request = self.requests.get(&r.request_id)?;
                if requester_id.is_some_and(|id| id != request.requester_id) {
                    return None;
                }
                let lab = self.labs.get(&r.lab_id)?;
                let requester_name = self
                    .requesters
                    .get(&request.requester_id)
                    .map(|t| t.full_name.clone())
                    .unwrap_or_default();
                Some(ReservationRow {
                    reservation_id: r.id,
                    date: r.date,
                    period: r.period,
                    lab_id: lab.id,
                    lab_name: lab.name.clone(),
                    lab_group: lab.group.clone(),
                    class_name: request.class_name.clone(),
                    requester_id: request.requester_id,
                    requester_name,
                })
            })
            .collect();
        rows.sort_by(|a, b| {
            (a.date, a.period, &a.lab_name).cmp(&(b.date, b.period, &b.lab_name))
        });
        rows
    }

    pub fn lab_count(&self) -> usize {
        self.labs.len()
    }

    pub fn request_count(&self) -> usize {
        self.requests.len()
    }

    pub fn reservation_count(&self) -> usize {
        self.reservations.len()
    }

    /// Number of requests in `status`.
    pub fn count_by_status(&self, status: RequestStatus) -> usize {
        self.requests.iter().filter(|r| r.status == status).count()
    }
}
