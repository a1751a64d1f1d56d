use chrono::NaiveDate;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Store, StoreError};

/// Outcome of removing a week.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeekRemoval {
    Deleted,
    /// Requests still point at the week, so it was only switched off.
    Deactivated,
}

#[derive(Debug, Clone, Default)]
pub struct NewRequester {
    pub full_name: String,
    pub group_name: Option<String>,
    pub phone: Option<String>,
    pub preferred_lab: Option<Ulid>,
}

/// Capacities of the labs created by `seed_default_labs`.
const SEED_CAPACITIES: [u32; 3] = [40, 40, 36];

fn required(value: &str, what: &'static str) -> Result<String, StoreError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(StoreError::Invalid(what));
    }
    if value.len() > MAX_NAME_LEN {
        return Err(StoreError::LimitExceeded("name too long"));
    }
    Ok(value.to_string())
}

fn optional(value: Option<String>) -> Result<Option<String>, StoreError> {
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) if v.len() > MAX_NAME_LEN => Err(StoreError::LimitExceeded("name too long")),
        Some(v) => Ok(Some(v.to_string())),
    }
}

impl Store {
    // ── Labs ─────────────────────────────────────────────────

    pub fn create_lab(&self, name: &str, group: &str, capacity: u32) -> Result<Lab, StoreError> {
        let name = required(name, "lab name is required")?;
        let group = required(group, "lab group is required")?;

        let mut w = self.write();
        if self.labs.len() >= MAX_LABS_PER_SCHOOL {
            return Err(StoreError::LimitExceeded("too many labs"));
        }
        if self.lab_names.contains_key(&name) {
            return Err(StoreError::DuplicateName(name));
        }

        let lab = Lab {
            id: Ulid::new(),
            name,
            group,
            capacity,
            active: true,
        };
        self.commit(
            &mut w,
            Event::LabCreated {
                id: lab.id,
                name: lab.name.clone(),
                group: lab.group.clone(),
                capacity: lab.capacity,
                active: lab.active,
            },
        )?;
        Ok(lab)
    }

    pub fn set_lab_active(&self, id: Ulid, active: bool) -> Result<(), StoreError> {
        let mut w = self.write();
        if !self.labs.contains_key(&id) {
            return Err(StoreError::NotFound(id));
        }
        self.commit(&mut w, Event::LabActiveSet { id, active })
    }

    /// Flip a lab's active flag. Returns the new value.
    pub fn toggle_lab(&self, id: Ulid) -> Result<bool, StoreError> {
        let mut w = self.write();
        let active = !self
            .labs
            .get(&id)
            .map(|lab| lab.active)
            .ok_or(StoreError::NotFound(id))?;
        self.commit(&mut w, Event::LabActiveSet { id, active })?;
        Ok(active)
    }

    /// Remove a lab nothing refers to. Labs with history should be deactivated instead.
    pub fn delete_lab(&self, id: Ulid) -> Result<(), StoreError> {
        let mut w = self.write();
        if !self.labs.contains_key(&id) {
            return Err(StoreError::NotFound(id));
        }
        if self.reservations.iter().any(|r| r.lab_id == id) {
            return Err(StoreError::InUse(id, "reservations"));
        }
        if self.requests.iter().any(|r| r.preferred_lab == Some(id)) {
            return Err(StoreError::InUse(id, "request preferences"));
        }
        if self.requesters.iter().any(|r| r.preferred_lab == Some(id)) {
            return Err(StoreError::InUse(id, "requester preferences"));
        }
        self.commit(&mut w, Event::LabDeleted { id })
    }

    /// Create the stock labs for `group` unless labs with those names exist.
    /// Returns how many were created.
    pub fn seed_default_labs(&self, group: &str) -> Result<usize, StoreError> {
        let mut created = 0;
        for (i, capacity) in SEED_CAPACITIES.into_iter().enumerate() {
            let name = format!("Phòng thực hành {} {}", group.trim(), i + 1);
            match self.create_lab(&name, group, capacity) {
                Ok(_) => created += 1,
                Err(StoreError::DuplicateName(_)) => {}
                Err(e) => return Err(e),
            }
        }
        if created > 0 {
            info!("seeded {created} labs for group {group}");
        }
        Ok(created)
    }

    // ── Weeks ────────────────────────────────────────────────

    /// Create the week or update the dates of the existing one with the same
    /// (school year, week number). Either way the week ends up active.
    pub fn upsert_week(
        &self,
        school_year: &str,
        week_no: u32,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Week, StoreError> {
        let school_year = required(school_year, "school year is required")?;
        if end < start {
            return Err(StoreError::Invalid("week ends before it starts"));
        }

        let mut w = self.write();
        let id = self
            .weeks
            .iter()
            .find(|wk| wk.school_year == school_year && wk.week_no == week_no)
            .map(|wk| wk.id)
            .unwrap_or_else(Ulid::new);
        let week = Week {
            id,
            school_year,
            week_no,
            start,
            end,
            active: true,
        };
        self.commit(&mut w, week_saved(&week))?;
        Ok(week)
    }

    pub fn update_week(
        &self,
        id: Ulid,
        school_year: &str,
        week_no: u32,
        start: NaiveDate,
        end: NaiveDate,
        active: bool,
    ) -> Result<Week, StoreError> {
        let school_year = required(school_year, "school year is required")?;
        if end < start {
            return Err(StoreError::Invalid("week ends before it starts"));
        }

        let mut w = self.write();
        if !self.weeks.contains_key(&id) {
            return Err(StoreError::NotFound(id));
        }
        if self
            .weeks
            .iter()
            .any(|wk| wk.id != id && wk.school_year == school_year && wk.week_no == week_no)
        {
            return Err(StoreError::DuplicateWeek {
                school_year,
                week_no,
            });
        }
        let week = Week {
            id,
            school_year,
            week_no,
            start,
            end,
            active,
        };
        self.commit(&mut w, week_saved(&week))?;
        Ok(week)
    }

    /// Flip a week's active flag. Returns the new value.
    pub fn toggle_week(&self, id: Ulid) -> Result<bool, StoreError> {
        let mut w = self.write();
        let mut week = self
            .weeks
            .get(&id)
            .map(|wk| wk.value().clone())
            .ok_or(StoreError::NotFound(id))?;
        week.active = !week.active;
        self.commit(&mut w, week_saved(&week))?;
        Ok(week.active)
    }

    /// Delete a week, or deactivate it when requests still reference it.
    pub fn delete_week(&self, id: Ulid) -> Result<WeekRemoval, StoreError> {
        let mut w = self.write();
        let Some(mut week) = self.weeks.get(&id).map(|wk| wk.value().clone()) else {
            return Err(StoreError::NotFound(id));
        };
        if self.requests.iter().any(|r| r.week_id == Some(id)) {
            week.active = false;
            self.commit(&mut w, week_saved(&week))?;
            return Ok(WeekRemoval::Deactivated);
        }
        self.commit(&mut w, Event::WeekDeleted { id })?;
        Ok(WeekRemoval::Deleted)
    }

    /// Calendar date of `weekday` (0 = Monday) within a week.
    pub fn date_for_weekday(&self, week_id: Ulid, weekday: u32) -> Result<NaiveDate, StoreError> {
        let week = self.weeks.get(&week_id).ok_or(StoreError::NotFound(week_id))?;
        week.date_for_weekday(weekday)
            .ok_or(StoreError::Invalid("weekday falls outside the week"))
    }

    // ── Requesters ───────────────────────────────────────────

    pub fn create_requester(&self, new: NewRequester) -> Result<Requester, StoreError> {
        let full_name = required(&new.full_name, "requester name is required")?;
        let group_name = optional(new.group_name)?;
        let phone = optional(new.phone)?;

        let mut w = self.write();
        if let Some(lab_id) = new.preferred_lab
            && !self.labs.contains_key(&lab_id)
        {
            return Err(StoreError::NotFound(lab_id));
        }
        let requester = Requester {
            id: Ulid::new(),
            full_name,
            group_name,
            phone,
            preferred_lab: new.preferred_lab,
        };
        self.commit(
            &mut w,
            Event::RequesterCreated {
                id: requester.id,
                full_name: requester.full_name.clone(),
                group_name: requester.group_name.clone(),
                phone: requester.phone.clone(),
                preferred_lab: requester.preferred_lab,
            },
        )?;
        Ok(requester)
    }

    pub fn set_requester_preference(
        &self,
        id: Ulid,
        preferred_lab: Option<Ulid>,
    ) -> Result<(), StoreError> {
        let mut w = self.write();
        if !self.requesters.contains_key(&id) {
            return Err(StoreError::NotFound(id));
        }
        if let Some(lab_id) = preferred_lab
            && !self.labs.contains_key(&lab_id)
        {
            return Err(StoreError::NotFound(lab_id));
        }
        self.commit(&mut w, Event::RequesterPreferenceSet { id, preferred_lab })
    }

    /// Remove a requester together with their requests and reservations.
    /// Returns the number of requests removed.
    pub fn delete_requester(&self, id: Ulid) -> Result<usize, StoreError> {
        let mut w = self.write();
        if !self.requesters.contains_key(&id) {
            return Err(StoreError::NotFound(id));
        }
        let request_ids: Vec<Ulid> = self
            .requests
            .iter()
            .filter(|r| r.requester_id == id)
            .map(|r| r.id)
            .collect();
        for request_id in &request_ids {
            self.remove_request_locked(&mut w, *request_id)?;
        }
        self.commit(&mut w, Event::RequesterDeleted { id })?;
        info!("deleted requester {id} with {} requests", request_ids.len());
        Ok(request_ids.len())
    }
}

fn week_saved(week: &Week) -> Event {
    Event::WeekSaved {
        id: week.id,
        school_year: week.school_year.clone(),
        week_no: week.week_no,
        start: week.start,
        end: week.end,
        active: week.active,
    }
}
