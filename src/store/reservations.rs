use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::{Store, StoreError, Writer};

impl Store {
    /// Bind `lab_id` to `request_id` at (date, period).
    ///
    /// The slot check runs under the writer lock, so of two racing inserts for the
    /// same slot exactly one succeeds and the other gets `UniquenessViolation`.
    pub fn create_reservation(
        &self,
        lab_id: Ulid,
        request_id: Ulid,
        date: NaiveDate,
        period: Period,
    ) -> Result<Reservation, StoreError> {
        let mut w = self.write();
        self.insert_reservation_locked(&mut w, lab_id, request_id, date, period)
    }

    /// Atomically move a request's reservation to `lab_id` at the request's own slot.
    /// If the request already holds exactly that slot the existing reservation is returned.
    pub fn replace_reservation(&self, request_id: Ulid, lab_id: Ulid) -> Result<Reservation, StoreError> {
        let mut w = self.write();
        let (date, period) = self
            .requests
            .get(&request_id)
            .map(|r| r.slot())
            .ok_or(StoreError::NotFound(request_id))?;

        let current = self.by_request.get(&request_id).map(|r| *r.value());
        let key = SlotKey {
            lab_id,
            date,
            period,
        };
        if let Some(holder) = self.slots.get(&key).map(|h| *h.value()) {
            if Some(holder) == current
                && let Some(existing) = self.reservations.get(&holder)
            {
                return Ok(existing.value().clone());
            }
            return Err(StoreError::UniquenessViolation {
                lab_id,
                date,
                period,
                existing: holder,
            });
        }
        if !self.labs.contains_key(&lab_id) {
            return Err(StoreError::NotFound(lab_id));
        }

        if let Some(old) = current {
            self.cancel_reservation_locked(&mut w, old)?;
        }
        self.insert_reservation_locked(&mut w, lab_id, request_id, date, period)
    }

    pub fn delete_reservation(&self, id: Ulid) -> Result<Reservation, StoreError> {
        let mut w = self.write();
        self.cancel_reservation_locked(&mut w, id)
    }

    fn insert_reservation_locked(
        &self,
        w: &mut Writer,
        lab_id: Ulid,
        request_id: Ulid,
        date: NaiveDate,
        period: Period,
    ) -> Result<Reservation, StoreError> {
        if !self.labs.contains_key(&lab_id) {
            return Err(StoreError::NotFound(lab_id));
        }
        if !self.requests.contains_key(&request_id) {
            return Err(StoreError::NotFound(request_id));
        }
        let key = SlotKey {
            lab_id,
            date,
            period,
        };
        if let Some(existing) = self.slots.get(&key).map(|h| *h.value()) {
            return Err(StoreError::UniquenessViolation {
                lab_id,
                date,
                period,
                existing,
            });
        }
        if let Some(existing) = self.by_request.get(&request_id).map(|h| *h.value()) {
            return Err(StoreError::AlreadyExists(existing));
        }

        let reservation = Reservation {
            id: Ulid::new(),
            lab_id,
            request_id,
            date,
            period,
        };
        self.commit(
            w,
            Event::ReservationCreated {
                id: reservation.id,
                lab_id,
                request_id,
                date,
                period,
            },
        )?;
        Ok(reservation)
    }

    pub(super) fn cancel_reservation_locked(&self, w: &mut Writer, id: Ulid) -> Result<Reservation, StoreError> {
        let reservation = self
            .reservations
            .get(&id)
            .map(|r| r.value().clone())
            .ok_or(StoreError::NotFound(id))?;
        self.commit(
            w,
            Event::ReservationCancelled {
                id,
                lab_id: reservation.lab_id,
            },
        )?;
        Ok(reservation)
    }
}
