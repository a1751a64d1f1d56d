use std::collections::HashSet;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;
use crate::scheduler::Repository;

use super::{Store, StoreError};

impl Repository for Store {
    fn find_active_resources_by_group(&self, group: &str) -> Result<Vec<Lab>, StoreError> {
        Ok(self.active_labs_in_group(group))
    }

    fn find_occupied_resource_ids(
        &self,
        date: NaiveDate,
        period: Period,
        group: &str,
    ) -> Result<HashSet<Ulid>, StoreError> {
        Ok(self.occupied_lab_ids(date, period, group))
    }

    fn find_reservation_by_request(&self, request_id: Ulid) -> Result<Option<Reservation>, StoreError> {
        Ok(self.reservation_for_request(&request_id))
    }

    fn find_reservation_at(
        &self,
        lab_id: Ulid,
        date: NaiveDate,
        period: Period,
    ) -> Result<Option<Reservation>, StoreError> {
        Ok(self.reservation_at(lab_id, date, period))
    }

    fn create_reservation(
        &self,
        lab_id: Ulid,
        request_id: Ulid,
        date: NaiveDate,
        period: Period,
    ) -> Result<Reservation, StoreError> {
        Store::create_reservation(self, lab_id, request_id, date, period)
    }

    fn replace_reservation(&self, request_id: Ulid, lab_id: Ulid) -> Result<Reservation, StoreError> {
        Store::replace_reservation(self, request_id, lab_id)
    }

    fn delete_reservation(&self, id: Ulid) -> Result<(), StoreError> {
        Store::delete_reservation(self, id).map(|_| ())
    }

    fn set_request_status(&self, request_id: Ulid, status: RequestStatus) -> Result<(), StoreError> {
        Store::set_request_status(self, request_id, status)
    }

    fn set_request_group(&self, request_id: Ulid, group: &str) -> Result<(), StoreError> {
        Store::set_request_group(self, request_id, group)
    }

    fn list_requests_by_status(&self, statuses: &[RequestStatus]) -> Result<Vec<Request>, StoreError> {
        Ok(self.requests_by_status(statuses))
    }

    fn get_resource(&self, id: Ulid) -> Result<Option<Lab>, StoreError> {
        Ok(self.get_lab(&id))
    }

    fn get_request(&self, id: Ulid) -> Result<Option<Request>, StoreError> {
        Ok(Store::get_request(self, &id))
    }

    fn get_requester_preferred_resource(&self, requester_id: Ulid) -> Result<Option<Ulid>, StoreError> {
        Ok(self
            .requesters
            .get(&requester_id)
            .and_then(|r| r.preferred_lab))
    }

    fn find_occupants(
        &self,
        date: NaiveDate,
        period: Period,
        group: &str,
    ) -> Result<Vec<Occupant>, StoreError> {
        Ok(self.occupants(date, period, group))
    }
}
