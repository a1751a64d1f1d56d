use std::collections::HashSet;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;
use crate::store::StoreError;

/// Storage the scheduler reads and writes through.
///
/// `create_reservation` must reject a second reservation for the same
/// (lab, date, period) with `StoreError::UniquenessViolation` at insert time,
/// regardless of what earlier reads returned.
pub trait Repository: Send + Sync {
    /// Active labs of `group`, ordered by name.
    fn find_active_resources_by_group(&self, group: &str) -> Result<Vec<Lab>, StoreError>;

    /// Labs of `group` holding a reservation at (date, period).
    fn find_occupied_resource_ids(
        &self,
        date: NaiveDate,
        period: Period,
        group: &str,
    ) -> Result<HashSet<Ulid>, StoreError>;

    fn find_reservation_by_request(&self, request_id: Ulid) -> Result<Option<Reservation>, StoreError>;

    fn find_reservation_at(
        &self,
        lab_id: Ulid,
        date: NaiveDate,
        period: Period,
    ) -> Result<Option<Reservation>, StoreError>;

    fn create_reservation(
        &self,
        lab_id: Ulid,
        request_id: Ulid,
        date: NaiveDate,
        period: Period,
    ) -> Result<Reservation, StoreError>;

    /// Move the request's reservation (if any) to `lab_id` at the request's slot,
    /// as one atomic step.
    fn replace_reservation(&self, request_id: Ulid, lab_id: Ulid) -> Result<Reservation, StoreError>;

    fn delete_reservation(&self, id: Ulid) -> Result<(), StoreError>;

    fn set_request_status(&self, request_id: Ulid, status: RequestStatus) -> Result<(), StoreError>;

    fn set_request_group(&self, request_id: Ulid, group: &str) -> Result<(), StoreError>;

    /// Requests in any of `statuses`, in submission order.
    fn list_requests_by_status(&self, statuses: &[RequestStatus]) -> Result<Vec<Request>, StoreError>;

    fn get_resource(&self, id: Ulid) -> Result<Option<Lab>, StoreError>;

    fn get_request(&self, id: Ulid) -> Result<Option<Request>, StoreError>;

    fn get_requester_preferred_resource(&self, requester_id: Ulid) -> Result<Option<Ulid>, StoreError>;

    /// Who holds each lab of `group` at (date, period).
    fn find_occupants(
        &self,
        date: NaiveDate,
        period: Period,
        group: &str,
    ) -> Result<Vec<Occupant>, StoreError>;
}
