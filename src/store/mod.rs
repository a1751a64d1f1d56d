mod catalog;
mod error;
mod queries;
mod repository;
mod requests;
mod reservations;

pub use catalog::{NewRequester, WeekRemoval};
pub use error::StoreError;
pub use requests::{NewRequest, RequestDate};

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::info;
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or_default()
}

/// State owned by the single writer: the log and the creation sequence.
pub(super) struct Writer {
    wal: Option<Wal>,
    next_seq: u64,
}

/// In-memory tables for one school, made durable by a write-ahead log.
///
/// Reads go straight to the tables. Every mutation takes the writer lock, validates
/// against current state, appends its event to the log and only then applies it, so a
/// check-then-insert sequence is atomic with respect to every other writer.
pub struct Store {
    labs: DashMap<Ulid, Lab>,
    /// Lab name → id, to keep names unique.
    lab_names: DashMap<String, Ulid>,
    weeks: DashMap<Ulid, Week>,
    requesters: DashMap<Ulid, Requester>,
    requests: DashMap<Ulid, Request>,
    reservations: DashMap<Ulid, Reservation>,
    /// (lab, date, period) → reservation id. At most one entry per slot.
    slots: DashMap<SlotKey, Ulid>,
    /// Request id → reservation id.
    by_request: DashMap<Ulid, Ulid>,
    writer: Mutex<Writer>,
    notify: Arc<NotifyHub>,
}

impl Store {
    fn with_wal(wal: Option<Wal>, notify: Arc<NotifyHub>) -> Self {
        Self {
            labs: DashMap::new(),
            lab_names: DashMap::new(),
            weeks: DashMap::new(),
            requesters: DashMap::new(),
            requests: DashMap::new(),
            reservations: DashMap::new(),
            slots: DashMap::new(),
            by_request: DashMap::new(),
            writer: Mutex::new(Writer { wal, next_seq: 0 }),
            notify,
        }
    }

    /// A store with no log. Contents are lost on drop.
    pub fn in_memory() -> Self {
        Self::with_wal(None, Arc::new(NotifyHub::new()))
    }

    /// Open the store backed by the log at `path`, replaying whatever it holds.
    pub fn open(path: &Path, notify: Arc<NotifyHub>) -> Result<Self, StoreError> {
        let (wal, replay) = Wal::open(path)?;
        let store = Self::with_wal(Some(wal), notify);

        let mut next_seq = 0;
        for event in &replay.events {
            if let Event::RequestSubmitted { seq, .. } = event {
                next_seq = next_seq.max(seq + 1);
            }
            store.apply(event);
        }
        store.write().next_seq = next_seq;

        info!(
            "opened {}: {} events, {} labs, {} requests, {} reservations",
            path.display(),
            replay.events.len(),
            store.labs.len(),
            store.requests.len(),
            store.reservations.len()
        );
        Ok(store)
    }

    /// Follow reservation changes on one lab.
    ///
    /// Taken under the writer lock, so a lab cannot be deleted between the existence
    /// check and the subscription.
    pub fn subscribe(&self, lab_id: Ulid) -> Result<broadcast::Receiver<Event>, StoreError> {
        let _w = self.write();
        if !self.labs.contains_key(&lab_id) {
            return Err(StoreError::NotFound(lab_id));
        }
        Ok(self.notify.subscribe(lab_id))
    }

    pub(super) fn write(&self) -> MutexGuard<'_, Writer> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// WAL-append + apply + notify. Caller holds the writer lock.
    pub(super) fn commit(&self, writer: &mut Writer, event: Event) -> Result<(), StoreError> {
        if let Some(wal) = writer.wal.as_mut() {
            wal.append(&event)?;
            metrics::counter!(crate::observability::WAL_APPENDS_TOTAL).increment(1);
        }
        self.apply(&event);
        self.notify.send(&event);
        Ok(())
    }

    /// Apply an event to the tables and indexes. No validation: events in the log
    /// were validated before they were written.
    fn apply(&self, event: &Event) {
        match event {
            Event::LabCreated {
                id,
                name,
                group,
                capacity,
                active,
            } => {
                self.labs.insert(
                    *id,
                    Lab {
                        id: *id,
                        name: name.clone(),
                        group: group.clone(),
                        capacity: *capacity,
                        active: *active,
                    },
                );
                self.lab_names.insert(name.clone(), *id);
            }
            Event::LabActiveSet { id, active } => {
                if let Some(mut lab) = self.labs.get_mut(id) {
                    lab.active = *active;
                }
            }
            Event::LabDeleted { id } => {
                if let Some((_, lab)) = self.labs.remove(id) {
                    self.lab_names.remove_if(&lab.name, |_, owner| owner == id);
                }
            }
            Event::WeekSaved {
                id,
                school_year,
                week_no,
                start,
                end,
                active,
            } => {
                self.weeks.insert(
                    *id,
                    Week {
                        id: *id,
                        school_year: school_year.clone(),
                        week_no: *week_no,
                        start: *start,
                        end: *end,
                        active: *active,
                    },
                );
            }
            Event::WeekDeleted { id } => {
                self.weeks.remove(id);
            }
            Event::RequesterCreated {
                id,
                full_name,
                group_name,
                phone,
                preferred_lab,
            } => {
                self.requesters.insert(
                    *id,
                    Requester {
                        id: *id,
                        full_name: full_name.clone(),
                        group_name: group_name.clone(),
                        phone: phone.clone(),
                        preferred_lab: *preferred_lab,
                    },
                );
            }
            Event::RequesterPreferenceSet { id, preferred_lab } => {
                if let Some(mut r) = self.requesters.get_mut(id) {
                    r.preferred_lab = *preferred_lab;
                }
            }
            Event::RequesterDeleted { id } => {
                self.requesters.remove(id);
            }
            Event::RequestSubmitted {
                id,
                requester_id,
                class_name,
                num_students,
                group,
                week_id,
                date,
                period,
                status,
                preferred_lab,
                created_at,
                seq,
            } => {
                self.requests.insert(
                    *id,
                    Request {
                        id: *id,
                        requester_id: *requester_id,
                        class_name: class_name.clone(),
                        num_students: *num_students,
                        group: group.clone(),
                        week_id: *week_id,
                        date: *date,
                        period: *period,
                        status: *status,
                        preferred_lab: *preferred_lab,
                        created_at: *created_at,
                        seq: *seq,
                    },
                );
            }
            Event::RequestStatusSet { id, status } => {
                if let Some(mut r) = self.requests.get_mut(id) {
                    r.status = *status;
                }
            }
            Event::RequestGroupSet { id, group } => {
                if let Some(mut r) = self.requests.get_mut(id) {
                    r.group = Some(group.clone());
                }
            }
            Event::RequestDeleted { id } => {
                self.requests.remove(id);
            }
            Event::ReservationCreated {
                id,
                lab_id,
                request_id,
                date,
                period,
            } => {
                let reservation = Reservation {
                    id: *id,
                    lab_id: *lab_id,
                    request_id: *request_id,
                    date: *date,
                    period: *period,
                };
                self.slots.insert(reservation.slot_key(), *id);
                self.by_request.insert(*request_id, *id);
                self.reservations.insert(*id, reservation);
            }
            Event::ReservationCancelled { id, .. } => {
                if let Some((_, r)) = self.reservations.remove(id) {
                    self.slots.remove_if(&r.slot_key(), |_, holder| holder == id);
                    self.by_request.remove_if(&r.request_id, |_, holder| holder == id);
                }
            }
        }
    }

    /// Rewrite the log as the minimal event sequence that recreates current state.
    /// No-op for an in-memory store.
    pub fn compact(&self) -> Result<(), StoreError> {
        let mut writer = self.write();
        let Some(wal) = writer.wal.as_mut() else {
            return Ok(());
        };
        let events = self.snapshot_events();
        wal.compact(&events)?;
        metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
        info!("compacted {} to {} events", wal.path().display(), events.len());
        Ok(())
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.write()
            .wal
            .as_ref()
            .map_or(0, |wal| wal.appends_since_compact())
    }

    /// Current state as events, ordered so every reference points backwards.
    fn snapshot_events(&self) -> Vec<Event> {
        let mut events = Vec::new();

        let mut labs: Vec<Lab> = self.labs.iter().map(|e| e.value().clone()).collect();
        labs.sort_by(|a, b| a.name.cmp(&b.name));
        for lab in labs {
            events.push(Event::LabCreated {
                id: lab.id,
                name: lab.name,
                group: lab.group,
                capacity: lab.capacity,
                active: lab.active,
            });
        }

        for week in self.weeks.iter() {
            events.push(Event::WeekSaved {
                id: week.id,
                school_year: week.school_year.clone(),
                week_no: week.week_no,
                start: week.start,
                end: week.end,
                active: week.active,
            });
        }

        for r in self.requesters.iter() {
            events.push(Event::RequesterCreated {
                id: r.id,
                full_name: r.full_name.clone(),
                group_name: r.group_name.clone(),
                phone: r.phone.clone(),
                preferred_lab: r.preferred_lab,
            });
        }

        let mut requests: Vec<Request> = self.requests.iter().map(|e| e.value().clone()).collect();
        requests.sort_by_key(|r| r.seq);
        for r in requests {
            events.push(Event::RequestSubmitted {
                id: r.id,
                requester_id: r.requester_id,
                class_name: r.class_name,
                num_students: r.num_students,
                group: r.group,
                week_id: r.week_id,
                date: r.date,
                period: r.period,
                status: r.status,
                preferred_lab: r.preferred_lab,
                created_at: r.created_at,
                seq: r.seq,
            });
        }

        for r in self.reservations.iter() {
            events.push(Event::ReservationCreated {
                id: r.id,
                lab_id: r.lab_id,
                request_id: r.request_id,
                date: r.date,
                period: r.period,
            });
        }

        events
    }
}
