use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::info;

use crate::compactor;
use crate::limits::*;
use crate::notify::NotifyHub;
use crate::scheduler::{ScheduleError, Scheduler, SchedulerSettings};
use crate::store::Store;

/// One school's data and the scheduler working over it.
pub struct School {
    pub name: String,
    pub store: Arc<Store>,
    pub scheduler: Scheduler<Store>,
}

/// Manages per-school stores. Each school gets its own Store + WAL + compactor.
pub struct SchoolManager {
    schools: DashMap<String, Arc<School>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    settings: SchedulerSettings,
}

impl SchoolManager {
    pub fn new(
        data_dir: PathBuf,
        compact_threshold: u64,
        settings: SchedulerSettings,
    ) -> Result<Self, ScheduleError> {
        settings.validate()?;
        Ok(Self {
            schools: DashMap::new(),
            data_dir,
            compact_threshold,
            settings,
        })
    }

    /// Get or lazily open the store for the given school.
    ///
    /// Names are sanitised before lookup, so every spelling that maps to the same
    /// `<name>.wal` shares one store. Opening happens under the map entry's lock:
    /// concurrent callers for one school wait for the first and get its store.
    ///
    /// Opening replays the school's log and then gives any request left marked
    /// scheduled without a reservation a lab, or marks it a conflict.
    pub fn get_or_open(&self, school: &str) -> std::io::Result<Arc<School>> {
        if school.len() > MAX_SCHOOL_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "school name too long",
            ));
        }

        // Sanitize school name to prevent path traversal
        let safe_name: String = school
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty school name",
            ));
        }

        if let Some(found) = self.schools.get(&safe_name) {
            return Ok(found.value().clone());
        }
        // Checked before taking the entry lock: `len` reads every shard.
        if self.schools.len() >= MAX_SCHOOLS {
            return Err(std::io::Error::other("too many schools"));
        }

        let opened = match self.schools.entry(safe_name) {
            Entry::Occupied(e) => return Ok(e.get().clone()),
            Entry::Vacant(v) => {
                let opened = self.open_school(v.key())?;
                v.insert(opened.clone());
                opened
            }
        };
        metrics::gauge!(crate::observability::SCHOOLS_ACTIVE).set(self.schools.len() as f64);
        Ok(opened)
    }

    fn open_school(&self, safe_name: &str) -> std::io::Result<Arc<School>> {
        std::fs::create_dir_all(&self.data_dir)?;
        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let store = Arc::new(
            Store::open(&wal_path, Arc::new(NotifyHub::new())).map_err(std::io::Error::other)?,
        );
        let scheduler = Scheduler::new(store.clone(), self.settings.clone());
        let repaired = scheduler.backfill_scheduled().map_err(std::io::Error::other)?;
        if repaired.created > 0 || repaired.conflicts > 0 {
            info!("school {safe_name}: repaired {} scheduled requests", repaired.created + repaired.conflicts);
        }

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let compactor_store = store.clone();
            let threshold = self.compact_threshold;
            handle.spawn(async move {
                compactor::run_compactor(compactor_store, threshold).await;
            });
        }

        Ok(Arc::new(School {
            name: safe_name.to_string(),
            store,
            scheduler,
        }))
    }

    pub fn school_count(&self) -> usize {
        self.schools.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RequestStatus;
    use crate::store::{NewRequest, NewRequester, RequestDate};
    use chrono::NaiveDate;
    use std::fs;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("labslot_test_school").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn manager(dir: PathBuf) -> SchoolManager {
        SchoolManager::new(dir, 1000, SchedulerSettings::default()).unwrap()
    }

    #[tokio::test]
    async fn school_isolation() {
        let dir = test_data_dir("isolation");
        let sm = manager(dir);

        let a = sm.get_or_open("school_a").unwrap();
        let b = sm.get_or_open("school_b").unwrap();

        a.store.create_lab("Lab 1", "Science", 40).unwrap();
        assert_eq!(a.store.lab_count(), 1);
        assert_eq!(b.store.lab_count(), 0);
        // Same name is fine in another school
        b.store.create_lab("Lab 1", "Science", 40).unwrap();
    }

    #[tokio::test]
    async fn school_lazy_creation() {
        let dir = test_data_dir("lazy");
        let sm = manager(dir.clone());

        let entries: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert!(entries.is_empty());

        let _school = sm.get_or_open("north").unwrap();
        assert!(dir.join("north.wal").exists());
    }

    #[tokio::test]
    async fn same_school_returned() {
        let dir = test_data_dir("same");
        let sm = manager(dir);

        let s1 = sm.get_or_open("foo").unwrap();
        let s2 = sm.get_or_open("foo").unwrap();
        assert!(Arc::ptr_eq(&s1, &s2));
        assert_eq!(sm.school_count(), 1);
    }

    #[tokio::test]
    async fn school_name_sanitized() {
        let dir = test_data_dir("sanitize");
        let sm = manager(dir.clone());

        let school = sm.get_or_open("../evil").unwrap();
        assert_eq!(school.name, "evil");
        assert!(dir.join("evil.wal").exists());

        assert!(sm.get_or_open("../..").is_err());
    }

    #[tokio::test]
    async fn names_sharing_a_log_share_a_store() {
        let dir = test_data_dir("alias");
        let sm = manager(dir.clone());

        let plain = sm.get_or_open("x").unwrap();
        let dotted = sm.get_or_open("../x").unwrap();
        assert!(Arc::ptr_eq(&plain, &dotted));
        assert_eq!(sm.school_count(), 1);

        // One slot index behind both names: the second booking of the slot loses.
        let lab = plain.store.create_lab("Lab 1", "Science", 40).unwrap();
        assert!(dotted.store.create_lab("Lab 1", "Science", 40).is_err());
        let date = NaiveDate::from_ymd_opt(2026, 9, 14).unwrap();
        let submit = |school: &School, name: &str| {
            let teacher = school
                .store
                .create_requester(NewRequester {
                    full_name: name.into(),
                    ..Default::default()
                })
                .unwrap();
            school
                .store
                .submit_request(NewRequest {
                    requester_id: teacher.id,
                    class_name: "10A".into(),
                    num_students: 30,
                    group: Some("Science".into()),
                    when: RequestDate::On(date),
                    period: 1,
                    preferred_lab: None,
                })
                .unwrap()
                .id
        };
        let first = submit(plain.as_ref(), "Alice");
        let second = submit(dotted.as_ref(), "Bob");
        assert!(plain.scheduler.assign(first).is_ok());
        assert!(dotted.scheduler.assign(second).is_err());

        let reopened = Store::open(&dir.join("x.wal"), Arc::new(NotifyHub::new())).unwrap();
        assert_eq!(reopened.reservation_count(), 1);
        assert_eq!(reopened.reservation_at(lab.id, date, 1).unwrap().request_id, first);
    }

    #[test]
    fn concurrent_opens_get_one_store() {
        let dir = test_data_dir("concurrent_open");
        let sm = manager(dir);

        let opened: Vec<Arc<School>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let sm = &sm;
                    s.spawn(move || {
                        let name = if i % 2 == 0 { "south" } else { "./south" };
                        sm.get_or_open(name).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for school in &opened[1..] {
            assert!(Arc::ptr_eq(&opened[0], school));
        }
        assert_eq!(sm.school_count(), 1);
    }

    #[tokio::test]
    async fn school_name_too_long() {
        let dir = test_data_dir("name_too_long");
        let sm = manager(dir);

        let long_name = "x".repeat(MAX_SCHOOL_NAME_LEN + 1);
        let err = sm.get_or_open(&long_name).err().unwrap();
        assert!(err.to_string().contains("school name too long"));
    }

    #[test]
    fn invalid_settings_rejected() {
        let settings = SchedulerSettings {
            top_k: MAX_TOP_K + 1,
            ..SchedulerSettings::default()
        };
        assert!(SchoolManager::new(test_data_dir("settings"), 1000, settings).is_err());
    }

    #[test]
    fn open_backfills_scheduled_requests() {
        let dir = test_data_dir("backfill");
        let date = NaiveDate::from_ymd_opt(2026, 9, 14).unwrap();

        let request_id = {
            let store = Store::open(&dir.join("east.wal"), Arc::new(NotifyHub::new())).unwrap();
            store.create_lab("Lab 1", "Science", 40).unwrap();
            let teacher = store
                .create_requester(NewRequester {
                    full_name: "Alice".into(),
                    ..Default::default()
                })
                .unwrap();
            let request = store
                .submit_request(NewRequest {
                    requester_id: teacher.id,
                    class_name: "10A".into(),
                    num_students: 30,
                    group: Some("Science".into()),
                    when: RequestDate::On(date),
                    period: 2,
                    preferred_lab: None,
                })
                .unwrap();
            // Marked scheduled with no reservation behind it
            store.set_request_status(request.id, RequestStatus::Scheduled).unwrap();
            request.id
        };

        // No runtime here: the compactor is simply not started
        let sm = manager(dir);
        let school = sm.get_or_open("east").unwrap();
        let reservation = school.store.reservation_for_request(&request_id).unwrap();
        assert_eq!(reservation.date, date);
        assert_eq!(
            school.store.get_request(&request_id).unwrap().status,
            RequestStatus::Scheduled
        );
    }
}
