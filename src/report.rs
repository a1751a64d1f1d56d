use std::collections::BTreeMap;

use chrono::{Days, Months, NaiveDate};
use serde::Serialize;
use ulid::Ulid;

use crate::model::*;
use crate::store::{Store, StoreError};

/// Which dates a usage report covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportPeriod {
    Week(Ulid),
    /// Both ends inclusive.
    Range { start: NaiveDate, end: NaiveDate },
    Month { year: i32, month: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequesterUsage {
    pub requester_id: Ulid,
    pub full_name: String,
    pub group_name: Option<String>,
    pub phone: Option<String>,
    pub total_periods: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabUsage {
    pub lab_id: Ulid,
    pub name: String,
    pub group: String,
    pub total_periods: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageReport {
    pub title: String,
    pub start: NaiveDate,
    pub end_inclusive: NaiveDate,
    /// Requesters with at least one reserved period, by name.
    pub requesters: Vec<RequesterUsage>,
    /// Labs with at least one reserved period, by group then name.
    pub labs: Vec<LabUsage>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub total: usize,
    pub scheduled: usize,
    pub conflict: usize,
    /// Pending and approved together.
    pub pending: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleEntry {
    pub date: NaiveDate,
    pub date_str: String,
    pub period: Period,
    pub lab_name: String,
    pub lab_group: String,
    pub class_name: String,
}

/// One requester's reservations, in date order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequesterSchedule {
    pub requester_id: Ulid,
    pub requester_name: String,
    pub entries: Vec<ScheduleEntry>,
}

/// First day of the month and first day of the next one.
pub fn month_range(year: i32, month: u32) -> Option<(NaiveDate, NaiveDate)> {
    let start = NaiveDate::from_ymd_opt(year, month, 1)?;
    let end = start.checked_add_months(Months::new(1))?;
    Some((start, end))
}

/// Title and inclusive date bounds of a report period.
pub fn resolve_period(store: &Store, period: ReportPeriod) -> Result<(String, NaiveDate, NaiveDate), StoreError> {
    match period {
        ReportPeriod::Week(id) => {
            let week = store.get_week(&id).ok_or(StoreError::NotFound(id))?;
            Ok((
                format!("Lab usage, week {} ({})", week.week_no, week.school_year),
                week.start,
                week.end,
            ))
        }
        ReportPeriod::Range { start, end } => {
            if end < start {
                return Err(StoreError::Invalid("report range ends before it starts"));
            }
            Ok(("Lab usage by date range".to_string(), start, end))
        }
        ReportPeriod::Month { year, month } => {
            let (start, next) = month_range(year, month).ok_or(StoreError::Invalid("month out of range"))?;
            let end = next
                .checked_sub_days(Days::new(1))
                .ok_or(StoreError::Invalid("month out of range"))?;
            Ok((format!("Lab usage, {month:02}/{year}"), start, end))
        }
    }
}

pub fn usage_report(store: &Store, period: ReportPeriod) -> Result<UsageReport, StoreError> {
    let (title, start, end_inclusive) = resolve_period(store, period)?;
    let end_exclusive = end_inclusive
        .checked_add_days(Days::new(1))
        .ok_or(StoreError::Invalid("report range out of bounds"))?;
    let (requesters, labs) = usage_between(store, start, end_exclusive);
    Ok(UsageReport {
        title,
        start,
        end_inclusive,
        requesters,
        labs,
    })
}

/// Reserved periods per requester and per lab for `start <= date < end_exclusive`.
pub fn usage_between(
    store: &Store,
    start: NaiveDate,
    end_exclusive: NaiveDate,
) -> (Vec<RequesterUsage>, Vec<LabUsage>) {
    let mut per_requester: BTreeMap<Ulid, usize> = BTreeMap::new();
    let mut per_lab: BTreeMap<Ulid, usize> = BTreeMap::new();

    for row in store.reservation_rows(None) {
        if row.date < start || row.date >= end_exclusive {
            continue;
        }
        *per_requester.entry(row.requester_id).or_default() += 1;
        *per_lab.entry(row.lab_id).or_default() += 1;
    }

    let mut requesters: Vec<RequesterUsage> = per_requester
        .into_iter()
        .filter_map(|(id, total_periods)| {
            let r = store.get_requester(&id)?;
            Some(RequesterUsage {
                requester_id: id,
                full_name: r.full_name,
                group_name: r.group_name,
                phone: r.phone,
                total_periods,
            })
        })
        .collect();
    requesters.sort_by(|a, b| a.full_name.cmp(&b.full_name));

    let mut labs: Vec<LabUsage> = per_lab
        .into_iter()
        .filter_map(|(id, total_periods)| {
            let lab = store.get_lab(&id)?;
            Some(LabUsage {
                lab_id: id,
                name: lab.name,
                group: lab.group,
                total_periods,
            })
        })
        .collect();
    labs.sort_by(|a, b| a.group.cmp(&b.group).then_with(|| a.name.cmp(&b.name)));

    (requesters, labs)
}

pub fn status_counts(store: &Store) -> StatusCounts {
    StatusCounts {
        total: store.request_count(),
        scheduled: store.count_by_status(RequestStatus::Scheduled),
        conflict: store.count_by_status(RequestStatus::Conflict),
        pending: store.count_by_status(RequestStatus::Pending) + store.count_by_status(RequestStatus::Approved),
    }
}

/// Reservations grouped per requester, requesters by name ignoring case.
/// Restricted to one requester when `only` is given.
pub fn schedule_by_requester(store: &Store, only: Option<Ulid>) -> Vec<RequesterSchedule> {
    let mut blocks: BTreeMap<Ulid, RequesterSchedule> = BTreeMap::new();
    for row in store.reservation_rows(only) {
        let block = blocks.entry(row.requester_id).or_insert_with(|| RequesterSchedule {
            requester_id: row.requester_id,
            requester_name: row.requester_name.clone(),
            entries: Vec::new(),
        });
        block.entries.push(ScheduleEntry {
            date: row.date,
            date_str: display_date(row.date),
            period: row.period,
            lab_name: row.lab_name,
            lab_group: row.lab_group,
            class_name: row.class_name,
        });
    }
    let mut out: Vec<RequesterSchedule> = blocks.into_values().collect();
    out.sort_by_cached_key(|block| block.requester_name.to_lowercase());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{NewRequest, NewRequester, RequestDate};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn book(store: &Store, requester: &Requester, lab: &Lab, date: NaiveDate, period: Period) {
        let r = store
            .submit_request(NewRequest {
                requester_id: requester.id,
                class_name: "10A1".into(),
                num_students: 30,
                group: Some(lab.group.clone()),
                when: RequestDate::On(date),
                period,
                preferred_lab: None,
            })
            .unwrap();
        store.create_reservation(lab.id, r.id, date, period).unwrap();
        store.set_request_status(r.id, RequestStatus::Scheduled).unwrap();
    }

    fn fixture() -> (Store, Requester, Requester, Lab, Lab) {
        let store = Store::in_memory();
        let bob = store
            .create_requester(NewRequester {
                full_name: "Bob".into(),
                phone: Some("0900".into()),
                ..Default::default()
            })
            .unwrap();
        let alice = store
            .create_requester(NewRequester {
                full_name: "Alice".into(),
                group_name: Some("Science".into()),
                ..Default::default()
            })
            .unwrap();
        let sci = store.create_lab("Lab B", "Science", 40).unwrap();
        let chem = store.create_lab("Lab A", "Chemistry", 30).unwrap();
        (store, alice, bob, sci, chem)
    }

    #[test]
    fn month_range_handles_december() {
        assert_eq!(month_range(2025, 9), Some((d(2025, 9, 1), d(2025, 10, 1))));
        assert_eq!(month_range(2025, 12), Some((d(2025, 12, 1), d(2026, 1, 1))));
        assert_eq!(month_range(2025, 13), None);
    }

    #[test]
    fn usage_counts_within_bounds() {
        let (store, alice, bob, sci, chem) = fixture();
        book(&store, &alice, &sci, d(2025, 9, 8), 1);
        book(&store, &alice, &chem, d(2025, 9, 9), 2);
        book(&store, &bob, &sci, d(2025, 9, 9), 3);
        book(&store, &bob, &sci, d(2025, 10, 1), 1);

        let report = usage_report(&store, ReportPeriod::Month { year: 2025, month: 9 }).unwrap();
        assert_eq!(report.end_inclusive, d(2025, 9, 30));
        let people: Vec<(&str, usize)> = report
            .requesters
            .iter()
            .map(|r| (r.full_name.as_str(), r.total_periods))
            .collect();
        assert_eq!(people, vec![("Alice", 2), ("Bob", 1)]);

        let labs: Vec<(&str, usize)> = report.labs.iter().map(|l| (l.name.as_str(), l.total_periods)).collect();
        // Chemistry sorts before Science
        assert_eq!(labs, vec![("Lab A", 1), ("Lab B", 2)]);
    }

    #[test]
    fn range_report_is_inclusive() {
        let (store, alice, _, sci, _) = fixture();
        book(&store, &alice, &sci, d(2025, 9, 8), 1);
        book(&store, &alice, &sci, d(2025, 9, 12), 1);
        let report = usage_report(
            &store,
            ReportPeriod::Range {
                start: d(2025, 9, 8),
                end: d(2025, 9, 12),
            },
        )
        .unwrap();
        assert_eq!(report.requesters[0].total_periods, 2);

        let bad = usage_report(
            &store,
            ReportPeriod::Range {
                start: d(2025, 9, 12),
                end: d(2025, 9, 8),
            },
        );
        assert!(matches!(bad, Err(StoreError::Invalid(_))));
    }

    #[test]
    fn week_report_uses_week_bounds() {
        let (store, alice, _, sci, _) = fixture();
        let week = store.upsert_week("2025-2026", 1, d(2025, 9, 8), d(2025, 9, 14)).unwrap();
        book(&store, &alice, &sci, d(2025, 9, 14), 1);
        book(&store, &alice, &sci, d(2025, 9, 15), 1);
        let report = usage_report(&store, ReportPeriod::Week(week.id)).unwrap();
        assert_eq!(report.requesters[0].total_periods, 1);
        assert!(report.title.contains("week 1"));
        assert!(matches!(
            usage_report(&store, ReportPeriod::Week(Ulid::new())),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn status_counts_fold_approved_into_pending() {
        let (store, alice, _, sci, _) = fixture();
        book(&store, &alice, &sci, d(2025, 9, 8), 1);
        let r = store
            .submit_request(NewRequest {
                requester_id: alice.id,
                class_name: "10A2".into(),
                num_students: 30,
                group: None,
                when: RequestDate::On(d(2025, 9, 8)),
                period: 2,
                preferred_lab: None,
            })
            .unwrap();
        store.set_request_status(r.id, RequestStatus::Approved).unwrap();

        assert_eq!(
            status_counts(&store),
            StatusCounts {
                total: 2,
                scheduled: 1,
                conflict: 0,
                pending: 1
            }
        );
    }

    #[test]
    fn schedule_grouped_by_requester_name() {
        let (store, alice, bob, sci, chem) = fixture();
        book(&store, &bob, &sci, d(2025, 9, 8), 1);
        book(&store, &alice, &chem, d(2025, 9, 9), 1);
        book(&store, &alice, &sci, d(2025, 9, 8), 2);

        let blocks = schedule_by_requester(&store, None);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].requester_name, "Alice");
        assert_eq!(blocks[0].entries.len(), 2);
        assert_eq!(blocks[0].entries[0].date_str, "08/09/2025");

        let only_bob = schedule_by_requester(&store, Some(bob.id));
        assert_eq!(only_bob.len(), 1);
        assert_eq!(only_bob[0].entries[0].lab_name, "Lab B");

        let json = serde_json::to_value(&only_bob).unwrap();
        assert_eq!(json[0]["entries"][0]["period"], 1);
    }
}
