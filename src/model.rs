use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Days, NaiveDate};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. Used for creation timestamps only.
pub type Ms = i64;

/// One class period of a school day, starting at 1.
pub type Period = u32;

/// Group used when neither the request nor any preference names one.
pub const DEFAULT_GROUP: &str = "Tin học";

/// Lifecycle of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
    Scheduled,
    Conflict,
}

impl RequestStatus {
    pub const ALL: [RequestStatus; 4] = [
        RequestStatus::Pending,
        RequestStatus::Approved,
        RequestStatus::Scheduled,
        RequestStatus::Conflict,
    ];

    /// Statuses the batch scheduler picks up.
    pub const UNRESOLVED: [RequestStatus; 2] = [RequestStatus::Pending, RequestStatus::Approved];

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Scheduled => "scheduled",
            RequestStatus::Conflict => "conflict",
        }
    }

    /// Statuses that block the same requester from submitting again for a slot.
    pub fn is_live(&self) -> bool {
        !matches!(self, RequestStatus::Conflict)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(RequestStatus::Pending),
            "approved" => Ok(RequestStatus::Approved),
            "scheduled" => Ok(RequestStatus::Scheduled),
            "conflict" => Ok(RequestStatus::Conflict),
            other => Err(format!("unknown request status: {other}")),
        }
    }
}

/// A bookable lab. `capacity` is informational; occupancy is one request per slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lab {
    pub id: Ulid,
    pub name: String,
    pub group: String,
    pub capacity: u32,
    pub active: bool,
}

impl Lab {
    /// Active labs of the given group are the only ones a request may occupy.
    pub fn is_eligible_for(&self, group: &str) -> bool {
        self.active && self.group == group
    }
}

/// A registration week of a school year, inclusive on both ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Week {
    pub id: Ulid,
    pub school_year: String,
    pub week_no: u32,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub active: bool,
}

impl Week {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Date of `weekday` (0 = Monday .. 6 = Sunday) counted from the week's start.
    /// `None` when the weekday is out of range or falls outside the window.
    pub fn date_for_weekday(&self, weekday: u32) -> Option<NaiveDate> {
        if weekday > 6 {
            return None;
        }
        let date = self.start.checked_add_days(Days::new(weekday as u64))?;
        self.contains(date).then_some(date)
    }
}

/// A teacher submitting lab requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    pub id: Ulid,
    pub full_name: String,
    pub group_name: Option<String>,
    pub phone: Option<String>,
    /// Standing preference used when a request names none.
    pub preferred_lab: Option<Ulid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: Ulid,
    pub requester_id: Ulid,
    pub class_name: String,
    pub num_students: u32,
    /// Unset until submitted with one or inferred at allocation time.
    pub group: Option<String>,
    pub week_id: Option<Ulid>,
    pub date: NaiveDate,
    pub period: Period,
    pub status: RequestStatus,
    pub preferred_lab: Option<Ulid>,
    pub created_at: Ms,
    /// Store-assigned insertion order; breaks ties between equal `created_at`.
    pub seq: u64,
}

impl Request {
    pub fn slot(&self) -> (NaiveDate, Period) {
        (self.date, self.period)
    }
}

/// The committed binding of one lab to one request at one slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub lab_id: Ulid,
    pub request_id: Ulid,
    pub date: NaiveDate,
    pub period: Period,
}

impl Reservation {
    pub fn slot_key(&self) -> SlotKey {
        SlotKey {
            lab_id: self.lab_id,
            date: self.date,
            period: self.period,
        }
    }
}

/// Unit of exclusive occupancy: one lab, one date, one period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotKey {
    pub lab_id: Ulid,
    pub date: NaiveDate,
    pub period: Period,
}

/// Flat event records. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    LabCreated {
        id: Ulid,
        name: String,
        group: String,
        capacity: u32,
        active: bool,
    },
    LabActiveSet {
        id: Ulid,
        active: bool,
    },
    LabDeleted {
        id: Ulid,
    },
    WeekSaved {
        id: Ulid,
        school_year: String,
        week_no: u32,
        start: NaiveDate,
        end: NaiveDate,
        active: bool,
    },
    WeekDeleted {
        id: Ulid,
    },
    RequesterCreated {
        id: Ulid,
        full_name: String,
        group_name: Option<String>,
        phone: Option<String>,
        preferred_lab: Option<Ulid>,
    },
    RequesterPreferenceSet {
        id: Ulid,
        preferred_lab: Option<Ulid>,
    },
    RequesterDeleted {
        id: Ulid,
    },
    RequestSubmitted {
        id: Ulid,
        requester_id: Ulid,
        class_name: String,
        num_students: u32,
        group: Option<String>,
        week_id: Option<Ulid>,
        date: NaiveDate,
        period: Period,
        status: RequestStatus,
        preferred_lab: Option<Ulid>,
        created_at: Ms,
        seq: u64,
    },
    RequestStatusSet {
        id: Ulid,
        status: RequestStatus,
    },
    RequestGroupSet {
        id: Ulid,
        group: String,
    },
    RequestDeleted {
        id: Ulid,
    },
    ReservationCreated {
        id: Ulid,
        lab_id: Ulid,
        request_id: Ulid,
        date: NaiveDate,
        period: Period,
    },
    ReservationCancelled {
        id: Ulid,
        lab_id: Ulid,
    },
}

impl Event {
    /// The lab whose schedule this event changes, for per-lab notifications.
    pub fn lab_id(&self) -> Option<Ulid> {
        match self {
            Event::ReservationCreated { lab_id, .. } | Event::ReservationCancelled { lab_id, .. } => {
                Some(*lab_id)
            }
            Event::LabCreated { id, .. } | Event::LabActiveSet { id, .. } | Event::LabDeleted { id } => {
                Some(*id)
            }
            _ => None,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

/// Who currently holds a lab at a contested slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occupant {
    pub lab_name: String,
    pub requester_name: String,
    pub class_name: String,
}

/// A reservation joined with its lab, request and requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRow {
    pub reservation_id: Ulid,
    pub date: NaiveDate,
    pub period: Period,
    pub lab_id: Ulid,
    pub lab_name: String,
    pub lab_group: String,
    pub class_name: String,
    pub requester_id: Ulid,
    pub requester_name: String,
}

/// Day-month-year rendering used in human-facing payloads.
pub fn display_date(date: NaiveDate) -> String {
    format!("{:02}/{:02}/{}", date.day(), date.month(), date.year())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn week(start: NaiveDate, end: NaiveDate) -> Week {
        Week {
            id: Ulid::new(),
            school_year: "2025-2026".into(),
            week_no: 1,
            start,
            end,
            active: true,
        }
    }

    #[test]
    fn weekday_offsets_from_start() {
        let w = week(date(2025, 9, 8), date(2025, 9, 14));
        assert_eq!(w.date_for_weekday(0), Some(date(2025, 9, 8)));
        assert_eq!(w.date_for_weekday(4), Some(date(2025, 9, 12)));
        assert_eq!(w.date_for_weekday(6), Some(date(2025, 9, 14)));
    }

    #[test]
    fn weekday_out_of_range() {
        let w = week(date(2025, 9, 8), date(2025, 9, 14));
        assert_eq!(w.date_for_weekday(7), None);
    }

    #[test]
    fn weekday_past_short_window() {
        // Five-day week: Saturday is outside the window
        let w = week(date(2025, 9, 8), date(2025, 9, 12));
        assert_eq!(w.date_for_weekday(5), None);
        assert!(w.contains(date(2025, 9, 12)));
        assert!(!w.contains(date(2025, 9, 13)));
    }

    #[test]
    fn status_parse_and_display() {
        for s in RequestStatus::ALL {
            assert_eq!(s.as_str().parse::<RequestStatus>().unwrap(), s);
        }
        assert_eq!(" Scheduled ".parse::<RequestStatus>().unwrap(), RequestStatus::Scheduled);
        assert!("done".parse::<RequestStatus>().is_err());
        assert_eq!(RequestStatus::Conflict.to_string(), "conflict");
    }

    #[test]
    fn conflict_is_not_live() {
        assert!(RequestStatus::Pending.is_live());
        assert!(RequestStatus::Scheduled.is_live());
        assert!(!RequestStatus::Conflict.is_live());
    }

    #[test]
    fn lab_eligibility() {
        let mut lab = Lab {
            id: Ulid::new(),
            name: "Lab 1".into(),
            group: "Science".into(),
            capacity: 40,
            active: true,
        };
        assert!(lab.is_eligible_for("Science"));
        assert!(!lab.is_eligible_for("Chemistry"));
        lab.active = false;
        assert!(!lab.is_eligible_for("Science"));
    }

    #[test]
    fn event_lab_id() {
        let lab_id = Ulid::new();
        let created = Event::ReservationCreated {
            id: Ulid::new(),
            lab_id,
            request_id: Ulid::new(),
            date: date(2025, 9, 8),
            period: 3,
        };
        assert_eq!(created.lab_id(), Some(lab_id));
        assert_eq!(Event::RequestDeleted { id: Ulid::new() }.lab_id(), None);
    }

    #[test]
    fn display_date_format() {
        assert_eq!(display_date(date(2025, 9, 8)), "08/09/2025");
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::RequestSubmitted {
            id: Ulid::new(),
            requester_id: Ulid::new(),
            class_name: "10A1".into(),
            num_students: 35,
            group: Some("Science".into()),
            week_id: None,
            date: date(2025, 9, 8),
            period: 2,
            status: RequestStatus::Pending,
            preferred_lab: None,
            created_at: 1_700_000_000_000,
            seq: 7,
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
