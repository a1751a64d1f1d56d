use std::net::SocketAddr;

use crate::scheduler::{Assignment, ScheduleError};

// ── Scheduling ──────────────────────────────────────────────────

/// Counter: single-request assignments. Labels: outcome.
pub const ASSIGNMENTS_TOTAL: &str = "labslot_assignments_total";

/// Counter: reservation inserts that lost a race and re-read occupancy.
pub const UNIQUENESS_RETRIES_TOTAL: &str = "labslot_uniqueness_retries_total";

/// Counter: completed auto-schedule passes.
pub const BATCH_RUNS_TOTAL: &str = "labslot_batch_runs_total";

/// Histogram: auto-schedule pass duration in seconds.
pub const BATCH_DURATION_SECONDS: &str = "labslot_batch_duration_seconds";

/// Counter: conflict diagnoses served.
pub const SUGGESTION_SEARCHES_TOTAL: &str = "labslot_suggestion_searches_total";

/// Histogram: (date, period) candidates examined per diagnosis.
pub const SUGGESTION_CANDIDATES_SCANNED: &str = "labslot_suggestion_candidates_scanned";

// ── Storage ─────────────────────────────────────────────────────

/// Counter: events appended to a school's WAL.
pub const WAL_APPENDS_TOTAL: &str = "labslot_wal_appends_total";

/// Counter: WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "labslot_wal_compactions_total";

/// Gauge: number of open schools (loaded stores).
pub const SCHOOLS_ACTIVE: &str = "labslot_schools_active";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus metrics exporter: {e}"),
    }
}

/// Map an assignment result to a short label for metrics.
pub fn assignment_outcome(result: &Result<Assignment, ScheduleError>) -> &'static str {
    match result {
        Ok(a) if a.already_assigned => "already_assigned",
        Ok(a) if a.preferred => "preferred",
        Ok(_) => "assigned",
        Err(ScheduleError::NoEligibleResource { .. }) => "no_eligible_resource",
        Err(_) => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Reservation;
    use chrono::NaiveDate;
    use ulid::Ulid;

    fn assignment(already_assigned: bool, preferred: bool) -> Assignment {
        Assignment {
            reservation: Reservation {
                id: Ulid::new(),
                lab_id: Ulid::new(),
                request_id: Ulid::new(),
                date: NaiveDate::from_ymd_opt(2025, 9, 8).unwrap(),
                period: 1,
            },
            already_assigned,
            preferred,
        }
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(assignment_outcome(&Ok(assignment(false, false))), "assigned");
        assert_eq!(assignment_outcome(&Ok(assignment(false, true))), "preferred");
        assert_eq!(assignment_outcome(&Ok(assignment(true, false))), "already_assigned");
        assert_eq!(
            assignment_outcome(&Err(ScheduleError::NoEligibleResource {
                request_id: Ulid::new(),
                group: "Science".into(),
            })),
            "no_eligible_resource"
        );
        assert_eq!(assignment_outcome(&Err(ScheduleError::ScheduleInProgress)), "error");
    }
}
