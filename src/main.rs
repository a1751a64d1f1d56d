use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::info;
use ulid::Ulid;

use labslot::compactor;
use labslot::config::Config;
use labslot::model::{Period, RequestStatus};
use labslot::report::{self, ReportPeriod};
use labslot::school::{School, SchoolManager};
use labslot::store::{NewRequest, NewRequester, RequestDate, WeekRemoval};

#[derive(Parser)]
#[command(name = "labslot")]
#[command(version)]
#[command(about = "Computer-lab booking: requests, automatic lab allocation and conflict advice")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// School to operate on. Each school has its own log under the data directory.
    #[arg(long, global = true)]
    school: Option<String>,

    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage labs
    Lab {
        #[command(subcommand)]
        action: LabCmd,
    },
    /// Manage registration weeks
    Week {
        #[command(subcommand)]
        action: WeekCmd,
    },
    /// Manage requesters
    Requester {
        #[command(subcommand)]
        action: RequesterCmd,
    },
    /// Submit or list lab requests
    Request {
        #[command(subcommand)]
        action: RequestCmd,
    },
    /// Run one auto-schedule pass over pending and approved requests
    Schedule,
    /// Give scheduled requests without a reservation a lab
    Backfill,
    /// Explain why a request has no lab and suggest alternative slots
    Explain {
        request_id: Ulid,
        #[arg(long)]
        max_period: Option<u32>,
        #[arg(long)]
        day_window: Option<u32>,
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// Put a request on a specific lab
    Assign { request_id: Ulid, lab_id: Ulid },
    /// Override a request's status
    Status { request_id: Ulid, status: RequestStatus },
    /// Usage report
    Report {
        #[command(subcommand)]
        period: ReportCmd,
    },
    /// Reservations per requester
    Timetable {
        #[arg(long)]
        requester: Option<Ulid>,
    },
    /// Request counts by status
    Stats,
    /// Rewrite the school's log as a snapshot
    Compact,
    /// Auto-schedule periodically until interrupted
    Watch {
        #[arg(long, default_value_t = 60)]
        interval_secs: u64,
        /// Print reservation changes on every lab as JSON lines
        #[arg(long)]
        follow: bool,
    },
}

#[derive(Subcommand)]
enum LabCmd {
    Add {
        name: String,
        group: String,
        #[arg(long, default_value_t = 40)]
        capacity: u32,
    },
    List,
    Toggle { id: Ulid },
    Delete { id: Ulid },
    /// Create the stock labs for a group
    Seed {
        #[arg(long)]
        group: Option<String>,
    },
}

#[derive(Subcommand)]
enum WeekCmd {
    /// Create a week, or update the dates of an existing one
    Save {
        school_year: String,
        week_no: u32,
        start: NaiveDate,
        end: NaiveDate,
    },
    List,
    Toggle { id: Ulid },
    Delete { id: Ulid },
}

#[derive(Subcommand)]
enum RequesterCmd {
    Add {
        full_name: String,
        #[arg(long)]
        group: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        lab: Option<Ulid>,
    },
    List,
    /// Set or clear the requester's preferred lab
    Prefer {
        id: Ulid,
        #[arg(long)]
        lab: Option<Ulid>,
    },
    Delete { id: Ulid },
}

#[derive(Subcommand)]
enum RequestCmd {
    Submit {
        requester_id: Ulid,
        class_name: String,
        period: Period,
        /// Calendar date (YYYY-MM-DD)
        #[arg(long, conflicts_with_all = ["week", "weekday"])]
        date: Option<NaiveDate>,
        #[arg(long, requires = "weekday")]
        week: Option<Ulid>,
        /// 0 = Monday
        #[arg(long, requires = "week")]
        weekday: Option<u32>,
        #[arg(long, default_value_t = 0)]
        students: u32,
        #[arg(long)]
        group: Option<String>,
        #[arg(long)]
        lab: Option<Ulid>,
    },
    List {
        #[arg(long)]
        status: Option<RequestStatus>,
        #[arg(long)]
        requester: Option<Ulid>,
    },
    Delete { id: Ulid },
}

#[derive(Subcommand)]
enum ReportCmd {
    Week { id: Ulid },
    Range { start: NaiveDate, end: NaiveDate },
    Month { year: i32, month: u32 },
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(school) = cli.school {
        config.school = school;
    }
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    labslot::observability::init(config.metrics_port);

    let manager = SchoolManager::new(
        config.data_dir.clone(),
        config.compact_threshold,
        config.scheduler.clone(),
    )?;
    let school = manager.get_or_open(&config.school)?;
    let store = &school.store;

    match cli.command {
        Commands::Lab { action } => match action {
            LabCmd::Add {
                name,
                group,
                capacity,
            } => print_json(&store.create_lab(&name, &group, capacity)?)?,
            LabCmd::List => print_json(&store.list_labs())?,
            LabCmd::Toggle { id } => {
                let active = store.toggle_lab(id)?;
                println!("lab {id} active: {active}");
            }
            LabCmd::Delete { id } => {
                store.delete_lab(id)?;
                println!("lab {id} deleted");
            }
            LabCmd::Seed { group } => {
                let group = group.unwrap_or_else(|| config.scheduler.default_group.clone());
                let created = store.seed_default_labs(&group)?;
                println!("{created} labs created for {group}");
            }
        },
        Commands::Week { action } => match action {
            WeekCmd::Save {
                school_year,
                week_no,
                start,
                end,
            } => print_json(&store.upsert_week(&school_year, week_no, start, end)?)?,
            WeekCmd::List => print_json(&store.list_weeks())?,
            WeekCmd::Toggle { id } => {
                let active = store.toggle_week(id)?;
                println!("week {id} active: {active}");
            }
            WeekCmd::Delete { id } => match store.delete_week(id)? {
                WeekRemoval::Deleted => println!("week {id} deleted"),
                WeekRemoval::Deactivated => {
                    println!("week {id} still has requests; deactivated instead")
                }
            },
        },
        Commands::Requester { action } => match action {
            RequesterCmd::Add {
                full_name,
                group,
                phone,
                lab,
            } => print_json(&store.create_requester(NewRequester {
                full_name,
                group_name: group,
                phone,
                preferred_lab: lab,
            })?)?,
            RequesterCmd::List => print_json(&store.list_requesters())?,
            RequesterCmd::Prefer { id, lab } => {
                store.set_requester_preference(id, lab)?;
                println!("requester {id} preference updated");
            }
            RequesterCmd::Delete { id } => {
                let removed = store.delete_requester(id)?;
                println!("requester {id} deleted with {removed} requests");
            }
        },
        Commands::Request { action } => match action {
            RequestCmd::Submit {
                requester_id,
                class_name,
                period,
                date,
                week,
                weekday,
                students,
                group,
                lab,
            } => {
                let when = match (date, week, weekday) {
                    (Some(date), _, _) => RequestDate::On(date),
                    (None, Some(week_id), Some(weekday)) => RequestDate::InWeek { week_id, weekday },
                    _ => return Err("either --date or --week with --weekday is required".into()),
                };
                print_json(&store.submit_request(NewRequest {
                    requester_id,
                    class_name,
                    num_students: students,
                    group,
                    when,
                    period,
                    preferred_lab: lab,
                })?)?
            }
            RequestCmd::List { status, requester } => {
                let mut requests = match requester {
                    Some(id) => store.requests_of(id),
                    None => store.list_requests(),
                };
                if let Some(status) = status {
                    requests.retain(|r| r.status == status);
                }
                print_json(&requests)?
            }
            RequestCmd::Delete { id } => {
                store.delete_request(id)?;
                println!("request {id} deleted");
            }
        },
        Commands::Schedule => print_json(&school.scheduler.run_auto_schedule()?)?,
        Commands::Backfill => print_json(&school.scheduler.backfill_scheduled()?)?,
        Commands::Explain {
            request_id,
            max_period,
            day_window,
            top_k,
        } => {
            let s = school.scheduler.settings();
            let diagnosis = school.scheduler.explain(
                request_id,
                max_period.unwrap_or(s.max_period),
                day_window.unwrap_or(s.day_window),
                top_k.unwrap_or(s.top_k),
            )?;
            print_json(&diagnosis)?
        }
        Commands::Assign { request_id, lab_id } => {
            print_json(&school.scheduler.manual_assign(request_id, lab_id)?)?
        }
        Commands::Status { request_id, status } => {
            school.scheduler.override_status(request_id, status)?;
            println!("request {request_id} is now {status}");
        }
        Commands::Report { period } => {
            let period = match period {
                ReportCmd::Week { id } => ReportPeriod::Week(id),
                ReportCmd::Range { start, end } => ReportPeriod::Range { start, end },
                ReportCmd::Month { year, month } => ReportPeriod::Month { year, month },
            };
            print_json(&report::usage_report(store, period)?)?
        }
        Commands::Timetable { requester } => {
            print_json(&report::schedule_by_requester(store, requester))?
        }
        Commands::Stats => print_json(&report::status_counts(store))?,
        Commands::Compact => {
            let before = store.appends_since_compact();
            store.compact()?;
            println!("compacted {} after {before} appends", school.name);
        }
        Commands::Watch {
            interval_secs,
            follow,
        } => {
            if follow {
                follow_labs(&school)?;
            }
            watch(school.clone(), interval_secs, config.compact_threshold).await
        }
    }

    Ok(())
}

/// Print every change on the school's current labs until their channels close.
fn follow_labs(school: &School) -> Result<(), Box<dyn std::error::Error>> {
    for lab in school.store.list_labs() {
        let mut rx = school.store.subscribe(lab.id)?;
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => match serde_json::to_string(&event) {
                        Ok(line) => println!("{line}"),
                        Err(e) => tracing::error!("cannot encode event: {e}"),
                    },
                    Err(RecvError::Lagged(n)) => tracing::warn!("lab {}: skipped {n} events", lab.name),
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }
    Ok(())
}

/// Auto-schedule every `interval_secs` until SIGTERM/ctrl-c.
async fn watch(school: Arc<School>, interval_secs: u64, compact_threshold: u64) {
    info!("watching {} every {interval_secs}s", school.name);
    info!("  compact threshold: {compact_threshold}");

    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {}
                        _ = sigterm.recv() => {}
                    }
                }
                Err(e) => {
                    tracing::warn!("failed to register SIGTERM handler: {e}");
                    ctrl_c.await.ok();
                }
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    tokio::pin!(shutdown);

    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let school = school.clone();
                let result = tokio::task::spawn_blocking(move || school.scheduler.run_auto_schedule()).await;
                match result {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) if e.is_recoverable() => tracing::warn!("auto-schedule skipped: {e}"),
                    Ok(Err(e)) => {
                        tracing::error!("auto-schedule failed: {e}");
                        break;
                    }
                    Err(e) => tracing::error!("auto-schedule task panicked: {e}"),
                }
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping");
                break;
            }
        }
    }

    // Leave a compact log behind for the next start
    let store = school.store.clone();
    match tokio::task::spawn_blocking(move || compactor::maybe_compact(&store, 1)).await {
        Ok(Err(e)) => tracing::error!("final compaction failed: {e}"),
        Err(e) => tracing::error!("final compaction task panicked: {e}"),
        Ok(Ok(_)) => {}
    }
    info!("labslot stopped");
}
