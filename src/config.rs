use std::path::PathBuf;
use std::str::FromStr;

use crate::model::DEFAULT_GROUP;
use crate::scheduler::SchedulerSettings;

/// Process configuration, read from `LABSLOT_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub school: String,
    pub scheduler: SchedulerSettings,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            school: "default".into(),
            scheduler: SchedulerSettings::default(),
            compact_threshold: 1000,
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unset or unparsable values keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Config::default();

        Self {
            data_dir: lookup("LABSLOT_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            school: lookup("LABSLOT_SCHOOL").unwrap_or(defaults.school),
            scheduler: SchedulerSettings {
                default_group: lookup("LABSLOT_DEFAULT_GROUP")
                    .filter(|g| !g.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_GROUP.to_string()),
                max_period: parsed(&lookup, "LABSLOT_MAX_PERIOD").unwrap_or(defaults.scheduler.max_period),
                day_window: parsed(&lookup, "LABSLOT_DAY_WINDOW").unwrap_or(defaults.scheduler.day_window),
                top_k: parsed(&lookup, "LABSLOT_TOP_K").unwrap_or(defaults.scheduler.top_k),
            },
            compact_threshold: parsed(&lookup, "LABSLOT_COMPACT_THRESHOLD").unwrap_or(defaults.compact_threshold),
            metrics_port: parsed(&lookup, "LABSLOT_METRICS_PORT"),
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse().ok())
}
