//! Workspace configuration. Reading is lenient: anything missing or unusable
//! falls back to the built-in default.

use chrono::Weekday;
use rusqlite::Connection;
use serde_json::{Map, Value};

use crate::db;
use crate::schedule::{OffGridPolicy, SlotCatalog, SlotTime, DAYS_PER_WEEK};

pub const SCHEDULE_KEY: &str = "setup.schedule";
pub const LINKING_KEY: &str = "setup.linking";

pub const DEFAULT_SLOT_MINUTES: u16 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleSettings {
    pub first_slot: SlotTime,
    pub last_slot: SlotTime,
    pub slot_minutes: u16,
    pub week_start: Weekday,
    pub off_grid: OffGridPolicy,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        ScheduleSettings {
            first_slot: SlotTime::at(8, 0),
            last_slot: SlotTime::at(22, 30),
            slot_minutes: DEFAULT_SLOT_MINUTES,
            week_start: Weekday::Sat,
            off_grid: OffGridPolicy::Reject,
        }
    }
}

impl ScheduleSettings {
    pub fn from_json(obj: &Map<String, Value>) -> Self {
        let d = ScheduleSettings::default();
        let time = |k: &str, fallback: SlotTime| {
            obj.get(k)
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<SlotTime>().ok())
                .unwrap_or(fallback)
        };
        ScheduleSettings {
            first_slot: time("firstSlot", d.first_slot),
            last_slot: time("lastSlot", d.last_slot),
            slot_minutes: obj
                .get("slotMinutes")
                .and_then(|v| v.as_u64())
                .filter(|v| (5..=120).contains(v))
                .map(|v| v as u16)
                .unwrap_or(d.slot_minutes),
            week_start: obj
                .get("weekStartDay")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<Weekday>().ok())
                .unwrap_or(d.week_start),
            off_grid: obj
                .get("offGridPolicy")
                .and_then(|v| v.as_str())
                .and_then(OffGridPolicy::parse)
                .unwrap_or(d.off_grid),
        }
    }

    pub fn catalog(&self) -> anyhow::Result<SlotCatalog> {
        SlotCatalog::new(self.first_slot, self.last_slot, self.slot_minutes)
            .map_err(|e| anyhow::anyhow!("invalid schedule settings: {e}"))
    }

    /// Day names for indexes 0..=6, starting at the configured first day.
    pub fn day_labels(&self) -> Vec<&'static str> {
        let mut day = self.week_start;
        let mut out = Vec::with_capacity(DAYS_PER_WEEK as usize);
        for _ in 0..DAYS_PER_WEEK {
            out.push(weekday_name(day));
            day = day.succ();
        }
        out
    }
}

pub fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkingSettings {
    pub enforce_compatibility: bool,
}

impl Default for LinkingSettings {
    fn default() -> Self {
        LinkingSettings {
            enforce_compatibility: true,
        }
    }
}

impl LinkingSettings {
    pub fn from_json(obj: &Map<String, Value>) -> Self {
        LinkingSettings {
            enforce_compatibility: obj
                .get("enforceCompatibility")
                .and_then(|v| v.as_bool())
                .unwrap_or(true),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub schedule: ScheduleSettings,
    pub linking: LinkingSettings,
    pub catalog: SlotCatalog,
}

impl AppConfig {
    pub fn new(schedule: ScheduleSettings, linking: LinkingSettings) -> anyhow::Result<Self> {
        let catalog = schedule.catalog()?;
        Ok(AppConfig {
            schedule,
            linking,
            catalog,
        })
    }

    pub fn load(conn: &Connection) -> anyhow::Result<Self> {
        let schedule = load_section(conn, SCHEDULE_KEY)?
            .map(|o| ScheduleSettings::from_json(&o))
            .unwrap_or_default();
        let linking = load_section(conn, LINKING_KEY)?
            .map(|o| LinkingSettings::from_json(&o))
            .unwrap_or_default();
        match AppConfig::new(schedule, linking) {
            Ok(cfg) => Ok(cfg),
            Err(e) => {
                tracing::warn!(error = %e, "stored schedule settings unusable, using defaults");
                AppConfig::new(ScheduleSettings::default(), linking)
            }
        }
    }
}

fn load_section(conn: &Connection, key: &str) -> anyhow::Result<Option<Map<String, Value>>> {
    Ok(db::settings_get_json(conn, key)?.and_then(|v| v.as_object().cloned()))
}
