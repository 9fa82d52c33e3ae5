use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use super::error::ScheduleError;

pub type TableId = i64;
pub type CellId = i64;
pub type GroupId = i64;

pub const DAYS_PER_WEEK: u8 = 7;

/// Wall-clock time of day at minute resolution, written as "HH:MM".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotTime(u16);

impl SlotTime {
    /// Hours wrap at 24 and minutes at 60.
    pub const fn at(hour: u8, minute: u8) -> Self {
        SlotTime((hour % 24) as u16 * 60 + (minute % 60) as u16)
    }

    pub fn from_minutes(minutes: u16) -> Option<Self> {
        (minutes < 24 * 60).then_some(SlotTime(minutes))
    }

    pub fn minutes(self) -> u16 {
        self.0
    }
}

impl FromStr for SlotTime {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = NaiveTime::parse_from_str(s.trim(), "%H:%M")?;
        Ok(SlotTime((t.hour() * 60 + t.minute()) as u16))
    }
}

impl fmt::Display for SlotTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

impl Serialize for SlotTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SlotTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Mixed,
}

impl Gender {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "male" => Some(Gender::Male),
            "female" => Some(Gender::Female),
            "mixed" => Some(Gender::Mixed),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Mixed => "mixed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleTable {
    pub id: TableId,
    pub name: String,
    pub description: Option<String>,
    pub active: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// A lesson placed in a table. `period` is derived from `start_time`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleCell {
    pub id: CellId,
    pub table_id: TableId,
    pub day_of_week: u8,
    pub start_time: SlotTime,
    pub end_time: SlotTime,
    pub period: u32,
    pub duration_class: u8,
    pub education_level: String,
    pub grade: Option<String>,
    pub gender: Option<Gender>,
    pub subject_id: i64,
    pub teacher_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub subject_id: i64,
    pub teacher_id: i64,
    pub education_level: String,
    pub student_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellDraft {
    pub table_id: TableId,
    pub day_of_week: u8,
    pub start_time: SlotTime,
    pub end_time: SlotTime,
    pub education_level: String,
    pub grade: Option<String>,
    pub gender: Option<Gender>,
    pub subject_id: i64,
    pub teacher_id: i64,
}

impl CellDraft {
    /// Reads a create/update payload. Fields are checked in a fixed order so
    /// the first reported problem is stable for a given payload.
    pub fn from_json(input: &Map<String, Value>) -> Result<Self, ScheduleError> {
        let table_id = required_id(input, "tableId")?;
        let education_level = required_text(input, "educationLevel")?;
        let subject_id = required_id(input, "subjectId")?;
        let teacher_id = required_id(input, "teacherId")?;

        let day = match input.get("dayOfWeek") {
            None | Some(Value::Null) => {
                return Err(ScheduleError::validation("dayOfWeek", "is required"))
            }
            Some(v) => v
                .as_i64()
                .ok_or_else(|| ScheduleError::validation("dayOfWeek", "must be an integer"))?,
        };
        if !(0..DAYS_PER_WEEK as i64).contains(&day) {
            return Err(ScheduleError::validation("dayOfWeek", "must be in 0..=6"));
        }

        let start_time = required_time(input, "startTime")?;
        let end_time = required_time(input, "endTime")?;

        let grade = optional_text(input, "grade")?;
        let gender = match optional_text(input, "gender")? {
            None => None,
            Some(raw) => Some(Gender::parse(&raw).ok_or_else(|| {
                ScheduleError::validation("gender", "must be one of: male, female, mixed")
            })?),
        };

        Ok(CellDraft {
            table_id,
            day_of_week: day as u8,
            start_time,
            end_time,
            education_level,
            grade,
            gender,
            subject_id,
            teacher_id,
        })
    }
}

fn required_id(input: &Map<String, Value>, key: &str) -> Result<i64, ScheduleError> {
    match input.get(key) {
        None | Some(Value::Null) => Err(ScheduleError::validation(key, "is required")),
        Some(v) => v
            .as_i64()
            .filter(|n| *n > 0)
            .ok_or_else(|| ScheduleError::validation(key, "must be a positive integer")),
    }
}

fn required_text(input: &Map<String, Value>, key: &str) -> Result<String, ScheduleError> {
    optional_text(input, key)?.ok_or_else(|| ScheduleError::validation(key, "is required"))
}

fn optional_text(input: &Map<String, Value>, key: &str) -> Result<Option<String>, ScheduleError> {
    match input.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => {
            let s = v
                .as_str()
                .ok_or_else(|| ScheduleError::validation(key, "must be a string"))?
                .trim();
            Ok((!s.is_empty()).then(|| s.to_string()))
        }
    }
}

fn required_time(input: &Map<String, Value>, key: &str) -> Result<SlotTime, ScheduleError> {
    let raw = required_text(input, key)?;
    raw.parse()
        .map_err(|_| ScheduleError::validation(key, format!("malformed time {raw:?}, expected HH:MM")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(v: Value) -> Map<String, Value> {
        v.as_object().cloned().expect("object")
    }

    #[test]
    fn slot_time_parses_and_prints_padded() {
        let t: SlotTime = "08:05".parse().expect("parse");
        assert_eq!(t.minutes(), 485);
        assert_eq!(t.to_string(), "08:05");
        assert!("25:00".parse::<SlotTime>().is_err());
        assert!("noon".parse::<SlotTime>().is_err());
    }

    #[test]
    fn draft_requires_fields_in_order() {
        let e = CellDraft::from_json(&payload(json!({ "educationLevel": "B" }))).unwrap_err();
        assert_eq!(e.field(), Some("tableId"));

        let e = CellDraft::from_json(&payload(json!({
            "tableId": 1, "educationLevel": "B", "subjectId": 10, "teacherId": 7,
            "dayOfWeek": 1, "startTime": "08:00"
        })))
        .unwrap_err();
        assert_eq!(e.field(), Some("endTime"));
    }

    #[test]
    fn draft_rejects_bad_gender_and_day() {
        let base = json!({
            "tableId": 1, "educationLevel": "B", "subjectId": 10, "teacherId": 7,
            "dayOfWeek": 7, "startTime": "08:00", "endTime": "09:30"
        });
        let e = CellDraft::from_json(&payload(base.clone())).unwrap_err();
        assert_eq!(e.field(), Some("dayOfWeek"));

        let mut m = payload(base);
        m.insert("dayOfWeek".into(), json!(2));
        m.insert("gender".into(), json!("other"));
        let e = CellDraft::from_json(&m).unwrap_err();
        assert_eq!(e.field(), Some("gender"));

        m.insert("gender".into(), json!("Mixed"));
        let d = CellDraft::from_json(&m).expect("valid draft");
        assert_eq!(d.gender, Some(Gender::Mixed));
        assert_eq!(d.grade, None);
    }
}
