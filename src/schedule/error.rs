use serde::Serialize;
use thiserror::Error;

use super::types::CellId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Clash {
    pub cell_id: CellId,
    pub period: u32,
    pub span: u32,
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("{field}: {message}")]
    Validation { field: String, message: String },

    #[error("end time {end} must be after start time {start}")]
    InvalidRange { start: String, end: String },

    #[error("start time {time} is not on the slot grid")]
    OffGrid { time: String },

    #[error("slot conflict with {} existing cell(s)", conflicts.len())]
    SlotConflict { conflicts: Vec<Clash> },
}

impl ScheduleError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        ScheduleError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn field(&self) -> Option<&str> {
        match self {
            ScheduleError::Validation { field, .. } => Some(field),
            ScheduleError::InvalidRange { .. } => Some("endTime"),
            ScheduleError::OffGrid { .. } => Some("startTime"),
            ScheduleError::SlotConflict { .. } => None,
        }
    }
}
