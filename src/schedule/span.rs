use serde::Serialize;

use super::error::ScheduleError;
use super::types::SlotTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanInfo {
    pub minutes: u32,
    /// Consecutive periods occupied, at least 1.
    pub span: u32,
    /// Coarse 1..=4 bucket for display; never feeds back into `span`.
    pub duration_class: u8,
}

pub fn duration_class(minutes: u32) -> u8 {
    match minutes {
        0..=90 => 1,
        91..=120 => 2,
        121..=180 => 3,
        _ => 4,
    }
}

pub fn resolve_span(
    start: SlotTime,
    end: SlotTime,
    slot_minutes: u16,
) -> Result<SpanInfo, ScheduleError> {
    if end <= start {
        return Err(ScheduleError::InvalidRange {
            start: start.to_string(),
            end: end.to_string(),
        });
    }
    let minutes = u32::from(end.minutes() - start.minutes());
    let span = minutes.div_ceil(u32::from(slot_minutes.max(1))).max(1);
    Ok(SpanInfo {
        minutes,
        span,
        duration_class: duration_class(minutes),
    })
}
