use super::error::{Clash, ScheduleError};
use super::grid::PlacedCell;
use super::slots::{OffGridPolicy, SlotCatalog};
use super::span::{resolve_span, SpanInfo};
use super::types::{CellDraft, CellId, SlotTime, TableId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// The cell being edited; `None` for a new cell.
    pub cell_id: Option<CellId>,
    pub table_id: TableId,
    pub day_of_week: u8,
    pub start_time: SlotTime,
    pub end_time: SlotTime,
    pub period: u32,
    pub span: SpanInfo,
    pub rounded_from: Option<SlotTime>,
}

pub fn plan_placement(
    draft: &CellDraft,
    cell_id: Option<CellId>,
    catalog: &SlotCatalog,
    policy: OffGridPolicy,
) -> Result<Candidate, ScheduleError> {
    let mut span = resolve_span(draft.start_time, draft.end_time, catalog.slot_minutes())?;
    let start = catalog.resolve_start(draft.start_time, policy)?;

    let mut start_time = draft.start_time;
    let mut rounded_from = None;
    if let Some(rounded) = start.rounded_to {
        if rounded >= draft.end_time {
            return Err(ScheduleError::validation(
                "startTime",
                format!(
                    "{} rounds to {}, which is not before the end time {}",
                    draft.start_time, rounded, draft.end_time
                ),
            ));
        }
        rounded_from = Some(draft.start_time);
        start_time = rounded;
        span = resolve_span(start_time, draft.end_time, catalog.slot_minutes())?;
    }

    let last_period = start.period + span.span - 1;
    if last_period > catalog.period_count() {
        return Err(ScheduleError::validation(
            "endTime",
            format!(
                "lesson needs periods {}..={} but the day has {} slots",
                start.period,
                last_period,
                catalog.period_count()
            ),
        ));
    }

    Ok(Candidate {
        cell_id,
        table_id: draft.table_id,
        day_of_week: draft.day_of_week,
        start_time,
        end_time: draft.end_time,
        period: start.period,
        span,
        rounded_from,
    })
}

pub fn overlaps(a_start: u32, a_span: u32, b_start: u32, b_span: u32) -> bool {
    a_start < b_start + b_span && b_start < a_start + a_span
}

pub fn validate_placement<'a, I>(candidate: &Candidate, existing: I) -> Result<(), ScheduleError>
where
    I: IntoIterator<Item = &'a PlacedCell>,
{
    let conflicts: Vec<Clash> = existing
        .into_iter()
        .filter(|c| c.cell.table_id == candidate.table_id)
        .filter(|c| c.cell.day_of_week == candidate.day_of_week)
        .filter(|c| Some(c.cell.id) != candidate.cell_id)
        .filter(|c| overlaps(candidate.period, candidate.span.span, c.cell.period, c.span))
        .map(|c| Clash {
            cell_id: c.cell.id,
            period: c.cell.period,
            span: c.span,
            start_time: c.cell.start_time.to_string(),
            end_time: c.cell.end_time.to_string(),
        })
        .collect();

    if conflicts.is_empty() {
        Ok(())
    } else {
        Err(ScheduleError::SlotConflict { conflicts })
    }
}
