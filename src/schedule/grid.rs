use serde::Serialize;
use std::collections::HashMap;

use super::span::resolve_span;
use super::types::{CellId, ScheduleCell, TableId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacedCell {
    pub cell: ScheduleCell,
    pub span: u32,
}

impl PlacedCell {
    /// Half-open `[period, period + span)`.
    pub fn end_period(&self) -> u32 {
        self.cell.period + self.span
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum GridSlot {
    #[serde(rename_all = "camelCase")]
    Start { period: u32, cell_id: CellId, span: u32 },
    #[serde(rename_all = "camelCase")]
    Covered { period: u32, cell_id: CellId },
    Empty { period: u32 },
}

#[derive(Debug, Clone, Default)]
pub struct GridStore {
    table_id: TableId,
    cells: Vec<PlacedCell>,
    starts: HashMap<(u8, u32), usize>,
    max_span: u32,
}

impl GridStore {
    pub fn load(table_id: TableId, cells: Vec<ScheduleCell>, slot_minutes: u16) -> Self {
        let mut store = GridStore {
            table_id,
            cells: Vec::with_capacity(cells.len()),
            starts: HashMap::new(),
            max_span: 1,
        };
        for cell in cells {
            let span = match resolve_span(cell.start_time, cell.end_time, slot_minutes) {
                Ok(info) => info.span,
                Err(e) => {
                    tracing::warn!(cell_id = cell.id, error = %e, "stored cell has no valid range");
                    1
                }
            };
            store.insert(PlacedCell { cell, span });
        }
        store
    }

    fn insert(&mut self, placed: PlacedCell) {
        self.max_span = self.max_span.max(placed.span);
        self.starts.insert(
            (placed.cell.day_of_week, placed.cell.period),
            self.cells.len(),
        );
        self.cells.push(placed);
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn cells(&self) -> &[PlacedCell] {
        &self.cells
    }

    pub fn cells_on(&self, day: u8) -> impl Iterator<Item = &PlacedCell> + '_ {
        self.cells.iter().filter(move |c| c.cell.day_of_week == day)
    }

    pub fn cell_at(&self, day: u8, period: u32) -> Option<&PlacedCell> {
        self.starts.get(&(day, period)).map(|&i| &self.cells[i])
    }

    /// The earlier cell whose span reaches `period`, if any.
    pub fn covering(&self, day: u8, period: u32) -> Option<&PlacedCell> {
        let lowest = period.saturating_sub(self.max_span.saturating_sub(1)).max(1);
        (lowest..period)
            .rev()
            .filter_map(|start| self.cell_at(day, start))
            .find(|c| c.end_period() > period)
    }

    pub fn is_covered(&self, day: u8, period: u32) -> bool {
        self.covering(day, period).is_some()
    }

    pub fn overlapping(&self) -> Vec<(CellId, CellId)> {
        let mut pairs = Vec::new();
        for (i, a) in self.cells.iter().enumerate() {
            for b in &self.cells[i + 1..] {
                if a.cell.day_of_week == b.cell.day_of_week
                    && a.cell.period < b.end_period()
                    && b.cell.period < a.end_period()
                {
                    pairs.push((a.cell.id.min(b.cell.id), a.cell.id.max(b.cell.id)));
                }
            }
        }
        pairs.sort_unstable();
        pairs
    }

    /// One entry per period, multi-period cells rendered once at their start.
    pub fn render_day(&self, day: u8, period_count: u32) -> Vec<GridSlot> {
        (1..=period_count)
            .map(|period| {
                if let Some(c) = self.cell_at(day, period) {
                    GridSlot::Start {
                        period,
                        cell_id: c.cell.id,
                        span: c.span,
                    }
                } else if let Some(c) = self.covering(day, period) {
                    GridSlot::Covered {
                        period,
                        cell_id: c.cell.id,
                    }
                } else {
                    GridSlot::Empty { period }
                }
            })
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::schedule::types::SlotTime;

    pub(crate) fn cell(id: CellId, day: u8, start: &str, end: &str, period: u32) -> ScheduleCell {
        ScheduleCell {
            id,
            table_id: 1,
            day_of_week: day,
            start_time: start.parse::<SlotTime>().expect("start"),
            end_time: end.parse::<SlotTime>().expect("end"),
            period,
            duration_class: 1,
            education_level: "B".into(),
            grade: None,
            gender: None,
            subject_id: 10,
            teacher_id: 7,
        }
    }

    #[test]
    fn covered_periods_follow_span() {
        // 09:00 is period 3 in the default catalog; 90 minutes covers 3..=5.
        let store = GridStore::load(1, vec![cell(1, 1, "09:00", "10:30", 3)], 30);
        assert_eq!(store.cell_at(1, 3).map(|c| c.span), Some(3));
        assert!(!store.is_covered(1, 3));
        assert!(store.is_covered(1, 4));
        assert!(store.is_covered(1, 5));
        assert!(!store.is_covered(1, 6));
        assert!(!store.is_covered(2, 4));
        assert!(store.cell_at(1, 5).is_none());
    }

    #[test]
    fn scan_reaches_back_by_longest_span() {
        let store = GridStore::load(
            1,
            vec![
                cell(1, 0, "08:00", "12:30", 1),
                cell(2, 0, "13:00", "13:30", 11),
            ],
            30,
        );
        assert_eq!(store.covering(0, 9).map(|c| c.cell.id), Some(1));
        assert!(!store.is_covered(0, 10));
        assert!(!store.is_covered(0, 11));
        assert!(!store.is_covered(0, 1));
    }

    #[test]
    fn overlapping_pairs_are_reported_per_day() {
        let store = GridStore::load(
            1,
            vec![
                cell(4, 1, "09:00", "10:30", 3),
                cell(2, 1, "10:00", "10:30", 5),
                cell(3, 1, "10:30", "11:00", 6),
                cell(1, 2, "09:30", "10:00", 4),
            ],
            30,
        );
        assert_eq!(store.overlapping(), vec![(2, 4)]);

        let clean = GridStore::load(
            1,
            vec![cell(1, 1, "09:00", "10:30", 3), cell(2, 1, "10:30", "11:00", 6)],
            30,
        );
        assert!(clean.overlapping().is_empty());
    }

    #[test]
    fn render_emits_each_cell_once() {
        let store = GridStore::load(
            1,
            vec![
                cell(1, 1, "09:00", "10:30", 3),
                cell(2, 1, "10:30", "11:00", 6),
            ],
            30,
        );
        let row = store.render_day(1, 7);
        assert_eq!(
            row,
            vec![
                GridSlot::Empty { period: 1 },
                GridSlot::Empty { period: 2 },
                GridSlot::Start { period: 3, cell_id: 1, span: 3 },
                GridSlot::Covered { period: 4, cell_id: 1 },
                GridSlot::Covered { period: 5, cell_id: 1 },
                GridSlot::Start { period: 6, cell_id: 2, span: 1 },
                GridSlot::Empty { period: 7 },
            ]
        );
        let starts = row
            .iter()
            .filter(|s| matches!(s, GridSlot::Start { .. }))
            .count();
        assert_eq!(starts, store.cells_on(1).count());
    }
}
