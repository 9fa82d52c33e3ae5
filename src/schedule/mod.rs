mod compat;
mod error;
mod grid;
mod placement;
mod slots;
mod span;
mod types;

pub use compat::{check_link_request, find_compatible_groups, CompatibilityKey, LinkDiff};
pub use error::ScheduleError;
pub use grid::{GridSlot, GridStore};
pub use placement::{plan_placement, validate_placement, Candidate};
pub use slots::{OffGridPolicy, SlotCatalog};
pub use span::resolve_span;
pub use types::{
    CellDraft, CellId, Gender, Group, GroupId, ScheduleCell, ScheduleTable, SlotTime, TableId,
    DAYS_PER_WEEK,
};
