use serde::Serialize;
use std::collections::BTreeSet;

use super::error::ScheduleError;
use super::types::{Group, GroupId, ScheduleCell};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompatibilityKey<'a> {
    pub subject_id: Option<i64>,
    pub teacher_id: Option<i64>,
    pub education_level: Option<&'a str>,
}

impl<'a> CompatibilityKey<'a> {
    pub fn of_cell(cell: &'a ScheduleCell) -> Self {
        CompatibilityKey {
            subject_id: Some(cell.subject_id),
            teacher_id: Some(cell.teacher_id),
            education_level: Some(cell.education_level.as_str()),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.subject_id.is_some()
            && self.teacher_id.is_some()
            && self.education_level.is_some_and(|l| !l.is_empty())
    }

    pub fn matches(&self, group: &Group) -> bool {
        self.is_complete()
            && self.subject_id == Some(group.subject_id)
            && self.teacher_id == Some(group.teacher_id)
            && self.education_level == Some(group.education_level.as_str())
    }
}

/// Groups sharing subject, teacher and education level with the key. An
/// incomplete key matches nothing.
pub fn find_compatible_groups<'g>(key: &CompatibilityKey<'_>, groups: &'g [Group]) -> Vec<&'g Group> {
    if !key.is_complete() {
        return Vec::new();
    }
    groups.iter().filter(|g| key.matches(g)).collect()
}

pub fn check_link_request(
    cell: &ScheduleCell,
    requested: &BTreeSet<GroupId>,
    known: &[Group],
    enforce: bool,
) -> Result<(), ScheduleError> {
    let missing: Vec<GroupId> = requested
        .iter()
        .copied()
        .filter(|id| !known.iter().any(|g| g.id == *id))
        .collect();
    if !missing.is_empty() {
        return Err(ScheduleError::validation(
            "groupIds",
            format!("unknown group id(s): {}", join_ids(&missing)),
        ));
    }
    if !enforce {
        return Ok(());
    }
    let key = CompatibilityKey::of_cell(cell);
    let incompatible: Vec<GroupId> = known
        .iter()
        .filter(|g| requested.contains(&g.id) && !key.matches(g))
        .map(|g| g.id)
        .collect();
    if !incompatible.is_empty() {
        return Err(ScheduleError::validation(
            "groupIds",
            format!(
                "group(s) {} do not match the cell's subject, teacher and education level",
                join_ids(&incompatible)
            ),
        ));
    }
    Ok(())
}

fn join_ids(ids: &[GroupId]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkDiff {
    pub added: Vec<GroupId>,
    pub removed: Vec<GroupId>,
    pub kept: Vec<GroupId>,
}

impl LinkDiff {
    pub fn between(current: &BTreeSet<GroupId>, desired: &BTreeSet<GroupId>) -> Self {
        LinkDiff {
            added: desired.difference(current).copied().collect(),
            removed: current.difference(desired).copied().collect(),
            kept: current.intersection(desired).copied().collect(),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::grid::tests::cell;

    fn group(id: GroupId, subject: i64, teacher: i64, level: &str) -> Group {
        Group {
            id,
            name: format!("G{id}"),
            subject_id: subject,
            teacher_id: teacher,
            education_level: level.into(),
            student_count: 12,
        }
    }

    fn groups() -> Vec<Group> {
        vec![
            group(1, 10, 7, "B"),
            group(2, 10, 7, "A"),
            group(3, 11, 7, "B"),
            group(4, 10, 8, "B"),
            group(5, 10, 7, "B"),
        ]
    }

    #[test]
    fn matches_on_all_three_fields() {
        let gs = groups();
        let key = CompatibilityKey {
            subject_id: Some(10),
            teacher_id: Some(7),
            education_level: Some("B"),
        };
        let ids: Vec<GroupId> = find_compatible_groups(&key, &gs).iter().map(|g| g.id).collect();
        assert_eq!(ids, vec![1, 5]);
    }

    #[test]
    fn incomplete_key_matches_nothing() {
        let gs = groups();
        for key in [
            CompatibilityKey { subject_id: None, teacher_id: Some(7), education_level: Some("B") },
            CompatibilityKey { subject_id: Some(10), teacher_id: None, education_level: Some("B") },
            CompatibilityKey { subject_id: Some(10), teacher_id: Some(7), education_level: None },
            CompatibilityKey { subject_id: Some(10), teacher_id: Some(7), education_level: Some("") },
        ] {
            assert!(find_compatible_groups(&key, &gs).is_empty());
        }
    }

    #[test]
    fn link_request_rejects_unknown_and_incompatible() {
        let gs = groups();
        let c = cell(1, 1, "09:00", "10:30", 3);

        let ok: BTreeSet<GroupId> = [1, 5].into_iter().collect();
        assert!(check_link_request(&c, &ok, &gs, true).is_ok());

        let unknown: BTreeSet<GroupId> = [1, 99].into_iter().collect();
        let e = check_link_request(&c, &unknown, &gs, true).unwrap_err();
        assert!(e.to_string().contains("99"));

        let mismatched: BTreeSet<GroupId> = [1, 2].into_iter().collect();
        assert!(check_link_request(&c, &mismatched, &gs, true).is_err());
        assert!(check_link_request(&c, &mismatched, &gs, false).is_ok());

        assert!(check_link_request(&c, &BTreeSet::new(), &gs, true).is_ok());
    }

    #[test]
    fn diff_describes_full_replacement() {
        let current: BTreeSet<GroupId> = [1, 2, 3].into_iter().collect();
        let desired: BTreeSet<GroupId> = [1].into_iter().collect();
        let d = LinkDiff::between(&current, &desired);
        assert_eq!(d.removed, vec![2, 3]);
        assert!(d.added.is_empty());
        assert_eq!(d.kept, vec![1]);

        assert!(LinkDiff::between(&current, &current).is_noop());
    }
}
