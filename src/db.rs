use anyhow::Context;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use crate::schedule::{
    CellId, Gender, Group, GroupId, ScheduleCell, ScheduleTable, SlotTime, TableId,
};

pub const DB_FILE: &str = "timetable.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.to_string_lossy()))?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schedule_tables(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            description TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schedule_cells(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            table_id INTEGER NOT NULL,
            day_of_week INTEGER NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            period INTEGER NOT NULL,
            duration_class INTEGER NOT NULL,
            education_level TEXT NOT NULL,
            grade TEXT,
            gender TEXT,
            subject_id INTEGER NOT NULL,
            teacher_id INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(table_id) REFERENCES schedule_tables(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_schedule_cells_table_day ON schedule_cells(table_id, day_of_week)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_groups(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            subject_id INTEGER NOT NULL,
            teacher_id INTEGER NOT NULL,
            education_level TEXT NOT NULL,
            student_count INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_groups_compat ON student_groups(subject_id, teacher_id, education_level)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS cell_groups(
            cell_id INTEGER NOT NULL,
            group_id INTEGER NOT NULL,
            PRIMARY KEY(cell_id, group_id),
            FOREIGN KEY(cell_id) REFERENCES schedule_cells(id),
            FOREIGN KEY(group_id) REFERENCES student_groups(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_cell_groups_group ON cell_groups(group_id)",
        [],
    )?;

    Ok(conn)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(
            serde_json::from_str(&s).with_context(|| format!("setting {key} is not valid JSON"))?,
        )),
        None => Ok(None),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        params![key, serde_json::to_string(value)?],
    )?;
    Ok(())
}

fn conversion_err(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        msg.into(),
    )
}

fn time_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<SlotTime> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|_| conversion_err(idx, format!("bad stored time {raw:?}")))
}

pub const TABLE_COLUMNS: &str = "id, name, description, active, created_at, updated_at";

pub fn row_to_table(row: &Row<'_>) -> rusqlite::Result<ScheduleTable> {
    Ok(ScheduleTable {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        active: row.get::<_, i64>(3)? != 0,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

pub fn list_tables(conn: &Connection) -> anyhow::Result<Vec<ScheduleTable>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TABLE_COLUMNS} FROM schedule_tables ORDER BY name, id"
    ))?;
    let rows = stmt
        .query_map([], row_to_table)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn load_table(conn: &Connection, table_id: TableId) -> anyhow::Result<Option<ScheduleTable>> {
    Ok(conn
        .query_row(
            &format!("SELECT {TABLE_COLUMNS} FROM schedule_tables WHERE id = ?"),
            [table_id],
            row_to_table,
        )
        .optional()?)
}

/// Number of cells per table; tables without cells are absent.
pub fn cell_counts(conn: &Connection) -> anyhow::Result<HashMap<TableId, i64>> {
    let mut stmt = conn.prepare("SELECT table_id, COUNT(*) FROM schedule_cells GROUP BY table_id")?;
    let rows = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<Result<HashMap<_, _>, _>>()?;
    Ok(rows)
}

pub const CELL_COLUMNS: &str = "id, table_id, day_of_week, start_time, end_time, period, duration_class, education_level, grade, gender, subject_id, teacher_id";

pub fn row_to_cell(row: &Row<'_>) -> rusqlite::Result<ScheduleCell> {
    let gender = match row.get::<_, Option<String>>(9)? {
        Some(raw) => Some(
            Gender::parse(&raw).ok_or_else(|| conversion_err(9, format!("bad gender {raw:?}")))?,
        ),
        None => None,
    };
    Ok(ScheduleCell {
        id: row.get(0)?,
        table_id: row.get(1)?,
        day_of_week: row.get(2)?,
        start_time: time_col(row, 3)?,
        end_time: time_col(row, 4)?,
        period: row.get(5)?,
        duration_class: row.get(6)?,
        education_level: row.get(7)?,
        grade: row.get(8)?,
        gender,
        subject_id: row.get(10)?,
        teacher_id: row.get(11)?,
    })
}

pub fn load_cells(conn: &Connection, table_id: TableId) -> anyhow::Result<Vec<ScheduleCell>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CELL_COLUMNS} FROM schedule_cells
         WHERE table_id = ?
         ORDER BY day_of_week, period, id"
    ))?;
    let rows = stmt
        .query_map([table_id], row_to_cell)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn load_all_cells(conn: &Connection) -> anyhow::Result<Vec<ScheduleCell>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CELL_COLUMNS} FROM schedule_cells ORDER BY table_id, day_of_week, period, id"
    ))?;
    let rows = stmt
        .query_map([], row_to_cell)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn load_cell(conn: &Connection, cell_id: CellId) -> anyhow::Result<Option<ScheduleCell>> {
    Ok(conn
        .query_row(
            &format!("SELECT {CELL_COLUMNS} FROM schedule_cells WHERE id = ?"),
            [cell_id],
            row_to_cell,
        )
        .optional()?)
}

pub const GROUP_COLUMNS: &str = "id, name, subject_id, teacher_id, education_level, student_count";

pub fn row_to_group(row: &Row<'_>) -> rusqlite::Result<Group> {
    Ok(Group {
        id: row.get(0)?,
        name: row.get(1)?,
        subject_id: row.get(2)?,
        teacher_id: row.get(3)?,
        education_level: row.get(4)?,
        student_count: row.get(5)?,
    })
}

pub fn list_groups(conn: &Connection) -> anyhow::Result<Vec<Group>> {
    let mut stmt = conn.prepare(&format!("SELECT {GROUP_COLUMNS} FROM student_groups ORDER BY name, id"))?;
    let rows = stmt
        .query_map([], row_to_group)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn cell_links(conn: &Connection, cell_id: CellId) -> anyhow::Result<BTreeSet<GroupId>> {
    let mut stmt = conn.prepare("SELECT group_id FROM cell_groups WHERE cell_id = ?")?;
    let rows = stmt
        .query_map([cell_id], |r| r.get::<_, GroupId>(0))?
        .collect::<Result<BTreeSet<_>, _>>()?;
    Ok(rows)
}

/// `(cell_id, group_id)` pairs for every cell in the table.
pub fn table_links(conn: &Connection, table_id: TableId) -> anyhow::Result<Vec<(CellId, GroupId)>> {
    let mut stmt = conn.prepare(
        "SELECT cg.cell_id, cg.group_id
         FROM cell_groups cg
         JOIN schedule_cells c ON c.id = cg.cell_id
         WHERE c.table_id = ?
         ORDER BY cg.cell_id, cg.group_id",
    )?;
    let rows = stmt
        .query_map([table_id], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Makes the cell's link set equal to `groups`.
pub fn replace_cell_links(conn: &Connection, cell_id: CellId, groups: &BTreeSet<GroupId>) -> anyhow::Result<()> {
    conn.execute("DELETE FROM cell_groups WHERE cell_id = ?", [cell_id])?;
    let mut stmt = conn.prepare("INSERT INTO cell_groups(cell_id, group_id) VALUES(?, ?)")?;
    for gid in groups {
        stmt.execute(params![cell_id, gid])?;
    }
    Ok(())
}

pub fn now_ts() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_workspace() -> std::path::PathBuf {
        std::env::temp_dir().join(format!(
            "timetabled-db-{}",
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ))
    }

    #[test]
    fn settings_round_trip_and_overwrite() {
        let ws = temp_workspace();
        let conn = open_db(&ws).expect("open");
        assert_eq!(settings_get_json(&conn, "setup.schedule").expect("get"), None);
        settings_set_json(&conn, "setup.schedule", &json!({ "slotMinutes": 15 })).expect("set");
        settings_set_json(&conn, "setup.schedule", &json!({ "slotMinutes": 20 })).expect("set");
        assert_eq!(
            settings_get_json(&conn, "setup.schedule").expect("get"),
            Some(json!({ "slotMinutes": 20 }))
        );
        // Reopening an existing workspace keeps the schema idempotent.
        drop(conn);
        let conn = open_db(&ws).expect("reopen");
        assert!(settings_get_json(&conn, "setup.schedule").expect("get").is_some());
        let _ = std::fs::remove_dir_all(&ws);
    }

    #[test]
    fn replace_links_sets_exact_membership() {
        let ws = temp_workspace();
        let conn = open_db(&ws).expect("open");
        let ts = now_ts();
        conn.execute(
            "INSERT INTO schedule_tables(name, active, created_at, updated_at) VALUES('Room 1', 1, ?, ?)",
            params![ts, ts],
        )
        .expect("table");
        let table_id = conn.last_insert_rowid();
        conn.execute(
            "INSERT INTO schedule_cells(table_id, day_of_week, start_time, end_time, period, duration_class,
               education_level, subject_id, teacher_id, created_at, updated_at)
             VALUES(?, 1, '09:00', '10:30', 3, 1, 'B', 10, 7, ?, ?)",
            params![table_id, ts, ts],
        )
        .expect("cell");
        let cell_id = conn.last_insert_rowid();
        for name in ["G1", "G2", "G3"] {
            conn.execute(
                "INSERT INTO student_groups(name, subject_id, teacher_id, education_level) VALUES(?, 10, 7, 'B')",
                [name],
            )
            .expect("group");
        }

        let all: BTreeSet<GroupId> = [1, 2, 3].into_iter().collect();
        replace_cell_links(&conn, cell_id, &all).expect("link");
        replace_cell_links(&conn, cell_id, &all).expect("relink");
        assert_eq!(cell_links(&conn, cell_id).expect("links"), all);

        let one: BTreeSet<GroupId> = [1].into_iter().collect();
        replace_cell_links(&conn, cell_id, &one).expect("shrink");
        assert_eq!(table_links(&conn, table_id).expect("pairs"), vec![(cell_id, 1)]);

        let cell = load_cell(&conn, cell_id).expect("load").expect("exists");
        assert_eq!(cell.start_time.to_string(), "09:00");
        assert_eq!(cell.period, 3);
        let _ = std::fs::remove_dir_all(&ws);
    }
}
