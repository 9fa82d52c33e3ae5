use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, parse_opt_i64, parse_opt_string, require_admin, required_i64, required_str};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{find_compatible_groups, CompatibilityKey};
use rusqlite::params;
use serde_json::json;

fn handle_groups_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "groups": [] }));
    };
    match db::list_groups(conn) {
        Ok(groups) => ok(&req.id, json!({ "groups": groups })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_groups_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    if let Err(e) = require_admin(state, req) {
        return e;
    }

    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject_id = match required_i64(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let teacher_id = match required_i64(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let education_level = match required_str(req, "educationLevel") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_count = match parse_opt_i64(req.params.get("studentCount")) {
        Ok(v) => v.unwrap_or(0),
        Err(msg) => return err(&req.id, "bad_params", format!("studentCount {msg}"), None),
    };
    if student_count < 0 {
        return err(&req.id, "bad_params", "studentCount must not be negative", None);
    }

    if let Err(e) = conn.execute(
        "INSERT INTO student_groups(name, subject_id, teacher_id, education_level, student_count)
         VALUES(?, ?, ?, ?, ?)",
        params![name, subject_id, teacher_id, education_level, student_count],
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "student_groups" })),
        );
    }
    let group_id = conn.last_insert_rowid();

    ok(
        &req.id,
        json!({
            "group": {
                "id": group_id,
                "name": name,
                "subjectId": subject_id,
                "teacherId": teacher_id,
                "educationLevel": education_level,
                "studentCount": student_count
            }
        }),
    )
}

fn handle_groups_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    if let Err(e) = require_admin(state, req) {
        return e;
    }
    let group_id = match required_i64(req, "groupId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let links_deleted = match tx.execute("DELETE FROM cell_groups WHERE group_id = ?", [group_id]) {
        Ok(n) => n,
        Err(e) => {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "cell_groups" })),
            );
        }
    };
    let removed = match tx.execute("DELETE FROM student_groups WHERE id = ?", [group_id]) {
        Ok(n) => n,
        Err(e) => {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "student_groups" })),
            );
        }
    };
    if removed == 0 {
        let _ = tx.rollback();
        return err(&req.id, "not_found", "group not found", None);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    tracing::info!(group_id, links_deleted, "group deleted");
    ok(
        &req.id,
        json!({ "deleted": true, "linksDeleted": links_deleted }),
    )
}

/// Accepts either a `cellId` or the raw `subjectId`/`teacherId`/
/// `educationLevel` triple. Missing attributes give an empty result.
fn handle_groups_compatible(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let groups = match db::list_groups(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let cell = match req.params.get("cellId").and_then(|v| v.as_i64()) {
        Some(cell_id) => match db::load_cell(conn, cell_id) {
            Ok(Some(c)) => Some(c),
            Ok(None) => return err(&req.id, "not_found", "cell not found", None),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        },
        None => None,
    };

    let subject_id = match parse_opt_i64(req.params.get("subjectId")) {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", format!("subjectId {msg}"), None),
    };
    let teacher_id = match parse_opt_i64(req.params.get("teacherId")) {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", format!("teacherId {msg}"), None),
    };
    let education_level = match parse_opt_string(req.params.get("educationLevel")) {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", format!("educationLevel {msg}"), None),
    };

    let key = match cell.as_ref() {
        Some(c) => CompatibilityKey::of_cell(c),
        None => CompatibilityKey {
            subject_id,
            teacher_id,
            education_level: education_level.as_deref(),
        },
    };
    let matches = find_compatible_groups(&key, &groups);
    ok(&req.id, json!({ "groups": matches }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "groups.list" => Some(handle_groups_list(state, req)),
        "groups.create" => Some(handle_groups_create(state, req)),
        "groups.delete" => Some(handle_groups_delete(state, req)),
        "groups.compatible" => Some(handle_groups_compatible(state, req)),
        _ => None,
    }
}
