use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, parse_bool, parse_opt_string, require_admin, required_i64, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::params;
use serde_json::json;

fn handle_tables_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "tables": [] }));
    };

    let tables = match db::list_tables(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let counts = match db::cell_counts(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows: Vec<serde_json::Value> = tables
        .iter()
        .map(|t| {
            let mut v = json!(t);
            v["cellCount"] = json!(counts.get(&t.id).copied().unwrap_or(0));
            v
        })
        .collect();
    ok(&req.id, json!({ "tables": rows }))
}

fn handle_tables_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let description = match parse_opt_string(req.params.get("description")) {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", format!("description {msg}"), None),
    };
    let active = match parse_bool(req.params.get("active"), true) {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", format!("active {msg}"), None),
    };

    let ts = db::now_ts();
    if let Err(e) = conn.execute(
        "INSERT INTO schedule_tables(name, description, active, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?)",
        params![name, description, active as i64, ts, ts],
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "schedule_tables" })),
        );
    }
    let table_id = conn.last_insert_rowid();

    match db::load_table(conn, table_id) {
        Ok(Some(table)) => ok(&req.id, json!({ "table": table })),
        Ok(None) => err(&req.id, "not_found", "table not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_tables_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    if let Err(e) = require_admin(state, req) {
        return e;
    }
    let table_id = match required_i64(req, "tableId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut table = match db::load_table(conn, table_id) {
        Ok(Some(t)) => t,
        Ok(None) => return err(&req.id, "not_found", "table not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    for (k, v) in patch {
        match k.as_str() {
            "name" => match v.as_str().map(str::trim).filter(|s| !s.is_empty()) {
                Some(s) => table.name = s.to_string(),
                None => return err(&req.id, "bad_params", "name must be a non-empty string", None),
            },
            "description" => match parse_opt_string(Some(v)) {
                Ok(d) => table.description = d,
                Err(msg) => return err(&req.id, "bad_params", format!("description {msg}"), None),
            },
            "active" => match v.as_bool() {
                Some(b) => table.active = b,
                None => return err(&req.id, "bad_params", "active must be boolean", None),
            },
            _ => return err(&req.id, "bad_params", format!("unknown table field: {k}"), None),
        }
    }

    table.updated_at = db::now_ts();
    if let Err(e) = conn.execute(
        "UPDATE schedule_tables SET name = ?, description = ?, active = ?, updated_at = ? WHERE id = ?",
        params![
            table.name,
            table.description,
            table.active as i64,
            table.updated_at,
            table.id
        ],
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "table": table }))
}

fn handle_tables_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    if let Err(e) = require_admin(state, req) {
        return e;
    }
    let table_id = match required_i64(req, "tableId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match db::load_table(conn, table_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "table not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    let links_deleted = match tx.execute(
        "DELETE FROM cell_groups
         WHERE cell_id IN (SELECT id FROM schedule_cells WHERE table_id = ?)",
        [table_id],
    ) {
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
    let cells_deleted = match tx.execute("DELETE FROM schedule_cells WHERE table_id = ?", [table_id]) {
        Ok(n) => n,
        Err(e) => {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "schedule_cells" })),
            );
        }
    };
    if let Err(e) = tx.execute("DELETE FROM schedule_tables WHERE id = ?", [table_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "schedule_tables" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    tracing::info!(table_id, cells_deleted, links_deleted, "table deleted");

    ok(
        &req.id,
        json!({
            "deleted": true,
            "cellsDeleted": cells_deleted,
            "linksDeleted": links_deleted
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "tables.list" => Some(handle_tables_list(state, req)),
        "tables.create" => Some(handle_tables_create(state, req)),
        "tables.update" => Some(handle_tables_update(state, req)),
        "tables.delete" => Some(handle_tables_delete(state, req)),
        _ => None,
    }
}
