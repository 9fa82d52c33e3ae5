use crate::db;
use crate::ipc::error::{err, ok, schedule_err};
use crate::ipc::helpers::{db_conn, require_admin, required_i64, session_mut};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{check_link_request, GroupId, LinkDiff};
use rusqlite::TransactionBehavior;
use serde_json::json;
use std::collections::BTreeSet;

fn parse_group_ids(req: &Request) -> Result<BTreeSet<GroupId>, serde_json::Value> {
    let Some(raw) = req.params.get("groupIds").and_then(|v| v.as_array()) else {
        return Err(err(&req.id, "bad_params", "groupIds must be an array", None));
    };
    raw.iter()
        .map(|v| {
            v.as_i64().ok_or_else(|| {
                err(
                    &req.id,
                    "bad_params",
                    "groupIds must contain only integers",
                    None,
                )
            })
        })
        .collect()
}

/// Replaces the cell's whole link set. Repeating the same call is a no-op.
fn handle_links_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = db_conn(state, req) {
        return e;
    }
    if let Err(e) = require_admin(state, req) {
        return e;
    }
    let cell_id = match required_i64(req, "cellId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let desired = match parse_group_ids(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let (conn, cfg) = match session_mut(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let tx = match conn.transaction_with_behavior(TransactionBehavior::Immediate) {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let cell = match db::load_cell(&tx, cell_id) {
        Ok(Some(c)) => c,
        Ok(None) => return err(&req.id, "not_found", "cell not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let groups = match db::list_groups(&tx) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(e) = check_link_request(&cell, &desired, &groups, cfg.linking.enforce_compatibility) {
        tracing::info!(cell_id, error = %e, "link request rejected");
        return schedule_err(&req.id, &e);
    }

    let current = match db::cell_links(&tx, cell_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let diff = LinkDiff::between(&current, &desired);
    if !diff.is_noop() {
        if let Err(e) = db::replace_cell_links(&tx, cell_id, &desired) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    tracing::info!(
        cell_id,
        added = diff.added.len(),
        removed = diff.removed.len(),
        "links replaced"
    );

    ok(
        &req.id,
        json!({
            "cellId": cell_id,
            "groupIds": desired,
            "added": diff.added,
            "removed": diff.removed,
            "kept": diff.kept
        }),
    )
}

fn handle_links_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let table_id = match required_i64(req, "tableId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match db::load_table(conn, table_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "table not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    match db::table_links(conn, table_id) {
        Ok(pairs) => {
            let links: Vec<serde_json::Value> = pairs
                .into_iter()
                .map(|(cell_id, group_id)| json!({ "cellId": cell_id, "groupId": group_id }))
                .collect();
            ok(&req.id, json!({ "links": links }))
        }
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_links_cell(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let cell_id = match required_i64(req, "cellId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match db::load_cell(conn, cell_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "cell not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    match db::cell_links(conn, cell_id) {
        Ok(ids) => ok(&req.id, json!({ "cellId": cell_id, "groupIds": ids })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "links.set" => Some(handle_links_set(state, req)),
        "links.list" => Some(handle_links_list(state, req)),
        "links.cell" => Some(handle_links_cell(state, req)),
        _ => None,
    }
}
