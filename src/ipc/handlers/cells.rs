use crate::config::{AppConfig, DEFAULT_SLOT_MINUTES};
use crate::db;
use crate::ipc::error::{err, ok, schedule_err};
use crate::ipc::helpers::{db_conn, require_admin, required_i64, session_mut};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{
    plan_placement, resolve_span, validate_placement, Candidate, CellDraft, CellId,
    CompatibilityKey, GridStore, ScheduleCell, ScheduleError,
};
use rusqlite::{params, Connection, TransactionBehavior};
use serde_json::json;
use std::collections::{BTreeSet, HashMap};

fn slot_minutes(state: &AppState) -> u16 {
    state
        .config
        .as_ref()
        .map(|c| c.catalog.slot_minutes())
        .unwrap_or(DEFAULT_SLOT_MINUTES)
}

fn cell_view(cell: &ScheduleCell, slot_minutes: u16, linked_group_count: usize) -> serde_json::Value {
    let span = resolve_span(cell.start_time, cell.end_time, slot_minutes).ok();
    let mut v = json!(cell);
    v["span"] = json!(span.map(|s| s.span).unwrap_or(1));
    v["minutes"] = json!(span.map(|s| s.minutes).unwrap_or(0));
    v["linkedGroupCount"] = json!(linked_group_count);
    v
}

/// Resolves the draft on the grid and checks it against every other cell of
/// its table. Runs inside the caller's write transaction.
fn check_placement(
    conn: &Connection,
    cfg: &AppConfig,
    draft: &CellDraft,
    cell_id: Option<CellId>,
    req: &Request,
) -> Result<Candidate, serde_json::Value> {
    match db::load_table(conn, draft.table_id) {
        Ok(Some(_)) => {}
        Ok(None) => {
            return Err(schedule_err(
                &req.id,
                &ScheduleError::validation("tableId", "table not found"),
            ))
        }
        Err(e) => return Err(err(&req.id, "db_query_failed", e.to_string(), None)),
    }

    let candidate = plan_placement(draft, cell_id, &cfg.catalog, cfg.schedule.off_grid)
        .map_err(|e| schedule_err(&req.id, &e))?;

    let cells = db::load_cells(conn, draft.table_id)
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    let store = GridStore::load(draft.table_id, cells, cfg.catalog.slot_minutes());
    if let Err(e) = validate_placement(&candidate, store.cells()) {
        tracing::info!(
            table_id = draft.table_id,
            day = draft.day_of_week,
            period = candidate.period,
            span = candidate.span.span,
            error = %e,
            "placement rejected"
        );
        return Err(schedule_err(&req.id, &e));
    }
    Ok(candidate)
}

fn params_object<'a>(
    req: &'a Request,
) -> Result<&'a serde_json::Map<String, serde_json::Value>, serde_json::Value> {
    req.params
        .as_object()
        .ok_or_else(|| err(&req.id, "bad_params", "params must be an object", None))
}

fn handle_cells_list(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let cells = match db::load_cells(conn, table_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let mut link_counts: HashMap<CellId, usize> = HashMap::new();
    match db::table_links(conn, table_id) {
        Ok(pairs) => {
            for (cell_id, _) in pairs {
                *link_counts.entry(cell_id).or_default() += 1;
            }
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let minutes = slot_minutes(state);
    let rows: Vec<serde_json::Value> = cells
        .iter()
        .map(|c| cell_view(c, minutes, link_counts.get(&c.id).copied().unwrap_or(0)))
        .collect();
    ok(&req.id, json!({ "cells": rows }))
}

fn handle_cells_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let cell_id = match required_i64(req, "cellId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let cell = match db::load_cell(conn, cell_id) {
        Ok(Some(c)) => c,
        Ok(None) => return err(&req.id, "not_found", "cell not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let links = match db::cell_links(conn, cell_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "cell": cell_view(&cell, slot_minutes(state), links.len()),
            "linkedGroupIds": links
        }),
    )
}

fn handle_cells_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = db_conn(state, req) {
        return e;
    }
    if let Err(e) = require_admin(state, req) {
        return e;
    }
    let input = match params_object(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let draft = match CellDraft::from_json(input) {
        Ok(v) => v,
        Err(e) => return schedule_err(&req.id, &e),
    };

    let (conn, cfg) = match session_mut(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let tx = match conn.transaction_with_behavior(TransactionBehavior::Immediate) {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let candidate = match check_placement(&tx, cfg, &draft, None, req) {
        Ok(c) => c,
        Err(e) => return e,
    };

    let ts = db::now_ts();
    if let Err(e) = tx.execute(
        "INSERT INTO schedule_cells(
           table_id, day_of_week, start_time, end_time, period, duration_class,
           education_level, grade, gender, subject_id, teacher_id, created_at, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            candidate.table_id,
            candidate.day_of_week,
            candidate.start_time.to_string(),
            candidate.end_time.to_string(),
            candidate.period,
            candidate.span.duration_class,
            draft.education_level,
            draft.grade,
            draft.gender.map(|g| g.as_str()),
            draft.subject_id,
            draft.teacher_id,
            ts,
            ts
        ],
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "schedule_cells" })),
        );
    }
    let cell_id = tx.last_insert_rowid();

    let cell = match db::load_cell(&tx, cell_id) {
        Ok(Some(c)) => c,
        Ok(None) => return err(&req.id, "not_found", "cell not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    tracing::info!(
        cell_id,
        table_id = cell.table_id,
        day = cell.day_of_week,
        period = cell.period,
        span = candidate.span.span,
        "cell placed"
    );

    ok(
        &req.id,
        json!({
            "cell": cell_view(&cell, cfg.catalog.slot_minutes(), 0),
            "roundedFrom": candidate.rounded_from.map(|t| t.to_string())
        }),
    )
}

fn handle_cells_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    if let Err(e) = require_admin(state, req) {
        return e;
    }
    let cell_id = match required_i64(req, "cellId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let input = match params_object(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let existing = match db::load_cell(conn, cell_id) {
        Ok(Some(c)) => c,
        Ok(None) => return err(&req.id, "not_found", "cell not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Omitted fields keep their stored values.
    let mut merged = match serde_json::to_value(&existing) {
        Ok(serde_json::Value::Object(m)) => m,
        Ok(_) => return err(&req.id, "bad_params", "cell did not serialize to an object", None),
        Err(e) => return err(&req.id, "bad_params", e.to_string(), None),
    };
    for (k, v) in input {
        if k != "cellId" {
            merged.insert(k.clone(), v.clone());
        }
    }
    let draft = match CellDraft::from_json(&merged) {
        Ok(v) => v,
        Err(e) => return schedule_err(&req.id, &e),
    };

    let (conn, cfg) = match session_mut(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let tx = match conn.transaction_with_behavior(TransactionBehavior::Immediate) {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let candidate = match check_placement(&tx, cfg, &draft, Some(cell_id), req) {
        Ok(c) => c,
        Err(e) => return e,
    };

    if let Err(e) = tx.execute(
        "UPDATE schedule_cells SET
           table_id = ?, day_of_week = ?, start_time = ?, end_time = ?, period = ?,
           duration_class = ?, education_level = ?, grade = ?, gender = ?,
           subject_id = ?, teacher_id = ?, updated_at = ?
         WHERE id = ?",
        params![
            candidate.table_id,
            candidate.day_of_week,
            candidate.start_time.to_string(),
            candidate.end_time.to_string(),
            candidate.period,
            candidate.span.duration_class,
            draft.education_level,
            draft.grade,
            draft.gender.map(|g| g.as_str()),
            draft.subject_id,
            draft.teacher_id,
            db::now_ts(),
            cell_id
        ],
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    let cell = match db::load_cell(&tx, cell_id) {
        Ok(Some(c)) => c,
        Ok(None) => return err(&req.id, "not_found", "cell not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let current = match db::cell_links(&tx, cell_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let key_changed = CompatibilityKey::of_cell(&cell) != CompatibilityKey::of_cell(&existing);
    let mut kept = current.clone();
    if cfg.linking.enforce_compatibility && key_changed && !current.is_empty() {
        let groups = match db::list_groups(&tx) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let key = CompatibilityKey::of_cell(&cell);
        kept = groups
            .iter()
            .filter(|g| current.contains(&g.id) && key.matches(g))
            .map(|g| g.id)
            .collect::<BTreeSet<_>>();
        if kept != current {
            if let Err(e) = db::replace_cell_links(&tx, cell_id, &kept) {
                return err(&req.id, "db_update_failed", e.to_string(), None);
            }
        }
    }
    let pruned_links = current.len() - kept.len();

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    tracing::info!(
        cell_id,
        table_id = cell.table_id,
        day = cell.day_of_week,
        period = cell.period,
        span = candidate.span.span,
        pruned_links,
        "cell updated"
    );

    ok(
        &req.id,
        json!({
            "cell": cell_view(&cell, cfg.catalog.slot_minutes(), kept.len()),
            "roundedFrom": candidate.rounded_from.map(|t| t.to_string()),
            "prunedLinks": pruned_links
        }),
    )
}

fn handle_cells_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    if let Err(e) = require_admin(state, req) {
        return e;
    }
    let cell_id = match required_i64(req, "cellId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match db::load_cell(conn, cell_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "cell not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let links_deleted = match tx.execute("DELETE FROM cell_groups WHERE cell_id = ?", [cell_id]) {
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
    if let Err(e) = tx.execute("DELETE FROM schedule_cells WHERE id = ?", [cell_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "schedule_cells" })),
        );
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    tracing::info!(cell_id, links_deleted, "cell deleted");
    ok(
        &req.id,
        json!({ "deleted": true, "linksDeleted": links_deleted }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "cells.list" => Some(handle_cells_list(state, req)),
        "cells.open" => Some(handle_cells_open(state, req)),
        "cells.create" => Some(handle_cells_create(state, req)),
        "cells.update" => Some(handle_cells_update(state, req)),
        "cells.delete" => Some(handle_cells_delete(state, req)),
        _ => None,
    }
}
