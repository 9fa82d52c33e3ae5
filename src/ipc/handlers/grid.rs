use crate::config::AppConfig;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::db_conn;
use crate::ipc::types::{AppState, Request};
use crate::schedule::{CellId, GridSlot, GridStore, DAYS_PER_WEEK};
use serde_json::json;
use std::collections::HashMap;

fn handle_slots_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let cfg = match state.config.as_ref() {
        Some(c) => c,
        None => return err(&req.id, "no_workspace", "select a workspace first", None),
    };
    let slots: Vec<serde_json::Value> = cfg
        .catalog
        .slots()
        .map(|s| json!({ "period": s.period, "time": s.time }))
        .collect();
    ok(
        &req.id,
        json!({
            "slotMinutes": cfg.catalog.slot_minutes(),
            "periodCount": cfg.catalog.period_count(),
            "offGridPolicy": cfg.schedule.off_grid.as_str(),
            "slots": slots,
            "days": day_labels(cfg)
        }),
    )
}

fn day_labels(cfg: &AppConfig) -> Vec<serde_json::Value> {
    cfg.schedule
        .day_labels()
        .into_iter()
        .enumerate()
        .map(|(i, label)| json!({ "dayOfWeek": i, "label": label }))
        .collect()
}

fn slot_json(slot: &GridSlot, link_counts: &HashMap<CellId, usize>) -> serde_json::Value {
    match slot {
        GridSlot::Start {
            period,
            cell_id,
            span,
        } => json!({
            "kind": "start",
            "period": period,
            "cellId": cell_id,
            "span": span,
            "linkedGroupCount": link_counts.get(cell_id).copied().unwrap_or(0)
        }),
        other => json!(other),
    }
}

fn handle_grid_view(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let Some(cfg) = state.config.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(table_id) = req.params.get("tableId").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing tableId", None);
    };
    let days: Vec<u8> = match req.params.get("day") {
        None | Some(serde_json::Value::Null) => (0..DAYS_PER_WEEK).collect(),
        Some(v) => match v.as_u64().filter(|d| *d < u64::from(DAYS_PER_WEEK)) {
            Some(d) => vec![d as u8],
            None => return err(&req.id, "bad_params", "day must be in 0..=6", None),
        },
    };

    let table = match db::load_table(conn, table_id) {
        Ok(Some(t)) => t,
        Ok(None) => return err(&req.id, "not_found", "table not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
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

    let store = GridStore::load(table_id, cells, cfg.catalog.slot_minutes());
    let labels = cfg.schedule.day_labels();
    let period_count = cfg.catalog.period_count();
    let rows: Vec<serde_json::Value> = days
        .iter()
        .map(|&day| {
            let slots: Vec<serde_json::Value> = store
                .render_day(day, period_count)
                .iter()
                .map(|s| slot_json(s, &link_counts))
                .collect();
            json!({
                "dayOfWeek": day,
                "label": labels.get(day as usize).copied().unwrap_or(""),
                "cellCount": store.cells_on(day).count(),
                "freePeriods": (1..=period_count)
                    .filter(|&p| store.cell_at(day, p).is_none() && !store.is_covered(day, p))
                    .count(),
                "slots": slots
            })
        })
        .collect();

    ok(
        &req.id,
        json!({
            "table": table,
            "tableId": store.table_id(),
            "periodCount": period_count,
            "days": rows
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "slots.list" => Some(handle_slots_list(state, req)),
        "grid.view" => Some(handle_grid_view(state, req)),
        _ => None,
    }
}
