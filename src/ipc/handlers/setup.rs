use crate::config::{
    weekday_name, AppConfig, LinkingSettings, ScheduleSettings, LINKING_KEY, SCHEDULE_KEY,
};
use crate::db;
use crate::ipc::error::{err, ok, schedule_err};
use crate::ipc::helpers::{db_conn, require_admin, session_mut};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{resolve_span, OffGridPolicy, SlotCatalog, SlotTime};
use chrono::Weekday;
use rusqlite::{params, Connection, TransactionBehavior};
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Schedule,
    Linking,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "schedule" => Some(Self::Schedule),
            "linking" => Some(Self::Linking),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Schedule => SCHEDULE_KEY,
            Self::Linking => LINKING_KEY,
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Schedule => {
            let d = ScheduleSettings::default();
            json!({
                "firstSlot": d.first_slot,
                "lastSlot": d.last_slot,
                "slotMinutes": d.slot_minutes,
                "weekStartDay": weekday_name(d.week_start),
                "offGridPolicy": d.off_grid.as_str()
            })
        }
        SetupSection::Linking => json!({
            "enforceCompatibility": LinkingSettings::default().enforce_compatibility
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool()
        .ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_time(v: &Value, key: &str) -> Result<SlotTime, String> {
    v.as_str()
        .and_then(|s| s.parse::<SlotTime>().ok())
        .ok_or_else(|| format!("{} must be a HH:MM time", key))
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Schedule => match k.as_str() {
                "firstSlot" | "lastSlot" => {
                    let t = parse_time(v, k)?;
                    obj.insert(k.clone(), Value::String(t.to_string()));
                }
                "slotMinutes" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 5, 120)?));
                }
                "weekStartDay" => {
                    let day = v
                        .as_str()
                        .and_then(|s| s.trim().parse::<Weekday>().ok())
                        .ok_or_else(|| "weekStartDay must be a weekday name".to_string())?;
                    obj.insert(k.clone(), Value::String(weekday_name(day).to_string()));
                }
                "offGridPolicy" => {
                    let policy = v
                        .as_str()
                        .and_then(OffGridPolicy::parse)
                        .ok_or_else(|| "offGridPolicy must be one of: reject, round".to_string())?;
                    obj.insert(k.clone(), Value::String(policy.as_str().to_string()));
                }
                _ => return Err(format!("unknown schedule field: {}", k)),
            },
            SetupSection::Linking => match k.as_str() {
                "enforceCompatibility" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown linking field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Best-effort apply: malformed historical values should not block setup UI.
            let _ = merge_section_patch(section, &mut current, saved_obj);
        }
    }
    Ok(current)
}

/// Moves every stored cell onto the new catalog. Cells that would leave the
/// grid block the change and are reported by id.
fn rederive_periods(
    conn: &Connection,
    catalog: &SlotCatalog,
    req: &Request,
) -> Result<usize, Value> {
    let cells = db::load_all_cells(conn)
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;

    let mut blocked = Vec::new();
    let mut moves = Vec::new();
    for c in &cells {
        let span = resolve_span(c.start_time, c.end_time, catalog.slot_minutes())
            .map(|s| s.span)
            .unwrap_or(1);
        match catalog.period_for_time(c.start_time) {
            Some(p) if p + span - 1 <= catalog.period_count() => {
                if p != c.period {
                    moves.push((c.id, p));
                }
            }
            _ => blocked.push(c.id),
        }
    }
    if !blocked.is_empty() {
        return Err(err(
            &req.id,
            "validation_error",
            format!(
                "{} existing cell(s) would not fit the new slot grid",
                blocked.len()
            ),
            Some(json!({ "field": "schedule", "cellIds": blocked })),
        ));
    }

    for (cell_id, period) in &moves {
        conn.execute(
            "UPDATE schedule_cells SET period = ?, updated_at = ? WHERE id = ?",
            params![period, db::now_ts(), cell_id],
        )
        .map_err(|e| err(&req.id, "db_update_failed", e.to_string(), None))?;
    }
    Ok(moves.len())
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let schedule = match load_section(conn, SetupSection::Schedule) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let linking = match load_section(conn, SetupSection::Linking) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(
        &req.id,
        json!({
            "schedule": schedule,
            "linking": linking
        }),
    )
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = db_conn(state, req) {
        return e;
    }
    if let Err(e) = require_admin(state, req) {
        return e;
    }
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let (conn, cfg) = match session_mut(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    let Some(merged) = current.as_object() else {
        return err(&req.id, "bad_params", "setup section must be an object", None);
    };

    let (schedule, linking) = match section {
        SetupSection::Schedule => (ScheduleSettings::from_json(merged), cfg.linking),
        SetupSection::Linking => (cfg.schedule.clone(), LinkingSettings::from_json(merged)),
    };
    let catalog = match SlotCatalog::new(schedule.first_slot, schedule.last_slot, schedule.slot_minutes) {
        Ok(c) => c,
        Err(e) => return schedule_err(&req.id, &e),
    };

    let tx = match conn.transaction_with_behavior(TransactionBehavior::Immediate) {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let rederived = match section {
        SetupSection::Schedule => match rederive_periods(&tx, &catalog, req) {
            Ok(n) => n,
            Err(e) => return e,
        },
        SetupSection::Linking => 0,
    };
    if let Err(e) = db::settings_set_json(&tx, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    tracing::info!(
        section = section_raw,
        periods = catalog.period_count(),
        slot_minutes = catalog.slot_minutes(),
        cells_rederived = rederived,
        "setup updated"
    );
    state.config = Some(AppConfig {
        schedule,
        linking,
        catalog,
    });

    ok(
        &req.id,
        json!({ "ok": true, "section": section_raw, "cellsRederived": rederived }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
