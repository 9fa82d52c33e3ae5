use serde_json::json;

use crate::schedule::ScheduleError;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// Engine errors as IPC errors. Conflicts list the clashing cells, every
/// other kind is a `validation_error` naming the offending field.
pub fn schedule_err(id: &str, e: &ScheduleError) -> serde_json::Value {
    match e {
        ScheduleError::SlotConflict { conflicts } => err(
            id,
            "slot_conflict",
            e.to_string(),
            Some(json!({ "conflicts": conflicts })),
        ),
        _ => err(
            id,
            "validation_error",
            e.to_string(),
            Some(json!({ "field": e.field() })),
        ),
    }
}
