use crate::config::AppConfig;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request, Role};
use serde_json::json;
use std::path::{Path, PathBuf};

/// Opens the workspace database, loads its configuration and makes both
/// current. On failure the previous session is left closed.
pub(super) fn attach_workspace(state: &mut AppState, path: &Path) -> anyhow::Result<()> {
    state.db = None;
    state.config = None;
    let conn = db::open_db(path)?;
    let config = AppConfig::load(&conn)?;
    tracing::info!(
        workspace = %path.to_string_lossy(),
        periods = config.catalog.period_count(),
        slot_minutes = config.catalog.slot_minutes(),
        "workspace opened"
    );
    state.workspace = Some(path.to_path_buf());
    state.db = Some(conn);
    state.config = Some(config);
    Ok(())
}

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "role": state.role.as_str()
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };
    let role = match req.params.get("role") {
        None | Some(serde_json::Value::Null) => Role::Admin,
        Some(v) => match v.as_str().and_then(Role::parse) {
            Some(r) => r,
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "role must be one of: admin, viewer",
                    None,
                )
            }
        },
    };

    if let Err(e) = attach_workspace(state, &path) {
        return err(&req.id, "db_open_failed", format!("{e:?}"), None);
    }
    state.role = role;
    ok(
        &req.id,
        json!({
            "workspacePath": path.to_string_lossy(),
            "role": role.as_str()
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}
