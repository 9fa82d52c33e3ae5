use crate::backup::{self, BundleError, Census};
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::core::attach_workspace;
use crate::ipc::helpers::{db_conn, require_admin, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn census_json(census: &Census) -> serde_json::Value {
    json!({
        "tableCount": census.tables,
        "cellCount": census.cells,
        "linkCount": census.links
    })
}

fn handle_export_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let out_path = match required_str(req, "outPath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e,
    };
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };

    match backup::export_workspace_bundle(conn, &out_path) {
        Ok(export) => ok(
            &req.id,
            json!({
                "path": out_path.to_string_lossy(),
                "bundleFormat": backup::BUNDLE_FORMAT_V1,
                "bundleId": export.bundle_id,
                "dbSha256": export.db_sha256,
                "entryCount": export.entry_count,
                "census": census_json(&export.census)
            }),
        ),
        Err(e) => err(
            &req.id,
            "io_failed",
            format!("{:#}", e),
            Some(json!({ "path": out_path.to_string_lossy() })),
        ),
    }
}

fn import_error(req: &Request, e: BundleError, in_path: &str) -> serde_json::Value {
    match e {
        BundleError::Timetable { reason, cell_ids } => err(
            &req.id,
            "validation_error",
            reason,
            Some(json!({ "field": "bundle", "cellIds": cell_ids })),
        ),
        other => err(
            &req.id,
            "io_failed",
            other.to_string(),
            Some(json!({ "path": in_path })),
        ),
    }
}

fn handle_import_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_admin(state, req) {
        return e;
    }
    let in_path = match required_str(req, "inPath") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let target = req
        .params
        .get("workspacePath")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .or_else(|| state.workspace.clone());
    let Some(target) = target else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return err(
            &req.id,
            "not_found",
            "bundle file not found",
            Some(json!({ "path": in_path })),
        );
    }

    state.db = None;
    state.config = None;
    let imported = backup::import_workspace_bundle(&src, &target);

    let imported = match imported {
        Ok(v) => v,
        Err(e) => {
            if let Some(previous) = state.workspace.clone() {
                if let Err(reopen) = attach_workspace(state, &previous) {
                    tracing::warn!(error = %reopen, "failed to reopen workspace after import error");
                }
            }
            return import_error(req, e, &in_path);
        }
    };
    if let Err(e) = attach_workspace(state, &target) {
        return err(&req.id, "db_open_failed", e.to_string(), None);
    }
    ok(
        &req.id,
        json!({
            "workspacePath": target.to_string_lossy(),
            "bundleFormatDetected": imported.bundle_format_detected,
            "bundleId": imported.bundle_id,
            "census": census_json(&imported.census)
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.exportWorkspaceBundle" => Some(handle_export_bundle(state, req)),
        "backup.importWorkspaceBundle" => Some(handle_import_bundle(state, req)),
        _ => None,
    }
}
