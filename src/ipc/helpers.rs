use rusqlite::Connection;
use serde_json::Value;

use crate::config::AppConfig;
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request, Role};

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

/// Connection and configuration of the open workspace, borrowed together so
/// a handler can run a write transaction against the current catalog.
pub fn session_mut<'a>(
    state: &'a mut AppState,
    req: &Request,
) -> Result<(&'a mut Connection, &'a AppConfig), Value> {
    match (state.db.as_mut(), state.config.as_ref()) {
        (Some(conn), Some(cfg)) => Ok((conn, cfg)),
        _ => Err(err(&req.id, "no_workspace", "select a workspace first", None)),
    }
}

pub fn require_admin(state: &AppState, req: &Request) -> Result<(), Value> {
    if state.role == Role::Admin {
        Ok(())
    } else {
        Err(err(
            &req.id,
            "forbidden",
            format!("{} requires the admin role", req.method),
            None,
        ))
    }
}

pub fn required_str(req: &Request, key: &str) -> Result<String, Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn required_i64(req: &Request, key: &str) -> Result<i64, Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn parse_bool(v: Option<&Value>, default: bool) -> Result<bool, &'static str> {
    match v {
        None => Ok(default),
        Some(v) if v.is_null() => Ok(default),
        Some(v) => v.as_bool().ok_or("must be boolean"),
    }
}

pub fn parse_opt_string(v: Option<&Value>) -> Result<Option<String>, &'static str> {
    match v {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let s = v.as_str().ok_or("must be string or null")?.trim().to_string();
            if s.is_empty() {
                Ok(None)
            } else {
                Ok(Some(s))
            }
        }
    }
}

pub fn parse_opt_i64(v: Option<&Value>) -> Result<Option<i64>, &'static str> {
    match v {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v.as_i64().map(Some).ok_or("must be integer or null"),
    }
}
