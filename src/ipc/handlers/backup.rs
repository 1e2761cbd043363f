use crate::backup::{self, BackupError};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn path_param(req: &Request, key: &str) -> Result<PathBuf, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {key}"), None))
}

/// Explicit `workspacePath`, else the open workspace.
fn target_workspace(state: &AppState, req: &Request) -> Result<PathBuf, serde_json::Value> {
    match path_param(req, "workspacePath") {
        Ok(p) => Ok(p),
        Err(_) => state
            .workspace
            .clone()
            .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None)),
    }
}

fn backup_err(req: &Request, e: &BackupError, path: &std::path::Path) -> serde_json::Value {
    tracing::warn!(request_id = %req.id, path = %path.display(), error = %e, "backup failed");
    err(
        &req.id,
        e.code(),
        e.to_string(),
        Some(json!({ "path": path.to_string_lossy() })),
    )
}

fn handle_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    let out = match path_param(req, "outPath") {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let workspace = match target_workspace(state, req) {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    match backup::export_workspace_bundle(&workspace, &out) {
        Ok(summary) => {
            tracing::info!(path = %out.display(), sha256 = %summary.db_sha256, "workspace bundle exported");
            ok(
                &req.id,
                json!({
                    "ok": true,
                    "path": out.to_string_lossy(),
                    "bundleFormat": summary.bundle_format,
                    "entryCount": summary.entry_count,
                    "dbSha256": summary.db_sha256
                }),
            )
        }
        Err(e) => backup_err(req, &e, &out),
    }
}

fn handle_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let src = match path_param(req, "inPath") {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let workspace = match target_workspace(state, req) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    if !src.is_file() {
        return err(
            &req.id,
            "not_found",
            "bundle file not found",
            Some(json!({ "path": src.to_string_lossy() })),
        );
    }

    // The file under the open connection is about to be replaced.
    let replacing_open = state.workspace.as_deref() == Some(workspace.as_path());
    if replacing_open {
        state.db = None;
    }

    let summary = match backup::import_workspace_bundle(&src, &workspace) {
        Ok(s) => s,
        Err(e) => {
            // Rejected imports leave the database untouched.
            if replacing_open {
                state.db = db::open_db(&workspace).ok();
            }
            return backup_err(req, &e, &src);
        }
    };

    match db::open_db(&workspace) {
        Ok(conn) => {
            state.workspace = Some(workspace.clone());
            state.db = Some(conn);
            tracing::info!(
                workspace = %workspace.display(),
                format = %summary.bundle_format_detected,
                "workspace bundle imported"
            );
            ok(
                &req.id,
                json!({
                    "ok": true,
                    "workspacePath": workspace.to_string_lossy(),
                    "bundleFormatDetected": summary.bundle_format_detected
                }),
            )
        }
        Err(e) => err(&req.id, "db_open_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.exportWorkspaceBundle" => Some(handle_export(state, req)),
        "backup.importWorkspaceBundle" => Some(handle_import(state, req)),
        _ => None,
    }
}
